//! Bundle adjustment of 3D points and camera poses.
//!
//! Each [`PointImageObservation`] contributes the 2-vector
//! `(project(camera, point) - pixel) · weight`.

use super::bundle::{solve_bundle, BundleFixOptions, BundleModel, BundleOptions, BundleSolution};
use crate::ir::{FactorKind, FixedMask};
use crate::params::{pack_point, unpack_point, POINT_DIM};
use anyhow::Result;
use beamcal_core::{ensure_input, CameraIntrinsics, CameraModel, PointImageObservation, Vec3};
use nalgebra::DVector;

/// Unknowns are world points, one `point_{i}` block each.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointsModel;

impl BundleModel for PointsModel {
    type Observation = PointImageObservation;
    type Unknown = Vec3;

    const PREFIX: &'static str = "point";

    fn blocks(&self) -> &'static [(&'static str, usize)] {
        &[("", POINT_DIM)]
    }

    fn pack(&self, unknown: &Vec3) -> Vec<DVector<f64>> {
        vec![pack_point(unknown)]
    }

    fn unpack(&self, blocks: &[&DVector<f64>]) -> Result<Vec3> {
        unpack_point(blocks[0].as_view())
    }

    fn fixed(&self, index: usize, fix: &BundleFixOptions) -> Vec<FixedMask> {
        if fix.position_fixed(index) {
            vec![FixedMask::all_fixed(POINT_DIM)]
        } else {
            vec![FixedMask::all_free()]
        }
    }

    fn camera_of(&self, obs: &PointImageObservation) -> usize {
        obs.view_index
    }

    fn unknown_of(&self, obs: &PointImageObservation) -> usize {
        obs.point_index
    }

    fn check(&self, index: usize, obs: &PointImageObservation) -> Result<()> {
        ensure_input!(
            obs.pixel.iter().all(|v| v.is_finite()) && obs.weight.is_finite() && obs.weight >= 0.0,
            "point observation {} has a non-finite pixel or a bad weight",
            index
        );
        Ok(())
    }

    fn factor(&self, obs: &PointImageObservation, intrinsics: &CameraIntrinsics) -> FactorKind {
        FactorKind::PointReprojection {
            intrinsics: intrinsics.clone(),
            uv: [obs.pixel.x, obs.pixel.y],
            w: obs.weight,
        }
    }
}

/// Refine points and cameras from their reprojections.
pub fn bundle_points(
    cameras: &[CameraModel<f64>],
    points: &[Vec3],
    observations: &[PointImageObservation],
    opts: &BundleOptions,
) -> Result<BundleSolution<Vec3>> {
    solve_bundle(&PointsModel, cameras, points, observations, opts)
}

//! Bundle adjustment of laser projectors and camera poses.
//!
//! A laser is its rigid body (`laser_{i}`, 6) plus its optical block
//! (`laser_{i}_fov`, `[fov.x, fov.y, fov2.x, fov2.y]`). Each
//! [`LineImageObservation`] contributes two residuals: the signed distances
//! from the projected laser origin and from the projected beam point nearest
//! the image centre to the observed line. One observation thereby constrains
//! both the position and the steering angles.

use super::bundle::{solve_bundle, BundleFixOptions, BundleModel, BundleOptions, BundleSolution};
use crate::ir::{FactorKind, FixedMask};
use crate::params::{pack_fov, pack_pose, unpack_laser, FOV_DIM, POSE_DIM};
use anyhow::Result;
use beamcal_core::{ensure_input, CameraIntrinsics, CameraModel, LaserProjectorModel, LineImageObservation};
use nalgebra::DVector;

/// FOV block indices of the first-order terms.
const FOV_INDICES: [usize; 2] = [0, 1];
/// FOV block indices of the second-order terms.
const FOV2_INDICES: [usize; 2] = [2, 3];

#[derive(Debug, Clone, Copy, Default)]
pub struct LaserModel;

impl BundleModel for LaserModel {
    type Observation = LineImageObservation;
    type Unknown = LaserProjectorModel<f64>;

    const PREFIX: &'static str = "laser";

    fn blocks(&self) -> &'static [(&'static str, usize)] {
        &[("", POSE_DIM), ("_fov", FOV_DIM)]
    }

    fn pack(&self, unknown: &LaserProjectorModel<f64>) -> Vec<DVector<f64>> {
        vec![pack_pose(&unknown.rigid_body), pack_fov(unknown)]
    }

    fn unpack(&self, blocks: &[&DVector<f64>]) -> Result<LaserProjectorModel<f64>> {
        unpack_laser(blocks[0].as_view(), blocks[1].as_view())
    }

    fn fixed(&self, index: usize, fix: &BundleFixOptions) -> Vec<FixedMask> {
        let mut fov = FixedMask::all_free();
        if fix.fix_fov {
            fov = fov.with(&FixedMask::fix_indices(&FOV_INDICES));
        }
        if fix.fix_fov2 {
            fov = fov.with(&FixedMask::fix_indices(&FOV2_INDICES));
        }
        vec![fix.pose_mask(index), fov]
    }

    fn camera_of(&self, obs: &LineImageObservation) -> usize {
        obs.camera_index
    }

    fn unknown_of(&self, obs: &LineImageObservation) -> usize {
        obs.laser_index
    }

    fn check(&self, index: usize, obs: &LineImageObservation) -> Result<()> {
        ensure_input!(
            obs.command_in_range(),
            "line observation {} has steering command ({}, {}) outside [-1, 1]²",
            index,
            obs.command.x,
            obs.command.y
        );
        ensure_input!(
            obs.line.is_finite() && obs.line.t.norm() > 0.0,
            "line observation {} has a degenerate line",
            index
        );
        Ok(())
    }

    fn factor(&self, obs: &LineImageObservation, intrinsics: &CameraIntrinsics) -> FactorKind {
        let dir = obs.line.t.normalize();
        FactorKind::LaserLine {
            intrinsics: intrinsics.clone(),
            command: [obs.command.x, obs.command.y],
            line_point: [obs.line.s.x, obs.line.s.y],
            line_dir: [dir.x, dir.y],
            w: obs.weight,
        }
    }
}

/// Refine lasers (pose and optics) and cameras from observed beam lines.
pub fn bundle_lasers(
    cameras: &[CameraModel<f64>],
    lasers: &[LaserProjectorModel<f64>],
    observations: &[LineImageObservation],
    opts: &BundleOptions,
) -> Result<BundleSolution<LaserProjectorModel<f64>>> {
    solve_bundle(&LaserModel, cameras, lasers, observations, opts)
}

//! Bundle adjustment of rigid objects (markers) and camera poses.
//!
//! Every object has a set of known local points. Its unknown is the
//! object → world pose, and each [`ObjectImageObservation`] contributes the
//! reprojection error of all of the object's points in one view.

use super::bundle::{solve_bundle, BundleFixOptions, BundleModel, BundleOptions, BundleSolution};
use crate::ir::{FactorKind, FixedMask};
use crate::params::{pack_pose, unpack_pose, POSE_DIM};
use anyhow::Result;
use beamcal_core::{
    ensure_input, CameraIntrinsics, CameraModel, ObjectImageObservation, RigidTransform, Vec3,
};
use nalgebra::DVector;

/// Rigid objects with their local points, one `object_{i}` block each.
#[derive(Debug, Clone)]
pub struct ObjectsModel {
    pub local_points: Vec<Vec<Vec3>>,
}

impl ObjectsModel {
    pub fn new(local_points: Vec<Vec<Vec3>>) -> Self {
        Self { local_points }
    }
}

impl BundleModel for ObjectsModel {
    type Observation = ObjectImageObservation;
    type Unknown = RigidTransform<f64>;

    const PREFIX: &'static str = "object";

    fn blocks(&self) -> &'static [(&'static str, usize)] {
        &[("", POSE_DIM)]
    }

    fn pack(&self, unknown: &RigidTransform<f64>) -> Vec<DVector<f64>> {
        vec![pack_pose(unknown)]
    }

    fn unpack(&self, blocks: &[&DVector<f64>]) -> Result<RigidTransform<f64>> {
        unpack_pose(blocks[0].as_view())
    }

    fn fixed(&self, index: usize, fix: &BundleFixOptions) -> Vec<FixedMask> {
        vec![fix.pose_mask(index)]
    }

    fn camera_of(&self, obs: &ObjectImageObservation) -> usize {
        obs.view_index
    }

    fn unknown_of(&self, obs: &ObjectImageObservation) -> usize {
        obs.object_index
    }

    fn check(&self, index: usize, obs: &ObjectImageObservation) -> Result<()> {
        let local = self.local_points.get(obs.object_index).ok_or_else(|| {
            beamcal_core::CalibError::invalid(format!(
                "observation {index}: object {} has no local points",
                obs.object_index
            ))
        })?;
        ensure_input!(
            !local.is_empty() && obs.pixels.len() == local.len(),
            "observation {} has {} pixels for object {} with {} local points",
            index,
            obs.pixels.len(),
            obs.object_index,
            local.len()
        );
        Ok(())
    }

    fn factor(&self, obs: &ObjectImageObservation, intrinsics: &CameraIntrinsics) -> FactorKind {
        FactorKind::ObjectReprojection {
            intrinsics: intrinsics.clone(),
            local_points: self.local_points[obs.object_index]
                .iter()
                .map(|p| [p.x, p.y, p.z])
                .collect(),
            uvs: obs.pixels.iter().map(|uv| [uv.x, uv.y]).collect(),
            w: obs.weight,
        }
    }
}

/// Refine object poses and cameras from the reprojections of the objects'
/// local points.
pub fn bundle_objects(
    cameras: &[CameraModel<f64>],
    local_points: &[Vec<Vec3>],
    objects: &[RigidTransform<f64>],
    observations: &[ObjectImageObservation],
    opts: &BundleOptions,
) -> Result<BundleSolution<RigidTransform<f64>>> {
    let model = ObjectsModel::new(local_points.to_vec());
    solve_bundle(&model, cameras, objects, observations, opts)
}

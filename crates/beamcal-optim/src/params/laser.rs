//! Laser projector optical block.

use super::pose::pose_from_view;
use anyhow::{ensure, Result};
use beamcal_core::LaserProjectorModel;
use nalgebra::{DVector, DVectorView, RealField, Vector2};

/// `[fov.x, fov.y, fov2.x, fov2.y]`.
pub const FOV_DIM: usize = 4;

pub fn pack_fov(laser: &LaserProjectorModel<f64>) -> DVector<f64> {
    DVector::from_row_slice(&laser.fov_params())
}

/// Rebuild a projector from its pose and FOV blocks.
pub fn unpack_laser(
    pose: DVectorView<'_, f64>,
    fov: DVectorView<'_, f64>,
) -> Result<LaserProjectorModel<f64>> {
    ensure!(
        pose.len() == super::POSE_DIM,
        "expected laser pose of length {}, got {}",
        super::POSE_DIM,
        pose.len()
    );
    ensure!(
        fov.len() == FOV_DIM,
        "expected laser fov block of length {}, got {}",
        FOV_DIM,
        fov.len()
    );
    Ok(laser_from_views(pose, fov))
}

pub(crate) fn laser_from_views<T: RealField>(
    pose: DVectorView<'_, T>,
    fov: DVectorView<'_, T>,
) -> LaserProjectorModel<T> {
    debug_assert!(fov.len() >= FOV_DIM, "fov block must have 4 params");
    LaserProjectorModel::new(
        pose_from_view(pose),
        Vector2::new(fov[0].clone(), fov[1].clone()),
        Vector2::new(fov[2].clone(), fov[3].clone()),
    )
}

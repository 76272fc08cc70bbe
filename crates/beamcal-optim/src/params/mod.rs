//! Parameter block layouts.
//!
//! Every unknown is stored as a plain Euclidean vector:
//!
//! - [`pose`]: `[tx, ty, tz, rx, ry, rz]`, a [`RigidTransform`](beamcal_core::RigidTransform)
//!   with Euler angles;
//! - [`laser`]: `[fov.x, fov.y, fov2.x, fov2.y]`, the optical block of a laser projector;
//! - 3D points as `[x, y, z]`.
//!
//! The first three entries of pose and point blocks are the position, which is
//! what the gauge factors read.

pub mod laser;
pub mod pose;

pub use laser::{pack_fov, unpack_laser, FOV_DIM};
pub use pose::{pack_pose, pose_from_view, unpack_pose, POSE_DIM};

use anyhow::{ensure, Result};
use beamcal_core::Vec3;
use nalgebra::{DVector, DVectorView};

/// Dimension of a 3D point block.
pub const POINT_DIM: usize = 3;

pub fn pack_point(p: &Vec3) -> DVector<f64> {
    DVector::from_row_slice(p.as_slice())
}

pub fn unpack_point(v: DVectorView<'_, f64>) -> Result<Vec3> {
    ensure!(
        v.len() == POINT_DIM,
        "expected point vector of length {}, got {}",
        POINT_DIM,
        v.len()
    );
    Ok(Vec3::new(v[0], v[1], v[2]))
}

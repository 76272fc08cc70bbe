//! Euler-angle pose blocks.

use anyhow::{ensure, Result};
use beamcal_core::RigidTransform;
use nalgebra::{DVector, DVectorView, RealField, Vector3};

/// `[tx, ty, tz, rx, ry, rz]`.
pub const POSE_DIM: usize = 6;

/// Index of the first rotation entry in a pose block.
pub const ROTATION_OFFSET: usize = 3;

pub fn pack_pose(pose: &RigidTransform<f64>) -> DVector<f64> {
    DVector::from_row_slice(&pose.to_params())
}

pub fn unpack_pose(v: DVectorView<'_, f64>) -> Result<RigidTransform<f64>> {
    ensure!(
        v.len() == POSE_DIM,
        "expected pose vector of length {}, got {}",
        POSE_DIM,
        v.len()
    );
    Ok(pose_from_view(v))
}

/// Pose from a parameter view, for any solver scalar.
pub fn pose_from_view<T: RealField>(v: DVectorView<'_, T>) -> RigidTransform<T> {
    debug_assert!(v.len() >= POSE_DIM, "pose block must have 6 params");
    RigidTransform::new(
        Vector3::new(v[0].clone(), v[1].clone(), v[2].clone()),
        Vector3::new(v[3].clone(), v[4].clone(), v[5].clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamcal_core::Vec3;

    #[test]
    fn pose_block_layout_is_translation_then_angles() {
        let pose = RigidTransform::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.1, -0.2, 0.3));
        let v = pack_pose(&pose);
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0, 0.1, -0.2, 0.3]);
        assert_eq!(unpack_pose(v.as_view()).unwrap(), pose);
        assert!(unpack_pose(DVector::<f64>::zeros(7).as_view()).is_err());
    }
}

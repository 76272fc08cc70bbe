//! Gauge residuals.
//!
//! Image observations alone fix a reconstruction only up to a similarity
//! transform. These soft constraints pin it down. Each one spans a set of
//! blocks and reads the position from the first three entries of every block
//! (point or pose).

use crate::params::pose::ROTATION_OFFSET;
use nalgebra::{DVector, DVectorView, RealField, SVector, Vector3};

fn position<T: RealField>(block: &DVectorView<'_, T>) -> Vector3<T> {
    debug_assert!(block.len() >= 3, "position blocks need at least 3 params");
    Vector3::new(block[0].clone(), block[1].clone(), block[2].clone())
}

/// `(mean position - target) · w`.
pub(crate) fn scene_center_generic<T: RealField>(
    blocks: &[DVectorView<'_, T>],
    target: [f64; 3],
    w: f64,
) -> SVector<T, 3> {
    debug_assert!(!blocks.is_empty());
    let n = T::from_usize(blocks.len()).unwrap();
    let sum = blocks
        .iter()
        .fold(Vector3::<T>::zeros(), |acc, b| acc + position(b));
    let target = Vector3::new(
        T::from_f64(target[0]).unwrap(),
        T::from_f64(target[1]).unwrap(),
        T::from_f64(target[2]).unwrap(),
    );
    (sum / n - target) * T::from_f64(w).unwrap()
}

/// `ln(max |position| / radius) · w`.
///
/// Symmetric in scale: doubling and halving the scene cost the same.
pub(crate) fn scene_scale_generic<T: RealField>(
    blocks: &[DVectorView<'_, T>],
    radius: f64,
    w: f64,
) -> SVector<T, 1> {
    let mut max_norm = T::zero();
    for b in blocks {
        let n = position(b).norm();
        if n > max_norm {
            max_norm = n;
        }
    }
    let ratio = max_norm / T::from_f64(radius).unwrap();
    SVector::<T, 1>::new(ratio.ln() * T::from_f64(w).unwrap())
}

/// `(pose.rotation[axis] - angle) · w`.
pub(crate) fn fixed_rotation_axis_generic<T: RealField>(
    pose: DVectorView<'_, T>,
    axis: usize,
    angle: f64,
    w: f64,
) -> SVector<T, 1> {
    debug_assert!(axis < 3);
    debug_assert!(pose.len() >= ROTATION_OFFSET + 3, "pose block must have 6 params");
    SVector::<T, 1>::new(
        (pose[ROTATION_OFFSET + axis].clone() - T::from_f64(angle).unwrap())
            * T::from_f64(w).unwrap(),
    )
}

/// `(position[axis] - mean(position[axis])) · w` for every block.
pub(crate) fn coplanar_generic<T: RealField>(
    blocks: &[DVectorView<'_, T>],
    axis: usize,
    w: f64,
) -> DVector<T> {
    debug_assert!(axis < 3);
    let n = T::from_usize(blocks.len()).unwrap();
    let mean = blocks
        .iter()
        .fold(T::zero(), |acc, b| acc + b[axis].clone())
        / n;
    let w = T::from_f64(w).unwrap();
    DVector::from_iterator(
        blocks.len(),
        blocks
            .iter()
            .map(|b| (b[axis].clone() - mean.clone()) * w.clone()),
    )
}

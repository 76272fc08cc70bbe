//! Distances of a beam's pixels to a line through a shared point.

use beamcal_core::Line2D;
use nalgebra::{DVector, DVectorView, RealField, Vector2};

/// One residual per pixel: `weight · signed_distance(pixel, line(point, angle))`.
///
/// - `point`: shared convergence point (2)
/// - `angle`: line direction angle in radians (1)
pub(crate) fn common_point_line_generic<T: RealField>(
    point: DVectorView<'_, T>,
    angle: DVectorView<'_, T>,
    pixels: &[[f64; 2]],
    weights: &[f64],
) -> DVector<T> {
    debug_assert!(point.len() == 2, "point block must have 2 params");
    debug_assert!(angle.len() == 1, "angle block must have 1 param");
    debug_assert_eq!(pixels.len(), weights.len());
    let line = Line2D::from_point_angle(
        Vector2::new(point[0].clone(), point[1].clone()),
        angle[0].clone(),
    );
    DVector::from_iterator(
        pixels.len(),
        pixels.iter().zip(weights).map(|(px, w)| {
            let p = Vector2::new(T::from_f64(px[0]).unwrap(), T::from_f64(px[1]).unwrap());
            line.signed_distance(&p) * T::from_f64(*w).unwrap()
        }),
    )
}

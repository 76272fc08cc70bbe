//! Laser beam line residual.
//!
//! A beam observed as an image line constrains both where the projector is
//! and where it points. Two signed distances to the observed line are used:
//!
//! 1. the reprojected projector origin;
//! 2. the point of the reprojected beam line closest to the image centre.
//!
//! The first pins the position, the second the steering angles.

use crate::params::laser::laser_from_views;
use crate::params::pose_from_view;
use beamcal_core::{CameraIntrinsics, Line2D};
use nalgebra::{DVectorView, RealField, SVector, Vector2, Vector3};

/// - `camera`: world → view pose block (6)
/// - `laser_pose`: object → world pose block (6)
/// - `laser_fov`: `[fov.x, fov.y, fov2.x, fov2.y]` (4)
#[allow(clippy::too_many_arguments)]
pub(crate) fn laser_line_residual_generic<T: RealField>(
    camera: DVectorView<'_, T>,
    laser_pose: DVectorView<'_, T>,
    laser_fov: DVectorView<'_, T>,
    intrinsics: &CameraIntrinsics,
    command: [f64; 2],
    line_point: [f64; 2],
    line_dir: [f64; 2],
    w: f64,
) -> SVector<T, 2> {
    let view = pose_from_view(camera);
    let laser = laser_from_views(laser_pose, laser_fov);
    let cmd = Vector2::new(
        T::from_f64(command[0]).unwrap(),
        T::from_f64(command[1]).unwrap(),
    );
    let ray = laser.cast_ray(&cmd);

    let project = |p: &Vector3<T>| intrinsics.view_to_image(&view.transform_point(p));
    let origin_px = project(&ray.origin);
    let ahead_px = project(&(ray.origin.clone() + ray.direction.clone()));
    let beam = Line2D::from_points(origin_px.clone(), ahead_px);
    let centre = Vector2::new(
        T::from_f64(intrinsics.width as f64 * 0.5).unwrap(),
        T::from_f64(intrinsics.height as f64 * 0.5).unwrap(),
    );
    let near_centre = beam.closest_point_to(&centre);

    let observed = Line2D {
        s: Vector2::new(
            T::from_f64(line_point[0]).unwrap(),
            T::from_f64(line_point[1]).unwrap(),
        ),
        t: Vector2::new(
            T::from_f64(line_dir[0]).unwrap(),
            T::from_f64(line_dir[1]).unwrap(),
        ),
    };
    let w = T::from_f64(w).unwrap();
    SVector::<T, 2>::new(
        observed.signed_distance(&origin_px) * w.clone(),
        observed.signed_distance(&near_centre) * w,
    )
}

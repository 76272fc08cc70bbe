//! Image-space reprojection residuals.

use crate::params::pose_from_view;
use beamcal_core::{CameraIntrinsics, RigidTransform};
use nalgebra::{DVector, DVectorView, RealField, SVector, Vector3};

fn reproject<T: RealField>(
    view: &RigidTransform<T>,
    intrinsics: &CameraIntrinsics,
    pw: Vector3<T>,
    uv: [f64; 2],
    w: f64,
) -> SVector<T, 2> {
    let proj = intrinsics.view_to_image(&view.transform_point(&pw));
    let w = T::from_f64(w).unwrap();
    SVector::<T, 2>::new(
        (proj.x.clone() - T::from_f64(uv[0]).unwrap()) * w.clone(),
        (proj.y.clone() - T::from_f64(uv[1]).unwrap()) * w,
    )
}

/// `(project(camera, point) - uv) · w`.
///
/// - `camera`: world → view pose block (6)
/// - `point`: world point block (3)
pub(crate) fn point_reprojection_generic<T: RealField>(
    camera: DVectorView<'_, T>,
    point: DVectorView<'_, T>,
    intrinsics: &CameraIntrinsics,
    uv: [f64; 2],
    w: f64,
) -> SVector<T, 2> {
    debug_assert!(point.len() >= 3, "point block must have 3 params");
    let pw = Vector3::new(point[0].clone(), point[1].clone(), point[2].clone());
    reproject(&pose_from_view(camera), intrinsics, pw, uv, w)
}

/// Reprojection of a point whose world position is known.
pub(crate) fn known_point_reprojection_generic<T: RealField>(
    camera: DVectorView<'_, T>,
    intrinsics: &CameraIntrinsics,
    pw: [f64; 3],
    uv: [f64; 2],
    w: f64,
) -> SVector<T, 2> {
    let pw = Vector3::new(
        T::from_f64(pw[0]).unwrap(),
        T::from_f64(pw[1]).unwrap(),
        T::from_f64(pw[2]).unwrap(),
    );
    reproject(&pose_from_view(camera), intrinsics, pw, uv, w)
}

/// Reprojection of every local point of a rigid object, `2 · N` residuals.
///
/// - `camera`: world → view pose block (6)
/// - `object`: object → world pose block (6)
pub(crate) fn object_reprojection_generic<T: RealField>(
    camera: DVectorView<'_, T>,
    object: DVectorView<'_, T>,
    intrinsics: &CameraIntrinsics,
    local_points: &[[f64; 3]],
    uvs: &[[f64; 2]],
    w: f64,
) -> DVector<T> {
    debug_assert_eq!(local_points.len(), uvs.len());
    let view = pose_from_view(camera);
    let object = pose_from_view(object);
    let mut out = DVector::zeros(2 * uvs.len());
    for (k, (local, uv)) in local_points.iter().zip(uvs).enumerate() {
        let pl = Vector3::new(
            T::from_f64(local[0]).unwrap(),
            T::from_f64(local[1]).unwrap(),
            T::from_f64(local[2]).unwrap(),
        );
        let r = reproject(&view, intrinsics, object.transform_point(&pl), *uv, w);
        out[2 * k] = r[0].clone();
        out[2 * k + 1] = r[1].clone();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::pack_pose;
    use beamcal_core::synthetic::default_intrinsics;
    use beamcal_core::{RigidTransform, Vec3};

    #[test]
    fn exact_projection_has_zero_residual() {
        let view = RigidTransform::look_at(&Vec3::new(0.5, 1.0, 5.0), &Vec3::zeros(), &Vec3::y());
        let k = default_intrinsics();
        let p = Vec3::new(0.2, -0.3, 0.4);
        let uv = k.view_to_image(&view.transform_point(&p));
        let cam = pack_pose(&view);
        let point = DVector::from_row_slice(p.as_slice());
        let r = point_reprojection_generic(cam.as_view(), point.as_view(), &k, [uv.x, uv.y], 1.0);
        assert!(r.norm() < 1e-9);

        let off = point_reprojection_generic(
            cam.as_view(),
            point.as_view(),
            &k,
            [uv.x + 3.0, uv.y - 4.0],
            2.0,
        );
        assert!((off.norm() - 10.0).abs() < 1e-9);
    }
}

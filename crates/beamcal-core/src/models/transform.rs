//! Euler-angle rigid transform.
//!
//! Storage is `translation` plus `rotation = [rx, ry, rz]` in radians. The
//! homogeneous matrix is `T(t) · Rx(rx) · Ry(ry) · Rz(rz)`, so a point is
//! rotated about Z first, then Y, then X, then translated.
//!
//! The same type serves three roles: a camera view (world → view), a laser
//! projector body (object → world) and a marker pose (object → world).

use crate::math::{lift_vec3, lit};
use nalgebra::{Matrix3, Matrix4, RealField, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: RealField + Serialize",
    deserialize = "T: RealField + Deserialize<'de>"
))]
pub struct RigidTransform<T: RealField> {
    pub translation: Vector3<T>,
    /// Euler angles `[rx, ry, rz]` in radians.
    pub rotation: Vector3<T>,
}

impl<T: RealField> Default for RigidTransform<T> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<T: RealField> RigidTransform<T> {
    pub fn new(translation: Vector3<T>, rotation: Vector3<T>) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: Vector3::zeros(),
        }
    }

    pub fn from_translation(translation: Vector3<T>) -> Self {
        Self {
            translation,
            rotation: Vector3::zeros(),
        }
    }

    /// Rotation matrix `Rx · Ry · Rz`.
    pub fn rotation_matrix(&self) -> Matrix3<T> {
        euler_xyz_to_matrix(
            self.rotation[0].clone(),
            self.rotation[1].clone(),
            self.rotation[2].clone(),
        )
    }

    /// 4×4 homogeneous matrix.
    pub fn to_matrix(&self) -> Matrix4<T> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn transform_point(&self, p: &Vector3<T>) -> Vector3<T> {
        self.rotation_matrix() * p + &self.translation
    }

    pub fn transform_vector(&self, v: &Vector3<T>) -> Vector3<T> {
        self.rotation_matrix() * v
    }

    /// Build from a rotation matrix and translation, recovering Euler angles.
    pub fn from_rotation_translation(rotation: &Matrix3<T>, translation: Vector3<T>) -> Self {
        Self {
            translation,
            rotation: matrix_to_euler_xyz(rotation),
        }
    }

    /// Build from the upper 3×4 block of a homogeneous matrix.
    pub fn from_matrix(m: &Matrix4<T>) -> Self {
        let r: Matrix3<T> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let t: Vector3<T> = m.fixed_view::<3, 1>(0, 3).into_owned();
        Self::from_rotation_translation(&r, t)
    }

    pub fn inverse(&self) -> Self {
        let rt = self.rotation_matrix().transpose();
        let t = -(&rt * &self.translation);
        Self::from_rotation_translation(&rt, t)
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        let r = self.rotation_matrix() * other.rotation_matrix();
        let t = self.transform_point(&other.translation);
        Self::from_rotation_translation(&r, t)
    }
}

impl RigidTransform<f64> {
    /// Convert `f64` constants into any solver scalar.
    pub fn lift<T: RealField>(&self) -> RigidTransform<T> {
        RigidTransform {
            translation: lift_vec3(&self.translation),
            rotation: lift_vec3(&self.rotation),
        }
    }

    /// View transform (world → view) for an OpenGL-style camera at `eye`
    /// looking at `target`, with the camera's -Z axis along the view direction.
    pub fn look_at(eye: &Vector3<f64>, target: &Vector3<f64>, up: &Vector3<f64>) -> Self {
        let z = (eye - target).normalize();
        let x = up.cross(&z).normalize();
        let y = z.cross(&x);
        let r = Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()]);
        let t = -(r * eye);
        Self::from_rotation_translation(&r, t)
    }

    /// Largest absolute difference of translation and rotation components.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        let dt = (self.translation - other.translation).amax();
        let dr = (self.rotation_matrix() - other.rotation_matrix()).amax();
        dt.max(dr)
    }

    /// Parameter vector `[tx, ty, tz, rx, ry, rz]`.
    pub fn to_params(&self) -> [f64; 6] {
        [
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        ]
    }
}

impl From<RigidTransform<f32>> for RigidTransform<f64> {
    fn from(v: RigidTransform<f32>) -> Self {
        Self {
            translation: v.translation.map(f64::from),
            rotation: v.rotation.map(f64::from),
        }
    }
}

impl From<RigidTransform<f64>> for RigidTransform<f32> {
    fn from(v: RigidTransform<f64>) -> Self {
        Self {
            translation: v.translation.map(|x| x as f32),
            rotation: v.rotation.map(|x| x as f32),
        }
    }
}

/// `Rx(a) · Ry(b) · Rz(c)`.
pub fn euler_xyz_to_matrix<T: RealField>(a: T, b: T, c: T) -> Matrix3<T> {
    let (sa, ca) = a.sin_cos();
    let (sb, cb) = b.sin_cos();
    let (sc, cc) = c.sin_cos();
    Matrix3::new(
        cb.clone() * cc.clone(),
        -(cb.clone() * sc.clone()),
        sb.clone(),
        ca.clone() * sc.clone() + sa.clone() * sb.clone() * cc.clone(),
        ca.clone() * cc.clone() - sa.clone() * sb.clone() * sc.clone(),
        -(sa.clone() * cb.clone()),
        sa.clone() * sc.clone() - ca.clone() * sb.clone() * cc.clone(),
        sa.clone() * cc + ca.clone() * sb * sc,
        ca * cb,
    )
}

/// Inverse of [`euler_xyz_to_matrix`].
///
/// In the gimbal case (`|cos ry| ≈ 0`) `rz` is pinned to zero and the whole
/// in-plane rotation is attributed to `rx`.
pub fn matrix_to_euler_xyz<T: RealField>(r: &Matrix3<T>) -> Vector3<T> {
    let one = T::one();
    let s = r[(0, 2)].clone().min(one.clone()).max(-one);
    let b = s.clone().asin();
    if s.abs() < lit(1.0 - 1e-9) {
        let a = (-r[(1, 2)].clone()).atan2(r[(2, 2)].clone());
        let c = (-r[(0, 1)].clone()).atan2(r[(0, 0)].clone());
        Vector3::new(a, b, c)
    } else {
        let a = r[(2, 1)].clone().atan2(r[(1, 1)].clone());
        Vector3::new(a, b, T::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> RigidTransform<f64> {
        RigidTransform::new(Vector3::new(0.3, -1.2, 2.0), Vector3::new(0.2, -0.4, 1.1))
    }

    #[test]
    fn matrix_order_is_translate_then_xyz() {
        let t = sample();
        let rx = nalgebra::Rotation3::from_axis_angle(&Vector3::x_axis(), 0.2);
        let ry = nalgebra::Rotation3::from_axis_angle(&Vector3::y_axis(), -0.4);
        let rz = nalgebra::Rotation3::from_axis_angle(&Vector3::z_axis(), 1.1);
        let expected = rx * ry * rz;
        assert_relative_eq!(t.rotation_matrix(), *expected.matrix(), epsilon = 1e-12);
        assert_relative_eq!(t.to_matrix()[(1, 3)], -1.2, epsilon = 1e-12);
    }

    #[test]
    fn euler_extraction_recovers_angles() {
        let t = sample();
        let back = matrix_to_euler_xyz(&t.rotation_matrix());
        assert_relative_eq!(back, t.rotation, epsilon = 1e-10);
    }

    #[test]
    fn euler_extraction_handles_gimbal_lock() {
        let r = euler_xyz_to_matrix(0.3, std::f64::consts::FRAC_PI_2, 0.2);
        let back = matrix_to_euler_xyz(&r);
        assert_relative_eq!(back.z, 0.0);
        let rebuilt = euler_xyz_to_matrix(back.x, back.y, back.z);
        assert_relative_eq!(rebuilt, r, epsilon = 1e-9);
    }

    #[test]
    fn inverse_of_composition_reverses_order() {
        let t1 = sample();
        let t2 = RigidTransform::new(Vector3::new(-0.5, 0.1, 0.7), Vector3::new(-0.9, 0.3, 0.05));
        let lhs = t1.compose(&t2).inverse();
        let rhs = t2.inverse().compose(&t1.inverse());
        assert!(lhs.max_abs_diff(&rhs) < 1e-10);

        let p = Vector3::new(1.0, 2.0, 3.0);
        let round = t1.inverse().transform_point(&t1.transform_point(&p));
        assert_relative_eq!(round, p, epsilon = 1e-10);
    }

    #[test]
    fn f32_round_trip_keeps_single_precision() {
        let t = sample();
        let narrow: RigidTransform<f32> = t.clone().into();
        let wide: RigidTransform<f64> = narrow.into();
        assert!(t.max_abs_diff(&wide) < 1e-6);
    }

    #[test]
    fn look_at_points_negative_z_at_target() {
        let eye = Vector3::new(3.0, 1.0, 4.0);
        let target = Vector3::new(0.0, 0.0, 0.0);
        let view = RigidTransform::look_at(&eye, &target, &Vector3::y());
        let in_view = view.transform_point(&target);
        assert_relative_eq!(in_view.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(in_view.y, 0.0, epsilon = 1e-12);
        assert!(in_view.z < 0.0);
        assert_relative_eq!(view.transform_point(&eye), Vector3::zeros(), epsilon = 1e-12);
    }
}

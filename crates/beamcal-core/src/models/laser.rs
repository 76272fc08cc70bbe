use super::{Ray, RigidTransform};
use crate::math::{lift_vec2, lit};
use nalgebra::{RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Steerable laser projector.
///
/// `rigid_body` maps the projector's object frame to world. A normalized
/// steering command `c ∈ [-1, 1]²` becomes two angles
///
/// ```text
/// angle = c · fov / 2 · π / 180 + c² · fov2
/// ```
///
/// and the beam direction is `+Z` rotated about Y by `angle.x`, then about X by
/// `angle.y`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: RealField + Serialize",
    deserialize = "T: RealField + Deserialize<'de>"
))]
pub struct LaserProjectorModel<T: RealField> {
    pub rigid_body: RigidTransform<T>,
    /// Full field of view in degrees.
    pub fov: Vector2<T>,
    /// Second-order correction in radians per squared command unit.
    pub fov2: Vector2<T>,
}

impl<T: RealField> LaserProjectorModel<T> {
    pub fn new(rigid_body: RigidTransform<T>, fov: Vector2<T>, fov2: Vector2<T>) -> Self {
        Self {
            rigid_body,
            fov,
            fov2,
        }
    }

    pub fn steering_angles(&self, command: &Vector2<T>) -> Vector2<T> {
        let k: T = lit(std::f64::consts::PI / 360.0);
        let angle = |i: usize| {
            let c = command[i].clone();
            c.clone() * self.fov[i].clone() * k.clone() + c.clone() * c * self.fov2[i].clone()
        };
        Vector2::new(angle(0), angle(1))
    }

    /// Beam direction in the projector's object frame.
    pub fn direction_in_object(&self, command: &Vector2<T>) -> Vector3<T> {
        let angle = self.steering_angles(command);
        let (sx, cx) = angle.x.clone().sin_cos();
        let (sy, cy) = angle.y.clone().sin_cos();
        Vector3::new(sx, -(cx.clone() * sy), cx * cy)
    }

    /// World-space beam for a steering command.
    pub fn cast_ray(&self, command: &Vector2<T>) -> Ray<T> {
        let direction = self
            .rigid_body
            .transform_vector(&self.direction_in_object(command));
        Ray::new(self.rigid_body.translation.clone(), direction)
    }

    pub fn position(&self) -> Vector3<T> {
        self.rigid_body.translation.clone()
    }
}

impl LaserProjectorModel<f64> {
    /// Projector with no second-order correction.
    pub fn with_fov(rigid_body: RigidTransform<f64>, fov_degrees: Vector2<f64>) -> Self {
        Self::new(rigid_body, fov_degrees, Vector2::zeros())
    }

    pub fn lift<T: RealField>(&self) -> LaserProjectorModel<T> {
        LaserProjectorModel {
            rigid_body: self.rigid_body.lift(),
            fov: lift_vec2(&self.fov),
            fov2: lift_vec2(&self.fov2),
        }
    }

    /// FOV parameter vector `[fov.x, fov.y, fov2.x, fov2.y]`.
    pub fn fov_params(&self) -> [f64; 4] {
        [self.fov.x, self.fov.y, self.fov2.x, self.fov2.y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn centre_command_fires_along_z() {
        let laser = LaserProjectorModel::with_fov(RigidTransform::identity(), Vector2::new(60.0, 40.0));
        let d = laser.direction_in_object(&Vector2::zeros());
        assert_relative_eq!(d, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn full_command_reaches_half_fov() {
        let laser = LaserProjectorModel::with_fov(RigidTransform::identity(), Vector2::new(60.0, 40.0));
        let d = laser.direction_in_object(&Vector2::new(1.0, 0.0));
        assert_relative_eq!(d.x.atan2(d.z), 30f64.to_radians(), epsilon = 1e-12);

        // Positive Y command tilts the beam towards -Y.
        let d = laser.direction_in_object(&Vector2::new(0.0, 1.0));
        assert_relative_eq!((-d.y).atan2(d.z), 20f64.to_radians(), epsilon = 1e-12);
    }

    #[test]
    fn second_order_term_is_symmetric_in_command_sign() {
        let laser = LaserProjectorModel::new(
            RigidTransform::identity(),
            Vector2::new(0.0, 0.0),
            Vector2::new(0.1, 0.0),
        );
        let a = laser.steering_angles(&Vector2::new(0.5, 0.0));
        let b = laser.steering_angles(&Vector2::new(-0.5, 0.0));
        assert_relative_eq!(a.x, 0.025);
        assert_relative_eq!(a.x, b.x);
    }

    #[test]
    fn cast_ray_starts_at_projector() {
        let body = RigidTransform::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.0, 0.3, 0.0));
        let laser = LaserProjectorModel::with_fov(body.clone(), Vector2::new(30.0, 30.0));
        let ray = laser.cast_ray(&Vector2::zeros());
        assert_relative_eq!(ray.origin, Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(ray.direction, body.transform_vector(&Vector3::z()), epsilon = 1e-12);
    }
}

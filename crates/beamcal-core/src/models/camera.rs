//! Clip-space camera model.
//!
//! Intrinsics are a 4×4 projection matrix plus the image size. A view-space
//! point `pv` maps to pixels through
//!
//! ```text
//! clip = P · [pv, 1]
//! ndc  = clip.xyz / clip.w
//! u    = width  · (ndc.x + 1) / 2
//! v    = height · (1 - ndc.y) / 2
//! ```
//!
//! View space follows the OpenGL convention: +X right, +Y up, the camera looks
//! down -Z. Pixel rows grow downwards.

use super::{Line2D, Ray, RigidTransform};
use crate::error::CalibError;
use crate::math::{lift_mat4, lit, Mat4};
use nalgebra::{RealField, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub projection: Mat4,
}

impl CameraIntrinsics {
    /// Validated constructor.
    pub fn new(width: u32, height: u32, projection: Mat4) -> Result<Self, CalibError> {
        let intrinsics = Self {
            width,
            height,
            projection,
        };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// OpenGL projection equivalent to a pinhole camera with focal lengths and
    /// principal point in pixels (origin top-left, v down).
    #[allow(clippy::too_many_arguments)]
    pub fn from_pinhole(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        width: u32,
        height: u32,
        near: f64,
        far: f64,
    ) -> Result<Self, CalibError> {
        if !(near > 0.0 && far > near) {
            return Err(CalibError::invalid(format!(
                "clip planes must satisfy 0 < near < far, got near={near} far={far}"
            )));
        }
        let w = width as f64;
        let h = height as f64;
        #[rustfmt::skip]
        let projection = Mat4::new(
            2.0 * fx / w, 0.0,          1.0 - 2.0 * cx / w,           0.0,
            0.0,          2.0 * fy / h, 2.0 * cy / h - 1.0,           0.0,
            0.0,          0.0,          -(far + near) / (far - near), -2.0 * far * near / (far - near),
            0.0,          0.0,          -1.0,                         0.0,
        );
        Self::new(width, height, projection)
    }

    pub fn validate(&self) -> Result<(), CalibError> {
        if self.width == 0 || self.height == 0 {
            return Err(CalibError::invalid(format!(
                "image size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.projection.iter().any(|v| !v.is_finite()) {
            return Err(CalibError::invalid("projection matrix has non-finite entries"));
        }
        if self.projection.try_inverse().is_none() {
            return Err(CalibError::invalid("projection matrix is not invertible"));
        }
        Ok(())
    }

    pub fn center(&self) -> Vector2<f64> {
        Vector2::new(self.width as f64 * 0.5, self.height as f64 * 0.5)
    }

    /// Project a view-space point to pixels.
    pub fn view_to_image<T: RealField>(&self, pv: &Vector3<T>) -> Vector2<T> {
        let p: nalgebra::Matrix4<T> = lift_mat4(&self.projection);
        let clip = p * Vector4::new(pv.x.clone(), pv.y.clone(), pv.z.clone(), T::one());
        let w = clip.w.clone();
        let nx = clip.x.clone() / w.clone();
        let ny = clip.y.clone() / w;
        let half: T = lit(0.5);
        Vector2::new(
            lit::<T>(self.width as f64) * (nx + T::one()) * half.clone(),
            lit::<T>(self.height as f64) * (T::one() - ny) * half,
        )
    }

    /// Ray in view space through a pixel, from the near plane towards the far plane.
    pub fn pixel_to_view_ray(&self, pixel: &Vector2<f64>) -> Result<Ray<f64>, CalibError> {
        let inv = self
            .projection
            .try_inverse()
            .ok_or_else(|| CalibError::invalid("projection matrix is not invertible"))?;
        let nx = 2.0 * pixel.x / self.width as f64 - 1.0;
        let ny = 1.0 - 2.0 * pixel.y / self.height as f64;
        let unproject = |nz: f64| {
            let h = inv * Vector4::new(nx, ny, nz, 1.0);
            Vector3::new(h.x / h.w, h.y / h.w, h.z / h.w)
        };
        let near = unproject(-1.0);
        let far = unproject(1.0);
        Ok(Ray::new(near, far - near))
    }
}

/// A camera: world → view transform plus intrinsics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: RealField + Serialize",
    deserialize = "T: RealField + Deserialize<'de>"
))]
pub struct CameraModel<T: RealField> {
    pub view: RigidTransform<T>,
    pub intrinsics: CameraIntrinsics,
}

impl<T: RealField> CameraModel<T> {
    pub fn new(view: RigidTransform<T>, intrinsics: CameraIntrinsics) -> Self {
        Self { view, intrinsics }
    }

    pub fn world_to_view(&self, p: &Vector3<T>) -> Vector3<T> {
        self.view.transform_point(p)
    }

    pub fn world_to_image(&self, p: &Vector3<T>) -> Vector2<T> {
        self.intrinsics.view_to_image(&self.world_to_view(p))
    }

    /// Image line of a world ray: through the projections of `origin` and
    /// `origin + direction`.
    pub fn world_ray_to_image_line(&self, ray: &Ray<T>) -> Line2D<T> {
        let a = self.world_to_image(&ray.origin);
        let b = self.world_to_image(&(ray.origin.clone() + ray.direction.clone()));
        Line2D::from_points(a, b)
    }

    /// Camera centre in world coordinates.
    pub fn position(&self) -> Vector3<T> {
        self.view.inverse().translation
    }

    /// Whether a world point lies in front of the camera.
    pub fn is_in_front(&self, p: &Vector3<T>) -> bool {
        self.world_to_view(p).z < T::zero()
    }
}

impl CameraModel<f64> {
    /// Back-project a pixel into a world-space ray.
    pub fn image_to_world_ray(&self, pixel: &Vector2<f64>) -> Result<Ray<f64>, CalibError> {
        let ray = self.intrinsics.pixel_to_view_ray(pixel)?;
        let to_world = self.view.inverse();
        Ok(Ray::new(
            to_world.transform_point(&ray.origin),
            to_world.transform_vector(&ray.direction),
        ))
    }

    pub fn lift<T: RealField>(&self) -> CameraModel<T> {
        CameraModel {
            view: self.view.lift(),
            intrinsics: self.intrinsics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::from_pinhole(800.0, 780.0, 330.0, 250.0, 640, 480, 0.1, 100.0).unwrap()
    }

    #[test]
    fn pinhole_projection_matches_focal_model() {
        let k = intrinsics();
        let pv = Vector3::new(0.4, -0.2, -2.0);
        let uv = k.view_to_image(&pv);
        assert_relative_eq!(uv.x, 330.0 + 800.0 * 0.4 / 2.0, epsilon = 1e-9);
        assert_relative_eq!(uv.y, 250.0 + 780.0 * 0.2 / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn rejects_degenerate_intrinsics() {
        assert!(CameraIntrinsics::new(0, 480, Mat4::identity()).is_err());
        assert!(CameraIntrinsics::new(640, 480, Mat4::zeros()).is_err());
        assert!(CameraIntrinsics::from_pinhole(1.0, 1.0, 0.0, 0.0, 10, 10, 1.0, 0.5).is_err());
    }

    #[test]
    fn back_projected_ray_passes_through_point() {
        let view = RigidTransform::look_at(
            &Vector3::new(2.0, 1.5, 5.0),
            &Vector3::new(0.0, 0.0, 0.0),
            &Vector3::y(),
        );
        let cam = CameraModel::new(view, intrinsics());
        for p in [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.5, -0.3, 0.8),
            Vector3::new(-1.0, 0.7, -0.4),
        ] {
            assert!(cam.is_in_front(&p));
            let uv = cam.world_to_image(&p);
            let ray = cam.image_to_world_ray(&uv).unwrap();
            assert!(ray.distance_to_point(&p) < 1e-8);
        }
    }

    #[test]
    fn camera_position_is_eye() {
        let eye = Vector3::new(-3.0, 2.0, 1.0);
        let cam = CameraModel::new(
            RigidTransform::look_at(&eye, &Vector3::zeros(), &Vector3::y()),
            intrinsics(),
        );
        assert_relative_eq!(cam.position(), eye, epsilon = 1e-10);
    }
}

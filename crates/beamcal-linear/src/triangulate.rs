//! Linear triangulation of 3D points from viewing rays.
//!
//! Minimizes the summed squared distance to every ray:
//! `Σ ‖(I − d dᵀ)(X − o)‖²`, whose normal equations are
//! `(Σ (I − d dᵀ)) X = Σ (I − d dᵀ) o`.

use beamcal_core::{CalibError, CameraModel, Mat3, Ray, Vec2, Vec3};

/// Ratio of the normal matrix eigenvalues below which rays count as parallel.
const PARALLEL_RATIO: f64 = 1e-10;

/// Point closest to all rays. Needs two or more non-parallel rays.
pub fn triangulate_rays(rays: &[Ray<f64>]) -> Result<Vec3, CalibError> {
    if rays.len() < 2 {
        return Err(CalibError::invalid(format!(
            "triangulation needs at least 2 rays, got {}",
            rays.len()
        )));
    }
    let mut a = Mat3::zeros();
    let mut b = Vec3::zeros();
    for ray in rays {
        let n = ray.direction.norm();
        if !(n > 0.0 && n.is_finite()) {
            return Err(CalibError::invalid("triangulation ray has no direction"));
        }
        let d = ray.direction / n;
        let p = Mat3::identity() - d * d.transpose();
        a += p;
        b += p * ray.origin;
    }
    let eig = a.symmetric_eigen();
    let (lo, hi) = (eig.eigenvalues.min(), eig.eigenvalues.max());
    if hi <= 0.0 || lo / hi < PARALLEL_RATIO {
        return Err(CalibError::invalid("rays are parallel; point is undetermined"));
    }
    a.try_inverse()
        .map(|inv| inv * b)
        .ok_or_else(|| CalibError::invalid("ray normal matrix is singular"))
}

/// Triangulate one point seen at `pixels[i]` by `cameras[i]`.
pub fn triangulate_pixels(cameras: &[&CameraModel<f64>], pixels: &[Vec2]) -> Result<Vec3, CalibError> {
    if cameras.len() != pixels.len() {
        return Err(CalibError::invalid(format!(
            "mismatched number of cameras ({}) and pixels ({})",
            cameras.len(),
            pixels.len()
        )));
    }
    let rays = cameras
        .iter()
        .zip(pixels)
        .map(|(cam, px)| cam.image_to_world_ray(px))
        .collect::<Result<Vec<_>, _>>()?;
    triangulate_rays(&rays)
}

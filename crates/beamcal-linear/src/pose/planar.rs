//! Pose of a camera from coplanar points via homography decomposition.
//!
//! The points are expressed in their principal plane frame, a homography
//! from plane coordinates to normalized image coordinates is estimated, and
//! `H ~ [r1 r2 t]` is decomposed and orthogonalized.

use super::CvPose;
use crate::homography::dlt_homography;
use crate::math::project_to_so3;
use anyhow::{anyhow, ensure, Result};
use beamcal_core::{Mat3, Vec2, Vec3};

/// World → plane frame used by the planar solver.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneFrame {
    pub origin: Vec3,
    /// Columns are the plane axes and normal in world coordinates.
    pub axes: Mat3,
}

impl PlaneFrame {
    pub fn to_plane(&self, p: &Vec3) -> Vec2 {
        let local = self.axes.transpose() * (p - self.origin);
        Vec2::new(local.x, local.y)
    }
}

/// Decompose a plane → normalized-image homography into `T_C_P`.
pub fn pose_from_homography(h: &Mat3) -> Result<CvPose> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let norm = 0.5 * (h1.norm() + h2.norm());
    ensure!(norm > f64::EPSILON, "degenerate homography");
    let mut lambda = 1.0 / norm;
    // Plane must lie in front of the camera.
    if (h3 * lambda).z < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let r = Mat3::from_columns(&[r1, r2, r3]);
    let rotation = project_to_so3(&r).ok_or_else(|| anyhow!("svd failed projecting rotation"))?;
    Ok(CvPose {
        rotation,
        translation: h3 * lambda,
    })
}

/// Planar pose in the world frame, given the plane frame of the points.
pub fn planar_pose(world: &[Vec3], normalized: &[Vec2], frame: &PlaneFrame) -> Result<CvPose> {
    ensure!(
        world.len() == normalized.len(),
        "correspondence count mismatch: {} world vs {} image",
        world.len(),
        normalized.len()
    );
    ensure!(
        world.len() >= 4,
        "planar pose needs at least 4 points, got {}",
        world.len()
    );
    let plane: Vec<Vec2> = world.iter().map(|p| frame.to_plane(p)).collect();
    let h = dlt_homography(&plane, normalized)?;
    let t_c_p = pose_from_homography(&h)?;

    // T_C_W = T_C_P · T_P_W with T_P_W = (axesᵀ, -axesᵀ · origin).
    let rotation = t_c_p.rotation * frame.axes.transpose();
    let translation = t_c_p.translation - rotation * frame.origin;
    Ok(CvPose {
        rotation,
        translation,
    })
}

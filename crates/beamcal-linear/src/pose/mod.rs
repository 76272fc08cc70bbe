//! Linear perspective pose ("where is this camera?") from 3D–2D matches.
//!
//! - ≥ 6 non-coplanar points: normalized DLT.
//! - ≥ 4 coplanar points: homography decomposition in the points' plane.
//!
//! Both run inside RANSAC when more than the minimal number of points is
//! available. Pixels are first turned into normalized computer-vision
//! coordinates by back-projecting through the clip-space projection, and the
//! result is returned as an OpenGL-convention view transform (world → view).

mod dlt;
mod planar;
mod ransac;

use crate::math::principal_frame;
use anyhow::{bail, ensure, Result};
use beamcal_core::{ensure_input, CameraIntrinsics, Mat3, RansacOptions, RigidTransform, Vec2, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};

pub use dlt::dlt;
pub use planar::{planar_pose, pose_from_homography, PlaneFrame};

/// Pose in the computer-vision camera frame (+X right, +Y down, +Z forward).
#[derive(Debug, Clone, PartialEq)]
pub struct CvPose {
    pub rotation: Mat3,
    pub translation: Vec3,
}

/// `diag(1, -1, -1)`: flips between the CV and OpenGL camera frames.
fn cv_to_gl() -> Mat3 {
    Mat3::from_diagonal(&Vec3::new(1.0, -1.0, -1.0))
}

impl CvPose {
    /// OpenGL-convention view transform.
    pub fn to_view(&self) -> RigidTransform<f64> {
        let c = cv_to_gl();
        RigidTransform::from_rotation_translation(&(c * self.rotation), c * self.translation)
    }
}

/// Normalized CV image coordinates of a pixel.
pub fn pixel_to_normalized(intrinsics: &CameraIntrinsics, pixel: &Vec2) -> Result<Vec2> {
    let ray = intrinsics.pixel_to_view_ray(pixel)?;
    let d = ray.direction;
    ensure!(
        d.z < -f64::EPSILON,
        "pixel ({}, {}) does not map to a forward-looking ray",
        pixel.x,
        pixel.y
    );
    Ok(Vec2::new(d.x / -d.z, d.y / d.z))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSolverOptions {
    /// Threshold in pixels for RANSAC inliers.
    pub ransac: RansacOptions,
    /// Points count as coplanar when the smallest principal variance is below
    /// this fraction of the largest.
    pub planarity_ratio: f64,
}

impl Default for PoseSolverOptions {
    fn default() -> Self {
        Self {
            ransac: RansacOptions::default(),
            planarity_ratio: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewPoseEstimate {
    /// World → view transform.
    pub view: RigidTransform<f64>,
    pub inliers: Vec<usize>,
    /// Reprojection RMS over the inliers, in pixels.
    pub rms: f64,
    pub planar: bool,
}

/// Robust linear view pose for one camera.
pub fn solve_view_pose(
    world: &[Vec3],
    pixels: &[Vec2],
    intrinsics: &CameraIntrinsics,
    opts: &PoseSolverOptions,
) -> Result<ViewPoseEstimate> {
    ensure_input!(
        world.len() == pixels.len(),
        "pose solve got {} world points and {} pixels",
        world.len(),
        pixels.len()
    );
    ensure_input!(world.len() >= 4, "pose solve needs at least 4 points, got {}", world.len());

    let Some((origin, axes, variances)) = principal_frame(world) else {
        bail!("pose solve got no points");
    };
    ensure_input!(
        variances.y > opts.planarity_ratio * variances.x && variances.x > 0.0,
        "pose solve points are collinear or coincident"
    );
    let planar = variances.z <= opts.planarity_ratio * variances.x;
    let min_points = if planar { 4 } else { 6 };
    ensure_input!(
        world.len() >= min_points,
        "{} pose solve needs at least {} points, got {}",
        if planar { "planar" } else { "non-planar" },
        min_points,
        world.len()
    );

    let frame = planar.then(|| PlaneFrame { origin, axes });
    let data = world
        .iter()
        .zip(pixels)
        .map(|(w, px)| {
            Ok(ransac::PoseDatum {
                world: *w,
                normalized: pixel_to_normalized(intrinsics, px)?,
                pixel: *px,
                intrinsics: intrinsics.clone(),
                frame: frame.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (pose, inliers) = if data.len() > min_points {
        let mut ransac_opts = opts.ransac.clone();
        ransac_opts.min_inliers = ransac_opts.min_inliers.max(min_points);
        let res = ransac::run(&data, planar, &ransac_opts);
        let Some(model) = res.model.filter(|_| res.success) else {
            bail!(
                "RANSAC found no consensus pose among {} points (threshold {} px)",
                data.len(),
                ransac_opts.thresh
            );
        };
        (model, res.inliers)
    } else {
        let all: Vec<usize> = (0..data.len()).collect();
        let (w, n): (Vec<Vec3>, Vec<Vec2>) = data.iter().map(|d| (d.world, d.normalized)).unzip();
        let model = match &frame {
            Some(frame) => planar_pose(&w, &n, frame)?,
            None => dlt(&w, &n)?,
        };
        (model, all)
    };

    let errors: Vec<f64> = inliers
        .iter()
        .map(|&i| ransac::reprojection_error(&pose, &data[i]))
        .collect();
    let rms = beamcal_core::rms(&errors);
    debug!(
        "linear pose: {} points, {} inliers, planar={}, rms={:.3}px",
        data.len(),
        inliers.len(),
        planar,
        rms
    );
    Ok(ViewPoseEstimate {
        view: pose.to_view(),
        inliers,
        rms,
        planar,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamcal_core::synthetic::{default_intrinsics, square_marker_points};
    use beamcal_core::CameraModel;

    fn camera() -> CameraModel<f64> {
        CameraModel::new(
            RigidTransform::look_at(&Vec3::new(1.0, 2.0, 6.0), &Vec3::new(0.1, 0.0, 0.0), &Vec3::y()),
            default_intrinsics(),
        )
    }

    fn cube_points() -> Vec<Vec3> {
        let mut pts = Vec::new();
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..2 {
                    pts.push(Vec3::new(i as f64 * 0.5 - 0.5, j as f64 * 0.4 - 0.4, k as f64 * 0.6 - 0.3));
                }
            }
        }
        pts
    }

    #[test]
    fn normalized_coordinates_follow_cv_convention() {
        let k = default_intrinsics();
        let n = pixel_to_normalized(&k, &Vec2::new(320.0 + 80.0, 240.0 + 40.0)).unwrap();
        assert!((n - Vec2::new(0.1, 0.05)).norm() < 1e-9);
    }

    #[test]
    fn recovers_pose_from_general_points() {
        let cam = camera();
        let world = cube_points();
        let pixels: Vec<Vec2> = world.iter().map(|p| cam.world_to_image(p)).collect();
        let est = solve_view_pose(&world, &pixels, &cam.intrinsics, &PoseSolverOptions::default()).unwrap();
        assert!(!est.planar);
        assert_eq!(est.inliers.len(), world.len());
        assert!(est.view.max_abs_diff(&cam.view) < 1e-6, "{:?}", est.view);
    }

    #[test]
    fn recovers_pose_from_a_square_marker() {
        let cam = camera();
        let marker = RigidTransform::new(Vec3::new(0.2, -0.1, 0.3), Vec3::new(-1.2, 0.1, 0.4));
        let world: Vec<Vec3> = square_marker_points(0.4)
            .iter()
            .map(|p| marker.transform_point(p))
            .collect();
        let pixels: Vec<Vec2> = world.iter().map(|p| cam.world_to_image(p)).collect();
        let est = solve_view_pose(&world, &pixels, &cam.intrinsics, &PoseSolverOptions::default()).unwrap();
        assert!(est.planar);
        assert!(est.view.max_abs_diff(&cam.view) < 1e-6);
    }

    #[test]
    fn ransac_drops_gross_outliers() {
        let cam = camera();
        let world = cube_points();
        let mut pixels: Vec<Vec2> = world.iter().map(|p| cam.world_to_image(p)).collect();
        pixels[2] += Vec2::new(60.0, -35.0);
        pixels[9] += Vec2::new(-80.0, 20.0);
        let est = solve_view_pose(&world, &pixels, &cam.intrinsics, &PoseSolverOptions::default()).unwrap();
        assert!(!est.inliers.contains(&2));
        assert!(!est.inliers.contains(&9));
        assert!(est.view.max_abs_diff(&cam.view) < 1e-6);
    }

    #[test]
    fn rejects_insufficient_points() {
        let cam = camera();
        let all = cube_points();
        let world: Vec<Vec3> = [0, 1, 2, 3, 6].iter().map(|&i| all[i]).collect();
        let pixels: Vec<Vec2> = world.iter().map(|p| cam.world_to_image(p)).collect();
        let err = solve_view_pose(&world, &pixels, &cam.intrinsics, &PoseSolverOptions::default()).unwrap_err();
        assert!(err.downcast_ref::<beamcal_core::CalibError>().is_some());
    }
}

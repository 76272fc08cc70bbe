//! Single-view pose: linear estimate followed by robust refinement.
//!
//! The camera's world → view pose is refined against points whose world
//! positions are known, minimizing Huber-robustified pixel reprojection error.

use crate::backend::SolverConfig;
use crate::ir::{FactorKind, FixedMask, ProblemIR, ResidualBlock, RobustLoss};
use crate::params::{pack_pose, unpack_pose, POSE_DIM};
use crate::report::SolveReport;
use crate::solve::solve_ir;
use anyhow::{anyhow, Context, Result};
use beamcal_core::{ensure_input, CameraIntrinsics, RigidTransform, Vec2, Vec3};
use beamcal_linear::{solve_view_pose, PoseSolverOptions};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewPoseOptions {
    pub linear: PoseSolverOptions,
    /// Loss on each point's reprojection error (pixels).
    pub loss: RobustLoss,
    pub solver: SolverConfig,
}

impl Default for ViewPoseOptions {
    fn default() -> Self {
        Self {
            linear: PoseSolverOptions::default(),
            loss: RobustLoss::Huber { scale: 1.0 },
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefinedViewPose {
    /// World → view transform.
    pub view: RigidTransform<f64>,
    /// Reprojection RMS over all points after refinement, in pixels.
    pub rms: f64,
    pub report: SolveReport,
}

/// Refine a view pose from an initial guess. Needs at least 3 points.
pub fn refine_view_pose(
    world: &[Vec3],
    pixels: &[Vec2],
    intrinsics: &CameraIntrinsics,
    initial: &RigidTransform<f64>,
    opts: &ViewPoseOptions,
) -> Result<RefinedViewPose> {
    ensure_input!(
        world.len() == pixels.len(),
        "view pose refinement got {} world points and {} pixels",
        world.len(),
        pixels.len()
    );
    ensure_input!(
        world.len() >= 3,
        "view pose refinement needs at least 3 points, got {}",
        world.len()
    );

    let mut ir = ProblemIR::new();
    let camera = ir.add_param_block("camera", POSE_DIM, FixedMask::all_free(), None);
    for (i, (pw, uv)) in world.iter().zip(pixels).enumerate() {
        ir.add_residual_block(
            ResidualBlock::new(
                vec![camera],
                FactorKind::KnownPointReprojection {
                    intrinsics: intrinsics.clone(),
                    pw: [pw.x, pw.y, pw.z],
                    uv: [uv.x, uv.y],
                    w: 1.0,
                },
                opts.loss,
            )
            .for_observation(i),
        );
    }
    let initial_map = HashMap::from([("camera".to_string(), pack_pose(initial))]);

    let solution = solve_ir(&ir, &initial_map, &opts.solver, world.len())?;
    let view = unpack_pose(
        solution
            .params
            .get("camera")
            .ok_or_else(|| anyhow!("missing camera in solution"))?
            .as_view(),
    )?;
    Ok(RefinedViewPose {
        view,
        rms: solution.report.overall_rms(),
        report: solution.report,
    })
}

/// Linear pose (RANSAC) then refinement over all points.
///
/// When the linear solve fails (too few or degenerate points) and `guess` is
/// given, refinement starts from the guess instead.
pub fn estimate_view_pose(
    world: &[Vec3],
    pixels: &[Vec2],
    intrinsics: &CameraIntrinsics,
    guess: Option<&RigidTransform<f64>>,
    opts: &ViewPoseOptions,
) -> Result<RefinedViewPose> {
    let start = match solve_view_pose(world, pixels, intrinsics, &opts.linear) {
        Ok(linear) => {
            debug!(
                "linear view pose: {} of {} inliers, rms {:.3}px",
                linear.inliers.len(),
                world.len(),
                linear.rms
            );
            linear.view
        }
        Err(err) => match guess {
            Some(guess) => {
                debug!("linear view pose failed ({err:#}), refining from guess");
                guess.clone()
            }
            None => return Err(err).context("linear view pose failed and no guess was given"),
        },
    };
    refine_view_pose(world, pixels, intrinsics, &start, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamcal_core::synthetic::{default_intrinsics, square_marker_points};
    use beamcal_core::CameraModel;

    fn scene() -> (CameraModel<f64>, Vec<Vec3>, Vec<Vec2>) {
        let cam = CameraModel::new(
            RigidTransform::look_at(&Vec3::new(-1.0, 1.5, 5.0), &Vec3::zeros(), &Vec3::y()),
            default_intrinsics(),
        );
        let marker = RigidTransform::new(Vec3::new(0.1, 0.0, 0.2), Vec3::new(-0.3, 0.2, 0.1));
        let world: Vec<Vec3> = square_marker_points(0.5)
            .iter()
            .map(|p| marker.transform_point(p))
            .collect();
        let pixels = world.iter().map(|p| cam.world_to_image(p)).collect();
        (cam, world, pixels)
    }

    #[test]
    fn refines_a_perturbed_guess() {
        let (cam, world, pixels) = scene();
        let mut guess = cam.view.clone();
        guess.translation += Vec3::new(0.05, -0.03, 0.1);
        guess.rotation += Vec3::new(0.01, 0.02, -0.01);
        let est = refine_view_pose(&world, &pixels, &cam.intrinsics, &guess, &ViewPoseOptions::default())
            .unwrap();
        est.report.check().unwrap();
        assert!(est.rms < 1e-6, "rms {}", est.rms);
        assert!(est.view.max_abs_diff(&cam.view) < 1e-6);
    }

    #[test]
    fn linear_then_refine_without_guess() {
        let (cam, world, pixels) = scene();
        let est = estimate_view_pose(&world, &pixels, &cam.intrinsics, None, &ViewPoseOptions::default())
            .unwrap();
        assert!(est.view.max_abs_diff(&cam.view) < 1e-6);
    }

    #[test]
    fn three_points_need_a_guess() {
        let (cam, world, pixels) = scene();
        let opts = ViewPoseOptions::default();
        assert!(estimate_view_pose(&world[..3], &pixels[..3], &cam.intrinsics, None, &opts).is_err());
        let est = estimate_view_pose(
            &world[..3],
            &pixels[..3],
            &cam.intrinsics,
            Some(&cam.view),
            &opts,
        )
        .unwrap();
        assert!(est.rms < 1e-6);
    }

    #[test]
    fn two_points_are_invalid_input() {
        let (cam, world, pixels) = scene();
        let err = refine_view_pose(&world[..2], &pixels[..2], &cam.intrinsics, &cam.view, &ViewPoseOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<beamcal_core::CalibError>(),
            Some(beamcal_core::CalibError::InvalidInput(_))
        ));
    }
}

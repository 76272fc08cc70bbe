//! Stage functions for laser-rig calibration.
//!
//! `extract_lines → bootstrap → bundle_points → bundle_lasers → prune_outliers`
//!
//! Each stage reads the previous stage's results from the session state and
//! replaces everything downstream of itself.

use anyhow::{anyhow, Context, Error, Result};
use beamcal_core::{
    ensure_input, CameraIntrinsics, CameraModel, LineImageObservation, PointImageObservation, Vec2,
};
use beamcal_linear::{extract_beam, triangulate_pixels};
use beamcal_optim::{bundle_lasers, bundle_points, prune_outliers, solve_common_point, LineSet};
use image::GrayImage;
use log::{debug, warn};
use std::collections::BTreeSet;

use super::problem::{LaserRigOutput, LaserRigProblem};
use super::state::{CaptureLines, Exclusion, LasersStage, PointsStage};
use crate::images::{ImageRef, ImageSource};
use crate::progress::ProgressObserver;
use crate::rig::register_cameras;
use crate::session::CalibrationSession;

/// Stage names in run order.
pub const STAGES: [&str; 5] = [
    "extract_lines",
    "bootstrap",
    "bundle_points",
    "bundle_lasers",
    "prune_outliers",
];

type Session = CalibrationSession<LaserRigProblem>;

fn fetch_frame(
    images: &dyn ImageSource,
    name: &ImageRef,
    intrinsics: &CameraIntrinsics,
) -> Result<GrayImage> {
    let frame = images.fetch(name)?;
    ensure_input!(
        frame.dimensions() == (intrinsics.width, intrinsics.height),
        "frame {} is {}x{}, camera is {}x{}",
        name,
        frame.width(),
        frame.height(),
        intrinsics.width,
        intrinsics.height
    );
    Ok(frame)
}

/// Extract the beams of every capture and solve each capture's laser-origin
/// image.
///
/// Captures with fewer than `min_valid_beams` valid beams are excluded.
pub fn step_extract_lines(
    session: &mut Session,
    images: &dyn ImageSource,
    progress: &mut dyn ProgressObserver,
) -> Result<()> {
    session.run_stage("extract_lines", progress, |session, progress| {
        session.validate()?;
        let input = session.require_input()?;
        let config = &session.config;
        let opts = config.common_point_opts();

        let mut captures = Vec::new();
        let mut origins = Vec::new();
        let mut lines = Vec::new();
        let mut exclusions = Vec::new();
        let mut failure = None;
        let total = input.captures.len();
        for (k, capture) in input.captures.iter().enumerate() {
            progress.report("extract_lines", k as f64 / total as f64);
            let intrinsics = &input.cameras[capture.camera_index].intrinsics;
            let off = fetch_frame(images, &capture.off, intrinsics)
                .with_context(|| format!("capture {k}"))?;

            let mut sets = Vec::with_capacity(capture.shots.len());
            let mut mean_on_line = Vec::with_capacity(capture.shots.len());
            for shot in &capture.shots {
                let on = fetch_frame(images, &shot.on, intrinsics)
                    .with_context(|| format!("capture {k}"))?;
                let beam = extract_beam(&on, &off, &config.line_finder)
                    .with_context(|| format!("capture {k}, frame {}", shot.on))?;
                mean_on_line.push(beam.mean_on_line);
                sets.push(LineSet::from(&beam));
            }

            let valid_beams = sets.iter().filter(|s| s.valid).count();
            if valid_beams < config.min_valid_beams {
                let exclusion = Exclusion::Capture {
                    capture: k,
                    valid_beams,
                    required: config.min_valid_beams,
                };
                warn!("excluded {exclusion}");
                exclusions.push(exclusion);
                continue;
            }

            let solution = solve_common_point(&sets, &opts)
                .with_context(|| format!("laser origin of capture {k}"))?;
            debug!(
                "capture {k}: origin ({:.2}, {:.2}), {} of {} lines valid",
                solution.point.x,
                solution.point.y,
                solution.valid.iter().filter(|v| **v).count(),
                sets.len()
            );
            origins.push(PointImageObservation::new(
                capture.camera_index,
                capture.laser_index,
                solution.point,
            ));
            for (shot, (line, valid)) in capture
                .shots
                .iter()
                .zip(solution.lines.iter().zip(&solution.valid))
            {
                if let (Some(line), true) = (line, *valid) {
                    lines.push(LineImageObservation::new(
                        capture.camera_index,
                        capture.laser_index,
                        shot.command,
                        line.clone(),
                    ));
                }
            }
            let check = solution.report.check();
            captures.push(CaptureLines {
                capture: k,
                camera_index: capture.camera_index,
                laser_index: capture.laser_index,
                point: solution.point,
                lines: solution.lines,
                valid: solution.valid,
                rms: solution.rms,
                mean_on_line,
                report: solution.report,
            });
            if let Err(err) = check {
                failure = Some(Error::new(err).context(format!("laser origin of capture {k}")));
                break;
            }
        }

        if failure.is_none() {
            ensure_input!(
                !captures.is_empty(),
                "no capture has {} valid beams",
                config.min_valid_beams
            );
        }

        let notes = format!(
            "{} captures, {} beam lines, {} excluded",
            captures.len(),
            lines.len(),
            exclusions.len()
        );
        // A failed solve still leaves the captures up to and including it.
        let state = &mut session.state;
        state.clear_from_bootstrap();
        state.captures = Some(captures);
        state.origin_observations = Some(origins);
        state.line_observations = Some(lines);
        state.exclusions = exclusions;
        match failure {
            Some(err) => Err(err),
            None => Ok(notes),
        }
    })
}

/// Register the cameras against the markers and triangulate each laser's
/// origin from the cameras that located it.
///
/// Lasers located by fewer than two cameras are excluded.
pub fn step_bootstrap(session: &mut Session, progress: &mut dyn ProgressObserver) -> Result<()> {
    session.run_stage("bootstrap", progress, |session, _| {
        session.validate()?;
        let input = session.require_input()?;
        let origins = session
            .state
            .origin_observations
            .as_ref()
            .ok_or_else(|| anyhow!("extract_lines must run before bootstrap"))?;

        let registration = register_cameras(
            &input.cameras,
            &input.markers,
            &input.marker_observations,
            &session.config.bootstrap,
        )?;

        let mut lasers = input.lasers.clone();
        let mut exclusions = Vec::new();
        for (l, laser) in lasers.iter_mut().enumerate() {
            let seen: Vec<&PointImageObservation> =
                origins.iter().filter(|o| o.point_index == l).collect();
            let cameras: BTreeSet<usize> = seen.iter().map(|o| o.view_index).collect();
            if cameras.len() < 2 {
                let exclusion = Exclusion::Laser {
                    laser: l,
                    cameras: cameras.len(),
                };
                warn!("excluded {exclusion}");
                exclusions.push(exclusion);
                continue;
            }
            let models: Vec<&CameraModel<f64>> = seen
                .iter()
                .map(|o| &registration.cameras[o.view_index])
                .collect();
            let pixels: Vec<Vec2> = seen.iter().map(|o| o.pixel).collect();
            laser.rigid_body.translation = triangulate_pixels(&models, &pixels)
                .with_context(|| format!("triangulating the origin of laser {l}"))?;
        }
        ensure_input!(
            exclusions.len() < lasers.len(),
            "every laser is located by fewer than 2 cameras"
        );

        let notes = format!(
            "{} cameras (genesis {:?}), {} lasers placed, {} excluded",
            registration.cameras.len(),
            registration.genesis,
            lasers.len() - exclusions.len(),
            exclusions.len()
        );
        let state = &mut session.state;
        state.clear_from_bootstrap();
        state.exclusions.extend(exclusions);
        state.registration = Some(registration);
        state.initial_lasers = Some(lasers);
        Ok(notes)
    })
}

/// Refine laser positions (and cameras, unless fixed) against the laser-origin
/// images.
pub fn step_bundle_points(session: &mut Session, progress: &mut dyn ProgressObserver) -> Result<()> {
    session.run_stage("bundle_points", progress, |session, _| {
        let state = &session.state;
        let (Some(registration), Some(lasers), Some(origins)) = (
            state.registration.as_ref(),
            state.initial_lasers.as_ref(),
            state.origin_observations.as_ref(),
        ) else {
            return Err(anyhow!("bootstrap must run before bundle_points"));
        };

        let excluded = state.excluded_lasers();
        let deselected: Vec<usize> = origins
            .iter()
            .enumerate()
            .filter(|(_, o)| excluded.contains(&o.point_index))
            .map(|(i, _)| i)
            .collect();
        let positions: Vec<_> = lasers.iter().map(|l| l.position()).collect();
        let solution = bundle_points(
            &registration.cameras,
            &positions,
            origins,
            &session.config.points_bundle_opts(deselected),
        )?;

        let report = solution.report.clone();
        session.state.clear_from_points();
        session.state.points = Some(PointsStage {
            cameras: solution.cameras,
            positions: solution.unknowns,
            report: report.clone(),
        });
        report.check().context("laser origin bundle")?;
        Ok(report.summary())
    })
}

/// Store a laser bundle result, then publish it as the output if it
/// converged.
fn store_lasers_stage(session: &mut Session, stage: LasersStage) -> Result<String> {
    let check = stage.report.check();
    let output = LaserRigOutput {
        cameras: stage.cameras.clone(),
        lasers: stage.lasers.clone(),
        observations: session.state.line_observations.clone().unwrap_or_default(),
        deselected: stage.deselected.clone(),
        report: stage.report.clone(),
    };
    let stats = output.residual_stats();
    session.state.lasers = Some(stage);
    check.context("laser bundle")?;
    session.set_output(output);
    Ok(format!(
        "{} beam lines, residual mean {:.3}px max {:.3}px",
        stats.count, stats.mean, stats.max
    ))
}

/// Refine the full laser models against the beam lines.
pub fn step_bundle_lasers(session: &mut Session, progress: &mut dyn ProgressObserver) -> Result<()> {
    session.run_stage("bundle_lasers", progress, |session, _| {
        let state = &session.state;
        let (Some(points), Some(initial), Some(lines)) = (
            state.points.as_ref(),
            state.initial_lasers.as_ref(),
            state.line_observations.as_ref(),
        ) else {
            return Err(anyhow!("bundle_points must run before bundle_lasers"));
        };

        let mut lasers = initial.clone();
        for (laser, position) in lasers.iter_mut().zip(&points.positions) {
            laser.rigid_body.translation = *position;
        }
        let excluded = state.excluded_lasers();
        let deselected: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, o)| excluded.contains(&o.laser_index))
            .map(|(i, _)| i)
            .collect();
        let solution = bundle_lasers(
            &points.cameras,
            &lasers,
            lines,
            &session.config.lasers_bundle_opts(deselected.clone()),
        )?;

        session.state.clear_from_lasers();
        store_lasers_stage(
            session,
            LasersStage {
                cameras: solution.cameras,
                lasers: solution.unknowns,
                deselected,
                report: solution.report,
            },
        )
    })
}

/// Drop beam lines whose residual exceeds `outlier_threshold` and solve the
/// laser bundle again without them.
pub fn step_prune_outliers(session: &mut Session, progress: &mut dyn ProgressObserver) -> Result<()> {
    session.run_stage("prune_outliers", progress, |session, _| {
        let Some(threshold) = session.config.outlier_threshold else {
            return Ok("skipped, no outlier threshold".to_string());
        };
        let state = &session.state;
        let (Some(current), Some(lines)) =
            (state.lasers.as_ref(), state.line_observations.as_ref())
        else {
            return Err(anyhow!("bundle_lasers must run before prune_outliers"));
        };

        let outliers: Vec<usize> = prune_outliers(&current.report.residuals, threshold)
            .into_iter()
            .filter(|i| !current.deselected.contains(i))
            .collect();
        if outliers.is_empty() {
            return Ok(format!("no beam line above {threshold:.3}px"));
        }
        warn!(
            "pruning {} beam lines above {threshold:.3}px: {outliers:?}",
            outliers.len()
        );

        let mut deselected = current.deselected.clone();
        deselected.extend(&outliers);
        deselected.sort_unstable();
        let solution = bundle_lasers(
            &current.cameras,
            &current.lasers,
            lines,
            &session.config.lasers_bundle_opts(deselected.clone()),
        )?;

        session.state.outliers = outliers;
        store_lasers_stage(
            session,
            LasersStage {
                cameras: solution.cameras,
                lasers: solution.unknowns,
                deselected,
                report: solution.report,
            },
        )
    })
}

/// Run every stage in order, stopping at the first failure.
pub fn run_calibration(
    session: &mut Session,
    images: &dyn ImageSource,
    progress: &mut dyn ProgressObserver,
) -> Result<()> {
    step_extract_lines(session, images, progress)?;
    step_bootstrap(session, progress)?;
    step_bundle_points(session, progress)?;
    step_bundle_lasers(session, progress)?;
    step_prune_outliers(session, progress)?;
    Ok(())
}

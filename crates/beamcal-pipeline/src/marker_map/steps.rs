//! Stage functions for marker-map calibration: `bootstrap → bundle`.

use anyhow::{anyhow, Context, Result};
use beamcal_core::RigidTransform;
use beamcal_optim::{bundle_objects, prune_outliers};
use log::warn;

use super::problem::{MarkerMapOutput, MarkerMapProblem};
use crate::progress::ProgressObserver;
use crate::rig::register_cameras;
use crate::session::CalibrationSession;

pub const STAGES: [&str; 2] = ["bootstrap", "bundle"];

type Session = CalibrationSession<MarkerMapProblem>;

/// Initial camera and marker poses from the anchored markers.
pub fn step_bootstrap(session: &mut Session, progress: &mut dyn ProgressObserver) -> Result<()> {
    session.run_stage("bootstrap", progress, |session, _| {
        session.validate()?;
        let input = session.require_input()?;
        let registration = register_cameras(
            &input.cameras,
            &input.markers,
            &input.observations,
            &session.config.bootstrap,
        )?;
        let placed = registration.markers.iter().flatten().count();
        let notes = format!(
            "genesis {:?}, {} of {} markers placed",
            registration.genesis,
            placed,
            registration.markers.len()
        );
        session.state = Default::default();
        session.state.registration = Some(registration);
        Ok(notes)
    })
}

/// Joint refinement of cameras and unanchored markers, with one outlier
/// pruning pass when `outlier_threshold` is set.
pub fn step_bundle(session: &mut Session, progress: &mut dyn ProgressObserver) -> Result<()> {
    session.run_stage("bundle", progress, |session, progress| {
        let input = session.require_input()?;
        let registration = session
            .state
            .registration
            .as_ref()
            .ok_or_else(|| anyhow!("bootstrap must run before bundle"))?;

        let anchored: Vec<usize> = input
            .markers
            .iter()
            .enumerate()
            .filter(|(_, m)| m.pose.is_some())
            .map(|(i, _)| i)
            .collect();
        let local: Vec<_> = input.markers.iter().map(|m| m.local_points.clone()).collect();
        // Unplaced markers are unobserved, so they never enter the solve.
        let initial: Vec<RigidTransform<f64>> = registration
            .markers
            .iter()
            .map(|m| m.clone().unwrap_or_else(RigidTransform::identity))
            .collect();

        let config = &session.config;
        let mut deselected = Vec::new();
        let mut solution = bundle_objects(
            &registration.cameras,
            &local,
            &initial,
            &input.observations,
            &config.bundle_opts(&anchored, deselected.clone()),
        )?;
        let mut outliers = Vec::new();
        if let Some(threshold) = config.outlier_threshold {
            outliers = prune_outliers(&solution.report.residuals, threshold);
            if !outliers.is_empty() {
                warn!(
                    "pruning {} marker observations above {threshold:.3}px: {outliers:?}",
                    outliers.len()
                );
                progress.report("bundle", 0.5);
                deselected = outliers.clone();
                solution = bundle_objects(
                    &solution.cameras,
                    &local,
                    &solution.unknowns,
                    &input.observations,
                    &config.bundle_opts(&anchored, deselected.clone()),
                )?;
            }
        }

        let markers = registration
            .markers
            .iter()
            .zip(solution.unknowns)
            .map(|(placed, refined)| placed.as_ref().map(|_| refined))
            .collect();
        let report = solution.report;
        session.state.outliers = outliers;
        session.state.bundle_report = Some(report.clone());
        report.check().context("marker bundle")?;

        let notes = report.summary();
        session.set_output(MarkerMapOutput {
            cameras: solution.cameras,
            markers,
            deselected,
            report,
        });
        Ok(notes)
    })
}

pub fn run_calibration(session: &mut Session, progress: &mut dyn ProgressObserver) -> Result<()> {
    step_bootstrap(session, progress)?;
    step_bundle(session, progress)?;
    Ok(())
}

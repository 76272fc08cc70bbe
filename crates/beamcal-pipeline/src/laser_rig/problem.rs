//! [`ProblemType`] implementation for laser-projector rig calibration.

use anyhow::{ensure, Context, Result};
use beamcal_core::{
    ensure_input, CameraModel, LaserProjectorModel, LineImageObservation, ObjectImageObservation,
    ResidualStats, Vec2,
};
use beamcal_linear::LineFinderSettings;
use beamcal_optim::{BootstrapOptions, BundleOptions, CommonPointOptions, SolveReport};
use serde::{Deserialize, Serialize};

use super::state::LaserRigState;
use crate::images::ImageRef;
use crate::rig::{validate_rig, RigCamera, RigMarker};
use crate::session::ProblemType;

/// Cameras, markers and steerable lasers registered into one world frame.
#[derive(Debug)]
pub struct LaserRigProblem;

/// One beam: the steering command and the frame taken with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamShot {
    /// Normalized steering command in `[-1, 1]²`.
    pub command: Vec2,
    pub on: ImageRef,
}

/// One camera watching one laser sweep through a set of commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamCapture {
    pub camera_index: usize,
    pub laser_index: usize,
    /// Frame with the laser off.
    pub off: ImageRef,
    pub shots: Vec<BeamShot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserRigInput {
    pub cameras: Vec<RigCamera>,
    #[serde(default)]
    pub markers: Vec<RigMarker>,
    #[serde(default)]
    pub marker_observations: Vec<ObjectImageObservation>,
    /// Rough laser models. Positions are re-estimated; rotations and fields
    /// of view seed the final bundle.
    pub lasers: Vec<LaserProjectorModel<f64>>,
    pub captures: Vec<BeamCapture>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserRigConfig {
    pub line_finder: LineFinderSettings,
    pub common_point: CommonPointOptions,
    /// Captures with fewer valid beams are excluded.
    pub min_valid_beams: usize,
    pub bootstrap: BootstrapOptions,
    /// Laser positions against the common points.
    pub points_bundle: BundleOptions,
    /// Full laser models against the beam lines.
    pub lasers_bundle: BundleOptions,
    /// Beam lines whose residual exceeds this many pixels are dropped and the
    /// laser bundle is solved again. `None` skips the pruning stage.
    pub outlier_threshold: Option<f64>,
}

impl Default for LaserRigConfig {
    fn default() -> Self {
        let mut points_bundle = BundleOptions::default();
        points_bundle.fix.fix_all_cameras = true;
        let mut lasers_bundle = BundleOptions::default();
        lasers_bundle.fix.fix_all_cameras = true;
        lasers_bundle.fix.fix_fov2 = true;
        Self {
            line_finder: LineFinderSettings::default(),
            common_point: CommonPointOptions::default(),
            min_valid_beams: 4,
            bootstrap: BootstrapOptions::default(),
            points_bundle,
            lasers_bundle,
            outlier_threshold: Some(3.0),
        }
    }
}

impl LaserRigConfig {
    /// Common-point options with the extractor's inlier distance.
    pub fn common_point_opts(&self) -> CommonPointOptions {
        CommonPointOptions {
            distance_threshold: self.line_finder.distance_threshold,
            ..self.common_point.clone()
        }
    }

    pub fn points_bundle_opts(&self, excluded: Vec<usize>) -> BundleOptions {
        BundleOptions {
            excluded,
            ..self.points_bundle.clone()
        }
    }

    pub fn lasers_bundle_opts(&self, excluded: Vec<usize>) -> BundleOptions {
        BundleOptions {
            excluded,
            ..self.lasers_bundle.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserRigOutput {
    pub cameras: Vec<CameraModel<f64>>,
    pub lasers: Vec<LaserProjectorModel<f64>>,
    /// Beam lines the final bundle was evaluated on.
    pub observations: Vec<LineImageObservation>,
    /// Beam lines left out of the final solve (excluded lasers and pruned
    /// outliers).
    pub deselected: Vec<usize>,
    pub report: SolveReport,
}

impl LaserRigOutput {
    /// Residual summary over the beam lines that took part in the solve.
    pub fn residual_stats(&self) -> ResidualStats {
        let used: Vec<f64> = self
            .report
            .residuals
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.deselected.contains(i))
            .map(|(_, r)| *r)
            .collect();
        ResidualStats::from_values(&used)
    }
}

/// Calibrated models plus residual summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserRigExport {
    pub cameras: Vec<CameraModel<f64>>,
    pub lasers: Vec<LaserProjectorModel<f64>>,
    pub converged: bool,
    /// Residuals of the beam lines used in the final solve.
    pub residuals: ResidualStats,
    pub deselected: Vec<usize>,
}

impl ProblemType for LaserRigProblem {
    type Config = LaserRigConfig;
    type Input = LaserRigInput;
    type State = LaserRigState;
    type Output = LaserRigOutput;
    type Export = LaserRigExport;

    fn name() -> &'static str {
        "laser_rig_v1"
    }

    fn validate_input(input: &LaserRigInput) -> Result<()> {
        validate_rig(&input.cameras, &input.markers, &input.marker_observations)?;
        ensure_input!(!input.lasers.is_empty(), "rig has no lasers");
        ensure_input!(!input.captures.is_empty(), "rig has no beam captures");
        for (k, capture) in input.captures.iter().enumerate() {
            ensure_input!(
                capture.camera_index < input.cameras.len(),
                "capture {} refers to camera {} of {}",
                k,
                capture.camera_index,
                input.cameras.len()
            );
            ensure_input!(
                capture.laser_index < input.lasers.len(),
                "capture {} refers to laser {} of {}",
                k,
                capture.laser_index,
                input.lasers.len()
            );
            ensure_input!(!capture.shots.is_empty(), "capture {} has no shots", k);
            for (s, shot) in capture.shots.iter().enumerate() {
                ensure_input!(
                    shot.command.iter().all(|c| c.is_finite() && c.abs() <= 1.0),
                    "capture {} shot {} command ({}, {}) is outside [-1, 1]²",
                    k,
                    s,
                    shot.command.x,
                    shot.command.y
                );
            }
        }
        Ok(())
    }

    fn validate_config(config: &LaserRigConfig) -> Result<()> {
        config
            .line_finder
            .validate()
            .context("line_finder settings")?;
        ensure!(config.min_valid_beams >= 2, "min_valid_beams must be at least 2");
        ensure!(
            config.common_point.max_line_rms > 0.0,
            "common_point.max_line_rms must be positive"
        );
        if let Some(t) = config.outlier_threshold {
            ensure!(t > 0.0, "outlier_threshold must be positive");
        }
        Ok(())
    }

    fn export(output: &LaserRigOutput, _config: &LaserRigConfig) -> Result<LaserRigExport> {
        Ok(LaserRigExport {
            cameras: output.cameras.clone(),
            lasers: output.lasers.clone(),
            converged: output.report.converged,
            residuals: output.residual_stats(),
            deselected: output.deselected.clone(),
        })
    }
}

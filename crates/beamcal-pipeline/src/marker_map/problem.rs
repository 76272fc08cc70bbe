//! [`ProblemType`] implementation for marker-map calibration.

use anyhow::{ensure, Result};
use beamcal_core::{ensure_input, CameraModel, ObjectImageObservation, RigidTransform};
use beamcal_optim::{BootstrapOptions, BundleOptions, SolveReport};
use serde::{Deserialize, Serialize};

use crate::rig::{validate_rig, CameraRegistration, RigCamera, RigMarker};
use crate::session::ProblemType;

/// Cameras and markers registered into the frame of the anchored markers.
#[derive(Debug)]
pub struct MarkerMapProblem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerMapInput {
    pub cameras: Vec<RigCamera>,
    /// At least one marker needs a known pose.
    pub markers: Vec<RigMarker>,
    pub observations: Vec<ObjectImageObservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerMapConfig {
    pub bootstrap: BootstrapOptions,
    /// Anchored markers are always held fixed on top of these options.
    pub bundle: BundleOptions,
    /// Observations whose reprojection RMS exceeds this many pixels are
    /// dropped and the bundle is solved again.
    pub outlier_threshold: Option<f64>,
}

impl Default for MarkerMapConfig {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapOptions::default(),
            bundle: BundleOptions::default(),
            outlier_threshold: Some(2.0),
        }
    }
}

impl MarkerMapConfig {
    pub fn bundle_opts(&self, anchored: &[usize], excluded: Vec<usize>) -> BundleOptions {
        let mut opts = BundleOptions {
            excluded,
            ..self.bundle.clone()
        };
        for &m in anchored {
            if !opts.fix.fixed_positions.contains(&m) {
                opts.fix.fixed_positions.push(m);
            }
            if !opts.fix.fixed_rotations.contains(&m) {
                opts.fix.fixed_rotations.push(m);
            }
        }
        opts
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkerMapState {
    pub registration: Option<CameraRegistration>,
    pub outliers: Vec<usize>,
    pub bundle_report: Option<SolveReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerMapOutput {
    pub cameras: Vec<CameraModel<f64>>,
    /// Object → world pose per marker, `None` for markers nobody saw.
    pub markers: Vec<Option<RigidTransform<f64>>>,
    pub deselected: Vec<usize>,
    pub report: SolveReport,
}

impl ProblemType for MarkerMapProblem {
    type Config = MarkerMapConfig;
    type Input = MarkerMapInput;
    type State = MarkerMapState;
    type Output = MarkerMapOutput;
    type Export = MarkerMapOutput;

    fn name() -> &'static str {
        "marker_map_v1"
    }

    fn validate_input(input: &MarkerMapInput) -> Result<()> {
        validate_rig(&input.cameras, &input.markers, &input.observations)?;
        ensure_input!(!input.observations.is_empty(), "marker map has no observations");
        ensure_input!(
            input.markers.iter().any(|m| m.pose.is_some()),
            "marker map needs at least one marker with a known pose"
        );
        Ok(())
    }

    fn validate_config(config: &MarkerMapConfig) -> Result<()> {
        if let Some(t) = config.outlier_threshold {
            ensure!(t > 0.0, "outlier_threshold must be positive");
        }
        Ok(())
    }

    fn export(output: &MarkerMapOutput, _config: &MarkerMapConfig) -> Result<MarkerMapOutput> {
        Ok(output.clone())
    }
}

//! Intermediate results of the laser-rig stages.

use beamcal_core::{
    CameraModel, LaserProjectorModel, Line2D, LineImageObservation, PointImageObservation, Vec2,
    Vec3,
};
use beamcal_optim::SolveReport;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rig::CameraRegistration;

/// Data left out of later stages, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exclusion {
    /// Too few beams of a capture passed extraction.
    Capture {
        capture: usize,
        valid_beams: usize,
        required: usize,
    },
    /// A laser whose origin fewer than two cameras located.
    Laser { laser: usize, cameras: usize },
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::Capture {
                capture,
                valid_beams,
                required,
            } => write!(
                f,
                "capture {capture}: {valid_beams} valid beams, {required} required"
            ),
            Exclusion::Laser { laser, cameras } => {
                write!(f, "laser {laser}: origin located by {cameras} camera(s), 2 required")
            }
        }
    }
}

/// Beam lines of one capture after the common-point solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureLines {
    pub capture: usize,
    pub camera_index: usize,
    pub laser_index: usize,
    /// Image of the laser origin.
    pub point: Vec2,
    /// Refined line per shot, `None` for shots without a beam.
    pub lines: Vec<Option<Line2D<f64>>>,
    pub valid: Vec<bool>,
    /// RMS pixel distance of each shot's beam pixels to its line.
    pub rms: Vec<f64>,
    /// Extractor mean under the first-guess line per shot.
    pub mean_on_line: Vec<f64>,
    pub report: SolveReport,
}

/// Laser positions and cameras from the point bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsStage {
    pub cameras: Vec<CameraModel<f64>>,
    pub positions: Vec<Vec3>,
    pub report: SolveReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LasersStage {
    pub cameras: Vec<CameraModel<f64>>,
    pub lasers: Vec<LaserProjectorModel<f64>>,
    pub deselected: Vec<usize>,
    pub report: SolveReport,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaserRigState {
    // extract_lines
    pub captures: Option<Vec<CaptureLines>>,
    /// Laser-origin image per (camera, laser); `point_index` is the laser.
    pub origin_observations: Option<Vec<PointImageObservation>>,
    pub line_observations: Option<Vec<LineImageObservation>>,
    pub exclusions: Vec<Exclusion>,

    // bootstrap
    pub registration: Option<CameraRegistration>,
    /// Rough lasers with triangulated positions.
    pub initial_lasers: Option<Vec<LaserProjectorModel<f64>>>,

    // bundle_points
    pub points: Option<PointsStage>,

    // bundle_lasers / prune_outliers
    pub lasers: Option<LasersStage>,
    pub outliers: Vec<usize>,
}

impl LaserRigState {
    pub fn excluded_lasers(&self) -> Vec<usize> {
        self.exclusions
            .iter()
            .filter_map(|e| match e {
                Exclusion::Laser { laser, .. } => Some(*laser),
                Exclusion::Capture { .. } => None,
            })
            .collect()
    }

    /// Forget everything from `bootstrap` on.
    pub fn clear_from_bootstrap(&mut self) {
        self.exclusions
            .retain(|e| matches!(e, Exclusion::Capture { .. }));
        self.registration = None;
        self.initial_lasers = None;
        self.clear_from_points();
    }

    pub fn clear_from_points(&mut self) {
        self.points = None;
        self.clear_from_lasers();
    }

    pub fn clear_from_lasers(&mut self) {
        self.lasers = None;
        self.outliers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_bootstrap_keeps_capture_exclusions() {
        let mut state = LaserRigState {
            exclusions: vec![
                Exclusion::Capture {
                    capture: 2,
                    valid_beams: 1,
                    required: 4,
                },
                Exclusion::Laser {
                    laser: 1,
                    cameras: 1,
                },
            ],
            outliers: vec![3],
            ..Default::default()
        };
        assert_eq!(state.excluded_lasers(), vec![1]);
        state.clear_from_bootstrap();
        assert_eq!(state.exclusions.len(), 1);
        assert!(state.excluded_lasers().is_empty());
        assert!(state.outliers.is_empty());
        assert_eq!(
            state.exclusions[0].to_string(),
            "capture 2: 1 valid beams, 4 required"
        );
    }
}

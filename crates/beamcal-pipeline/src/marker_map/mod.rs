//! Marker-map calibration: camera and marker poses from marker observations,
//! anchored by markers with known poses.

mod problem;
mod steps;

pub use problem::{MarkerMapConfig, MarkerMapInput, MarkerMapOutput, MarkerMapProblem, MarkerMapState};
pub use steps::{run_calibration, step_bootstrap, step_bundle, STAGES};

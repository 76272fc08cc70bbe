//! Laser-projector rig calibration.
//!
//! Cameras are registered against fiducial markers; every laser is then
//! located from the beams it draws in the camera images and finally refined
//! with its orientation and field of view.

mod problem;
mod state;
mod steps;

pub use problem::{
    BeamCapture, BeamShot, LaserRigConfig, LaserRigExport, LaserRigInput, LaserRigOutput,
    LaserRigProblem,
};
pub use state::{CaptureLines, Exclusion, LaserRigState, LasersStage, PointsStage};
pub use steps::{
    run_calibration, step_bootstrap, step_bundle_lasers, step_bundle_points, step_extract_lines,
    step_prune_outliers, STAGES,
};

//! Session-based calibration pipelines for laser-projector rigs.
//!
//! Each pipeline is a [`ProblemType`] driven through a [`CalibrationSession`]
//! by free step functions. Steps read the session input and config, store
//! intermediate results in the session state and finish with an output that
//! can be exported.
//!
//! ```no_run
//! use beamcal_pipeline::laser_rig::{run_calibration, LaserRigProblem};
//! use beamcal_pipeline::{CalibrationSession, DirectoryImageSource, LogProgress};
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//!
//! let mut session = CalibrationSession::<LaserRigProblem>::with_input(input)?;
//! let images = DirectoryImageSource::new("captures");
//! run_calibration(&mut session, &images, &mut LogProgress)?;
//!
//! let export = session.export()?;
//! println!("{}", serde_json::to_string_pretty(&export)?);
//! # Ok(())
//! # }
//! ```
//!
//! Stages can also be run one by one (`step_extract_lines`, `step_bootstrap`,
//! ...), with config changes in between.

pub mod images;
pub mod progress;
pub mod rig;
pub mod session;

pub mod laser_rig;
pub mod marker_map;

pub use images::{DirectoryImageSource, ImageRef, ImageSource, MemoryImageSource};
pub use progress::{LogProgress, ProgressObserver};
pub use rig::{register_cameras, CameraRegistration, RigCamera, RigMarker};
pub use session::{CalibrationSession, InvalidationPolicy, LogEntry, ProblemType, SessionMetadata};

pub use laser_rig::{
    LaserRigConfig, LaserRigExport, LaserRigInput, LaserRigOutput, LaserRigProblem,
};
pub use marker_map::{MarkerMapConfig, MarkerMapInput, MarkerMapOutput, MarkerMapProblem};

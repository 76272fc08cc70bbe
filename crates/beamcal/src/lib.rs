//! High-level entry crate for `beamcal`: registration and bundle adjustment
//! for installations of cameras and steerable laser projectors.
//!
//! Two calibration workflows are provided:
//! - laser-rig calibration: laser positions, orientations and fields of view
//!   from beam images, with cameras registered against fiducial markers
//! - marker-map calibration: camera and marker poses from marker
//!   observations, anchored by markers with known poses
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//! use beamcal::prelude::*;
//! use beamcal::laser_rig::{step_bootstrap, step_extract_lines};
//!
//! let mut session = CalibrationSession::<LaserRigProblem>::with_input(input)?;
//! let images = DirectoryImageSource::new("captures");
//!
//! // Stage by stage, e.g. to inspect the extracted beams
//! step_extract_lines(&mut session, &images, &mut LogProgress)?;
//! step_bootstrap(&mut session, &mut LogProgress)?;
//!
//! // Or everything at once
//! run_laser_rig(&mut session, &images, &mut LogProgress)?;
//!
//! let result = session.export()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`session`] - Session framework (`CalibrationSession`, `ProblemType`)
//! - [`laser_rig`] - Laser-projector rig workflow
//! - [`marker_map`] - Marker-map workflow
//! - [`core`] - Camera, laser and transform models, observations, RANSAC
//! - [`linear`] - Beam extraction, line fits, triangulation, pose seeds
//! - [`optim`] - Bootstrap, common point and bundle adjustment solvers
//! - [`synthetic`] - Synthetic scenes for testing
//!
//! # Available Problem Types
//!
//! | Problem Type | Input | Stages |
//! |--------------|-------|--------|
//! | [`LaserRigProblem`] | `LaserRigInput` | `extract_lines` → `bootstrap` → `bundle_points` → `bundle_lasers` → `prune_outliers` |
//! | [`MarkerMapProblem`] | `MarkerMapInput` | `bootstrap` → `bundle` |

// ═══════════════════════════════════════════════════════════════════════════════
// Session Framework
// ═══════════════════════════════════════════════════════════════════════════════

pub mod session {
    pub use beamcal_pipeline::session::{
        CalibrationSession, InvalidationPolicy, LogEntry, ProblemType, SessionMetadata,
    };
    pub use beamcal_pipeline::{LogProgress, ProgressObserver};
}

// ═══════════════════════════════════════════════════════════════════════════════
// Problem Types
// ═══════════════════════════════════════════════════════════════════════════════

pub mod laser_rig {
    pub use beamcal_pipeline::laser_rig::*;
}

pub mod marker_map {
    pub use beamcal_pipeline::marker_map::*;
}

pub mod images {
    pub use beamcal_pipeline::images::*;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Foundation Crates
// ═══════════════════════════════════════════════════════════════════════════════

pub mod core {
    pub use beamcal_core::*;
}

pub mod linear {
    pub use beamcal_linear::*;
}

pub mod optim {
    pub use beamcal_optim::*;
}

pub mod synthetic {
    pub use beamcal_core::synthetic::*;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Re-exports (Top-Level)
// ═══════════════════════════════════════════════════════════════════════════════

pub use beamcal_pipeline::{CalibrationSession, ProblemType};

pub use beamcal_pipeline::{LaserRigProblem, MarkerMapProblem};

pub use beamcal_pipeline::laser_rig::run_calibration as run_laser_rig;
pub use beamcal_pipeline::marker_map::run_calibration as run_marker_map;

pub use beamcal_pipeline::{
    DirectoryImageSource, ImageRef, ImageSource, LogProgress, MemoryImageSource,
    ProgressObserver, RigCamera, RigMarker,
};

pub use beamcal_core::{
    CalibError, CameraIntrinsics, CameraModel, LaserProjectorModel, Line2D, LineImageObservation,
    ObjectImageObservation, PointImageObservation, RigidTransform, Vec2, Vec3,
};

pub use beamcal_optim::ir::RobustLoss;
pub use beamcal_optim::{BundleFixOptions, BundleOptions, GaugeConfig, SolveReport};

/// Convenient re-exports for common use cases.
///
/// ```no_run
/// use beamcal::prelude::*;
/// ```
pub mod prelude {
    pub use crate::session::{CalibrationSession, LogProgress, ProblemType, ProgressObserver};

    pub use crate::{LaserRigProblem, MarkerMapProblem};

    pub use crate::{run_laser_rig, run_marker_map};

    pub use crate::{DirectoryImageSource, ImageSource, MemoryImageSource, RigCamera, RigMarker};

    pub use crate::{
        CameraIntrinsics, CameraModel, LaserProjectorModel, RigidTransform, Vec2, Vec3,
    };

    pub use crate::{BundleOptions, RobustLoss};
}

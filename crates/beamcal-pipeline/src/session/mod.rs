//! Session framework: a mutable container per calibration problem, driven by
//! stage functions that live next to each problem.

pub mod calibsession;
pub mod problem_type;
pub mod types;

pub use calibsession::CalibrationSession;
pub use problem_type::{InvalidationPolicy, ProblemType};
pub use types::{current_timestamp, LogEntry, SessionMetadata};

//! Core geometry and data types for `beamcal`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Vec3`, ...),
//! - scalar-generic geometric models (rigid transforms, cameras, laser
//!   projectors, 2D lines, rays) that evaluate both with `f64` and with the
//!   dual numbers used by automatic differentiation,
//! - observation records produced by extraction and consumed by solvers,
//! - the error taxonomy shared by every crate ([`CalibError`]),
//! - a generic RANSAC engine (`ransac`, [`Estimator`]),
//! - deterministic synthetic scene generators for tests and demos.
//!
//! Camera chain:
//! `pixel = viewport ∘ perspective divide ∘ projection ∘ view(world point)`
//!
//! Laser chain:
//! `ray = rigid_body ∘ rotateX(angle.y) ∘ rotateY(angle.x) (+Z)`

/// Error taxonomy.
pub mod error;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Scalar-generic geometric models.
pub mod models;
/// Observation records.
pub mod observation;
/// Generic RANSAC engine and traits.
pub mod ransac;
/// Residual summary statistics.
pub mod stats;
/// Deterministic synthetic scenes.
pub mod synthetic;

pub use error::*;
pub use math::*;
pub use models::*;
pub use observation::*;
pub use ransac::*;
pub use stats::*;

//! Non-linear least-squares problems for camera / laser-projector rigs.
//!
//! Problems are described once in a backend-independent IR ([`ir`]) and
//! compiled to tiny-solver ([`backend`]). Residuals ([`factors`]) are generic
//! over the scalar type so the same code runs with `f64` and with the dual
//! numbers of automatic differentiation.
//!
//! On top of that:
//! - [`problems`]: common-point line fitting, single-view pose refinement and
//!   bundle adjustment of points, rigid objects and lasers;
//! - [`bootstrap`]: incremental registration that produces the initial poses
//!   the bundle problems start from.

pub mod backend;
pub mod bootstrap;
pub mod factors;
pub mod ir;
pub mod params;
pub mod problems;
pub mod report;
pub mod solve;

pub use backend::{solve_with_backend, BackendSolution, OptimBackend, SolverConfig, TinySolverBackend};
pub use bootstrap::{bootstrap_poses, BootstrapInput, BootstrapOptions, BootstrapResult};
pub use problems::*;
pub use report::{prune_outliers, residual_rms, SolveReport, SolveStatus};
pub use solve::{observation_residuals, solve_ir, IrSolution};

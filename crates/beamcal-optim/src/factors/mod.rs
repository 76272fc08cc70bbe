//! Residual functions, generic over the solver scalar.
//!
//! Every function here is evaluated twice: with `f64` for diagnostics and
//! per-observation residuals, and with dual numbers by tiny-solver's automatic
//! differentiation. They follow one pattern:
//!
//! ```rust,ignore
//! pub(crate) fn my_residual_generic<T: RealField>(
//!     block: DVectorView<'_, T>,
//!     measurement: [f64; N],
//!     w: f64,
//! ) -> SVector<T, M>
//! ```
//!
//! - parameters come in as views of the IR blocks, in factor order;
//! - measurements are plain `f64` and lifted with `T::from_f64(..).unwrap()`;
//! - no branching on the scalar type, no I/O.
//!
//! Gauge factors span a set of blocks and take `&[DVectorView<T>]`.

pub mod common_point;
pub mod gauge;
pub mod laser;
pub mod reprojection;

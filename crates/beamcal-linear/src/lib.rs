//! Closed-form and image-space building blocks for `beamcal`.
//!
//! - [`extract`]: on/off image pairs → weighted beam pixels and a first-guess line.
//! - [`line_fit`]: Huber-robust total-least-squares line fitting.
//! - [`point_from_lines`]: least-squares intersection of 2D lines.
//! - [`homography`]: normalized DLT homography.
//! - [`pose`]: linear perspective pose (DLT / planar homography) with RANSAC.
//! - [`render`]: synthetic beam images for tests and demos.
//! - [`triangulate`]: least-squares intersection of 3D rays.

pub mod extract;
pub mod homography;
pub mod line_fit;
pub mod math;
pub mod point_from_lines;
pub mod pose;
pub mod render;
pub mod triangulate;

pub use extract::*;
pub use homography::*;
pub use line_fit::*;
pub use point_from_lines::*;
pub use pose::{solve_view_pose, PoseSolverOptions, ViewPoseEstimate};
pub use triangulate::{triangulate_pixels, triangulate_rays};

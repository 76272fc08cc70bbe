//! Geometric models shared by extraction, bootstrap and bundle adjustment.
//!
//! Every model is generic over `T: nalgebra::RealField` so residuals can be
//! evaluated with `f64` for diagnostics and with dual numbers inside the
//! solver. No model method branches on the scalar type.

mod camera;
mod laser;
mod line;
mod ray;
mod transform;

pub use camera::{CameraIntrinsics, CameraModel};
pub use laser::LaserProjectorModel;
pub use line::Line2D;
pub use ray::Ray;
pub use transform::{euler_xyz_to_matrix, matrix_to_euler_xyz, RigidTransform};

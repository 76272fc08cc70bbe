//! Problem builders.
//!
//! Each builder validates its inputs, lowers them into a [`ProblemIR`](crate::ir::ProblemIR),
//! solves it and unpacks a typed solution with a [`SolveReport`](crate::report::SolveReport).

pub mod bundle;
pub mod common_point;
pub mod laser_bundle;
pub mod objects_bundle;
pub mod points_bundle;
pub mod view_pose;

pub use bundle::{
    solve_bundle, BundleFixOptions, BundleModel, BundleOptions, BundleSolution, GaugeConfig,
    PoseRef, RotationGauge,
};
pub use common_point::{solve_common_point, CommonPointOptions, CommonPointSolution, LineSet};
pub use laser_bundle::{bundle_lasers, LaserModel};
pub use objects_bundle::{bundle_objects, ObjectsModel};
pub use points_bundle::{bundle_points, PointsModel};
pub use view_pose::{estimate_view_pose, refine_view_pose, RefinedViewPose, ViewPoseOptions};

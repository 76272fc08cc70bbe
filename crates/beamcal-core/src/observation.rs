//! Observation records.
//!
//! Observations are derived from captured images once per session and never
//! mutated by solvers; solvers refer to them by index.

use crate::models::Line2D;
use crate::Vec2;
use serde::{Deserialize, Serialize};

/// A laser beam seen as a line in one camera image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineImageObservation {
    pub camera_index: usize,
    pub laser_index: usize,
    /// Normalized steering command in `[-1, 1]²`.
    pub command: Vec2,
    pub line: Line2D<f64>,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

/// A single 3D point seen in one view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointImageObservation {
    pub view_index: usize,
    pub point_index: usize,
    pub pixel: Vec2,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

/// A rigid object with N known local points seen in one view.
///
/// `pixels[k]` is the image of the object's `k`-th local point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectImageObservation {
    pub view_index: usize,
    pub object_index: usize,
    pub pixels: Vec<Vec2>,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

fn unit_weight() -> f64 {
    1.0
}

impl LineImageObservation {
    pub fn new(camera_index: usize, laser_index: usize, command: Vec2, line: Line2D<f64>) -> Self {
        Self {
            camera_index,
            laser_index,
            command,
            line,
            weight: 1.0,
        }
    }

    pub fn command_in_range(&self) -> bool {
        self.command.iter().all(|c| c.is_finite() && c.abs() <= 1.0)
    }
}

impl PointImageObservation {
    pub fn new(view_index: usize, point_index: usize, pixel: Vec2) -> Self {
        Self {
            view_index,
            point_index,
            pixel,
            weight: 1.0,
        }
    }
}

impl ObjectImageObservation {
    pub fn new(view_index: usize, object_index: usize, pixels: Vec<Vec2>) -> Self {
        Self {
            view_index,
            object_index,
            pixels,
            weight: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_defaults_to_one_when_missing() {
        let json = r#"{"view_index":1,"point_index":4,"pixel":[10.0,20.0]}"#;
        let obs: PointImageObservation = serde_json::from_str(json).unwrap();
        assert_eq!(obs.weight, 1.0);
        assert_eq!(obs.pixel, Vec2::new(10.0, 20.0));
    }

    #[test]
    fn command_range_check() {
        let line = Line2D::from_points(Vec2::zeros(), Vec2::x());
        let mut obs = LineImageObservation::new(0, 0, Vec2::new(0.5, -1.0), line);
        assert!(obs.command_in_range());
        obs.command.x = 1.2;
        assert!(!obs.command_in_range());
    }
}

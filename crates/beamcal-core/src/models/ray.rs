use nalgebra::{RealField, Vector3};
use serde::{Deserialize, Serialize};

/// Half-line with a unit direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: RealField + Serialize",
    deserialize = "T: RealField + Deserialize<'de>"
))]
pub struct Ray<T: RealField> {
    pub origin: Vector3<T>,
    pub direction: Vector3<T>,
}

impl<T: RealField> Ray<T> {
    /// The direction is normalized.
    pub fn new(origin: Vector3<T>, direction: Vector3<T>) -> Self {
        let n = direction.norm();
        Self {
            origin,
            direction: direction / n,
        }
    }

    pub fn point_at(&self, lambda: T) -> Vector3<T> {
        &self.origin + &self.direction * lambda
    }

    /// Perpendicular distance from the supporting line to `p`.
    pub fn distance_to_point(&self, p: &Vector3<T>) -> T {
        (p - &self.origin).cross(&self.direction).norm()
    }
}

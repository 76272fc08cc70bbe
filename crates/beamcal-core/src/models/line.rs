use crate::math::lit;
use nalgebra::{RealField, Vector2};
use serde::{Deserialize, Serialize};

/// Infinite 2D line: point `s` and unit direction `t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: RealField + Serialize",
    deserialize = "T: RealField + Deserialize<'de>"
))]
pub struct Line2D<T: RealField> {
    pub s: Vector2<T>,
    pub t: Vector2<T>,
}

impl<T: RealField> Line2D<T> {
    /// Line through `s` along `direction` (normalized here).
    pub fn new(s: Vector2<T>, direction: Vector2<T>) -> Self {
        let n = direction.norm();
        Self {
            s,
            t: direction / n,
        }
    }

    pub fn from_points(a: Vector2<T>, b: Vector2<T>) -> Self {
        let d = b - &a;
        Self::new(a, d)
    }

    pub fn from_point_angle(p: Vector2<T>, angle: T) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self { s: p, t: Vector2::new(cos, sin) }
    }

    /// Normal-form coefficients `(a, b, c)` of `a·x + b·y + c = 0` with
    /// `a² + b² = 1`.
    pub fn abc(&self) -> (T, T, T) {
        let a = -self.t.y.clone();
        let b = self.t.x.clone();
        let c = -(a.clone() * self.s.x.clone() + b.clone() * self.s.y.clone());
        (a, b, c)
    }

    /// Signed perpendicular distance, positive to the left of `t`.
    pub fn signed_distance(&self, p: &Vector2<T>) -> T {
        let d = p - &self.s;
        self.t.x.clone() * d.y.clone() - self.t.y.clone() * d.x.clone()
    }

    pub fn distance_to_point(&self, p: &Vector2<T>) -> T {
        self.signed_distance(p).abs()
    }

    pub fn closest_point_to(&self, p: &Vector2<T>) -> Vector2<T> {
        let d = p - &self.s;
        let along = self.t.dot(&d);
        &self.s + &self.t * along
    }

    /// Direction angle `atan2(t.y, t.x)`.
    pub fn angle(&self) -> T {
        self.t.y.clone().atan2(self.t.x.clone())
    }

    pub fn is_finite(&self) -> bool {
        self.s.iter().chain(self.t.iter()).all(|v| v.clone().is_finite())
    }
}

impl Line2D<f64> {
    /// Segment where the line crosses the image rectangle `[0, w] × [0, h]`.
    pub fn image_edge_intersections(
        &self,
        width: f64,
        height: f64,
    ) -> Option<(Vector2<f64>, Vector2<f64>)> {
        let mut lo = f64::NEG_INFINITY;
        let mut hi = f64::INFINITY;
        for (origin, dir, max) in [(self.s.x, self.t.x, width), (self.s.y, self.t.y, height)] {
            if dir.abs() < 1e-12 {
                if origin < 0.0 || origin > max {
                    return None;
                }
                continue;
            }
            let a = (0.0 - origin) / dir;
            let b = (max - origin) / dir;
            lo = lo.max(a.min(b));
            hi = hi.min(a.max(b));
        }
        if lo > hi {
            return None;
        }
        Some((self.s + self.t * lo, self.s + self.t * hi))
    }

    pub fn lift<T: RealField>(&self) -> Line2D<T> {
        Line2D {
            s: Vector2::new(lit(self.s.x), lit(self.s.y)),
            t: Vector2::new(lit(self.t.x), lit(self.t.y)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn distances_and_projection() {
        let line = Line2D::from_points(Vector2::new(0.0, 1.0), Vector2::new(4.0, 1.0));
        let p = Vector2::new(2.0, 3.0);
        assert_relative_eq!(line.signed_distance(&p), 2.0);
        assert_relative_eq!(line.distance_to_point(&Vector2::new(2.0, -1.0)), 2.0);
        assert_relative_eq!(line.closest_point_to(&p), Vector2::new(2.0, 1.0));
    }

    #[test]
    fn abc_form_agrees_with_distance() {
        let line = Line2D::from_point_angle(Vector2::new(3.0, -2.0), 0.7);
        let (a, b, c) = line.abc();
        let p = Vector2::new(-1.0, 5.0);
        assert_relative_eq!(a * p.x + b * p.y + c, line.signed_distance(&p), epsilon = 1e-12);
        assert_relative_eq!(line.angle(), 0.7, epsilon = 1e-12);
    }

    #[test]
    fn clips_to_image_rectangle() {
        let line = Line2D::from_points(Vector2::new(0.0, 0.0), Vector2::new(1.0, 1.0));
        let (a, b) = line.image_edge_intersections(100.0, 50.0).unwrap();
        assert_relative_eq!(a, Vector2::new(0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(b, Vector2::new(50.0, 50.0), epsilon = 1e-12);

        let outside = Line2D::from_points(Vector2::new(0.0, -10.0), Vector2::new(1.0, -10.0));
        assert!(outside.image_edge_intersections(100.0, 50.0).is_none());
    }
}

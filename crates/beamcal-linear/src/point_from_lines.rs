//! Least-squares intersection of 2D lines.
//!
//! Minimizes `Σ w_i · (n_i · (p - s_i))²`, where `n_i` is the unit normal of
//! line `i`. The normal equations `(Σ w n nᵀ) p = Σ w n nᵀ s` are solved in
//! closed form; with a Huber threshold the weights are refreshed by IRLS.

use beamcal_core::{CalibError, Line2D, Vec2};
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointFromLinesOptions {
    /// Huber threshold on point-to-line distance; `None` for plain least squares.
    pub huber_threshold: Option<f64>,
    pub max_iters: usize,
}

impl Default for PointFromLinesOptions {
    fn default() -> Self {
        Self {
            huber_threshold: None,
            max_iters: 20,
        }
    }
}

/// Ratio of the normal matrix eigenvalues below which lines count as parallel.
const PARALLEL_RATIO: f64 = 1e-9;

fn weighted_intersection(lines: &[Line2D<f64>], weights: &[f64]) -> Result<Vec2, CalibError> {
    let mut a = Matrix2::zeros();
    let mut b = Vec2::zeros();
    for (line, w) in lines.iter().zip(weights) {
        let n = Vec2::new(-line.t.y, line.t.x);
        let nnt = n * n.transpose() * *w;
        a += nnt;
        b += nnt * line.s;
    }
    let eig = a.symmetric_eigen();
    let (lo, hi) = (eig.eigenvalues.min(), eig.eigenvalues.max());
    if hi <= 0.0 || lo / hi < PARALLEL_RATIO {
        return Err(CalibError::invalid(
            "lines are parallel; no unique common point",
        ));
    }
    a.try_inverse()
        .map(|inv| inv * b)
        .ok_or_else(|| CalibError::invalid("line normal matrix is singular"))
}

/// Common point of at least two non-parallel lines.
pub fn point_from_lines(
    lines: &[Line2D<f64>],
    opts: &PointFromLinesOptions,
) -> Result<Vec2, CalibError> {
    if lines.len() < 2 {
        return Err(CalibError::invalid(format!(
            "need at least 2 lines, got {}",
            lines.len()
        )));
    }
    if lines.iter().any(|l| !l.is_finite()) {
        return Err(CalibError::invalid("line has non-finite components"));
    }

    let mut weights = vec![1.0; lines.len()];
    let mut p = weighted_intersection(lines, &weights)?;
    let Some(k) = opts.huber_threshold else {
        return Ok(p);
    };
    for _ in 0..opts.max_iters {
        for (w, line) in weights.iter_mut().zip(lines) {
            let d = line.distance_to_point(&p);
            *w = if d <= k { 1.0 } else { k / d };
        }
        let next = weighted_intersection(lines, &weights)?;
        let step = (next - p).norm();
        p = next;
        if step < 1e-9 {
            break;
        }
    }
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn star(center: Vec2, count: usize) -> Vec<Line2D<f64>> {
        (0..count)
            .map(|k| Line2D::from_point_angle(center, std::f64::consts::PI * k as f64 / count as f64))
            .collect()
    }

    fn shifted(line: &Line2D<f64>, offset: f64) -> Line2D<f64> {
        let n = Vec2::new(-line.t.y, line.t.x);
        Line2D::new(line.s + n * offset, line.t)
    }

    #[test]
    fn noise_free_lines_meet_at_the_point() {
        let p = Vec2::new(3.0, -4.0);
        for count in [2, 3, 7] {
            let got = point_from_lines(&star(p, count), &PointFromLinesOptions::default()).unwrap();
            assert_relative_eq!(got, p, epsilon = 1e-9);
        }
    }

    #[test]
    fn single_outlier_moves_point_less_than_uniform_shift() {
        let p = Vec2::new(10.0, 5.0);
        let lines = star(p, 6);
        let one_off: Vec<_> = lines
            .iter()
            .enumerate()
            .map(|(i, l)| if i == 0 { shifted(l, 5.0) } else { l.clone() })
            .collect();
        let all_off: Vec<_> = lines.iter().map(|l| shifted(l, 5.0)).collect();

        for opts in [
            PointFromLinesOptions::default(),
            PointFromLinesOptions {
                huber_threshold: Some(1.0),
                ..Default::default()
            },
        ] {
            let a = point_from_lines(&one_off, &opts).unwrap();
            let b = point_from_lines(&all_off, &opts).unwrap();
            assert!((a - p).norm() < (b - p).norm());
        }
    }

    #[test]
    fn huber_reduces_outlier_pull() {
        let p = Vec2::new(0.0, 0.0);
        let mut lines = star(p, 8);
        lines[3] = shifted(&lines[3], 20.0);
        let plain = point_from_lines(&lines, &PointFromLinesOptions::default()).unwrap();
        let robust = point_from_lines(
            &lines,
            &PointFromLinesOptions {
                huber_threshold: Some(0.5),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(robust.norm() < plain.norm());
    }

    #[test]
    fn parallel_lines_are_rejected() {
        let a = Line2D::from_points(Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0));
        let b = Line2D::from_points(Vec2::new(0.0, 2.0), Vec2::new(1.0, 2.0));
        let err = point_from_lines(&[a.clone(), b], &PointFromLinesOptions::default()).unwrap_err();
        assert!(matches!(err, CalibError::InvalidInput(_)));
        assert!(point_from_lines(&[a], &PointFromLinesOptions::default()).is_err());
    }
}

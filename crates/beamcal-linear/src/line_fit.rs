//! Robust 2D line fitting.
//!
//! Weighted total least squares (principal axis of the weighted scatter)
//! inside an iteratively reweighted loop with Huber weights on the
//! perpendicular distance, in pixels.

use beamcal_core::{CalibError, Line2D, Vec2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineFitOptions {
    /// Huber threshold on the point-to-line distance.
    pub huber_threshold: f64,
    pub max_iters: usize,
    /// Stop once the direction and offset change by less than this.
    pub tolerance: f64,
}

impl Default for LineFitOptions {
    fn default() -> Self {
        Self {
            huber_threshold: 1.345,
            max_iters: 30,
            tolerance: 1e-6,
        }
    }
}

/// Weighted orthogonal regression; `None` for zero total weight or a
/// degenerate (single-point) scatter.
pub fn fit_line_tls(points: &[Vec2], weights: &[f64]) -> Option<Line2D<f64>> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || points.len() < 2 {
        return None;
    }
    let c = points
        .iter()
        .zip(weights)
        .fold(Vec2::zeros(), |acc, (p, w)| acc + p * *w)
        / total;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (p, w) in points.iter().zip(weights) {
        let d = p - c;
        sxx += w * d.x * d.x;
        sxy += w * d.x * d.y;
        syy += w * d.y * d.y;
    }
    if sxx + syy <= 1e-18 * total {
        return None;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(Line2D::from_point_angle(c, theta))
}

#[inline]
fn huber_weight(r: f64, k: f64) -> f64 {
    let a = r.abs();
    if a <= k {
        1.0
    } else {
        k / a
    }
}

/// Huber-robust line fit. `weights` defaults to all ones.
pub fn fit_line_huber(
    points: &[Vec2],
    weights: Option<&[f64]>,
    opts: &LineFitOptions,
) -> Result<Line2D<f64>, CalibError> {
    if points.len() < 2 {
        return Err(CalibError::invalid(format!(
            "line fit needs at least 2 points, got {}",
            points.len()
        )));
    }
    let base: Vec<f64> = match weights {
        Some(w) if w.len() != points.len() => {
            return Err(CalibError::invalid(format!(
                "line fit got {} weights for {} points",
                w.len(),
                points.len()
            )))
        }
        Some(w) => w.to_vec(),
        None => vec![1.0; points.len()],
    };

    let mut line = fit_line_tls(points, &base)
        .ok_or_else(|| CalibError::invalid("line fit points are degenerate"))?;
    let mut w = base.clone();
    for _ in 0..opts.max_iters {
        for (i, p) in points.iter().enumerate() {
            w[i] = base[i] * huber_weight(line.signed_distance(p), opts.huber_threshold);
        }
        let Some(next) = fit_line_tls(points, &w) else {
            break;
        };
        // Directions are sign-ambiguous.
        let dir_change = 1.0 - next.t.dot(&line.t).abs();
        let offset_change = line.distance_to_point(&next.s);
        line = next;
        if dir_change < opts.tolerance && offset_change < opts.tolerance {
            break;
        }
    }
    Ok(line)
}

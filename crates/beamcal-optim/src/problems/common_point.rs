//! Lines through one common image point.
//!
//! One laser fired at K steering commands from a fixed position leaves K beam
//! traces in a camera image. Their lines all pass through the image of the
//! laser origin. This problem solves that shared point and one angle per
//! trace jointly against the beam pixels.

use crate::backend::SolverConfig;
use crate::ir::{FactorKind, FixedMask, ProblemIR, ResidualBlock, RobustLoss};
use crate::report::SolveReport;
use crate::solve::solve_ir;
use anyhow::{anyhow, Context, Result};
use beamcal_core::{ensure_input, Line2D, Vec2};
use beamcal_linear::{point_from_lines, BeamObservation, PointFromLinesOptions, WeightedPixel};
use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Beam pixels of one steering command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSet {
    pub points: Vec<WeightedPixel>,
    /// First-guess line.
    pub line: Option<Line2D<f64>>,
    pub valid: bool,
}

impl From<&BeamObservation> for LineSet {
    fn from(obs: &BeamObservation) -> Self {
        Self {
            points: obs.points.clone(),
            line: obs.line.clone(),
            valid: obs.valid && obs.line.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonPointOptions {
    /// Pixels farther than this from their set's first-guess line are ignored.
    pub distance_threshold: f64,
    /// Sets whose refined RMS distance exceeds this are marked invalid.
    pub max_line_rms: f64,
    pub point_seed: PointFromLinesOptions,
    /// Loss on the weighted pixel distances. Outlying pixels are already
    /// dropped by `distance_threshold`, so the default is plain least squares.
    pub loss: RobustLoss,
    pub solver: SolverConfig,
}

impl Default for CommonPointOptions {
    fn default() -> Self {
        Self {
            distance_threshold: 5.0,
            max_line_rms: 2.0,
            point_seed: PointFromLinesOptions {
                huber_threshold: Some(2.0),
                ..Default::default()
            },
            loss: RobustLoss::None,
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommonPointSolution {
    pub point: Vec2,
    /// Refined line per set. Sets left out of the solve get a line through
    /// the shared point at their first-guess angle, or `None` without one.
    pub lines: Vec<Option<Line2D<f64>>>,
    pub valid: Vec<bool>,
    /// RMS pixel distance of each set's inliers to its refined line; `0` for
    /// sets left out of the solve.
    pub rms: Vec<f64>,
    pub report: SolveReport,
}

fn angle_name(k: usize) -> String {
    format!("angle_{k}")
}

fn seed_angle(line: &Line2D<f64>, point: &Vec2) -> f64 {
    let d = line.s - point;
    if d.norm() > 1e-9 {
        d.y.atan2(d.x)
    } else {
        line.angle()
    }
}

fn rms_distance(line: &Line2D<f64>, points: &[WeightedPixel]) -> f64 {
    let d: Vec<f64> = points
        .iter()
        .map(|p| line.distance_to_point(&p.position))
        .collect();
    beamcal_core::rms(&d)
}

/// Solve the shared point and per-set line angles.
///
/// A solve that stops short or goes non-finite still returns its last
/// parameters; callers decide through [`SolveReport::check`].
pub fn solve_common_point(sets: &[LineSet], opts: &CommonPointOptions) -> Result<CommonPointSolution> {
    ensure_input!(!sets.is_empty(), "common point solve needs at least one line set");

    let seeds: Vec<(usize, &Line2D<f64>)> = sets
        .iter()
        .enumerate()
        .filter(|(_, s)| s.valid)
        .filter_map(|(k, s)| s.line.as_ref().map(|line| (k, line)))
        .collect();
    ensure_input!(
        seeds.len() >= 2,
        "common point solve needs at least 2 valid line sets, got {}",
        seeds.len()
    );

    let seed_lines: Vec<Line2D<f64>> = seeds.iter().map(|(_, l)| (*l).clone()).collect();
    let point = point_from_lines(&seed_lines, &opts.point_seed)
        .context("seeding the common point")?;
    debug!("common point seed ({:.2}, {:.2})", point.x, point.y);

    let mut ir = ProblemIR::new();
    let point_id = ir.add_param_block("point", 2, FixedMask::all_free(), None);
    let mut initial = HashMap::from([("point".to_string(), DVector::from_row_slice(point.as_slice()))]);
    let mut inliers: Vec<Vec<WeightedPixel>> = vec![Vec::new(); sets.len()];
    for (k, line) in &seeds {
        let set_inliers: Vec<WeightedPixel> = sets[*k]
            .points
            .iter()
            .filter(|p| line.distance_to_point(&p.position) <= opts.distance_threshold)
            .copied()
            .collect();
        if set_inliers.len() < 2 {
            warn!("line set {k} has {} inliers; left out", set_inliers.len());
            continue;
        }
        let name = angle_name(*k);
        let angle_id = ir.add_param_block(&name, 1, FixedMask::all_free(), None);
        initial.insert(name, DVector::from_element(1, seed_angle(line, &point)));
        ir.add_residual_block(
            ResidualBlock::new(
                vec![point_id, angle_id],
                FactorKind::CommonPointLine {
                    pixels: set_inliers.iter().map(|p| [p.position.x, p.position.y]).collect(),
                    weights: set_inliers.iter().map(|p| p.weight).collect(),
                },
                opts.loss,
            )
            .for_observation(*k),
        );
        inliers[*k] = set_inliers;
    }
    let solved = inliers.iter().filter(|s| !s.is_empty()).count();
    ensure_input!(
        solved >= 2,
        "common point solve needs at least 2 line sets with inliers, got {}",
        solved
    );

    let solution = solve_ir(&ir, &initial, &opts.solver, sets.len())?;
    let p = solution
        .params
        .get("point")
        .ok_or_else(|| anyhow!("missing point in solution"))?;
    let point = Vec2::new(p[0], p[1]);

    let mut lines = Vec::with_capacity(sets.len());
    let mut valid = Vec::with_capacity(sets.len());
    let mut rms = Vec::with_capacity(sets.len());
    for (k, set) in sets.iter().enumerate() {
        match solution.params.get(&angle_name(k)) {
            Some(angle) => {
                let line = Line2D::from_point_angle(point, angle[0]);
                let r = rms_distance(&line, &inliers[k]);
                let ok = r <= opts.max_line_rms;
                if !ok {
                    warn!("line set {k} rms {r:.3}px exceeds {:.3}px", opts.max_line_rms);
                }
                lines.push(Some(line));
                valid.push(ok);
                rms.push(r);
            }
            None => {
                lines.push(
                    set.line
                        .as_ref()
                        .map(|l| Line2D::from_point_angle(point, l.angle())),
                );
                valid.push(false);
                rms.push(0.0);
            }
        }
    }

    Ok(CommonPointSolution {
        point,
        lines,
        valid,
        rms,
        report: solution.report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamcal_core::CalibError;
    use beamcal_linear::{fit_line_huber, LineFitOptions};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn center() -> Vec2 {
        Vec2::new(320.0, 100.0)
    }

    fn noisy_set(rng: &mut StdRng, angle: f64, noise: f64) -> LineSet {
        let dir = Vec2::new(angle.cos(), angle.sin());
        let normal = Vec2::new(-dir.y, dir.x);
        let points: Vec<WeightedPixel> = (0..40)
            .map(|i| {
                let along = 40.0 + 4.0 * i as f64;
                let off = rng.random_range(-noise..=noise);
                WeightedPixel {
                    position: center() + dir * along + normal * off,
                    weight: rng.random_range(0.5..=1.0),
                }
            })
            .collect();
        let positions: Vec<Vec2> = points.iter().map(|p| p.position).collect();
        let line = fit_line_huber(&positions, None, &LineFitOptions::default()).unwrap();
        LineSet {
            points,
            line: Some(line),
            valid: true,
        }
    }

    #[test]
    fn recovers_shared_point_within_noise() {
        let mut rng = StdRng::seed_from_u64(17);
        let angles = [0.3, 1.0, 1.7, 2.4];
        let sets: Vec<LineSet> = angles.iter().map(|a| noisy_set(&mut rng, *a, 0.3)).collect();
        let sol = solve_common_point(&sets, &CommonPointOptions::default()).unwrap();
        assert!((sol.point - center()).norm() < 0.5, "point {}", sol.point);
        assert!(sol.valid.iter().all(|v| *v));
        for (k, a) in angles.iter().enumerate() {
            let line = sol.lines[k].as_ref().unwrap();
            // Line directions are defined up to sign.
            assert!(line.t.dot(&Vec2::new(a.cos(), a.sin())).abs() > 0.999);
            assert!(sol.rms[k] < 0.3);
        }
    }

    #[test]
    fn invalid_sets_are_left_out_but_get_a_line() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut sets: Vec<LineSet> = [0.2, 1.2, 2.2]
            .iter()
            .map(|a| noisy_set(&mut rng, *a, 0.0))
            .collect();
        sets[1].valid = false;
        let sol = solve_common_point(&sets, &CommonPointOptions::default()).unwrap();
        assert!(!sol.valid[1]);
        assert!(sol.valid[0] && sol.valid[2]);
        assert!(sol.lines[1].is_some());
        assert_eq!(sol.rms[1], 0.0);
        assert!((sol.point - center()).norm() < 1e-3);
    }

    #[test]
    fn scattered_set_fails_rms_test() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut sets: Vec<LineSet> = [0.4, 1.4, 2.4]
            .iter()
            .map(|a| noisy_set(&mut rng, *a, 0.1))
            .collect();
        sets.push(noisy_set(&mut rng, 2.9, 4.5));
        let opts = CommonPointOptions {
            max_line_rms: 1.0,
            ..Default::default()
        };
        let sol = solve_common_point(&sets, &opts).unwrap();
        assert_eq!(sol.valid, vec![true, true, true, false]);
        assert!(sol.rms[3] > 1.0);
    }

    #[test]
    fn non_finite_weight_is_reported_with_the_partial_solution() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut sets: Vec<LineSet> = [0.3, 1.3, 2.3]
            .iter()
            .map(|a| noisy_set(&mut rng, *a, 0.0))
            .collect();
        sets[2].points[5].weight = f64::NAN;
        let opts = CommonPointOptions::default();
        assert_eq!(opts.loss, RobustLoss::None);
        let sol = solve_common_point(&sets, &opts).unwrap();
        assert_eq!(
            sol.report.check(),
            Err(CalibError::NonFiniteResidual { observation: 2 })
        );
        assert!(!sol.report.converged);
        assert_eq!(sol.lines.len(), 3);
        assert!(sol.point.x.is_finite() && sol.point.y.is_finite());
    }

    #[test]
    fn too_few_valid_sets_is_invalid_input() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut sets = vec![noisy_set(&mut rng, 0.5, 0.0), noisy_set(&mut rng, 1.5, 0.0)];
        sets[0].valid = false;
        for input in [&sets[..0], &sets[..]] {
            let err = solve_common_point(input, &CommonPointOptions::default()).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<CalibError>(),
                Some(CalibError::InvalidInput(_))
            ));
        }
    }
}

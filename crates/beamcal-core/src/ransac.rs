//! Generic, model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a model and call [`ransac`] with the data and
//! [`RansacOptions`]. Sampling uses a seeded `StdRng`, so identical inputs give
//! identical consensus sets.
//!
//! When no consensus is found the result has `success == false` and
//! `model == None`; the engine never panics on bad data.

use log::debug;
use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    pub max_iters: usize,
    /// Inlier residual threshold, in the estimator's residual units.
    pub thresh: f64,
    pub min_inliers: usize,
    /// Target probability in `[0, 1]` of drawing one all-inlier sample.
    pub confidence: f64,
    pub seed: u64,
    /// Refit on the consensus set and re-score before comparing models.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 500,
            thresh: 4.0,
            min_inliers: 4,
            confidence: 0.995,
            seed: 0x5eed_0bea,
            refit_on_inliers: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    pub inliers: Vec<usize>,
    pub inlier_rms: f64,
    /// Iteration at which the best model was found.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

/// A model that can be fitted from a minimal sample.
pub trait Estimator {
    type Datum;
    type Model;

    const MIN_SAMPLES: usize;

    /// `None` when the sample is degenerate or the fit fails.
    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual in the same units as `RansacOptions::thresh`.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(_data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }

    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

struct Consensus {
    inliers: Vec<usize>,
    rms: f64,
}

fn consensus<E: Estimator>(model: &E::Model, data: &[E::Datum], thresh: f64) -> Consensus {
    let mut inliers = Vec::with_capacity(data.len());
    let mut ss = 0.0;
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            ss += r * r;
        }
    }
    let rms = if inliers.is_empty() {
        f64::INFINITY
    } else {
        (ss / inliers.len() as f64).sqrt()
    };
    Consensus { inliers, rms }
}

/// Adaptive iteration bound `log(1 - p) / log(1 - w^m)`, clamped to
/// `[iters_so_far, max_iters]`.
fn adaptive_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n = ((1.0 - confidence).ln() / denom).ceil() as usize;
    n.clamp(iters_so_far, max_iters)
}

pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();
    if data.len() < E::MIN_SAMPLES || E::MIN_SAMPLES == 0 {
        return best;
    }

    let indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = Vec::with_capacity(E::MIN_SAMPLES);
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut budget = opts.max_iters;
    let mut iter = 0;

    while iter < budget {
        iter += 1;
        sample.clear();
        sample.extend(indices.choose_multiple(&mut rng, E::MIN_SAMPLES).copied());

        if E::is_degenerate(data, &sample) {
            continue;
        }
        let Some(mut model) = E::fit(data, &sample) else {
            continue;
        };

        let mut scored = consensus::<E>(&model, data, opts.thresh);
        if scored.inliers.len() < opts.min_inliers {
            continue;
        }
        if opts.refit_on_inliers {
            if let Some(refined) = E::refit(data, &scored.inliers) {
                let rescored = consensus::<E>(&refined, data, opts.thresh);
                if rescored.inliers.len() >= opts.min_inliers {
                    model = refined;
                    scored = rescored;
                }
            }
        }

        let better = !best.success
            || scored.inliers.len() > best.inliers.len()
            || (scored.inliers.len() == best.inliers.len() && scored.rms < best.inlier_rms);
        if better {
            budget = adaptive_iterations(
                opts.confidence,
                scored.inliers.len() as f64 / data.len() as f64,
                E::MIN_SAMPLES,
                iter,
                opts.max_iters,
            );
            best = RansacResult {
                success: true,
                model: Some(model),
                inliers: scored.inliers,
                inlier_rms: scored.rms,
                iters: iter,
            };
        }
    }

    debug!(
        "ransac: {} of {} inliers after {} iterations",
        best.inliers.len(),
        data.len(),
        iter
    );
    best
}

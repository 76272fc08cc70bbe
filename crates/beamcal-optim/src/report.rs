//! Solve outcome reporting.

use beamcal_core::CalibError;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolveStatus {
    Converged,
    /// Iteration budget exhausted or the optimizer gave up.
    NotConverged,
    /// A residual evaluated to NaN or infinity, at the initial guess or the
    /// final solution.
    NonFiniteResidual { observation: usize },
}

/// Outcome of a solve call, returned alongside the (possibly partial)
/// solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub converged: bool,
    pub final_cost: f64,
    /// Upper bound on the optimizer iterations, see
    /// [`BackendSolution::iterations`](crate::BackendSolution::iterations).
    pub iterations: usize,
    pub status: SolveStatus,
    /// RMS of each observation's residual vector at the final parameters.
    pub residuals: Vec<f64>,
}

impl SolveReport {
    /// Turn a numerical failure into an error.
    pub fn check(&self) -> Result<(), CalibError> {
        match &self.status {
            SolveStatus::Converged => Ok(()),
            SolveStatus::NotConverged => Err(CalibError::NotConverged {
                iterations: self.iterations,
                final_cost: self.final_cost,
            }),
            SolveStatus::NonFiniteResidual { observation } => Err(CalibError::NonFiniteResidual {
                observation: *observation,
            }),
        }
    }

    /// RMS over all observations.
    pub fn overall_rms(&self) -> f64 {
        beamcal_core::rms(&self.residuals)
    }

    pub fn summary(&self) -> String {
        let stats = beamcal_core::ResidualStats::from_values(&self.residuals);
        format!(
            "{:?}: cost {:.6e} after {} iterations, {} observations, residual mean {:.4} max {:.4}",
            self.status, self.final_cost, self.iterations, stats.count, stats.mean, stats.max
        )
    }
}

/// Root mean square of a residual vector, `0` when empty.
pub fn residual_rms(r: &DVector<f64>) -> f64 {
    beamcal_core::rms(r.as_slice())
}

/// Indices of observations whose residual exceeds `threshold`.
///
/// Non-finite residuals count as outliers.
pub fn prune_outliers(residuals: &[f64], threshold: f64) -> Vec<usize> {
    residuals
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_finite() || **r > threshold)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: SolveStatus) -> SolveReport {
        SolveReport {
            converged: status == SolveStatus::Converged,
            final_cost: 2.5,
            iterations: 40,
            status,
            residuals: vec![0.1, 3.0, f64::NAN, 0.2],
        }
    }

    #[test]
    fn check_maps_status_to_errors() {
        assert!(report(SolveStatus::Converged).check().is_ok());
        assert_eq!(
            report(SolveStatus::NotConverged).check(),
            Err(CalibError::NotConverged {
                iterations: 40,
                final_cost: 2.5
            })
        );
        assert_eq!(
            report(SolveStatus::NonFiniteResidual { observation: 2 }).check(),
            Err(CalibError::NonFiniteResidual { observation: 2 })
        );
    }

    #[test]
    fn pruning_flags_large_and_non_finite() {
        let r = report(SolveStatus::Converged);
        assert_eq!(prune_outliers(&r.residuals, 1.0), vec![1, 2]);
        assert_eq!(residual_rms(&DVector::from_row_slice(&[3.0, 4.0])), (12.5f64).sqrt());
    }
}

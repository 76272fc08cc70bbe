//! Solve an IR and report on it.
//!
//! Wraps the backend with the checks every problem needs: finite residuals at
//! the initial guess and at the solution, per-observation RMS, and the
//! optional log summary.

use crate::backend::{solve_with_backend, SolverConfig};
use crate::ir::ProblemIR;
use crate::report::{residual_rms, SolveReport, SolveStatus};
use anyhow::Result;
use log::{info, warn};
use nalgebra::DVector;
use std::collections::HashMap;

/// Parameter values and report of one solve.
#[derive(Debug, Clone)]
pub struct IrSolution {
    pub params: HashMap<String, DVector<f64>>,
    pub report: SolveReport,
}

/// Observation (or block index for untagged blocks) of the first residual
/// block that does not evaluate to finite values.
fn first_non_finite(ir: &ProblemIR, values: &HashMap<String, DVector<f64>>) -> Result<Option<usize>> {
    for (idx, block) in ir.residuals.iter().enumerate() {
        let r = ir.evaluate_block(block, values)?;
        if r.iter().any(|v| !v.is_finite()) {
            return Ok(Some(block.observation.unwrap_or(idx)));
        }
    }
    Ok(None)
}

/// RMS of each observation's stacked residual blocks. Observations without
/// blocks get `0`.
pub fn observation_residuals(
    ir: &ProblemIR,
    values: &HashMap<String, DVector<f64>>,
    num_observations: usize,
) -> Result<Vec<f64>> {
    let mut stacked: Vec<Vec<f64>> = vec![Vec::new(); num_observations];
    for block in &ir.residuals {
        let Some(obs) = block.observation else {
            continue;
        };
        anyhow::ensure!(
            obs < num_observations,
            "residual block tagged with observation {} of {}",
            obs,
            num_observations
        );
        let r = ir.evaluate_block(block, values)?;
        stacked[obs].extend(r.iter());
    }
    Ok(stacked
        .into_iter()
        .map(|v| residual_rms(&DVector::from_vec(v)))
        .collect())
}

/// Solve `ir` from `initial`. Numerical failures are reported through
/// [`SolveReport::status`] together with the last parameter values; only
/// malformed problems return an error.
pub fn solve_ir(
    ir: &ProblemIR,
    initial: &HashMap<String, DVector<f64>>,
    config: &SolverConfig,
    num_observations: usize,
) -> Result<IrSolution> {
    ir.validate()?;

    if let Some(observation) = first_non_finite(ir, initial)? {
        warn!("non-finite residual at the initial guess (observation {observation})");
        return Ok(IrSolution {
            params: initial.clone(),
            report: SolveReport {
                converged: false,
                final_cost: f64::INFINITY,
                iterations: 0,
                status: SolveStatus::NonFiniteResidual { observation },
                residuals: observation_residuals(ir, initial, num_observations)?,
            },
        });
    }

    let solution = solve_with_backend(ir, initial, config)?;
    let status = match first_non_finite(ir, &solution.params)? {
        Some(observation) => SolveStatus::NonFiniteResidual { observation },
        None if solution.converged => SolveStatus::Converged,
        None => SolveStatus::NotConverged,
    };
    let report = SolveReport {
        converged: status == SolveStatus::Converged,
        final_cost: solution.final_cost,
        iterations: solution.iterations,
        status,
        residuals: observation_residuals(ir, &solution.params, num_observations)?,
    };
    if config.print_report {
        info!(
            "solve: {} params, {} residual blocks; {}",
            ir.params.len(),
            ir.residuals.len(),
            report.summary()
        );
    }
    Ok(IrSolution {
        params: solution.params,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FactorKind, FixedMask, ResidualBlock, RobustLoss};

    #[test]
    fn non_finite_initial_guess_is_reported_not_solved() {
        let mut ir = ProblemIR::new();
        let a = ir.add_param_block("a", 3, FixedMask::all_free(), None);
        ir.add_residual_block(
            ResidualBlock::new(
                vec![a],
                FactorKind::SceneScale { radius: 1.0, w: 1.0 },
                RobustLoss::None,
            )
            .for_observation(0),
        );
        let mut init = HashMap::new();
        init.insert("a".to_string(), DVector::zeros(3));
        let sol = solve_ir(&ir, &init, &SolverConfig::default(), 1).unwrap();
        assert_eq!(
            sol.report.status,
            SolveStatus::NonFiniteResidual { observation: 0 }
        );
        assert!(sol.report.check().is_err());
        assert_eq!(sol.params["a"], DVector::zeros(3));
    }
}

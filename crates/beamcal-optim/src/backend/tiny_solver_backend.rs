use crate::backend::{BackendSolution, OptimBackend, SolverConfig};
use crate::ir::{FactorKind, ProblemIR, ResidualBlock, RobustLoss};
use anyhow::{anyhow, ensure, Result};
use log::debug;
use nalgebra::{DVector, DVectorView};
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{ArctanLoss, CauchyLoss, HuberLoss, Loss};
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::LevenbergMarquardtOptimizer;

/// Iterations handed to the optimizer per outer round. Convergence is judged
/// between rounds against [`SolverConfig`] tolerances.
const ITERATION_CHUNK: usize = 25;

/// Cost below which a problem counts as solved exactly.
const MIN_COST: f64 = 1e-20;

/// tiny-solver backend adapter.
#[derive(Debug, Clone, Copy)]
pub struct TinySolverBackend;

impl TinySolverBackend {
    fn compile(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
    ) -> Result<(Problem, HashMap<String, DVector<f64>>)> {
        ir.validate()?;

        let mut problem = Problem::new();
        let mut initial_map = HashMap::with_capacity(ir.params.len());

        for param in &ir.params {
            let init = initial.get(&param.name).ok_or_else(|| {
                anyhow!(
                    "initial values missing parameter {} (id {:?})",
                    param.name,
                    param.id
                )
            })?;
            ensure!(
                init.len() == param.dim,
                "initial dimension mismatch for {}: expected {}, got {}",
                param.name,
                param.dim,
                init.len()
            );
            ensure!(
                init.iter().all(|v| v.is_finite()),
                "initial value of {} is not finite",
                param.name
            );

            for idx in param.fixed.iter() {
                problem.fix_variable(&param.name, idx);
            }

            if let Some(bounds) = &param.bounds {
                for bound in bounds {
                    problem.set_variable_bounds(&param.name, bound.idx, bound.lower, bound.upper);
                }
            }
            initial_map.insert(param.name.clone(), init.clone());
        }

        for residual in &ir.residuals {
            let (factor, loss) = compile_factor(residual)?;
            let param_names: Vec<String> = residual
                .params
                .iter()
                .map(|id| ir.params[id.0].name.clone())
                .collect();
            let param_refs: Vec<&str> = param_names.iter().map(|s| s.as_str()).collect();
            problem.add_residual_block(residual.residual_dim, &param_refs, factor, loss);
        }

        Ok((problem, initial_map))
    }
}

fn cost(problem: &Problem, params: &HashMap<String, DVector<f64>>) -> f64 {
    let blocks = problem.initialize_parameter_blocks(params);
    let residuals = problem.compute_residuals(&blocks, true);
    0.5 * residuals.as_ref().squared_norm_l2()
}

fn relative_step(
    before: &HashMap<String, DVector<f64>>,
    after: &HashMap<String, DVector<f64>>,
) -> f64 {
    let mut delta = 0.0;
    let mut norm = 0.0;
    for (name, x) in before {
        if let Some(y) = after.get(name) {
            delta += (y - x).norm_squared();
            norm += x.norm_squared();
        }
    }
    delta.sqrt() / (norm.sqrt() + f64::EPSILON)
}

impl OptimBackend for TinySolverBackend {
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        config: &SolverConfig,
    ) -> Result<BackendSolution> {
        config.validate()?;
        let (problem, mut current) = self.compile(ir, initial)?;
        let optimizer = LevenbergMarquardtOptimizer::default();

        let mut current_cost = cost(&problem, &current);
        let mut iterations = 0;
        let mut converged = current_cost <= MIN_COST;
        while !converged && iterations < config.max_iterations {
            let budget = ITERATION_CHUNK.min(config.max_iterations - iterations);
            let options = to_optimizer_options(config, budget);
            let Some(next) = optimizer.optimize(&problem, &current, Some(options)) else {
                debug!("optimizer gave up after {} iterations", iterations);
                break;
            };
            // tiny-solver does not say how many of them it used.
            iterations += budget;

            let next_cost = cost(&problem, &next);
            let cost_change = (current_cost - next_cost).abs() / current_cost.max(f64::MIN_POSITIVE);
            let step = relative_step(&current, &next);
            debug!(
                "round {}: cost {:.6e} -> {:.6e}, step {:.3e}",
                iterations / ITERATION_CHUNK,
                current_cost,
                next_cost,
                step
            );
            current = next;
            current_cost = next_cost;
            converged = next_cost <= MIN_COST
                || cost_change <= config.function_tolerance
                || step <= config.parameter_tolerance;
        }

        Ok(BackendSolution {
            params: current,
            final_cost: current_cost,
            iterations,
            converged,
        })
    }
}

fn to_optimizer_options(config: &SolverConfig, budget: usize) -> OptimizerOptions {
    OptimizerOptions {
        max_iteration: budget,
        verbosity_level: 0,
        min_rel_error_decrease_threshold: config.function_tolerance,
        min_abs_error_decrease_threshold: MIN_COST,
        min_error_threshold: MIN_COST,
        ..OptimizerOptions::default()
    }
}

fn compile_loss(loss: RobustLoss) -> Result<Option<Box<dyn Loss + Send>>> {
    match loss {
        RobustLoss::None => Ok(None),
        RobustLoss::Huber { scale } => {
            ensure!(scale > 0.0, "Huber scale must be positive");
            Ok(Some(Box::new(HuberLoss::new(scale))))
        }
        RobustLoss::Cauchy { scale } => {
            ensure!(scale > 0.0, "Cauchy scale must be positive");
            Ok(Some(Box::new(CauchyLoss::new(scale))))
        }
        RobustLoss::Arctan { scale } => {
            ensure!(scale > 0.0, "Arctan scale must be positive");
            Ok(Some(Box::new(ArctanLoss::new(scale))))
        }
    }
}

type CompiledFactor = (
    Box<dyn tiny_solver::factors::FactorImpl + Send>,
    Option<Box<dyn Loss + Send>>,
);

fn compile_factor(residual: &ResidualBlock) -> Result<CompiledFactor> {
    let loss = compile_loss(residual.loss)?;
    let factor = TinyFactor {
        kind: residual.factor.clone(),
        num_params: residual.params.len(),
    };
    Ok((Box::new(factor), loss))
}

/// Adapter from an IR factor to tiny-solver's autodiff factor trait.
#[derive(Debug, Clone)]
struct TinyFactor {
    kind: FactorKind,
    num_params: usize,
}

impl<T: nalgebra::RealField> Factor<T> for TinyFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), self.num_params, "parameter block count");
        let views: Vec<DVectorView<'_, T>> = params.iter().map(|p| p.as_view()).collect();
        self.kind.residual(&views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FixedMask, ResidualBlock};

    /// Three points pulled to a common plane y = mean, with one pinned.
    fn coplanar_ir() -> (ProblemIR, HashMap<String, DVector<f64>>) {
        let mut ir = ProblemIR::new();
        let mut init = HashMap::new();
        let mut ids = Vec::new();
        for (i, y) in [0.0, 1.0, -2.0].into_iter().enumerate() {
            let name = format!("point_{i}");
            let fixed = if i == 0 {
                FixedMask::all_fixed(3)
            } else {
                FixedMask::fix_indices(&[0, 2])
            };
            ids.push(ir.add_param_block(&name, 3, fixed, None));
            init.insert(name, DVector::from_row_slice(&[i as f64, y, 1.0]));
        }
        ir.add_residual_block(ResidualBlock::new(
            ids,
            FactorKind::Coplanar { axis: 1, w: 1.0 },
            RobustLoss::None,
        ));
        (ir, init)
    }

    #[test]
    fn solves_and_respects_fixed_indices() {
        let (ir, init) = coplanar_ir();
        let sol = TinySolverBackend
            .solve(&ir, &init, &SolverConfig::default())
            .unwrap();
        assert!(sol.converged);
        assert!(sol.final_cost < 1e-12);
        for i in 0..3 {
            let p = &sol.params[&format!("point_{i}")];
            assert!(p[1].abs() < 1e-6, "point {i}: {p}");
            assert_eq!(p[0], i as f64);
            assert_eq!(p[2], 1.0);
        }
    }

    #[test]
    fn iterations_never_exceed_the_budget() {
        let (ir, init) = coplanar_ir();
        for max_iterations in [1, 3, 40] {
            let cfg = SolverConfig {
                max_iterations,
                function_tolerance: 0.0,
                parameter_tolerance: 0.0,
                ..Default::default()
            };
            let sol = TinySolverBackend.solve(&ir, &init, &cfg).unwrap();
            assert!(sol.iterations <= max_iterations);
        }
    }

    #[test]
    fn missing_initial_value_is_an_error() {
        let (ir, mut init) = coplanar_ir();
        init.remove("point_2");
        assert!(TinySolverBackend
            .solve(&ir, &init, &SolverConfig::default())
            .is_err());
    }

    #[test]
    fn dedicated_pool_gives_the_same_answer() {
        let (ir, init) = coplanar_ir();
        let a = crate::backend::solve_with_backend(&ir, &init, &SolverConfig::default()).unwrap();
        let cfg = SolverConfig {
            thread_count: 2,
            ..Default::default()
        };
        let b = crate::backend::solve_with_backend(&ir, &init, &cfg).unwrap();
        for (name, v) in &a.params {
            assert!((v - &b.params[name]).norm() < 1e-12);
        }
    }
}

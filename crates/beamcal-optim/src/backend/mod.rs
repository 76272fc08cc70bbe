//! Backend adapters that compile the IR into solver-specific problems.
//!
//! Backends translate the IR into a solver-native problem, apply fixing and
//! bounds, and return a solved parameter map.

mod tiny_solver_backend;

use anyhow::{Context, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ir::ProblemIR;

pub use tiny_solver_backend::TinySolverBackend;

/// Solver configuration shared by every problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Iteration budget across the whole solve.
    pub max_iterations: usize,
    /// Relative cost change below which the solve counts as converged.
    pub function_tolerance: f64,
    /// Relative parameter change below which the solve counts as converged.
    pub parameter_tolerance: f64,
    /// Size of a dedicated thread pool; `0` uses the global rayon pool.
    pub thread_count: usize,
    /// Log a solve summary at info level.
    pub print_report: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            function_tolerance: 1e-8,
            parameter_tolerance: 1e-10,
            thread_count: 0,
            print_report: false,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_iterations > 0, "max_iterations must be positive");
        anyhow::ensure!(
            self.function_tolerance >= 0.0 && self.parameter_tolerance >= 0.0,
            "solver tolerances must be non-negative"
        );
        Ok(())
    }
}

/// Solver output from a backend.
///
/// The `params` map uses the IR parameter block names.
#[derive(Debug, Clone)]
pub struct BackendSolution {
    pub params: HashMap<String, DVector<f64>>,
    /// Final robustified cost `0.5 · Σ ρ(‖r‖²)`.
    pub final_cost: f64,
    /// Iteration budget consumed. Every round counts its full budget, so
    /// this is an upper bound when the optimizer stops early inside a round.
    pub iterations: usize,
    /// Whether a tolerance was met before the budget ran out or the
    /// optimizer gave up.
    pub converged: bool,
}

/// Backend interface implemented by solver adapters.
pub trait OptimBackend {
    /// Solve a compiled IR with the provided initial parameters.
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        config: &SolverConfig,
    ) -> Result<BackendSolution>;
}

/// Solve with the tiny-solver backend, inside a dedicated pool when
/// `config.thread_count > 0`.
pub fn solve_with_backend(
    ir: &ProblemIR,
    initial: &HashMap<String, DVector<f64>>,
    config: &SolverConfig,
) -> Result<BackendSolution> {
    if config.thread_count == 0 {
        return TinySolverBackend.solve(ir, initial, config);
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.thread_count)
        .build()
        .context("failed to build solver thread pool")?;
    pool.install(|| TinySolverBackend.solve(ir, initial, config))
}

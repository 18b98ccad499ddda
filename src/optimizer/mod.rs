//! Optimization solvers for the calibration hypergraph.
//!
//! This module provides the iterative algorithms the graph engine runs inside each
//! scheduler phase:
//! - Levenberg-Marquardt algorithm (default)
//! - Gauss-Newton algorithm
//!
//! Both operate on any [`Optimizable`] problem, which exposes its normal equations
//! through a [`LinearSystem`] and accepts tangent-space steps.

use crate::error::SclamResult;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::LevenbergMarquardt;

/// Type of optimization solver algorithm to use
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerType {
    /// Levenberg-Marquardt algorithm (robust, adaptive damping)
    #[default]
    LevenbergMarquardt,
    /// Gauss-Newton algorithm (fast convergence, needs a well-constrained system)
    GaussNewton,
}

impl fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerType::LevenbergMarquardt => write!(f, "Levenberg-Marquardt"),
            OptimizerType::GaussNewton => write!(f, "Gauss-Newton"),
        }
    }
}

/// Errors raised by the optimizers.
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    #[error("Cost is not finite: {0}")]
    NonFiniteCost(f64),

    #[error("Step dimension {actual} does not match problem dimension {expected}")]
    StepDimension { expected: usize, actual: usize },
}

/// Solver configuration shared by both algorithms.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Type of optimizer algorithm to use
    pub optimizer_type: OptimizerType,
    /// Relative cost change below which an accepted step counts as converged
    pub cost_tolerance: f64,
    /// Step norm below which the parameters count as converged
    pub parameter_tolerance: f64,
    /// Gradient norm below which the problem counts as converged
    pub gradient_tolerance: f64,
    /// Initial damping parameter for Levenberg-Marquardt
    pub initial_damping: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer_type: OptimizerType::default(),
            cost_tolerance: 1e-12,
            parameter_tolerance: 1e-12,
            gradient_tolerance: 1e-12,
            initial_damping: 1e-3,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the optimizer algorithm type
    pub fn with_optimizer_type(mut self, optimizer_type: OptimizerType) -> Self {
        self.optimizer_type = optimizer_type;
        self
    }

    /// Set the cost tolerance
    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    /// Set the parameter tolerance
    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    /// Set the gradient tolerance
    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    /// Set the initial Levenberg-Marquardt damping
    pub fn with_initial_damping(mut self, damping: f64) -> Self {
        self.initial_damping = damping;
        self
    }
}

/// Normal equations of a problem linearized at its current estimate.
///
/// `cost` is the (robustified) chi-square `Σ ρ(rᵀΩr)`, the quadratic model is
/// `cost(dx) ≈ cost + 2gᵀdx + dxᵀHdx`.
#[derive(Debug, Clone, Default)]
pub struct LinearSystem {
    /// Non-zero entries of H, both triangles
    pub hessian: BTreeMap<(usize, usize), f64>,
    /// Gradient g
    pub gradient: Vec<f64>,
    /// Cost at the linearization point
    pub cost: f64,
}

impl LinearSystem {
    pub fn new(dimension: usize) -> Self {
        Self {
            hessian: BTreeMap::new(),
            gradient: vec![0.0; dimension],
            cost: 0.0,
        }
    }

    /// `dxᵀ H dx`
    pub fn quadratic_form(&self, dx: &[f64]) -> f64 {
        self.hessian
            .iter()
            .map(|(&(row, col), value)| dx[row] * value * dx[col])
            .sum()
    }

    pub fn gradient_norm(&self) -> f64 {
        self.gradient.iter().map(|g| g * g).sum::<f64>().sqrt()
    }
}

/// A problem the optimizers can drive.
pub trait Optimizable {
    /// Number of free tangent-space parameters
    fn dimension(&self) -> usize;

    /// Build the normal equations at the current estimate
    fn linearize(&self) -> SclamResult<LinearSystem>;

    /// Evaluate the cost at the current estimate
    fn cost(&self) -> SclamResult<f64>;

    /// Apply a tangent-space step to the free parameters
    fn apply_step(&mut self, step: &[f64]) -> SclamResult<()>;

    /// Remember the current estimate
    fn save_state(&mut self);

    /// Return to the last saved estimate
    fn restore_state(&mut self);
}

/// Status of an optimization process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Nothing to optimize (no free parameters)
    NothingToOptimize,
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// Cost function tolerance reached
    CostToleranceReached,
    /// Parameter tolerance reached
    ParameterToleranceReached,
    /// Gradient tolerance reached
    GradientToleranceReached,
    /// Optimization stopped due to numerical issues
    NumericalFailure,
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::NothingToOptimize => write!(f, "Nothing to optimize"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::CostToleranceReached => write!(f, "Cost tolerance reached"),
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "Parameter tolerance reached")
            }
            OptimizationStatus::GradientToleranceReached => write!(f, "Gradient tolerance reached"),
            OptimizationStatus::NumericalFailure => write!(f, "Numerical failure"),
        }
    }
}

/// Summary statistics of one optimization call.
#[derive(Debug, Clone)]
pub struct OptimizationSummary {
    /// Algorithm that produced the summary
    pub algorithm: OptimizerType,
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Initial cost value
    pub initial_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Total number of iterations performed
    pub iterations: usize,
    /// Number of accepted steps
    pub successful_steps: usize,
    /// Number of rejected steps
    pub unsuccessful_steps: usize,
    /// Final damping parameter value (zero for Gauss-Newton)
    pub final_damping: f64,
    /// Final gradient norm
    pub final_gradient_norm: f64,
    /// Final parameter update norm
    pub final_parameter_update_norm: f64,
    /// Total time elapsed
    pub total_time: Duration,
}

impl fmt::Display for OptimizationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} Optimization Summary ===", self.algorithm)?;
        writeln!(f, "Status:                    {}", self.status)?;
        writeln!(f, "Initial cost:              {:.6e}", self.initial_cost)?;
        writeln!(f, "Final cost:                {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "Cost reduction:            {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f, "Total iterations:          {}", self.iterations)?;
        writeln!(f, "Successful steps:          {}", self.successful_steps)?;
        writeln!(f, "Unsuccessful steps:        {}", self.unsuccessful_steps)?;
        writeln!(f, "Final damping parameter:   {:.6e}", self.final_damping)?;
        writeln!(f, "Final gradient norm:       {:.6e}", self.final_gradient_norm)?;
        writeln!(
            f,
            "Final param update norm:   {:.6e}",
            self.final_parameter_update_norm
        )?;
        writeln!(f, "Total time:                {:?}", self.total_time)?;
        Ok(())
    }
}

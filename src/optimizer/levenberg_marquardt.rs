//! Levenberg-Marquardt algorithm implementation.
//!
//! The Levenberg-Marquardt algorithm interpolates between Gauss-Newton and gradient
//! descent by adding a damping parameter to the normal equations. It is the default
//! engine behind every scheduler phase because the trajectory phase is only defined up
//! to a global rigid motion when no absolute fixes are present, and the damping keeps
//! that gauge freedom from turning into a singular system.
//!
//! This implementation includes:
//! - Adaptive damping parameter adjustment driven by the step quality ratio
//! - Sparse Cholesky factorization of the damped normal equations
//! - A pure Gauss-Newton mode (zero damping, every step applied)

use crate::error::SclamResult;
use crate::linalg::{SparseCholeskySolver, SparseLinearSolver};
use crate::optimizer::{
    LinearSystem, Optimizable, OptimizationStatus, OptimizationSummary, OptimizerConfig,
    OptimizerError, OptimizerType,
};
use std::time::Instant;
use tracing::{debug, trace};

/// Levenberg-Marquardt solver for the calibration graph.
pub struct LevenbergMarquardt {
    config: OptimizerConfig,
    damping: f64,
    damping_min: f64,
    damping_max: f64,
    damping_increase_factor: f64,
    damping_decrease_factor: f64,
    min_step_quality: f64,
    good_step_quality: f64,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt solver with default configuration.
    pub fn new() -> Self {
        Self::with_config(OptimizerConfig::default())
    }

    /// Create a new solver with the given configuration.
    pub fn with_config(config: OptimizerConfig) -> Self {
        let damping = match config.optimizer_type {
            OptimizerType::LevenbergMarquardt => config.initial_damping,
            OptimizerType::GaussNewton => 0.0,
        };
        Self {
            config,
            damping,
            damping_min: 1e-12,
            damping_max: 1e12,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 0.3,
            min_step_quality: 0.0,
            good_step_quality: 0.75,
        }
    }

    /// Set the initial damping parameter.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Set the damping parameter bounds.
    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    fn is_gauss_newton(&self) -> bool {
        self.config.optimizer_type == OptimizerType::GaussNewton
    }

    /// Update damping parameter based on step quality
    fn update_damping(&mut self, rho: f64) -> bool {
        if rho > self.good_step_quality {
            // Good step, decrease damping
            self.damping = (self.damping * self.damping_decrease_factor).max(self.damping_min);
            true
        } else if rho < self.min_step_quality {
            // Poor step, increase damping
            self.damping = (self.damping * self.damping_increase_factor).min(self.damping_max);
            false
        } else {
            true
        }
    }

    /// Compute step quality ratio (actual vs predicted reduction)
    fn compute_step_quality(&self, current_cost: f64, new_cost: f64, predicted: f64) -> f64 {
        let actual_reduction = current_cost - new_cost;
        if predicted.abs() < 1e-15 {
            if actual_reduction > 0.0 { 1.0 } else { 0.0 }
        } else {
            actual_reduction / predicted
        }
    }

    /// Predicted cost reduction of the quadratic model: `-(2gᵀdx + dxᵀHdx)`
    fn compute_predicted_reduction(&self, step: &[f64], system: &LinearSystem) -> f64 {
        let linear_term: f64 = step
            .iter()
            .zip(&system.gradient)
            .map(|(dx, g)| dx * g)
            .sum();
        -(2.0 * linear_term + system.quadratic_form(step))
    }

    /// Check convergence criteria after an accepted step
    fn check_convergence(
        &self,
        previous_cost: f64,
        current_cost: f64,
        parameter_update_norm: f64,
    ) -> Option<OptimizationStatus> {
        let relative_change = (previous_cost - current_cost).abs() / previous_cost.max(1e-300);
        if relative_change < self.config.cost_tolerance {
            return Some(OptimizationStatus::CostToleranceReached);
        }

        if parameter_update_norm < self.config.parameter_tolerance {
            return Some(OptimizationStatus::ParameterToleranceReached);
        }

        None
    }

    /// Run at most `max_iterations` iterations on `problem`.
    pub fn minimize<P: Optimizable>(
        &mut self,
        problem: &mut P,
        max_iterations: usize,
    ) -> SclamResult<OptimizationSummary> {
        let start_time = Instant::now();
        let mut linear_solver = SparseCholeskySolver::new();

        let initial_cost = problem.cost()?;
        if !initial_cost.is_finite() {
            return Err(OptimizerError::NonFiniteCost(initial_cost).into());
        }

        let mut summary = OptimizationSummary {
            algorithm: self.config.optimizer_type,
            status: OptimizationStatus::MaxIterationsReached,
            initial_cost,
            final_cost: initial_cost,
            iterations: 0,
            successful_steps: 0,
            unsuccessful_steps: 0,
            final_damping: self.damping,
            final_gradient_norm: 0.0,
            final_parameter_update_norm: 0.0,
            total_time: start_time.elapsed(),
        };

        if problem.dimension() == 0 {
            summary.status = OptimizationStatus::NothingToOptimize;
            return Ok(summary);
        }

        let mut current_cost = initial_cost;

        while summary.iterations < max_iterations {
            summary.iterations += 1;

            let system = problem.linearize()?;
            let gradient_norm = system.gradient_norm();
            summary.final_gradient_norm = gradient_norm;

            if gradient_norm < self.config.gradient_tolerance {
                summary.status = OptimizationStatus::GradientToleranceReached;
                break;
            }

            let step = match linear_solver.solve_augmented_equation(
                &system.hessian,
                &system.gradient,
                self.damping,
            ) {
                Ok(step) => step,
                Err(err) => {
                    summary.unsuccessful_steps += 1;
                    if self.is_gauss_newton() || self.damping >= self.damping_max {
                        debug!("Linear solve failed, stopping: {err}");
                        summary.status = OptimizationStatus::NumericalFailure;
                        break;
                    }
                    self.damping = (self.damping.max(self.damping_min)
                        * self.damping_increase_factor)
                        .min(self.damping_max);
                    debug!(
                        "Iteration {}: linear solve failed ({err}), damping raised to {:.3e}",
                        summary.iterations, self.damping
                    );
                    continue;
                }
            };

            let step_norm = step.iter().map(|v| v * v).sum::<f64>().sqrt();
            summary.final_parameter_update_norm = step_norm;
            let predicted_reduction = self.compute_predicted_reduction(&step, &system);

            problem.save_state();
            problem.apply_step(&step)?;
            let new_cost = problem.cost()?;

            let accept_step = if self.is_gauss_newton() {
                new_cost.is_finite()
            } else {
                let rho = self.compute_step_quality(current_cost, new_cost, predicted_reduction);
                trace!("rho = {rho:.4}, predicted = {predicted_reduction:.4e}");
                new_cost.is_finite() && self.update_damping(rho)
            };

            if accept_step {
                let previous_cost = current_cost;
                current_cost = new_cost;
                summary.successful_steps += 1;
                debug!(
                    "Iteration {}: cost = {:.6e}, damping = {:.3e}, step_norm = {:.3e} [ACCEPTED]",
                    summary.iterations, current_cost, self.damping, step_norm
                );

                if let Some(status) =
                    self.check_convergence(previous_cost, current_cost, step_norm)
                {
                    summary.status = status;
                    break;
                }
            } else {
                problem.restore_state();
                summary.unsuccessful_steps += 1;
                debug!(
                    "Iteration {}: cost = {:.6e}, damping = {:.3e}, step_norm = {:.3e} [REJECTED]",
                    summary.iterations, current_cost, self.damping, step_norm
                );
            }
        }

        summary.final_cost = current_cost;
        summary.final_damping = self.damping;
        summary.total_time = start_time.elapsed();
        Ok(summary)
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenberg_marquardt_creation() {
        let solver = LevenbergMarquardt::new();
        assert_eq!(solver.damping, 1e-3);
    }

    #[test]
    fn test_damping_configuration() {
        let solver = LevenbergMarquardt::new()
            .with_damping(1e-6)
            .with_damping_bounds(1e-15, 1e15);

        assert_eq!(solver.damping, 1e-6);
        assert_eq!(solver.damping_min, 1e-15);
        assert_eq!(solver.damping_max, 1e15);
    }

    #[test]
    fn test_update_damping() {
        let mut solver = LevenbergMarquardt::new();
        assert!(solver.update_damping(0.9));
        assert!((solver.damping - 3e-4).abs() < 1e-15);
        assert!(!solver.update_damping(-1.0));
        assert!((solver.damping - 3e-3).abs() < 1e-15);
        assert!(solver.update_damping(0.5));
    }

    // Rosenbrock residuals r1 = a - x, r2 = √b (y - x²)
    struct RosenbrockProblem {
        a: f64,
        b: f64,
        params: [f64; 2],
        saved: [f64; 2],
    }

    impl RosenbrockProblem {
        fn residuals(&self) -> [f64; 2] {
            let [x, y] = self.params;
            [self.a - x, self.b.sqrt() * (y - x * x)]
        }
    }

    impl Optimizable for RosenbrockProblem {
        fn dimension(&self) -> usize {
            2
        }

        fn linearize(&self) -> SclamResult<LinearSystem> {
            let x = self.params[0];
            let r = self.residuals();
            let sb = self.b.sqrt();
            // J = [-1 0; -2√b x  √b]
            let j = [[-1.0, 0.0], [-2.0 * sb * x, sb]];

            let mut system = LinearSystem::new(2);
            for row in 0..2 {
                for col in 0..2 {
                    let h = j[0][row] * j[0][col] + j[1][row] * j[1][col];
                    system.hessian.insert((row, col), h);
                }
                system.gradient[row] = j[0][row] * r[0] + j[1][row] * r[1];
            }
            system.cost = r[0] * r[0] + r[1] * r[1];
            Ok(system)
        }

        fn cost(&self) -> SclamResult<f64> {
            let r = self.residuals();
            Ok(r[0] * r[0] + r[1] * r[1])
        }

        fn apply_step(&mut self, step: &[f64]) -> SclamResult<()> {
            self.params[0] += step[0];
            self.params[1] += step[1];
            Ok(())
        }

        fn save_state(&mut self) {
            self.saved = self.params;
        }

        fn restore_state(&mut self) {
            self.params = self.saved;
        }
    }

    #[test]
    fn test_rosenbrock_optimization() -> SclamResult<()> {
        let mut problem = RosenbrockProblem {
            a: 1.0,
            b: 1.0,
            params: [0.0, 0.0],
            saved: [0.0, 0.0],
        };
        let mut solver = LevenbergMarquardt::new().with_damping(1e-1);

        let summary = solver.minimize(&mut problem, 100)?;
        assert!(summary.final_cost < 1e-10, "{summary}");
        assert!((problem.params[0] - 1.0).abs() < 1e-4);
        assert!((problem.params[1] - 1.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_config_tolerances_and_damping_are_honored() -> SclamResult<()> {
        let mut problem = RosenbrockProblem {
            a: 1.0,
            b: 1.0,
            params: [0.5, 0.5],
            saved: [0.5, 0.5],
        };
        let config = OptimizerConfig::new()
            .with_initial_damping(0.5)
            .with_cost_tolerance(1e-3)
            .with_parameter_tolerance(1e-3)
            .with_gradient_tolerance(1e6);
        assert_eq!(config.cost_tolerance, 1e-3);
        assert_eq!(config.parameter_tolerance, 1e-3);
        let mut solver = LevenbergMarquardt::with_config(config);

        let summary = solver.minimize(&mut problem, 50)?;
        assert_eq!(summary.status, OptimizationStatus::GradientToleranceReached);
        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.final_damping, 0.5);
        assert_eq!(summary.final_cost, summary.initial_cost);
        Ok(())
    }

    #[test]
    fn test_gauss_newton_mode() -> SclamResult<()> {
        let mut problem = RosenbrockProblem {
            a: 1.0,
            b: 1.0,
            params: [0.5, 0.5],
            saved: [0.5, 0.5],
        };
        let config = OptimizerConfig::new().with_optimizer_type(OptimizerType::GaussNewton);
        let mut solver = LevenbergMarquardt::with_config(config);

        let summary = solver.minimize(&mut problem, 50)?;
        assert_eq!(summary.algorithm, OptimizerType::GaussNewton);
        assert_eq!(summary.final_damping, 0.0);
        assert!(summary.final_cost < 1e-10, "{summary}");
        Ok(())
    }
}

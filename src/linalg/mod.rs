//! Linear algebra for the normal equations of the calibration graph.
//!
//! The graph engine accumulates the Gauss-Newton Hessian `H = Σ JᵀΩJ` as a map of
//! non-zero coordinates and the gradient `g = Σ JᵀΩr` as a dense vector. Solvers in
//! this module turn that into a faer sparse matrix and compute the damped step
//! `(H + λI) dx = -g`.

use std::collections::BTreeMap;
use thiserror::Error;

pub mod cholesky;

pub use cholesky::SparseCholeskySolver;

/// Errors raised by the linear solvers.
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Matrix conversion failed: {0}")]
    MatrixConversion(String),

    #[error("Factorization failed: {0}")]
    FactorizationFailed(String),
}

pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Common interface for sparse solvers of the damped normal equations.
pub trait SparseLinearSolver {
    /// Solve `(H + λI) dx = -g`.
    ///
    /// `hessian` holds both triangles of the symmetric matrix keyed by `(row, col)`;
    /// its dimension is `gradient.len()`.
    fn solve_augmented_equation(
        &mut self,
        hessian: &BTreeMap<(usize, usize), f64>,
        gradient: &[f64],
        lambda: f64,
    ) -> LinAlgResult<Vec<f64>>;
}

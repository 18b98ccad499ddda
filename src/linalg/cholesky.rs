use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers;
use faer::sparse::{SparseColMat, Triplet};
use faer::{Mat, Side};
use std::collections::BTreeMap;

use super::{LinAlgError, LinAlgResult, SparseLinearSolver};

/// Dimension plus the sorted non-zero coordinates of the undamped Hessian.
type SparsityKey = (usize, Vec<(usize, usize)>);

/// Sparse LLᵀ solver for the damped normal equations of the calibration graph.
///
/// The symbolic factorization is cached and reused while the sparsity pattern stays the
/// same, which holds for every iteration of one optimization call.
#[derive(Debug, Clone)]
pub struct SparseCholeskySolver {
    symbolic_pattern: Option<(SparsityKey, solvers::SymbolicLlt<usize>)>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        SparseCholeskySolver {
            symbolic_pattern: None,
        }
    }

    /// Assemble `H + λI` from the block entries of the upper/lower triangle map.
    fn assemble(
        dimension: usize,
        hessian: &BTreeMap<(usize, usize), f64>,
        lambda: f64,
    ) -> LinAlgResult<SparseColMat<usize, f64>> {
        let mut triplets = Vec::with_capacity(hessian.len() + dimension);
        for (&(row, col), &value) in hessian {
            if row >= dimension || col >= dimension {
                return Err(LinAlgError::InvalidInput(format!(
                    "entry ({row}, {col}) outside a {dimension}x{dimension} system"
                )));
            }
            triplets.push(Triplet::new(row, col, value));
        }
        for i in 0..dimension {
            triplets.push(Triplet::new(i, i, lambda));
        }

        SparseColMat::try_new_from_triplets(dimension, dimension, &triplets).map_err(|e| {
            LinAlgError::MatrixConversion(format!("Failed to build damped Hessian: {e:?}"))
        })
    }
}

impl Default for SparseCholeskySolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseLinearSolver for SparseCholeskySolver {
    fn solve_augmented_equation(
        &mut self,
        hessian: &BTreeMap<(usize, usize), f64>,
        gradient: &[f64],
        lambda: f64,
    ) -> LinAlgResult<Vec<f64>> {
        let n = gradient.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let augmented_hessian = Self::assemble(n, hessian, lambda)?;

        let pattern: SparsityKey = (n, hessian.keys().copied().collect());
        let cached = matches!(&self.symbolic_pattern, Some((keys, _)) if *keys == pattern);
        if !cached {
            let symbolic = solvers::SymbolicLlt::try_new(augmented_hessian.symbolic(), Side::Lower)
                .map_err(|e| {
                    LinAlgError::FactorizationFailed(format!("Symbolic analysis failed: {e:?}"))
                })?;
            self.symbolic_pattern = Some((pattern, symbolic));
        }

        let symbolic = match &self.symbolic_pattern {
            Some((_, symbolic)) => symbolic.clone(),
            None => {
                return Err(LinAlgError::FactorizationFailed(
                    "missing symbolic factorization".to_string(),
                ));
            }
        };

        let cholesky =
            solvers::Llt::try_new_with_symbolic(symbolic, augmented_hessian.as_ref(), Side::Lower)
                .map_err(|e| {
                    LinAlgError::FactorizationFailed(format!("Numeric factorization failed: {e:?}"))
                })?;

        // Solve (H + λI) dx = -g
        let rhs = Mat::from_fn(n, 1, |i, _| -gradient[i]);
        let dx = cholesky.solve(rhs);

        let step: Vec<f64> = (0..n).map(|i| dx[(i, 0)]).collect();
        if step.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::FactorizationFailed(
                "non-finite step".to_string(),
            ));
        }
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solves_small_spd_system() -> LinAlgResult<()> {
        // H = [4 1; 1 3], g = [-1, -2] -> H dx = [1, 2]
        let mut hessian = BTreeMap::new();
        hessian.insert((0, 0), 4.0);
        hessian.insert((0, 1), 1.0);
        hessian.insert((1, 0), 1.0);
        hessian.insert((1, 1), 3.0);

        let mut solver = SparseCholeskySolver::new();
        let dx = solver.solve_augmented_equation(&hessian, &[-1.0, -2.0], 0.0)?;
        assert!((dx[0] - 1.0 / 11.0).abs() < 1e-12);
        assert!((dx[1] - 7.0 / 11.0).abs() < 1e-12);

        // Reuse of the cached symbolic pattern with a different damping
        let damped = solver.solve_augmented_equation(&hessian, &[-1.0, -2.0], 1.0)?;
        assert!((damped[0] - 2.0 / 19.0).abs() < 1e-12);
        assert!((damped[1] - 9.0 / 19.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_indefinite_system_fails() {
        let mut hessian = BTreeMap::new();
        hessian.insert((0, 0), -1.0);
        let mut solver = SparseCholeskySolver::new();
        assert!(solver.solve_augmented_equation(&hessian, &[1.0], 0.0).is_err());
    }

    #[test]
    fn test_empty_system() -> LinAlgResult<()> {
        let mut solver = SparseCholeskySolver::default();
        assert!(solver.solve_augmented_equation(&BTreeMap::new(), &[], 1e-3)?.is_empty());
        Ok(())
    }
}

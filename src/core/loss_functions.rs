//! Robust loss functions (robust kernels) for the calibration hypergraph.
//!
//! A robust kernel ρ(s) replaces the plain chi-square `s = rᵀΩr` of an edge with a cost
//! that grows slower for large residuals. The graph engine applies a kernel through
//! iteratively reweighted least squares: the edge's information is scaled by `ρ'(s)`
//! when the normal equations are built, and `ρ(s)` enters the cost.
//!
//! Kernels may be attached while a graph is being assembled (for example to tame raw
//! GPS fixes), but the alternating scheduler clears every kernel before the first
//! trajectory phase so calibration edges keep their full gradients.
//!
//! # Example
//!
//! ```
//! use hypergraph_sclam::core::loss_functions::{HuberLoss, Loss};
//!
//! let huber = HuberLoss::new(1.345).unwrap();
//!
//! let [rho, rho_prime, _] = huber.evaluate(0.5);
//! assert_eq!(rho, 0.5);
//! assert_eq!(rho_prime, 1.0);
//! ```

use crate::error::{SclamError, SclamResult};

/// Trait for robust loss functions.
///
/// `evaluate` returns `[ρ(s), ρ'(s), ρ''(s)]` for the squared, information-weighted
/// residual `s ≥ 0`. Implementations satisfy ρ(0) = 0 and ρ'(0) = 1.
pub trait Loss: Send + Sync {
    /// Evaluate the loss function and its first two derivatives at `s`.
    fn evaluate(&self, s: f64) -> [f64; 3];
}

/// Huber loss: quadratic for inliers, linear for outliers.
///
/// ```text
/// ρ(s) = s                if s ≤ δ²
///        2δ√s - δ²        if s > δ²
/// ```
#[derive(Debug, Clone)]
pub struct HuberLoss {
    /// Scale parameter δ
    scale: f64,
    /// Cached value δ²
    scale2: f64,
}

impl HuberLoss {
    /// Create a new Huber loss with threshold `scale` (must be positive).
    pub fn new(scale: f64) -> SclamResult<Self> {
        if scale <= 0.0 {
            return Err(SclamError::InvalidInput(
                "scale needs to be larger than zero".to_string(),
            ));
        }
        Ok(HuberLoss {
            scale,
            scale2: scale * scale,
        })
    }
}

impl Loss for HuberLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        if s > self.scale2 {
            let r = s.sqrt();
            let rho1 = (self.scale / r).max(f64::MIN);
            [2.0 * self.scale * r - self.scale2, rho1, -rho1 / (2.0 * s)]
        } else {
            [s, 1.0, 0.0]
        }
    }
}

/// Cauchy loss: logarithmic growth, stronger suppression than Huber.
///
/// ```text
/// ρ(s) = δ² · ln(1 + s/δ²)
/// ```
#[derive(Debug, Clone)]
pub struct CauchyLoss {
    /// Cached value δ²
    scale2: f64,
    /// Cached value 1/δ²
    c: f64,
}

impl CauchyLoss {
    /// Create a new Cauchy loss with scale `scale` (must be positive).
    pub fn new(scale: f64) -> SclamResult<Self> {
        if scale <= 0.0 {
            return Err(SclamError::InvalidInput(
                "scale needs to be larger than zero".to_string(),
            ));
        }
        let scale2 = scale * scale;
        Ok(CauchyLoss {
            scale2,
            c: 1.0 / scale2,
        })
    }
}

impl Loss for CauchyLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        let sum = 1.0 + s * self.c;
        let inv = 1.0 / sum;
        [self.scale2 * sum.ln(), inv.max(f64::MIN), -self.c * (inv * inv)]
    }
}

//! Manifold representations for optimization on non-Euclidean spaces.
//!
//! The calibration hypergraph only needs planar rigid motions, so this module provides:
//! - **SE(2)**: Rigid transformations in 2D (vehicle poses and sensor offsets)
//!
//! Lie group M,° | size   | dim | X ∈ M             | Constraint | T_X M      | Exp(T)        | Comp. | Action
//! ------------- | ------ | --- | ----------------- | ---------- | ---------- | ------------- | ----- | ------
//! n-D vector    | Rⁿ,+   | n   | v ∈ Rⁿ            | |v-v|=0    | v ∈ Rⁿ     | v = exp(v)    | v₁+v₂ | v + x
//! Rigid motion  | SE(2),.| 3   | M = [R t; 0 1]    | RᵀR = I    | [v̂] ∈ R³   | Exp([v̂])      | M₁M₂  | Rx+t
//!
//! The design is inspired by the [manif](https://github.com/artivis/manif) C++ library:
//! - Analytic Jacobians for inverse, composition and between
//! - Right perturbation model: `X ⊕ τ = X ∘ Exp(τ)`
//! - Exponential and logarithmic maps
//!
//! Euclidean variables (the odometry bias vectors) are plain `nalgebra` vectors and are
//! updated additively by the graph engine, so they need no manifold type.

use std::fmt::Debug;
use thiserror::Error;

pub mod se2;

pub use se2::{SE2, SE2Tangent};

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    /// Invalid tangent or representation dimension
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    /// Invalid manifold element
    #[error("Invalid manifold element: {0}")]
    InvalidElement(String),
}

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Core trait for Lie group operations.
///
/// Jacobians follow the manif conventions and are written into the optional
/// out-parameters, so callers only pay for the derivatives they request.
pub trait LieGroup: Clone + Debug + PartialEq {
    /// The tangent space vector type
    type TangentVector: Tangent<Self>;

    /// The Jacobian matrix type
    type JacobianMatrix: Clone + Debug + PartialEq;

    /// Space dimension - dimension of the ambient space that the group acts on
    const DIM: usize;

    /// Degrees of freedom - dimension of the tangent space
    const DOF: usize;

    /// Representation size - size of the underlying data representation
    const REP_SIZE: usize;

    /// Get the identity element of the group.
    fn identity() -> Self;

    /// Compute the inverse of this element.
    ///
    /// # Arguments
    /// * `jacobian` - Optional mutable reference to store the Jacobian ∂(g⁻¹)/∂g
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self;

    /// Compose this element with another (group multiplication).
    ///
    /// # Arguments
    /// * `other` - The right operand for composition
    /// * `jacobian_self` - Optional Jacobian ∂(g₁ ∘ g₂)/∂g₁
    /// * `jacobian_other` - Optional Jacobian ∂(g₁ ∘ g₂)/∂g₂
    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self;

    /// Relative element `g₁⁻¹ ∘ g₂`.
    ///
    /// # Arguments
    /// * `other` - The target element g₂
    /// * `jacobian_self` - Optional Jacobian ∂(g₁⁻¹ ∘ g₂)/∂g₁
    /// * `jacobian_other` - Optional Jacobian ∂(g₁⁻¹ ∘ g₂)/∂g₂
    fn between(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self;

    /// Logarithmic map from the group to its tangent space.
    fn log(&self) -> Self::TangentVector;

    /// Adjoint matrix, mapping tangent vectors at this element to the identity.
    fn adjoint(&self) -> Self::JacobianMatrix;

    /// Right plus operation: g ⊞ τ = g ∘ exp(τ).
    fn right_plus(&self, tangent: &Self::TangentVector) -> Self {
        self.compose(&tangent.exp(), None, None)
    }

    /// Right minus operation: g₁ ⊟ g₂ = log(g₂⁻¹ ∘ g₁).
    fn right_minus(&self, other: &Self) -> Self::TangentVector {
        other.between(self, None, None).log()
    }

    /// Check approximate equality through the tangent of the difference.
    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other).is_zero(tolerance)
    }
}

/// Trait for tangent space elements of a Lie group.
pub trait Tangent<G: LieGroup>: Clone + Debug + PartialEq {
    /// Dimension of the tangent space
    const DIM: usize;

    /// Exponential map from the tangent space to the group.
    fn exp(&self) -> G;

    /// Right Jacobian of the exponential map.
    fn right_jacobian(&self) -> G::JacobianMatrix;

    /// The zero tangent vector.
    fn zero() -> Self;

    /// Check whether every component is below `tolerance` in magnitude.
    fn is_zero(&self, tolerance: f64) -> bool;
}

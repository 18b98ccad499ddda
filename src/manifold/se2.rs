//! SE(2) - Special Euclidean Group in 2D
//!
//! This module implements the Special Euclidean group SE(2), which represents
//! rigid body transformations in 2D space (rotation + translation). Vehicle poses,
//! sensor offsets and every relative-motion measurement of the calibration graph are
//! SE(2) elements.
//!
//! SE(2) elements are represented as a unit complex rotation plus a `Vector2` translation.
//! SE(2) tangent elements are represented as [x, y, theta] = 3 components,
//! where x,y is the translational component and theta is the rotational component.
//!
//! Two vector views coexist and must not be confused:
//! - [`SE2Tangent`] is the Lie algebra coordinate produced by [`LieGroup::log`].
//! - [`SE2::to_vector`] is the minimal `(x, y, heading)` representation used for
//!   residuals and for the persisted formats.
//!
//! The implementation follows the [manif](https://github.com/artivis/manif) C++ library
//! conventions for Jacobians (right perturbations).

use crate::manifold::{LieGroup, ManifoldError, ManifoldResult, Tangent};
use nalgebra::{DVector, Matrix2, Matrix3, UnitComplex, Vector2, Vector3};
use std::f64::consts::PI;
use std::fmt;
use std::ops::Mul;

/// SE(2) group element representing rigid body transformations in 2D.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2 {
    /// Translation part as 2D column vector
    translation: Vector2<f64>,
    /// Rotation part as unit complex number
    rotation: UnitComplex<f64>,
}

impl fmt::Display for SE2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(translation: [{:.4}, {:.4}], rotation: {:.4})",
            self.translation.x,
            self.translation.y,
            self.angle()
        )
    }
}

impl TryFrom<&DVector<f64>> for SE2 {
    type Error = ManifoldError;

    /// Build from the `[x, y, theta]` minimal representation.
    fn try_from(data: &DVector<f64>) -> ManifoldResult<Self> {
        SE2::from_slice(data.as_slice())
    }
}

impl From<&SE2> for DVector<f64> {
    fn from(se2: &SE2) -> Self {
        DVector::from_column_slice(se2.to_vector().as_slice())
    }
}

impl Mul<&SE2> for &SE2 {
    type Output = SE2;

    fn mul(self, rhs: &SE2) -> SE2 {
        self.compose(rhs, None, None)
    }
}

impl Mul for SE2 {
    type Output = SE2;

    fn mul(self, rhs: SE2) -> SE2 {
        self.compose(&rhs, None, None)
    }
}

/// Wrap an angle into `(-π, π]`.
pub fn normalize_angle(theta: f64) -> f64 {
    let wrapped = (theta + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

impl SE2 {
    /// Create a new SE2 element from translation and rotation.
    pub fn new(translation: Vector2<f64>, rotation: UnitComplex<f64>) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    /// Create SE2 from translation components and angle.
    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        SE2::new(Vector2::new(x, y), UnitComplex::new(theta))
    }

    /// Create SE2 from the `[x, y, theta]` minimal representation.
    pub fn from_vector(vector: &Vector3<f64>) -> Self {
        SE2::from_xy_angle(vector.x, vector.y, vector.z)
    }

    /// Create SE2 from a `[x, y, theta]` slice, checking its length.
    pub fn from_slice(data: &[f64]) -> ManifoldResult<Self> {
        match data {
            [x, y, theta] => Ok(SE2::from_xy_angle(*x, *y, *theta)),
            _ => Err(ManifoldError::InvalidDimension {
                expected: 3,
                actual: data.len(),
            }),
        }
    }

    /// Minimal representation `[x, y, theta]` with theta in `(-π, π]`.
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.translation.x, self.translation.y, self.angle())
    }

    /// Jacobian of [`SE2::to_vector`] with respect to a right perturbation of `self`.
    ///
    /// `∂(t, θ)/∂τ = [R 0; 0 1]`, since `t(X ∘ Exp(τ)) ≈ t + R·ρ` to first order.
    pub fn to_vector_jacobian(&self) -> Matrix3<f64> {
        let r = self.rotation_matrix();
        Matrix3::new(
            r[(0, 0)],
            r[(0, 1)],
            0.0,
            r[(1, 0)],
            r[(1, 1)],
            0.0,
            0.0,
            0.0,
            1.0,
        )
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    pub fn rotation(&self) -> UnitComplex<f64> {
        self.rotation
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        *self.rotation.to_rotation_matrix().matrix()
    }

    /// Homogeneous 3x3 transformation matrix.
    pub fn matrix(&self) -> Matrix3<f64> {
        let r = self.rotation_matrix();
        Matrix3::new(
            r[(0, 0)],
            r[(0, 1)],
            self.translation.x,
            r[(1, 0)],
            r[(1, 1)],
            self.translation.y,
            0.0,
            0.0,
            1.0,
        )
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    /// Heading in `(-π, π]`.
    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    /// Transform a 2D point.
    pub fn act(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.rotation * point + self.translation
    }
}

impl LieGroup for SE2 {
    type TangentVector = SE2Tangent;
    type JacobianMatrix = Matrix3<f64>;

    const DIM: usize = 2;
    const DOF: usize = 3;
    const REP_SIZE: usize = 4;

    fn identity() -> Self {
        SE2::new(Vector2::zeros(), UnitComplex::identity())
    }

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        let inv_rotation = self.rotation.inverse();
        let inv_translation = -(inv_rotation * self.translation);

        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }

        SE2::new(inv_translation, inv_rotation)
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac_self) = jacobian_self {
            *jac_self = other.inverse(None).adjoint();
        }

        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix3::identity();
        }

        SE2::new(
            self.translation + self.rotation * other.translation,
            self.rotation * other.rotation,
        )
    }

    fn between(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        let relative = self.inverse(None).compose(other, None, None);

        if let Some(jac_self) = jacobian_self {
            *jac_self = -relative.inverse(None).adjoint();
        }

        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix3::identity();
        }

        relative
    }

    fn log(&self) -> Self::TangentVector {
        let theta = self.angle();

        // V(θ) = [a -b; b a], its inverse is [a b; -b a] / (a² + b²)
        let (a, b) = if theta.abs() < 1e-8 {
            (1.0 - theta * theta / 6.0, 0.5 * theta)
        } else {
            (theta.sin() / theta, (1.0 - theta.cos()) / theta)
        };
        let den = 1.0 / (a * a + b * b);
        let (a, b) = (a * den, b * den);

        let t = self.translation;
        SE2Tangent::new(Vector3::new(a * t.x + b * t.y, -b * t.x + a * t.y, theta))
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        let r = self.rotation_matrix();
        Matrix3::new(
            r[(0, 0)],
            r[(0, 1)],
            self.translation.y,
            r[(1, 0)],
            r[(1, 1)],
            -self.translation.x,
            0.0,
            0.0,
            1.0,
        )
    }
}

/// SE(2) tangent space element.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2Tangent {
    /// Internal data: [x, y, theta]
    data: Vector3<f64>,
}

impl fmt::Display for SE2Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "se2([{:.4}, {:.4}, {:.4}])",
            self.data.x, self.data.y, self.data.z
        )
    }
}

impl From<Vector3<f64>> for SE2Tangent {
    fn from(data: Vector3<f64>) -> Self {
        SE2Tangent::new(data)
    }
}

impl SE2Tangent {
    pub fn new(data: Vector3<f64>) -> Self {
        SE2Tangent { data }
    }

    pub fn from_components(x: f64, y: f64, theta: f64) -> Self {
        SE2Tangent::new(Vector3::new(x, y, theta))
    }

    pub fn x(&self) -> f64 {
        self.data.x
    }

    pub fn y(&self) -> f64 {
        self.data.y
    }

    pub fn angle(&self) -> f64 {
        self.data.z
    }

    pub fn as_vector(&self) -> &Vector3<f64> {
        &self.data
    }
}

impl Tangent<SE2> for SE2Tangent {
    const DIM: usize = 3;

    fn exp(&self) -> SE2 {
        let theta = self.angle();
        let (a, b) = if theta.abs() < 1e-8 {
            (1.0 - theta * theta / 6.0, 0.5 * theta)
        } else {
            (theta.sin() / theta, (1.0 - theta.cos()) / theta)
        };

        let x = a * self.x() - b * self.y();
        let y = b * self.x() + a * self.y();
        SE2::from_xy_angle(x, y, theta)
    }

    fn right_jacobian(&self) -> Matrix3<f64> {
        let (rho1, rho2, theta) = (self.x(), self.y(), self.angle());

        if theta.abs() < 1e-8 {
            return Matrix3::new(
                1.0 - theta * theta / 6.0,
                0.5 * theta,
                -0.5 * rho2 + theta * rho1 / 6.0,
                -0.5 * theta,
                1.0 - theta * theta / 6.0,
                0.5 * rho1 + theta * rho2 / 6.0,
                0.0,
                0.0,
                1.0,
            );
        }

        let (s, c) = theta.sin_cos();
        let theta2 = theta * theta;
        Matrix3::new(
            s / theta,
            (1.0 - c) / theta,
            (theta * rho1 - rho2 + rho2 * c - rho1 * s) / theta2,
            (c - 1.0) / theta,
            s / theta,
            (rho1 + theta * rho2 - rho1 * c - rho2 * s) / theta2,
            0.0,
            0.0,
            1.0,
        )
    }

    fn zero() -> Self {
        SE2Tangent::new(Vector3::zeros())
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.iter().all(|v| v.abs() < tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-10;

    /// Central-difference Jacobian of `f` with respect to a right perturbation of `x`.
    fn numeric_jacobian<F>(x: &SE2, f: F) -> Matrix3<f64>
    where
        F: Fn(&SE2) -> SE2,
    {
        let h = 1e-6;
        let base = f(x);
        let mut jac = Matrix3::zeros();
        for k in 0..3 {
            let mut delta = Vector3::zeros();
            delta[k] = h;
            let plus = f(&x.right_plus(&SE2Tangent::new(delta)));
            let minus = f(&x.right_plus(&SE2Tangent::new(-delta)));
            let column = (plus.right_minus(&base).as_vector()
                - minus.right_minus(&base).as_vector())
                / (2.0 * h);
            jac.set_column(k, &column);
        }
        jac
    }

    #[test]
    fn test_se2_identity() {
        let se2 = SE2::identity();
        assert!(se2.x().abs() < TOLERANCE);
        assert!(se2.y().abs() < TOLERANCE);
        assert!(se2.angle().abs() < TOLERANCE);
    }

    #[test]
    fn test_se2_from_xy_angle() {
        let se2 = SE2::from_xy_angle(1.0, 2.0, PI / 4.0);
        assert!((se2.x() - 1.0).abs() < TOLERANCE);
        assert!((se2.y() - 2.0).abs() < TOLERANCE);
        assert!((se2.angle() - PI / 4.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_se2_from_slice_rejects_wrong_length() {
        assert_eq!(
            SE2::from_slice(&[1.0, 2.0]),
            Err(ManifoldError::InvalidDimension {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_se2_inverse() {
        let se2 = SE2::from_xy_angle(1.0, 2.0, PI / 4.0);
        let identity = se2.compose(&se2.inverse(None), None, None);
        assert!(identity.is_approx(&SE2::identity(), TOLERANCE));
    }

    #[test]
    fn test_se2_compose() {
        let a = SE2::from_xy_angle(1.0, 0.0, PI / 2.0);
        let b = SE2::from_xy_angle(1.0, 0.0, 0.0);
        let composed = &a * &b;
        assert!((composed.x() - 1.0).abs() < TOLERANCE);
        assert!((composed.y() - 1.0).abs() < TOLERANCE);
        assert!((composed.angle() - PI / 2.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_se2_between() {
        let a = SE2::from_xy_angle(1.0, 2.0, PI / 4.0);
        let b = SE2::from_xy_angle(3.0, 4.0, PI / 2.0);
        let between = a.between(&b, None, None);
        let recovered = &a * &between;
        assert!(b.is_approx(&recovered, 1e-9));
    }

    #[test]
    fn test_se2_exp_log() {
        let tangent = SE2Tangent::from_components(0.1, 0.2, 0.3);
        let recovered = tangent.exp().log();
        assert!((tangent.as_vector() - recovered.as_vector()).norm() < 1e-12);

        let se2 = SE2::from_xy_angle(0.5, -1.0, 2.5);
        assert!(se2.log().exp().is_approx(&se2, 1e-12));
    }

    #[test]
    fn test_se2_log_identity() {
        assert!(SE2::identity().log().is_zero(TOLERANCE));
    }

    #[test]
    fn test_se2_to_vector_wraps_heading() {
        let se2 = SE2::from_xy_angle(0.0, 0.0, 3.0 * PI / 2.0);
        assert!((se2.to_vector().z + PI / 2.0).abs() < TOLERANCE);
        assert!((normalize_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < TOLERANCE);
        assert!((normalize_angle(PI) - PI).abs() < TOLERANCE);
    }

    #[test]
    fn test_se2_act() {
        let se2 = SE2::from_xy_angle(1.0, 2.0, PI / 2.0);
        let p = se2.act(&Vector2::new(1.0, 0.0));
        assert!((p.x - 1.0).abs() < TOLERANCE);
        assert!((p.y - 3.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_se2_inverse_jacobian() {
        let x = SE2::from_xy_angle(0.7, -1.3, 0.9);
        let mut analytic = Matrix3::zeros();
        x.inverse(Some(&mut analytic));
        let numeric = numeric_jacobian(&x, |v| v.inverse(None));
        assert!((analytic - numeric).norm() < 1e-6);
    }

    #[test]
    fn test_se2_compose_jacobians() {
        let a = SE2::from_xy_angle(0.7, -1.3, 0.9);
        let b = SE2::from_xy_angle(-2.0, 0.4, -2.2);
        let mut jac_a = Matrix3::zeros();
        let mut jac_b = Matrix3::zeros();
        a.compose(&b, Some(&mut jac_a), Some(&mut jac_b));

        let numeric_a = numeric_jacobian(&a, |v| v.compose(&b, None, None));
        let numeric_b = numeric_jacobian(&b, |v| a.compose(v, None, None));
        assert!((jac_a - numeric_a).norm() < 1e-6);
        assert!((jac_b - numeric_b).norm() < 1e-6);
    }

    #[test]
    fn test_se2_between_jacobians() {
        let a = SE2::from_xy_angle(3.0, 1.0, -0.4);
        let b = SE2::from_xy_angle(4.5, 2.0, 0.6);
        let mut jac_a = Matrix3::zeros();
        let mut jac_b = Matrix3::zeros();
        a.between(&b, Some(&mut jac_a), Some(&mut jac_b));

        let numeric_a = numeric_jacobian(&a, |v| v.between(&b, None, None));
        let numeric_b = numeric_jacobian(&b, |v| a.between(v, None, None));
        assert!((jac_a - numeric_a).norm() < 1e-6);
        assert!((jac_b - numeric_b).norm() < 1e-6);
    }

    #[test]
    fn test_se2_to_vector_jacobian() {
        let x = SE2::from_xy_angle(1.0, 2.0, 0.3);
        let h = 1e-6;
        let mut numeric = Matrix3::zeros();
        for k in 0..3 {
            let mut delta = Vector3::zeros();
            delta[k] = h;
            let plus = x.right_plus(&SE2Tangent::new(delta)).to_vector();
            let minus = x.right_plus(&SE2Tangent::new(-delta)).to_vector();
            numeric.set_column(k, &((plus - minus) / (2.0 * h)));
        }
        assert!((x.to_vector_jacobian() - numeric).norm() < 1e-6);
    }

    #[test]
    fn test_se2_right_jacobian() {
        let tangent = SE2Tangent::from_components(0.4, -0.2, 0.7);
        let base = tangent.exp();
        let h = 1e-6;
        let mut numeric = Matrix3::zeros();
        for k in 0..3 {
            let mut delta = Vector3::zeros();
            delta[k] = h;
            let plus = SE2Tangent::new(tangent.as_vector() + delta).exp();
            let minus = SE2Tangent::new(tangent.as_vector() - delta).exp();
            let column = (plus.right_minus(&base).as_vector()
                - minus.right_minus(&base).as_vector())
                / (2.0 * h);
            numeric.set_column(k, &column);
        }
        assert!((tangent.right_jacobian() - numeric).norm() < 1e-6);
    }
}

//! Factor implementations for the calibration hypergraph
//!
//! Every factor binds a fixed list of vertices and produces a residual, a dense Jacobian
//! stacked over its vertices (right-perturbation convention) and an information matrix.
//! The graph stores factors through the closed [`CalibrationEdge`] enum so the scheduler
//! can switch on the factor kind directly instead of down-casting.
//!
//! # Module Structure
//!
//! - `calibration`: pose-pose factor coupled to a shared sensor offset
//! - `odometry`: plain odometry factor, odometry-calibration factor and the Ackerman model
//! - `gps`: absolute position factor with synthetic heading
//! - `heading`: inertial yaw factor
//! - `registry`: tag to constructor map used to read persisted hypergraphs

use nalgebra::{DMatrix, DVector, Matrix3};
use std::fmt;

use crate::core::graph::GraphError;
use crate::core::variable::Estimate;
use crate::error::{SclamError, SclamResult};
use crate::manifold::se2::SE2;

pub mod calibration;
pub mod gps;
pub mod heading;
pub mod odometry;
pub mod registry;

pub use calibration::CalibrationFactor;
pub use gps::GpsFactor;
pub use heading::HeadingFactor;
pub use odometry::{AckermanModel, OdometryCalibrationFactor, OdometryFactor, OdometryInputs};
pub use registry::FactorRegistry;

/// Factor trait for the hypergraph
///
/// This trait defines the interface the graph engine needs from a factor: the vertices
/// it binds, its information matrix, and its linearization at the current estimates.
pub trait Factor: fmt::Debug + Send + Sync {
    /// Ids of the bound vertices, in the order `linearize` expects their estimates
    fn vertex_ids(&self) -> &[usize];

    /// Residual dimension
    fn dimension(&self) -> usize;

    /// Information (inverse covariance) matrix, `dimension × dimension`
    fn information(&self) -> &DMatrix<f64>;

    /// Compute the residual and, if requested, the Jacobian `∂r/∂[v₀, v₁, …]`.
    ///
    /// `estimates[i]` is the estimate of `vertex_ids()[i]`. A vertex holding the wrong
    /// estimate kind is an error.
    fn linearize(
        &self,
        estimates: &[&Estimate],
        compute_jacobian: bool,
    ) -> SclamResult<(DVector<f64>, Option<DMatrix<f64>>)>;

    /// Propose an estimate for vertex `target` from the known ones.
    ///
    /// `estimates[i]` is `None` when vertex `i` has no usable estimate yet. Returns `None`
    /// when this factor cannot seed `target`.
    fn initial_estimate(&self, _estimates: &[Option<&Estimate>], _target: usize) -> Option<Estimate> {
        None
    }
}

/// All factor kinds the calibration hypergraph holds.
#[derive(Debug, Clone)]
pub enum CalibrationEdge {
    Calibration(CalibrationFactor),
    Odometry(OdometryFactor),
    OdometryCalibration(OdometryCalibrationFactor),
    Gps(GpsFactor),
    Heading(HeadingFactor),
}

impl CalibrationEdge {
    /// Persistence tag of the wrapped factor
    pub fn tag(&self) -> &'static str {
        match self {
            CalibrationEdge::Calibration(f) => f.tag(),
            CalibrationEdge::Odometry(_) => OdometryFactor::TAG,
            CalibrationEdge::OdometryCalibration(_) => OdometryCalibrationFactor::TAG,
            CalibrationEdge::Gps(_) => GpsFactor::TAG,
            CalibrationEdge::Heading(_) => HeadingFactor::TAG,
        }
    }

    /// Vertex ids written to a persisted record. The offset vertex of a calibration
    /// factor follows from its tag and is left out.
    pub fn persisted_vertex_ids(&self) -> &[usize] {
        match self {
            CalibrationEdge::Calibration(f) => &f.vertex_ids()[..2],
            other => other.vertex_ids(),
        }
    }

    /// Scalars written after the vertex ids: measurement, then upper-triangle information
    pub fn write_data(&self) -> Vec<f64> {
        match self {
            CalibrationEdge::Calibration(f) => f.write_data(),
            CalibrationEdge::Odometry(f) => f.write_data(),
            CalibrationEdge::OdometryCalibration(f) => f.write_data(),
            CalibrationEdge::Gps(f) => f.write_data(),
            CalibrationEdge::Heading(f) => f.write_data(),
        }
    }

    fn inner(&self) -> &dyn Factor {
        match self {
            CalibrationEdge::Calibration(f) => f,
            CalibrationEdge::Odometry(f) => f,
            CalibrationEdge::OdometryCalibration(f) => f,
            CalibrationEdge::Gps(f) => f,
            CalibrationEdge::Heading(f) => f,
        }
    }
}

impl Factor for CalibrationEdge {
    fn vertex_ids(&self) -> &[usize] {
        self.inner().vertex_ids()
    }

    fn dimension(&self) -> usize {
        self.inner().dimension()
    }

    fn information(&self) -> &DMatrix<f64> {
        self.inner().information()
    }

    fn linearize(
        &self,
        estimates: &[&Estimate],
        compute_jacobian: bool,
    ) -> SclamResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        self.inner().linearize(estimates, compute_jacobian)
    }

    fn initial_estimate(&self, estimates: &[Option<&Estimate>], target: usize) -> Option<Estimate> {
        self.inner().initial_estimate(estimates, target)
    }
}

impl From<CalibrationFactor> for CalibrationEdge {
    fn from(factor: CalibrationFactor) -> Self {
        CalibrationEdge::Calibration(factor)
    }
}

impl From<OdometryFactor> for CalibrationEdge {
    fn from(factor: OdometryFactor) -> Self {
        CalibrationEdge::Odometry(factor)
    }
}

impl From<OdometryCalibrationFactor> for CalibrationEdge {
    fn from(factor: OdometryCalibrationFactor) -> Self {
        CalibrationEdge::OdometryCalibration(factor)
    }
}

impl From<GpsFactor> for CalibrationEdge {
    fn from(factor: GpsFactor) -> Self {
        CalibrationEdge::Gps(factor)
    }
}

impl From<HeadingFactor> for CalibrationEdge {
    fn from(factor: HeadingFactor) -> Self {
        CalibrationEdge::Heading(factor)
    }
}

/// Diagonal information matrix from per-axis standard deviations.
///
/// The deviations are squared into a diagonal covariance whose inverse is returned.
pub fn information_from_std(xx: f64, yy: f64, hh: f64) -> Matrix3<f64> {
    Matrix3::from_diagonal(&nalgebra::Vector3::new(
        1.0 / (xx * xx),
        1.0 / (yy * yy),
        1.0 / (hh * hh),
    ))
}

/// Upper triangle of a square matrix in row-major order.
pub fn write_upper_triangle(matrix: &DMatrix<f64>) -> Vec<f64> {
    let n = matrix.nrows();
    let mut values = Vec::with_capacity(n * (n + 1) / 2);
    for i in 0..n {
        for j in i..n {
            values.push(matrix[(i, j)]);
        }
    }
    values
}

/// Read a symmetric `dim × dim` matrix from its row-major upper triangle.
///
/// The lower triangle is mirrored from the upper one.
pub fn read_upper_triangle(dim: usize, values: &[f64]) -> SclamResult<DMatrix<f64>> {
    let expected = dim * (dim + 1) / 2;
    if values.len() != expected {
        return Err(SclamError::InvalidInput(format!(
            "expected {expected} information values, found {}",
            values.len()
        )));
    }
    let mut matrix = DMatrix::zeros(dim, dim);
    let mut k = 0;
    for i in 0..dim {
        for j in i..dim {
            matrix[(i, j)] = values[k];
            matrix[(j, i)] = values[k];
            k += 1;
        }
    }
    Ok(matrix)
}

/// The SE(2) estimate of the `index`-th bound vertex.
pub fn se2_at<'a>(
    estimates: &[&'a Estimate],
    ids: &[usize],
    index: usize,
) -> Result<&'a SE2, GraphError> {
    let id = ids[index];
    let estimate = estimates
        .get(index)
        .ok_or(GraphError::UnknownVertex { id })?;
    estimate.as_se2().ok_or(GraphError::EstimateKind {
        id,
        expected: "SE2",
        found: estimate.kind(),
    })
}

/// The vector estimate of the `index`-th bound vertex.
pub fn vector_at<'a>(
    estimates: &[&'a Estimate],
    ids: &[usize],
    index: usize,
) -> Result<&'a DVector<f64>, GraphError> {
    let id = ids[index];
    let estimate = estimates
        .get(index)
        .ok_or(GraphError::UnknownVertex { id })?;
    estimate.as_vector().ok_or(GraphError::EstimateKind {
        id,
        expected: "vector",
        found: estimate.kind(),
    })
}

/// Split `data` into a fixed-size measurement and the information upper triangle.
pub(crate) fn split_record(
    data: &[f64],
    measurement_len: usize,
    information_dim: usize,
) -> SclamResult<(&[f64], DMatrix<f64>)> {
    if data.len() < measurement_len {
        return Err(SclamError::InvalidInput(format!(
            "expected at least {measurement_len} measurement values, found {}",
            data.len()
        )));
    }
    let (measurement, information) = data.split_at(measurement_len);
    Ok((measurement, read_upper_triangle(information_dim, information)?))
}

//! Odometry factors and the Ackerman correction model.
//!
//! Every raw odometry record produces a pair of factors over the same two poses:
//!
//! - [`OdometryFactor`], the plain relative-motion constraint used while the trajectory
//!   is estimated,
//! - [`OdometryCalibrationFactor`], which keeps the raw control inputs and fits the
//!   bias parameters of its trajectory window while the poses are held fixed.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use super::{Factor, se2_at, split_record, vector_at, write_upper_triangle};
use crate::core::variable::Estimate;
use crate::error::{SclamError, SclamResult};
use crate::manifold::LieGroup;
use crate::manifold::se2::SE2;

/// Length of the odometry bias vector `[velocity multiplier, steering multiplier, steering bias]`
pub const BIAS_DIMENSION: usize = 3;

/// Bias parameters that leave the raw inputs unchanged.
pub fn neutral_bias() -> DVector<f64> {
    DVector::from_vec(vec![1.0, 1.0, 0.0])
}

/// Raw control inputs of one odometry record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryInputs {
    pub velocity: f64,
    pub steering_angle: f64,
    pub elapsed_time: f64,
}

/// Bicycle (Ackerman) motion model turning raw inputs into a relative motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckermanModel {
    /// Distance between the front and rear axles
    pub axle_distance: f64,
}

impl Default for AckermanModel {
    fn default() -> Self {
        AckermanModel {
            axle_distance: 2.625,
        }
    }
}

impl AckermanModel {
    pub fn new(axle_distance: f64) -> Self {
        AckermanModel { axle_distance }
    }

    /// Relative motion of the raw inputs corrected by `bias`.
    ///
    /// `bias = [vm, sm, sb]`: distance `v·vm·dt`, steering `φ·sm + sb`.
    pub fn motion(&self, inputs: &OdometryInputs, bias: &[f64]) -> SE2 {
        let distance = inputs.velocity * bias[0] * inputs.elapsed_time;
        let steering = inputs.steering_angle * bias[1] + bias[2];
        let curvature = steering.tan() / self.axle_distance;
        let rotation = distance * curvature;

        if rotation.abs() < 1e-9 {
            SE2::from_xy_angle(distance, 0.0, 0.0)
        } else {
            SE2::from_xy_angle(
                rotation.sin() / curvature,
                (1.0 - rotation.cos()) / curvature,
                rotation,
            )
        }
    }
}

/// Plain relative-motion factor between consecutive poses.
///
/// ```text
/// r = (M⁻¹ ∘ x₁⁻¹ ∘ x₂).to_vector()
/// ```
#[derive(Debug, Clone)]
pub struct OdometryFactor {
    vertex_ids: [usize; 2],
    measurement: SE2,
    inverse_measurement: SE2,
    information: DMatrix<f64>,
}

impl OdometryFactor {
    pub const TAG: &'static str = "EDGE_SE2";

    pub fn new(from: usize, to: usize, measurement: SE2, information: Matrix3<f64>) -> Self {
        let inverse_measurement = measurement.inverse(None);
        OdometryFactor {
            vertex_ids: [from, to],
            measurement,
            inverse_measurement,
            information: DMatrix::from_iterator(3, 3, information.iter().copied()),
        }
    }

    pub fn set_measurement(&mut self, measurement: SE2) {
        self.inverse_measurement = measurement.inverse(None);
        self.measurement = measurement;
    }

    pub fn measurement(&self) -> &SE2 {
        &self.measurement
    }

    pub fn inverse_measurement(&self) -> &SE2 {
        &self.inverse_measurement
    }

    pub fn write_data(&self) -> Vec<f64> {
        let mut data: Vec<f64> = self.measurement.to_vector().iter().copied().collect();
        data.extend(write_upper_triangle(&self.information));
        data
    }

    pub fn read(from: usize, to: usize, data: &[f64]) -> SclamResult<Self> {
        let (measurement, information) = split_record(data, 3, 3)?;
        let mut factor = Self::new(from, to, SE2::from_slice(measurement)?, Matrix3::identity());
        factor.information = information;
        Ok(factor)
    }
}

impl Factor for OdometryFactor {
    fn vertex_ids(&self) -> &[usize] {
        &self.vertex_ids
    }

    fn dimension(&self) -> usize {
        3
    }

    fn information(&self) -> &DMatrix<f64> {
        &self.information
    }

    fn linearize(
        &self,
        estimates: &[&Estimate],
        compute_jacobian: bool,
    ) -> SclamResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let x1 = se2_at(estimates, &self.vertex_ids, 0)?;
        let x2 = se2_at(estimates, &self.vertex_ids, 1)?;

        let mut j_relative_x1 = Matrix3::zeros();
        let relative = x1.between(x2, Some(&mut j_relative_x1), None);
        let error = self.inverse_measurement.compose(&relative, None, None);
        let residual = error.to_vector();

        let jacobian = compute_jacobian.then(|| {
            let j_residual = error.to_vector_jacobian();
            let mut jacobian = DMatrix::<f64>::zeros(3, 6);
            jacobian
                .fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&(j_residual * j_relative_x1));
            jacobian.fixed_view_mut::<3, 3>(0, 3).copy_from(&j_residual);
            jacobian
        });

        Ok((DVector::from_column_slice(residual.as_slice()), jacobian))
    }

    fn initial_estimate(&self, estimates: &[Option<&Estimate>], target: usize) -> Option<Estimate> {
        let (known, motion) = match target {
            0 => (estimates.get(1).copied().flatten()?, &self.inverse_measurement),
            1 => (estimates.first().copied().flatten()?, &self.measurement),
            _ => return None,
        };
        Some(Estimate::Se2(known.as_se2()?.compose(motion, None, None)))
    }
}

/// Odometry factor fitting the bias parameters of one trajectory window.
///
/// Binds `[x₁, x₂, bias]`. The residual compares the stored relative motion `M` with the
/// raw inputs replayed through the Ackerman model under the current bias:
///
/// ```text
/// r = (M⁻¹ ∘ ackerman(inputs, bias)).to_vector()
/// ```
///
/// Before each calibration phase `M` is regenerated from the current pose estimates, so
/// the residual depends on the poses only through that snapshot and the pose columns of
/// the Jacobian are zero.
#[derive(Debug, Clone)]
pub struct OdometryCalibrationFactor {
    vertex_ids: [usize; 3],
    inputs: OdometryInputs,
    model: AckermanModel,
    measurement: SE2,
    inverse_measurement: SE2,
    information: DMatrix<f64>,
    /// Index of the plain odometry edge built from the same record
    paired_edge: Option<usize>,
}

impl OdometryCalibrationFactor {
    pub const TAG: &'static str = "EDGE_SE2_ODOM_ACKERMAN_CALIBRATION";

    pub fn new(
        from: usize,
        to: usize,
        bias: usize,
        inputs: OdometryInputs,
        model: AckermanModel,
        measurement: SE2,
        information: Matrix3<f64>,
    ) -> Self {
        let inverse_measurement = measurement.inverse(None);
        OdometryCalibrationFactor {
            vertex_ids: [from, to, bias],
            inputs,
            model,
            measurement,
            inverse_measurement,
            information: DMatrix::from_iterator(3, 3, information.iter().copied()),
            paired_edge: None,
        }
    }

    pub fn set_measurement(&mut self, measurement: SE2) {
        self.inverse_measurement = measurement.inverse(None);
        self.measurement = measurement;
    }

    pub fn measurement(&self) -> &SE2 {
        &self.measurement
    }

    pub fn inverse_measurement(&self) -> &SE2 {
        &self.inverse_measurement
    }

    pub fn inputs(&self) -> &OdometryInputs {
        &self.inputs
    }

    pub fn bias_id(&self) -> usize {
        self.vertex_ids[2]
    }

    pub fn paired_edge(&self) -> Option<usize> {
        self.paired_edge
    }

    pub fn set_paired_edge(&mut self, index: usize) {
        self.paired_edge = Some(index);
    }

    /// Replace the measurement with the relative motion of the two pose estimates.
    pub fn regenerate_measurement(&mut self, x1: &SE2, x2: &SE2) {
        self.set_measurement(x1.between(x2, None, None));
    }

    /// Relative motion of the raw inputs under `bias`.
    pub fn corrected_motion(&self, bias: &DVector<f64>) -> SclamResult<SE2> {
        if bias.len() != BIAS_DIMENSION {
            return Err(SclamError::InvalidInput(format!(
                "odometry bias has {} parameters, expected {BIAS_DIMENSION}",
                bias.len()
            )));
        }
        Ok(self.model.motion(&self.inputs, bias.as_slice()))
    }

    /// Measurement, information upper triangle, then velocity, steering and elapsed time
    pub fn write_data(&self) -> Vec<f64> {
        let mut data: Vec<f64> = self.measurement.to_vector().iter().copied().collect();
        data.extend(write_upper_triangle(&self.information));
        data.extend([
            self.inputs.velocity,
            self.inputs.steering_angle,
            self.inputs.elapsed_time,
        ]);
        data
    }

    pub fn read(
        from: usize,
        to: usize,
        bias: usize,
        model: AckermanModel,
        data: &[f64],
    ) -> SclamResult<Self> {
        if data.len() != 12 {
            return Err(SclamError::InvalidInput(format!(
                "odometry calibration record needs 12 values, found {}",
                data.len()
            )));
        }
        let (record, raw) = data.split_at(9);
        let (measurement, information) = split_record(record, 3, 3)?;
        let inputs = OdometryInputs {
            velocity: raw[0],
            steering_angle: raw[1],
            elapsed_time: raw[2],
        };
        let mut factor = Self::new(
            from,
            to,
            bias,
            inputs,
            model,
            SE2::from_slice(measurement)?,
            Matrix3::identity(),
        );
        factor.information = information;
        Ok(factor)
    }

    fn residual(&self, bias: &[f64]) -> Vector3<f64> {
        self.inverse_measurement
            .compose(&self.model.motion(&self.inputs, bias), None, None)
            .to_vector()
    }
}

impl Factor for OdometryCalibrationFactor {
    fn vertex_ids(&self) -> &[usize] {
        &self.vertex_ids
    }

    fn dimension(&self) -> usize {
        3
    }

    fn information(&self) -> &DMatrix<f64> {
        &self.information
    }

    fn linearize(
        &self,
        estimates: &[&Estimate],
        compute_jacobian: bool,
    ) -> SclamResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        se2_at(estimates, &self.vertex_ids, 0)?;
        se2_at(estimates, &self.vertex_ids, 1)?;
        let bias = vector_at(estimates, &self.vertex_ids, 2)?;
        if bias.len() != BIAS_DIMENSION {
            return Err(SclamError::InvalidInput(format!(
                "vertex {} holds {} bias parameters, expected {BIAS_DIMENSION}",
                self.vertex_ids[2],
                bias.len()
            )));
        }

        let residual = self.residual(bias.as_slice());

        // Central differences over the bias; the poses only enter through M.
        let jacobian = compute_jacobian.then(|| {
            let h = 1e-6;
            let mut jacobian = DMatrix::<f64>::zeros(3, 6 + BIAS_DIMENSION);
            for k in 0..BIAS_DIMENSION {
                let mut plus = [bias[0], bias[1], bias[2]];
                let mut minus = plus;
                plus[k] += h;
                minus[k] -= h;
                let column = (self.residual(&plus) - self.residual(&minus)) / (2.0 * h);
                jacobian.fixed_view_mut::<3, 1>(0, 6 + k).copy_from(&column);
            }
            jacobian
        });

        Ok((DVector::from_column_slice(residual.as_slice()), jacobian))
    }
}

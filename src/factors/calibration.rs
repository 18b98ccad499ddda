//! Sensor calibration factor.
//!
//! Couples two trajectory poses with the shared offset vertex of one sensor. Every sensor
//! class uses the same factor; they differ only in which offset vertex is referenced and
//! in the fixed secondary displacement `D` between the generalized offset and the
//! physical sensor frame (identity for all but the 3D scanner).
//!
//! # Mathematical Formulation
//!
//! With poses `x₁`, `x₂`, offset `L` and measurement `M`:
//!
//! ```text
//! A = x₁ ∘ L ∘ D
//! B = x₂ ∘ L ∘ D
//! E = M⁻¹ ∘ (A⁻¹ ∘ B)
//! r = [E.x, E.y, E.θ]
//! ```
//!
//! A perfect match gives `E = I` and a zero residual.

use nalgebra::{DMatrix, DVector, Matrix3};

use super::{Factor, se2_at, split_record, write_upper_triangle};
use crate::core::variable::Estimate;
use crate::error::SclamResult;
use crate::manifold::LieGroup;
use crate::manifold::se2::SE2;
use crate::sensor::{MeasurementRole, SensorClass};

/// Relative-motion measurement of one sensor, calibrating that sensor's offset.
#[derive(Debug, Clone)]
pub struct CalibrationFactor {
    /// `[x₁, x₂, offset]`
    vertex_ids: [usize; 3],
    sensor: SensorClass,
    role: MeasurementRole,
    measurement: SE2,
    inverse_measurement: SE2,
    displacement: SE2,
    information: DMatrix<f64>,
}

impl CalibrationFactor {
    /// Create a factor between poses `from` and `to` for `sensor`.
    ///
    /// The offset vertex is the sensor's reserved id. `displacement` is the fixed
    /// transform applied after the offset.
    pub fn new(
        from: usize,
        to: usize,
        sensor: SensorClass,
        role: MeasurementRole,
        measurement: SE2,
        displacement: SE2,
        information: Matrix3<f64>,
    ) -> Self {
        let inverse_measurement = measurement.inverse(None);
        CalibrationFactor {
            vertex_ids: [from, to, sensor.offset_vertex_id()],
            sensor,
            role,
            measurement,
            inverse_measurement,
            displacement,
            information: DMatrix::from_iterator(3, 3, information.iter().copied()),
        }
    }

    /// Store a new measurement and its inverse.
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

    pub fn displacement(&self) -> &SE2 {
        &self.displacement
    }

    pub fn sensor(&self) -> SensorClass {
        self.sensor
    }

    pub fn role(&self) -> MeasurementRole {
        self.role
    }

    pub fn offset_id(&self) -> usize {
        self.vertex_ids[2]
    }

    /// Persistence tag, one per sensor class
    pub fn tag(&self) -> &'static str {
        Self::tag_for(self.sensor)
    }

    pub fn tag_for(sensor: SensorClass) -> &'static str {
        match sensor {
            SensorClass::Sick => "EDGE_SICK_CALIBRATION",
            SensorClass::Velodyne => "EDGE_VELODYNE_CALIBRATION",
            SensorClass::Bumblebee => "EDGE_BUMBLEBEE_CALIBRATION",
        }
    }

    /// Measurement `[x, y, θ]` followed by the information upper triangle
    pub fn write_data(&self) -> Vec<f64> {
        let mut data: Vec<f64> = self.measurement.to_vector().iter().copied().collect();
        data.extend(write_upper_triangle(&self.information));
        data
    }

    /// Rebuild a factor from the output of [`CalibrationFactor::write_data`].
    ///
    /// The information lower triangle is mirrored from the upper one. Persisted factors
    /// carry no role, so they are read back as sequential.
    pub fn read(
        from: usize,
        to: usize,
        sensor: SensorClass,
        displacement: SE2,
        data: &[f64],
    ) -> SclamResult<Self> {
        let (measurement, information) = split_record(data, 3, 3)?;
        let mut factor = Self::new(
            from,
            to,
            sensor,
            MeasurementRole::Sequential,
            SE2::from_slice(measurement)?,
            displacement,
            Matrix3::identity(),
        );
        factor.information = information;
        Ok(factor)
    }

    /// Offset composed with the secondary displacement, `S = L ∘ D`
    fn sensor_frame(&self, offset: &SE2) -> SE2 {
        offset.compose(&self.displacement, None, None)
    }
}

impl Factor for CalibrationFactor {
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
        let offset = se2_at(estimates, &self.vertex_ids, 2)?;

        let sensor_frame = self.sensor_frame(offset);
        let a = x1.compose(&sensor_frame, None, None);
        let b = x2.compose(&sensor_frame, None, None);
        let relative = a.between(&b, None, None);
        let error = self.inverse_measurement.compose(&relative, None, None);
        let residual = error.to_vector();

        let jacobian = if compute_jacobian {
            // ∂E/∂C = I, ∂C/∂A = -Adj(C⁻¹), ∂C/∂B = I
            let j_relative_a = -relative.inverse(None).adjoint();
            let j_a_pose = sensor_frame.inverse(None).adjoint();
            let j_frame_offset = self.displacement.inverse(None).adjoint();
            let j_residual = error.to_vector_jacobian();

            let j_x1 = j_residual * j_relative_a * j_a_pose;
            let j_x2 = j_residual * j_a_pose;
            let j_offset = j_residual * (Matrix3::identity() + j_relative_a) * j_frame_offset;

            let mut jacobian = DMatrix::<f64>::zeros(3, 9);
            jacobian.fixed_view_mut::<3, 3>(0, 0).copy_from(&j_x1);
            jacobian.fixed_view_mut::<3, 3>(0, 3).copy_from(&j_x2);
            jacobian.fixed_view_mut::<3, 3>(0, 6).copy_from(&j_offset);
            Some(jacobian)
        } else {
            None
        };

        Ok((DVector::from_column_slice(residual.as_slice()), jacobian))
    }

    /// `x₂ = x₁ ∘ S ∘ M ∘ S⁻¹`, or `x₁ = x₂ ∘ S ∘ M⁻¹ ∘ S⁻¹`, with `S = L ∘ D`.
    ///
    /// Declines unless the offset is known.
    fn initial_estimate(&self, estimates: &[Option<&Estimate>], target: usize) -> Option<Estimate> {
        let offset = estimates.get(2).copied().flatten()?.as_se2()?;
        let sensor_frame = self.sensor_frame(offset);
        let sensor_frame_inverse = sensor_frame.inverse(None);

        let (known, motion) = match target {
            0 => (estimates.get(1).copied().flatten()?, &self.inverse_measurement),
            1 => (estimates.first().copied().flatten()?, &self.measurement),
            _ => return None,
        };
        let pose = known.as_se2()?;
        Some(Estimate::Se2(
            pose.compose(&sensor_frame, None, None)
                .compose(motion, None, None)
                .compose(&sensor_frame_inverse, None, None),
        ))
    }
}

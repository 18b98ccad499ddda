//! Absolute position factor.
//!
//! Raw GPS fixes carry no reliable heading. The factor keeps the raw fix and a separate
//! synthetic heading that the preprocessing pipeline fills in from neighboring fixes once
//! filtering is done; only the synthetic heading enters the residual.

use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3};

use super::{Factor, se2_at, split_record, write_upper_triangle};
use crate::core::variable::Estimate;
use crate::error::SclamResult;
use crate::manifold::LieGroup;
use crate::manifold::se2::SE2;

/// Unary factor pulling a pose towards a GPS fix.
///
/// ```text
/// G = (x_gps, y_gps, synthetic heading)
/// r = (G⁻¹ ∘ x).to_vector()
/// ```
#[derive(Debug, Clone)]
pub struct GpsFactor {
    vertex_ids: [usize; 1],
    position: Vector2<f64>,
    raw_heading: f64,
    synthetic_heading: f64,
    information: DMatrix<f64>,
}

impl GpsFactor {
    pub const TAG: &'static str = "EDGE_GPS";

    /// Create a factor for pose `pose_id`.
    ///
    /// The position covariance is `(std_dev·std_multiplier)²` on both axes and the
    /// heading covariance `heading_std²`. The synthetic heading starts at the raw one.
    pub fn new(
        pose_id: usize,
        position: Vector2<f64>,
        raw_heading: f64,
        std_dev: f64,
        std_multiplier: f64,
        heading_std: f64,
    ) -> Self {
        let position_var = (std_dev * std_multiplier).powi(2);
        let covariance = Vector3::new(position_var, position_var, heading_std * heading_std);
        let information = Matrix3::from_diagonal(&covariance.map(|v| 1.0 / v));
        GpsFactor {
            vertex_ids: [pose_id],
            position,
            raw_heading,
            synthetic_heading: raw_heading,
            information: DMatrix::from_iterator(3, 3, information.iter().copied()),
        }
    }

    pub fn pose_id(&self) -> usize {
        self.vertex_ids[0]
    }

    pub fn position(&self) -> &Vector2<f64> {
        &self.position
    }

    pub fn raw_heading(&self) -> f64 {
        self.raw_heading
    }

    pub fn synthetic_heading(&self) -> f64 {
        self.synthetic_heading
    }

    pub fn set_synthetic_heading(&mut self, heading: f64) {
        self.synthetic_heading = heading;
    }

    /// Distance between the two fixes
    pub fn distance_to(&self, other: &GpsFactor) -> f64 {
        (other.position - self.position).norm()
    }

    /// The measurement the residual compares against
    pub fn measurement(&self) -> SE2 {
        SE2::from_xy_angle(self.position.x, self.position.y, self.synthetic_heading)
    }

    pub fn write_data(&self) -> Vec<f64> {
        let mut data = vec![self.position.x, self.position.y, self.synthetic_heading];
        data.extend(write_upper_triangle(&self.information));
        data
    }

    /// Read a factor written by [`GpsFactor::write_data`].
    ///
    /// Only the synthetic heading is persisted, so it also becomes the raw heading of
    /// the factor read back.
    pub fn read(pose_id: usize, data: &[f64]) -> SclamResult<Self> {
        let (measurement, information) = split_record(data, 3, 3)?;
        Ok(GpsFactor {
            vertex_ids: [pose_id],
            position: Vector2::new(measurement[0], measurement[1]),
            raw_heading: measurement[2],
            synthetic_heading: measurement[2],
            information,
        })
    }
}

impl Factor for GpsFactor {
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
        let pose = se2_at(estimates, &self.vertex_ids, 0)?;
        let error = self.measurement().inverse(None).compose(pose, None, None);
        let residual = error.to_vector();

        let jacobian = compute_jacobian.then(|| {
            let j = error.to_vector_jacobian();
            DMatrix::from_iterator(3, 3, j.iter().copied())
        });
        Ok((DVector::from_column_slice(residual.as_slice()), jacobian))
    }

    /// A fix seeds its pose directly.
    fn initial_estimate(&self, _estimates: &[Option<&Estimate>], target: usize) -> Option<Estimate> {
        (target == 0).then(|| Estimate::Se2(self.measurement()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_from_std() {
        let factor = GpsFactor::new(7, Vector2::new(1.0, 2.0), 0.0, 0.5, 2.0, 0.1);
        let info = factor.information();
        assert!((info[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((info[(1, 1)] - 1.0).abs() < 1e-12);
        assert!((info[(2, 2)] - 100.0).abs() < 1e-9);
        assert_eq!(factor.pose_id(), 7);
    }

    #[test]
    fn test_residual_uses_synthetic_heading() -> SclamResult<()> {
        let mut factor = GpsFactor::new(0, Vector2::new(4.0, -2.0), 3.0, 1.0, 1.0, 0.5);
        factor.set_synthetic_heading(0.25);
        assert_eq!(factor.raw_heading(), 3.0);

        let pose = Estimate::Se2(SE2::from_xy_angle(4.0, -2.0, 0.25));
        let (residual, jacobian) = factor.linearize(&[&pose], true)?;
        assert!(residual.norm() < 1e-12);
        assert_eq!(jacobian.map(|j| j.shape()), Some((3, 3)));
        Ok(())
    }

    #[test]
    fn test_read_write() -> SclamResult<()> {
        let mut factor = GpsFactor::new(3, Vector2::new(10.0, 20.0), 0.0, 0.8, 1.5, 0.2);
        factor.set_synthetic_heading(-1.0);
        let read = GpsFactor::read(3, &factor.write_data())?;
        assert_eq!(read.synthetic_heading(), -1.0);
        assert_eq!(read.raw_heading(), -1.0);
        assert_eq!(read.position(), factor.position());
        // position variance (0.8 * 1.5)²
        assert!((read.information()[(0, 0)] - 1.0 / 1.44).abs() < 1e-12);
        assert_eq!(read.information(), factor.information());
        Ok(())
    }
}

//! Inertial yaw factor.

use nalgebra::{DMatrix, DVector};

use super::{Factor, se2_at, split_record, write_upper_triangle};
use crate::core::variable::Estimate;
use crate::error::SclamResult;
use crate::manifold::se2::normalize_angle;

/// Unary factor on the heading of one pose, `r = normalize(θ - yaw)`.
#[derive(Debug, Clone)]
pub struct HeadingFactor {
    vertex_ids: [usize; 1],
    yaw: f64,
    information: DMatrix<f64>,
}

impl HeadingFactor {
    pub const TAG: &'static str = "EDGE_HEADING";

    /// `std_dev` is squared into the variance; the information is its inverse.
    pub fn new(pose_id: usize, yaw: f64, std_dev: f64) -> Self {
        HeadingFactor {
            vertex_ids: [pose_id],
            yaw,
            information: DMatrix::from_element(1, 1, 1.0 / (std_dev * std_dev)),
        }
    }

    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn write_data(&self) -> Vec<f64> {
        let mut data = vec![self.yaw];
        data.extend(write_upper_triangle(&self.information));
        data
    }

    pub fn read(pose_id: usize, data: &[f64]) -> SclamResult<Self> {
        let (measurement, information) = split_record(data, 1, 1)?;
        Ok(HeadingFactor {
            vertex_ids: [pose_id],
            yaw: measurement[0],
            information,
        })
    }
}

impl Factor for HeadingFactor {
    fn vertex_ids(&self) -> &[usize] {
        &self.vertex_ids
    }

    fn dimension(&self) -> usize {
        1
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
        let residual = DVector::from_element(1, normalize_angle(pose.angle() - self.yaw));
        let jacobian =
            compute_jacobian.then(|| DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 1.0]));
        Ok((residual, jacobian))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::se2::SE2;
    use std::f64::consts::PI;

    #[test]
    fn test_residual_wraps() -> SclamResult<()> {
        let factor = HeadingFactor::new(0, PI - 0.05, 0.1);
        let pose = Estimate::Se2(SE2::from_xy_angle(0.0, 0.0, -PI + 0.05));
        let (residual, _) = factor.linearize(&[&pose], false)?;
        assert!((residual[0] - 0.1).abs() < 1e-9);
        assert!((factor.information()[(0, 0)] - 100.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_read_write() -> SclamResult<()> {
        let factor = HeadingFactor::new(4, 0.3, 0.5);
        let read = HeadingFactor::read(4, &factor.write_data())?;
        assert_eq!(read.yaw(), 0.3);
        assert_eq!(read.information(), factor.information());
        Ok(())
    }
}

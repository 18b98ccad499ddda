use nalgebra::DVector;

use crate::manifold::se2::{SE2, SE2Tangent};
use crate::manifold::LieGroup;
use crate::sensor::SourceKind;

/// Capability tag deciding how a vertex is treated by each scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableRole {
    /// Vehicle pose at one timestamped event
    Pose,
    /// Extrinsic vehicle-to-sensor offset
    SensorOffset,
    /// Odometry correction parameters of one trajectory window
    OdometryBias,
}

/// Output-routing attribute of a pose vertex. Not used by the optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseStamp {
    pub timestamp: f64,
    pub source: SourceKind,
}

/// The value a vertex holds
#[derive(Clone, Debug, PartialEq)]
pub enum Estimate {
    /// SE(2) rigid transform, updated on the right through the exponential map
    Se2(SE2),
    /// Euclidean vector, updated additively
    Vector(DVector<f64>),
}

impl Estimate {
    /// Tangent-space dimension
    pub fn dimension(&self) -> usize {
        match self {
            Estimate::Se2(_) => SE2::DOF,
            Estimate::Vector(v) => v.len(),
        }
    }

    /// Apply a tangent-space increment of length [`Estimate::dimension`].
    pub fn plus(&self, delta: &[f64]) -> Estimate {
        match self {
            Estimate::Se2(pose) => {
                let tangent = SE2Tangent::from_components(delta[0], delta[1], delta[2]);
                Estimate::Se2(pose.right_plus(&tangent))
            }
            Estimate::Vector(v) => {
                Estimate::Vector(DVector::from_iterator(
                    v.len(),
                    v.iter().zip(delta).map(|(a, b)| a + b),
                ))
            }
        }
    }

    pub fn as_se2(&self) -> Option<&SE2> {
        match self {
            Estimate::Se2(pose) => Some(pose),
            Estimate::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&DVector<f64>> {
        match self {
            Estimate::Vector(v) => Some(v),
            Estimate::Se2(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Estimate::Se2(_) => "SE2",
            Estimate::Vector(_) => "vector",
        }
    }
}

/// A graph vertex: estimate plus the flags the scheduler toggles per phase.
#[derive(Clone, Debug)]
pub struct Vertex {
    id: usize,
    pub estimate: Estimate,
    role: VariableRole,
    stamp: Option<PoseStamp>,
    fixed: bool,
    marginalized: bool,
}

impl Vertex {
    pub fn new(id: usize, estimate: Estimate, role: VariableRole) -> Self {
        Vertex {
            id,
            estimate,
            role,
            stamp: None,
            fixed: false,
            marginalized: false,
        }
    }

    pub fn pose(id: usize, pose: SE2, stamp: PoseStamp) -> Self {
        Vertex {
            stamp: Some(stamp),
            ..Self::new(id, Estimate::Se2(pose), VariableRole::Pose)
        }
    }

    pub fn sensor_offset(id: usize, offset: SE2) -> Self {
        Self::new(id, Estimate::Se2(offset), VariableRole::SensorOffset)
    }

    pub fn odometry_bias(id: usize, params: DVector<f64>) -> Self {
        Self::new(id, Estimate::Vector(params), VariableRole::OdometryBias)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn role(&self) -> VariableRole {
        self.role
    }

    pub fn stamp(&self) -> Option<&PoseStamp> {
        self.stamp.as_ref()
    }

    pub fn dimension(&self) -> usize {
        self.estimate.dimension()
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    pub fn is_marginalized(&self) -> bool {
        self.marginalized
    }

    pub fn set_marginalized(&mut self, marginalized: bool) {
        self.marginalized = marginalized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_plus_is_additive() {
        let estimate = Estimate::Vector(DVector::from_vec(vec![1.0, 1.0, 0.0]));
        let updated = estimate.plus(&[0.5, -0.25, 0.1]);
        assert_eq!(
            updated,
            Estimate::Vector(DVector::from_vec(vec![1.5, 0.75, 0.1]))
        );
    }

    #[test]
    fn test_se2_plus_moves_in_body_frame() {
        let estimate = Estimate::Se2(SE2::from_xy_angle(1.0, 0.0, std::f64::consts::FRAC_PI_2));
        let updated = estimate.plus(&[1.0, 0.0, 0.0]);
        let pose = updated.as_se2().cloned().unwrap_or_else(SE2::identity);
        assert!((pose.x() - 1.0).abs() < 1e-12);
        assert!((pose.y() - 1.0).abs() < 1e-12);
        assert_eq!(updated.dimension(), 3);
    }

    #[test]
    fn test_vertex_roles_and_flags() {
        let stamp = PoseStamp {
            timestamp: 12.5,
            source: SourceKind::Velodyne,
        };
        let mut pose = Vertex::pose(10, SE2::identity(), stamp);
        assert_eq!(pose.role(), VariableRole::Pose);
        assert_eq!(pose.stamp().map(|s| s.source), Some(SourceKind::Velodyne));
        assert!(!pose.is_fixed());
        pose.set_fixed(true);
        pose.set_marginalized(true);
        assert!(pose.is_fixed() && pose.is_marginalized());

        let bias = Vertex::odometry_bias(3, DVector::from_vec(vec![1.0, 1.0, 0.0]));
        assert_eq!(bias.role(), VariableRole::OdometryBias);
        assert!(bias.stamp().is_none());
    }
}

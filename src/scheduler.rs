//! Alternating optimization scheduler.
//!
//! Each outer round runs two bounded solver calls:
//!
//! - **pose phase**: poses free; sensor offsets and bias windows fixed and marginalized,
//! - **calibration phase**: offsets and bias windows free; poses fixed and marginalized.
//!   Every odometry-calibration factor first takes its measurement from the current
//!   pose estimates.
//!
//! After the calibration phase, each plain odometry factor is reset to the motion its raw
//! inputs produce under the freshly estimated bias, so the next pose phase sees the
//! corrected odometry. The scheduler runs a fixed number of rounds and never exits early.

use std::fmt;
use tracing::{debug, info};

use crate::config::SclamConfig;
use crate::core::graph::Graph;
use crate::core::variable::VariableRole;
use crate::error::SclamResult;
use crate::factors::{CalibrationEdge, Factor, se2_at};
use crate::manifold::se2::SE2;
use crate::optimizer::OptimizationSummary;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Trajectory estimation
    Pose,
    /// Offset and bias estimation
    Calibration,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pose => write!(f, "pose"),
            Phase::Calibration => write!(f, "calibration"),
        }
    }
}

/// Solver summaries of one outer round
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub round: usize,
    pub pose: OptimizationSummary,
    pub calibration: OptimizationSummary,
}

/// Runs the pose and calibration phases for a fixed number of rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlternatingScheduler {
    pub outer_rounds: usize,
    pub pose_iterations: usize,
    pub calibration_iterations: usize,
}

impl AlternatingScheduler {
    pub fn new(outer_rounds: usize, pose_iterations: usize, calibration_iterations: usize) -> Self {
        AlternatingScheduler {
            outer_rounds,
            pose_iterations,
            calibration_iterations,
        }
    }

    pub fn from_config(config: &SclamConfig) -> Self {
        Self::new(
            config.outer_iterations,
            config.inner_pose_iterations,
            config.inner_odom_calib_iterations,
        )
    }

    /// Run every round on `graph`.
    pub fn run(&self, graph: &mut Graph<CalibrationEdge>) -> SclamResult<Vec<RoundSummary>> {
        graph.clear_robust_kernels();

        let mut rounds = Vec::with_capacity(self.outer_rounds);
        for round in 1..=self.outer_rounds {
            info!(
                "Round {}/{}: pose phase with {} vertices",
                round,
                self.outer_rounds,
                graph.num_vertices()
            );
            Self::enter_phase(graph, Phase::Pose)?;
            let pose = graph.optimize(self.pose_iterations)?;
            info!("Pose phase: {}", summary_line(&pose));

            info!(
                "Round {}/{}: calibration phase with {} vertices",
                round,
                self.outer_rounds,
                graph.num_vertices()
            );
            Self::enter_phase(graph, Phase::Calibration)?;
            let calibration = graph.optimize(self.calibration_iterations)?;
            info!("Calibration phase: {}", summary_line(&calibration));

            let reset = reset_odometry_measurements(graph)?;
            debug!("Reset {} odometry measurements from the bias estimates", reset);

            rounds.push(RoundSummary {
                round,
                pose,
                calibration,
            });
        }
        info!("Optimization done after {} rounds", self.outer_rounds);
        Ok(rounds)
    }

    /// Toggle the vertex flags for `phase` and prepare the graph for the solver.
    pub fn enter_phase(graph: &mut Graph<CalibrationEdge>, phase: Phase) -> SclamResult<()> {
        let parameters_held = phase == Phase::Pose;
        graph.set_role_flags(VariableRole::Pose, !parameters_held, !parameters_held);
        graph.set_role_flags(VariableRole::SensorOffset, parameters_held, parameters_held);
        graph.set_role_flags(VariableRole::OdometryBias, parameters_held, parameters_held);
        graph.initialize_optimization();

        if phase == Phase::Calibration {
            let regenerated = regenerate_calibration_measurements(graph)?;
            debug!("Regenerated {} odometry calibration measurements", regenerated);
        }
        graph.compute_active_errors()?;
        debug!("Entering {} phase, chi2 {:.6e}", phase, graph.active_chi2());
        Ok(())
    }
}

fn summary_line(summary: &OptimizationSummary) -> String {
    format!(
        "{} after {} iterations, cost {:.6e} -> {:.6e}",
        summary.status, summary.iterations, summary.initial_cost, summary.final_cost
    )
}

/// Set every odometry-calibration measurement to the relative motion between the current
/// estimates of its two poses. Returns the number of factors updated.
pub fn regenerate_calibration_measurements(
    graph: &mut Graph<CalibrationEdge>,
) -> SclamResult<usize> {
    let mut snapshots: Vec<(usize, SE2, SE2)> = Vec::new();
    for (index, edge) in graph.edges().iter().enumerate() {
        let CalibrationEdge::OdometryCalibration(factor) = &edge.factor else {
            continue;
        };
        let ids = factor.vertex_ids();
        let estimates = [ids[0], ids[1]].map(|id| graph.vertex(id).map(|v| &v.estimate));
        let [Some(from), Some(to)] = estimates else {
            continue;
        };
        let poses = [from, to];
        let x1 = se2_at(&poses, ids, 0)?.clone();
        let x2 = se2_at(&poses, ids, 1)?.clone();
        snapshots.push((index, x1, x2));
    }

    let updated = snapshots.len();
    for (index, x1, x2) in snapshots {
        if let Some(edge) = graph.edge_mut(index) {
            if let CalibrationEdge::OdometryCalibration(factor) = &mut edge.factor {
                factor.regenerate_measurement(&x1, &x2);
            }
        }
    }
    Ok(updated)
}

/// Replay every odometry record through its window's current bias and write the result
/// into the paired plain odometry factor. Returns the number of factors updated.
pub fn reset_odometry_measurements(graph: &mut Graph<CalibrationEdge>) -> SclamResult<usize> {
    let mut corrected: Vec<(usize, SE2)> = Vec::new();
    for edge in graph.edges() {
        let CalibrationEdge::OdometryCalibration(factor) = &edge.factor else {
            continue;
        };
        let (Some(paired), Some(bias)) = (
            factor.paired_edge(),
            graph
                .vertex(factor.bias_id())
                .and_then(|v| v.estimate.as_vector()),
        ) else {
            continue;
        };
        corrected.push((paired, factor.corrected_motion(bias)?));
    }

    let mut updated = 0;
    for (index, motion) in corrected {
        if let Some(edge) = graph.edge_mut(index) {
            if let CalibrationEdge::Odometry(factor) = &mut edge.factor {
                factor.set_measurement(motion);
                updated += 1;
            }
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::GraphError;
    use crate::core::loss_functions::HuberLoss;
    use crate::core::variable::{Estimate, PoseStamp, Vertex};
    use crate::factors::odometry::neutral_bias;
    use crate::factors::{
        AckermanModel, OdometryCalibrationFactor, OdometryFactor, OdometryInputs,
    };
    use crate::manifold::LieGroup;
    use crate::sensor::SourceKind;
    use nalgebra::{DVector, Matrix3};

    fn stamp() -> PoseStamp {
        PoseStamp {
            timestamp: 0.0,
            source: SourceKind::Odometry,
        }
    }

    /// Two poses, one offset, one bias window and one odometry pair.
    fn odometry_graph() -> SclamResult<Graph<CalibrationEdge>> {
        let mut graph = Graph::new();
        graph.add_vertex(Vertex::sensor_offset(0, SE2::identity()))?;
        graph.add_vertex(Vertex::odometry_bias(3, neutral_bias()))?;
        graph.add_vertex(Vertex::pose(5, SE2::identity(), stamp()))?;
        graph.add_vertex(Vertex::pose(6, SE2::from_xy_angle(2.0, 0.0, 0.0), stamp()))?;

        let motion = SE2::from_xy_angle(1.0, 0.0, 0.0);
        let plain =
            graph.add_edge(OdometryFactor::new(5, 6, motion.clone(), Matrix3::identity()).into())?;
        let mut calibration = OdometryCalibrationFactor::new(
            5,
            6,
            3,
            OdometryInputs {
                velocity: 10.0,
                steering_angle: 0.0,
                elapsed_time: 0.1,
            },
            AckermanModel::default(),
            motion,
            Matrix3::identity(),
        );
        calibration.set_paired_edge(plain);
        graph.add_edge(calibration.into())?;
        Ok(graph)
    }

    #[test]
    fn test_phase_flags() -> SclamResult<()> {
        let mut graph = odometry_graph()?;

        AlternatingScheduler::enter_phase(&mut graph, Phase::Pose)?;
        let flags = |graph: &Graph<CalibrationEdge>, id| {
            graph.vertex(id).map(|v| (v.is_fixed(), v.is_marginalized()))
        };
        assert_eq!(flags(&graph, 5), Some((false, false)));
        assert_eq!(flags(&graph, 0), Some((true, true)));
        assert_eq!(flags(&graph, 3), Some((true, true)));

        AlternatingScheduler::enter_phase(&mut graph, Phase::Calibration)?;
        assert_eq!(flags(&graph, 5), Some((true, true)));
        assert_eq!(flags(&graph, 0), Some((false, false)));
        assert_eq!(flags(&graph, 3), Some((false, false)));
        Ok(())
    }

    #[test]
    fn test_calibration_phase_regenerates_measurements() -> SclamResult<()> {
        let mut graph = odometry_graph()?;
        AlternatingScheduler::enter_phase(&mut graph, Phase::Calibration)?;
        let CalibrationEdge::OdometryCalibration(factor) = &graph.edges()[1].factor else {
            panic!("expected the odometry calibration factor");
        };
        assert!(factor.measurement().is_approx(&SE2::from_xy_angle(2.0, 0.0, 0.0), 1e-12));
        assert!(
            factor
                .inverse_measurement()
                .is_approx(&SE2::from_xy_angle(-2.0, 0.0, 0.0), 1e-12)
        );
        Ok(())
    }

    #[test]
    fn test_reset_uses_the_bias_estimate() -> SclamResult<()> {
        let mut graph = odometry_graph()?;
        graph.set_estimate(3, Estimate::Vector(DVector::from_vec(vec![2.0, 1.0, 0.0])))?;
        assert_eq!(reset_odometry_measurements(&mut graph)?, 1);

        let CalibrationEdge::Odometry(factor) = &graph.edges()[0].factor else {
            panic!("expected the plain odometry factor");
        };
        assert!(factor.measurement().is_approx(&SE2::from_xy_angle(2.0, 0.0, 0.0), 1e-12));
        Ok(())
    }

    #[test]
    fn test_calibration_phase_fits_the_velocity_multiplier() -> SclamResult<()> {
        let mut graph = odometry_graph()?;
        AlternatingScheduler::enter_phase(&mut graph, Phase::Calibration)?;
        graph.optimize(20)?;

        let bias = graph
            .vertex(3)
            .and_then(|v| v.estimate.as_vector())
            .cloned()
            .ok_or(GraphError::UnknownVertex { id: 3 })?;
        assert!((bias[0] - 2.0).abs() < 1e-4, "velocity multiplier {}", bias[0]);
        assert!(bias[2].abs() < 1e-6);

        reset_odometry_measurements(&mut graph)?;
        let CalibrationEdge::Odometry(factor) = &graph.edges()[0].factor else {
            panic!("expected the plain odometry factor");
        };
        assert!(factor.measurement().is_approx(&SE2::from_xy_angle(2.0, 0.0, 0.0), 1e-4));
        Ok(())
    }

    #[test]
    fn test_run_agrees_with_consistent_odometry() -> SclamResult<()> {
        let mut graph = odometry_graph()?;
        let rounds = AlternatingScheduler::new(2, 10, 10).run(&mut graph)?;
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[1].round, 2);

        let pose = |id| {
            graph
                .vertex(id)
                .and_then(|v| v.estimate.as_se2())
                .cloned()
                .ok_or(GraphError::UnknownVertex { id })
        };
        let relative = pose(5)?.between(&pose(6)?, None, None);
        assert!((relative.x() - 1.0).abs() < 1e-6);

        let bias = graph
            .vertex(3)
            .and_then(|v| v.estimate.as_vector())
            .cloned()
            .ok_or(GraphError::UnknownVertex { id: 3 })?;
        assert!((bias[0] - 1.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_run_drops_robust_kernels() -> SclamResult<()> {
        let mut graph = odometry_graph()?;
        graph.set_robust_kernel(0, Some(Box::new(HuberLoss::new(1.0)?)))?;
        assert!(graph.edges()[0].robust_kernel().is_some());

        AlternatingScheduler::new(1, 5, 5).run(&mut graph)?;
        assert!(graph.edges().iter().all(|e| e.robust_kernel().is_none()));
        Ok(())
    }

    #[test]
    fn test_zero_rounds_leave_the_graph_untouched() -> SclamResult<()> {
        let mut graph = odometry_graph()?;
        let rounds = AlternatingScheduler::new(0, 5, 5).run(&mut graph)?;
        assert!(rounds.is_empty());
        assert!(graph.vertex(5).is_some_and(|v| !v.is_fixed()));
        Ok(())
    }
}

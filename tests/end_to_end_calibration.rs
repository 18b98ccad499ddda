//! End-to-end calibration on a synthetic Ackerman trajectory.
//!
//! The vehicle drives a winding path generated by the Ackerman model with neutral bias,
//! so the odometry records are exact. The 2D scanner observes the same motion through
//! an offset that differs from its nominal value.

use hypergraph_sclam::SclamResult;
use hypergraph_sclam::assembler::{Assembly, GraphAssembler};
use hypergraph_sclam::config::SclamConfig;
use hypergraph_sclam::core::{Estimate, PoseStamp, VariableRole};
use hypergraph_sclam::factors::{AckermanModel, OdometryInputs};
use hypergraph_sclam::io::{CalibrationReport, StreamRecord};
use hypergraph_sclam::manifold::LieGroup;
use hypergraph_sclam::manifold::se2::SE2;
use hypergraph_sclam::scheduler::{AlternatingScheduler, Phase};
use hypergraph_sclam::sensor::{MeasurementRole, SensorClass, SourceKind};

const POSES: usize = 10;

fn true_offset() -> SE2 {
    SE2::from_xy_angle(3.40, 0.10, 0.03)
}

fn config() -> SclamConfig {
    SclamConfig {
        use_sick_seq: true,
        use_sick_loop: true,
        ..SclamConfig::default()
    }
}

fn inputs(k: usize) -> OdometryInputs {
    OdometryInputs {
        velocity: 2.0,
        steering_angle: 0.2 * (0.7 * k as f64).sin() + 0.05,
        elapsed_time: 0.5,
    }
}

fn trajectory(model: &AckermanModel) -> Vec<SE2> {
    let mut poses = vec![SE2::from_xy_angle(0.0, 0.0, 0.0)];
    for k in 0..POSES - 1 {
        let motion = model.motion(&inputs(k), &[1.0, 1.0, 0.0]);
        let next = poses[k].compose(&motion, None, None);
        poses.push(next);
    }
    poses
}

/// Motion of the sensor frame between two vehicle poses
fn sensor_motion(from: &SE2, to: &SE2, offset: &SE2) -> SE2 {
    let a = from.compose(offset, None, None);
    let b = to.compose(offset, None, None);
    a.between(&b, None, None)
}

fn stream(with_sensor: bool, pose_noise: f64) -> Vec<StreamRecord> {
    let model = AckermanModel::new(config().axle_distance);
    let poses = trajectory(&model);
    let offset = true_offset();

    let mut records = Vec::new();
    for (id, pose) in poses.iter().enumerate() {
        let perturbation = SE2::from_xy_angle(pose_noise, -pose_noise, pose_noise * 0.1);
        records.push(StreamRecord::Vertex {
            id,
            pose: pose.compose(&perturbation, None, None),
            stamp: PoseStamp {
                timestamp: id as f64 * 0.5,
                source: SourceKind::Sick,
            },
        });
    }
    for k in 0..POSES - 1 {
        records.push(StreamRecord::Odometry {
            from: k,
            to: k + 1,
            motion: poses[k].between(&poses[k + 1], None, None),
            inputs: inputs(k),
        });
    }
    if with_sensor {
        for k in 0..POSES - 1 {
            records.push(StreamRecord::Sensor {
                sensor: SensorClass::Sick,
                role: MeasurementRole::Sequential,
                from: k,
                to: k + 1,
                motion: sensor_motion(&poses[k], &poses[k + 1], &offset),
            });
        }
        records.push(StreamRecord::Sensor {
            sensor: SensorClass::Sick,
            role: MeasurementRole::LoopClosure,
            from: 0,
            to: POSES - 1,
            motion: sensor_motion(&poses[0], &poses[POSES - 1], &offset),
        });
    }
    records
}

fn assemble(records: &[StreamRecord]) -> SclamResult<(Assembly, usize)> {
    let assembler = GraphAssembler::new(config())?;
    let first_pose = assembler.pose_id(0);
    Ok((assembler.assemble(records)?, first_pose))
}

fn sick_offset(assembly: &Assembly) -> Option<SE2> {
    assembly
        .graph
        .vertex(SensorClass::Sick.offset_vertex_id())
        .and_then(|v| v.estimate.as_se2())
        .cloned()
}

fn offset_error(estimate: &SE2, truth: &SE2) -> f64 {
    (estimate.x() - truth.x())
        .abs()
        .max((estimate.y() - truth.y()).abs())
        .max((estimate.angle() - truth.angle()).abs())
}

#[test]
fn test_calibration_phase_recovers_sensor_offset() -> Result<(), Box<dyn std::error::Error>> {
    let (mut assembly, _) = assemble(&stream(true, 0.0))?;
    let nominal = sick_offset(&assembly).ok_or("missing sick offset")?;
    assert!(offset_error(&nominal, &true_offset()) > 0.1);

    AlternatingScheduler::enter_phase(&mut assembly.graph, Phase::Calibration)?;
    assembly.graph.optimize(50)?;

    let estimate = sick_offset(&assembly).ok_or("missing sick offset")?;
    assert!(
        offset_error(&estimate, &true_offset()) < 1e-4,
        "offset {estimate} does not match {}",
        true_offset()
    );

    let report = CalibrationReport::from_graph(&assembly.graph);
    assert_eq!(report.biases.len(), 1);
    let bias = &report.biases[0].1;
    assert!((bias[0] - 1.0).abs() < 1e-6);
    assert!((bias[1] - 1.0).abs() < 1e-6);
    assert!(bias[2].abs() < 1e-6);
    Ok(())
}

#[test]
fn test_alternating_rounds_recover_sensor_offset() -> Result<(), Box<dyn std::error::Error>> {
    let (mut assembly, _) = assemble(&stream(true, 0.0))?;
    let nominal = sick_offset(&assembly).ok_or("missing sick offset")?;
    assert!(nominal.is_approx(&SensorClass::Sick.nominal_offset(), 1e-12));

    let rounds = AlternatingScheduler::new(50, 20, 10).run(&mut assembly.graph)?;
    assert_eq!(rounds.len(), 50);

    let estimate = sick_offset(&assembly).ok_or("missing sick offset")?;
    assert!(
        offset_error(&estimate, &true_offset()) < 1e-4,
        "offset {estimate} does not match {}",
        true_offset()
    );
    assert!(assembly.graph.active_chi2() < 1e-5, "chi2 {}", assembly.graph.active_chi2());
    Ok(())
}

#[test]
fn test_consistent_graph_is_a_fixed_point() -> Result<(), Box<dyn std::error::Error>> {
    let (mut assembly, first_pose) = assemble(&stream(true, 0.0))?;
    assembly
        .graph
        .set_estimate(SensorClass::Sick.offset_vertex_id(), Estimate::Se2(true_offset()))?;
    let before: Vec<SE2> = (0..POSES)
        .filter_map(|k| assembly.graph.vertex(first_pose + k))
        .filter_map(|v| v.estimate.as_se2().cloned())
        .collect();
    assert_eq!(before.len(), POSES);

    let rounds = AlternatingScheduler::new(3, 10, 10).run(&mut assembly.graph)?;
    assert_eq!(rounds.len(), 3);
    for round in &rounds {
        assert!(round.calibration.final_cost < 1e-8);
    }

    for (k, expected) in before.iter().enumerate() {
        let pose = assembly
            .graph
            .vertex(first_pose + k)
            .and_then(|v| v.estimate.as_se2())
            .ok_or("missing pose")?;
        assert!(offset_error(pose, expected) < 1e-6, "pose {k} moved to {pose}");
    }
    let estimate = sick_offset(&assembly).ok_or("missing sick offset")?;
    assert!(offset_error(&estimate, &true_offset()) < 1e-6);
    assert!(assembly.graph.active_chi2() < 1e-8);
    Ok(())
}

#[test]
fn test_reseed_propagates_odometry_from_the_first_pose() -> Result<(), Box<dyn std::error::Error>>
{
    let (mut assembly, first_pose) = assemble(&stream(false, 0.5))?;
    let truth = trajectory(&AckermanModel::new(config().axle_distance));

    let seeded = assembly.graph.compute_initial_guess(&[first_pose])?;
    assert_eq!(seeded, POSES - 1);

    for (k, expected) in truth.iter().enumerate().skip(1) {
        let pose = assembly
            .graph
            .vertex(first_pose + k)
            .and_then(|v| v.estimate.as_se2())
            .ok_or("missing pose")?;
        // Pose 0 kept its perturbation and every other pose inherits it.
        let perturbation = SE2::from_xy_angle(0.5, -0.5, 0.05);
        let expected = truth[0]
            .compose(&perturbation, None, None)
            .compose(&truth[0].between(expected, None, None), None, None);
        assert!(offset_error(pose, &expected) < 1e-9, "pose {k} seeded to {pose}");
    }
    Ok(())
}

#[test]
fn test_parameter_vertices_keep_their_roles() -> SclamResult<()> {
    let (assembly, _) = assemble(&stream(true, 0.0))?;
    let statistics = assembly.graph.statistics();
    assert_eq!(statistics.num_sensor_offsets, 3);
    assert_eq!(statistics.num_odometry_biases, 1);

    let roles: Vec<VariableRole> = assembly.graph.vertices().map(|v| v.role()).collect();
    assert_eq!(
        roles.iter().filter(|r| **r == VariableRole::Pose).count(),
        POSES
    );
    Ok(())
}

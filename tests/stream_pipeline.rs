//! Stream file to output files, through assembly, GPS filtering, persistence and the
//! alternating optimization.

use std::fmt::Write as _;
use std::fs;

use hypergraph_sclam::assembler::GraphAssembler;
use hypergraph_sclam::config::SclamConfig;
use hypergraph_sclam::io::{CalibrationReport, HypergraphFile, OutputWriter, StreamReader};
use hypergraph_sclam::manifold::LieGroup;
use hypergraph_sclam::manifold::se2::SE2;
use hypergraph_sclam::scheduler::AlternatingScheduler;
use hypergraph_sclam::sensor::{SensorClass, SourceKind};
use tempfile::tempdir;

const POSES: usize = 60;
const ORIGIN: (f64, f64) = (7757000.0, -363000.0);

const CONFIG: &str = "\
# straight drive with GPS and the 3D scanner
USE_GPS
USE_VELODYNE_SEQ
OPTIMIZER_OUTER_ITERATIONS 2
OPTIMIZER_INNER_POSE_ITERATIONS 5
OPTIMIZER_INNER_ODOM_CALIB_ITERATIONS 5
";

/// A straight one-meter-per-record drive along x, observed consistently by every source.
fn stream_text(config: &SclamConfig) -> String {
    let step = SE2::from_xy_angle(1.0, 0.0, 0.0);
    let sensor_frame = SensorClass::Velodyne
        .nominal_offset()
        .compose(&config.displacement(SensorClass::Velodyne), None, None);
    let scan_motion = sensor_frame
        .inverse(None)
        .compose(&step, None, None)
        .compose(&sensor_frame, None, None);

    let mut text = String::new();
    let _ = writeln!(text, "GPS_ORIGIN {} {}", ORIGIN.0, ORIGIN.1);
    let _ = writeln!(text, "VERTICES_QUANTITY {}", POSES - 1);
    for i in 0..POSES {
        let source = if i % 2 == 0 {
            SourceKind::Velodyne
        } else {
            SourceKind::Odometry
        };
        let _ = writeln!(
            text,
            "VERTEX {i} {}.0 0.0 0.0 {}.5 {}",
            i,
            1500000000 + i,
            source.code()
        );
        let _ = writeln!(text, "GPS_EDGE {i} {}.0 0.0 0.0 1.0", i);
    }
    for i in 0..POSES - 1 {
        let _ = writeln!(text, "ODOM_EDGE {i} {} 1.0 0.0 0.0 2.0 0.0 0.5", i + 1);
        let _ = writeln!(
            text,
            "VELODYNE_SEQ {i} {} {} {} {}",
            i + 1,
            scan_motion.x(),
            scan_motion.y(),
            scan_motion.angle()
        );
        // disabled in the configuration
        let _ = writeln!(text, "SICK_SEQ {i} {} 1.0 0.0 0.0", i + 1);
    }
    text
}

#[test]
fn test_stream_to_outputs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = dir.path().join("optimization_config.txt");
    fs::write(&config_path, CONFIG)?;
    let config = SclamConfig::load(&config_path)?;
    assert!(config.use_gps && config.use_velodyne_seq && !config.use_sick_seq);
    assert_eq!(config.outer_iterations, 2);

    let stream_path = dir.path().join("sync.txt");
    fs::write(&stream_path, stream_text(&config))?;
    let records = StreamReader::load(&stream_path)?;
    assert_eq!(records.len(), 2 + 2 * POSES + 3 * (POSES - 1));

    let assembly = GraphAssembler::new(config.clone())?.assemble(&records)?;
    assert_eq!(assembly.counts.poses, POSES);
    assert_eq!(assembly.counts.odometry, POSES - 1);
    assert_eq!(assembly.counts.sensor, POSES - 1);
    assert_eq!(assembly.counts.ignored_sensor, POSES - 1);
    assert_eq!(assembly.gps_fixes.len(), POSES);
    assert!(assembly.gps_fixes.iter().all(|f| f.synthetic_heading().abs() < 1e-12));
    assert_eq!(
        assembly.graph.num_edges(),
        2 * (POSES - 1) + (POSES - 1) + POSES
    );

    let saved = dir.path().join("hypergraph.txt");
    HypergraphFile::save(&assembly.graph, &saved)?;
    let mut graph = HypergraphFile::load(&saved, &config.factor_registry())?;
    assert_eq!(graph.num_vertices(), assembly.graph.num_vertices());
    assert_eq!(graph.num_edges(), assembly.graph.num_edges());

    let rounds = AlternatingScheduler::from_config(&config).run(&mut graph)?;
    assert_eq!(rounds.len(), 2);
    assert!(graph.active_chi2() < 1e-6, "chi2 {}", graph.active_chi2());

    let writer = OutputWriter::new(dir.path().join("poses"), assembly.origin);
    assert_eq!(writer.write_poses(&graph)?, POSES);
    writer.write_fake_gps(&assembly.gps_fixes)?;

    let all = fs::read_to_string(dir.path().join("poses.txt"))?;
    assert_eq!(all.lines().count(), POSES);
    let first: Vec<f64> = all
        .lines()
        .next()
        .ok_or("empty pose file")?
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()?;
    assert_eq!(first.len(), 6);
    assert!((first[0] - ORIGIN.0).abs() < 1e-3);
    assert!((first[1] - ORIGIN.1).abs() < 1e-3);
    assert!((first[4] - 0.05).abs() < 1e-3);

    let velodyne = fs::read_to_string(dir.path().join("poses_velodyne.txt"))?;
    assert_eq!(velodyne.lines().count(), POSES / 2);
    assert!(fs::read_to_string(dir.path().join("poses_sick.txt"))?.is_empty());

    let fake_gps = fs::read_to_string(dir.path().join("poses_fake_gps.txt"))?;
    assert_eq!(fake_gps.lines().count(), POSES);

    let report = CalibrationReport::from_graph(&graph);
    assert_eq!(report.offsets.len(), 3);
    let (_, velodyne_offset) = report
        .offsets
        .iter()
        .find(|(sensor, _)| *sensor == SensorClass::Velodyne)
        .ok_or("missing velodyne offset")?;
    assert!((velodyne_offset.x() - 0.572).abs() < 1e-3);
    Ok(())
}

#[test]
fn test_missing_stream_is_an_error() {
    let dir = match tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("tempdir: {e}"),
    };
    assert!(StreamReader::load(dir.path().join("absent.txt")).is_err());
}

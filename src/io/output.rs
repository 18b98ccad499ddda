//! Result writers.
//!
//! Corrected poses go to `<prefix>.txt` (every pose) and to one file per sensor class
//! (`<prefix>_sick.txt`, `<prefix>_velodyne.txt`, `<prefix>_bumblebee.txt`), routed by the
//! source kind recorded on the pose. Each line is
//!
//! ```text
//! x y heading timestamp cos(heading)*0.05 sin(heading)*0.05
//! ```
//!
//! with the GPS origin added back to `x` and `y`.

use nalgebra::{DVector, Vector2};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::IoError;
use crate::core::graph::Graph;
use crate::core::variable::VariableRole;
use crate::factors::{Factor, GpsFactor};
use crate::manifold::se2::SE2;
use crate::sensor::SensorClass;

/// Length of the heading vector in the pose files
const POSE_ARROW_SCALE: f64 = 0.05;

/// Length of the heading vector in the filtered GPS file
const GPS_ARROW_SCALE: f64 = 0.5;

/// Writes the artifacts of a run next to a common path prefix.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    prefix: PathBuf,
    origin: Vector2<f64>,
}

impl OutputWriter {
    /// `origin` is added back to every written position.
    pub fn new<P: AsRef<Path>>(prefix: P, origin: Vector2<f64>) -> Self {
        OutputWriter {
            prefix: prefix.as_ref().to_path_buf(),
            origin,
        }
    }

    /// `<prefix><suffix>.txt`
    pub fn path(&self, suffix: &str) -> PathBuf {
        let mut name = self.prefix.clone().into_os_string();
        name.push(suffix);
        name.push(".txt");
        PathBuf::from(name)
    }

    /// Write every pose vertex of `graph`; returns the number of poses written.
    pub fn write_poses<F: Factor>(&self, graph: &Graph<F>) -> Result<usize, IoError> {
        let mut all = create(&self.path(""))?;
        let mut per_sensor = SensorFiles {
            sick: create(&self.path("_sick"))?,
            velodyne: create(&self.path("_velodyne"))?,
            bumblebee: create(&self.path("_bumblebee"))?,
        };

        let mut written = 0;
        for vertex in graph.vertices() {
            if vertex.role() != VariableRole::Pose {
                continue;
            }
            let (Some(pose), Some(stamp)) = (vertex.estimate.as_se2(), vertex.stamp()) else {
                continue;
            };

            let line = self.pose_line(pose, stamp.timestamp);
            all.write_all(line.as_bytes())?;
            if let Some(sensor) = stamp.source.sensor() {
                per_sensor.get(sensor).write_all(line.as_bytes())?;
            }
            written += 1;
        }

        all.flush()?;
        per_sensor.flush()?;
        info!("Wrote {} corrected poses to {}", written, self.path("").display());
        Ok(written)
    }

    /// Write the filtered GPS fixes with their synthetic headings to `<prefix>_fake_gps.txt`.
    pub fn write_fake_gps(&self, fixes: &[GpsFactor]) -> Result<(), IoError> {
        let path = self.path("_fake_gps");
        let mut out = create(&path)?;
        for fix in fixes {
            let position = fix.position() + self.origin;
            let heading = fix.synthetic_heading();
            writeln!(
                out,
                "{:.6} {:.6} {:.6} {:.6} {:.6}",
                position.x,
                position.y,
                heading,
                heading.cos() * GPS_ARROW_SCALE,
                heading.sin() * GPS_ARROW_SCALE
            )?;
        }
        out.flush()?;
        info!("Wrote {} filtered GPS fixes to {}", fixes.len(), path.display());
        Ok(())
    }

    fn pose_line(&self, pose: &SE2, timestamp: f64) -> String {
        let heading = pose.angle();
        format!(
            "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6}\n",
            pose.x() + self.origin.x,
            pose.y() + self.origin.y,
            heading,
            timestamp,
            heading.cos() * POSE_ARROW_SCALE,
            heading.sin() * POSE_ARROW_SCALE
        )
    }
}

struct SensorFiles {
    sick: BufWriter<File>,
    velodyne: BufWriter<File>,
    bumblebee: BufWriter<File>,
}

impl SensorFiles {
    fn get(&mut self, sensor: SensorClass) -> &mut BufWriter<File> {
        match sensor {
            SensorClass::Sick => &mut self.sick,
            SensorClass::Velodyne => &mut self.velodyne,
            SensorClass::Bumblebee => &mut self.bumblebee,
        }
    }

    fn flush(&mut self) -> Result<(), IoError> {
        self.sick.flush()?;
        self.velodyne.flush()?;
        self.bumblebee.flush()?;
        Ok(())
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, IoError> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Final estimates of every calibrated quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    /// Sensor offsets present in the graph
    pub offsets: Vec<(SensorClass, SE2)>,
    /// Odometry bias windows as `(vertex id, [vm, sm, sb])`
    pub biases: Vec<(usize, DVector<f64>)>,
}

impl CalibrationReport {
    /// Collect offsets and bias windows from `graph`.
    pub fn from_graph<F: Factor>(graph: &Graph<F>) -> Self {
        let mut offsets = Vec::new();
        let mut biases = Vec::new();
        for vertex in graph.vertices() {
            match vertex.role() {
                VariableRole::SensorOffset => {
                    let sensor = SensorClass::from_offset_vertex_id(vertex.id());
                    if let (Some(sensor), Some(offset)) = (sensor, vertex.estimate.as_se2()) {
                        offsets.push((sensor, offset.clone()));
                    }
                }
                VariableRole::OdometryBias => {
                    if let Some(bias) = vertex.estimate.as_vector() {
                        biases.push((vertex.id(), bias.clone()));
                    }
                }
                VariableRole::Pose => {}
            }
        }
        CalibrationReport { offsets, biases }
    }

    /// Print the report on stdout and to the log.
    pub fn publish(&self) {
        println!("{self}");
        for line in self.to_string().lines() {
            info!("{}", line);
        }
    }
}

impl fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (sensor, offset) in &self.offsets {
            writeln!(
                f,
                "The {} offset: {:.10} {:.10} {:.10}",
                sensor,
                offset.x(),
                offset.y(),
                offset.angle()
            )?;
        }
        for (window, (id, bias)) in self.biases.iter().enumerate() {
            let values: Vec<String> = bias.iter().map(|v| format!("{v:.6}")).collect();
            writeln!(
                f,
                "Odometry bias window {} (vertex {}): {}",
                window + 1,
                id,
                values.join(" ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variable::{PoseStamp, Vertex};
    use crate::factors::CalibrationEdge;
    use crate::factors::odometry::neutral_bias;
    use crate::sensor::SourceKind;
    use std::fs;
    use tempfile::tempdir;

    fn stamped(id: usize, x: f64, source: SourceKind) -> Vertex {
        Vertex::pose(
            id,
            SE2::from_xy_angle(x, 0.0, 0.0),
            PoseStamp {
                timestamp: id as f64,
                source,
            },
        )
    }

    fn sample_graph() -> Result<Graph<CalibrationEdge>, Box<dyn std::error::Error>> {
        let mut graph = Graph::new();
        graph.add_vertex(Vertex::sensor_offset(0, SensorClass::Sick.nominal_offset()))?;
        graph.add_vertex(Vertex::odometry_bias(3, neutral_bias()))?;
        graph.add_vertex(stamped(5, 1.0, SourceKind::Sick))?;
        graph.add_vertex(stamped(6, 2.0, SourceKind::Velodyne))?;
        graph.add_vertex(stamped(7, 3.0, SourceKind::Odometry))?;
        Ok(graph)
    }

    #[test]
    fn test_poses_are_routed_by_source() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let writer = OutputWriter::new(dir.path().join("run"), Vector2::new(100.0, -50.0));
        let written = writer.write_poses(&sample_graph()?)?;
        assert_eq!(written, 3);

        let all = fs::read_to_string(dir.path().join("run.txt"))?;
        assert_eq!(all.lines().count(), 3);
        let first: Vec<f64> = all
            .lines()
            .next()
            .ok_or("empty pose file")?
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()?;
        assert_eq!(first, vec![101.0, -50.0, 0.0, 5.0, 0.05, 0.0]);

        let sick = fs::read_to_string(dir.path().join("run_sick.txt"))?;
        let velodyne = fs::read_to_string(dir.path().join("run_velodyne.txt"))?;
        let bumblebee = fs::read_to_string(dir.path().join("run_bumblebee.txt"))?;
        assert_eq!(sick.lines().count(), 1);
        assert_eq!(velodyne.lines().count(), 1);
        assert!(bumblebee.is_empty());
        assert!(velodyne.starts_with("102.000000 "));
        Ok(())
    }

    #[test]
    fn test_fake_gps_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let writer = OutputWriter::new(dir.path().join("run"), Vector2::new(10.0, 20.0));
        let mut fix = GpsFactor::new(5, Vector2::new(1.0, 2.0), 0.0, 1.0, 1.0, 0.1);
        fix.set_synthetic_heading(std::f64::consts::FRAC_PI_2);
        writer.write_fake_gps(&[fix])?;

        let content = fs::read_to_string(dir.path().join("run_fake_gps.txt"))?;
        let values: Vec<f64> = content
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()?;
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], 11.0);
        assert_eq!(values[1], 22.0);
        assert!((values[4] - 0.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_unwritable_prefix_is_an_error() {
        let writer = OutputWriter::new("/nonexistent-directory/run", Vector2::zeros());
        let graph: Graph<CalibrationEdge> = Graph::new();
        assert!(matches!(writer.write_poses(&graph), Err(IoError::Io(_))));
    }

    #[test]
    fn test_report_lists_offsets_and_windows() -> Result<(), Box<dyn std::error::Error>> {
        let report = CalibrationReport::from_graph(&sample_graph()?);
        assert_eq!(report.offsets.len(), 1);
        assert_eq!(report.offsets[0].0, SensorClass::Sick);
        assert_eq!(report.biases.len(), 1);

        let text = report.to_string();
        assert!(text.contains("The sick offset: 3.5200000000"));
        assert!(text.contains("Odometry bias window 1 (vertex 3): 1.000000 1.000000 0.000000"));
        Ok(())
    }
}

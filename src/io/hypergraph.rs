//! Persisted hypergraph, g2o-style text.
//!
//! ```text
//! VERTEX_SENSOR_OFFSET <id> <x> <y> <heading>
//! VERTEX_ODOM_ACKERMAN_PARAM_CALIBRATION <id> <p0> <p1> ...
//! VERTEX_SE2 <id> <x> <y> <heading> <timestamp> <source_kind>
//! FIX <id>
//! <edge tag> <vertex ids...> <measurement...> <information upper triangle...>
//! ```
//!
//! Vertices come first, then fixed flags, then edges. Edge records are rebuilt through a
//! [`FactorRegistry`], which knows how many vertex ids each tag carries.

use nalgebra::DVector;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use super::{IoError, parse_field, parse_tail};
use crate::core::graph::Graph;
use crate::core::variable::{Estimate, PoseStamp, VariableRole, Vertex};
use crate::error::SclamResult;
use crate::factors::{CalibrationEdge, Factor, FactorRegistry};
use crate::manifold::se2::SE2;
use crate::sensor::SourceKind;

const POSE_TAG: &str = "VERTEX_SE2";
const OFFSET_TAG: &str = "VERTEX_SENSOR_OFFSET";
const BIAS_TAG: &str = "VERTEX_ODOM_ACKERMAN_PARAM_CALIBRATION";
const FIX_TAG: &str = "FIX";

/// Hypergraph file reader and writer
pub struct HypergraphFile;

impl HypergraphFile {
    /// Write every vertex, fixed flag and edge of `graph` to `path`.
    pub fn save<P: AsRef<Path>>(graph: &Graph<CalibrationEdge>, path: P) -> Result<(), IoError> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);

        for vertex in graph.vertices() {
            writeln!(out, "{}", vertex_line(vertex))?;
        }
        for vertex in graph.vertices().filter(|v| v.is_fixed()) {
            writeln!(out, "{FIX_TAG} {}", vertex.id())?;
        }
        for edge in graph.edges() {
            let factor = &edge.factor;
            let ids = factor.persisted_vertex_ids().iter().map(|id| id.to_string());
            let data = factor.write_data().into_iter().map(|v| v.to_string());
            let fields: Vec<String> = ids.chain(data).collect();
            writeln!(out, "{} {}", factor.tag(), fields.join(" "))?;
        }
        out.flush()?;

        info!(
            "Saved hypergraph with {} vertices and {} edges to {}",
            graph.num_vertices(),
            graph.num_edges(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Read a hypergraph written by [`HypergraphFile::save`].
    ///
    /// Each odometry-calibration edge is linked back to the plain odometry edge over the
    /// same pose pair.
    pub fn load<P: AsRef<Path>>(
        path: P,
        registry: &FactorRegistry,
    ) -> SclamResult<Graph<CalibrationEdge>> {
        let content = fs::read_to_string(path).map_err(IoError::from)?;
        let mut graph = Graph::new();

        for (index, line) in content.lines().enumerate() {
            let line_num = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();

            match parts[0] {
                POSE_TAG | OFFSET_TAG | BIAS_TAG => {
                    let vertex = parse_vertex(&parts, line_num)?;
                    let id = vertex.id();
                    graph
                        .add_vertex(vertex)
                        .map_err(|_| IoError::DuplicateVertex { id })?;
                }
                FIX_TAG => {
                    let id: usize = parse_field(&parts, 1, line_num)?;
                    graph.set_fixed(id, true)?;
                }
                tag => {
                    let count = registry
                        .vertex_count(tag)
                        .ok_or_else(|| IoError::UnknownTag(tag.to_string()))?;
                    let ids: Vec<usize> = (1..=count)
                        .map(|i| parse_field(&parts, i, line_num))
                        .collect::<Result<_, _>>()?;
                    let data = parse_tail(&parts, count + 1, line_num)?;
                    let factor = registry.construct(tag, &ids, &data)?;
                    graph.add_edge(factor)?;
                }
            }
        }

        link_odometry_pairs(&mut graph);

        info!(
            "Loaded hypergraph with {} vertices and {} edges",
            graph.num_vertices(),
            graph.num_edges()
        );
        Ok(graph)
    }
}

fn vertex_line(vertex: &Vertex) -> String {
    let values: Vec<String> = match &vertex.estimate {
        Estimate::Se2(pose) => vec![pose.x(), pose.y(), pose.angle()],
        Estimate::Vector(params) => params.iter().copied().collect(),
    }
    .into_iter()
    .map(|v| v.to_string())
    .collect();

    match (vertex.role(), vertex.stamp()) {
        (VariableRole::Pose, Some(stamp)) => format!(
            "{POSE_TAG} {} {} {} {}",
            vertex.id(),
            values.join(" "),
            stamp.timestamp,
            stamp.source.code()
        ),
        (VariableRole::Pose, None) => format!(
            "{POSE_TAG} {} {} 0 {}",
            vertex.id(),
            values.join(" "),
            SourceKind::Odometry.code()
        ),
        (VariableRole::SensorOffset, _) => {
            format!("{OFFSET_TAG} {} {}", vertex.id(), values.join(" "))
        }
        (VariableRole::OdometryBias, _) => {
            format!("{BIAS_TAG} {} {}", vertex.id(), values.join(" "))
        }
    }
}

fn parse_vertex(parts: &[&str], line_num: usize) -> Result<Vertex, IoError> {
    let id: usize = parse_field(parts, 1, line_num)?;
    let pose = || -> Result<SE2, IoError> {
        Ok(SE2::from_xy_angle(
            parse_field(parts, 2, line_num)?,
            parse_field(parts, 3, line_num)?,
            parse_field(parts, 4, line_num)?,
        ))
    };

    match parts[0] {
        POSE_TAG => {
            let stamp = PoseStamp {
                timestamp: parse_field(parts, 5, line_num)?,
                source: SourceKind::from_code(parse_field(parts, 6, line_num)?),
            };
            Ok(Vertex::pose(id, pose()?, stamp))
        }
        OFFSET_TAG => Ok(Vertex::sensor_offset(id, pose()?)),
        _ => {
            let params = parse_tail(parts, 2, line_num)?;
            if params.is_empty() {
                return Err(IoError::MissingFields { line: line_num });
            }
            Ok(Vertex::odometry_bias(id, DVector::from_vec(params)))
        }
    }
}

/// Point every odometry-calibration edge at the plain odometry edge of its pose pair.
fn link_odometry_pairs(graph: &mut Graph<CalibrationEdge>) {
    let plain: HashMap<(usize, usize), usize> = graph
        .edges()
        .iter()
        .enumerate()
        .filter_map(|(index, edge)| match &edge.factor {
            CalibrationEdge::Odometry(f) => {
                let ids = f.vertex_ids();
                Some(((ids[0], ids[1]), index))
            }
            _ => None,
        })
        .collect();

    for edge in graph.edges_mut() {
        if let CalibrationEdge::OdometryCalibration(f) = &mut edge.factor {
            let ids = f.vertex_ids();
            if let Some(&index) = plain.get(&(ids[0], ids[1])) {
                f.set_paired_edge(index);
            }
        }
    }
}

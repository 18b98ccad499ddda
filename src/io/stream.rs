//! Reader for the tagged measurement stream.
//!
//! One record per line, first token is the tag:
//!
//! ```text
//! VERTEX <id> <x> <y> <heading> <timestamp> <source_kind>
//! ODOM_EDGE <from> <to> <dx> <dy> <dheading> <velocity> <steering_angle> <elapsed_time>
//! GPS_EDGE <from> <x> <y> <heading> <std_dev>
//! XSENS_EDGE_ <from> <heading>
//! SICK_SEQ | SICK_LOOP | VELODYNE_SEQ | VELODYNE_LOOP | BUMBLEBEE_SEQ | BUMBLEBE_LOOP <from> <to> <dx> <dy> <dheading>
//! GPS_ORIGIN <x> <y>
//! VERTICES_QUANTITY <count>
//! ```
//!
//! Unknown tags, blank lines and `#` comments are skipped. Ids are the raw stream ids;
//! the assembler maps them into the graph's id space.

use memmap2::Mmap;
use nalgebra::Vector2;
use rayon::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::debug;

use super::{IoError, parse_field};
use crate::core::variable::PoseStamp;
use crate::factors::OdometryInputs;
use crate::manifold::se2::SE2;
use crate::sensor::{MeasurementRole, SensorClass, SourceKind};

/// Streams longer than this are parsed in parallel
const PARALLEL_THRESHOLD: usize = 5000;

/// One parsed line of the measurement stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    Vertex {
        id: usize,
        pose: SE2,
        stamp: PoseStamp,
    },
    Odometry {
        from: usize,
        to: usize,
        motion: SE2,
        inputs: OdometryInputs,
    },
    Gps {
        from: usize,
        position: Vector2<f64>,
        heading: f64,
        std_dev: f64,
    },
    Heading {
        from: usize,
        yaw: f64,
    },
    Sensor {
        sensor: SensorClass,
        role: MeasurementRole,
        from: usize,
        to: usize,
        motion: SE2,
    },
    GpsOrigin {
        x: f64,
        y: f64,
    },
    VerticesQuantity(usize),
}

/// Sensor class and role of a sensor-calibration tag.
///
/// The stereo loop tag is spelled `BUMBLEBE_LOOP` by the logging tools; the full spelling
/// is accepted as well.
pub fn sensor_tag(tag: &str) -> Option<(SensorClass, MeasurementRole)> {
    match tag {
        "SICK_SEQ" => Some((SensorClass::Sick, MeasurementRole::Sequential)),
        "SICK_LOOP" => Some((SensorClass::Sick, MeasurementRole::LoopClosure)),
        "VELODYNE_SEQ" => Some((SensorClass::Velodyne, MeasurementRole::Sequential)),
        "VELODYNE_LOOP" => Some((SensorClass::Velodyne, MeasurementRole::LoopClosure)),
        "BUMBLEBEE_SEQ" => Some((SensorClass::Bumblebee, MeasurementRole::Sequential)),
        "BUMBLEBE_LOOP" | "BUMBLEBEE_LOOP" => {
            Some((SensorClass::Bumblebee, MeasurementRole::LoopClosure))
        }
        _ => None,
    }
}

/// Measurement stream loader
pub struct StreamReader;

impl StreamReader {
    /// Read and parse the whole stream at `path`, in file order.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<StreamRecord>, IoError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let content = std::str::from_utf8(&mmap).map_err(|e| IoError::Parse {
            line: 0,
            message: format!("Invalid UTF-8: {e}"),
        })?;

        Self::parse_content(content)
    }

    /// Parse stream content. Record order is preserved.
    pub fn parse_content(content: &str) -> Result<Vec<StreamRecord>, IoError> {
        let lines: Vec<&str> = content.lines().collect();

        let records: Vec<Option<StreamRecord>> = if lines.len() > PARALLEL_THRESHOLD {
            lines
                .par_iter()
                .enumerate()
                .map(|(line_num, line)| Self::parse_line(line, line_num + 1))
                .collect::<Result<_, _>>()?
        } else {
            lines
                .iter()
                .enumerate()
                .map(|(line_num, line)| Self::parse_line(line, line_num + 1))
                .collect::<Result<_, _>>()?
        };

        let records: Vec<StreamRecord> = records.into_iter().flatten().collect();
        debug!("Parsed {} records from {} lines", records.len(), lines.len());
        Ok(records)
    }

    /// Parse a single line. Returns `None` for blank lines, comments and unknown tags.
    pub fn parse_line(line: &str, line_num: usize) -> Result<Option<StreamRecord>, IoError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&tag) = parts.first() else {
            return Ok(None);
        };

        let record = match tag {
            "VERTEX" => Some(Self::parse_vertex(&parts, line_num)?),
            "ODOM_EDGE" => Some(Self::parse_odometry(&parts, line_num)?),
            "GPS_EDGE" => Some(StreamRecord::Gps {
                from: parse_field(&parts, 1, line_num)?,
                position: Vector2::new(
                    parse_field(&parts, 2, line_num)?,
                    parse_field(&parts, 3, line_num)?,
                ),
                heading: parse_field(&parts, 4, line_num)?,
                std_dev: parse_field(&parts, 5, line_num)?,
            }),
            "XSENS_EDGE_" => Some(StreamRecord::Heading {
                from: parse_field(&parts, 1, line_num)?,
                yaw: parse_field(&parts, 2, line_num)?,
            }),
            "GPS_ORIGIN" => Some(StreamRecord::GpsOrigin {
                x: parse_field(&parts, 1, line_num)?,
                y: parse_field(&parts, 2, line_num)?,
            }),
            "VERTICES_QUANTITY" => Some(StreamRecord::VerticesQuantity(parse_field(
                &parts, 1, line_num,
            )?)),
            other => match sensor_tag(other) {
                Some((sensor, role)) => Some(StreamRecord::Sensor {
                    sensor,
                    role,
                    from: parse_field(&parts, 1, line_num)?,
                    to: parse_field(&parts, 2, line_num)?,
                    motion: Self::parse_se2(&parts, 3, line_num)?,
                }),
                None => None,
            },
        };

        Ok(record)
    }

    fn parse_vertex(parts: &[&str], line_num: usize) -> Result<StreamRecord, IoError> {
        if parts.len() < 7 {
            return Err(IoError::MissingFields { line: line_num });
        }
        Ok(StreamRecord::Vertex {
            id: parse_field(parts, 1, line_num)?,
            pose: Self::parse_se2(parts, 2, line_num)?,
            stamp: PoseStamp {
                timestamp: parse_field(parts, 5, line_num)?,
                source: SourceKind::from_code(parse_field(parts, 6, line_num)?),
            },
        })
    }

    fn parse_odometry(parts: &[&str], line_num: usize) -> Result<StreamRecord, IoError> {
        if parts.len() < 9 {
            return Err(IoError::MissingFields { line: line_num });
        }
        Ok(StreamRecord::Odometry {
            from: parse_field(parts, 1, line_num)?,
            to: parse_field(parts, 2, line_num)?,
            motion: Self::parse_se2(parts, 3, line_num)?,
            inputs: OdometryInputs {
                velocity: parse_field(parts, 6, line_num)?,
                steering_angle: parse_field(parts, 7, line_num)?,
                elapsed_time: parse_field(parts, 8, line_num)?,
            },
        })
    }

    /// Three consecutive fields `x y heading` starting at `start`
    fn parse_se2(parts: &[&str], start: usize, line_num: usize) -> Result<SE2, IoError> {
        Ok(SE2::from_xy_angle(
            parse_field(parts, start, line_num)?,
            parse_field(parts, start + 1, line_num)?,
            parse_field(parts, start + 2, line_num)?,
        ))
    }
}

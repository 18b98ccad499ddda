//! Sensor classes, measurement roles and pose source codes.
//!
//! Each calibrated sensor owns exactly one offset vertex whose id lives in the small
//! reserved range below the odometry-bias windows. Pose vertices remember which sensor
//! produced them through a [`SourceKind`] so corrected estimates can be routed to
//! per-sensor output files.

use crate::manifold::se2::SE2;
use std::fmt;

/// Number of vertex ids reserved for sensor offsets.
pub const SENSOR_OFFSET_IDS: usize = 3;

/// Sensors whose extrinsic offset is estimated jointly with the trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorClass {
    /// 2D range scanner
    Sick,
    /// 3D range scanner
    Velodyne,
    /// Stereo camera
    Bumblebee,
}

impl SensorClass {
    pub const ALL: [SensorClass; 3] = [
        SensorClass::Sick,
        SensorClass::Velodyne,
        SensorClass::Bumblebee,
    ];

    /// Id of the offset vertex shared by every factor of this sensor.
    pub fn offset_vertex_id(self) -> usize {
        match self {
            SensorClass::Sick => 0,
            SensorClass::Velodyne => 1,
            SensorClass::Bumblebee => 2,
        }
    }

    /// Hand-measured vehicle-to-sensor offset used as the initial estimate.
    pub fn nominal_offset(self) -> SE2 {
        match self {
            SensorClass::Sick => SE2::from_xy_angle(3.52, 0.0, 0.0),
            SensorClass::Velodyne => SE2::from_xy_angle(0.572, 0.0, 0.0),
            SensorClass::Bumblebee => SE2::from_xy_angle(0.817, 0.0, 0.0),
        }
    }

    /// Lower-case name used in output file suffixes.
    pub fn name(self) -> &'static str {
        match self {
            SensorClass::Sick => "sick",
            SensorClass::Velodyne => "velodyne",
            SensorClass::Bumblebee => "bumblebee",
        }
    }

    pub fn from_offset_vertex_id(id: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.offset_vertex_id() == id)
    }

    /// The pose source kind produced by this sensor.
    pub fn source_kind(self) -> SourceKind {
        match self {
            SensorClass::Sick => SourceKind::Sick,
            SensorClass::Velodyne => SourceKind::Velodyne,
            SensorClass::Bumblebee => SourceKind::Bumblebee,
        }
    }
}

impl fmt::Display for SensorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Whether a sensor factor links consecutive poses or closes a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementRole {
    Sequential,
    LoopClosure,
}

/// Origin of a pose vertex, as recorded in the stream's `VERTEX` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Odometry,
    Gps,
    GpsOrientation,
    HeadingSensor,
    Sick,
    Velodyne,
    Bumblebee,
    Other(i32),
}

impl SourceKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => SourceKind::Odometry,
            1 => SourceKind::Gps,
            2 => SourceKind::GpsOrientation,
            3 => SourceKind::HeadingSensor,
            4 => SourceKind::Sick,
            5 => SourceKind::Velodyne,
            6 => SourceKind::Bumblebee,
            other => SourceKind::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            SourceKind::Odometry => 0,
            SourceKind::Gps => 1,
            SourceKind::GpsOrientation => 2,
            SourceKind::HeadingSensor => 3,
            SourceKind::Sick => 4,
            SourceKind::Velodyne => 5,
            SourceKind::Bumblebee => 6,
            SourceKind::Other(code) => code,
        }
    }

    /// Sensor whose output file receives poses of this kind, if any.
    pub fn sensor(self) -> Option<SensorClass> {
        match self {
            SourceKind::Sick => Some(SensorClass::Sick),
            SourceKind::Velodyne => Some(SensorClass::Velodyne),
            SourceKind::Bumblebee => Some(SensorClass::Bumblebee),
            _ => None,
        }
    }
}

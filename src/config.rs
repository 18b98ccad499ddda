//! Run configuration.
//!
//! The configuration file holds one `KEY value` pair per line; `USE_*` keys are bare
//! flags. Blank lines and `#` comments are skipped and unknown keys are ignored. A
//! missing or unreadable file is not an error: the built-in defaults are used and a
//! warning is logged. A malformed value for a known key is an error.

use nalgebra::Matrix3;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::factors::{AckermanModel, FactorRegistry, information_from_std};
use crate::manifold::se2::SE2;
use crate::sensor::{MeasurementRole, SensorClass};

/// Errors raised while reading a configuration file.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid value at line {line} for {key}: {value}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
}

/// Standard deviations of a planar measurement (x, y, heading).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StdDev3 {
    pub xx: f64,
    pub yy: f64,
    pub hh: f64,
}

impl StdDev3 {
    pub const fn new(xx: f64, yy: f64, hh: f64) -> Self {
        StdDev3 { xx, yy, hh }
    }

    /// Inverse of the diagonal covariance `diag(xx², yy², hh²)`
    pub fn information(&self) -> Matrix3<f64> {
        information_from_std(self.xx, self.yy, self.hh)
    }
}

/// Every tunable of a calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct SclamConfig {
    pub odometry: StdDev3,
    /// Scale of the identity information used for special odometry records
    pub special_odometry_information: f64,
    pub sick_icp: StdDev3,
    pub sick_loop: StdDev3,
    pub velodyne_icp: StdDev3,
    pub velodyne_loop: StdDev3,
    pub visual: StdDev3,
    /// Standard deviation of the inertial yaw
    pub xsens_constraint_var: f64,
    pub gps_pose_std_multiplier: f64,
    pub gps_pose_hh_std: f64,
    /// Number of odometry-bias windows
    pub odom_ackerman_params_vertices: usize,
    pub outer_iterations: usize,
    pub inner_pose_iterations: usize,
    pub inner_odom_calib_iterations: usize,
    pub use_gps: bool,
    pub use_sick_seq: bool,
    pub use_sick_loop: bool,
    pub use_velodyne_seq: bool,
    pub use_velodyne_loop: bool,
    pub use_bumblebee_seq: bool,
    pub use_bumblebee_loop: bool,
    /// Fixed transform between the 3D scanner offset and its physical frame
    pub velodyne_displacement: [f64; 3],
    pub axle_distance: f64,
}

impl Default for SclamConfig {
    fn default() -> Self {
        SclamConfig {
            odometry: StdDev3::new(0.1, 0.05, 0.009),
            special_odometry_information: 1e6,
            sick_icp: StdDev3::new(0.2, 0.2, 0.01),
            sick_loop: StdDev3::new(0.4, 0.4, 0.02),
            velodyne_icp: StdDev3::new(0.2, 0.2, 0.01),
            velodyne_loop: StdDev3::new(0.4, 0.4, 0.02),
            visual: StdDev3::new(0.3, 0.3, 0.02),
            xsens_constraint_var: 0.05,
            gps_pose_std_multiplier: 1.0,
            gps_pose_hh_std: 0.1,
            odom_ackerman_params_vertices: 1,
            outer_iterations: 5,
            inner_pose_iterations: 20,
            inner_odom_calib_iterations: 10,
            use_gps: false,
            use_sick_seq: false,
            use_sick_loop: false,
            use_velodyne_seq: false,
            use_velodyne_loop: false,
            use_bumblebee_seq: false,
            use_bumblebee_loop: false,
            velodyne_displacement: [0.145, 0.0, -0.01],
            axle_distance: 2.625,
        }
    }
}

impl SclamConfig {
    /// Load `path`, falling back to the defaults if it cannot be read.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                info!("Loading configuration from {}", path.display());
                Self::parse(&content)
            }
            Err(err) => {
                warn!(
                    "Could not read the config file {} ({err}), using default parameters",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration text on top of the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else {
                continue;
            };
            let value = parts.next();
            config.apply(index + 1, key, value)?;
        }
        Ok(config)
    }

    fn apply(&mut self, line: usize, key: &str, value: Option<&str>) -> Result<(), ConfigError> {
        let float = |value: Option<&str>| -> Result<f64, ConfigError> {
            value
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| ConfigError::InvalidValue {
                    line,
                    key: key.to_string(),
                    value: value.unwrap_or_default().to_string(),
                })
        };
        let count = |value: Option<&str>| -> Result<usize, ConfigError> {
            value
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or_else(|| ConfigError::InvalidValue {
                    line,
                    key: key.to_string(),
                    value: value.unwrap_or_default().to_string(),
                })
        };

        match key {
            "ODOMETRY_XX_VAR" => self.odometry.xx = float(value)?,
            "ODOMETRY_YY_VAR" => self.odometry.yy = float(value)?,
            "ODOMETRY_HH_VAR" => self.odometry.hh = float(value)?,
            "SPECIAL_ODOMETRY_INFORMATION" => self.special_odometry_information = float(value)?,
            "SICK_ICP_XX_VAR" => self.sick_icp.xx = float(value)?,
            "SICK_ICP_YY_VAR" => self.sick_icp.yy = float(value)?,
            "SICK_ICP_HH_VAR" => self.sick_icp.hh = float(value)?,
            "SICK_LOOP_ICP_XX_VAR" => self.sick_loop.xx = float(value)?,
            "SICK_LOOP_ICP_YY_VAR" => self.sick_loop.yy = float(value)?,
            "SICK_LOOP_ICP_HH_VAR" => self.sick_loop.hh = float(value)?,
            "VELODYNE_ICP_XX_VAR" => self.velodyne_icp.xx = float(value)?,
            "VELODYNE_ICP_YY_VAR" => self.velodyne_icp.yy = float(value)?,
            "VELODYNE_ICP_HH_VAR" => self.velodyne_icp.hh = float(value)?,
            "VELODYNE_LOOP_ICP_XX_VAR" => self.velodyne_loop.xx = float(value)?,
            "VELODYNE_LOOP_ICP_YY_VAR" => self.velodyne_loop.yy = float(value)?,
            "VELODYNE_LOOP_ICP_HH_VAR" => self.velodyne_loop.hh = float(value)?,
            "VISUAL_XX_VAR" => self.visual.xx = float(value)?,
            "VISUAL_YY_VAR" => self.visual.yy = float(value)?,
            "VISUAL_HH_VAR" => self.visual.hh = float(value)?,
            "XSENS_CONSTRAINT_VAR" => self.xsens_constraint_var = float(value)?,
            "GPS_POSE_STD_MULTIPLIER" => self.gps_pose_std_multiplier = float(value)?,
            "GPS_POSE_HH_STD" => self.gps_pose_hh_std = float(value)?,
            "ODOM_ACKERMAN_PARAMS_VERTICES" => self.odom_ackerman_params_vertices = count(value)?,
            "OPTIMIZER_OUTER_ITERATIONS" => self.outer_iterations = count(value)?,
            "OPTIMIZER_INNER_POSE_ITERATIONS" => self.inner_pose_iterations = count(value)?,
            "OPTIMIZER_INNER_ODOM_CALIB_ITERATIONS" => {
                self.inner_odom_calib_iterations = count(value)?
            }
            "VELODYNE_DISPLACEMENT_X" => self.velodyne_displacement[0] = float(value)?,
            "VELODYNE_DISPLACEMENT_Y" => self.velodyne_displacement[1] = float(value)?,
            "VELODYNE_DISPLACEMENT_H" => self.velodyne_displacement[2] = float(value)?,
            "AXLE_DISTANCE" => self.axle_distance = float(value)?,
            "USE_GPS" => self.use_gps = true,
            "USE_SICK_SEQ" => self.use_sick_seq = true,
            "USE_SICK_LOOP" => self.use_sick_loop = true,
            "USE_VELODYNE_SEQ" => self.use_velodyne_seq = true,
            "USE_VELODYNE_LOOP" => self.use_velodyne_loop = true,
            "USE_BUMBLEBEE_SEQ" => self.use_bumblebee_seq = true,
            "USE_BUMBLEBEE_LOOP" => self.use_bumblebee_loop = true,
            other => debug!("Ignoring unknown configuration key {other} at line {line}"),
        }
        Ok(())
    }

    /// Whether records of `sensor` in `role` are assembled
    pub fn sensor_enabled(&self, sensor: SensorClass, role: MeasurementRole) -> bool {
        match (sensor, role) {
            (SensorClass::Sick, MeasurementRole::Sequential) => self.use_sick_seq,
            (SensorClass::Sick, MeasurementRole::LoopClosure) => self.use_sick_loop,
            (SensorClass::Velodyne, MeasurementRole::Sequential) => self.use_velodyne_seq,
            (SensorClass::Velodyne, MeasurementRole::LoopClosure) => self.use_velodyne_loop,
            (SensorClass::Bumblebee, MeasurementRole::Sequential) => self.use_bumblebee_seq,
            (SensorClass::Bumblebee, MeasurementRole::LoopClosure) => self.use_bumblebee_loop,
        }
    }

    /// Information matrix of a sensor factor
    pub fn sensor_information(&self, sensor: SensorClass, role: MeasurementRole) -> Matrix3<f64> {
        match (sensor, role) {
            (SensorClass::Sick, MeasurementRole::Sequential) => self.sick_icp.information(),
            (SensorClass::Sick, MeasurementRole::LoopClosure) => self.sick_loop.information(),
            (SensorClass::Velodyne, MeasurementRole::Sequential) => {
                self.velodyne_icp.information()
            }
            (SensorClass::Velodyne, MeasurementRole::LoopClosure) => {
                self.velodyne_loop.information()
            }
            (SensorClass::Bumblebee, _) => self.visual.information(),
        }
    }

    /// Secondary displacement applied after `sensor`'s offset
    pub fn displacement(&self, sensor: SensorClass) -> SE2 {
        match sensor {
            SensorClass::Velodyne => {
                let [x, y, h] = self.velodyne_displacement;
                SE2::from_xy_angle(x, y, h)
            }
            _ => SE2::from_xy_angle(0.0, 0.0, 0.0),
        }
    }

    pub fn special_information(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.special_odometry_information
    }

    pub fn ackerman_model(&self) -> AckermanModel {
        AckermanModel::new(self.axle_distance)
    }

    /// Factor constructors for reading a saved hypergraph under this configuration
    pub fn factor_registry(&self) -> FactorRegistry {
        FactorRegistry::with_defaults(self.displacement(SensorClass::Velodyne), self.ackerman_model())
    }

    /// First vertex id available to poses
    pub fn pose_id_offset(&self) -> usize {
        crate::sensor::SENSOR_OFFSET_IDS + self.odom_ackerman_params_vertices + 1
    }
}

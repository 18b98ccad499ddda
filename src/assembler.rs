//! Graph assembly from the measurement stream.
//!
//! The assembler turns each [`StreamRecord`] into graph operations:
//!
//! - `VERTEX` creates a pose vertex, its id shifted past the reserved parameter range,
//! - `ODOM_EDGE` creates the plain odometry factor and its calibration twin, bound to the
//!   bias window of the current record,
//! - sensor records create a calibration factor when their class and role are enabled,
//! - `XSENS_EDGE_` creates a heading factor,
//! - `GPS_EDGE` is buffered and only reaches the graph through the GPS pipeline,
//! - `GPS_ORIGIN` and `VERTICES_QUANTITY` update run state.
//!
//! Any insertion the graph rejects aborts assembly.

use nalgebra::{Matrix3, Vector2};
use tracing::{debug, info};

use crate::config::SclamConfig;
use crate::core::graph::Graph;
use crate::core::variable::Vertex;
use crate::error::SclamResult;
use crate::factors::odometry::neutral_bias;
use crate::factors::{
    CalibrationEdge, CalibrationFactor, GpsFactor, HeadingFactor, OdometryCalibrationFactor,
    OdometryFactor, OdometryInputs,
};
use crate::gps::GpsPipeline;
use crate::io::StreamRecord;
use crate::manifold::se2::SE2;
use crate::sensor::{MeasurementRole, SENSOR_OFFSET_IDS, SensorClass};

/// Assigns odometry records to bias windows.
///
/// The current window advances each time the record counter reaches a multiple of the
/// subdivision, and never moves past the last window.
#[derive(Debug, Clone)]
pub struct WindowAssigner {
    last: usize,
    current: usize,
    subdivision: usize,
    counter: usize,
    windows: usize,
}

impl WindowAssigner {
    /// `windows` bias vertices with consecutive ids starting at `first`.
    pub fn new(first: usize, windows: usize) -> Self {
        let windows = windows.max(1);
        WindowAssigner {
            last: first + windows - 1,
            current: first,
            subdivision: usize::MAX,
            counter: 0,
            windows,
        }
    }

    /// Spread `records` odometry records evenly over the windows.
    pub fn set_record_count(&mut self, records: usize) {
        self.subdivision = (records / self.windows).max(1);
    }

    pub fn subdivision(&self) -> usize {
        self.subdivision
    }

    /// Odometry records seen so far
    pub fn records(&self) -> usize {
        self.counter
    }

    /// Window vertex id of the next record; advances the counter.
    pub fn next_window(&mut self) -> usize {
        let window = self.current;
        self.counter += 1;
        if self.counter % self.subdivision == 0 && self.current < self.last {
            self.current += 1;
        }
        window
    }
}

/// Records applied per kind, for the assembly summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyCounts {
    pub poses: usize,
    pub odometry: usize,
    pub sensor: usize,
    pub ignored_sensor: usize,
    pub heading: usize,
    pub gps_buffered: usize,
}

/// Result of a finished assembly.
#[derive(Debug)]
pub struct Assembly {
    pub graph: Graph<CalibrationEdge>,
    /// GPS fixes that survived filtering, as attached to the graph
    pub gps_fixes: Vec<GpsFactor>,
    /// Coordinate origin subtracted from every absolute position in the stream
    pub origin: Vector2<f64>,
    pub counts: AssemblyCounts,
}

/// Builds the calibration hypergraph one record at a time.
#[derive(Debug)]
pub struct GraphAssembler {
    config: SclamConfig,
    graph: Graph<CalibrationEdge>,
    gps_buffer: Vec<GpsFactor>,
    origin: Vector2<f64>,
    windows: WindowAssigner,
    pipeline: GpsPipeline,
    counts: AssemblyCounts,
    pose_offset: usize,
    special_information: Matrix3<f64>,
    odometry_information: Matrix3<f64>,
}

impl GraphAssembler {
    /// Start a graph holding the sensor offsets and the odometry-bias windows.
    pub fn new(config: SclamConfig) -> SclamResult<Self> {
        Self::with_graph(config, Graph::new())
    }

    /// Like [`GraphAssembler::new`], on top of an existing (usually empty) graph.
    pub fn with_graph(config: SclamConfig, graph: Graph<CalibrationEdge>) -> SclamResult<Self> {
        let windows = config.odom_ackerman_params_vertices.max(1);
        let mut assembler = GraphAssembler {
            windows: WindowAssigner::new(SENSOR_OFFSET_IDS, windows),
            pose_offset: config.pose_id_offset(),
            special_information: config.special_information(),
            odometry_information: config.odometry.information(),
            graph,
            gps_buffer: Vec::new(),
            origin: Vector2::zeros(),
            pipeline: GpsPipeline::default(),
            counts: AssemblyCounts::default(),
            config,
        };
        assembler.add_parameter_vertices(windows)?;
        Ok(assembler)
    }

    /// Offset and bias vertices start fixed and marginalized.
    fn add_parameter_vertices(&mut self, windows: usize) -> SclamResult<()> {
        for sensor in SensorClass::ALL {
            let mut vertex =
                Vertex::sensor_offset(sensor.offset_vertex_id(), sensor.nominal_offset());
            vertex.set_fixed(true);
            vertex.set_marginalized(true);
            self.graph.add_vertex(vertex)?;
        }
        for window in 0..windows {
            let mut vertex = Vertex::odometry_bias(SENSOR_OFFSET_IDS + window, neutral_bias());
            vertex.set_fixed(true);
            vertex.set_marginalized(true);
            self.graph.add_vertex(vertex)?;
        }
        debug!(
            "Added {} sensor offsets and {} odometry bias windows",
            SensorClass::ALL.len(),
            windows
        );
        Ok(())
    }

    /// Graph id of a stream pose id
    pub fn pose_id(&self, stream_id: usize) -> usize {
        stream_id + self.pose_offset
    }

    pub fn graph(&self) -> &Graph<CalibrationEdge> {
        &self.graph
    }

    pub fn origin(&self) -> &Vector2<f64> {
        &self.origin
    }

    pub fn gps_buffer(&self) -> &[GpsFactor] {
        &self.gps_buffer
    }

    pub fn counts(&self) -> AssemblyCounts {
        self.counts
    }

    /// Apply one stream record.
    pub fn apply(&mut self, record: &StreamRecord) -> SclamResult<()> {
        match record {
            StreamRecord::Vertex { id, pose, stamp } => {
                let vertex = Vertex::pose(self.pose_id(*id), pose.clone(), *stamp);
                self.graph.add_vertex(vertex)?;
                self.counts.poses += 1;
            }
            StreamRecord::Odometry {
                from,
                to,
                motion,
                inputs,
            } => self.add_odometry_pair(*from, *to, motion, inputs)?,
            StreamRecord::Gps {
                from,
                position,
                heading,
                std_dev,
            } => {
                if self.config.use_gps {
                    self.gps_buffer.push(GpsFactor::new(
                        self.pose_id(*from),
                        *position,
                        *heading,
                        *std_dev,
                        self.config.gps_pose_std_multiplier,
                        self.config.gps_pose_hh_std,
                    ));
                    self.counts.gps_buffered += 1;
                }
            }
            StreamRecord::Heading { from, yaw } => {
                let factor =
                    HeadingFactor::new(self.pose_id(*from), *yaw, self.config.xsens_constraint_var);
                self.graph.add_edge(factor.into())?;
                self.counts.heading += 1;
            }
            StreamRecord::Sensor {
                sensor,
                role,
                from,
                to,
                motion,
            } => self.add_sensor_factor(*sensor, *role, *from, *to, motion)?,
            StreamRecord::GpsOrigin { x, y } => {
                self.origin = Vector2::new(*x, *y);
                debug!("GPS origin set to ({x}, {y})");
            }
            StreamRecord::VerticesQuantity(quantity) => {
                self.windows.set_record_count(*quantity);
                debug!(
                    "{} odometry records per bias window",
                    self.windows.subdivision()
                );
            }
        }
        Ok(())
    }

    fn add_odometry_pair(
        &mut self,
        from: usize,
        to: usize,
        motion: &SE2,
        inputs: &OdometryInputs,
    ) -> SclamResult<()> {
        let first_record = self.windows.records() == 0;
        let bias_id = self.windows.next_window();
        let (from, to) = (self.pose_id(from), self.pose_id(to));

        let standstill = motion.to_vector().iter().all(|v| *v == 0.0);
        let plain_information = if first_record || standstill {
            self.special_information
        } else {
            self.odometry_information
        };
        let calib_information = if first_record || inputs.elapsed_time == 0.0 {
            self.special_information
        } else {
            self.odometry_information
        };

        let plain = self.graph.add_edge(
            OdometryFactor::new(from, to, motion.clone(), plain_information).into(),
        )?;
        let mut calibration = OdometryCalibrationFactor::new(
            from,
            to,
            bias_id,
            *inputs,
            self.config.ackerman_model(),
            motion.clone(),
            calib_information,
        );
        calibration.set_paired_edge(plain);
        self.graph.add_edge(calibration.into())?;
        self.counts.odometry += 1;
        Ok(())
    }

    fn add_sensor_factor(
        &mut self,
        sensor: SensorClass,
        role: MeasurementRole,
        from: usize,
        to: usize,
        motion: &SE2,
    ) -> SclamResult<()> {
        if !self.config.sensor_enabled(sensor, role) {
            self.counts.ignored_sensor += 1;
            return Ok(());
        }
        let factor = CalibrationFactor::new(
            self.pose_id(from),
            self.pose_id(to),
            sensor,
            role,
            motion.clone(),
            self.config.displacement(sensor),
            self.config.sensor_information(sensor, role),
        );
        self.graph.add_edge(factor.into())?;
        self.counts.sensor += 1;
        Ok(())
    }

    /// Apply every record, then finish.
    pub fn assemble<'a, I>(mut self, records: I) -> SclamResult<Assembly>
    where
        I: IntoIterator<Item = &'a StreamRecord>,
    {
        for record in records {
            self.apply(record)?;
        }
        self.finish()
    }

    /// Filter the buffered GPS fixes and attach the survivors.
    pub fn finish(mut self) -> SclamResult<Assembly> {
        let mut gps_fixes = Vec::new();
        if self.config.use_gps {
            let buffer = std::mem::take(&mut self.gps_buffer);
            gps_fixes = self.pipeline.run(buffer)?;
            for fix in &gps_fixes {
                self.graph.add_edge(fix.clone().into())?;
            }
        }

        let counts = self.counts;
        info!(
            "Assembled {} poses, {} odometry pairs, {} sensor factors ({} disabled), {} heading factors, {} of {} GPS fixes",
            counts.poses,
            counts.odometry,
            counts.sensor,
            counts.ignored_sensor,
            counts.heading,
            gps_fixes.len(),
            counts.gps_buffered
        );
        info!("{}", self.graph.statistics());

        Ok(Assembly {
            graph: self.graph,
            gps_fixes,
            origin: self.origin,
            counts,
        })
    }
}

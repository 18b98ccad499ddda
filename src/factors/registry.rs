//! Tag to constructor map for persisted hypergraphs.
//!
//! A registry is built once per run and passed to whatever reads factors back from
//! text. Constructors may capture run configuration, such as the 3D-scanner displacement
//! or the Ackerman wheelbase, so reading a graph needs no global state.

use std::collections::HashMap;
use std::fmt;

use super::{
    AckermanModel, CalibrationEdge, CalibrationFactor, GpsFactor, HeadingFactor,
    OdometryCalibrationFactor, OdometryFactor,
};
use crate::error::{SclamError, SclamResult};
use crate::manifold::LieGroup;
use crate::manifold::se2::SE2;
use crate::sensor::SensorClass;

type Constructor = Box<dyn Fn(&[usize], &[f64]) -> SclamResult<CalibrationEdge> + Send + Sync>;

struct Entry {
    vertex_count: usize,
    construct: Constructor,
}

/// Factor constructors keyed by persistence tag.
pub struct FactorRegistry {
    entries: HashMap<String, Entry>,
}

impl fmt::Debug for FactorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("FactorRegistry").field("tags", &tags).finish()
    }
}

impl Default for FactorRegistry {
    fn default() -> Self {
        Self::with_defaults(SE2::identity(), AckermanModel::default())
    }
}

impl FactorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        FactorRegistry {
            entries: HashMap::new(),
        }
    }

    /// Registry with every factor of the calibration hypergraph.
    ///
    /// `velodyne_displacement` is the fixed secondary transform of the 3D scanner.
    pub fn with_defaults(velodyne_displacement: SE2, model: AckermanModel) -> Self {
        let mut registry = Self::new();

        for sensor in SensorClass::ALL {
            let displacement = match sensor {
                SensorClass::Velodyne => velodyne_displacement.clone(),
                _ => SE2::identity(),
            };
            registry.register(
                CalibrationFactor::tag_for(sensor),
                2,
                move |ids: &[usize], data: &[f64]| {
                    let factor =
                        CalibrationFactor::read(ids[0], ids[1], sensor, displacement.clone(), data)?;
                    Ok(factor.into())
                },
            );
        }

        registry.register(OdometryFactor::TAG, 2, |ids: &[usize], data: &[f64]| {
            Ok(OdometryFactor::read(ids[0], ids[1], data)?.into())
        });
        registry.register(
            OdometryCalibrationFactor::TAG,
            3,
            move |ids: &[usize], data: &[f64]| {
                Ok(OdometryCalibrationFactor::read(ids[0], ids[1], ids[2], model, data)?.into())
            },
        );
        registry.register(GpsFactor::TAG, 1, |ids: &[usize], data: &[f64]| {
            Ok(GpsFactor::read(ids[0], data)?.into())
        });
        registry.register(HeadingFactor::TAG, 1, |ids: &[usize], data: &[f64]| {
            Ok(HeadingFactor::read(ids[0], data)?.into())
        });

        registry
    }

    /// Register (or replace) the constructor for `tag`.
    ///
    /// `vertex_count` is the number of vertex ids that precede the data in a record.
    pub fn register<C>(&mut self, tag: &str, vertex_count: usize, construct: C)
    where
        C: Fn(&[usize], &[f64]) -> SclamResult<CalibrationEdge> + Send + Sync + 'static,
    {
        self.entries.insert(
            tag.to_string(),
            Entry {
                vertex_count,
                construct: Box::new(construct),
            },
        );
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Number of vertex ids a record with `tag` carries
    pub fn vertex_count(&self, tag: &str) -> Option<usize> {
        self.entries.get(tag).map(|e| e.vertex_count)
    }

    /// Build the factor for `tag` from its vertex ids and data scalars.
    pub fn construct(&self, tag: &str, ids: &[usize], data: &[f64]) -> SclamResult<CalibrationEdge> {
        let entry = self
            .entries
            .get(tag)
            .ok_or_else(|| SclamError::InvalidInput(format!("no factor registered for {tag}")))?;
        if ids.len() != entry.vertex_count {
            return Err(SclamError::InvalidInput(format!(
                "{tag} binds {} vertices, got {}",
                entry.vertex_count,
                ids.len()
            )));
        }
        (entry.construct)(ids, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::Factor;
    use crate::sensor::MeasurementRole;
    use nalgebra::Matrix3;

    #[test]
    fn test_default_registry_knows_every_tag() {
        let registry = FactorRegistry::default();
        for sensor in SensorClass::ALL {
            assert_eq!(registry.vertex_count(CalibrationFactor::tag_for(sensor)), Some(2));
        }
        assert_eq!(registry.vertex_count(OdometryCalibrationFactor::TAG), Some(3));
        assert!(registry.contains(GpsFactor::TAG));
        assert!(registry.contains(HeadingFactor::TAG));
        assert!(!registry.contains("EDGE_SE3"));
    }

    #[test]
    fn test_constructor_captures_displacement() -> SclamResult<()> {
        let displacement = SE2::from_xy_angle(0.145, 0.0, -0.01);
        let registry = FactorRegistry::with_defaults(displacement.clone(), AckermanModel::default());
        let original = CalibrationFactor::new(
            20,
            21,
            SensorClass::Velodyne,
            MeasurementRole::LoopClosure,
            SE2::from_xy_angle(1.0, 0.0, 0.1),
            displacement.clone(),
            Matrix3::identity(),
        );

        let edge = registry.construct(original.tag(), &[20, 21], &original.write_data())?;
        let CalibrationEdge::Calibration(read) = edge else {
            panic!("expected a calibration factor");
        };
        assert_eq!(read.vertex_ids(), &[20, 21, 1]);
        assert!(read.displacement().is_approx(&displacement, 1e-15));
        Ok(())
    }

    #[test]
    fn test_unknown_tag_and_wrong_arity() {
        let registry = FactorRegistry::default();
        assert!(registry.construct("EDGE_UNKNOWN", &[0], &[]).is_err());
        assert!(registry.construct(GpsFactor::TAG, &[0, 1], &[0.0; 9]).is_err());
    }

    #[test]
    fn test_custom_registration() -> SclamResult<()> {
        let mut registry = FactorRegistry::new();
        registry.register("EDGE_YAW", 1, |ids: &[usize], data: &[f64]| {
            Ok(HeadingFactor::new(ids[0], data[0], 1.0).into())
        });
        let edge = registry.construct("EDGE_YAW", &[9], &[0.5])?;
        assert_eq!(edge.vertex_ids(), &[9]);
        assert_eq!(edge.tag(), HeadingFactor::TAG);
        Ok(())
    }
}

//! Configuration documents and the explicit component registry.
//!
//! A model is declared in a YAML document with one block per component
//! category. Component classes are resolved through a
//! [`ComponentRegistry`]: registration is explicit, the framework never
//! discovers components by introspection. The configuration is a value
//! built once and threaded through the model; there is no process-wide
//! mutable configuration.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::component::{
    Category, Component, ComponentAdapter, ComponentAdapterBuilder, ParameterValue,
};
use crate::data::{DataSet, FieldData};
use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::model::{Model, ModelBuilder};
use crate::record::RecordRequests;
use crate::space::LatLonGrid;
use crate::time::{Calendar, DateTime, TimeDomain};

/// Top-level configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub identifier: String,
    pub config_directory: PathBuf,
    pub saving_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surfacelayer: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsurface: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openwater: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrientsurfacelayer: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrientsubsurface: Option<ComponentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrientopenwater: Option<ComponentConfig>,
}

impl ModelConfig {
    pub fn read(path: &Path) -> ConfluenceResult<Self> {
        let file = File::open(path).map_err(|e| ConfluenceError::io(path, e))?;
        serde_yaml::from_reader(file).map_err(|e| {
            ConfluenceError::Config(format!(
                "malformed configuration {}: {e}",
                path.display()
            ))
        })
    }

    pub fn write(&self, path: &Path) -> ConfluenceResult<()> {
        let file = File::create(path).map_err(|e| ConfluenceError::io(path, e))?;
        serde_yaml::to_writer(file, self).map_err(|e| ConfluenceError::Serialisation {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// The component blocks present, in category firing order.
    pub fn component_blocks(&self) -> Vec<(Category, &ComponentConfig)> {
        [
            (Category::SurfaceLayer, &self.surfacelayer),
            (Category::SubSurface, &self.subsurface),
            (Category::OpenWater, &self.openwater),
            (Category::NutrientSurfaceLayer, &self.nutrientsurfacelayer),
            (Category::NutrientSubSurface, &self.nutrientsubsurface),
            (Category::NutrientOpenWater, &self.nutrientopenwater),
        ]
        .into_iter()
        .filter_map(|(category, block)| block.as_ref().map(|b| (category, b)))
        .collect()
    }
}

/// One component block of the configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Registered name of the component implementation to instantiate.
    pub class: String,
    /// Where this component's records and dumps go; defaults to the model
    /// saving directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saving_directory: Option<PathBuf>,
    pub timedomain: TimeDomainConfig,
    pub spacedomain: SpaceDomainConfig,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dataset: IndexMap<String, FieldRef>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, ParameterConfig>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub constants: IndexMap<String, ConstantConfig>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub records: RecordRequests,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_slice: Option<usize>,
}

/// Temporal block: start, end, a constant step in seconds, and a calendar.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeDomainConfig {
    pub start: String,
    pub end: String,
    pub step: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,
}

impl TimeDomainConfig {
    pub fn build(&self) -> ConfluenceResult<TimeDomain> {
        let calendar = match &self.calendar {
            Some(name) => Calendar::from_str(name)?,
            None => Calendar::Gregorian,
        };
        TimeDomain::from_start_end_step(
            DateTime::parse(&self.start)?,
            DateTime::parse(&self.end)?,
            self.step,
            calendar,
        )
    }
}

/// Spatial block: a rectilinear grid from extents and resolutions, with
/// optional ancillary fields read from files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpaceDomainConfig {
    pub class: String,
    pub latitude_extent: (f64, f64),
    pub latitude_resolution: f64,
    pub longitude_extent: (f64, f64),
    pub longitude_resolution: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_sea_mask: Option<FieldRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_direction: Option<FieldRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_area: Option<FieldRef>,
}

impl SpaceDomainConfig {
    pub fn build(&self) -> ConfluenceResult<LatLonGrid> {
        if self.class != "LatLonGrid" {
            return Err(ConfluenceError::Config(format!(
                "unknown spacedomain class '{}'",
                self.class
            )));
        }
        let mut grid = LatLonGrid::from_extent_and_resolution(
            self.latitude_extent,
            self.latitude_resolution,
            self.longitude_extent,
            self.longitude_resolution,
        )?;
        if let Some(reference) = &self.land_sea_mask {
            let field = reference.load_static()?;
            grid = grid.with_land_sea_mask(field.mapv(|v| v > 0.5))?;
        }
        if let Some(reference) = &self.flow_direction {
            let field = reference.load_static()?;
            grid = grid.with_flow_direction(directions_from_digits(&field)?)?;
        }
        if let Some(reference) = &self.cell_area {
            let field = reference.load_static()?;
            grid = grid.with_cell_area(field)?;
        }
        Ok(grid)
    }
}

/// Reference to a named field within one or more files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldRef {
    pub files: Vec<PathBuf>,
    pub select: String,
}

impl FieldRef {
    fn load_static(&self) -> ConfluenceResult<Array2<f64>> {
        let mut dataset = DataSet::new();
        dataset.load(&self.select, &self.files, &self.select)?;
        let variable = dataset.get(&self.select).expect("just loaded");
        match &variable.data {
            FieldData::Static { values } => Ok(values.clone()),
            _ => Err(ConfluenceError::Config(format!(
                "ancillary field '{}' must be time-invariant",
                self.select
            ))),
        }
    }
}

/// A parameter as `[value, units]`, the value being a scalar or a full
/// grid of rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterConfig(pub ParameterValueConfig, pub String);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValueConfig {
    Scalar(f64),
    Field(Vec<Vec<f64>>),
}

impl ParameterValueConfig {
    fn to_value(&self) -> ConfluenceResult<ParameterValue> {
        match self {
            ParameterValueConfig::Scalar(v) => Ok(ParameterValue::Scalar(*v)),
            ParameterValueConfig::Field(rows) => {
                let ny = rows.len();
                let nx = rows.first().map_or(0, Vec::len);
                if rows.iter().any(|r| r.len() != nx) {
                    return Err(ConfluenceError::Config(
                        "ragged parameter field in configuration".to_string(),
                    ));
                }
                let flat: Vec<f64> = rows.iter().flatten().copied().collect();
                let field = Array2::from_shape_vec((ny, nx), flat)
                    .expect("row-major rows of equal length");
                Ok(ParameterValue::Field(field))
            }
        }
    }
}

/// A constant as `[value, units]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConstantConfig(pub f64, pub String);

/// Convert a flow-direction field of cardinal digits (1 for north, going
/// clockwise to 8 for north-west) into relative (Y, X) offsets.
pub fn directions_from_digits(digits: &Array2<f64>) -> ConfluenceResult<Array3<i8>> {
    let (ny, nx) = digits.dim();
    let mut directions = Array3::zeros((ny, nx, 2));
    for j in 0..ny {
        for i in 0..nx {
            let (dj, di) = match digits[[j, i]] as i64 {
                1 => (1, 0),
                2 => (1, 1),
                3 => (0, 1),
                4 => (-1, 1),
                5 => (-1, 0),
                6 => (-1, -1),
                7 => (0, -1),
                8 => (1, -1),
                other => {
                    return Err(ConfluenceError::Config(format!(
                        "invalid flow direction digit {other} at cell ({j}, {i})"
                    )))
                }
            };
            directions[[j, i, 0]] = dj;
            directions[[j, i, 1]] = di;
        }
    }
    Ok(directions)
}

/// Explicit name-to-constructor registry of component implementations.
#[derive(Default)]
pub struct ComponentRegistry {
    constructors: IndexMap<String, Box<dyn Fn() -> Box<dyn Component>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Component> + 'static,
    {
        self.constructors
            .insert(class.to_string(), Box::new(constructor));
    }

    pub fn create(&self, class: &str) -> ConfluenceResult<Box<dyn Component>> {
        let constructor = self.constructors.get(class).ok_or_else(|| {
            ConfluenceError::Config(format!("unknown component class '{class}'"))
        })?;
        Ok(constructor())
    }
}

impl Model {
    /// Build a model from a configuration document, resolving component
    /// classes through the registry.
    pub fn from_config(path: &Path, registry: &ComponentRegistry) -> ConfluenceResult<Model> {
        let config = ModelConfig::read(path)?;
        Model::from_model_config(config, registry)
    }

    /// Build a model from an in-memory configuration value.
    pub fn from_model_config(
        config: ModelConfig,
        registry: &ComponentRegistry,
    ) -> ConfluenceResult<Model> {
        let mut builder = ModelBuilder::new(&config.identifier, &config.saving_directory);
        for (category, block) in config.component_blocks() {
            builder = builder.with_component(build_adapter(&config, category, block, registry)?);
        }
        builder.with_config(config).build()
    }

    /// Write the model's configuration document back to disk.
    ///
    /// Only models built from a configuration carry one to write.
    pub fn to_config(&self, path: &Path) -> ConfluenceResult<()> {
        let mut config = self
            .stored_config()
            .cloned()
            .ok_or_else(|| {
                ConfluenceError::Config(
                    "model was assembled programmatically and carries no \
                     configuration document"
                        .to_string(),
                )
            })?;
        config.identifier = self.identifier().to_string();
        config.saving_directory = self.saving_directory().to_path_buf();
        config.write(path)
    }
}

fn build_adapter(
    config: &ModelConfig,
    category: Category,
    block: &ComponentConfig,
    registry: &ComponentRegistry,
) -> ConfluenceResult<ComponentAdapter> {
    let component = registry.create(&block.class)?;
    if component.definition().category != category {
        return Err(ConfluenceError::Config(format!(
            "component class '{}' is a {} component but was configured under \
             the {category} block",
            block.class,
            component.definition().category
        )));
    }

    let timedomain = block.timedomain.build()?;
    let spacedomain = Arc::new(block.spacedomain.build()?);
    let mut dataset = DataSet::new();
    for (name, reference) in &block.dataset {
        dataset.load(name, &reference.files, &reference.select)?;
    }

    let saving_directory = block
        .saving_directory
        .clone()
        .unwrap_or_else(|| config.saving_directory.clone());
    let mut builder: ComponentAdapterBuilder =
        ComponentAdapter::builder(component, saving_directory, timedomain, spacedomain)
            .with_dataset(dataset)
            .with_records(block.records.clone());
    for (name, ParameterConfig(value, units)) in &block.parameters {
        builder = builder.with_parameter(name, value.to_value()?, units);
    }
    for (name, ConstantConfig(value, units)) in &block.constants {
        builder = builder.with_constant(name, *value, units);
    }
    if let Some(io_slice) = block.io_slice {
        builder = builder.with_io_slice(io_slice);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataVariable, FieldFile};
    use crate::example_components::{DummyOpenWater, DummySubSurface, DummySurfaceLayer};
    use crate::record::{RecordMethod, RecordReader};
    use ndarray::Array3;

    fn dummy_registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register("DummySurfaceLayer", || Box::new(DummySurfaceLayer));
        registry.register("DummySubSurface", || Box::new(DummySubSurface));
        registry.register("DummyOpenWater", || Box::new(DummyOpenWater));
        registry
    }

    fn write_field_files(directory: &Path) -> ConfluenceResult<()> {
        let window = TimeDomain::from_start_end_step(
            DateTime::new(2019, 1, 1, 9, 0, 0),
            DateTime::new(2019, 1, 17, 9, 0, 0),
            86_400,
            Calendar::Gregorian,
        )?;
        let dynamic = |name: &str, value: f64| DataVariable {
            name: name.to_string(),
            units: "1".to_string(),
            data: FieldData::Dynamic {
                values: Array3::from_elem((16, 4, 3), value),
                timedomain: window.clone(),
            },
            filenames: vec![],
        };
        let static_field = |name: &str, value: f64| DataVariable {
            name: name.to_string(),
            units: "1".to_string(),
            data: FieldData::Static {
                values: Array2::from_elem((4, 3), value),
            },
            filenames: vec![],
        };

        FieldFile::new(vec![
            dynamic("driving_a", 1.0),
            dynamic("driving_b", 2.0),
            dynamic("driving_c", 3.0),
            static_field("ancillary_c", 2.0),
        ])
        .write(&directory.join("driving.bin"))?;
        FieldFile::new(vec![
            static_field("land_sea_mask", 1.0),
            // every cell flows east (digit 3)
            static_field("flow_direction", 3.0),
        ])
        .write(&directory.join("ancillary.bin"))?;
        FieldFile::new(vec![DataVariable {
            name: "ancillary_b".to_string(),
            units: "1".to_string(),
            data: FieldData::Climatologic {
                values: Array3::from_elem((12, 4, 3), 1.0),
                frequency: crate::data::ClimatologyFrequency::Monthly,
            },
            filenames: vec![],
        }])
        .write(&directory.join("climatology.bin"))?;
        Ok(())
    }

    fn model_yaml(directory: &Path) -> String {
        let dir = directory.display();
        format!(
            r#"
identifier: from_config
config_directory: {dir}
saving_directory: {dir}
surfacelayer:
  class: DummySurfaceLayer
  timedomain: &window
    start: 2019-01-01 09:00:00
    end: 2019-01-17 09:00:00
    step: 86400
    calendar: gregorian
  spacedomain:
    class: LatLonGrid
    latitude_extent: [51.0, 55.0]
    latitude_resolution: 1.0
    longitude_extent: [-2.0, 1.0]
    longitude_resolution: 1.0
    land_sea_mask:
      files: [{dir}/ancillary.bin]
      select: land_sea_mask
    flow_direction:
      files: [{dir}/ancillary.bin]
      select: flow_direction
  dataset:
    driving_a: {{files: [{dir}/driving.bin], select: driving_a}}
    driving_b: {{files: [{dir}/driving.bin], select: driving_b}}
    driving_c: {{files: [{dir}/driving.bin], select: driving_c}}
    ancillary_c: {{files: [{dir}/driving.bin], select: ancillary_c}}
subsurface:
  class: DummySubSurface
  timedomain: *window
  spacedomain: &grid
    class: LatLonGrid
    latitude_extent: [51.0, 55.0]
    latitude_resolution: 1.0
    longitude_extent: [-2.0, 1.0]
    longitude_resolution: 1.0
  dataset:
    driving_a: {{files: [{dir}/driving.bin], select: driving_a}}
  parameters:
    parameter_a: [1.0, '1']
openwater:
  class: DummyOpenWater
  timedomain: *window
  spacedomain: *grid
  dataset:
    ancillary_b: {{files: [{dir}/climatology.bin], select: ancillary_b}}
  parameters:
    parameter_c: [3.0, '1']
  constants:
    constant_c: [3.0, '1']
  records:
    output_x:
      86400: [point]
"#
        )
    }

    #[test]
    fn model_from_config_runs_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write_field_files(dir.path()).unwrap();
        let config_path = dir.path().join("model.yml");
        std::fs::write(&config_path, model_yaml(dir.path())).unwrap();

        let registry = dummy_registry();
        let mut model = Model::from_config(&config_path, &registry).unwrap();
        assert_eq!(model.identifier(), "from_config");

        model.simulate(None).unwrap();

        let path = model
            .component(Category::OpenWater)
            .unwrap()
            .record_path("run", "output_x", 86_400);
        let (_, values) = RecordReader::open(&path).unwrap().series(RecordMethod::Point);
        assert_eq!(values.len(), 16);
        assert_eq!(values[0][[0, 0]], 27.0);

        // configuration round-trip
        let rewritten = dir.path().join("rewritten.yml");
        model.to_config(&rewritten).unwrap();
        let reread = ModelConfig::read(&rewritten).unwrap();
        assert_eq!(reread.identifier, "from_config");
        assert!(reread.surfacelayer.is_some());

        let rebuilt = Model::from_model_config(reread, &registry).unwrap();
        assert_eq!(rebuilt.identifier(), "from_config");
    }

    #[test]
    fn config_with_wrong_category_block_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_field_files(dir.path()).unwrap();
        // the subsurface dummy declared under the openwater block
        let yaml = model_yaml(dir.path()).replace(
            "class: DummyOpenWater",
            "class: DummySubSurface",
        );
        let config_path = dir.path().join("model.yml");
        std::fs::write(&config_path, yaml).unwrap();

        let registry = dummy_registry();
        assert!(matches!(
            Model::from_config(&config_path, &registry),
            Err(ConfluenceError::Config(_))
        ));
    }

    #[test]
    fn parse_component_block() {
        let yaml = r#"
identifier: test
config_directory: /tmp/cfg
saving_directory: /tmp/out
subsurface:
  class: Dummy
  timedomain:
    start: 2019-01-01 09:00:00
    end: 2019-01-17 09:00:00
    step: 86400
    calendar: gregorian
  spacedomain:
    class: LatLonGrid
    latitude_extent: [51.0, 55.0]
    latitude_resolution: 1.0
    longitude_extent: [-2.0, 1.0]
    longitude_resolution: 1.0
  dataset:
    driving_a:
      files: [/tmp/data/driving.bin]
      select: driving_a
  parameters:
    parameter_a: [1.0, '1']
  records:
    output_x:
      86400: [point, cumulative]
"#;
        let config: ModelConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.identifier, "test");
        let blocks = config.component_blocks();
        assert_eq!(blocks.len(), 1);
        let (category, block) = blocks[0];
        assert_eq!(category, Category::SubSurface);
        assert_eq!(block.class, "Dummy");
        assert_eq!(block.timedomain.step, 86_400);
        assert!(matches!(
            block.parameters["parameter_a"].0,
            ParameterValueConfig::Scalar(v) if v == 1.0
        ));
        assert_eq!(block.records["output_x"][&86_400], vec!["point", "cumulative"]);

        let domain = block.timedomain.build().unwrap();
        assert_eq!(domain.len(), 16);
        let grid = block.spacedomain.build().unwrap();
        assert_eq!(grid.shape(), (4, 3));
    }

    #[test]
    fn unknown_class_is_a_config_error() {
        let registry = ComponentRegistry::new();
        assert!(matches!(
            registry.create("NoSuchComponent"),
            Err(ConfluenceError::Config(_))
        ));
    }

    #[test]
    fn digits_cover_the_eight_directions() {
        let digits =
            Array2::from_shape_vec((2, 4), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
        let directions = directions_from_digits(&digits).unwrap();
        assert_eq!((directions[[0, 0, 0]], directions[[0, 0, 1]]), (1, 0));
        assert_eq!((directions[[1, 3, 0]], directions[[1, 3, 1]]), (1, -1));

        let bad = Array2::from_elem((1, 1), 9.0);
        assert!(directions_from_digits(&bad).is_err());
    }

    #[test]
    fn parameter_field_values() {
        let yaml = "[[1.0, 2.0], [3.0, 4.0]]";
        let value: ParameterValueConfig = serde_yaml::from_str(yaml).unwrap();
        let ParameterValue::Field(field) = value.to_value().unwrap() else {
            panic!("expected a field");
        };
        assert_eq!(field.dim(), (2, 2));
        assert_eq!(field[[1, 0]], 3.0);
    }
}

//! Shared fixtures for the model scenarios: the 4x3 one-degree domain over
//! [51, 55] x [-2, 1], a 16-day daily window, and constant driving data
//! chosen so coupled runs have closed-form expected values.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{Array2, Array3};

use crate::component::{Component, ComponentAdapter, ParameterValue};
use crate::data::{ClimatologyFrequency, DataSet, DataVariable, FieldData};
use crate::example_components::{
    DummyNutrientOpenWater, DummyNutrientSubSurface, DummyNutrientSurfaceLayer, DummyOpenWater,
    DummySubSurface, DummySurfaceLayer,
};
use crate::record::RecordRequests;
use crate::space::LatLonGrid;
use crate::time::{Calendar, DateTime, TimeDomain};

pub const DAY: i64 = 86_400;

pub fn start() -> DateTime {
    DateTime::new(2019, 1, 1, 9, 0, 0)
}

pub fn end() -> DateTime {
    DateTime::new(2019, 1, 17, 9, 0, 0)
}

pub fn daily_window() -> TimeDomain {
    TimeDomain::from_start_end_step(start(), end(), DAY, Calendar::Gregorian).unwrap()
}

/// The test domain at the given resolution, with a full-land mask and an
/// eastward flow direction so routing-hungry components are satisfied.
pub fn routed_grid(resolution: f64) -> Arc<LatLonGrid> {
    let grid = LatLonGrid::from_extent_and_resolution(
        (51.0, 55.0),
        resolution,
        (-2.0, 1.0),
        resolution,
    )
    .unwrap();
    let shape = grid.shape();
    let mut directions = ndarray::Array3::zeros((shape.0, shape.1, 2));
    for j in 0..shape.0 {
        for i in 0..shape.1 {
            directions[[j, i, 1]] = 1; // eastwards
        }
    }
    Arc::new(
        grid.with_land_sea_mask(Array2::from_elem(shape, true))
            .unwrap()
            .with_flow_direction(directions)
            .unwrap(),
    )
}

pub fn plain_grid(resolution: f64) -> Arc<LatLonGrid> {
    Arc::new(
        LatLonGrid::from_extent_and_resolution((51.0, 55.0), resolution, (-2.0, 1.0), resolution)
            .unwrap(),
    )
}

fn dynamic(name: &str, value: f64, shape: (usize, usize)) -> DataVariable {
    let domain = daily_window();
    DataVariable {
        name: name.to_string(),
        units: "1".to_string(),
        data: FieldData::Dynamic {
            values: Array3::from_elem((domain.len(), shape.0, shape.1), value),
            timedomain: domain,
        },
        filenames: vec![],
    }
}

fn static_field(name: &str, value: f64, shape: (usize, usize)) -> DataVariable {
    DataVariable {
        name: name.to_string(),
        units: "1".to_string(),
        data: FieldData::Static {
            values: Array2::from_elem(shape, value),
        },
        filenames: vec![],
    }
}

fn monthly_field(name: &str, value: f64, shape: (usize, usize)) -> DataVariable {
    DataVariable {
        name: name.to_string(),
        units: "1".to_string(),
        data: FieldData::Climatologic {
            values: Array3::from_elem((12, shape.0, shape.1), value),
            frequency: ClimatologyFrequency::Monthly,
        },
        filenames: vec![],
    }
}

/// Surface layer dummy at the given resolution: driving_a = 1,
/// driving_b = 2, driving_c = 3, ancillary_c = 2.
pub fn surfacelayer(
    directory: &Path,
    resolution: f64,
    records: RecordRequests,
) -> ComponentAdapter {
    let grid = routed_grid(resolution);
    let shape = grid.shape();
    let mut dataset = DataSet::new();
    dataset.insert(dynamic("driving_a", 1.0, shape));
    dataset.insert(dynamic("driving_b", 2.0, shape));
    dataset.insert(dynamic("driving_c", 3.0, shape));
    dataset.insert(static_field("ancillary_c", 2.0, shape));
    ComponentAdapter::builder(
        Box::new(DummySurfaceLayer),
        directory,
        daily_window(),
        grid,
    )
    .with_dataset(dataset)
    .with_records(records)
    .build()
    .unwrap()
}

/// Subsurface dummy: driving_a = 1, parameter_a = 1.
pub fn subsurface(
    directory: &Path,
    resolution: f64,
    records: RecordRequests,
) -> ComponentAdapter {
    let grid = plain_grid(resolution);
    let shape = grid.shape();
    let mut dataset = DataSet::new();
    dataset.insert(dynamic("driving_a", 1.0, shape));
    ComponentAdapter::builder(Box::new(DummySubSurface), directory, daily_window(), grid)
        .with_dataset(dataset)
        .with_parameter("parameter_a", ParameterValue::Scalar(1.0), "1")
        .with_records(records)
        .build()
        .unwrap()
}

/// Open water dummy: ancillary_b = 1 everywhere, parameter_c = 3,
/// constant_c left at its default of 3.
pub fn openwater(
    directory: &Path,
    resolution: f64,
    records: RecordRequests,
) -> ComponentAdapter {
    let grid = plain_grid(resolution);
    let shape = grid.shape();
    let mut dataset = DataSet::new();
    dataset.insert(monthly_field("ancillary_b", 1.0, shape));
    ComponentAdapter::builder(Box::new(DummyOpenWater), directory, daily_window(), grid)
        .with_dataset(dataset)
        .with_parameter("parameter_c", ParameterValue::Scalar(3.0), "1")
        .with_records(records)
        .build()
        .unwrap()
}

pub fn nutrientsurfacelayer(directory: &Path, records: RecordRequests) -> ComponentAdapter {
    let grid = routed_grid(1.0);
    let shape = grid.shape();
    let mut dataset = DataSet::new();
    dataset.insert(dynamic("driving_d", 1.0, shape));
    dataset.insert(dynamic("driving_e", 2.0, shape));
    dataset.insert(dynamic("driving_f", 3.0, shape));
    dataset.insert(static_field("ancillary_e", 2.0, shape));
    ComponentAdapter::builder(
        Box::new(DummyNutrientSurfaceLayer),
        directory,
        daily_window(),
        grid,
    )
    .with_dataset(dataset)
    .with_records(records)
    .build()
    .unwrap()
}

pub fn nutrientsubsurface(directory: &Path, records: RecordRequests) -> ComponentAdapter {
    let grid = plain_grid(1.0);
    let shape = grid.shape();
    let mut dataset = DataSet::new();
    dataset.insert(dynamic("driving_d", 1.0, shape));
    ComponentAdapter::builder(
        Box::new(DummyNutrientSubSurface),
        directory,
        daily_window(),
        grid,
    )
    .with_dataset(dataset)
    .with_parameter("parameter_d", ParameterValue::Scalar(1.0), "1")
    .with_records(records)
    .build()
    .unwrap()
}

pub fn nutrientopenwater(directory: &Path, records: RecordRequests) -> ComponentAdapter {
    let grid = plain_grid(1.0);
    let shape = grid.shape();
    let mut dataset = DataSet::new();
    dataset.insert(monthly_field("ancillary_d", 1.0, shape));
    ComponentAdapter::builder(
        Box::new(DummyNutrientOpenWater),
        directory,
        daily_window(),
        grid,
    )
    .with_dataset(dataset)
    .with_parameter("parameter_e", ParameterValue::Scalar(3.0), "1")
    .with_records(records)
    .build()
    .unwrap()
}

/// Point records at the component step for the given variables.
pub fn point_records(variables: &[&str]) -> RecordRequests {
    let mut records: RecordRequests = IndexMap::new();
    for variable in variables {
        let mut windows = IndexMap::new();
        windows.insert(DAY, vec!["point".to_string()]);
        records.insert(variable.to_string(), windows);
    }
    records
}

/// A generic component with no inwards and no outwards, for boundary
/// cases.
#[derive(Debug)]
pub struct Loner {
    pub category: crate::component::Category,
}

impl Component for Loner {
    fn definition(&self) -> crate::component::ComponentDefinition {
        crate::component::ComponentDefinition::new(self.category)
    }

    fn initialise(
        &mut self,
        _ctx: crate::component::InitialiseContext,
    ) -> crate::errors::ConfluenceResult<()> {
        Ok(())
    }

    fn run(
        &mut self,
        _ctx: crate::component::RunContext,
    ) -> crate::errors::ConfluenceResult<crate::component::RunOutput> {
        Ok(crate::component::RunOutput::default())
    }

    fn finalise(
        &mut self,
        _ctx: crate::component::FinaliseContext,
    ) -> crate::errors::ConfluenceResult<()> {
        Ok(())
    }
}

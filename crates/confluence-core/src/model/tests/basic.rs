//! Coupled runs of the dummy components on a shared grid and step.

use indexmap::IndexMap;

use super::support::*;
use crate::component::Category;
use crate::errors::ConfluenceResult;
use crate::model::ModelBuilder;
use crate::record::{RecordMethod, RecordReader};
use crate::time::{Calendar, TimeDomain};

/// Point series of a recorded variable at cell (0, 0).
fn series(
    model: &crate::model::Model,
    category: Category,
    variable: &str,
) -> ConfluenceResult<Vec<f64>> {
    let path = model
        .component(category)
        .unwrap()
        .record_path("run", variable, DAY);
    let reader = RecordReader::open(&path)?;
    let (_, values) = reader.series(RecordMethod::Point);
    Ok(values.iter().map(|v| v[[0, 0]]).collect())
}

#[test]
fn three_dummies_on_the_shared_grid() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = ModelBuilder::new("basic", dir.path())
        .with_component(surfacelayer(
            dir.path(),
            1.0,
            point_records(&["transfer_i", "transfer_j", "state_a", "state_b"]),
        ))
        .with_component(subsurface(dir.path(), 1.0, point_records(&["transfer_k"])))
        .with_component(openwater(
            dir.path(),
            1.0,
            point_records(&["transfer_l", "output_x"]),
        ))
        .build()
        .unwrap();

    model.simulate(None).unwrap();

    let state_a = series(&model, Category::SurfaceLayer, "state_a").unwrap();
    let state_b = series(&model, Category::SurfaceLayer, "state_b").unwrap();
    assert_eq!(state_a.len(), 16);
    assert_eq!(state_a[15], 16.0);
    assert_eq!(state_b[15], 32.0);
    assert!(state_a.iter().enumerate().all(|(t, &v)| v == t as f64 + 1.0));

    // first two steps computed by hand from the transfer equations
    let transfer_i = series(&model, Category::SurfaceLayer, "transfer_i").unwrap();
    let transfer_j = series(&model, Category::SurfaceLayer, "transfer_j").unwrap();
    let transfer_k = series(&model, Category::SubSurface, "transfer_k").unwrap();
    let transfer_l = series(&model, Category::OpenWater, "transfer_l").unwrap();
    assert_eq!(transfer_i[0], 5.0);
    assert_eq!(transfer_j[0], 8.0);
    assert_eq!(transfer_k[0], 2.0);
    assert_eq!(transfer_l[0], 9.0);
    assert_eq!(transfer_i[1], 16.0);
    assert_eq!(transfer_j[1], 12.0);

    // transfer_i = driving_a + driving_b + transfer_l + ancillary_c * state_a,
    // the open water value carrying the one-tick lag of later-in-order
    // producers
    for t in 0..16 {
        let lagged_l = if t == 0 { 0.0 } else { transfer_l[t - 1] };
        assert_eq!(transfer_i[t], 1.0 + 2.0 + lagged_l + 2.0 * state_a[t]);
    }

    // output_x = parameter_c * transfer_j + constant_c on every cell
    let output_x = series(&model, Category::OpenWater, "output_x").unwrap();
    assert_eq!(output_x[0], 27.0);
    assert_eq!(output_x[1], 39.0);
    for t in 0..16 {
        assert_eq!(output_x[t], 3.0 * transfer_j[t] + 3.0);
    }
}

#[test]
fn six_dummies_couple_the_two_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = ModelBuilder::new("sixfold", dir.path())
        .with_component(surfacelayer(dir.path(), 1.0, IndexMap::new()))
        .with_component(subsurface(dir.path(), 1.0, IndexMap::new()))
        .with_component(openwater(dir.path(), 1.0, IndexMap::new()))
        .with_component(nutrientsurfacelayer(
            dir.path(),
            point_records(&["transfer_h", "state_a"]),
        ))
        .with_component(nutrientsubsurface(dir.path(), IndexMap::new()))
        .with_component(nutrientopenwater(
            dir.path(),
            point_records(&["output_y"]),
        ))
        .build()
        .unwrap();

    model.simulate(None).unwrap();

    let state_a = series(&model, Category::NutrientSurfaceLayer, "state_a").unwrap();
    assert_eq!(state_a[15], 16.0);

    // transfer_h = ancillary_e * state_a
    let transfer_h = series(&model, Category::NutrientSurfaceLayer, "transfer_h").unwrap();
    for t in 0..16 {
        assert_eq!(transfer_h[t], 2.0 * (t as f64 + 1.0));
    }

    // with no water-cycle producer of transfer_p, the optional inward of
    // the nutrient open water component stays zero and output_y is just
    // the nutrient-side algebra: ancillary_d * transfer_e - state_a
    let output_y = series(&model, Category::NutrientOpenWater, "output_y").unwrap();
    assert_eq!(output_y[0], 7.0);
}

#[test]
fn initial_transfers_file_seeds_the_first_tick() {
    let dir = tempfile::tempdir().unwrap();

    // seed transfer_l with ones instead of the cold-start zeros
    let seed_path = dir.path().join("initial_transfers.bin");
    crate::data::FieldFile::new(vec![crate::data::DataVariable {
        name: "transfer_l".to_string(),
        units: "1".to_string(),
        data: crate::data::FieldData::Static {
            values: ndarray::Array2::from_elem((4, 3), 1.0),
        },
        filenames: vec![],
    }])
    .write(&seed_path)
    .unwrap();

    let mut model = ModelBuilder::new("seeded", dir.path())
        .with_component(surfacelayer(
            dir.path(),
            1.0,
            point_records(&["transfer_i"]),
        ))
        .with_component(subsurface(dir.path(), 1.0, IndexMap::new()))
        .with_component(openwater(dir.path(), 1.0, IndexMap::new()))
        .with_initial_transfers_file(&seed_path)
        .unwrap()
        .build()
        .unwrap();

    model.simulate(None).unwrap();

    let transfer_i = series(&model, Category::SurfaceLayer, "transfer_i").unwrap();
    // transfer_i = 1 + 2 + transfer_l + 2 * state_a, with the seeded
    // transfer_l = 1 on the first tick instead of zero
    assert_eq!(transfer_i[0], 6.0);
}

#[test]
fn component_without_transfers_still_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = crate::component::ComponentAdapter::builder(
        Box::new(Loner {
            category: Category::SubSurface,
        }),
        dir.path(),
        daily_window(),
        plain_grid(1.0),
    )
    .build()
    .unwrap();

    let mut model = ModelBuilder::new("loner", dir.path())
        .with_component(adapter)
        .build()
        .unwrap();
    model.simulate(None).unwrap();
}

#[test]
fn empty_window_produces_no_records_and_no_dumps() {
    let dir = tempfile::tempdir().unwrap();
    let window = TimeDomain::from_start_end_step(start(), start(), DAY, Calendar::Gregorian)
        .unwrap();
    let adapter = crate::component::ComponentAdapter::builder(
        Box::new(Loner {
            category: Category::OpenWater,
        }),
        dir.path(),
        window,
        plain_grid(1.0),
    )
    .build()
    .unwrap();

    let mut model = ModelBuilder::new("empty", dir.path())
        .with_component(adapter)
        .build()
        .unwrap();
    model.simulate(Some(2 * DAY)).unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.contains("dump") || name.contains("records")
        })
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn coupling_graph_renders_to_dot() {
    let dir = tempfile::tempdir().unwrap();
    let model = ModelBuilder::new("dot", dir.path())
        .with_component(surfacelayer(dir.path(), 1.0, IndexMap::new()))
        .with_component(subsurface(dir.path(), 1.0, IndexMap::new()))
        .with_component(openwater(dir.path(), 1.0, IndexMap::new()))
        .build()
        .unwrap();

    let dot = model.as_dot();
    assert!(dot.contains("surfacelayer"));
    assert!(dot.contains("transfer_i"));
}

#[test]
fn mean_transfers_aggregate_over_slower_consumers() {
    // surface layer at 1 day feeding a subsurface at 2 days: each slow
    // step must see the mean of exactly two fast samples
    let dir = tempfile::tempdir().unwrap();
    let slow_window =
        TimeDomain::from_start_end_step(start(), end(), 2 * DAY, Calendar::Gregorian).unwrap();

    let grid = plain_grid(1.0);
    let shape = grid.shape();
    let mut dataset = crate::data::DataSet::new();
    dataset.insert(crate::data::DataVariable {
        name: "driving_a".to_string(),
        units: "1".to_string(),
        data: crate::data::FieldData::Dynamic {
            values: ndarray::Array3::from_elem((slow_window.len(), shape.0, shape.1), 1.0),
            timedomain: slow_window.clone(),
        },
        filenames: vec![],
    });
    let slow_subsurface = crate::component::ComponentAdapter::builder(
        Box::new(crate::example_components::DummySubSurface),
        dir.path(),
        slow_window,
        grid,
    )
    .with_dataset(dataset)
    .with_parameter(
        "parameter_a",
        crate::component::ParameterValue::Scalar(1.0),
        "1",
    )
    .with_records({
        // the recording window must be a multiple of the component step
        let mut records: crate::record::RecordRequests = IndexMap::new();
        let mut windows = IndexMap::new();
        windows.insert(2 * DAY, vec!["point".to_string()]);
        records.insert("transfer_k".to_string(), windows);
        records
    })
    .build()
    .unwrap();

    let mut model = ModelBuilder::new("mixed_steps", dir.path())
        .with_component(surfacelayer(
            dir.path(),
            1.0,
            point_records(&["transfer_i"]),
        ))
        .with_component(slow_subsurface)
        .with_component(openwater(
            dir.path(),
            1.0,
            point_records(&["transfer_n"]),
        ))
        .build()
        .unwrap();

    model.simulate(None).unwrap();

    let transfer_i = series(&model, Category::SurfaceLayer, "transfer_i").unwrap();
    assert_eq!(transfer_i.len(), 16);

    let path = model
        .component(Category::SubSurface)
        .unwrap()
        .record_path("run", "transfer_k", 2 * DAY);
    let reader = RecordReader::open(&path).unwrap();
    let (_, slow_k) = reader.series(RecordMethod::Point);
    assert_eq!(slow_k.len(), 8);

    // first two slow steps computed by hand
    assert_eq!(slow_k[0][[0, 0]], 26.0);
    assert_eq!(slow_k[1][[0, 0]], 75.0);

    // transfer_k = 1 + mean of the open water samples since the previous
    // slow step + state_a: every slow read after the first sees the mean
    // of exactly two fast samples (the first interval is one short, the
    // open water component firing later in order)
    let transfer_n = series(&model, Category::OpenWater, "transfer_n").unwrap();
    for s in 2..=8usize {
        let expected =
            1.0 + (transfer_n[2 * s - 3] + transfer_n[2 * s - 2]) / 2.0 + s as f64;
        assert_eq!(slow_k[s - 1][[0, 0]], expected);
    }
}

//! Spin-up cycles: repeated sub-windows carrying states forward.

use indexmap::IndexMap;

use super::support::*;
use crate::component::Category;
use crate::model::ModelBuilder;
use crate::record::{RecordMethod, RecordReader};
use crate::time::DateTime;

#[test]
fn spin_up_carries_states_into_the_main_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = ModelBuilder::new("spun", dir.path())
        .with_component(surfacelayer(dir.path(), 1.0, point_records(&["state_a"])))
        .with_component(subsurface(dir.path(), 1.0, IndexMap::new()))
        .with_component(openwater(dir.path(), 1.0, IndexMap::new()))
        .build()
        .unwrap();

    // two cycles of a four-day sub-window: eight extra daily increments
    model
        .spin_up(start(), DateTime::new(2019, 1, 5, 9, 0, 0), 2, None)
        .unwrap();
    model.simulate(None).unwrap();

    let path = model
        .component(Category::SurfaceLayer)
        .unwrap()
        .record_path("run", "state_a", DAY);
    let (_, state_a) = RecordReader::open(&path).unwrap().series(RecordMethod::Point);
    assert_eq!(state_a.len(), 16);
    assert_eq!(state_a[0][[0, 0]], 9.0);
    assert_eq!(state_a[15][[0, 0]], 24.0);

    // each spin-up cycle keeps its own record files
    for cycle in 1..=2 {
        let tag = format!("spinup-{cycle}");
        let cycle_path = model
            .component(Category::SurfaceLayer)
            .unwrap()
            .record_path(&tag, "state_a", DAY);
        let (_, values) = RecordReader::open(&cycle_path)
            .unwrap()
            .series(RecordMethod::Point);
        assert_eq!(values.len(), 4);
        // states carry across the cycle boundary
        let offset = (cycle - 1) as f64 * 4.0;
        assert_eq!(values[0][[0, 0]], offset + 1.0);
        assert_eq!(values[3][[0, 0]], offset + 4.0);
    }
}

#[test]
fn spin_up_with_zero_cycles_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = ModelBuilder::new("unspun", dir.path())
        .with_component(surfacelayer(dir.path(), 1.0, point_records(&["state_a"])))
        .with_component(subsurface(dir.path(), 1.0, IndexMap::new()))
        .with_component(openwater(dir.path(), 1.0, IndexMap::new()))
        .build()
        .unwrap();

    model
        .spin_up(start(), DateTime::new(2019, 1, 5, 9, 0, 0), 0, None)
        .unwrap();
    model.simulate(None).unwrap();

    let path = model
        .component(Category::SurfaceLayer)
        .unwrap()
        .record_path("run", "state_a", DAY);
    let (_, state_a) = RecordReader::open(&path).unwrap().series(RecordMethod::Point);
    // states start from their cold initial conditions
    assert_eq!(state_a[0][[0, 0]], 1.0);
    assert_eq!(state_a[15][[0, 0]], 16.0);
}

#[test]
fn spin_up_window_must_fit_the_component_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = ModelBuilder::new("ragged", dir.path())
        .with_component(surfacelayer(dir.path(), 1.0, IndexMap::new()))
        .with_component(subsurface(dir.path(), 1.0, IndexMap::new()))
        .with_component(openwater(dir.path(), 1.0, IndexMap::new()))
        .build()
        .unwrap();

    // half a day is not a whole number of daily steps
    let end = DateTime::new(2019, 1, 4, 21, 0, 0);
    assert!(model.spin_up(start(), end, 1, None).is_err());
}

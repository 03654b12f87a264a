//! The exchanger mediates every transfer flowing between components,
//! buffering and resampling values across mismatched space and time
//! resolutions.
//!
//! For each wiring `(producer, consumer, transfer)` the exchanger holds an
//! accumulator whose behaviour depends on the transfer's aggregation
//! method and on the ratio between the two components' timesteps. Space
//! remapping is applied once, on emission from the producer, so temporal
//! accumulation always happens on the consumer grid.

use indexmap::IndexMap;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{Category, ComponentAdapter, TransferMethod};
use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::space::RemapWeights;

/// Dynamic contents of one consumer-side accumulator, dumped and restored
/// byte-identical across a resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsumerState {
    /// Latest sample remapped onto the consumer grid, held for consumers
    /// ticking faster than the producer.
    last: Array2<f64>,
    /// Accumulated samples since the last retrieval.
    acc: Array2<f64>,
    count: usize,
}

struct ConsumerBuffer {
    consumer: Category,
    method: TransferMethod,
    /// Producer and consumer timesteps in units of the base period tick.
    r_src: usize,
    r_dst: usize,
    /// None when producer and consumer share the same grid layout.
    weights: Option<RemapWeights>,
    state: ConsumerState,
}

impl ConsumerBuffer {
    fn remap(&self, value: &Array2<f64>) -> ConfluenceResult<Array2<f64>> {
        match &self.weights {
            None => Ok(value.clone()),
            Some(w) => match self.method {
                TransferMethod::Sum | TransferMethod::Mean => w.apply(value),
                TransferMethod::Min => w.apply_min(value),
                TransferMethod::Max => w.apply_max(value),
            },
        }
    }

    fn fold(&mut self, remapped: Array2<f64>) {
        let state = &mut self.state;
        if state.count == 0 {
            state.acc.assign(&remapped);
        } else {
            match self.method {
                TransferMethod::Mean | TransferMethod::Sum => state.acc += &remapped,
                TransferMethod::Min => Zip::from(&mut state.acc)
                    .and(&remapped)
                    .for_each(|a, &v| *a = a.min(v)),
                TransferMethod::Max => Zip::from(&mut state.acc)
                    .and(&remapped)
                    .for_each(|a, &v| *a = a.max(v)),
            }
        }
        state.count += 1;
        state.last = remapped;
    }

    fn drain(&mut self) -> Array2<f64> {
        let state = &mut self.state;
        let value = match self.method {
            TransferMethod::Mean => {
                if state.count > 0 {
                    &state.acc / state.count as f64
                } else {
                    state.last.clone()
                }
            }
            TransferMethod::Sum => {
                if self.r_src <= self.r_dst {
                    // the accumulator holds exactly the samples of this
                    // destination interval
                    state.acc.clone()
                } else {
                    // slower producer: deliver the share of the source
                    // interval covered by this destination interval
                    &state.last * (self.r_dst as f64 / self.r_src as f64)
                }
            }
            TransferMethod::Min | TransferMethod::Max => {
                if state.count > 0 {
                    state.acc.clone()
                } else {
                    state.last.clone()
                }
            }
        };
        state.acc.fill(0.0);
        state.count = 0;
        value
    }
}

struct Transfer {
    name: String,
    src: Category,
    units: String,
    method: TransferMethod,
    src_shape: (usize, usize),
    /// Latest raw sample on the producer grid, kept for dumps and
    /// initial-transfer seeding.
    latest: Array2<f64>,
    consumers: Vec<ConsumerBuffer>,
}

/// Dumped contents of the exchanger: the latest sample and every
/// consumer-side accumulator of every transfer, in wiring order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangerState {
    transfers: Vec<TransferState>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    name: String,
    src: Category,
    latest: Array2<f64>,
    consumers: Vec<(Category, ConsumerState)>,
}

impl ExchangerState {
    /// Latest published sample of a transfer, on its producer grid.
    pub fn latest(&self, name: &str) -> Option<&Array2<f64>> {
        self.transfers
            .iter()
            .find(|t| t.name == name)
            .map(|t| &t.latest)
    }
}

/// Buffers and resamples named transfers between components.
///
/// Holds the authoritative value of every in-flight transfer. Buffers are
/// zero-seeded on a cold start; components must tolerate zero inwards on
/// their first timestep.
pub struct Exchanger {
    transfers: Vec<Transfer>,
    /// (producer, name) -> transfer index, for publishing.
    by_producer: IndexMap<(Category, String), usize>,
    /// (consumer, name) -> transfer index, for retrieval.
    routes: IndexMap<(Category, String), usize>,
    /// Optional inwards with no producer: the consumer receives zeros.
    zero_supplies: IndexMap<(Category, String), (usize, usize)>,
}

impl Exchanger {
    /// Wire the transfers between the given components.
    ///
    /// For every declared inward of every component there must be exactly
    /// one producing component whose category matches and which declares
    /// the same transfer in its outwards; a missing producer fails wiring
    /// for required inwards and supplies zeros to optional ones, and more
    /// than one candidate producer is ambiguous. Producer-side
    /// declarations are checked back against the consumers they name.
    pub fn build(adapters: &IndexMap<Category, ComponentAdapter>) -> ConfluenceResult<Self> {
        let base_step = adapters
            .values()
            .map(|a| a.timedomain().step_seconds())
            .min()
            .ok_or_else(|| {
                ConfluenceError::Config("cannot wire a model without components".to_string())
            })?;
        let ratio = |category: Category| -> usize {
            (adapters[&category].timedomain().step_seconds() / base_step) as usize
        };

        // one transfer entry per declared outward
        let mut transfers: Vec<Transfer> = Vec::new();
        let mut by_producer: IndexMap<(Category, String), usize> = IndexMap::new();
        for (category, adapter) in adapters {
            for outward in &adapter.definition().outwards {
                let key = (*category, outward.name.clone());
                if by_producer.contains_key(&key) {
                    return Err(ConfluenceError::Config(format!(
                        "outward '{}' declared twice by the {} component",
                        outward.name, category
                    )));
                }
                let shape = adapter.spacedomain().shape();
                by_producer.insert(key, transfers.len());
                transfers.push(Transfer {
                    name: outward.name.clone(),
                    src: *category,
                    units: outward.units.clone(),
                    method: outward.method,
                    src_shape: shape,
                    latest: Array2::zeros(shape),
                    consumers: Vec::new(),
                });
            }
        }

        // wire each inward to its unique producer
        let mut routes: IndexMap<(Category, String), usize> = IndexMap::new();
        let mut zero_supplies: IndexMap<(Category, String), (usize, usize)> = IndexMap::new();
        for (category, adapter) in adapters {
            for inward in &adapter.definition().inwards {
                let candidates: Vec<usize> = transfers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| {
                        t.name == inward.name
                            && adapters[&t.src]
                                .definition()
                                .outward(&t.name)
                                .is_some_and(|o| o.to.contains(category))
                    })
                    .map(|(index, _)| index)
                    .collect();

                if candidates.len() > 1 {
                    return Err(ConfluenceError::WiringAmbiguous {
                        transfer: inward.name.clone(),
                        consumer: *category,
                    });
                }
                // a single candidate from the wrong category is a category
                // mismatch and fails like a missing producer
                let index = candidates
                    .first()
                    .copied()
                    .filter(|&i| transfers[i].src == inward.from);
                let Some(index) = index else {
                    if inward.required {
                        return Err(ConfluenceError::WiringMissing {
                            transfer: inward.name.clone(),
                            consumer: *category,
                        });
                    }
                    debug!(
                        transfer = %inward.name,
                        consumer = %category,
                        "optional inward without producer, supplying zeros"
                    );
                    zero_supplies.insert(
                        (*category, inward.name.clone()),
                        adapter.spacedomain().shape(),
                    );
                    continue;
                };

                let transfer = &transfers[index];
                if transfer.units.trim() != inward.units.trim() {
                    return Err(ConfluenceError::Units {
                        name: inward.name.clone(),
                        expected: inward.units.clone(),
                        actual: transfer.units.clone(),
                    });
                }
                if transfer.method != inward.method {
                    return Err(ConfluenceError::Config(format!(
                        "transfer '{}' declared with different aggregation methods \
                         by its producer and its consumer",
                        inward.name
                    )));
                }

                let src_grid = adapters[&transfer.src].spacedomain().clone();
                let dst_grid = adapter.spacedomain();
                let weights = if src_grid.same_layout_as(dst_grid) {
                    None
                } else {
                    Some(match inward.method {
                        TransferMethod::Sum => RemapWeights::conservative(&src_grid, dst_grid)?,
                        _ => RemapWeights::area_weighted(&src_grid, dst_grid)?,
                    })
                };

                let dst_shape = dst_grid.shape();
                let r_src = ratio(transfer.src);
                routes.insert((*category, inward.name.clone()), index);
                transfers[index].consumers.push(ConsumerBuffer {
                    consumer: *category,
                    method: inward.method,
                    r_src,
                    r_dst: ratio(*category),
                    weights,
                    state: ConsumerState {
                        last: Array2::zeros(dst_shape),
                        acc: Array2::zeros(dst_shape),
                        count: 0,
                    },
                });
            }
        }

        // referential integrity: a target category present in the model
        // must declare the inward its producer aims at it
        for transfer in &transfers {
            let outward = adapters[&transfer.src]
                .definition()
                .outward(&transfer.name)
                .expect("transfer built from this outward");
            for target in &outward.to {
                if let Some(consumer) = adapters.get(target) {
                    let declared = consumer
                        .definition()
                        .inward(&transfer.name)
                        .is_some_and(|i| i.from == transfer.src);
                    if !declared {
                        return Err(ConfluenceError::Config(format!(
                            "outward '{}' of the {} component targets the {target} \
                             component, which does not declare it as an inward",
                            transfer.name, transfer.src
                        )));
                    }
                }
            }
        }

        Ok(Self {
            transfers,
            by_producer,
            routes,
            zero_supplies,
        })
    }

    /// Names of the transfers held, in wiring order.
    pub fn transfer_names(&self) -> impl Iterator<Item = &str> {
        self.transfers.iter().map(|t| t.name.as_str())
    }

    /// Seed buffers from an explicit initial-transfers map, given on the
    /// producer grid of each transfer.
    pub fn set_initial_transfers(
        &mut self,
        initial: &IndexMap<String, Array2<f64>>,
    ) -> ConfluenceResult<()> {
        for (name, value) in initial {
            let transfer = self
                .transfers
                .iter_mut()
                .find(|t| &t.name == name)
                .ok_or_else(|| {
                    ConfluenceError::Config(format!(
                        "initial value for unknown transfer '{name}'"
                    ))
                })?;
            check_shape(name, transfer.src_shape, value)?;
            transfer.latest.assign(value);
            for buffer in &mut transfer.consumers {
                let remapped = buffer.remap(value)?;
                buffer.state.last = remapped;
                buffer.state.acc.fill(0.0);
                buffer.state.count = 0;
            }
        }
        Ok(())
    }

    /// Publish a newly produced sample of a transfer, remapping it onto
    /// every consumer grid and folding it into their accumulators.
    pub fn publish(
        &mut self,
        producer: Category,
        name: &str,
        value: &Array2<f64>,
    ) -> ConfluenceResult<()> {
        let index = self
            .by_producer
            .get(&(producer, name.to_string()))
            .ok_or_else(|| {
                ConfluenceError::Config(format!(
                    "the {producer} component does not declare outward '{name}'"
                ))
            })?;
        let transfer = &mut self.transfers[*index];
        check_shape(name, transfer.src_shape, value)?;
        transfer.latest.assign(value);
        for buffer in &mut transfer.consumers {
            let remapped = buffer.remap(value)?;
            buffer.fold(remapped);
        }
        Ok(())
    }

    /// Yield the time-aggregated value of a transfer for one consumer
    /// timestep. Accumulators reset on read; one read per (consumer
    /// timestep, transfer).
    pub fn retrieve(&mut self, name: &str, consumer: Category) -> ConfluenceResult<Array2<f64>> {
        let key = (consumer, name.to_string());
        if let Some(&index) = self.routes.get(&key) {
            let buffer = self.transfers[index]
                .consumers
                .iter_mut()
                .find(|b| b.consumer == consumer)
                .expect("route points at a wired consumer");
            return Ok(buffer.drain());
        }
        if let Some(shape) = self.zero_supplies.get(&key) {
            return Ok(Array2::zeros(*shape));
        }
        Err(ConfluenceError::Config(format!(
            "transfer '{name}' is not wired towards the {consumer} component"
        )))
    }

    /// Dumpable contents of every buffer.
    pub fn snapshot(&self) -> ExchangerState {
        ExchangerState {
            transfers: self
                .transfers
                .iter()
                .map(|t| TransferState {
                    name: t.name.clone(),
                    src: t.src,
                    latest: t.latest.clone(),
                    consumers: t
                        .consumers
                        .iter()
                        .map(|b| (b.consumer, b.state.clone()))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Restore every buffer byte-identical from a dump.
    pub fn restore(&mut self, state: &ExchangerState) -> ConfluenceResult<()> {
        for dumped in &state.transfers {
            let transfer = self
                .transfers
                .iter_mut()
                .find(|t| t.name == dumped.name && t.src == dumped.src)
                .ok_or_else(|| {
                    ConfluenceError::Config(format!(
                        "dump carries unknown transfer '{}'",
                        dumped.name
                    ))
                })?;
            check_shape(&dumped.name, transfer.src_shape, &dumped.latest)?;
            transfer.latest.assign(&dumped.latest);
            for (category, consumer_state) in &dumped.consumers {
                let buffer = transfer
                    .consumers
                    .iter_mut()
                    .find(|b| b.consumer == *category)
                    .ok_or_else(|| {
                        ConfluenceError::Config(format!(
                            "dump carries unknown consumer {category} for transfer '{}'",
                            dumped.name
                        ))
                    })?;
                buffer.state = consumer_state.clone();
            }
        }
        Ok(())
    }
}

fn check_shape(name: &str, expected: (usize, usize), value: &Array2<f64>) -> ConfluenceResult<()> {
    if value.dim() != expected {
        return Err(ConfluenceError::Shape {
            name: name.to_string(),
            expected: vec![expected.0, expected.1],
            actual: value.shape().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{
        Component, ComponentDefinition, FinaliseContext, InitialiseContext, InwardSpec,
        OutwardSpec, RunContext, RunOutput,
    };
    use crate::space::LatLonGrid;
    use crate::time::{Calendar, DateTime, TimeDomain};
    use std::sync::Arc;

    /// A component declaring arbitrary inwards and outwards, used to
    /// exercise the exchanger wiring in isolation.
    #[derive(Debug)]
    struct Probe {
        category: Category,
        inwards: Vec<InwardSpec>,
        outwards: Vec<OutwardSpec>,
    }

    impl Component for Probe {
        fn definition(&self) -> ComponentDefinition {
            let mut definition = ComponentDefinition::new(self.category);
            definition.inwards = self.inwards.clone();
            definition.outwards = self.outwards.clone();
            definition
        }

        fn initialise(&mut self, _ctx: InitialiseContext) -> ConfluenceResult<()> {
            Ok(())
        }

        fn run(&mut self, _ctx: RunContext) -> ConfluenceResult<RunOutput> {
            Ok(RunOutput::default())
        }

        fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
            Ok(())
        }
    }

    fn grid() -> Arc<LatLonGrid> {
        Arc::new(
            LatLonGrid::from_extent_and_resolution((51.0, 55.0), 1.0, (-2.0, 1.0), 1.0).unwrap(),
        )
    }

    fn fine_grid() -> Arc<LatLonGrid> {
        Arc::new(
            LatLonGrid::from_extent_and_resolution((51.0, 55.0), 0.5, (-2.0, 1.0), 0.5).unwrap(),
        )
    }

    fn domain(step_hours: i64) -> TimeDomain {
        let start = DateTime::new(2019, 1, 1, 0, 0, 0);
        TimeDomain::from_start_end_step(
            start,
            start.add_seconds(4 * 86_400, Calendar::Gregorian),
            step_hours * 3_600,
            Calendar::Gregorian,
        )
        .unwrap()
    }

    fn adapter(
        category: Category,
        step_hours: i64,
        grid: Arc<LatLonGrid>,
        inwards: Vec<InwardSpec>,
        outwards: Vec<OutwardSpec>,
    ) -> ComponentAdapter {
        ComponentAdapter::builder(
            Box::new(Probe {
                category,
                inwards,
                outwards,
            }),
            std::env::temp_dir(),
            domain(step_hours),
            grid,
        )
        .build()
        .unwrap()
    }

    fn pair(
        src_step: i64,
        dst_step: i64,
        method: TransferMethod,
    ) -> (IndexMap<Category, ComponentAdapter>, Exchanger) {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::SurfaceLayer,
            adapter(
                Category::SurfaceLayer,
                src_step,
                grid(),
                vec![],
                vec![OutwardSpec::new(
                    "flux",
                    "1",
                    &[Category::SubSurface],
                    method,
                )],
            ),
        );
        adapters.insert(
            Category::SubSurface,
            adapter(
                Category::SubSurface,
                dst_step,
                grid(),
                vec![InwardSpec::new(
                    "flux",
                    "1",
                    Category::SurfaceLayer,
                    method,
                )],
                vec![],
            ),
        );
        let exchanger = Exchanger::build(&adapters).unwrap();
        (adapters, exchanger)
    }

    fn constant(value: f64) -> Array2<f64> {
        Array2::from_elem((4, 3), value)
    }

    #[test]
    fn fast_source_mean_is_averaged() {
        let (_adapters, mut exchanger) = pair(6, 24, TransferMethod::Mean);
        for v in [1.0, 2.0, 3.0, 6.0] {
            exchanger
                .publish(Category::SurfaceLayer, "flux", &constant(v))
                .unwrap();
        }
        let value = exchanger.retrieve("flux", Category::SubSurface).unwrap();
        assert_eq!(value[[0, 0]], 3.0);
    }

    #[test]
    fn fast_source_sum_is_summed() {
        let (_adapters, mut exchanger) = pair(6, 24, TransferMethod::Sum);
        for v in [1.0, 2.0, 3.0, 6.0] {
            exchanger
                .publish(Category::SurfaceLayer, "flux", &constant(v))
                .unwrap();
        }
        let value = exchanger.retrieve("flux", Category::SubSurface).unwrap();
        assert_eq!(value[[0, 0]], 12.0);
    }

    #[test]
    fn fast_source_extrema() {
        let (_a, mut min_ex) = pair(6, 24, TransferMethod::Min);
        let (_b, mut max_ex) = pair(6, 24, TransferMethod::Max);
        for v in [4.0, -1.0, 3.0] {
            min_ex
                .publish(Category::SurfaceLayer, "flux", &constant(v))
                .unwrap();
            max_ex
                .publish(Category::SurfaceLayer, "flux", &constant(v))
                .unwrap();
        }
        assert_eq!(
            min_ex.retrieve("flux", Category::SubSurface).unwrap()[[0, 0]],
            -1.0
        );
        assert_eq!(
            max_ex.retrieve("flux", Category::SubSurface).unwrap()[[0, 0]],
            4.0
        );
    }

    #[test]
    fn accumulators_reset_on_read() {
        let (_adapters, mut exchanger) = pair(6, 24, TransferMethod::Sum);
        exchanger
            .publish(Category::SurfaceLayer, "flux", &constant(5.0))
            .unwrap();
        let first = exchanger.retrieve("flux", Category::SubSurface).unwrap();
        assert_eq!(first[[0, 0]], 5.0);
        // nothing published since: the interval sum restarts from zero
        let second = exchanger.retrieve("flux", Category::SubSurface).unwrap();
        assert_eq!(second[[0, 0]], 0.0);
    }

    #[test]
    fn slow_source_holds_latest_for_mean() {
        let (_adapters, mut exchanger) = pair(24, 6, TransferMethod::Mean);
        exchanger
            .publish(Category::SurfaceLayer, "flux", &constant(8.0))
            .unwrap();
        for _ in 0..4 {
            let value = exchanger.retrieve("flux", Category::SubSurface).unwrap();
            assert_eq!(value[[0, 0]], 8.0);
        }
    }

    #[test]
    fn slow_source_prorates_sums() {
        let (_adapters, mut exchanger) = pair(24, 6, TransferMethod::Sum);
        exchanger
            .publish(Category::SurfaceLayer, "flux", &constant(8.0))
            .unwrap();
        let mut total = 0.0;
        for _ in 0..4 {
            total += exchanger.retrieve("flux", Category::SubSurface).unwrap()[[0, 0]];
        }
        // the four consumer intervals recover the full source sample
        assert_eq!(total, 8.0);
    }

    #[test]
    fn cold_start_reads_zero() {
        let (_adapters, mut exchanger) = pair(24, 24, TransferMethod::Mean);
        let value = exchanger.retrieve("flux", Category::SubSurface).unwrap();
        assert_eq!(value.sum(), 0.0);
    }

    #[test]
    fn initial_transfers_seed_the_buffers() {
        let (_adapters, mut exchanger) = pair(24, 24, TransferMethod::Mean);
        let mut initial = IndexMap::new();
        initial.insert("flux".to_string(), constant(2.5));
        exchanger.set_initial_transfers(&initial).unwrap();
        let value = exchanger.retrieve("flux", Category::SubSurface).unwrap();
        assert_eq!(value[[0, 0]], 2.5);
    }

    #[test]
    fn publish_remaps_onto_the_consumer_grid() {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::SurfaceLayer,
            adapter(
                Category::SurfaceLayer,
                24,
                grid(),
                vec![],
                vec![OutwardSpec::new(
                    "flux",
                    "1",
                    &[Category::SubSurface],
                    TransferMethod::Sum,
                )],
            ),
        );
        adapters.insert(
            Category::SubSurface,
            adapter(
                Category::SubSurface,
                24,
                fine_grid(),
                vec![InwardSpec::new(
                    "flux",
                    "1",
                    Category::SurfaceLayer,
                    TransferMethod::Sum,
                )],
                vec![],
            ),
        );
        let mut exchanger = Exchanger::build(&adapters).unwrap();

        let value = Array2::from_shape_fn((4, 3), |(j, i)| (j * 3 + i) as f64);
        exchanger
            .publish(Category::SurfaceLayer, "flux", &value)
            .unwrap();
        let received = exchanger.retrieve("flux", Category::SubSurface).unwrap();

        assert_eq!(received.dim(), (8, 6));
        // conservative remap preserves the published total
        assert!((received.sum() - value.sum()).abs() < 1e-9);
    }

    #[test]
    fn missing_producer_for_required_inward() {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::SubSurface,
            adapter(
                Category::SubSurface,
                24,
                grid(),
                vec![InwardSpec::new(
                    "flux",
                    "1",
                    Category::SurfaceLayer,
                    TransferMethod::Mean,
                )],
                vec![],
            ),
        );
        assert!(matches!(
            Exchanger::build(&adapters),
            Err(ConfluenceError::WiringMissing { .. })
        ));
    }

    #[test]
    fn producer_of_wrong_category_is_a_missing_producer() {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::OpenWater,
            adapter(
                Category::OpenWater,
                24,
                grid(),
                vec![],
                vec![OutwardSpec::new(
                    "flux",
                    "1",
                    &[Category::SubSurface],
                    TransferMethod::Mean,
                )],
            ),
        );
        adapters.insert(
            Category::SubSurface,
            adapter(
                Category::SubSurface,
                24,
                grid(),
                // declared as coming from the surface layer
                vec![InwardSpec::new(
                    "flux",
                    "1",
                    Category::SurfaceLayer,
                    TransferMethod::Mean,
                )],
                vec![],
            ),
        );
        assert!(matches!(
            Exchanger::build(&adapters),
            Err(ConfluenceError::WiringMissing { .. })
        ));
    }

    #[test]
    fn two_candidate_producers_are_ambiguous() {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::SurfaceLayer,
            adapter(
                Category::SurfaceLayer,
                24,
                grid(),
                vec![],
                vec![OutwardSpec::new(
                    "flux",
                    "1",
                    &[Category::SubSurface],
                    TransferMethod::Mean,
                )],
            ),
        );
        adapters.insert(
            Category::OpenWater,
            adapter(
                Category::OpenWater,
                24,
                grid(),
                vec![],
                vec![OutwardSpec::new(
                    "flux",
                    "1",
                    &[Category::SubSurface],
                    TransferMethod::Mean,
                )],
            ),
        );
        adapters.insert(
            Category::SubSurface,
            adapter(
                Category::SubSurface,
                24,
                grid(),
                vec![InwardSpec::new(
                    "flux",
                    "1",
                    Category::SurfaceLayer,
                    TransferMethod::Mean,
                )],
                vec![],
            ),
        );
        assert!(matches!(
            Exchanger::build(&adapters),
            Err(ConfluenceError::WiringAmbiguous { .. })
        ));
    }

    #[test]
    fn missing_producer_for_optional_inward_supplies_zeros() {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::SubSurface,
            adapter(
                Category::SubSurface,
                24,
                grid(),
                vec![InwardSpec::new(
                    "flux",
                    "1",
                    Category::SurfaceLayer,
                    TransferMethod::Mean,
                )
                .optional()],
                vec![],
            ),
        );
        let mut exchanger = Exchanger::build(&adapters).unwrap();
        let value = exchanger.retrieve("flux", Category::SubSurface).unwrap();
        assert_eq!(value.dim(), (4, 3));
        assert_eq!(value.sum(), 0.0);
    }

    #[test]
    fn units_mismatch_fails_wiring() {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::SurfaceLayer,
            adapter(
                Category::SurfaceLayer,
                24,
                grid(),
                vec![],
                vec![OutwardSpec::new(
                    "flux",
                    "kg m-2 s-1",
                    &[Category::SubSurface],
                    TransferMethod::Mean,
                )],
            ),
        );
        adapters.insert(
            Category::SubSurface,
            adapter(
                Category::SubSurface,
                24,
                grid(),
                vec![InwardSpec::new(
                    "flux",
                    "1",
                    Category::SurfaceLayer,
                    TransferMethod::Mean,
                )],
                vec![],
            ),
        );
        assert!(matches!(
            Exchanger::build(&adapters),
            Err(ConfluenceError::Units { .. })
        ));
    }

    #[test]
    fn producer_targeting_undeclared_consumer_fails_wiring() {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::SurfaceLayer,
            adapter(
                Category::SurfaceLayer,
                24,
                grid(),
                vec![],
                vec![OutwardSpec::new(
                    "flux",
                    "1",
                    &[Category::SubSurface],
                    TransferMethod::Mean,
                )],
            ),
        );
        adapters.insert(
            Category::SubSurface,
            adapter(Category::SubSurface, 24, grid(), vec![], vec![]),
        );
        assert!(Exchanger::build(&adapters).is_err());
    }

    #[test]
    fn outwards_to_absent_categories_are_buffered() {
        let mut adapters = IndexMap::new();
        adapters.insert(
            Category::OpenWater,
            adapter(
                Category::OpenWater,
                24,
                grid(),
                vec![],
                vec![OutwardSpec::new(
                    "discharge",
                    "1",
                    &[Category::Ocean],
                    TransferMethod::Mean,
                )],
            ),
        );
        let mut exchanger = Exchanger::build(&adapters).unwrap();
        exchanger
            .publish(Category::OpenWater, "discharge", &constant(1.0))
            .unwrap();
        let snapshot = exchanger.snapshot();
        assert_eq!(snapshot.latest("discharge").unwrap()[[0, 0]], 1.0);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let (_adapters, mut exchanger) = pair(6, 24, TransferMethod::Sum);
        exchanger
            .publish(Category::SurfaceLayer, "flux", &constant(3.0))
            .unwrap();
        exchanger
            .publish(Category::SurfaceLayer, "flux", &constant(4.0))
            .unwrap();
        let snapshot = exchanger.snapshot();

        let (_adapters2, mut revived) = pair(6, 24, TransferMethod::Sum);
        revived.restore(&snapshot).unwrap();
        assert_eq!(
            revived.retrieve("flux", Category::SubSurface).unwrap()[[0, 0]],
            7.0
        );
    }
}

//! Model runtime: the tick loop, spin-up, simulation and resume.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::dot::{Config as DotConfig, Dot};
use petgraph::graph::Graph;
use tracing::{debug, info, warn};

use crate::checkpoint::{append_frame, load_frame, write_error_record, ModelFrame};
use crate::clock::Clock;
use crate::component::{Category, ComponentAdapter};
use crate::config::ModelConfig;
use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::exchanger::Exchanger;
use crate::time::{DateTime, TimeDomain};

/// Tag of the main simulation run; spin-up cycles are tagged `spinup-N`.
pub const RUN_TAG: &str = "run";

/// A coupled set of components solved in lock-step over a shared
/// simulation window.
///
/// The model uniquely owns its components, exchanger, recorder streams and
/// clock. Execution is single-threaded and deterministic: given identical
/// inputs and dumps, a rerun reproduces records bit-for-bit.
pub struct Model {
    identifier: String,
    saving_directory: PathBuf,
    adapters: IndexMap<Category, ComponentAdapter>,
    exchanger: Exchanger,
    clock: Clock,
    graph: Graph<Category, String>,
    config: Option<ModelConfig>,
    cancellation: Option<Arc<AtomicBool>>,
}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        identifier: String,
        saving_directory: PathBuf,
        adapters: IndexMap<Category, ComponentAdapter>,
        exchanger: Exchanger,
        clock: Clock,
        graph: Graph<Category, String>,
        config: Option<ModelConfig>,
    ) -> Self {
        Self {
            identifier,
            saving_directory,
            adapters,
            exchanger,
            clock,
            graph,
            config,
            cancellation: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn saving_directory(&self) -> &Path {
        &self.saving_directory
    }

    pub fn component(&self, category: Category) -> Option<&ComponentAdapter> {
        self.adapters.get(&category)
    }

    pub(crate) fn stored_config(&self) -> Option<&ModelConfig> {
        self.config.as_ref()
    }

    /// Honour an external cancellation request between ticks: when the
    /// flag turns true the driver writes a dump and aborts.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(flag);
        self
    }

    /// Render the coupling graph in DOT format, for debugging.
    pub fn as_dot(&self) -> String {
        format!(
            "{:?}",
            Dot::with_attr_getters(
                &self.graph,
                &[DotConfig::NodeNoLabel, DotConfig::EdgeNoLabel],
                &|_, edge| format!("label = {:?}", edge.weight()),
                &|_, (_, category)| format!("label = \"{category}\""),
            )
        )
    }

    /// Run `cycles` copies of the sub-window `[start, end]` back-to-back
    /// before the main run, carrying component states forward and
    /// resetting the recorder at each cycle boundary. Zero cycles is a
    /// no-op.
    pub fn spin_up(
        &mut self,
        start: DateTime,
        end: DateTime,
        cycles: usize,
        dumping_frequency: Option<i64>,
    ) -> ConfluenceResult<()> {
        if cycles == 0 {
            return Ok(());
        }

        // swap every component onto the spin-up sub-window
        let main_domains: IndexMap<Category, TimeDomain> = self
            .adapters
            .iter()
            .map(|(c, a)| (*c, a.timedomain().clone()))
            .collect();
        let mut spin_domains = IndexMap::new();
        for (category, adapter) in &self.adapters {
            spin_domains.insert(*category, adapter.timedomain().subperiod(start, end)?);
        }
        for (category, adapter) in self.adapters.iter_mut() {
            adapter.set_timedomain(spin_domains[category].clone())?;
        }
        let main_clock = std::mem::replace(&mut self.clock, Clock::build(&spin_domains)?);

        let mut outcome = Ok(());
        for cycle in 1..=cycles {
            let tag = format!("spinup-{cycle}");
            info!(identifier = %self.identifier, %tag, "spin-up cycle starting");
            outcome = self.run_period(&tag, dumping_frequency, 0, true, false);
            if outcome.is_err() {
                break;
            }
        }

        // back onto the main window whatever happened
        for (category, adapter) in self.adapters.iter_mut() {
            adapter.set_timedomain(main_domains[category].clone())?;
        }
        self.clock = main_clock;
        outcome
    }

    /// Run the model over its whole simulation window.
    pub fn simulate(&mut self, dumping_frequency: Option<i64>) -> ConfluenceResult<()> {
        info!(identifier = %self.identifier, "simulation starting");
        self.run_period(RUN_TAG, dumping_frequency, 0, true, true)
    }

    /// Resume an interrupted run from the latest dump at or before `at`,
    /// and carry it to the end of the window.
    ///
    /// Restores component states (re-running their initialise hooks with
    /// `initialised_states` set), exchanger buffers and recorder
    /// accumulators byte-identical, then re-enters the tick loop.
    pub fn resume(&mut self, tag: &str, at: DateTime) -> ConfluenceResult<()> {
        let calendar = self.clock.timedomain().calendar();
        let frame: ModelFrame = load_frame(
            &self.model_dump_path(tag),
            Some(at.timestamp(calendar)),
        )?;
        let resumed_at = frame.datetime;
        info!(identifier = %self.identifier, tag, %resumed_at, "resuming from dump");

        self.exchanger.restore(&frame.exchanger)?;
        for adapter in self.adapters.values_mut() {
            let component_frame =
                load_frame(&adapter.dump_path(tag), Some(resumed_at.timestamp(calendar)))?;
            adapter.restore(&component_frame, tag)?;
        }

        let from_tick = self.clock.timedomain().index_of(resumed_at).ok_or_else(|| {
            ConfluenceError::Config(format!(
                "dump snapshot at {resumed_at} does not sit on a tick of the \
                 simulation window"
            ))
        })?;
        self.run_period(tag, None, from_tick, false, true)
    }

    fn run_period(
        &mut self,
        tag: &str,
        dumping_frequency: Option<i64>,
        from_tick: usize,
        fresh: bool,
        finalise: bool,
    ) -> ConfluenceResult<()> {
        if let Some(frequency) = dumping_frequency {
            self.clock.set_dumping_frequency(frequency)?;
        }

        if fresh {
            // stale files from an earlier run under the same tag would
            // corrupt a later resume
            let model_dump = self.model_dump_path(tag);
            if model_dump.exists() {
                std::fs::remove_file(&model_dump)
                    .map_err(|e| ConfluenceError::io(&model_dump, e))?;
            }
            for adapter in self.adapters.values() {
                let dump = adapter.dump_path(tag);
                if dump.exists() {
                    std::fs::remove_file(&dump).map_err(|e| ConfluenceError::io(&dump, e))?;
                }
            }
            for adapter in self.adapters.values_mut() {
                adapter.initialise_run(tag)?;
            }
        }

        if self.clock.is_empty() {
            // a window with end = start: no ticks, no records, no dumps
            return Ok(());
        }

        match self.tick_loop(tag, from_tick) {
            Ok(()) => {
                let end = self.clock.timedomain().end();
                self.dump(tag, end)?;
                if finalise {
                    for adapter in self.adapters.values_mut() {
                        adapter.finalise_run()?;
                    }
                }
                info!(identifier = %self.identifier, tag, "period completed");
                Ok(())
            }
            Err(error) => {
                // best-effort dump so the run can be resumed, then surface
                warn!(identifier = %self.identifier, tag, %error, "aborting after failure");
                let when = match &error {
                    ConfluenceError::Component { datetime, .. } => *datetime,
                    _ => self.clock.timedomain().start(),
                };
                if let Err(dump_error) = self.dump(tag, when) {
                    warn!(%dump_error, "final dump failed");
                }
                write_error_record(&self.saving_directory, &self.identifier, when, &error);
                Err(error)
            }
        }
    }

    fn tick_loop(&mut self, tag: &str, from_tick: usize) -> ConfluenceResult<()> {
        let ticks: Vec<crate::clock::Tick> = self.clock.ticks(from_tick).collect();
        for tick in ticks {
            if let Some(flag) = &self.cancellation {
                if flag.load(Ordering::Relaxed) {
                    self.dump(tag, tick.datetime)?;
                    return Err(ConfluenceError::Config(format!(
                        "simulation cancelled before tick at {}",
                        tick.datetime
                    )));
                }
            }
            if tick.dumping && tick.index > from_tick {
                self.dump(tag, tick.datetime)?;
            } else if tick.dumping && tick.index == from_tick && tick.index == 0 {
                // initial conditions dump on a cold start
                self.dump(tag, tick.datetime)?;
            }

            for category in Category::ORDER {
                if !tick.due.contains(&category) {
                    continue;
                }
                let step = self.clock.component_step(category, tick.index);
                debug!(%category, step, tick = tick.index, "running component");
                let adapter = self
                    .adapters
                    .get_mut(&category)
                    .expect("due categories are registered");
                adapter.run_step(step, &mut self.exchanger)?;
            }
        }
        Ok(())
    }

    fn dump(&self, tag: &str, datetime: DateTime) -> ConfluenceResult<()> {
        let calendar = self.clock.timedomain().calendar();
        let frame = ModelFrame {
            timestamp: datetime.timestamp(calendar),
            datetime,
            identifier: self.identifier.clone(),
            tag: tag.to_string(),
            exchanger: self.exchanger.snapshot(),
        };
        append_frame(&self.model_dump_path(tag), &frame)?;
        for adapter in self.adapters.values() {
            append_frame(&adapter.dump_path(tag), &adapter.frame(datetime))?;
        }
        debug!(tag, %datetime, "dump written");
        Ok(())
    }

    fn model_dump_path(&self, tag: &str) -> PathBuf {
        self.saving_directory
            .join(format!("{}_exchanger_{tag}_dump.bin", self.identifier))
    }
}

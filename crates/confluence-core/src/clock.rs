//! The clock walking the coupled model through its base-period ticks.
//!
//! The fastest component defines the inner tick; slower components are
//! switched on every k inner ticks. A separate switch marks the ticks at
//! which a checkpoint dump is due.

use indexmap::IndexMap;
use num::integer::lcm;
use serde::{Deserialize, Serialize};

use crate::component::Category;
use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::time::{DateTime, TimeDomain};

/// One iteration of the coupled model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub index: usize,
    /// Start datetime of this inner timestep.
    pub datetime: DateTime,
    /// Components due to run at this tick, in firing order.
    pub due: Vec<Category>,
    /// Whether a checkpoint dump is due before this tick runs.
    pub dumping: bool,
}

/// Drives all components over the shared simulation window.
#[derive(Clone, Debug)]
pub struct Clock {
    categories: Vec<Category>,
    increments: IndexMap<Category, usize>,
    switches: IndexMap<Category, Vec<bool>>,
    dumping: Vec<bool>,
    timedomain: TimeDomain,
    min_dumping_seconds: i64,
}

impl Clock {
    /// Check the compatibility of the components' time domains and derive
    /// the base-period tick (the fastest component's step).
    pub fn build(timedomains: &IndexMap<Category, TimeDomain>) -> ConfluenceResult<Self> {
        let mut iter = timedomains.iter();
        let (_, reference) = iter.next().ok_or_else(|| {
            ConfluenceError::Config("cannot build a clock without components".to_string())
        })?;
        for (category, timedomain) in timedomains {
            if !timedomain.spans_same_period_as(reference) {
                return Err(ConfluenceError::Config(format!(
                    "time domain of the {category} component does not span the same \
                     period as the other components"
                )));
            }
        }

        let base_step = timedomains
            .values()
            .map(TimeDomain::step_seconds)
            .min()
            .expect("at least one component");
        let length = (reference.period_seconds() / base_step) as usize;

        let mut increments = IndexMap::new();
        let mut switches = IndexMap::new();
        let mut min_dumping_seconds = base_step;
        for (category, timedomain) in timedomains {
            let step = timedomain.step_seconds();
            if step % base_step != 0 {
                return Err(ConfluenceError::Config(format!(
                    "timestep of the {category} component ({step}s) not a whole \
                     multiple of the timestep of the fastest component ({base_step}s)"
                )));
            }
            let increment = (step / base_step) as usize;
            // a component fires on the last inner tick of each of its steps
            let mut switch = vec![false; length];
            let mut index = increment - 1;
            while index < length {
                switch[index] = true;
                index += increment;
            }
            increments.insert(*category, increment);
            switches.insert(*category, switch);
            min_dumping_seconds = lcm(min_dumping_seconds, step);
        }

        let timedomain = TimeDomain::from_start_end_step(
            reference.start(),
            reference.end(),
            base_step,
            reference.calendar(),
        )?;

        let mut dumping = vec![false; length];
        // one dump for the initial conditions at the very least
        if let Some(first) = dumping.first_mut() {
            *first = true;
        }

        Ok(Self {
            categories: timedomains.keys().copied().collect(),
            increments,
            switches,
            dumping,
            timedomain,
            min_dumping_seconds,
        })
    }

    /// The supermesh time domain the clock walks along.
    pub fn timedomain(&self) -> &TimeDomain {
        &self.timedomain
    }

    pub fn len(&self) -> usize {
        self.timedomain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timedomain.is_empty()
    }

    /// Least common multiple of the component timesteps: the smallest
    /// admissible dumping frequency, and the only tick spacing at which
    /// every component sits on a step boundary.
    pub fn min_dumping_seconds(&self) -> i64 {
        self.min_dumping_seconds
    }

    /// Switch on periodic dumps every `frequency_seconds`.
    pub fn set_dumping_frequency(&mut self, frequency_seconds: i64) -> ConfluenceResult<()> {
        if frequency_seconds <= 0 || frequency_seconds % self.min_dumping_seconds != 0 {
            return Err(ConfluenceError::Config(format!(
                "dumping frequency ({frequency_seconds}s) is not a whole multiple of \
                 the smallest common multiple across components' timesteps ({}s)",
                self.min_dumping_seconds
            )));
        }
        let increment = (frequency_seconds / self.timedomain.step_seconds()) as usize;
        let mut index = 0;
        while index < self.dumping.len() {
            self.dumping[index] = true;
            index += increment;
        }
        Ok(())
    }

    /// Timestep index of a component at the given inner tick.
    pub fn component_step(&self, category: Category, tick_index: usize) -> usize {
        tick_index / self.increments[&category]
    }

    /// Walk the ticks from `from` to the end of the window.
    pub fn ticks(&self, from: usize) -> impl Iterator<Item = Tick> + '_ {
        (from..self.len()).map(move |index| Tick {
            index,
            datetime: self.timedomain.datetime_at(index),
            due: self
                .categories
                .iter()
                .filter(|c| self.switches[*c][index])
                .copied()
                .collect(),
            dumping: self.dumping[index],
        })
    }
}

//! Component state with a sliding history window.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// The values of one component state over a sliding window of `history + 1`
/// consecutive timesteps, oldest first.
///
/// Indexing is relative to the current timestep: index `0` is the value
/// being computed for the current step, `-1` the previous step, down to
/// `-history` for the oldest step retained. [`State::increment`] slides the
/// window forward by one step, recycling the oldest slice as the zeroed
/// value of the new current step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct State {
    slices: Vec<ArrayD<f64>>,
    history: usize,
}

impl State {
    /// A state of the given shape (grid shape, optionally extended by
    /// division axes), zero-initialised across the whole window.
    pub fn zeros(shape: &[usize], history: usize) -> Self {
        let slices = (0..=history)
            .map(|_| ArrayD::zeros(IxDyn(shape)))
            .collect();
        Self { slices, history }
    }

    /// Rebuild a state from its dumped history window, oldest first.
    pub fn from_slices(slices: Vec<ArrayD<f64>>) -> Self {
        assert!(!slices.is_empty(), "state history window cannot be empty");
        let history = slices.len() - 1;
        Self { slices, history }
    }

    /// Depth of the history retained beyond the current timestep.
    pub fn history(&self) -> usize {
        self.history
    }

    pub fn shape(&self) -> &[usize] {
        self.slices[0].shape()
    }

    /// Value at the relative timestep `index`, `-history ..= 0`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the retained window.
    pub fn get_timestep(&self, index: isize) -> &ArrayD<f64> {
        &self.slices[self.offset(index)]
    }

    /// Assign the value at the relative timestep `index`.
    pub fn set_timestep(&mut self, index: isize, value: &ArrayD<f64>) {
        let offset = self.offset(index);
        self.slices[offset].assign(value);
    }

    /// Fill the value at the relative timestep `index` with a constant.
    pub fn fill_timestep(&mut self, index: isize, value: f64) {
        let offset = self.offset(index);
        self.slices[offset].fill(value);
    }

    /// Slide the window forward one timestep: the current value becomes
    /// the previous one, the oldest retained value is dropped, and the new
    /// current value starts at zero.
    pub fn increment(&mut self) {
        self.slices.rotate_left(1);
        let last = self.slices.len() - 1;
        self.slices[last].fill(0.0);
    }

    /// The full window, oldest first, as dumped into checkpoints.
    pub fn window(&self) -> &[ArrayD<f64>] {
        &self.slices
    }

    fn offset(&self, index: isize) -> usize {
        let shifted = index + self.history as isize;
        assert!(
            (0..self.slices.len() as isize).contains(&shifted),
            "state time index {index} outside window [-{}, 0]",
            self.history
        );
        shifted as usize
    }
}

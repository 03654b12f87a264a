//! The coupled model: components assembled over a common simulation
//! window, driven in lock-step with transfers mediated by the exchanger.
//!
//! The builder checks the spatial and temporal compatibility of the
//! components and wires the transfers; construction fails before any
//! timestep runs if the configuration is impossible. The driver then
//! exposes the three operations of the programmatic surface: `spin_up`,
//! `simulate` and `resume`.

mod builder;
mod driver;

#[cfg(test)]
mod tests;

pub use builder::ModelBuilder;
pub use driver::Model;

//! Model-level scenarios: coupled dummies, remapping, records, spin-up,
//! resume and wiring failures.

mod support;

mod basic;
mod spinup;

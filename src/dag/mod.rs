// src/dag/mod.rs

//! Job dependency structure and gating.
//!
//! - [`graph`] holds the static dependency graph declared through `after`.
//! - [`gate`] decides, from the run ledger, whether a job may start for a
//!   given run date.

pub mod gate;
pub mod graph;

pub use gate::{DependencyGate, GateDecision, UnsatisfiedDependency};
pub use graph::JobGraph;

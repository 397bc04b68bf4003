// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`backend`] provides the `ComputeEngine` trait, the `ComputeInvocation`
//!   handed to it, and the production `ShellEngine`. Tests replace the engine
//!   with a fake implementation.
//! - [`process`] holds the shell helpers (`sh -c`, exit-code mapping, output
//!   forwarding) shared by everything that spawns processes.

pub mod backend;
pub mod process;

pub use backend::{ComputeEngine, ComputeInvocation, ShellEngine};

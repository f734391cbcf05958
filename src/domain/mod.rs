//! Domain types used throughout the crate.
//!
//! This module defines:
//!
//! - signal kinds and their instrument parameters (`SignalKind`)
//! - fitting configuration enums (`WeightMode`, `IterationPath`, `StartMode`)
//! - per-position fit records (`FitState`, `FitStatus`, `FailureReason`)

pub mod types;

pub use types::*;

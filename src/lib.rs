//! `hyperspec` library crate.
//!
//! Calibrated multidimensional axes, component models and per-position
//! fitting for spectrum images (EELS/EDS). The crate has no binary:
//!
//! - file-format readers hand data over through `io::LoadedSignal`
//! - plotting and GUIs consume `fit::FitMap` and `report` output

pub mod axes;
pub mod components;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod metadata;
pub mod model;
pub mod physics;
pub mod report;
pub mod signal;

pub use error::{Result, SpecError};

//! Model fitting.
//!
//! Responsibilities:
//!
//! - minimize weighted residuals of one spectrum under parameter bounds
//! - decide the order navigation positions are visited in
//! - run fits across a dataset and keep one `FitState` per position

pub mod controller;
pub mod iteration;
pub mod optimizer;

pub use controller::*;
pub use iteration::*;
pub use optimizer::*;

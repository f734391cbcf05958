//! Mathematical utilities: profile functions and SVD least squares.

pub mod basis;
pub mod ols;

pub use basis::*;
pub use ols::*;

//! Calibrated axes and the navigation/signal partition.
//!
//! - `DataAxis`: one affine axis (`offset + i * scale`)
//! - `AxisManager`: ordered axes, navigation/signal shapes, index folding

pub mod axis;
pub mod manager;

pub use axis::*;
pub use manager::*;

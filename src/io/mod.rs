//! Input/output helpers.
//!
//! - logical loader contract + JSON triple (`loader`)
//! - per-position CSV export (`export`)
//! - multifit result JSON read/write (`results`)

pub mod export;
pub mod loader;
pub mod results;

pub use export::*;
pub use loader::*;
pub use results::*;

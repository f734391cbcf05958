//! Domain physics: the element database, GOS tables and EDS formulas.

pub mod eds;
pub mod elements;
pub mod gos;

pub use eds::*;
pub use elements::*;
pub use gos::*;

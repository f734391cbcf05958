//! Parametric components: parameters, the closed set of component kinds and
//! the `Component` container that owns a kind's parameters.

pub mod component;
pub mod kind;
pub mod parameter;

pub use component::*;
pub use kind::*;
pub use parameter::*;

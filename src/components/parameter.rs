//! Named fit parameters and twin references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a parameter inside a model: `component.parameter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterRef {
    pub component: String,
    pub parameter: String,
}

impl ParameterRef {
    pub fn new(component: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            parameter: parameter.into(),
        }
    }
}

impl fmt::Display for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.parameter)
    }
}

/// How a twinned parameter derives its value from its source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwinFunction {
    #[default]
    Identity,
    Affine { scale: f64, offset: f64 },
}

impl TwinFunction {
    pub fn apply(self, source: f64) -> f64 {
        match self {
            TwinFunction::Identity => source,
            TwinFunction::Affine { scale, offset } => scale * source + offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    /// Standard error from the last fit, if any.
    pub std: Option<f64>,
    pub bmin: Option<f64>,
    pub bmax: Option<f64>,
    pub free: bool,
    pub twin: Option<ParameterRef>,
    pub twin_function: TwinFunction,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            std: None,
            bmin: None,
            bmax: None,
            free: true,
            twin: None,
            twin_function: TwinFunction::Identity,
        }
    }

    pub fn with_bounds(mut self, bmin: Option<f64>, bmax: Option<f64>) -> Self {
        self.bmin = bmin;
        self.bmax = bmax;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.free = false;
        self
    }

    /// Whether the parameter is an entry of the free-parameter vector.
    pub fn is_fitted(&self) -> bool {
        self.free && self.twin.is_none()
    }

    pub fn bounds(&self) -> (f64, f64) {
        (
            self.bmin.unwrap_or(f64::NEG_INFINITY),
            self.bmax.unwrap_or(f64::INFINITY),
        )
    }

    pub fn clamp(&self, value: f64) -> f64 {
        let (lo, hi) = self.bounds();
        value.max(lo).min(hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twin_excludes_from_vector() {
        let mut p = Parameter::new("centre", 1.0);
        assert!(p.is_fitted());
        p.twin = Some(ParameterRef::new("other", "centre"));
        assert!(!p.is_fitted());
        p.twin = None;
        p.free = false;
        assert!(!p.is_fitted());
    }

    #[test]
    fn twin_functions() {
        assert_eq!(TwinFunction::Identity.apply(3.0), 3.0);
        assert_eq!(TwinFunction::Affine { scale: 2.0, offset: 1.0 }.apply(3.0), 7.0);
    }

    #[test]
    fn clamp_respects_open_bounds() {
        let p = Parameter::new("A", 0.0).with_bounds(Some(0.0), None);
        assert_eq!(p.clamp(-1.0), 0.0);
        assert_eq!(p.clamp(1e9), 1e9);
        assert_eq!(ParameterRef::new("g", "A").to_string(), "g.A");
    }
}

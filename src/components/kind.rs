//! Evaluation for each component kind.
//!
//! Each kind declares its parameters (in a fixed order) and evaluates its
//! profile from a slice of effective values in that same order. Twin
//! resolution happens in the model, so everything here is a pure function.

use crate::math::{gaussian, lorentzian, polynomial, power_law};
use crate::physics::GosTable;

use super::Parameter;

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentKind {
    Offset,
    /// Area-normalised Gaussian.
    Gaussian,
    Lorentzian,
    PowerLaw,
    Polynomial { order: usize },
    IonizationEdge {
        element: String,
        subshell: String,
        table: GosTable,
    },
}

impl ComponentKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ComponentKind::Offset => "Offset",
            ComponentKind::Gaussian => "Gaussian",
            ComponentKind::Lorentzian => "Lorentzian",
            ComponentKind::PowerLaw => "PowerLaw",
            ComponentKind::Polynomial { .. } => "Polynomial",
            ComponentKind::IonizationEdge { .. } => "IonizationEdge",
        }
    }

    /// Parameters in declaration order with their default values.
    pub fn default_parameters(&self, onset: f64) -> Vec<Parameter> {
        match self {
            ComponentKind::Offset => vec![Parameter::new("offset", 0.0)],
            ComponentKind::Gaussian => vec![
                Parameter::new("A", 1.0),
                Parameter::new("sigma", 1.0),
                Parameter::new("centre", 0.0),
            ],
            ComponentKind::Lorentzian => vec![
                Parameter::new("A", 1.0),
                Parameter::new("gamma", 1.0),
                Parameter::new("centre", 0.0),
            ],
            ComponentKind::PowerLaw => vec![
                Parameter::new("A", 1e6),
                Parameter::new("r", 3.0),
                Parameter::new("origin", 0.0).fixed(),
            ],
            ComponentKind::Polynomial { order } => (0..=*order)
                .map(|k| Parameter::new(format!("coefficient_{k}"), 0.0))
                .collect(),
            ComponentKind::IonizationEdge { .. } => vec![
                Parameter::new("intensity", 1.0).with_bounds(Some(0.0), None),
                Parameter::new("onset_energy", onset).fixed(),
            ],
        }
    }

    /// Evaluate at one coordinate.
    ///
    /// `values` must have one entry per declared parameter.
    pub fn evaluate_at(&self, x: f64, values: &[f64]) -> f64 {
        match self {
            ComponentKind::Offset => values[0],
            ComponentKind::Gaussian => gaussian(x, values[0], values[1], values[2]),
            ComponentKind::Lorentzian => lorentzian(x, values[0], values[1], values[2]),
            ComponentKind::PowerLaw => power_law(x, values[0], values[1], values[2]),
            ComponentKind::Polynomial { .. } => polynomial(x, values),
            ComponentKind::IonizationEdge { table, .. } => {
                // The table is clipped at zero; a negative intensity would
                // still flip the sign, so it is clipped here too.
                values[0].max(0.0) * table.evaluate(x - values[1])
            }
        }
    }

    /// Add this kind's contribution at every coordinate into `out`.
    pub fn accumulate(&self, x: &[f64], values: &[f64], out: &mut [f64]) {
        for (o, &xi) in out.iter_mut().zip(x) {
            *o += self.evaluate_at(xi, values);
        }
    }
}

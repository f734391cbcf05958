//! Tabulated ionization cross-section shapes.
//!
//! A `GosTable` holds the relative cross-section of one (element, subshell)
//! pair as a function of energy loss *above the onset*. Evaluation is zero at
//! and below the onset, linear inside the table and a log-log power law past
//! its end. Results are clipped at zero so a shifted onset can never produce
//! a negative or NaN contribution.

use crate::error::{Result, SpecError};
use crate::math::log_space;
use crate::physics::elements::{Edge, elements};

/// Extent of the generated tables above the onset, in eV.
const TABLE_EXTENT: f64 = 3000.0;
const TABLE_POINTS: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct GosTable {
    /// Energy above onset (eV), strictly increasing, starting at 0.
    deltas: Vec<f64>,
    values: Vec<f64>,
}

impl GosTable {
    pub fn new(deltas: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if deltas.len() != values.len() {
            return Err(SpecError::DimensionMismatch {
                context: "GOS table",
                expected: deltas.len(),
                found: values.len(),
            });
        }
        if deltas.len() < 2 {
            return Err(SpecError::InvalidConfig("GOS table needs at least two points".to_string()));
        }
        if deltas[0] != 0.0 || deltas.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(SpecError::InvalidConfig(
                "GOS table energies must start at 0 and be strictly increasing".to_string(),
            ));
        }
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(SpecError::InvalidConfig("GOS table values must be finite and >= 0".to_string()));
        }
        Ok(Self { deltas, values })
    }

    /// Table for `element`'s `subshell` edge from the element database.
    pub fn for_edge(element: &str, subshell: &str) -> Result<Self> {
        let el = elements().get(element)?;
        let edge = el
            .edge(subshell)
            .ok_or_else(|| SpecError::UnknownXrayLine(format!("{element}_{subshell} edge")))?;
        Self::from_edge(edge)
    }

    /// Saturating rise over the family's rise width followed by a power-law
    /// decay, normalised to a peak of 1.
    pub fn from_edge(edge: &Edge) -> Result<Self> {
        let exponent = edge.family.tail_exponent();
        let rise = edge.family.rise_width();

        let mut deltas = vec![0.0];
        deltas.extend(log_space(0.1, TABLE_EXTENT, TABLE_POINTS)?);
        let raw: Vec<f64> = deltas
            .iter()
            .map(|&d| (1.0 - (-d / rise).exp()) * ((edge.onset + d) / edge.onset).powf(-exponent))
            .collect();
        let peak = raw.iter().copied().fold(0.0_f64, f64::max);
        if !(peak > 0.0) {
            return Err(SpecError::InvalidConfig(format!(
                "degenerate cross-section for subshell {}",
                edge.subshell
            )));
        }
        Self::new(deltas, raw.into_iter().map(|v| v / peak).collect())
    }

    /// Relative cross-section at `delta` eV above the onset.
    pub fn evaluate(&self, delta: f64) -> f64 {
        if !(delta > 0.0) {
            return 0.0;
        }
        let n = self.deltas.len();
        let last = self.deltas[n - 1];
        let v = if delta >= last {
            self.tail(delta)
        } else {
            // First index with deltas[i] > delta; i >= 1 because deltas[0] == 0 < delta.
            let i = self.deltas.partition_point(|&d| d <= delta);
            let (x0, x1) = (self.deltas[i - 1], self.deltas[i]);
            let (y0, y1) = (self.values[i - 1], self.values[i]);
            y0 + (y1 - y0) * (delta - x0) / (x1 - x0)
        };
        if v.is_finite() { v.max(0.0) } else { 0.0 }
    }

    fn tail(&self, delta: f64) -> f64 {
        let n = self.deltas.len();
        let (x0, x1) = (self.deltas[n - 2], self.deltas[n - 1]);
        let (y0, y1) = (self.values[n - 2], self.values[n - 1]);
        if !(y0 > 0.0 && y1 > 0.0 && x0 > 0.0) {
            return y1;
        }
        let slope = (y1 / y0).ln() / (x1 / x0).ln();
        y1 * (delta / x1).powf(slope)
    }
}

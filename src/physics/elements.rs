//! Read-only element property database.
//!
//! The table is built once on first access and never mutated afterwards;
//! callers receive `&'static` references into it.
//!
//! Units: X-ray line energies in keV, edge onsets in eV, density in g/cm³,
//! atomic weight in g/mol.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::error::{Result, SpecError};

#[derive(Debug, Clone, PartialEq)]
pub struct XrayLine {
    pub name: &'static str,
    pub energy: f64,
    /// Intensity relative to the strongest line of the same family.
    pub weight: f64,
}

/// Shell families with distinct cross-section shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFamily {
    K,
    L,
    M,
}

impl ShellFamily {
    /// Power-law decay exponent of the cross-section well above onset.
    pub fn tail_exponent(self) -> f64 {
        match self {
            ShellFamily::K => 3.0,
            ShellFamily::L => 2.5,
            ShellFamily::M => 2.0,
        }
    }

    /// Energy (eV) over which the cross-section rises after the onset.
    pub fn rise_width(self) -> f64 {
        match self {
            ShellFamily::K => 1.0,
            ShellFamily::L => 8.0,
            ShellFamily::M => 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub subshell: &'static str,
    pub onset: f64,
    pub family: ShellFamily,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub symbol: &'static str,
    pub z: u32,
    pub atomic_weight: f64,
    pub density: f64,
    pub lines: Vec<XrayLine>,
    pub edges: Vec<Edge>,
}

impl Element {
    pub fn line(&self, name: &str) -> Result<&XrayLine> {
        self.lines
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| SpecError::UnknownXrayLine(format!("{}_{}", self.symbol, name)))
    }

    pub fn edge(&self, subshell: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.subshell == subshell)
    }
}

#[derive(Debug)]
pub struct ElementDatabase {
    elements: BTreeMap<&'static str, Element>,
}

impl ElementDatabase {
    pub fn get(&self, symbol: &str) -> Result<&Element> {
        self.elements
            .get(symbol)
            .ok_or_else(|| SpecError::UnknownElement(symbol.to_string()))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.elements.contains_key(symbol)
    }

    /// Elements in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    /// Resolve a line label such as `"Fe_Ka"`.
    pub fn xray_line(&self, label: &str) -> Result<(&Element, &XrayLine)> {
        let (symbol, line) = split_line_label(label)?;
        let element = self.get(symbol)?;
        Ok((element, element.line(line)?))
    }
}

/// Split `"Fe_Ka"` into `("Fe", "Ka")`.
pub fn split_line_label(label: &str) -> Result<(&str, &str)> {
    match label.split_once('_') {
        Some((el, line)) if !el.is_empty() && !line.is_empty() => Ok((el, line)),
        _ => Err(SpecError::UnknownXrayLine(label.to_string())),
    }
}

/// Shared handle to the process-wide database.
pub fn elements() -> &'static ElementDatabase {
    &ELEMENTS
}

static ELEMENTS: Lazy<ElementDatabase> = Lazy::new(build_database);

type LineRow = (&'static str, f64, f64);
type EdgeRow = (&'static str, f64, ShellFamily);

fn build_database() -> ElementDatabase {
    use ShellFamily::{K, L, M};

    #[rustfmt::skip]
    let rows: Vec<(&'static str, u32, f64, f64, Vec<LineRow>, Vec<EdgeRow>)> = vec![
        ("C", 6, 12.011, 2.26,
            vec![("Ka", 0.2774, 1.0)],
            vec![("K", 284.0, K)]),
        ("O", 8, 15.999, 0.001_429,
            vec![("Ka", 0.5249, 1.0)],
            vec![("K", 532.0, K)]),
        ("Al", 13, 26.982, 2.70,
            vec![("Ka", 1.4865, 1.0), ("Kb", 1.5575, 0.0132)],
            vec![("K", 1560.0, K), ("L23", 73.0, L)]),
        ("Si", 14, 28.086, 2.33,
            vec![("Ka", 1.7397, 1.0), ("Kb", 1.8389, 0.0206)],
            vec![("K", 1839.0, K), ("L23", 99.0, L)]),
        ("Ti", 22, 47.867, 4.507,
            vec![("Ka", 4.5109, 1.0), ("Kb", 4.9318, 0.1247), ("La", 0.4522, 1.0)],
            vec![("L3", 456.0, L), ("K", 4966.0, K)]),
        ("Cr", 24, 51.996, 7.19,
            vec![("Ka", 5.4147, 1.0), ("Kb", 5.9467, 0.1340), ("La", 0.5728, 1.0)],
            vec![("L3", 575.0, L), ("K", 5989.0, K)]),
        ("Mn", 25, 54.938, 7.47,
            vec![("Ka", 5.8987, 1.0), ("Kb", 6.4904, 0.1369), ("La", 0.6374, 1.0)],
            vec![("L3", 640.0, L), ("K", 6539.0, K)]),
        ("Fe", 26, 55.845, 7.874,
            vec![("Ka", 6.4039, 1.0), ("Kb", 7.0580, 0.1272), ("La", 0.7050, 1.0)],
            vec![("L3", 708.0, L), ("K", 7112.0, K)]),
        ("Co", 27, 58.933, 8.90,
            vec![("Ka", 6.9303, 1.0), ("Kb", 7.6494, 0.1277), ("La", 0.7762, 1.0)],
            vec![("L3", 779.0, L), ("K", 7709.0, K)]),
        ("Ni", 28, 58.693, 8.908,
            vec![("Ka", 7.4781, 1.0), ("Kb", 8.2647, 0.1277), ("La", 0.8515, 1.0)],
            vec![("L3", 855.0, L), ("K", 8333.0, K)]),
        ("Cu", 29, 63.546, 8.96,
            vec![("Ka", 8.0478, 1.0), ("Kb", 8.9053, 0.1277), ("La", 0.9297, 1.0)],
            vec![("L3", 931.0, L), ("K", 8979.0, K)]),
        ("Zn", 30, 65.38, 7.14,
            vec![("Ka", 8.6389, 1.0), ("Kb", 9.5720, 0.1277), ("La", 1.0116, 1.0)],
            vec![("L3", 1020.0, L), ("K", 9659.0, K)]),
        ("Au", 79, 196.967, 19.30,
            vec![("La", 9.7133, 1.0), ("Lb1", 11.4425, 0.4), ("Ma", 2.1229, 1.0)],
            vec![("M5", 2206.0, M), ("M4", 2291.0, M)]),
    ];

    let elements = rows
        .into_iter()
        .map(|(symbol, z, atomic_weight, density, lines, edges)| {
            let element = Element {
                symbol,
                z,
                atomic_weight,
                density,
                lines: lines
                    .into_iter()
                    .map(|(name, energy, weight)| XrayLine { name, energy, weight })
                    .collect(),
                edges: edges
                    .into_iter()
                    .map(|(subshell, onset, family)| Edge {
                        subshell,
                        onset,
                        family,
                    })
                    .collect(),
            };
            (symbol, element)
        })
        .collect();

    ElementDatabase { elements }
}

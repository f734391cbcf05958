//! A named, activatable component that owns its parameters.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SpecError};
use crate::math::solve_least_squares;
use crate::physics::{GosTable, elements};

use super::{ComponentKind, Parameter};

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub active: bool,
    kind: ComponentKind,
    parameters: Vec<Parameter>,
}

impl Component {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        let parameters = kind.default_parameters(0.0);
        Self {
            name: name.into(),
            active: true,
            kind,
            parameters,
        }
    }

    pub fn offset(name: impl Into<String>, offset: f64) -> Self {
        let mut c = Self::new(name, ComponentKind::Offset);
        c.parameters[0].value = offset;
        c
    }

    pub fn gaussian(name: impl Into<String>, a: f64, sigma: f64, centre: f64) -> Self {
        let mut c = Self::new(name, ComponentKind::Gaussian);
        c.set_values(&[a, sigma, centre]);
        c
    }

    pub fn lorentzian(name: impl Into<String>, a: f64, gamma: f64, centre: f64) -> Self {
        let mut c = Self::new(name, ComponentKind::Lorentzian);
        c.set_values(&[a, gamma, centre]);
        c
    }

    pub fn power_law(name: impl Into<String>, a: f64, r: f64) -> Self {
        let mut c = Self::new(name, ComponentKind::PowerLaw);
        c.parameters[0].value = a;
        c.parameters[1].value = r;
        c
    }

    pub fn polynomial(name: impl Into<String>, order: usize) -> Self {
        Self::new(name, ComponentKind::Polynomial { order })
    }

    /// Edge for `element`'s `subshell`, with the onset taken from the
    /// element database.
    pub fn ionization_edge(name: impl Into<String>, element: &str, subshell: &str) -> Result<Self> {
        let el = elements().get(element)?;
        let edge = el
            .edge(subshell)
            .ok_or_else(|| SpecError::UnknownXrayLine(format!("{element}_{subshell} edge")))?;
        let kind = ComponentKind::IonizationEdge {
            element: element.to_string(),
            subshell: subshell.to_string(),
            table: GosTable::from_edge(edge)?,
        };
        let parameters = kind.default_parameters(edge.onset);
        Ok(Self {
            name: name.into(),
            active: true,
            kind,
            parameters,
        })
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    pub fn parameter(&self, name: &str) -> Result<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| self.unknown(name))
    }

    pub fn parameter_mut(&mut self, name: &str) -> Result<&mut Parameter> {
        let err = self.unknown(name);
        self.parameters.iter_mut().find(|p| p.name == name).ok_or(err)
    }

    fn unknown(&self, name: &str) -> SpecError {
        SpecError::UnknownParameter {
            component: self.name.clone(),
            parameter: name.to_string(),
        }
    }

    /// Raw (untwinned) parameter values in declaration order.
    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    fn set_values(&mut self, values: &[f64]) {
        for (p, &v) in self.parameters.iter_mut().zip(values) {
            p.value = v;
        }
    }

    /// Evaluate with explicit parameter values (one per declared parameter).
    pub fn evaluate_with(&self, x: &[f64], values: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; x.len()];
        self.kind.accumulate(x, values, &mut out);
        out
    }

    /// Evaluate with the component's own stored values.
    pub fn function(&self, x: &[f64]) -> Vec<f64> {
        self.evaluate_with(x, &self.values())
    }

    /// Heuristic initial values from observed data inside `range`
    /// (physical units, either order; `None` = everything).
    ///
    /// Returns `false` and leaves the parameters untouched when the data
    /// cannot support an estimate.
    pub fn estimate_parameters(&mut self, x: &[f64], y: &[f64], range: Option<(f64, f64)>) -> bool {
        let (xs, ys) = select_range(x, y, range);
        let estimate = match &self.kind {
            ComponentKind::Offset => estimate_offset(&ys),
            ComponentKind::Gaussian => estimate_gaussian(&xs, &ys),
            ComponentKind::Lorentzian => estimate_lorentzian(&xs, &ys),
            ComponentKind::PowerLaw => estimate_power_law(&xs, &ys, self.parameters[2].value),
            ComponentKind::Polynomial { order } => estimate_polynomial(&xs, &ys, *order),
            ComponentKind::IonizationEdge { .. } => {
                let onset = self.parameters[1].value;
                let shape: Vec<f64> = xs
                    .iter()
                    .map(|&xi| self.kind.evaluate_at(xi, &[1.0, onset]))
                    .collect();
                estimate_projection(&ys, &shape).map(|i| vec![i, onset])
            }
        };
        match estimate {
            Some(values) if values.iter().all(|v| v.is_finite()) => {
                self.set_values(&values);
                true
            }
            _ => {
                debug!("estimation failed for component '{}' ({})", self.name, self.kind.display_name());
                false
            }
        }
    }
}

fn select_range(x: &[f64], y: &[f64], range: Option<(f64, f64)>) -> (Vec<f64>, Vec<f64>) {
    let (lo, hi) = match range {
        Some((a, b)) if a <= b => (a, b),
        Some((a, b)) => (b, a),
        None => (f64::NEG_INFINITY, f64::INFINITY),
    };
    x.iter()
        .zip(y)
        .filter(|(xi, yi)| **xi >= lo && **xi <= hi && yi.is_finite())
        .map(|(&xi, &yi)| (xi, yi))
        .unzip()
}

/// Mean absolute channel spacing.
fn mean_spacing(x: &[f64]) -> Option<f64> {
    if x.len() < 2 {
        return None;
    }
    let dx = (x[x.len() - 1] - x[0]).abs() / (x.len() - 1) as f64;
    (dx > 0.0).then_some(dx)
}

/// Trapezoidal integral of `y` over `x[lo..=hi]`.
fn trapezoid(x: &[f64], y: &[f64], lo: usize, hi: usize) -> f64 {
    (lo..hi).map(|i| 0.5 * (y[i] + y[i + 1]) * (x[i + 1] - x[i])).sum()
}

fn estimate_offset(y: &[f64]) -> Option<Vec<f64>> {
    if y.is_empty() {
        return None;
    }
    Some(vec![y.iter().sum::<f64>() / y.len() as f64])
}

fn estimate_gaussian(x: &[f64], y: &[f64]) -> Option<Vec<f64>> {
    let dx = mean_spacing(x)?;
    let total: f64 = y.iter().sum();
    if !(total > 0.0) {
        return None;
    }
    let centre = x.iter().zip(y).map(|(xi, yi)| xi * yi).sum::<f64>() / total;
    let var = x.iter().zip(y).map(|(xi, yi)| (xi - centre).powi(2) * yi).sum::<f64>() / total;
    if !(var > 0.0) {
        return None;
    }
    Some(vec![total * dx, var.sqrt(), centre])
}

fn estimate_lorentzian(x: &[f64], y: &[f64]) -> Option<Vec<f64>> {
    let dx = mean_spacing(x)?;
    let (imax, &height) = y.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1))?;
    if !(height > 0.0) {
        return None;
    }
    let area = y.iter().sum::<f64>() * dx;
    let gamma = area / (std::f64::consts::PI * height);
    (gamma > 0.0).then(|| vec![area, gamma, x[imax]])
}

/// Two-area method: split the range in two halves, integrate each and solve
/// for the power law that reproduces both areas.
fn estimate_power_law(x: &[f64], y: &[f64], origin: f64) -> Option<Vec<f64>> {
    let n = x.len();
    if n < 3 {
        return None;
    }
    let mid = n / 2;
    let x1 = x[0] - origin;
    let x2 = x[mid] - origin;
    let x3 = x[n - 1] - origin;
    if !(x1 > 0.0 && x2 > x1 && x3 > x2) {
        return None;
    }
    let i1 = trapezoid(x, y, 0, mid);
    let i2 = trapezoid(x, y, mid, n - 1);
    if !(i1 > 0.0 && i2 > 0.0) {
        return None;
    }
    let r = 2.0 * (i1 / i2).ln() / (x3 / x1).ln();
    let k = 1.0 - r;
    let denom = x3.powf(k) - x2.powf(k);
    if denom == 0.0 {
        return None;
    }
    let a = k * i2 / denom;
    (a > 0.0).then(|| vec![a, r, origin])
}

fn estimate_polynomial(x: &[f64], y: &[f64], order: usize) -> Option<Vec<f64>> {
    let m = order + 1;
    if x.len() < m {
        return None;
    }
    let design = DMatrix::from_fn(x.len(), m, |i, j| x[i].powi(j as i32));
    let beta = solve_least_squares(&design, &DVector::from_column_slice(y))?;
    Some(beta.iter().copied().collect())
}

fn estimate_projection(y: &[f64], shape: &[f64]) -> Option<f64> {
    let norm: f64 = shape.iter().map(|s| s * s).sum();
    if !(norm > 0.0) {
        return None;
    }
    let proj = y.iter().zip(shape).map(|(a, b)| a * b).sum::<f64>() / norm;
    Some(proj.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn gaussian_moments_recover_shape() {
        let x = grid(0.0, 0.05, 401);
        let truth = Component::gaussian("g", 20.0, 1.5, 10.0);
        let y = truth.function(&x);

        let mut g = Component::new("g", ComponentKind::Gaussian);
        assert!(g.estimate_parameters(&x, &y, None));
        let v = g.values();
        assert!((v[0] - 20.0).abs() < 0.05);
        assert!((v[1] - 1.5).abs() < 0.01);
        assert!((v[2] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn power_law_two_area_estimate_tracks_data() {
        let x = grid(100.0, 1.0, 101);
        let truth = Component::power_law("bg", 1e5, 3.0);
        let y = truth.function(&x);

        let mut bg = Component::new("bg", ComponentKind::PowerLaw);
        assert!(bg.estimate_parameters(&x, &y, None));
        assert!((bg.parameter("r").unwrap().value - 3.0).abs() < 0.1);
        let predicted = bg.function(&[150.0])[0];
        let actual = truth.function(&[150.0])[0];
        assert!(((predicted - actual) / actual).abs() < 0.05);
    }

    #[test]
    fn polynomial_estimate_is_exact_for_polynomial_data() {
        let x = grid(-2.0, 0.5, 9);
        let y: Vec<f64> = x.iter().map(|&t| 1.0 - 2.0 * t + 0.5 * t * t).collect();
        let mut p = Component::polynomial("p", 2);
        assert!(p.estimate_parameters(&x, &y, None));
        let v = p.values();
        for (got, want) in v.iter().zip([1.0, -2.0, 0.5]) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn failed_estimate_leaves_values_untouched() {
        let x = grid(0.0, 1.0, 10);
        let y = vec![0.0; 10];
        let mut g = Component::gaussian("g", 3.0, 2.0, 1.0);
        assert!(!g.estimate_parameters(&x, &y, None));
        assert_eq!(g.values(), vec![3.0, 2.0, 1.0]);

        let mut bg = Component::power_law("bg", 7.0, 2.0);
        assert!(!bg.estimate_parameters(&x, &y, Some((5.0, 9.0))));
        assert_eq!(bg.values(), vec![7.0, 2.0, 0.0]);
    }

    #[test]
    fn offset_uses_range_only() {
        let x = grid(0.0, 1.0, 10);
        let y: Vec<f64> = x.iter().map(|&t| if t < 5.0 { 1.0 } else { 3.0 }).collect();
        let mut c = Component::offset("bg", 0.0);
        assert!(c.estimate_parameters(&x, &y, Some((9.0, 5.0))));
        assert_eq!(c.parameter("offset").unwrap().value, 3.0);
    }

    #[test]
    fn edge_projection_recovers_intensity() {
        let x = grid(650.0, 1.0, 200);
        let mut edge = Component::ionization_edge("Fe_L3", "Fe", "L3").unwrap();
        assert_eq!(edge.parameter("onset_energy").unwrap().value, 708.0);
        assert!(!edge.parameter("onset_energy").unwrap().free);
        let y: Vec<f64> = edge.function(&x).iter().map(|v| v * 42.0).collect();
        assert!(edge.estimate_parameters(&x, &y, None));
        assert!((edge.parameter("intensity").unwrap().value - 42.0).abs() < 1e-9);
        assert!(Component::ionization_edge("x", "Fe", "K9").is_err());
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        let g = Component::gaussian("g", 1.0, 1.0, 0.0);
        assert!(matches!(
            g.parameter("nope"),
            Err(SpecError::UnknownParameter { .. })
        ));
    }
}

//! Default models per signal kind.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::components::Component;
use crate::domain::{EdsParameters, SignalKind};
use crate::error::Result;
use crate::math::GAUSSIAN_FWHM_PER_SIGMA;
use crate::metadata::MetadataValue;
use crate::physics::{elements, fwhm_at_energy, xray_lines_in_range};
use crate::signal::Signal;

use super::Model;

/// Name of the background component `create_model` adds.
pub const BACKGROUND: &str = "background";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Add (and estimate) a background component.
    pub auto_background: bool,
    /// Add ionization edges (EELS) or X-ray line peaks (EDS) for the
    /// sample's elements.
    pub auto_add_edges: bool,
    /// Element symbols; `None` reads `Sample.elements` from the metadata.
    pub elements: Option<Vec<String>>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            auto_background: true,
            auto_add_edges: true,
            elements: None,
        }
    }
}

/// Build the default model for `signal`'s kind.
///
/// Initial values are estimated from the mean spectrum.
pub fn create_model(signal: &Signal, options: &ModelOptions) -> Result<Model> {
    match signal.kind() {
        SignalKind::Generic => Ok(Model::new()),
        SignalKind::Eels(_) => eels_model(signal, options),
        SignalKind::Eds(params) => eds_model(signal, params, options),
    }
}

fn sample_elements(signal: &Signal, options: &ModelOptions) -> Vec<String> {
    if let Some(list) = &options.elements {
        return list.clone();
    }
    match signal.metadata.get("Sample.elements") {
        Some(MetadataValue::Sequence(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(MetadataValue::Text(single)) => vec![single.clone()],
        Some(_) => {
            warn!("Sample.elements is not a list of element symbols; ignoring it");
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn eels_model(signal: &Signal, options: &ModelOptions) -> Result<Model> {
    let axis = signal.signal_axis()?;
    let x = axis.axis_values();
    let mean = signal.mean_spectrum()?;
    let (low, high) = (axis.low_value(), axis.high_value());

    let mut edges = Vec::new();
    if options.auto_add_edges {
        for symbol in sample_elements(signal, options) {
            let element = elements().get(&symbol)?;
            for edge in &element.edges {
                if edge.onset >= low && edge.onset <= high {
                    let name = format!("{}_{}", element.symbol, edge.subshell);
                    edges.push((name, element.symbol, edge.subshell, edge.onset));
                }
            }
        }
        edges.sort_by(|a, b| a.3.total_cmp(&b.3));
    }

    let mut model = Model::new();
    let mut residual = mean.clone();
    if options.auto_background {
        let mut background = Component::power_law(BACKGROUND, 1e6, 3.0);
        let pre_edge_end = edges.first().map_or(high, |e| e.3 - 2.0 * axis.scale.abs());
        if background.estimate_parameters(&x, &mean, Some((low, pre_edge_end))) {
            for (r, b) in residual.iter_mut().zip(background.function(&x)) {
                *r -= b;
            }
        }
        model.append(background)?;
    }

    for (i, (name, symbol, subshell, onset)) in edges.iter().enumerate() {
        let mut edge = Component::ionization_edge(name.as_str(), symbol, subshell)?;
        let end = edges.get(i + 1).map_or(high, |next| next.3);
        edge.estimate_parameters(&x, &residual, Some((*onset, end)));
        model.append(edge)?;
    }
    debug!("EELS model with {} component(s)", model.len());
    Ok(model)
}

fn eds_model(signal: &Signal, params: &EdsParameters, options: &ModelOptions) -> Result<Model> {
    let axis = signal.signal_axis()?;
    let x = axis.axis_values();
    let mean = signal.mean_spectrum()?;

    let mut model = Model::new();
    let mut residual = mean.clone();
    if options.auto_background {
        let mut background = Component::polynomial(BACKGROUND, 2);
        if background.estimate_parameters(&x, &mean, None) {
            for (r, b) in residual.iter_mut().zip(background.function(&x)) {
                *r -= b;
            }
        }
        model.append(background)?;
    }

    if options.auto_add_edges {
        let symbols = sample_elements(signal, options);
        let symbols: Vec<&str> = symbols.iter().map(String::as_str).collect();
        let lines = xray_lines_in_range(axis.low_value(), axis.high_value(), Some(&symbols))?;
        for (label, energy) in lines {
            let sigma = fwhm_at_energy(params.energy_resolution_mnka, energy)? / GAUSSIAN_FWHM_PER_SIGMA;
            let height = residual[axis.index_at(energy)].max(0.0);
            let area = height * sigma * (2.0 * std::f64::consts::PI).sqrt();

            let mut peak = Component::gaussian(label, area, sigma, energy);
            let p = peak.parameters_mut();
            p[0].bmin = Some(0.0);
            p[1].free = false;
            p[2].free = false;
            model.append(peak)?;
        }
    }
    debug!("EDS model with {} component(s)", model.len());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::{AxisManager, DataAxis};
    use crate::math::{gaussian, power_law};
    use crate::metadata::DictionaryTree;

    fn eels_signal(elements: &[&str]) -> Signal {
        let axis = DataAxis::new(500, 1.0, 400.0).unwrap().with_units("eV");
        let x = axis.axis_values();
        let data = x.iter().map(|&e| power_law(e, 1e9, 3.0, 0.0)).collect();
        let mut md = DictionaryTree::new();
        md.set("Signal.signal_type", "EELS").unwrap();
        md.set("Sample.elements", elements.to_vec()).unwrap();
        Signal::new(data, AxisManager::new(vec![axis]).unwrap(), md).unwrap()
    }

    #[test]
    fn generic_signal_gets_empty_model() {
        let signal = Signal::from_spectrum(vec![1.0; 10]).unwrap();
        assert!(create_model(&signal, &ModelOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn eels_model_has_background_and_edges_in_range() {
        let signal = eels_signal(&["Fe", "O", "C"]);
        let model = create_model(&signal, &ModelOptions::default()).unwrap();
        let names: Vec<&str> = model.components().iter().map(|c| c.name.as_str()).collect();
        // C K (284 eV) is below the axis; Fe K is far above it.
        assert_eq!(names, vec![BACKGROUND, "O_K", "Fe_L3"]);

        let r = model.component(BACKGROUND).unwrap().parameter("r").unwrap().value;
        assert!((r - 3.0).abs() < 0.05, "r = {r}");
    }

    #[test]
    fn options_override_metadata_elements() {
        let signal = eels_signal(&["Fe"]);
        let options = ModelOptions {
            auto_background: false,
            elements: Some(vec!["Mn".to_string()]),
            ..ModelOptions::default()
        };
        let model = create_model(&signal, &options).unwrap();
        let names: Vec<&str> = model.components().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Mn_L3"]);
    }

    #[test]
    fn unknown_element_is_an_error() {
        let signal = eels_signal(&["Xx"]);
        assert!(create_model(&signal, &ModelOptions::default()).is_err());
    }

    #[test]
    fn eds_model_fixes_line_shapes() {
        let axis = DataAxis::new(1000, 0.01, 0.0).unwrap().with_units("keV");
        let x = axis.axis_values();
        let sigma = 0.06;
        let data = x.iter().map(|&e| 50.0 * gaussian(e, 1.0, sigma, 6.4039) + 1.0).collect();
        let mut md = DictionaryTree::new();
        md.set("Signal.signal_type", "EDS_SEM").unwrap();
        md.set("Sample.elements", vec!["Fe"]).unwrap();
        let signal = Signal::new(data, AxisManager::new(vec![axis]).unwrap(), md).unwrap();

        let model = create_model(&signal, &ModelOptions::default()).unwrap();
        let names: Vec<&str> = model.components().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![BACKGROUND, "Fe_La", "Fe_Ka", "Fe_Kb"]);

        let ka = model.component("Fe_Ka").unwrap();
        assert!(!ka.parameter("sigma").unwrap().free);
        assert!(!ka.parameter("centre").unwrap().free);
        assert_eq!(ka.parameter("centre").unwrap().value, 6.4039);
        assert!(ka.parameter("A").unwrap().value > 0.0);

        // Three background coefficients plus one area per line.
        assert_eq!(model.free_parameter_vector().len(), 6);
    }
}

//! EDS physics: interaction ranges, detector resolution, composition
//! conversion and detector geometry.
//!
//! Energies are in keV unless noted; ranges are returned in µm.

use crate::error::{Result, SpecError};
use crate::physics::elements::elements;

/// Reference line for detector resolution.
pub const RESOLUTION_REFERENCE_LINE: &str = "Mn_Ka";

/// Maximum X-ray generation depth (Anderson–Hasler), in µm.
///
/// `density` defaults to the pure element's density.
pub fn xray_range(xray_line: &str, beam_energy: f64, density: Option<f64>) -> Result<f64> {
    let (element, line) = elements().xray_line(xray_line)?;
    let rho = density.unwrap_or(element.density);
    Ok(0.064 / rho * (beam_energy.powf(1.68) - line.energy.powf(1.68)))
}

/// Electron penetration depth (Kanaya–Okayama), in µm.
///
/// `tilt` is the stage tilt in degrees; the depth shrinks with `cos(tilt)`.
pub fn electron_range(element: &str, beam_energy: f64, density: Option<f64>, tilt: f64) -> Result<f64> {
    let el = elements().get(element)?;
    let rho = density.unwrap_or(el.density);
    let z = el.z as f64;
    Ok(0.0276 * el.atomic_weight / z.powf(0.89) / rho * beam_energy.powf(1.67) * tilt.to_radians().cos())
}

/// Detector FWHM (keV) at `energy` given the FWHM at Mn Kα in eV
/// (Fiori–Newbury).
pub fn fwhm_at_energy(fwhm_reference_ev: f64, energy: f64) -> Result<f64> {
    let (_, reference) = elements().xray_line(RESOLUTION_REFERENCE_LINE)?;
    let variance = 2.5 * (energy - reference.energy) * 1000.0 + fwhm_reference_ev * fwhm_reference_ev;
    Ok(variance.max(0.0).sqrt() / 1000.0)
}

fn atomic_weights(symbols: &[&str], compositions: &[f64]) -> Result<Vec<f64>> {
    if symbols.len() != compositions.len() {
        return Err(SpecError::DimensionMismatch {
            context: "composition",
            expected: symbols.len(),
            found: compositions.len(),
        });
    }
    symbols
        .iter()
        .map(|s| elements().get(s).map(|e| e.atomic_weight))
        .collect()
}

fn normalise(mut values: Vec<f64>) -> Result<Vec<f64>> {
    let total: f64 = values.iter().sum();
    if !(total > 0.0) {
        return Err(SpecError::InvalidConfig("composition must have a positive total".to_string()));
    }
    values.iter_mut().for_each(|v| *v /= total);
    Ok(values)
}

/// Atomic fractions to weight fractions.
pub fn atomic_to_weight(symbols: &[&str], compositions: &[f64]) -> Result<Vec<f64>> {
    let weights = atomic_weights(symbols, compositions)?;
    normalise(compositions.iter().zip(&weights).map(|(c, a)| c * a).collect())
}

/// Weight fractions to atomic fractions.
pub fn weight_to_atomic(symbols: &[&str], compositions: &[f64]) -> Result<Vec<f64>> {
    let weights = atomic_weights(symbols, compositions)?;
    normalise(compositions.iter().zip(&weights).map(|(c, a)| c / a).collect())
}

/// Weight-averaged density of a mixture given atomic fractions.
pub fn density_of_mixture(symbols: &[&str], atomic_compositions: &[f64]) -> Result<f64> {
    let weights = atomic_to_weight(symbols, atomic_compositions)?;
    symbols.iter().zip(&weights).try_fold(0.0, |acc, (s, w)| {
        Ok(acc + elements().get(s)?.density * w)
    })
}

/// X-ray take-off angle in degrees.
///
/// All inputs are in degrees: stage tilt, detector azimuth and detector
/// elevation.
pub fn take_off_angle(tilt_stage: f64, azimuth_angle: f64, elevation_angle: f64) -> f64 {
    let a = (90.0 + tilt_stage).to_radians();
    let b = azimuth_angle.to_radians();
    let c = elevation_angle.to_radians();
    (-a.cos() * b.cos() * c.cos() + a.sin() * c.sin()).asin().to_degrees()
}

/// Every database line with energy in `[low, high]` keV, as `(label, energy)`
/// sorted by energy. Restricted to `symbols` when given.
pub fn xray_lines_in_range(low: f64, high: f64, symbols: Option<&[&str]>) -> Result<Vec<(String, f64)>> {
    let db = elements();
    let selected: Vec<_> = match symbols {
        Some(list) => list.iter().map(|s| db.get(s)).collect::<Result<_>>()?,
        None => db.iter().collect(),
    };
    let mut out: Vec<(String, f64)> = selected
        .into_iter()
        .flat_map(|el| {
            el.lines
                .iter()
                .filter(|l| l.energy >= low && l.energy <= high)
                .map(move |l| (format!("{}_{}", el.symbol, l.name), l.energy))
        })
        .collect();
    out.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(out)
}

//! The logical loader contract: `(data, axes, attributes)`.
//!
//! Format readers live outside this crate; they hand over a `LoadedSignal`.
//! This module validates it, maps flat calibration attributes onto axes and
//! provides a JSON representation of the triple.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::axes::DataAxis;
use crate::error::{Result, SpecError};
use crate::metadata::DictionaryTree;
use crate::signal::Signal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedSignal {
    /// Row-major over the axes in `index_in_array` order.
    pub data: Vec<f64>,
    pub axes: Vec<DataAxis>,
    #[serde(default)]
    pub attributes: DictionaryTree,
}

impl LoadedSignal {
    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() {
            return Err(SpecError::InvalidAxis("loaded signal has no axes".to_string()));
        }
        for axis in &self.axes {
            axis.validate()?;
        }
        let expected: usize = self.axes.iter().map(|a| a.size).product();
        if expected != self.data.len() {
            return Err(SpecError::DimensionMismatch {
                context: "loaded data",
                expected,
                found: self.data.len(),
            });
        }
        let non_finite = self.data.iter().filter(|v| !v.is_finite()).count();
        if non_finite > 0 {
            warn!("loaded data contains {non_finite} non-finite value(s)");
        }
        Ok(())
    }
}

/// How the acquisition was recorded; decides which trailing axes are
/// signal axes and how they are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordBy {
    /// Names `Z, Y, X`; the last two axes are the image.
    Image,
    /// Names `Y, X, Energy`; the last axis is the spectrum.
    Spectrum,
}

/// Axes for up to three dimensions from flat calibration keys
/// (`xscale`, `xorigin`, `xunits`, likewise `y`, `z`, `energy`).
///
/// Missing keys fall back to scale 1, origin 0 and empty units.
pub fn axes_from_calibration(
    record_by: RecordBy,
    shape: &[usize],
    calibration: &DictionaryTree,
) -> Result<Vec<DataAxis>> {
    let dim = shape.len();
    if dim == 0 || dim > 3 {
        return Err(SpecError::InvalidAxis(format!(
            "calibrated data must have 1 to 3 dimensions, found {dim}"
        )));
    }
    let (names, prefixes, n_signal): ([&str; 3], [&str; 3], usize) = match record_by {
        RecordBy::Image => (["Z", "Y", "X"], ["z", "y", "x"], 2.min(dim)),
        RecordBy::Spectrum => (["Y", "X", "Energy"], ["y", "x", "energy"], 1),
    };

    shape
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let slot = 3 - dim + i;
            let prefix = prefixes[slot];
            let scale = calibration.get_f64(&format!("{prefix}scale")).unwrap_or(1.0);
            let offset = calibration.get_f64(&format!("{prefix}origin")).unwrap_or(0.0);
            let units = calibration.get_str(&format!("{prefix}units")).unwrap_or("");
            Ok(DataAxis::new(size, scale, offset)?
                .with_name(names[slot])
                .with_units(units)
                .with_index_in_array(i)
                .with_navigate(i < dim - n_signal))
        })
        .collect()
}

pub fn read_signal_json(path: &Path) -> Result<LoadedSignal> {
    let file = File::open(path).map_err(|e| SpecError::io(path, e))?;
    let loaded: LoadedSignal = serde_json::from_reader(BufReader::new(file))?;
    loaded.validate()?;
    Ok(loaded)
}

pub fn write_signal_json(path: &Path, loaded: &LoadedSignal) -> Result<()> {
    let file = File::create(path).map_err(|e| SpecError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), loaded)?;
    Ok(())
}

/// Read a JSON triple and build a `Signal` from it.
pub fn load_signal(path: &Path) -> Result<Signal> {
    Signal::from_loaded(read_signal_json(path)?)
}

pub fn save_signal(path: &Path, signal: &Signal) -> Result<()> {
    write_signal_json(path, &signal.clone().into_loaded()?)
}

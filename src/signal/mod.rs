//! Signal container: a flat data array, its axes and its metadata.
//!
//! Data is stored row-major over `axes.shape()`. Navigation positions are
//! addressed by flat navigation index (see `AxisManager::unfold`).

pub mod tools;

pub use tools::*;

use log::warn;

use crate::axes::manager::{ravel, row_major_strides, unravel};
use crate::axes::{AxisBound, AxisManager, DataAxis};
use crate::domain::SignalKind;
use crate::error::{Result, SpecError};
use crate::io::LoadedSignal;
use crate::metadata::DictionaryTree;

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    data: Vec<f64>,
    axes: AxisManager,
    kind: SignalKind,
    pub metadata: DictionaryTree,
    pub original_metadata: DictionaryTree,
}

impl Signal {
    pub fn new(data: Vec<f64>, axes: AxisManager, metadata: DictionaryTree) -> Result<Self> {
        if data.len() != axes.total_size() {
            return Err(SpecError::DimensionMismatch {
                context: "signal data",
                expected: axes.total_size(),
                found: data.len(),
            });
        }
        let kind = SignalKind::from_metadata(&metadata);
        if let Some(t) = metadata.get_str("Signal.signal_type") {
            if kind == SignalKind::Generic && !t.is_empty() {
                warn!("unknown signal_type '{t}', treating as a generic signal");
            }
        }
        Ok(Self {
            data,
            axes,
            kind,
            metadata,
            original_metadata: DictionaryTree::new(),
        })
    }

    /// Single spectrum on an uncalibrated axis.
    pub fn from_spectrum(data: Vec<f64>) -> Result<Self> {
        let axes = AxisManager::from_shape(&[data.len()], 1)?;
        Self::new(data, axes, DictionaryTree::new())
    }

    /// Build from the loader triple. `attributes` is kept verbatim as the
    /// original metadata; its `metadata` subtree (or the whole mapping when
    /// absent) becomes the working metadata.
    pub fn from_loaded(loaded: LoadedSignal) -> Result<Self> {
        let LoadedSignal { data, axes, attributes } = loaded;
        let axes = AxisManager::new(axes)?;
        let metadata = match attributes.get("metadata").and_then(|v| v.as_tree()) {
            Some(tree) => tree.clone(),
            None => attributes.clone(),
        };
        let mut signal = Self::new(data, axes, metadata)?;
        signal.original_metadata = attributes;
        Ok(signal)
    }

    /// Back to the loader triple, with the working metadata stored under
    /// `metadata`.
    pub fn into_loaded(self) -> Result<LoadedSignal> {
        let mut attributes = self.original_metadata;
        attributes.set("metadata", self.metadata)?;
        Ok(LoadedSignal {
            data: self.data,
            axes: self.axes.axes().to_vec(),
            attributes,
        })
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn axes_manager(&self) -> &AxisManager {
        &self.axes
    }

    /// Change an axis' calibration (size is not affected).
    pub fn calibrate_axis(&mut self, axis: usize, scale: f64, offset: f64, units: &str) -> Result<()> {
        self.axes.axis_mut(axis)?.set_calibration(scale, offset, units)
    }

    pub fn set_navigate(&mut self, axis: usize, navigate: bool) -> Result<()> {
        self.axes.set_navigate(axis, navigate)
    }

    pub fn kind(&self) -> &SignalKind {
        &self.kind
    }

    pub fn set_kind(&mut self, kind: SignalKind) {
        self.kind = kind;
    }

    pub fn title(&self) -> &str {
        self.metadata.get_str("General.title").unwrap_or("")
    }

    /// Array index of the single signal axis.
    pub fn signal_axis_index(&self) -> Result<usize> {
        let found = self.axes.signal_dimension();
        if found != 1 {
            return Err(SpecError::UnsupportedSignalDimension { expected: 1, found });
        }
        self.axes
            .axes()
            .iter()
            .position(|a| !a.navigate)
            .ok_or(SpecError::UnsupportedSignalDimension { expected: 1, found })
    }

    pub fn signal_axis(&self) -> Result<&DataAxis> {
        self.axes.axis(self.signal_axis_index()?)
    }

    /// Signal values at navigation position `nav`, in row-major signal order.
    pub fn spectrum_at(&self, nav: usize) -> Result<Vec<f64>> {
        Ok(self
            .axes
            .signal_offsets(nav)?
            .into_iter()
            .map(|o| self.data[o])
            .collect())
    }

    pub fn set_spectrum_at(&mut self, nav: usize, values: &[f64]) -> Result<()> {
        let offsets = self.axes.signal_offsets(nav)?;
        if offsets.len() != values.len() {
            return Err(SpecError::DimensionMismatch {
                context: "spectrum values",
                expected: offsets.len(),
                found: values.len(),
            });
        }
        for (o, &v) in offsets.into_iter().zip(values) {
            self.data[o] = v;
        }
        Ok(())
    }

    /// Every spectrum in flat navigation order.
    pub fn spectra(&self) -> Result<Vec<Vec<f64>>> {
        (0..self.axes.navigation_size()).map(|nav| self.spectrum_at(nav)).collect()
    }

    /// Keep `start..end` along `axis` (end exclusive; float bounds are
    /// physical values).
    pub fn crop(&mut self, axis: usize, start: AxisBound, end: AxisBound) -> Result<()> {
        let ax = self.axes.axis(axis)?;
        let i0 = ax.resolve(start);
        let i1 = ax.resolve(end);
        self.crop_indices(axis, i0, i1)
    }

    /// Crop the (1-D) signal axis.
    pub fn crop_signal(&mut self, start: AxisBound, end: AxisBound) -> Result<()> {
        let axis = self.signal_axis_index()?;
        self.crop(axis, start, end)
    }

    pub(crate) fn crop_indices(&mut self, axis: usize, start: usize, end: usize) -> Result<()> {
        let old_shape = self.axes.shape();
        let mut axes = self.axes.clone();
        axes.crop_axis(axis, start, end)?;
        let new_shape = axes.shape();
        let old_strides = row_major_strides(&old_shape);

        let mut data = Vec::with_capacity(axes.total_size());
        for flat in 0..axes.total_size() {
            let mut coords = unravel(flat, &new_shape)?;
            coords[axis] += start;
            let offset: usize = coords.iter().zip(&old_strides).map(|(c, s)| c * s).sum();
            data.push(self.data[offset]);
        }
        self.data = data;
        self.axes = axes;
        Ok(())
    }

    /// Sum over all navigation positions.
    pub fn sum_navigation(&self) -> Result<Signal> {
        let mut total = vec![0.0; self.axes.signal_size()];
        for spectrum in self.spectra()? {
            for (t, v) in total.iter_mut().zip(spectrum) {
                *t += v;
            }
        }
        let axes = self
            .axes
            .signal_axes()
            .enumerate()
            .map(|(i, a)| a.clone().with_index_in_array(i))
            .collect();
        let mut out = Signal::new(total, AxisManager::new(axes)?, self.metadata.clone())?;
        out.kind = self.kind.clone();
        Ok(out)
    }

    /// Mean spectrum over all navigation positions.
    pub fn mean_spectrum(&self) -> Result<Vec<f64>> {
        let n = self.axes.navigation_size() as f64;
        Ok(self.sum_navigation()?.data.into_iter().map(|v| v / n).collect())
    }

    /// Value at navigation coordinates and signal coordinates, both in
    /// array order of their partitions.
    pub fn value_at(&self, nav_coords: &[usize], signal_coords: &[usize]) -> Result<f64> {
        let nav = self.axes.fold(nav_coords)?;
        let flat = ravel(signal_coords, &self.axes.signal_shape())?;
        Ok(self.data[self.axes.signal_offsets(nav)?[flat]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_image() -> Signal {
        // 2 x 3 navigation, 4 channels; value = 100*row + 10*col + channel.
        let axes = AxisManager::from_shape(&[2, 3, 4], 1).unwrap();
        let data = (0..24)
            .map(|i| {
                let (r, rem) = (i / 12, i % 12);
                (100 * r + 10 * (rem / 4) + rem % 4) as f64
            })
            .collect();
        Signal::new(data, axes, DictionaryTree::new()).unwrap()
    }

    #[test]
    fn spectrum_access_by_navigation_index() {
        let mut s = ramp_image();
        assert_eq!(s.spectrum_at(4).unwrap(), vec![110.0, 111.0, 112.0, 113.0]);
        assert_eq!(s.value_at(&[1, 2], &[3]).unwrap(), 123.0);
        s.set_spectrum_at(0, &[9.0; 4]).unwrap();
        assert_eq!(s.spectrum_at(0).unwrap(), vec![9.0; 4]);
        assert!(s.set_spectrum_at(0, &[1.0]).is_err());
        assert!(s.spectrum_at(6).is_err());
    }

    #[test]
    fn rejects_wrong_data_length() {
        let axes = AxisManager::from_shape(&[2, 4], 1).unwrap();
        assert!(matches!(
            Signal::new(vec![0.0; 7], axes, DictionaryTree::new()),
            Err(SpecError::DimensionMismatch { expected: 8, found: 7, .. })
        ));
    }

    #[test]
    fn crop_signal_keeps_values_and_calibration() {
        let mut s = ramp_image();
        s.calibrate_axis(2, 0.5, 10.0, "eV").unwrap();
        s.crop_signal(AxisBound::Index(1), AxisBound::Value(11.5)).unwrap();
        assert_eq!(s.axes_manager().signal_shape(), vec![2]);
        assert_eq!(s.signal_axis().unwrap().offset, 10.5);
        assert_eq!(s.spectrum_at(5).unwrap(), vec![121.0, 122.0]);
    }

    #[test]
    fn crop_navigation_axis() {
        let mut s = ramp_image();
        s.crop(1, AxisBound::Index(1), AxisBound::Index(3)).unwrap();
        assert_eq!(s.axes_manager().navigation_shape(), vec![2, 2]);
        assert_eq!(s.spectrum_at(0).unwrap()[0], 10.0);
        assert_eq!(s.spectrum_at(3).unwrap()[0], 120.0);
    }

    #[test]
    fn sum_and_mean_over_navigation() {
        let s = ramp_image();
        let sum = s.sum_navigation().unwrap();
        assert_eq!(sum.axes_manager().navigation_size(), 1);
        // channel 0: rows 0,100 x cols 0,10,20 -> 3*100 + 2*30 = 360
        assert_eq!(sum.data()[0], 360.0);
        assert_eq!(s.mean_spectrum().unwrap()[0], 60.0);
    }

    #[test]
    fn kind_comes_from_metadata() {
        let mut md = DictionaryTree::new();
        md.set("Signal.signal_type", "EELS").unwrap();
        let s = Signal::new(vec![0.0; 4], AxisManager::from_shape(&[4], 1).unwrap(), md).unwrap();
        assert_eq!(s.kind().display_name(), "EELS");
        assert!(s.signal_axis_index().is_ok());
    }
}

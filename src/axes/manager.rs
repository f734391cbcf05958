//! Ordered collection of axes split into navigation and signal partitions.
//!
//! Data arrays are flattened row-major over `shape()` (array order). The
//! navigation index is flattened row-major over the navigation axes taken in
//! array order, so the last navigation axis varies fastest.

use serde::{Deserialize, Serialize};

use crate::axes::DataAxis;
use crate::error::{Result, SpecError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisManager {
    axes: Vec<DataAxis>,
}

impl AxisManager {
    /// Build a manager from axes in any order; they are sorted by
    /// `index_in_array`, which must cover `0..n` exactly once.
    pub fn new(mut axes: Vec<DataAxis>) -> Result<Self> {
        if axes.is_empty() {
            return Err(SpecError::InvalidAxis("at least one axis is required".to_string()));
        }
        axes.sort_by_key(|a| a.index_in_array);
        for (i, axis) in axes.iter().enumerate() {
            axis.validate()?;
            if axis.index_in_array != i {
                return Err(SpecError::InvalidAxis(format!(
                    "index_in_array values must be 0..{} without gaps (axis '{}' has {})",
                    axes.len(),
                    axis.name,
                    axis.index_in_array
                )));
            }
        }
        if axes.iter().all(|a| a.navigate) {
            return Err(SpecError::InvalidAxis("at least one signal axis is required".to_string()));
        }
        Ok(Self { axes })
    }

    /// Uncalibrated axes for a data shape; the last `signal_dimension` axes
    /// are signal axes.
    pub fn from_shape(shape: &[usize], signal_dimension: usize) -> Result<Self> {
        if signal_dimension == 0 || signal_dimension > shape.len() {
            return Err(SpecError::InvalidAxis(format!(
                "signal dimension {signal_dimension} is incompatible with shape {shape:?}"
            )));
        }
        let n_nav = shape.len() - signal_dimension;
        let axes = shape
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                DataAxis::new(size, 1.0, 0.0).map(|a| {
                    a.with_name(format!("axis{i}"))
                        .with_index_in_array(i)
                        .with_navigate(i < n_nav)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(axes)
    }

    pub fn axes(&self) -> &[DataAxis] {
        &self.axes
    }

    pub fn axis(&self, index_in_array: usize) -> Result<&DataAxis> {
        let size = self.axes.len();
        self.axes.get(index_in_array).ok_or(SpecError::IndexOutOfRange {
            axis: "<axes>".to_string(),
            index: index_in_array,
            size,
        })
    }

    pub fn axis_mut(&mut self, index_in_array: usize) -> Result<&mut DataAxis> {
        let size = self.axes.len();
        self.axes.get_mut(index_in_array).ok_or(SpecError::IndexOutOfRange {
            axis: "<axes>".to_string(),
            index: index_in_array,
            size,
        })
    }

    pub fn navigation_axes(&self) -> impl Iterator<Item = &DataAxis> {
        self.axes.iter().filter(|a| a.navigate)
    }

    pub fn signal_axes(&self) -> impl Iterator<Item = &DataAxis> {
        self.axes.iter().filter(|a| !a.navigate)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.size).collect()
    }

    pub fn navigation_shape(&self) -> Vec<usize> {
        self.navigation_axes().map(|a| a.size).collect()
    }

    pub fn signal_shape(&self) -> Vec<usize> {
        self.signal_axes().map(|a| a.size).collect()
    }

    pub fn navigation_dimension(&self) -> usize {
        self.navigation_axes().count()
    }

    pub fn signal_dimension(&self) -> usize {
        self.signal_axes().count()
    }

    /// Number of navigation positions (1 when there are no navigation axes).
    pub fn navigation_size(&self) -> usize {
        self.navigation_axes().map(|a| a.size).product()
    }

    pub fn signal_size(&self) -> usize {
        self.signal_axes().map(|a| a.size).product()
    }

    pub fn total_size(&self) -> usize {
        self.navigation_size() * self.signal_size()
    }

    /// Flat navigation index to navigation coordinates.
    pub fn unfold(&self, flat: usize) -> Result<Vec<usize>> {
        let shape = self.navigation_shape();
        unravel(flat, &shape)
    }

    /// Navigation coordinates to a flat navigation index.
    pub fn fold(&self, coords: &[usize]) -> Result<usize> {
        let shape = self.navigation_shape();
        ravel(coords, &shape)
    }

    pub fn value_at(&self, axis: usize, index: usize) -> Result<f64> {
        self.axis(axis)?.value_at(index)
    }

    pub fn index_at(&self, axis: usize, value: f64) -> Result<usize> {
        Ok(self.axis(axis)?.index_at(value))
    }

    /// Move an axis between the navigation and signal partitions.
    pub fn set_navigate(&mut self, axis: usize, navigate: bool) -> Result<()> {
        let previous = self.axis(axis)?.navigate;
        self.axes[axis].navigate = navigate;
        if self.axes.iter().all(|a| a.navigate) {
            self.axes[axis].navigate = previous;
            return Err(SpecError::InvalidAxis("at least one signal axis is required".to_string()));
        }
        Ok(())
    }

    pub fn crop_axis(&mut self, axis: usize, start: usize, end: usize) -> Result<()> {
        self.axis_mut(axis)?.crop(start, end)
    }

    /// Offsets into the flattened data array of every element of the signal
    /// at navigation position `nav_flat`, in row-major signal order.
    pub fn signal_offsets(&self, nav_flat: usize) -> Result<Vec<usize>> {
        let nav_coords = self.unfold(nav_flat)?;
        let strides = self.strides();

        let base: usize = self
            .axes
            .iter()
            .zip(&strides)
            .filter(|(a, _)| a.navigate)
            .zip(&nav_coords)
            .map(|((_, &stride), &c)| c * stride)
            .sum();

        let sig: Vec<(usize, usize)> = self
            .axes
            .iter()
            .zip(&strides)
            .filter(|(a, _)| !a.navigate)
            .map(|(a, &stride)| (a.size, stride))
            .collect();
        let sig_shape: Vec<usize> = sig.iter().map(|(size, _)| *size).collect();

        let n = self.signal_size();
        let mut out = Vec::with_capacity(n);
        for flat in 0..n {
            let coords = unravel(flat, &sig_shape)?;
            let offset: usize = coords.iter().zip(&sig).map(|(&c, (_, stride))| c * stride).sum();
            out.push(base + offset);
        }
        Ok(out)
    }

    fn strides(&self) -> Vec<usize> {
        row_major_strides(&self.shape())
    }
}

/// Element strides of a row-major array of `shape`.
pub(crate) fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

pub(crate) fn unravel(flat: usize, shape: &[usize]) -> Result<Vec<usize>> {
    let size: usize = shape.iter().product();
    if flat >= size {
        return Err(SpecError::IndexOutOfRange {
            axis: "<navigation>".to_string(),
            index: flat,
            size,
        });
    }
    let mut coords = vec![0usize; shape.len()];
    let mut rem = flat;
    for (c, &dim) in coords.iter_mut().zip(shape).rev() {
        *c = rem % dim;
        rem /= dim;
    }
    Ok(coords)
}

pub(crate) fn ravel(coords: &[usize], shape: &[usize]) -> Result<usize> {
    if coords.len() != shape.len() {
        return Err(SpecError::DimensionMismatch {
            context: "navigation coordinates",
            expected: shape.len(),
            found: coords.len(),
        });
    }
    let mut flat = 0usize;
    for (&c, &dim) in coords.iter().zip(shape) {
        if c >= dim {
            return Err(SpecError::IndexOutOfRange {
                axis: "<navigation>".to_string(),
                index: c,
                size: dim,
            });
        }
        flat = flat * dim + c;
    }
    Ok(flat)
}

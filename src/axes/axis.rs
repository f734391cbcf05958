//! One calibrated coordinate axis.
//!
//! The physical value of channel `i` is `offset + i * scale`. Queries that go
//! from value to index are lenient (they clamp); queries that go from index to
//! value are strict unless the caller asks for extrapolation explicitly.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecError};

/// A bound on an axis given either as a channel index or a physical value.
///
/// Integer bounds are indices, float bounds are calibrated values, so
/// `AxisBound::from(8)` and `AxisBound::from(0.8)` can mean the same channel
/// on an axis with `scale = 0.1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisBound {
    Index(usize),
    Value(f64),
}

impl From<usize> for AxisBound {
    fn from(value: usize) -> Self {
        AxisBound::Index(value)
    }
}

impl From<f64> for AxisBound {
    fn from(value: f64) -> Self {
        AxisBound::Value(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataAxis {
    pub name: String,
    pub units: String,
    pub size: usize,
    pub scale: f64,
    pub offset: f64,
    pub index_in_array: usize,
    /// `true` for navigation axes, `false` for signal axes.
    pub navigate: bool,
}

impl DataAxis {
    pub fn new(size: usize, scale: f64, offset: f64) -> Result<Self> {
        let axis = Self {
            name: String::new(),
            units: String::new(),
            size,
            scale,
            offset,
            index_in_array: 0,
            navigate: false,
        };
        axis.validate()?;
        Ok(axis)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_navigate(mut self, navigate: bool) -> Self {
        self.navigate = navigate;
        self
    }

    pub fn with_index_in_array(mut self, index: usize) -> Self {
        self.index_in_array = index;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(SpecError::InvalidAxis(format!(
                "axis '{}' must have at least one channel",
                self.name
            )));
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(SpecError::InvalidAxis(format!(
                "axis '{}' has invalid scale {}",
                self.name, self.scale
            )));
        }
        if !self.offset.is_finite() {
            return Err(SpecError::InvalidAxis(format!(
                "axis '{}' has invalid offset {}",
                self.name, self.offset
            )));
        }
        Ok(())
    }

    /// Physical value at `index`.
    pub fn value_at(&self, index: usize) -> Result<f64> {
        if index >= self.size {
            return Err(SpecError::IndexOutOfRange {
                axis: self.name.clone(),
                index,
                size: self.size,
            });
        }
        Ok(self.offset + index as f64 * self.scale)
    }

    /// Physical value at a (possibly fractional or out-of-range) index.
    pub fn value_at_unchecked(&self, index: f64) -> f64 {
        self.offset + index * self.scale
    }

    /// Fractional index of `value`, without clamping.
    pub fn continuous_index(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }

    /// Nearest channel index of `value`, clamped to `[0, size - 1]`.
    pub fn index_at(&self, value: f64) -> usize {
        let idx = self.continuous_index(value).round();
        if idx.is_nan() || idx <= 0.0 {
            return 0;
        }
        let last = self.size - 1;
        if idx >= last as f64 { last } else { idx as usize }
    }

    /// Convert a physical interval into an ordered index interval.
    pub fn slice_from_values(&self, value_lo: f64, value_hi: f64) -> (usize, usize) {
        let (lo, hi) = if value_lo <= value_hi {
            (value_lo, value_hi)
        } else {
            (value_hi, value_lo)
        };
        let a = self.index_at(lo);
        let b = self.index_at(hi);
        // A negative scale flips the mapping.
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn resolve(&self, bound: AxisBound) -> usize {
        match bound {
            AxisBound::Index(i) => i.min(self.size),
            AxisBound::Value(v) => self.index_at(v),
        }
    }

    pub fn axis_values(&self) -> Vec<f64> {
        (0..self.size).map(|i| self.value_at_unchecked(i as f64)).collect()
    }

    pub fn low_value(&self) -> f64 {
        let last = self.value_at_unchecked((self.size - 1) as f64);
        self.offset.min(last)
    }

    pub fn high_value(&self) -> f64 {
        let last = self.value_at_unchecked((self.size - 1) as f64);
        self.offset.max(last)
    }

    /// Linearly interpolate `data` (one value per channel) at a physical value.
    ///
    /// Values outside the axis return the nearest end value.
    pub fn interpolate(&self, data: &[f64], value: f64) -> Result<f64> {
        if data.len() != self.size {
            return Err(SpecError::DimensionMismatch {
                context: "axis interpolation",
                expected: self.size,
                found: data.len(),
            });
        }
        let x = self.continuous_index(value);
        if x.is_nan() {
            return Ok(f64::NAN);
        }
        if x <= 0.0 {
            return Ok(data[0]);
        }
        let last = self.size - 1;
        if x >= last as f64 {
            return Ok(data[last]);
        }
        let i0 = x.floor() as usize;
        let frac = x - i0 as f64;
        Ok(data[i0] * (1.0 - frac) + data[i0 + 1] * frac)
    }

    pub fn set_calibration(&mut self, scale: f64, offset: f64, units: impl Into<String>) -> Result<()> {
        let previous = (self.scale, self.offset);
        self.scale = scale;
        self.offset = offset;
        if let Err(e) = self.validate() {
            (self.scale, self.offset) = previous;
            return Err(e);
        }
        self.units = units.into();
        Ok(())
    }

    /// Keep channels `start..end`; the offset moves so values are preserved.
    pub fn crop(&mut self, start: usize, end: usize) -> Result<()> {
        let end = end.min(self.size);
        if start >= end {
            return Err(SpecError::InvalidAxis(format!(
                "cannot crop axis '{}' to empty range {start}..{end}",
                self.name
            )));
        }
        self.offset = self.value_at_unchecked(start as f64);
        self.size = end - start;
        Ok(())
    }
}

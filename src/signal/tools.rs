//! One-dimensional signal tools: shifting and alignment, gap interpolation,
//! peak width and peak finding, synthetic noise.
//!
//! All of these need a single signal axis and operate on every navigation
//! position independently.

use log::debug;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Normal, Poisson};
use serde::{Deserialize, Serialize};

use crate::axes::AxisBound;
use crate::error::{Result, SpecError};
use crate::math::{GAUSSIAN_FWHM_PER_SIGMA, solve_least_squares};

use super::Signal;

/// Fractional-channel slack when deciding whether a shifted sample still
/// falls on the axis.
const CHANNEL_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakWidth {
    pub width: f64,
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub position: f64,
    pub height: f64,
    /// FWHM from the log-quadratic fit (0 without sub-channel refinement).
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakFinderOptions {
    /// Minimum drop of the derivative across a zero crossing.
    pub slope_threshold: f64,
    /// Minimum peak height; `None` = 10% of the spectrum maximum.
    pub amp_threshold: Option<f64>,
    /// Median filter kernel size applied before differentiating (0 or 1 = off).
    pub medfilt_radius: usize,
    /// Points used for the sub-channel fit around each peak.
    pub peak_group: usize,
    pub subchannel: bool,
}

impl Default for PeakFinderOptions {
    fn default() -> Self {
        Self {
            slope_threshold: 0.0,
            amp_threshold: None,
            medfilt_radius: 5,
            peak_group: 10,
            subchannel: true,
        }
    }
}

/// Number of channels at one end that a shift of `shift` channels moves off
/// the axis.
fn channels_lost(shift: f64) -> usize {
    let n = (shift.abs() - CHANNEL_EPS).ceil();
    if n > 0.0 { n as usize } else { 0 }
}

/// `out[i] = y(i - shift)` with linear interpolation; NaN off the axis.
pub fn shift_spectrum(y: &[f64], shift: f64) -> Vec<f64> {
    let n = y.len();
    let last = n.saturating_sub(1) as f64;
    (0..n)
        .map(|i| {
            let mut ci = i as f64 - shift;
            if (ci - ci.round()).abs() < CHANNEL_EPS {
                ci = ci.round();
            }
            if !(ci >= -CHANNEL_EPS && ci <= last + CHANNEL_EPS) {
                return f64::NAN;
            }
            let ci = ci.clamp(0.0, last);
            let i0 = ci.floor() as usize;
            let frac = ci - i0 as f64;
            if frac == 0.0 {
                y[i0]
            } else {
                y[i0] * (1.0 - frac) + y[i0 + 1] * frac
            }
        })
        .collect()
}

/// Median filter with an odd `kernel`; windows shrink at the edges.
pub fn median_filter(y: &[f64], kernel: usize) -> Vec<f64> {
    if kernel <= 1 {
        return y.to_vec();
    }
    let half = kernel / 2;
    let mut window = Vec::with_capacity(kernel);
    (0..y.len())
        .map(|i| {
            window.clear();
            window.extend_from_slice(&y[i.saturating_sub(half)..(i + half + 1).min(y.len())]);
            window.sort_by(f64::total_cmp);
            let m = window.len() / 2;
            if window.len() % 2 == 1 {
                window[m]
            } else {
                0.5 * (window[m - 1] + window[m])
            }
        })
        .collect()
}

/// Central differences inside, one-sided at the ends (unit spacing).
pub fn gradient(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| match i {
            0 => y[1] - y[0],
            i if i == n - 1 => y[n - 1] - y[n - 2],
            i => 0.5 * (y[i + 1] - y[i - 1]),
        })
        .collect()
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Peak detection by smoothed first-derivative zero crossings (O'Haver).
pub fn find_peaks_ohaver(x: &[f64], y: &[f64], options: &PeakFinderOptions) -> Vec<Peak> {
    let n = y.len().min(x.len());
    if n < 3 {
        return Vec::new();
    }
    let amp = options.amp_threshold.unwrap_or_else(|| {
        0.1 * y[..n].iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max)
    });
    let d = gradient(&median_filter(&y[..n], options.medfilt_radius));
    let half = options.peak_group / 2;

    let mut peaks = Vec::new();
    for j in 0..n - 1 {
        if !(sign(d[j]) > sign(d[j + 1]) && sign(d[j + 1]) != 0) {
            continue;
        }
        if !(d[j] - d[j + 1] > options.slope_threshold && y[j] > amp) {
            continue;
        }
        if !options.subchannel {
            peaks.push(Peak {
                position: x[j],
                height: y[j],
                width: 0.0,
            });
            continue;
        }
        let lo = (j + 1).saturating_sub(half);
        let hi = (j + half).min(n - 1);
        if let Some(peak) = refine_peak(&x[lo..=hi], &y[lo..=hi], options.peak_group) {
            peaks.push(peak);
        }
    }
    peaks
}

fn refine_peak(xx: &[f64], yy: &[f64], group: usize) -> Option<Peak> {
    if group < 7 {
        let (i, &height) = yy.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1))?;
        return Some(Peak {
            position: xx[i],
            height,
            width: 0.0,
        });
    }
    let (px, py): (Vec<f64>, Vec<f64>) = xx
        .iter()
        .zip(yy)
        .filter(|(_, y)| **y > 0.0)
        .map(|(&x, &y)| (x, y.ln()))
        .unzip();
    if px.len() < 3 {
        return None;
    }
    let m = px.len() as f64;
    let avg = px.iter().sum::<f64>() / m;
    let stdev = (px.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / m).sqrt();
    if !(stdev > 0.0) {
        return None;
    }
    let design = DMatrix::from_fn(px.len(), 3, |i, j| ((px[i] - avg) / stdev).powi(j as i32));
    let coef = solve_least_squares(&design, &DVector::from_vec(py))?;
    let (c1, c2, c3) = (coef[0], coef[1], coef[2]);
    if !(c3 < 0.0) {
        return None;
    }
    let peak = Peak {
        position: avg - stdev * c2 / (2.0 * c3),
        height: (c1 - c2 * c2 / (4.0 * c3)).exp(),
        width: GAUSSIAN_FWHM_PER_SIGMA * stdev / (-2.0 * c3).sqrt(),
    };
    (peak.position.is_finite() && peak.height.is_finite() && peak.width.is_finite()).then_some(peak)
}

/// Width of the single peak in `y` at `factor` times its maximum.
///
/// Requires exactly two threshold crossings (one rising, one falling);
/// anything else (no crossing, multiple peaks, NaN) yields `None`.
pub fn peak_width(x: &[f64], y: &[f64], factor: f64) -> Option<PeakWidth> {
    if y.len() < 2 || y.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let t = factor * max;
    let mut crossings = Vec::new();
    for i in 0..y.len() - 1 {
        let (a, b) = (y[i] >= t, y[i + 1] >= t);
        if a != b {
            let pos = x[i] + (t - y[i]) / (y[i + 1] - y[i]) * (x[i + 1] - x[i]);
            crossings.push((pos, b));
        }
    }
    match crossings.as_slice() {
        [(left, true), (right, false)] => Some(PeakWidth {
            width: right - left,
            left: *left,
            right: *right,
        }),
        _ => None,
    }
}

impl Signal {
    /// Shift every spectrum by `shifts[nav]` axis units (positive moves
    /// features towards higher values). Samples shifted in from outside the
    /// axis are NaN; with `crop` those channels are removed and the axis
    /// offset updated.
    pub fn shift1d(&mut self, shifts: &[f64], crop: bool) -> Result<()> {
        let axis_index = self.signal_axis_index()?;
        let scale = self.axes_manager().axis(axis_index)?.scale;
        let n_nav = self.axes_manager().navigation_size();
        let shifts: Vec<f64> = match shifts.len() {
            1 => vec![shifts[0]; n_nav],
            len if len == n_nav => shifts.to_vec(),
            len => {
                return Err(SpecError::DimensionMismatch {
                    context: "shift1d shifts",
                    expected: n_nav,
                    found: len,
                });
            }
        };

        for (nav, &shift) in shifts.iter().enumerate() {
            let spectrum = self.spectrum_at(nav)?;
            self.set_spectrum_at(nav, &shift_spectrum(&spectrum, shift / scale))?;
        }

        if crop {
            let channel_shifts = shifts.iter().map(|s| s / scale);
            let left = channel_shifts.clone().filter(|s| *s > 0.0).map(channels_lost).max().unwrap_or(0);
            let right = channel_shifts.filter(|s| *s < 0.0).map(channels_lost).max().unwrap_or(0);
            let size = self.axes_manager().axis(axis_index)?.size;
            debug!("shift1d cropping {left} channel(s) left and {right} right");
            self.crop_indices(axis_index, left, size.saturating_sub(right))?;
        }
        Ok(())
    }

    /// Shifts (axis units) that align every spectrum with the one at
    /// `reference`, from the cross-correlation maximum with parabolic
    /// sub-channel refinement. Feed the result to `shift1d`.
    pub fn estimate_shift1d(
        &self,
        reference: usize,
        range: Option<(f64, f64)>,
        max_shift: Option<f64>,
    ) -> Result<Vec<f64>> {
        let axis = self.signal_axis()?;
        let (i0, i1) = match range {
            Some((lo, hi)) => axis.slice_from_values(lo, hi),
            None => (0, axis.size - 1),
        };
        let width = i1 - i0 + 1;
        let max_lag = max_shift
            .map(|m| (m / axis.scale).abs().ceil() as usize)
            .unwrap_or(width - 1)
            .min(width - 1) as isize;

        let centred = |v: Vec<f64>| -> Vec<f64> {
            let w: Vec<f64> = v[i0..=i1].iter().map(|x| if x.is_finite() { *x } else { 0.0 }).collect();
            let mean = w.iter().sum::<f64>() / w.len() as f64;
            w.into_iter().map(|x| x - mean).collect()
        };
        let reference = centred(self.spectrum_at(reference)?);

        let mut shifts = Vec::with_capacity(self.axes_manager().navigation_size());
        for nav in 0..self.axes_manager().navigation_size() {
            let s = centred(self.spectrum_at(nav)?);
            let corr: Vec<f64> = (-max_lag..=max_lag)
                .map(|lag| {
                    (0..width as isize)
                        .filter(|k| (0..width as isize).contains(&(k + lag)))
                        .map(|k| reference[k as usize] * s[(k + lag) as usize])
                        .sum::<f64>()
                })
                .collect();
            let best = corr
                .iter()
                .enumerate()
                .fold(0, |best, (i, c)| if *c > corr[best] { i } else { best });
            let mut lag = best as f64 - max_lag as f64;
            if best > 0 && best + 1 < corr.len() {
                let (cm, c0, cp) = (corr[best - 1], corr[best], corr[best + 1]);
                let denom = cm - 2.0 * c0 + cp;
                if denom < 0.0 {
                    lag += 0.5 * (cm - cp) / denom;
                }
            }
            shifts.push(-lag * axis.scale);
        }
        Ok(shifts)
    }

    /// Estimate shifts against `reference` and apply them.
    pub fn align1d(
        &mut self,
        reference: usize,
        range: Option<(f64, f64)>,
        max_shift: Option<f64>,
        crop: bool,
    ) -> Result<Vec<f64>> {
        let shifts = self.estimate_shift1d(reference, range, max_shift)?;
        self.shift1d(&shifts, crop)?;
        Ok(shifts)
    }

    /// Replace channels `start..end` by a straight line between the channels
    /// just outside them.
    pub fn interpolate_in_between(&mut self, start: AxisBound, end: AxisBound) -> Result<()> {
        let axis = self.signal_axis()?;
        let (i0, i1) = (axis.resolve(start), axis.resolve(end));
        if i0 == 0 || i1 >= axis.size || i0 >= i1 {
            return Err(SpecError::InvalidAxis(format!(
                "cannot interpolate channels {i0}..{i1} on an axis of {} channels",
                axis.size
            )));
        }
        let span = (i1 - (i0 - 1)) as f64;
        for nav in 0..self.axes_manager().navigation_size() {
            let mut y = self.spectrum_at(nav)?;
            let (y0, y1) = (y[i0 - 1], y[i1]);
            for (k, v) in y[i0..i1].iter_mut().enumerate() {
                *v = y0 + (y1 - y0) * (k + 1) as f64 / span;
            }
            self.set_spectrum_at(nav, &y)?;
        }
        Ok(())
    }

    /// Peak width at `factor` of the maximum for every spectrum, optionally
    /// restricted to a window (axis units) centred on the maximum.
    pub fn estimate_peak_width(&self, factor: f64, window: Option<f64>) -> Result<Vec<Option<PeakWidth>>> {
        let axis = self.signal_axis()?;
        let x = axis.axis_values();
        self.spectra()?
            .into_iter()
            .map(|y| {
                let (lo, hi) = match window {
                    None => (0, y.len() - 1),
                    Some(w) => {
                        let imax = y
                            .iter()
                            .enumerate()
                            .max_by(|a, b| a.1.total_cmp(b.1))
                            .map_or(0, |(i, _)| i);
                        let centre = x[imax];
                        axis.slice_from_values(centre - w / 2.0, centre + w / 2.0)
                    }
                };
                Ok(peak_width(&x[lo..=hi], &y[lo..=hi], factor))
            })
            .collect()
    }

    /// Peaks of every spectrum, positions in axis units.
    pub fn find_peaks_ohaver(&self, options: &PeakFinderOptions) -> Result<Vec<Vec<Peak>>> {
        let x = self.signal_axis()?.axis_values();
        Ok(self
            .spectra()?
            .iter()
            .map(|y| find_peaks_ohaver(&x, y, options))
            .collect())
    }

    /// Add zero-mean Gaussian noise with standard deviation `sigma`.
    pub fn add_gaussian_noise(&mut self, sigma: f64, seed: u64) -> Result<()> {
        let normal = Normal::new(0.0, sigma)
            .map_err(|e| SpecError::InvalidConfig(format!("noise distribution error: {e}")))?;
        let mut rng = StdRng::seed_from_u64(seed);
        for v in self.data_mut() {
            *v += rng.sample(normal);
        }
        Ok(())
    }

    /// Replace every value by a Poisson draw with that mean. Non-positive
    /// values become 0; NaN stays NaN.
    pub fn add_poissonian_noise(&mut self, seed: u64) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        for v in self.data_mut() {
            if v.is_nan() {
                continue;
            }
            if *v <= 0.0 {
                *v = 0.0;
                continue;
            }
            let poisson = Poisson::new(*v)
                .map_err(|e| SpecError::InvalidConfig(format!("noise distribution error: {e}")))?;
            *v = rng.sample(poisson);
        }
        Ok(())
    }
}

//! Stable profile functions shared by components and signal tools.
//!
//! - `gaussian(x; A, σ, c) = A / (σ √(2π)) · exp(-(x - c)² / 2σ²)` (area `A`)
//! - `lorentzian(x; A, γ, c) = A / π · γ / ((x - c)² + γ²)` (area `A`)
//! - `power_law(x; A, r, x0) = A · (x - x0)^(-r)` for `x > x0`, else 0
//!
//! Numerical notes:
//! - A zero or negative width makes the peak profiles degenerate; they return 0
//!   rather than NaN/inf so a bad trial step shows up as a large residual.
//! - The power law is evaluated as `exp(-r · ln(x - x0))` to stay finite for
//!   large exponents.

use crate::error::{Result, SpecError};

/// `√(2π)`.
const SQRT_TAU: f64 = 2.506_628_274_631_000_7;

/// FWHM of a Gaussian in units of σ: `2 √(2 ln 2)`.
pub const GAUSSIAN_FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

pub fn gaussian(x: f64, a: f64, sigma: f64, centre: f64) -> f64 {
    if !(sigma > 0.0) {
        return 0.0;
    }
    let z = (x - centre) / sigma;
    a / (sigma * SQRT_TAU) * (-0.5 * z * z).exp()
}

pub fn lorentzian(x: f64, a: f64, gamma: f64, centre: f64) -> f64 {
    if !(gamma > 0.0) {
        return 0.0;
    }
    let d = x - centre;
    a / std::f64::consts::PI * gamma / (d * d + gamma * gamma)
}

pub fn power_law(x: f64, a: f64, r: f64, origin: f64) -> f64 {
    let t = x - origin;
    if !(t > 0.0) {
        return 0.0;
    }
    a * (-r * t.ln()).exp()
}

/// Evaluate `Σ c_k x^k` (Horner).
pub fn polynomial(x: f64, coefficients: &[f64]) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(SpecError::InvalidConfig(format!(
            "invalid log-space range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(SpecError::InvalidConfig("log-space steps must be >= 2".to_string()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    // Pin the endpoint exactly; exp(ln(max)) can be off by an ulp.
    if let Some(last) = out.last_mut() {
        *last = max;
    }
    Ok(out)
}

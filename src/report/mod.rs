//! Reporting utilities: residuals, rankings, and formatted text output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

mod format;

pub use format::*;

use crate::error::{Result, SpecError};
use crate::fit::FitMap;
use crate::model::Model;

/// `y - model(x)` for every channel.
pub fn compute_residuals(model: &Model, x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
    if x.len() != y.len() {
        return Err(SpecError::DimensionMismatch {
            context: "residual coordinates",
            expected: x.len(),
            found: y.len(),
        });
    }
    Ok(model.predict(x).iter().zip(y).map(|(fit, obs)| obs - fit).collect())
}

/// Navigation positions with the largest reduced chisq, worst first.
/// Positions without a finite reduced chisq are skipped.
pub fn rank_worst_fits(map: &FitMap, top_n: usize) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = map
        .reduced_chisq_map()
        .into_iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(top_n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Component;

    #[test]
    fn residuals_subtract_model() {
        let mut model = Model::new();
        model.append(Component::offset("bg", 2.0)).unwrap();
        let r = compute_residuals(&model, &[0.0, 1.0], &[3.0, 1.5]).unwrap();
        assert_eq!(r, vec![1.0, -0.5]);
        assert!(compute_residuals(&model, &[0.0], &[1.0, 2.0]).is_err());
    }
}

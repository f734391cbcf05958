//! SVD-based linear algebra helpers.
//!
//! We repeatedly solve small problems of the form:
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2
//! ```
//!
//! (polynomial estimates, peak refinement) and need the Moore–Penrose inverse of
//! `JᵀJ` for parameter covariances. Column counts are tiny, so SVD is cheap and
//! robust even when the design matrix is tall or nearly rank deficient.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() != y.len() || x.ncols() == 0 {
        return None;
    }
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Ratio of the smallest to the largest singular value of `m`.
///
/// Returns 0 for an all-zero matrix and NaN if `m` has non-finite entries.
pub fn inverse_condition(m: &DMatrix<f64>) -> f64 {
    if m.iter().any(|v| !v.is_finite()) {
        return f64::NAN;
    }
    let sv = m.singular_values();
    let max = sv.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return 0.0;
    }
    // A tall-skinny matrix has ncols singular values; a wide one is rank
    // deficient by construction.
    if m.nrows() < m.ncols() {
        return 0.0;
    }
    let min = sv.iter().copied().fold(f64::INFINITY, f64::min);
    min / max
}

/// Moore–Penrose pseudo-inverse of a symmetric matrix.
pub fn pseudo_inverse(m: &DMatrix<f64>, rcond: f64) -> Option<DMatrix<f64>> {
    let svd = m.clone().svd(true, true);
    let max = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    if !(max > 0.0) {
        return None;
    }
    svd.pseudo_inverse(rcond * max).ok()
}

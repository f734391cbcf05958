//! Bounded Levenberg–Marquardt least squares.
//!
//! Given:
//! - a prediction function `f(p)` over the free parameters `p`
//! - observations `y_i` and optional weights `w_i`
//! - per-parameter bounds `[lo_j, hi_j]`
//!
//! we minimise
//!
//! ```text
//! chisq(p) = Σ w_i (y_i - f_i(p))²
//! ```
//!
//! with damped Gauss–Newton steps `(ĴᵀĴ + μI) z = Ĵᵀr`, clamped into the
//! bounds. `Ĵ = J · diag(s)` with `s_j = max(|p_j|, 1)` and the step is
//! `h = s ⊙ z`; the conditioning test runs on `Ĵ` as well. The damping
//! follows the Nielsen gain-ratio schedule. Parameters
//! pinned at a bound whose gradient points outward are held fixed for the
//! step so the remaining ones solve the conditional problem.
//!
//! Non-convergence is data, not an error: the outcome carries a
//! [`Termination`] and the last iterate whose Jacobian was well conditioned.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::FailureReason;
use crate::error::{Result, SpecError};
use crate::math::{inverse_condition, pseudo_inverse};

/// Relative finite-difference step for the Jacobian.
const DIFF_STEP: f64 = 1.4901161193847656e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Initial damping, relative to the largest diagonal entry of `JᵀJ`.
    pub initial_damping: f64,
    /// Damping (same scale) past which a fit that cannot improve stops.
    pub max_damping: f64,
    /// Smallest acceptable `σ_min / σ_max` of the weighted Jacobian.
    pub rcond: f64,
    pub compute_covariance: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_damping: 1e-3,
            max_damping: 1e16,
            rcond: 1e-10,
            compute_covariance: true,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(SpecError::InvalidConfig("max_iterations must be at least 1".to_string()));
        }
        for (name, value) in [
            ("ftol", self.ftol),
            ("xtol", self.xtol),
            ("gtol", self.gtol),
            ("rcond", self.rcond),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SpecError::InvalidConfig(format!("{name} must be finite and >= 0, got {value}")));
            }
        }
        if !self.initial_damping.is_finite() || self.initial_damping <= 0.0 {
            return Err(SpecError::InvalidConfig(format!(
                "initial_damping must be > 0, got {}",
                self.initial_damping
            )));
        }
        if !(self.max_damping > self.initial_damping) {
            return Err(SpecError::InvalidConfig(format!(
                "max_damping ({}) must exceed initial_damping ({})",
                self.max_damping, self.initial_damping
            )));
        }
        Ok(())
    }
}

/// Observations, weights and bounds for one least-squares problem.
#[derive(Debug, Clone, Copy)]
pub struct FitProblem<'a> {
    pub observed: &'a [f64],
    pub weights: Option<&'a [f64]>,
    pub bounds: &'a [(f64, f64)],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Relative reduction of chisq (actual and predicted) below `ftol`.
    Ftol,
    /// Every component of the step below `xtol` relative to the parameter.
    Xtol,
    /// Residual orthogonal to the Jacobian columns within `gtol`.
    Gtol,
    /// No step reduces chisq and the predicted reduction is negligible.
    Precision,
    ExactFit,
    MaxIterations,
    SingularJacobian,
    /// No step reduces chisq although the linear model predicts one should.
    Stalled,
}

impl Termination {
    pub fn converged(self) -> bool {
        matches!(
            self,
            Termination::Ftol
                | Termination::Xtol
                | Termination::Gtol
                | Termination::Precision
                | Termination::ExactFit
        )
    }

    pub fn failure(self) -> Option<FailureReason> {
        match self {
            Termination::MaxIterations => Some(FailureReason::MaxIterationsExceeded),
            Termination::SingularJacobian => Some(FailureReason::SingularJacobian),
            Termination::Stalled => Some(FailureReason::Stalled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    /// Best accepted parameters.
    pub params: Vec<f64>,
    /// Last iterate whose Jacobian was finite and well conditioned.
    pub last_valid_params: Vec<f64>,
    pub chisq: f64,
    /// Observations with non-zero weight.
    pub n_effective: usize,
    pub iterations: usize,
    pub termination: Termination,
    pub covariance: Option<DMatrix<f64>>,
    pub std_errors: Option<Vec<f64>>,
}

impl OptimizerOutcome {
    pub fn converged(&self) -> bool {
        self.termination.converged()
    }

    /// Values a caller should keep: the best estimate on convergence,
    /// otherwise the last well-conditioned iterate.
    pub fn retained_params(&self) -> &[f64] {
        if self.converged() {
            &self.params
        } else {
            &self.last_valid_params
        }
    }
}

struct Objective<'a, F> {
    predict: F,
    observed: &'a [f64],
    sqrt_weights: Vec<f64>,
}

impl<F> Objective<'_, F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    /// Weighted residuals `√w (y - f)`; `None` if any weighted entry is not finite.
    fn residuals(&self, p: &[f64]) -> Option<DVector<f64>> {
        let predicted = (self.predict)(p);
        self.residuals_of(&predicted)
    }

    fn residuals_of(&self, predicted: &[f64]) -> Option<DVector<f64>> {
        if predicted.len() != self.observed.len() {
            return None;
        }
        let mut r = DVector::zeros(self.observed.len());
        for (i, ((&y, &f), &sw)) in self.observed.iter().zip(predicted).zip(&self.sqrt_weights).enumerate() {
            if sw == 0.0 {
                continue;
            }
            let v = sw * (y - f);
            if !v.is_finite() {
                return None;
            }
            r[i] = v;
        }
        Some(r)
    }

    /// Forward-difference Jacobian of the weighted model, stepping away from
    /// an upper bound.
    fn jacobian(&self, p: &[f64], r: &DVector<f64>, bounds: &[(f64, f64)]) -> Option<DMatrix<f64>> {
        let n = self.observed.len();
        let mut jac = DMatrix::zeros(n, p.len());
        let mut shifted = p.to_vec();
        for j in 0..p.len() {
            let mut h = DIFF_STEP * p[j].abs().max(1.0);
            if p[j] + h > bounds[j].1 {
                h = -h;
            }
            shifted[j] = p[j] + h;
            let r2 = self.residuals(&shifted)?;
            shifted[j] = p[j];
            // r = √w (y - f), so ∂(√w f)/∂p = (r - r2) / h.
            let column = (r - r2) / h;
            jac.set_column(j, &column);
        }
        Some(jac)
    }
}

fn sqrt_weights(observed: &[f64], weights: Option<&[f64]>) -> Result<Vec<f64>> {
    match weights {
        None => Ok(observed.iter().map(|y| if y.is_finite() { 1.0 } else { 0.0 }).collect()),
        Some(w) => {
            if w.len() != observed.len() {
                return Err(SpecError::DimensionMismatch {
                    context: "fit weights",
                    expected: observed.len(),
                    found: w.len(),
                });
            }
            w.iter()
                .zip(observed)
                .enumerate()
                .map(|(i, (&w, &y))| {
                    if !w.is_finite() || w < 0.0 {
                        Err(SpecError::InvalidConfig(format!("weight {i} is {w}")))
                    } else if y.is_finite() {
                        Ok(w.sqrt())
                    } else {
                        Ok(0.0)
                    }
                })
                .collect()
        }
    }
}

/// Per-parameter unit for the scaled problem: `max(|p_j|, 1)`.
///
/// Columns of `J · diag(scale)` are the effect of a relative change of each
/// parameter. The scale depends on `p` only, never on the data.
fn parameter_scale(p: &[f64]) -> Vec<f64> {
    p.iter().map(|v| v.abs().max(1.0)).collect()
}

fn scale_columns(jac: &DMatrix<f64>, scale: &[f64]) -> DMatrix<f64> {
    let mut scaled = jac.clone();
    for (j, &s) in scale.iter().enumerate() {
        scaled.column_mut(j).scale_mut(s);
    }
    scaled
}

fn clamp_into(p: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    p.iter().zip(bounds).map(|(&v, &(lo, hi))| v.max(lo).min(hi)).collect()
}

/// Parameters sitting on a bound with the descent direction pointing out.
fn pinned(x: &[f64], g: &DVector<f64>, bounds: &[(f64, f64)]) -> Vec<bool> {
    x.iter()
        .zip(bounds)
        .enumerate()
        .map(|(j, (&v, &(lo, hi)))| (v <= lo && g[j] < 0.0) || (v >= hi && g[j] > 0.0))
        .collect()
}

/// Largest cosine between the residual and a free Jacobian column.
fn gradient_cosine(a: &DMatrix<f64>, g: &DVector<f64>, pinned: &[bool], chisq: f64) -> f64 {
    let rnorm = chisq.sqrt();
    (0..g.len())
        .filter(|&j| !pinned[j] && a[(j, j)] > 0.0)
        .map(|j| g[j].abs() / (a[(j, j)].sqrt() * rnorm))
        .fold(0.0, f64::max)
}

fn solve_damped(
    a: &DMatrix<f64>,
    g: &DVector<f64>,
    mu: f64,
    pinned: &[bool],
) -> Option<DVector<f64>> {
    let mut lhs = a.clone();
    let mut rhs = g.clone();
    for j in 0..g.len() {
        if pinned[j] {
            lhs.row_mut(j).fill(0.0);
            lhs.column_mut(j).fill(0.0);
            lhs[(j, j)] = 1.0;
            rhs[j] = 0.0;
        } else {
            lhs[(j, j)] += mu;
        }
    }
    let h = lhs.cholesky()?.solve(&rhs);
    h.iter().all(|v| v.is_finite()).then_some(h)
}

/// Minimise the weighted sum of squared residuals of `predict` starting from
/// `initial`.
pub fn levenberg_marquardt<F>(
    predict: F,
    initial: &[f64],
    problem: &FitProblem<'_>,
    config: &OptimizerConfig,
) -> Result<OptimizerOutcome>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    config.validate()?;
    let m = initial.len();
    let bounds = problem.bounds;
    if bounds.len() != m {
        return Err(SpecError::DimensionMismatch {
            context: "parameter bounds",
            expected: m,
            found: bounds.len(),
        });
    }
    if let Some((index, &value)) = initial.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(SpecError::InvalidInitialGuess { index, value });
    }

    let objective = Objective {
        predict,
        observed: problem.observed,
        sqrt_weights: sqrt_weights(problem.observed, problem.weights)?,
    };
    let n_effective = objective.sqrt_weights.iter().filter(|&&w| w > 0.0).count();

    let mut x = clamp_into(initial, bounds);
    let clamped = x.iter().zip(initial).filter(|(a, b)| a != b).count();
    if clamped > 0 {
        warn!("initial guess clamped into bounds for {clamped} parameter(s)");
    }

    let probe = (objective.predict)(&x);
    if probe.len() != problem.observed.len() {
        return Err(SpecError::DimensionMismatch {
            context: "model prediction",
            expected: problem.observed.len(),
            found: probe.len(),
        });
    }

    let outcome = |params: Vec<f64>,
                   last_valid: Vec<f64>,
                   chisq: f64,
                   iterations: usize,
                   termination: Termination| {
        debug!(
            "levenberg-marquardt stopped after {iterations} iteration(s): {termination:?}, chisq = {chisq:.6e}"
        );
        OptimizerOutcome {
            params,
            last_valid_params: last_valid,
            chisq,
            n_effective,
            iterations,
            termination,
            covariance: None,
            std_errors: None,
        }
    };

    let Some(mut r) = objective.residuals_of(&probe) else {
        return Ok(outcome(x.clone(), x, f64::NAN, 0, Termination::SingularJacobian));
    };
    let mut chisq = r.norm_squared();

    if m == 0 {
        let termination = if chisq == 0.0 { Termination::ExactFit } else { Termination::Gtol };
        return Ok(outcome(Vec::new(), Vec::new(), chisq, 0, termination));
    }

    let mut last_valid = x.clone();
    let mut damping: Option<f64> = None;
    let mut nu = 2.0;
    let mut iterations = 0;

    let termination = 'outer: loop {
        if iterations == config.max_iterations {
            break Termination::MaxIterations;
        }
        iterations += 1;

        let Some(jac) = objective.jacobian(&x, &r, bounds) else {
            break Termination::SingularJacobian;
        };
        let scale = parameter_scale(&x);
        let jac = scale_columns(&jac, &scale);
        // NaN (non-finite Jacobian) fails this comparison too.
        if !(inverse_condition(&jac) >= config.rcond) {
            break Termination::SingularJacobian;
        }
        last_valid.clone_from(&x);
        if chisq == 0.0 {
            break Termination::ExactFit;
        }

        // Normal equations of the scaled problem; steps come back through `scale`.
        let jt = jac.transpose();
        let a = &jt * &jac;
        let g = &jt * &r;
        let pinned = pinned(&x, &g, bounds);
        if gradient_cosine(&a, &g, &pinned, chisq) <= config.gtol {
            break Termination::Gtol;
        }

        let diag_max = a.diagonal().max();
        let mu = damping.get_or_insert(config.initial_damping * diag_max);
        let mu_limit = config.max_damping * diag_max;

        loop {
            let mut predicted = f64::INFINITY;
            if let Some(z) = solve_damped(&a, &g, *mu, &pinned) {
                let trial: Vec<f64> = x
                    .iter()
                    .zip(z.iter().zip(&scale))
                    .map(|(xi, (zi, si))| xi + zi * si)
                    .collect();
                let trial = clamp_into(&trial, bounds);
                let step: Vec<f64> = trial.iter().zip(&x).map(|(t, xi)| t - xi).collect();

                if step
                    .iter()
                    .zip(&x)
                    .all(|(s, xi)| s.abs() <= config.xtol * (xi.abs() + config.xtol))
                {
                    break 'outer Termination::Xtol;
                }

                let step = DVector::from_iterator(m, step.iter().zip(&scale).map(|(s, si)| s / si));
                predicted = 2.0 * step.dot(&g) - (&a * &step).dot(&step);
                if predicted > 0.0 {
                    if let Some(trial_r) = objective.residuals(&trial) {
                        let trial_chisq = trial_r.norm_squared();
                        if trial_chisq < chisq {
                            let actual = chisq - trial_chisq;
                            let rho = actual / predicted;
                            let small = actual <= config.ftol * chisq && predicted <= config.ftol * chisq;
                            x = trial;
                            r = trial_r;
                            chisq = trial_chisq;
                            *mu *= (1.0_f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
                            nu = 2.0;
                            if small {
                                break 'outer Termination::Ftol;
                            }
                            break;
                        }
                    }
                }
            }

            *mu *= nu;
            nu *= 2.0;
            if *mu > mu_limit {
                break 'outer if predicted.abs() <= config.ftol * chisq {
                    Termination::Precision
                } else {
                    Termination::Stalled
                };
            }
        }
    };

    let mut result = outcome(x, last_valid, chisq, iterations, termination);
    if termination.converged() && config.compute_covariance && n_effective > m {
        attach_covariance(&objective, &mut result, bounds, config.rcond);
    }
    Ok(result)
}

/// Parameter covariance `(JᵀJ)⁺ · chisq / (n - m)` at the best estimate.
///
/// The pseudo-inverse is taken in scaled units so `rcond` does not truncate
/// parameters that merely have large or small magnitudes.
fn attach_covariance<F>(
    objective: &Objective<'_, F>,
    result: &mut OptimizerOutcome,
    bounds: &[(f64, f64)],
    rcond: f64,
) where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let m = result.params.len();
    let Some(r) = objective.residuals(&result.params) else {
        return;
    };
    let Some(jac) = objective.jacobian(&result.params, &r, bounds) else {
        return;
    };
    let scale = parameter_scale(&result.params);
    let jac = scale_columns(&jac, &scale);
    let a = jac.transpose() * &jac;
    let Some(inv) = pseudo_inverse(&a, rcond) else {
        return;
    };
    let factor = result.chisq / (result.n_effective - m) as f64;
    let cov = DMatrix::from_fn(m, m, |i, j| inv[(i, j)] * scale[i] * scale[j] * factor);
    let std = (0..m).map(|j| cov[(j, j)].max(0.0).sqrt()).collect();
    result.std_errors = Some(std);
    result.covariance = Some(cov);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn unbounded(m: usize) -> Vec<(f64, f64)> {
        vec![(f64::NEG_INFINITY, f64::INFINITY); m]
    }

    fn xs(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * step).collect()
    }

    #[test]
    fn recovers_straight_line() {
        let x = xs(10, 1.0);
        let y: Vec<f64> = x.iter().map(|&x| 2.0 + 3.0 * x).collect();
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] + p[1] * x).collect::<Vec<_>>();
        let out = levenberg_marquardt(predict, &[0.0, 0.0], &problem, &OptimizerConfig::default()).unwrap();
        assert!(out.converged(), "{:?}", out.termination);
        assert!((out.params[0] - 2.0).abs() < 1e-7);
        assert!((out.params[1] - 3.0).abs() < 1e-7);
    }

    #[test]
    fn recovers_exponential_decay() {
        let x = xs(50, 0.1);
        let y: Vec<f64> = x.iter().map(|&x| 5.0 * (-0.7 * x).exp()).collect();
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] * (-p[1] * x).exp()).collect::<Vec<_>>();
        let out = levenberg_marquardt(predict, &[1.0, 0.2], &problem, &OptimizerConfig::default()).unwrap();
        assert!(out.converged(), "{:?}", out.termination);
        assert!((out.params[0] - 5.0).abs() < 1e-6);
        assert!((out.params[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn exact_start_reports_exact_fit() {
        let x = xs(10, 1.0);
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] + p[1] * x).collect::<Vec<_>>();
        let y = predict(&[1.5, -0.5]);
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let out = levenberg_marquardt(predict, &[1.5, -0.5], &problem, &OptimizerConfig::default()).unwrap();
        assert_eq!(out.termination, Termination::ExactFit);
        assert_eq!(out.chisq, 0.0);
    }

    #[test]
    fn upper_bound_holds_and_others_solve_conditionally() {
        let x = xs(10, 1.0);
        let y: Vec<f64> = x.iter().map(|&x| 2.0 + 3.0 * x).collect();
        let bounds = vec![(f64::NEG_INFINITY, f64::INFINITY), (0.0, 2.0)];
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] + p[1] * x).collect::<Vec<_>>();
        let out = levenberg_marquardt(predict, &[0.0, 1.0], &problem, &OptimizerConfig::default()).unwrap();
        assert!(out.converged(), "{:?}", out.termination);
        assert_eq!(out.params[1], 2.0);
        // Best intercept with the slope pinned at 2 is mean(y - 2x) = 6.5.
        assert!((out.params[0] - 6.5).abs() < 1e-4);
    }

    #[test]
    fn out_of_bounds_start_is_clamped() {
        let x = xs(10, 1.0);
        let y: Vec<f64> = x.iter().map(|&x| 2.0 + 3.0 * x).collect();
        let bounds = vec![(0.0, 10.0), (0.0, 10.0)];
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] + p[1] * x).collect::<Vec<_>>();
        let out = levenberg_marquardt(predict, &[-5.0, 50.0], &problem, &OptimizerConfig::default()).unwrap();
        assert!(out.converged());
        assert!((out.params[0] - 2.0).abs() < 1e-6);
        assert!((out.params[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn power_law_at_spectrometer_magnitudes_converges() {
        // ∂f/∂A is ~1e-8 and ∂f/∂r ~1e4 here; only the scaled problem is well conditioned.
        let x: Vec<f64> = (300..=400).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|&x| 2.7e11 * x.powf(-3.0)).collect();
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] * x.powf(-p[1])).collect::<Vec<_>>();
        let config = OptimizerConfig::default();
        let out = levenberg_marquardt(predict, &[2e11, 2.9], &problem, &config).unwrap();
        assert!(out.converged(), "{:?} after {} iterations", out.termination, out.iterations);
        assert!((out.params[0] / 2.7e11 - 1.0).abs() < 1e-3, "A = {}", out.params[0]);
        assert!((out.params[1] - 3.0).abs() < 1e-4, "r = {}", out.params[1]);
    }

    #[test]
    fn large_amplitudes_keep_their_std_errors() {
        let x: Vec<f64> = (300..=400).map(f64::from).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let noise = Normal::new(0.0, 20.0).unwrap();
        let y: Vec<f64> = x
            .iter()
            .map(|&x| 2.7e11 * x.powf(-3.0) + noise.sample(&mut rng))
            .collect();
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] * x.powf(-p[1])).collect::<Vec<_>>();
        let config = OptimizerConfig::default();
        let out = levenberg_marquardt(predict, &[2.7e11, 3.0], &problem, &config).unwrap();
        assert!(out.converged(), "{:?}", out.termination);
        let std = out.std_errors.as_ref().unwrap();
        assert!(std[0] > 0.0 && std[0] < 0.5 * out.params[0], "std(A) = {}", std[0]);
        assert!(std[1] > 0.0 && std[1] < 0.5, "std(r) = {}", std[1]);
    }

    #[test]
    fn redundant_parameters_are_singular() {
        let x = xs(10, 1.0);
        let y: Vec<f64> = x.iter().map(|&x| 6.0 * x).collect();
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        // Both columns come out bit-identical from the same sum.
        let predict = |p: &[f64]| x.iter().map(|&x| (p[0] + p[1]) * x).collect::<Vec<_>>();
        let out = levenberg_marquardt(predict, &[1.0, 1.0], &problem, &OptimizerConfig::default()).unwrap();
        assert_eq!(out.termination, Termination::SingularJacobian);
        assert_eq!(out.termination.failure(), Some(FailureReason::SingularJacobian));
        assert_eq!(out.last_valid_params, vec![1.0, 1.0]);
        assert_eq!(out.retained_params(), &[1.0, 1.0]);
    }

    #[test]
    fn parameter_without_effect_is_singular() {
        let y = vec![1.0; 5];
        let bounds = unbounded(1);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let config = OptimizerConfig::default();
        let out = levenberg_marquardt(|_: &[f64]| vec![0.0; 5], &[3.0], &problem, &config).unwrap();
        assert_eq!(out.termination, Termination::SingularJacobian);
        assert_eq!(out.iterations, 1);
    }

    #[test]
    fn iteration_limit_is_a_failure() {
        let x = xs(50, 0.1);
        let y: Vec<f64> = x.iter().map(|&x| 5.0 * (-0.7 * x).exp()).collect();
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let config = OptimizerConfig {
            max_iterations: 1,
            ..OptimizerConfig::default()
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] * (-p[1] * x).exp()).collect::<Vec<_>>();
        let out = levenberg_marquardt(predict, &[0.5, 3.0], &problem, &config).unwrap();
        assert_eq!(out.termination, Termination::MaxIterations);
        assert_eq!(out.termination.failure(), Some(FailureReason::MaxIterationsExceeded));
        assert!(out.params.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_bad_inputs() {
        let y = vec![1.0; 4];
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| vec![p[0]; 4];
        let cfg = OptimizerConfig::default();

        assert!(matches!(
            levenberg_marquardt(predict, &[f64::NAN, 1.0], &problem, &cfg),
            Err(SpecError::InvalidInitialGuess { index: 0, .. })
        ));
        assert!(matches!(
            levenberg_marquardt(predict, &[1.0], &problem, &cfg),
            Err(SpecError::DimensionMismatch { context: "parameter bounds", .. })
        ));
        assert!(matches!(
            levenberg_marquardt(|_: &[f64]| vec![0.0; 3], &[1.0, 1.0], &problem, &cfg),
            Err(SpecError::DimensionMismatch { context: "model prediction", .. })
        ));

        let w = vec![1.0, -1.0, 1.0, 1.0];
        let weighted = FitProblem {
            weights: Some(&w),
            ..problem
        };
        assert!(matches!(
            levenberg_marquardt(predict, &[1.0, 1.0], &weighted, &cfg),
            Err(SpecError::InvalidConfig(_))
        ));

        let bad = OptimizerConfig {
            max_iterations: 0,
            ..OptimizerConfig::default()
        };
        assert!(levenberg_marquardt(predict, &[1.0, 1.0], &problem, &bad).is_err());
    }

    #[test]
    fn non_finite_observations_are_ignored() {
        let x = xs(10, 1.0);
        let mut y: Vec<f64> = x.iter().map(|&x| 2.0 + 3.0 * x).collect();
        y[4] = f64::NAN;
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] + p[1] * x).collect::<Vec<_>>();
        let out = levenberg_marquardt(predict, &[0.0, 0.0], &problem, &OptimizerConfig::default()).unwrap();
        assert!(out.converged());
        assert_eq!(out.n_effective, 9);
        assert!((out.params[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn covariance_matches_linear_regression() {
        let x = xs(40, 0.25);
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 0.3).unwrap();
        let y: Vec<f64> = x.iter().map(|&x| 1.0 + 0.5 * x + noise.sample(&mut rng)).collect();
        let bounds = unbounded(2);
        let problem = FitProblem {
            observed: &y,
            weights: None,
            bounds: &bounds,
        };
        let predict = |p: &[f64]| x.iter().map(|&x| p[0] + p[1] * x).collect::<Vec<_>>();
        let out = levenberg_marquardt(predict, &[0.0, 0.0], &problem, &OptimizerConfig::default()).unwrap();
        assert!(out.converged());

        let design = DMatrix::from_fn(x.len(), 2, |i, j| if j == 0 { 1.0 } else { x[i] });
        let xtx_inv = (design.transpose() * &design).try_inverse().unwrap();
        let s2 = out.chisq / (x.len() - 2) as f64;
        let std = out.std_errors.as_ref().unwrap();
        for j in 0..2 {
            let expected = (xtx_inv[(j, j)] * s2).sqrt();
            assert!((std[j] - expected).abs() / expected < 1e-4, "{} vs {}", std[j], expected);
        }
        let cov = out.covariance.as_ref().unwrap();
        assert!((cov[(0, 1)] - cov[(1, 0)]).abs() < 1e-12);
    }

    #[test]
    fn termination_classification() {
        for t in [
            Termination::Ftol,
            Termination::Xtol,
            Termination::Gtol,
            Termination::Precision,
            Termination::ExactFit,
        ] {
            assert!(t.converged());
            assert!(t.failure().is_none());
        }
        for t in [Termination::MaxIterations, Termination::SingularJacobian, Termination::Stalled] {
            assert!(!t.converged());
            assert!(t.failure().is_some());
        }
    }
}

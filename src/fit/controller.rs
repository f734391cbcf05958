//! Per-position fitting across a dataset.
//!
//! Given:
//! - a signal with one signal axis and any number of navigation axes
//! - a model whose free vector defines what is fitted
//! - a visiting order and a start mode
//!
//! we fit every navigation position in order and return a `FitMap` with one
//! `FitState` per position. Positions never share state; only the initial
//! guess is carried forward when hot-starting.
//!
//! The model is never mutated while an optimizer run is in flight: each run
//! evaluates through a `FitSnapshot`, and results are committed afterwards.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::ParameterRef;
use crate::domain::{FailureReason, FitState, FitStatus, IterationPath, StartMode, WeightMode};
use crate::error::{Result, SpecError};
use crate::fit::iteration::visit_order;
use crate::fit::optimizer::{FitProblem, OptimizerConfig, OptimizerOutcome, levenberg_marquardt};
use crate::model::{FitSnapshot, Model};
use crate::signal::Signal;

/// Options for `FitController`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiFitOptions {
    pub path: IterationPath,
    pub start_mode: StartMode,
    pub weights: WeightMode,
    /// Calibrated signal-axis interval the objective is restricted to.
    pub signal_range: Option<(f64, f64)>,
    /// Fit positions concurrently. Only honoured with `StartMode::Reset`.
    pub parallel: bool,
    pub optimizer: OptimizerConfig,
}

impl MultiFitOptions {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(s)?;
        options.optimizer.validate()?;
        Ok(options)
    }
}

/// Fit one spectrum and commit the result to `model`.
///
/// On convergence the model holds the best estimate; on failure it holds the
/// last well-conditioned iterate. A non-finite starting value is an error.
pub fn fit_spectrum(
    model: &mut Model,
    x: &[f64],
    y: &[f64],
    weights: Option<&[f64]>,
    config: &OptimizerConfig,
) -> Result<FitState> {
    let state = {
        let snapshot = model.snapshot();
        let initial = snapshot.initial_vector();
        solve(&snapshot, x, y, weights, &initial, config)?
    };
    commit(model, &state)?;
    Ok(state)
}

fn solve(
    snapshot: &FitSnapshot<'_>,
    x: &[f64],
    y: &[f64],
    weights: Option<&[f64]>,
    initial: &[f64],
    config: &OptimizerConfig,
) -> Result<FitState> {
    if x.len() != y.len() {
        return Err(SpecError::DimensionMismatch {
            context: "fit coordinates",
            expected: x.len(),
            found: y.len(),
        });
    }
    let bounds = snapshot.bounds();
    let problem = FitProblem {
        observed: y,
        weights,
        bounds: &bounds,
    };
    let outcome = levenberg_marquardt(|p: &[f64]| snapshot.predict(x, p), initial, &problem, config)?;

    let mut state = FitState::fitting(initial.to_vec());
    finish_state(&mut state, &outcome);
    if !outcome.converged() {
        // Report the misfit of the values actually retained.
        let retained = snapshot.predict(x, &state.parameter_values);
        state.chisq = weighted_chisq(y, &retained, weights);
    }
    Ok(state)
}

fn finish_state(state: &mut FitState, outcome: &OptimizerOutcome) {
    let converged = outcome.converged();
    state.status = if converged { FitStatus::Converged } else { FitStatus::Failed };
    state.failure = outcome.termination.failure();
    state.parameter_values = outcome.retained_params().to_vec();
    state.chisq = outcome.chisq;
    state.degrees_of_freedom = outcome.n_effective.saturating_sub(outcome.params.len());
    state.iterations = outcome.iterations;
    state.std_errors = outcome.std_errors.clone();
    state.covariance = outcome.covariance.as_ref().map(|c| {
        c.row_iter().map(|row| row.iter().copied().collect()).collect()
    });
}

fn weighted_chisq(y: &[f64], predicted: &[f64], weights: Option<&[f64]>) -> f64 {
    y.iter()
        .zip(predicted)
        .enumerate()
        .filter(|(_, (yi, _))| yi.is_finite())
        .map(|(i, (yi, fi))| weights.map_or(1.0, |w| w[i]) * (yi - fi).powi(2))
        .sum()
}

fn commit(model: &mut Model, state: &FitState) -> Result<()> {
    model.apply_parameter_vector(&state.parameter_values)?;
    if let Some(std) = &state.std_errors {
        model.apply_std_errors(std)?;
    }
    Ok(())
}

fn invalid_guess(initial: Vec<f64>) -> FitState {
    let mut state = FitState::fitting(initial);
    state.status = FitStatus::Failed;
    state.failure = Some(FailureReason::InvalidInitialGuess);
    state
}

/// Drives fits of one model over the navigation positions of a signal.
#[derive(Debug, Clone)]
pub struct FitController<'s> {
    signal: &'s Signal,
    options: MultiFitOptions,
    x: Vec<f64>,
    first_channel: usize,
}

impl<'s> FitController<'s> {
    pub fn new(signal: &'s Signal, options: MultiFitOptions) -> Result<Self> {
        options.optimizer.validate()?;
        let axis = signal.signal_axis()?;
        let (first_channel, last_channel) = match options.signal_range {
            Some((lo, hi)) => axis.slice_from_values(lo, hi),
            None => (0, axis.size - 1),
        };
        if let WeightMode::Variance(v) = &options.weights {
            if v.len() != axis.size {
                return Err(SpecError::DimensionMismatch {
                    context: "variance weights",
                    expected: axis.size,
                    found: v.len(),
                });
            }
            if let Some(bad) = v.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
                return Err(SpecError::InvalidConfig(format!("variance must be finite and > 0, got {bad}")));
            }
        }
        let x = (first_channel..=last_channel)
            .map(|i| axis.value_at_unchecked(i as f64))
            .collect();
        Ok(Self {
            signal,
            options,
            x,
            first_channel,
        })
    }

    pub fn options(&self) -> &MultiFitOptions {
        &self.options
    }

    /// Signal-axis coordinates inside the fit range.
    pub fn coordinates(&self) -> &[f64] {
        &self.x
    }

    pub fn navigation_size(&self) -> usize {
        self.signal.axes_manager().navigation_size()
    }

    /// Observed values and weights at `nav`, restricted to the fit range.
    pub fn observed(&self, nav: usize) -> Result<(Vec<f64>, Option<Vec<f64>>)> {
        let spectrum = self.signal.spectrum_at(nav)?;
        let range = self.first_channel..self.first_channel + self.x.len();
        let y = spectrum[range.clone()].to_vec();
        let weights = match &self.options.weights {
            WeightMode::Uniform => None,
            WeightMode::Poisson => Some(y.iter().map(|v| 1.0 / v.max(1.0)).collect()),
            WeightMode::Variance(v) => Some(v[range].iter().map(|v| 1.0 / v).collect()),
        };
        Ok((y, weights))
    }

    /// Fit navigation position `nav` from the model's current values and
    /// commit the result.
    pub fn fit_at(&self, model: &mut Model, nav: usize) -> Result<FitState> {
        let (y, w) = self.observed(nav)?;
        fit_spectrum(model, &self.x, &y, w.as_deref(), &self.options.optimizer)
    }

    /// Fit every navigation position in the configured order.
    ///
    /// Failures are recorded and iteration continues. Afterwards the model
    /// holds the values retained at the last visited position.
    pub fn multifit(&self, model: &mut Model) -> Result<FitMap> {
        let nav_shape = self.signal.axes_manager().navigation_shape();
        let order = visit_order(&self.options.path, &nav_shape)?;
        let defaults = model.free_parameter_vector();
        let mut states: Vec<Option<FitState>> = vec![None; self.navigation_size()];

        match (self.options.start_mode, self.options.parallel) {
            (StartMode::Reset, true) => {
                let snapshot = model.snapshot();
                let results: Vec<(usize, Result<FitState>)> = order
                    .par_iter()
                    .map(|&nav| (nav, self.fit_position(&snapshot, nav, &defaults)))
                    .collect();
                for (nav, result) in results {
                    states[nav] = Some(result?);
                }
            }
            (start_mode, parallel) => {
                if parallel {
                    warn!("parallel multifit requires reset start mode; running sequentially");
                }
                let mut previous: Option<Vec<f64>> = None;
                for &nav in &order {
                    let initial = match (start_mode, previous.take()) {
                        (StartMode::HotStart, Some(p)) if p.iter().all(|v| v.is_finite()) => p,
                        (StartMode::HotStart, Some(_)) => {
                            debug!("position {nav}: previous values are not finite, starting from defaults");
                            defaults.clone()
                        }
                        _ => defaults.clone(),
                    };
                    let state = {
                        let snapshot = model.snapshot();
                        self.fit_position(&snapshot, nav, &initial)?
                    };
                    previous = Some(state.parameter_values.clone());
                    states[nav] = Some(state);
                }
            }
        }

        let map = FitMap {
            navigation_shape: nav_shape,
            parameters: model.free_parameters(),
            order,
            states,
        };
        if let Some(state) = map.order.last().and_then(|&nav| map.states[nav].as_ref()) {
            commit(model, state)?;
        }

        let failed = map.failed_indices().len();
        info!(
            "multifit finished: {} of {} positions converged",
            map.converged_count(),
            map.order.len()
        );
        if failed > 0 {
            warn!("{failed} position(s) failed to converge");
        }
        Ok(map)
    }

    fn fit_position(&self, snapshot: &FitSnapshot<'_>, nav: usize, initial: &[f64]) -> Result<FitState> {
        let (y, w) = self.observed(nav)?;
        match solve(snapshot, &self.x, &y, w.as_deref(), initial, &self.options.optimizer) {
            Ok(state) => {
                if let Some(reason) = state.failure {
                    info!("position {nav}: fit failed ({})", reason.display_name());
                }
                Ok(state)
            }
            Err(SpecError::InvalidInitialGuess { index, value }) => {
                info!("position {nav}: initial guess has parameter {index} = {value}");
                Ok(invalid_guess(initial.to_vec()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Per-position fit records from a multifit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitMap {
    navigation_shape: Vec<usize>,
    parameters: Vec<ParameterRef>,
    order: Vec<usize>,
    states: Vec<Option<FitState>>,
}

impl FitMap {
    pub fn navigation_shape(&self) -> &[usize] {
        &self.navigation_shape
    }

    /// Free parameters, in the order of every state's vectors.
    pub fn parameters(&self) -> &[ParameterRef] {
        &self.parameters
    }

    /// Flat navigation indices in the order they were visited.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn states(&self) -> &[Option<FitState>] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, nav: usize) -> Result<Option<&FitState>> {
        self.states
            .get(nav)
            .map(Option::as_ref)
            .ok_or(SpecError::IndexOutOfRange {
                axis: "<navigation>".to_string(),
                index: nav,
                size: self.states.len(),
            })
    }

    pub fn status(&self, nav: usize) -> Result<FitStatus> {
        Ok(self.state(nav)?.map_or(FitStatus::NotFit, |s| s.status))
    }

    /// One status per navigation position, in flat order.
    pub fn convergence_map(&self) -> Vec<FitStatus> {
        self.states
            .iter()
            .map(|s| s.as_ref().map_or(FitStatus::NotFit, |s| s.status))
            .collect()
    }

    /// Retained values of one parameter over the navigation space (NaN where
    /// a position was not fitted).
    pub fn parameter_map(&self, parameter: &ParameterRef) -> Result<Vec<f64>> {
        let j = self.parameter_position(parameter)?;
        Ok(self
            .states
            .iter()
            .map(|s| s.as_ref().and_then(|s| s.parameter_values.get(j).copied()).unwrap_or(f64::NAN))
            .collect())
    }

    /// Standard errors of one parameter (NaN where unavailable).
    pub fn std_error_map(&self, parameter: &ParameterRef) -> Result<Vec<f64>> {
        let j = self.parameter_position(parameter)?;
        Ok(self
            .states
            .iter()
            .map(|s| {
                s.as_ref()
                    .and_then(|s| s.std_errors.as_ref())
                    .and_then(|std| std.get(j).copied())
                    .unwrap_or(f64::NAN)
            })
            .collect())
    }

    pub fn chisq_map(&self) -> Vec<f64> {
        self.states
            .iter()
            .map(|s| s.as_ref().map_or(f64::NAN, |s| s.chisq))
            .collect()
    }

    pub fn reduced_chisq_map(&self) -> Vec<f64> {
        self.states
            .iter()
            .map(|s| s.as_ref().map_or(f64::NAN, FitState::reduced_chisq))
            .collect()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.convergence_map()
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s == FitStatus::Failed)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn converged_count(&self) -> usize {
        self.states.iter().flatten().filter(|s| s.converged()).count()
    }

    /// Load the values retained at `nav` into `model`, e.g. before a manual
    /// re-fit of a failed position.
    pub fn restore(&self, model: &mut Model, nav: usize) -> Result<()> {
        let state = self
            .state(nav)?
            .ok_or_else(|| {
                SpecError::InvalidConfig(format!("navigation position {nav} has not been fitted"))
            })?;
        if model.free_parameters() != self.parameters {
            return Err(SpecError::InvalidConfig(
                "model free parameters differ from the ones this map was fitted with".to_string(),
            ));
        }
        commit(model, state)
    }

    fn parameter_position(&self, parameter: &ParameterRef) -> Result<usize> {
        self.parameters
            .iter()
            .position(|p| p == parameter)
            .ok_or_else(|| SpecError::UnknownParameter {
                component: parameter.component.clone(),
                parameter: parameter.parameter.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::AxisManager;
    use crate::components::Component;
    use crate::metadata::DictionaryTree;

    fn line_model() -> Model {
        let mut model = Model::new();
        model.append(Component::polynomial("line", 1)).unwrap();
        model
    }

    /// Three spectra of `a + b x` on x = 0..9.
    fn line_signal(coefficients: &[(f64, f64)]) -> Signal {
        let n = 10;
        let data: Vec<f64> = coefficients
            .iter()
            .flat_map(|&(a, b)| (0..n).map(move |i| a + b * i as f64))
            .collect();
        let axes = AxisManager::from_shape(&[coefficients.len(), n], 1).unwrap();
        Signal::new(data, axes, DictionaryTree::new()).unwrap()
    }

    #[test]
    fn fit_spectrum_commits_result() {
        let mut model = line_model();
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 1.0 + 2.0 * x).collect();
        let state = fit_spectrum(&mut model, &x, &y, None, &OptimizerConfig::default()).unwrap();
        assert!(state.converged());
        assert_eq!(state.initial_values, vec![0.0, 0.0]);
        let values = model.free_parameter_vector();
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[1] - 2.0).abs() < 1e-6);
        assert_eq!(state.degrees_of_freedom, 8);
    }

    #[test]
    fn fit_spectrum_rejects_nan_start() {
        let mut model = line_model();
        model.component_mut("line").unwrap().parameters_mut()[0].value = f64::NAN;
        let x = vec![0.0, 1.0, 2.0];
        let err = fit_spectrum(&mut model, &x, &x, None, &OptimizerConfig::default()).unwrap_err();
        assert!(matches!(err, SpecError::InvalidInitialGuess { index: 0, .. }));
    }

    #[test]
    fn multifit_visits_every_position() {
        let signal = line_signal(&[(1.0, 2.0), (2.0, 1.0), (0.0, -1.0)]);
        let controller = FitController::new(&signal, MultiFitOptions::default()).unwrap();
        let mut model = line_model();
        let map = controller.multifit(&mut model).unwrap();

        assert_eq!(map.convergence_map(), vec![FitStatus::Converged; 3]);
        let slope = map.parameter_map(&ParameterRef::new("line", "coefficient_1")).unwrap();
        assert!((slope[0] - 2.0).abs() < 1e-6);
        assert!((slope[1] - 1.0).abs() < 1e-6);
        assert!((slope[2] + 1.0).abs() < 1e-6);
        // The model is left at the last visited position.
        assert!((model.free_parameter_vector()[1] + 1.0).abs() < 1e-6);
        assert!(map.failed_indices().is_empty());
    }

    #[test]
    fn hot_start_seeds_from_previous_position() {
        let signal = line_signal(&[(1.0, 2.0), (2.0, 1.0)]);
        let controller = FitController::new(&signal, MultiFitOptions::default()).unwrap();
        let mut model = line_model();
        let map = controller.multifit(&mut model).unwrap();
        let first = map.state(0).unwrap().unwrap();
        let second = map.state(1).unwrap().unwrap();
        assert_eq!(second.initial_values, first.parameter_values);
    }

    #[test]
    fn reset_mode_starts_from_defaults_in_parallel() {
        let signal = line_signal(&[(1.0, 2.0), (2.0, 1.0), (3.0, 0.5)]);
        let options = MultiFitOptions {
            start_mode: StartMode::Reset,
            parallel: true,
            ..MultiFitOptions::default()
        };
        let controller = FitController::new(&signal, options).unwrap();
        let mut model = line_model();
        let map = controller.multifit(&mut model).unwrap();
        for state in map.states().iter().flatten() {
            assert_eq!(state.initial_values, vec![0.0, 0.0]);
            assert!(state.converged());
        }
    }

    #[test]
    fn explicit_subset_leaves_other_positions_unfit() {
        let signal = line_signal(&[(1.0, 2.0), (2.0, 1.0), (3.0, 0.5)]);
        let options = MultiFitOptions {
            path: IterationPath::Explicit(vec![2]),
            ..MultiFitOptions::default()
        };
        let controller = FitController::new(&signal, options).unwrap();
        let mut model = line_model();
        let map = controller.multifit(&mut model).unwrap();
        assert_eq!(map.status(0).unwrap(), FitStatus::NotFit);
        assert_eq!(map.status(2).unwrap(), FitStatus::Converged);
        assert!(map.chisq_map()[0].is_nan());
        assert!(map.status(3).is_err());
    }

    #[test]
    fn signal_range_restricts_coordinates() {
        let signal = line_signal(&[(1.0, 2.0)]);
        let options = MultiFitOptions {
            signal_range: Some((6.0, 2.0)),
            ..MultiFitOptions::default()
        };
        let controller = FitController::new(&signal, options).unwrap();
        assert_eq!(controller.coordinates(), &[2.0, 3.0, 4.0, 5.0, 6.0]);
        let (y, w) = controller.observed(0).unwrap();
        assert_eq!(y, vec![5.0, 7.0, 9.0, 11.0, 13.0]);
        assert!(w.is_none());
    }

    #[test]
    fn weight_modes() {
        let signal = line_signal(&[(0.0, 1.0)]);
        let poisson = MultiFitOptions {
            weights: WeightMode::Poisson,
            ..MultiFitOptions::default()
        };
        let (_, w) = FitController::new(&signal, poisson).unwrap().observed(0).unwrap();
        let w = w.unwrap();
        assert_eq!(w[0], 1.0);
        assert_eq!(w[4], 0.25);

        let short = MultiFitOptions {
            weights: WeightMode::Variance(vec![1.0; 3]),
            ..MultiFitOptions::default()
        };
        assert!(FitController::new(&signal, short).is_err());

        let variance = MultiFitOptions {
            weights: WeightMode::Variance(vec![4.0; 10]),
            ..MultiFitOptions::default()
        };
        let (_, w) = FitController::new(&signal, variance).unwrap().observed(0).unwrap();
        assert_eq!(w.unwrap(), vec![0.25; 10]);
    }

    #[test]
    fn nan_start_is_recorded_not_raised() {
        let signal = line_signal(&[(1.0, 2.0), (2.0, 1.0)]);
        let options = MultiFitOptions {
            start_mode: StartMode::Reset,
            ..MultiFitOptions::default()
        };
        let controller = FitController::new(&signal, options).unwrap();
        let mut model = line_model();
        model.component_mut("line").unwrap().parameters_mut()[1].value = f64::NAN;
        let map = controller.multifit(&mut model).unwrap();
        assert_eq!(map.failed_indices(), vec![0, 1]);
        let state = map.state(0).unwrap().unwrap();
        assert_eq!(state.failure, Some(FailureReason::InvalidInitialGuess));
    }

    #[test]
    fn restore_loads_position_values() {
        let signal = line_signal(&[(1.0, 2.0), (2.0, 1.0)]);
        let controller = FitController::new(&signal, MultiFitOptions::default()).unwrap();
        let mut model = line_model();
        let map = controller.multifit(&mut model).unwrap();
        map.restore(&mut model, 0).unwrap();
        assert!((model.free_parameter_vector()[1] - 2.0).abs() < 1e-6);

        model.append(Component::offset("extra", 0.0)).unwrap();
        assert!(map.restore(&mut model, 0).is_err());
    }

    #[test]
    fn options_load_from_json() {
        let json = r#"{
            "path": {"outward": {"start": [1]}},
            "start_mode": "reset",
            "optimizer": {"max_iterations": 50}
        }"#;
        let options = MultiFitOptions::from_json_str(json).unwrap();
        assert_eq!(options.path, IterationPath::Outward { start: vec![1] });
        assert_eq!(options.start_mode, StartMode::Reset);
        assert_eq!(options.optimizer.max_iterations, 50);
        assert_eq!(options.optimizer.ftol, OptimizerConfig::default().ftol);

        assert!(MultiFitOptions::from_json_str(r#"{"optimizer": {"max_iterations": 0}}"#).is_err());
    }
}

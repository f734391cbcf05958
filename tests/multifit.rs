use hyperspec::axes::{AxisManager, DataAxis};
use hyperspec::components::{Component, ParameterRef};
use hyperspec::domain::{FailureReason, FitStatus, IterationPath, StartMode, WeightMode};
use hyperspec::fit::{FitController, MultiFitOptions, OptimizerConfig, fit_spectrum};
use hyperspec::math::gaussian;
use hyperspec::metadata::DictionaryTree;
use hyperspec::model::Model;
use hyperspec::report::{format_convergence_map, rank_worst_fits};
use hyperspec::signal::Signal;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};

const CHANNELS: usize = 101;

fn energy_axis() -> DataAxis {
    DataAxis::new(CHANNELS, 0.1, 0.0)
        .unwrap()
        .with_name("Energy")
        .with_units("eV")
        .with_index_in_array(1)
}

fn peak(a: f64, sigma: f64, centre: f64, background: f64) -> Vec<f64> {
    energy_axis()
        .axis_values()
        .iter()
        .map(|&x| gaussian(x, a, sigma, centre) + background)
        .collect()
}

fn line_scan(spectra: &[Vec<f64>]) -> Signal {
    let nav = DataAxis::new(spectra.len(), 1.0, 0.0)
        .unwrap()
        .with_name("x")
        .with_navigate(true)
        .with_index_in_array(0);
    let axes = AxisManager::new(vec![nav, energy_axis()]).unwrap();
    Signal::new(spectra.concat(), axes, DictionaryTree::new()).unwrap()
}

fn peak_model() -> Model {
    let mut model = Model::new();
    model.append(Component::gaussian("peak", 8.0, 1.3, 4.6)).unwrap();
    model.append(Component::offset("background", 1.0)).unwrap();
    model
}

fn value(model: &Model, component: &str, parameter: &str) -> f64 {
    model.effective_value(&ParameterRef::new(component, parameter)).unwrap()
}

#[test]
fn noiseless_gaussian_plus_background_is_recovered() {
    let x = energy_axis().axis_values();
    let y = peak(10.0, 1.0, 5.0, 2.0);
    let mut model = peak_model();

    let state = fit_spectrum(&mut model, &x, &y, None, &OptimizerConfig::default()).unwrap();
    assert_eq!(state.status, FitStatus::Converged);
    assert_eq!(state.degrees_of_freedom, CHANNELS - 4);
    assert!((value(&model, "peak", "A") - 10.0).abs() < 1e-6);
    assert!((value(&model, "peak", "sigma") - 1.0).abs() < 1e-6);
    assert!((value(&model, "peak", "centre") - 5.0).abs() < 1e-6);
    assert!((value(&model, "background", "offset") - 2.0).abs() < 1e-6);
}

#[test]
fn degenerate_position_fails_and_hot_start_carries_its_values() {
    let signal = line_scan(&[
        peak(10.0, 1.0, 5.0, 2.0),
        vec![0.0; CHANNELS],
        peak(6.0, 1.0, 5.0, 1.0),
    ]);
    let mut model = peak_model();
    let controller = FitController::new(&signal, MultiFitOptions::default()).unwrap();
    let map = controller.multifit(&mut model).unwrap();

    assert_eq!(
        map.convergence_map(),
        vec![FitStatus::Converged, FitStatus::Failed, FitStatus::Converged]
    );
    let states: Vec<_> = map.states().iter().map(|s| s.as_ref().unwrap()).collect();
    assert_eq!(states[1].failure, Some(FailureReason::SingularJacobian));
    assert!(states[1].parameter_values.iter().all(|v| v.is_finite()));

    // Position 3 starts from position 2's retained values, not position 1's.
    assert_eq!(states[2].initial_values, states[1].parameter_values);
    assert_ne!(states[2].initial_values, states[0].parameter_values);
    assert_eq!(states[1].initial_values, states[0].parameter_values);

    assert_eq!(map.failed_indices(), vec![1]);
    assert_eq!(format_convergence_map(&map).lines().nth(1), Some("oxo"));

    // The model keeps the last visited position.
    assert!((value(&model, "peak", "A") - 6.0).abs() < 1e-6);
    assert!((value(&model, "background", "offset") - 1.0).abs() < 1e-6);
}

#[test]
fn failed_position_can_be_retried_from_its_retained_values() {
    let signal = line_scan(&[peak(10.0, 1.0, 5.0, 2.0), vec![0.0; CHANNELS]]);
    let mut model = peak_model();
    let controller = FitController::new(&signal, MultiFitOptions::default()).unwrap();
    let map = controller.multifit(&mut model).unwrap();
    assert_eq!(map.status(1).unwrap(), FitStatus::Failed);

    map.restore(&mut model, 1).unwrap();
    assert_eq!(model.free_parameter_vector(), map.states()[1].as_ref().unwrap().parameter_values);

    // A manual retry with a sensible amplitude on the good spectrum works.
    model.parameter_mut(&ParameterRef::new("peak", "A")).unwrap().value = 5.0;
    let state = controller.fit_at(&mut model, 0).unwrap();
    assert!(state.converged());
    assert!((value(&model, "peak", "A") - 10.0).abs() < 1e-6);
}

#[test]
fn reset_mode_in_parallel_matches_sequential() {
    let spectra: Vec<Vec<f64>> = (0..6)
        .map(|k| peak(8.0 + k as f64, 1.0, 4.8 + 0.1 * k as f64, 1.5))
        .collect();
    let signal = line_scan(&spectra);

    let sequential = MultiFitOptions {
        start_mode: StartMode::Reset,
        ..MultiFitOptions::default()
    };
    let parallel = MultiFitOptions {
        parallel: true,
        ..sequential.clone()
    };
    let a = FitController::new(&signal, sequential).unwrap().multifit(&mut peak_model()).unwrap();
    let b = FitController::new(&signal, parallel).unwrap().multifit(&mut peak_model()).unwrap();

    assert_eq!(a.converged_count(), 6);
    assert_eq!(a, b);
    let centres = a.parameter_map(&ParameterRef::new("peak", "centre")).unwrap();
    for (k, c) in centres.iter().enumerate() {
        assert!((c - (4.8 + 0.1 * k as f64)).abs() < 1e-6, "position {k}: {c}");
    }
}

#[test]
fn serpentine_over_a_map_fits_every_position() {
    let spectra: Vec<Vec<f64>> = (0..6).map(|k| peak(10.0, 1.0, 5.0, k as f64)).collect();
    let nav_y = DataAxis::new(2, 1.0, 0.0).unwrap().with_navigate(true).with_index_in_array(0);
    let nav_x = DataAxis::new(3, 1.0, 0.0).unwrap().with_navigate(true).with_index_in_array(1);
    let energy = energy_axis().with_index_in_array(2);
    let axes = AxisManager::new(vec![nav_y, nav_x, energy]).unwrap();
    let signal = Signal::new(spectra.concat(), axes, DictionaryTree::new()).unwrap();

    let options = MultiFitOptions {
        path: IterationPath::Serpentine,
        ..MultiFitOptions::default()
    };
    let map = FitController::new(&signal, options).unwrap().multifit(&mut peak_model()).unwrap();
    assert_eq!(map.order(), &[0, 1, 2, 5, 4, 3]);
    assert_eq!(map.converged_count(), 6);

    let offsets = map.parameter_map(&ParameterRef::new("background", "offset")).unwrap();
    for (k, o) in offsets.iter().enumerate() {
        assert!((o - k as f64).abs() < 1e-6);
    }
    assert_eq!(format_convergence_map(&map).lines().skip(1).collect::<Vec<_>>(), vec!["ooo", "ooo"]);
}

#[test]
fn poisson_weighted_fit_of_counts() {
    let mut rng = StdRng::seed_from_u64(7);
    let truth = peak(1000.0, 1.0, 5.0, 20.0);
    let counts: Vec<f64> = truth
        .iter()
        .map(|&lambda| Poisson::new(lambda).unwrap().sample(&mut rng))
        .collect();
    let signal = line_scan(&[counts]);

    let mut model = Model::new();
    model.append(Component::gaussian("peak", 800.0, 1.3, 4.6)).unwrap();
    model.append(Component::offset("background", 10.0)).unwrap();
    let options = MultiFitOptions {
        weights: WeightMode::Poisson,
        ..MultiFitOptions::default()
    };
    let map = FitController::new(&signal, options).unwrap().multifit(&mut model).unwrap();
    let state = map.states()[0].as_ref().unwrap();
    assert!(state.converged());

    let std = state.std_errors.as_ref().unwrap();
    assert!(std.iter().all(|s| *s > 0.0));
    let truth_values = [1000.0, 1.0, 5.0, 20.0];
    for (j, (v, t)) in state.parameter_values.iter().zip(truth_values).enumerate() {
        assert!((v - t).abs() < 5.0 * std[j], "parameter {j}: {v} vs {t} (std {})", std[j]);
    }
    // Reduced chisq of a correctly weighted Poisson fit is close to one.
    let reduced = state.reduced_chisq();
    assert!(reduced > 0.5 && reduced < 2.0, "reduced chisq {reduced}");
    assert_eq!(rank_worst_fits(&map, 3), vec![(0, reduced)]);
}

#[test]
fn signal_range_limits_the_fitted_channels() {
    // A second peak outside the range must not disturb the fit.
    let mut y = peak(10.0, 1.0, 5.0, 2.0);
    for (v, x) in y.iter_mut().zip(energy_axis().axis_values()) {
        *v += gaussian(x, 20.0, 0.3, 9.0);
    }
    let signal = line_scan(&[y]);
    let options = MultiFitOptions {
        signal_range: Some((1.0, 7.5)),
        ..MultiFitOptions::default()
    };
    let controller = FitController::new(&signal, options).unwrap();
    assert_eq!(controller.coordinates().len(), 66);

    let mut model = peak_model();
    let map = controller.multifit(&mut model).unwrap();
    let state = map.states()[0].as_ref().unwrap();
    assert!(state.converged());
    assert_eq!(state.degrees_of_freedom, 66 - 4);
    // The far peak's tail (sigma 0.3 at 9.0) is negligible below 7.5.
    assert!((value(&model, "peak", "centre") - 5.0).abs() < 1e-3);
}

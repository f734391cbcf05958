use std::collections::BTreeMap;

use crate::domain::{FitState, FitStatus};
use crate::fit::FitMap;
use crate::model::Model;

use super::rank_worst_fits;

/// Parameter table of the model's current values.
pub fn format_model(model: &Model) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<16} {:<16} {:>14} {:>12} {:<5} {:<24}\n",
            "component", "parameter", "value", "std", "free", "bounds / twin"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!("{:-<16} {:-<16} {:-<14} {:-<12} {:-<5} {:-<24}\n", "", "", "", "", "", "").trim_end(),
    );
    out.push('\n');

    for component in model.components() {
        let name = if component.active {
            truncate(&component.name, 16)
        } else {
            truncate(&format!("({})", component.name), 16)
        };
        for p in component.parameters() {
            let constraint = match &p.twin {
                Some(source) => format!("= {source}"),
                None => fmt_bounds(p.bmin, p.bmax),
            };
            out.push_str(
                format!(
                    "{:<16} {:<16} {:>14} {:>12} {:<5} {:<24}\n",
                    name,
                    truncate(&p.name, 16),
                    fmt_num(p.value),
                    p.std.map(fmt_num).unwrap_or_default(),
                    if p.is_fitted() { "yes" } else { "no" },
                    constraint,
                )
                .trim_end(),
            );
            out.push('\n');
        }
    }
    out
}

/// Fit diagnostics of one position followed by the model's parameter table.
///
/// `model` is expected to hold the committed result of `state`.
pub fn format_fit_summary(model: &Model, state: &FitState) -> String {
    let mut out = String::new();
    out.push_str(&format!("Status: {}", state.status.display_name()));
    if let Some(reason) = state.failure {
        out.push_str(&format!(" ({})", reason.display_name()));
    }
    out.push('\n');
    out.push_str(&format!(
        "chisq={} reduced={} dof={} iterations={}\n",
        fmt_num(state.chisq),
        fmt_num(state.reduced_chisq()),
        state.degrees_of_freedom,
        state.iterations
    ));
    out.push_str(&format!("start: {}\n", fmt_vec(&state.initial_values)));
    out.push('\n');
    out.push_str(&format_model(model));
    out
}

/// Counts per status and failure reason, plus the worst fits.
pub fn format_multifit_summary(map: &FitMap) -> String {
    let mut out = String::new();
    let statuses = map.convergence_map();
    let count = |s: FitStatus| statuses.iter().filter(|&&x| x == s).count();

    out.push_str(&format!(
        "Positions: {} | shape={:?} | visited={}\n",
        map.len(),
        map.navigation_shape(),
        map.order().len()
    ));
    out.push_str(&format!(
        "converged={} failed={} not fit={}\n",
        count(FitStatus::Converged),
        count(FitStatus::Failed),
        count(FitStatus::NotFit)
    ));

    let mut reasons: BTreeMap<&'static str, usize> = BTreeMap::new();
    for state in map.states().iter().flatten() {
        if let Some(reason) = state.failure {
            *reasons.entry(reason.display_name()).or_default() += 1;
        }
    }
    for (reason, n) in &reasons {
        out.push_str(&format!("  {n} x {reason}\n"));
    }

    let worst = rank_worst_fits(map, 5);
    if !worst.is_empty() {
        out.push_str("\nLargest reduced chisq:\n");
        for (nav, value) in worst {
            out.push_str(&format!("  #{nav:<8} {}\n", fmt_num(value)));
        }
    }
    out
}

/// One character per navigation position, laid out over the last navigation
/// axis with the leading axes flattened into rows.
pub fn format_convergence_map(map: &FitMap) -> String {
    let statuses = map.convergence_map();
    let width = map.navigation_shape().last().copied().unwrap_or(1).max(1);

    let mut out = String::from("o converged  x failed  . not fit\n");
    for row in statuses.chunks(width) {
        out.extend(row.iter().map(|&s| status_char(s)));
        out.push('\n');
    }
    out
}

fn status_char(status: FitStatus) -> char {
    match status {
        FitStatus::Converged => 'o',
        FitStatus::Failed => 'x',
        FitStatus::Fitting => '~',
        FitStatus::NotFit => '.',
    }
}

fn fmt_bounds(bmin: Option<f64>, bmax: Option<f64>) -> String {
    match (bmin, bmax) {
        (None, None) => String::new(),
        (lo, hi) => format!(
            "[{}, {}]",
            lo.map(fmt_num).unwrap_or_else(|| "-inf".to_string()),
            hi.map(fmt_num).unwrap_or_else(|| "inf".to_string())
        ),
    }
}

fn fmt_num(v: f64) -> String {
    if !v.is_finite() {
        return format!("{v}");
    }
    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-3..1e6).contains(&magnitude) {
        format!("{v:.4e}")
    } else {
        format!("{v:.6}")
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| fmt_num(*x)).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::AxisManager;
    use crate::components::{Component, ParameterRef, TwinFunction};
    use crate::domain::IterationPath;
    use crate::fit::{FitController, MultiFitOptions};
    use crate::metadata::DictionaryTree;
    use crate::signal::Signal;

    fn line_map(shape: &[usize], path: IterationPath) -> FitMap {
        let n = 6;
        let positions: usize = shape.iter().product();
        let data: Vec<f64> = (0..positions)
            .flat_map(|k| (0..n).map(move |i| k as f64 + 0.5 * i as f64))
            .collect();
        let mut full = shape.to_vec();
        full.push(n);
        let axes = AxisManager::from_shape(&full, 1).unwrap();
        let signal = Signal::new(data, axes, DictionaryTree::new()).unwrap();
        let mut model = Model::new();
        model.append(Component::polynomial("line", 1)).unwrap();
        let options = MultiFitOptions {
            path,
            ..MultiFitOptions::default()
        };
        FitController::new(&signal, options).unwrap().multifit(&mut model).unwrap()
    }

    #[test]
    fn model_table_lists_parameters() {
        let mut model = Model::new();
        model.append(Component::gaussian("peak", 10.0, 1.0, 5.0)).unwrap();
        model.append(Component::gaussian("twin", 5.0, 1.0, 7.0)).unwrap();
        model
            .set_twin(
                &ParameterRef::new("twin", "sigma"),
                &ParameterRef::new("peak", "sigma"),
                TwinFunction::Identity,
            )
            .unwrap();
        let table = format_model(&model);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2 + 6);
        assert!(lines[0].starts_with("component"));
        assert!(lines[2].starts_with("peak"));
        assert!(table.contains("= peak.sigma"));
    }

    #[test]
    fn convergence_map_is_a_grid() {
        let map = line_map(&[2, 3], IterationPath::Explicit(vec![0, 1, 2, 4]));
        let text = format_convergence_map(&map);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(&lines[1..], &["ooo", ".o."]);
    }

    #[test]
    fn single_spectrum_map_has_one_cell() {
        let map = line_map(&[], IterationPath::RowMajor);
        assert_eq!(format_convergence_map(&map).lines().nth(1), Some("o"));
    }

    #[test]
    fn multifit_summary_counts_statuses() {
        let map = line_map(&[4], IterationPath::Explicit(vec![3, 1]));
        let text = format_multifit_summary(&map);
        assert!(text.contains("converged=2 failed=0 not fit=2"), "{text}");
    }

    #[test]
    fn numbers_switch_to_scientific() {
        assert_eq!(fmt_num(1.5), "1.500000");
        assert_eq!(fmt_num(2.5e7), "2.5000e7");
        assert_eq!(fmt_num(0.0), "0.000000");
        assert_eq!(truncate("abcdef", 4), "abc.");
    }
}

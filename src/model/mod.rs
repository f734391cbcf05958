//! The component sum: an ordered set of uniquely named components.
//!
//! The free-parameter vector lists, for every *active* component in insertion
//! order, each parameter with `free = true` and no twin, in declaration
//! order. The optimizer sees only this vector; `FitSnapshot` maps it back to
//! predictions without touching the model, and `apply_parameter_vector`
//! commits a result.

mod builder;
mod snapshot;

pub use builder::*;
pub use snapshot::*;

use log::debug;

use crate::components::{Component, Parameter, ParameterRef, TwinFunction};
use crate::error::{Result, SpecError};

/// Stored raw parameter values, per component name.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelValues {
    entries: Vec<(String, Vec<f64>)>,
}

#[derive(Debug, Clone, Default)]
pub struct Model {
    components: Vec<Component>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn append(&mut self, component: Component) -> Result<()> {
        if self.position(&component.name).is_some() {
            return Err(SpecError::DuplicateName(component.name));
        }
        self.components.push(component);
        Ok(())
    }

    /// Remove a component. Parameters twinned to it keep their current
    /// effective value and become independent.
    pub fn remove(&mut self, name: &str) -> Result<Component> {
        let idx = self.index_of(name)?;
        let dependants: Vec<(ParameterRef, f64)> = self
            .all_refs()
            .into_iter()
            .filter(|r| {
                self.raw_parameter(r)
                    .and_then(|p| p.twin.as_ref())
                    .is_some_and(|t| t.component == name)
            })
            .map(|r| {
                let v = self.effective_value(&r);
                (r, v)
            })
            .filter_map(|(r, v)| v.ok().map(|v| (r, v)))
            .collect();

        for (r, value) in dependants {
            let p = self.parameter_mut(&r)?;
            p.twin = None;
            p.value = value;
            debug!("untwinned {r} on removal of '{name}'");
        }
        Ok(self.components.remove(idx))
    }

    pub fn component(&self, name: &str) -> Result<&Component> {
        let idx = self.index_of(name)?;
        Ok(&self.components[idx])
    }

    pub fn component_mut(&mut self, name: &str) -> Result<&mut Component> {
        let idx = self.index_of(name)?;
        Ok(&mut self.components[idx])
    }

    pub fn set_active(&mut self, name: &str, active: bool) -> Result<()> {
        self.component_mut(name)?.active = active;
        Ok(())
    }

    pub fn parameter_mut(&mut self, r: &ParameterRef) -> Result<&mut Parameter> {
        self.component_mut(&r.component)?.parameter_mut(&r.parameter)
    }

    /// Make `target` follow `source` through `function`.
    pub fn set_twin(
        &mut self,
        target: &ParameterRef,
        source: &ParameterRef,
        function: TwinFunction,
    ) -> Result<()> {
        self.component(&source.component)?.parameter(&source.parameter)?;
        self.component(&target.component)?.parameter(&target.parameter)?;

        // Walk the source's chain; reaching the target means a cycle.
        let mut cursor = Some(source.clone());
        while let Some(r) = cursor {
            if &r == target {
                return Err(SpecError::TwinCycle {
                    target: target.to_string(),
                    source_ref: source.to_string(),
                });
            }
            cursor = self.raw_parameter(&r).and_then(|p| p.twin.clone());
        }

        let p = self.parameter_mut(target)?;
        p.twin = Some(source.clone());
        p.twin_function = function;
        Ok(())
    }

    pub fn clear_twin(&mut self, target: &ParameterRef) -> Result<()> {
        let value = self.effective_value(target)?;
        let p = self.parameter_mut(target)?;
        p.twin = None;
        p.twin_function = TwinFunction::Identity;
        p.value = value;
        Ok(())
    }

    /// Value after twin resolution.
    pub fn effective_value(&self, r: &ParameterRef) -> Result<f64> {
        let p = self.component(&r.component)?.parameter(&r.parameter)?;
        match &p.twin {
            None => Ok(p.value),
            Some(source) => Ok(p.twin_function.apply(self.effective_value(source)?)),
        }
    }

    /// References of the free-parameter vector, in vector order.
    pub fn free_parameters(&self) -> Vec<ParameterRef> {
        self.fitted_slots()
            .into_iter()
            .map(|(ci, pi)| {
                let c = &self.components[ci];
                ParameterRef::new(c.name.clone(), c.parameters()[pi].name.clone())
            })
            .collect()
    }

    pub fn free_parameter_vector(&self) -> Vec<f64> {
        self.fitted_slots()
            .into_iter()
            .map(|(ci, pi)| self.components[ci].parameters()[pi].value)
            .collect()
    }

    pub fn apply_parameter_vector(&mut self, values: &[f64]) -> Result<()> {
        let slots = self.fitted_slots();
        if slots.len() != values.len() {
            return Err(SpecError::DimensionMismatch {
                context: "free parameter vector",
                expected: slots.len(),
                found: values.len(),
            });
        }
        for ((ci, pi), &v) in slots.into_iter().zip(values) {
            self.components[ci].parameters_mut()[pi].value = v;
        }
        Ok(())
    }

    /// Record standard errors for the free parameters (vector order).
    pub fn apply_std_errors(&mut self, std: &[f64]) -> Result<()> {
        let slots = self.fitted_slots();
        if slots.len() != std.len() {
            return Err(SpecError::DimensionMismatch {
                context: "standard errors",
                expected: slots.len(),
                found: std.len(),
            });
        }
        for ((ci, pi), &s) in slots.into_iter().zip(std) {
            self.components[ci].parameters_mut()[pi].std = Some(s);
        }
        Ok(())
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.fitted_slots()
            .into_iter()
            .map(|(ci, pi)| self.components[ci].parameters()[pi].bounds())
            .collect()
    }

    /// Sum of all active components at `x`.
    pub fn predict(&self, x: &[f64]) -> Vec<f64> {
        let snapshot = self.snapshot();
        snapshot.predict(x, &snapshot.initial_vector())
    }

    /// Weighted sum of squared residuals.
    pub fn chisq(&self, x: &[f64], y: &[f64], weights: Option<&[f64]>) -> Result<f64> {
        if x.len() != y.len() {
            return Err(SpecError::DimensionMismatch {
                context: "chisq data",
                expected: x.len(),
                found: y.len(),
            });
        }
        if let Some(w) = weights {
            if w.len() != y.len() {
                return Err(SpecError::DimensionMismatch {
                    context: "chisq weights",
                    expected: y.len(),
                    found: w.len(),
                });
            }
        }
        let pred = self.predict(x);
        Ok(y.iter()
            .zip(&pred)
            .enumerate()
            .map(|(i, (yi, fi))| weights.map_or(1.0, |w| w[i]) * (yi - fi).powi(2))
            .sum())
    }

    pub fn degrees_of_freedom(&self, n_points: usize) -> usize {
        n_points.saturating_sub(self.fitted_slots().len())
    }

    /// Run a component's initial-value heuristic.
    pub fn estimate_component(
        &mut self,
        name: &str,
        x: &[f64],
        y: &[f64],
        range: Option<(f64, f64)>,
    ) -> Result<bool> {
        Ok(self.component_mut(name)?.estimate_parameters(x, y, range))
    }

    pub fn store_values(&self) -> ModelValues {
        ModelValues {
            entries: self.components.iter().map(|c| (c.name.clone(), c.values())).collect(),
        }
    }

    /// Restore raw values stored earlier. Components added since are left
    /// alone; components removed since are ignored.
    pub fn restore_values(&mut self, stored: &ModelValues) -> Result<()> {
        for (name, values) in &stored.entries {
            let Some(idx) = self.position(name) else {
                continue;
            };
            let params = self.components[idx].parameters_mut();
            if params.len() != values.len() {
                return Err(SpecError::DimensionMismatch {
                    context: "stored component values",
                    expected: params.len(),
                    found: values.len(),
                });
            }
            for (p, &v) in params.iter_mut().zip(values) {
                p.value = v;
            }
        }
        Ok(())
    }

    /// Immutable view for evaluating arbitrary free vectors.
    pub fn snapshot(&self) -> FitSnapshot<'_> {
        FitSnapshot::new(self)
    }

    pub(crate) fn fitted_slots(&self) -> Vec<(usize, usize)> {
        self.components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.active)
            .flat_map(|(ci, c)| {
                c.parameters()
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.is_fitted())
                    .map(move |(pi, _)| (ci, pi))
            })
            .collect()
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.components.iter().position(|c| c.name == name)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.position(name)
            .ok_or_else(|| SpecError::UnknownComponent(name.to_string()))
    }

    fn raw_parameter(&self, r: &ParameterRef) -> Option<&Parameter> {
        let c = &self.components[self.position(&r.component)?];
        c.parameter_index(&r.parameter).map(|i| &c.parameters()[i])
    }

    fn all_refs(&self) -> Vec<ParameterRef> {
        self.components
            .iter()
            .flat_map(|c| {
                c.parameters()
                    .iter()
                    .map(move |p| ParameterRef::new(c.name.clone(), p.name.clone()))
            })
            .collect()
    }
}

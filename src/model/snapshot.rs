//! Read-only evaluation view used while a fit is in flight.

use crate::components::{ParameterRef, TwinFunction};

use super::Model;

type TwinLink = Option<(usize, usize, TwinFunction)>;

/// Borrowed view of a model that evaluates predictions for any free vector.
///
/// Holding a `FitSnapshot` keeps the model immutably borrowed, so no other
/// writer can change parameters until the fit commits its result.
#[derive(Debug, Clone)]
pub struct FitSnapshot<'a> {
    model: &'a Model,
    slots: Vec<(usize, usize)>,
    twins: Vec<Vec<TwinLink>>,
    base: Vec<Vec<f64>>,
}

impl<'a> FitSnapshot<'a> {
    pub(super) fn new(model: &'a Model) -> Self {
        let components = model.components();
        let twins = components
            .iter()
            .map(|c| {
                c.parameters()
                    .iter()
                    .map(|p| {
                        let t = p.twin.as_ref()?;
                        let ci = model.position(&t.component)?;
                        let pi = components[ci].parameter_index(&t.parameter)?;
                        Some((ci, pi, p.twin_function))
                    })
                    .collect()
            })
            .collect();
        Self {
            model,
            slots: model.fitted_slots(),
            twins,
            base: components.iter().map(|c| c.values()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn model(&self) -> &'a Model {
        self.model
    }

    /// The model's current free vector.
    pub fn initial_vector(&self) -> Vec<f64> {
        self.slots.iter().map(|&(ci, pi)| self.base[ci][pi]).collect()
    }

    pub fn parameter_refs(&self) -> Vec<ParameterRef> {
        self.model.free_parameters()
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.model.bounds()
    }

    /// Effective values of every parameter for the free vector `free`.
    ///
    /// `free` shorter than the vector leaves the remaining entries at their
    /// stored values.
    pub fn resolve(&self, free: &[f64]) -> Vec<Vec<f64>> {
        let mut raw = self.base.clone();
        for (&(ci, pi), &v) in self.slots.iter().zip(free) {
            raw[ci][pi] = v;
        }
        raw.iter()
            .enumerate()
            .map(|(ci, values)| (0..values.len()).map(|pi| self.follow(&raw, ci, pi)).collect())
            .collect()
    }

    fn follow(&self, raw: &[Vec<f64>], ci: usize, pi: usize) -> f64 {
        // Twin chains are acyclic (checked by `Model::set_twin`).
        match self.twins[ci][pi] {
            None => raw[ci][pi],
            Some((sc, sp, f)) => f.apply(self.follow(raw, sc, sp)),
        }
    }

    /// Sum of the active components at `x` for the free vector `free`.
    pub fn predict(&self, x: &[f64], free: &[f64]) -> Vec<f64> {
        let effective = self.resolve(free);
        let mut out = vec![0.0; x.len()];
        for (c, values) in self.model.components().iter().zip(&effective) {
            if c.active {
                c.kind().accumulate(x, values, &mut out);
            }
        }
        out
    }
}

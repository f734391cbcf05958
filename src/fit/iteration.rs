//! Navigation visiting orders for multifit.
//!
//! With hot-starting, each position's initial guess comes from the one
//! visited just before it, so the order is part of the result. Every order
//! here is deterministic for a given navigation shape.

use crate::axes::manager::{ravel, unravel};
use crate::domain::IterationPath;
use crate::error::{Result, SpecError};

/// Flat navigation indices in the order `path` visits them.
pub fn visit_order(path: &IterationPath, nav_shape: &[usize]) -> Result<Vec<usize>> {
    let size: usize = nav_shape.iter().product();
    match path {
        IterationPath::RowMajor => Ok((0..size).collect()),
        IterationPath::Serpentine => Ok(serpentine(nav_shape)),
        IterationPath::Outward { start } => outward(start, nav_shape),
        IterationPath::Explicit(indices) => explicit(indices, size),
    }
}

/// Row-major, reversing the fastest axis on every odd row. For two
/// navigation axes consecutive positions are always neighbours.
fn serpentine(nav_shape: &[usize]) -> Vec<usize> {
    let Some((&fast, _)) = nav_shape.split_last() else {
        return vec![0];
    };
    let size: usize = nav_shape.iter().product();
    let rows = if fast == 0 { 0 } else { size / fast };

    let mut out = Vec::with_capacity(size);
    for row in 0..rows {
        let base = row * fast;
        if row % 2 == 0 {
            out.extend(base..base + fast);
        } else {
            out.extend((base..base + fast).rev());
        }
    }
    out
}

/// Increasing Euclidean distance from `start`; ties go to the smaller flat index.
fn outward(start: &[usize], nav_shape: &[usize]) -> Result<Vec<usize>> {
    ravel(start, nav_shape)?;
    let size: usize = nav_shape.iter().product();

    let mut keyed = Vec::with_capacity(size);
    for flat in 0..size {
        let coords = unravel(flat, nav_shape)?;
        let d2: usize = coords
            .iter()
            .zip(start)
            .map(|(&c, &s)| c.abs_diff(s).pow(2))
            .sum();
        keyed.push((d2, flat));
    }
    keyed.sort_unstable();
    Ok(keyed.into_iter().map(|(_, flat)| flat).collect())
}

fn explicit(indices: &[usize], size: usize) -> Result<Vec<usize>> {
    let mut seen = vec![false; size];
    for &i in indices {
        if i >= size {
            return Err(SpecError::IndexOutOfRange {
                axis: "<navigation>".to_string(),
                index: i,
                size,
            });
        }
        if seen[i] {
            return Err(SpecError::InvalidConfig(format!(
                "navigation index {i} appears twice in the iteration path"
            )));
        }
        seen[i] = true;
    }
    Ok(indices.to_vec())
}

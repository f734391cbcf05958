//! Read/write multifit result JSON files.
//!
//! The document wraps a `FitMap` with run metadata so a saved result can be
//! inspected or restored into a model later without re-fitting.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecError};
use crate::fit::{FitMap, MultiFitOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitMapFile {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    /// Title of the fitted signal, if any.
    #[serde(default)]
    pub title: String,
    pub options: MultiFitOptions,
    pub converged: usize,
    pub failed: Vec<usize>,
    pub map: FitMap,
}

impl FitMapFile {
    pub fn new(title: impl Into<String>, options: MultiFitOptions, map: FitMap) -> Self {
        Self {
            tool: "hyperspec".to_string(),
            generated_at: Utc::now(),
            title: title.into(),
            options,
            converged: map.converged_count(),
            failed: map.failed_indices(),
            map,
        }
    }
}

pub fn write_fitmap_json(path: &Path, file: &FitMapFile) -> Result<()> {
    let out = File::create(path).map_err(|e| SpecError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(out), file)?;
    Ok(())
}

pub fn read_fitmap_json(path: &Path) -> Result<FitMapFile> {
    let input = File::open(path).map_err(|e| SpecError::io(path, e))?;
    let file: FitMapFile = serde_json::from_reader(BufReader::new(input))?;
    if file.map.states().len() != file.map.navigation_shape().iter().product::<usize>() {
        return Err(SpecError::DimensionMismatch {
            context: "fit map states",
            expected: file.map.navigation_shape().iter().product(),
            found: file.map.states().len(),
        });
    }
    Ok(file)
}

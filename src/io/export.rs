//! Export a `FitMap` to CSV.
//!
//! One row per navigation position in flat order, meant for spreadsheets or
//! downstream scripts. Positions that were never fitted keep their row with an
//! empty status payload so the row count always equals the navigation size.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::axes::manager::unravel;
use crate::error::{Result, SpecError};
use crate::fit::FitMap;

/// Write per-position fit results to a CSV file.
pub fn write_fitmap_csv(path: &Path, map: &FitMap) -> Result<()> {
    let file = File::create(path).map_err(|e| SpecError::io(path, e))?;
    let mut out = BufWriter::new(file);
    write_fitmap_rows(&mut out, map).map_err(|e| SpecError::io(path, e))?;
    out.flush().map_err(|e| SpecError::io(path, e))?;
    Ok(())
}

/// CSV text of `map`, as `write_fitmap_csv` would write it.
pub fn fitmap_csv_string(map: &FitMap) -> Result<String> {
    let mut buf = Vec::new();
    write_fitmap_rows(&mut buf, map).map_err(|e| SpecError::io("<memory>", e))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_fitmap_rows<W: Write>(out: &mut W, map: &FitMap) -> std::io::Result<()> {
    let shape = map.navigation_shape();

    let mut header = vec!["nav_index".to_string()];
    header.extend((0..shape.len()).map(|i| format!("nav_{i}")));
    header.extend(
        ["visit", "status", "failure", "chisq", "reduced_chisq", "dof", "iterations"]
            .iter()
            .map(|s| s.to_string()),
    );
    for p in map.parameters() {
        header.push(p.to_string());
        header.push(format!("{p}_std"));
    }
    writeln!(out, "{}", header.join(","))?;

    let mut visit = vec![None; map.len()];
    for (rank, &nav) in map.order().iter().enumerate() {
        if let Some(slot) = visit.get_mut(nav) {
            *slot = Some(rank);
        }
    }

    for (nav, state) in map.states().iter().enumerate() {
        let mut row = vec![nav.to_string()];
        // `nav` comes from enumerating the map's own states.
        let coords = unravel(nav, shape).unwrap_or_default();
        row.extend(coords.iter().map(usize::to_string));
        row.push(visit[nav].map(|r| r.to_string()).unwrap_or_default());

        match state {
            Some(s) => {
                row.push(s.status.display_name().to_string());
                row.push(s.failure.map(|f| f.display_name().to_string()).unwrap_or_default());
                row.push(number(s.chisq));
                row.push(number(s.reduced_chisq()));
                row.push(s.degrees_of_freedom.to_string());
                row.push(s.iterations.to_string());
                for (j, value) in s.parameter_values.iter().enumerate() {
                    row.push(number(*value));
                    row.push(
                        s.std_errors
                            .as_ref()
                            .and_then(|std| std.get(j))
                            .map(|v| number(*v))
                            .unwrap_or_default(),
                    );
                }
            }
            None => {
                row.push("not fit".to_string());
                row.extend(std::iter::repeat_n(String::new(), 5 + 2 * map.parameters().len()));
            }
        }
        writeln!(out, "{}", row.join(","))?;
    }
    Ok(())
}

fn number(v: f64) -> String {
    if v.is_finite() { format!("{v:.10}") } else { String::new() }
}

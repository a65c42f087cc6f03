// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Output Persistence
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Tabular series, snapshot archive and final field set of a run.
//!
//! Each snapshot is written once, as its own `snapshots/optimize_NNNNNN.npz`,
//! and each checkpoint appends the new rows of `costs.dat` and
//! `rms_std.dat` and rewrites `history.json`. A run stopped early keeps
//! everything up to its last checkpoint. The stacked `optimize.npz` is
//! assembled once, at the end.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use glacier_types::constants::FINAL_ICEMASK_THK;
use glacier_types::error::{GlacierError, GlacierResult};
use glacier_types::state::GlacierState;
use ndarray::{Array1, Array2, Array3, Axis};
use ndarray_npy::NpzWriter;

use crate::cost::CostBreakdown;
use crate::diagnostics::{
    observed_speed, velocity_magnitude, InversionHistory, InversionSummary, IterationRecord,
};

const SNAPSHOT_DIR: &str = "snapshots";
const RESIDUAL_NAMES: [&str; 8] = [
    "rmsthk", "stdthk", "rmsvel", "stdvel", "rmsdiv", "stddiv", "rmsusurf", "stdusurf",
];

/// Snapshot fields understood by [`snapshot_field`].
pub const SNAPSHOT_FIELDS: [&str; 16] = [
    "topg",
    "usurf",
    "thk",
    "strflowctrl",
    "arrhenius",
    "slidingco",
    "velsurf_mag",
    "velsurfobs_mag",
    "divflux",
    "ubar",
    "vbar",
    "uvelsurf",
    "vvelsurf",
    "thkobs",
    "usurfobs",
    "icemaskobs",
];

/// Physical field `name` of the current state, if it exists yet.
pub fn snapshot_field(state: &GlacierState, name: &str) -> Option<Array2<f64>> {
    match name {
        "topg" => Some(&state.usurf - &state.thk),
        "usurf" => Some(state.usurf.clone()),
        "thk" => Some(state.thk.clone()),
        "strflowctrl" => Some(state.strflowctrl.clone()),
        "arrhenius" => state.arrhenius.clone(),
        "slidingco" => state.slidingco.clone(),
        "velsurf_mag" => match (&state.uvelsurf, &state.vvelsurf) {
            (Some(u), Some(v)) => Some(velocity_magnitude(u, v)),
            _ => None,
        },
        "velsurfobs_mag" => match (&state.uvelsurfobs, &state.vvelsurfobs) {
            (Some(u), Some(v)) => Some(observed_speed(u, v)),
            _ => None,
        },
        "divflux" => state.divflux.clone(),
        "ubar" => state.ubar.clone(),
        "vbar" => state.vbar.clone(),
        "uvelsurf" => state.uvelsurf.clone(),
        "vvelsurf" => state.vvelsurf.clone(),
        "thkobs" => state.thkobs.as_ref().map(|o| o.values.clone()),
        "usurfobs" => state.usurfobs.as_ref().map(|o| o.values.clone()),
        "icemaskobs" => Some(state.icemaskobs.clone()),
        _ => None,
    }
}

fn npz_error(path: &Path, e: impl std::fmt::Display) -> GlacierError {
    GlacierError::Npz(format!("Failed to write npz '{}': {e}", path.display()))
}

/// Writes named arrays plus the grid coordinates into one archive.
fn write_npz(
    path: &Path,
    state: &GlacierState,
    extra_1d: &[(&str, &Array1<f64>)],
    fields_2d: &[(String, Array2<f64>)],
    fields_3d: &[(String, Array3<f64>)],
) -> GlacierResult<()> {
    let file = File::create(path)?;
    let mut npz = NpzWriter::new(file);
    npz.add_array("x", &state.grid.x).map_err(|e| npz_error(path, e))?;
    npz.add_array("y", &state.grid.y).map_err(|e| npz_error(path, e))?;
    for (name, values) in extra_1d {
        npz.add_array(*name, *values).map_err(|e| npz_error(path, e))?;
    }
    for (name, values) in fields_2d {
        npz.add_array(name.as_str(), values).map_err(|e| npz_error(path, e))?;
    }
    for (name, values) in fields_3d {
        npz.add_array(name.as_str(), values).map_err(|e| npz_error(path, e))?;
    }
    npz.finish().map_err(|e| npz_error(path, e))?;
    Ok(())
}

/// Persists a run under one directory.
#[derive(Debug)]
pub struct OutputWriter {
    dir: PathBuf,
    vars: Vec<String>,
    iterations: Vec<usize>,
    snapshots: BTreeMap<String, Vec<Array2<f64>>>,
    rows_written: usize,
}

impl OutputWriter {
    /// Creates `dir` and its snapshot directory if needed. Names outside
    /// [`SNAPSHOT_FIELDS`] are a configuration error; repeated names are
    /// saved once.
    pub fn new(dir: impl Into<PathBuf>, vars_to_save: &[String]) -> GlacierResult<Self> {
        let dir = dir.into();
        let mut vars: Vec<String> = Vec::with_capacity(vars_to_save.len());
        for var in vars_to_save {
            if !SNAPSHOT_FIELDS.contains(&var.as_str()) {
                return Err(GlacierError::ConfigError(format!(
                    "cannot save unknown field '{var}'"
                )));
            }
            if !vars.contains(var) {
                vars.push(var.clone());
            }
        }
        fs::create_dir_all(dir.join(SNAPSHOT_DIR))?;
        Ok(OutputWriter {
            dir,
            vars,
            iterations: Vec::new(),
            snapshots: BTreeMap::new(),
            rows_written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Field names saved per snapshot, without repeats.
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub fn snapshot_count(&self) -> usize {
        self.iterations.len()
    }

    /// Path of the frame file for `iteration`.
    pub fn frame_path(&self, iteration: usize) -> PathBuf {
        self.dir
            .join(SNAPSHOT_DIR)
            .join(format!("optimize_{iteration:06}.npz"))
    }

    /// Records the selected fields at `iteration` and writes them as one
    /// frame file. Fields that do not exist yet are stored as NaN.
    pub fn snapshot(&mut self, iteration: usize, state: &GlacierState) -> GlacierResult<()> {
        let shape = state.grid.shape();
        let mut frame = Vec::with_capacity(self.vars.len());
        for var in &self.vars {
            let field = snapshot_field(state, var).unwrap_or_else(|| Array2::from_elem(shape, f64::NAN));
            self.snapshots.entry(var.clone()).or_default().push(field.clone());
            frame.push((var.clone(), field));
        }
        self.iterations.push(iteration);

        let stamp = Array1::from_elem(1, iteration as f64);
        write_npz(
            &self.frame_path(iteration),
            state,
            &[("iteration", &stamp)],
            &frame,
            &[],
        )
    }

    /// Appends the records not yet on disk to `costs.dat` and
    /// `rms_std.dat` and rewrites `history.json`.
    pub fn checkpoint(&mut self, history: &InversionHistory) -> GlacierResult<()> {
        let fresh = self.rows_written == 0;
        let pending = history.records.get(self.rows_written..).unwrap_or(&[]);
        append_table(&self.dir.join("costs.dat"), &costs_header(), &cost_rows(pending), fresh)?;
        append_table(
            &self.dir.join("rms_std.dat"),
            &residuals_header(),
            &residual_rows(pending),
            fresh,
        )?;
        fs::write(
            self.dir.join("history.json"),
            serde_json::to_string_pretty(history)?,
        )?;
        self.rows_written = history.len();
        Ok(())
    }

    /// Completes the tabular series and writes the summary, the stacked
    /// snapshot archive and the final field set.
    pub fn write_final(
        &mut self,
        state: &GlacierState,
        history: &InversionHistory,
        summary: &InversionSummary,
    ) -> GlacierResult<()> {
        self.checkpoint(history)?;
        fs::write(
            self.dir.join("strflowctrl.dat"),
            format!("{:.3}\n{:.3}\n", summary.strflowctrl_mean, summary.strflowctrl_std),
        )?;
        fs::write(self.dir.join("volume.dat"), format!("{:.3}\n", summary.volume_km3))?;
        fs::write(
            self.dir.join("tcompoptimize.dat"),
            format!("{:.3}\n", summary.wall_time_s),
        )?;
        fs::write(
            self.dir.join("summary.json"),
            serde_json::to_string_pretty(summary)?,
        )?;
        if !self.iterations.is_empty() {
            self.write_archive(state)?;
        }
        self.write_geology(state)
    }

    /// `optimize.npz`: one `[n_snapshots, ny, nx]` stack per saved field.
    fn write_archive(&self, state: &GlacierState) -> GlacierResult<()> {
        let mut stacks = Vec::with_capacity(self.snapshots.len());
        for (name, frames) in &self.snapshots {
            let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
            let stack = ndarray::stack(Axis(0), &views)
                .map_err(|e| GlacierError::Npz(format!("Failed to stack {name}: {e}")))?;
            stacks.push((name.clone(), stack));
        }
        let iterations: Array1<f64> = self.iterations.iter().map(|&i| i as f64).collect();
        write_npz(
            &self.dir.join("optimize.npz"),
            state,
            &[("iterations", &iterations)],
            &[],
            &stacks,
        )
    }

    /// `geology-optimized.npz`: the finalized field set.
    fn write_geology(&self, state: &GlacierState) -> GlacierResult<()> {
        let mut fields = Vec::new();
        for name in ["thk", "usurf", "strflowctrl", "arrhenius", "slidingco", "uvelsurf", "vvelsurf"] {
            if let Some(values) = snapshot_field(state, name) {
                fields.push((name.to_string(), values));
            }
        }
        let topg = state.topg.clone().unwrap_or_else(|| &state.usurf - &state.thk);
        fields.push(("topg".to_string(), topg));
        let icemask = state.thk.mapv(|h| if h > FINAL_ICEMASK_THK { 1.0 } else { 0.0 });
        fields.push(("icemask".to_string(), icemask));
        write_npz(
            &self.dir.join("geology-optimized.npz"),
            state,
            &[],
            &fields,
            &[],
        )
    }
}

/// Starts `path` with `header` when `fresh`, otherwise appends.
fn append_table(path: &Path, header: &str, rows: &str, fresh: bool) -> GlacierResult<()> {
    let mut file = if fresh {
        let mut file = File::create(path)?;
        file.write_all(header.as_bytes())?;
        file
    } else {
        OpenOptions::new().append(true).create(true).open(path)?
    };
    file.write_all(rows.as_bytes())?;
    Ok(())
}

fn header_line<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::from("#");
    for name in names {
        let _ = write!(out, " {name:>16}");
    }
    out.push('\n');
    out
}

fn costs_header() -> String {
    header_line(CostBreakdown::NAMES.iter().copied().chain(std::iter::once("TOTAL")))
}

fn residuals_header() -> String {
    header_line(RESIDUAL_NAMES)
}

fn cost_rows(records: &[IterationRecord]) -> String {
    let mut out = String::new();
    for record in records {
        for v in record.costs.as_array().iter().chain(std::iter::once(&record.total)) {
            let _ = write!(out, " {v:16.10}");
        }
        out.push('\n');
    }
    out
}

fn residual_rows(records: &[IterationRecord]) -> String {
    let mut out = String::new();
    for record in records {
        for v in record.residuals.as_array() {
            let _ = write!(out, " {v:16.10}");
        }
        out.push('\n');
    }
    out
}

/// One row per iteration: every cost term, then the total.
pub fn costs_table(history: &InversionHistory) -> String {
    costs_header() + &cost_rows(&history.records)
}

/// One row per iteration: bias and std per observation type.
pub fn residuals_table(history: &InversionHistory) -> String {
    residuals_header() + &residual_rows(&history.records)
}

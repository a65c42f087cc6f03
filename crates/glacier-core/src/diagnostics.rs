// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Diagnostics Recorder
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-iteration residual statistics and the run history.
//!
//! Residuals are taken over cells with `icemask == 1` exactly, which is
//! stricter than the `> 0.5` test used by the cost and the gradient mask.
//! A missing observation type records `(0, 0)` so every series keeps the
//! same length.

use glacier_math::stats::mean_std;
use glacier_types::constants::{ICE_MASK_THRESHOLD, M3_PER_KM3};
use glacier_types::state::{GlacierState, ObservationField};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::cost::CostBreakdown;

/// Bias (mean) and population standard deviation of one residual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualStats {
    pub bias: f64,
    pub std: f64,
}

impl ResidualStats {
    fn from_samples(samples: impl IntoIterator<Item = f64>) -> Self {
        let (bias, std) = mean_std(samples);
        ResidualStats { bias, std }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualDiagnostics {
    /// `thk - thkobs`
    pub thk: ResidualStats,
    /// `|velsurf| - |velsurfobs|`
    pub velsurf: ResidualStats,
    /// `divfluxobs - divflux`
    pub divflux: ResidualStats,
    /// `usurf - usurfobs`
    pub usurf: ResidualStats,
}

impl ResidualDiagnostics {
    /// Flattened as `bias, std` per type: thk, velsurf, divflux, usurf.
    pub fn as_array(&self) -> [f64; 8] {
        [
            self.thk.bias,
            self.thk.std,
            self.velsurf.bias,
            self.velsurf.std,
            self.divflux.bias,
            self.divflux.std,
            self.usurf.bias,
            self.usurf.std,
        ]
    }
}

pub fn velocity_magnitude(u: &Array2<f64>, v: &Array2<f64>) -> Array2<f64> {
    let mut mag = Array2::zeros(u.raw_dim());
    Zip::from(&mut mag)
        .and(u)
        .and(v)
        .for_each(|m, &a, &b| *m = a.hypot(b));
    mag
}

/// Observed speed; NaN where either component is missing.
pub fn observed_speed(u: &ObservationField, v: &ObservationField) -> Array2<f64> {
    let mut mag = velocity_magnitude(&u.values, &v.values);
    Zip::from(&mut mag)
        .and(&u.valid)
        .and(&v.valid)
        .for_each(|m, &vu, &vv| {
            if !(vu && vv) {
                *m = f64::NAN;
            }
        });
    mag
}

/// `sign * (model - obs)` over cells with `icemask == 1` where `obs` is
/// finite.
fn masked_residual(
    model: &Array2<f64>,
    obs: &Array2<f64>,
    icemask: &Array2<f64>,
    sign: f64,
) -> ResidualStats {
    let samples = model
        .iter()
        .zip(obs.iter())
        .zip(icemask.iter())
        .filter(|((m, o), ice)| **ice == 1.0 && o.is_finite() && m.is_finite())
        .map(|((m, o), _)| sign * (m - o));
    ResidualStats::from_samples(samples)
}

/// Residual statistics of the current shadow fields against every
/// observation type.
pub fn compute_residuals(state: &GlacierState) -> ResidualDiagnostics {
    let mask = &state.icemaskobs;
    let mut out = ResidualDiagnostics::default();

    if let Some(obs) = &state.thkobs {
        out.thk = masked_residual(&state.thk, &obs.values, mask, 1.0);
    }

    if let (Some(u_obs), Some(v_obs), Some(u), Some(v)) = (
        &state.uvelsurfobs,
        &state.vvelsurfobs,
        &state.uvelsurf,
        &state.vvelsurf,
    ) {
        let obs = observed_speed(u_obs, v_obs);
        out.velsurf = masked_residual(&velocity_magnitude(u, v), &obs, mask, 1.0);
    }

    if let (Some(obs), Some(div)) = (&state.divfluxobs, &state.divflux) {
        out.divflux = masked_residual(div, &obs.values, mask, -1.0);
    }

    if let Some(obs) = &state.usurfobs {
        out.usurf = masked_residual(&state.usurf, &obs.values, mask, 1.0);
    }

    out
}

/// Scalar snapshot of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub costs: CostBreakdown,
    pub total: f64,
    /// Ice volume before the step, km^3.
    pub volume_km3: f64,
    pub residuals: ResidualDiagnostics,
    /// Wall time of the iteration, seconds.
    pub wall_time_s: f64,
}

/// Append-only record of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InversionHistory {
    pub records: Vec<IterationRecord>,
}

impl InversionHistory {
    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn totals(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.total).collect()
    }

    /// Sum of per-iteration wall times.
    pub fn wall_time_s(&self) -> f64 {
        self.records.iter().map(|r| r.wall_time_s).sum()
    }
}

/// Ice volume of a physical thickness field, km^3.
pub fn ice_volume_km3(thk: &Array2<f64>, dx: f64) -> f64 {
    thk.sum() * dx * dx / M3_PER_KM3
}

/// Final scalars of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InversionSummary {
    pub iterations: usize,
    pub volume_km3: f64,
    /// Over cells with `icemask > 0.5`.
    pub strflowctrl_mean: f64,
    pub strflowctrl_std: f64,
    pub wall_time_s: f64,
}

impl InversionSummary {
    pub fn from_state(state: &GlacierState, iterations: usize, wall_time_s: f64) -> Self {
        let (strflowctrl_mean, strflowctrl_std) = mean_std(
            state
                .strflowctrl
                .iter()
                .zip(state.icemaskobs.iter())
                .filter(|(_, m)| **m > ICE_MASK_THRESHOLD)
                .map(|(s, _)| *s),
        );
        InversionSummary {
            iterations,
            volume_km3: ice_volume_km3(&state.thk, state.grid.dx),
            strflowctrl_mean,
            strflowctrl_std,
            wall_time_s,
        }
    }
}

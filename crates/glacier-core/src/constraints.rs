// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Constraint Enforcer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Hard and soft constraints on the controls.
//!
//! The gradient mask is the hard one: no update ever lands outside the
//! glacierized region. The penalty functions encode equality and sign
//! constraints as heavily weighted squared residuals, so they stay
//! differentiable.

use glacier_types::config::ControlVariable;
use glacier_types::constants::{ICE_MASK_THRESHOLD, PENALTY_WEIGHT};
use glacier_types::state::GlacierState;
use ndarray::{Array2, Zip};

use crate::normalizer::ControlFields;

/// Cells where control updates are allowed (`icemask > 0.5`).
#[derive(Debug, Clone)]
pub struct GradientMask {
    inside: Array2<bool>,
}

impl GradientMask {
    pub fn from_icemask(icemask: &Array2<f64>) -> Self {
        GradientMask {
            inside: icemask.mapv(|m| m > ICE_MASK_THRESHOLD),
        }
    }

    pub fn inside(&self) -> &Array2<bool> {
        &self.inside
    }

    pub fn apply(&self, grad: &mut Array2<f64>) {
        Zip::from(grad).and(&self.inside).for_each(|g, &keep| {
            if !keep {
                *g = 0.0;
            }
        });
    }

    /// Masks the gradient of every listed control.
    pub fn apply_controls(&self, grads: &mut ControlFields, controls: &[ControlVariable]) {
        for &var in controls {
            self.apply(grads.get_mut(var));
        }
    }
}

/// Value and gradients of a penalty with respect to normalized fields.
#[derive(Debug, Clone)]
pub struct Penalty {
    pub value: f64,
    pub grad: Array2<f64>,
}

/// `1e10 * mean((usurf - thk - topg)^2)` over cells with `icemask == 1`
/// and a known bed. Returns the penalty with its gradients on the
/// normalized surface and thickness.
pub fn bed_consistency(
    usurf_n: &Array2<f64>,
    thk_n: &Array2<f64>,
    topg: &Array2<f64>,
    icemask: &Array2<f64>,
    usurf_bound: f64,
    thk_bound: f64,
) -> (f64, Array2<f64>, Array2<f64>) {
    let shape = thk_n.raw_dim();
    let mut residual = Array2::zeros(shape.clone());
    let mut active = 0usize;
    Zip::from(&mut residual)
        .and(usurf_n)
        .and(thk_n)
        .and(topg)
        .and(icemask)
        .for_each(|r, &s, &h, &b, &m| {
            if m == 1.0 && b.is_finite() {
                *r = s * usurf_bound - h * thk_bound - b;
                active += 1;
            }
        });
    if active == 0 {
        return (0.0, Array2::zeros(shape.clone()), Array2::zeros(shape));
    }
    let n = active as f64;
    let value = PENALTY_WEIGHT * residual.iter().map(|r| r * r).sum::<f64>() / n;
    let d = residual.mapv(|r| 2.0 * PENALTY_WEIGHT * r / n);
    let g_usurf = &d * usurf_bound;
    let g_thk = &d * -thk_bound;
    (value, g_usurf, g_thk)
}

/// `1e10 * mean(where(icemask > 0.5, 0, thk^2))` over the whole grid.
pub fn off_mask_thickness(thk_n: &Array2<f64>, icemask: &Array2<f64>) -> Penalty {
    let n = thk_n.len().max(1) as f64;
    let mut grad = Array2::zeros(thk_n.raw_dim());
    let mut value = 0.0;
    Zip::from(&mut grad)
        .and(thk_n)
        .and(icemask)
        .for_each(|g, &h, &m| {
            if m <= ICE_MASK_THRESHOLD {
                value += h * h;
                *g = 2.0 * PENALTY_WEIGHT * h / n;
            }
        });
    Penalty {
        value: PENALTY_WEIGHT * value / n,
        grad,
    }
}

/// `1e10 * mean(where(thk >= 0, 0, thk^2))` over the whole grid.
pub fn thickness_positivity(thk_n: &Array2<f64>) -> Penalty {
    let n = thk_n.len().max(1) as f64;
    let mut value = 0.0;
    let grad = thk_n.mapv(|h| {
        if h < 0.0 {
            value += h * h;
            2.0 * PENALTY_WEIGHT * h / n
        } else {
            0.0
        }
    });
    Penalty {
        value: PENALTY_WEIGHT * value / n,
        grad,
    }
}

/// Zeroes physical thickness below `floor`.
pub fn apply_thickness_floor(thk: &mut Array2<f64>, floor: f64) {
    thk.mapv_inplace(|h| if h < floor { 0.0 } else { h });
}

/// Fixes the bed from the optimized surface and thickness.
pub fn finalize_bed(state: &mut GlacierState) {
    state.topg = Some(&state.usurf - &state.thk);
}

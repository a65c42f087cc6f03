// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Adam Optimizer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Adam over the active control fields.
//!
//! Bias correction is folded into the step size,
//! `lr_t = lr * sqrt(1 - b2^t) / (1 - b1^t)`, with `eps` added to
//! `sqrt(v)` uncorrected. One step counter is shared by all fields.

use glacier_types::config::ControlVariable;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::normalizer::ControlFields;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

impl AdamConfig {
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        AdamConfig {
            learning_rate,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct Moments {
    var: ControlVariable,
    m: Array2<f64>,
    v: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    t: u64,
    moments: Vec<Moments>,
}

impl Adam {
    /// One moment pair per distinct control; repeats are tracked once.
    pub fn new(config: AdamConfig, controls: &[ControlVariable], shape: (usize, usize)) -> Self {
        let mut moments: Vec<Moments> = Vec::with_capacity(controls.len());
        for &var in controls {
            if moments.iter().any(|m| m.var == var) {
                continue;
            }
            moments.push(Moments {
                var,
                m: Array2::zeros(shape),
                v: Array2::zeros(shape),
            });
        }
        Adam {
            config,
            t: 0,
            moments,
        }
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Steps taken so far.
    pub fn iterations(&self) -> u64 {
        self.t
    }

    /// One descent step on every tracked field. Untracked fields of
    /// `params` are left alone.
    pub fn step(&mut self, params: &mut ControlFields, grads: &ControlFields) {
        self.t += 1;
        let c = self.config;
        let t = self.t as f64;
        let lr_t = c.learning_rate * (1.0 - c.beta2.powf(t)).sqrt() / (1.0 - c.beta1.powf(t));

        for mom in &mut self.moments {
            let g = grads.get(mom.var);
            Zip::from(params.get_mut(mom.var))
                .and(&mut mom.m)
                .and(&mut mom.v)
                .and(g)
                .for_each(|p, m, v, &g| {
                    *m = c.beta1 * *m + (1.0 - c.beta1) * g;
                    *v = c.beta2 * *v + (1.0 - c.beta2) * g * g;
                    *p -= lr_t * *m / (v.sqrt() + c.epsilon);
                });
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Cost Assembler
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Composite inversion cost and its gradient.
//!
//! Every term is rebuilt from scratch each iteration; the only state kept
//! across iterations is the affine surface/flux-divergence trend used as
//! the `divfluxfcz` target. Alongside the value, evaluation returns the
//! gradient with respect to the normalized controls that the terms touch
//! directly, and the cotangents on the emulator's physical velocity
//! outputs, which the adapter pulls back through the emulator.

use glacier_math::stats::{l2_loss, linregress, LinearFit};
use glacier_math::stencil::{divflux, divflux_adjoint, forward_differences, forward_differences_adjoint};
use glacier_types::config::{ControlVariable, CostComponent, InversionConfig};
use glacier_types::constants::ICE_MASK_THRESHOLD;
use glacier_types::error::{GlacierError, GlacierResult};
use glacier_types::state::{GlacierState, ObservationField};
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapter::{EmulatorOutputs, OutputCotangents};
use crate::anisotropy::AnisotropicRegularizer;
use crate::constraints::{bed_consistency, off_mask_thickness, thickness_positivity};
use crate::normalizer::{ControlBounds, ControlFields};

/// Value of every cost term for one iteration. Disabled terms are 0.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Surface-velocity misfit.
    pub cost_u: f64,
    /// Thickness-profile misfit.
    pub cost_h: f64,
    /// Flux-divergence misfit.
    pub cost_d: f64,
    /// Surface-elevation misfit.
    pub cost_s: f64,
    /// Bed-consistency penalty.
    pub cost_t: f64,
    /// Off-mask thickness penalty.
    pub cost_o: f64,
    /// Negative-thickness penalty.
    pub cost_hpo: f64,
    /// strflowctrl prior.
    pub cost_str: f64,
    /// Thickness smoothing.
    pub regu_h: f64,
    /// strflowctrl smoothing.
    pub regu_a: f64,
}

impl CostBreakdown {
    pub const NAMES: [&'static str; 10] = [
        "COST_U", "COST_H", "COST_D", "COST_S", "COST_T", "COST_O", "COST_HPO", "COST_STR",
        "REGU_H", "REGU_A",
    ];

    pub fn as_array(&self) -> [f64; 10] {
        [
            self.cost_u,
            self.cost_h,
            self.cost_d,
            self.cost_s,
            self.cost_t,
            self.cost_o,
            self.cost_hpo,
            self.cost_str,
            self.regu_h,
            self.regu_a,
        ]
    }

    /// The six terms shown in the progress log: U, H, D, S, REGU_H, REGU_A.
    pub fn headline(&self) -> [f64; 6] {
        [
            self.cost_u,
            self.cost_h,
            self.cost_d,
            self.cost_s,
            self.regu_h,
            self.regu_a,
        ]
    }

    pub fn total(&self) -> f64 {
        self.as_array().iter().sum()
    }
}

/// Cost value with the gradients needed to finish the backward pass.
#[derive(Debug, Clone)]
pub struct CostEvaluation {
    pub breakdown: CostBreakdown,
    /// Direct gradient with respect to the normalized controls.
    pub grad: ControlFields,
    /// Cotangents on the physical emulator outputs.
    pub cotangents: OutputCotangents,
}

/// `0.5 * mean((r / std)^2)` over the active entries of every residual
/// field, plus `d/dr` for each field.
fn misfit(parts: &[(&Array2<f64>, &Array2<bool>)], std: f64) -> (f64, Vec<Array2<f64>>) {
    let n: usize = parts
        .iter()
        .map(|(_, active)| active.iter().filter(|&&a| a).count())
        .sum();
    if n == 0 {
        let zeros = parts.iter().map(|(r, _)| Array2::zeros(r.raw_dim())).collect();
        return (0.0, zeros);
    }
    let n = n as f64;
    let var = std * std;
    let mut sum = 0.0;
    let grads = parts
        .iter()
        .map(|(residual, active)| {
            let mut g = Array2::zeros(residual.raw_dim());
            Zip::from(&mut g)
                .and(*residual)
                .and(*active)
                .for_each(|g, &r, &a| {
                    if a {
                        sum += r * r;
                        *g = r / (var * n);
                    }
                });
            g
        })
        .collect();
    (0.5 * sum / (var * n), grads)
}

/// `model - obs` where the observation is valid (and `extra` holds), 0
/// elsewhere, with the active set.
fn observed_residual(
    model: &Array2<f64>,
    obs: &ObservationField,
    extra: Option<&Array2<bool>>,
) -> (Array2<f64>, Array2<bool>) {
    let active = match extra {
        Some(inside) => &obs.valid & inside,
        None => obs.valid.clone(),
    };
    let mut residual = Array2::zeros(model.raw_dim());
    Zip::from(&mut residual)
        .and(model)
        .and(&obs.values)
        .and(&active)
        .for_each(|r, &m, &o, &a| {
            if a {
                *r = m - o;
            }
        });
    (residual, active)
}

/// Least-squares `divflux ~ usurf` over the ice.
fn fit_trend(
    iteration: usize,
    usurf: &Array2<f64>,
    div: &Array2<f64>,
    inside: &Array2<bool>,
) -> Option<LinearFit> {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    Zip::from(usurf).and(div).and(inside).for_each(|&s, &d, &ice| {
        if ice {
            xs.push(s);
            ys.push(d);
        }
    });
    let fit = linregress(&xs, &ys);
    if let Some(fit) = fit {
        debug!(
            iteration,
            slope = fit.slope,
            intercept = fit.intercept,
            "Refitted flux-divergence trend"
        );
    }
    fit
}

fn missing(what: &str) -> GlacierError {
    GlacierError::MissingObservation(what.to_string())
}

/// Assembles the ten cost terms. Owns the cached affine trend.
#[derive(Debug, Clone)]
pub struct CostAssembler {
    config: InversionConfig,
    bounds: ControlBounds,
    dx: f64,
    inside: Array2<bool>,
    anisotropic: Option<AnisotropicRegularizer>,
    trend: Option<LinearFit>,
}

impl CostAssembler {
    /// `anisotropic` is required when thickness is a control and the
    /// anisotropy factor differs from 1.
    pub fn new(
        config: &InversionConfig,
        bounds: ControlBounds,
        state: &GlacierState,
        anisotropic: Option<AnisotropicRegularizer>,
    ) -> GlacierResult<Self> {
        if config.has_control(ControlVariable::Thk) && config.is_anisotropic() && anisotropic.is_none() {
            return Err(GlacierError::ConfigError(
                "anisotropic thickness smoothing needs a flow direction".to_string(),
            ));
        }
        Ok(CostAssembler {
            config: config.clone(),
            bounds,
            dx: state.grid.dx,
            inside: state.icemaskobs.mapv(|m| m > ICE_MASK_THRESHOLD),
            anisotropic,
            trend: None,
        })
    }

    /// Last fitted `divflux ~ usurf` trend.
    pub fn trend(&self) -> Option<LinearFit> {
        self.trend
    }

    pub fn evaluate(
        &mut self,
        iteration: usize,
        state: &GlacierState,
        controls: &ControlFields,
        outputs: &EmulatorOutputs,
    ) -> GlacierResult<CostEvaluation> {
        let cfg = &self.config;
        let b = self.bounds;
        let shape = controls.thk.dim();
        let mut bd = CostBreakdown::default();
        let mut grad = ControlFields::zeros(shape);
        let mut cot = OutputCotangents::zeros(shape);

        let thk = controls.thk.mapv(|h| h * b.thk);
        let usurf = controls.usurf.mapv(|s| s * b.usurf);

        if cfg.has_cost(CostComponent::Velsurf) {
            let (u_obs, v_obs) = match (&state.uvelsurfobs, &state.vvelsurfobs) {
                (Some(u), Some(v)) => (u, v),
                _ => return Err(missing("uvelsurfobs/vvelsurfobs")),
            };
            let (ru, au) = observed_residual(outputs.uvelsurf(), u_obs, None);
            let (rv, av) = observed_residual(outputs.vvelsurf(), v_obs, None);
            let (value, g) = misfit(&[(&ru, &au), (&rv, &av)], cfg.velsurfobs_std);
            bd.cost_u = value;
            cot.uvelsurf += &g[0];
            cot.vvelsurf += &g[1];
        }

        if cfg.has_cost(CostComponent::Thk) {
            let obs = state.thkobs.as_ref().ok_or_else(|| missing("thkobs"))?;
            let (r, a) = observed_residual(&thk, obs, None);
            let (value, g) = misfit(&[(&r, &a)], cfg.thkobs_std);
            bd.cost_h = value;
            grad.thk.scaled_add(b.thk, &g[0]);
        }

        if cfg.uses_divflux() {
            let div = divflux(outputs.ubar(), outputs.vbar(), &thk, self.dx);
            let (r, a) = if cfg.has_cost(CostComponent::Divfluxfcz) {
                if self.trend.is_none() || iteration % cfg.divflux_trend_freq == 0 {
                    self.trend = fit_trend(iteration, &usurf, &div, &self.inside);
                }
                let trend = self.trend;
                let mut r = Array2::zeros(shape);
                Zip::from(&mut r)
                    .and(&div)
                    .and(&usurf)
                    .and(&self.inside)
                    .for_each(|r, &d, &s, &inside| {
                        if inside {
                            *r = d - trend.map_or(0.0, |t| t.eval(s));
                        }
                    });
                (r, self.inside.clone())
            } else {
                let obs = state.divfluxobs.as_ref().ok_or_else(|| missing("divfluxobs"))?;
                observed_residual(&div, obs, Some(&self.inside))
            };
            let (value, g) = misfit(&[(&r, &a)], cfg.divfluxobs_std);
            bd.cost_d = value;
            let (g_u, g_v, g_h) = divflux_adjoint(outputs.ubar(), outputs.vbar(), &thk, self.dx, &g[0]);
            cot.ubar += &g_u;
            cot.vbar += &g_v;
            grad.thk.scaled_add(b.thk, &g_h);
        }

        if cfg.has_cost(CostComponent::Usurf) {
            let obs = state.usurfobs.as_ref().ok_or_else(|| missing("usurfobs"))?;
            let (r, a) = observed_residual(&usurf, obs, Some(&self.inside));
            let (value, g) = misfit(&[(&r, &a)], cfg.usurfobs_std);
            bd.cost_s = value;
            grad.usurf.scaled_add(b.usurf, &g[0]);
        }

        if cfg.has_cost(CostComponent::Topg) {
            let topg = state.topg.as_ref().ok_or_else(|| missing("topg"))?;
            let (value, g_s, g_h) = bed_consistency(
                &controls.usurf,
                &controls.thk,
                topg,
                &state.icemaskobs,
                b.usurf,
                b.thk,
            );
            bd.cost_t = value;
            grad.usurf += &g_s;
            grad.thk += &g_h;
        }

        if cfg.has_cost(CostComponent::Icemask) {
            let p = off_mask_thickness(&controls.thk, &state.icemaskobs);
            bd.cost_o = p.value;
            grad.thk += &p.grad;
        }

        if cfg.has_control(ControlVariable::Thk) {
            let p = thickness_positivity(&controls.thk);
            bd.cost_hpo = p.value;
            grad.thk += &p.grad;

            let (value, g) = self.thickness_smoothing(&controls.thk);
            bd.regu_h = value;
            grad.thk += &g;
        }

        if cfg.has_control(ControlVariable::Strflowctrl) {
            let (value, g) = self.strflowctrl_prior(&controls.strflowctrl);
            bd.cost_str = value;
            grad.strflowctrl += &g;

            let (value, g) = self.strflowctrl_smoothing(&controls.strflowctrl);
            bd.regu_a = value;
            grad.strflowctrl += &g;
        }

        Ok(CostEvaluation {
            breakdown: bd,
            grad,
            cotangents: cot,
        })
    }

    fn thickness_smoothing(&self, thk: &Array2<f64>) -> (f64, Array2<f64>) {
        let regu = self.config.regu_param_thk;
        if let Some(reg) = self.anisotropic.as_ref().filter(|_| self.config.is_anisotropic()) {
            return reg.evaluate(thk);
        }
        let (dx, dy) = forward_differences(thk);
        let value = regu * (l2_loss(&dx) + l2_loss(&dy));
        let grad = forward_differences_adjoint(&dx, &dy, thk.dim()) * regu;
        (value, grad)
    }

    fn strflowctrl_prior(&self, s: &Array2<f64>) -> (f64, Array2<f64>) {
        let cfg = &self.config;
        let bound = self.bounds.strflowctrl;
        let n = s.len().max(1) as f64;
        let z = s.mapv(|v| (v * bound - cfg.thr_strflowctrl) / cfg.strflowctrl_std);
        let value = 0.5 * z.iter().map(|v| v * v).sum::<f64>() / n;
        let grad = z.mapv(|v| v * bound / (cfg.strflowctrl_std * n));
        (value, grad)
    }

    /// Squared neighbour differences, kept only where both cells are ice.
    fn strflowctrl_smoothing(&self, s: &Array2<f64>) -> (f64, Array2<f64>) {
        let regu = self.config.regu_param_strflowctrl;
        let (ny, nx) = s.dim();
        let (mut dx, mut dy) = forward_differences(s);
        if nx > 1 {
            let both = &self.inside.slice(s![.., 1..]) & &self.inside.slice(s![.., ..nx - 1]);
            Zip::from(&mut dx).and(&both).for_each(|d, &keep| {
                if !keep {
                    *d = 0.0;
                }
            });
        }
        if ny > 1 {
            let both = &self.inside.slice(s![1.., ..]) & &self.inside.slice(s![..ny - 1, ..]);
            Zip::from(&mut dy).and(&both).for_each(|d, &keep| {
                if !keep {
                    *d = 0.0;
                }
            });
        }
        let value = regu * (l2_loss(&dx) + l2_loss(&dy));
        let grad = forward_differences_adjoint(&dx, &dy, s.dim()) * regu;
        (value, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anisotropy::FlowDirection;
    use glacier_types::state::Grid2D;

    const NY: usize = 7;
    const NX: usize = 8;

    fn bounds() -> ControlBounds {
        ControlBounds {
            thk: 400.0,
            strflowctrl: 150.0,
            usurf: 60.0,
        }
    }

    fn wave(a: f64, b: f64, c: f64) -> Array2<f64> {
        Array2::from_shape_fn((NY, NX), |(j, i)| a + b * ((j as f64 * 0.9 + i as f64 * 0.4 + c).sin()))
    }

    fn state() -> GlacierState {
        let grid = Grid2D::new(NY, NX, 50.0);
        let icemask = Array2::from_shape_fn((NY, NX), |(j, i)| {
            if (1..6).contains(&j) && (1..7).contains(&i) {
                1.0
            } else {
                0.0
            }
        });
        let mut st = GlacierState::new(grid, wave(2500.0, 30.0, 0.0), icemask);
        let mut thkobs = wave(120.0, 20.0, 1.0);
        thkobs[[0, 0]] = f64::NAN;
        thkobs[[3, 3]] = f64::NAN;
        st.thkobs = Some(ObservationField::new(thkobs));
        let mut u = wave(20.0, 8.0, 2.0);
        u[[2, 5]] = f64::NAN;
        st.uvelsurfobs = Some(ObservationField::new(u));
        st.vvelsurfobs = Some(ObservationField::new(wave(-5.0, 4.0, 3.0)));
        st.usurfobs = Some(ObservationField::new(wave(2510.0, 25.0, 0.5)));
        st.topg = Some(wave(2380.0, 10.0, 1.5));
        st.divfluxobs = Some(ObservationField::new(wave(-0.5, 1.0, 2.5)));
        st
    }

    fn controls() -> ControlFields {
        ControlFields {
            thk: wave(0.3, 0.05, 0.2),
            strflowctrl: wave(0.55, 0.1, 0.7),
            usurf: wave(2500.0 / 60.0, 0.4, 0.1),
        }
    }

    fn outputs() -> EmulatorOutputs {
        EmulatorOutputs::from_named(
            ["ubar", "vbar", "uvelsurf", "vvelsurf"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            vec![
                wave(15.0, 5.0, 0.3),
                wave(-3.0, 2.0, 1.3),
                wave(18.0, 6.0, 2.3),
                wave(-4.0, 3.0, 0.8),
            ],
        )
        .unwrap()
    }

    fn config(cost: &[CostComponent], control: &[ControlVariable], factor: f64) -> InversionConfig {
        InversionConfig {
            cost: cost.to_vec(),
            control: control.to_vec(),
            smooth_anisotropy_factor: factor,
            ..InversionConfig::default()
        }
    }

    fn assembler(cfg: &InversionConfig, st: &GlacierState) -> CostAssembler {
        let reg = cfg.is_anisotropic().then(|| {
            let dir = FlowDirection::from_observations(
                st.uvelsurfobs.as_ref().unwrap(),
                st.vvelsurfobs.as_ref().unwrap(),
            );
            AnisotropicRegularizer::new(dir, cfg.regu_param_thk, cfg.smooth_anisotropy_factor, cfg.convexity_weight)
        });
        CostAssembler::new(cfg, bounds(), st, reg).unwrap()
    }

    #[test]
    fn test_disabled_terms_are_exactly_zero() {
        let st = state();
        let cfg = config(&[CostComponent::Thk], &[ControlVariable::Usurf], 1.0);
        let mut ca = assembler(&cfg, &st);
        let ev = ca.evaluate(0, &st, &controls(), &outputs()).unwrap();
        let bd = ev.breakdown;
        assert!(bd.cost_h > 0.0);
        for (name, v) in CostBreakdown::NAMES.iter().zip(bd.as_array()) {
            if *name != "COST_H" {
                assert_eq!(v, 0.0, "{name} should be disabled");
            }
        }
        assert!(ev.cotangents.is_zero());
    }

    #[test]
    fn test_total_is_sum_of_terms() {
        let st = state();
        let cfg = config(
            &[
                CostComponent::Velsurf,
                CostComponent::Thk,
                CostComponent::Divfluxfcz,
                CostComponent::Icemask,
                CostComponent::Topg,
            ],
            &[ControlVariable::Thk, ControlVariable::Strflowctrl],
            0.2,
        );
        let mut ca = assembler(&cfg, &st);
        let bd = ca.evaluate(0, &st, &controls(), &outputs()).unwrap().breakdown;
        let sum: f64 = bd.as_array().iter().sum();
        assert_eq!(bd.total(), sum);
        assert!(bd.as_array().iter().all(|v| v.is_finite()));
        assert!(ca.trend().is_some());
    }

    #[test]
    fn test_velocity_misfit_value() {
        let st = state();
        let cfg = config(&[CostComponent::Velsurf], &[ControlVariable::Usurf], 1.0);
        let mut ca = assembler(&cfg, &st);
        let out = outputs();
        let bd = ca.evaluate(0, &st, &controls(), &out).unwrap().breakdown;

        let mut sum = 0.0;
        let mut n = 0.0;
        let pairs = [
            (out.uvelsurf(), st.uvelsurfobs.as_ref().unwrap()),
            (out.vvelsurf(), st.vvelsurfobs.as_ref().unwrap()),
        ];
        for (model, obs) in pairs {
            for (m, o) in model.iter().zip(obs.values.iter()) {
                if o.is_finite() {
                    sum += ((o - m) / cfg.velsurfobs_std).powi(2);
                    n += 1.0;
                }
            }
        }
        assert_eq!(n, (2 * NY * NX - 1) as f64);
        assert!((bd.cost_u - 0.5 * sum / n).abs() < 1e-12 * bd.cost_u.max(1.0));
    }

    #[test]
    fn test_trend_refit_cadence() {
        let st = state();
        let mut cfg = config(&[CostComponent::Divfluxfcz], &[ControlVariable::Usurf], 1.0);
        cfg.divflux_trend_freq = 3;
        let mut ca = assembler(&cfg, &st);
        let c0 = controls();
        ca.evaluate(0, &st, &c0, &outputs()).unwrap();
        let first = ca.trend().unwrap();

        let mut c1 = c0.clone();
        c1.thk.mapv_inplace(|h| 1.7 * h);
        ca.evaluate(1, &st, &c1, &outputs()).unwrap();
        assert_eq!(ca.trend().unwrap(), first, "trend must be cached between refits");
        ca.evaluate(3, &st, &c1, &outputs()).unwrap();
        assert_ne!(ca.trend().unwrap(), first, "trend refits on the cadence");
    }

    #[test]
    fn test_anisotropic_requires_direction() {
        let st = state();
        let cfg = config(&[CostComponent::Thk], &[ControlVariable::Thk], 0.2);
        assert!(matches!(
            CostAssembler::new(&cfg, bounds(), &st, None),
            Err(GlacierError::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_observation_is_error() {
        let mut st = state();
        st.usurfobs = None;
        let cfg = config(&[CostComponent::Usurf], &[ControlVariable::Usurf], 1.0);
        let mut ca = assembler(&cfg, &st);
        assert!(matches!(
            ca.evaluate(0, &st, &controls(), &outputs()),
            Err(GlacierError::MissingObservation(_))
        ));
    }

    #[test]
    fn test_strflowctrl_smoothing_ignores_mask_edges() {
        let st = state();
        let cfg = config(&[CostComponent::Thk], &[ControlVariable::Strflowctrl], 1.0);
        let ca = assembler(&cfg, &st);
        // a jump entirely outside the mask costs nothing
        let mut s = Array2::from_elem((NY, NX), 0.5);
        s[[0, 0]] = 3.0;
        let (value, grad) = ca.strflowctrl_smoothing(&s);
        assert_eq!(value, 0.0);
        assert!(grad.iter().all(|&g| g == 0.0));
        s[[3, 3]] = 0.7;
        assert!(ca.strflowctrl_smoothing(&s).0 > 0.0);
    }

    fn check_gradient(cost: &[CostComponent], control: &[ControlVariable], factor: f64) {
        check_gradient_at(&state(), &controls(), cost, control, factor);
    }

    fn check_gradient_at(
        st: &GlacierState,
        base: &ControlFields,
        cost: &[CostComponent],
        control: &[ControlVariable],
        factor: f64,
    ) -> CostBreakdown {
        let st = st.clone();
        let base = base.clone();
        let cfg = config(cost, control, factor);
        let out = outputs();
        let mut ca = assembler(&cfg, &st);
        let ev = ca.evaluate(0, &st, &base, &out).unwrap();
        let mut eval = |c: &ControlFields, o: &EmulatorOutputs| ca.evaluate(0, &st, c, o).unwrap().breakdown.total();

        let sample_cells = [(2, 3), (4, 5), (0, 7), (6, 0)];
        for var in ControlVariable::ALL {
            for &(j, i) in &sample_cells {
                let eps = 1e-6 * base.get(var)[[j, i]].abs().max(1.0);
                let mut plus = base.clone();
                plus.get_mut(var)[[j, i]] += eps;
                let mut minus = base.clone();
                minus.get_mut(var)[[j, i]] -= eps;
                let fd = (eval(&plus, &out) - eval(&minus, &out)) / (2.0 * eps);
                let an = ev.grad.get(var)[[j, i]];
                assert!(
                    (fd - an).abs() < 1e-4 * (1.0 + an.abs()),
                    "d/d{}[{j},{i}]: fd={fd}, analytic={an}",
                    var.as_str()
                );
            }
        }

        let cot = [
            ("ubar", &ev.cotangents.ubar),
            ("vbar", &ev.cotangents.vbar),
            ("uvelsurf", &ev.cotangents.uvelsurf),
            ("vvelsurf", &ev.cotangents.vvelsurf),
        ];
        for (k, (name, g)) in cot.iter().enumerate() {
            for &(j, i) in &sample_cells {
                let eps = 1e-5;
                let mut plus = out.clone();
                plus.fields[k][[j, i]] += eps;
                let mut minus = out.clone();
                minus.fields[k][[j, i]] -= eps;
                let fd = (eval(&base, &plus) - eval(&base, &minus)) / (2.0 * eps);
                let an = g[[j, i]];
                assert!(
                    (fd - an).abs() < 1e-4 * (1.0 + an.abs()),
                    "d/d{name}[{j},{i}]: fd={fd}, analytic={an}"
                );
            }
        }
        ev.breakdown
    }

    #[test]
    fn test_gradient_matches_finite_difference_isotropic() {
        check_gradient(
            &[
                CostComponent::Velsurf,
                CostComponent::Thk,
                CostComponent::Usurf,
                CostComponent::Divfluxobs,
            ],
            &ControlVariable::ALL,
            1.0,
        );
    }

    #[test]
    fn test_gradient_matches_finite_difference_anisotropic() {
        check_gradient(
            &[CostComponent::Velsurf, CostComponent::Thk, CostComponent::Divfluxobs],
            &[ControlVariable::Thk, ControlVariable::Strflowctrl],
            0.2,
        );
    }

    #[test]
    fn test_gradient_matches_finite_difference_with_penalties() {
        let mut st = state();
        let mut base = controls();
        let b = bounds();
        // small off-mask thickness everywhere, with negative cells on and
        // off the mask
        for ((j, i), h) in base.thk.indexed_iter_mut() {
            if st.icemaskobs[[j, i]] <= 0.5 {
                *h = 1e-4;
            }
        }
        base.thk[[6, 0]] = 2e-4;
        base.thk[[0, 7]] = -1e-4;
        base.thk[[4, 5]] = -2e-4;
        // bed within a millimetre of usurf - thk
        let surface = base.usurf.mapv(|v| v * b.usurf);
        let thk = base.thk.mapv(|v| v * b.thk);
        st.topg = Some(&(&surface - &thk) + &wave(0.0, 1e-3, 0.9));

        let bd = check_gradient_at(
            &st,
            &base,
            &[
                CostComponent::Velsurf,
                CostComponent::Thk,
                CostComponent::Usurf,
                CostComponent::Topg,
                CostComponent::Icemask,
            ],
            &ControlVariable::ALL,
            1.0,
        );
        assert!(bd.cost_t > 0.0, "bed consistency active");
        assert!(bd.cost_o > 0.0, "off-mask thickness active");
        assert!(bd.cost_hpo > 0.0, "positivity active");
    }
}

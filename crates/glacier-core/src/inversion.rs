// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Optimization Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Optimization driver: `INIT -> ITERATE* -> FINALIZE`.
//!
//! [`Inversion::new`] performs every precondition check, so a run that
//! starts never fails on configuration. Each [`Inversion::step`] runs one
//! emulator pass, assembles the cost, pulls the gradient back to the
//! normalized controls, masks it to the ice, takes one Adam step and
//! refreshes the physical shadow fields. The loop stops at the iteration
//! budget; there is no early stopping.

use std::time::Instant;

use glacier_math::stencil::divflux;
use glacier_ml::emulator::IceFlowEmulator;
use glacier_ml::mapping::{EmulatorMapping, InputLayout};
use glacier_types::config::{ControlVariable, CostComponent, InversionConfig};
use glacier_types::error::{GlacierError, GlacierResult};
use glacier_types::state::{GlacierState, ObservationField};
use ndarray::Array2;
use tracing::{info, warn};

use crate::adapter::{split_strflowctrl, EmulatorAdapter, EmulatorOutputs};
use crate::anisotropy::{AnisotropicRegularizer, FlowDirection};
use crate::constraints::{apply_thickness_floor, finalize_bed, GradientMask};
use crate::cost::{CostAssembler, CostBreakdown};
use crate::diagnostics::{
    compute_residuals, ice_volume_km3, InversionHistory, InversionSummary, IterationRecord,
};
use crate::normalizer::{ControlBounds, ControlFields, FieldNormalizer};
use crate::optimizer::{Adam, AdamConfig};
use crate::output::OutputWriter;

/// Everything a finished run hands back.
#[derive(Debug, Clone)]
pub struct InversionResult {
    pub state: GlacierState,
    pub history: InversionHistory,
    pub summary: InversionSummary,
}

/// Masked gradient of the total cost at the current controls.
struct Gradient {
    breakdown: CostBreakdown,
    grad: ControlFields,
    outputs: EmulatorOutputs,
}

fn missing(what: &str) -> GlacierError {
    GlacierError::MissingObservation(what.to_string())
}

fn require_observed(field: &Option<ObservationField>, name: &str) -> GlacierResult<()> {
    match field {
        Some(obs) if !obs.is_empty() => Ok(()),
        _ => Err(missing(name)),
    }
}

/// Checks every cost term has the data it needs; derives `divfluxobs`
/// from `smb - dhdt` when it is not given.
fn check_observations(config: &InversionConfig, state: &mut GlacierState) -> GlacierResult<()> {
    if config.has_cost(CostComponent::Thk) {
        require_observed(&state.thkobs, "thkobs")?;
    }
    if config.has_cost(CostComponent::Velsurf) {
        require_observed(&state.uvelsurfobs, "uvelsurfobs")?;
        require_observed(&state.vvelsurfobs, "vvelsurfobs")?;
    }
    if config.has_cost(CostComponent::Usurf) {
        require_observed(&state.usurfobs, "usurfobs")?;
    }
    if config.has_cost(CostComponent::Topg) && state.topg.is_none() {
        return Err(missing("topg"));
    }
    if config.has_cost(CostComponent::Divfluxobs) && state.divfluxobs.is_none() {
        match (&state.smb, &state.dhdt) {
            (Some(smb), Some(dhdt)) => {
                state.divfluxobs = Some(ObservationField::new(smb - dhdt));
            }
            _ => return Err(missing("divfluxobs (or smb and dhdt)")),
        }
    }
    if config.has_cost(CostComponent::Divfluxobs) {
        require_observed(&state.divfluxobs, "divfluxobs")?;
    }
    if config.has_control(ControlVariable::Thk)
        && config.is_anisotropic()
        && !state.has_velocity_obs()
    {
        return Err(missing(
            "uvelsurfobs/vvelsurfobs (anisotropic thickness smoothing)",
        ));
    }
    Ok(())
}

pub struct Inversion<E: IceFlowEmulator> {
    config: InversionConfig,
    state: GlacierState,
    bounds: ControlBounds,
    adapter: EmulatorAdapter<E>,
    cost: CostAssembler,
    mask: GradientMask,
    optimizer: Adam,
    controls: ControlFields,
    history: InversionHistory,
    writer: Option<OutputWriter>,
    iteration: usize,
}

impl<E: IceFlowEmulator> Inversion<E> {
    /// INIT: validates the configuration, the emulator mapping and the
    /// observations, then prepares the normalized controls and the
    /// optimizer. Takes ownership of the state for the whole run.
    pub fn new(
        config: InversionConfig,
        mapping: &EmulatorMapping,
        emulator: E,
        mut state: GlacierState,
    ) -> GlacierResult<Self> {
        config.validate()?;
        state.validate_shapes()?;
        let layout = mapping.validate()?;
        let normalizer = FieldNormalizer::for_inversion(mapping, layout, state.grid.dx)?;
        check_observations(&config, &mut state)?;

        let adapter = EmulatorAdapter::new(
            emulator,
            mapping,
            &normalizer,
            &state.grid,
            config.thr_strflowctrl,
        )?;

        let shape = state.grid.shape();
        state.thk = match &state.thkinit {
            Some(thkinit) if !config.init_zero_thk => thkinit.clone(),
            _ => Array2::zeros(shape),
        };
        let controls = normalizer.normalize_controls(&state)?;
        let bounds = normalizer.control_bounds()?;

        let anisotropic = match (&state.uvelsurfobs, &state.vvelsurfobs) {
            (Some(u), Some(v)) if config.is_anisotropic() => Some(AnisotropicRegularizer::new(
                FlowDirection::from_observations(u, v),
                config.regu_param_thk,
                config.smooth_anisotropy_factor,
                config.convexity_weight,
            )),
            _ => None,
        };
        let cost = CostAssembler::new(&config, bounds, &state, anisotropic)?;
        let mask = GradientMask::from_icemask(&state.icemaskobs);
        let optimizer = Adam::new(
            AdamConfig::with_learning_rate(config.step_size),
            &config.control,
            shape,
        );
        let writer = match &config.working_dir {
            Some(dir) => Some(OutputWriter::new(dir, &config.vars_to_save)?),
            None => None,
        };

        let layout_name = match layout {
            InputLayout::Combined => "combined",
            InputLayout::Split => "split",
        };
        info!(
            ny = shape.0,
            nx = shape.1,
            dx = state.grid.dx,
            layout = layout_name,
            controls = ?config.control.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            costs = ?config.cost.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            iterations = config.nbitmax,
            "Inversion initialized"
        );

        Ok(Inversion {
            config,
            state,
            bounds,
            adapter,
            cost,
            mask,
            optimizer,
            controls,
            history: InversionHistory::default(),
            writer,
            iteration: 0,
        })
    }

    pub fn config(&self) -> &InversionConfig {
        &self.config
    }

    pub fn state(&self) -> &GlacierState {
        &self.state
    }

    /// Current normalized controls.
    pub fn controls(&self) -> &ControlFields {
        &self.controls
    }

    pub fn history(&self) -> &InversionHistory {
        &self.history
    }

    pub fn adapter(&self) -> &EmulatorAdapter<E> {
        &self.adapter
    }

    /// Index of the next iteration.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    fn gradient(&mut self) -> GlacierResult<Gradient> {
        let evaluation = self.adapter.forward(&self.controls)?;
        let mut cost =
            self.cost
                .evaluate(self.iteration, &self.state, &self.controls, &evaluation.outputs)?;
        if !cost.cotangents.is_zero() {
            let pulled = self.adapter.backward(&evaluation, &cost.cotangents)?;
            cost.grad += &pulled;
        }
        self.mask.apply_controls(&mut cost.grad, &self.config.control);
        Ok(Gradient {
            breakdown: cost.breakdown,
            grad: cost.grad,
            outputs: evaluation.outputs,
        })
    }

    /// Cost terms and the masked gradient at the current controls,
    /// without stepping.
    pub fn evaluate(&mut self) -> GlacierResult<(CostBreakdown, ControlFields)> {
        let g = self.gradient()?;
        Ok((g.breakdown, g.grad))
    }

    /// One ITERATE step.
    pub fn step(&mut self) -> GlacierResult<IterationRecord> {
        let started = Instant::now();
        let i = self.iteration;
        let volume_km3 = ice_volume_km3(&(&self.controls.thk * self.bounds.thk), self.state.grid.dx);

        let Gradient {
            breakdown,
            grad,
            outputs,
        } = self.gradient()?;

        let report = i % self.config.output_freq == 0;
        if report {
            let [u, h, d, s, regu_h, regu_a] = breakdown.headline();
            info!(
                iteration = i,
                ice_volume_km3 = volume_km3,
                cost_u = u,
                cost_h = h,
                cost_d = d,
                cost_s = s,
                regu_h,
                regu_a,
                "Optimization step"
            );
        }

        self.optimizer.step(&mut self.controls, &grad);
        self.update_shadow_fields(&outputs);

        let record = IterationRecord {
            iteration: i,
            costs: breakdown,
            total: breakdown.total(),
            volume_km3,
            residuals: compute_residuals(&self.state),
            wall_time_s: started.elapsed().as_secs_f64(),
        };
        self.history.push(record.clone());

        if report {
            if let Some(writer) = self.writer.as_mut() {
                if let Err(e) = writer.snapshot(i, &self.state) {
                    warn!(iteration = i, error = %e, "Snapshot not written");
                }
                if let Err(e) = writer.checkpoint(&self.history) {
                    warn!(iteration = i, error = %e, "Diagnostics checkpoint not written");
                }
            }
        }
        self.iteration += 1;
        Ok(record)
    }

    /// Physical fields for downstream consumers after a step. Flux
    /// divergence uses the just-updated thickness.
    fn update_shadow_fields(&mut self, outputs: &EmulatorOutputs) {
        let b = self.bounds;
        for &var in &self.config.control {
            match var {
                ControlVariable::Thk => {
                    let mut thk = &self.controls.thk * b.thk;
                    apply_thickness_floor(&mut thk, self.config.thk_floor);
                    self.state.thk = thk;
                }
                ControlVariable::Strflowctrl => {
                    self.state.strflowctrl = &self.controls.strflowctrl * b.strflowctrl;
                }
                ControlVariable::Usurf => {
                    self.state.usurf = &self.controls.usurf * b.usurf;
                }
            }
        }

        let (arrhenius, slidingco) =
            split_strflowctrl(&self.state.strflowctrl, self.config.thr_strflowctrl);
        self.state.arrhenius = Some(arrhenius);
        self.state.slidingco = Some(slidingco);
        self.state.divflux = Some(divflux(
            outputs.ubar(),
            outputs.vbar(),
            &self.state.thk,
            self.state.grid.dx,
        ));
        self.state.ubar = Some(outputs.ubar().clone());
        self.state.vbar = Some(outputs.vbar().clone());
        self.state.uvelsurf = Some(outputs.uvelsurf().clone());
        self.state.vvelsurf = Some(outputs.vvelsurf().clone());
    }

    /// ITERATE for the full budget, then FINALIZE.
    pub fn run(mut self) -> GlacierResult<InversionResult> {
        while self.iteration < self.config.nbitmax {
            self.step()?;
        }
        Ok(self.finalize())
    }

    /// FINALIZE: fixes the bed as `usurf - thk`, summarizes and writes
    /// the final outputs.
    pub fn finalize(mut self) -> InversionResult {
        finalize_bed(&mut self.state);
        let summary = InversionSummary::from_state(
            &self.state,
            self.history.len(),
            self.history.wall_time_s(),
        );
        info!(
            iterations = summary.iterations,
            volume_km3 = summary.volume_km3,
            strflowctrl_mean = summary.strflowctrl_mean,
            strflowctrl_std = summary.strflowctrl_std,
            wall_time_s = summary.wall_time_s,
            "Inversion finished"
        );
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write_final(&self.state, &self.history, &summary) {
                warn!(dir = %writer.dir().display(), error = %e, "Final outputs not written");
            }
        }
        InversionResult {
            state: self.state,
            history: self.history,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glacier_ml::cnn::ConvEmulator;
    use glacier_types::state::Grid2D;
    use std::collections::BTreeMap;

    fn mapping() -> EmulatorMapping {
        let fieldbounds: BTreeMap<String, f64> = [
            ("thk", 500.0),
            ("slopsurfx", 1.0),
            ("slopsurfy", 1.0),
            ("strflowctrl", 150.0),
            ("ubar", 200.0),
            ("vbar", 200.0),
            ("uvelsurf", 200.0),
            ("vvelsurf", 200.0),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
        EmulatorMapping {
            fieldin: ["thk", "slopsurfx", "slopsurfy", "strflowctrl"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fieldout: ["ubar", "vbar", "uvelsurf", "vvelsurf"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fieldbounds,
            multiple_window_size: 4,
        }
    }

    fn state() -> GlacierState {
        let grid = Grid2D::new(6, 7, 100.0);
        let usurf = Array2::from_shape_fn((6, 7), |(j, i)| 2000.0 + 5.0 * i as f64 + 2.0 * j as f64);
        let icemask = Array2::from_shape_fn((6, 7), |(j, i)| {
            if (1..5).contains(&j) && (1..6).contains(&i) {
                1.0
            } else {
                0.0
            }
        });
        let mut st = GlacierState::new(grid, usurf, icemask);
        st.thkobs = Some(ObservationField::new(Array2::from_elem((6, 7), 80.0)));
        st.uvelsurfobs = Some(ObservationField::new(Array2::from_elem((6, 7), 10.0)));
        st.vvelsurfobs = Some(ObservationField::new(Array2::from_elem((6, 7), 2.0)));
        st
    }

    fn config() -> InversionConfig {
        InversionConfig {
            control: vec![ControlVariable::Thk, ControlVariable::Strflowctrl],
            cost: vec![CostComponent::Velsurf, CostComponent::Thk, CostComponent::Icemask],
            nbitmax: 5,
            step_size: 0.01,
            output_freq: 2,
            ..InversionConfig::default()
        }
    }

    fn emulator() -> ConvEmulator {
        ConvEmulator::random(&[4, 6, 4], 3, 17).unwrap()
    }

    #[test]
    fn test_missing_thickness_observation_rejected() {
        let mut st = state();
        st.thkobs = Some(ObservationField::new(Array2::from_elem((6, 7), f64::NAN)));
        assert!(matches!(
            Inversion::new(config(), &mapping(), emulator(), st),
            Err(GlacierError::MissingObservation(_))
        ));
    }

    #[test]
    fn test_usurf_pairing_rejected() {
        let mut cfg = config();
        cfg.cost.push(CostComponent::Usurf);
        assert!(matches!(
            Inversion::new(cfg, &mapping(), emulator(), state()),
            Err(GlacierError::ConfigError(_))
        ));
    }

    #[test]
    fn test_anisotropic_smoothing_needs_velocities() {
        let mut st = state();
        st.uvelsurfobs = None;
        st.vvelsurfobs = None;
        let mut cfg = config();
        cfg.cost = vec![CostComponent::Thk];
        assert!(matches!(
            Inversion::new(cfg.clone(), &mapping(), emulator(), st.clone()),
            Err(GlacierError::MissingObservation(_))
        ));
        cfg.smooth_anisotropy_factor = 1.0;
        assert!(Inversion::new(cfg, &mapping(), emulator(), st).is_ok());
    }

    #[test]
    fn test_unsupported_layout_rejected_before_loop() {
        let mut m = mapping();
        m.fieldin = vec!["thk".to_string(), "usurf".to_string()];
        assert!(matches!(
            Inversion::new(config(), &m, emulator(), state()),
            Err(GlacierError::UnsupportedLayout { .. })
        ));
    }

    #[test]
    fn test_divflux_observation_derived_from_balance() {
        let mut st = state();
        st.smb = Some(Array2::from_elem((6, 7), 1.5));
        st.dhdt = Some(Array2::from_elem((6, 7), -0.5));
        let mut cfg = config();
        cfg.cost.push(CostComponent::Divfluxobs);
        let inv = Inversion::new(cfg.clone(), &mapping(), emulator(), st.clone()).unwrap();
        let obs = inv.state().divfluxobs.as_ref().unwrap();
        assert!(obs.values.iter().all(|&v| (v - 2.0).abs() < 1e-12));

        st.smb = None;
        assert!(matches!(
            Inversion::new(cfg, &mapping(), emulator(), st),
            Err(GlacierError::MissingObservation(_))
        ));
    }

    #[test]
    fn test_initial_thickness_override() {
        let mut st = state();
        st.thkinit = Some(Array2::from_elem((6, 7), 40.0));
        let inv = Inversion::new(config(), &mapping(), emulator(), st.clone()).unwrap();
        assert!(inv.state().thk.iter().all(|&h| h == 40.0));
        assert!(inv.controls().thk.iter().all(|&h| (h - 0.08).abs() < 1e-15));

        let mut cfg = config();
        cfg.init_zero_thk = true;
        let inv = Inversion::new(cfg, &mapping(), emulator(), st).unwrap();
        assert!(inv.state().thk.iter().all(|&h| h == 0.0));
    }

    #[test]
    fn test_step_records_and_fills_shadow_fields() {
        let mut inv = Inversion::new(config(), &mapping(), emulator(), state()).unwrap();
        let record = inv.step().unwrap();
        assert_eq!(record.iteration, 0);
        assert_eq!(record.total, record.costs.total());
        assert_eq!(inv.iteration(), 1);
        let st = inv.state();
        assert!(st.arrhenius.is_some() && st.slidingco.is_some());
        assert!(st.divflux.is_some() && st.uvelsurf.is_some());
        // thickness moved only inside the mask
        for ((j, i), &m) in st.icemaskobs.indexed_iter() {
            if m <= 0.5 {
                assert_eq!(st.thk[[j, i]], 0.0);
                assert!((st.strflowctrl[[j, i]] - 78.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_checkpoints_written_during_run() {
        let dir = std::env::temp_dir().join(format!(
            "glacier_inversion_checkpoint_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let mut cfg = config();
        cfg.working_dir = Some(dir.clone());
        cfg.vars_to_save = vec!["thk".to_string(), "thk".to_string()];
        let mut inv = Inversion::new(cfg, &mapping(), emulator(), state()).unwrap();
        for _ in 0..3 {
            inv.step().unwrap();
        }
        // output_freq 2: checkpoints after iterations 0 and 2
        let costs = std::fs::read_to_string(dir.join("costs.dat")).unwrap();
        assert_eq!(costs.lines().count(), 4);
        assert_eq!(std::fs::read_to_string(dir.join("rms_std.dat")).unwrap().lines().count(), 4);
        assert!(dir.join("history.json").exists());
        assert!(dir.join("snapshots").join("optimize_000002.npz").exists());
        assert!(!dir.join("optimize.npz").exists());
        assert!(!dir.join("summary.json").exists());

        let result = inv.finalize();
        assert_eq!(result.history.len(), 3);
        assert!(dir.join("optimize.npz").exists());
        assert!(dir.join("summary.json").exists());
        let costs = std::fs::read_to_string(dir.join("costs.dat")).unwrap();
        assert_eq!(costs.lines().count(), 4, "no row written twice");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_run_respects_budget_and_fixes_bed() {
        let inv = Inversion::new(config(), &mapping(), emulator(), state()).unwrap();
        let result = inv.run().unwrap();
        assert_eq!(result.history.len(), 5);
        assert_eq!(result.summary.iterations, 5);
        let topg = result.state.topg.as_ref().unwrap();
        for ((s, h), b) in result.state.usurf.iter().zip(result.state.thk.iter()).zip(topg.iter()) {
            assert_eq!(s - h, *b);
        }
    }
}

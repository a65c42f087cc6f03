// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_STRFLOWCTRL;
use crate::error::{GlacierError, GlacierResult};

/// Observation-driven cost terms that can be switched on by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostComponent {
    /// Surface velocity misfit.
    Velsurf,
    /// Thickness profile misfit.
    Thk,
    /// Top-surface misfit.
    Usurf,
    /// Flux divergence against a fitted affine trend in surface elevation.
    Divfluxfcz,
    /// Flux divergence against `smb - dhdt` (or a supplied field).
    Divfluxobs,
    /// Zero thickness outside the ice mask.
    Icemask,
    /// Surface = bed + thickness consistency.
    Topg,
}

impl CostComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostComponent::Velsurf => "velsurf",
            CostComponent::Thk => "thk",
            CostComponent::Usurf => "usurf",
            CostComponent::Divfluxfcz => "divfluxfcz",
            CostComponent::Divfluxobs => "divfluxobs",
            CostComponent::Icemask => "icemask",
            CostComponent::Topg => "topg",
        }
    }
}

/// Fields the optimizer is allowed to adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlVariable {
    Thk,
    Strflowctrl,
    Usurf,
}

impl ControlVariable {
    pub const ALL: [ControlVariable; 3] = [
        ControlVariable::Thk,
        ControlVariable::Strflowctrl,
        ControlVariable::Usurf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlVariable::Thk => "thk",
            ControlVariable::Strflowctrl => "strflowctrl",
            ControlVariable::Usurf => "usurf",
        }
    }
}

/// Inversion parameters.
/// Keys follow the flat `opti_*` naming of the parameter files, so a
/// parameter file shared with other tools deserializes unchanged; keys
/// this struct does not know are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InversionConfig {
    /// Fields written into each snapshot of the optimization archive.
    #[serde(rename = "opti_vars_to_save", default = "default_vars_to_save")]
    pub vars_to_save: Vec<String>,
    /// strflowctrl prior mean and rheology/sliding split point.
    #[serde(rename = "opti_thr_strflowctrl", default = "default_thr_strflowctrl")]
    pub thr_strflowctrl: f64,
    /// Start from zero thickness even when an initial thickness is given.
    #[serde(rename = "opti_init_zero_thk", default)]
    pub init_zero_thk: bool,
    #[serde(rename = "opti_regu_param_thk", default = "default_regu_param_thk")]
    pub regu_param_thk: f64,
    #[serde(
        rename = "opti_regu_param_strflowctrl",
        default = "default_regu_param_strflowctrl"
    )]
    pub regu_param_strflowctrl: f64,
    /// Cross-flow smoothing weight relative to along-flow; 1 means isotropic.
    #[serde(
        rename = "opti_smooth_anisotropy_factor",
        default = "default_smooth_anisotropy_factor"
    )]
    pub smooth_anisotropy_factor: f64,
    #[serde(rename = "opti_convexity_weight", default = "default_convexity_weight")]
    pub convexity_weight: f64,
    #[serde(rename = "opti_usurfobs_std", default = "default_usurfobs_std")]
    pub usurfobs_std: f64,
    #[serde(rename = "opti_strflowctrl_std", default = "default_strflowctrl_std")]
    pub strflowctrl_std: f64,
    #[serde(rename = "opti_velsurfobs_std", default = "default_velsurfobs_std")]
    pub velsurfobs_std: f64,
    #[serde(rename = "opti_thkobs_std", default = "default_thkobs_std")]
    pub thkobs_std: f64,
    #[serde(rename = "opti_divfluxobs_std", default = "default_divfluxobs_std")]
    pub divfluxobs_std: f64,
    #[serde(rename = "opti_control", default = "default_control")]
    pub control: Vec<ControlVariable>,
    #[serde(rename = "opti_cost", default = "default_cost")]
    pub cost: Vec<CostComponent>,
    /// Accepted for parameter-file compatibility; the loop always runs
    /// `nbitmax` iterations.
    #[serde(rename = "opti_nbitmin", default = "default_nbitmin")]
    pub nbitmin: usize,
    #[serde(rename = "opti_nbitmax", default = "default_nbitmax")]
    pub nbitmax: usize,
    /// Adam learning rate.
    #[serde(rename = "opti_step_size", default = "default_step_size")]
    pub step_size: f64,
    /// Logging and snapshot cadence (iterations).
    #[serde(rename = "opti_output_freq", default = "default_output_freq")]
    pub output_freq: usize,
    /// Refit cadence of the flux-divergence affine trend (iterations).
    #[serde(
        rename = "opti_divflux_trend_freq",
        default = "default_divflux_trend_freq"
    )]
    pub divflux_trend_freq: usize,
    /// Physical thickness (m) below which the updated thickness is zeroed.
    #[serde(rename = "opti_thk_floor", default = "default_thk_floor")]
    pub thk_floor: f64,
    /// Output directory; nothing is persisted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_vars_to_save() -> Vec<String> {
    [
        "topg",
        "usurf",
        "thk",
        "strflowctrl",
        "arrhenius",
        "slidingco",
        "velsurf_mag",
        "velsurfobs_mag",
        "divflux",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_thr_strflowctrl() -> f64 {
    DEFAULT_STRFLOWCTRL
}
fn default_regu_param_thk() -> f64 {
    10.0
}
fn default_regu_param_strflowctrl() -> f64 {
    1.0
}
fn default_smooth_anisotropy_factor() -> f64 {
    0.2
}
fn default_convexity_weight() -> f64 {
    0.002
}
fn default_usurfobs_std() -> f64 {
    5.0
}
fn default_strflowctrl_std() -> f64 {
    5.0
}
fn default_velsurfobs_std() -> f64 {
    3.0
}
fn default_thkobs_std() -> f64 {
    5.0
}
fn default_divfluxobs_std() -> f64 {
    1.0
}
fn default_control() -> Vec<ControlVariable> {
    vec![
        ControlVariable::Thk,
        ControlVariable::Strflowctrl,
        ControlVariable::Usurf,
    ]
}
fn default_cost() -> Vec<CostComponent> {
    vec![
        CostComponent::Velsurf,
        CostComponent::Thk,
        CostComponent::Usurf,
        CostComponent::Divfluxfcz,
        CostComponent::Icemask,
    ]
}
fn default_nbitmin() -> usize {
    50
}
fn default_nbitmax() -> usize {
    1000
}
fn default_step_size() -> f64 {
    0.001
}
fn default_output_freq() -> usize {
    50
}
fn default_divflux_trend_freq() -> usize {
    10
}
fn default_thk_floor() -> f64 {
    0.01
}

impl Default for InversionConfig {
    fn default() -> Self {
        InversionConfig {
            vars_to_save: default_vars_to_save(),
            thr_strflowctrl: default_thr_strflowctrl(),
            init_zero_thk: false,
            regu_param_thk: default_regu_param_thk(),
            regu_param_strflowctrl: default_regu_param_strflowctrl(),
            smooth_anisotropy_factor: default_smooth_anisotropy_factor(),
            convexity_weight: default_convexity_weight(),
            usurfobs_std: default_usurfobs_std(),
            strflowctrl_std: default_strflowctrl_std(),
            velsurfobs_std: default_velsurfobs_std(),
            thkobs_std: default_thkobs_std(),
            divfluxobs_std: default_divfluxobs_std(),
            control: default_control(),
            cost: default_cost(),
            nbitmin: default_nbitmin(),
            nbitmax: default_nbitmax(),
            step_size: default_step_size(),
            output_freq: default_output_freq(),
            divflux_trend_freq: default_divflux_trend_freq(),
            thk_floor: default_thk_floor(),
            working_dir: None,
        }
    }
}

fn require_positive(name: &str, value: f64) -> GlacierResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(GlacierError::ConfigError(format!(
            "{name} must be finite and > 0, got {value}"
        )));
    }
    Ok(())
}

fn require_non_negative(name: &str, value: f64) -> GlacierResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(GlacierError::ConfigError(format!(
            "{name} must be finite and >= 0, got {value}"
        )));
    }
    Ok(())
}

/// First name listed twice, if any.
fn first_duplicate<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = Vec::new();
    for name in names {
        if seen.contains(&name) {
            return Some(name);
        }
        seen.push(name);
    }
    None
}

impl InversionConfig {
    /// Load from a flat JSON parameter file.
    pub fn from_file(path: impl AsRef<Path>) -> GlacierResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn has_cost(&self, term: CostComponent) -> bool {
        self.cost.contains(&term)
    }

    pub fn has_control(&self, var: ControlVariable) -> bool {
        self.control.contains(&var)
    }

    /// Both flux-divergence variants share one cost slot.
    pub fn uses_divflux(&self) -> bool {
        self.has_cost(CostComponent::Divfluxfcz) || self.has_cost(CostComponent::Divfluxobs)
    }

    pub fn is_anisotropic(&self) -> bool {
        self.smooth_anisotropy_factor != 1.0
    }

    /// Checks that need nothing but the parameters themselves.
    pub fn validate(&self) -> GlacierResult<()> {
        let usurf_cost = self.has_cost(CostComponent::Usurf);
        let usurf_control = self.has_control(ControlVariable::Usurf);
        if usurf_cost != usurf_control {
            return Err(GlacierError::ConfigError(format!(
                "usurf must be both a cost term and a control or neither \
                 (cost: {usurf_cost}, control: {usurf_control})"
            )));
        }
        if self.control.is_empty() {
            return Err(GlacierError::ConfigError(
                "opti_control must name at least one control variable".to_string(),
            ));
        }
        if let Some(dup) = first_duplicate(self.control.iter().map(|c| c.as_str())) {
            return Err(GlacierError::ConfigError(format!(
                "opti_control lists '{dup}' more than once"
            )));
        }
        if let Some(dup) = first_duplicate(self.cost.iter().map(|c| c.as_str())) {
            return Err(GlacierError::ConfigError(format!(
                "opti_cost lists '{dup}' more than once"
            )));
        }

        require_positive("opti_usurfobs_std", self.usurfobs_std)?;
        require_positive("opti_strflowctrl_std", self.strflowctrl_std)?;
        require_positive("opti_velsurfobs_std", self.velsurfobs_std)?;
        require_positive("opti_thkobs_std", self.thkobs_std)?;
        require_positive("opti_divfluxobs_std", self.divfluxobs_std)?;
        require_positive("opti_step_size", self.step_size)?;
        require_non_negative("opti_regu_param_thk", self.regu_param_thk)?;
        require_non_negative("opti_regu_param_strflowctrl", self.regu_param_strflowctrl)?;
        require_non_negative("opti_smooth_anisotropy_factor", self.smooth_anisotropy_factor)?;
        require_non_negative("opti_convexity_weight", self.convexity_weight)?;
        require_non_negative("opti_thk_floor", self.thk_floor)?;
        if !self.thr_strflowctrl.is_finite() {
            return Err(GlacierError::ConfigError(format!(
                "opti_thr_strflowctrl must be finite, got {}",
                self.thr_strflowctrl
            )));
        }

        if self.nbitmax == 0 {
            return Err(GlacierError::ConfigError(
                "opti_nbitmax must be >= 1".to_string(),
            ));
        }
        if self.output_freq == 0 {
            return Err(GlacierError::ConfigError(
                "opti_output_freq must be >= 1".to_string(),
            ));
        }
        if self.divflux_trend_freq == 0 {
            return Err(GlacierError::ConfigError(
                "opti_divflux_trend_freq must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_path(relative: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("configs")
            .join(relative)
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let cfg: InversionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.nbitmax, 1000);
        assert_eq!(cfg.output_freq, 50);
        assert_eq!(cfg.divflux_trend_freq, 10);
        assert!((cfg.step_size - 0.001).abs() < 1e-15);
        assert!((cfg.thr_strflowctrl - 78.0).abs() < 1e-12);
        assert_eq!(cfg.control, default_control());
        assert_eq!(cfg.cost, default_cost());
        assert_eq!(cfg.vars_to_save.len(), 9);
        assert!(cfg.working_dir.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_example_params() {
        let cfg = InversionConfig::from_file(config_path("inversion_params.json")).unwrap();
        assert_eq!(cfg.control, vec![ControlVariable::Thk, ControlVariable::Strflowctrl]);
        assert!(cfg.has_cost(CostComponent::Velsurf));
        assert!(cfg.has_cost(CostComponent::Icemask));
        assert!(!cfg.has_cost(CostComponent::Usurf));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let json = r#"{"modules_process": ["iceflow"], "opti_nbitmax": 7}"#;
        let cfg: InversionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.nbitmax, 7);
    }

    #[test]
    fn test_unknown_cost_name_rejected() {
        let json = r#"{"opti_cost": ["velsurf", "magic"]}"#;
        let result: Result<InversionConfig, _> = serde_json::from_str(json);
        assert!(result.is_err(), "unknown cost term must fail to parse");
    }

    #[test]
    fn test_usurf_cost_without_control_rejected() {
        let cfg = InversionConfig {
            control: vec![ControlVariable::Thk],
            cost: vec![CostComponent::Usurf],
            ..InversionConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        match err {
            GlacierError::ConfigError(msg) => assert!(msg.contains("usurf")),
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let cfg = InversionConfig {
            control: vec![ControlVariable::Thk, ControlVariable::Thk],
            cost: vec![CostComponent::Thk],
            ..InversionConfig::default()
        };
        match cfg.validate().unwrap_err() {
            GlacierError::ConfigError(msg) => assert!(msg.contains("opti_control"), "{msg}"),
            other => panic!("Unexpected error: {other:?}"),
        }

        let cfg = InversionConfig {
            control: vec![ControlVariable::Thk],
            cost: vec![CostComponent::Thk, CostComponent::Velsurf, CostComponent::Thk],
            ..InversionConfig::default()
        };
        match cfg.validate().unwrap_err() {
            GlacierError::ConfigError(msg) => assert!(msg.contains("opti_cost"), "{msg}"),
            other => panic!("Unexpected error: {other:?}"),
        }

        let json = r#"{"opti_control": ["thk", "thk"], "opti_cost": ["thk"]}"#;
        let cfg: InversionConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_usurf_control_without_cost_rejected() {
        let cfg = InversionConfig {
            control: vec![ControlVariable::Usurf],
            cost: vec![CostComponent::Velsurf],
            ..InversionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(GlacierError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_invalid_numbers() {
        let bad = [
            InversionConfig {
                thkobs_std: 0.0,
                ..InversionConfig::default()
            },
            InversionConfig {
                velsurfobs_std: f64::NAN,
                ..InversionConfig::default()
            },
            InversionConfig {
                step_size: -1.0,
                ..InversionConfig::default()
            },
            InversionConfig {
                regu_param_thk: -0.1,
                ..InversionConfig::default()
            },
            InversionConfig {
                nbitmax: 0,
                ..InversionConfig::default()
            },
            InversionConfig {
                output_freq: 0,
                ..InversionConfig::default()
            },
            InversionConfig {
                divflux_trend_freq: 0,
                ..InversionConfig::default()
            },
        ];
        for cfg in &bad {
            assert!(
                matches!(cfg.validate(), Err(GlacierError::ConfigError(_))),
                "expected ConfigError for {cfg:?}"
            );
        }
    }

    #[test]
    fn test_roundtrip_serialization() {
        let cfg = InversionConfig {
            working_dir: Some(PathBuf::from("out")),
            ..InversionConfig::default()
        };
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        assert!(json.contains("opti_regu_param_thk"));
        let cfg2: InversionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.cost, cfg2.cost);
        assert_eq!(cfg.control, cfg2.control);
        assert_eq!(cfg2.working_dir, Some(PathBuf::from("out")));
    }
}

// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Weight of the soft-penalty terms standing in for hard constraints.
pub const PENALTY_WEIGHT: f64 = 1.0e10;

/// Ice-mask threshold: cells with mask > 0.5 are glacierized.
pub const ICE_MASK_THRESHOLD: f64 = 0.5;

/// Default strflowctrl value and split threshold (rheology vs sliding).
pub const DEFAULT_STRFLOWCTRL: f64 = 78.0;

/// Gaussian smoothing of the observed flow direction (grid cells).
pub const FLOW_DIRECTION_SIGMA: f64 = 3.0;

/// Gaussian kernel half-width in units of sigma.
pub const FLOW_DIRECTION_TRUNCATE: f64 = 4.0;

/// m^3 per km^3
pub const M3_PER_KM3: f64 = 1.0e9;

/// Thickness above which a cell counts as ice in the final geology.
pub const FINAL_ICEMASK_THK: f64 = 1.0;

/// Emulator outputs the inversion cannot run without.
pub const REQUIRED_OUTPUTS: [&str; 4] = ["ubar", "vbar", "uvelsurf", "vvelsurf"];

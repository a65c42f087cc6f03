// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use ndarray::{Array1, Array2};

use crate::constants::DEFAULT_STRFLOWCTRL;
use crate::error::{GlacierError, GlacierResult};

/// Uniform 2D grid. Arrays are [ny, nx]: rows follow y, columns follow x.
#[derive(Debug, Clone)]
pub struct Grid2D {
    pub ny: usize,
    pub nx: usize,
    pub dx: f64,
    pub x: Array1<f64>, // [nx]
    pub y: Array1<f64>, // [ny]
}

impl Grid2D {
    /// Grid with origin at (0, 0) and square cells of size `dx`.
    pub fn new(ny: usize, nx: usize, dx: f64) -> Self {
        let x = Array1::from_shape_fn(nx, |i| i as f64 * dx);
        let y = Array1::from_shape_fn(ny, |j| j as f64 * dx);
        Grid2D { ny, nx, dx, x, y }
    }

    /// Grid from coordinate vectors; spacing is taken from `x`.
    pub fn from_coords(x: Array1<f64>, y: Array1<f64>) -> GlacierResult<Self> {
        if x.len() < 2 || y.is_empty() {
            return Err(GlacierError::ConfigError(format!(
                "grid needs at least 2 x coordinates and 1 y coordinate, got {} and {}",
                x.len(),
                y.len()
            )));
        }
        let dx = x[1] - x[0];
        if !dx.is_finite() || dx <= 0.0 {
            return Err(GlacierError::ConfigError(format!(
                "grid spacing must be finite and > 0, got {dx}"
            )));
        }
        Ok(Grid2D {
            ny: y.len(),
            nx: x.len(),
            dx,
            x,
            y,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    pub fn cell_area(&self) -> f64 {
        self.dx * self.dx
    }

    /// Every field of a run must share the grid shape.
    pub fn check_shape(&self, field: &str, values: &Array2<f64>) -> GlacierResult<()> {
        let got = values.dim();
        if got != self.shape() {
            return Err(GlacierError::ShapeMismatch {
                field: field.to_string(),
                expected: self.shape(),
                got,
            });
        }
        Ok(())
    }
}

/// Gridded observation with NaN marking unobserved cells.
#[derive(Debug, Clone)]
pub struct ObservationField {
    pub values: Array2<f64>,
    pub valid: Array2<bool>,
}

impl ObservationField {
    pub fn new(values: Array2<f64>) -> Self {
        let valid = values.mapv(|v| !v.is_nan());
        ObservationField { values, valid }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// True when no cell carries data.
    pub fn is_empty(&self) -> bool {
        !self.valid.iter().any(|&v| v)
    }

    /// Copy with missing cells replaced by `fill`.
    pub fn filled(&self, fill: f64) -> Array2<f64> {
        self.values.mapv(|v| if v.is_nan() { fill } else { v })
    }
}

/// Everything one inversion run reads and writes.
///
/// Inputs are set before the run; the `Option` outputs (emulator fields,
/// flux divergence, rheology/sliding split) are filled by the driver.
#[derive(Debug, Clone)]
pub struct GlacierState {
    pub grid: Grid2D,
    /// Top surface elevation (m).
    pub usurf: Array2<f64>,
    /// Ice mask, glacierized where > 0.5.
    pub icemaskobs: Array2<f64>,
    /// Ice thickness (m).
    pub thk: Array2<f64>,
    /// Lumped rheology/sliding control.
    pub strflowctrl: Array2<f64>,
    /// Bed elevation (m). Input for the consistency term, output after finalization.
    pub topg: Option<Array2<f64>>,
    pub thkinit: Option<Array2<f64>>,
    pub thkobs: Option<ObservationField>,
    pub usurfobs: Option<ObservationField>,
    pub uvelsurfobs: Option<ObservationField>,
    pub vvelsurfobs: Option<ObservationField>,
    /// Surface mass balance (m/y).
    pub smb: Option<Array2<f64>>,
    /// Observed thinning rate (m/y).
    pub dhdt: Option<Array2<f64>>,
    pub divfluxobs: Option<ObservationField>,

    pub arrhenius: Option<Array2<f64>>,
    pub slidingco: Option<Array2<f64>>,
    pub ubar: Option<Array2<f64>>,
    pub vbar: Option<Array2<f64>>,
    pub uvelsurf: Option<Array2<f64>>,
    pub vvelsurf: Option<Array2<f64>>,
    pub divflux: Option<Array2<f64>>,
}

impl GlacierState {
    /// Minimal state: zero thickness, default strflowctrl, no observations.
    pub fn new(grid: Grid2D, usurf: Array2<f64>, icemaskobs: Array2<f64>) -> Self {
        let shape = grid.shape();
        GlacierState {
            grid,
            usurf,
            icemaskobs,
            thk: Array2::zeros(shape),
            strflowctrl: Array2::from_elem(shape, DEFAULT_STRFLOWCTRL),
            topg: None,
            thkinit: None,
            thkobs: None,
            usurfobs: None,
            uvelsurfobs: None,
            vvelsurfobs: None,
            smb: None,
            dhdt: None,
            divfluxobs: None,
            arrhenius: None,
            slidingco: None,
            ubar: None,
            vbar: None,
            uvelsurf: None,
            vvelsurf: None,
            divflux: None,
        }
    }

    /// Both surface-velocity components are present.
    pub fn has_velocity_obs(&self) -> bool {
        self.uvelsurfobs.is_some() && self.vvelsurfobs.is_some()
    }

    /// Shape check of every populated field against the grid.
    pub fn validate_shapes(&self) -> GlacierResult<()> {
        let grid = &self.grid;
        grid.check_shape("usurf", &self.usurf)?;
        grid.check_shape("icemaskobs", &self.icemaskobs)?;
        grid.check_shape("thk", &self.thk)?;
        grid.check_shape("strflowctrl", &self.strflowctrl)?;

        let plain = [
            ("topg", &self.topg),
            ("thkinit", &self.thkinit),
            ("smb", &self.smb),
            ("dhdt", &self.dhdt),
        ];
        for (name, field) in plain {
            if let Some(values) = field {
                grid.check_shape(name, values)?;
            }
        }

        let observed = [
            ("thkobs", &self.thkobs),
            ("usurfobs", &self.usurfobs),
            ("uvelsurfobs", &self.uvelsurfobs),
            ("vvelsurfobs", &self.vvelsurfobs),
            ("divfluxobs", &self.divfluxobs),
        ];
        for (name, field) in observed {
            if let Some(obs) = field {
                grid.check_shape(name, &obs.values)?;
            }
        }
        Ok(())
    }
}

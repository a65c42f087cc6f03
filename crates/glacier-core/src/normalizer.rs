// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Field Normalizer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-field scaling between physical units and the dimensionless ranges
//! the emulator was trained on, plus the normalized control triple the
//! optimizer works on.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use glacier_ml::mapping::{EmulatorMapping, InputLayout};
use glacier_types::config::ControlVariable;
use glacier_types::error::{GlacierError, GlacierResult};
use glacier_types::state::GlacierState;
use ndarray::Array2;

#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    bounds: BTreeMap<String, f64>,
}

fn check_bound(name: &str, value: f64) -> GlacierResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(GlacierError::InvalidBound {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

impl FieldNormalizer {
    /// Every bound must be finite and strictly positive.
    pub fn new(bounds: BTreeMap<String, f64>) -> GlacierResult<Self> {
        for (name, &value) in &bounds {
            check_bound(name, value)?;
        }
        Ok(FieldNormalizer { bounds })
    }

    /// Bounds for an inversion on a grid of spacing `dx`.
    ///
    /// Adds the derived entries the emulator does not ship: `strflowctrl`
    /// as `arrhenius + slidingco` for the split layout, and `usurf` as
    /// `slopsurfx * dx`.
    pub fn for_inversion(
        mapping: &EmulatorMapping,
        layout: InputLayout,
        dx: f64,
    ) -> GlacierResult<Self> {
        let mut normalizer = Self::new(mapping.fieldbounds.clone())?;
        for name in mapping.fieldin.iter().chain(mapping.fieldout.iter()) {
            normalizer.bound(name)?;
        }
        if layout == InputLayout::Split {
            normalizer.insert_sum("strflowctrl", &["arrhenius", "slidingco"])?;
        }
        let usurf = normalizer.bound("slopsurfx")? * dx;
        normalizer.insert("usurf", usurf)?;
        Ok(normalizer)
    }

    pub fn insert(&mut self, name: &str, value: f64) -> GlacierResult<()> {
        check_bound(name, value)?;
        self.bounds.insert(name.to_string(), value);
        Ok(())
    }

    /// Bound of a combined field: the sum of its constituents' bounds.
    pub fn insert_sum(&mut self, name: &str, constituents: &[&str]) -> GlacierResult<()> {
        let mut total = 0.0;
        for part in constituents {
            total += self.bound(part)?;
        }
        self.insert(name, total)
    }

    pub fn bound(&self, name: &str) -> GlacierResult<f64> {
        self.bounds
            .get(name)
            .copied()
            .ok_or_else(|| GlacierError::InvalidBound {
                name: name.to_string(),
                value: f64::NAN,
            })
    }

    pub fn normalize(&self, field: &Array2<f64>, name: &str) -> GlacierResult<Array2<f64>> {
        let b = self.bound(name)?;
        Ok(field / b)
    }

    pub fn denormalize(&self, field: &Array2<f64>, name: &str) -> GlacierResult<Array2<f64>> {
        let b = self.bound(name)?;
        Ok(field * b)
    }

    pub fn control_bounds(&self) -> GlacierResult<ControlBounds> {
        Ok(ControlBounds {
            thk: self.bound("thk")?,
            strflowctrl: self.bound("strflowctrl")?,
            usurf: self.bound("usurf")?,
        })
    }

    /// Normalized controls from the physical state fields.
    pub fn normalize_controls(&self, state: &GlacierState) -> GlacierResult<ControlFields> {
        Ok(ControlFields {
            thk: self.normalize(&state.thk, "thk")?,
            strflowctrl: self.normalize(&state.strflowctrl, "strflowctrl")?,
            usurf: self.normalize(&state.usurf, "usurf")?,
        })
    }
}

/// Scale factors of the three control fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlBounds {
    pub thk: f64,
    pub strflowctrl: f64,
    pub usurf: f64,
}

impl ControlBounds {
    pub fn get(&self, var: ControlVariable) -> f64 {
        match var {
            ControlVariable::Thk => self.thk,
            ControlVariable::Strflowctrl => self.strflowctrl,
            ControlVariable::Usurf => self.usurf,
        }
    }
}

/// One array per control field. Holds normalized values or their gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFields {
    pub thk: Array2<f64>,
    pub strflowctrl: Array2<f64>,
    pub usurf: Array2<f64>,
}

impl ControlFields {
    pub fn zeros(shape: (usize, usize)) -> Self {
        ControlFields {
            thk: Array2::zeros(shape),
            strflowctrl: Array2::zeros(shape),
            usurf: Array2::zeros(shape),
        }
    }

    pub fn get(&self, var: ControlVariable) -> &Array2<f64> {
        match var {
            ControlVariable::Thk => &self.thk,
            ControlVariable::Strflowctrl => &self.strflowctrl,
            ControlVariable::Usurf => &self.usurf,
        }
    }

    pub fn get_mut(&mut self, var: ControlVariable) -> &mut Array2<f64> {
        match var {
            ControlVariable::Thk => &mut self.thk,
            ControlVariable::Strflowctrl => &mut self.strflowctrl,
            ControlVariable::Usurf => &mut self.usurf,
        }
    }
}

impl AddAssign<&ControlFields> for ControlFields {
    fn add_assign(&mut self, rhs: &ControlFields) {
        self.thk += &rhs.thk;
        self.strflowctrl += &rhs.strflowctrl;
        self.usurf += &rhs.usurf;
    }
}

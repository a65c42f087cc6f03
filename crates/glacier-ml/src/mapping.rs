// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Emulator Field Mapping
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Channel names, normalization bounds and padding convention shipped
//! alongside a trained emulator.

use std::collections::BTreeMap;
use std::path::Path;

use glacier_types::constants::REQUIRED_OUTPUTS;
use glacier_types::error::{GlacierError, GlacierResult};
use serde::{Deserialize, Serialize};

const COMBINED_FIELDIN: [&str; 4] = ["thk", "slopsurfx", "slopsurfy", "strflowctrl"];
const SPLIT_FIELDIN: [&str; 5] = ["thk", "slopsurfx", "slopsurfy", "arrhenius", "slidingco"];

/// The two input orderings the inversion knows how to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// `[thk, slopsurfx, slopsurfy, strflowctrl]`
    Combined,
    /// `[thk, slopsurfx, slopsurfy, arrhenius, slidingco]`
    Split,
}

impl InputLayout {
    pub fn from_fieldin(fieldin: &[String]) -> GlacierResult<Self> {
        let names: Vec<&str> = fieldin.iter().map(String::as_str).collect();
        if names == COMBINED_FIELDIN {
            Ok(InputLayout::Combined)
        } else if names == SPLIT_FIELDIN {
            Ok(InputLayout::Split)
        } else {
            Err(GlacierError::UnsupportedLayout {
                fieldin: fieldin.to_vec(),
            })
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            InputLayout::Combined => COMBINED_FIELDIN.len(),
            InputLayout::Split => SPLIT_FIELDIN.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorMapping {
    pub fieldin: Vec<String>,
    pub fieldout: Vec<String>,
    pub fieldbounds: BTreeMap<String, f64>,
    /// Padded sizes must be multiples of this; 0 disables padding.
    #[serde(default)]
    pub multiple_window_size: usize,
}

impl EmulatorMapping {
    pub fn from_file(path: impl AsRef<Path>) -> GlacierResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mapping: Self = serde_json::from_str(&contents)?;
        Ok(mapping)
    }

    pub fn layout(&self) -> GlacierResult<InputLayout> {
        InputLayout::from_fieldin(&self.fieldin)
    }

    /// Position of a named output channel.
    pub fn output_index(&self, name: &str) -> GlacierResult<usize> {
        self.fieldout
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| GlacierError::MissingOutput(name.to_string()))
    }

    /// Layout is supported and the velocity outputs are declared.
    pub fn validate(&self) -> GlacierResult<InputLayout> {
        let layout = self.layout()?;
        for name in REQUIRED_OUTPUTS {
            self.output_index(name)?;
        }
        Ok(layout)
    }

    /// Zero padding appended at the bottom and right of a `(ny, nx)` grid.
    pub fn padding(&self, shape: (usize, usize)) -> (usize, usize) {
        let m = self.multiple_window_size;
        if m == 0 {
            return (0, 0);
        }
        let pad = |n: usize| (m - n % m) % m;
        (pad(shape.0), pad(shape.1))
    }

    pub fn padded_shape(&self, shape: (usize, usize)) -> (usize, usize) {
        let (py, px) = self.padding(shape);
        (shape.0 + py, shape.1 + px)
    }
}

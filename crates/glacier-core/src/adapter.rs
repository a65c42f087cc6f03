// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Emulator Adapter
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Builds the emulator input from the normalized controls, runs one
//! forward pass and unpacks the named outputs in physical units.
//!
//! The backward pass walks the same chain in reverse: output cotangents
//! are scaled by the output bounds, padded, pulled through the emulator's
//! vector-Jacobian product, cropped, then routed to the controls. Slope
//! channels go through the transposed gradient stencil onto `usurf`; the
//! rheology and sliding channels of the split layout fold back onto
//! `strflowctrl` on their side of the threshold.

use glacier_math::stencil::{gradient_2d, gradient_2d_adjoint};
use glacier_ml::emulator::IceFlowEmulator;
use glacier_ml::mapping::{EmulatorMapping, InputLayout};
use glacier_types::constants::REQUIRED_OUTPUTS;
use glacier_types::error::{GlacierError, GlacierResult};
use glacier_types::state::Grid2D;
use ndarray::{s, Array2, Array3};

use crate::normalizer::{ControlFields, FieldNormalizer};

/// Emulator outputs cropped to the grid, in physical units.
#[derive(Debug, Clone)]
pub struct EmulatorOutputs {
    pub names: Vec<String>,
    pub fields: Vec<Array2<f64>>,
    velocity_index: [usize; 4],
}

impl EmulatorOutputs {
    /// Pairs each field with its channel name; the four velocity channels
    /// must all be present.
    pub fn from_named(names: Vec<String>, fields: Vec<Array2<f64>>) -> GlacierResult<Self> {
        if names.len() != fields.len() {
            return Err(GlacierError::ConfigError(format!(
                "{} output names for {} output fields",
                names.len(),
                fields.len()
            )));
        }
        let mut velocity_index = [0usize; 4];
        for (slot, required) in velocity_index.iter_mut().zip(REQUIRED_OUTPUTS) {
            *slot = names
                .iter()
                .position(|n| n == required)
                .ok_or_else(|| GlacierError::MissingOutput(required.to_string()))?;
        }
        Ok(EmulatorOutputs {
            names,
            fields,
            velocity_index,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|k| &self.fields[k])
    }

    pub fn ubar(&self) -> &Array2<f64> {
        &self.fields[self.velocity_index[0]]
    }

    pub fn vbar(&self) -> &Array2<f64> {
        &self.fields[self.velocity_index[1]]
    }

    pub fn uvelsurf(&self) -> &Array2<f64> {
        &self.fields[self.velocity_index[2]]
    }

    pub fn vvelsurf(&self) -> &Array2<f64> {
        &self.fields[self.velocity_index[3]]
    }
}

/// Cotangents of the cost with respect to the physical velocity outputs.
#[derive(Debug, Clone)]
pub struct OutputCotangents {
    pub ubar: Array2<f64>,
    pub vbar: Array2<f64>,
    pub uvelsurf: Array2<f64>,
    pub vvelsurf: Array2<f64>,
}

impl OutputCotangents {
    pub fn zeros(shape: (usize, usize)) -> Self {
        OutputCotangents {
            ubar: Array2::zeros(shape),
            vbar: Array2::zeros(shape),
            uvelsurf: Array2::zeros(shape),
            vvelsurf: Array2::zeros(shape),
        }
    }

    pub fn is_zero(&self) -> bool {
        [&self.ubar, &self.vbar, &self.uvelsurf, &self.vvelsurf]
            .iter()
            .all(|a| a.iter().all(|&v| v == 0.0))
    }
}

/// One forward pass, with what the backward pass needs.
#[derive(Debug)]
pub struct EmulatorEvaluation<T> {
    pub outputs: EmulatorOutputs,
    trace: T,
    /// Split layout only: cells where strflowctrl feeds the rheology channel.
    below_threshold: Option<Array2<bool>>,
}

#[derive(Debug, Clone, Copy)]
struct ChannelBounds {
    usurf: f64,
    slopsurfx: f64,
    slopsurfy: f64,
    strflowctrl: f64,
}

pub struct EmulatorAdapter<E: IceFlowEmulator> {
    emulator: E,
    layout: InputLayout,
    grid_shape: (usize, usize),
    padded_shape: (usize, usize),
    dx: f64,
    /// strflowctrl threshold in normalized units.
    threshold: f64,
    bounds: ChannelBounds,
    output_names: Vec<String>,
    output_bounds: Vec<f64>,
    velocity_index: [usize; 4],
}

impl<E: IceFlowEmulator> EmulatorAdapter<E> {
    pub fn new(
        emulator: E,
        mapping: &EmulatorMapping,
        normalizer: &FieldNormalizer,
        grid: &Grid2D,
        thr_strflowctrl: f64,
    ) -> GlacierResult<Self> {
        let layout = mapping.validate()?;
        if emulator.input_channels() != layout.channels() {
            return Err(GlacierError::ConfigError(format!(
                "emulator takes {} input channels, mapping declares {}",
                emulator.input_channels(),
                layout.channels()
            )));
        }
        if emulator.output_channels() != mapping.fieldout.len() {
            return Err(GlacierError::ConfigError(format!(
                "emulator gives {} output channels, mapping declares {}",
                emulator.output_channels(),
                mapping.fieldout.len()
            )));
        }
        let bounds = ChannelBounds {
            usurf: normalizer.bound("usurf")?,
            slopsurfx: normalizer.bound("slopsurfx")?,
            slopsurfy: normalizer.bound("slopsurfy")?,
            strflowctrl: normalizer.bound("strflowctrl")?,
        };
        let output_bounds = mapping
            .fieldout
            .iter()
            .map(|name| {
                normalizer
                    .bound(name)
                    .map_err(|_| GlacierError::MissingOutput(format!("{name} has no bound")))
            })
            .collect::<GlacierResult<Vec<f64>>>()?;
        let velocity_index = [
            mapping.output_index("ubar")?,
            mapping.output_index("vbar")?,
            mapping.output_index("uvelsurf")?,
            mapping.output_index("vvelsurf")?,
        ];
        Ok(EmulatorAdapter {
            emulator,
            layout,
            grid_shape: grid.shape(),
            padded_shape: mapping.padded_shape(grid.shape()),
            dx: grid.dx,
            threshold: thr_strflowctrl / bounds.strflowctrl,
            bounds,
            output_names: mapping.fieldout.clone(),
            output_bounds,
            velocity_index,
        })
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    /// Normalized surface slopes of the normalized surface.
    fn slopes(&self, usurf: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let surface = usurf * self.bounds.usurf;
        let (sx, sy) = gradient_2d(&surface, self.dx);
        (sx / self.bounds.slopsurfx, sy / self.bounds.slopsurfy)
    }

    /// Stacked, zero-padded emulator input.
    pub fn assemble_input(
        &self,
        controls: &ControlFields,
    ) -> (Array3<f64>, Option<Array2<bool>>) {
        let (ny, nx) = self.grid_shape;
        let (py, px) = self.padded_shape;
        let (slopx, slopy) = self.slopes(&controls.usurf);

        let mut channels: Vec<Array2<f64>> = vec![controls.thk.clone(), slopx, slopy];
        let mut below_threshold = None;
        match self.layout {
            InputLayout::Combined => channels.push(controls.strflowctrl.clone()),
            InputLayout::Split => {
                let thr = self.threshold;
                let below = controls.strflowctrl.mapv(|s| s <= thr);
                channels.push(controls.strflowctrl.mapv(|s| if s <= thr { s } else { thr }));
                channels.push(controls.strflowctrl.mapv(|s| if s <= thr { 0.0 } else { s - thr }));
                below_threshold = Some(below);
            }
        }

        let mut input = Array3::zeros((channels.len(), py, px));
        for (k, field) in channels.iter().enumerate() {
            input.slice_mut(s![k, ..ny, ..nx]).assign(field);
        }
        (input, below_threshold)
    }

    pub fn forward(&self, controls: &ControlFields) -> GlacierResult<EmulatorEvaluation<E::Trace>> {
        let (ny, nx) = self.grid_shape;
        let (input, below_threshold) = self.assemble_input(controls);
        let (raw, trace) = self.emulator.forward(&input)?;
        if raw.dim().0 != self.output_names.len() || raw.dim().1 < ny || raw.dim().2 < nx {
            return Err(GlacierError::ShapeMismatch {
                field: "emulator output".to_string(),
                expected: self.padded_shape,
                got: (raw.dim().1, raw.dim().2),
            });
        }
        let fields = self
            .output_bounds
            .iter()
            .enumerate()
            .map(|(k, &b)| raw.slice(s![k, ..ny, ..nx]).mapv(|v| v * b))
            .collect();
        Ok(EmulatorEvaluation {
            outputs: EmulatorOutputs {
                names: self.output_names.clone(),
                fields,
                velocity_index: self.velocity_index,
            },
            trace,
            below_threshold,
        })
    }

    /// Gradient of the cost with respect to the normalized controls, given
    /// its cotangents on the physical velocity outputs.
    pub fn backward(
        &self,
        evaluation: &EmulatorEvaluation<E::Trace>,
        cotangents: &OutputCotangents,
    ) -> GlacierResult<ControlFields> {
        let (ny, nx) = self.grid_shape;
        let (py, px) = self.padded_shape;

        let mut g_out = Array3::zeros((self.output_names.len(), py, px));
        let named = [
            (self.velocity_index[0], &cotangents.ubar),
            (self.velocity_index[1], &cotangents.vbar),
            (self.velocity_index[2], &cotangents.uvelsurf),
            (self.velocity_index[3], &cotangents.vvelsurf),
        ];
        for (k, g) in named {
            let b = self.output_bounds[k];
            g_out
                .slice_mut(s![k, ..ny, ..nx])
                .zip_mut_with(g, |dst, &src| *dst += src * b);
        }

        let g_in = self.emulator.backward(&evaluation.trace, &g_out)?;
        if g_in.dim().0 != self.layout.channels() || g_in.dim().1 < ny || g_in.dim().2 < nx {
            return Err(GlacierError::ShapeMismatch {
                field: "emulator input cotangent".to_string(),
                expected: self.padded_shape,
                got: (g_in.dim().1, g_in.dim().2),
            });
        }
        let crop = |k: usize| g_in.slice(s![k, ..ny, ..nx]).to_owned();

        let thk = crop(0);
        let g_slopx = crop(1) / self.bounds.slopsurfx;
        let g_slopy = crop(2) / self.bounds.slopsurfy;
        let usurf = gradient_2d_adjoint(&g_slopx, &g_slopy, self.dx) * self.bounds.usurf;

        let strflowctrl = match (&self.layout, &evaluation.below_threshold) {
            (InputLayout::Split, Some(below)) => {
                let g_arrhenius = crop(3);
                let g_slidingco = crop(4);
                Array2::from_shape_fn((ny, nx), |(j, i)| {
                    if below[[j, i]] {
                        g_arrhenius[[j, i]]
                    } else {
                        g_slidingco[[j, i]]
                    }
                })
            }
            _ => crop(3),
        };

        Ok(ControlFields {
            thk,
            strflowctrl,
            usurf,
        })
    }
}

/// Rheology and sliding parts of a physical strflowctrl field.
pub fn split_strflowctrl(strflowctrl: &Array2<f64>, thr: f64) -> (Array2<f64>, Array2<f64>) {
    let arrhenius = strflowctrl.mapv(|s| if s <= thr { s } else { thr });
    let slidingco = strflowctrl.mapv(|s| if s <= thr { 0.0 } else { s - thr });
    (arrhenius, slidingco)
}

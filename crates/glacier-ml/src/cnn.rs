// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Convolutional Ice-Flow Emulator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Fully convolutional emulator: stacked same-padded convolutions with
//! LeakyReLU between them and a linear last layer.
//!
//! Weights are read from a NumPy `.npz` archive with one pair of arrays
//! per layer, `layer{i}_w` shaped `[out, in, k, k]` and `layer{i}_b`
//! shaped `[out]`.

use std::fs::File;
use std::path::Path;

use glacier_types::error::{GlacierError, GlacierResult};
use ndarray::{Array1, Array3, Array4, Dimension, Zip};
use ndarray_npy::NpzReader;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::info;

use crate::emulator::IceFlowEmulator;

const LEAKY_SLOPE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct ConvLayer {
    pub weight: Array4<f64>, // [out, in, k, k]
    pub bias: Array1<f64>,   // [out]
}

impl ConvLayer {
    fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    /// Zero-padded "same" convolution plus bias.
    fn apply(&self, x: &Array3<f64>) -> Array3<f64> {
        let (_, ny, nx) = x.dim();
        let (_, n_in, k, _) = self.weight.dim();
        let r = (k / 2) as isize;
        let mut out = Array3::zeros((self.out_channels(), ny, nx));
        Zip::indexed(&mut out).par_for_each(|(o, j, i), v| {
            let mut acc = self.bias[o];
            for c in 0..n_in {
                for kj in 0..k {
                    let sj = j as isize + kj as isize - r;
                    if sj < 0 || sj >= ny as isize {
                        continue;
                    }
                    for ki in 0..k {
                        let si = i as isize + ki as isize - r;
                        if si < 0 || si >= nx as isize {
                            continue;
                        }
                        acc += self.weight[[o, c, kj, ki]] * x[[c, sj as usize, si as usize]];
                    }
                }
            }
            *v = acc;
        });
        out
    }

    /// Input cotangent of [`ConvLayer::apply`].
    fn apply_transpose(&self, g: &Array3<f64>) -> Array3<f64> {
        let (_, ny, nx) = g.dim();
        let (n_out, _, k, _) = self.weight.dim();
        let r = (k / 2) as isize;
        let mut out = Array3::zeros((self.in_channels(), ny, nx));
        Zip::indexed(&mut out).par_for_each(|(c, j, i), v| {
            let mut acc = 0.0;
            for o in 0..n_out {
                for kj in 0..k {
                    let tj = j as isize - kj as isize + r;
                    if tj < 0 || tj >= ny as isize {
                        continue;
                    }
                    for ki in 0..k {
                        let ti = i as isize - ki as isize + r;
                        if ti < 0 || ti >= nx as isize {
                            continue;
                        }
                        acc += self.weight[[o, c, kj, ki]] * g[[o, tj as usize, ti as usize]];
                    }
                }
            }
            *v = acc;
        });
        out
    }
}

/// Pre-activations of every hidden layer, kept for the backward pass.
#[derive(Debug, Clone)]
pub struct ConvTrace {
    pre_activations: Vec<Array3<f64>>,
}

#[derive(Debug, Clone)]
pub struct ConvEmulator {
    layers: Vec<ConvLayer>,
}

impl ConvEmulator {
    pub fn new(layers: Vec<ConvLayer>) -> GlacierResult<Self> {
        validate_layers(&layers)?;
        Ok(ConvEmulator { layers })
    }

    /// He-scaled random weights, reproducible from `seed`.
    ///
    /// `channels` lists the channel count at every interface, e.g.
    /// `[4, 16, 16, 4]` for three layers.
    pub fn random(channels: &[usize], kernel: usize, seed: u64) -> GlacierResult<Self> {
        if channels.len() < 2 {
            return Err(GlacierError::ConfigError(
                "emulator needs at least an input and an output channel count".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let layers = channels
            .windows(2)
            .map(|pair| {
                let (n_in, n_out) = (pair[0], pair[1]);
                let scale = (2.0 / (n_in * kernel * kernel).max(1) as f64).sqrt();
                ConvLayer {
                    weight: Array4::from_shape_fn((n_out, n_in, kernel, kernel), |_| {
                        rng.sample::<f64, _>(StandardNormal) * scale
                    }),
                    bias: Array1::zeros(n_out),
                }
            })
            .collect();
        Self::new(layers)
    }

    /// Load weights from a NumPy `.npz` archive.
    pub fn from_npz(path: impl AsRef<Path>) -> GlacierResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut npz = NpzReader::new(file)
            .map_err(|e| GlacierError::Npz(format!("Failed to open npz '{}': {e}", path.display())))?;
        let names = npz
            .names()
            .map_err(|e| GlacierError::Npz(format!("Failed to list npz entries: {e}")))?;
        let has = |key: &str| names.iter().any(|n| n == key || *n == format!("{key}.npy"));

        let mut layers = Vec::new();
        while has(&format!("layer{}_w", layers.len())) {
            let i = layers.len();
            layers.push(ConvLayer {
                weight: read_array(&mut npz, &format!("layer{i}_w"))?,
                bias: read_array(&mut npz, &format!("layer{i}_b"))?,
            });
        }
        let emulator = Self::new(layers)?;
        info!(
            path = %path.display(),
            layers = emulator.layers.len(),
            inputs = emulator.input_channels(),
            outputs = emulator.output_channels(),
            "Loaded convolutional emulator"
        );
        Ok(emulator)
    }

    pub fn layers(&self) -> &[ConvLayer] {
        &self.layers
    }
}

fn validate_layers(layers: &[ConvLayer]) -> GlacierResult<()> {
    if layers.is_empty() {
        return Err(GlacierError::Npz("emulator has no layers".to_string()));
    }
    for (i, layer) in layers.iter().enumerate() {
        let (n_out, _, kh, kw) = layer.weight.dim();
        if kh != kw || kh % 2 == 0 {
            return Err(GlacierError::Npz(format!(
                "layer{i}_w kernel must be square and odd, got {kh}x{kw}"
            )));
        }
        if layer.bias.len() != n_out {
            return Err(GlacierError::Npz(format!(
                "layer{i}_b length {}, expected {n_out}",
                layer.bias.len()
            )));
        }
        if i > 0 && layers[i - 1].out_channels() != layer.in_channels() {
            return Err(GlacierError::Npz(format!(
                "layer{i}_w expects {} input channels, previous layer gives {}",
                layer.in_channels(),
                layers[i - 1].out_channels()
            )));
        }
    }
    Ok(())
}

fn read_array<D: Dimension>(
    npz: &mut NpzReader<File>,
    key: &str,
) -> GlacierResult<ndarray::Array<f64, D>> {
    npz.by_name::<ndarray::OwnedRepr<f64>, D>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, D>(key))
        .map_err(|e| GlacierError::Npz(format!("Failed to read {key} from npz: {e}")))
}

fn leaky_relu(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        LEAKY_SLOPE * x
    }
}

fn leaky_relu_grad(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else {
        LEAKY_SLOPE
    }
}

impl IceFlowEmulator for ConvEmulator {
    type Trace = ConvTrace;

    fn input_channels(&self) -> usize {
        self.layers.first().map_or(0, ConvLayer::in_channels)
    }

    fn output_channels(&self) -> usize {
        self.layers.last().map_or(0, ConvLayer::out_channels)
    }

    fn forward(&self, input: &Array3<f64>) -> GlacierResult<(Array3<f64>, ConvTrace)> {
        if input.dim().0 != self.input_channels() {
            return Err(GlacierError::ConfigError(format!(
                "emulator expects {} input channels, got {}",
                self.input_channels(),
                input.dim().0
            )));
        }
        let last = self.layers.len() - 1;
        let mut pre_activations = Vec::with_capacity(last);
        let mut x = input.clone();
        for (l, layer) in self.layers.iter().enumerate() {
            let z = layer.apply(&x);
            if l == last {
                return Ok((z, ConvTrace { pre_activations }));
            }
            x = z.mapv(leaky_relu);
            pre_activations.push(z);
        }
        Err(GlacierError::Npz("emulator has no layers".to_string()))
    }

    fn backward(&self, trace: &ConvTrace, grad_output: &Array3<f64>) -> GlacierResult<Array3<f64>> {
        if grad_output.dim().0 != self.output_channels() {
            return Err(GlacierError::ConfigError(format!(
                "output cotangent has {} channels, emulator gives {}",
                grad_output.dim().0,
                self.output_channels()
            )));
        }
        if trace.pre_activations.len() + 1 != self.layers.len() {
            return Err(GlacierError::ConfigError(
                "trace does not belong to this emulator".to_string(),
            ));
        }
        let mut g = grad_output.clone();
        for (l, layer) in self.layers.iter().enumerate().rev() {
            if l < trace.pre_activations.len() {
                Zip::from(&mut g)
                    .and(&trace.pre_activations[l])
                    .for_each(|gv, &z| *gv *= leaky_relu_grad(z));
            }
            g = layer.apply_transpose(&g);
        }
        Ok(g)
    }
}

//! Differentiable forward operator consumed by the inversion.

use glacier_types::error::GlacierResult;
use ndarray::Array3;

/// Pretrained ice-flow surrogate mapping stacked input fields to stacked
/// velocity fields, both channel-first `[channels, ny, nx]`.
///
/// `forward` returns whatever the model needs to differentiate the pass
/// it just made; `backward` maps an output cotangent to an input cotangent
/// (vector-Jacobian product) for that same pass. Weights are fixed: no
/// parameter gradients are produced.
pub trait IceFlowEmulator {
    type Trace;

    fn input_channels(&self) -> usize;

    fn output_channels(&self) -> usize;

    fn forward(&self, input: &Array3<f64>) -> GlacierResult<(Array3<f64>, Self::Trace)>;

    fn backward(&self, trace: &Self::Trace, grad_output: &Array3<f64>) -> GlacierResult<Array3<f64>>;
}

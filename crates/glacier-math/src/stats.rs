//! Reductions used by the cost terms and residual diagnostics.

use ndarray::Array2;

/// Affine fit `y ≈ intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn eval(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Ordinary least squares over paired samples.
///
/// Returns `None` without samples. A constant `x` gives slope 0 and the
/// mean of `y` as intercept.
pub fn linregress(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len().min(y.len());
    if n == 0 {
        return None;
    }
    let nf = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / nf;
    let mean_y = y[..n].iter().sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for k in 0..n {
        let dx = x[k] - mean_x;
        sxx += dx * dx;
        sxy += dx * (y[k] - mean_y);
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    Some(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

/// Mean and population standard deviation; `(0, 0)` for no samples.
pub fn mean_std<I>(values: I) -> (f64, f64)
where
    I: IntoIterator<Item = f64>,
{
    let samples: Vec<f64> = values.into_iter().collect();
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// `sum(a^2) / 2`
pub fn l2_loss(a: &Array2<f64>) -> f64 {
    0.5 * a.iter().map(|v| v * v).sum::<f64>()
}

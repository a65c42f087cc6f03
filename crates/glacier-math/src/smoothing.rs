// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Gaussian Smoothing
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Separable Gaussian filter with zero padding outside the grid.

use ndarray::{Array1, Array2, ArrayView2};

/// Normalized 1D Gaussian weights on `[-r, r]`, `r = round(truncate * sigma)`.
pub fn gaussian_kernel(sigma: f64, truncate: f64) -> Array1<f64> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Array1::from(vec![1.0]);
    }
    let radius = (truncate * sigma + 0.5).floor().max(0.0) as i64;
    let mut weights = Array1::from_shape_fn((2 * radius + 1) as usize, |k| {
        let x = k as f64 - radius as f64;
        (-0.5 * x * x / (sigma * sigma)).exp()
    });
    let total = weights.sum();
    weights /= total;
    weights
}

/// Correlate every row with `kernel`; cells beyond the edge count as 0.
fn convolve_rows(field: ArrayView2<f64>, kernel: &Array1<f64>) -> Array2<f64> {
    let (ny, nx) = field.dim();
    let radius = (kernel.len() / 2) as isize;
    let mut out = Array2::zeros((ny, nx));
    for j in 0..ny {
        for i in 0..nx {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let src = i as isize + k as isize - radius;
                if src >= 0 && (src as usize) < nx {
                    acc += w * field[[j, src as usize]];
                }
            }
            out[[j, i]] = acc;
        }
    }
    out
}

/// 2D Gaussian filter in constant (zero) boundary mode.
pub fn gaussian_filter(field: &Array2<f64>, sigma: f64, truncate: f64) -> Array2<f64> {
    let kernel = gaussian_kernel(sigma, truncate);
    let along_x = convolve_rows(field.view(), &kernel);
    convolve_rows(along_x.t(), &kernel).reversed_axes()
}

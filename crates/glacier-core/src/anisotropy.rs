// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Anisotropic Regularizer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Thickness smoothing that penalizes cross-flow variation differently
//! from along-flow variation.

use glacier_math::smoothing::gaussian_filter;
use glacier_math::stats::l2_loss;
use glacier_math::stencil::{corner_average, corner_gradients, corner_gradients_adjoint};
use glacier_types::constants::{FLOW_DIRECTION_SIGMA, FLOW_DIRECTION_TRUNCATE};
use glacier_types::state::ObservationField;
use ndarray::{Array2, Zip};

/// Unit flow direction on cell corners, `[ny-1, nx-1]`.
#[derive(Debug, Clone)]
pub struct FlowDirection {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
}

impl FlowDirection {
    /// Direction of the observed surface velocity: missing cells count as
    /// zero, components are averaged onto corners, smoothed, then scaled
    /// to unit length. Corners with zero smoothed speed stay zero.
    pub fn from_observations(u: &ObservationField, v: &ObservationField) -> Self {
        Self::from_components(&u.filled(0.0), &v.filled(0.0))
    }

    pub fn from_components(u: &Array2<f64>, v: &Array2<f64>) -> Self {
        let sx = gaussian_filter(&corner_average(u), FLOW_DIRECTION_SIGMA, FLOW_DIRECTION_TRUNCATE);
        let sy = gaussian_filter(&corner_average(v), FLOW_DIRECTION_SIGMA, FLOW_DIRECTION_TRUNCATE);
        let mut x = Array2::zeros(sx.raw_dim());
        let mut y = Array2::zeros(sy.raw_dim());
        Zip::from(&mut x)
            .and(&mut y)
            .and(&sx)
            .and(&sy)
            .for_each(|dx, dy, &ax, &ay| {
                let mag = ax.hypot(ay);
                if mag > 0.0 && mag.is_finite() {
                    let (ux, uy) = (ax / mag, ay / mag);
                    *dx = if ux.is_nan() { 0.0 } else { ux };
                    *dy = if uy.is_nan() { 0.0 } else { uy };
                }
            });
        FlowDirection { x, y }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.x.dim()
    }
}

/// `regu * (|along|^2/2 + factor * |cross|^2/2 - convexity * sum(thk))`
/// on the normalized thickness.
#[derive(Debug, Clone)]
pub struct AnisotropicRegularizer {
    direction: FlowDirection,
    regu: f64,
    factor: f64,
    convexity: f64,
}

impl AnisotropicRegularizer {
    pub fn new(direction: FlowDirection, regu: f64, factor: f64, convexity: f64) -> Self {
        AnisotropicRegularizer {
            direction,
            regu,
            factor,
            convexity,
        }
    }

    pub fn direction(&self) -> &FlowDirection {
        &self.direction
    }

    /// Value and gradient with respect to `thk`.
    pub fn evaluate(&self, thk: &Array2<f64>) -> (f64, Array2<f64>) {
        let (gx, gy) = corner_gradients(thk);
        let fx = &self.direction.x;
        let fy = &self.direction.y;
        let along = &gx * fx + &gy * fy;
        let cross = &gx * fy - &gy * fx;

        let value = self.regu
            * (l2_loss(&along) + self.factor * l2_loss(&cross) - self.convexity * thk.sum());

        // d/dgx and d/dgy of the two quadratic terms
        let d_gx = &along * fx + &(&cross * fy) * self.factor;
        let d_gy = &along * fy - &(&cross * fx) * self.factor;
        let mut grad = corner_gradients_adjoint(&d_gx, &d_gy, thk.dim());
        grad.mapv_inplace(|g| self.regu * (g - self.convexity));
        (value, grad)
    }
}

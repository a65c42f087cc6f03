// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Property-Based Tests (proptest) for glacier-math
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for glacier-math using proptest.
//!
//! Covers: adjoint identities of the stencils, flux divergence of uniform
//! flux, Gaussian filter bounds, regression and population statistics.

use glacier_math::smoothing::gaussian_filter;
use glacier_math::stats::{l2_loss, linregress, mean_std};
use glacier_math::stencil::{
    corner_gradients, corner_gradients_adjoint, divflux, divflux_adjoint, gradient_2d,
    gradient_2d_adjoint,
};
use ndarray::Array2;
use proptest::prelude::*;

fn field_from(values: &[f64], ny: usize, nx: usize) -> Array2<f64> {
    Array2::from_shape_fn((ny, nx), |(j, i)| values[(j * nx + i) % values.len()])
}

fn dot(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ── Adjoint Identities ───────────────────────────────────────────────

proptest! {
    /// <grad f, g> == <f, grad^T g> for any field and cotangent.
    #[test]
    fn gradient_adjoint_identity(
        ny in 2usize..12,
        nx in 2usize..12,
        dx in 1.0f64..200.0,
        vals in prop::collection::vec(-10.0f64..10.0, 16..64),
        cots in prop::collection::vec(-10.0f64..10.0, 16..64),
    ) {
        let f = field_from(&vals, ny, nx);
        let gx = field_from(&cots, ny, nx);
        let gy = gx.mapv(|v| 0.5 - v);
        let (ax, ay) = gradient_2d(&f, dx);
        let lhs = dot(&ax, &gx) + dot(&ay, &gy);
        let rhs = dot(&f, &gradient_2d_adjoint(&gx, &gy, dx));
        prop_assert!((lhs - rhs).abs() < 1e-9 * (1.0 + lhs.abs()),
            "lhs={}, rhs={}", lhs, rhs);
    }

    /// Same identity for the corner-averaged differences.
    #[test]
    fn corner_gradient_adjoint_identity(
        ny in 2usize..12,
        nx in 2usize..12,
        vals in prop::collection::vec(-10.0f64..10.0, 16..64),
        cots in prop::collection::vec(-10.0f64..10.0, 16..64),
    ) {
        let f = field_from(&vals, ny, nx);
        let gx = field_from(&cots, ny - 1, nx - 1);
        let gy = gx.mapv(|v| v * 0.3 + 1.0);
        let (ax, ay) = corner_gradients(&f);
        let lhs = dot(&ax, &gx) + dot(&ay, &gy);
        let rhs = dot(&f, &corner_gradients_adjoint(&gx, &gy, (ny, nx)));
        prop_assert!((lhs - rhs).abs() < 1e-9 * (1.0 + lhs.abs()));
    }

    /// divflux is linear in h for fixed velocities, so the h-cotangent
    /// reproduces <div(u h, v h), w> exactly.
    #[test]
    fn divflux_adjoint_linear_in_thickness(
        ny in 1usize..10,
        nx in 1usize..10,
        vals in prop::collection::vec(-50.0f64..50.0, 16..64),
        thk in prop::collection::vec(0.0f64..500.0, 16..64),
    ) {
        let u = field_from(&vals, ny, nx);
        let v = u.mapv(|x| 0.7 * x - 3.0);
        let h = field_from(&thk, ny, nx);
        let w = u.mapv(|x| (x * 0.1).sin());
        let lhs = dot(&divflux(&u, &v, &h, 100.0), &w);
        let (_, _, gh) = divflux_adjoint(&u, &v, &h, 100.0, &w);
        let rhs = dot(&h, &gh);
        prop_assert!((lhs - rhs).abs() < 1e-8 * (1.0 + lhs.abs()),
            "lhs={}, rhs={}", lhs, rhs);
    }
}

// ── Flux Divergence ──────────────────────────────────────────────────

proptest! {
    /// Uniform flux has zero divergence everywhere, edges included.
    #[test]
    fn divflux_uniform_flux_vanishes(
        ny in 1usize..16,
        nx in 1usize..16,
        u in -100.0f64..100.0,
        v in -100.0f64..100.0,
        h in 0.0f64..1000.0,
    ) {
        let div = divflux(
            &Array2::from_elem((ny, nx), u),
            &Array2::from_elem((ny, nx), v),
            &Array2::from_elem((ny, nx), h),
            50.0,
        );
        for &d in div.iter() {
            prop_assert!(d.abs() < 1e-9, "divergence {}", d);
        }
    }
}

// ── Gaussian Filter ──────────────────────────────────────────────────

proptest! {
    /// Zero-padded smoothing of a non-negative field stays within [0, max].
    #[test]
    fn gaussian_filter_bounded(
        ny in 2usize..20,
        nx in 2usize..20,
        vals in prop::collection::vec(0.0f64..5.0, 8..40),
    ) {
        let f = field_from(&vals, ny, nx);
        let max = f.iter().cloned().fold(0.0, f64::max);
        let s = gaussian_filter(&f, 3.0, 4.0);
        for &v in s.iter() {
            prop_assert!(v >= -1e-12 && v <= max + 1e-12, "smoothed value {}", v);
        }
    }
}

// ── Statistics ───────────────────────────────────────────────────────

proptest! {
    /// Regression recovers an exact affine relation.
    #[test]
    fn linregress_recovers_line(
        slope in -5.0f64..5.0,
        intercept in -100.0f64..100.0,
        n in 3usize..50,
    ) {
        let x: Vec<f64> = (0..n).map(|i| i as f64 * 1.5 - 7.0).collect();
        let y: Vec<f64> = x.iter().map(|v| intercept + slope * v).collect();
        let fit = linregress(&x, &y).unwrap();
        prop_assert!((fit.slope - slope).abs() < 1e-9);
        prop_assert!((fit.intercept - intercept).abs() < 1e-8);
    }

    /// Population std is non-negative and zero for constant samples.
    #[test]
    fn mean_std_constant(value in -1e3f64..1e3, n in 1usize..40) {
        let (m, s) = mean_std(std::iter::repeat(value).take(n));
        prop_assert!((m - value).abs() < 1e-9);
        prop_assert!(s.abs() < 1e-9);
    }

    /// l2_loss is half the squared Frobenius norm.
    #[test]
    fn l2_loss_scales_quadratically(
        vals in prop::collection::vec(-10.0f64..10.0, 4..32),
        k in 0.1f64..4.0,
    ) {
        let f = field_from(&vals, 2, 2);
        let base = l2_loss(&f);
        let scaled = l2_loss(&f.mapv(|v| v * k));
        prop_assert!((scaled - k * k * base).abs() < 1e-9 * (1.0 + scaled));
    }
}

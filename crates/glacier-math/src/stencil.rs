//! Finite-difference stencils on a uniform grid, each paired with its adjoint.
//!
//! Arrays are [ny, nx]; x runs along columns (axis 1), y along rows (axis 0).
//! Every `*_adjoint` function applies the transpose of the matching linear
//! operator, so `<A f, g> == <f, A^T g>` holds to rounding.

use ndarray::{Array2, ArrayView2, Axis};

/// Centred derivative along columns, one-sided at the two edges.
fn gradient_cols(field: ArrayView2<f64>, dx: f64) -> Array2<f64> {
    let (ny, nx) = field.dim();
    let mut out = Array2::zeros((ny, nx));
    if nx < 2 {
        return out;
    }
    for j in 0..ny {
        for i in 0..nx {
            out[[j, i]] = if i == 0 {
                (field[[j, 1]] - field[[j, 0]]) / dx
            } else if i == nx - 1 {
                (field[[j, nx - 1]] - field[[j, nx - 2]]) / dx
            } else {
                (field[[j, i + 1]] - field[[j, i - 1]]) / (2.0 * dx)
            };
        }
    }
    out
}

fn gradient_cols_adjoint(g: ArrayView2<f64>, dx: f64) -> Array2<f64> {
    let (ny, nx) = g.dim();
    let mut out = Array2::zeros((ny, nx));
    if nx < 2 {
        return out;
    }
    for j in 0..ny {
        for i in 0..nx {
            let gi = g[[j, i]];
            if i == 0 {
                out[[j, 1]] += gi / dx;
                out[[j, 0]] -= gi / dx;
            } else if i == nx - 1 {
                out[[j, nx - 1]] += gi / dx;
                out[[j, nx - 2]] -= gi / dx;
            } else {
                out[[j, i + 1]] += gi / (2.0 * dx);
                out[[j, i - 1]] -= gi / (2.0 * dx);
            }
        }
    }
    out
}

/// Surface-slope stencil: returns `(df/dx, df/dy)`.
///
/// Centred differences in the interior, forward/backward differences on
/// the boundary rows and columns. A dimension of length 1 has zero slope.
pub fn gradient_2d(field: &Array2<f64>, dx: f64) -> (Array2<f64>, Array2<f64>) {
    let dfdx = gradient_cols(field.view(), dx);
    let dfdy = gradient_cols(field.t(), dx).reversed_axes();
    (dfdx, dfdy)
}

/// Transpose of [`gradient_2d`]: maps slope cotangents back onto the field.
pub fn gradient_2d_adjoint(g_x: &Array2<f64>, g_y: &Array2<f64>, dx: f64) -> Array2<f64> {
    let mut out = gradient_cols_adjoint(g_x.view(), dx);
    out += &gradient_cols_adjoint(g_y.t(), dx).reversed_axes();
    out
}

/// Difference of edge fluxes along columns. Edge fluxes are the boundary
/// cell values and the mean of each neighbouring pair.
fn flux_difference_cols(q: ArrayView2<f64>, dx: f64) -> Array2<f64> {
    let (ny, nx) = q.dim();
    let mut out = Array2::zeros((ny, nx));
    for j in 0..ny {
        let edge = |k: usize| -> f64 {
            if k == 0 {
                q[[j, 0]]
            } else if k == nx {
                q[[j, nx - 1]]
            } else {
                0.5 * (q[[j, k - 1]] + q[[j, k]])
            }
        };
        for i in 0..nx {
            out[[j, i]] = (edge(i + 1) - edge(i)) / dx;
        }
    }
    out
}

fn flux_difference_cols_adjoint(g: ArrayView2<f64>, dx: f64) -> Array2<f64> {
    let (ny, nx) = g.dim();
    let mut out = Array2::zeros((ny, nx));
    if nx == 0 {
        return out;
    }
    let mut g_edge = vec![0.0; nx + 1];
    for j in 0..ny {
        g_edge.iter_mut().for_each(|v| *v = 0.0);
        for i in 0..nx {
            g_edge[i + 1] += g[[j, i]] / dx;
            g_edge[i] -= g[[j, i]] / dx;
        }
        out[[j, 0]] += g_edge[0];
        out[[j, nx - 1]] += g_edge[nx];
        for k in 1..nx {
            out[[j, k - 1]] += 0.5 * g_edge[k];
            out[[j, k]] += 0.5 * g_edge[k];
        }
    }
    out
}

/// Divergence of the depth-integrated flux `(u h, v h)`.
pub fn divflux(u: &Array2<f64>, v: &Array2<f64>, h: &Array2<f64>, dx: f64) -> Array2<f64> {
    let qx = u * h;
    let qy = v * h;
    let mut div = flux_difference_cols(qx.view(), dx);
    div += &flux_difference_cols(qy.t(), dx).reversed_axes();
    div
}

/// Cotangents of [`divflux`] with respect to `(u, v, h)`.
pub fn divflux_adjoint(
    u: &Array2<f64>,
    v: &Array2<f64>,
    h: &Array2<f64>,
    dx: f64,
    g: &Array2<f64>,
) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
    let g_qx = flux_difference_cols_adjoint(g.view(), dx);
    let g_qy = flux_difference_cols_adjoint(g.t(), dx).reversed_axes();
    let g_u = &g_qx * h;
    let g_v = &g_qy * h;
    let g_h = &g_qx * u + &g_qy * v;
    (g_u, g_v, g_h)
}

/// Forward differences `(f[:, 1:] - f[:, :-1], f[1:, :] - f[:-1, :])`.
pub fn forward_differences(field: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (ny, nx) = field.dim();
    let dx = if nx > 1 {
        &field.slice(ndarray::s![.., 1..]) - &field.slice(ndarray::s![.., ..nx - 1])
    } else {
        Array2::zeros((ny, 0))
    };
    let dy = if ny > 1 {
        &field.slice(ndarray::s![1.., ..]) - &field.slice(ndarray::s![..ny - 1, ..])
    } else {
        Array2::zeros((0, nx))
    };
    (dx, dy)
}

/// Transpose of [`forward_differences`] onto a field of shape `dim`.
pub fn forward_differences_adjoint(
    g_x: &Array2<f64>,
    g_y: &Array2<f64>,
    dim: (usize, usize),
) -> Array2<f64> {
    let (ny, nx) = dim;
    let mut out = Array2::zeros(dim);
    for ((j, i), &g) in g_x.indexed_iter() {
        out[[j, i + 1]] += g;
        out[[j, i]] -= g;
    }
    for ((j, i), &g) in g_y.indexed_iter() {
        out[[j + 1, i]] += g;
        out[[j, i]] -= g;
    }
    debug_assert_eq!(out.dim(), (ny, nx));
    out
}

/// Mean of each 2x2 block of neighbours: `[ny, nx] -> [ny-1, nx-1]`.
pub fn corner_average(field: &Array2<f64>) -> Array2<f64> {
    let (ny, nx) = field.dim();
    let (cy, cx) = (ny.saturating_sub(1), nx.saturating_sub(1));
    Array2::from_shape_fn((cy, cx), |(j, i)| {
        0.25 * (field[[j, i]] + field[[j + 1, i]] + field[[j, i + 1]] + field[[j + 1, i + 1]])
    })
}

/// Forward differences averaged onto cell corners, both `[ny-1, nx-1]`.
///
/// x-differences are averaged over adjacent rows, y-differences over
/// adjacent columns.
pub fn corner_gradients(field: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (dfx, dfy) = forward_differences(field);
    let gx = average_adjacent(&dfx, Axis(0));
    let gy = average_adjacent(&dfy, Axis(1));
    (gx, gy)
}

/// Transpose of [`corner_gradients`] onto a field of shape `dim`.
pub fn corner_gradients_adjoint(
    g_x: &Array2<f64>,
    g_y: &Array2<f64>,
    dim: (usize, usize),
) -> Array2<f64> {
    let (ny, nx) = dim;
    let g_dfx = average_adjacent_adjoint(g_x, Axis(0), ny);
    let g_dfy = average_adjacent_adjoint(g_y, Axis(1), nx);
    forward_differences_adjoint(&g_dfx, &g_dfy, dim)
}

fn average_adjacent(a: &Array2<f64>, axis: Axis) -> Array2<f64> {
    let n = a.len_of(axis);
    if n < 2 {
        let mut dim = a.raw_dim();
        dim[axis.index()] = 0;
        return Array2::zeros(dim);
    }
    let lo = a.slice_axis(axis, (0..n - 1).into());
    let hi = a.slice_axis(axis, (1..n).into());
    (&lo + &hi) * 0.5
}

fn average_adjacent_adjoint(g: &Array2<f64>, axis: Axis, n: usize) -> Array2<f64> {
    let mut dim = g.raw_dim();
    dim[axis.index()] = n;
    let mut out = Array2::zeros(dim);
    if n < 2 {
        return out;
    }
    let half = g * 0.5;
    out.slice_axis_mut(axis, (0..n - 1).into())
        .zip_mut_with(&half, |o, &h| *o += h);
    out.slice_axis_mut(axis, (1..n).into())
        .zip_mut_with(&half, |o, &h| *o += h);
    out
}

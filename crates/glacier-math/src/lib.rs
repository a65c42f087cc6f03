//! Grid numerics for Glacier Inversion: stencils and their adjoints,
//! Gaussian smoothing, regression and masked statistics.

pub mod smoothing;
pub mod stats;
pub mod stencil;

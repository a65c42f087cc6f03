// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Core Library
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Emulator-driven glacier inversion.
//!
//! Normalizer and adapter feed the cost assembler; the driver masks the
//! gradient, steps Adam and records diagnostics every iteration.

pub mod adapter;
pub mod anisotropy;
pub mod constraints;
pub mod cost;
pub mod diagnostics;
pub mod inversion;
pub mod normalizer;
pub mod optimizer;
pub mod output;

// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Glacier Ml
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Ice-flow emulators.
//!
//! The inversion sees an emulator only through [`emulator::IceFlowEmulator`];
//! [`cnn::ConvEmulator`] is the bundled convolutional implementation.

pub mod cnn;
pub mod emulator;
pub mod mapping;

// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Validate Command
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Runs every INIT check and reports the result; nothing is written.

use anyhow::{Context, Result};
use clap::Args;
use glacier_core::inversion::Inversion;
use glacier_ml::emulator::IceFlowEmulator;
use tracing::info;

use super::inputs::{load, InputArgs, LoadedInputs};

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub inputs: InputArgs,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let LoadedInputs {
        mut config,
        mapping,
        emulator,
        state,
    } = load(&args.inputs)?;
    config.working_dir = None;

    let inversion =
        Inversion::new(config, &mapping, emulator, state).context("validating inversion setup")?;
    let emulator = inversion.adapter().emulator();
    info!(
        layout = ?inversion.adapter().layout(),
        inputs = emulator.input_channels(),
        outputs = emulator.output_channels(),
        iterations = inversion.config().nbitmax,
        "Configuration valid"
    );
    Ok(())
}

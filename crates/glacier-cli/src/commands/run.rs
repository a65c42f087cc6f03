// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Run Command
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use anyhow::{Context, Result};
use clap::Args;
use glacier_core::inversion::Inversion;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use super::inputs::{load, InputArgs, LoadedInputs};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,
}

pub fn execute(args: RunArgs) -> Result<()> {
    let started = Instant::now();
    let LoadedInputs {
        mut config,
        mapping,
        emulator,
        state,
    } = load(&args.inputs)?;
    config.working_dir = Some(args.output.clone());

    let inversion =
        Inversion::new(config, &mapping, emulator, state).context("initializing inversion")?;
    let result = inversion.run().context("running inversion")?;

    let final_cost = result.history.last().map_or(f64::NAN, |r| r.total);
    info!(
        iterations = result.summary.iterations,
        final_cost,
        volume_km3 = result.summary.volume_km3,
        output = %args.output.display(),
        elapsed_s = started.elapsed().as_secs_f64(),
        "Run complete"
    );
    Ok(())
}

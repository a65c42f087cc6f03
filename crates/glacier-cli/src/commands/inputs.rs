// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Run Inputs
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Shared loading for `run` and `validate`: parameters, emulator and the
//! gridded state.

use anyhow::{bail, Context, Result};
use clap::Args;
use glacier_ml::cnn::ConvEmulator;
use glacier_ml::mapping::EmulatorMapping;
use glacier_types::config::InversionConfig;
use glacier_types::state::{GlacierState, Grid2D, ObservationField};
use ndarray::{Array1, Array2, Dimension};
use ndarray_npy::NpzReader;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Args)]
pub struct InputArgs {
    /// Inversion parameter file (JSON, `opti_*` keys)
    #[arg(short, long)]
    pub params: PathBuf,

    /// Emulator mapping file (JSON: fieldin, fieldout, fieldbounds)
    #[arg(short, long)]
    pub mapping: PathBuf,

    /// Emulator weights (NPZ, `layer{i}_w` / `layer{i}_b`)
    #[arg(short, long)]
    pub weights: PathBuf,

    /// Gridded inputs and observations (NPZ)
    #[arg(short, long)]
    pub inputs: PathBuf,

    /// Override the iteration budget
    #[arg(long)]
    pub iterations: Option<usize>,
}

/// Everything needed to build an inversion.
pub struct LoadedInputs {
    pub config: InversionConfig,
    pub mapping: EmulatorMapping,
    pub emulator: ConvEmulator,
    pub state: GlacierState,
}

struct InputArchive {
    reader: NpzReader<File>,
    names: Vec<String>,
}

impl InputArchive {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut reader = NpzReader::new(file)
            .with_context(|| format!("reading npz archive {}", path.display()))?;
        let names = reader.names().context("listing npz entries")?;
        Ok(InputArchive { reader, names })
    }

    /// Entry name as stored: `key` or `key.npy`.
    fn entry(&self, key: &str) -> Option<String> {
        let suffixed = format!("{key}.npy");
        self.names
            .iter()
            .find(|n| n.as_str() == key || **n == suffixed)
            .cloned()
    }

    fn read<D: Dimension>(&mut self, key: &str) -> Result<Option<ndarray::Array<f64, D>>> {
        let Some(name) = self.entry(key) else {
            return Ok(None);
        };
        let array = self
            .reader
            .by_name(&name)
            .with_context(|| format!("reading '{key}'"))?;
        debug!(field = key, "Loaded input field");
        Ok(Some(array))
    }

    fn required<D: Dimension>(&mut self, key: &str) -> Result<ndarray::Array<f64, D>> {
        match self.read(key)? {
            Some(array) => Ok(array),
            None => bail!("input archive has no '{key}'"),
        }
    }

    fn field(&mut self, key: &str) -> Result<Option<Array2<f64>>> {
        self.read(key)
    }

    fn observation(&mut self, key: &str) -> Result<Option<ObservationField>> {
        Ok(self.field(key)?.map(ObservationField::new))
    }
}

fn load_state(path: &Path) -> Result<GlacierState> {
    let mut archive = InputArchive::open(path)?;
    let x: Array1<f64> = archive.required("x")?;
    let y: Array1<f64> = archive.required("y")?;
    let grid = Grid2D::from_coords(x, y).context("building grid from x/y")?;
    let usurf: Array2<f64> = archive.required("usurf")?;
    let icemaskobs: Array2<f64> = archive.required("icemaskobs")?;

    let mut state = GlacierState::new(grid, usurf, icemaskobs);
    if let Some(strflowctrl) = archive.field("strflowctrl")? {
        state.strflowctrl = strflowctrl;
    }
    state.topg = archive.field("topg")?;
    state.thkinit = archive.field("thkinit")?;
    state.smb = archive.field("smb")?;
    state.dhdt = archive.field("dhdt")?;
    state.thkobs = archive.observation("thkobs")?;
    state.usurfobs = archive.observation("usurfobs")?;
    state.uvelsurfobs = archive.observation("uvelsurfobs")?;
    state.vvelsurfobs = archive.observation("vvelsurfobs")?;
    state.divfluxobs = archive.observation("divfluxobs")?;
    state.validate_shapes().context("checking input shapes")?;

    let (ny, nx) = state.grid.shape();
    info!(
        path = %path.display(),
        ny,
        nx,
        dx = state.grid.dx,
        thkobs = state.thkobs.is_some(),
        velsurfobs = state.has_velocity_obs(),
        usurfobs = state.usurfobs.is_some(),
        "Loaded inputs"
    );
    Ok(state)
}

pub fn load(args: &InputArgs) -> Result<LoadedInputs> {
    let mut config = InversionConfig::from_file(&args.params)
        .with_context(|| format!("loading parameters {}", args.params.display()))?;
    if let Some(n) = args.iterations {
        config.nbitmax = n;
    }
    let mapping = EmulatorMapping::from_file(&args.mapping)
        .with_context(|| format!("loading emulator mapping {}", args.mapping.display()))?;
    let emulator = ConvEmulator::from_npz(&args.weights)
        .with_context(|| format!("loading emulator weights {}", args.weights.display()))?;
    let state = load_state(&args.inputs)?;
    Ok(LoadedInputs {
        config,
        mapping,
        emulator,
        state,
    })
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlacierError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported emulator input layout {fieldin:?}")]
    UnsupportedLayout { fieldin: Vec<String> },

    #[error("Emulator output missing: {0}")]
    MissingOutput(String),

    #[error("Invalid normalization bound for '{name}': {value}")]
    InvalidBound { name: String, value: f64 },

    #[error("Observation missing or entirely NaN: {0}")]
    MissingObservation(String),

    #[error("Shape mismatch for '{field}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        field: String,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NPZ error: {0}")]
    Npz(String),
}

pub type GlacierResult<T> = Result<T, GlacierError>;

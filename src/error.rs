//! Error types for the processing core and its configuration layer.
//!
//! Parameter values never produce errors; they are clamped. Errors are
//! reserved for host/programmer mistakes that must surface before audio
//! starts flowing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: &'static str },

    #[error("processBlock called before prepare")]
    UninitializedChain,

    #[error("band {band} out of range ({bands} bands)")]
    BandOutOfRange { band: usize, bands: usize },

    #[error("crossover {index} out of range ({crossovers} crossovers)")]
    CrossoverOutOfRange { index: usize, crossovers: usize },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(reason: &'static str) -> Self {
        Error::InvalidConfiguration { reason }
    }
}

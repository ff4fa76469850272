use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not all files are of the same type, check you didn't mix LD scores with gene sets")]
    MixedSources,

    #[error("no files found under {0}; cannot resolve a panel prefix")]
    EmptyPanel(PathBuf),

    #[error("No baseline panel or conditional panel specified - Interrupting")]
    NoConditioningSource,

    #[error(
        "quantile binning failed for {unit}: {detail}. The continuous annotation likely has \
         non-unique quantile bin edges; rerun with --cont-breaks and explicit boundaries"
    )]
    QuantileBinning { unit: String, detail: String },

    #[error("{unit} exited with {status}: {stderr}")]
    Engine {
        unit: String,
        status: String,
        stderr: String,
    },

    #[error("{unit} completed but produced no score file at {path}")]
    MissingOutput { unit: String, path: PathBuf },

    #[error("{unit} exceeded the {seconds}s deadline and was killed")]
    Timeout { unit: String, seconds: u64 },

    #[error("{unit} skipped after an earlier failure")]
    Cancelled { unit: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

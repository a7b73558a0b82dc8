use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the simulator.
///
/// Every variant is fatal: the binary prints the diagnostic to stderr and
/// exits non-zero. The core never catches an error and continues.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot open {}: {source}", path.display())]
    TraceIo { path: PathBuf, source: io::Error },

    #[error("malformed trace token '{token}' in {}", path.display())]
    TraceParse { path: PathBuf, token: String },

    #[error("cannot write {}: {source}", path.display())]
    OutputIo { path: PathBuf, source: io::Error },

    #[error("failed to write report: {0}")]
    Report(#[from] io::Error),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

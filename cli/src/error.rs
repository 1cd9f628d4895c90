//! Errors surfaced by the `codepack` binary.

use camino::Utf8PathBuf;
use codepack::archive::ArchiveReadError;
use codepack::distribution::DistributionError;
use codepack::{ConfigError, WaitError};
use thiserror::Error;

/// Failures of a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Site directories could not be indexed.
    #[error(transparent)]
    Distribution(#[from] DistributionError),

    /// The package failed or timed out.
    #[error(transparent)]
    Package(#[from] WaitError),

    /// An existing package could not be read.
    #[error(transparent)]
    Archive(#[from] ArchiveReadError),

    /// A requested module is not present in any site directory.
    #[error("module '{name}' was not found in any site directory")]
    ModuleNotFound {
        /// The requested module name.
        name: String,
    },

    /// The package has no environment description.
    #[error("package {path} has no INFO file")]
    MissingInfo {
        /// The package inspected.
        path: Utf8PathBuf,
    },

    /// A file could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing to standard output failed.
    #[error("failed to write output: {0}")]
    Output(#[source] std::io::Error),
}

/// Result alias for CLI commands.
pub type Result<T> = std::result::Result<T, CliError>;

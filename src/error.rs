//! Error types for code package assembly.
//!
//! Assembly errors abort packaging immediately. The controller wraps them in
//! [`PackageError`] so callers can tell a failed build apart from a failed
//! upload, and hands the same stored failure to every [`WaitError`] observer.

use crate::distribution::DistributionError;
use crate::walk::WalkError;
use camino::Utf8PathBuf;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while gathering files or serialising the archive.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Two contributions claim the same archive path from different sources.
    #[error(
        "archive path {archive_path} is claimed by multiple sources: {}; \
         each archive path requires a unique source file",
        JoinedPaths(.sources)
    )]
    NameCollision {
        /// The contested path inside the archive.
        archive_path: String,
        /// Every source path that targeted `archive_path`.
        sources: Vec<String>,
    },

    /// A distribution claims a module root the module does not occupy.
    #[error(
        "distribution '{distribution}' is not contributing to module '{module}' as expected: \
         {location} is not among the module's roots"
    )]
    DistributionIntegrity {
        /// Name of the offending distribution.
        distribution: String,
        /// Module the distribution was resolved for.
        module: String,
        /// Install location the distribution declared for the module.
        location: Utf8PathBuf,
    },

    /// A file could not be read, resolved, or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed when the failure occurred.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed.
    #[error(transparent)]
    Walk(#[from] WalkError),

    /// Distribution metadata could not be located or parsed.
    #[error(transparent)]
    Distribution(#[from] DistributionError),

    /// A step hook failed during initialisation or file enumeration.
    #[error("hook for step '{step}' failed: {message}")]
    Hook {
        /// Step whose hook failed.
        step: String,
        /// Description reported by the hook.
        message: String,
    },

    /// The environment collaborator failed.
    #[error("environment failed: {message}")]
    Environment {
        /// Description reported by the environment.
        message: String,
    },

    /// Special content could not be encoded.
    #[error("special content serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AssemblyError {
    /// Wrap an I/O error with the path that triggered it.
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors reported by a storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Writing the blob failed.
    #[error("failed to store package at {location}: {source}")]
    Io {
        /// Destination that could not be written.
        location: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The store returned fewer locations than blobs it was given.
    #[error("store returned {returned} location(s) for {expected} blob(s)")]
    MissingLocation {
        /// Number of blobs submitted.
        expected: usize,
        /// Number of locations returned.
        returned: usize,
    },

    /// The store rejected the request.
    #[error("store rejected package: {reason}")]
    Rejected {
        /// Reason supplied by the store.
        reason: String,
    },
}

/// Terminal failure of a package controller.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The package could not be built.
    #[error("package creation failed: {0}")]
    Assembly(#[from] AssemblyError),

    /// The package was built but could not be uploaded.
    #[error("package upload failed: {0}")]
    Storage(#[from] StorageError),

    /// The background worker terminated without reporting an outcome.
    #[error("package worker terminated unexpectedly: {reason}")]
    WorkerLost {
        /// What is known about the termination.
        reason: String,
    },
}

/// Errors returned by [`crate::controller::PackageController::wait`].
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    /// The package was still pending when the deadline elapsed.
    #[error("package preparation and upload timed out after {timeout:?}")]
    Timeout {
        /// How long the caller waited.
        timeout: Duration,
    },

    /// Package preparation finished with a failure.
    #[error(transparent)]
    Failed(Arc<PackageError>),
}

/// Result type alias for assembly operations.
pub type Result<T> = std::result::Result<T, AssemblyError>;

struct JoinedPaths<'a>(&'a [String]);

impl fmt::Display for JoinedPaths<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

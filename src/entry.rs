//! Package data model: module records, file entries, and archive layout.
//!
//! Everything the runtime needs (its own sources, resolved modules, hook and
//! environment files, generated metadata) lives under [`RUNTIME_DIR`]. User
//! code sits outside it at paths relative to the working directory.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeSet;
use std::fmt;
use std::io;

/// Reserved top-level archive directory for runtime and generated files.
pub const RUNTIME_DIR: &str = ".codepack";

/// File that closes a module directory against namespace merging.
pub const CLOSING_MARKER: &str = "__init__.py";

/// Join `relative` onto [`RUNTIME_DIR`] using archive separators.
#[must_use]
pub fn runtime_archive_path(relative: &str) -> String {
    format!("{RUNTIME_DIR}/{}", relative.trim_start_matches('/'))
}

/// An importable unit and the filesystem roots it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Top-level module name.
    pub name: String,
    /// Directories (or a single file) the module was loaded from.
    pub root_paths: BTreeSet<Utf8PathBuf>,
}

impl ModuleRecord {
    /// Create a record from already-resolved roots.
    #[must_use]
    pub fn new<I, P>(name: impl Into<String>, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        Self {
            name: name.into(),
            root_paths: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a record, canonicalising each root.
    ///
    /// # Errors
    ///
    /// Returns an error if any root does not exist.
    pub fn resolved<I, P>(name: impl Into<String>, roots: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Utf8Path>,
    {
        let root_paths = roots
            .into_iter()
            .map(|root| root.as_ref().canonicalize_utf8())
            .collect::<io::Result<_>>()?;
        Ok(Self {
            name: name.into(),
            root_paths,
        })
    }
}

/// Where the bytes of a packaged file come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileSource {
    /// A file on disk; symlinks are followed when archived.
    Path(Utf8PathBuf),
    /// A synthesised zero-length file.
    Empty,
}

impl FileSource {
    /// The on-disk path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Path(path) => Some(path.as_path()),
            Self::Empty => None,
        }
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{path}"),
            Self::Empty => f.write_str("<empty>"),
        }
    }
}

/// A single file destined for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Origin of the file contents.
    pub source: FileSource,
    /// Relative, `/`-separated path inside the archive.
    pub archive_path: String,
}

impl FileEntry {
    /// An entry backed by a file on disk.
    #[must_use]
    pub fn from_path(source: impl Into<Utf8PathBuf>, archive_path: impl Into<String>) -> Self {
        Self {
            source: FileSource::Path(source.into()),
            archive_path: archive_path.into(),
        }
    }

    /// A synthesised empty entry.
    #[must_use]
    pub fn empty(archive_path: impl Into<String>) -> Self {
        Self {
            source: FileSource::Empty,
            archive_path: archive_path.into(),
        }
    }
}

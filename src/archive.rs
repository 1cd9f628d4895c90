//! Deterministic `.tgz` serialisation of a package.
//!
//! Identical logical content always produces identical bytes: every entry
//! carries the same modification time, ownership and permission bits are
//! normalised, and the gzip header timestamp is cleared. The archive digest
//! can therefore serve as a cache key.

use crate::entry::{FileEntry, FileSource};
use crate::error::{AssemblyError, Result};
use crate::special::{SpecialContentStore, SpecialFile};
use camino::Utf8Path;
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use tar::{Archive, Builder, EntryType, Header, HeaderMode};
use thiserror::Error;

/// Modification time stamped on every archive entry (2019-12-03 08:00 UTC).
pub const FIXED_MTIME: u64 = 1_575_360_000;

/// Gzip level used for packages.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 3;

/// Package size above which a warning is reported.
pub const DEFAULT_SIZE_WARNING_BYTES: u64 = 100 * 1024 * 1024;

const REGULAR_FILE_MODE: u32 = 0o644;

/// A package that exceeded the size warning threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OversizeWarning {
    /// Size of the compressed package in bytes.
    pub size: u64,
    /// Threshold that was exceeded.
    pub threshold: u64,
}

impl fmt::Display for OversizeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the package size exceeds {}; the package size is {}. This may lead to slower \
             upload times for remote runs or no uploads for local runs. Consider reducing \
             the package size.",
            format_size(self.threshold),
            format_size(self.size)
        )
    }
}

/// Output of [`ArchiveBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    /// Compressed archive bytes.
    pub bytes: Vec<u8>,
    /// Set when the archive exceeded the size warning threshold.
    pub oversize: Option<OversizeWarning>,
}

/// Serialises files and special content into a reproducible archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveBuilder {
    compression_level: u32,
    size_warning_bytes: u64,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            size_warning_bytes: DEFAULT_SIZE_WARNING_BYTES,
        }
    }
}

impl ArchiveBuilder {
    /// Create a builder with the default compression level and threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the gzip compression level (0-9).
    #[must_use]
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Override the size above which a warning is reported.
    #[must_use]
    pub fn with_size_warning(mut self, bytes: u64) -> Self {
        self.size_warning_bytes = bytes;
        self
    }

    /// Build the archive: special content first, then `files` in order.
    ///
    /// Symlinked sources are dereferenced so the archive only ever holds
    /// regular files. Exceeding the size threshold is logged and reported
    /// through [`BuiltArchive::oversize`], never as an error.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Io`] if a source cannot be read or the
    /// archive cannot be encoded.
    pub fn build(
        &self,
        files: &[FileEntry],
        special: &SpecialContentStore,
    ) -> Result<BuiltArchive> {
        let encoder = GzBuilder::new()
            .mtime(0)
            .operating_system(255)
            .write(Vec::new(), Compression::new(self.compression_level));
        let mut builder = Builder::new(encoder);
        builder.mode(HeaderMode::Deterministic);

        for (file, bytes) in special.entries() {
            append_bytes(&mut builder, &file.archive_path(), bytes)?;
        }
        for entry in files {
            match &entry.source {
                FileSource::Path(path) => append_file(&mut builder, path, &entry.archive_path)?,
                FileSource::Empty => append_bytes(&mut builder, &entry.archive_path, &[])?,
            }
        }

        let mut bytes = builder
            .into_inner()
            .and_then(flate2::write::GzEncoder::finish)
            .map_err(|err| AssemblyError::io("<package>", err))?;
        // The compressor stamps wall-clock time into the gzip MTIME field.
        if let Some(mtime) = bytes.get_mut(4..8) {
            mtime.fill(0);
        }

        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let oversize = (size > self.size_warning_bytes).then(|| {
            let warning = OversizeWarning {
                size,
                threshold: self.size_warning_bytes,
            };
            log::warn!("{warning}");
            warning
        });
        log::debug!(
            "packaged {} file(s) and {} special file(s) into {}",
            files.len(),
            special.len(),
            format_size(size)
        );
        Ok(BuiltArchive { bytes, oversize })
    }
}

fn append_bytes<W: io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
    header.set_mode(REGULAR_FILE_MODE);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(FIXED_MTIME);
    builder
        .append_data(&mut header, name, bytes)
        .map_err(|err| AssemblyError::io(name, err))
}

fn append_file<W: io::Write>(
    builder: &mut Builder<W>,
    source: &Utf8Path,
    name: &str,
) -> Result<()> {
    let mut file = File::open(source).map_err(|err| AssemblyError::io(source, err))?;
    let metadata = file
        .metadata()
        .map_err(|err| AssemblyError::io(source, err))?;
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&metadata, HeaderMode::Deterministic);
    header.set_mtime(FIXED_MTIME);
    builder
        .append_data(&mut header, name, &mut file)
        .map_err(|err| AssemblyError::io(source, err))
}

/// Render `bytes` with a binary unit, e.g. `1.50 KB`.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    reason = "sizes are rendered to two decimal places"
)]
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

/// Errors raised while reading an existing package.
#[derive(Debug, Error)]
pub enum ArchiveReadError {
    /// The package could not be decompressed or parsed.
    #[error("failed to read package archive: {0}")]
    Io(#[from] io::Error),
}

/// Read-only view over package bytes.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ArchiveReader<'a> {
    /// Wrap compressed package bytes.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn archive(&self) -> Archive<GzDecoder<&'a [u8]>> {
        Archive::new(GzDecoder::new(self.bytes))
    }

    /// Entry paths in archive order.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a gzip-compressed tar archive.
    pub fn entry_names(&self) -> std::result::Result<Vec<String>, ArchiveReadError> {
        let mut archive = self.archive();
        let mut names = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            names.push(entry.path()?.to_string_lossy().into_owned());
        }
        Ok(names)
    }

    /// Contents of the entry at `name`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read.
    pub fn read_entry(
        &self,
        name: &str,
    ) -> std::result::Result<Option<Vec<u8>>, ArchiveReadError> {
        let mut archive = self.archive();
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.path()?.to_string_lossy() != name {
                continue;
            }
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(Some(contents));
        }
        Ok(None)
    }

    /// Contents of `file`, checking the runtime directory first and then
    /// the top level, where older packages stored special files.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read.
    pub fn read_special(
        &self,
        file: SpecialFile,
    ) -> std::result::Result<Option<Vec<u8>>, ArchiveReadError> {
        if let Some(contents) = self.read_entry(&file.archive_path())? {
            return Ok(Some(contents));
        }
        self.read_entry(file.file_name())
    }
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;

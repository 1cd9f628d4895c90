//! Conflict-checked merging of file contributions.
//!
//! Every source that contributes files to a package funnels through one
//! [`FileAggregator`]. Archive paths are unique: re-adding an identical
//! `(source, archive path)` pair is a no-op, while a second source for an
//! existing archive path is a [`AssemblyError::NameCollision`]. Insertion
//! order is preserved because it is the order files are archived in.

use crate::entry::{FileEntry, FileSource, runtime_archive_path};
use crate::error::{AssemblyError, Result};
use crate::special::SpecialFile;
use crate::suffixes::SuffixList;
use crate::walk::walk;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;

/// The authoritative set of files destined for a package.
#[derive(Debug, Default)]
pub struct FileAggregator {
    entries: Vec<FileEntry>,
    by_archive: HashMap<String, usize>,
    by_source: HashMap<Utf8PathBuf, usize>,
}

impl FileAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry. Returns `false` when the identical pair was present.
    ///
    /// Path sources are canonicalised first, so a file reached through
    /// two aliases counts as the same source.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::NameCollision`] if the archive path is
    /// already mapped from a different source or is reserved for a
    /// [`SpecialFile`], or an I/O error if a source path cannot be resolved.
    pub fn add_file(&mut self, entry: FileEntry) -> Result<bool> {
        let source = match entry.source {
            FileSource::Path(path) => FileSource::Path(
                path.canonicalize_utf8()
                    .map_err(|err| AssemblyError::io(path, err))?,
            ),
            FileSource::Empty => FileSource::Empty,
        };

        if let Some(special) = SpecialFile::ALL
            .into_iter()
            .find(|special| special.archive_path() == entry.archive_path)
        {
            return Err(AssemblyError::NameCollision {
                archive_path: entry.archive_path,
                sources: vec![format!("<generated {special}>"), source.to_string()],
            });
        }

        if let Some(current) = self
            .by_archive
            .get(&entry.archive_path)
            .and_then(|&index| self.entries.get(index))
            .map(|existing| &existing.source)
        {
            if *current == source {
                return Ok(false);
            }
            return Err(AssemblyError::NameCollision {
                archive_path: entry.archive_path,
                sources: vec![current.to_string(), source.to_string()],
            });
        }

        log::debug!("adding {source} as {}", entry.archive_path);
        let index = self.entries.len();
        if let FileSource::Path(path) = &source {
            self.by_source.entry(path.clone()).or_insert(index);
        }
        self.by_archive.insert(entry.archive_path.clone(), index);
        self.entries.push(FileEntry {
            source,
            archive_path: entry.archive_path,
        });
        Ok(true)
    }

    /// Add every entry in `entries`, stopping at the first conflict.
    ///
    /// # Errors
    ///
    /// See [`Self::add_file`].
    pub fn add_files<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = FileEntry>,
    {
        for entry in entries {
            self.add_file(entry)?;
        }
        Ok(())
    }

    /// Add `(source, relative name)` pairs beneath the reserved runtime
    /// directory.
    ///
    /// # Errors
    ///
    /// See [`Self::add_file`].
    pub fn add_runtime_files<I>(&mut self, files: I) -> Result<()>
    where
        I: IntoIterator<Item = (Utf8PathBuf, String)>,
    {
        self.add_files(
            files
                .into_iter()
                .map(|(source, name)| FileEntry::from_path(source, runtime_archive_path(&name))),
        )
    }

    /// Add files contributed by a step hook.
    ///
    /// Several steps commonly contribute the same dependency; those repeats
    /// collapse into a single archive entry. A file name contributed from
    /// two different sources is a conflict.
    ///
    /// # Errors
    ///
    /// See [`Self::add_file`].
    pub fn add_hook_files<I>(&mut self, step: &str, files: I) -> Result<()>
    where
        I: IntoIterator<Item = (Utf8PathBuf, String)>,
    {
        for (source, name) in files {
            let added =
                self.add_file(FileEntry::from_path(source, runtime_archive_path(&name)))?;
            if !added {
                log::debug!("step {step}: {name} already packaged by another step");
            }
        }
        Ok(())
    }

    /// Add the files under `directory` accepted by `predicate`.
    ///
    /// Files land beneath the runtime directory, inside a folder named after
    /// `directory`. `predicate` receives each file's real path; names ending
    /// with an `exclude` suffix are skipped before it is consulted.
    ///
    /// # Errors
    ///
    /// Propagates traversal failures and [`Self::add_file`] errors.
    pub fn add_directory<F>(
        &mut self,
        directory: &Utf8Path,
        exclude: &SuffixList,
        predicate: F,
    ) -> Result<()>
    where
        F: Fn(&Utf8Path) -> bool,
    {
        let name = directory.file_name().unwrap_or_default();
        log::debug!("adding directory {directory}");
        for listing in walk(directory) {
            let listing = listing?;
            let relative_dir = listing
                .path
                .strip_prefix(directory)
                .unwrap_or(listing.path.as_path());
            for file in &listing.files {
                if exclude.ends_with_any(file) {
                    continue;
                }
                let path = listing.path.join(file);
                let real = path
                    .canonicalize_utf8()
                    .map_err(|err| AssemblyError::io(&path, err))?;
                if !predicate(&real) {
                    continue;
                }
                let relative = relative_dir.join(file);
                self.add_file(FileEntry::from_path(
                    real,
                    runtime_archive_path(&format!("{name}/{relative}")),
                ))?;
            }
        }
        Ok(())
    }

    /// The archive path of the file at `path`, if it is already included.
    #[must_use]
    pub fn path_in_archive(&self, path: &Utf8Path) -> Option<&str> {
        let real = path.canonicalize_utf8().ok()?;
        self.by_source
            .get(&real)
            .and_then(|&index| self.entries.get(index))
            .map(|entry| entry.archive_path.as_str())
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn files(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Consume the aggregator, yielding entries in insertion order.
    #[must_use]
    pub fn into_files(self) -> Vec<FileEntry> {
        self.entries
    }

    /// Number of distinct archive entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return true if no file has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Cycle-safe directory traversal.
//!
//! [`walk`] is a depth-first walk that follows symlinked directories but
//! never enters the same real directory twice, so cyclic or aliased link
//! graphs terminate after visiting each distinct directory once. [`collect`]
//! and [`collect_contents`] filter the walk down to packageable files.

use crate::suffixes::SuffixList;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::io;
use thiserror::Error;

/// Errors raised while traversing a directory tree.
#[derive(Debug, Error)]
pub enum WalkError {
    /// A directory could not be listed or resolved.
    #[error("failed to read directory {path}: {source}")]
    Io {
        /// The directory being read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// The files found directly inside one visited directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    /// Path of the directory as reached from the walk root.
    pub path: Utf8PathBuf,
    /// Names of non-directory entries, sorted.
    pub files: Vec<String>,
}

/// Walk `root` depth-first, following symlinked directories once per target.
///
/// Each call starts a fresh traversal with an empty visited set. Entries are
/// visited in sorted order, and real subdirectories are descended before
/// symlinked ones so files keep their real location when a link aliases a
/// directory that is also reachable directly.
///
/// # Examples
///
/// ```no_run
/// use camino::Utf8Path;
/// use codepack::walk::walk;
///
/// for listing in walk(Utf8Path::new("/srv/flows")) {
///     let listing = listing?;
///     println!("{}: {} file(s)", listing.path, listing.files.len());
/// }
/// # Ok::<(), codepack::walk::WalkError>(())
/// ```
#[must_use]
pub fn walk(root: &Utf8Path) -> Walk {
    Walk {
        pending: vec![root.to_owned()],
        visited: HashSet::new(),
    }
}

/// Iterator returned by [`walk`].
#[derive(Debug)]
pub struct Walk {
    pending: Vec<Utf8PathBuf>,
    visited: HashSet<Utf8PathBuf>,
}

impl Walk {
    fn visit(&mut self, dir: &Utf8Path) -> Result<Option<DirectoryListing>, WalkError> {
        let real = dir.canonicalize_utf8().map_err(|source| WalkError::Io {
            path: dir.to_owned(),
            source,
        })?;
        if !self.visited.insert(real) {
            log::debug!("skipping already visited directory {dir}");
            return Ok(None);
        }

        let mut files = Vec::new();
        let mut real_dirs = Vec::new();
        let mut linked_dirs = Vec::new();
        let read_err = |source| WalkError::Io {
            path: dir.to_owned(),
            source,
        };
        for entry in dir.as_std_path().read_dir().map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    log::warn!(
                        "skipping non UTF-8 entry {} in {dir}",
                        raw.to_string_lossy()
                    );
                    continue;
                }
            };
            let file_type = entry.file_type().map_err(read_err)?;
            let path = dir.join(&name);
            if file_type.is_dir() {
                real_dirs.push(path);
            } else if file_type.is_symlink() && path.is_dir() {
                linked_dirs.push(path);
            } else {
                files.push(name);
            }
        }
        files.sort();
        real_dirs.sort();
        linked_dirs.sort();

        // The stack pops from the back, so push in reverse visiting order.
        self.pending.extend(linked_dirs.into_iter().rev());
        self.pending.extend(real_dirs.into_iter().rev());

        Ok(Some(DirectoryListing {
            path: dir.to_owned(),
            files,
        }))
    }
}

impl Iterator for Walk {
    type Item = Result<DirectoryListing, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(dir) = self.pending.pop() {
            match self.visit(&dir) {
                Ok(Some(listing)) => return Some(Ok(listing)),
                Ok(None) => {}
                Err(err) => {
                    self.pending.clear();
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

/// A file selected for packaging and its path inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFile {
    /// Absolute (as reached) path on disk.
    pub path: Utf8PathBuf,
    /// Relative path to use inside the archive.
    pub archive_path: String,
}

/// Collect packageable files under `root`, named relative to its parent.
///
/// The archive paths therefore begin with the final component of `root`.
///
/// # Errors
///
/// Returns a [`WalkError`] if any directory cannot be read.
pub fn collect(
    root: &Utf8Path,
    exclude_hidden: bool,
    suffixes: &SuffixList,
) -> Result<Vec<CollectedFile>, WalkError> {
    let base = root.parent().unwrap_or(Utf8Path::new(""));
    collect_relative_to(root, base, exclude_hidden, suffixes)
}

/// Collect packageable files under `root`, named relative to `root` itself.
///
/// # Errors
///
/// Returns a [`WalkError`] if any directory cannot be read.
pub fn collect_contents(
    root: &Utf8Path,
    exclude_hidden: bool,
    suffixes: &SuffixList,
) -> Result<Vec<CollectedFile>, WalkError> {
    collect_relative_to(root, root, exclude_hidden, suffixes)
}

fn collect_relative_to(
    root: &Utf8Path,
    base: &Utf8Path,
    exclude_hidden: bool,
    suffixes: &SuffixList,
) -> Result<Vec<CollectedFile>, WalkError> {
    let mut collected = Vec::new();
    for listing in walk(root) {
        let listing = listing?;
        let relative_dir = listing.path.strip_prefix(base).unwrap_or(&listing.path);
        if exclude_hidden && is_hidden(relative_dir) {
            continue;
        }
        for name in listing.files {
            if !suffixes.matches(&name) {
                continue;
            }
            collected.push(CollectedFile {
                path: listing.path.join(&name),
                archive_path: relative_dir.join(&name).into_string(),
            });
        }
    }
    Ok(collected)
}

/// Return true when any component of `path` starts with a dot.
fn is_hidden(path: &Utf8Path) -> bool {
    path.components()
        .any(|component| component.as_str().starts_with('.') && component.as_str() != ".")
}

#[cfg(test)]
#[path = "walk_tests.rs"]
mod tests;

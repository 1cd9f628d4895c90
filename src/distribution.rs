//! Mapping module records onto the files that make them up.
//!
//! A module may be backed by one or more installed distributions, by loose
//! files on disk (an editable or local checkout), or by both. The
//! [`DistributionResolver`] splits a module's roots between the two:
//! distribution-owned roots are enumerated from the distribution's file
//! manifest, and whatever roots remain are walked directly.
//!
//! Distribution lookups go through a [`DistributionIndex`]; manifests are
//! memoised in an explicit [`DistributionCache`] that callers may share
//! across resolvers on purpose.

use crate::entry::{CLOSING_MARKER, FileEntry, ModuleRecord, runtime_archive_path};
use crate::error::{AssemblyError, Result};
use crate::suffixes::SuffixList;
use crate::walk::walk;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

const DIST_INFO_SUFFIX: &str = ".dist-info";
const MODULE_FILE_SUFFIXES: &[&str] = &[".py", ".pyc", ".so", ".pyd"];

/// Errors raised while reading distribution metadata.
#[derive(Debug, Error)]
pub enum DistributionError {
    /// A metadata file could not be read.
    #[error("failed to read distribution metadata {path}: {source}")]
    Io {
        /// The metadata path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The `METADATA` file does not declare a `Name` header.
    #[error("distribution metadata at {path} has no Name header")]
    MissingName {
        /// The metadata path.
        path: Utf8PathBuf,
    },

    /// The index has no distribution by this name.
    #[error("unknown distribution '{name}'")]
    NotFound {
        /// The requested distribution name.
        name: String,
    },
}

/// Description of one installed distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionManifest {
    /// Declared distribution name.
    pub name: String,
    /// Directory the manifest's relative paths resolve against.
    pub location: Utf8PathBuf,
    /// Relative, `/`-separated paths of every installed file.
    pub files: Vec<String>,
    /// Raw `METADATA` text.
    pub metadata_text: String,
    /// Raw `RECORD` text.
    pub record_text: String,
}

impl DistributionManifest {
    /// Absolute location of a manifest-relative path.
    #[must_use]
    pub fn locate(&self, relative: &str) -> Utf8PathBuf {
        self.location.join(relative)
    }

    /// The root this distribution occupies for `module`, if it ships it.
    ///
    /// A package resolves to `location/module`; a single-file module
    /// resolves to the top-level file whose stem is the module name.
    #[must_use]
    pub fn module_root(&self, module: &str) -> Option<ModuleRoot> {
        let prefix = format!("{module}/");
        if self.files.iter().any(|f| f.starts_with(&prefix)) {
            return Some(ModuleRoot::Package(self.locate(module)));
        }
        self.files
            .iter()
            .find(|f| !f.contains('/') && module_stem(f) == Some(module))
            .map(|f| ModuleRoot::SingleFile {
                path: self.locate(f),
                relative: f.clone(),
            })
    }
}

/// Where a distribution installed a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleRoot {
    /// A package directory.
    Package(Utf8PathBuf),
    /// A single module file.
    SingleFile {
        /// Absolute path of the file.
        path: Utf8PathBuf,
        /// Manifest-relative path of the file.
        relative: String,
    },
}

impl ModuleRoot {
    /// Absolute path of the root.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::Package(path) | Self::SingleFile { path, .. } => path,
        }
    }
}

/// Source of distribution metadata.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait DistributionIndex: Send + Sync {
    /// Names of the distributions contributing to top-level `module`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be consulted.
    fn distributions_for(
        &self,
        module: &str,
    ) -> std::result::Result<Vec<String>, DistributionError>;

    /// Load the full manifest of distribution `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::NotFound`] for unknown names, or an I/O
    /// error if metadata cannot be read.
    fn load(&self, name: &str) -> std::result::Result<DistributionManifest, DistributionError>;
}

/// An index with no distributions; every module is treated as local.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDistributions;

impl DistributionIndex for NoDistributions {
    fn distributions_for(
        &self,
        _module: &str,
    ) -> std::result::Result<Vec<String>, DistributionError> {
        Ok(Vec::new())
    }

    fn load(&self, name: &str) -> std::result::Result<DistributionManifest, DistributionError> {
        Err(DistributionError::NotFound {
            name: name.to_owned(),
        })
    }
}

/// Memoised distribution manifests keyed by distribution name.
///
/// Clones share storage, so passing the same cache to several resolvers
/// reuses manifests across assembly runs.
#[derive(Debug, Clone, Default)]
pub struct DistributionCache {
    manifests: Arc<Mutex<BTreeMap<String, Arc<DistributionManifest>>>>,
}

impl DistributionCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached manifest for `name`, loading it through `index` once.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`DistributionIndex::load`].
    pub fn get_or_load(
        &self,
        index: &dyn DistributionIndex,
        name: &str,
    ) -> std::result::Result<Arc<DistributionManifest>, DistributionError> {
        if let Some(found) = self.lock().get(name) {
            return Ok(Arc::clone(found));
        }
        let manifest = Arc::new(index.load(name)?);
        self.lock()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Number of cached manifests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Return true if nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<DistributionManifest>>> {
        self.manifests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves module records to file entries.
pub struct DistributionResolver<'a> {
    index: &'a dyn DistributionIndex,
    cache: DistributionCache,
    exclude_suffixes: SuffixList,
    used: BTreeMap<String, Arc<DistributionManifest>>,
}

impl<'a> DistributionResolver<'a> {
    /// Create a resolver over `index`, memoising through `cache`.
    #[must_use]
    pub fn new(
        index: &'a dyn DistributionIndex,
        cache: DistributionCache,
        exclude_suffixes: SuffixList,
    ) -> Self {
        Self {
            index,
            cache,
            exclude_suffixes,
            used: BTreeMap::new(),
        }
    }

    /// Enumerate every file that constitutes `module`.
    ///
    /// Distribution-backed roots contribute their manifest files; leftover
    /// roots are packaged as local files. Unless the module is a lone file,
    /// an empty closing marker is synthesised when none was found so the
    /// packaged module cannot be extended by a namespace package on the
    /// remote host.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::DistributionIntegrity`] when a distribution's
    /// install location is not among the module's roots, and propagates
    /// metadata and traversal failures.
    pub fn resolve_module(&mut self, module: &ModuleRecord) -> Result<Vec<FileEntry>> {
        let name = module.name.as_str();
        log::debug!(
            "looking for distributions for module {name} in {:?}",
            module.root_paths
        );
        let mut remaining = module.root_paths.clone();
        let mut entries = Vec::new();
        let mut has_marker = false;
        let mut has_package_root = false;
        let marker_path = format!("{name}/{CLOSING_MARKER}");

        let mut seen = BTreeSet::new();
        for dist_name in self.index.distributions_for(name)? {
            if !seen.insert(dist_name.clone()) {
                continue;
            }
            let manifest = self.cache.get_or_load(self.index, &dist_name)?;
            let root = manifest
                .module_root(name)
                .ok_or_else(|| AssemblyError::DistributionIntegrity {
                    distribution: manifest.name.clone(),
                    module: name.to_owned(),
                    location: manifest.locate(name),
                })?;
            if !remaining.remove(root.path()) {
                return Err(AssemblyError::DistributionIntegrity {
                    distribution: manifest.name.clone(),
                    module: name.to_owned(),
                    location: root.path().to_owned(),
                });
            }
            log::debug!("including distribution {} for module {name}", manifest.name);

            match &root {
                ModuleRoot::Package(_) => {
                    has_package_root = true;
                    let prefix = format!("{name}/");
                    for file in manifest.files.iter().filter(|f| f.starts_with(&prefix)) {
                        has_marker |= *file == marker_path;
                        entries.push(FileEntry::from_path(
                            manifest.locate(file),
                            runtime_archive_path(file),
                        ));
                    }
                }
                ModuleRoot::SingleFile { path, relative } => {
                    entries.push(FileEntry::from_path(
                        path.clone(),
                        runtime_archive_path(relative),
                    ));
                }
            }
            self.used
                .entry(manifest.name.clone())
                .or_insert_with(|| Arc::clone(&manifest));
        }

        log::debug!("looking for non-distribution files for module {name} in {remaining:?}");
        for root in &remaining {
            if root.is_dir() {
                has_package_root = true;
                has_marker |= self.local_directory_entries(name, root, &mut entries)?;
            } else {
                let file_name = root.file_name().unwrap_or(name);
                entries.push(FileEntry::from_path(
                    root.clone(),
                    runtime_archive_path(file_name),
                ));
            }
        }

        // Modules made only of single files stay unclosed; a marker would shadow `<name>.py`.
        if has_package_root && !has_marker {
            log::debug!("closing module {name} with an empty {CLOSING_MARKER}");
            entries.push(FileEntry::empty(runtime_archive_path(&marker_path)));
        }
        Ok(entries)
    }

    /// Distributions consumed so far, keyed by name.
    #[must_use]
    pub fn distributions_used(&self) -> &BTreeMap<String, Arc<DistributionManifest>> {
        &self.used
    }

    /// Append entries for every file below `root`; return true if the
    /// closing marker sits directly in `root`.
    fn local_directory_entries(
        &self,
        name: &str,
        root: &Utf8Path,
        entries: &mut Vec<FileEntry>,
    ) -> Result<bool> {
        let mut has_marker = false;
        for listing in walk(root) {
            let listing = listing?;
            let relative_dir = listing
                .path
                .strip_prefix(root)
                .unwrap_or(listing.path.as_path());
            for file in &listing.files {
                if self.exclude_suffixes.ends_with_any(file) {
                    continue;
                }
                let relative = relative_dir.join(file);
                has_marker |= relative.as_str() == CLOSING_MARKER;
                entries.push(FileEntry::from_path(
                    listing.path.join(file),
                    runtime_archive_path(&format!("{name}/{relative}")),
                ));
            }
        }
        Ok(has_marker)
    }
}

/// Distribution index over `*.dist-info` directories in site directories.
///
/// Scanning records each distribution's metadata directory and the
/// top-level modules it provides; full manifests are only parsed on
/// [`DistributionIndex::load`].
#[derive(Debug, Clone, Default)]
pub struct DistInfoIndex {
    dist_info: BTreeMap<String, DistInfoLocation>,
    modules: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
struct DistInfoLocation {
    site_dir: Utf8PathBuf,
    dist_info_dir: Utf8PathBuf,
}

impl DistInfoIndex {
    /// Scan `site_dirs` in order. The first distribution seen for a name wins.
    ///
    /// # Errors
    ///
    /// Returns an error if a site directory or a metadata file cannot be
    /// read, or a `METADATA` file declares no name.
    pub fn scan<I, P>(site_dirs: I) -> std::result::Result<Self, DistributionError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Utf8Path>,
    {
        let mut index = Self::default();
        for site_dir in site_dirs {
            index.scan_site_dir(site_dir.as_ref())?;
        }
        Ok(index)
    }

    /// Names of every indexed distribution.
    pub fn distribution_names(&self) -> impl Iterator<Item = &str> {
        self.dist_info.keys().map(String::as_str)
    }

    fn scan_site_dir(
        &mut self,
        site_dir: &Utf8Path,
    ) -> std::result::Result<(), DistributionError> {
        let io_err = |path: &Utf8Path| {
            let path = path.to_owned();
            move |source| DistributionError::Io { path, source }
        };
        let site_dir = site_dir.canonicalize_utf8().map_err(io_err(site_dir))?;
        let mut dist_info_dirs = Vec::new();
        for entry in site_dir.read_dir_utf8().map_err(io_err(&site_dir))? {
            let entry = entry.map_err(io_err(&site_dir))?;
            if entry.file_name().ends_with(DIST_INFO_SUFFIX) && entry.path().is_dir() {
                dist_info_dirs.push(entry.path().to_owned());
            }
        }
        dist_info_dirs.sort();

        for dist_info_dir in dist_info_dirs {
            let metadata_path = dist_info_dir.join("METADATA");
            let metadata = read_text(&metadata_path)?;
            let name = parse_metadata_name(&metadata)
                .ok_or_else(|| DistributionError::MissingName {
                    path: metadata_path.clone(),
                })?;
            if self.dist_info.contains_key(&name) {
                continue;
            }
            for module in top_level_modules(&dist_info_dir)? {
                self.modules.entry(module).or_default().push(name.clone());
            }
            self.dist_info.insert(
                name,
                DistInfoLocation {
                    site_dir: site_dir.clone(),
                    dist_info_dir,
                },
            );
        }
        Ok(())
    }
}

impl DistributionIndex for DistInfoIndex {
    fn distributions_for(
        &self,
        module: &str,
    ) -> std::result::Result<Vec<String>, DistributionError> {
        Ok(self.modules.get(module).cloned().unwrap_or_default())
    }

    fn load(&self, name: &str) -> std::result::Result<DistributionManifest, DistributionError> {
        let location = self
            .dist_info
            .get(name)
            .ok_or_else(|| DistributionError::NotFound {
                name: name.to_owned(),
            })?;
        let metadata_text = read_text(&location.dist_info_dir.join("METADATA"))?;
        let record_text = read_optional_text(&location.dist_info_dir.join("RECORD"))?;
        Ok(DistributionManifest {
            name: name.to_owned(),
            location: location.site_dir.clone(),
            files: parse_record(&record_text),
            metadata_text,
            record_text,
        })
    }
}

/// Modules declared in `top_level.txt`, or inferred from `RECORD`.
fn top_level_modules(
    dist_info_dir: &Utf8Path,
) -> std::result::Result<BTreeSet<String>, DistributionError> {
    let declared = read_optional_text(&dist_info_dir.join("top_level.txt"))?;
    let declared: BTreeSet<String> = declared
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    if !declared.is_empty() {
        return Ok(declared);
    }
    let record = read_optional_text(&dist_info_dir.join("RECORD"))?;
    Ok(infer_top_level(&parse_record(&record)))
}

/// Importable top-level names inferred from a file list.
fn infer_top_level(files: &[String]) -> BTreeSet<String> {
    files
        .iter()
        .map(|file| match file.split_once('/') {
            Some((top, _)) => top,
            None => module_stem(file).unwrap_or(file.as_str()),
        })
        .filter(|name| !name.is_empty() && !name.contains('.'))
        .map(str::to_owned)
        .collect()
}

/// Module name of a top-level module file such as `six.py`.
fn module_stem(file: &str) -> Option<&str> {
    MODULE_FILE_SUFFIXES
        .iter()
        .any(|suffix| file.ends_with(suffix))
        .then(|| file.split('.').next())
        .flatten()
}

/// Value of the `Name` header in a core-metadata document.
fn parse_metadata_name(metadata: &str) -> Option<String> {
    metadata
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .find_map(|line| line.strip_prefix("Name:"))
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
}

/// File paths listed in a `RECORD` document (the first CSV column).
fn parse_record(record: &str) -> Vec<String> {
    record
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(first_csv_field)
        .filter(|field| !field.is_empty())
        .collect()
}

fn first_csv_field(line: &str) -> String {
    let Some(quoted) = line.strip_prefix('"') else {
        return line.split(',').next().unwrap_or_default().to_owned();
    };
    let mut field = String::new();
    let mut chars = quoted.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                field.push('"');
            } else {
                break;
            }
        } else {
            field.push(c);
        }
    }
    field
}

fn read_text(path: &Utf8Path) -> std::result::Result<String, DistributionError> {
    fs::read_to_string(path).map_err(|source| DistributionError::Io {
        path: path.to_owned(),
        source,
    })
}

fn read_optional_text(path: &Utf8Path) -> std::result::Result<String, DistributionError> {
    if path.is_file() {
        read_text(path)
    } else {
        Ok(String::new())
    }
}

#[cfg(test)]
#[path = "distribution_tests.rs"]
mod tests;

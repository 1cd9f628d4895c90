//! Package configuration loaded from `codepack.toml`.
//!
//! Every field is optional. Values missing from the file fall back to the
//! defaults the controller uses when no configuration is supplied, so an
//! empty file and an absent file behave the same way.

use crate::archive::DEFAULT_SIZE_WARNING_BYTES;
use crate::suffixes::{DEFAULT_EXCLUDE_SUFFIXES, SuffixList};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::fs;
use thiserror::Error;

/// Conventional configuration file name.
pub const CONFIG_FILE_NAME: &str = "codepack.toml";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// File being read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings that shape how a package is assembled.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PackageConfig {
    /// Extra suffixes packaged from the working directory, on top of the
    /// default list.
    pub suffixes: Vec<String>,
    /// Suffixes skipped when packaging distributions and local modules.
    pub exclude_suffixes: Vec<String>,
    /// The runtime's own source tree, packaged under the reserved directory.
    pub runtime_root: Option<Utf8PathBuf>,
    /// Package size above which a warning is reported.
    pub size_warning_bytes: u64,
    /// Build on a background thread instead of the calling thread.
    pub background: bool,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            suffixes: Vec::new(),
            exclude_suffixes: DEFAULT_EXCLUDE_SUFFIXES
                .iter()
                .map(|suffix| (*suffix).to_owned())
                .collect(),
            runtime_root: None,
            size_warning_bytes: DEFAULT_SIZE_WARNING_BYTES,
            background: true,
        }
    }
}

impl PackageConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is invalid.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        log::debug!("loaded package configuration from {path}");
        Ok(config)
    }

    /// Read `dir/codepack.toml` when present, otherwise use defaults.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn discover(dir: &Utf8Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Working-directory suffixes: the configured extras merged with the
    /// default list.
    #[must_use]
    pub fn effective_suffixes(&self) -> SuffixList {
        SuffixList::with_defaults(&self.suffixes)
    }

    /// Suffixes excluded from distributions and local modules.
    #[must_use]
    pub fn exclude_list(&self) -> SuffixList {
        SuffixList::new(&self.exclude_suffixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suffixes::DEFAULT_SUFFIXES_ENV;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn defaults_match_builtin_behaviour() {
        let config = PackageConfig::default();

        assert!(config.suffixes.is_empty());
        assert_eq!(config.exclude_suffixes, vec![".pyc".to_owned()]);
        assert_eq!(config.size_warning_bytes, 100 * 1024 * 1024);
        assert!(config.background);
        assert!(config.runtime_root.is_none());
    }

    #[rstest]
    fn empty_document_yields_defaults() {
        let config = PackageConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, PackageConfig::default());
    }

    #[rstest]
    fn deserialises_overrides_from_toml() {
        let source = concat!(
            "suffixes = [\".sql\", \".yaml\"]\n",
            "exclude_suffixes = [\".pyc\", \".so\"]\n",
            "runtime_root = \"/opt/runtime\"\n",
            "size_warning_bytes = 1024\n",
            "background = false\n",
        );

        let config = PackageConfig::from_toml_str(source)
            .expect("expected configuration to parse successfully");

        assert_eq!(config.suffixes, vec![".sql".to_owned(), ".yaml".to_owned()]);
        assert_eq!(config.runtime_root, Some(Utf8PathBuf::from("/opt/runtime")));
        assert_eq!(config.size_warning_bytes, 1024);
        assert!(!config.background);
        assert!(config.exclude_list().ends_with_any("native.so"));
    }

    #[rstest]
    fn rejects_unknown_fields() {
        let outcome = PackageConfig::from_toml_str("compression = 9\n");
        assert!(matches!(outcome, Err(ConfigError::Parse(_))));
    }

    #[rstest]
    fn effective_suffixes_always_include_defaults() {
        temp_env::with_var_unset(DEFAULT_SUFFIXES_ENV, || {
            let config = PackageConfig {
                suffixes: vec![".sql".to_owned()],
                ..PackageConfig::default()
            };
            let suffixes = config.effective_suffixes();

            assert!(suffixes.matches("flow.py"));
            assert!(suffixes.matches("model.RDS"));
            assert!(suffixes.matches("query.sql"));
            assert!(!suffixes.matches("data.bin"));
        });
    }

    #[rstest]
    fn discover_falls_back_to_defaults_without_a_file() {
        let temp = TempDir::new().expect("temp dir");
        let dir = Utf8Path::from_path(temp.path()).expect("utf-8 path");

        let config = PackageConfig::discover(dir).expect("discover");
        assert_eq!(config, PackageConfig::default());
    }

    #[rstest]
    fn load_reports_the_missing_path() {
        let err = PackageConfig::load(Utf8Path::new("/no/such/codepack.toml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("/no/such/codepack.toml"));
    }
}

//! Suffix allowlists deciding which files enter a package.
//!
//! Dotfiles match only when their full name is listed; every other file
//! matches when its name ends with one of the listed suffixes.

use std::env;

/// Environment variable overriding the built-in default suffix list.
pub const DEFAULT_SUFFIXES_ENV: &str = "CODEPACK_DEFAULT_PACKAGE_SUFFIXES";

/// Built-in suffixes packaged from the user's working directory.
pub const DEFAULT_PACKAGE_SUFFIXES: &[&str] = &[".py", ".R", ".RDS"];

/// Suffixes packaged from the runtime's own source tree, regardless of input.
pub const RUNTIME_SUFFIXES: &[&str] = &[".py", ".html", ".css", ".js"];

/// Suffixes never packaged from distributions or local module directories.
pub const DEFAULT_EXCLUDE_SUFFIXES: &[&str] = &[".pyc"];

/// An ordered, de-duplicated list of file-name suffixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuffixList(Vec<String>);

impl SuffixList {
    /// Build a list from `suffixes`, dropping blanks and duplicates.
    #[must_use]
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        list.extend(suffixes);
        list
    }

    /// Union of `extra` and [`default_package_suffixes`].
    #[must_use]
    pub fn with_defaults<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = default_package_suffixes();
        list.extend(extra);
        list
    }

    /// The fixed runtime source suffixes.
    #[must_use]
    pub fn runtime() -> Self {
        Self::new(RUNTIME_SUFFIXES.iter().copied())
    }

    /// Append suffixes not already present.
    pub fn extend<I, S>(&mut self, suffixes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for suffix in suffixes {
            let suffix = suffix.as_ref().trim();
            if suffix.is_empty() || self.0.iter().any(|s| s == suffix) {
                continue;
            }
            self.0.push(suffix.to_owned());
        }
    }

    /// Return true if `file_name` should be packaged.
    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        if file_name.starts_with('.') {
            self.0.iter().any(|s| s == file_name)
        } else {
            self.ends_with_any(file_name)
        }
    }

    /// Return true if `file_name` ends with any listed suffix.
    #[must_use]
    pub fn ends_with_any(&self, file_name: &str) -> bool {
        self.0.iter().any(|s| file_name.ends_with(s.as_str()))
    }

    /// Iterate over the suffixes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of distinct suffixes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return true if no suffix is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The default user-tree suffixes, honouring [`DEFAULT_SUFFIXES_ENV`].
///
/// The variable holds a comma-separated list; when unset or blank the
/// built-in [`DEFAULT_PACKAGE_SUFFIXES`] apply.
#[must_use]
pub fn default_package_suffixes() -> SuffixList {
    match env::var(DEFAULT_SUFFIXES_ENV) {
        Ok(raw) if !raw.trim().is_empty() => SuffixList::new(raw.split(',')),
        _ => SuffixList::new(DEFAULT_PACKAGE_SUFFIXES.iter().copied()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain_suffix("flow.py", true)]
    #[case::r_script("analysis.R", true)]
    #[case::unlisted("data.bin", false)]
    #[case::dotfile_not_listed(".gitignore", false)]
    #[case::dotfile_with_listed_suffix(".secret.py", false)]
    fn matches_follows_dotfile_rule(#[case] name: &str, #[case] expected: bool) {
        let list = SuffixList::new([".py", ".R"]);
        assert_eq!(list.matches(name), expected);
    }

    #[rstest]
    fn dotfile_matches_when_listed_exactly() {
        let list = SuffixList::new([".codepackrc", ".py"]);
        assert!(list.matches(".codepackrc"));
        assert!(!list.matches(".other"));
    }

    #[rstest]
    fn new_drops_duplicates_and_blanks() {
        let list = SuffixList::new([".py", " ", ".py", ".js "]);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![".py", ".js"]);
    }

    #[rstest]
    fn with_defaults_is_superset_of_defaults() {
        temp_env::with_var_unset(DEFAULT_SUFFIXES_ENV, || {
            let list = SuffixList::with_defaults([".txt", ".py"]);
            for default in DEFAULT_PACKAGE_SUFFIXES {
                assert!(list.iter().any(|s| s == *default), "missing {default}");
            }
            assert!(list.iter().any(|s| s == ".txt"));
            assert_eq!(list.len(), DEFAULT_PACKAGE_SUFFIXES.len() + 1);
        });
    }

    #[rstest]
    fn env_override_replaces_builtin_defaults() {
        temp_env::with_var(DEFAULT_SUFFIXES_ENV, Some(".py,.sql"), || {
            let list = default_package_suffixes();
            assert_eq!(list.iter().collect::<Vec<_>>(), vec![".py", ".sql"]);
        });
    }

    #[rstest]
    fn blank_env_override_falls_back_to_builtin() {
        temp_env::with_var(DEFAULT_SUFFIXES_ENV, Some("  "), || {
            assert_eq!(
                default_package_suffixes(),
                SuffixList::new(DEFAULT_PACKAGE_SUFFIXES.iter().copied())
            );
        });
    }
}

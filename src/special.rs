//! Generated metadata blobs placed at fixed archive locations.

use crate::entry::runtime_archive_path;
use std::collections::BTreeMap;
use std::fmt;

/// A well-known generated file.
///
/// Variant order is the order entries are written into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpecialFile {
    /// JSON-encoded environment description.
    Info,
    /// JSON-encoded configuration snapshot.
    Config,
}

impl SpecialFile {
    /// Every special file, in archive order.
    pub const ALL: [Self; 2] = [Self::Info, Self::Config];

    /// Bare file name of the special file.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Config => "CONFIG_PARAMETERS",
        }
    }

    /// Location of the special file inside the archive.
    #[must_use]
    pub fn archive_path(self) -> String {
        runtime_archive_path(self.file_name())
    }
}

impl fmt::Display for SpecialFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// In-memory content for [`SpecialFile`]s.
#[derive(Debug, Clone, Default)]
pub struct SpecialContentStore {
    contents: BTreeMap<SpecialFile, Vec<u8>>,
}

impl SpecialContentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the content for `file`, replacing anything stored before.
    pub fn put(&mut self, file: SpecialFile, bytes: impl Into<Vec<u8>>) {
        self.contents.insert(file, bytes.into());
    }

    /// Serialise `value` as JSON and store it for `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be encoded.
    pub fn put_json<T>(&mut self, file: SpecialFile, value: &T) -> serde_json::Result<()>
    where
        T: serde::Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(value)?;
        self.put(file, bytes);
        Ok(())
    }

    /// Stored content for `file`.
    #[must_use]
    pub fn get(&self, file: SpecialFile) -> Option<&[u8]> {
        self.contents.get(&file).map(Vec::as_slice)
    }

    /// Stored entries in archive order.
    pub fn entries(&self) -> impl Iterator<Item = (SpecialFile, &[u8])> {
        self.contents
            .iter()
            .map(|(file, bytes)| (*file, bytes.as_slice()))
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    /// Return true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(SpecialFile::Info, ".codepack/INFO")]
    #[case(SpecialFile::Config, ".codepack/CONFIG_PARAMETERS")]
    fn archive_paths_live_under_runtime_dir(#[case] file: SpecialFile, #[case] expected: &str) {
        assert_eq!(file.archive_path(), expected);
    }

    #[rstest]
    fn put_overwrites_previous_content() {
        let mut store = SpecialContentStore::new();
        store.put(SpecialFile::Info, b"first".to_vec());
        store.put(SpecialFile::Info, b"second".to_vec());

        assert_eq!(store.get(SpecialFile::Info), Some(&b"second"[..]));
        assert_eq!(store.len(), 1);
    }

    #[rstest]
    fn entries_follow_enum_order_not_insertion_order() {
        let mut store = SpecialContentStore::new();
        store.put(SpecialFile::Config, b"{}".to_vec());
        store
            .put_json(SpecialFile::Info, &json!({"python": "3.11"}))
            .expect("encode info");

        let order: Vec<SpecialFile> = store.entries().map(|(file, _)| file).collect();
        assert_eq!(order, SpecialFile::ALL.to_vec());
    }
}

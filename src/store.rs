//! Content-addressed package storage on the local filesystem.

use crate::error::StorageError;
use crate::hooks::{PackageStore, StoredBlob};
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use tempfile::NamedTempFile;

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Stores each blob at `<root>/<sha256>`.
///
/// Objects are immutable: a blob whose digest is already present is not
/// rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStore {
    root: Utf8PathBuf,
}

impl LocalStore {
    /// A store rooted at `root`; the directory is created on first save.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding stored objects.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn save_one(&self, blob: &[u8]) -> Result<StoredBlob, StorageError> {
        let digest = sha256_hex(blob);
        let location = self.root.join(&digest);
        let io_err = |source: io::Error| StorageError::Io {
            location: location.clone(),
            source,
        };
        if location.is_file() {
            log::debug!("package {digest} already stored");
        } else {
            // The staging file is unique per save and removed if persisting fails.
            let mut staging = NamedTempFile::new_in(&self.root).map_err(io_err)?;
            staging.write_all(blob).map_err(io_err)?;
            staging
                .persist(&location)
                .map_err(|err| io_err(err.error))?;
        }
        let absolute = location.canonicalize_utf8().map_err(io_err)?;
        Ok(StoredBlob {
            url: format!("file://{absolute}"),
            digest,
        })
    }
}

impl PackageStore for LocalStore {
    fn save(&self, blobs: &[Vec<u8>], len_hint: usize) -> Result<Vec<StoredBlob>, StorageError> {
        fs::create_dir_all(&self.root).map_err(|source| StorageError::Io {
            location: self.root.clone(),
            source,
        })?;
        let mut stored = Vec::with_capacity(len_hint.max(blobs.len()));
        for blob in blobs {
            stored.push(self.save_one(blob)?);
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::try_from(temp.path().join("objects")).expect("utf-8 path");
        (temp, LocalStore::new(root))
    }

    #[rstest]
    fn save_writes_blob_under_its_digest() {
        let (_temp, store) = store();

        let stored = store.save(&[b"package".to_vec()], 1).expect("save");

        assert_eq!(stored.len(), 1);
        let blob = &stored[0];
        assert_eq!(blob.digest, sha256_hex(b"package"));
        assert!(blob.url.starts_with("file://"));
        assert!(blob.url.ends_with(&blob.digest));
        assert_eq!(
            fs::read(store.root().join(&blob.digest)).expect("read object"),
            b"package"
        );
    }

    #[rstest]
    fn saving_identical_content_twice_reuses_the_object() {
        let (_temp, store) = store();

        let first = store.save(&[b"same".to_vec()], 1).expect("first save");
        let second = store.save(&[b"same".to_vec()], 1).expect("second save");

        assert_eq!(first, second);
        let objects = fs::read_dir(store.root()).expect("list").count();
        assert_eq!(objects, 1);
    }

    #[rstest]
    fn concurrent_saves_of_one_blob_leave_a_single_object() {
        let (_temp, store) = store();
        let blob = vec![7_u8; 64 * 1024];

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.save(std::slice::from_ref(&blob), 1)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("saver thread"))
                .collect()
        });

        for result in results {
            let stored = result.expect("save");
            assert_eq!(stored[0].digest, sha256_hex(&blob));
        }
        let entries: Vec<_> = fs::read_dir(store.root())
            .expect("list")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(sha256_hex(&blob))]);
        assert_eq!(
            fs::read(store.root().join(sha256_hex(&blob))).expect("read object"),
            blob
        );
    }

    #[rstest]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

//! Offline storage indexes - JSON snapshots of hashed folders
//!
//! An index stands in for a folder that is no longer online: scans can
//! match against its recorded names, sizes, and digests without touching
//! the original media.

use super::{ContainerKind, FileReference, archive_kind, enumerate_storage};
use crate::checksum;
use crate::dat::{self, ChecksumSet, Header};
use crate::error::Result;
use crate::services::cancel::CancelToken;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One file recorded in an offline index. Digests are lowercase hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFile {
    pub container: PathBuf,
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc32: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// A snapshot of an enumerated, hashed storage folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineIndex {
    pub root: PathBuf,
    pub created: String,
    pub files: Vec<IndexedFile>,
}

impl OfflineIndex {
    /// Hash every file under `root` and record it. Polls `cancel` per
    /// file; a canceled build returns the entries recorded so far.
    pub fn build(root: &Path, cancel: &CancelToken) -> Result<Self> {
        let header = Header::default();
        let mut index = OfflineIndex {
            root: root.to_path_buf(),
            created: chrono::Utc::now().to_rfc3339(),
            files: Vec::new(),
        };

        for mut file in enumerate_storage(root)? {
            if cancel.is_canceled() {
                break;
            }
            checksum::calculate(&mut file, &header, false)?;
            index.files.push(IndexedFile {
                container: file.container.clone(),
                name: file.name.clone(),
                size: file.size,
                crc32: file.checksums.crc32.map(|c| dat::format_checksum(&c)),
                md5: file.checksums.md5.map(|c| dat::format_checksum(&c)),
                sha1: file.checksums.sha1.map(|c| dat::format_checksum(&c)),
                sha256: file.checksums.sha256.map(|c| dat::format_checksum(&c)),
            });
        }
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Expand back into file references carrying the recorded digests.
    /// Entries with every digest recorded come back fully hashed and are
    /// never re-read from disk during matching.
    pub fn file_references(&self) -> Vec<FileReference> {
        self.files
            .iter()
            .map(|f| {
                let kind = archive_kind(&f.container).unwrap_or(ContainerKind::Dir);
                let checksums = ChecksumSet {
                    crc32: f.crc32.as_deref().and_then(dat::parse_checksum),
                    md5: f.md5.as_deref().and_then(dat::parse_checksum),
                    sha1: f.sha1.as_deref().and_then(dat::parse_checksum),
                    sha256: f.sha256.as_deref().and_then(dat::parse_checksum),
                };
                let mut reference = FileReference::new(
                    f.container.clone(),
                    kind,
                    f.name.clone(),
                    f.size,
                    checksums.crc32,
                );
                if checksums.is_complete() {
                    reference.set_hashed(checksums, f.size);
                } else {
                    reference.checksums = checksums;
                }
                reference
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_build_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Foo")).unwrap();
        fs::write(dir.path().join("Foo/foo.bin"), b"ABCD").unwrap();

        let index = OfflineIndex::build(dir.path(), &CancelToken::new()).unwrap();
        assert_eq!(index.files.len(), 1);
        assert_eq!(index.files[0].crc32.as_deref(), Some("db1720a5"));

        let path = dir.path().join("index.json");
        index.save(&path).unwrap();
        let loaded = OfflineIndex::load(&path).unwrap();
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.files[0].name, "foo.bin");
    }

    #[test]
    fn test_file_references_are_fully_hashed() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Foo")).unwrap();
        fs::write(dir.path().join("Foo/foo.bin"), b"ABCD").unwrap();

        let index = OfflineIndex::build(dir.path(), &CancelToken::new()).unwrap();
        let refs = index.file_references();
        assert_eq!(refs.len(), 1);
        assert!(refs[0].is_fully_hashed());
        assert_eq!(refs[0].container_name(), "Foo");
        assert_eq!(refs[0].reported_crc32, dat::parse_checksum("db1720a5"));
    }

    #[test]
    fn test_canceled_build_is_partial() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Foo")).unwrap();
        fs::write(dir.path().join("Foo/foo.bin"), b"ABCD").unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let index = OfflineIndex::build(dir.path(), &cancel).unwrap();
        assert!(index.files.is_empty());
    }
}

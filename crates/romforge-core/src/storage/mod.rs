//! Storage containers - folders, archives, offline indexes

pub mod archive;
pub mod copy;
pub mod offline;

use crate::dat::ChecksumSet;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How far checksum computation has progressed for a file reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashState {
    /// Nothing known beyond the size.
    Unhashed,
    /// The container's own index reported a CRC32; nothing was computed.
    PartiallyKnown,
    /// All four digests have been computed.
    FullyHashed,
}

/// Physical container kinds a file can live in or be written to.
/// The torrent variants are write targets that normalize the archive
/// directory; they read as their base format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Dir,
    Zip,
    SevenZip,
    TorrentZip,
    TorrentSevenZip,
}

impl ContainerKind {
    /// Kind used when reading.
    pub fn read_kind(self) -> ContainerKind {
        match self {
            ContainerKind::TorrentZip => ContainerKind::Zip,
            ContainerKind::TorrentSevenZip => ContainerKind::SevenZip,
            kind => kind,
        }
    }
}

static ARCHIVE_KINDS: phf::Map<&'static str, ContainerKind> = phf::phf_map! {
    "zip" => ContainerKind::Zip,
    "7z" => ContainerKind::SevenZip,
};

/// Archive kind for a path, sniffed from the extension. `None` means the
/// path is a plain file or folder.
pub fn archive_kind(path: &Path) -> Option<ContainerKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    ARCHIVE_KINDS.get(ext.as_str()).copied()
}

/// An observed file inside some container.
///
/// Checksums are filled in lazily; [`crate::checksum::calculate`] mutates
/// the reference in place and is safe to call repeatedly.
#[derive(Debug, Clone)]
pub struct FileReference {
    /// Folder or archive holding the file.
    pub container: PathBuf,
    pub container_kind: ContainerKind,
    /// Path of the file within the container, '/' separated.
    pub name: String,
    pub size: u64,
    /// Size of the hashed block. Equals `size` until a header strip rule
    /// has been applied during hashing.
    pub data_size: u64,
    /// CRC32 from the container's own index, when it has one.
    pub reported_crc32: Option<[u8; 4]>,
    pub checksums: ChecksumSet,
    state: HashState,
}

impl FileReference {
    pub fn new(
        container: PathBuf,
        container_kind: ContainerKind,
        name: String,
        size: u64,
        reported_crc32: Option<[u8; 4]>,
    ) -> Self {
        let state = if reported_crc32.is_some() {
            HashState::PartiallyKnown
        } else {
            HashState::Unhashed
        };
        Self {
            container,
            container_kind,
            name,
            size,
            data_size: size,
            reported_crc32,
            checksums: ChecksumSet::default(),
            state,
        }
    }

    pub fn hash_state(&self) -> HashState {
        self.state
    }

    pub fn is_fully_hashed(&self) -> bool {
        self.state == HashState::FullyHashed
    }

    pub(crate) fn set_hashed(&mut self, checksums: ChecksumSet, data_size: u64) {
        self.checksums = checksums;
        self.data_size = data_size;
        self.state = HashState::FullyHashed;
    }

    /// Name the container contributes to matching: the directory name for
    /// folders, the file stem for archives.
    pub fn container_name(&self) -> String {
        let component = match self.container_kind.read_kind() {
            ContainerKind::Dir => self.container.file_name(),
            _ => self.container.file_stem(),
        };
        component
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Absolute path of the file, for plain-folder containers only.
    pub fn fs_path(&self) -> Option<PathBuf> {
        match self.container_kind.read_kind() {
            ContainerKind::Dir => Some(self.container.join(&self.name)),
            _ => None,
        }
    }
}

/// A resolved physical container.
pub trait Container {
    /// List every file in the container, in a stable order.
    fn enumerate(&self) -> Result<Vec<FileReference>>;
    /// Whether an entry with this relative name exists.
    fn contains(&self, name: &str) -> Result<bool>;
    /// Remove one entry.
    fn remove(&self, name: &str) -> Result<()>;
}

/// Resolve a path to its container implementation, sniffing archives from
/// the extension. `None` for paths that are neither folders nor known
/// archives.
pub fn get_container(path: &Path) -> Option<Box<dyn Container>> {
    if path.is_dir() {
        return Some(Box::new(DirContainer::new(path)));
    }
    match archive_kind(path) {
        Some(ContainerKind::Zip) => Some(Box::new(archive::ZipContainer::new(path))),
        Some(ContainerKind::SevenZip) => Some(Box::new(archive::SevenZipContainer::new(path))),
        _ => None,
    }
}

pub struct DirContainer {
    root: PathBuf,
}

impl DirContainer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Container for DirContainer {
    fn enumerate(&self) -> Result<Vec<FileReference>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path());
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            let size = entry.metadata().map_err(|e| Error::Io(e.into()))?.len();
            files.push(FileReference::new(
                self.root.clone(),
                ContainerKind::Dir,
                name,
                size,
                None,
            ));
        }
        Ok(files)
    }

    fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.root.join(name).is_file())
    }

    fn remove(&self, name: &str) -> Result<()> {
        fs::remove_file(self.root.join(name))?;
        Ok(())
    }
}

/// Enumerate every file under a storage root.
///
/// Each top-level subdirectory and each archive becomes one container;
/// loose files directly under the root belong to the root folder itself.
/// Order is stable across calls: top-level entries sorted by path, files
/// within a container in the container's own stable order.
pub fn enumerate_storage(root: &Path) -> Result<Vec<FileReference>> {
    if !root.is_dir() {
        return Err(Error::SourceNotFound(root.to_path_buf()));
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(root)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut files = Vec::new();
    for path in entries {
        if path.is_dir() {
            files.extend(DirContainer::new(&path).enumerate()?);
        } else if let Some(container) = get_container(&path) {
            files.extend(container.enumerate()?);
        } else {
            let name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let size = path.metadata()?.len();
            files.push(FileReference::new(
                root.to_path_buf(),
                ContainerKind::Dir,
                name,
                size,
                None,
            ));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_enumerate_storage_mixed_containers() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("Foo/sub")).unwrap();
        fs::write(root.join("Foo/foo.bin"), b"ABCD").unwrap();
        fs::write(root.join("Foo/sub/deep.bin"), b"DCBA").unwrap();
        fs::write(root.join("loose.bin"), b"test content").unwrap();
        write_zip(&root.join("Bar.zip"), &[("bar.bin", b"ABCD")]);

        let files = enumerate_storage(root).unwrap();
        assert_eq!(files.len(), 4);

        // read_dir order is sorted: Bar.zip, Foo, loose.bin
        assert_eq!(files[0].name, "bar.bin");
        assert_eq!(files[0].container_kind, ContainerKind::Zip);
        assert_eq!(files[0].container_name(), "Bar");
        assert!(files[0].reported_crc32.is_some());

        assert_eq!(files[1].name, "foo.bin");
        assert_eq!(files[1].container_name(), "Foo");
        assert_eq!(files[1].size, 4);

        assert_eq!(files[2].name, "sub/deep.bin");
        assert_eq!(files[2].container_name(), "Foo");

        assert_eq!(files[3].name, "loose.bin");
        assert_eq!(files[3].size, 12);
    }

    #[test]
    fn test_enumerate_storage_missing_root() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            enumerate_storage(&missing),
            Err(Error::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_zip_reported_crc_matches_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        write_zip(&path, &[("game.bin", b"ABCD")]);

        let files = get_container(&path).unwrap().enumerate().unwrap();
        assert_eq!(files.len(), 1);
        // CRC32 of b"ABCD"
        assert_eq!(files[0].reported_crc32, Some([0xdb, 0x17, 0x20, 0xa5]));
        assert_eq!(files[0].hash_state(), HashState::PartiallyKnown);
        assert_eq!(files[0].size, 4);
        assert_eq!(files[0].data_size, 4);
    }

    #[test]
    fn test_dir_container_contains_and_remove() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), b"ABCD").unwrap();

        let container = get_container(dir.path()).unwrap();
        assert!(container.contains("a.bin").unwrap());
        assert!(!container.contains("b.bin").unwrap());

        container.remove("a.bin").unwrap();
        assert!(!container.contains("a.bin").unwrap());
    }

    #[test]
    fn test_get_container_unknown_kind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();
        assert!(get_container(&path).is_none());
    }

    #[test]
    fn test_container_name_uses_stem_for_archives() {
        let file = FileReference::new(
            PathBuf::from("/sets/Great Game.zip"),
            ContainerKind::Zip,
            "a.bin".to_string(),
            4,
            None,
        );
        assert_eq!(file.container_name(), "Great Game");

        let file = FileReference::new(
            PathBuf::from("/sets/Great Game"),
            ContainerKind::Dir,
            "a.bin".to_string(),
            4,
            None,
        );
        assert_eq!(file.container_name(), "Great Game");
        assert_eq!(file.fs_path(), Some(PathBuf::from("/sets/Great Game/a.bin")));
    }
}

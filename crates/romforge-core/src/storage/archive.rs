//! Archive containers - zip and 7z entry listing and extraction

use super::{Container, ContainerKind, FileReference};
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

pub struct ZipContainer {
    path: PathBuf,
}

impl ZipContainer {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Container for ZipContainer {
    fn enumerate(&self) -> Result<Vec<FileReference>> {
        let file = File::open(&self.path)?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

        let mut files = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            files.push(FileReference::new(
                self.path.clone(),
                ContainerKind::Zip,
                entry.name().to_string(),
                entry.size(),
                Some(entry.crc32().to_be_bytes()),
            ));
        }
        Ok(files)
    }

    fn contains(&self, name: &str) -> Result<bool> {
        let file = File::open(&self.path)?;
        let archive = zip::ZipArchive::new(BufReader::new(file))?;
        Ok(archive.index_for_name(name).is_some())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let file = File::open(&self.path)?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

        let mut out = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let mut kept = 0;
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            if entry.name() == name {
                continue;
            }
            out.raw_copy_file(entry)?;
            kept += 1;
        }
        let cursor = out.finish()?;

        if kept == 0 {
            fs::remove_file(&self.path)?;
        } else {
            fs::write(&self.path, cursor.into_inner())?;
        }
        Ok(())
    }
}

pub struct SevenZipContainer {
    path: PathBuf,
}

impl SevenZipContainer {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    // 7z has no cheap per-entry random access in this codepath; the
    // archive is unpacked into a temp dir and worked on as files.
    fn unpack(&self) -> Result<tempfile::TempDir> {
        let temp = tempfile::tempdir()?;
        sevenz_rust::decompress_file(&self.path, temp.path())?;
        Ok(temp)
    }
}

impl Container for SevenZipContainer {
    fn enumerate(&self) -> Result<Vec<FileReference>> {
        let temp = self.unpack()?;
        let unpacked = super::DirContainer::new(temp.path()).enumerate()?;

        let files = unpacked
            .into_iter()
            .map(|f| {
                FileReference::new(
                    self.path.clone(),
                    ContainerKind::SevenZip,
                    f.name,
                    f.size,
                    None,
                )
            })
            .collect();
        Ok(files)
    }

    fn contains(&self, name: &str) -> Result<bool> {
        let temp = self.unpack()?;
        Ok(temp.path().join(name).is_file())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let temp = self.unpack()?;
        let target = temp.path().join(name);
        if !target.is_file() {
            return Err(Error::EntryNotFound {
                container: self.path.clone(),
                name: name.to_string(),
            });
        }
        fs::remove_file(&target)?;

        let remaining = super::DirContainer::new(temp.path()).enumerate()?;
        if remaining.is_empty() {
            fs::remove_file(&self.path)?;
        } else {
            sevenz_rust::compress_to_path(temp.path(), &self.path)?;
        }
        Ok(())
    }
}

/// Read the raw bytes of an entry out of its container.
pub fn read_entry(file: &FileReference) -> Result<Vec<u8>> {
    match file.container_kind.read_kind() {
        ContainerKind::Dir => Ok(fs::read(file.container.join(&file.name))?),
        ContainerKind::Zip => {
            let f = File::open(&file.container)?;
            let mut archive = zip::ZipArchive::new(BufReader::new(f))?;
            let mut entry = archive.by_name(&file.name)?;
            let mut content = Vec::with_capacity(file.size as usize);
            entry.read_to_end(&mut content)?;
            Ok(content)
        }
        ContainerKind::SevenZip => {
            let temp = tempfile::tempdir()?;
            sevenz_rust::decompress_file(&file.container, temp.path())?;
            let path = temp.path().join(&file.name);
            if !path.is_file() {
                return Err(Error::EntryNotFound {
                    container: file.container.clone(),
                    name: file.name.clone(),
                });
            }
            Ok(fs::read(path)?)
        }
        _ => Err(Error::UnknownContainer(file.container.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_read_entry_from_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        write_zip(&path, &[("a.bin", b"ABCD"), ("b.bin", b"test content")]);

        let files = ZipContainer::new(&path).enumerate().unwrap();
        let b = files.iter().find(|f| f.name == "b.bin").unwrap();
        assert_eq!(read_entry(b).unwrap(), b"test content");
    }

    #[test]
    fn test_read_entry_from_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.bin"), b"ABCD").unwrap();

        let file = FileReference::new(
            dir.path().to_path_buf(),
            ContainerKind::Dir,
            "sub/a.bin".to_string(),
            4,
            None,
        );
        assert_eq!(read_entry(&file).unwrap(), b"ABCD");
    }

    #[test]
    fn test_zip_remove_keeps_other_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        write_zip(&path, &[("a.bin", b"ABCD"), ("b.bin", b"DCBA")]);

        let container = ZipContainer::new(&path);
        container.remove("a.bin").unwrap();

        assert!(!container.contains("a.bin").unwrap());
        assert!(container.contains("b.bin").unwrap());

        let files = container.enumerate().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(read_entry(&files[0]).unwrap(), b"DCBA");
    }

    #[test]
    fn test_zip_remove_last_entry_removes_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.zip");
        write_zip(&path, &[("only.bin", b"ABCD")]);

        ZipContainer::new(&path).remove("only.bin").unwrap();
        assert!(!path.exists());
    }
}

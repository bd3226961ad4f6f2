//! Catalog builder - deriving a reference catalog from known-good sets

use crate::checksum;
use crate::dat::{self, Database, Game, Header, Rom};
use crate::error::{Error, Result};
use crate::services::cancel::CancelToken;
use crate::services::progress::{CreateEvent, ProgressSink};
use crate::storage::{self, FileReference};
use std::fs;
use std::path::{Path, PathBuf};

/// Options for deriving a catalog.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: String,
    /// Defaults to `name` when absent.
    pub description: Option<String>,
    /// Defaults to today's date when absent.
    pub version: Option<String>,
    /// Hash every file even when its container already reports a CRC32.
    pub force_checksums: bool,
}

/// A derived catalog plus whether the build ran to completion.
#[derive(Debug)]
pub struct CreateResult {
    pub database: Database,
    pub canceled: bool,
}

/// Derive a catalog from the immediate children of `source`: each
/// top-level subdirectory becomes one uncompressed game, then each
/// top-level archive becomes one compressed game. Games are sorted by
/// name once both passes are done.
pub fn create_database<S: ProgressSink<CreateEvent>>(
    source: &Path,
    options: &CreateOptions,
    sink: &S,
    cancel: &CancelToken,
) -> Result<CreateResult> {
    if !source.is_dir() {
        return Err(Error::SourceNotFound(source.to_path_buf()));
    }

    sink.emit(CreateEvent::Started {
        source: source.to_path_buf(),
    });

    let mut db = Database::default();
    db.header.name = options.name.clone();
    db.header.description = options
        .description
        .clone()
        .unwrap_or_else(|| options.name.clone());
    db.header.version = Some(
        options
            .version
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string()),
    );

    let mut entries: Vec<PathBuf> = fs::read_dir(source)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut canceled = false;

    // Uncompressed pass: one game per top-level folder.
    for path in entries.iter().filter(|p| p.is_dir()) {
        if cancel.is_canceled() {
            canceled = true;
            break;
        }
        let game = game_from_container(path, options.force_checksums)?;
        sink.emit(CreateEvent::GameAdded {
            name: game.name.clone(),
            roms: game.roms.len() as u64,
        });
        db.games.push(game);
    }

    // Compressed pass: one game per top-level archive.
    if !canceled {
        for path in entries
            .iter()
            .filter(|p| p.is_file() && storage::archive_kind(p).is_some())
        {
            if cancel.is_canceled() {
                canceled = true;
                break;
            }
            let game = game_from_container(path, options.force_checksums)?;
            sink.emit(CreateEvent::GameAdded {
                name: game.name.clone(),
                roms: game.roms.len() as u64,
            });
            db.games.push(game);
        }
    }

    if canceled {
        sink.emit(CreateEvent::Canceled);
        return Ok(CreateResult {
            database: db,
            canceled: true,
        });
    }

    db.sort_games();
    sink.emit(CreateEvent::Finished {
        games: db.games.len() as u64,
        roms: db.rom_count() as u64,
    });
    Ok(CreateResult {
        database: db,
        canceled: false,
    })
}

/// Derive a catalog and write it as a Logiqx DAT. A canceled build never
/// leaves an output file behind.
pub fn create_database_to_path<S: ProgressSink<CreateEvent>>(
    source: &Path,
    output: &Path,
    options: &CreateOptions,
    sink: &S,
    cancel: &CancelToken,
) -> Result<CreateResult> {
    let result = create_database(source, options, sink, cancel)?;
    if !result.canceled {
        dat::write_dat(&result.database, output)?;
    }
    Ok(result)
}

fn game_from_container(path: &Path, force_checksums: bool) -> Result<Game> {
    let name = if path.is_dir() {
        path.file_name()
    } else {
        path.file_stem()
    }
    .map(|s| s.to_string_lossy().to_string())
    .unwrap_or_default();

    let container = storage::get_container(path)
        .ok_or_else(|| Error::UnknownContainer(path.to_path_buf()))?;

    let mut roms = Vec::new();
    for mut file in container.enumerate()? {
        if force_checksums || file.reported_crc32.is_none() {
            checksum::calculate(&mut file, &Header::default(), force_checksums)?;
        }
        roms.push(rom_from_file(&file));
    }

    Ok(Game {
        name: name.clone(),
        description: name,
        roms,
    })
}

fn rom_from_file(file: &FileReference) -> Rom {
    let mut checksums = file.checksums.clone();
    if checksums.crc32.is_none() {
        checksums.crc32 = file.reported_crc32;
    }
    Rom {
        name: file.name.clone(),
        size: file.size,
        checksums,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dat::format_checksum;
    use std::io::Write;
    use tempfile::tempdir;

    fn options(name: &str) -> CreateOptions {
        CreateOptions {
            name: name.to_string(),
            version: Some("1.0".to_string()),
            ..Default::default()
        }
    }

    fn populate_source(root: &Path) {
        fs::create_dir_all(root.join("Zeta Game")).unwrap();
        fs::write(root.join("Zeta Game/zeta.bin"), b"DCBA").unwrap();

        let archive = fs::File::create(root.join("Alpha Game.zip")).unwrap();
        let mut zip = zip::ZipWriter::new(archive);
        zip.start_file("alpha.bin", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"ABCD").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_create_database_from_folders_and_archives() {
        let dir = tempdir().unwrap();
        populate_source(dir.path());

        let result = create_database(
            dir.path(),
            &options("Test Set"),
            &(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(!result.canceled);
        let db = &result.database;
        assert_eq!(db.header.name, "Test Set");
        assert_eq!(db.header.description, "Test Set");
        assert_eq!(db.header.version, Some("1.0".to_string()));

        // Both passes contributed, sorted by name afterwards.
        assert_eq!(db.games.len(), 2);
        assert_eq!(db.games[0].name, "Alpha Game");
        assert_eq!(db.games[1].name, "Zeta Game");

        let alpha = &db.games[0].roms[0];
        assert_eq!(alpha.name, "alpha.bin");
        assert_eq!(alpha.size, 4);
        // Archive entries trust the reported CRC unless forced.
        assert_eq!(format_checksum(&alpha.checksums.crc32.unwrap()), "db1720a5");
        assert!(alpha.checksums.sha1.is_none());

        let zeta = &db.games[1].roms[0];
        assert_eq!(zeta.name, "zeta.bin");
        // Plain files have no reported CRC, so they are fully hashed.
        assert_eq!(format_checksum(&zeta.checksums.crc32.unwrap()), "847a7f6e");
        assert!(zeta.checksums.sha1.is_some());
        assert!(zeta.checksums.sha256.is_some());
    }

    #[test]
    fn test_create_database_force_hashes_archive_entries() {
        let dir = tempdir().unwrap();
        populate_source(dir.path());

        let mut opts = options("Forced");
        opts.force_checksums = true;
        let result = create_database(dir.path(), &opts, &(), &CancelToken::new()).unwrap();

        let alpha = &result.database.games[0].roms[0];
        assert!(alpha.checksums.sha1.is_some());
        assert!(alpha.checksums.sha256.is_some());
    }

    #[test]
    fn test_canceled_build_writes_no_output() {
        let dir = tempdir().unwrap();
        populate_source(dir.path());
        let output = dir.path().join("out.dat");

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = create_database_to_path(
            dir.path(),
            &output,
            &options("Canceled Set"),
            &(),
            &cancel,
        )
        .unwrap();

        assert!(result.canceled);
        assert!(!output.exists());
    }

    #[test]
    fn test_create_then_parse_roundtrip() {
        let dir = tempdir().unwrap();
        populate_source(dir.path());
        let output = dir.path().join("derived.dat");

        create_database_to_path(
            dir.path(),
            &output,
            &options("Derived"),
            &(),
            &CancelToken::new(),
        )
        .unwrap();

        let parsed = dat::parse_dat(&output).unwrap();
        assert_eq!(parsed.header.name, "Derived");
        assert_eq!(parsed.games.len(), 2);
        assert_eq!(parsed.games[0].roms[0].name, "alpha.bin");
    }

    #[test]
    fn test_create_missing_source_fails() {
        let err = create_database(
            Path::new("/definitely/not/here"),
            &options("X"),
            &(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }
}

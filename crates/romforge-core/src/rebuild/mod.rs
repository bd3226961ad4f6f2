//! Rebuild engine - relocating matched files into clean destination sets

use crate::checksum;
use crate::dat::Database;
use crate::error::{Error, Result};
use crate::services::cancel::CancelToken;
use crate::services::progress::{ProgressSink, RebuildEvent};
use crate::storage::{self, ContainerKind, FileReference, copy::CopyRequest};
use crate::verify::{RomMatch, checksums_match};
use std::fs;
use std::path::Path;

/// Options controlling a rebuild pass.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// Container format rebuilt games are written in.
    pub target_kind: ContainerKind,
    /// Delete source entries once they are rebuilt.
    pub remove_source: bool,
    /// Recompute digests instead of trusting container indexes.
    pub force_checksums: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            target_kind: ContainerKind::Zip,
            remove_source: false,
            force_checksums: false,
        }
    }
}

/// What a rebuild pass accomplished. Additive during the run; a fresh
/// rebuild starts from an empty result.
#[derive(Debug, Default)]
pub struct RebuildResult {
    /// Roms satisfied, paired with the source file that provided them.
    pub rebuilt: Vec<RomMatch>,
    /// Source files that satisfied no rom; never deleted.
    pub unmatched: Vec<FileReference>,
    pub canceled: bool,
}

/// Rebuild every matchable file under `source` into `dest`.
///
/// Each enumerated file is hashed, matched against the whole catalog
/// (one file may satisfy several roms), and copied once per satisfied
/// rom. With `remove_source`, a source entry is deleted only after all
/// of its copies are done, and only if it matched at least one rom.
pub fn rebuild<S: ProgressSink<RebuildEvent>>(
    db: &Database,
    source: &Path,
    dest: &Path,
    options: &RebuildOptions,
    sink: &S,
    cancel: &CancelToken,
) -> Result<RebuildResult> {
    if db.header.has_rules() {
        return Err(Error::HeadersUnsupported);
    }
    if !source.is_dir() {
        return Err(Error::SourceNotFound(source.to_path_buf()));
    }
    if dest.is_file() {
        return Err(Error::BadDestination(dest.to_path_buf()));
    }

    sink.emit(RebuildEvent::EnumerationStarted {
        source: source.to_path_buf(),
    });
    let files = storage::enumerate_storage(source)?;
    sink.emit(RebuildEvent::EnumerationCompleted {
        files: files.len() as u64,
    });

    let mut result = RebuildResult::default();

    for mut file in files {
        if cancel.is_canceled() {
            return Ok(canceled(result, sink));
        }

        if !file.is_fully_hashed() || options.force_checksums || db.header.has_rules() {
            sink.emit(RebuildEvent::HashStarted {
                container: file.container.clone(),
                name: file.name.clone(),
            });
            checksum::calculate(&mut file, &db.header, options.force_checksums)?;
            sink.emit(RebuildEvent::HashCompleted {
                container: file.container.clone(),
                name: file.name.clone(),
            });
            if cancel.is_canceled() {
                return Ok(canceled(result, sink));
            }
        }

        // One physical file may satisfy several roms, e.g. identical
        // data shared by two games.
        let matches: Vec<(usize, usize)> = db
            .games
            .iter()
            .enumerate()
            .flat_map(|(gi, game)| {
                game.roms
                    .iter()
                    .enumerate()
                    .filter(|&(_, rom)| {
                        checksums_match(rom, &file, !options.force_checksums, &db.header)
                    })
                    .map(move |(ri, _)| (gi, ri))
            })
            .collect();

        if matches.is_empty() {
            sink.emit(RebuildEvent::Unmatched {
                container: file.container.clone(),
                name: file.name.clone(),
            });
            result.unmatched.push(file);
            continue;
        }

        fs::create_dir_all(dest)?;
        let sole_match = matches.len() == 1;

        for &(gi, ri) in &matches {
            let game = &db.games[gi];
            let rom = &game.roms[ri];
            sink.emit(RebuildEvent::RomStarted {
                game: game.name.clone(),
                rom: rom.name.clone(),
            });

            // Container writers need the full expected file list of the
            // target game up front.
            let siblings: Vec<String> = game.roms.iter().map(|r| r.name.clone()).collect();
            storage::copy::copy_entry(&CopyRequest {
                source: &file,
                dest_root: dest,
                kind: options.target_kind,
                game: &game.name,
                rom: &rom.name,
                siblings: &siblings,
                remove_source: options.remove_source,
                sole_match,
            })?;

            result.rebuilt.push(RomMatch {
                game: game.name.clone(),
                rom: rom.clone(),
                file: file.clone(),
            });
            sink.emit(RebuildEvent::RomCompleted {
                game: game.name.clone(),
                rom: rom.name.clone(),
            });
        }

        // The copier may already have consumed a sole-match source.
        if options.remove_source
            && let Some(container) = storage::get_container(&file.container)
            && container.contains(&file.name)?
        {
            container.remove(&file.name)?;
        }
    }

    sink.emit(RebuildEvent::Finished {
        rebuilt: result.rebuilt.len() as u64,
        unmatched: result.unmatched.len() as u64,
    });
    Ok(result)
}

fn canceled<S: ProgressSink<RebuildEvent>>(mut result: RebuildResult, sink: &S) -> RebuildResult {
    result.canceled = true;
    sink.emit(RebuildEvent::Canceled);
    result
}

//! Verification engine - matching storage contents against a catalog

use crate::checksum;
use crate::dat::{Database, Header, Rom};
use crate::error::{Error, Result};
use crate::services::cancel::CancelToken;
use crate::services::progress::{ProgressSink, ScanEvent};
use crate::storage::{self, FileReference, offline::OfflineIndex};
use std::path::PathBuf;

/// Where a scan looks for files.
#[derive(Debug, Clone, Default)]
pub struct Storage {
    pub folders: Vec<PathBuf>,
    /// Offline index files standing in for folders that are not online.
    pub indexes: Vec<PathBuf>,
}

/// A rom paired with the file that satisfied it.
#[derive(Debug, Clone)]
pub struct RomMatch {
    pub game: String,
    pub rom: Rom,
    pub file: FileReference,
}

/// A rom no candidate file satisfied.
#[derive(Debug, Clone)]
pub struct MissingRom {
    pub game: String,
    pub rom: Rom,
}

/// Outcome sets of one scan pass. Every rom lands in exactly one of
/// {verified, misnamed, missing} and every enumerated file is either
/// consumed by a verified match, flagged by a misnamed match, or listed
/// as unmatched.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub verified: Vec<RomMatch>,
    pub misnamed: Vec<RomMatch>,
    pub missing: Vec<MissingRom>,
    pub unmatched: Vec<FileReference>,
    /// The pass stopped early on cancellation; the sets above cover only
    /// the work done up to that point.
    pub canceled: bool,
}

/// Decide whether `file` satisfies `rom`.
///
/// With `prefer_reported_crc` set and no strip rules active, a CRC32
/// known on both sides settles the question outright, in either
/// direction. Otherwise every digest known on both sides must agree and
/// at least one digest must be known on both; a rom carrying no
/// checksums can never content-match.
pub fn checksums_match(
    rom: &Rom,
    file: &FileReference,
    prefer_reported_crc: bool,
    header: &Header,
) -> bool {
    if prefer_reported_crc
        && !header.has_rules()
        && let (Some(want), Some(got)) = (rom.checksums.crc32, file.reported_crc32)
    {
        return want == got;
    }

    let mut matched = false;
    if let (Some(a), Some(b)) = (&rom.checksums.md5, &file.checksums.md5) {
        if a != b {
            return false;
        }
        matched = true;
    }
    if let (Some(a), Some(b)) = (&rom.checksums.sha1, &file.checksums.sha1) {
        if a != b {
            return false;
        }
        matched = true;
    }
    if let (Some(a), Some(b)) = (&rom.checksums.sha256, &file.checksums.sha256) {
        if a != b {
            return false;
        }
        matched = true;
    }
    if let (Some(a), Some(b)) = (&rom.checksums.crc32, &file.checksums.crc32) {
        if a != b {
            return false;
        }
        matched = true;
    }
    matched
}

struct Candidate {
    file: FileReference,
    /// Satisfied some rom under the wrong container or name; stays in the
    /// pool but is excluded from the unmatched set.
    misnamed: bool,
}

/// Scan storage against the catalog, classifying every rom and every
/// enumerated file.
///
/// Catalogs carrying header strip rules are rejected up front; the
/// hashing phase they need exists below but is not reachable through
/// this entry point.
pub fn scan<S: ProgressSink<ScanEvent>>(
    db: &Database,
    storage: &Storage,
    sink: &S,
    cancel: &CancelToken,
) -> Result<ScanResult> {
    if db.header.has_rules() {
        return Err(Error::HeadersUnsupported);
    }
    run(db, storage, sink, cancel)
}

fn run<S: ProgressSink<ScanEvent>>(
    db: &Database,
    storage: &Storage,
    sink: &S,
    cancel: &CancelToken,
) -> Result<ScanResult> {
    let mut result = ScanResult::default();

    sink.emit(ScanEvent::EnumerationStarted {
        sources: storage.folders.len() + storage.indexes.len(),
    });

    let mut pool: Vec<Candidate> = Vec::new();
    for folder in &storage.folders {
        if cancel.is_canceled() {
            return Ok(canceled(result, sink));
        }
        for file in storage::enumerate_storage(folder)? {
            pool.push(Candidate {
                file,
                misnamed: false,
            });
        }
    }
    for index in &storage.indexes {
        if cancel.is_canceled() {
            return Ok(canceled(result, sink));
        }
        for file in OfflineIndex::load(index)?.file_references() {
            pool.push(Candidate {
                file,
                misnamed: false,
            });
        }
    }
    sink.emit(ScanEvent::EnumerationCompleted {
        files: pool.len() as u64,
    });

    // Strip rules make the data-block size depend on file contents, so
    // every candidate must be hashed before size filtering means
    // anything.
    if db.header.has_rules() {
        for candidate in &mut pool {
            if cancel.is_canceled() {
                return Ok(canceled(result, sink));
            }
            hash_candidate(&mut candidate.file, &db.header, sink)?;
        }
    }

    'games: for game in &db.games {
        for rom in &game.roms {
            if cancel.is_canceled() {
                return Ok(canceled(result, sink));
            }

            let size_matched: Vec<usize> = pool
                .iter()
                .enumerate()
                .filter(|(_, c)| c.file.data_size == rom.size)
                .map(|(i, _)| i)
                .collect();
            if size_matched.is_empty() {
                record_missing(&mut result, sink, game.name.clone(), rom);
                continue;
            }

            // Checksum cost is paid only for plausible candidates.
            if !db.header.has_rules() {
                for &i in &size_matched {
                    if !pool[i].file.is_fully_hashed() {
                        hash_candidate(&mut pool[i].file, &db.header, sink)?;
                        if cancel.is_canceled() {
                            break 'games;
                        }
                    }
                }
            }

            let checksum_matched: Vec<usize> = size_matched
                .into_iter()
                .filter(|&i| checksums_match(rom, &pool[i].file, true, &db.header))
                .collect();
            if checksum_matched.is_empty() {
                record_missing(&mut result, sink, game.name.clone(), rom);
                continue;
            }

            // First candidate in the correct container decides; without
            // one, the first checksum match becomes the misnamed pick.
            let in_correct_container = checksum_matched
                .iter()
                .copied()
                .find(|&i| pool[i].file.container_name() == game.name);
            match in_correct_container {
                Some(i) if pool[i].file.name == rom.name => {
                    // Consumed: no other rom may claim this file.
                    let candidate = pool.remove(i);
                    sink.emit(ScanEvent::Verified {
                        game: game.name.clone(),
                        rom: rom.name.clone(),
                    });
                    result.verified.push(RomMatch {
                        game: game.name.clone(),
                        rom: rom.clone(),
                        file: candidate.file,
                    });
                }
                Some(i) => record_misnamed(&mut result, sink, &mut pool[i], game.name.clone(), rom),
                None => {
                    let i = checksum_matched[0];
                    record_misnamed(&mut result, sink, &mut pool[i], game.name.clone(), rom);
                }
            }
        }
    }

    if cancel.is_canceled() {
        return Ok(canceled(result, sink));
    }

    for candidate in pool {
        if candidate.misnamed {
            continue;
        }
        sink.emit(ScanEvent::Unmatched {
            container: candidate.file.container.clone(),
            name: candidate.file.name.clone(),
        });
        result.unmatched.push(candidate.file);
    }

    sink.emit(ScanEvent::Finished {
        verified: result.verified.len() as u64,
        misnamed: result.misnamed.len() as u64,
        missing: result.missing.len() as u64,
        unmatched: result.unmatched.len() as u64,
    });
    Ok(result)
}

fn canceled<S: ProgressSink<ScanEvent>>(mut result: ScanResult, sink: &S) -> ScanResult {
    result.canceled = true;
    sink.emit(ScanEvent::Canceled);
    result
}

fn hash_candidate<S: ProgressSink<ScanEvent>>(
    file: &mut FileReference,
    header: &Header,
    sink: &S,
) -> Result<()> {
    sink.emit(ScanEvent::HashStarted {
        container: file.container.clone(),
        name: file.name.clone(),
    });
    checksum::calculate(file, header, false)?;
    sink.emit(ScanEvent::HashCompleted {
        container: file.container.clone(),
        name: file.name.clone(),
    });
    Ok(())
}

fn record_missing<S: ProgressSink<ScanEvent>>(
    result: &mut ScanResult,
    sink: &S,
    game: String,
    rom: &Rom,
) {
    sink.emit(ScanEvent::Missing {
        game: game.clone(),
        rom: rom.name.clone(),
    });
    result.missing.push(MissingRom {
        game,
        rom: rom.clone(),
    });
}

fn record_misnamed<S: ProgressSink<ScanEvent>>(
    result: &mut ScanResult,
    sink: &S,
    candidate: &mut Candidate,
    game: String,
    rom: &Rom,
) {
    candidate.misnamed = true;
    sink.emit(ScanEvent::Misnamed {
        game: game.clone(),
        rom: rom.name.clone(),
        container: candidate.file.container.clone(),
        found: candidate.file.name.clone(),
    });
    result.misnamed.push(RomMatch {
        game,
        rom: rom.clone(),
        file: candidate.file.clone(),
    });
}

//! Copying matched entries into destination containers

use super::archive::read_entry;
use super::{ContainerKind, FileReference};
use crate::error::Result;
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Write};
use std::path::Path;

/// Everything a container writer needs to place one matched entry.
pub struct CopyRequest<'a> {
    pub source: &'a FileReference,
    pub dest_root: &'a Path,
    pub kind: ContainerKind,
    /// Target game; names the destination folder or archive.
    pub game: &'a str,
    /// Target rom name within the game.
    pub rom: &'a str,
    /// Names of every rom in the target game. Deterministic archive
    /// variants order their directory from this list.
    pub siblings: &'a [String],
    pub remove_source: bool,
    /// The source satisfies no other rom, so consuming it is safe.
    pub sole_match: bool,
}

/// Copy one source entry into the destination container.
///
/// The writers replace an existing entry of the same name. Source removal
/// here is an optimization for sole matches; callers remain responsible
/// for removing multi-match sources once every copy is done.
pub fn copy_entry(req: &CopyRequest<'_>) -> Result<()> {
    match req.kind {
        ContainerKind::Dir => copy_to_dir(req),
        ContainerKind::Zip => copy_to_zip(req, false),
        ContainerKind::TorrentZip => copy_to_zip(req, true),
        ContainerKind::SevenZip | ContainerKind::TorrentSevenZip => copy_to_sevenzip(req),
    }
}

fn copy_to_dir(req: &CopyRequest<'_>) -> Result<()> {
    let dest = req.dest_root.join(req.game).join(req.rom);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    // A sole-match plain file may simply move.
    if req.remove_source
        && req.sole_match
        && let Some(src) = req.source.fs_path()
        && fs::rename(&src, &dest).is_ok()
    {
        return Ok(());
    }

    let content = read_entry(req.source)?;
    fs::write(&dest, content)?;
    Ok(())
}

fn copy_to_zip(req: &CopyRequest<'_>, torrent: bool) -> Result<()> {
    let archive_path = req.dest_root.join(format!("{}.zip", req.game));
    let content = read_entry(req.source)?;

    // Collect what the archive already holds, dropping any entry the new
    // one replaces, then rewrite the whole archive.
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    if archive_path.is_file() {
        let file = File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() || entry.name() == req.rom {
                continue;
            }
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            entries.push((entry.name().to_string(), buf));
        }
    }
    entries.push((req.rom.to_string(), content));

    if torrent {
        order_by_siblings(&mut entries, req.siblings);
    }

    // TorrentZIP settings: deflate level 9, fixed timestamp, no extra fields
    let mut options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(9));
    if torrent {
        options = options.last_modified_time(
            zip::DateTime::from_date_and_time(1996, 12, 24, 23, 32, 0).unwrap_or_default(),
        );
    }

    let mut out = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in &entries {
        out.start_file(name.as_str(), options)?;
        out.write_all(bytes)?;
    }
    let cursor = out.finish()?;
    fs::write(&archive_path, cursor.into_inner())?;
    Ok(())
}

fn copy_to_sevenzip(req: &CopyRequest<'_>) -> Result<()> {
    let archive_path = req.dest_root.join(format!("{}.7z", req.game));

    let staging = tempfile::tempdir()?;
    if archive_path.is_file() {
        sevenz_rust::decompress_file(&archive_path, staging.path())?;
    }

    let dest = staging.path().join(req.rom);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&dest, read_entry(req.source)?)?;

    sevenz_rust::compress_to_path(staging.path(), &archive_path)?;
    Ok(())
}

// Archive directory order for deterministic variants: position in the
// game's rom list, names outside the list last by lowercase name.
fn order_by_siblings(entries: &mut [(String, Vec<u8>)], siblings: &[String]) {
    let rank = |name: &str| {
        siblings
            .iter()
            .position(|s| s == name)
            .unwrap_or(usize::MAX)
    };
    entries.sort_by(|a, b| {
        rank(&a.0)
            .cmp(&rank(&b.0))
            .then_with(|| a.0.to_lowercase().cmp(&b.0.to_lowercase()))
    });
}

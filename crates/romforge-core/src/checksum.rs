//! Checksum computation - CRC32, MD5, SHA1, SHA256 in a single pass

use crate::dat::{ChecksumSet, Header};
use crate::error::Result;
use crate::storage::{FileReference, archive};
use crc32fast::Hasher as Crc32Hasher;
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;
use std::fs::File;
use std::io::{BufReader, Read};

/// Compute and memoize the digests for `file`.
///
/// Safe to call repeatedly: once a reference is fully hashed this is a
/// no-op unless `force` is set. When the header carries strip rules the
/// digests cover the data block only and `data_size` shrinks accordingly.
pub fn calculate(file: &mut FileReference, header: &Header, force: bool) -> Result<()> {
    if file.is_fully_hashed() && !force {
        return Ok(());
    }

    match file.fs_path() {
        // Plain file without strip rules: stream it.
        Some(path) if !header.has_rules() => {
            let mut reader = BufReader::new(File::open(path)?);
            let (checksums, total) = digest_reader(&mut reader)?;
            file.set_hashed(checksums, total);
        }
        _ => {
            let data = archive::read_entry(file)?;
            let start = header.data_start(&data) as usize;
            let block = &data[start..];
            file.set_hashed(digest_block(block), block.len() as u64);
        }
    }
    Ok(())
}

/// Compute all four digests over an in-memory block.
pub fn digest_block(data: &[u8]) -> ChecksumSet {
    let mut crc = Crc32Hasher::new();
    crc.update(data);
    ChecksumSet {
        crc32: Some(crc.finalize().to_be_bytes()),
        md5: Some(Md5::digest(data).into()),
        sha1: Some(Sha1::digest(data).into()),
        sha256: Some(Sha256::digest(data).into()),
    }
}

/// Digest a reader without materializing it, returning the digests and
/// the number of bytes read.
fn digest_reader<R: Read>(reader: &mut R) -> Result<(ChecksumSet, u64)> {
    let mut crc = Crc32Hasher::new();
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut total = 0u64;

    let mut buffer = [0u8; 65536];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        let chunk = &buffer[..bytes_read];
        crc.update(chunk);
        md5.update(chunk);
        sha1.update(chunk);
        sha256.update(chunk);
        total += bytes_read as u64;
    }

    Ok((
        ChecksumSet {
            crc32: Some(crc.finalize().to_be_bytes()),
            md5: Some(md5.finalize().into()),
            sha1: Some(sha1.finalize().into()),
            sha256: Some(sha256.finalize().into()),
        },
        total,
    ))
}

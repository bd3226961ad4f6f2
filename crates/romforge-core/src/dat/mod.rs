//! Catalog model - games, roms, checksums, header strip rules

pub mod logiqx;

pub use logiqx::{parse_dat, parse_dat_str, parse_detector, write_dat};

/// Digests a catalog entry or scanned file may carry.
///
/// A field is `None` until the value is known. A checksum declared in a
/// catalog with an empty or malformed value parses to `None` and is never
/// a match target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumSet {
    pub crc32: Option<[u8; 4]>,
    pub md5: Option<[u8; 16]>,
    pub sha1: Option<[u8; 20]>,
    pub sha256: Option<[u8; 32]>,
}

impl ChecksumSet {
    /// True when every digest is present.
    pub fn is_complete(&self) -> bool {
        self.crc32.is_some() && self.md5.is_some() && self.sha1.is_some() && self.sha256.is_some()
    }

    /// True when no digest is present.
    pub fn is_empty(&self) -> bool {
        self.crc32.is_none() && self.md5.is_none() && self.sha1.is_none() && self.sha256.is_none()
    }
}

/// Parse a fixed-width hex checksum. Empty, short, or malformed input
/// means "not specified".
pub fn parse_checksum<const N: usize>(hex: &str) -> Option<[u8; N]> {
    let hex = hex.trim();
    if hex.len() != N * 2 {
        return None;
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}

/// Format a checksum as lowercase hex.
pub fn format_checksum(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Dump status recorded for a rom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RomStatus {
    #[default]
    Good,
    BadDump,
    NoDump,
    Verified,
}

impl RomStatus {
    pub fn from_attr(value: &str) -> Self {
        match value {
            "baddump" => RomStatus::BadDump,
            "nodump" => RomStatus::NoDump,
            "verified" => RomStatus::Verified,
            _ => RomStatus::Good,
        }
    }

    /// Attribute value written to a DAT; `Good` is the default and is
    /// omitted.
    pub fn as_attr(&self) -> Option<&'static str> {
        match self {
            RomStatus::Good => None,
            RomStatus::BadDump => Some("baddump"),
            RomStatus::NoDump => Some("nodump"),
            RomStatus::Verified => Some("verified"),
        }
    }
}

/// One expected file within a game. The name is a posix-like relative
/// path and may contain subfolders.
#[derive(Debug, Clone, Default)]
pub struct Rom {
    pub name: String,
    pub size: u64,
    pub checksums: ChecksumSet,
    pub status: RomStatus,
}

/// A named group of roms, corresponding to one archive or one folder.
#[derive(Debug, Clone, Default)]
pub struct Game {
    pub name: String,
    pub description: String,
    pub roms: Vec<Rom>,
}

/// A byte-equality test a header rule applies before stripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTest {
    pub offset: u64,
    pub value: Vec<u8>,
}

/// One header strip rule: when every test matches the file contents,
/// hashing starts at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    pub start: u64,
    pub tests: Vec<RuleTest>,
}

impl HeaderRule {
    fn applies(&self, data: &[u8]) -> bool {
        self.tests.iter().all(|t| {
            let start = t.offset as usize;
            data.len() >= start + t.value.len()
                && data[start..start + t.value.len()] == t.value[..]
        })
    }
}

/// Header block of a catalog, optionally carrying strip rules.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub rules: Vec<HeaderRule>,
}

impl Header {
    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Offset where the data block starts: the start offset of the first
    /// rule whose tests all pass, clamped to the file length; zero when no
    /// rule applies.
    pub fn data_start(&self, data: &[u8]) -> u64 {
        self.rules
            .iter()
            .find(|r| r.applies(data))
            .map(|r| r.start.min(data.len() as u64))
            .unwrap_or(0)
    }
}

/// A reference catalog of expected games and roms.
#[derive(Debug, Clone, Default)]
pub struct Database {
    pub header: Header,
    pub games: Vec<Game>,
}

impl Database {
    /// Total number of rom entries across all games.
    pub fn rom_count(&self) -> usize {
        self.games.iter().map(|g| g.roms.len()).sum()
    }

    /// Stable sort by game name; the catalog builder applies this after
    /// both discovery passes.
    pub fn sort_games(&mut self) {
        self.games.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_checksum_valid() {
        assert_eq!(
            parse_checksum::<4>("deadbeef"),
            Some([0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(
            parse_checksum::<4>("DEADBEEF"),
            Some([0xde, 0xad, 0xbe, 0xef])
        );
    }

    #[test]
    fn test_parse_checksum_rejects_empty_and_malformed() {
        assert_eq!(parse_checksum::<4>(""), None);
        assert_eq!(parse_checksum::<4>("dead"), None);
        assert_eq!(parse_checksum::<4>("deadbeefff"), None);
        assert_eq!(parse_checksum::<4>("deadbexf"), None);
    }

    #[test]
    fn test_format_checksum_roundtrip() {
        let bytes = parse_checksum::<4>("db1720a5").unwrap();
        assert_eq!(format_checksum(&bytes), "db1720a5");
    }

    #[test]
    fn test_rom_status_attrs() {
        assert_eq!(RomStatus::from_attr("baddump"), RomStatus::BadDump);
        assert_eq!(RomStatus::from_attr("anything"), RomStatus::Good);
        assert_eq!(RomStatus::Good.as_attr(), None);
        assert_eq!(RomStatus::NoDump.as_attr(), Some("nodump"));
    }

    #[test]
    fn test_data_start_with_matching_rule() {
        let header = Header {
            rules: vec![HeaderRule {
                start: 4,
                tests: vec![RuleTest {
                    offset: 0,
                    value: b"XXXX".to_vec(),
                }],
            }],
            ..Default::default()
        };

        assert_eq!(header.data_start(b"XXXXABCD"), 4);
        // Tests fail: no stripping.
        assert_eq!(header.data_start(b"YYYYABCD"), 0);
        // File shorter than the test window: no stripping.
        assert_eq!(header.data_start(b"XX"), 0);
    }

    #[test]
    fn test_data_start_clamps_to_file_length() {
        let header = Header {
            rules: vec![HeaderRule {
                start: 100,
                tests: vec![],
            }],
            ..Default::default()
        };
        assert_eq!(header.data_start(b"short"), 5);
    }

    #[test]
    fn test_sort_games_is_stable_by_name() {
        let mut db = Database::default();
        for name in ["zeta", "alpha", "mid", "alpha"] {
            db.games.push(Game {
                name: name.to_string(),
                description: name.to_string(),
                roms: Vec::new(),
            });
        }
        db.sort_games();
        let names: Vec<&str> = db.games.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "alpha", "mid", "zeta"]);
    }
}

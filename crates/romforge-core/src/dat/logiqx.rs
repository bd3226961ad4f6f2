//! Logiqx XML catalog reading and writing, plus header detector parsing

use super::{
    Database, Game, Header, HeaderRule, Rom, RomStatus, RuleTest, format_checksum, parse_checksum,
};
use crate::error::{Error, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use std::fs;
use std::path::Path;

/// Parse a Logiqx DAT file (the format used by TOSEC, No-Intro, Redump).
pub fn parse_dat(path: &Path) -> Result<Database> {
    let content = fs::read_to_string(path)?;
    // Strip UTF-8 BOM if present
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    parse_dat_str(content)
}

/// Parse Logiqx XML from a string.
pub fn parse_dat_str(xml: &str) -> Result<Database> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut db = Database::default();

    let mut buf = Vec::new();
    let mut current_game: Option<Game> = None;
    let mut in_header = false;
    let mut current_text_target: Option<&str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                match tag_name.as_str() {
                    "header" => in_header = true,
                    "name" if in_header => current_text_target = Some("name"),
                    "description" if in_header => current_text_target = Some("description"),
                    "version" if in_header => current_text_target = Some("version"),
                    "game" | "machine" | "software" => {
                        let mut game = Game::default();
                        for attr in e.attributes().flatten() {
                            let value = String::from_utf8_lossy(&attr.value).to_string();
                            match attr.key.as_ref() {
                                b"name" => game.name = value,
                                b"description" => game.description = value,
                                _ => {}
                            }
                        }
                        current_game = Some(game);
                    }
                    "rom" => {
                        let rom = parse_rom_attributes(&e);
                        if let Some(ref mut game) = current_game {
                            game.roms.push(rom);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                match tag_name.as_str() {
                    "header" => in_header = false,
                    "game" | "machine" | "software" => {
                        if let Some(mut game) = current_game.take() {
                            if game.description.is_empty() {
                                game.description = game.name.clone();
                            }
                            db.games.push(game);
                        }
                    }
                    _ => {}
                }

                current_text_target = None;
            }
            Ok(Event::Text(e)) => {
                if let Some(target) = current_text_target {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match target {
                        "name" => db.header.name = text,
                        "description" => db.header.description = text,
                        "version" => db.header.version = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                // Self-closing <rom /> elements
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "rom" {
                    let rom = parse_rom_attributes(&e);
                    if let Some(ref mut game) = current_game {
                        game.roms.push(rom);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Dat(format!(
                    "XML error at position {}: {:?}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(db)
}

/// Parse rom attributes from an XML element
fn parse_rom_attributes(e: &BytesStart) -> Rom {
    let mut rom = Rom::default();

    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).to_string();

        match attr.key.as_ref() {
            b"name" => rom.name = value,
            b"size" => rom.size = value.parse().unwrap_or(0),
            b"crc" => rom.checksums.crc32 = parse_checksum(&value),
            b"md5" => rom.checksums.md5 = parse_checksum(&value),
            b"sha1" => rom.checksums.sha1 = parse_checksum(&value),
            b"sha256" => rom.checksums.sha256 = parse_checksum(&value),
            b"status" => rom.status = RomStatus::from_attr(&value),
            _ => {}
        }
    }

    rom
}

/// Write a catalog as a Logiqx DAT file.
pub fn write_dat(db: &Database, path: &Path) -> Result<()> {
    let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("datafile")))?;

    writer.write_event(Event::Start(BytesStart::new("header")))?;
    write_text_element(&mut writer, "name", &db.header.name)?;
    write_text_element(&mut writer, "description", &db.header.description)?;
    if let Some(version) = &db.header.version {
        write_text_element(&mut writer, "version", version)?;
    }
    writer.write_event(Event::End(BytesEnd::new("header")))?;

    for game in &db.games {
        let mut game_elem = BytesStart::new("game");
        game_elem.push_attribute(("name", game.name.as_str()));
        writer.write_event(Event::Start(game_elem))?;
        write_text_element(&mut writer, "description", &game.description)?;

        for rom in &game.roms {
            let mut rom_elem = BytesStart::new("rom");
            rom_elem.push_attribute(("name", rom.name.as_str()));
            rom_elem.push_attribute(("size", rom.size.to_string().as_str()));
            if let Some(crc) = &rom.checksums.crc32 {
                rom_elem.push_attribute(("crc", format_checksum(crc).as_str()));
            }
            if let Some(md5) = &rom.checksums.md5 {
                rom_elem.push_attribute(("md5", format_checksum(md5).as_str()));
            }
            if let Some(sha1) = &rom.checksums.sha1 {
                rom_elem.push_attribute(("sha1", format_checksum(sha1).as_str()));
            }
            if let Some(sha256) = &rom.checksums.sha256 {
                rom_elem.push_attribute(("sha256", format_checksum(sha256).as_str()));
            }
            if let Some(status) = rom.status.as_attr() {
                rom_elem.push_attribute(("status", status));
            }
            writer.write_event(Event::Empty(rom_elem))?;
        }

        writer.write_event(Event::End(BytesEnd::new("game")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("datafile")))?;

    fs::write(path, writer.into_inner())?;
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Parse a header detector XML file into strip rules.
///
/// The detector format carries hexadecimal offsets:
/// `<detector><rule start_offset="10"><data offset="0" value="4e4553"/></rule></detector>`
pub fn parse_detector(path: &Path) -> Result<Header> {
    let content = fs::read_to_string(path)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut header = Header::default();
    let mut buf = Vec::new();
    let mut current_rule: Option<HeaderRule> = None;
    let mut text_is_name = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag_name.as_str() {
                    "name" => text_is_name = true,
                    "rule" => {
                        let mut rule = HeaderRule {
                            start: 0,
                            tests: Vec::new(),
                        };
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"start_offset" {
                                let value = String::from_utf8_lossy(&attr.value);
                                rule.start = parse_hex_offset(&value).ok_or_else(|| {
                                    Error::Dat(format!("bad rule start_offset: {}", value))
                                })?;
                            }
                        }
                        current_rule = Some(rule);
                    }
                    "data" => {
                        let mut offset = 0u64;
                        let mut value = Vec::new();
                        for attr in e.attributes().flatten() {
                            let text = String::from_utf8_lossy(&attr.value).to_string();
                            match attr.key.as_ref() {
                                b"offset" => {
                                    offset = parse_hex_offset(&text).ok_or_else(|| {
                                        Error::Dat(format!("bad data offset: {}", text))
                                    })?;
                                }
                                b"value" => {
                                    value = parse_hex_bytes(&text).ok_or_else(|| {
                                        Error::Dat(format!("bad data value: {}", text))
                                    })?;
                                }
                                _ => {}
                            }
                        }
                        if let Some(ref mut rule) = current_rule {
                            rule.tests.push(RuleTest { offset, value });
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag_name.as_str() {
                    "rule" => {
                        if let Some(rule) = current_rule.take() {
                            header.rules.push(rule);
                        }
                    }
                    "name" => text_is_name = false,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if text_is_name {
                    header.name = e.unescape().unwrap_or_default().to_string();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Dat(format!(
                    "XML error at position {}: {:?}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(header)
}

fn parse_hex_offset(text: &str) -> Option<u64> {
    let text = text.trim().trim_start_matches("0x");
    u64::from_str_radix(text, 16).ok()
}

fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() || text.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    for i in (0..text.len()).step_by(2) {
        out.push(u8::from_str_radix(text.get(i..i + 2)?, 16).ok()?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_simple_dat() {
        let xml = r#"<?xml version="1.0"?>
<datafile>
  <header>
    <name>Test DAT</name>
    <description>Test DAT description</description>
    <version>2026-01-30</version>
  </header>
  <game name="Test Game">
    <rom name="test.rom" size="1024" crc="abcd1234" md5="cb08ca4a7bb5f9683c19133a84872ca7" sha1="fb2f85c88567f3c8ce9b799c7c54642d0c7b41f6"/>
  </game>
</datafile>"#;

        let db = parse_dat_str(xml).unwrap();
        assert_eq!(db.header.name, "Test DAT");
        assert_eq!(db.header.version, Some("2026-01-30".to_string()));
        assert_eq!(db.games.len(), 1);
        assert_eq!(db.games[0].name, "Test Game");
        assert_eq!(db.games[0].roms.len(), 1);

        let rom = &db.games[0].roms[0];
        assert_eq!(rom.name, "test.rom");
        assert_eq!(rom.size, 1024);
        assert_eq!(rom.checksums.crc32, Some([0xab, 0xcd, 0x12, 0x34]));
        assert!(rom.checksums.md5.is_some());
        assert!(rom.checksums.sha1.is_some());
        assert!(rom.checksums.sha256.is_none());
        assert_eq!(rom.status, RomStatus::Good);
    }

    #[test]
    fn test_parse_multiple_games_and_status() {
        let xml = r#"<?xml version="1.0"?>
<datafile>
  <header>
    <name>Multi Test</name>
  </header>
  <game name="Game 1">
    <rom name="game1.rom" size="100" crc="11111111"/>
  </game>
  <game name="Game 2">
    <rom name="game2.rom" size="200" crc="22222222" status="baddump"/>
    <rom name="game2 extra.rom" size="300" status="nodump"/>
  </game>
</datafile>"#;

        let db = parse_dat_str(xml).unwrap();
        assert_eq!(db.games.len(), 2);
        assert_eq!(db.rom_count(), 3);
        assert_eq!(db.games[1].roms[0].status, RomStatus::BadDump);
        // nodump rom with no checksums: present but never content-matchable
        assert!(db.games[1].roms[1].checksums.is_empty());
    }

    #[test]
    fn test_parse_empty_checksum_is_absent() {
        let xml = r#"<?xml version="1.0"?>
<datafile>
  <header><name>Empty CRC</name></header>
  <game name="G">
    <rom name="a.bin" size="4" crc="" sha1="xyz"/>
  </game>
</datafile>"#;

        let db = parse_dat_str(xml).unwrap();
        let rom = &db.games[0].roms[0];
        assert_eq!(rom.checksums.crc32, None);
        assert_eq!(rom.checksums.sha1, None);
    }

    #[test]
    fn test_write_then_parse_preserves_catalog() {
        let mut db = Database::default();
        db.header.name = "Written".to_string();
        db.header.description = "Written".to_string();
        db.header.version = Some("1.0".to_string());
        db.games.push(Game {
            name: "Foo & Bar".to_string(),
            description: "Foo & Bar".to_string(),
            roms: vec![Rom {
                name: "foo.bin".to_string(),
                size: 4,
                checksums: abcd_checksums(),
                status: RomStatus::Verified,
            }],
        });

        let dir = tempdir().unwrap();
        let path = dir.path().join("out.dat");
        write_dat(&db, &path).unwrap();

        let parsed = parse_dat(&path).unwrap();
        assert_eq!(parsed.header.name, "Written");
        assert_eq!(parsed.games.len(), 1);
        assert_eq!(parsed.games[0].name, "Foo & Bar");
        let rom = &parsed.games[0].roms[0];
        assert_eq!(rom.name, "foo.bin");
        assert_eq!(rom.size, 4);
        assert_eq!(rom.checksums, abcd_checksums());
        assert_eq!(rom.status, RomStatus::Verified);
    }

    #[test]
    fn test_parse_detector() {
        let xml = r#"<?xml version="1.0"?>
<detector>
  <name>Test Console</name>
  <rule start_offset="10">
    <data offset="0" value="4e4553"/>
  </rule>
</detector>"#;

        let dir = tempdir().unwrap();
        let path = dir.path().join("detector.xml");
        std::fs::write(&path, xml).unwrap();

        let header = parse_detector(&path).unwrap();
        assert_eq!(header.name, "Test Console");
        assert_eq!(header.rules.len(), 1);
        assert_eq!(header.rules[0].start, 0x10);
        assert_eq!(header.rules[0].tests.len(), 1);
        assert_eq!(header.rules[0].tests[0].offset, 0);
        assert_eq!(header.rules[0].tests[0].value, b"NES".to_vec());
    }

    /// Digests of the bytes `ABCD`.
    fn abcd_checksums() -> super::super::ChecksumSet {
        super::super::ChecksumSet {
            crc32: parse_checksum("db1720a5"),
            md5: parse_checksum("cb08ca4a7bb5f9683c19133a84872ca7"),
            sha1: parse_checksum("fb2f85c88567f3c8ce9b799c7c54642d0c7b41f6"),
            sha256: parse_checksum(
                "e12e115acf4552b2568b55e93cbd39394c4ef81c82447fafc997882a02d23677",
            ),
        }
    }
}

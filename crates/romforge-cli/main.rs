use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::Sender;
use serde::Serialize;
use serde_json::json;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;

use romforge_core::create::{self, CreateOptions};
use romforge_core::dat;
use romforge_core::rebuild::{self, RebuildOptions, RebuildResult};
use romforge_core::services::cancel::CancelToken;
use romforge_core::services::progress::{CreateEvent, ProgressSink, RebuildEvent, ScanEvent};
use romforge_core::storage::ContainerKind;
use romforge_core::storage::offline::OfflineIndex;
use romforge_core::verify::{self, ScanResult, Storage};

#[derive(Parser)]
#[command(name = "romforge")]
#[command(about = "ROM set verification and rebuilding against DAT catalogs")]
struct Cli {
    /// Emit progress events as JSON lines instead of interactive text
    #[arg(long, global = true, default_value_t = false)]
    progress_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify storage folders against a DAT
    Verify {
        /// Path to the DAT file
        dat: PathBuf,

        /// Storage folders to scan
        folders: Vec<PathBuf>,

        /// Offline index files to include as storage
        #[arg(long)]
        index: Vec<PathBuf>,

        /// List every classified rom and file, not just totals
        #[arg(long)]
        details: bool,
    },
    /// Rebuild a clean set from scattered sources
    Rebuild {
        /// Path to the DAT file
        dat: PathBuf,

        /// Folder holding the scattered sources
        source: PathBuf,

        /// Folder the rebuilt games are written into
        dest: PathBuf,

        /// Container format for rebuilt games: dir, zip, 7z, torrentzip, torrent7z
        #[arg(long, value_parser = parse_kind, default_value = "zip")]
        format: ContainerKind,

        /// Delete source entries once they are rebuilt
        #[arg(long)]
        remove_source: bool,

        /// Recompute checksums instead of trusting container indexes
        #[arg(long)]
        force_checksums: bool,
    },
    /// Derive a DAT from a folder of known-good sets
    Create {
        /// Folder whose top-level subfolders and archives become games
        source: PathBuf,

        /// Path the DAT is written to
        output: PathBuf,

        /// Catalog name (default: source folder name)
        #[arg(long)]
        name: Option<String>,

        /// Catalog description (default: same as name)
        #[arg(long)]
        description: Option<String>,

        /// Hash every file even when its archive already reports a CRC32
        #[arg(long)]
        force_checksums: bool,
    },
    /// Snapshot a hashed folder into an offline index
    Index {
        /// Folder to hash and record
        folder: PathBuf,

        /// Path the index is written to
        output: PathBuf,
    },
    /// Show summary information about a DAT
    Info {
        /// Path to the DAT file
        dat: PathBuf,

        /// Also load a header detector file and show its strip rules
        #[arg(long)]
        detector: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let json = cli.progress_json;

    match cli.command {
        Commands::Verify {
            dat,
            folders,
            index,
            details,
        } => cmd_verify(&dat, folders, index, details, json),
        Commands::Rebuild {
            dat,
            source,
            dest,
            format,
            remove_source,
            force_checksums,
        } => cmd_rebuild(&dat, &source, &dest, format, remove_source, force_checksums, json),
        Commands::Create {
            source,
            output,
            name,
            description,
            force_checksums,
        } => cmd_create(&source, &output, name, description, force_checksums, json),
        Commands::Index { folder, output } => cmd_index(&folder, &output),
        Commands::Info { dat, detector } => cmd_info(&dat, detector.as_deref()),
    }
}

fn parse_kind(s: &str) -> std::result::Result<ContainerKind, String> {
    match s {
        "dir" | "folder" => Ok(ContainerKind::Dir),
        "zip" => Ok(ContainerKind::Zip),
        "7z" => Ok(ContainerKind::SevenZip),
        "torrentzip" | "tzip" => Ok(ContainerKind::TorrentZip),
        "torrent7z" | "t7z" => Ok(ContainerKind::TorrentSevenZip),
        _ => Err(format!("unknown container format: {}", s)),
    }
}

/// Arm a token that cancels the running engine when Enter is pressed.
fn cancel_on_enter(json: bool) -> CancelToken {
    let cancel = CancelToken::new();
    if !json {
        eprintln!("  Press Enter to stop gracefully...");
        let token = cancel.clone();
        thread::spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            let _ = stdin.lock().read_line(&mut line);
            token.cancel();
        });
    }
    cancel
}

struct ChannelSink<E> {
    tx: Sender<E>,
}

impl<E: Send + 'static> ProgressSink<E> for ChannelSink<E> {
    fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }
}

fn emit_json<T: Serialize>(stream: &str, event: &T) {
    match serde_json::to_string(&json!({ "stream": stream, "event": event })) {
        Ok(line) => eprintln!("{}", line),
        Err(err) => eprintln!("{{\"stream\":\"logger\",\"error\":\"{}\"}}", err),
    }
}

fn cmd_verify(
    dat_path: &Path,
    folders: Vec<PathBuf>,
    indexes: Vec<PathBuf>,
    details: bool,
    json: bool,
) -> Result<()> {
    if folders.is_empty() && indexes.is_empty() {
        bail!("at least one storage folder or --index is required");
    }

    let db = dat::parse_dat(dat_path)
        .with_context(|| format!("Failed to load DAT: {}", dat_path.display()))?;
    if !json {
        eprintln!(
            "Verifying against {} ({} games, {} entries)...",
            db.header.name,
            db.games.len(),
            db.rom_count()
        );
    }

    let storage = Storage { folders, indexes };
    let cancel = cancel_on_enter(json);

    let (tx, rx) = crossbeam_channel::unbounded::<ScanEvent>();
    let worker = thread::spawn(move || {
        let sink = ChannelSink { tx };
        verify::scan(&db, &storage, &sink, &cancel)
    });

    for event in rx {
        render_scan_event(&event, json);
    }
    let result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("scan worker panicked"))??;

    print_scan_report(&result, details);
    Ok(())
}

fn render_scan_event(event: &ScanEvent, json: bool) {
    if json {
        emit_json("scan", event);
        return;
    }
    match event {
        ScanEvent::EnumerationStarted { sources } => {
            eprintln!("Enumerating {} storage sources...", sources);
        }
        ScanEvent::EnumerationCompleted { files } => {
            eprintln!("  Found {} files", files);
        }
        ScanEvent::HashStarted { name, .. } => {
            eprint!("\r\x1b[2K  Hashing: {}", name);
        }
        ScanEvent::Finished { .. } | ScanEvent::Canceled => {
            eprintln!();
            if matches!(event, ScanEvent::Canceled) {
                eprintln!("Canceled - partial results follow.");
            }
        }
        _ => {}
    }
}

fn print_scan_report(result: &ScanResult, details: bool) {
    println!("Verification Report");
    println!("===================");
    println!("  Verified:   {:>8}", result.verified.len());
    println!("  Misnamed:   {:>8}", result.misnamed.len());
    println!("  Missing:    {:>8}", result.missing.len());
    println!("  Unmatched:  {:>8}", result.unmatched.len());

    if !details {
        return;
    }
    println!();
    for m in &result.verified {
        println!("  [OK]        {} / {}", m.game, m.rom.name);
    }
    for m in &result.misnamed {
        println!(
            "  [MISNAMED]  {} / {} found as {}:{}",
            m.game,
            m.rom.name,
            m.file.container.display(),
            m.file.name
        );
    }
    for m in &result.missing {
        println!("  [MISSING]   {} / {}", m.game, m.rom.name);
    }
    for f in &result.unmatched {
        println!("  [UNMATCHED] {}:{}", f.container.display(), f.name);
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_rebuild(
    dat_path: &Path,
    source: &Path,
    dest: &Path,
    format: ContainerKind,
    remove_source: bool,
    force_checksums: bool,
    json: bool,
) -> Result<()> {
    let db = dat::parse_dat(dat_path)
        .with_context(|| format!("Failed to load DAT: {}", dat_path.display()))?;
    if !json {
        eprintln!(
            "Rebuilding {} into {}...",
            db.header.name,
            dest.display()
        );
    }

    let options = RebuildOptions {
        target_kind: format,
        remove_source,
        force_checksums,
    };
    let cancel = cancel_on_enter(json);

    let (tx, rx) = crossbeam_channel::unbounded::<RebuildEvent>();
    let worker = {
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        thread::spawn(move || {
            let sink = ChannelSink { tx };
            rebuild::rebuild(&db, &source, &dest, &options, &sink, &cancel)
        })
    };

    for event in rx {
        render_rebuild_event(&event, json);
    }
    let result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("rebuild worker panicked"))??;

    print_rebuild_report(&result);
    Ok(())
}

fn render_rebuild_event(event: &RebuildEvent, json: bool) {
    if json {
        emit_json("rebuild", event);
        return;
    }
    match event {
        RebuildEvent::EnumerationStarted { source } => {
            eprintln!("Enumerating {}...", source.display());
        }
        RebuildEvent::EnumerationCompleted { files } => {
            eprintln!("  Found {} files", files);
        }
        RebuildEvent::HashStarted { name, .. } => {
            eprint!("\r\x1b[2K  Hashing: {}", name);
        }
        RebuildEvent::RomCompleted { game, rom } => {
            eprint!("\r\x1b[2K  Rebuilt: {} / {}", game, rom);
        }
        RebuildEvent::Finished { .. } | RebuildEvent::Canceled => {
            eprintln!();
            if matches!(event, RebuildEvent::Canceled) {
                eprintln!("Canceled - partial results follow.");
            }
        }
        _ => {}
    }
}

fn print_rebuild_report(result: &RebuildResult) {
    println!("Rebuild Report");
    println!("==============");
    println!("  Rebuilt:    {:>8}", result.rebuilt.len());
    println!("  Unmatched:  {:>8}", result.unmatched.len());
}

fn cmd_create(
    source: &Path,
    output: &Path,
    name: Option<String>,
    description: Option<String>,
    force_checksums: bool,
    json: bool,
) -> Result<()> {
    let name = name.unwrap_or_else(|| {
        source
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled Set".to_string())
    });
    let options = CreateOptions {
        name,
        description,
        version: None,
        force_checksums,
    };
    let cancel = cancel_on_enter(json);

    let (tx, rx) = crossbeam_channel::unbounded::<CreateEvent>();
    let worker = {
        let source = source.to_path_buf();
        let output = output.to_path_buf();
        thread::spawn(move || {
            let sink = ChannelSink { tx };
            create::create_database_to_path(&source, &output, &options, &sink, &cancel)
        })
    };

    for event in rx {
        render_create_event(&event, json);
    }
    let result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("create worker panicked"))??;

    if result.canceled {
        println!("Canceled - no DAT written.");
    } else {
        println!(
            "Created {} with {} games, {} entries",
            output.display(),
            result.database.games.len(),
            result.database.rom_count()
        );
    }
    Ok(())
}

fn render_create_event(event: &CreateEvent, json: bool) {
    if json {
        emit_json("create", event);
        return;
    }
    match event {
        CreateEvent::Started { source } => {
            eprintln!("Deriving catalog from {}...", source.display());
        }
        CreateEvent::GameAdded { name, roms } => {
            eprintln!("  {} ({} roms)", name, roms);
        }
        CreateEvent::Finished { .. } | CreateEvent::Canceled => {}
    }
}

fn cmd_index(folder: &Path, output: &Path) -> Result<()> {
    eprintln!("Indexing {}...", folder.display());
    let index = OfflineIndex::build(folder, &CancelToken::new())
        .with_context(|| format!("Failed to index {}", folder.display()))?;
    index.save(output)?;
    println!(
        "Indexed {} files into {}",
        index.files.len(),
        output.display()
    );
    Ok(())
}

fn cmd_info(dat_path: &Path, detector: Option<&Path>) -> Result<()> {
    let db = dat::parse_dat(dat_path)
        .with_context(|| format!("Failed to load DAT: {}", dat_path.display()))?;

    println!("DAT Information");
    println!("===============");
    println!("  Name:        {}", db.header.name);
    if !db.header.description.is_empty() && db.header.description != db.header.name {
        println!("  Description: {}", db.header.description);
    }
    if let Some(version) = &db.header.version {
        println!("  Version:     {}", version);
    }
    println!("  Games:       {}", db.games.len());
    println!("  Entries:     {}", db.rom_count());

    if let Some(detector_path) = detector {
        let header = dat::parse_detector(detector_path)
            .with_context(|| format!("Failed to load detector: {}", detector_path.display()))?;
        println!();
        println!("Detector: {}", header.name);
        for (i, rule) in header.rules.iter().enumerate() {
            println!(
                "  Rule {}: strip to offset 0x{:x} ({} tests)",
                i + 1,
                rule.start,
                rule.tests.len()
            );
        }
    }
    Ok(())
}

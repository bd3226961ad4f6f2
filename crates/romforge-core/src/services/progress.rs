use serde::Serialize;
use std::path::PathBuf;

/// Events emitted while scanning storage against a catalog
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    EnumerationStarted {
        sources: usize,
    },
    EnumerationCompleted {
        files: u64,
    },
    HashStarted {
        container: PathBuf,
        name: String,
    },
    HashCompleted {
        container: PathBuf,
        name: String,
    },
    /// A rom was satisfied by a file with the correct container and name.
    Verified {
        game: String,
        rom: String,
    },
    /// A rom was satisfied by a file whose container or name disagrees.
    Misnamed {
        game: String,
        rom: String,
        container: PathBuf,
        found: String,
    },
    Missing {
        game: String,
        rom: String,
    },
    Unmatched {
        container: PathBuf,
        name: String,
    },
    Finished {
        verified: u64,
        misnamed: u64,
        missing: u64,
        unmatched: u64,
    },
    Canceled,
}

/// Events emitted while rebuilding a set into a destination
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RebuildEvent {
    EnumerationStarted {
        source: PathBuf,
    },
    EnumerationCompleted {
        files: u64,
    },
    HashStarted {
        container: PathBuf,
        name: String,
    },
    HashCompleted {
        container: PathBuf,
        name: String,
    },
    RomStarted {
        game: String,
        rom: String,
    },
    RomCompleted {
        game: String,
        rom: String,
    },
    Unmatched {
        container: PathBuf,
        name: String,
    },
    Finished {
        rebuilt: u64,
        unmatched: u64,
    },
    Canceled,
}

/// Events emitted while deriving a catalog from a folder
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CreateEvent {
    Started {
        source: PathBuf,
    },
    GameAdded {
        name: String,
        roms: u64,
    },
    Finished {
        games: u64,
        roms: u64,
    },
    Canceled,
}

pub trait ProgressSink<E>: Send + Sync + 'static {
    fn emit(&self, event: E);
}

impl<E> ProgressSink<E> for ()
where
    E: Send,
{
    fn emit(&self, _event: E) {}
}

impl<E, F> ProgressSink<E> for F
where
    E: Send,
    F: Fn(E) + Send + Sync + 'static,
{
    fn emit(&self, event: E) {
        (self)(event);
    }
}

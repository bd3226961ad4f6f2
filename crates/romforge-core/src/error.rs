//! Error types shared across the core engines

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures the core engines can surface.
///
/// Cancellation is deliberately not represented here: a canceled pass
/// returns its partial result with a `canceled` flag instead of an error.
#[derive(Debug, Error)]
pub enum Error {
    /// The catalog carries header strip rules and the requested operation
    /// does not support them.
    #[error("header strip rules are not supported by this operation")]
    HeadersUnsupported,

    #[error("source folder not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("destination path is not usable: {0}")]
    BadDestination(PathBuf),

    #[error("no container handler for: {0}")]
    UnknownContainer(PathBuf),

    #[error("entry `{name}` not found in {container}")]
    EntryNotFound { container: PathBuf, name: String },

    #[error("malformed DAT file: {0}")]
    Dat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("7z archive error: {0}")]
    SevenZip(#[from] sevenz_rust::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("index format error: {0}")]
    Index(#[from] serde_json::Error),
}

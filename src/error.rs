use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no candidate succeeded for {identifier}; last error: {last_diagnostic}")]
    FetchExhausted {
        identifier: String,
        last_diagnostic: String,
    },

    #[error("fetch aborted: {0}")]
    FetchAborted(String),

    #[error("zip entry path traversal detected: {0}")]
    PathTraversal(String),

    #[error("server did not return a valid zip archive: {0}")]
    CorruptArchive(String),

    #[error("unable to decode attribute table (unknown encoding): {0}")]
    UnreadableEncoding(PathBuf),

    #[error("failed to write attribute table: {0}")]
    AttributeWriteFailure(String),

    #[error("WFS request failed: {0}")]
    Http(String),

    #[error("WFS returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("unknown layer(s): {unknown}. Allowed values: {allowed}")]
    UnknownLayer { unknown: String, allowed: String },

    #[error("ambiguous type name {identifier}: several advertised names match ({matches})")]
    AmbiguousTypeName { identifier: String, matches: String },

    #[error("layers {first} and {second} would share the output directory {dir}")]
    DuplicateOutputDir {
        first: String,
        second: String,
        dir: String,
    },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// The file ended in the middle of an event.
    #[error("raw event file truncated in event {event} at byte {offset}")]
    Truncated { event: u64, offset: usize },

    /// Malformed channel-map line.
    #[error("channel map line {line}: {message}")]
    ChannelMap { line: usize, message: String },

    /// Channel-map line whose identifiers are out of range.
    #[error("channel map line {line}: {source}")]
    ChannelMapEntry {
        line: usize,
        #[source]
        source: klm_core::Error,
    },

    /// JSON encoding of histogram output failed.
    #[error("histogram output error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors raised while reading the event source.
    #[must_use]
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::InvalidFormat(_) | Self::Truncated { .. }
        )
    }
}

//! Error types for klm-core.

use thiserror::Error;

/// Result type alias for klm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for identifier construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A field does not fit in its packed bit range.
    #[error("{field} value {value} exceeds maximum {max}")]
    FieldOverflow {
        field: &'static str,
        value: u32,
        max: u32,
    },

    /// Strip range with `min > max`.
    #[error("invalid strip range: {min}..={max}")]
    InvalidStripRange { min: u8, max: u8 },
}

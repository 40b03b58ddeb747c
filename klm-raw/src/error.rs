//! Raw-format error types.

use thiserror::Error;

/// Result type for raw decoding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Raw-format error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Calibration file could not be parsed.
    #[error("calibration parse error: {0}")]
    CalibrationParse(#[from] serde_json::Error),

    /// Calibration values are inconsistent.
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

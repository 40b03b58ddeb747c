//! klm-raw: KLM hit-word codec, time calibration and buffer decoder.
//!
//! This crate turns the per-finesse word buffers of the barrel KLM
//! readout into classified, time-calibrated [`klm_core::HitRecord`]s.
//!
//! # Key Components
//!
//! - [`RawHitWord`] - Bit-field access to one hit-word pair
//! - [`CalibrationConfig`] - Sector offsets, prompt windows, DC layout
//! - [`HitDecoder`] - Two-pass buffer decoder with multiplicity counting
//! - [`RawEvent`] - Event model as delivered by the COPPER readout
//!
//! # Processing
//!
//! 1. **Framing**: skip empty buffers, reject even-length buffers and
//!    non-zero trailers
//! 2. **First pass**: per-channel multiplicity and ctime/TDC spread
//! 3. **Second pass**: emit hits with calibrated time and prompt/background
//!    classification
//!
//! Events are independent; [`HitDecoder::decode_events_parallel`] spreads
//! them over the rayon pool.

mod config;
mod decoder;
mod error;
pub mod event;
pub mod multiplicity;
pub mod timing;
mod word;

pub use config::CalibrationConfig;
pub use decoder::{
    check_framing, merge_diagnostics, BufferLocation, BufferSummary, DecodeStream, DecodedEvent,
    HitDecoder, ValueRange,
};
pub use error::{Error, Result};
pub use event::{build_buffer, normalize_node, relative_node, CopperRecord, RawEvent};
pub use multiplicity::MultiplicityTable;
pub use word::{word_pairs, HitFields, RawHitWord};

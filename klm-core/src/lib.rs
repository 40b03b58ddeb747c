//! klm-core: Core identifiers and types for KLM raw-hit processing.
//!
//! This crate provides the electronics/detector identifiers, the decoded
//! hit record, the channel-map abstraction and the decode diagnostics
//! shared by the decoder, the aggregator and the I/O layer.
//!

pub mod channel_map;
pub mod diagnostics;
pub mod error;
pub mod hit;
pub mod ids;

pub use channel_map::{ChannelMap, EmptyChannelMap};
pub use diagnostics::{DecodeDiagnostics, DecodeIssue};
pub use error::{Error, Result};
pub use hit::{EntrySelection, HitRecord, HitTiming, Technology};
pub use ids::{
    ElectronicsId, ModuleId, NUM_COPPERS, NUM_DATA_CONCENTRATORS, NUM_FINESSE, NUM_SECTORS,
};

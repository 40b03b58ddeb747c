//! klm-io: raw event files, channel maps and the inspection pipeline.
//!
//! This crate provides memory-mapped reading of raw KLM event files via
//! memmap2, CSV channel-map loading, JSON histogram output and the driver
//! that ties an event source to the decoder and aggregator.

mod channel_map;
mod error;
pub mod pipeline;
mod reader;
mod writer;

pub use channel_map::{
    load_channel_map, parse_channel_map, sector_counts, ChannelMapTable, CHANNEL_MAP_HEADER,
};
pub use error::{Error, Result};
pub use pipeline::{inspect_events, inspect_events_parallel, InspectionReport, DEFAULT_BATCH_SIZE};
pub use reader::{
    FileHeader, MappedFileReader, RawEventFileReader, RawEventIter, HEADER_BYTES, MAGIC,
    MAX_COPPERS, VERSION,
};
pub use writer::{read_histograms_json, write_histograms_json, RawEventFileWriter};

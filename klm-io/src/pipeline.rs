//! Source → decoder → aggregator driver.
//!
//! A source error ends the job but never discards work: everything decoded
//! before the failure is aggregated and returned together with the error,
//! so the caller can write its outputs before exiting.

use klm_core::{ChannelMap, DecodeDiagnostics};
use klm_histogram::{HistogramSet, HitAggregator};
use klm_raw::{merge_diagnostics, HitDecoder, RawEvent};
use log::{info, warn};

use crate::{Error, Result};

/// Raw events decoded together on the parallel path.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Outcome of an inspection job.
#[derive(Debug)]
pub struct InspectionReport {
    pub histograms: HistogramSet,
    pub diagnostics: DecodeDiagnostics,
    /// Events decoded and aggregated.
    pub events: u64,
    /// The source error that stopped the job early, if any.
    pub error: Option<Error>,
}

impl InspectionReport {
    /// True if the source was read to its end.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

fn finish(
    aggregator: HitAggregator,
    diagnostics: DecodeDiagnostics,
    events: u64,
    error: Option<Error>,
) -> InspectionReport {
    if let Some(e) = &error {
        warn!("event source failed after {events} events: {e}");
    }
    if diagnostics.skipped_nodes > 0 || diagnostics.skipped_coppers > 0 {
        warn!(
            "skipped {} COPPER records with foreign node IDs and {} beyond the barrel boards",
            diagnostics.skipped_nodes, diagnostics.skipped_coppers
        );
    }
    if diagnostics.framing_errors > 0 {
        warn!(
            "{} buffers dropped for bad framing",
            diagnostics.framing_errors
        );
    }
    info!(
        "inspected {events} events: {} hits ({} mapped, {} unmapped)",
        diagnostics.total_hits(),
        diagnostics.mapped_hits,
        diagnostics.unmapped_hits
    );

    InspectionReport {
        histograms: aggregator.finish(),
        diagnostics,
        events,
        error,
    }
}

/// Decodes and aggregates events one at a time, in source order.
pub fn inspect_events<I, M>(
    source: I,
    decoder: &HitDecoder<M>,
    mut aggregator: HitAggregator,
) -> InspectionReport
where
    I: IntoIterator<Item = Result<RawEvent>>,
    M: ChannelMap,
{
    let mut diagnostics = DecodeDiagnostics::new();
    let mut events = 0u64;
    let mut error = None;

    for decoded in decoder.decode_stream(source) {
        match decoded {
            Ok(event) => {
                diagnostics.merge(&event.diagnostics);
                aggregator.fill_event(&event);
                events += 1;
            }
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    finish(aggregator, diagnostics, events, error)
}

/// Decodes batches of events on the rayon pool and aggregates them in
/// source order.
///
/// Produces the same histograms as [`inspect_events`].
pub fn inspect_events_parallel<I, M>(
    source: I,
    decoder: &HitDecoder<M>,
    mut aggregator: HitAggregator,
    batch_size: usize,
) -> InspectionReport
where
    I: IntoIterator<Item = Result<RawEvent>>,
    M: ChannelMap,
{
    let batch_size = batch_size.max(1);
    let mut diagnostics = DecodeDiagnostics::new();
    let mut events = 0u64;
    let mut error = None;
    let mut source = source.into_iter();
    let mut batch = Vec::with_capacity(batch_size);

    loop {
        batch.clear();
        for item in source.by_ref() {
            match item {
                Ok(event) => batch.push(event),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
            if batch.len() == batch_size {
                break;
            }
        }
        if batch.is_empty() {
            break;
        }

        let decoded = decoder.decode_events_parallel(&batch);
        diagnostics.merge(&merge_diagnostics(&decoded));
        aggregator.fill_events(&decoded);
        events += decoded.len() as u64;
        if error.is_some() || batch.len() < batch_size {
            break;
        }
    }

    finish(aggregator, diagnostics, events, error)
}

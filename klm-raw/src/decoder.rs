//! Buffer and event decoding.
//!
//! Each data-concentrator buffer is read in two passes. The first counts
//! entries per `(lane, axis, channel)` and tracks the ctime/TDC spread of
//! the buffer; the second emits one [`HitRecord`] per valid word pair, so
//! every hit carries the final multiplicity of its channel.

use klm_core::{
    ChannelMap, DecodeDiagnostics, DecodeIssue, ElectronicsId, EntrySelection, HitRecord,
    HitTiming, Technology, NUM_COPPERS,
};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::multiplicity::MultiplicityTable;
use crate::timing::{calibrate, legacy_ctime, revo9_offset, rpc_time, scint_time};
use crate::word::word_pairs;
use crate::{CalibrationConfig, RawEvent, RawHitWord};

/// Checks buffer framing and returns the trailer word.
///
/// `Ok(None)` for an empty buffer. A well-formed buffer has an odd length
/// and a trailer whose low 16 bits are zero.
///
/// # Errors
/// Returns the framing issue that disqualifies the buffer.
pub fn check_framing(buffer: &[u32]) -> Result<Option<u32>, DecodeIssue> {
    let Some(&trailer) = buffer.last() else {
        return Ok(None);
    };
    if buffer.len() % 2 == 0 {
        return Err(DecodeIssue::EvenLength {
            words: buffer.len(),
        });
    }
    if trailer & 0xFFFF != 0 {
        return Err(DecodeIssue::NonZeroTrailer { trailer });
    }
    Ok(Some(trailer))
}

/// Where a buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLocation {
    /// Normalised node number.
    pub node: u8,
    /// COPPER index within the event.
    pub copper: u8,
    pub finesse: u8,
    /// `(finesse << 2) | copper`.
    pub data_concentrator: u8,
    pub sector: u8,
}

impl BufferLocation {
    /// Locates a buffer, taking the sector from the DC-to-sector table.
    #[must_use]
    pub fn new(node: u8, copper: u8, finesse: u8, config: &CalibrationConfig) -> Self {
        let data_concentrator = ((finesse & 0x3) << 2) | (copper & 0x3);
        Self {
            node,
            copper,
            finesse,
            data_concentrator,
            sector: config.sector_for_dc(data_concentrator),
        }
    }

    /// Overrides the sector.
    #[must_use]
    pub fn with_sector(mut self, sector: u8) -> Self {
        self.sector = sector;
        self
    }
}

/// Closed range of observed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: u16,
    pub max: u16,
}

impl ValueRange {
    fn widen(range: &mut Option<Self>, value: u16) {
        match range {
            Some(r) => {
                r.min = r.min.min(value);
                r.max = r.max.max(value);
            }
            None => {
                *range = Some(Self {
                    min: value,
                    max: value,
                });
            }
        }
    }

    #[must_use]
    pub fn span(&self) -> u16 {
        self.max - self.min
    }
}

/// Per-buffer facts gathered during decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSummary {
    pub location: BufferLocation,
    /// Words in the buffer, trailer included.
    pub word_count: usize,
    /// Hits emitted (word pairs minus unknown flags).
    pub hit_count: usize,
    /// Distinct `(lane, axis, channel)` keys.
    pub distinct_channels: usize,
    pub unknown_flags: usize,
    /// RPC ctime spread in 8 ns ticks.
    pub rpc_ctime: Option<ValueRange>,
    /// RPC TDC spread in ns.
    pub rpc_tdc: Option<ValueRange>,
    /// Scintillator ctime spread in 8 ns ticks, after any legacy fix.
    pub scint_ctime: Option<ValueRange>,
    /// Trigger minus revo9 marker, ns.
    pub revo9_offset: i16,
    /// Trigger coarse time in ns that hit times are measured from.
    pub trigger_ctime: u32,
}

impl BufferSummary {
    /// Number of word pairs in the buffer.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.word_count / 2
    }

    /// RPC ctime spread in ns.
    #[must_use]
    pub fn rpc_ctime_span_ns(&self) -> Option<u32> {
        self.rpc_ctime.map(|r| u32::from(r.span()) << 3)
    }

    /// RPC TDC spread in ns.
    #[must_use]
    pub fn rpc_tdc_span_ns(&self) -> Option<u32> {
        self.rpc_tdc.map(|r| u32::from(r.span()))
    }

    /// Scintillator ctime spread in ns.
    #[must_use]
    pub fn scint_ctime_span_ns(&self) -> Option<u32> {
        self.scint_ctime.map(|r| u32::from(r.span()) << 3)
    }
}

/// Everything decoded from one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
    pub event_number: u32,
    pub hits: Vec<HitRecord>,
    pub buffers: Vec<BufferSummary>,
    /// Relative node ID and COPPER index of every board, skipped ones included.
    pub copper_nodes: Vec<(i64, usize)>,
    /// Counters for this event only.
    pub diagnostics: DecodeDiagnostics,
}

impl DecodedEvent {
    #[must_use]
    pub fn new(event_number: u32) -> Self {
        Self {
            event_number,
            ..Self::default()
        }
    }

    /// Hits passing an entry selection.
    pub fn selected(&self, selection: EntrySelection) -> impl Iterator<Item = &HitRecord> + '_ {
        self.hits
            .iter()
            .filter(move |h| selection.accepts(h.multiplicity))
    }

    /// Selected, mapped hits of one timing class and technology.
    #[must_use]
    pub fn count_mapped(
        &self,
        selection: EntrySelection,
        technology: Technology,
        timing: HitTiming,
    ) -> usize {
        self.selected(selection)
            .filter(|h| h.is_mapped() && h.technology == technology && h.timing == timing)
            .count()
    }
}

/// Sums the per-event counters of a batch.
#[must_use]
pub fn merge_diagnostics<'a, I>(events: I) -> DecodeDiagnostics
where
    I: IntoIterator<Item = &'a DecodedEvent>,
{
    let mut total = DecodeDiagnostics::new();
    for event in events {
        total.merge(&event.diagnostics);
    }
    total
}

/// Decodes raw buffers into calibrated hits.
///
/// Holds the calibration and channel map read-only; per-buffer working
/// state lives in a caller-owned [`MultiplicityTable`], one per thread.
#[derive(Debug, Clone)]
pub struct HitDecoder<M> {
    config: CalibrationConfig,
    channel_map: M,
}

impl<M: ChannelMap> HitDecoder<M> {
    #[must_use]
    pub fn new(config: CalibrationConfig, channel_map: M) -> Self {
        Self {
            config,
            channel_map,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    #[must_use]
    pub fn channel_map(&self) -> &M {
        &self.channel_map
    }

    /// Decodes one data-concentrator buffer, appending to `out`.
    ///
    /// Empty and malformed buffers add no hits and no summary; the problem
    /// is counted in `out.diagnostics`.
    pub fn decode_buffer(
        &self,
        buffer: &[u32],
        location: BufferLocation,
        trigger_ctime: u32,
        scratch: &mut MultiplicityTable,
        out: &mut DecodedEvent,
    ) {
        let diagnostics = &mut out.diagnostics;
        diagnostics.buffers += 1;

        let trailer = match check_framing(buffer) {
            Ok(Some(trailer)) => trailer,
            Ok(None) => {
                diagnostics.empty_buffers += 1;
                return;
            }
            Err(issue) => {
                debug!(
                    "event {} DC {} (sector {}): {issue}; skipping buffer",
                    out.event_number, location.data_concentrator, location.sector
                );
                diagnostics.record_issue(&issue);
                return;
            }
        };

        let body = &buffer[..buffer.len() - 1];
        let legacy = self.config.applies_legacy_ctime();
        let mut summary = BufferSummary {
            location,
            word_count: buffer.len(),
            hit_count: 0,
            distinct_channels: 0,
            unknown_flags: 0,
            rpc_ctime: None,
            rpc_tdc: None,
            scint_ctime: None,
            revo9_offset: revo9_offset(trigger_ctime, trailer),
            trigger_ctime,
        };

        scratch.clear();
        for word in word_pairs(body) {
            scratch.increment(word.lane_axis_channel());
            match word.technology() {
                Some(Technology::Rpc) => {
                    ValueRange::widen(&mut summary.rpc_ctime, word.ctime());
                    ValueRange::widen(&mut summary.rpc_tdc, word.tdc());
                }
                Some(Technology::Scintillator) => {
                    let ctime = corrected_ctime(word, trigger_ctime, legacy);
                    ValueRange::widen(&mut summary.scint_ctime, ctime);
                }
                None => {}
            }
        }
        summary.distinct_channels = scratch.distinct();

        for (index, word) in word_pairs(body).enumerate() {
            let Some(technology) = word.technology() else {
                let issue = DecodeIssue::UnknownFlag {
                    flag: word.flag(),
                    word0: word.word0(),
                };
                debug!(
                    "event {} DC {} hit {index}: {issue}",
                    out.event_number, location.data_concentrator
                );
                out.diagnostics.record_issue(&issue);
                summary.unknown_flags += 1;
                continue;
            };

            let hit = self.build_hit(
                word,
                technology,
                location,
                trigger_ctime,
                legacy,
                u16::try_from(index).unwrap_or(u16::MAX),
                scratch.get(word.lane_axis_channel()),
            );
            out.diagnostics.record_hit(&hit);
            out.hits.push(hit);
            summary.hit_count += 1;
        }

        out.buffers.push(summary);
    }

    #[allow(clippy::too_many_arguments)]
    fn build_hit(
        &self,
        word: RawHitWord,
        technology: Technology,
        location: BufferLocation,
        trigger_ctime: u32,
        legacy: bool,
        hit_index: u16,
        multiplicity: u16,
    ) -> HitRecord {
        let ctime = corrected_ctime(word, trigger_ctime, legacy);
        let raw_time = match technology {
            Technology::Rpc => rpc_time(word.tdc(), trigger_ctime),
            Technology::Scintillator => scint_time(ctime, trigger_ctime),
        };
        let calibrated_time = calibrate(
            raw_time,
            self.config.sector_offset(technology, location.sector),
        );
        let timing = if self.config.is_prompt(technology, calibrated_time) {
            HitTiming::Prompt
        } else {
            HitTiming::Background
        };

        let electronics_id = ElectronicsId::pack(
            location.node,
            location.finesse,
            word.lane(),
            word.axis(),
            word.channel(),
        );

        HitRecord {
            electronics_id,
            module_id: self.channel_map.module_id(electronics_id),
            technology,
            data_concentrator: location.data_concentrator,
            sector: location.sector,
            lane: word.lane(),
            axis: word.axis(),
            channel: word.channel(),
            raw_ctime: word.ctime(),
            ctime,
            tdc: word.tdc(),
            charge: word.charge(),
            adc_extra: word.adc_extra(),
            tdc_extra: word.tdc_extra(),
            raw_time,
            calibrated_time,
            timing,
            hit_index,
            multiplicity,
        }
    }

    /// Decodes every buffer of one event.
    ///
    /// Every board's node ID is recorded. Coppers with an unreadable node ID
    /// or an index past the barrel boards are then skipped and counted.
    pub fn decode_event(&self, event: &RawEvent, scratch: &mut MultiplicityTable) -> DecodedEvent {
        let mut out = DecodedEvent::new(event.event_number);
        out.diagnostics.events = 1;

        for (copper_index, copper) in event.coppers.iter().enumerate() {
            out.copper_nodes.push((copper.relative_node(), copper_index));
            let Some(node) = copper.node() else {
                out.diagnostics.skipped_nodes += 1;
                continue;
            };
            if copper_index >= NUM_COPPERS {
                out.diagnostics.skipped_coppers += 1;
                continue;
            }

            let trigger = copper.trigger_ctime();
            for (finesse, buffer) in copper.buffers.iter().enumerate() {
                let location =
                    BufferLocation::new(node, copper_index as u8, finesse as u8, &self.config);
                self.decode_buffer(buffer, location, trigger, scratch, &mut out);
            }
        }

        out
    }

    /// Decodes independent events across the rayon pool.
    ///
    /// Output order matches input order.
    pub fn decode_events_parallel(&self, events: &[RawEvent]) -> Vec<DecodedEvent> {
        events
            .par_iter()
            .map_init(MultiplicityTable::new, |scratch, event| {
                self.decode_event(event, scratch)
            })
            .collect()
    }

    /// Adapts a fallible event source into a stream of decoded events.
    pub fn decode_stream<I, E>(&self, events: I) -> DecodeStream<'_, M, I::IntoIter>
    where
        I: IntoIterator<Item = Result<RawEvent, E>>,
    {
        DecodeStream {
            decoder: self,
            events: events.into_iter(),
            scratch: MultiplicityTable::new(),
        }
    }
}

fn corrected_ctime(word: RawHitWord, trigger_ctime: u32, legacy: bool) -> u16 {
    if legacy && word.technology() == Some(Technology::Scintillator) {
        legacy_ctime(word.ctime(), trigger_ctime)
    } else {
        word.ctime()
    }
}

/// Iterator returned by [`HitDecoder::decode_stream`].
///
/// Source errors pass through unchanged.
pub struct DecodeStream<'a, M, I> {
    decoder: &'a HitDecoder<M>,
    events: I,
    scratch: MultiplicityTable,
}

impl<M, I, E> Iterator for DecodeStream<'_, M, I>
where
    M: ChannelMap,
    I: Iterator<Item = Result<RawEvent, E>>,
{
    type Item = Result<DecodedEvent, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.events.next()?;
        Some(event.map(|event| self.decoder.decode_event(&event, &mut self.scratch)))
    }
}

//! Accumulates decoded events into the named histogram set.

use std::collections::BTreeMap;

use klm_core::{
    EntrySelection, HitRecord, HitTiming, Technology, NUM_DATA_CONCENTRATORS, NUM_SECTORS,
};
use klm_raw::timing::rpc_time;
use klm_raw::{BufferSummary, DecodedEvent};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::histogram::{BinAxis, Histogram1D, Histogram2D};

/// Bins of the combined `lane * 2 + axis` coordinate.
pub const LANE_AXIS_BINS: usize = 42;

const TECHNOLOGIES: [Technology; 2] = [Technology::Rpc, Technology::Scintillator];

/// Data-concentrator processing delay per word pair ahead of a hit, ns.
const INDEX_DELAY_NS: f64 = 0.75;

/// RPC layers sit on lanes 6..=20, scintillator layers on lanes 1..=2.
const RPC_LAYERS: usize = 15;
const RPC_FIRST_LANE: u8 = 6;
const SCINT_LAYERS: usize = 2;
const SCINT_FIRST_LANE: u8 = 1;

fn tech_index(technology: Technology) -> usize {
    match technology {
        Technology::Rpc => 0,
        Technology::Scintillator => 1,
    }
}

fn tech_label(technology: Technology) -> &'static str {
    match technology {
        Technology::Rpc => "RPC",
        Technology::Scintillator => "Scint",
    }
}

fn sector_axis() -> BinAxis {
    BinAxis::integers(NUM_SECTORS)
}

fn time_axis(bins: usize) -> BinAxis {
    BinAxis::new(bins, -0.5, 1023.5)
}

fn sector_index(sector: u8) -> usize {
    usize::from(sector) % NUM_SECTORS
}

/// Calibrated time less the processing delay of the word pairs ahead of it.
fn index_corrected_time(hit: &HitRecord, delay_ns: f64) -> f64 {
    f64::from(hit.calibrated_time) - delay_ns * f64::from(hit.hit_index)
}

/// Every histogram produced by a job, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSet {
    pub selection: EntrySelection,
    pub events: u64,
    pub histograms_1d: BTreeMap<String, Histogram1D>,
    pub histograms_2d: BTreeMap<String, Histogram2D>,
}

impl HistogramSet {
    #[must_use]
    pub fn new(selection: EntrySelection) -> Self {
        Self {
            selection,
            ..Self::default()
        }
    }

    pub fn insert_1d(&mut self, histogram: Histogram1D) {
        self.histograms_1d.insert(histogram.name.clone(), histogram);
    }

    pub fn insert_2d(&mut self, histogram: Histogram2D) {
        self.histograms_2d.insert(histogram.name.clone(), histogram);
    }

    #[must_use]
    pub fn get_1d(&self, name: &str) -> Option<&Histogram1D> {
        self.histograms_1d.get(name)
    }

    #[must_use]
    pub fn get_2d(&self, name: &str) -> Option<&Histogram2D> {
        self.histograms_2d.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.histograms_1d.len() + self.histograms_2d.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All histogram names, 1D first.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.histograms_1d
            .keys()
            .chain(self.histograms_2d.keys())
            .map(String::as_str)
    }
}

/// Sector and lane/axis occupancy for either mapped or unmapped channels.
#[derive(Debug, Clone)]
struct Occupancy {
    sector_multihit: Histogram1D,
    sector: Histogram1D,
    tech_sector: [Histogram1D; 2],
    lane_axis: [Histogram2D; 2],
}

impl Occupancy {
    fn new(prefix: &str, label: &str) -> Self {
        let sector = |tech: &str, per: &str| {
            let what = if tech.is_empty() { String::new() } else { format!("{tech} ") };
            Histogram1D::new(
                format!("{prefix}{tech}SectorOccupancy{per}"),
                format!("Sector occupancy of {label} {what}channels;Sector #"),
                sector_axis(),
            )
        };
        let lane_axis = |tech: Technology| {
            let tech = tech_label(tech);
            Histogram2D::new(
                format!("{prefix}{tech}LaneAxisOccupancy"),
                format!("Lane/axis occupancy of {label} {tech} channels (%);Sector #;(Lane #) * 2 + (Axis #)"),
                sector_axis(),
                BinAxis::integers(LANE_AXIS_BINS),
            )
        };
        Self {
            sector_multihit: sector("", "Multihit"),
            sector: sector("", ""),
            tech_sector: TECHNOLOGIES.map(|t| sector(tech_label(t), "")),
            lane_axis: TECHNOLOGIES.map(lane_axis),
        }
    }

    fn fill(&mut self, hit: &HitRecord) {
        let sector = f64::from(hit.sector);
        let tech = tech_index(hit.technology);
        self.sector_multihit.fill(sector);
        if hit.is_single_entry() {
            self.sector.fill(sector);
        }
        self.tech_sector[tech].fill(sector);
        self.lane_axis[tech].fill(sector, f64::from(hit.lane_axis()));
    }

    /// Converts lane/axis counts into percentages of the sector total.
    fn normalise(&mut self) {
        for (totals, lane_axis) in self.tech_sector.iter().zip(self.lane_axis.iter_mut()) {
            for sector in 0..NUM_SECTORS {
                let total = totals.get(sector).unwrap_or(0.0);
                if total <= 0.0 {
                    continue;
                }
                for bin in 0..LANE_AXIS_BINS {
                    if let Some(count) = lane_axis.get(sector, bin) {
                        lane_axis.set(sector, bin, 100.0 * count / total);
                    }
                }
            }
        }
    }

    fn store(self, set: &mut HistogramSet) {
        set.insert_1d(self.sector_multihit);
        set.insert_1d(self.sector);
        self.tech_sector.into_iter().for_each(|h| set.insert_1d(h));
        self.lane_axis.into_iter().for_each(|h| set.insert_2d(h));
    }
}

/// Raw and, for mapped channels, calibrated time distributions.
#[derive(Debug, Clone)]
struct TimeHists {
    raw: Histogram1D,
    raw_by_sector: Histogram2D,
    calibrated: Option<(Histogram1D, Histogram2D)>,
    /// Subtracted per preceding word pair in the calibrated by-sector map.
    index_delay_ns: f64,
}

impl TimeHists {
    fn new(prefix: &str, label: &str, bins: usize, sector_bins: usize, calibrated: bool) -> Self {
        let pair = |suffix: &str, quantity: &str| {
            (
                Histogram1D::new(
                    format!("{prefix}{suffix}"),
                    format!("{label} distribution;{quantity} (ns)"),
                    time_axis(bins),
                ),
                Histogram2D::new(
                    format!("{prefix}{suffix}BySector"),
                    format!("{label};Sector #;{quantity} (ns)"),
                    sector_axis(),
                    time_axis(sector_bins),
                ),
            )
        };
        let (raw, raw_by_sector) = pair("", "t - t(trigger)");
        Self {
            raw,
            raw_by_sector,
            calibrated: calibrated.then(|| pair("Cal", "t - t(trigger) - dt(sector)")),
            index_delay_ns: 0.0,
        }
    }

    fn with_index_delay(mut self, delay_ns: f64) -> Self {
        self.index_delay_ns = delay_ns;
        self
    }

    fn fill(&mut self, hit: &HitRecord) {
        let sector = f64::from(hit.sector);
        self.raw.fill(f64::from(hit.raw_time));
        self.raw_by_sector.fill(sector, f64::from(hit.raw_time));
        if let Some((cal, cal_by_sector)) = &mut self.calibrated {
            cal.fill(f64::from(hit.calibrated_time));
            cal_by_sector.fill(sector, index_corrected_time(hit, self.index_delay_ns));
        }
    }

    fn store(self, set: &mut HistogramSet) {
        set.insert_1d(self.raw);
        set.insert_2d(self.raw_by_sector);
        if let Some((cal, cal_by_sector)) = self.calibrated {
            set.insert_1d(cal);
            set.insert_2d(cal_by_sector);
        }
    }
}

/// One quantity overall and against sector.
#[derive(Debug, Clone)]
struct SectorPair {
    all: Histogram1D,
    by_sector: Histogram2D,
}

impl SectorPair {
    fn new(name: &str, label: &str, quantity: &str, axis: BinAxis) -> Self {
        Self {
            all: Histogram1D::new(name, format!("{label} distribution;{quantity}"), axis),
            by_sector: Histogram2D::new(
                format!("{name}BySector"),
                format!("{label};Sector #;{quantity}"),
                sector_axis(),
                axis,
            ),
        }
    }

    fn fill(&mut self, sector: u8, value: f64) {
        self.all.fill(value);
        self.by_sector.fill(f64::from(sector), value);
    }

    fn store(self, set: &mut HistogramSet) {
        set.insert_1d(self.all);
        set.insert_2d(self.by_sector);
    }
}

/// Raw time of mapped hits per sector and per sector/layer.
#[derive(Debug, Clone)]
struct LayerTimes {
    first_lane: u8,
    per_sector: Vec<Histogram1D>,
    per_layer: Vec<Vec<Histogram1D>>,
}

impl LayerTimes {
    /// Layer `n` reads out on lane `first_lane + n`.
    fn new(prefix: &str, what: &str, bins: usize, layers: usize, first_lane: u8) -> Self {
        Self {
            first_lane,
            per_sector: (0..NUM_SECTORS)
                .map(|s| {
                    Histogram1D::new(
                        format!("{prefix}_S{s:02}"),
                        format!("sector {s} {what}"),
                        time_axis(bins),
                    )
                })
                .collect(),
            per_layer: (0..NUM_SECTORS)
                .map(|s| {
                    (0..layers)
                        .map(|l| {
                            Histogram1D::new(
                                format!("{prefix}_S{s:02}L{l:02}"),
                                format!("sector {s} layer {l} {what}"),
                                time_axis(bins),
                            )
                        })
                        .collect()
                })
                .collect(),
        }
    }

    fn fill(&mut self, hit: &HitRecord) {
        let sector = sector_index(hit.sector);
        let time = f64::from(hit.raw_time);
        self.per_sector[sector].fill(time);
        let layer = hit.lane.checked_sub(self.first_lane).map(usize::from);
        if let Some(h) = layer.and_then(|l| self.per_layer[sector].get_mut(l)) {
            h.fill(time);
        }
    }

    fn store(self, set: &mut HistogramSet) {
        for h in self
            .per_sector
            .into_iter()
            .chain(self.per_layer.into_iter().flatten())
        {
            set.insert_1d(h);
        }
    }
}

/// RPC TDC and ctime spread of a hit's buffer, against each other and
/// against the hit's calibrated time.
#[derive(Debug, Clone)]
struct RpcRanges {
    tdc: Histogram1D,
    ctime: Histogram1D,
    tdc_vs_ctime: Histogram2D,
    tdc_vs_time: Histogram2D,
    ctime_vs_time: Histogram2D,
}

impl RpcRanges {
    fn new() -> Self {
        let range_vs_time = |name: &str, range: &str| {
            Histogram2D::new(
                name,
                format!("RPC {range} range vs time;t - t(trigger) - dt(sector) (ns);max{range} - min{range} (ns)"),
                time_axis(128),
                time_axis(128),
            )
        };
        Self {
            tdc: Histogram1D::new(
                "tdcRangeRPC",
                "RPC TDC range;maxTDC - minTDC (ns)",
                time_axis(128),
            ),
            ctime: Histogram1D::new(
                "ctimeRangeRPC",
                "RPC Ctime range;maxCtime - minCtime (ns)",
                time_axis(128),
            ),
            tdc_vs_ctime: Histogram2D::new(
                "tdcRangeVsCtimeRangeRPC",
                "RPC Ctime range vs TDC range;maxTDC - minTDC (ns);maxCtime - minCtime (ns)",
                time_axis(128),
                time_axis(128),
            ),
            tdc_vs_time: range_vs_time("tdcRangeVsTimeRPC", "TDC"),
            ctime_vs_time: range_vs_time("ctimeRangeVsTimeRPC", "Ctime"),
        }
    }

    /// The spreads alone count once per buffer, through its first word pair.
    fn fill(&mut self, hit: &HitRecord, buffer: &BufferSummary) {
        let (Some(tdc), Some(ctime)) = (buffer.rpc_tdc_span_ns(), buffer.rpc_ctime_span_ns())
        else {
            return;
        };
        let (tdc, ctime) = (f64::from(tdc), f64::from(ctime));
        if hit.hit_index == 0 {
            self.tdc.fill(tdc);
            self.ctime.fill(ctime);
            self.tdc_vs_ctime.fill(tdc, ctime);
        }
        let time = f64::from(hit.calibrated_time);
        self.tdc_vs_time.fill(time, tdc);
        self.ctime_vs_time.fill(time, ctime);
    }

    fn store(self, set: &mut HistogramSet) {
        set.insert_1d(self.tdc);
        set.insert_1d(self.ctime);
        set.insert_2d(self.tdc_vs_ctime);
        set.insert_2d(self.tdc_vs_time);
        set.insert_2d(self.ctime_vs_time);
    }
}

/// Lane-vs-channel maps of one sector, indexed by readout axis.
#[derive(Debug, Clone)]
struct ChannelOccupancy {
    prompt: [Histogram2D; 2],
    background: [Histogram2D; 2],
    unmapped: [Histogram2D; 2],
}

impl ChannelOccupancy {
    fn new(sector: usize) -> Self {
        let make = |kind: &str, label: &str, axis: &str| {
            let prefix = if kind.is_empty() { "unmapped" } else { "mapped" };
            Histogram2D::new(
                format!("{prefix}ChannelOccupancy_S{sector:02}{axis}{kind}"),
                format!("{label} channel occupancy for sector {sector} {axis} hits;lane;channel"),
                BinAxis::new(LANE_AXIS_BINS, -0.25, 20.75),
                BinAxis::new(128, -0.25, 63.75),
            )
        };
        let axes = ["Z", "Phi"];
        Self {
            prompt: axes.map(|a| make("Prompt", "In-time mapped", a)),
            background: axes.map(|a| make("Bkgd", "Out-of-time mapped", a)),
            unmapped: axes.map(|a| make("", "Unmapped", a)),
        }
    }

    fn fill(&mut self, hit: &HitRecord) {
        // scintillator axis numbering is flipped relative to RPC
        let axis = usize::from(hit.axis & 1);
        let slot = match hit.technology {
            Technology::Rpc => axis,
            Technology::Scintillator => 1 - axis,
        };
        let target = match (hit.is_mapped(), hit.timing) {
            (false, _) => &mut self.unmapped[slot],
            (true, HitTiming::Prompt) => &mut self.prompt[slot],
            (true, HitTiming::Background) => &mut self.background[slot],
        };
        target.fill(f64::from(hit.lane), f64::from(hit.channel));
    }

    fn store(self, set: &mut HistogramSet) {
        for h in self
            .prompt
            .into_iter()
            .chain(self.background)
            .chain(self.unmapped)
        {
            set.insert_2d(h);
        }
    }
}

/// Histogram Aggregator.
///
/// Fed one [`DecodedEvent`] at a time. The entry selection applies to every
/// hit-level fill except the channel-multiplicity maps, which always see
/// every multi-entry hit. Buffer-level histograms see every summarised
/// buffer, and the node map sees every COPPER board. The RPC range
/// histograms are filled through mapped RPC hits, so a buffer's spread
/// counts only when its first word pair is one.
#[derive(Debug, Clone)]
pub struct HitAggregator {
    selection: EntrySelection,
    events: u64,

    node_ids: Histogram2D,
    event_words: Histogram1D,
    event_channels: Histogram1D,
    sector_words: Vec<Histogram1D>,
    sector_channels: Vec<Histogram1D>,
    channel_multiplicity: Vec<Histogram2D>,
    channel_multiplicity_fine: Vec<Histogram2D>,
    revo9_offset: Histogram1D,
    rpc_ranges: RpcRanges,
    rpc_ctime_range_by_sector: Histogram2D,
    scint_ctime_range: Histogram1D,
    scint_ctime_range_by_sector: Histogram2D,

    lane_flag: Histogram2D,
    tdc_extra: [Histogram2D; 2],
    adc_extra: [Histogram2D; 2],
    time_low_bits: [Histogram2D; 2],
    mapped: Occupancy,
    unmapped: Occupancy,
    rpc_mapped_time: TimeHists,
    rpc_unmapped_time: TimeHists,
    scint_mapped_time: TimeHists,
    scint_unmapped_time: TimeHists,
    rpc_time_cal2: Histogram1D,
    rpc_layer_time: LayerTimes,
    scint_layer_time: LayerTimes,
    scint_ctime: Histogram1D,
    scint_ctime_by_sector: Histogram2D,
    scint_tdc: SectorPair,
    scint_mapped_tdc_time: SectorPair,
    scint_unmapped_tdc_time: SectorPair,
    channel_occupancy: Vec<ChannelOccupancy>,
    hits_per_event: [[Histogram1D; 2]; 2],
}

impl HitAggregator {
    #[must_use]
    pub fn new(selection: EntrySelection) -> Self {
        let h1 = |name: &str, title: &str, axis: BinAxis| Histogram1D::new(name, title, axis);
        let by_sector = |name: String, title: String, y: BinAxis| {
            Histogram2D::new(name, title, sector_axis(), y)
        };
        let per_tech = |what: &str, bins: usize| {
            TECHNOLOGIES.map(|t| {
                let tech = tech_label(t);
                by_sector(
                    format!("rawKLM{what}{tech}"),
                    format!("{tech} {what} bits;Sector #;{what}"),
                    BinAxis::integers(bins),
                )
            })
        };

        Self {
            selection,
            events: 0,

            node_ids: Histogram2D::new(
                "RawKLMnodeID",
                "RawKLM NodeID;NodeID (bklm: 0..3, eklm: 4..7);Copper index",
                BinAxis::integers(10),
                BinAxis::integers(10),
            ),
            event_words: h1(
                "rawKLMsizeMultihit",
                "RawKLM word count (N/channel)",
                BinAxis::integers(800).with_bins(400),
            ),
            event_channels: h1(
                "rawKLMsize",
                "RawKLM distinct channels (1/channel)",
                BinAxis::integers(500).with_bins(250),
            ),
            sector_words: (0..NUM_SECTORS)
                .map(|s| {
                    Histogram1D::new(
                        format!("rawKLM_S{s:02}_sizeMultihit"),
                        format!("sector {s} word count (N/channel)"),
                        BinAxis::integers(200).with_bins(100),
                    )
                })
                .collect(),
            sector_channels: (0..NUM_SECTORS)
                .map(|s| {
                    Histogram1D::new(
                        format!("rawKLM_S{s:02}_size"),
                        format!("sector {s} distinct channels (1/channel)"),
                        BinAxis::integers(200).with_bins(100),
                    )
                })
                .collect(),
            channel_multiplicity: (0..NUM_SECTORS)
                .map(|s| {
                    Histogram2D::new(
                        format!("rawKLM_S{s:02}_channelMultiplicity"),
                        format!(
                            "sector {s} per-channel multiplicity (N/channel > 1);Per-channel multiplicity;(Lane #) * 2 + (Axis #)"
                        ),
                        BinAxis::integers(30),
                        BinAxis::integers(LANE_AXIS_BINS),
                    )
                })
                .collect(),
            channel_multiplicity_fine: (0..NUM_SECTORS)
                .map(|s| {
                    Histogram2D::new(
                        format!("rawKLM_S{s:02}_channelMultiplicityFine"),
                        format!(
                            "sector {s} per-channel multiplicity (N/channel > 1);Per-channel multiplicity;(Lane #) * 256 + (Axis #) * 128 + (Channel #)"
                        ),
                        BinAxis::integers(30),
                        BinAxis::integers(8192),
                    )
                })
                .collect(),
            revo9_offset: h1(
                "trigCtimeVsTrigRevo9time",
                "trigCtime - trigRevo9time (ns)",
                BinAxis::new(256, -1024.5, 1023.5),
            ),
            rpc_ranges: RpcRanges::new(),
            rpc_ctime_range_by_sector: by_sector(
                "mappedRPCCtimeRangeBySector".into(),
                "RPC Ctime-range in event;Sector #;CtimeMax - CtimeMin (ns)".into(),
                BinAxis::new(128, -0.5, 8191.5),
            ),
            scint_ctime_range: h1(
                "mappedScintCtimeRange",
                "Scint ctime-range in event;ctimeMax - ctimeMin (ns)",
                time_axis(128),
            ),
            scint_ctime_range_by_sector: by_sector(
                "mappedScintCtimeRangeBySector".into(),
                "Scint ctime-range in event;Sector #;ctimeMax - ctimeMin (ns)".into(),
                time_axis(128),
            ),

            lane_flag: Histogram2D::new(
                "rawKLMlaneFlag",
                "RawKLM lane vs flag;Flag (1=RPC, 2=Scint);Lane",
                BinAxis::integers(4),
                BinAxis::integers(21),
            ),
            tdc_extra: per_tech("tdcExtra", 32),
            adc_extra: per_tech("adcExtra", 16),
            time_low_bits: TECHNOLOGIES.map(|t| {
                let tech = tech_label(t);
                by_sector(
                    format!("{tech}TimeLowBitsBySector"),
                    format!("{tech} TDC lowest-order bits;Sector #;TDC % 4 (ns)"),
                    BinAxis::integers(4),
                )
            }),
            mapped: Occupancy::new("mapped", "mapped"),
            unmapped: Occupancy::new("unmapped", "unmapped"),
            rpc_mapped_time: TimeHists::new("mappedRPCTime", "RPC mapped-strip time", 256, 128, true)
                .with_index_delay(INDEX_DELAY_NS),
            rpc_unmapped_time: TimeHists::new(
                "unmappedRPCTime",
                "RPC unmapped-strip time",
                256,
                128,
                false,
            ),
            scint_mapped_time: TimeHists::new(
                "mappedScintCtime",
                "Scint mapped-strip ctime",
                32,
                32,
                true,
            ),
            scint_unmapped_time: TimeHists::new(
                "unmappedScintCtime",
                "Scint unmapped-strip ctime",
                32,
                32,
                false,
            ),
            rpc_time_cal2: h1(
                "mappedRPCTimeCal2",
                "RPC mapped-strip time distribution;t - t(trigger) - dt(sector) - t(index) (ns)",
                time_axis(256),
            ),
            rpc_layer_time: LayerTimes::new(
                "mappedRPCTime",
                "RPC time distribution;t - t(trigger) (ns)",
                256,
                RPC_LAYERS,
                RPC_FIRST_LANE,
            ),
            scint_layer_time: LayerTimes::new(
                "mappedScintCtime",
                "Scint ctime distribution;ctime - ct(trigger) (ns)",
                32,
                SCINT_LAYERS,
                SCINT_FIRST_LANE,
            ),
            scint_ctime: h1(
                "mappedScintCtime0",
                "Scint mapped-strip ctime distribution;ctime (ns)",
                time_axis(32),
            ),
            scint_ctime_by_sector: by_sector(
                "mappedScintCtime1".into(),
                "Scint mapped-strip ctime distribution;Sector #;ctime (ns)".into(),
                time_axis(32),
            ),
            scint_tdc: SectorPair::new(
                "mappedScintTDC",
                "Scint mapped-strip TDC",
                "t (ns)",
                BinAxis::integers(32),
            ),
            scint_mapped_tdc_time: SectorPair::new(
                "mappedScintTime",
                "Scint mapped-strip time",
                "t - t(trigger) (ns)",
                BinAxis::integers(32),
            ),
            scint_unmapped_tdc_time: SectorPair::new(
                "unmappedScintTime",
                "Scint unmapped-strip time",
                "t - t(trigger) (ns)",
                BinAxis::integers(32),
            ),
            channel_occupancy: (0..NUM_SECTORS).map(ChannelOccupancy::new).collect(),
            hits_per_event: TECHNOLOGIES.map(|t| {
                let tech = tech_label(t);
                [("Prompt", "prompt"), ("Bkgd", "background")].map(|(suffix, label)| {
                    Histogram1D::new(
                        format!("NRaw{tech}{suffix}"),
                        format!("# of {label} mapped {tech} hits per event"),
                        BinAxis::integers(100),
                    )
                })
            }),
        }
    }

    #[must_use]
    pub fn selection(&self) -> EntrySelection {
        self.selection
    }

    /// Events filled so far.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Adds one decoded event.
    #[allow(clippy::cast_precision_loss)]
    pub fn fill_event(&mut self, event: &DecodedEvent) {
        self.events += 1;

        for &(node, copper) in &event.copper_nodes {
            self.node_ids.fill(node as f64, copper as f64);
        }

        let mut words = 0usize;
        let mut channels = 0usize;
        let mut by_dc: [Option<&BufferSummary>; NUM_DATA_CONCENTRATORS] =
            [None; NUM_DATA_CONCENTRATORS];
        for buffer in &event.buffers {
            words += buffer.word_count;
            channels += buffer.distinct_channels;
            self.fill_buffer(buffer);
            if let Some(slot) = by_dc.get_mut(usize::from(buffer.location.data_concentrator)) {
                *slot = Some(buffer);
            }
        }
        self.event_words.fill(words as f64);
        self.event_channels.fill(channels as f64);

        for hit in &event.hits {
            if hit.multiplicity > 1 {
                let sector = sector_index(hit.sector);
                let multiplicity = f64::from(hit.multiplicity);
                self.channel_multiplicity[sector].fill(multiplicity, f64::from(hit.lane_axis()));
                self.channel_multiplicity_fine[sector]
                    .fill(multiplicity, f64::from(hit.lane_axis_channel()));
            }
            if self.selection.accepts(hit.multiplicity) {
                let buffer = by_dc
                    .get(usize::from(hit.data_concentrator))
                    .copied()
                    .flatten();
                self.fill_hit(hit, buffer);
            }
        }

        for technology in TECHNOLOGIES {
            let [prompt, background] = &mut self.hits_per_event[tech_index(technology)];
            prompt.fill(event.count_mapped(self.selection, technology, HitTiming::Prompt) as f64);
            background.fill(
                event.count_mapped(self.selection, technology, HitTiming::Background) as f64,
            );
        }
    }

    /// Adds a batch of decoded events in order.
    pub fn fill_events<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a DecodedEvent>,
    {
        for event in events {
            self.fill_event(event);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn fill_buffer(&mut self, buffer: &BufferSummary) {
        let sector = buffer.location.sector;
        let index = sector_index(sector);
        let sector = f64::from(sector);

        self.sector_words[index].fill(buffer.word_count as f64);
        self.sector_channels[index].fill(buffer.distinct_channels as f64);
        self.revo9_offset.fill(f64::from(buffer.revo9_offset));

        // ranges need two hits and a non-zero latest ctime to mean anything
        if buffer.pair_count() > 1 {
            if let Some(span) = buffer
                .rpc_ctime
                .filter(|r| r.max > 0)
                .and(buffer.rpc_ctime_span_ns())
            {
                self.rpc_ctime_range_by_sector.fill(sector, f64::from(span));
            }
            if let Some(span) = buffer
                .scint_ctime
                .filter(|r| r.max > 0)
                .and(buffer.scint_ctime_span_ns())
            {
                self.scint_ctime_range.fill(f64::from(span));
                self.scint_ctime_range_by_sector.fill(sector, f64::from(span));
            }
        }
    }

    /// `buffer` is the summary of the hit's own data-concentrator buffer.
    fn fill_hit(&mut self, hit: &HitRecord, buffer: Option<&BufferSummary>) {
        let tech = tech_index(hit.technology);
        let sector = f64::from(hit.sector);

        self.lane_flag
            .fill(f64::from(hit.technology.flag()), f64::from(hit.lane));
        self.tdc_extra[tech].fill(sector, f64::from(hit.tdc_extra));
        self.adc_extra[tech].fill(sector, f64::from(hit.adc_extra));
        self.time_low_bits[tech].fill(sector, f64::from(hit.tdc & 3));
        self.channel_occupancy[sector_index(hit.sector)].fill(hit);

        // scintillator TDC relative to the trigger, 5 bits only
        let scint_time = buffer.map(|b| f64::from(rpc_time(hit.tdc, b.trigger_ctime) & 0x1F));

        if hit.is_mapped() {
            self.mapped.fill(hit);
            match hit.technology {
                Technology::Rpc => {
                    self.rpc_mapped_time.fill(hit);
                    self.rpc_time_cal2.fill(index_corrected_time(hit, INDEX_DELAY_NS));
                    self.rpc_layer_time.fill(hit);
                    if let Some(buffer) = buffer {
                        self.rpc_ranges.fill(hit, buffer);
                    }
                }
                Technology::Scintillator => {
                    let ctime = f64::from((u32::from(hit.ctime) << 3) & 0x3FF);
                    self.scint_ctime.fill(ctime);
                    self.scint_ctime_by_sector.fill(sector, ctime);
                    self.scint_tdc.fill(hit.sector, f64::from(hit.tdc));
                    if let Some(time) = scint_time {
                        self.scint_mapped_tdc_time.fill(hit.sector, time);
                    }
                    self.scint_mapped_time.fill(hit);
                    self.scint_layer_time.fill(hit);
                }
            }
        } else {
            self.unmapped.fill(hit);
            match hit.technology {
                Technology::Rpc => self.rpc_unmapped_time.fill(hit),
                Technology::Scintillator => {
                    if let Some(time) = scint_time {
                        self.scint_unmapped_tdc_time.fill(hit.sector, time);
                    }
                    self.scint_unmapped_time.fill(hit);
                }
            }
        }
    }

    /// Ends the job: turns lane/axis occupancy into per-sector percentages
    /// and hands back every histogram.
    #[must_use]
    pub fn finish(mut self) -> HistogramSet {
        self.mapped.normalise();
        self.unmapped.normalise();
        debug!(
            "normalised lane/axis occupancy after {} events ({:?} entries)",
            self.events, self.selection
        );

        let mut set = HistogramSet::new(self.selection);
        set.events = self.events;

        set.insert_2d(self.node_ids);
        set.insert_1d(self.event_words);
        set.insert_1d(self.event_channels);
        self.sector_words.into_iter().for_each(|h| set.insert_1d(h));
        self.sector_channels
            .into_iter()
            .for_each(|h| set.insert_1d(h));
        self.channel_multiplicity
            .into_iter()
            .chain(self.channel_multiplicity_fine)
            .for_each(|h| set.insert_2d(h));
        set.insert_1d(self.revo9_offset);
        self.rpc_ranges.store(&mut set);
        set.insert_2d(self.rpc_ctime_range_by_sector);
        set.insert_1d(self.scint_ctime_range);
        set.insert_2d(self.scint_ctime_range_by_sector);

        set.insert_2d(self.lane_flag);
        for h in self
            .tdc_extra
            .into_iter()
            .chain(self.adc_extra)
            .chain(self.time_low_bits)
        {
            set.insert_2d(h);
        }
        self.mapped.store(&mut set);
        self.unmapped.store(&mut set);
        self.rpc_mapped_time.store(&mut set);
        self.rpc_unmapped_time.store(&mut set);
        self.scint_mapped_time.store(&mut set);
        self.scint_unmapped_time.store(&mut set);
        set.insert_1d(self.rpc_time_cal2);
        self.rpc_layer_time.store(&mut set);
        self.scint_layer_time.store(&mut set);
        set.insert_1d(self.scint_ctime);
        set.insert_2d(self.scint_ctime_by_sector);
        self.scint_tdc.store(&mut set);
        self.scint_mapped_tdc_time.store(&mut set);
        self.scint_unmapped_tdc_time.store(&mut set);
        for occupancy in self.channel_occupancy {
            occupancy.store(&mut set);
        }
        for h in self.hits_per_event.into_iter().flatten() {
            set.insert_1d(h);
        }
        set
    }
}

impl Default for HitAggregator {
    fn default() -> Self {
        Self::new(EntrySelection::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use klm_core::{ElectronicsId, ModuleId};
    use klm_raw::{BufferLocation, CalibrationConfig, ValueRange};

    fn hit(technology: Technology, sector: u8, lane: u8, mapped: bool, mult: u16) -> HitRecord {
        HitRecord {
            electronics_id: ElectronicsId::pack(0, 0, lane, 0, 5),
            module_id: mapped.then(|| ModuleId::from_raw(0x1234)),
            technology,
            data_concentrator: 0,
            sector,
            lane,
            axis: 0,
            channel: 5,
            raw_ctime: 12,
            ctime: 12,
            tdc: 330,
            charge: 0,
            adc_extra: 0,
            tdc_extra: 0,
            raw_time: 330,
            calibrated_time: 312,
            timing: HitTiming::Prompt,
            hit_index: 0,
            multiplicity: mult,
        }
    }

    fn summary(sector: u8, words: usize) -> BufferSummary {
        BufferSummary {
            location: BufferLocation::new(0, 0, 0, &CalibrationConfig::uncalibrated())
                .with_sector(sector),
            word_count: words,
            hit_count: words / 2,
            distinct_channels: words / 2,
            unknown_flags: 0,
            rpc_ctime: Some(ValueRange { min: 10, max: 14 }),
            rpc_tdc: Some(ValueRange { min: 200, max: 260 }),
            scint_ctime: None,
            revo9_offset: -40,
            trigger_ctime: 0,
        }
    }

    /// Sector 7 RPC hit read from data concentrator `dc` at position `index`.
    fn rpc_at(dc: u8, index: u16, mapped: bool) -> HitRecord {
        HitRecord {
            data_concentrator: dc,
            hit_index: index,
            ..hit(Technology::Rpc, 7, 10, mapped, 1)
        }
    }

    #[test]
    fn test_lane_axis_normalised_to_percent() {
        let mut agg = HitAggregator::default();
        let mut event = DecodedEvent::new(1);
        event.hits.push(hit(Technology::Rpc, 3, 10, true, 1));
        event.hits.push(hit(Technology::Rpc, 3, 10, true, 1));
        event.hits.push(hit(Technology::Rpc, 3, 11, true, 1));
        event.hits.push(hit(Technology::Rpc, 3, 12, true, 1));
        agg.fill_event(&event);
        let set = agg.finish();

        let lane_axis = set.get_2d("mappedRPCLaneAxisOccupancy").unwrap();
        assert_relative_eq!(lane_axis.get(3, 20).unwrap(), 50.0);
        assert_relative_eq!(lane_axis.get(3, 22).unwrap(), 25.0);
        assert_relative_eq!(lane_axis.get(3, 24).unwrap(), 25.0);
        // sector totals stay raw counts
        assert_relative_eq!(
            set.get_1d("mappedRPCSectorOccupancy").unwrap().get(3).unwrap(),
            4.0
        );
    }

    #[test]
    fn test_selection_skips_hit_fills_but_not_multiplicity() {
        let mut agg = HitAggregator::new(EntrySelection::SingleEntry);
        let mut event = DecodedEvent::new(1);
        event.hits.push(hit(Technology::Rpc, 2, 10, true, 2));
        event.hits.push(hit(Technology::Rpc, 2, 10, true, 2));
        event.hits.push(hit(Technology::Rpc, 2, 9, true, 1));
        agg.fill_event(&event);
        let set = agg.finish();

        assert_eq!(set.selection, EntrySelection::SingleEntry);
        let multiplicity = set.get_2d("rawKLM_S02_channelMultiplicity").unwrap();
        assert_relative_eq!(multiplicity.get(2, 20).unwrap(), 2.0);
        // lane 10, axis 0, channel 5
        let fine = set.get_2d("rawKLM_S02_channelMultiplicityFine").unwrap();
        assert_relative_eq!(fine.get(2, (10 << 8) | 5).unwrap(), 2.0);
        assert_relative_eq!(fine.integral(), 2.0);
        assert_relative_eq!(
            set.get_1d("mappedSectorOccupancyMultihit").unwrap().integral(),
            1.0
        );
        assert_relative_eq!(set.get_1d("NRawRPCPrompt").unwrap().get(1).unwrap(), 1.0);
    }

    #[test]
    fn test_mapped_and_unmapped_split() {
        let mut agg = HitAggregator::default();
        let mut event = DecodedEvent::new(1);
        event.hits.push(hit(Technology::Rpc, 0, 10, true, 1));
        event.hits.push(hit(Technology::Rpc, 0, 10, false, 1));
        let mut scint = hit(Technology::Scintillator, 5, 1, false, 1);
        scint.raw_time = 455;
        event.hits.push(scint);
        agg.fill_event(&event);
        let set = agg.finish();

        assert_relative_eq!(set.get_1d("mappedRPCTime").unwrap().integral(), 1.0);
        assert_relative_eq!(set.get_1d("mappedRPCTimeCal").unwrap().integral(), 1.0);
        assert_relative_eq!(set.get_1d("unmappedRPCTime").unwrap().integral(), 1.0);
        assert!(set.get_1d("unmappedRPCTimeCal").is_none());
        assert_relative_eq!(
            set.get_1d("unmappedScintCtime").unwrap().value_at(455.0),
            1.0
        );
        assert_relative_eq!(
            set.get_2d("mappedChannelOccupancy_S00ZPrompt")
                .unwrap()
                .integral(),
            1.0
        );
        // scintillator axis 0 lands in the phi map
        assert_relative_eq!(
            set.get_2d("unmappedChannelOccupancy_S05Phi")
                .unwrap()
                .integral(),
            1.0
        );
    }

    #[test]
    fn test_buffer_level_histograms() {
        let mut agg = HitAggregator::default();
        let mut event = DecodedEvent::new(1);
        event.buffers.push(summary(7, 9));
        event.buffers.push(summary(7, 3));
        agg.fill_event(&event);
        let set = agg.finish();

        assert_eq!(set.events, 1);
        assert_relative_eq!(
            set.get_1d("rawKLMsizeMultihit").unwrap().value_at(12.0),
            1.0
        );
        assert_relative_eq!(
            set.get_1d("rawKLM_S07_sizeMultihit").unwrap().integral(),
            2.0
        );
        assert_relative_eq!(
            set.get_1d("trigCtimeVsTrigRevo9time")
                .unwrap()
                .value_at(-40.0),
            2.0
        );
        // no hits, so no RPC range fills
        assert_relative_eq!(set.get_1d("tdcRangeRPC").unwrap().integral(), 0.0);
        // only the four-pair buffer has enough hits for a range
        assert_relative_eq!(
            set.get_2d("mappedRPCCtimeRangeBySector")
                .unwrap()
                .integral(),
            1.0
        );
    }

    #[test]
    fn test_rpc_ranges_follow_first_mapped_hit() {
        let mut agg = HitAggregator::default();
        let mut event = DecodedEvent::new(1);
        let config = CalibrationConfig::uncalibrated();
        event.buffers.push(summary(7, 9));
        event.buffers.push(BufferSummary {
            location: BufferLocation::new(0, 1, 0, &config).with_sector(7),
            ..summary(7, 9)
        });
        event.hits.push(rpc_at(0, 0, true));
        event.hits.push(rpc_at(0, 1, true));
        // second buffer opens with an unmapped hit
        event.hits.push(rpc_at(1, 0, false));
        event.hits.push(rpc_at(1, 1, true));
        agg.fill_event(&event);
        let set = agg.finish();

        assert_relative_eq!(set.get_1d("tdcRangeRPC").unwrap().value_at(60.0), 1.0);
        assert_relative_eq!(set.get_1d("tdcRangeRPC").unwrap().integral(), 1.0);
        assert_relative_eq!(set.get_1d("ctimeRangeRPC").unwrap().value_at(32.0), 1.0);
        // 8 ns bins: TDC spread 60 in bin 7, ctime spread 32 in bin 4
        let correlation = set.get_2d("tdcRangeVsCtimeRangeRPC").unwrap();
        assert_relative_eq!(correlation.get(7, 4).unwrap(), 1.0);
        assert_relative_eq!(correlation.integral(), 1.0);
        // every mapped RPC hit enters the time correlations
        assert_relative_eq!(set.get_2d("tdcRangeVsTimeRPC").unwrap().integral(), 3.0);
        let ctime_vs_time = set.get_2d("ctimeRangeVsTimeRPC").unwrap();
        assert_relative_eq!(ctime_vs_time.get(39, 4).unwrap(), 3.0);
    }

    #[test]
    fn test_rpc_time_index_correction_and_layers() {
        let mut agg = HitAggregator::default();
        let mut event = DecodedEvent::new(1);
        let mut late = hit(Technology::Rpc, 3, 10, true, 1);
        late.hit_index = 4;
        event.hits.push(late);
        // RPC hit on a lane below the first layer
        event.hits.push(hit(Technology::Rpc, 3, 2, true, 1));
        agg.fill_event(&event);
        let set = agg.finish();

        // 312 - 4 * 0.75
        let cal2 = set.get_1d("mappedRPCTimeCal2").unwrap();
        assert_relative_eq!(cal2.value_at(309.0), 1.0);
        assert_relative_eq!(cal2.value_at(312.0), 1.0);
        assert_relative_eq!(cal2.integral(), 2.0);
        let cal_by_sector = set.get_2d("mappedRPCTimeCalBySector").unwrap();
        assert_relative_eq!(cal_by_sector.get(3, 38).unwrap(), 1.0);
        assert_relative_eq!(cal_by_sector.get(3, 39).unwrap(), 1.0);
        assert_relative_eq!(
            set.get_1d("mappedRPCTimeCal").unwrap().value_at(312.0),
            2.0
        );

        assert_relative_eq!(
            set.get_1d("mappedRPCTime_S03").unwrap().value_at(330.0),
            2.0
        );
        // lane 10 is layer 4
        assert_relative_eq!(
            set.get_1d("mappedRPCTime_S03L04").unwrap().integral(),
            1.0
        );
        let layers: f64 = (0..15)
            .map(|l| {
                set.get_1d(&format!("mappedRPCTime_S03L{l:02}"))
                    .unwrap()
                    .integral()
            })
            .sum();
        assert_relative_eq!(layers, 1.0);
    }

    #[test]
    fn test_scintillator_tdc_and_layers() {
        let mut agg = HitAggregator::default();
        let mut event = DecodedEvent::new(1);
        event.buffers.push(BufferSummary {
            trigger_ctime: 8,
            ..summary(5, 5)
        });
        let mut mapped = hit(Technology::Scintillator, 5, 2, true, 1);
        mapped.tdc = 17;
        mapped.raw_time = 455;
        event.hits.push(mapped);
        let mut unmapped = hit(Technology::Scintillator, 5, 1, false, 1);
        unmapped.tdc = 40;
        event.hits.push(unmapped);
        agg.fill_event(&event);
        let set = agg.finish();

        assert_relative_eq!(set.get_1d("mappedScintTDC").unwrap().value_at(17.0), 1.0);
        assert_relative_eq!(
            set.get_2d("mappedScintTDCBySector").unwrap().get(5, 17).unwrap(),
            1.0
        );
        // (17 - 8) and (40 - 8) keep their low 5 bits
        assert_relative_eq!(set.get_1d("mappedScintTime").unwrap().value_at(9.0), 1.0);
        assert_relative_eq!(set.get_1d("unmappedScintTime").unwrap().value_at(0.0), 1.0);
        assert_relative_eq!(
            set.get_1d("mappedScintCtime_S05").unwrap().value_at(455.0),
            1.0
        );
        // lane 2 is scintillator layer 1
        assert_relative_eq!(
            set.get_1d("mappedScintCtime_S05L01").unwrap().integral(),
            1.0
        );
        assert_relative_eq!(
            set.get_1d("mappedScintCtime_S05L00").unwrap().integral(),
            0.0
        );
    }

    #[test]
    fn test_node_map_sees_every_copper() {
        let mut agg = HitAggregator::default();
        let mut event = DecodedEvent::new(1);
        event.copper_nodes = vec![(0, 0), (4, 1), (0x0100_0004, 2)];
        agg.fill_event(&event);
        let set = agg.finish();

        let nodes = set.get_2d("RawKLMnodeID").unwrap();
        assert_relative_eq!(nodes.get(0, 0).unwrap(), 1.0);
        assert_relative_eq!(nodes.get(4, 1).unwrap(), 1.0);
        assert_relative_eq!(nodes.outside, 1.0);
    }

    #[test]
    fn test_histogram_set_lookup() {
        let set = HitAggregator::default().finish();
        assert!(!set.is_empty());
        assert_eq!(set.names().count(), set.len());
        assert!(set.get_2d("rawKLMlaneFlag").is_some());
        assert!(set.get_1d("rawKLMlaneFlag").is_none());
        for name in [
            "mappedRPCTimeCal2",
            "mappedRPCTime_S15",
            "mappedRPCTime_S15L14",
            "mappedScintCtime_S00L01",
            "mappedScintTDC",
            "mappedScintTime",
            "unmappedScintTime",
            "tdcRangeRPC",
            "ctimeRangeRPC",
        ] {
            assert!(set.get_1d(name).is_some(), "{name}");
        }
        for name in [
            "RawKLMnodeID",
            "rawKLM_S15_channelMultiplicityFine",
            "mappedScintTDCBySector",
            "mappedScintTimeBySector",
            "unmappedScintTimeBySector",
            "tdcRangeVsCtimeRangeRPC",
            "tdcRangeVsTimeRPC",
            "ctimeRangeVsTimeRPC",
        ] {
            assert!(set.get_2d(name).is_some(), "{name}");
        }
    }
}

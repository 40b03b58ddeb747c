//! klm-histogram: occupancy and timing histograms for decoded KLM hits.
//!
//! [`HitAggregator`] consumes [`klm_raw::DecodedEvent`]s one at a time and
//! fills a fixed catalogue of named histograms: sector and lane/axis
//! occupancy, raw and calibrated hit times, per-buffer word counts and
//! ctime spreads, per-channel multiplicity and per-event hit counts.
//! [`HitAggregator::finish`] normalises lane/axis occupancy to per-sector
//! percentages and returns a serialisable [`HistogramSet`].

mod aggregator;
mod histogram;

pub use aggregator::{HistogramSet, HitAggregator, LANE_AXIS_BINS};
pub use histogram::{Bin, BinAxis, Histogram1D, Histogram2D};

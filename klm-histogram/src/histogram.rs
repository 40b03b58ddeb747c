//! Fixed-binning 1D and 2D histograms.
//!
//! Binning follows the usual detector-analysis convention: `bins` equal-width
//! bins over `[low, high)`, with values outside the range counted in
//! separate underflow/overflow tallies instead of the bin contents.

use serde::{Deserialize, Serialize};

/// Where a value lands on a [`BinAxis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bin {
    Underflow,
    In(usize),
    Overflow,
}

/// Equal-width binning over `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinAxis {
    pub bins: usize,
    pub low: f64,
    pub high: f64,
}

impl BinAxis {
    #[must_use]
    pub fn new(bins: usize, low: f64, high: f64) -> Self {
        Self { bins, low, high }
    }

    /// Integer-centred binning: one bin per value in `0..count`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn integers(count: usize) -> Self {
        Self::new(count, -0.5, count as f64 - 0.5)
    }

    /// Same range split into `bins` bins.
    #[must_use]
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    /// Width of one bin.
    #[must_use]
    #[inline]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_width(&self) -> f64 {
        if self.bins == 0 {
            return 0.0;
        }
        (self.high - self.low) / self.bins as f64
    }

    /// Locates `value` on the axis.
    #[must_use]
    #[inline]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn locate(&self, value: f64) -> Bin {
        if self.bins == 0 || value.is_nan() || value < self.low {
            return Bin::Underflow;
        }
        if value >= self.high {
            return Bin::Overflow;
        }
        let index = ((value - self.low) / self.bin_width()) as usize;
        Bin::In(index.min(self.bins - 1))
    }
}

/// A named one-dimensional histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram1D {
    pub name: String,
    pub title: String,
    pub axis: BinAxis,
    counts: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
    /// Number of fill calls, including out-of-range ones.
    pub entries: u64,
}

impl Histogram1D {
    #[must_use]
    pub fn new(name: impl Into<String>, title: impl Into<String>, axis: BinAxis) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            axis,
            counts: vec![0.0; axis.bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    #[inline]
    pub fn fill(&mut self, value: f64) {
        self.fill_weighted(value, 1.0);
    }

    pub fn fill_weighted(&mut self, value: f64, weight: f64) {
        self.entries += 1;
        match self.axis.locate(value) {
            Bin::Underflow => self.underflow += weight,
            Bin::Overflow => self.overflow += weight,
            Bin::In(index) => self.counts[index] += weight,
        }
    }

    /// Content of bin `index`.
    #[must_use]
    #[inline]
    pub fn get(&self, index: usize) -> Option<f64> {
        self.counts.get(index).copied()
    }

    /// Content of the bin holding `value`; zero when out of range.
    #[must_use]
    pub fn value_at(&self, value: f64) -> f64 {
        match self.axis.locate(value) {
            Bin::In(index) => self.counts[index],
            _ => 0.0,
        }
    }

    pub fn set(&mut self, index: usize, content: f64) {
        if let Some(slot) = self.counts.get_mut(index) {
            *slot = content;
        }
    }

    #[must_use]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Sum of in-range bin contents.
    #[must_use]
    pub fn integral(&self) -> f64 {
        self.counts.iter().sum()
    }

}

/// A named two-dimensional histogram.
///
/// Contents are stored row-major by y: `counts[iy * x.bins + ix]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram2D {
    pub name: String,
    pub title: String,
    pub x: BinAxis,
    pub y: BinAxis,
    counts: Vec<f64>,
    /// Total weight that fell outside either axis.
    pub outside: f64,
    pub entries: u64,
}

impl Histogram2D {
    #[must_use]
    pub fn new(name: impl Into<String>, title: impl Into<String>, x: BinAxis, y: BinAxis) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            x,
            y,
            counts: vec![0.0; x.bins * y.bins],
            outside: 0.0,
            entries: 0,
        }
    }

    #[inline]
    pub fn fill(&mut self, x: f64, y: f64) {
        self.fill_weighted(x, y, 1.0);
    }

    pub fn fill_weighted(&mut self, x: f64, y: f64, weight: f64) {
        self.entries += 1;
        match (self.x.locate(x), self.y.locate(y)) {
            (Bin::In(ix), Bin::In(iy)) => self.counts[iy * self.x.bins + ix] += weight,
            _ => self.outside += weight,
        }
    }

    /// Content of cell `(ix, iy)`.
    #[must_use]
    #[inline]
    pub fn get(&self, ix: usize, iy: usize) -> Option<f64> {
        if ix < self.x.bins && iy < self.y.bins {
            Some(self.counts[iy * self.x.bins + ix])
        } else {
            None
        }
    }

    pub fn set(&mut self, ix: usize, iy: usize, content: f64) {
        if ix < self.x.bins && iy < self.y.bins {
            self.counts[iy * self.x.bins + ix] = content;
        }
    }

    #[must_use]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Sum of in-range cell contents.
    #[must_use]
    pub fn integral(&self) -> f64 {
        self.counts.iter().sum()
    }

}

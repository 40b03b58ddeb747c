//! Hit-word pair codec.
//!
//! Each hit occupies two consecutive 32-bit words in a data-concentrator
//! buffer:
//!
//! ```text
//! word0: | flag:2 | -:1 | lane:5 | axis:1 | channel:7 | ctime:16 |
//! word1: | tdcExtra:5 | tdc:11 | adcExtra:4 | charge:12 |
//! ```

use klm_core::Technology;
use serde::{Deserialize, Serialize};

/// One raw hit as read from a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHitWord {
    word0: u32,
    word1: u32,
}

impl RawHitWord {
    const CTIME_MASK: u32 = 0xFFFF;
    const CHANNEL_SHIFT: u32 = 16;
    const CHANNEL_MASK: u32 = 0x7F;
    const AXIS_SHIFT: u32 = 23;
    const LANE_SHIFT: u32 = 24;
    const LANE_MASK: u32 = 0x1F;
    const FLAG_SHIFT: u32 = 30;
    const FLAG_MASK: u32 = 0x3;
    const LANE_AXIS_CHANNEL_MASK: u32 = 0x1FFF;

    const CHARGE_MASK: u32 = 0x0FFF;
    const ADC_EXTRA_SHIFT: u32 = 12;
    const ADC_EXTRA_MASK: u32 = 0xF;
    const TDC_SHIFT: u32 = 16;
    const TDC_MASK: u32 = 0x07FF;
    const TDC_EXTRA_SHIFT: u32 = 27;
    const TDC_EXTRA_MASK: u32 = 0x1F;

    /// Wraps a word pair.
    #[inline]
    #[must_use]
    pub const fn new(word0: u32, word1: u32) -> Self {
        Self { word0, word1 }
    }

    #[inline]
    #[must_use]
    pub const fn word0(self) -> u32 {
        self.word0
    }

    #[inline]
    #[must_use]
    pub const fn word1(self) -> u32 {
        self.word1
    }

    /// Coarse time in 8 ns ticks.
    #[inline]
    #[must_use]
    pub fn ctime(self) -> u16 {
        (self.word0 & Self::CTIME_MASK) as u16
    }

    #[inline]
    #[must_use]
    pub fn channel(self) -> u8 {
        ((self.word0 >> Self::CHANNEL_SHIFT) & Self::CHANNEL_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn axis(self) -> u8 {
        ((self.word0 >> Self::AXIS_SHIFT) & 0x1) as u8
    }

    /// Readout-board slot: 1..=7 scintillator, 8..=20 RPC.
    #[inline]
    #[must_use]
    pub fn lane(self) -> u8 {
        ((self.word0 >> Self::LANE_SHIFT) & Self::LANE_MASK) as u8
    }

    /// Technology flag: 1 = RPC, 2 = scintillator.
    #[inline]
    #[must_use]
    pub fn flag(self) -> u8 {
        ((self.word0 >> Self::FLAG_SHIFT) & Self::FLAG_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn technology(self) -> Option<Technology> {
        Technology::from_flag(self.flag())
    }

    /// 13-bit `(lane, axis, channel)` key used for multiplicity counting.
    #[inline]
    #[must_use]
    pub fn lane_axis_channel(self) -> u16 {
        ((self.word0 >> Self::CHANNEL_SHIFT) & Self::LANE_AXIS_CHANNEL_MASK) as u16
    }

    #[inline]
    #[must_use]
    pub fn charge(self) -> u16 {
        (self.word1 & Self::CHARGE_MASK) as u16
    }

    #[inline]
    #[must_use]
    pub fn adc_extra(self) -> u8 {
        ((self.word1 >> Self::ADC_EXTRA_SHIFT) & Self::ADC_EXTRA_MASK) as u8
    }

    /// Fine time in ns.
    #[inline]
    #[must_use]
    pub fn tdc(self) -> u16 {
        ((self.word1 >> Self::TDC_SHIFT) & Self::TDC_MASK) as u16
    }

    #[inline]
    #[must_use]
    pub fn tdc_extra(self) -> u8 {
        ((self.word1 >> Self::TDC_EXTRA_SHIFT) & Self::TDC_EXTRA_MASK) as u8
    }

    /// Extracts every field.
    #[must_use]
    pub fn fields(self) -> HitFields {
        HitFields {
            ctime: self.ctime(),
            channel: self.channel(),
            axis: self.axis(),
            lane: self.lane(),
            flag: self.flag(),
            charge: self.charge(),
            adc_extra: self.adc_extra(),
            tdc: self.tdc(),
            tdc_extra: self.tdc_extra(),
        }
    }
}

/// Unpacked hit-word fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HitFields {
    pub ctime: u16,
    pub channel: u8,
    pub axis: u8,
    pub lane: u8,
    pub flag: u8,
    pub charge: u16,
    pub adc_extra: u8,
    pub tdc: u16,
    pub tdc_extra: u8,
}

impl HitFields {
    /// Packs the fields into a word pair. Out-of-range values are masked.
    #[must_use]
    pub fn encode(&self) -> RawHitWord {
        let word0 = u32::from(self.ctime)
            | ((u32::from(self.channel) & RawHitWord::CHANNEL_MASK) << RawHitWord::CHANNEL_SHIFT)
            | ((u32::from(self.axis) & 0x1) << RawHitWord::AXIS_SHIFT)
            | ((u32::from(self.lane) & RawHitWord::LANE_MASK) << RawHitWord::LANE_SHIFT)
            | ((u32::from(self.flag) & RawHitWord::FLAG_MASK) << RawHitWord::FLAG_SHIFT);
        let word1 = (u32::from(self.charge) & RawHitWord::CHARGE_MASK)
            | ((u32::from(self.adc_extra) & RawHitWord::ADC_EXTRA_MASK)
                << RawHitWord::ADC_EXTRA_SHIFT)
            | ((u32::from(self.tdc) & RawHitWord::TDC_MASK) << RawHitWord::TDC_SHIFT)
            | ((u32::from(self.tdc_extra) & RawHitWord::TDC_EXTRA_MASK)
                << RawHitWord::TDC_EXTRA_SHIFT);
        RawHitWord::new(word0, word1)
    }
}

/// Iterates the word pairs of a buffer body, ignoring any unpaired tail word.
pub fn word_pairs(words: &[u32]) -> impl Iterator<Item = RawHitWord> + '_ {
    words
        .chunks_exact(2)
        .map(|pair| RawHitWord::new(pair[0], pair[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_fields() -> HitFields {
        HitFields {
            ctime: 50,
            channel: 3,
            axis: 0,
            lane: 10,
            flag: 1,
            charge: 0,
            adc_extra: 0,
            tdc: 600,
            tdc_extra: 0,
        }
    }

    #[test]
    fn test_field_extraction() {
        let word = rpc_fields().encode();
        assert_eq!(word.word0(), (1 << 30) | (10 << 24) | (3 << 16) | 50);
        assert_eq!(word.word1(), 600 << 16);
        assert_eq!(word.technology(), Some(Technology::Rpc));
        assert_eq!(word.lane_axis_channel(), (10 << 8) | 3);
    }

    #[test]
    fn test_round_trip_all_bits() {
        // Every used bit set: bit 29 is the only hole in word0.
        let word = RawHitWord::new(0xDFFF_FFFF, 0xFFFF_FFFF);
        let fields = word.fields();
        assert_eq!(fields.flag, 3);
        assert_eq!(fields.lane, 0x1F);
        assert_eq!(fields.tdc_extra, 0x1F);
        assert_eq!(fields.encode(), word);
    }

    #[test]
    fn test_round_trip_sparse_words() {
        for (w0, w1) in [
            (0x8000_0001_u32, 0x0800_0000_u32),
            (0x4080_0000, 0x0000_F000),
            (0x9F7F_1234, 0x07FF_0FFF),
        ] {
            let word = RawHitWord::new(w0, w1);
            assert_eq!(word.fields().encode(), word, "{w0:#x} {w1:#x}");
        }
    }

    #[test]
    fn test_unknown_flag() {
        let word = RawHitWord::new(0, 0);
        assert_eq!(word.flag(), 0);
        assert_eq!(word.technology(), None);
        let word = RawHitWord::new(0xC000_0000, 0);
        assert_eq!(word.technology(), None);
    }

    #[test]
    fn test_flag_ignores_bit_29() {
        let rpc = RawHitWord::new(0x6000_0000 | (10 << 24) | 50, 0);
        assert_eq!(rpc.flag(), 1);
        assert_eq!(rpc.lane(), 10);
        assert_eq!(rpc.technology(), Some(Technology::Rpc));

        let scint = RawHitWord::new(0xA000_0000 | (1 << 24), 0);
        assert_eq!(scint.flag(), 2);
        assert_eq!(scint.lane(), 1);
        assert_eq!(scint.technology(), Some(Technology::Scintillator));

        // Bit 29 alone carries no technology.
        assert_eq!(RawHitWord::new(0x2000_0000, 0).technology(), None);
    }

    #[test]
    fn test_word_pairs_skips_trailer() {
        let words = [1, 2, 3, 4, 0xABCD_0000];
        let pairs: Vec<_> = word_pairs(&words).collect();
        assert_eq!(pairs, vec![RawHitWord::new(1, 2), RawHitWord::new(3, 4)]);
    }
}

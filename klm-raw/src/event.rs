//! Raw event model as delivered by the readout.

use klm_core::NUM_FINESSE;
use serde::{Deserialize, Serialize};

use crate::timing::trigger_ctime;
use crate::RawHitWord;

/// COPPER node-ID base of the barrel readout.
pub const BKLM_NODE_BASE: u32 = 0x0700_0000;
/// COPPER node-ID base of the endcap readout.
pub const EKLM_NODE_BASE: u32 = 0x0800_0000;
/// Highest node number accepted after normalisation.
pub const MAX_NODE: u8 = 4;

/// COPPER node ID relative to the barrel base, with endcap boards shifted
/// to start at 4.
#[must_use]
pub fn relative_node(node_id: u32) -> i64 {
    let span = i64::from(EKLM_NODE_BASE - BKLM_NODE_BASE);
    let node = i64::from(node_id) - i64::from(BKLM_NODE_BASE);
    if node >= span {
        node - span + 4
    } else {
        node
    }
}

/// Normalises a COPPER node ID: barrel boards become `0..`, endcap boards
/// `4..`. Returns `None` for anything outside `0..=4`.
#[must_use]
pub fn normalize_node(node_id: u32) -> Option<u8> {
    u8::try_from(relative_node(node_id))
        .ok()
        .filter(|n| *n <= MAX_NODE)
}

/// One COPPER board's share of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopperRecord {
    /// Raw COPPER node ID.
    pub node_id: u32,
    /// 27-bit TTC trigger counter in 8 ns ticks.
    pub ttc_ctime: u32,
    /// One word buffer per finesse slot.
    pub buffers: [Vec<u32>; NUM_FINESSE],
}

impl CopperRecord {
    #[must_use]
    pub fn new(node_id: u32, ttc_ctime: u32) -> Self {
        Self {
            node_id,
            ttc_ctime,
            buffers: Default::default(),
        }
    }

    /// Sets the buffer of one finesse slot (ignored if out of range).
    #[must_use]
    pub fn with_buffer(mut self, finesse: usize, words: Vec<u32>) -> Self {
        if let Some(slot) = self.buffers.get_mut(finesse) {
            *slot = words;
        }
        self
    }

    #[must_use]
    pub fn relative_node(&self) -> i64 {
        relative_node(self.node_id)
    }

    /// Normalised node number, if this is a board the decoder reads.
    #[must_use]
    pub fn node(&self) -> Option<u8> {
        normalize_node(self.node_id)
    }

    /// Trigger coarse time in ns.
    #[must_use]
    pub fn trigger_ctime(&self) -> u32 {
        trigger_ctime(self.ttc_ctime)
    }

    #[must_use]
    pub fn word_count(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }
}

/// All COPPER records of one triggered event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_number: u32,
    pub coppers: Vec<CopperRecord>,
}

impl RawEvent {
    #[must_use]
    pub fn new(event_number: u32) -> Self {
        Self {
            event_number,
            coppers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_copper(mut self, copper: CopperRecord) -> Self {
        self.coppers.push(copper);
        self
    }

    /// Total words over every buffer.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.coppers.iter().map(CopperRecord::word_count).sum()
    }

    /// Number of non-empty buffers.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.coppers
            .iter()
            .flat_map(|c| c.buffers.iter())
            .filter(|b| !b.is_empty())
            .count()
    }
}

/// Lays out hit word pairs followed by a trailer carrying `revo9_ticks`
/// in its high half, the framing the data concentrators emit.
#[must_use]
pub fn build_buffer(hits: &[RawHitWord], revo9_ticks: u16) -> Vec<u32> {
    let mut words = Vec::with_capacity(hits.len() * 2 + 1);
    for hit in hits {
        words.push(hit.word0());
        words.push(hit.word1());
    }
    words.push(u32::from(revo9_ticks) << 16);
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_node() {
        assert_eq!(normalize_node(0x0700_0000), Some(0));
        assert_eq!(normalize_node(0x0700_0003), Some(3));
        assert_eq!(normalize_node(0x0700_0005), None);
        assert_eq!(normalize_node(0x0800_0000), Some(4));
        assert_eq!(normalize_node(0x0800_0001), None);
        assert_eq!(normalize_node(0x0600_0000), None);
        assert_eq!(normalize_node(0), None);
    }

    #[test]
    fn test_relative_node() {
        assert_eq!(relative_node(0x0700_0002), 2);
        assert_eq!(relative_node(0x0800_0000), 4);
        assert_eq!(relative_node(0x0800_0003), 7);
        assert_eq!(relative_node(0x06FF_FFFF), -1);
    }

    #[test]
    fn test_build_buffer_layout() {
        let hit = RawHitWord::new(0x4A03_0032, 0x0258_0000);
        let words = build_buffer(&[hit, hit], 0x0012);
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], 0x4A03_0032);
        assert_eq!(words[3], 0x0258_0000);
        assert_eq!(words[4], 0x0012_0000);
    }

    #[test]
    fn test_event_counts() {
        let event = RawEvent::new(9).with_copper(
            CopperRecord::new(BKLM_NODE_BASE + 1, 10)
                .with_buffer(0, vec![1, 2, 0])
                .with_buffer(3, vec![0])
                .with_buffer(7, vec![5]),
        );
        assert_eq!(event.word_count(), 4);
        assert_eq!(event.buffer_count(), 2);
        assert_eq!(event.coppers[0].node(), Some(1));
        assert_eq!(event.coppers[0].trigger_ctime(), 80);
    }
}

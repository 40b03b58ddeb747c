//! Per-buffer channel multiplicity.

/// Entry counts indexed by the 13-bit `(lane, axis, channel)` key.
///
/// Slots touched since the last [`clear`](Self::clear) are remembered, so
/// resetting costs one write per distinct key rather than a full sweep.
#[derive(Debug, Clone)]
pub struct MultiplicityTable {
    counts: Box<[u16]>,
    touched: Vec<u16>,
}

impl MultiplicityTable {
    /// Number of distinct keys.
    pub const SLOTS: usize = 1 << 13;

    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: vec![0; Self::SLOTS].into_boxed_slice(),
            touched: Vec::with_capacity(64),
        }
    }

    /// Counts one more entry on `key`.
    #[inline]
    pub fn increment(&mut self, key: u16) {
        let slot = &mut self.counts[usize::from(key) % Self::SLOTS];
        if *slot == 0 {
            self.touched.push(key);
        }
        *slot = slot.saturating_add(1);
    }

    /// Current count on `key`.
    #[inline]
    #[must_use]
    pub fn get(&self, key: u16) -> u16 {
        self.counts[usize::from(key) % Self::SLOTS]
    }

    /// Number of distinct keys seen.
    #[inline]
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.touched.len()
    }

    /// Resets every touched slot to zero.
    pub fn clear(&mut self) {
        for key in self.touched.drain(..) {
            self.counts[usize::from(key) % Self::SLOTS] = 0;
        }
    }
}

impl Default for MultiplicityTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_distinct() {
        let mut table = MultiplicityTable::new();
        table.increment(7);
        table.increment(7);
        table.increment(0x1FFF);
        assert_eq!(table.get(7), 2);
        assert_eq!(table.get(0x1FFF), 1);
        assert_eq!(table.get(8), 0);
        assert_eq!(table.distinct(), 2);
    }

    #[test]
    fn test_clear_resets_only_touched() {
        let mut table = MultiplicityTable::new();
        table.increment(42);
        table.increment(42);
        table.clear();
        assert_eq!(table.get(42), 0);
        assert_eq!(table.distinct(), 0);
        table.increment(42);
        assert_eq!(table.get(42), 1);
    }
}

//! Decoded hit records.

use crate::{ElectronicsId, ModuleId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Detector technology reported by the hit-word flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Technology {
    /// Resistive plate chamber (flag 1).
    Rpc,
    /// Scintillator strip (flag 2).
    Scintillator,
}

impl Technology {
    /// Maps the 2-bit flag to a technology; other values are not valid hits.
    #[inline]
    #[must_use]
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            1 => Some(Self::Rpc),
            2 => Some(Self::Scintillator),
            _ => None,
        }
    }

    /// Returns the 2-bit flag value.
    #[inline]
    #[must_use]
    pub fn flag(self) -> u8 {
        match self {
            Self::Rpc => 1,
            Self::Scintillator => 2,
        }
    }
}

/// In-time versus out-of-time classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HitTiming {
    /// Within the prompt window around the nominal offset.
    Prompt,
    /// Outside the prompt window.
    Background,
}

/// Which hits a consumer looks at, based on per-channel multiplicity.
///
/// Several entries on one readout channel in one buffer point at firmware
/// replay rather than physics, so consumers can isolate either population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EntrySelection {
    /// Every hit.
    #[default]
    All,
    /// Only hits that are alone on their channel.
    SingleEntry,
    /// Only hits that share their channel with at least one other entry.
    MultiEntry,
}

impl EntrySelection {
    /// Returns true if a hit with this channel multiplicity is selected.
    #[inline]
    #[must_use]
    pub fn accepts(self, multiplicity: u16) -> bool {
        match self {
            Self::All => true,
            Self::SingleEntry => multiplicity == 1,
            Self::MultiEntry => multiplicity > 1,
        }
    }

    /// File-name suffix used for outputs produced under this selection.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::All => "",
            Self::SingleEntry => "-singleEntry",
            Self::MultiEntry => "-multipleEntries",
        }
    }
}

/// One decoded, calibrated hit.
///
/// Created during the decode pass of a single event and dropped once the
/// event has been aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitRecord {
    /// Readout channel identifier.
    pub electronics_id: ElectronicsId,
    /// Detector module, if the channel is mapped.
    pub module_id: Option<ModuleId>,
    /// RPC or scintillator.
    pub technology: Technology,
    /// Data-concentrator index `(finesse << 2) | copper`.
    pub data_concentrator: u8,
    /// Sector index (0..16) the data concentrator serves.
    pub sector: u8,
    pub lane: u8,
    pub axis: u8,
    pub channel: u8,
    /// Coarse time exactly as read from the word.
    pub raw_ctime: u16,
    /// Coarse time after the legacy-firmware correction (equal to
    /// `raw_ctime` when no correction applies).
    pub ctime: u16,
    pub tdc: u16,
    pub charge: u16,
    pub adc_extra: u8,
    pub tdc_extra: u8,
    /// Time relative to the trigger in ns, modulo 1024, before the sector offset.
    pub raw_time: u16,
    /// Time relative to the trigger minus the sector offset, modulo 1024.
    pub calibrated_time: u16,
    pub timing: HitTiming,
    /// Position of the word pair within its buffer.
    pub hit_index: u16,
    /// Number of entries on this `(lane, axis, channel)` in the buffer.
    pub multiplicity: u16,
}

impl HitRecord {
    #[inline]
    #[must_use]
    pub fn is_rpc(&self) -> bool {
        self.technology == Technology::Rpc
    }

    #[inline]
    #[must_use]
    pub fn is_scintillator(&self) -> bool {
        self.technology == Technology::Scintillator
    }

    #[inline]
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.module_id.is_some()
    }

    #[inline]
    #[must_use]
    pub fn is_prompt(&self) -> bool {
        self.timing == HitTiming::Prompt
    }

    /// True when no other entry shares this hit's channel.
    #[inline]
    #[must_use]
    pub fn is_single_entry(&self) -> bool {
        self.multiplicity == 1
    }

    /// Combined lane/axis bin: `lane * 2 + axis` for lanes 1..=20, `axis` otherwise.
    #[inline]
    #[must_use]
    pub fn lane_axis(&self) -> u8 {
        if (1..=20).contains(&self.lane) {
            (self.lane << 1) + self.axis
        } else {
            self.axis
        }
    }

    /// 13-bit `(lane, axis, channel)` key as packed in the hit word.
    #[inline]
    #[must_use]
    pub fn lane_axis_channel(&self) -> u16 {
        (u16::from(self.lane) << 8) | (u16::from(self.axis) << 7) | u16::from(self.channel)
    }
}

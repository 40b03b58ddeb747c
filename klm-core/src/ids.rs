//! Electronics and detector-module identifiers.
//!
//! An [`ElectronicsId`] names one readout channel (node, finesse slot, lane,
//! axis, channel). A [`ModuleId`] names the strip group that channel is wired
//! to. The channel map translates the former into the latter.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of azimuthal sectors (8 backward + 8 forward).
pub const NUM_SECTORS: usize = 16;
/// Number of data concentrators (4 COPPERs x 4 finesse slots).
pub const NUM_DATA_CONCENTRATORS: usize = 16;
/// Finesse slots per COPPER.
pub const NUM_FINESSE: usize = 4;
/// BKLM COPPER boards per event.
pub const NUM_COPPERS: usize = 4;

/// Packed electronics identifier.
///
/// Layout: `(channel << 12) | (axis << 11) | (lane << 6) | (finesse << 4) | node`.
/// The channel field is 7 bits wide, so the packed value occupies 19 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ElectronicsId(u32);

impl ElectronicsId {
    const NODE_MASK: u32 = 0xF;
    const FINESSE_SHIFT: u32 = 4;
    const FINESSE_MASK: u32 = 0x3;
    const LANE_SHIFT: u32 = 6;
    const LANE_MASK: u32 = 0x1F;
    const AXIS_SHIFT: u32 = 11;
    const AXIS_MASK: u32 = 0x1;
    const CHANNEL_SHIFT: u32 = 12;
    const CHANNEL_MASK: u32 = 0x7F;

    /// Creates an identifier, rejecting fields that overflow their bit range.
    ///
    /// # Errors
    /// Returns [`Error::FieldOverflow`] naming the first offending field.
    pub fn new(node: u8, finesse: u8, lane: u8, axis: u8, channel: u8) -> Result<Self> {
        check("node", node, Self::NODE_MASK)?;
        check("finesse", finesse, Self::FINESSE_MASK)?;
        check("lane", lane, Self::LANE_MASK)?;
        check("axis", axis, Self::AXIS_MASK)?;
        check("channel", channel, Self::CHANNEL_MASK)?;
        Ok(Self::pack(node, finesse, lane, axis, channel))
    }

    /// Packs the fields, silently masking each one to its bit range.
    #[inline]
    #[must_use]
    pub fn pack(node: u8, finesse: u8, lane: u8, axis: u8, channel: u8) -> Self {
        Self(
            ((u32::from(channel) & Self::CHANNEL_MASK) << Self::CHANNEL_SHIFT)
                | ((u32::from(axis) & Self::AXIS_MASK) << Self::AXIS_SHIFT)
                | ((u32::from(lane) & Self::LANE_MASK) << Self::LANE_SHIFT)
                | ((u32::from(finesse) & Self::FINESSE_MASK) << Self::FINESSE_SHIFT)
                | (u32::from(node) & Self::NODE_MASK),
        )
    }

    /// Wraps an already packed value.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the packed value.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn node(self) -> u8 {
        (self.0 & Self::NODE_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn finesse(self) -> u8 {
        ((self.0 >> Self::FINESSE_SHIFT) & Self::FINESSE_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn lane(self) -> u8 {
        ((self.0 >> Self::LANE_SHIFT) & Self::LANE_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn axis(self) -> u8 {
        ((self.0 >> Self::AXIS_SHIFT) & Self::AXIS_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn channel(self) -> u8 {
        ((self.0 >> Self::CHANNEL_SHIFT) & Self::CHANNEL_MASK) as u8
    }
}

/// Packed BKLM module identifier.
///
/// Layout (all fields zero-based): strip `[0,6)`, plane `[6,7)`,
/// layer `[7,11)`, sector `[11,14)`, end `[14,15)` (1 = forward),
/// max strip `[15,21)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleId(u32);

impl ModuleId {
    const STRIP_BIT: u32 = 0;
    const STRIP_MASK: u32 = 0x3F;
    const PLANE_BIT: u32 = 6;
    const PLANE_MASK: u32 = 0x1;
    const LAYER_BIT: u32 = 7;
    const LAYER_MASK: u32 = 0xF;
    const SECTOR_BIT: u32 = 11;
    const SECTOR_MASK: u32 = 0x7;
    const END_BIT: u32 = 14;
    const END_MASK: u32 = 0x1;
    const MAX_STRIP_BIT: u32 = 15;

    /// Highest zero-based layer index.
    pub const MAX_LAYER: u8 = 14;
    /// Highest zero-based strip index.
    pub const MAX_STRIP: u8 = 47;

    /// Creates a module identifier from zero-based fields.
    ///
    /// # Errors
    /// Returns an error if a field is out of range or `strip_min > strip_max`.
    pub fn new(
        end: u8,
        sector: u8,
        layer: u8,
        plane: u8,
        strip_min: u8,
        strip_max: u8,
    ) -> Result<Self> {
        check("end", end, Self::END_MASK)?;
        check("sector", sector, Self::SECTOR_MASK)?;
        check("layer", layer, u32::from(Self::MAX_LAYER))?;
        check("plane", plane, Self::PLANE_MASK)?;
        check("strip_min", strip_min, u32::from(Self::MAX_STRIP))?;
        check("strip_max", strip_max, u32::from(Self::MAX_STRIP))?;
        if strip_min > strip_max {
            return Err(Error::InvalidStripRange {
                min: strip_min,
                max: strip_max,
            });
        }

        Ok(Self(
            (u32::from(strip_min) << Self::STRIP_BIT)
                | (u32::from(plane) << Self::PLANE_BIT)
                | (u32::from(layer) << Self::LAYER_BIT)
                | (u32::from(sector) << Self::SECTOR_BIT)
                | (u32::from(end) << Self::END_BIT)
                | (u32::from(strip_max) << Self::MAX_STRIP_BIT),
        ))
    }

    /// Wraps an already packed value.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the packed value.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Detector end: 0 = backward, 1 = forward.
    #[inline]
    #[must_use]
    pub fn end(self) -> u8 {
        ((self.0 >> Self::END_BIT) & Self::END_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn is_forward(self) -> bool {
        self.end() == 1
    }

    /// Sector index across both ends: 0..8 backward, 8..16 forward.
    #[inline]
    #[must_use]
    pub fn sector_fb(self) -> u8 {
        (self.end() << 3) | self.sector()
    }

    /// Zero-based sector within the end (0 is on the +x axis).
    #[inline]
    #[must_use]
    pub fn sector(self) -> u8 {
        ((self.0 >> Self::SECTOR_BIT) & Self::SECTOR_MASK) as u8
    }

    /// Zero-based layer (0 is innermost).
    #[inline]
    #[must_use]
    pub fn layer(self) -> u8 {
        ((self.0 >> Self::LAYER_BIT) & Self::LAYER_MASK) as u8
    }

    /// Plane: 0 is the inner plane.
    #[inline]
    #[must_use]
    pub fn plane(self) -> u8 {
        ((self.0 >> Self::PLANE_BIT) & Self::PLANE_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn strip_min(self) -> u8 {
        ((self.0 >> Self::STRIP_BIT) & Self::STRIP_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub fn strip_max(self) -> u8 {
        ((self.0 >> Self::MAX_STRIP_BIT) & Self::STRIP_MASK) as u8
    }

    /// Key identifying the physical module (end, sector, layer), ignoring
    /// plane and strips.
    #[inline]
    #[must_use]
    pub fn module_key(self) -> u32 {
        self.0
            & ((Self::END_MASK << Self::END_BIT)
                | (Self::SECTOR_MASK << Self::SECTOR_BIT)
                | (Self::LAYER_MASK << Self::LAYER_BIT))
    }
}

fn check(field: &'static str, value: u8, max: u32) -> Result<()> {
    if u32::from(value) > max {
        return Err(Error::FieldOverflow {
            field,
            value: u32::from(value),
            max,
        });
    }
    Ok(())
}

//! Non-fatal decode issues and job-level counters.

use std::fmt;

use thiserror::Error;

use crate::HitRecord;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A recoverable problem found while decoding one buffer.
///
/// Framing issues skip the whole buffer; an unknown flag skips one hit.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeIssue {
    /// Buffer holds an even number of words (no trailer).
    #[error("framing: even-length buffer of {words} words")]
    EvenLength { words: usize },

    /// Trailer word has non-zero low 16 bits.
    #[error("framing: trailer {trailer:#010x} has non-zero low 16 bits")]
    NonZeroTrailer { trailer: u32 },

    /// Technology flag is neither RPC nor scintillator.
    #[error("unknown technology flag {flag} in word {word0:#010x}")]
    UnknownFlag { flag: u8, word0: u32 },
}

impl DecodeIssue {
    /// Returns true for the buffer-level framing variants.
    #[must_use]
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::EvenLength { .. } | Self::NonZeroTrailer { .. })
    }
}

/// Aggregate counters reported at job end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodeDiagnostics {
    pub events: u64,
    pub buffers: u64,
    pub empty_buffers: u64,
    pub framing_errors: u64,
    pub unknown_flags: u64,
    pub mapped_hits: u64,
    pub unmapped_hits: u64,
    pub rpc_hits: u64,
    pub scint_hits: u64,
    pub prompt_hits: u64,
    pub background_hits: u64,
    /// Hits sharing their channel with another entry in the same buffer.
    pub multi_entry_hits: u64,
    /// COPPER records beyond the four BKLM boards.
    pub skipped_coppers: u64,
    /// COPPER records whose node ID falls outside 0..=4.
    pub skipped_nodes: u64,
}

impl DecodeDiagnostics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a recoverable issue.
    pub fn record_issue(&mut self, issue: &DecodeIssue) {
        if issue.is_framing() {
            self.framing_errors += 1;
        } else {
            self.unknown_flags += 1;
        }
    }

    /// Counts one emitted hit.
    pub fn record_hit(&mut self, hit: &HitRecord) {
        if hit.is_mapped() {
            self.mapped_hits += 1;
        } else {
            self.unmapped_hits += 1;
        }
        if hit.is_rpc() {
            self.rpc_hits += 1;
        } else {
            self.scint_hits += 1;
        }
        if hit.is_prompt() {
            self.prompt_hits += 1;
        } else {
            self.background_hits += 1;
        }
        if !hit.is_single_entry() {
            self.multi_entry_hits += 1;
        }
    }

    /// Adds another set of counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.events += other.events;
        self.buffers += other.buffers;
        self.empty_buffers += other.empty_buffers;
        self.framing_errors += other.framing_errors;
        self.unknown_flags += other.unknown_flags;
        self.mapped_hits += other.mapped_hits;
        self.unmapped_hits += other.unmapped_hits;
        self.rpc_hits += other.rpc_hits;
        self.scint_hits += other.scint_hits;
        self.prompt_hits += other.prompt_hits;
        self.background_hits += other.background_hits;
        self.multi_entry_hits += other.multi_entry_hits;
        self.skipped_coppers += other.skipped_coppers;
        self.skipped_nodes += other.skipped_nodes;
    }

    /// Total emitted hits.
    #[must_use]
    pub fn total_hits(&self) -> u64 {
        self.mapped_hits + self.unmapped_hits
    }

    /// Returns true if any recoverable issue was counted.
    #[must_use]
    pub fn has_issues(&self) -> bool {
        self.framing_errors > 0
            || self.unknown_flags > 0
            || self.skipped_coppers > 0
            || self.skipped_nodes > 0
    }
}

impl fmt::Display for DecodeDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Events:            {}", self.events)?;
        writeln!(
            f,
            "Buffers:           {} ({} empty)",
            self.buffers, self.empty_buffers
        )?;
        writeln!(
            f,
            "Hits:              {} (RPC {}, scintillator {})",
            self.total_hits(),
            self.rpc_hits,
            self.scint_hits
        )?;
        writeln!(
            f,
            "  mapped/unmapped: {} / {}",
            self.mapped_hits, self.unmapped_hits
        )?;
        writeln!(
            f,
            "  prompt/bkgd:     {} / {}",
            self.prompt_hits, self.background_hits
        )?;
        writeln!(f, "  multi-entry:     {}", self.multi_entry_hits)?;
        writeln!(f, "Framing errors:    {}", self.framing_errors)?;
        writeln!(f, "Unknown flags:     {}", self.unknown_flags)?;
        write!(
            f,
            "Skipped coppers:   {} (bad node: {})",
            self.skipped_coppers, self.skipped_nodes
        )
    }
}

//! CSV channel maps.
//!
//! One row per readout channel:
//!
//! ```text
//! node,finesse,lane,axis,channel,end,sector,layer,plane,strip_min,strip_max
//! 0,0,10,0,3,1,2,9,0,3,3
//! ```
//!
//! All fields are zero-based. Blank lines and lines starting with `#` are
//! skipped. The map is built once and only read afterwards.

use std::fs;
use std::path::Path;

use fxhash::FxHashMap;
use klm_core::{ElectronicsId, ModuleId, NUM_SECTORS};
use log::debug;

use crate::{Error, Result};

/// Electronics-to-module lookup loaded from CSV.
pub type ChannelMapTable = FxHashMap<ElectronicsId, ModuleId>;

/// Expected header row.
pub const CHANNEL_MAP_HEADER: &str =
    "node,finesse,lane,axis,channel,end,sector,layer,plane,strip_min,strip_max";

const ENTRIES_PER_LINE: usize = 11;

/// Loads a channel map from a CSV file.
///
/// # Errors
/// Returns an error if the file cannot be read or any row is malformed.
pub fn load_channel_map<P: AsRef<Path>>(path: P) -> Result<ChannelMapTable> {
    let contents = fs::read_to_string(path.as_ref())?;
    let map = parse_channel_map(&contents)?;
    debug!(
        "loaded {} mapped channels from {}",
        map.len(),
        path.as_ref().display()
    );
    Ok(map)
}

/// Parses channel-map CSV text.
///
/// # Errors
/// Returns [`Error::ChannelMap`] or [`Error::ChannelMapEntry`] naming the
/// first bad line.
pub fn parse_channel_map(contents: &str) -> Result<ChannelMapTable> {
    let mut map = ChannelMapTable::default();
    let mut header_seen = false;

    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !header_seen {
            if line.replace(' ', "") != CHANNEL_MAP_HEADER {
                return Err(bad_line(line_no, "missing or unexpected header"));
            }
            header_seen = true;
            continue;
        }

        let (elect, module) = parse_row(line, line_no)?;
        if map.insert(elect, module).is_some() {
            return Err(bad_line(
                line_no,
                format!("electronics id {:#x} listed twice", elect.as_u32()),
            ));
        }
    }

    Ok(map)
}

fn bad_line(line: usize, message: impl Into<String>) -> Error {
    Error::ChannelMap {
        line,
        message: message.into(),
    }
}

fn parse_row(line: &str, line_no: usize) -> Result<(ElectronicsId, ModuleId)> {
    let entries: Vec<&str> = line.split(',').map(str::trim).collect();
    if entries.len() != ENTRIES_PER_LINE {
        return Err(bad_line(
            line_no,
            format!("expected {ENTRIES_PER_LINE} fields, found {}", entries.len()),
        ));
    }

    let mut fields = [0u8; ENTRIES_PER_LINE];
    for (slot, entry) in fields.iter_mut().zip(&entries) {
        *slot = entry
            .parse()
            .map_err(|e| bad_line(line_no, format!("bad field {entry:?}: {e}")))?;
    }
    let [node, finesse, lane, axis, channel, end, sector, layer, plane, strip_min, strip_max] =
        fields;

    let out_of_range = |source| Error::ChannelMapEntry {
        line: line_no,
        source,
    };
    let elect = ElectronicsId::new(node, finesse, lane, axis, channel).map_err(out_of_range)?;
    let module = ModuleId::new(end, sector, layer, plane, strip_min, strip_max)
        .map_err(out_of_range)?;
    Ok((elect, module))
}

/// Mapped channels per sector, indexed `0..8` backward, `8..16` forward.
#[must_use]
pub fn sector_counts(map: &ChannelMapTable) -> [usize; NUM_SECTORS] {
    let mut counts = [0; NUM_SECTORS];
    for module in map.values() {
        counts[usize::from(module.sector_fb()) % NUM_SECTORS] += 1;
    }
    counts
}

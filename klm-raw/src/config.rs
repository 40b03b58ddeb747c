//! Calibration constants for hit timing.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use klm_core::{Technology, NUM_DATA_CONCENTRATORS, NUM_SECTORS};
use serde::{Deserialize, Serialize};

use crate::timing::{self, TIME_MODULUS};
use crate::{Error, Result};

/// Per-sector offsets, nominal prompt peaks and readout layout.
///
/// Built once at job start and shared read-only by every decode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Experiment number the data was taken in.
    pub experiment: u32,
    /// RPC time offset per sector, in ns.
    pub t0_rpc: [i32; NUM_SECTORS],
    /// Scintillator ctime offset per sector, in ns.
    pub ct0_scint: [i32; NUM_SECTORS],
    /// Calibrated RPC prompt peak.
    pub rpc_nominal: i32,
    /// Calibrated scintillator prompt peak.
    pub scint_nominal: i32,
    /// Half-width of the RPC prompt window (exclusive).
    pub rpc_prompt_window: i32,
    /// Half-width of the scintillator prompt window (exclusive).
    pub scint_prompt_window: i32,
    /// Sector served by each data concentrator `(finesse << 2) | copper`.
    pub dc_to_sector: [u8; NUM_DATA_CONCENTRATORS],
    /// Scintillator ctime needs the legacy-firmware fix for experiments up
    /// to and including this one. `None` disables the fix.
    pub legacy_ctime_max_experiment: Option<u32>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self::belle2_defaults()
    }
}

// On-disk schema: every section and field is optional and falls back to
// the Belle II defaults.
#[derive(Serialize, Deserialize)]
struct JsonConfig {
    calibration: JsonCalibration,
}

#[derive(Serialize, Deserialize)]
#[serde(default)]
struct JsonCalibration {
    experiment: u32,
    timing: JsonTiming,
    readout: JsonReadout,
    legacy_ctime_max_experiment: Option<u32>,
}

#[derive(Serialize, Deserialize)]
#[serde(default)]
struct JsonTiming {
    rpc_t0: [i32; NUM_SECTORS],
    scint_ct0: [i32; NUM_SECTORS],
    rpc_nominal: i32,
    scint_nominal: i32,
    rpc_prompt_window: i32,
    scint_prompt_window: i32,
}

#[derive(Serialize, Deserialize)]
#[serde(default)]
struct JsonReadout {
    dc_to_sector: [u8; NUM_DATA_CONCENTRATORS],
}

impl From<&CalibrationConfig> for JsonCalibration {
    fn from(config: &CalibrationConfig) -> Self {
        Self {
            experiment: config.experiment,
            timing: JsonTiming {
                rpc_t0: config.t0_rpc,
                scint_ct0: config.ct0_scint,
                rpc_nominal: config.rpc_nominal,
                scint_nominal: config.scint_nominal,
                rpc_prompt_window: config.rpc_prompt_window,
                scint_prompt_window: config.scint_prompt_window,
            },
            readout: JsonReadout {
                dc_to_sector: config.dc_to_sector,
            },
            legacy_ctime_max_experiment: config.legacy_ctime_max_experiment,
        }
    }
}

impl Default for JsonCalibration {
    fn default() -> Self {
        Self::from(&CalibrationConfig::belle2_defaults())
    }
}

impl Default for JsonTiming {
    fn default() -> Self {
        JsonCalibration::default().timing
    }
}

impl Default for JsonReadout {
    fn default() -> Self {
        JsonCalibration::default().readout
    }
}

impl CalibrationConfig {
    /// Belle II BKLM constants from the experiment 7, run 1505 calibration.
    #[must_use]
    pub fn belle2_defaults() -> Self {
        Self {
            experiment: 7,
            t0_rpc: [8, -14, -6, -14, -2, 10, 9, 13, 0, -10, -14, -20, 2, 6, 14, 11],
            ct0_scint: [
                -1, -33, -46, -33, -2, 32, 51, 32, 0, -32, -45, -33, -4, 34, 45, 27,
            ],
            rpc_nominal: 312,
            scint_nominal: 455,
            rpc_prompt_window: 50,
            scint_prompt_window: 50,
            dc_to_sector: [10, 14, 2, 6, 11, 15, 3, 7, 12, 8, 4, 0, 13, 9, 5, 1],
            legacy_ctime_max_experiment: Some(3),
        }
    }

    /// Constants with every offset zeroed; useful for raw timing studies.
    #[must_use]
    pub fn uncalibrated() -> Self {
        Self {
            t0_rpc: [0; NUM_SECTORS],
            ct0_scint: [0; NUM_SECTORS],
            ..Self::belle2_defaults()
        }
    }

    /// Load a calibration from a JSON file.
    ///
    /// # Errors
    /// Fails on I/O, malformed JSON or inconsistent values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load a calibration from a JSON string.
    ///
    /// # Errors
    /// Fails on malformed JSON or inconsistent values.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let calibration = config.calibration;
        let config = Self {
            experiment: calibration.experiment,
            t0_rpc: calibration.timing.rpc_t0,
            ct0_scint: calibration.timing.scint_ct0,
            rpc_nominal: calibration.timing.rpc_nominal,
            scint_nominal: calibration.timing.scint_nominal,
            rpc_prompt_window: calibration.timing.rpc_prompt_window,
            scint_prompt_window: calibration.timing.scint_prompt_window,
            dc_to_sector: calibration.readout.dc_to_sector,
            legacy_ctime_max_experiment: calibration.legacy_ctime_max_experiment,
        };

        // Checked once at load time, not per hit.
        config.validate()?;
        Ok(config)
    }

    /// Serialise into the file schema read by [`Self::from_json`].
    ///
    /// # Errors
    /// Propagates serializer failures.
    pub fn to_json_string(&self) -> Result<String> {
        let json = JsonConfig {
            calibration: JsonCalibration::from(self),
        };
        Ok(serde_json::to_string_pretty(&json)?)
    }

    /// Check that the constants are usable.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCalibration`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let mut seen = [false; NUM_SECTORS];
        for (dc, &sector) in self.dc_to_sector.iter().enumerate() {
            let slot = seen.get_mut(usize::from(sector)).ok_or_else(|| {
                Error::InvalidCalibration(format!("DC {dc} maps to sector {sector} (max 15)"))
            })?;
            if *slot {
                return Err(Error::InvalidCalibration(format!(
                    "sector {sector} is served by more than one DC"
                )));
            }
            *slot = true;
        }

        for (name, window) in [
            ("rpc_prompt_window", self.rpc_prompt_window),
            ("scint_prompt_window", self.scint_prompt_window),
        ] {
            if window <= 0 {
                return Err(Error::InvalidCalibration(format!(
                    "{name} must be positive, got {window}"
                )));
            }
        }

        for (name, nominal) in [
            ("rpc_nominal", self.rpc_nominal),
            ("scint_nominal", self.scint_nominal),
        ] {
            if !(0..TIME_MODULUS).contains(&nominal) {
                return Err(Error::InvalidCalibration(format!(
                    "{name} must lie in [0, 1024), got {nominal}"
                )));
            }
        }

        let offsets = self.t0_rpc.iter().chain(self.ct0_scint.iter());
        if let Some(offset) = offsets.copied().find(|o| o.abs() >= TIME_MODULUS) {
            return Err(Error::InvalidCalibration(format!(
                "sector offset {offset} exceeds the 1024 ns time range"
            )));
        }

        Ok(())
    }

    /// Returns a copy for a different experiment number.
    #[must_use]
    pub fn with_experiment(mut self, experiment: u32) -> Self {
        self.experiment = experiment;
        self
    }

    /// True if scintillator ctimes need the legacy-firmware fix.
    #[must_use]
    pub fn applies_legacy_ctime(&self) -> bool {
        self.legacy_ctime_max_experiment
            .is_some_and(|max| self.experiment <= max)
    }

    /// Sector served by a data concentrator (index taken modulo 16).
    #[inline]
    #[must_use]
    pub fn sector_for_dc(&self, dc: u8) -> u8 {
        self.dc_to_sector[usize::from(dc) % NUM_DATA_CONCENTRATORS]
    }

    /// Offset subtracted from a raw time of this technology in this sector.
    #[inline]
    #[must_use]
    pub fn sector_offset(&self, technology: Technology, sector: u8) -> i32 {
        let sector = usize::from(sector) % NUM_SECTORS;
        match technology {
            Technology::Rpc => self.t0_rpc[sector],
            Technology::Scintillator => self.ct0_scint[sector],
        }
    }

    /// Nominal calibrated prompt peak for a technology.
    #[inline]
    #[must_use]
    pub fn nominal(&self, technology: Technology) -> i32 {
        match technology {
            Technology::Rpc => self.rpc_nominal,
            Technology::Scintillator => self.scint_nominal,
        }
    }

    /// Prompt window half-width for a technology.
    #[inline]
    #[must_use]
    pub fn prompt_window(&self, technology: Technology) -> i32 {
        match technology {
            Technology::Rpc => self.rpc_prompt_window,
            Technology::Scintillator => self.scint_prompt_window,
        }
    }

    /// Classifies a calibrated time.
    #[inline]
    #[must_use]
    pub fn is_prompt(&self, technology: Technology, calibrated: u16) -> bool {
        timing::is_prompt(
            calibrated,
            self.nominal(technology),
            self.prompt_window(technology),
        )
    }
}

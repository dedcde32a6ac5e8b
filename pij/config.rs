//! Tunable options of the conversion, stored as TOML.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! null_mass_cutoff = 0.4
//!
//! [null_histogram.binning]
//! factor = 3.0
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::null_dist::MAX_HISTOGRAM_BINS;
use crate::null_hist::NullHistogramOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid config value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Share of null probability mass, counted from LLR zero upward, used to
    /// estimate the fraction of null gene pairs in a row.
    pub null_mass_cutoff: f64,
    pub null_histogram: NullHistogramOptions,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            null_mass_cutoff: 0.5,
            null_histogram: NullHistogramOptions::default(),
        }
    }
}

impl ConvertOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.null_mass_cutoff > 0.0 && self.null_mass_cutoff <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "null_mass_cutoff",
                reason: format!("must lie in (0, 1], got {}", self.null_mass_cutoff),
            });
        }
        let binning = &self.null_histogram.binning;
        if !(binning.factor.is_finite() && binning.factor > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "null_histogram.binning.factor",
                reason: format!("must be finite and positive, got {}", binning.factor),
            });
        }
        if binning.min_bins < 1 {
            return Err(ConfigError::InvalidValue {
                field: "null_histogram.binning.min_bins",
                reason: "must be at least 1".to_string(),
            });
        }
        if binning.max_bins > MAX_HISTOGRAM_BINS {
            return Err(ConfigError::InvalidValue {
                field: "null_histogram.binning.max_bins",
                reason: format!(
                    "must not exceed {MAX_HISTOGRAM_BINS}, got {}",
                    binning.max_bins
                ),
            });
        }
        if binning.max_bins < binning.min_bins {
            return Err(ConfigError::InvalidValue {
                field: "null_histogram.binning.max_bins",
                reason: format!(
                    "must not be below min_bins ({}), got {}",
                    binning.min_bins, binning.max_bins
                ),
            });
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Saves the options in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = self.to_toml_string()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let options: Self = toml::from_str(&toml_string)?;
        options.validate()?;
        Ok(options)
    }
}

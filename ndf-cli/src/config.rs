//! Configuration file loading
//!
//! ```toml
//! [export]
//! sample_rate = 512.0
//! time_unit = "milliseconds"
//! channels = [1, 2]
//! merge = true
//!
//! [export.channel_rates]
//! 3 = 256.0
//!
//! [timing]
//! clock_tolerance = 3
//!
//! [dump]
//! format = "csv"
//! include_timestamps = true
//!
//! [batch]
//! output_dir = "labchart"
//! skip_existing = true
//! sessions = true
//! session_gap = 1800.0
//! ```

use anyhow::{Context, Result};
use ndf_converter::{
    DecimalSeparator, DumpOptions, ExportConfig, TimeReference, TimeUnit, TimingConfig,
    VoltageUnit,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub export: ExportSection,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub dump: DumpOptions,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// `[export]` table; unset keys keep the library defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExportSection {
    pub sample_rate: Option<f64>,
    pub range_mv: Option<f64>,
    pub interval_length: Option<f64>,
    pub decimal_separator: Option<DecimalSeparator>,
    pub time_unit: Option<TimeUnit>,
    pub voltage_unit: Option<VoltageUnit>,
    pub time_reference: Option<TimeReference>,
    pub glitch_threshold: Option<u16>,
    pub channels: Option<Vec<u8>>,
    /// TOML keys are strings, so channel ids are parsed on conversion
    #[serde(default)]
    pub channel_rates: BTreeMap<String, f64>,
    /// Also write a merged multi-channel file
    #[serde(default)]
    pub merge: bool,
}

/// `[batch]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchConfig {
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub skip_existing: bool,
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub recursive: bool,
    /// Worker threads; 0 or unset lets rayon decide
    pub jobs: Option<usize>,
    /// Group `M<unix>.ndf` archives into session directories
    #[serde(default)]
    pub sessions: bool,
    /// Pause in seconds that starts a new session
    pub session_gap: Option<f64>,
}

impl AppConfig {
    /// Library configuration described by the `[export]` and `[timing]` tables
    pub fn export_config(&self) -> Result<ExportConfig> {
        let section = &self.export;
        let defaults = ExportConfig::default();

        let mut config = ExportConfig {
            sample_rate: section.sample_rate.unwrap_or(defaults.sample_rate),
            range_mv: section.range_mv.unwrap_or(defaults.range_mv),
            interval_length: section.interval_length.unwrap_or(defaults.interval_length),
            decimal_separator: section.decimal_separator.unwrap_or(defaults.decimal_separator),
            time_unit: section.time_unit.unwrap_or(defaults.time_unit),
            voltage_unit: section.voltage_unit.unwrap_or(defaults.voltage_unit),
            time_reference: section.time_reference.unwrap_or(defaults.time_reference),
            glitch_threshold: section.glitch_threshold.unwrap_or(defaults.glitch_threshold),
            channels: section.channels.clone(),
            channel_rates: BTreeMap::new(),
            timing: self.timing.clone(),
        };

        for (key, rate) in &section.channel_rates {
            let channel: u8 = key
                .trim()
                .parse()
                .with_context(|| format!("Invalid channel id in [export.channel_rates]: {:?}", key))?;
            config = config.with_channel_rate(channel, *rate);
        }

        Ok(config)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    log::debug!("Loaded configuration from {:?}", path);
    Ok(config)
}

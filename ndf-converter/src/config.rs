//! Converter configuration types
//!
//! `ExportConfig` carries every recognised conversion option and
//! `validate()` must pass before any file is touched. `TimingConfig` has
//! serde defaults so a partial TOML table deserializes into a usable
//! configuration.

use crate::types::{ConverterError, Result, CLOCK_CHANNEL, MAX_CHANNEL_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decimal separator substituted into formatted numbers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalSeparator {
    #[default]
    Period,
    Comma,
}

/// Unit of the time column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
}

/// Unit of the voltage columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoltageUnit {
    #[default]
    Millivolts,
    Microvolts,
}

/// Reference point of the time column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeReference {
    /// Seconds since the first exported sample
    #[default]
    Relative,
    /// UNIX time: recording creation time plus offset
    Absolute,
}

/// Clock and contiguity parameters for timing reconstruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Device tick counter frequency in Hz
    #[serde(default = "default_tick_rate")]
    pub tick_rate: f64,

    /// Reference clock message rate in Hz
    #[serde(default = "default_clock_rate")]
    pub clock_rate: f64,

    /// Largest clock tick jump, in expected clock spacings, that is not a discontinuity
    #[serde(default = "default_clock_tolerance")]
    pub clock_tolerance: u32,

    /// Allowed deviation of a sample's spacing, as a fraction of the sample period
    #[serde(default = "default_sample_tolerance")]
    pub sample_tolerance: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_rate: default_tick_rate(),
            clock_rate: default_clock_rate(),
            clock_tolerance: default_clock_tolerance(),
            sample_tolerance: default_sample_tolerance(),
        }
    }
}

impl TimingConfig {
    /// Ticks expected between two consecutive clock messages
    pub fn clock_spacing(&self) -> f64 {
        self.tick_rate / self.clock_rate
    }

    /// Largest tick jump between clock messages that keeps the segment going
    pub fn max_clock_jump(&self) -> f64 {
        self.clock_spacing() * f64::from(self.clock_tolerance)
    }
}

fn default_tick_rate() -> f64 {
    32768.0
}

fn default_clock_rate() -> f64 {
    128.0
}

fn default_clock_tolerance() -> u32 {
    2
}

fn default_sample_tolerance() -> f64 {
    0.5
}

fn default_sample_rate() -> f64 {
    512.0
}

fn default_range_mv() -> f64 {
    120.0
}

fn default_interval_length() -> f64 {
    1.0
}

fn default_glitch_threshold() -> u16 {
    500
}

/// Configuration for one conversion run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportConfig {
    /// Nominal sample rate of data channels (and of merged rows) in Hz
    pub sample_rate: f64,

    /// Full-scale input range in millivolts
    pub range_mv: f64,

    /// Target interval duration in seconds
    pub interval_length: f64,

    pub decimal_separator: DecimalSeparator,
    pub time_unit: TimeUnit,
    pub voltage_unit: VoltageUnit,
    pub time_reference: TimeReference,

    /// Glitch filter threshold in ADC counts (0 disables the filter)
    pub glitch_threshold: u16,

    /// Optional: only convert these channels, in this order
    pub channels: Option<Vec<u8>>,

    /// Per-channel sample rate overrides in Hz
    pub channel_rates: BTreeMap<u8, f64>,

    pub timing: TimingConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            range_mv: default_range_mv(),
            interval_length: default_interval_length(),
            decimal_separator: DecimalSeparator::default(),
            time_unit: TimeUnit::default(),
            voltage_unit: VoltageUnit::default(),
            time_reference: TimeReference::default(),
            glitch_threshold: default_glitch_threshold(),
            channels: None,
            channel_rates: BTreeMap::new(),
            timing: TimingConfig::default(),
        }
    }
}

impl ExportConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the data channel sample rate
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Builder method: set the full-scale range in millivolts
    pub fn with_range_mv(mut self, range_mv: f64) -> Self {
        self.range_mv = range_mv;
        self
    }

    /// Builder method: set the interval duration in seconds
    pub fn with_interval_length(mut self, seconds: f64) -> Self {
        self.interval_length = seconds;
        self
    }

    /// Builder method: set the decimal separator
    pub fn with_decimal_separator(mut self, separator: DecimalSeparator) -> Self {
        self.decimal_separator = separator;
        self
    }

    /// Builder method: set the time column unit
    pub fn with_time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    /// Builder method: set the voltage column unit
    pub fn with_voltage_unit(mut self, unit: VoltageUnit) -> Self {
        self.voltage_unit = unit;
        self
    }

    /// Builder method: set the time reference
    pub fn with_time_reference(mut self, reference: TimeReference) -> Self {
        self.time_reference = reference;
        self
    }

    /// Builder method: set the glitch threshold (0 disables)
    pub fn with_glitch_threshold(mut self, threshold: u16) -> Self {
        self.glitch_threshold = threshold;
        self
    }

    /// Builder method: restrict conversion to these channels
    pub fn with_channels(mut self, channels: Vec<u8>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Builder method: override one channel's nominal sample rate
    pub fn with_channel_rate(mut self, channel: u8, rate: f64) -> Self {
        self.channel_rates.insert(channel, rate);
        self
    }

    /// Builder method: replace the timing parameters
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Nominal sample rate of a channel
    ///
    /// The clock channel runs at the clock rate unless overridden.
    pub fn rate_for(&self, channel: u8) -> f64 {
        if let Some(rate) = self.channel_rates.get(&channel) {
            return *rate;
        }
        if channel == CLOCK_CHANNEL {
            self.timing.clock_rate
        } else {
            self.sample_rate
        }
    }

    /// Reject configurations that cannot produce a meaningful export
    pub fn validate(&self) -> Result<()> {
        positive("sample_rate", self.sample_rate)?;
        positive("range_mv", self.range_mv)?;
        positive("interval_length", self.interval_length)?;
        positive("timing.tick_rate", self.timing.tick_rate)?;
        positive("timing.clock_rate", self.timing.clock_rate)?;
        positive("timing.sample_tolerance", self.timing.sample_tolerance)?;

        if self.timing.clock_tolerance == 0 {
            return Err(ConverterError::InvalidConfiguration(
                "timing.clock_tolerance must be at least 1".to_string(),
            ));
        }
        // Beyond half a period neighbouring samples become indistinguishable
        if self.timing.sample_tolerance >= 1.0 {
            return Err(ConverterError::InvalidConfiguration(format!(
                "timing.sample_tolerance must be below 1.0, got {}",
                self.timing.sample_tolerance
            )));
        }

        if let Some(channels) = &self.channels {
            if channels.is_empty() {
                return Err(ConverterError::InvalidConfiguration(
                    "channel selection is empty".to_string(),
                ));
            }
            for (i, channel) in channels.iter().enumerate() {
                check_channel(*channel)?;
                if channels[..i].contains(channel) {
                    return Err(ConverterError::InvalidConfiguration(format!(
                        "channel {} selected more than once",
                        channel
                    )));
                }
            }
        }

        for (channel, rate) in &self.channel_rates {
            check_channel(*channel)?;
            positive(&format!("channel_rates[{}]", channel), *rate)?;
        }

        if self.samples_per_interval(self.sample_rate) == 0 {
            return Err(ConverterError::InvalidConfiguration(format!(
                "interval_length {} s holds no samples at {} Hz",
                self.interval_length, self.sample_rate
            )));
        }

        Ok(())
    }

    /// Number of samples in one full interval at the given rate
    pub fn samples_per_interval(&self, rate: f64) -> usize {
        (self.interval_length * rate).round() as usize
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConverterError::InvalidConfiguration(format!(
            "{} must be a positive number, got {}",
            name, value
        )))
    }
}

fn check_channel(channel: u8) -> Result<()> {
    if channel > MAX_CHANNEL_ID {
        return Err(ConverterError::InvalidConfiguration(format!(
            "channel {} outside 0-{}",
            channel, MAX_CHANNEL_ID
        )));
    }
    Ok(())
}

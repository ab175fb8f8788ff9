//! LabChart text exporter
//!
//! Renders interval sequences into the LabChart text import layout:
//!
//! ```text
//! Interval= 0.001953125
//! DateTime= 2019-04-16 10:42:10
//! TimeFormat=
//! ChannelTitle= 1
//! Range= 120.0
//! 0.000000	0.0000
//! 0.001953	-0.0018
//! ```
//!
//! ## Append semantics
//! Destinations are opened in append mode and the header is only written
//! to an empty file. Exporting twice to the same path therefore accumulates
//! data; callers that need a clean regeneration must delete the file first.

use crate::config::{DecimalSeparator, ExportConfig, TimeReference, TimeUnit, VoltageUnit};
use crate::glitch::glitch_filter;
use crate::types::{ChannelData, ExportRecord, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Full-scale count of the 16-bit ADC
const FULL_SCALE_COUNTS: f64 = 65536.0;

/// Convert a raw sample to millivolts
///
/// Counts map linearly onto the full-scale range centred on zero.
pub fn counts_to_millivolts(sample: u16, range_mv: f64) -> f64 {
    (f64::from(sample) / FULL_SCALE_COUNTS - 0.5) * range_mv
}

/// Fixed per-channel file name, `E<id>.txt`
pub fn channel_file_name(channel: u8) -> String {
    format!("E{}.txt", channel)
}

/// Number formatting and unit conversion for one export
#[derive(Debug, Clone)]
pub struct LabChartFormatter {
    config: ExportConfig,
}

impl LabChartFormatter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Convert a raw sample to millivolts with the configured range
    pub fn voltage_mv(&self, sample: u16) -> f64 {
        counts_to_millivolts(sample, self.config.range_mv)
    }

    /// Format a time in seconds in the configured unit
    pub fn format_time(&self, seconds: f64) -> String {
        let text = match self.config.time_unit {
            TimeUnit::Seconds => format!("{:.6}", seconds),
            TimeUnit::Milliseconds => format!("{:.3}", seconds * 1000.0),
        };
        self.localize(text)
    }

    /// Format a voltage given in millivolts in the configured unit
    pub fn format_voltage(&self, millivolts: f64) -> String {
        let text = match self.config.voltage_unit {
            VoltageUnit::Millivolts => format!("{:.4}", millivolts),
            VoltageUnit::Microvolts => format!("{:.1}", millivolts * 1000.0),
        };
        self.localize(text)
    }

    fn localize(&self, text: String) -> String {
        match self.config.decimal_separator {
            DecimalSeparator::Period => text,
            DecimalSeparator::Comma => text.replace('.', ","),
        }
    }

    /// The five header lines
    ///
    /// `sample_rate` is the spacing of the data lines that follow: the
    /// channel's own rate for a single-channel file, the grid rate for a
    /// merged one.
    pub fn header(&self, channels: &[u8], sample_rate: f64, creation: &str) -> String {
        let interval = match self.config.time_unit {
            TimeUnit::Seconds => 1.0 / sample_rate,
            TimeUnit::Milliseconds => 1000.0 / sample_rate,
        };
        let range = match self.config.voltage_unit {
            VoltageUnit::Millivolts => self.config.range_mv,
            VoltageUnit::Microvolts => self.config.range_mv * 1000.0,
        };
        let titles: Vec<String> = channels.iter().map(|c| c.to_string()).collect();

        format!(
            "Interval= {}\nDateTime= {}\nTimeFormat= \nChannelTitle= {}\nRange= {:.1}\n",
            interval,
            creation,
            titles.join(", "),
            range
        )
    }

    /// Build the time base for an export whose first sample is at `first_time`
    pub fn time_base(&self, first_time: f64, unix_start: Option<f64>) -> TimeBase {
        match self.config.time_reference {
            TimeReference::Relative => TimeBase { offset: -first_time },
            TimeReference::Absolute => {
                let start = unix_start.unwrap_or_else(|| {
                    log::warn!("Absolute time requested but recording start is unknown, using 0");
                    0.0
                });
                TimeBase { offset: start }
            }
        }
    }

    /// Render one channel's intervals as data lines, one string per interval
    pub fn render_intervals(&self, channel: &ChannelData, time_base: TimeBase) -> Vec<String> {
        let threshold = self.config.glitch_threshold;
        channel
            .intervals
            .iter()
            .map(|interval| {
                let samples = glitch_filter(&interval.samples, threshold);
                let mut block = String::with_capacity(samples.len() * 24);
                for (i, sample) in samples.iter().enumerate() {
                    let t = interval.start_time + i as f64 / channel.sample_rate;
                    block.push_str(&self.format_time(time_base.apply(t)));
                    block.push('\t');
                    block.push_str(&self.format_voltage(self.voltage_mv(*sample)));
                    block.push('\n');
                }
                block
            })
            .collect()
    }

    /// Render merged records as data lines
    pub fn render_record(&self, record: &ExportRecord, time_base: TimeBase) -> String {
        let mut line = self.format_time(time_base.apply(record.time));
        for value in &record.values {
            line.push('\t');
            line.push_str(&self.format_voltage(*value));
        }
        line.push('\n');
        line
    }
}

/// Shift applied to reconstructed times before formatting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBase {
    offset: f64,
}

impl TimeBase {
    pub fn apply(&self, seconds: f64) -> f64 {
        seconds + self.offset
    }
}

/// What an export call wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub lines_written: usize,
    pub header_written: bool,
}

/// Write one channel to `writer`
///
/// `header` is written first when given. Each interval is rendered fully
/// before it is written.
pub fn write_channel<W: Write>(
    writer: &mut W,
    formatter: &LabChartFormatter,
    channel: &ChannelData,
    header: Option<&str>,
    unix_start: Option<f64>,
) -> Result<ExportStats> {
    let mut stats = ExportStats::default();
    if let Some(header) = header {
        writer.write_all(header.as_bytes())?;
        stats.header_written = true;
    }

    let first_time = channel.first_time().unwrap_or(0.0);
    let time_base = formatter.time_base(first_time, unix_start);
    for block in formatter.render_intervals(channel, time_base) {
        writer.write_all(block.as_bytes())?;
    }
    stats.lines_written = channel.sample_count();
    Ok(stats)
}

/// Write merged records to `writer`
pub fn write_records<W: Write>(
    writer: &mut W,
    formatter: &LabChartFormatter,
    records: &[ExportRecord],
    header: Option<&str>,
    unix_start: Option<f64>,
) -> Result<ExportStats> {
    let mut stats = ExportStats::default();
    if let Some(header) = header {
        writer.write_all(header.as_bytes())?;
        stats.header_written = true;
    }

    let first_time = records.first().map(|r| r.time).unwrap_or(0.0);
    let time_base = formatter.time_base(first_time, unix_start);
    for record in records {
        writer.write_all(formatter.render_record(record, time_base).as_bytes())?;
    }
    stats.lines_written = records.len();
    Ok(stats)
}

/// Append one channel to the file at `path`, writing the header if the file is empty
pub fn export_channel(
    path: &Path,
    formatter: &LabChartFormatter,
    channel: &ChannelData,
    creation: &str,
    unix_start: Option<f64>,
) -> Result<ExportStats> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let header = if file.metadata()?.len() == 0 {
        Some(formatter.header(&[channel.channel_id], channel.sample_rate, creation))
    } else {
        log::debug!("Appending to existing export {:?}", path);
        None
    };

    let stats = write_channel(&mut file, formatter, channel, header.as_deref(), unix_start)?;
    file.flush()?;
    log::info!(
        "Exported {} samples for channel {} to {:?}",
        stats.lines_written,
        channel.channel_id,
        path
    );
    Ok(stats)
}

/// Append merged records to the file at `path`, writing the header if the file is empty
pub fn export_records(
    path: &Path,
    formatter: &LabChartFormatter,
    channels: &[u8],
    records: &[ExportRecord],
    creation: &str,
    unix_start: Option<f64>,
) -> Result<ExportStats> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let header = if file.metadata()?.len() == 0 {
        Some(formatter.header(channels, formatter.config().sample_rate, creation))
    } else {
        None
    };

    let stats = write_records(&mut file, formatter, records, header.as_deref(), unix_start)?;
    file.flush()?;
    log::info!(
        "Exported {} rows for {} channels to {:?}",
        stats.lines_written,
        channels.len(),
        path
    );
    Ok(stats)
}

/// Path of a channel file inside a recording's output directory
pub fn channel_path(recording_dir: &Path, channel: u8) -> PathBuf {
    recording_dir.join(channel_file_name(channel))
}

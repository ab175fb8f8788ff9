//! Raw sample dumps for inspection
//!
//! Writes a channel's raw 16-bit counts without unit conversion or glitch
//! filtering. Unlike LabChart exports, dumps replace any existing file.

use crate::types::{ChannelData, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Dump layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// One sample value per line
    #[default]
    Simple,
    /// `interval_time index value` with per-interval comment lines
    Detailed,
    /// Comma-separated with a column header
    Csv,
}

/// Options for a dump, also read from the `[dump]` table of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpOptions {
    #[serde(default)]
    pub format: DumpFormat,
    /// Write the `#` comment header (simple and detailed only)
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    /// Add a per-sample timestamp column (detailed and csv only)
    #[serde(default)]
    pub include_timestamps: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            format: DumpFormat::default(),
            include_metadata: true,
            include_timestamps: false,
        }
    }
}

impl DumpOptions {
    pub fn new(format: DumpFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn with_timestamps(mut self, include: bool) -> Self {
        self.include_timestamps = include;
        self
    }
}

/// Recording details shown in the comment header
#[derive(Debug, Clone, Copy)]
pub struct DumpSource<'a> {
    pub file: &'a str,
    pub creation: &'a str,
}

/// Write one channel's raw samples to `writer`, returning the sample count
pub fn write_dump<W: Write>(
    writer: &mut W,
    channel: &ChannelData,
    options: &DumpOptions,
    source: &DumpSource<'_>,
) -> Result<usize> {
    if options.include_metadata && options.format != DumpFormat::Csv {
        write_comment_header(writer, channel, options.format, source)?;
    }

    let rate = channel.sample_rate;
    match options.format {
        DumpFormat::Simple => {
            for interval in &channel.intervals {
                for sample in &interval.samples {
                    writeln!(writer, "{}", sample)?;
                }
            }
        }
        DumpFormat::Detailed => {
            for interval in &channel.intervals {
                writeln!(writer, "# Interval start: {:.6} seconds", interval.start_time)?;
                for (i, sample) in interval.samples.iter().enumerate() {
                    let time = if options.include_timestamps {
                        interval.start_time + i as f64 / rate
                    } else {
                        interval.start_time
                    };
                    writeln!(writer, "{:.6} {} {}", time, i, sample)?;
                }
            }
        }
        DumpFormat::Csv => {
            if options.include_timestamps {
                writeln!(writer, "timestamp,interval_time,sample_index,sample_value")?;
            } else {
                writeln!(writer, "interval_time,sample_index,sample_value")?;
            }
            for interval in &channel.intervals {
                for (i, sample) in interval.samples.iter().enumerate() {
                    if options.include_timestamps {
                        let time = interval.start_time + i as f64 / rate;
                        writeln!(writer, "{:.6},{:.6},{},{}", time, interval.start_time, i, sample)?;
                    } else {
                        writeln!(writer, "{:.6},{},{}", interval.start_time, i, sample)?;
                    }
                }
            }
        }
    }

    Ok(channel.sample_count())
}

fn write_comment_header<W: Write>(
    writer: &mut W,
    channel: &ChannelData,
    format: DumpFormat,
    source: &DumpSource<'_>,
) -> Result<()> {
    let (title, layout) = match format {
        DumpFormat::Detailed => (
            "# NDF to Text Conversion - Detailed Format",
            "# Format: [interval_time] [sample_index] [sample_value]",
        ),
        _ => (
            "# NDF to Text Conversion",
            "# Format: One sample value per line (16-bit integers)",
        ),
    };

    writeln!(writer, "{}", title)?;
    writeln!(writer, "# Source file: {}", source.file)?;
    writeln!(writer, "# Channel: {}", channel.channel_id)?;
    writeln!(writer, "# Creation date: {}", source.creation)?;
    writeln!(writer, "# Total intervals: {}", channel.intervals.len())?;
    writeln!(
        writer,
        "# Conversion date: {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(writer, "#")?;
    writeln!(writer, "{}", layout)?;
    writeln!(writer, "#")?;
    Ok(())
}

/// Dump one channel to `path`, replacing any existing file
pub fn dump_channel(
    path: &Path,
    channel: &ChannelData,
    options: &DumpOptions,
    source: &DumpSource<'_>,
) -> Result<usize> {
    let mut writer = BufWriter::new(File::create(path)?);
    let count = write_dump(&mut writer, channel, options, source)?;
    writer.flush()?;
    log::info!(
        "Dumped {} samples of channel {} to {:?}",
        count,
        channel.channel_id,
        path
    );
    Ok(count)
}

//! Auxiliary signal sources
//!
//! Plain signal files with no timing information: a text file with one
//! sample per line, or a raw stream of little-endian u16 values. Samples are
//! assumed contiguous at the given rate and split into fixed-length
//! intervals starting at time zero.

use crate::types::{ChannelData, Interval, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::path::Path;

/// Outcome of reading a text signal file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSignal {
    pub intervals: Vec<Interval>,
    /// Values outside 0..=65535 that were clamped
    pub clamped: usize,
    /// Non-comment lines that did not parse as a number
    pub skipped: usize,
}

impl TextSignal {
    /// Wrap the intervals as one channel's data
    pub fn into_channel(self, channel_id: u8, sample_rate: f64) -> ChannelData {
        ChannelData {
            channel_id,
            sample_rate,
            intervals: self.intervals,
        }
    }
}

/// Split a contiguous sample run into intervals of `interval_length` seconds
pub fn intervals_from_samples(values: &[u16], sample_rate: f64, interval_length: f64) -> Vec<Interval> {
    let per_interval = ((sample_rate * interval_length).round() as usize).max(1);
    values
        .chunks(per_interval)
        .enumerate()
        .map(|(i, chunk)| Interval::new((i * per_interval) as f64 / sample_rate, chunk.to_vec()))
        .collect()
}

/// Read a text file with one sample value per line
///
/// Blank lines and lines starting with `#` are ignored. Fractional values
/// are truncated towards zero.
pub fn read_text_signal(path: &Path, sample_rate: f64, interval_length: f64) -> Result<TextSignal> {
    let text = fs::read_to_string(path)?;
    let signal = parse_text_signal(&text, sample_rate, interval_length);

    if signal.clamped > 0 {
        log::warn!(
            "{:?}: {} values outside 0..=65535 were clamped",
            path,
            signal.clamped
        );
    }
    if signal.skipped > 0 {
        log::debug!("{:?}: skipped {} unparsable lines", path, signal.skipped);
    }
    Ok(signal)
}

fn parse_text_signal(text: &str, sample_rate: f64, interval_length: f64) -> TextSignal {
    let mut values = Vec::new();
    let mut clamped = 0;
    let mut skipped = 0;

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value = match line.parse::<f64>() {
            Ok(v) if v.is_finite() => v.trunc(),
            _ => {
                skipped += 1;
                continue;
            }
        };
        if value < 0.0 || value > f64::from(u16::MAX) {
            clamped += 1;
        }
        values.push(value.clamp(0.0, f64::from(u16::MAX)) as u16);
    }

    TextSignal {
        intervals: intervals_from_samples(&values, sample_rate, interval_length),
        clamped,
        skipped,
    }
}

/// Read a raw stream of little-endian u16 samples
///
/// An odd trailing byte is ignored.
pub fn read_binary_signal(path: &Path, sample_rate: f64, interval_length: f64) -> Result<Vec<Interval>> {
    let bytes = fs::read(path)?;
    if bytes.len() % 2 != 0 {
        log::warn!("{:?}: ignoring odd trailing byte", path);
    }

    let mut values = vec![0u16; bytes.len() / 2];
    LittleEndian::read_u16_into(&bytes[..values.len() * 2], &mut values);
    Ok(intervals_from_samples(&values, sample_rate, interval_length))
}

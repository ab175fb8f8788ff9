//! Core types for the NDF converter library
//!
//! This module defines the values that flow between the pipeline stages:
//! raw telemetry messages out of the decoder, intervals out of the timing
//! reconstructor, and merged export records out of the merger.

use std::fmt;

/// Result type for converter operations
pub type Result<T> = std::result::Result<T, ConverterError>;

/// Highest channel id a telemetry record may carry
pub const MAX_CHANNEL_ID: u8 = 15;

/// Channel id reserved for the reference clock
pub const CLOCK_CHANNEL: u8 = 0;

/// One decoded telemetry record
///
/// Transient: produced by the decoder and consumed by the reconstructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    /// Channel number (0 = reference clock, 1-15 = biosignal channels)
    pub channel_id: u8,
    /// Raw 16-bit ADC sample
    pub sample_value: u16,
    /// Device clock count at which the message was sent
    pub tick: u64,
}

impl RawMessage {
    /// Create a new raw message
    pub fn new(channel_id: u8, sample_value: u16, tick: u64) -> Self {
        Self {
            channel_id,
            sample_value,
            tick,
        }
    }

    /// True if this message belongs to the reference clock channel
    pub fn is_clock(&self) -> bool {
        self.channel_id == CLOCK_CHANNEL
    }
}

/// A contiguous, gap-free run of one channel's samples
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    /// Time of the first sample in seconds from the clock origin
    pub start_time: f64,
    /// Samples at the channel's nominal rate
    pub samples: Vec<u16>,
}

impl Interval {
    /// Create a new interval
    pub fn new(start_time: f64, samples: Vec<u16>) -> Self {
        Self {
            start_time,
            samples,
        }
    }

    /// Number of samples in the interval
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the interval holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time of the last sample, given the channel's sample rate
    pub fn end_time(&self, sample_rate: f64) -> f64 {
        if self.samples.is_empty() {
            return self.start_time;
        }
        self.start_time + (self.samples.len() - 1) as f64 / sample_rate
    }
}

/// Finalized interval sequence of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelData {
    /// Channel number
    pub channel_id: u8,
    /// Nominal sample rate in Hz
    pub sample_rate: f64,
    /// Intervals in increasing time order
    pub intervals: Vec<Interval>,
}

impl ChannelData {
    /// Total number of samples across all intervals
    pub fn sample_count(&self) -> usize {
        self.intervals.iter().map(Interval::len).sum()
    }

    /// True if the channel produced no samples
    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Time of the first sample, if any
    pub fn first_time(&self) -> Option<f64> {
        self.intervals
            .iter()
            .find(|i| !i.is_empty())
            .map(|i| i.start_time)
    }

    /// Time of the last sample, if any
    pub fn last_time(&self) -> Option<f64> {
        self.intervals
            .iter()
            .rev()
            .find(|i| !i.is_empty())
            .map(|i| i.end_time(self.sample_rate))
    }
}

/// One row of a merged multi-channel export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    /// Seconds from the clock origin
    pub time: f64,
    /// One voltage (mV) per requested channel, in request order
    pub values: Vec<f64>,
}

/// Errors that can occur during conversion
#[derive(Debug, thiserror::Error)]
pub enum ConverterError {
    #[error("Malformed record at byte offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: String },

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Channel {0} yielded no samples")]
    EmptyChannel(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No channels with data to export")]
    NoChannels,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single record was rejected by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFault {
    /// Channel id outside 0-15
    InvalidChannel(u8),
    /// Fewer bytes remain than one record needs
    Truncated { available: usize, required: usize },
}

impl fmt::Display for RecordFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFault::InvalidChannel(id) => write!(f, "channel id {} outside 0-15", id),
            RecordFault::Truncated {
                available,
                required,
            } => write!(
                f,
                "trailing partial record ({} of {} bytes)",
                available, required
            ),
        }
    }
}

impl RecordFault {
    /// Attach a byte offset and turn the fault into a converter error
    pub fn at(self, offset: usize) -> ConverterError {
        ConverterError::MalformedRecord {
            offset,
            reason: self.to_string(),
        }
    }
}

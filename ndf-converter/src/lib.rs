//! NDF Converter Library
//!
//! Converts NDF telemetry recordings (multi-channel biosignal samples
//! interleaved with a device clock) into LabChart text files.
//!
//! # Architecture
//!
//! The pipeline runs leaves first:
//! - Decodes fixed-size telemetry records into raw messages
//! - Builds a clock model from channel 0 and reconstructs per-channel timing
//! - Splits each channel into gap-free intervals, never fabricating samples
//! - Suppresses isolated single-sample glitches
//! - Exports one file per channel, or merges channels on a common time base
//! - Groups `M<unix seconds>.ndf` archives into recording sessions
//!
//! The library does NOT walk directories, run batches or report progress.
//! That is the job of the application layer (ndf-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use ndf_converter::{ExportConfig, Recording, TimeUnit};
//! use std::path::Path;
//!
//! let recording = Recording::open(Path::new("M1555404530.ndf")).unwrap();
//!
//! let config = ExportConfig::new()
//!     .with_sample_rate(512.0)
//!     .with_time_unit(TimeUnit::Milliseconds)
//!     .with_channels(vec![1, 2]);
//!
//! let mut run = recording.convert(&config).unwrap();
//! run.export_channels(Path::new("labchart")).unwrap();
//!
//! let merged = run.merged_path(Path::new("labchart"));
//! run.export_merged(&merged, None).unwrap();
//!
//! println!("{:?}", run.summary());
//! ```

// Public modules
pub mod clock;
pub mod config;
pub mod decoder;
pub mod dump;
pub mod export;
pub mod formats;
pub mod glitch;
pub mod merge;
pub mod reconstruct;
pub mod recording;
pub mod session;
pub mod sources;
pub mod types;

// Re-export main types for convenience
pub use clock::ClockModel;
pub use config::{
    DecimalSeparator, ExportConfig, TimeReference, TimeUnit, TimingConfig, VoltageUnit,
};
pub use decoder::{decode_all, DecodeOutcome, MessageDecoder};
pub use dump::{DumpFormat, DumpOptions};
pub use export::LabChartFormatter;
pub use formats::{BigEndianLayout, LittleEndianLayout, RecordLayout, RecordingMetadata};
pub use merge::{merge_channels, MergeOutcome};
pub use recording::{ConversionRun, ConversionSummary, Recording};
pub use session::{group_sessions, Archive, Session, DEFAULT_SESSION_GAP};
pub use types::{ChannelData, ConverterError, ExportRecord, Interval, RawMessage, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

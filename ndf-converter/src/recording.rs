//! One recording, end to end
//!
//! [`Recording`] wraps a loaded NDF container. [`Recording::convert`] runs
//! decoding, clock modelling and channel reconstruction once and returns a
//! [`ConversionRun`] holding the finished channels. Exports and dumps are
//! then written from that run as often as needed.

use crate::clock::ClockModel;
use crate::config::{ExportConfig, TimingConfig};
use crate::decoder::decode_all;
use crate::dump::{dump_channel, DumpOptions, DumpSource};
use crate::export::{channel_path, export_channel, export_records, LabChartFormatter};
use crate::formats::container::parse_archive_name;
use crate::formats::{DefaultLayout, NdfContainer, RecordLayout, RecordingMetadata};
use crate::merge::merge_channels;
use crate::reconstruct::{reconstruct_all, ChannelReport};
use crate::types::{ChannelData, ConverterError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A loaded recording whose records use layout `L`
#[derive(Debug, Clone)]
pub struct Recording<L: RecordLayout = DefaultLayout> {
    name: String,
    container: NdfContainer,
    _layout: PhantomData<L>,
}

impl Recording {
    /// Open an NDF file with the default record layout
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_layout(path)
    }

    /// Parse an in-memory NDF image with the default record layout
    ///
    /// `name` is the file name or stem the image came from. An archive
    /// name such as `M1555404530.ndf` supplies the recording start time.
    pub fn from_bytes(bytes: Vec<u8>, name: &str) -> Result<Self> {
        Self::from_bytes_with_layout(bytes, name)
    }
}

impl<L: RecordLayout> Recording<L> {
    pub fn open_with_layout(path: &Path) -> Result<Self> {
        let container = NdfContainer::open::<L>(path)?;
        Ok(Self {
            name: stem_of(path),
            container,
            _layout: PhantomData,
        })
    }

    pub fn from_bytes_with_layout(bytes: Vec<u8>, name: &str) -> Result<Self> {
        let mut container = NdfContainer::parse::<L>(bytes)?;
        let stem = stem_of(Path::new(name));
        container.metadata_mut().name_timestamp = parse_archive_name(&stem);
        Ok(Self {
            name: stem,
            container,
            _layout: PhantomData,
        })
    }

    /// Recording name (file stem), used for the output directory
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &RecordingMetadata {
        self.container.metadata()
    }

    /// Seconds of device time covered by the recording's messages
    ///
    /// `None` when no record decodes.
    pub fn duration(&self, timing: &TimingConfig) -> Option<f64> {
        let metadata = self.container.metadata();
        let outcome = decode_all::<L>(self.container.telemetry(), metadata.data_offset);
        let clock = ClockModel::from_messages(&outcome.messages, timing);
        clock.span(&outcome.messages)
    }

    /// Decode, model the clock and reconstruct the selected channels
    ///
    /// Fails only on an invalid configuration. Malformed records and a
    /// truncated tail are counted in the summary and conversion goes on.
    pub fn convert(&self, config: &ExportConfig) -> Result<ConversionRun> {
        config.validate()?;
        log::info!("Converting {} ({} layout)", self.name, L::NAME);

        let metadata = self.container.metadata().clone();
        let outcome = decode_all::<L>(self.container.telemetry(), metadata.data_offset);
        for error in outcome.errors.iter().take(10) {
            log::debug!("{}", error);
        }
        if !outcome.errors.is_empty() {
            log::warn!(
                "{}: rejected {} malformed records",
                self.name,
                outcome.errors.len()
            );
        }

        let clock = ClockModel::from_messages(&outcome.messages, &config.timing);
        let reconstruction = reconstruct_all(&outcome.messages, &clock, config);

        let empty_channels: Vec<u8> = reconstruction
            .channels
            .iter()
            .filter(|(_, data)| data.is_empty())
            .map(|(id, _)| *id)
            .collect();

        let summary = ConversionSummary {
            recording: self.name.clone(),
            creation: metadata.creation_label(),
            data_offset: metadata.data_offset,
            messages_decoded: outcome.messages.len(),
            malformed_records: outcome.errors.len(),
            truncated_at: outcome.truncated_at,
            clock_discontinuities: clock.discontinuities(),
            synthetic_clock: clock.is_synthetic(),
            duration: clock.span(&outcome.messages),
            channels: reconstruction.reports,
            empty_channels,
            ..Default::default()
        };

        Ok(ConversionRun {
            name: self.name.clone(),
            metadata,
            formatter: LabChartFormatter::new(config.clone()),
            channels: reconstruction.channels,
            summary,
        })
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recording")
        .to_string()
}

/// Counts gathered while converting and exporting one recording
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionSummary {
    pub recording: String,
    pub creation: String,
    pub data_offset: usize,
    pub messages_decoded: usize,
    pub malformed_records: usize,
    /// Offset of a discarded trailing partial record
    pub truncated_at: Option<usize>,
    pub clock_discontinuities: usize,
    /// No clock messages were found
    pub synthetic_clock: bool,
    /// Seconds of device time covered, if any record decoded
    pub duration: Option<f64>,
    /// Session the recording was grouped into, when grouping is on
    pub session: Option<String>,
    /// Reconstruction diagnostics per channel
    pub channels: BTreeMap<u8, ChannelReport>,
    /// Selected channels that ended up with no samples
    pub empty_channels: Vec<u8>,
    pub files_written: Vec<PathBuf>,
    pub lines_written: usize,
    /// Merged rows skipped for missing coverage, in total and per channel
    pub merge_rows_dropped: usize,
    pub merge_dropped_per_channel: BTreeMap<u8, usize>,
    pub merge_excluded: Vec<u8>,
}

/// Finished channels of one recording, ready for export
#[derive(Debug, Clone)]
pub struct ConversionRun {
    name: String,
    metadata: RecordingMetadata,
    formatter: LabChartFormatter,
    channels: BTreeMap<u8, ChannelData>,
    summary: ConversionSummary,
}

impl ConversionRun {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &ExportConfig {
        self.formatter.config()
    }

    /// All reconstructed channels, including empty ones
    pub fn channels(&self) -> &BTreeMap<u8, ChannelData> {
        &self.channels
    }

    /// A channel with at least one sample
    pub fn channel(&self, id: u8) -> Result<&ChannelData> {
        match self.channels.get(&id) {
            Some(data) if !data.is_empty() => Ok(data),
            _ => Err(ConverterError::EmptyChannel(id)),
        }
    }

    pub fn summary(&self) -> &ConversionSummary {
        &self.summary
    }

    pub fn into_summary(self) -> ConversionSummary {
        self.summary
    }

    /// Directory that receives this recording's per-channel files
    pub fn output_dir(&self, out_root: &Path) -> PathBuf {
        out_root.join(&self.name)
    }

    fn non_empty(&self) -> Vec<&ChannelData> {
        self.channels.values().filter(|d| !d.is_empty()).collect()
    }

    /// Append every non-empty channel to `<out_root>/<name>/E<id>.txt`
    pub fn export_channels(&mut self, out_root: &Path) -> Result<Vec<PathBuf>> {
        let dir = self.output_dir(out_root);
        fs::create_dir_all(&dir)?;

        let creation = self.metadata.creation_label();
        let unix_start = self.metadata.unix_start();
        let mut written = Vec::new();
        let mut lines = 0;

        for data in self.non_empty() {
            let path = channel_path(&dir, data.channel_id);
            let stats = export_channel(&path, &self.formatter, data, &creation, unix_start)?;
            lines += stats.lines_written;
            written.push(path);
        }

        if written.is_empty() {
            return Err(ConverterError::NoChannels);
        }

        self.summary.lines_written += lines;
        self.summary.files_written.extend(written.iter().cloned());
        Ok(written)
    }

    /// Append the channels merged on one time base to `path`
    ///
    /// `channels` gives the column order; `None` takes every channel with
    /// samples in ascending id order.
    pub fn export_merged(&mut self, path: &Path, channels: Option<&[u8]>) -> Result<PathBuf> {
        let requested: Vec<u8> = match channels {
            Some(ids) => ids.to_vec(),
            None => self.non_empty().iter().map(|d| d.channel_id).collect(),
        };

        let outcome = merge_channels(&requested, &self.channels, self.formatter.config())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stats = export_records(
            path,
            &self.formatter,
            &outcome.channels,
            &outcome.records,
            &self.metadata.creation_label(),
            self.metadata.unix_start(),
        )?;

        self.summary.lines_written += stats.lines_written;
        self.summary.merge_rows_dropped += outcome.rows_dropped;
        for (id, dropped) in outcome.dropped_per_channel {
            *self.summary.merge_dropped_per_channel.entry(id).or_default() += dropped;
        }
        self.summary.merge_excluded.extend(outcome.excluded);
        self.summary.files_written.push(path.to_path_buf());
        Ok(path.to_path_buf())
    }

    /// Default merged export path, `<out_root>/<name>/<name>_merged.txt`
    pub fn merged_path(&self, out_root: &Path) -> PathBuf {
        self.output_dir(out_root)
            .join(format!("{}_merged.txt", self.name))
    }

    /// Write raw dumps of every non-empty channel, replacing old dumps
    pub fn dump_channels(&mut self, out_root: &Path, options: &DumpOptions) -> Result<Vec<PathBuf>> {
        let dir = self.output_dir(out_root);
        fs::create_dir_all(&dir)?;

        let creation = self.metadata.creation_label();
        let file = format!("{}.ndf", self.name);
        let source = DumpSource {
            file: &file,
            creation: &creation,
        };

        let mut written = Vec::new();
        let mut lines = 0;
        for data in self.non_empty() {
            let path = channel_path(&dir, data.channel_id);
            lines += dump_channel(&path, data, options, &source)?;
            written.push(path);
        }

        if written.is_empty() {
            return Err(ConverterError::NoChannels);
        }

        self.summary.lines_written += lines;
        self.summary.files_written.extend(written.iter().cloned());
        Ok(written)
    }
}

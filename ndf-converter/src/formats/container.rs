//! NDF container reader
//!
//! An NDF recording starts with a metadata preamble followed by a contiguous
//! run of telemetry records. The preamble length depends on the recording
//! tool version, so the start of the telemetry section is probed instead of
//! read from a fixed offset.
//!
//! ## Preamble
//! - bytes 0..4: magic `" ndf"`
//! - bytes 4..16: three little-endian u32 header values
//! - somewhere in the first 1024 bytes: a metadata text block from `<c>` to
//!   `</payload>` carrying `Date Created:` and `Creator:` fields

use super::RecordLayout;
use crate::types::{ConverterError, Result};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::path::Path;

/// Expected magic bytes at the start of an NDF file
pub const NDF_MAGIC: &[u8; 4] = b" ndf";

/// Offsets at which the telemetry section is searched, in order
pub const CANDIDATE_OFFSETS: [usize; 7] = [512, 1024, 2048, 4096, 8192, 16384, 20480];

/// Offset assumed when no candidate validates
pub const FALLBACK_DATA_OFFSET: usize = 20480;

const PREAMBLE_SCAN: usize = 1024;
const MIN_NON_ZERO: usize = 100;
const PROBE_RECORDS: usize = 10;
const MIN_VALID_RECORDS: usize = 5;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%d-%b-%Y %H:%M:%S", "%a %b %d %H:%M:%S %Y"];

/// Metadata extracted from the container preamble
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingMetadata {
    /// True if the file starts with the NDF magic
    pub magic_ok: bool,
    /// The three u32 values following the magic
    pub header_values: [u32; 3],
    /// Raw metadata text block, if present
    pub raw_metadata: Option<String>,
    /// `Date Created:` field as written in the file
    pub created_text: Option<String>,
    /// Parsed creation date
    pub created: Option<NaiveDateTime>,
    /// `Creator:` field
    pub creator: Option<String>,
    /// Recording start encoded in the archive name (`M<unix seconds>.ndf`)
    pub name_timestamp: Option<i64>,
    /// Byte offset of the first telemetry record
    pub data_offset: usize,
}

impl RecordingMetadata {
    /// UNIX time (seconds) of the recording start, if known
    ///
    /// The archive name wins over the metadata text since it carries the
    /// exact second the recorder opened the file.
    pub fn unix_start(&self) -> Option<f64> {
        if let Some(secs) = self.name_timestamp {
            return Some(secs as f64);
        }
        self.created.map(|dt| dt.and_utc().timestamp() as f64)
    }

    /// Creation timestamp for export headers
    pub fn creation_label(&self) -> String {
        if let Some(text) = &self.created_text {
            return text.clone();
        }
        self.name_timestamp
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// A loaded NDF file: preamble metadata plus the whole byte buffer
#[derive(Debug, Clone)]
pub struct NdfContainer {
    bytes: Vec<u8>,
    metadata: RecordingMetadata,
}

impl NdfContainer {
    /// Read and parse an NDF file from disk
    pub fn open<L: RecordLayout>(path: &Path) -> Result<Self> {
        log::info!("Reading NDF file: {:?}", path);
        let bytes = fs::read(path)?;
        let mut container = Self::parse::<L>(bytes)?;
        container.metadata.name_timestamp = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(parse_archive_name);
        Ok(container)
    }

    /// Parse an in-memory NDF image
    pub fn parse<L: RecordLayout>(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(ConverterError::MalformedContainer(format!(
                "file too short for an NDF preamble ({} bytes)",
                bytes.len()
            )));
        }

        let mut metadata = RecordingMetadata {
            magic_ok: &bytes[0..4] == NDF_MAGIC,
            ..Default::default()
        };
        if !metadata.magic_ok {
            log::warn!("Unexpected magic bytes: {:?}", &bytes[0..4]);
        }

        LittleEndian::read_u32_into(&bytes[4..16], &mut metadata.header_values);
        parse_metadata_text(&bytes[..bytes.len().min(PREAMBLE_SCAN)], &mut metadata);

        metadata.data_offset = find_data_section::<L>(&bytes)?;
        log::debug!("Telemetry starts at offset {}", metadata.data_offset);

        Ok(Self { bytes, metadata })
    }

    /// Preamble metadata
    pub fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    /// Mutable access, used to attach information known only to the caller
    pub fn metadata_mut(&mut self) -> &mut RecordingMetadata {
        &mut self.metadata
    }

    /// The telemetry section (everything after the preamble)
    pub fn telemetry(&self) -> &[u8] {
        &self.bytes[self.metadata.data_offset..]
    }

    /// Total file size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the file holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Extract the `<c>...</payload>` block and its fields
fn parse_metadata_text(preamble: &[u8], metadata: &mut RecordingMetadata) {
    let start = match find(preamble, b"<c>") {
        Some(s) => s,
        None => return,
    };
    let end = match find(&preamble[start..], b"</payload>") {
        Some(e) => start + e + b"</payload>".len(),
        None => return,
    };

    let text: String = preamble[start..end]
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect();

    metadata.created_text = field(&text, "Date Created:");
    metadata.creator = field(&text, "Creator:");
    metadata.created = metadata.created_text.as_deref().and_then(parse_date);
    if metadata.created_text.is_some() && metadata.created.is_none() {
        log::warn!("Could not parse creation date {:?}", metadata.created_text);
    }
    metadata.raw_metadata = Some(text);
}

/// Value after `label`, up to the next period
fn field(text: &str, label: &str) -> Option<String> {
    let start = text.find(label)? + label.len();
    let end = start + text[start..].find('.')?;
    let value = text[start..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Digits in an archive name's UNIX timestamp
const ARCHIVE_DIGITS: usize = 10;

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// UNIX seconds from an archive name such as `M1555404530`
///
/// The name must be `M` followed by exactly ten digits.
pub fn parse_archive_name(stem: &str) -> Option<i64> {
    let digits = stem.strip_prefix('M')?;
    if digits.len() != ARCHIVE_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Probe candidate offsets for the first telemetry record
fn find_data_section<L: RecordLayout>(bytes: &[u8]) -> Result<usize> {
    for &offset in CANDIDATE_OFFSETS.iter() {
        if offset >= bytes.len() {
            continue;
        }

        let window = &bytes[offset..bytes.len().min(offset + PREAMBLE_SCAN)];
        let non_zero = window.iter().filter(|&&b| b != 0).count();
        if non_zero > MIN_NON_ZERO && looks_like_telemetry::<L>(&bytes[offset..]) {
            return Ok(offset);
        }
    }

    if FALLBACK_DATA_OFFSET <= bytes.len() {
        log::warn!(
            "Could not find telemetry data section, assuming offset {}",
            FALLBACK_DATA_OFFSET
        );
        return Ok(FALLBACK_DATA_OFFSET);
    }

    Err(ConverterError::MalformedContainer(
        "no telemetry data section found".to_string(),
    ))
}

/// True if most of the first records decode with a valid channel id
fn looks_like_telemetry<L: RecordLayout>(region: &[u8]) -> bool {
    let valid = region
        .chunks_exact(L::RECORD_SIZE)
        .take(PROBE_RECORDS)
        .filter(|record| record.iter().any(|&b| b != 0))
        .filter(|record| L::decode(record).is_ok())
        .count();
    valid >= MIN_VALID_RECORDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::encode_messages;
    use crate::formats::BigEndianLayout;
    use crate::types::RawMessage;

    fn image(data_offset: usize, metadata: &str) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NDF_MAGIC);
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(metadata.as_bytes());
        bytes.resize(data_offset, 0);

        let messages: Vec<_> = (0..200)
            .map(|i| RawMessage::new((i % 3) as u8, 30000 + i as u16, 1000 + 64 * i as u64))
            .collect();
        bytes.extend(encode_messages::<BigEndianLayout>(&messages));
        bytes
    }

    #[test]
    fn test_parse_metadata_and_offset() {
        let bytes = image(
            2048,
            "<c>Date Created: 2019-04-16 10:42:10. Creator: Neuroplayer.</c></payload>",
        );
        let container = NdfContainer::parse::<BigEndianLayout>(bytes).unwrap();
        let meta = container.metadata();

        assert!(meta.magic_ok);
        assert_eq!(meta.data_offset, 2048);
        assert_eq!(meta.created_text.as_deref(), Some("2019-04-16 10:42:10"));
        assert_eq!(meta.creator.as_deref(), Some("Neuroplayer"));
        assert_eq!(meta.unix_start(), Some(1555411330.0));
        assert_eq!(container.telemetry().len(), 200 * 8);
    }

    #[test]
    fn test_unparsable_date() {
        let bytes = image(512, "<c>Date Created: yesterday.</c></payload>");
        let container = NdfContainer::parse::<BigEndianLayout>(bytes).unwrap();
        assert_eq!(container.metadata().created, None);
        assert_eq!(container.metadata().creation_label(), "yesterday");
    }

    #[test]
    fn test_too_short() {
        let result = NdfContainer::parse::<BigEndianLayout>(vec![0; 8]);
        assert!(matches!(result, Err(ConverterError::MalformedContainer(_))));
    }

    #[test]
    fn test_no_telemetry_found() {
        let mut bytes = NDF_MAGIC.to_vec();
        bytes.resize(4096, 0);
        let result = NdfContainer::parse::<BigEndianLayout>(bytes);
        assert!(matches!(result, Err(ConverterError::MalformedContainer(_))));
    }

    #[test]
    fn test_fallback_offset() {
        let mut bytes = NDF_MAGIC.to_vec();
        bytes.resize(FALLBACK_DATA_OFFSET + 64, 0);
        let container = NdfContainer::parse::<BigEndianLayout>(bytes).unwrap();
        assert_eq!(container.metadata().data_offset, FALLBACK_DATA_OFFSET);
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(parse_archive_name("M1555404530"), Some(1555404530));
        assert_eq!(parse_archive_name("recording"), None);
        assert_eq!(parse_archive_name("M12"), None);
        assert_eq!(parse_archive_name("M155540453"), None);
        assert_eq!(parse_archive_name("M15554045301"), None);
        assert_eq!(parse_archive_name("M155540453x"), None);
        assert_eq!(parse_archive_name("m1555404530"), None);
    }

    #[test]
    fn test_creation_label_from_name() {
        let meta = RecordingMetadata {
            name_timestamp: Some(0),
            ..Default::default()
        };
        assert_eq!(meta.creation_label(), "1970-01-01 00:00:00");
        assert_eq!(RecordingMetadata::default().creation_label(), "Unknown");
    }
}

//! Telemetry message decoder
//!
//! Turns a buffer of fixed-size telemetry records into a lazy stream of
//! [`RawMessage`] values. Bad records are reported as errors in the stream
//! instead of aborting it: a record with an invalid channel id is skipped on
//! its own, and a trailing partial record (a recording stopped mid-write)
//! ends the stream after every complete record has been returned.

use crate::formats::{DefaultLayout, RecordLayout};
use crate::types::{ConverterError, RawMessage, RecordFault, Result};
use std::marker::PhantomData;

/// Lazy decoder over a borrowed record buffer
///
/// Finite and not restartable: callers needing a second pass create a new
/// decoder over the same buffer.
pub struct MessageDecoder<'a, L: RecordLayout = DefaultLayout> {
    buffer: &'a [u8],
    position: usize,
    /// Offset of the first record, used to report absolute byte offsets
    base_offset: usize,
    finished: bool,
    _layout: PhantomData<L>,
}

impl<'a, L: RecordLayout> MessageDecoder<'a, L> {
    /// Create a decoder over `buffer`
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_base_offset(buffer, 0)
    }

    /// Create a decoder whose reported offsets start at `base_offset`
    ///
    /// Used when `buffer` is the telemetry section of a larger file.
    pub fn with_base_offset(buffer: &'a [u8], base_offset: usize) -> Self {
        Self {
            buffer,
            position: 0,
            base_offset,
            finished: false,
            _layout: PhantomData,
        }
    }

    /// Number of whole records in the buffer
    pub fn record_count(&self) -> usize {
        self.buffer.len() / L::RECORD_SIZE
    }
}

impl<'a, L: RecordLayout> Iterator for MessageDecoder<'a, L> {
    type Item = Result<RawMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let remaining = self.buffer.len() - self.position;
        if remaining == 0 {
            self.finished = true;
            return None;
        }

        let offset = self.base_offset + self.position;

        if remaining < L::RECORD_SIZE {
            // Only the partial tail is discarded
            self.finished = true;
            self.position = self.buffer.len();
            log::warn!(
                "Discarding trailing partial record at offset {} ({} bytes)",
                offset,
                remaining
            );
            return Some(Err(RecordFault::Truncated {
                available: remaining,
                required: L::RECORD_SIZE,
            }
            .at(offset)));
        }

        let record = &self.buffer[self.position..self.position + L::RECORD_SIZE];
        self.position += L::RECORD_SIZE;

        match L::decode(record) {
            Ok(message) => Some(Ok(message)),
            Err(fault) => {
                log::debug!("Rejected record at offset {}: {}", offset, fault);
                Some(Err(fault.at(offset)))
            }
        }
    }
}

/// All messages of a buffer plus the records that were rejected
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    /// Successfully decoded messages in arrival order
    pub messages: Vec<RawMessage>,
    /// One `MalformedRecord` per rejected record
    pub errors: Vec<ConverterError>,
    /// Offset of the discarded trailing partial record, if any
    pub truncated_at: Option<usize>,
}

impl DecodeOutcome {
    /// True if the buffer ended with a partial record
    pub fn truncated(&self) -> bool {
        self.truncated_at.is_some()
    }
}

/// Decode a whole buffer, collecting messages and rejected records
pub fn decode_all<L: RecordLayout>(buffer: &[u8], base_offset: usize) -> DecodeOutcome {
    let mut outcome = DecodeOutcome {
        messages: Vec::with_capacity(buffer.len() / L::RECORD_SIZE),
        errors: Vec::new(),
        truncated_at: None,
    };

    let tail = buffer.len() % L::RECORD_SIZE;
    if tail != 0 {
        outcome.truncated_at = Some(base_offset + buffer.len() - tail);
    }

    for item in MessageDecoder::<L>::with_base_offset(buffer, base_offset) {
        match item {
            Ok(message) => outcome.messages.push(message),
            Err(e) => outcome.errors.push(e),
        }
    }

    log::debug!(
        "Decoded {} messages, rejected {} records",
        outcome.messages.len(),
        outcome.errors.len()
    );
    outcome
}

/// Encode one message into a freshly allocated record
pub fn encode_record<L: RecordLayout>(message: &RawMessage) -> Vec<u8> {
    let mut out = vec![0u8; L::RECORD_SIZE];
    L::encode(message, &mut out);
    out
}

/// Encode a sequence of messages into a contiguous record buffer
pub fn encode_messages<L: RecordLayout>(messages: &[RawMessage]) -> Vec<u8> {
    let mut out = vec![0u8; messages.len() * L::RECORD_SIZE];
    for (message, chunk) in messages.iter().zip(out.chunks_exact_mut(L::RECORD_SIZE)) {
        L::encode(message, chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{BigEndianLayout, LittleEndianLayout};

    fn sample_messages() -> Vec<RawMessage> {
        vec![
            RawMessage::new(0, 100, 256),
            RawMessage::new(1, 32768, 300),
            RawMessage::new(15, 65535, 1 << 39),
        ]
    }

    #[test]
    fn test_decode_valid_buffer() {
        let buf = encode_messages::<BigEndianLayout>(&sample_messages());
        let decoded: Vec<_> = MessageDecoder::<BigEndianLayout>::new(&buf)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(decoded, sample_messages());
    }

    fn assert_round_trip<L: RecordLayout>() {
        let buf = encode_messages::<L>(&sample_messages());
        let outcome = decode_all::<L>(&buf, 0);
        assert!(outcome.errors.is_empty());
        assert_eq!(encode_messages::<L>(&outcome.messages), buf);
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        assert_round_trip::<BigEndianLayout>();
        assert_round_trip::<LittleEndianLayout>();
    }

    #[test]
    fn test_trailing_partial_record() {
        let mut buf = encode_messages::<BigEndianLayout>(&sample_messages());
        buf.extend_from_slice(&[1, 2, 3]);

        let items: Vec<_> = MessageDecoder::<BigEndianLayout>::with_base_offset(&buf, 100).collect();
        assert_eq!(items.len(), 4);
        assert!(items[..3].iter().all(|i| i.is_ok()));
        match &items[3] {
            Err(ConverterError::MalformedRecord { offset, .. }) => assert_eq!(*offset, 124),
            other => panic!("expected MalformedRecord, got {:?}", other),
        }

        let outcome = decode_all::<BigEndianLayout>(&buf, 0);
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.truncated_at, Some(24));
    }

    #[test]
    fn test_invalid_channel_skips_one_record() {
        let mut buf = encode_messages::<BigEndianLayout>(&sample_messages());
        buf[8] = 0x42; // second record's channel id

        let outcome = decode_all::<BigEndianLayout>(&buf, 0);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(!outcome.truncated());
        match &outcome.errors[0] {
            ConverterError::MalformedRecord { offset, .. } => assert_eq!(*offset, 8),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_decoder_is_exhausted_after_one_pass() {
        let buf = encode_messages::<BigEndianLayout>(&sample_messages());
        let mut decoder = MessageDecoder::<BigEndianLayout>::new(&buf);
        assert_eq!(decoder.record_count(), 3);
        assert_eq!(decoder.by_ref().count(), 3);
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(MessageDecoder::<BigEndianLayout>::new(&[]).count(), 0);
    }

    #[test]
    fn test_encode_record_size() {
        let record = encode_record::<BigEndianLayout>(&RawMessage::new(2, 1, 2));
        assert_eq!(record, vec![2, 0, 1, 0, 0, 0, 0, 2]);
    }
}

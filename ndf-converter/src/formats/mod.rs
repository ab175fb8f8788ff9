//! Device record layouts and the NDF container
//!
//! Each supported transmitter family implements [`RecordLayout`] once. The
//! decoder and the container probe are generic over the layout, so adding a
//! family never touches the core algorithm.

use crate::types::{RawMessage, RecordFault, MAX_CHANNEL_ID};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::marker::PhantomData;

pub mod container;

pub use container::{NdfContainer, RecordingMetadata};

/// Byte layout of one fixed-size telemetry record
pub trait RecordLayout {
    /// Size of one record in bytes
    const RECORD_SIZE: usize;

    /// Short human-readable family name
    const NAME: &'static str;

    /// Decode exactly one record
    ///
    /// `record` is always `RECORD_SIZE` bytes long.
    fn decode(record: &[u8]) -> Result<RawMessage, RecordFault>;

    /// Encode one message into `out` (`RECORD_SIZE` bytes)
    ///
    /// Fields wider than the record's fields wrap: the device counter is
    /// modular, so only the low tick bits are stored.
    fn encode(message: &RawMessage, out: &mut [u8]);
}

/// Eight-byte record: channel id, 16-bit sample, 40-bit tick
///
/// ```text
/// byte   0      1..3         3..8
///      [chan] [sample u16] [tick u40]
/// ```
///
/// The sample and tick fields use byte order `E`. Ticks above [`MAX_TICK`]
/// are stored modulo 2^40 by `encode`.
#[derive(Debug, Clone, Copy)]
pub struct Compact8<E: ByteOrder> {
    _order: PhantomData<E>,
}

/// Big-endian eight-byte family (the default)
pub type BigEndianLayout = Compact8<BigEndian>;

/// Little-endian eight-byte family
pub type LittleEndianLayout = Compact8<LittleEndian>;

/// Layout used when a caller does not name one
pub type DefaultLayout = BigEndianLayout;

const TICK_BYTES: usize = 5;

/// Largest tick representable by the 40-bit field
pub const MAX_TICK: u64 = (1 << (TICK_BYTES * 8)) - 1;

impl<E: ByteOrder> RecordLayout for Compact8<E> {
    const RECORD_SIZE: usize = 8;
    const NAME: &'static str = "compact8";

    fn decode(record: &[u8]) -> Result<RawMessage, RecordFault> {
        if record.len() < Self::RECORD_SIZE {
            return Err(RecordFault::Truncated {
                available: record.len(),
                required: Self::RECORD_SIZE,
            });
        }

        let channel_id = record[0];
        if channel_id > MAX_CHANNEL_ID {
            return Err(RecordFault::InvalidChannel(channel_id));
        }

        let sample_value = E::read_u16(&record[1..3]);
        let tick = E::read_uint(&record[3..8], TICK_BYTES);

        Ok(RawMessage {
            channel_id,
            sample_value,
            tick,
        })
    }

    fn encode(message: &RawMessage, out: &mut [u8]) {
        out[0] = message.channel_id;
        E::write_u16(&mut out[1..3], message.sample_value);
        E::write_uint(&mut out[3..8], message.tick & MAX_TICK, TICK_BYTES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_big_endian() {
        let record = [0x03, 0x80, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03];
        let msg = BigEndianLayout::decode(&record).unwrap();
        assert_eq!(msg, RawMessage::new(3, 32768, 0x010203));
    }

    #[test]
    fn test_decode_little_endian() {
        let record = [0x03, 0x00, 0x80, 0x03, 0x02, 0x01, 0x00, 0x00];
        let msg = LittleEndianLayout::decode(&record).unwrap();
        assert_eq!(msg, RawMessage::new(3, 32768, 0x010203));
    }

    #[test]
    fn test_decode_invalid_channel() {
        let record = [0x10, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            BigEndianLayout::decode(&record),
            Err(RecordFault::InvalidChannel(16))
        );
    }

    #[test]
    fn test_decode_short_record() {
        assert_eq!(
            BigEndianLayout::decode(&[1, 2, 3]),
            Err(RecordFault::Truncated {
                available: 3,
                required: 8
            })
        );
    }

    #[test]
    fn test_encode_matches_decode() {
        let msg = RawMessage::new(15, 0xBEEF, MAX_TICK);
        let mut out = [0u8; 8];
        LittleEndianLayout::encode(&msg, &mut out);
        assert_eq!(LittleEndianLayout::decode(&out).unwrap(), msg);
    }

    #[test]
    fn test_encode_wraps_wide_tick() {
        let msg = RawMessage::new(2, 7, MAX_TICK + 5);
        let mut out = [0u8; 8];
        BigEndianLayout::encode(&msg, &mut out);
        assert_eq!(BigEndianLayout::decode(&out).unwrap(), RawMessage::new(2, 7, 4));
    }
}

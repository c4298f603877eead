//! Packet header layout, frame-type/flag constants, and the pure
//! fragmentation arithmetic shared by the send and receive paths.
//!
//! Wire format (14 bytes, big-endian, followed by `payload_size` bytes of
//! payload):
//!
//! ```text
//! offset  size  field
//! 0       4     seq_num
//! 4       2     frame_id
//! 6       1     frame_type
//! 7       1     flags
//! 8       2     frag_index
//! 10      2     total_frags
//! 12      2     payload_size
//! 14      2     checksum        (CRC-16/CCITT over bytes[0..14] + payload)
//! ```

mod checksum;

pub use checksum::Crc16;

use crate::error::{Error, Result};

/// Size of the fixed header, in bytes.
pub const HEADER_SIZE: usize = 14;

/// `flags` bit marking the last fragment of a frame.
pub const FLAG_LAST_FRAG: u8 = 0b01;

/// `flags` bit marking a retransmitted fragment.
pub const FLAG_RETRANS: u8 = 0b10;

/// Lightweight bitset over the header's `flags` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u8);

impl Flags {
    pub const LAST_FRAG: Flags = Flags(FLAG_LAST_FRAG);
    pub const RETRANS: Flags = Flags(FLAG_RETRANS);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    pub const fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

/// Frame type, carried in every header's `frame_type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    I = 0x01,
    P = 0x02,
    Sps = 0x03,
    Pps = 0x04,
    Audio = 0x05,
    Connect = 0x10,
    Connected = 0x11,
    Disconnect = 0x12,
    Ack = 0x13,
    Heartbeat = 0x14,
    User = 0x15,
    Start = 0x16,
    Stop = 0x17,
}

impl FrameType {
    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => FrameType::I,
            0x02 => FrameType::P,
            0x03 => FrameType::Sps,
            0x04 => FrameType::Pps,
            0x05 => FrameType::Audio,
            0x10 => FrameType::Connect,
            0x11 => FrameType::Connected,
            0x12 => FrameType::Disconnect,
            0x13 => FrameType::Ack,
            0x14 => FrameType::Heartbeat,
            0x15 => FrameType::User,
            0x16 => FrameType::Start,
            0x17 => FrameType::Stop,
            _ => return None,
        })
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn is_media(self) -> bool {
        matches!(
            self,
            FrameType::I | FrameType::P | FrameType::Sps | FrameType::Pps | FrameType::Audio
        )
    }

    pub const fn is_control(self) -> bool {
        !self.is_media()
    }
}

/// A deserialized packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq_num: u32,
    pub frame_id: u16,
    pub frame_type: FrameType,
    pub flags: Flags,
    pub frag_index: u16,
    pub total_frags: u16,
    pub payload_size: u16,
}

impl Header {
    /// Writes this header's 14 bytes, big-endian, into `out`. Does not
    /// compute or write the checksum — call [`Header::write_checksum`]
    /// after the payload has also been placed into the send buffer.
    pub fn serialize(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < HEADER_SIZE {
            return Err(Error::InvalidParam);
        }
        out[0..4].copy_from_slice(&self.seq_num.to_be_bytes());
        out[4..6].copy_from_slice(&self.frame_id.to_be_bytes());
        out[6] = self.frame_type.as_u8();
        out[7] = self.flags.0;
        out[8..10].copy_from_slice(&self.frag_index.to_be_bytes());
        out[10..12].copy_from_slice(&self.total_frags.to_be_bytes());
        out[12..14].copy_from_slice(&self.payload_size.to_be_bytes());
        Ok(())
    }

    /// Parses a header from the first 14 bytes of `buf`. Does not verify
    /// the checksum; call [`verify`] separately once the payload is known.
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::PacketInvalid);
        }
        let seq_num = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let frame_id = u16::from_be_bytes(buf[4..6].try_into().unwrap());
        let frame_type = FrameType::from_u8(buf[6]).ok_or(Error::PacketInvalid)?;
        let flags = Flags(buf[7]);
        let frag_index = u16::from_be_bytes(buf[8..10].try_into().unwrap());
        let total_frags = u16::from_be_bytes(buf[10..12].try_into().unwrap());
        let payload_size = u16::from_be_bytes(buf[12..14].try_into().unwrap());
        Ok(Header {
            seq_num,
            frame_id,
            frame_type,
            flags,
            frag_index,
            total_frags,
            payload_size,
        })
    }

    pub fn is_last_fragment(&self) -> bool {
        self.flags.contains(Flags::LAST_FRAG)
    }

    pub fn is_retransmission(&self) -> bool {
        self.flags.contains(Flags::RETRANS)
    }
}

/// Enforces the header invariants: `total_frags >= 1`, `frag_index <
/// total_frags`, and `payload_size` fits within a fragment at `mtu`.
/// `frame_type` is already constrained to the enumerated set by
/// [`Header::deserialize`], which never produces an unrecognized value.
pub fn validate(header: &Header, mtu: usize) -> bool {
    header.total_frags >= 1
        && header.frag_index < header.total_frags
        && (header.payload_size as usize) <= mtu.saturating_sub(HEADER_SIZE)
}

/// A fully framed packet ready for, or just read off, the wire: header plus
/// the bytes needed to validate and reassemble it.
pub struct WireHeader;

impl WireHeader {
    /// Serializes `header`, then computes and writes the trailing CRC-16
    /// over the 14 header bytes plus `payload` into `out[0..HEADER_SIZE+2]`.
    /// `out` must be at least `HEADER_SIZE + 2` bytes; the caller places
    /// `payload` immediately after the returned checksum bytes.
    pub fn compute_and_set_crc(header: &Header, payload: &[u8], out: &mut [u8]) -> Result<u16> {
        header.serialize(out)?;
        let crc = Crc16::compute_slices(&[&out[0..HEADER_SIZE], payload]);
        out[HEADER_SIZE..HEADER_SIZE + 2].copy_from_slice(&crc.to_be_bytes());
        Ok(crc)
    }

    /// Verifies the checksum trailing a 14-byte header against `payload`.
    pub fn verify(buf: &[u8], payload: &[u8]) -> Result<()> {
        if buf.len() < HEADER_SIZE + 2 {
            return Err(Error::PacketInvalid);
        }
        let expected = u16::from_be_bytes(buf[HEADER_SIZE..HEADER_SIZE + 2].try_into().unwrap());
        if Crc16::verify_slices(&[&buf[0..HEADER_SIZE], payload], expected) {
            Ok(())
        } else {
            Err(Error::Checksum)
        }
    }
}

/// Number of fragments `frame_size` bytes split into at path MTU `mtu`.
pub fn fragment_count(frame_size: usize, mtu: usize) -> usize {
    let payload_per_fragment = mtu - HEADER_SIZE;
    if frame_size == 0 {
        return 1;
    }
    frame_size.div_ceil(payload_per_fragment)
}

/// Byte offset of fragment `index` within the reassembled frame.
pub fn fragment_offset(index: usize, mtu: usize) -> usize {
    index * (mtu - HEADER_SIZE)
}

/// Size in bytes of fragment `index` out of `total` fragments for a frame
/// of `frame_size` bytes at path MTU `mtu`.
pub fn fragment_size(index: usize, total: usize, frame_size: usize, mtu: usize) -> usize {
    let payload_per_fragment = mtu - HEADER_SIZE;
    if index + 1 < total {
        payload_per_fragment
    } else {
        frame_size - fragment_offset(index, mtu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            seq_num: 42,
            frame_id: 7,
            frame_type: FrameType::I,
            flags: Flags::LAST_FRAG,
            frag_index: 3,
            total_frags: 4,
            payload_size: 1200,
        }
    }

    #[test]
    fn header_round_trips() {
        let header = sample_header();
        let mut buf = [0u8; HEADER_SIZE];
        header.serialize(&mut buf).unwrap();
        let parsed = Header::deserialize(&buf).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn serialize_rejects_short_buffer() {
        let header = sample_header();
        let mut buf = [0u8; HEADER_SIZE - 1];
        assert_eq!(header.serialize(&mut buf), Err(Error::InvalidParam));
    }

    #[test]
    fn crc_round_trips_through_verify() {
        let header = sample_header();
        let payload = vec![9u8; 1200];
        let mut buf = vec![0u8; HEADER_SIZE + 2];
        WireHeader::compute_and_set_crc(&header, &payload, &mut buf).unwrap();
        assert!(WireHeader::verify(&buf, &payload).is_ok());
    }

    #[test]
    fn crc_detects_corruption() {
        let header = sample_header();
        let payload = vec![9u8; 16];
        let mut buf = vec![0u8; HEADER_SIZE + 2];
        WireHeader::compute_and_set_crc(&header, &payload, &mut buf).unwrap();
        let mut corrupt_payload = payload.clone();
        corrupt_payload[0] ^= 0xFF;
        assert_eq!(
            WireHeader::verify(&buf, &corrupt_payload),
            Err(Error::Checksum)
        );
    }

    #[test]
    fn fragmentation_matches_worked_example() {
        // 4200 bytes over MTU 1400 (header 14) fragments into 1386, 1386, 1386, 42.
        let mtu = 1400;
        let size = 4200;
        let total = fragment_count(size, mtu);
        assert_eq!(total, 4);
        let sizes: Vec<usize> = (0..total)
            .map(|i| fragment_size(i, total, size, mtu))
            .collect();
        assert_eq!(sizes, vec![1386, 1386, 1386, 42]);
        assert_eq!(sizes.iter().sum::<usize>(), size);
        assert!(sizes.iter().all(|&s| s <= mtu - HEADER_SIZE));
        assert!(*sizes.last().unwrap() > 0);
    }

    #[test]
    fn validate_accepts_well_formed_header() {
        assert!(validate(&sample_header(), 1400));
    }

    #[test]
    fn validate_rejects_zero_total_frags() {
        let mut header = sample_header();
        header.total_frags = 0;
        header.frag_index = 0;
        assert!(!validate(&header, 1400));
    }

    #[test]
    fn validate_rejects_frag_index_past_total() {
        let mut header = sample_header();
        header.total_frags = 4;
        header.frag_index = 4;
        assert!(!validate(&header, 1400));
    }

    #[test]
    fn validate_rejects_payload_larger_than_fragment_budget() {
        let mut header = sample_header();
        header.payload_size = 1400;
        assert!(!validate(&header, 1400));
    }

    #[test]
    fn flags_contains_and_union() {
        let both = Flags::LAST_FRAG.union(Flags::RETRANS);
        assert!(both.contains(Flags::LAST_FRAG));
        assert!(both.contains(Flags::RETRANS));
        let mut f = Flags::empty();
        f.insert(Flags::LAST_FRAG);
        assert!(f.contains(Flags::LAST_FRAG));
        f.remove(Flags::LAST_FRAG);
        assert!(!f.contains(Flags::LAST_FRAG));
    }
}

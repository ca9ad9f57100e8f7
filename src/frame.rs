//! Frame Codec: encodes outbound SWR-NET command frames and decodes inbound
//! ones.
//!
//! Wire layout (all multi-byte integers little-endian):
//!
//! ```text
//! AA AA | 68 | L | L | 68 | src_lo src_hi | dst_lo dst_hi | ctl | pkt | cmd | payload | crc_lo crc_hi | 16
//! ```
//!
//! `L` is the length of `payload`, duplicated for error detection. `crc` is
//! the unsigned 16-bit sum of every byte from `src_lo` through the end of
//! `payload`. The leading `AA AA` wake bytes are optional on receive.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

const WAKE: u8 = 0xAA;
const TELEGRAM_MARK: u8 = 0x68;
const END_MARK: u8 = 0x16;

/// Control byte values, overloaded in the source protocol onto a single
/// byte; modeled as an enum everywhere except inside the codec itself,
/// which deals in the raw byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    UnicastRequest,
    Response,
    BroadcastRequest,
}

impl Control {
    fn to_byte(self) -> u8 {
        match self {
            Control::UnicastRequest => 0,
            Control::Response => 64,
            Control::BroadcastRequest => 128,
        }
    }

    fn from_byte(b: u8) -> Control {
        match b {
            64 => Control::Response,
            128 => Control::BroadcastRequest,
            _ => Control::UnicastRequest,
        }
    }
}

/// One on-wire unit. See the data model for the checksum and duplicated-
/// length invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub src_addr: u16,
    pub dst_addr: u16,
    pub control: Control,
    pub packet_cnt: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

/// Builds an outbound frame. `src_addr` is always 0 (the controller).
pub fn build(dest_addr: u16, packet_cnt: u8, command: u8, control: Control, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u8;
    let mut header = Vec::with_capacity(7 + payload.len());
    header.extend_from_slice(&0u16.to_le_bytes()); // src_addr = 0
    header.extend_from_slice(&dest_addr.to_le_bytes());
    header.push(control.to_byte());
    header.push(packet_cnt);
    header.push(command);
    header.extend_from_slice(payload);

    let crc: u16 = header.iter().fold(0u32, |acc, &b| acc + b as u32) as u16;

    let mut out = Vec::with_capacity(9 + header.len() + 3);
    out.push(WAKE);
    out.push(WAKE);
    out.push(TELEGRAM_MARK);
    out.push(len);
    out.push(len);
    out.push(TELEGRAM_MARK);
    out.extend_from_slice(&header);
    out.extend_from_slice(&crc.to_le_bytes());
    out.push(END_MARK);
    out
}

/// Peeks at the front of `buf` to determine the total byte length of the
/// next frame, without requiring the whole frame to be present. Returns
/// `None` if not enough bytes have arrived yet to know the length (the
/// caller should wait for more data rather than treat this as malformed).
pub fn framed_len(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while buf.get(pos) == Some(&WAKE) {
        pos += 1;
    }
    if buf.len() < pos + 3 {
        return None;
    }
    let len1 = buf[pos + 1];
    // header(7) + payload + crc(2) + end(1), plus the 4-byte telegram lead-in
    Some(pos + 4 + 7 + len1 as usize + 3)
}

/// Decodes one frame from the front of `buf`. Returns the frame and the
/// number of bytes consumed. The leading `AA AA` wake bytes are optional.
/// Callers that only have a partial frame should use [`framed_len`] first;
/// `decode` treats a buffer that is merely too short as `FrameMalformed`.
pub fn decode(buf: &[u8]) -> Result<(Frame, usize)> {
    let mut pos = 0;
    while buf.get(pos) == Some(&WAKE) {
        pos += 1;
    }

    require(buf, pos + 6)?;
    if buf[pos] != TELEGRAM_MARK {
        return Err(Error::FrameMalformed);
    }
    let len1 = buf[pos + 1];
    let len2 = buf[pos + 2];
    if buf[pos + 3] != TELEGRAM_MARK {
        return Err(Error::FrameMalformed);
    }
    if len1 != len2 {
        return Err(Error::FrameLengthMismatch(len1, len2));
    }
    let payload_len = len1 as usize;
    pos += 4;

    // header: src(2) dst(2) ctl(1) pkt(1) cmd(1) = 7 bytes, then payload, then crc(2), then end(1)
    let header_len = 7 + payload_len;
    require(buf, pos + header_len + 3)?;

    let header = &buf[pos..pos + header_len];
    let src_addr = LittleEndian::read_u16(&header[0..2]);
    let dst_addr = LittleEndian::read_u16(&header[2..4]);
    let control = Control::from_byte(header[4]);
    let packet_cnt = header[5];
    let command = header[6];
    let payload = header[7..7 + payload_len].to_vec();

    let crc_pos = pos + header_len;
    let computed: u16 = header.iter().fold(0u32, |acc, &b| acc + b as u32) as u16;
    let expected = LittleEndian::read_u16(&buf[crc_pos..crc_pos + 2]);
    if computed != expected {
        return Err(Error::FrameChecksum { expected, computed });
    }

    if buf[crc_pos + 2] != END_MARK {
        return Err(Error::FrameMalformed);
    }

    Ok((
        Frame {
            src_addr,
            dst_addr,
            control,
            packet_cnt,
            command,
            payload,
        },
        crc_pos + 3,
    ))
}

fn require(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() < len {
        Err(Error::FrameMalformed)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S1: frame round-trip for an empty-payload broadcast CMD_GET_NET_START.
    #[test]
    fn s1_frame_round_trip() {
        let bytes = build(2, 0, 6, Control::BroadcastRequest, &[]);
        assert_eq!(
            bytes,
            vec![0xAA, 0xAA, 0x68, 0x00, 0x00, 0x68, 0x00, 0x00, 0x02, 0x00, 0x80, 0x00, 0x06, 0x88, 0x00, 0x16]
        );
        let (frame, consumed) = decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(frame.src_addr, 0);
        assert_eq!(frame.dst_addr, 2);
        assert_eq!(frame.control, Control::BroadcastRequest);
        assert_eq!(frame.packet_cnt, 0);
        assert_eq!(frame.command, 6);
        assert!(frame.payload.is_empty());
    }

    /// S2: flipping the checksum trailer byte is rejected.
    #[test]
    fn s2_checksum_rejection() {
        let mut bytes = build(2, 0, 6, Control::BroadcastRequest, &[]);
        let crc_lo_idx = bytes.len() - 3;
        assert_eq!(bytes[crc_lo_idx], 0x88);
        bytes[crc_lo_idx] = 0x89;
        match decode(&bytes) {
            Err(Error::FrameChecksum { .. }) => {}
            other => panic!("expected FrameChecksum, got {:?}", other),
        }
    }

    /// S3: duplicated length bytes that disagree are rejected.
    #[test]
    fn s3_length_mismatch() {
        let bytes = [
            0xAA, 0xAA, 0x68, 0x02, 0x03, 0x68, 0x00, 0x00, 0x02, 0x00, 0x80, 0x00, 0x06, 0xAA, 0xBB, 0x3D, 0x01, 0x16,
        ];
        match decode(&bytes) {
            Err(Error::FrameLengthMismatch(2, 3)) => {}
            other => panic!("expected FrameLengthMismatch(2, 3), got {:?}", other),
        }
    }

    #[test]
    fn decode_without_wake_bytes() {
        let bytes = build(5, 3, 11, Control::UnicastRequest, &[1, 2, 3]);
        let (_frame, consumed) = decode(&bytes[2..]).unwrap();
        assert_eq!(consumed, bytes.len() - 2);
    }

    #[test]
    fn build_duplicates_length() {
        let payload = [1, 2, 3, 4, 5];
        let bytes = build(9, 0, 11, Control::UnicastRequest, &payload);
        assert_eq!(bytes[3], payload.len() as u8);
        assert_eq!(bytes[4], payload.len() as u8);
    }
}

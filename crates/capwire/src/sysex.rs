//! SysEx framing constants, the CI sub-ID registry and 7-bit field packing.
//!
//! ## Wire format
//!
//! Every CI payload shares a 13-byte common header:
//!
//! ```text
//! Byte  0: 0x7E                Universal SysEx (non-realtime)
//! Byte  1: device id           address: channel, 0x7E = group, 0x7F = block
//! Byte  2: 0x0D                MIDI-CI sub-ID #1
//! Byte  3: sub-ID #2           message kind discriminator
//! Byte  4: version/format      0x02
//! Bytes 5-8:  source MUID      four 7-bit bytes, little-endian
//! Bytes 9-12: destination MUID four 7-bit bytes, little-endian
//! ```
//!
//! Multi-byte integers are always little-endian with 7 data bits per byte;
//! a byte with bit 7 set inside a CI payload is a framing error.

use thiserror::Error;

use crate::Muid;

/// Universal SysEx (non-realtime) stream id.
pub const UNIVERSAL_SYSEX: u8 = 0x7E;

/// Sub-ID #1 marking a MIDI-CI message.
pub const SYSEX_SUB_ID_CI: u8 = 0x0D;

/// MIDI-CI version/format byte we speak (1.2).
pub const CI_VERSION: u8 = 0x02;

/// Size of the common header shared by every CI message.
pub const COMMON_HEADER_SIZE: usize = 13;

/// Errors raised by the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("byte with bit 7 set in a 7-bit field")]
    SevenBitViolation,
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}

/// CI message kind discriminator (byte 3 of every CI payload).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubId2 {
    // === Management ===
    DiscoveryInquiry = 0x70,
    DiscoveryReply = 0x71,
    EndpointInquiry = 0x72,
    EndpointReply = 0x73,
    Ack = 0x7D,
    InvalidateMuid = 0x7E,
    Nak = 0x7F,

    // === Profile configuration ===
    ProfileInquiry = 0x20,
    ProfileInquiryReply = 0x21,
    SetProfileOn = 0x22,
    SetProfileOff = 0x23,
    ProfileEnabledReport = 0x24,
    ProfileDisabledReport = 0x25,
    ProfileAddedReport = 0x26,
    ProfileRemovedReport = 0x27,
    ProfileDetailsInquiry = 0x28,
    ProfileDetailsReply = 0x29,
    ProfileSpecificData = 0x2F,

    // === Property exchange ===
    PropertyGetCapabilities = 0x30,
    PropertyGetCapabilitiesReply = 0x31,
    GetPropertyData = 0x34,
    GetPropertyDataReply = 0x35,
    SetPropertyData = 0x36,
    SetPropertyDataReply = 0x37,
    SubscribeProperty = 0x38,
    SubscribePropertyReply = 0x39,
    PropertyNotify = 0x3F,

    // === Process inquiry ===
    ProcessInquiryCapabilities = 0x40,
    ProcessInquiryCapabilitiesReply = 0x41,
    MidiMessageReportInquiry = 0x42,
    MidiMessageReportReply = 0x43,
    MidiMessageReportEnd = 0x44,
}

impl SubId2 {
    /// Parse a raw sub-ID #2. Unknown values yield `None`: the dispatcher
    /// accepts them silently to stay forward-compatible.
    pub fn from_u8(value: u8) -> Option<SubId2> {
        use SubId2::*;
        Some(match value {
            0x70 => DiscoveryInquiry,
            0x71 => DiscoveryReply,
            0x72 => EndpointInquiry,
            0x73 => EndpointReply,
            0x7D => Ack,
            0x7E => InvalidateMuid,
            0x7F => Nak,
            0x20 => ProfileInquiry,
            0x21 => ProfileInquiryReply,
            0x22 => SetProfileOn,
            0x23 => SetProfileOff,
            0x24 => ProfileEnabledReport,
            0x25 => ProfileDisabledReport,
            0x26 => ProfileAddedReport,
            0x27 => ProfileRemovedReport,
            0x28 => ProfileDetailsInquiry,
            0x29 => ProfileDetailsReply,
            0x2F => ProfileSpecificData,
            0x30 => PropertyGetCapabilities,
            0x31 => PropertyGetCapabilitiesReply,
            0x34 => GetPropertyData,
            0x35 => GetPropertyDataReply,
            0x36 => SetPropertyData,
            0x37 => SetPropertyDataReply,
            0x38 => SubscribeProperty,
            0x39 => SubscribePropertyReply,
            0x3F => PropertyNotify,
            0x40 => ProcessInquiryCapabilities,
            0x41 => ProcessInquiryCapabilitiesReply,
            0x42 => MidiMessageReportInquiry,
            0x43 => MidiMessageReportReply,
            0x44 => MidiMessageReportEnd,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Append a 14-bit integer as two 7-bit bytes, little-endian.
pub fn put_u14(dst: &mut Vec<u8>, value: u16) {
    dst.push((value & 0x7F) as u8);
    dst.push(((value >> 7) & 0x7F) as u8);
}

/// Append a 28-bit integer as four 7-bit bytes, little-endian.
pub fn put_u28(dst: &mut Vec<u8>, value: u32) {
    dst.push((value & 0x7F) as u8);
    dst.push(((value >> 7) & 0x7F) as u8);
    dst.push(((value >> 14) & 0x7F) as u8);
    dst.push(((value >> 21) & 0x7F) as u8);
}

/// Append a 21-bit integer as three 7-bit bytes, little-endian.
pub fn put_u21(dst: &mut Vec<u8>, value: u32) {
    dst.push((value & 0x7F) as u8);
    dst.push(((value >> 7) & 0x7F) as u8);
    dst.push(((value >> 14) & 0x7F) as u8);
}

/// Append a MUID as four 7-bit bytes, little-endian.
pub fn put_muid(dst: &mut Vec<u8>, muid: Muid) {
    put_u28(dst, muid.to_u32());
}

fn byte_at(data: &[u8], offset: usize) -> u32 {
    data.get(offset).copied().unwrap_or(0) as u32
}

/// Read a 14-bit little-endian integer. Out-of-range bytes read as zero, so
/// callers must size-check payloads before trusting the result.
pub fn read_u14(data: &[u8], offset: usize) -> u16 {
    (byte_at(data, offset) | (byte_at(data, offset + 1) << 7)) as u16
}

/// Read a 21-bit little-endian integer.
pub fn read_u21(data: &[u8], offset: usize) -> u32 {
    byte_at(data, offset) | (byte_at(data, offset + 1) << 7) | (byte_at(data, offset + 2) << 14)
}

/// Read a 28-bit little-endian integer.
pub fn read_u28(data: &[u8], offset: usize) -> u32 {
    byte_at(data, offset)
        | (byte_at(data, offset + 1) << 7)
        | (byte_at(data, offset + 2) << 14)
        | (byte_at(data, offset + 3) << 21)
}

/// Read a MUID at the given offset.
pub fn read_muid(data: &[u8], offset: usize) -> Muid {
    Muid::new(read_u28(data, offset))
}

/// Write the 13-byte common header into `dst`.
pub fn put_common_header(dst: &mut Vec<u8>, address: u8, sub_id2: SubId2, source: Muid, destination: Muid) {
    dst.push(UNIVERSAL_SYSEX);
    dst.push(address);
    dst.push(SYSEX_SUB_ID_CI);
    dst.push(sub_id2.to_u8());
    dst.push(CI_VERSION);
    put_muid(dst, source);
    put_muid(dst, destination);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sub_id2_roundtrip() {
        assert_eq!(SubId2::from_u8(0x70), Some(SubId2::DiscoveryInquiry));
        assert_eq!(SubId2::from_u8(0x3F), Some(SubId2::PropertyNotify));
        assert_eq!(SubId2::from_u8(0x44), Some(SubId2::MidiMessageReportEnd));
        assert_eq!(SubId2::from_u8(0x55), None);
        assert_eq!(SubId2::SetPropertyData.to_u8(), 0x36);
    }

    #[test]
    fn u14_roundtrip() {
        let mut buf = Vec::new();
        put_u14(&mut buf, 0x1FFF);
        assert_eq!(buf, vec![0x7F, 0x3F]);
        assert_eq!(read_u14(&buf, 0), 0x1FFF);
    }

    #[test]
    fn u28_roundtrip() {
        let mut buf = Vec::new();
        put_u28(&mut buf, 0x0FFF_FFFF);
        assert_eq!(buf, vec![0x7F, 0x7F, 0x7F, 0x7F]);
        assert_eq!(read_u28(&buf, 0), 0x0FFF_FFFF);

        buf.clear();
        put_u28(&mut buf, 0x0102_0304);
        assert_eq!(read_u28(&buf, 0), 0x0102_0304);
    }

    #[test]
    fn muid_little_endian_7bit() {
        let mut buf = Vec::new();
        put_muid(&mut buf, Muid::new(0x0000_0081));
        // 0x81 = 0b1000_0001 -> low 7 bits 0x01, next 0x01
        assert_eq!(buf, vec![0x01, 0x01, 0x00, 0x00]);
        assert_eq!(read_muid(&buf, 0), Muid::new(0x81));
    }

    #[test]
    fn reads_past_end_are_zero() {
        assert_eq!(read_u14(&[0x40], 0), 0x40);
        assert_eq!(read_u28(&[], 0), 0);
    }

    #[test]
    fn common_header_layout() {
        let mut buf = Vec::new();
        put_common_header(
            &mut buf,
            0x7F,
            SubId2::DiscoveryInquiry,
            Muid::new(0x0102_0304),
            Muid::BROADCAST,
        );
        assert_eq!(buf.len(), COMMON_HEADER_SIZE);
        assert_eq!(buf[0], UNIVERSAL_SYSEX);
        assert_eq!(buf[1], 0x7F);
        assert_eq!(buf[2], SYSEX_SUB_ID_CI);
        assert_eq!(buf[3], 0x70);
        assert_eq!(buf[4], CI_VERSION);
        assert_eq!(read_muid(&buf, 5), Muid::new(0x0102_0304));
        assert_eq!(read_muid(&buf, 9), Muid::BROADCAST);
    }
}

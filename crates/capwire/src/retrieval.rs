//! Field retrieval from raw CI payloads.
//!
//! Pure readers over fixed offsets defined by MIDI-CI. Nothing here
//! validates semantics; the dispatcher checks per-kind minimum sizes before
//! trusting a value, and every reader is total (out-of-range reads yield
//! zeros or empty slices rather than panicking).

use bytes::Bytes;

use crate::sysex::{read_u14, read_u21, read_u28, read_muid};
use crate::{DeviceDetails, Muid, ProfileId};

/// The address (device id) byte.
pub fn address(data: &[u8]) -> u8 {
    data.get(1).copied().unwrap_or(0)
}

/// The raw sub-ID #2 byte.
pub fn sub_id2(data: &[u8]) -> u8 {
    data.get(3).copied().unwrap_or(0)
}

pub fn source_muid(data: &[u8]) -> Muid {
    read_muid(data, 5)
}

pub fn destination_muid(data: &[u8]) -> Muid {
    read_muid(data, 9)
}

/// Device identity block of Discovery messages (offsets 13..24).
pub fn device_details(data: &[u8]) -> DeviceDetails {
    DeviceDetails {
        manufacturer: read_u21(data, 13),
        family: read_u14(data, 16),
        model: read_u14(data, 18),
        software_revision: read_u28(data, 20),
    }
}

/// CI category bitmap of Discovery messages.
pub fn supported_features(data: &[u8]) -> u8 {
    data.get(24).copied().unwrap_or(0)
}

/// Receivable maximum SysEx size advertised in Discovery messages.
pub fn max_sysex_size(data: &[u8]) -> u32 {
    read_u28(data, 25)
}

pub fn output_path_id(data: &[u8]) -> u8 {
    data.get(29).copied().unwrap_or(0)
}

pub fn function_block(data: &[u8]) -> u8 {
    data.get(30).copied().unwrap_or(0)
}

/// Target MUID of an InvalidateMUID message.
pub fn muid_to_invalidate(data: &[u8]) -> Muid {
    read_muid(data, 13)
}

fn profile_id_at(data: &[u8], offset: usize) -> ProfileId {
    let mut id = [0u8; 5];
    for (i, slot) in id.iter_mut().enumerate() {
        *slot = data.get(offset + i).copied().unwrap_or(0);
    }
    ProfileId(id)
}

/// The 5-byte profile id of profile messages.
pub fn profile_id(data: &[u8]) -> ProfileId {
    profile_id_at(data, 13)
}

/// Enabled and disabled profile id lists of a Profile Inquiry Reply.
pub fn profile_set(data: &[u8]) -> (Vec<ProfileId>, Vec<ProfileId>) {
    let enabled_count = read_u14(data, 13) as usize;
    let mut enabled = Vec::with_capacity(enabled_count);
    let mut pos = 15;
    for _ in 0..enabled_count {
        if pos + 5 > data.len() {
            break;
        }
        enabled.push(profile_id_at(data, pos));
        pos += 5;
    }
    let disabled_count = read_u14(data, pos) as usize;
    pos += 2;
    let mut disabled = Vec::with_capacity(disabled_count);
    for _ in 0..disabled_count {
        if pos + 5 > data.len() {
            break;
        }
        disabled.push(profile_id_at(data, pos));
        pos += 5;
    }
    (enabled, disabled)
}

/// 14-bit channel count of Set Profile On / Enabled / Disabled reports.
pub fn profile_enabled_channels(data: &[u8]) -> u16 {
    read_u14(data, 18)
}

/// 28-bit data length of a Profile Specific Data message.
pub fn profile_specific_data_size(data: &[u8]) -> u32 {
    read_u28(data, 18)
}

/// Max simultaneous requests field of Property Get Capabilities messages.
pub fn max_property_requests(data: &[u8]) -> u8 {
    data.get(13).copied().unwrap_or(0)
}

/// Request id of property messages.
pub fn property_request_id(data: &[u8]) -> u8 {
    data.get(13).copied().unwrap_or(0)
}

fn clamped(data: &[u8], start: usize, len: usize) -> Bytes {
    let start = start.min(data.len());
    let end = (start + len).min(data.len());
    Bytes::copy_from_slice(&data[start..end])
}

/// Header slice of a property message.
pub fn property_header(data: &[u8]) -> Bytes {
    let len = read_u14(data, 14) as usize;
    clamped(data, 16, len)
}

fn body_offset(data: &[u8]) -> usize {
    16 + read_u14(data, 14) as usize
}

/// Total chunk count of a property message (1-based series).
pub fn property_total_chunks(data: &[u8]) -> u16 {
    read_u14(data, body_offset(data))
}

/// 1-based chunk index of a property message.
pub fn property_chunk_index(data: &[u8]) -> u16 {
    read_u14(data, body_offset(data) + 2)
}

/// Body slice carried by this chunk.
pub fn property_body_in_chunk(data: &[u8]) -> Bytes {
    let offset = body_offset(data);
    let len = read_u14(data, offset + 4) as usize;
    clamped(data, offset + 6, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, SerializeConfig};
    use crate::Common;
    use pretty_assertions::assert_eq;

    fn common() -> Common {
        Common::new(Muid::new(0x0102_0304), Muid::new(0x0506_0708), 0x79, 2)
    }

    #[test]
    fn discovery_fields_roundtrip() {
        let device = DeviceDetails {
            manufacturer: 0x10_2030,
            family: 0x0123,
            model: 0x2345,
            software_revision: 0x0ABC_DEF0,
        };
        let msg = Message::DiscoveryReply {
            common: common(),
            device,
            supported_features: 0x1C,
            max_sysex_size: 512,
            output_path_id: 3,
            function_block: 5,
        };
        let packet = &msg.serialize(&SerializeConfig::default())[0];

        assert_eq!(source_muid(packet), Muid::new(0x0102_0304));
        assert_eq!(destination_muid(packet), Muid::new(0x0506_0708));
        assert_eq!(device_details(packet), device);
        assert_eq!(supported_features(packet), 0x1C);
        assert_eq!(max_sysex_size(packet), 512);
        assert_eq!(output_path_id(packet), 3);
        assert_eq!(function_block(packet), 5);
    }

    #[test]
    fn invalidate_muid_roundtrip() {
        let msg = Message::InvalidateMuid {
            common: common(),
            target_muid: Muid::new(0x0A0B_0C0D),
        };
        let packet = &msg.serialize(&SerializeConfig::default())[0];
        assert_eq!(muid_to_invalidate(packet), Muid::new(0x0A0B_0C0D));
    }

    #[test]
    fn profile_set_roundtrip() {
        let enabled = vec![
            ProfileId([0x7E, 0x00, 0x01, 0x02, 0x03]),
            ProfileId([0x7E, 0x10, 0x11, 0x12, 0x13]),
        ];
        let disabled = vec![ProfileId([0x7E, 0x20, 0x21, 0x22, 0x23])];
        let msg = Message::ProfileReply {
            common: common(),
            enabled: enabled.clone(),
            disabled: disabled.clone(),
        };
        let packet = &msg.serialize(&SerializeConfig::default())[0];
        assert_eq!(profile_set(packet), (enabled, disabled));
    }

    #[test]
    fn profile_report_roundtrip() {
        let id = ProfileId([0x7E, 0x01, 0x02, 0x03, 0x04]);
        let msg = Message::ProfileEnabledReport {
            common: common(),
            profile: id,
            num_channels: 300,
        };
        let packet = &msg.serialize(&SerializeConfig::default())[0];
        assert_eq!(profile_id(packet), id);
        assert_eq!(profile_enabled_channels(packet), 300);
    }

    #[test]
    fn property_fields_roundtrip() {
        let header = Bytes::from_static(b"{\"resource\":\"DeviceInfo\"}");
        let body = Bytes::from_static(b"{\"model\":\"x\"}");
        let msg = Message::GetPropertyDataReply {
            common: common(),
            request_id: 17,
            header: header.clone(),
            body: body.clone(),
        };
        let packet = &msg.serialize(&SerializeConfig::default())[0];

        assert_eq!(property_request_id(packet), 17);
        assert_eq!(property_header(packet), header);
        assert_eq!(property_total_chunks(packet), 1);
        assert_eq!(property_chunk_index(packet), 1);
        assert_eq!(property_body_in_chunk(packet), body);
    }

    #[test]
    fn truncated_payload_reads_safely() {
        let short = [0x7E, 0x7F, 0x0D];
        assert_eq!(source_muid(&short), Muid::new(0));
        assert_eq!(property_header(&short), Bytes::new());
        assert_eq!(profile_set(&short), (vec![], vec![]));
    }
}

//! The typed CI message model.
//!
//! One discriminated union covers every CI sub-message we speak. Each
//! variant knows how to serialize itself into one or more SysEx payloads;
//! property-exchange variants may split their body across chunks, everything
//! else is exactly one payload.

use bytes::Bytes;

use crate::sysex::{self, SubId2};
use crate::{Common, DeviceDetails, Muid, ProfileId};

/// Limits applied while serializing.
///
/// `max_property_chunk_size` caps the byte count of a single property packet
/// (header and body share the first chunk's budget). The messenger lowers
/// these to a peer's advertised receivable size for the duration of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeConfig {
    pub receivable_max_sysex_size: usize,
    pub max_property_chunk_size: usize,
}

impl Default for SerializeConfig {
    fn default() -> Self {
        Self {
            receivable_max_sysex_size: 4096,
            max_property_chunk_size: 4096 - 256,
        }
    }
}

/// A typed MIDI-CI message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // === Management ===
    DiscoveryInquiry {
        common: Common,
        device: DeviceDetails,
        supported_features: u8,
        max_sysex_size: u32,
        output_path_id: u8,
    },
    DiscoveryReply {
        common: Common,
        device: DeviceDetails,
        supported_features: u8,
        max_sysex_size: u32,
        output_path_id: u8,
        function_block: u8,
    },
    EndpointInquiry {
        common: Common,
        status: u8,
    },
    EndpointReply {
        common: Common,
        status: u8,
        data: Bytes,
    },
    InvalidateMuid {
        common: Common,
        target_muid: Muid,
    },
    Ack {
        common: Common,
        original_sub_id: u8,
        status_code: u8,
        status_data: u8,
        details: [u8; 5],
        message: Bytes,
    },
    Nak {
        common: Common,
        original_sub_id: u8,
        status_code: u8,
        status_data: u8,
        details: [u8; 5],
        message: Bytes,
    },

    // === Profile configuration ===
    ProfileInquiry {
        common: Common,
    },
    ProfileReply {
        common: Common,
        enabled: Vec<ProfileId>,
        disabled: Vec<ProfileId>,
    },
    SetProfileOn {
        common: Common,
        profile: ProfileId,
        num_channels: u16,
    },
    SetProfileOff {
        common: Common,
        profile: ProfileId,
    },
    ProfileEnabledReport {
        common: Common,
        profile: ProfileId,
        num_channels: u16,
    },
    ProfileDisabledReport {
        common: Common,
        profile: ProfileId,
        num_channels: u16,
    },
    ProfileAddedReport {
        common: Common,
        profile: ProfileId,
    },
    ProfileRemovedReport {
        common: Common,
        profile: ProfileId,
    },
    ProfileDetailsInquiry {
        common: Common,
        profile: ProfileId,
        target: u8,
    },
    ProfileDetailsReply {
        common: Common,
        profile: ProfileId,
        target: u8,
        data: Bytes,
    },
    ProfileSpecificData {
        common: Common,
        profile: ProfileId,
        data: Bytes,
    },

    // === Property exchange ===
    PropertyGetCapabilities {
        common: Common,
        max_simultaneous_requests: u8,
    },
    PropertyGetCapabilitiesReply {
        common: Common,
        max_simultaneous_requests: u8,
    },
    GetPropertyData {
        common: Common,
        request_id: u8,
        header: Bytes,
    },
    GetPropertyDataReply {
        common: Common,
        request_id: u8,
        header: Bytes,
        body: Bytes,
    },
    SetPropertyData {
        common: Common,
        request_id: u8,
        header: Bytes,
        body: Bytes,
    },
    SetPropertyDataReply {
        common: Common,
        request_id: u8,
        header: Bytes,
    },
    SubscribeProperty {
        common: Common,
        request_id: u8,
        header: Bytes,
        body: Bytes,
    },
    SubscribePropertyReply {
        common: Common,
        request_id: u8,
        header: Bytes,
        body: Bytes,
    },
    PropertyNotify {
        common: Common,
        request_id: u8,
        header: Bytes,
        body: Bytes,
    },

    // === Process inquiry ===
    ProcessInquiryCapabilities {
        common: Common,
    },
    ProcessInquiryCapabilitiesReply {
        common: Common,
        supported_features: u8,
    },
    MidiMessageReportInquiry {
        common: Common,
        message_data_control: u8,
        system_messages: u8,
        channel_controller_messages: u8,
        note_data_messages: u8,
    },
    MidiMessageReportReply {
        common: Common,
        system_messages: u8,
        channel_controller_messages: u8,
        note_data_messages: u8,
    },
    MidiMessageReportEnd {
        common: Common,
    },
}

impl Message {
    /// The common header of this message.
    pub fn common(&self) -> &Common {
        use Message::*;
        match self {
            DiscoveryInquiry { common, .. }
            | DiscoveryReply { common, .. }
            | EndpointInquiry { common, .. }
            | EndpointReply { common, .. }
            | InvalidateMuid { common, .. }
            | Ack { common, .. }
            | Nak { common, .. }
            | ProfileInquiry { common }
            | ProfileReply { common, .. }
            | SetProfileOn { common, .. }
            | SetProfileOff { common, .. }
            | ProfileEnabledReport { common, .. }
            | ProfileDisabledReport { common, .. }
            | ProfileAddedReport { common, .. }
            | ProfileRemovedReport { common, .. }
            | ProfileDetailsInquiry { common, .. }
            | ProfileDetailsReply { common, .. }
            | ProfileSpecificData { common, .. }
            | PropertyGetCapabilities { common, .. }
            | PropertyGetCapabilitiesReply { common, .. }
            | GetPropertyData { common, .. }
            | GetPropertyDataReply { common, .. }
            | SetPropertyData { common, .. }
            | SetPropertyDataReply { common, .. }
            | SubscribeProperty { common, .. }
            | SubscribePropertyReply { common, .. }
            | PropertyNotify { common, .. }
            | ProcessInquiryCapabilities { common }
            | ProcessInquiryCapabilitiesReply { common, .. }
            | MidiMessageReportInquiry { common, .. }
            | MidiMessageReportReply { common, .. }
            | MidiMessageReportEnd { common } => common,
        }
    }

    /// The sub-ID #2 this message serializes under.
    pub fn sub_id2(&self) -> SubId2 {
        use Message::*;
        match self {
            DiscoveryInquiry { .. } => SubId2::DiscoveryInquiry,
            DiscoveryReply { .. } => SubId2::DiscoveryReply,
            EndpointInquiry { .. } => SubId2::EndpointInquiry,
            EndpointReply { .. } => SubId2::EndpointReply,
            InvalidateMuid { .. } => SubId2::InvalidateMuid,
            Ack { .. } => SubId2::Ack,
            Nak { .. } => SubId2::Nak,
            ProfileInquiry { .. } => SubId2::ProfileInquiry,
            ProfileReply { .. } => SubId2::ProfileInquiryReply,
            SetProfileOn { .. } => SubId2::SetProfileOn,
            SetProfileOff { .. } => SubId2::SetProfileOff,
            ProfileEnabledReport { .. } => SubId2::ProfileEnabledReport,
            ProfileDisabledReport { .. } => SubId2::ProfileDisabledReport,
            ProfileAddedReport { .. } => SubId2::ProfileAddedReport,
            ProfileRemovedReport { .. } => SubId2::ProfileRemovedReport,
            ProfileDetailsInquiry { .. } => SubId2::ProfileDetailsInquiry,
            ProfileDetailsReply { .. } => SubId2::ProfileDetailsReply,
            ProfileSpecificData { .. } => SubId2::ProfileSpecificData,
            PropertyGetCapabilities { .. } => SubId2::PropertyGetCapabilities,
            PropertyGetCapabilitiesReply { .. } => SubId2::PropertyGetCapabilitiesReply,
            GetPropertyData { .. } => SubId2::GetPropertyData,
            GetPropertyDataReply { .. } => SubId2::GetPropertyDataReply,
            SetPropertyData { .. } => SubId2::SetPropertyData,
            SetPropertyDataReply { .. } => SubId2::SetPropertyDataReply,
            SubscribeProperty { .. } => SubId2::SubscribeProperty,
            SubscribePropertyReply { .. } => SubId2::SubscribePropertyReply,
            PropertyNotify { .. } => SubId2::PropertyNotify,
            ProcessInquiryCapabilities { .. } => SubId2::ProcessInquiryCapabilities,
            ProcessInquiryCapabilitiesReply { .. } => SubId2::ProcessInquiryCapabilitiesReply,
            MidiMessageReportInquiry { .. } => SubId2::MidiMessageReportInquiry,
            MidiMessageReportReply { .. } => SubId2::MidiMessageReportReply,
            MidiMessageReportEnd { .. } => SubId2::MidiMessageReportEnd,
        }
    }

    /// Short name for log output.
    pub fn label(&self) -> &'static str {
        use Message::*;
        match self {
            DiscoveryInquiry { .. } => "DiscoveryInquiry",
            DiscoveryReply { .. } => "DiscoveryReply",
            EndpointInquiry { .. } => "EndpointInquiry",
            EndpointReply { .. } => "EndpointReply",
            InvalidateMuid { .. } => "InvalidateMUID",
            Ack { .. } => "Ack",
            Nak { .. } => "Nak",
            ProfileInquiry { .. } => "ProfileInquiry",
            ProfileReply { .. } => "ProfileReply",
            SetProfileOn { .. } => "SetProfileOn",
            SetProfileOff { .. } => "SetProfileOff",
            ProfileEnabledReport { .. } => "ProfileEnabledReport",
            ProfileDisabledReport { .. } => "ProfileDisabledReport",
            ProfileAddedReport { .. } => "ProfileAddedReport",
            ProfileRemovedReport { .. } => "ProfileRemovedReport",
            ProfileDetailsInquiry { .. } => "ProfileDetailsInquiry",
            ProfileDetailsReply { .. } => "ProfileDetailsReply",
            ProfileSpecificData { .. } => "ProfileSpecificData",
            PropertyGetCapabilities { .. } => "PropertyGetCapabilities",
            PropertyGetCapabilitiesReply { .. } => "PropertyGetCapabilitiesReply",
            GetPropertyData { .. } => "GetPropertyData",
            GetPropertyDataReply { .. } => "GetPropertyDataReply",
            SetPropertyData { .. } => "SetPropertyData",
            SetPropertyDataReply { .. } => "SetPropertyDataReply",
            SubscribeProperty { .. } => "SubscribeProperty",
            SubscribePropertyReply { .. } => "SubscribePropertyReply",
            PropertyNotify { .. } => "PropertyNotify",
            ProcessInquiryCapabilities { .. } => "ProcessInquiryCapabilities",
            ProcessInquiryCapabilitiesReply { .. } => "ProcessInquiryCapabilitiesReply",
            MidiMessageReportInquiry { .. } => "MidiMessageReportInquiry",
            MidiMessageReportReply { .. } => "MidiMessageReportReply",
            MidiMessageReportEnd { .. } => "MidiMessageReportEnd",
        }
    }

    /// One-line field summary for log output.
    pub fn body_summary(&self) -> String {
        use Message::*;
        match self {
            DiscoveryInquiry {
                device,
                supported_features,
                max_sysex_size,
                ..
            }
            | DiscoveryReply {
                device,
                supported_features,
                max_sysex_size,
                ..
            } => format!(
                "manufacturer={:06X}, family={}, model={}, features={:#04x}, maxSysEx={}",
                device.manufacturer, device.family, device.model, supported_features, max_sysex_size
            ),
            EndpointInquiry { status, .. } => format!("status={status}"),
            EndpointReply { status, data, .. } => {
                format!("status={status}, dataSize={}", data.len())
            }
            InvalidateMuid { target_muid, .. } => format!("targetMUID={target_muid}"),
            Ack {
                original_sub_id,
                status_code,
                ..
            }
            | Nak {
                original_sub_id,
                status_code,
                ..
            } => format!("originalSubId={original_sub_id:#04x}, statusCode={status_code:#04x}"),
            ProfileInquiry { .. } | ProcessInquiryCapabilities { .. } | MidiMessageReportEnd { .. } => {
                String::new()
            }
            ProfileReply {
                enabled, disabled, ..
            } => format!("enabled={}, disabled={}", enabled.len(), disabled.len()),
            SetProfileOn {
                profile,
                num_channels,
                ..
            }
            | ProfileEnabledReport {
                profile,
                num_channels,
                ..
            }
            | ProfileDisabledReport {
                profile,
                num_channels,
                ..
            } => format!("profile={profile}, numChannels={num_channels}"),
            SetProfileOff { profile, .. }
            | ProfileAddedReport { profile, .. }
            | ProfileRemovedReport { profile, .. } => format!("profile={profile}"),
            ProfileDetailsInquiry {
                profile, target, ..
            } => format!("profile={profile}, target={target}"),
            ProfileDetailsReply {
                profile,
                target,
                data,
                ..
            } => format!("profile={profile}, target={target}, dataSize={}", data.len()),
            ProfileSpecificData { profile, data, .. } => {
                format!("profile={profile}, dataSize={}", data.len())
            }
            PropertyGetCapabilities {
                max_simultaneous_requests,
                ..
            }
            | PropertyGetCapabilitiesReply {
                max_simultaneous_requests,
                ..
            } => format!("maxSimultaneousRequests={max_simultaneous_requests}"),
            GetPropertyData {
                request_id, header, ..
            }
            | SetPropertyDataReply {
                request_id, header, ..
            } => format!(
                "requestId={request_id}, header={}",
                String::from_utf8_lossy(header)
            ),
            GetPropertyDataReply {
                request_id,
                header,
                body,
                ..
            }
            | SetPropertyData {
                request_id,
                header,
                body,
                ..
            }
            | SubscribeProperty {
                request_id,
                header,
                body,
                ..
            }
            | SubscribePropertyReply {
                request_id,
                header,
                body,
                ..
            }
            | PropertyNotify {
                request_id,
                header,
                body,
                ..
            } => format!(
                "requestId={request_id}, header={}, bodySize={}",
                String::from_utf8_lossy(header),
                body.len()
            ),
            ProcessInquiryCapabilitiesReply {
                supported_features, ..
            } => format!("supportedFeatures={supported_features:#04x}"),
            MidiMessageReportInquiry {
                message_data_control,
                system_messages,
                channel_controller_messages,
                note_data_messages,
                ..
            } => format!(
                "messageDataControl={message_data_control}, system={system_messages}, channelController={channel_controller_messages}, noteData={note_data_messages}"
            ),
            MidiMessageReportReply {
                system_messages,
                channel_controller_messages,
                note_data_messages,
                ..
            } => format!(
                "system={system_messages}, channelController={channel_controller_messages}, noteData={note_data_messages}"
            ),
        }
    }

    /// Serialize into one or more SysEx payloads.
    ///
    /// Property messages may emit several chunks under
    /// `config.max_property_chunk_size`; everything else emits exactly one.
    pub fn serialize(&self, config: &SerializeConfig) -> Vec<Vec<u8>> {
        use Message::*;
        match self {
            DiscoveryInquiry {
                common,
                device,
                supported_features,
                max_sysex_size,
                output_path_id,
            } => {
                let mut out = self.begin(common);
                put_device_details(&mut out, device);
                out.push(*supported_features);
                sysex::put_u28(&mut out, *max_sysex_size);
                out.push(*output_path_id);
                vec![out]
            }
            DiscoveryReply {
                common,
                device,
                supported_features,
                max_sysex_size,
                output_path_id,
                function_block,
            } => {
                let mut out = self.begin(common);
                put_device_details(&mut out, device);
                out.push(*supported_features);
                sysex::put_u28(&mut out, *max_sysex_size);
                out.push(*output_path_id);
                out.push(*function_block);
                vec![out]
            }
            EndpointInquiry { common, status } => {
                let mut out = self.begin(common);
                out.push(*status);
                vec![out]
            }
            EndpointReply {
                common,
                status,
                data,
            } => {
                let mut out = self.begin(common);
                out.push(*status);
                sysex::put_u14(&mut out, data.len() as u16);
                out.extend_from_slice(data);
                vec![out]
            }
            InvalidateMuid {
                common,
                target_muid,
            } => {
                let mut out = self.begin(common);
                sysex::put_muid(&mut out, *target_muid);
                vec![out]
            }
            Ack {
                common,
                original_sub_id,
                status_code,
                status_data,
                details,
                message,
            }
            | Nak {
                common,
                original_sub_id,
                status_code,
                status_data,
                details,
                message,
            } => {
                let mut out = self.begin(common);
                out.push(*original_sub_id);
                out.push(*status_code);
                out.push(*status_data);
                out.extend_from_slice(details);
                sysex::put_u14(&mut out, message.len() as u16);
                out.extend_from_slice(message);
                vec![out]
            }
            ProfileInquiry { common }
            | ProcessInquiryCapabilities { common }
            | MidiMessageReportEnd { common } => vec![self.begin(common)],
            ProfileReply {
                common,
                enabled,
                disabled,
            } => {
                let mut out = self.begin(common);
                sysex::put_u14(&mut out, enabled.len() as u16);
                for id in enabled {
                    out.extend_from_slice(&id.0);
                }
                sysex::put_u14(&mut out, disabled.len() as u16);
                for id in disabled {
                    out.extend_from_slice(&id.0);
                }
                vec![out]
            }
            SetProfileOn {
                common,
                profile,
                num_channels,
            }
            | ProfileEnabledReport {
                common,
                profile,
                num_channels,
            }
            | ProfileDisabledReport {
                common,
                profile,
                num_channels,
            } => {
                let mut out = self.begin(common);
                out.extend_from_slice(&profile.0);
                sysex::put_u14(&mut out, *num_channels);
                vec![out]
            }
            SetProfileOff { common, profile }
            | ProfileAddedReport { common, profile }
            | ProfileRemovedReport { common, profile } => {
                let mut out = self.begin(common);
                out.extend_from_slice(&profile.0);
                vec![out]
            }
            ProfileDetailsInquiry {
                common,
                profile,
                target,
            } => {
                let mut out = self.begin(common);
                out.extend_from_slice(&profile.0);
                out.push(*target);
                vec![out]
            }
            ProfileDetailsReply {
                common,
                profile,
                target,
                data,
            } => {
                let mut out = self.begin(common);
                out.extend_from_slice(&profile.0);
                out.push(*target);
                sysex::put_u14(&mut out, data.len() as u16);
                out.extend_from_slice(data);
                vec![out]
            }
            ProfileSpecificData {
                common,
                profile,
                data,
            } => {
                let mut out = self.begin(common);
                out.extend_from_slice(&profile.0);
                sysex::put_u28(&mut out, data.len() as u32);
                out.extend_from_slice(data);
                vec![out]
            }
            PropertyGetCapabilities {
                common,
                max_simultaneous_requests,
            }
            | PropertyGetCapabilitiesReply {
                common,
                max_simultaneous_requests,
            } => {
                let mut out = self.begin(common);
                out.push(*max_simultaneous_requests);
                vec![out]
            }
            GetPropertyData {
                common,
                request_id,
                header,
            } => self.property_chunks(config, common, *request_id, header, &[]),
            SetPropertyDataReply {
                common,
                request_id,
                header,
            } => self.property_chunks(config, common, *request_id, header, &[]),
            GetPropertyDataReply {
                common,
                request_id,
                header,
                body,
            }
            | SetPropertyData {
                common,
                request_id,
                header,
                body,
            }
            | SubscribeProperty {
                common,
                request_id,
                header,
                body,
            }
            | SubscribePropertyReply {
                common,
                request_id,
                header,
                body,
            }
            | PropertyNotify {
                common,
                request_id,
                header,
                body,
            } => self.property_chunks(config, common, *request_id, header, body),
            ProcessInquiryCapabilitiesReply {
                common,
                supported_features,
            } => {
                let mut out = self.begin(common);
                out.push(*supported_features);
                vec![out]
            }
            MidiMessageReportInquiry {
                common,
                message_data_control,
                system_messages,
                channel_controller_messages,
                note_data_messages,
            } => {
                let mut out = self.begin(common);
                out.push(*message_data_control);
                out.push(*system_messages);
                out.push(0); // reserved: other messages
                out.push(*channel_controller_messages);
                out.push(*note_data_messages);
                vec![out]
            }
            MidiMessageReportReply {
                common,
                system_messages,
                channel_controller_messages,
                note_data_messages,
            } => {
                let mut out = self.begin(common);
                out.push(*system_messages);
                out.push(0); // reserved: other messages
                out.push(*channel_controller_messages);
                out.push(*note_data_messages);
                vec![out]
            }
        }
    }

    fn begin(&self, common: &Common) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        sysex::put_common_header(
            &mut out,
            common.address,
            self.sub_id2(),
            common.source_muid,
            common.destination_muid,
        );
        out
    }

    /// Split a property payload into packets. The first chunk carries the
    /// JSON header and fills the remainder of its budget with body bytes;
    /// continuation chunks carry a zero-length header. Chunk indices are
    /// 1-based and the chunk count is identical across all packets.
    fn property_chunks(
        &self,
        config: &SerializeConfig,
        common: &Common,
        request_id: u8,
        header: &[u8],
        body: &[u8],
    ) -> Vec<Vec<u8>> {
        let budget = config.max_property_chunk_size.max(1);
        let first_share = budget.saturating_sub(header.len()).max(1);

        if body.len() <= first_share {
            return vec![self.property_packet(common, request_id, header, 1, 1, body)];
        }

        let rest = &body[first_share..];
        let num_chunks = 1 + rest.len().div_ceil(budget);
        let mut packets = Vec::with_capacity(num_chunks);
        packets.push(self.property_packet(
            common,
            request_id,
            header,
            num_chunks as u16,
            1,
            &body[..first_share],
        ));
        for (i, chunk) in rest.chunks(budget).enumerate() {
            packets.push(self.property_packet(
                common,
                request_id,
                &[],
                num_chunks as u16,
                (i + 2) as u16,
                chunk,
            ));
        }
        packets
    }

    fn property_packet(
        &self,
        common: &Common,
        request_id: u8,
        header: &[u8],
        num_chunks: u16,
        chunk_index: u16,
        body: &[u8],
    ) -> Vec<u8> {
        let mut out = self.begin(common);
        out.push(request_id);
        sysex::put_u14(&mut out, header.len() as u16);
        out.extend_from_slice(header);
        sysex::put_u14(&mut out, num_chunks);
        sysex::put_u14(&mut out, chunk_index);
        sysex::put_u14(&mut out, body.len() as u16);
        out.extend_from_slice(body);
        out
    }
}

fn put_device_details(dst: &mut Vec<u8>, device: &DeviceDetails) {
    sysex::put_u21(dst, device.manufacturer);
    sysex::put_u14(dst, device.family);
    sysex::put_u14(dst, device.model);
    sysex::put_u28(dst, device.software_revision);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn common() -> Common {
        Common::new(Muid::new(0x0102_0304), Muid::new(0x0506_0708), 0x7F, 0)
    }

    #[test]
    fn discovery_inquiry_is_30_bytes() {
        let msg = Message::DiscoveryInquiry {
            common: Common::new(Muid::new(0x0102_0304), Muid::BROADCAST, 0x7F, 0),
            device: DeviceDetails {
                manufacturer: 0x12_3456,
                family: 0x1234,
                model: 0x0567,
                software_revision: 0x0089_ABCD,
            },
            supported_features: 0x1C,
            max_sysex_size: 4096,
            output_path_id: 0,
        };
        let packets = msg.serialize(&SerializeConfig::default());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 30);
        assert!(packets[0].iter().all(|b| b & 0x80 == 0));
    }

    #[test]
    fn discovery_reply_is_31_bytes() {
        let msg = Message::DiscoveryReply {
            common: common(),
            device: DeviceDetails::default(),
            supported_features: 0x1C,
            max_sysex_size: 4096,
            output_path_id: 0,
            function_block: 0,
        };
        assert_eq!(msg.serialize(&SerializeConfig::default())[0].len(), 31);
    }

    #[test]
    fn empty_body_property_message_is_one_chunk() {
        let msg = Message::GetPropertyData {
            common: common(),
            request_id: 42,
            header: Bytes::from_static(b"{\"resource\":\"ResourceList\"}"),
        };
        let packets = msg.serialize(&SerializeConfig::default());
        assert_eq!(packets.len(), 1);
        // request id right after the common header
        assert_eq!(packets[0][13], 42);
    }

    #[test]
    fn large_body_splits_into_sequential_chunks() {
        let header = Bytes::from_static(b"{\"resource\":\"X\"}");
        let body: Vec<u8> = (0..3072u32).map(|i| (i % 0x70) as u8).collect();
        let msg = Message::SetPropertyData {
            common: common(),
            request_id: 7,
            header: header.clone(),
            body: Bytes::from(body.clone()),
        };
        let config = SerializeConfig {
            receivable_max_sysex_size: 4096,
            max_property_chunk_size: 512,
        };
        let packets = msg.serialize(&config);
        // first chunk shares its budget with the header, so 3072 bytes need 7
        assert_eq!(packets.len(), 7);

        let mut reassembled = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            let header_len = crate::sysex::read_u14(packet, 14) as usize;
            if i == 0 {
                assert_eq!(header_len, header.len());
            } else {
                assert_eq!(header_len, 0);
            }
            let chunk_count = crate::sysex::read_u14(packet, 16 + header_len);
            let chunk_index = crate::sysex::read_u14(packet, 18 + header_len);
            assert_eq!(chunk_count, packets.len() as u16);
            assert_eq!(chunk_index, (i + 1) as u16);
            let body_len = crate::sysex::read_u14(packet, 20 + header_len) as usize;
            reassembled.extend_from_slice(&packet[22 + header_len..22 + header_len + body_len]);
        }
        assert_eq!(reassembled, body);
    }

    #[test]
    fn nak_layout() {
        let msg = Message::Nak {
            common: common(),
            original_sub_id: 0x38,
            status_code: 0x41,
            status_data: 0,
            details: [0; 5],
            message: Bytes::from_static(b"bad"),
        };
        let packet = &msg.serialize(&SerializeConfig::default())[0];
        assert_eq!(packet[3], 0x7F);
        assert_eq!(packet[13], 0x38);
        assert_eq!(packet[14], 0x41);
        assert_eq!(crate::sysex::read_u14(packet, 21), 3);
        assert_eq!(&packet[23..], b"bad");
    }
}

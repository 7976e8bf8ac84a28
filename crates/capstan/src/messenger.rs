//! The messenger: sole owner of the framing-to-semantics boundary.
//!
//! Inbound, [`MidiCIDevice::process_input`] parses the SysEx payload,
//! applies the destination filter, dispatches on sub-ID #2 and routes to
//! the host or client facades. Outbound, [`MidiCIDevice::send`] serializes
//! under the peer's advertised size limit and pushes every chunk through
//! the output sink.
//!
//! No failure escapes `process_input`: malformed semantics become NAKs,
//! everything else becomes a log entry.

use std::time::Instant;

use bytes::Bytes;
use capwire::sysex::{self, SubId2};
use capwire::{retrieval, Common, Message, Muid, ProfileId, SerializeConfig, ADDRESS_FUNCTION_BLOCK};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::device::{DeviceError, MidiCIDevice};
use crate::profiles::{default_num_channels, MidiCIProfile};
use crate::properties::commonrules::{command, nak_status, Encoding, RequestHeader};
use crate::properties::foundational::resource;
use crate::properties::host::end_header;
use crate::{LogContent, LogDirection};

impl MidiCIDevice {
    // === Outbound path ===

    /// Serialize and emit a message. Property messages may leave as several
    /// chunks; chunks go to the sink in order under the message's group.
    pub fn send(&mut self, message: &Message) -> Result<(), DeviceError> {
        self.log(LogDirection::Out, LogContent::Message(message.clone()));
        let serialize_config = self.effective_serialize_config(message.common().destination_muid);
        let group = message.common().group;
        let packets = message.serialize(&serialize_config);
        let sender = self.output_sender.as_mut().ok_or(DeviceError::NoOutputSender)?;
        for packet in packets {
            if !sender(group, &packet) {
                return Err(DeviceError::SendFailed);
            }
        }
        Ok(())
    }

    /// Cap the serializer to the peer's advertised receivable size.
    fn effective_serialize_config(&self, destination: Muid) -> SerializeConfig {
        let mut serialize_config = SerializeConfig {
            receivable_max_sysex_size: self.config.receivable_max_sysex_size,
            max_property_chunk_size: self.config.max_property_chunk_size,
        };
        if !destination.is_broadcast() {
            if let Some(connection) = self.connections.get(&destination) {
                let limit = connection.max_sysex_size() as usize;
                if limit > 0 {
                    serialize_config.max_property_chunk_size =
                        serialize_config.max_property_chunk_size.min(limit);
                    serialize_config.receivable_max_sysex_size =
                        serialize_config.receivable_max_sysex_size.min(limit);
                }
            }
        }
        serialize_config
    }

    /// Send from a receive handler: failures are logged, never propagated.
    fn send_logged(&mut self, message: Message) {
        if let Err(e) = self.send(&message) {
            warn!("failed to send {}: {e}", message.label());
            self.log_text(LogDirection::Out, format!("send failed: {e}"));
        }
    }

    fn common_to(&self, destination: Muid, address: u8, group: u8) -> Common {
        Common::new(self.muid(), destination, address, group)
    }

    // === Management sends ===

    /// Broadcast a Discovery Inquiry on the configured group.
    pub fn send_discovery(&mut self) -> Result<(), DeviceError> {
        let message = Message::DiscoveryInquiry {
            common: self.common_to(Muid::BROADCAST, ADDRESS_FUNCTION_BLOCK, self.config.group),
            device: self.config.device_info.device_details(),
            supported_features: self.config.capability_inquiry_supported,
            max_sysex_size: self.config.receivable_max_sysex_size as u32,
            output_path_id: 0,
        };
        self.send(&message)
    }

    pub fn send_discovery_reply(&mut self, group: u8, destination: Muid) -> Result<(), DeviceError> {
        let message = Message::DiscoveryReply {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, group),
            device: self.config.device_info.device_details(),
            supported_features: self.config.capability_inquiry_supported,
            max_sysex_size: self.config.receivable_max_sysex_size as u32,
            output_path_id: 0,
            function_block: 0,
        };
        self.send(&message)
    }

    pub fn send_endpoint_inquiry(&mut self, group: u8, destination: Muid, status: u8) -> Result<(), DeviceError> {
        let message = Message::EndpointInquiry {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, group),
            status,
        };
        self.send(&message)
    }

    pub fn send_invalidate_muid(&mut self, group: u8, destination: Muid, target_muid: Muid) -> Result<(), DeviceError> {
        let message = Message::InvalidateMuid {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, group),
            target_muid,
        };
        self.send(&message)
    }

    fn send_nak(&mut self, request_common: &Common, original: SubId2, status_code: u8, text: &str) {
        let message = Message::Nak {
            common: self.common_to(request_common.source_muid, request_common.address, request_common.group),
            original_sub_id: original.to_u8(),
            status_code,
            status_data: 0,
            details: [0; 5],
            message: Bytes::copy_from_slice(text.as_bytes()),
        };
        self.send_logged(message);
    }

    // === Profile sends ===

    pub fn send_profile_inquiry(&mut self, group: u8, destination: Muid) -> Result<(), DeviceError> {
        let message = Message::ProfileInquiry {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, group),
        };
        self.send(&message)
    }

    /// Ask a peer to switch a profile on or off.
    pub fn request_profile_set(
        &mut self,
        destination: Muid,
        group: u8,
        address: u8,
        profile: ProfileId,
        enabled: bool,
        num_channels_requested: u16,
    ) -> Result<(), DeviceError> {
        let common = self.common_to(destination, address, group);
        let message = if enabled {
            Message::SetProfileOn {
                common,
                profile,
                num_channels: default_num_channels(address, num_channels_requested),
            }
        } else {
            Message::SetProfileOff { common, profile }
        };
        self.send(&message)
    }

    pub fn send_profile_added_report(&mut self, group: u8, address: u8, profile: ProfileId) -> Result<(), DeviceError> {
        let message = Message::ProfileAddedReport {
            common: self.common_to(Muid::BROADCAST, address, group),
            profile,
        };
        self.send(&message)
    }

    pub fn send_profile_removed_report(&mut self, group: u8, address: u8, profile: ProfileId) -> Result<(), DeviceError> {
        let message = Message::ProfileRemovedReport {
            common: self.common_to(Muid::BROADCAST, address, group),
            profile,
        };
        self.send(&message)
    }

    pub fn send_profile_enabled_report(
        &mut self,
        group: u8,
        address: u8,
        profile: ProfileId,
        num_channels: u16,
    ) -> Result<(), DeviceError> {
        let message = Message::ProfileEnabledReport {
            common: self.common_to(Muid::BROADCAST, address, group),
            profile,
            num_channels,
        };
        self.send(&message)
    }

    pub fn send_profile_disabled_report(
        &mut self,
        group: u8,
        address: u8,
        profile: ProfileId,
        num_channels: u16,
    ) -> Result<(), DeviceError> {
        let message = Message::ProfileDisabledReport {
            common: self.common_to(Muid::BROADCAST, address, group),
            profile,
            num_channels,
        };
        self.send(&message)
    }

    pub fn send_profile_details_inquiry(
        &mut self,
        group: u8,
        destination: Muid,
        profile: ProfileId,
        target: u8,
    ) -> Result<(), DeviceError> {
        let message = Message::ProfileDetailsInquiry {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, group),
            profile,
            target,
        };
        self.send(&message)
    }

    /// Enable a local profile and broadcast the Enabled report.
    pub fn enable_local_profile(
        &mut self,
        group: u8,
        address: u8,
        profile: ProfileId,
        num_channels: u16,
    ) -> Result<(), DeviceError> {
        let updated = self
            .profile_host
            .enable_profile(address, profile, num_channels)
            .ok_or(DeviceError::UnknownProfile(profile))?;
        self.send_profile_enabled_report(
            group,
            address,
            profile,
            default_num_channels(address, updated.num_channels_requested),
        )
    }

    /// Disable a local profile and broadcast the Disabled report.
    pub fn disable_local_profile(
        &mut self,
        group: u8,
        address: u8,
        profile: ProfileId,
        num_channels: u16,
    ) -> Result<(), DeviceError> {
        let updated = self
            .profile_host
            .disable_profile(address, profile, num_channels)
            .ok_or(DeviceError::UnknownProfile(profile))?;
        self.send_profile_disabled_report(
            group,
            address,
            profile,
            default_num_channels(address, updated.num_channels_requested),
        )
    }

    // === Property exchange sends ===

    pub fn send_property_get_capabilities(
        &mut self,
        group: u8,
        destination: Muid,
        max_simultaneous_requests: u8,
    ) -> Result<(), DeviceError> {
        let message = Message::PropertyGetCapabilities {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, group),
            max_simultaneous_requests,
        };
        self.send(&message)
    }

    /// Fire-and-forget GET toward a peer. Returns the allocated request id.
    pub fn send_get_property_data(
        &mut self,
        destination: Muid,
        property_id: &str,
        res_id: Option<&str>,
        encoding: Option<Encoding>,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<u8, DeviceError> {
        let request_id = self.next_request_id();
        let header = RequestHeader {
            resource: property_id.to_string(),
            res_id: res_id.map(str::to_string),
            mutual_encoding: encoding
                .filter(|e| *e != Encoding::Ascii)
                .map(|e| e.as_str().to_string()),
            set_partial: Some(false),
            offset,
            limit,
            ..Default::default()
        }
        .to_bytes();

        let local_muid = self.muid();
        let connection = self
            .connections
            .get_mut(&destination)
            .ok_or(DeviceError::UnknownPeer(destination))?;
        connection
            .properties
            .record_open_request(request_id, local_muid, destination, header.clone());

        let message = Message::GetPropertyData {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, self.config.group),
            request_id,
            header,
        };
        self.send(&message)?;
        Ok(request_id)
    }

    /// GET with a one-shot callback fired on the matching reply.
    pub fn get_property_data(
        &mut self,
        destination: Muid,
        property_id: &str,
        res_id: Option<&str>,
        callback: crate::properties::client::PropertyReplyCallback,
    ) -> Result<u8, DeviceError> {
        let request_id = self.send_get_property_data(destination, property_id, res_id, None, None, None)?;
        if let Some(connection) = self.connections.get_mut(&destination) {
            connection.properties.register_get_callback(request_id, callback);
        }
        Ok(request_id)
    }

    /// Fire-and-forget SET toward a peer. Returns the allocated request id.
    pub fn send_set_property_data(
        &mut self,
        destination: Muid,
        property_id: &str,
        res_id: Option<&str>,
        data: &[u8],
        encoding: Option<Encoding>,
        is_partial: bool,
    ) -> Result<u8, DeviceError> {
        let encoding = encoding.unwrap_or_default();
        if encoding == Encoding::Ascii && !data.is_empty() {
            // an un-encoded body is JSON by the Common Rules; refuse junk early
            serde_json::from_slice::<serde::de::IgnoredAny>(data)?;
        }
        let encoded = crate::properties::commonrules::encode_body(data, encoding)?;

        let request_id = self.next_request_id();
        let header = RequestHeader {
            resource: property_id.to_string(),
            res_id: res_id.map(str::to_string),
            mutual_encoding: (encoding != Encoding::Ascii).then(|| encoding.as_str().to_string()),
            set_partial: Some(is_partial),
            ..Default::default()
        }
        .to_bytes();

        let local_muid = self.muid();
        let connection = self
            .connections
            .get_mut(&destination)
            .ok_or(DeviceError::UnknownPeer(destination))?;
        connection
            .properties
            .record_open_request(request_id, local_muid, destination, header.clone());

        let message = Message::SetPropertyData {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, self.config.group),
            request_id,
            header,
            body: Bytes::from(encoded),
        };
        self.send(&message)?;
        Ok(request_id)
    }

    /// SET with a one-shot callback fired on the matching reply.
    pub fn set_property_data(
        &mut self,
        destination: Muid,
        property_id: &str,
        res_id: Option<&str>,
        data: &[u8],
        is_partial: bool,
        callback: crate::properties::client::PropertyReplyCallback,
    ) -> Result<u8, DeviceError> {
        let request_id =
            self.send_set_property_data(destination, property_id, res_id, data, None, is_partial)?;
        if let Some(connection) = self.connections.get_mut(&destination) {
            connection.properties.register_set_callback(request_id, callback);
        }
        Ok(request_id)
    }

    /// Start a subscription on a peer's property.
    pub fn send_subscribe_property(
        &mut self,
        destination: Muid,
        property_id: &str,
        res_id: Option<&str>,
        encoding: Option<Encoding>,
        subscription_id: Option<String>,
    ) -> Result<u8, DeviceError> {
        let request_id = self.next_request_id();
        let header = RequestHeader {
            resource: property_id.to_string(),
            command: Some(command::START.to_string()),
            res_id: res_id.map(str::to_string),
            mutual_encoding: encoding
                .filter(|e| *e != Encoding::Ascii)
                .map(|e| e.as_str().to_string()),
            ..Default::default()
        }
        .to_bytes();

        let connection = self
            .connections
            .get_mut(&destination)
            .ok_or(DeviceError::UnknownPeer(destination))?;
        connection.properties.add_pending_subscription(
            request_id,
            subscription_id,
            property_id,
            res_id.unwrap_or(""),
        );

        let message = Message::SubscribeProperty {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, self.config.group),
            request_id,
            header,
            body: Bytes::new(),
        };
        self.send(&message)?;
        Ok(request_id)
    }

    /// End a subscription we hold on a peer's property.
    pub fn send_unsubscribe_property(
        &mut self,
        destination: Muid,
        property_id: &str,
        res_id: &str,
    ) -> Result<u8, DeviceError> {
        let request_id = self.next_request_id();
        let connection = self
            .connections
            .get_mut(&destination)
            .ok_or(DeviceError::UnknownPeer(destination))?;
        let subscribe_id = connection
            .properties
            .begin_unsubscribe(property_id, res_id, request_id)
            .ok_or_else(|| DeviceError::UnknownSubscription(property_id.to_string()))?;

        let header = RequestHeader {
            resource: property_id.to_string(),
            command: Some(command::END.to_string()),
            subscribe_id,
            ..Default::default()
        }
        .to_bytes();
        let message = Message::SubscribeProperty {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, self.config.group),
            request_id,
            header,
            body: Bytes::new(),
        };
        self.send(&message)?;
        Ok(request_id)
    }

    // === Host-side property operations ===

    /// Write a local property value and fan the change out to subscribers.
    ///
    /// `is_partial` is a hint forwarded to subscribers unchanged; the store
    /// always keeps the full payload given here.
    pub fn set_property_value(
        &mut self,
        property_id: &str,
        res_id: &str,
        data: Bytes,
        is_partial: bool,
    ) -> Result<(), DeviceError> {
        let media_type = self.property_host.media_type_for(property_id);
        self.property_host
            .store_value(property_id, res_id, &media_type, data.clone());
        self.notify_property_subscribers(property_id, &data, is_partial);
        Ok(())
    }

    /// Replace the local device info and notify `DeviceInfo` subscribers.
    pub fn update_device_info(&mut self, device_info: crate::config::DeviceInfo) {
        self.config.device_info = device_info;
        let body = serde_json::to_vec(&crate::properties::foundational::device_info_to_json(
            &self.config.device_info,
        ))
        .unwrap_or_default();
        self.notify_property_subscribers(resource::DEVICE_INFO, &body, false);
    }

    /// Replace the local channel list and notify `ChannelList` subscribers.
    pub fn update_channel_list(&mut self, channel_list: crate::properties::foundational::ChannelList) {
        self.config.channel_list = channel_list;
        let body = serde_json::to_vec(&crate::properties::foundational::channel_list_to_json(
            &self.config.channel_list,
        ))
        .unwrap_or_default();
        self.notify_property_subscribers(resource::CHANNEL_LIST, &body, false);
    }

    /// Replace the local JSON schema and notify `JSONSchema` subscribers.
    pub fn update_json_schema(&mut self, json_schema: String) {
        self.config.json_schema_string = json_schema;
        let body = if self.config.json_schema_string.is_empty() {
            b"{}".to_vec()
        } else {
            self.config.json_schema_string.clone().into_bytes()
        };
        self.notify_property_subscribers(resource::JSON_SCHEMA, &body, false);
    }

    /// One SubscribeProperty notification per subscriber, to broadcast;
    /// subscribers filter by `subscribeId`.
    fn notify_property_subscribers(&mut self, property_id: &str, data: &[u8], is_partial: bool) {
        let notifications = self.property_host.build_notifications(property_id, data, is_partial);
        for (header, body) in notifications {
            let request_id = self.next_request_id();
            let message = Message::SubscribeProperty {
                common: self.common_to(Muid::BROADCAST, ADDRESS_FUNCTION_BLOCK, self.config.group),
                request_id,
                header,
                body: Bytes::from(body),
            };
            self.send_logged(message);
        }
    }

    /// Terminate one subscriber's subscription from the host side.
    pub fn shutdown_subscription(
        &mut self,
        destination: Muid,
        property_id: &str,
        res_id: &str,
    ) -> Result<(), DeviceError> {
        let header = self
            .property_host
            .shutdown_header(property_id, res_id)
            .ok_or_else(|| DeviceError::UnknownSubscription(property_id.to_string()))?;
        self.property_host
            .remove_subscriptions_for(destination, property_id, res_id);
        let request_id = self.next_request_id();
        let message = Message::SubscribeProperty {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, self.config.group),
            request_id,
            header,
            body: Bytes::new(),
        };
        self.send(&message)
    }

    /// Send `command=end` to every subscriber, then clear them all.
    pub fn terminate_subscriptions_to_all_subscribers(&mut self, group: u8) {
        let subscriptions = self.property_host.take_all_subscriptions();
        for subscription in subscriptions {
            let header = end_header(&subscription.resource, Some(&subscription.subscribe_id));
            let request_id = self.next_request_id();
            let message = Message::SubscribeProperty {
                common: self.common_to(subscription.subscriber_muid, ADDRESS_FUNCTION_BLOCK, group),
                request_id,
                header,
                body: Bytes::new(),
            };
            self.send_logged(message);
        }
    }

    // === Process inquiry sends ===

    pub fn send_process_inquiry_capabilities(&mut self, group: u8, destination: Muid) -> Result<(), DeviceError> {
        let message = Message::ProcessInquiryCapabilities {
            common: self.common_to(destination, ADDRESS_FUNCTION_BLOCK, group),
        };
        self.send(&message)
    }

    pub fn send_midi_message_report_inquiry(
        &mut self,
        group: u8,
        address: u8,
        destination: Muid,
        message_data_control: u8,
        system_messages: u8,
        channel_controller_messages: u8,
        note_data_messages: u8,
    ) -> Result<(), DeviceError> {
        let message = Message::MidiMessageReportInquiry {
            common: self.common_to(destination, address, group),
            message_data_control,
            system_messages,
            channel_controller_messages,
            note_data_messages,
        };
        self.send(&message)
    }

    // === Inbound path ===

    /// Feed one received CI payload (starting at the 0x7E byte, F0/F7
    /// stripped) into the engine.
    pub fn process_input(&mut self, group: u8, data: &[u8]) {
        if data.len() < sysex::COMMON_HEADER_SIZE
            || data[0] != sysex::UNIVERSAL_SYSEX
            || data[2] != sysex::SYSEX_SUB_ID_CI
        {
            return;
        }
        if data.iter().any(|b| b & 0x80 != 0) {
            debug!("dropping CI payload with bit 7 set in a 7-bit field");
            return;
        }

        let source = retrieval::source_muid(data);
        let destination = retrieval::destination_muid(data);
        let common = Common::new(source, destination, retrieval::address(data), group);

        if destination != self.muid() && !destination.is_broadcast() {
            return;
        }
        let Some(kind) = SubId2::from_u8(retrieval::sub_id2(data)) else {
            // unknown sub-IDs are accepted silently for forward compatibility
            return;
        };

        match kind {
            SubId2::DiscoveryInquiry => self.on_discovery_inquiry(&common, data),
            SubId2::DiscoveryReply => self.on_discovery_reply(&common, data),
            SubId2::EndpointInquiry => self.on_endpoint_inquiry(&common, data),
            SubId2::EndpointReply => self.on_endpoint_reply(&common, data),
            SubId2::InvalidateMuid => self.on_invalidate_muid(&common, data),
            SubId2::Ack => self.on_ack_nak(&common, data, false),
            SubId2::Nak => self.on_ack_nak(&common, data, true),
            SubId2::ProfileInquiry => self.on_profile_inquiry(&common),
            SubId2::ProfileInquiryReply => self.on_profile_reply(&common, data),
            SubId2::SetProfileOn => self.on_set_profile_on(&common, data),
            SubId2::SetProfileOff => self.on_set_profile_off(&common, data),
            SubId2::ProfileEnabledReport => self.on_profile_enabled_report(&common, data),
            SubId2::ProfileDisabledReport => self.on_profile_disabled_report(&common, data),
            SubId2::ProfileAddedReport => self.on_profile_added_report(&common, data),
            SubId2::ProfileRemovedReport => self.on_profile_removed_report(&common, data),
            SubId2::ProfileDetailsInquiry => self.on_profile_details_inquiry(&common, data),
            SubId2::ProfileDetailsReply => self.on_profile_details_reply(&common, data),
            SubId2::ProfileSpecificData => self.on_profile_specific_data(&common, data),
            SubId2::PropertyGetCapabilities => self.on_property_capabilities(&common, data),
            SubId2::PropertyGetCapabilitiesReply => self.on_property_capabilities_reply(&common, data),
            SubId2::GetPropertyData => self.on_get_property_data(&common, data),
            SubId2::GetPropertyDataReply => self.on_get_property_data_reply(&common, data),
            SubId2::SetPropertyData => self.on_set_property_data(&common, data),
            SubId2::SetPropertyDataReply => self.on_set_property_data_reply(&common, data),
            SubId2::SubscribeProperty => self.on_subscribe_property(&common, data),
            SubId2::SubscribePropertyReply => self.on_subscribe_property_reply(&common, data),
            SubId2::PropertyNotify => self.on_property_notify(&common, data),
            SubId2::ProcessInquiryCapabilities => self.on_process_inquiry(&common),
            SubId2::ProcessInquiryCapabilitiesReply => self.on_process_inquiry_reply(&common, data),
            SubId2::MidiMessageReportInquiry => self.on_midi_message_report_inquiry(&common, data),
            SubId2::MidiMessageReportReply => self.on_midi_message_report_reply(&common, data),
            SubId2::MidiMessageReportEnd => self.on_midi_message_report_end(&common),
        }
    }

    /// Log an accepted inbound message and fire the message observers.
    fn receive(&mut self, message: &Message) {
        self.log(LogDirection::In, LogContent::Message(message.clone()));
        self.notify_message(message);
    }

    // === Management handlers ===

    fn on_discovery_inquiry(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 30 {
            return;
        }
        let message = Message::DiscoveryInquiry {
            common: *common,
            device: retrieval::device_details(data),
            supported_features: retrieval::supported_features(data),
            max_sysex_size: retrieval::max_sysex_size(data),
            output_path_id: retrieval::output_path_id(data),
        };
        self.receive(&message);
        if let Err(e) = self.send_discovery_reply(common.group, common.source_muid) {
            warn!("discovery reply failed: {e}");
        }
    }

    fn on_discovery_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 30 {
            return;
        }
        let details = retrieval::device_details(data);
        let max_sysex = retrieval::max_sysex_size(data);
        let message = Message::DiscoveryReply {
            common: *common,
            device: details,
            supported_features: retrieval::supported_features(data),
            max_sysex_size: max_sysex,
            output_path_id: retrieval::output_path_id(data),
            function_block: retrieval::function_block(data),
        };
        self.receive(&message);

        // a new reply replaces whatever we previously knew about this MUID
        let connection = Connection::new(
            common.source_muid,
            details,
            max_sysex,
            self.config.pending_chunk_timeout,
        );
        self.store_connection(connection);

        let group = common.group;
        let target = common.source_muid;
        if self.config.auto_send_endpoint_inquiry {
            if let Err(e) = self.send_endpoint_inquiry(group, target, 0) {
                warn!("endpoint inquiry failed: {e}");
            }
        }
        if self.config.auto_send_profile_inquiry {
            if let Err(e) = self.send_profile_inquiry(group, target) {
                warn!("profile inquiry failed: {e}");
            }
        }
        if self.config.auto_send_property_exchange_capabilities_inquiry {
            let max_requests = self.config.max_simultaneous_property_requests;
            if let Err(e) = self.send_property_get_capabilities(group, target, max_requests) {
                warn!("property capabilities inquiry failed: {e}");
            }
        }
        if self.config.auto_send_process_inquiry {
            if let Err(e) = self.send_process_inquiry_capabilities(group, target) {
                warn!("process inquiry failed: {e}");
            }
        }
    }

    fn on_endpoint_inquiry(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 14 {
            return;
        }
        let status = data[13];
        let message = Message::EndpointInquiry {
            common: *common,
            status,
        };
        self.receive(&message);

        let payload = if status == 0 && !self.config.product_instance_id.is_empty() {
            Bytes::copy_from_slice(self.config.product_instance_id.as_bytes())
        } else {
            Bytes::new()
        };
        let reply = Message::EndpointReply {
            common: self.common_to(common.source_muid, common.address, common.group),
            status,
            data: payload,
        };
        self.send_logged(reply);
    }

    fn on_endpoint_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 16 {
            return;
        }
        let status = data[13];
        let length = sysex::read_u14(data, 14) as usize;
        let end = (16 + length).min(data.len());
        let payload = Bytes::copy_from_slice(&data[16..end]);
        let message = Message::EndpointReply {
            common: *common,
            status,
            data: payload.clone(),
        };
        self.receive(&message);

        if status == 0 {
            if let Some(connection) = self.connections.get_mut(&common.source_muid) {
                connection.set_product_instance_id(String::from_utf8_lossy(&payload).into_owned());
            }
        }
    }

    fn on_invalidate_muid(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 17 {
            return;
        }
        let target_muid = retrieval::muid_to_invalidate(data);
        let message = Message::InvalidateMuid {
            common: *common,
            target_muid,
        };
        self.receive(&message);
        self.remove_connection(target_muid);
    }

    fn on_ack_nak(&mut self, common: &Common, data: &[u8], is_nak: bool) {
        if data.len() < 23 {
            return;
        }
        let mut details = [0u8; 5];
        details.copy_from_slice(&data[16..21]);
        let length = sysex::read_u14(data, 21) as usize;
        let end = (23 + length).min(data.len());
        let text = Bytes::copy_from_slice(&data[23..end]);
        let message = if is_nak {
            Message::Nak {
                common: *common,
                original_sub_id: data[13],
                status_code: data[14],
                status_data: data[15],
                details,
                message: text,
            }
        } else {
            Message::Ack {
                common: *common,
                original_sub_id: data[13],
                status_code: data[14],
                status_data: data[15],
                details,
                message: text,
            }
        };
        self.receive(&message);
    }

    // === Profile handlers ===

    fn on_profile_inquiry(&mut self, common: &Common) {
        let message = Message::ProfileInquiry { common: *common };
        self.receive(&message);

        // 0x7F asks for the whole function block: one reply per populated
        // address; otherwise a single reply for the asked address
        let addresses = if common.address == ADDRESS_FUNCTION_BLOCK {
            self.profile_host.profiles().addresses()
        } else {
            vec![common.address]
        };
        for address in addresses {
            let enabled = self.profile_host.profiles().matching_profiles(address, true);
            let disabled = self.profile_host.profiles().matching_profiles(address, false);
            let reply = Message::ProfileReply {
                common: self.common_to(common.source_muid, address, common.group),
                enabled,
                disabled,
            };
            self.send_logged(reply);
        }
    }

    fn on_profile_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 15 {
            return;
        }
        let (enabled, disabled) = retrieval::profile_set(data);
        let message = Message::ProfileReply {
            common: *common,
            enabled: enabled.clone(),
            disabled: disabled.clone(),
        };
        self.receive(&message);

        let num_channels = if common.address >= 0x7E { 0 } else { 1 };
        if let Some(connection) = self.connections.get_mut(&common.source_muid) {
            for profile in enabled {
                connection.profiles.add(MidiCIProfile {
                    profile,
                    group: common.group,
                    address: common.address,
                    enabled: true,
                    num_channels_requested: num_channels,
                });
            }
            for profile in disabled {
                connection.profiles.add(MidiCIProfile {
                    profile,
                    group: common.group,
                    address: common.address,
                    enabled: false,
                    num_channels_requested: num_channels,
                });
            }
        }
    }

    fn on_set_profile_on(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 20 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let num_channels = retrieval::profile_enabled_channels(data);
        let message = Message::SetProfileOn {
            common: *common,
            profile,
            num_channels,
        };
        self.receive(&message);

        let channels = default_num_channels(common.address, num_channels);
        match self.profile_host.enable_profile(common.address, profile, channels) {
            Some(updated) => {
                let report_channels =
                    default_num_channels(common.address, updated.num_channels_requested);
                if let Err(e) = self.send_profile_enabled_report(
                    common.group,
                    common.address,
                    profile,
                    report_channels,
                ) {
                    warn!("profile enabled report failed: {e}");
                }
            }
            None => {
                // the peer asked for a profile we do not have on that address
                if let Err(e) =
                    self.send_profile_disabled_report(common.group, common.address, profile, 0)
                {
                    warn!("profile disabled report failed: {e}");
                }
            }
        }
    }

    fn on_set_profile_off(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 18 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let message = Message::SetProfileOff {
            common: *common,
            profile,
        };
        self.receive(&message);

        if self
            .profile_host
            .disable_profile(common.address, profile, 0)
            .is_some()
        {
            if let Err(e) = self.send_profile_disabled_report(common.group, common.address, profile, 0) {
                warn!("profile disabled report failed: {e}");
            }
        }
    }

    fn on_profile_enabled_report(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 20 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let num_channels = retrieval::profile_enabled_channels(data);
        let message = Message::ProfileEnabledReport {
            common: *common,
            profile,
            num_channels,
        };
        self.receive(&message);
        if let Some(connection) = self.connections.get_mut(&common.source_muid) {
            connection
                .profiles
                .set_enabled(true, common.address, profile, num_channels);
        }
    }

    fn on_profile_disabled_report(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 20 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let num_channels = retrieval::profile_enabled_channels(data);
        let message = Message::ProfileDisabledReport {
            common: *common,
            profile,
            num_channels,
        };
        self.receive(&message);
        if let Some(connection) = self.connections.get_mut(&common.source_muid) {
            connection
                .profiles
                .set_enabled(false, common.address, profile, num_channels);
        }
    }

    fn on_profile_added_report(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 18 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let message = Message::ProfileAddedReport {
            common: *common,
            profile,
        };
        self.receive(&message);
        if let Some(connection) = self.connections.get_mut(&common.source_muid) {
            connection.profiles.add(MidiCIProfile {
                profile,
                group: common.group,
                address: common.address,
                enabled: false,
                num_channels_requested: if common.address >= 0x7E { 0 } else { 1 },
            });
        }
    }

    fn on_profile_removed_report(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 18 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let message = Message::ProfileRemovedReport {
            common: *common,
            profile,
        };
        self.receive(&message);
        if let Some(connection) = self.connections.get_mut(&common.source_muid) {
            connection.profiles.remove(common.group, common.address, profile);
        }
    }

    fn on_profile_details_inquiry(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 19 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let target = data[18];
        let message = Message::ProfileDetailsInquiry {
            common: *common,
            profile,
            target,
        };
        self.receive(&message);

        match self.profile_host.profile_details(profile, target) {
            Some(details) => {
                let reply = Message::ProfileDetailsReply {
                    common: self.common_to(common.source_muid, common.address, common.group),
                    profile,
                    target,
                    data: details,
                };
                self.send_logged(reply);
            }
            None => self.send_nak(
                common,
                SubId2::ProfileDetailsInquiry,
                nak_status::NAK,
                "Profile details not available",
            ),
        }
    }

    fn on_profile_details_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 21 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let target = data[18];
        let size = sysex::read_u14(data, 19) as usize;
        let end = (21 + size).min(data.len());
        let message = Message::ProfileDetailsReply {
            common: *common,
            profile,
            target,
            data: Bytes::copy_from_slice(&data[21..end]),
        };
        self.receive(&message);
    }

    fn on_profile_specific_data(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 22 {
            return;
        }
        let profile = retrieval::profile_id(data);
        let size = retrieval::profile_specific_data_size(data) as usize;
        let end = (22 + size).min(data.len());
        let message = Message::ProfileSpecificData {
            common: *common,
            profile,
            data: Bytes::copy_from_slice(&data[22..end]),
        };
        self.receive(&message);
    }

    // === Property exchange handlers ===

    fn on_property_capabilities(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 14 {
            return;
        }
        let requested = retrieval::max_property_requests(data);
        let message = Message::PropertyGetCapabilities {
            common: *common,
            max_simultaneous_requests: requested,
        };
        self.receive(&message);

        let granted = requested.min(self.config.max_simultaneous_property_requests);
        let reply = Message::PropertyGetCapabilitiesReply {
            common: self.common_to(common.source_muid, common.address, common.group),
            max_simultaneous_requests: granted,
        };
        self.send_logged(reply);
    }

    fn on_property_capabilities_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 14 {
            return;
        }
        let message = Message::PropertyGetCapabilitiesReply {
            common: *common,
            max_simultaneous_requests: retrieval::max_property_requests(data),
        };
        self.receive(&message);

        if self.config.auto_send_get_resource_list && self.connections.contains_key(&common.source_muid)
        {
            if let Err(e) = self.send_get_property_data(
                common.source_muid,
                resource::RESOURCE_LIST,
                None,
                None,
                None,
                None,
            ) {
                warn!("ResourceList request failed: {e}");
            }
        }
    }

    fn on_get_property_data(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 16 {
            return;
        }
        let request_id = retrieval::property_request_id(data);
        let header = retrieval::property_header(data);
        let message = Message::GetPropertyData {
            common: *common,
            request_id,
            header: header.clone(),
        };
        self.receive(&message);

        let local_muid = self.muid();
        let reply = self
            .property_host
            .process_get(&self.config, local_muid, common, request_id, &header);
        self.send_logged(reply);
    }

    fn on_set_property_data(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 16 {
            return;
        }
        let Some((header, body, request_id)) = self.handle_chunk(common, data) else {
            return;
        };
        let message = Message::SetPropertyData {
            common: *common,
            request_id,
            header: header.clone(),
            body: body.clone(),
        };
        self.receive(&message);

        let local_muid = self.muid();
        let (reply, changed) = self
            .property_host
            .process_set(local_muid, common, request_id, &header, &body);
        self.send_logged(reply);

        if let Some(property_id) = changed {
            let is_partial = RequestHeader::from_bytes(&header).set_partial == Some(true);
            let data = self
                .property_host
                .values()
                .iter()
                .find(|v| v.id == property_id)
                .map(|v| v.body.clone())
                .unwrap_or_default();
            self.notify_property_subscribers(&property_id, &data, is_partial);
        }
    }

    fn on_get_property_data_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 21 {
            return;
        }
        let total = retrieval::property_total_chunks(data);
        let index = retrieval::property_chunk_index(data);
        self.log_text(
            LogDirection::In,
            format!("GetPropertyDataReply Part: {index} / {total}"),
        );
        let Some((header, body, request_id)) = self.handle_chunk(common, data) else {
            return;
        };
        let message = Message::GetPropertyDataReply {
            common: *common,
            request_id,
            header: header.clone(),
            body: body.clone(),
        };
        self.receive(&message);

        let auto_get_device_info = self.config.auto_send_get_device_info;
        let actions = self
            .connections
            .get_mut(&common.source_muid)
            .map(|c| c.properties.on_get_reply(request_id, common, &header, &body, auto_get_device_info));
        let Some(actions) = actions else {
            return;
        };
        if let Some(callback) = actions.callback {
            callback(&message);
        }
        for property_id in actions.fetch {
            if let Err(e) =
                self.send_get_property_data(common.source_muid, &property_id, None, None, None, None)
            {
                warn!("auto-fetch of {property_id} failed: {e}");
            }
        }
    }

    fn on_set_property_data_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 21 {
            return;
        }
        let request_id = retrieval::property_request_id(data);
        let message = Message::SetPropertyDataReply {
            common: *common,
            request_id,
            header: retrieval::property_header(data),
        };
        self.receive(&message);

        let callback = self
            .connections
            .get_mut(&common.source_muid)
            .and_then(|c| c.properties.on_set_reply(request_id, common));
        if let Some(callback) = callback {
            callback(&message);
        }
    }

    fn on_subscribe_property(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 16 {
            return;
        }
        let Some((header, body, request_id)) = self.handle_chunk(common, data) else {
            return;
        };
        let message = Message::SubscribeProperty {
            common: *common,
            request_id,
            header: header.clone(),
            body: body.clone(),
        };
        self.receive(&message);
        self.dispatch_subscribe_command(common, request_id, header, body);
    }

    fn on_property_notify(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 16 {
            return;
        }
        let Some((header, body, request_id)) = self.handle_chunk(common, data) else {
            return;
        };
        let message = Message::PropertyNotify {
            common: *common,
            request_id,
            header: header.clone(),
            body: body.clone(),
        };
        self.receive(&message);
        self.dispatch_subscribe_command(common, request_id, header, body);
    }

    /// The §Common-Rules command dispatch shared by SubscribeProperty and
    /// PropertyNotify.
    fn dispatch_subscribe_command(&mut self, common: &Common, request_id: u8, header: Bytes, body: Bytes) {
        let parsed_command = RequestHeader::from_bytes(&header).command;
        match parsed_command.as_deref() {
            None | Some("") => self.send_nak(
                common,
                SubId2::SubscribeProperty,
                nak_status::MALFORMED_MESSAGE,
                "Missing 'command' field in SubscribeProperty",
            ),
            Some(command::START) => {
                let local_muid = self.muid();
                let reply = self
                    .property_host
                    .process_subscribe(local_muid, common, request_id, &header);
                self.send_logged(reply);
            }
            Some(command::FULL) | Some(command::PARTIAL) | Some(command::NOTIFY) => {
                self.route_subscribe_to_client(common, request_id, &header, &body);
            }
            Some(command::END) => {
                // a known peer means this is our own subscription ending;
                // otherwise the sender is one of our subscribers
                if self.connections.contains_key(&common.source_muid) {
                    self.route_subscribe_to_client(common, request_id, &header, &body);
                } else {
                    let local_muid = self.muid();
                    let reply = self
                        .property_host
                        .process_subscribe(local_muid, common, request_id, &header);
                    self.send_logged(reply);
                }
            }
            Some(other) => {
                let text = format!("Unknown command in SubscribeProperty: {other}");
                self.send_nak(common, SubId2::SubscribeProperty, nak_status::MALFORMED_MESSAGE, &text);
            }
        }
    }

    fn route_subscribe_to_client(&mut self, common: &Common, request_id: u8, header: &[u8], body: &[u8]) {
        let actions = self
            .connections
            .get_mut(&common.source_muid)
            .map(|c| c.properties.on_subscribe_message(header, body));
        let Some(actions) = actions else {
            return;
        };
        let reply = Message::SubscribePropertyReply {
            common: self.common_to(common.source_muid, common.address, common.group),
            request_id,
            header: actions.reply_header,
            body: Bytes::new(),
        };
        self.send_logged(reply);

        if let Some((property_id, res_id)) = actions.fetch {
            let res_id = (!res_id.is_empty()).then_some(res_id);
            if let Err(e) = self.send_get_property_data(
                common.source_muid,
                &property_id,
                res_id.as_deref(),
                None,
                None,
                None,
            ) {
                warn!("pull-on-notify of {property_id} failed: {e}");
            }
        }
    }

    fn on_subscribe_property_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 21 {
            return;
        }
        let request_id = retrieval::property_request_id(data);
        let header = retrieval::property_header(data);
        let message = Message::SubscribePropertyReply {
            common: *common,
            request_id,
            header: header.clone(),
            body: retrieval::property_body_in_chunk(data),
        };
        self.receive(&message);

        if let Some(connection) = self.connections.get_mut(&common.source_muid) {
            connection.properties.on_subscribe_reply(request_id, &header);
        }
    }

    /// Run one property packet through the right chunk accumulator. Returns
    /// the reassembled `(header, body, request id)` when the transfer is
    /// complete.
    fn handle_chunk(&mut self, common: &Common, data: &[u8]) -> Option<(Bytes, Bytes, u8)> {
        let request_id = retrieval::property_request_id(data);
        let header = retrieval::property_header(data);
        let body = retrieval::property_body_in_chunk(data);
        let num_chunks = retrieval::property_total_chunks(data);
        let chunk_index = retrieval::property_chunk_index(data);
        let now = Instant::now();
        let source = common.source_muid;

        let (effective_header, outcome) = {
            let manager = match self.connections.get_mut(&source) {
                Some(connection) => &mut connection.properties.chunk_manager,
                None => &mut self.local_chunks,
            };
            let effective_header = if header.is_empty() {
                manager
                    .pending_header(now, source, request_id)
                    .unwrap_or_else(|| header.clone())
            } else {
                header.clone()
            };
            if chunk_index < num_chunks {
                manager.add_chunk(now, source, request_id, &header, &body);
                (effective_header, None)
            } else if manager.has_pending(now, source, request_id) {
                let (complete_header, complete_body) = manager.finish(now, source, request_id, &body);
                (effective_header.clone(), Some((complete_header, complete_body)))
            } else {
                (effective_header.clone(), Some((header, body)))
            }
        };
        self.notify_chunk(source, request_id, &effective_header);

        match outcome {
            Some((complete_header, complete_body)) => {
                let complete_header = if complete_header.is_empty() {
                    effective_header
                } else {
                    complete_header
                };
                Some((complete_header, complete_body, request_id))
            }
            None => None,
        }
    }

    // === Process inquiry handlers ===

    fn on_process_inquiry(&mut self, common: &Common) {
        let message = Message::ProcessInquiryCapabilities { common: *common };
        self.receive(&message);
        let reply = Message::ProcessInquiryCapabilitiesReply {
            common: self.common_to(common.source_muid, common.address, common.group),
            supported_features: 0x01, // MIDI Message Report
        };
        self.send_logged(reply);
    }

    fn on_process_inquiry_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 14 {
            return;
        }
        let features = data[13];
        let message = Message::ProcessInquiryCapabilitiesReply {
            common: *common,
            supported_features: features,
        };
        self.receive(&message);
        if let Some(connection) = self.connections.get_mut(&common.source_muid) {
            connection.set_process_inquiry_features(features);
        }
    }

    fn on_midi_message_report_inquiry(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 18 {
            return;
        }
        let message = Message::MidiMessageReportInquiry {
            common: *common,
            message_data_control: data[13],
            system_messages: data[14],
            channel_controller_messages: data[16],
            note_data_messages: data[17],
        };
        self.receive(&message);
    }

    fn on_midi_message_report_reply(&mut self, common: &Common, data: &[u8]) {
        if data.len() < 17 {
            return;
        }
        let message = Message::MidiMessageReportReply {
            common: *common,
            system_messages: data[13],
            channel_controller_messages: data[15],
            note_data_messages: data[16],
        };
        self.receive(&message);
    }

    fn on_midi_message_report_end(&mut self, common: &Common) {
        let message = Message::MidiMessageReportEnd { common: *common };
        self.receive(&message);
    }
}

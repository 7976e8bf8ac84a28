//! Per-peer connection state.
//!
//! A [`Connection`] is created when a Discovery Reply arrives and destroyed
//! on InvalidateMUID (or explicit removal). It owns the client-side facades
//! for the peer: the mirrored profile list and the property client.

use std::time::Duration;

use capwire::{DeviceDetails, Muid};
use serde_json::Value;

use crate::config::DeviceInfo;
use crate::profiles::ObservableProfileList;
use crate::properties::client::PropertyClient;
use crate::properties::foundational::{self, resource, ChannelList};

/// Everything this device knows about one peer.
pub struct Connection {
    target_muid: Muid,
    device_details: DeviceDetails,
    max_sysex_size: u32,
    product_instance_id: Option<String>,
    process_inquiry_features: Option<u8>,
    pub(crate) profiles: ObservableProfileList,
    pub(crate) properties: PropertyClient,
}

impl Connection {
    pub(crate) fn new(
        target_muid: Muid,
        device_details: DeviceDetails,
        max_sysex_size: u32,
        chunk_timeout: Duration,
    ) -> Self {
        Self {
            target_muid,
            device_details,
            max_sysex_size,
            product_instance_id: None,
            process_inquiry_features: None,
            profiles: ObservableProfileList::new(),
            properties: PropertyClient::new(chunk_timeout),
        }
    }

    pub fn target_muid(&self) -> Muid {
        self.target_muid
    }

    /// Numeric identity from the peer's Discovery Reply.
    pub fn device_details(&self) -> DeviceDetails {
        self.device_details
    }

    /// The peer's advertised receivable SysEx size (0 = unknown).
    pub fn max_sysex_size(&self) -> u32 {
        self.max_sysex_size
    }

    /// Product instance id learned from an Endpoint Reply.
    pub fn product_instance_id(&self) -> Option<&str> {
        self.product_instance_id.as_deref()
    }

    pub(crate) fn set_product_instance_id(&mut self, id: String) {
        self.product_instance_id = Some(id);
    }

    /// Process Inquiry feature bitmap learned from the peer.
    pub fn process_inquiry_features(&self) -> Option<u8> {
        self.process_inquiry_features
    }

    pub(crate) fn set_process_inquiry_features(&mut self, features: u8) {
        self.process_inquiry_features = Some(features);
    }

    /// The peer's profile list as mirrored from its reports.
    pub fn profiles(&self) -> &ObservableProfileList {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ObservableProfileList {
        &mut self.profiles
    }

    /// The property client facade for this peer.
    pub fn properties(&self) -> &PropertyClient {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyClient {
        &mut self.properties
    }

    /// The peer's device info: the `DeviceInfo` property when we hold it,
    /// otherwise the numeric Discovery identity.
    pub fn device_info(&self) -> DeviceInfo {
        if let Some(value) = self.properties.value(resource::DEVICE_INFO) {
            if let Ok(info) = foundational::parse_device_info(&value.body) {
                return info;
            }
        }
        DeviceInfo {
            manufacturer_id: self.device_details.manufacturer,
            family_id: self.device_details.family,
            model_id: self.device_details.model,
            version_id: self.device_details.software_revision,
            ..DeviceInfo::default()
        }
    }

    /// The peer's `ChannelList` property, when we hold it.
    pub fn channel_list(&self) -> Option<ChannelList> {
        let value = self.properties.value(resource::CHANNEL_LIST)?;
        if value.body.is_empty() {
            return None;
        }
        Some(foundational::parse_channel_list(&value.body))
    }

    /// The peer's `JSONSchema` property, when we hold it.
    pub fn json_schema(&self) -> Option<Value> {
        let value = self.properties.value(resource::JSON_SCHEMA)?;
        if value.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&value.body).ok()
    }
}

//! Device configuration.

use std::time::Duration;

use capwire::DeviceDetails;

use crate::profiles::MidiCIProfile;
use crate::properties::foundational::ChannelList;

/// Capability-inquiry category bits advertised in Discovery.
pub mod capability {
    pub const PROFILE_CONFIGURATION: u8 = 0x04;
    pub const PROPERTY_EXCHANGE: u8 = 0x08;
    pub const PROCESS_INQUIRY: u8 = 0x10;
    /// Profiles + properties + process inquiry ("Three-P").
    pub const THREE_P: u8 = PROFILE_CONFIGURATION | PROPERTY_EXCHANGE | PROCESS_INQUIRY;
}

/// Device identity: the numeric Discovery fields plus the human-readable
/// strings published through the `DeviceInfo` property.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub manufacturer_id: u32,
    pub family_id: u16,
    pub model_id: u16,
    pub version_id: u32,
    pub manufacturer: String,
    pub family: String,
    pub model: String,
    pub version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    /// The numeric subset carried by Discovery messages.
    pub fn device_details(&self) -> DeviceDetails {
        DeviceDetails {
            manufacturer: self.manufacturer_id,
            family: self.family_id,
            model: self.model_id,
            software_revision: self.version_id,
        }
    }
}

/// Everything an application can tune about a device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_info: DeviceInfo,
    /// Category bitmask advertised in Discovery (default: Three-P).
    pub capability_inquiry_supported: u8,
    pub auto_send_endpoint_inquiry: bool,
    pub auto_send_profile_inquiry: bool,
    pub auto_send_property_exchange_capabilities_inquiry: bool,
    pub auto_send_process_inquiry: bool,
    pub auto_send_get_resource_list: bool,
    pub auto_send_get_device_info: bool,
    /// Byte budget of one property packet (header and body share it).
    pub max_property_chunk_size: usize,
    /// Receivable size advertised to peers in Discovery.
    pub receivable_max_sysex_size: usize,
    pub max_simultaneous_property_requests: u8,
    /// Profiles installed into the host facade at device creation.
    pub local_profiles: Vec<MidiCIProfile>,
    pub channel_list: ChannelList,
    /// JSON text served as the `JSONSchema` property (empty = `{}`).
    pub json_schema_string: String,
    /// Replied to Endpoint Inquiry status 0 (empty = empty reply payload).
    pub product_instance_id: String,
    /// Default group for outbound messages.
    pub group: u8,
    /// Pending multi-chunk transfers idle longer than this are discarded.
    pub pending_chunk_timeout: Duration,
    /// Advisory request deadline for application-level timeouts. The core
    /// itself cancels nothing.
    pub pending_request_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_info: DeviceInfo::default(),
            capability_inquiry_supported: capability::THREE_P,
            auto_send_endpoint_inquiry: true,
            auto_send_profile_inquiry: true,
            auto_send_property_exchange_capabilities_inquiry: true,
            auto_send_process_inquiry: true,
            auto_send_get_resource_list: true,
            auto_send_get_device_info: true,
            max_property_chunk_size: 4096 - 256,
            receivable_max_sysex_size: 4096,
            max_simultaneous_property_requests: 8,
            local_profiles: Vec::new(),
            channel_list: ChannelList::default(),
            json_schema_string: String::new(),
            product_instance_id: String::new(),
            group: 0,
            pending_chunk_timeout: Duration::from_secs(30),
            pending_request_timeout: Duration::from_secs(3),
        }
    }
}

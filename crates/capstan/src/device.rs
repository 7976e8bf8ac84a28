//! The device: registry root of the engine.
//!
//! `MidiCIDevice` owns the local MUID and configuration, the connection map,
//! both host facades, the output sink and the logger. Connections are held
//! in a plain map keyed by MUID; facades are plain fields. Every entry point
//! takes `&mut self`, which serializes all processing on the caller's thread
//! and statically rules out re-entrant callbacks.

use std::collections::HashMap;

use capwire::{Message, Muid};
use thiserror::Error;
use tracing::debug;

use crate::callbacks::{CallbackRegistry, CallbackToken};
use crate::chunks::ChunkManager;
use crate::config::{DeviceConfig, DeviceInfo};
use crate::connection::Connection;
use crate::profiles::ProfileHost;
use crate::properties::host::PropertyHost;
use crate::{LogContent, LogDirection, LogEntry};

/// Output sink: `send(group, bytes) -> delivered`. Returning false is a
/// permanent failure and fails the whole send.
pub type OutputSender = Box<dyn FnMut(u8, &[u8]) -> bool>;

/// Logger callback.
pub type LoggerFn = Box<dyn FnMut(&LogEntry)>;

/// Observer of every accepted inbound message.
pub type MessageObserver = Box<dyn FnMut(&Message)>;

/// Observer of connection-map changes.
pub type ConnectionsObserver = Box<dyn FnMut()>;

/// Observer of property-chunk arrival: `(source, request id, header)`.
pub type PropertyChunkObserver = Box<dyn FnMut(Muid, u8, &[u8])>;

/// Engine errors surfaced to callers.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("send failed: the output sink rejected the message")]
    SendFailed,
    #[error("no output sender configured")]
    NoOutputSender,
    #[error("no connection for MUID {0}")]
    UnknownPeer(Muid),
    #[error("duplicate property id: {0}")]
    DuplicateProperty(String),
    #[error("unknown property id: {0}")]
    UnknownProperty(String),
    #[error("unknown profile: {0}")]
    UnknownProfile(capwire::ProfileId),
    #[error("no active subscription for {0}")]
    UnknownSubscription(String),
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Wire(#[from] capwire::WireError),
}

/// A symmetric MIDI-CI endpoint.
pub struct MidiCIDevice {
    muid: Muid,
    pub(crate) config: DeviceConfig,
    pub(crate) connections: HashMap<Muid, Connection>,
    pub(crate) profile_host: ProfileHost,
    pub(crate) property_host: PropertyHost,
    request_id_counter: u8,
    /// Reassembly for peers we have no connection for yet.
    pub(crate) local_chunks: ChunkManager,
    pub(crate) output_sender: Option<OutputSender>,
    logger: Option<LoggerFn>,
    message_observers: CallbackRegistry<MessageObserver>,
    connections_observers: CallbackRegistry<ConnectionsObserver>,
    chunk_observers: CallbackRegistry<PropertyChunkObserver>,
}

impl MidiCIDevice {
    /// Create a device owning `muid` for its lifetime. Local profiles from
    /// the configuration are installed into the profile host.
    pub fn new(muid: Muid, config: DeviceConfig) -> Self {
        let mut profile_host = ProfileHost::new();
        for profile in &config.local_profiles {
            profile_host.add_profile(profile.clone());
        }
        let local_chunks = ChunkManager::new(config.pending_chunk_timeout);
        Self {
            muid,
            config,
            connections: HashMap::new(),
            profile_host,
            property_host: PropertyHost::new(),
            request_id_counter: 0,
            local_chunks,
            output_sender: None,
            logger: None,
            message_observers: CallbackRegistry::new(),
            connections_observers: CallbackRegistry::new(),
            chunk_observers: CallbackRegistry::new(),
        }
    }

    pub fn muid(&self) -> Muid {
        self.muid
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DeviceConfig {
        &mut self.config
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.config.device_info
    }

    pub fn set_output_sender(&mut self, sender: OutputSender) {
        self.output_sender = Some(sender);
    }

    pub fn set_logger(&mut self, logger: LoggerFn) {
        self.logger = Some(logger);
    }

    // === Connections ===

    pub fn connections(&self) -> &HashMap<Muid, Connection> {
        &self.connections
    }

    pub fn connection(&self, muid: Muid) -> Option<&Connection> {
        self.connections.get(&muid)
    }

    pub fn connection_mut(&mut self, muid: Muid) -> Option<&mut Connection> {
        self.connections.get_mut(&muid)
    }

    /// Insert (or replace) the connection for a peer.
    pub(crate) fn store_connection(&mut self, connection: Connection) {
        self.connections.insert(connection.target_muid(), connection);
        self.notify_connections_changed();
    }

    /// Drop the connection for `muid`, firing the connections-changed
    /// observers when something was actually removed.
    pub fn remove_connection(&mut self, muid: Muid) {
        if self.connections.remove(&muid).is_some() {
            self.notify_connections_changed();
        }
    }

    // === Facades ===

    pub fn profile_host(&self) -> &ProfileHost {
        &self.profile_host
    }

    pub fn profile_host_mut(&mut self) -> &mut ProfileHost {
        &mut self.profile_host
    }

    pub fn property_host(&self) -> &PropertyHost {
        &self.property_host
    }

    pub fn property_host_mut(&mut self) -> &mut PropertyHost {
        &mut self.property_host
    }

    // === Observers ===

    pub fn add_message_callback(&mut self, callback: MessageObserver) -> CallbackToken {
        self.message_observers.add(callback)
    }

    pub fn remove_message_callback(&mut self, token: CallbackToken) -> bool {
        self.message_observers.remove(token)
    }

    pub fn add_connections_changed_callback(&mut self, callback: ConnectionsObserver) -> CallbackToken {
        self.connections_observers.add(callback)
    }

    pub fn remove_connections_changed_callback(&mut self, token: CallbackToken) -> bool {
        self.connections_observers.remove(token)
    }

    pub fn add_property_chunk_callback(&mut self, callback: PropertyChunkObserver) -> CallbackToken {
        self.chunk_observers.add(callback)
    }

    pub fn remove_property_chunk_callback(&mut self, token: CallbackToken) -> bool {
        self.chunk_observers.remove(token)
    }

    pub(crate) fn notify_message(&mut self, message: &Message) {
        for callback in self.message_observers.iter_mut() {
            callback(message);
        }
    }

    fn notify_connections_changed(&mut self) {
        for callback in self.connections_observers.iter_mut() {
            callback();
        }
    }

    pub(crate) fn notify_chunk(&mut self, source: Muid, request_id: u8, header: &[u8]) {
        for callback in self.chunk_observers.iter_mut() {
            callback(source, request_id, header);
        }
    }

    // === Internals shared with the messenger ===

    /// Allocate the next 7-bit request id (127 wraps to 0).
    pub(crate) fn next_request_id(&mut self) -> u8 {
        self.request_id_counter = (self.request_id_counter + 1) & 0x7F;
        self.request_id_counter
    }

    pub(crate) fn log(&mut self, direction: LogDirection, content: LogContent) {
        let entry = LogEntry::new(direction, content);
        debug!("{:?} {}", entry.direction, entry.summary());
        if let Some(logger) = self.logger.as_mut() {
            logger(&entry);
        }
    }

    pub(crate) fn log_text(&mut self, direction: LogDirection, text: String) {
        self.log(direction, LogContent::Text(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_id_wraps_at_128() {
        let mut device = MidiCIDevice::new(Muid::new(1), DeviceConfig::default());
        for expected in 1..=127u8 {
            assert_eq!(device.next_request_id(), expected);
        }
        assert_eq!(device.next_request_id(), 0);
        assert_eq!(device.next_request_id(), 1);
    }

    #[test]
    fn local_profiles_are_installed_at_creation() {
        use crate::profiles::MidiCIProfile;
        let profile = MidiCIProfile {
            profile: capwire::ProfileId([0x7E, 0, 0, 0, 1]),
            group: 0,
            address: 0,
            enabled: true,
            num_channels_requested: 1,
        };
        let config = DeviceConfig {
            local_profiles: vec![profile.clone()],
            ..Default::default()
        };
        let device = MidiCIDevice::new(Muid::new(1), config);
        assert_eq!(device.profile_host().profiles().profiles(), &[profile]);
    }
}

//! capstan - a symmetric MIDI Capability Inquiry protocol engine
//!
//! Every device built on this crate is simultaneously *initiator* and
//! *responder*: it discovers peers, answers discovery, negotiates profiles
//! and exchanges properties over the SysEx wire format implemented in
//! `capwire`.
//!
//! The engine is a single-threaded cooperative core. [`MidiCIDevice`] owns
//! all state (connections, facades, counters); every entry point takes
//! `&mut self` and runs to completion. The outside world is reached through
//! two narrow interfaces: an output sink `Fn(group, bytes) -> bool` and the
//! inbound feed [`MidiCIDevice::process_input`].

use chrono::{DateTime, Utc};

pub mod callbacks;
pub mod chunks;
pub mod config;
pub mod connection;
pub mod device;
pub mod messenger;
pub mod profiles;
pub mod properties;

pub use callbacks::CallbackToken;
pub use capwire::{Common, DeviceDetails, Message, Muid, ProfileId};
pub use config::{DeviceConfig, DeviceInfo};
pub use connection::Connection;
pub use device::{DeviceError, MidiCIDevice};
pub use profiles::MidiCIProfile;

/// Whether a logged message entered or left this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
    In,
    Out,
}

/// What a log entry carries: free-form text or a structured message.
#[derive(Debug, Clone)]
pub enum LogContent {
    Text(String),
    Message(Message),
}

/// One entry handed to the logger callback.
///
/// Every sent and received CI message produces one of these, including
/// malformed inbound messages that were answered with a NAK.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: LogDirection,
    pub content: LogContent,
}

impl LogEntry {
    pub fn new(direction: LogDirection, content: LogContent) -> Self {
        Self {
            timestamp: Utc::now(),
            direction,
            content,
        }
    }

    /// Render the entry the way the log front-end expects it.
    pub fn summary(&self) -> String {
        match &self.content {
            LogContent::Text(text) => text.clone(),
            LogContent::Message(msg) => format!("{}: {}", msg.label(), msg.body_summary()),
        }
    }
}

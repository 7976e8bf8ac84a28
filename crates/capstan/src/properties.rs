//! Property exchange: shared data model for both facade sides.
//!
//! The host facade ([`host::PropertyHost`]) serves a catalog of properties;
//! the client facade ([`client::PropertyClient`]) mirrors a peer's catalog,
//! correlates replies and tracks subscriptions. Both speak the Common Rules
//! JSON header vocabulary implemented in [`commonrules`].

use bytes::Bytes;
use capwire::Muid;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod commonrules;
pub mod foundational;
pub mod host;
pub mod standard;

/// One stored property body. The host keeps at most one value per
/// `(property id, res id)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub id: String,
    pub res_id: String,
    pub media_type: String,
    pub body: Bytes,
}

impl PropertyValue {
    pub fn new(id: impl Into<String>, res_id: impl Into<String>, media_type: impl Into<String>, body: Bytes) -> Self {
        Self {
            id: id.into(),
            res_id: res_id.into(),
            media_type: media_type.into(),
            body,
        }
    }
}

/// Who defined a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    System,
    User,
}

/// Write access declared by metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetAccess {
    #[default]
    None,
    Full,
    Partial,
}

/// One column description in a list property's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyColumn {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub property: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
}

/// Catalog entry for one property, as carried in `ResourceList`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyMetadata {
    pub resource: String,
    pub can_get: bool,
    pub can_set: SetAccess,
    pub can_subscribe: bool,
    pub require_res_id: bool,
    pub media_types: Vec<String>,
    pub encodings: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub schema: String,
    pub can_paginate: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<PropertyColumn>,
    #[serde(skip)]
    pub originator: Originator,
}

impl Default for PropertyMetadata {
    fn default() -> Self {
        Self {
            resource: String::new(),
            can_get: true,
            can_set: SetAccess::None,
            can_subscribe: false,
            require_res_id: false,
            media_types: vec![commonrules::MEDIA_TYPE_JSON.to_string()],
            encodings: vec![commonrules::Encoding::Ascii.as_str().to_string()],
            schema: String::new(),
            can_paginate: false,
            columns: Vec::new(),
            originator: Originator::User,
        }
    }
}

impl Default for Originator {
    fn default() -> Self {
        Originator::User
    }
}

impl PropertyMetadata {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }

    /// First declared media type, `application/json` when unspecified.
    pub fn media_type(&self) -> &str {
        self.media_types
            .first()
            .map(String::as_str)
            .unwrap_or(commonrules::MEDIA_TYPE_JSON)
    }
}

/// A subscription held by the host for one remote subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSubscription {
    pub subscriber_muid: Muid,
    pub resource: String,
    pub res_id: String,
    /// Server-assigned 8-digit decimal id.
    pub subscribe_id: String,
    /// Wire name of the subscriber's chosen encoding (empty = ASCII).
    pub encoding: String,
}

/// Client-side subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribing,
    Subscribed,
    Unsubscribing,
    Unsubscribed,
}

/// A subscription this device holds (or is acquiring) on a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSubscription {
    pub pending_request_id: Option<u8>,
    pub subscribe_id: Option<String>,
    pub resource: String,
    pub res_id: String,
    pub state: SubscriptionState,
}

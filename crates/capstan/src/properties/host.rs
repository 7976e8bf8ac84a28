//! The property host facade: catalog, value store and subscriber registry.
//!
//! The host serves GET/SET/SUBSCRIBE requests against a catalog that always
//! contains the foundational resources plus any user-defined metadata.
//! Replies are built here; actually sending them (and fanning out change
//! notifications) is the messenger's job, so everything in this module is
//! free of I/O.

use std::collections::HashMap;

use bytes::Bytes;
use capwire::{Common, Message, Muid};
use rand::Rng;
use serde_json::Value;
use tracing::warn;

use crate::callbacks::{CallbackRegistry, CallbackToken};
use crate::config::DeviceConfig;
use crate::device::DeviceError;
use crate::properties::commonrules::{
    self, command, status, Encoding, ReplyHeader, RequestHeader, MEDIA_TYPE_JSON,
};
use crate::properties::foundational::{self, resource};
use crate::properties::{HostSubscription, Originator, PropertyMetadata, PropertyValue, SetAccess};

/// Overrides the stored-value map for GET of user properties.
pub type PropertyBinaryGetter = Box<dyn FnMut(&str, &str) -> Option<Bytes>>;

/// Overrides the stored-value map for SET of user properties. Arguments are
/// `(property id, res id, media type, body)`; returning false fails the SET.
pub type PropertyBinarySetter = Box<dyn FnMut(&str, &str, &str, &[u8]) -> bool>;

/// Host side of property exchange.
#[derive(Default)]
pub struct PropertyHost {
    metadata: Vec<PropertyMetadata>,
    values: Vec<PropertyValue>,
    subscriptions: Vec<HostSubscription>,
    catalog_updated: CallbackRegistry<Box<dyn FnMut()>>,
    value_updated: CallbackRegistry<Box<dyn FnMut(&str, &str)>>,
    subscription_changed: CallbackRegistry<Box<dyn FnMut(&str)>>,
    binary_getter: Option<PropertyBinaryGetter>,
    binary_setter: Option<PropertyBinarySetter>,
}

fn system_entry(id: &str) -> PropertyMetadata {
    PropertyMetadata {
        resource: id.to_string(),
        originator: Originator::System,
        ..PropertyMetadata::default()
    }
}

impl PropertyHost {
    pub fn new() -> Self {
        Self::default()
    }

    // === Catalog ===

    /// Register a user property. Ids colliding with a built-in resource or
    /// an existing entry are rejected.
    pub fn add_metadata(&mut self, meta: PropertyMetadata) -> Result<(), DeviceError> {
        if resource::is_builtin(&meta.resource)
            || self.metadata.iter().any(|m| m.resource == meta.resource)
        {
            return Err(DeviceError::DuplicateProperty(meta.resource));
        }
        self.metadata.push(meta);
        self.notify_catalog_updated();
        Ok(())
    }

    /// Remove a property with its stored values and every subscription to it.
    pub fn remove_property(&mut self, property_id: &str) {
        self.metadata.retain(|m| m.resource != property_id);
        self.values.retain(|v| v.id != property_id);
        let had_subscriptions = self.subscriptions.iter().any(|s| s.resource == property_id);
        self.subscriptions.retain(|s| s.resource != property_id);
        self.notify_catalog_updated();
        if had_subscriptions {
            self.notify_subscription_changed(property_id);
        }
    }

    /// Replace metadata under `old_id`, re-keying any stored values so their
    /// bytes survive a rename.
    pub fn update_property_metadata(
        &mut self,
        old_id: &str,
        meta: PropertyMetadata,
    ) -> Result<(), DeviceError> {
        if !self.metadata.iter().any(|m| m.resource == old_id) {
            return Err(DeviceError::UnknownProperty(old_id.to_string()));
        }
        let new_id = meta.resource.clone();
        if new_id != old_id
            && (resource::is_builtin(&new_id)
                || self.metadata.iter().any(|m| m.resource == new_id))
        {
            return Err(DeviceError::DuplicateProperty(new_id));
        }
        self.metadata.retain(|m| m.resource != old_id);
        for value in self.values.iter_mut().filter(|v| v.id == old_id) {
            value.id = new_id.clone();
        }
        self.metadata.push(meta);
        self.notify_catalog_updated();
        Ok(())
    }

    /// User-defined catalog entries in insertion order.
    pub fn metadata_list(&self) -> &[PropertyMetadata] {
        &self.metadata
    }

    pub fn metadata(&self, property_id: &str) -> Option<&PropertyMetadata> {
        self.metadata.iter().find(|m| m.resource == property_id)
    }

    /// The catalog served as `ResourceList`: the foundational resources
    /// followed by every user entry, in insertion order.
    pub fn full_catalog(&self) -> Vec<PropertyMetadata> {
        let mut all = vec![
            system_entry(resource::DEVICE_INFO),
            system_entry(resource::CHANNEL_LIST),
            system_entry(resource::JSON_SCHEMA),
        ];
        all.extend(self.metadata.iter().cloned());
        all
    }

    // === Values ===

    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }

    pub fn value(&self, property_id: &str, res_id: &str) -> Option<&PropertyValue> {
        self.values
            .iter()
            .find(|v| v.id == property_id && v.res_id == res_id)
    }

    /// Upsert the single value slot for `(property id, res id)`.
    pub(crate) fn store_value(&mut self, property_id: &str, res_id: &str, media_type: &str, body: Bytes) {
        if let Some(existing) = self
            .values
            .iter_mut()
            .find(|v| v.id == property_id && v.res_id == res_id)
        {
            existing.media_type = media_type.to_string();
            existing.body = body;
        } else {
            self.values
                .push(PropertyValue::new(property_id, res_id, media_type, body));
        }
        self.notify_value_updated(property_id, res_id);
    }

    /// Media type for new values of a property, from its metadata.
    pub(crate) fn media_type_for(&self, property_id: &str) -> String {
        self.metadata(property_id)
            .map(|m| m.media_type().to_string())
            .unwrap_or_else(|| MEDIA_TYPE_JSON.to_string())
    }

    // === Subscriptions ===

    pub fn subscriptions(&self) -> &[HostSubscription] {
        &self.subscriptions
    }

    pub(crate) fn remove_subscriptions_for(
        &mut self,
        subscriber_muid: Muid,
        property_id: &str,
        res_id: &str,
    ) {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| {
            !(s.subscriber_muid == subscriber_muid
                && s.resource == property_id
                && (res_id.is_empty() || s.res_id == res_id))
        });
        if self.subscriptions.len() != before {
            self.notify_subscription_changed(property_id);
        }
    }

    pub(crate) fn take_all_subscriptions(&mut self) -> Vec<HostSubscription> {
        let taken = std::mem::take(&mut self.subscriptions);
        for sub in &taken {
            self.notify_subscription_changed(&sub.resource);
        }
        taken
    }

    /// Header for a host-initiated `command=end` to one subscriber.
    pub(crate) fn shutdown_header(&self, property_id: &str, res_id: &str) -> Option<Bytes> {
        let sub = self
            .subscriptions
            .iter()
            .find(|s| s.resource == property_id && (res_id.is_empty() || s.res_id == res_id))?;
        Some(end_header(property_id, Some(&sub.subscribe_id)))
    }

    // === Request processing ===

    /// Serve a GetPropertyData inquiry.
    pub(crate) fn process_get(
        &mut self,
        config: &DeviceConfig,
        local_muid: Muid,
        common: &Common,
        request_id: u8,
        header: &[u8],
    ) -> Message {
        let req = RequestHeader::from_bytes(header);
        let (reply_header, body) = self.get_reply(config, &req);
        Message::GetPropertyDataReply {
            common: reply_common(local_muid, common),
            request_id,
            header: reply_header.to_bytes(),
            body: Bytes::from(body),
        }
    }

    fn get_reply(&mut self, config: &DeviceConfig, req: &RequestHeader) -> (ReplyHeader, Vec<u8>) {
        let property_id = req.resource.as_str();
        if property_id.is_empty() {
            return (
                ReplyHeader::error(status::BAD_REQUEST, "Missing resource field"),
                Vec::new(),
            );
        }
        if let Some(meta) = self.metadata(property_id) {
            if !meta.can_get {
                return (
                    ReplyHeader::error(
                        status::RESOURCE_NOT_ALLOWED,
                        format!("Property is not readable: {property_id}"),
                    ),
                    Vec::new(),
                );
            }
        }

        let raw = match property_id {
            resource::DEVICE_INFO => {
                json_bytes(&foundational::device_info_to_json(&config.device_info))
            }
            resource::CHANNEL_LIST => {
                json_bytes(&foundational::channel_list_to_json(&config.channel_list))
            }
            resource::JSON_SCHEMA => {
                if config.json_schema_string.is_empty() {
                    b"{}".to_vec()
                } else {
                    config.json_schema_string.clone().into_bytes()
                }
            }
            resource::RESOURCE_LIST => {
                json_bytes(&foundational::resource_list_to_json(&self.full_catalog()))
            }
            _ => {
                let res_id = req.res_id_str();
                let from_getter = self
                    .binary_getter
                    .as_mut()
                    .and_then(|getter| getter(property_id, res_id));
                match from_getter {
                    Some(bytes) => bytes.to_vec(),
                    None => match self.value(property_id, res_id) {
                        Some(value) => value.body.to_vec(),
                        None if self.metadata(property_id).is_some() => b"{}".to_vec(),
                        None => {
                            return (
                                ReplyHeader::error(
                                    status::RESOURCE_UNAVAILABLE_OR_ERROR,
                                    format!("Property not found: {property_id}"),
                                ),
                                Vec::new(),
                            )
                        }
                    },
                }
            }
        };

        let mut reply = ReplyHeader::with_status(status::OK);
        let body = paginate(raw, req, &mut reply);

        let encoding = req.encoding();
        if encoding != Encoding::Ascii {
            reply.mutual_encoding = Some(encoding.as_str().to_string());
        }
        match commonrules::encode_body(&body, encoding) {
            Ok(encoded) => (reply, encoded),
            Err(e) => (
                ReplyHeader::error(status::INTERNAL_ERROR, format!("Body encoding failed: {e}")),
                Vec::new(),
            ),
        }
    }

    /// Serve a SetPropertyData inquiry. Returns the reply plus the property
    /// id when a value actually changed (the messenger fans the change out
    /// to subscribers).
    pub(crate) fn process_set(
        &mut self,
        local_muid: Muid,
        common: &Common,
        request_id: u8,
        header: &[u8],
        body: &[u8],
    ) -> (Message, Option<String>) {
        let req = RequestHeader::from_bytes(header);
        let (reply_header, changed) = self.set_reply(&req, header, body);
        let reply = Message::SetPropertyDataReply {
            common: reply_common(local_muid, common),
            request_id,
            header: reply_header.to_bytes(),
        };
        (reply, changed)
    }

    fn set_reply(&mut self, req: &RequestHeader, header: &[u8], body: &[u8]) -> (ReplyHeader, Option<String>) {
        let property_id = req.resource.as_str();
        if property_id.is_empty() {
            return (
                ReplyHeader::error(status::BAD_REQUEST, "Missing resource field"),
                None,
            );
        }
        if resource::is_builtin(property_id) {
            return (
                ReplyHeader::error(
                    status::INTERNAL_ERROR,
                    format!("Resource is readonly: {property_id}"),
                ),
                None,
            );
        }
        if let Some(meta) = self.metadata(property_id) {
            if meta.can_set == SetAccess::None {
                return (
                    ReplyHeader::error(
                        status::RESOURCE_NOT_ALLOWED,
                        format!("Property is not writable: {property_id}"),
                    ),
                    None,
                );
            }
        }

        let res_id = req.res_id_str().to_string();
        let decoded = Bytes::from(commonrules::decode_body(header, body));
        let media_type = req.media_type_str().to_string();

        if req.set_partial == Some(true) {
            // partial writes store the provided bytes verbatim; no JSON merge
            if self.value(property_id, &res_id).is_none() {
                warn!("partial update for {property_id} without an existing value");
                return (ReplyHeader::with_status(status::OK), None);
            }
            self.store_value(property_id, &res_id, &media_type, decoded);
            return (ReplyHeader::with_status(status::OK), Some(property_id.to_string()));
        }

        if let Some(setter) = self.binary_setter.as_mut() {
            if !setter(property_id, &res_id, &media_type, &decoded) {
                return (
                    ReplyHeader::error(
                        status::INTERNAL_ERROR,
                        format!("Failed to set property: {property_id}"),
                    ),
                    None,
                );
            }
        }
        if self.metadata(property_id).is_none() {
            self.metadata.push(PropertyMetadata {
                resource: property_id.to_string(),
                originator: Originator::User,
                can_set: SetAccess::Full,
                ..PropertyMetadata::default()
            });
            self.notify_catalog_updated();
        }
        self.store_value(property_id, &res_id, &media_type, decoded);
        (ReplyHeader::with_status(status::OK), Some(property_id.to_string()))
    }

    /// Serve a SubscribeProperty inquiry carrying `command=start` or a
    /// host-addressed `command=end`.
    pub(crate) fn process_subscribe(
        &mut self,
        local_muid: Muid,
        common: &Common,
        request_id: u8,
        header: &[u8],
    ) -> Message {
        let req = RequestHeader::from_bytes(header);
        let reply_header = match req.command.as_deref() {
            Some(command::START) => self.subscribe_start(common.source_muid, &req),
            Some(command::END) => self.subscribe_end(&req),
            other => ReplyHeader::error(
                status::INTERNAL_ERROR,
                format!("Unhandled subscription command: {}", other.unwrap_or("")),
            ),
        };
        Message::SubscribePropertyReply {
            common: reply_common(local_muid, common),
            request_id,
            header: reply_header.to_bytes(),
            body: Bytes::from_static(b"{}"),
        }
    }

    fn subscribe_start(&mut self, subscriber_muid: Muid, req: &RequestHeader) -> ReplyHeader {
        let property_id = req.resource.clone();
        if let Some(meta) = self.metadata(&property_id) {
            if !meta.can_subscribe {
                return ReplyHeader::error(
                    status::RESOURCE_NOT_ALLOWED,
                    format!("Property is not subscribable: {property_id}"),
                );
            }
        }
        let subscribe_id = new_subscribe_id();
        self.subscriptions.push(HostSubscription {
            subscriber_muid,
            resource: property_id.clone(),
            res_id: req.res_id_str().to_string(),
            subscribe_id: subscribe_id.clone(),
            encoding: req.mutual_encoding.clone().unwrap_or_default(),
        });
        self.notify_subscription_changed(&property_id);
        ReplyHeader {
            status: Some(status::OK),
            subscribe_id: Some(subscribe_id),
            ..Default::default()
        }
    }

    fn subscribe_end(&mut self, req: &RequestHeader) -> ReplyHeader {
        let subscribe_id = req.subscribe_id.clone().unwrap_or_default();
        let position = self.subscriptions.iter().position(|s| {
            (!subscribe_id.is_empty() && s.subscribe_id == subscribe_id)
                || (subscribe_id.is_empty() && s.resource == req.resource)
        });
        if let Some(index) = position {
            let removed = self.subscriptions.remove(index);
            self.notify_subscription_changed(&removed.resource);
        }
        // an end with no matching entry still succeeds on the wire
        ReplyHeader {
            status: Some(status::OK),
            subscribe_id: (!subscribe_id.is_empty()).then_some(subscribe_id),
            ..Default::default()
        }
    }

    /// Build one `(header, encoded body)` notification per subscriber of
    /// `property_id`. The encoder runs at most once per distinct encoding.
    pub(crate) fn build_notifications(
        &self,
        property_id: &str,
        data: &[u8],
        is_partial: bool,
    ) -> Vec<(Bytes, Vec<u8>)> {
        let mut encoded_cache: HashMap<String, Vec<u8>> = HashMap::new();
        let mut out = Vec::new();
        for sub in self.subscriptions.iter().filter(|s| s.resource == property_id) {
            let encoding = Encoding::from_name(&sub.encoding).unwrap_or_default();
            let encoded = match encoded_cache.get(&sub.encoding) {
                Some(cached) => cached.clone(),
                None => match commonrules::encode_body(data, encoding) {
                    Ok(encoded) => {
                        encoded_cache.insert(sub.encoding.clone(), encoded.clone());
                        encoded
                    }
                    Err(e) => {
                        warn!("skipping notification to {}: {e}", sub.subscriber_muid);
                        continue;
                    }
                },
            };
            let header = RequestHeader {
                resource: property_id.to_string(),
                command: Some(if is_partial { command::PARTIAL } else { command::FULL }.to_string()),
                subscribe_id: Some(sub.subscribe_id.clone()),
                set_partial: Some(is_partial),
                mutual_encoding: (!sub.encoding.is_empty()).then(|| sub.encoding.clone()),
                res_id: (!sub.res_id.is_empty()).then(|| sub.res_id.clone()),
                ..Default::default()
            };
            out.push((header.to_bytes(), encoded));
        }
        out
    }

    // === Observers and overrides ===

    pub fn add_property_catalog_updated_callback(&mut self, callback: Box<dyn FnMut()>) -> CallbackToken {
        self.catalog_updated.add(callback)
    }

    pub fn remove_property_catalog_updated_callback(&mut self, token: CallbackToken) -> bool {
        self.catalog_updated.remove(token)
    }

    pub fn add_property_updated_callback(
        &mut self,
        callback: Box<dyn FnMut(&str, &str)>,
    ) -> CallbackToken {
        self.value_updated.add(callback)
    }

    pub fn remove_property_updated_callback(&mut self, token: CallbackToken) -> bool {
        self.value_updated.remove(token)
    }

    pub fn add_subscription_changed_callback(
        &mut self,
        callback: Box<dyn FnMut(&str)>,
    ) -> CallbackToken {
        self.subscription_changed.add(callback)
    }

    pub fn remove_subscription_changed_callback(&mut self, token: CallbackToken) -> bool {
        self.subscription_changed.remove(token)
    }

    pub fn set_property_binary_getter(&mut self, getter: PropertyBinaryGetter) {
        self.binary_getter = Some(getter);
    }

    pub fn set_property_binary_setter(&mut self, setter: PropertyBinarySetter) {
        self.binary_setter = Some(setter);
    }

    fn notify_catalog_updated(&mut self) {
        for callback in self.catalog_updated.iter_mut() {
            callback();
        }
    }

    fn notify_value_updated(&mut self, property_id: &str, res_id: &str) {
        for callback in self.value_updated.iter_mut() {
            callback(property_id, res_id);
        }
    }

    fn notify_subscription_changed(&mut self, property_id: &str) {
        for callback in self.subscription_changed.iter_mut() {
            callback(property_id);
        }
    }
}

fn reply_common(local_muid: Muid, request_common: &Common) -> Common {
    Common::new(
        local_muid,
        request_common.source_muid,
        request_common.address,
        request_common.group,
    )
}

fn json_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Slice a JSON-array body by `offset`/`limit`, recording `totalCount`.
/// Non-array bodies pass through unmodified.
fn paginate(raw: Vec<u8>, req: &RequestHeader, reply: &mut ReplyHeader) -> Vec<u8> {
    let Some(offset) = req.offset else {
        return raw;
    };
    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Array(items)) => {
            reply.total_count = Some(items.len() as u64);
            let offset = offset as usize;
            let sliced: Vec<Value> = if offset >= items.len() {
                Vec::new()
            } else {
                let end = match req.limit {
                    Some(limit) => (offset + limit as usize).min(items.len()),
                    None => items.len(),
                };
                items[offset..end].to_vec()
            };
            json_bytes(&Value::Array(sliced))
        }
        _ => raw,
    }
}

/// Host-initiated `command=end` header.
pub(crate) fn end_header(property_id: &str, subscribe_id: Option<&str>) -> Bytes {
    RequestHeader {
        resource: property_id.to_string(),
        command: Some(command::END.to_string()),
        subscribe_id: subscribe_id.map(str::to_string),
        ..Default::default()
    }
    .to_bytes()
}

fn new_subscribe_id() -> String {
    format!("{:08}", rand::rng().random_range(0..100_000_000u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> DeviceConfig {
        DeviceConfig {
            device_info: crate::config::DeviceInfo {
                manufacturer: "ACME".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn common() -> Common {
        Common::new(Muid::new(0x0506_0708), Muid::new(0x0102_0304), 0x7F, 0)
    }

    fn get_reply_parts(msg: &Message) -> (ReplyHeader, Bytes) {
        match msg {
            Message::GetPropertyDataReply { header, body, .. } => {
                (ReplyHeader::from_bytes(header), body.clone())
            }
            other => panic!("expected GetPropertyDataReply, got {}", other.label()),
        }
    }

    #[test]
    fn resource_list_contains_builtins_then_user_entries() {
        let mut host = PropertyHost::new();
        host.add_metadata(PropertyMetadata::new("X-Temperature")).unwrap();
        host.add_metadata(PropertyMetadata::new("X-Humidity")).unwrap();

        let names: Vec<String> = host.full_catalog().iter().map(|m| m.resource.clone()).collect();
        assert_eq!(
            names,
            vec!["DeviceInfo", "ChannelList", "JSONSchema", "X-Temperature", "X-Humidity"]
        );
        assert_eq!(host.full_catalog()[0].originator, Originator::System);
        assert_eq!(host.full_catalog()[3].originator, Originator::User);
    }

    #[test]
    fn duplicate_and_builtin_ids_are_rejected() {
        let mut host = PropertyHost::new();
        host.add_metadata(PropertyMetadata::new("X-Temperature")).unwrap();
        assert!(matches!(
            host.add_metadata(PropertyMetadata::new("X-Temperature")),
            Err(DeviceError::DuplicateProperty(_))
        ));
        assert!(matches!(
            host.add_metadata(PropertyMetadata::new("ResourceList")),
            Err(DeviceError::DuplicateProperty(_))
        ));
    }

    #[test]
    fn update_metadata_preserves_value_bytes() {
        let mut host = PropertyHost::new();
        host.add_metadata(PropertyMetadata::new("Old")).unwrap();
        host.store_value("Old", "", MEDIA_TYPE_JSON, Bytes::from_static(b"[1]"));
        host.update_property_metadata("Old", PropertyMetadata::new("New")).unwrap();
        assert!(host.metadata("Old").is_none());
        assert_eq!(host.value("New", "").unwrap().body, Bytes::from_static(b"[1]"));
    }

    #[test]
    fn get_unknown_property_is_resource_unavailable() {
        let mut host = PropertyHost::new();
        let header = RequestHeader::for_resource("Nope").to_bytes();
        let reply = host.process_get(&config(), Muid::new(1), &common(), 9, &header);
        let (reply_header, body) = get_reply_parts(&reply);
        assert_eq!(reply_header.status, Some(status::RESOURCE_UNAVAILABLE_OR_ERROR));
        assert!(reply_header.message.unwrap().contains("Nope"));
        assert!(body.is_empty());
    }

    #[test]
    fn get_device_info_serves_config() {
        let mut host = PropertyHost::new();
        let header = RequestHeader::for_resource("DeviceInfo").to_bytes();
        let reply = host.process_get(&config(), Muid::new(1), &common(), 1, &header);
        let (reply_header, body) = get_reply_parts(&reply);
        assert!(reply_header.is_ok());
        let parsed = foundational::parse_device_info(&body).unwrap();
        assert_eq!(parsed.manufacturer, "ACME");
    }

    #[test]
    fn get_reply_swaps_source_and_destination() {
        let mut host = PropertyHost::new();
        let header = RequestHeader::for_resource("DeviceInfo").to_bytes();
        let reply = host.process_get(&config(), Muid::new(1), &common(), 1, &header);
        assert_eq!(reply.common().source_muid, Muid::new(1));
        assert_eq!(reply.common().destination_muid, common().source_muid);
    }

    #[test]
    fn pagination_slices_arrays_and_reports_total() {
        let mut host = PropertyHost::new();
        host.add_metadata(PropertyMetadata::new("List")).unwrap();
        host.store_value("List", "", MEDIA_TYPE_JSON, Bytes::from_static(b"[0,1,2,3,4]"));

        let header = RequestHeader {
            resource: "List".into(),
            offset: Some(1),
            limit: Some(2),
            ..Default::default()
        }
        .to_bytes();
        let reply = host.process_get(&config(), Muid::new(1), &common(), 2, &header);
        let (reply_header, body) = get_reply_parts(&reply);
        assert_eq!(reply_header.total_count, Some(5));
        assert_eq!(&body[..], b"[1,2]");
    }

    #[test]
    fn pagination_passes_non_arrays_through() {
        let mut host = PropertyHost::new();
        host.add_metadata(PropertyMetadata::new("Obj")).unwrap();
        host.store_value("Obj", "", MEDIA_TYPE_JSON, Bytes::from_static(b"{\"a\":1}"));
        let header = RequestHeader {
            resource: "Obj".into(),
            offset: Some(1),
            ..Default::default()
        }
        .to_bytes();
        let reply = host.process_get(&config(), Muid::new(1), &common(), 3, &header);
        let (reply_header, body) = get_reply_parts(&reply);
        assert_eq!(reply_header.total_count, None);
        assert_eq!(&body[..], b"{\"a\":1}");
    }

    #[test]
    fn set_builtin_is_readonly_error() {
        let mut host = PropertyHost::new();
        let header = RequestHeader::for_resource("DeviceInfo").to_bytes();
        let (reply, changed) = host.process_set(Muid::new(1), &common(), 4, &header, b"{}");
        let Message::SetPropertyDataReply { header, .. } = reply else {
            panic!("expected SetPropertyDataReply");
        };
        let reply_header = ReplyHeader::from_bytes(&header);
        assert_eq!(reply_header.status, Some(status::INTERNAL_ERROR));
        assert!(reply_header.message.unwrap().contains("readonly"));
        assert_eq!(changed, None);
    }

    #[test]
    fn set_unknown_property_creates_user_metadata() {
        let mut host = PropertyHost::new();
        let mut request = RequestHeader::for_resource("X-New");
        request.set_partial = Some(false);
        let (_, changed) =
            host.process_set(Muid::new(1), &common(), 5, &request.to_bytes(), b"[9]");
        assert_eq!(changed.as_deref(), Some("X-New"));
        assert_eq!(host.metadata("X-New").unwrap().originator, Originator::User);
        assert_eq!(host.value("X-New", "").unwrap().body, Bytes::from_static(b"[9]"));
    }

    #[test]
    fn partial_set_without_existing_value_stores_nothing() {
        let mut host = PropertyHost::new();
        host.add_metadata({
            let mut m = PropertyMetadata::new("P");
            m.can_set = SetAccess::Partial;
            m
        })
        .unwrap();
        let mut request = RequestHeader::for_resource("P");
        request.set_partial = Some(true);
        let (_, changed) = host.process_set(Muid::new(1), &common(), 6, &request.to_bytes(), b"[1]");
        assert_eq!(changed, None);
        assert!(host.value("P", "").is_none());
    }

    #[test]
    fn subscribe_start_assigns_eight_digit_id() {
        let mut host = PropertyHost::new();
        let mut request = RequestHeader::for_resource("X-Temperature");
        request.command = Some(command::START.into());
        let reply = host.process_subscribe(Muid::new(1), &common(), 7, &request.to_bytes());
        let Message::SubscribePropertyReply { header, .. } = reply else {
            panic!("expected SubscribePropertyReply");
        };
        let reply_header = ReplyHeader::from_bytes(&header);
        assert!(reply_header.is_ok());
        let id = reply_header.subscribe_id.unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(host.subscriptions().len(), 1);
        assert_eq!(host.subscriptions()[0].subscribe_id, id);
    }

    #[test]
    fn subscribe_end_without_match_still_succeeds() {
        let mut host = PropertyHost::new();
        let mut request = RequestHeader::for_resource("X");
        request.command = Some(command::END.into());
        request.subscribe_id = Some("00000001".into());
        let reply = host.process_subscribe(Muid::new(1), &common(), 8, &request.to_bytes());
        let Message::SubscribePropertyReply { header, .. } = reply else {
            panic!("expected SubscribePropertyReply");
        };
        assert!(ReplyHeader::from_bytes(&header).is_ok());
    }

    #[test]
    fn notifications_cover_each_subscriber_with_its_encoding() {
        let mut host = PropertyHost::new();
        for (muid, encoding) in [(1u32, "Mcoded7"), (2, "Mcoded7"), (3, "")] {
            host.subscriptions.push(HostSubscription {
                subscriber_muid: Muid::new(muid),
                resource: "X".into(),
                res_id: String::new(),
                subscribe_id: format!("{muid:08}"),
                encoding: encoding.into(),
            });
        }
        let data = [0x00u8, 0x80, 0xFF];
        let notifications = host.build_notifications("X", &data, false);
        assert_eq!(notifications.len(), 3);
        for (header, body) in &notifications {
            let parsed = RequestHeader::from_bytes(header);
            assert_eq!(parsed.command.as_deref(), Some(command::FULL));
            let decoded = match parsed.mutual_encoding.as_deref() {
                Some("Mcoded7") => capwire::mcoded7::decode(body),
                _ => body.clone(),
            };
            assert_eq!(decoded, data);
        }
        // distinct subscribe ids flow through
        let ids: Vec<_> = notifications
            .iter()
            .map(|(h, _)| RequestHeader::from_bytes(h).subscribe_id.unwrap())
            .collect();
        assert_eq!(ids, vec!["00000001", "00000002", "00000003"]);
    }
}

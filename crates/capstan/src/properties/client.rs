//! The property client facade: one per connection.
//!
//! Tracks outstanding GET/SET requests for structural correlation, runs the
//! subscription state machine, and mirrors the peer's catalog and values.
//! Like the host facade this module never sends anything itself; handlers
//! return the actions (replies to emit, follow-up fetches) for the
//! messenger to perform.

use std::collections::HashMap;

use bytes::Bytes;
use capwire::{Common, Message, Muid};
use tracing::warn;

use crate::callbacks::{CallbackRegistry, CallbackToken};
use crate::chunks::ChunkManager;
use crate::properties::commonrules::{
    self, command, status, ReplyHeader, RequestHeader,
};
use crate::properties::foundational::{self, resource};
use crate::properties::standard;
use crate::properties::{ClientSubscription, PropertyMetadata, PropertyValue, SubscriptionState};

/// One-shot callback invoked with the matching reply message.
pub type PropertyReplyCallback = Box<dyn FnOnce(&Message)>;

/// An outbound GET/SET awaiting its reply. A reply matches when its source
/// and destination mirror the request and the request ids are equal.
#[derive(Debug, Clone)]
struct OpenRequest {
    source: Muid,
    destination: Muid,
    header: Bytes,
}

/// What the messenger should do after a GetPropertyDataReply was absorbed.
pub(crate) struct GetReplyActions {
    pub callback: Option<PropertyReplyCallback>,
    /// Resources to auto-fetch next (ResourceList follow-ups).
    pub fetch: Vec<String>,
}

/// What the messenger should do after an incoming subscription message.
pub(crate) struct SubscribeUpdateActions {
    pub reply_header: Bytes,
    /// Pull-on-notify: resource to GET after the reply went out.
    pub fetch: Option<(String, String)>,
}

/// Client side of property exchange for a single peer.
pub struct PropertyClient {
    open_requests: HashMap<u8, OpenRequest>,
    get_callbacks: HashMap<u8, PropertyReplyCallback>,
    set_callbacks: HashMap<u8, PropertyReplyCallback>,
    subscriptions: Vec<ClientSubscription>,
    catalog: Vec<PropertyMetadata>,
    values: Vec<PropertyValue>,
    pub(crate) chunk_manager: ChunkManager,
    catalog_updated: CallbackRegistry<Box<dyn FnMut()>>,
    value_updated: CallbackRegistry<Box<dyn FnMut(&str, &str)>>,
    subscription_updated: CallbackRegistry<Box<dyn FnMut(&ClientSubscription)>>,
}

impl PropertyClient {
    pub(crate) fn new(chunk_timeout: std::time::Duration) -> Self {
        Self {
            open_requests: HashMap::new(),
            get_callbacks: HashMap::new(),
            set_callbacks: HashMap::new(),
            subscriptions: Vec::new(),
            catalog: Vec::new(),
            values: Vec::new(),
            chunk_manager: ChunkManager::new(chunk_timeout),
            catalog_updated: CallbackRegistry::new(),
            value_updated: CallbackRegistry::new(),
            subscription_updated: CallbackRegistry::new(),
        }
    }

    // === Observable state ===

    /// The peer's catalog as last parsed from `ResourceList`.
    pub fn catalog(&self) -> &[PropertyMetadata] {
        &self.catalog
    }

    pub(crate) fn catalog_has(&self, property_id: &str) -> bool {
        self.catalog.iter().any(|m| m.resource == property_id)
    }

    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }

    /// First value stored under `property_id` regardless of res id.
    pub fn value(&self, property_id: &str) -> Option<&PropertyValue> {
        self.values.iter().find(|v| v.id == property_id)
    }

    pub fn value_with_res_id(&self, property_id: &str, res_id: &str) -> Option<&PropertyValue> {
        self.values
            .iter()
            .find(|v| v.id == property_id && v.res_id == res_id)
    }

    pub fn subscriptions(&self) -> &[ClientSubscription] {
        &self.subscriptions
    }

    // === Request bookkeeping ===

    pub(crate) fn record_open_request(
        &mut self,
        request_id: u8,
        source: Muid,
        destination: Muid,
        header: Bytes,
    ) {
        self.open_requests.insert(
            request_id,
            OpenRequest {
                source,
                destination,
                header,
            },
        );
    }

    pub(crate) fn register_get_callback(&mut self, request_id: u8, callback: PropertyReplyCallback) {
        self.get_callbacks.insert(request_id, callback);
    }

    pub(crate) fn register_set_callback(&mut self, request_id: u8, callback: PropertyReplyCallback) {
        self.set_callbacks.insert(request_id, callback);
    }

    fn take_matching(&mut self, request_id: u8, reply_common: &Common) -> Option<OpenRequest> {
        let open = self.open_requests.get(&request_id)?;
        let matches = open.source == reply_common.destination_muid
            && open.destination == reply_common.source_muid;
        if !matches {
            return None;
        }
        self.open_requests.remove(&request_id)
    }

    // === Reply handlers ===

    pub(crate) fn on_get_reply(
        &mut self,
        request_id: u8,
        reply_common: &Common,
        header: &[u8],
        body: &[u8],
        auto_get_device_info: bool,
    ) -> GetReplyActions {
        let mut actions = GetReplyActions {
            callback: None,
            fetch: Vec::new(),
        };
        let Some(open) = self.take_matching(request_id, reply_common) else {
            return actions;
        };
        actions.callback = self.get_callbacks.remove(&request_id);

        let reply = ReplyHeader::from_bytes(header);
        if !reply.is_ok() {
            return actions;
        }
        let request = RequestHeader::from_bytes(&open.header);
        if request.resource.is_empty() {
            return actions;
        }
        let media_type = reply
            .media_type
            .unwrap_or_else(|| commonrules::MEDIA_TYPE_JSON.to_string());
        let decoded = commonrules::decode_body(header, body);
        self.update_value(
            &request.resource,
            request.res_id_str(),
            &media_type,
            Bytes::from(decoded.clone()),
        );

        if request.resource == resource::RESOURCE_LIST {
            match foundational::parse_resource_list(&decoded) {
                Ok(list) => {
                    self.catalog = list;
                    self.sync_values_with_catalog();
                    self.notify_catalog_updated();
                    if auto_get_device_info && self.catalog_has(resource::DEVICE_INFO) {
                        actions.fetch.push(resource::DEVICE_INFO.to_string());
                    }
                    if self.catalog_has(standard::name::ALL_CTRL_LIST) {
                        actions.fetch.push(standard::name::ALL_CTRL_LIST.to_string());
                    }
                    if self.catalog_has(standard::name::PROGRAM_LIST) {
                        actions.fetch.push(standard::name::PROGRAM_LIST.to_string());
                    }
                }
                Err(e) => warn!("failed to parse ResourceList: {e}"),
            }
        }
        actions
    }

    pub(crate) fn on_set_reply(
        &mut self,
        request_id: u8,
        reply_common: &Common,
    ) -> Option<PropertyReplyCallback> {
        // the client never applies body changes locally on SET replies
        self.take_matching(request_id, reply_common)?;
        self.set_callbacks.remove(&request_id)
    }

    pub(crate) fn on_subscribe_reply(&mut self, request_id: u8, header: &[u8]) {
        let reply = ReplyHeader::from_bytes(header);
        if reply.status != Some(status::OK) {
            return;
        }
        let subscribe_id = reply.subscribe_id.unwrap_or_default();

        let Some(index) = self.subscriptions.iter().position(|s| {
            (!subscribe_id.is_empty() && s.subscribe_id.as_deref() == Some(subscribe_id.as_str()))
                || s.pending_request_id == Some(request_id)
        }) else {
            return;
        };
        let state = self.subscriptions[index].state;
        // a missing subscribeId is only legal on an unsubscription reply
        if subscribe_id.is_empty() && state != SubscriptionState::Unsubscribing {
            return;
        }
        if matches!(
            state,
            SubscriptionState::Subscribed | SubscriptionState::Unsubscribed
        ) {
            return;
        }
        if !subscribe_id.is_empty() {
            self.subscriptions[index].subscribe_id = Some(subscribe_id);
        }

        if state == SubscriptionState::Unsubscribing {
            let mut sub = self.subscriptions.remove(index);
            sub.state = SubscriptionState::Unsubscribed;
            self.notify_subscription_updated(&sub);
        } else {
            self.subscriptions[index].state = SubscriptionState::Subscribed;
            self.subscriptions[index].pending_request_id = None;
            let sub = self.subscriptions[index].clone();
            self.notify_subscription_updated(&sub);
        }
    }

    // === Subscription state machine (outbound side) ===

    pub(crate) fn add_pending_subscription(
        &mut self,
        request_id: u8,
        subscription_id: Option<String>,
        property_id: &str,
        res_id: &str,
    ) {
        let sub = ClientSubscription {
            pending_request_id: Some(request_id),
            subscribe_id: subscription_id,
            resource: property_id.to_string(),
            res_id: res_id.to_string(),
            state: SubscriptionState::Subscribing,
        };
        self.subscriptions.push(sub.clone());
        self.notify_subscription_updated(&sub);
    }

    /// Flip a subscribed entry to Unsubscribing, returning the stored
    /// subscribe id to put on the wire. `None` when there is nothing to
    /// unsubscribe (or an unsubscribe is already in flight).
    pub(crate) fn begin_unsubscribe(
        &mut self,
        property_id: &str,
        res_id: &str,
        new_request_id: u8,
    ) -> Option<Option<String>> {
        let sub = self
            .subscriptions
            .iter_mut()
            .find(|s| s.resource == property_id && (res_id.is_empty() || s.res_id == res_id))?;
        if sub.state == SubscriptionState::Unsubscribing {
            return None;
        }
        sub.pending_request_id = Some(new_request_id);
        sub.state = SubscriptionState::Unsubscribing;
        let subscribe_id = sub.subscribe_id.clone();
        let snapshot = sub.clone();
        self.notify_subscription_updated(&snapshot);
        Some(subscribe_id)
    }

    // === Incoming subscription traffic ===

    /// Handle `full`/`partial`/`notify`/`end` addressed to this client.
    pub(crate) fn on_subscribe_message(&mut self, header: &[u8], body: &[u8]) -> SubscribeUpdateActions {
        let request = RequestHeader::from_bytes(header);
        let ok_header = ReplyHeader::with_status(status::OK).to_bytes();
        match request.command.as_deref().unwrap_or("") {
            command::END => {
                let subscribe_id = request.subscribe_id.clone().unwrap_or_default();
                let position = self.subscriptions.iter().position(|s| {
                    (!subscribe_id.is_empty()
                        && s.subscribe_id.as_deref() == Some(subscribe_id.as_str()))
                        || s.resource == request.resource
                });
                if let Some(index) = position {
                    let sub = self.subscriptions.remove(index);
                    self.notify_subscription_updated(&sub);
                }
                SubscribeUpdateActions {
                    reply_header: ok_header,
                    fetch: None,
                }
            }
            command::NOTIFY => {
                // never apply the body; pull the current value instead
                let fetch = self
                    .subscribed_property(&request)
                    .or_else(|| {
                        (!request.resource.is_empty())
                            .then(|| (request.resource.clone(), request.res_id_str().to_string()))
                    });
                SubscribeUpdateActions {
                    reply_header: ok_header,
                    fetch,
                }
            }
            _ => {
                // full or partial update
                if let Some((property_id, res_id)) = self.subscribed_property(&request) {
                    let media_type = request.media_type_str().to_string();
                    let decoded = commonrules::decode_body(header, body);
                    self.update_value(&property_id, &res_id, &media_type, Bytes::from(decoded));
                }
                SubscribeUpdateActions {
                    reply_header: ok_header,
                    fetch: None,
                }
            }
        }
    }

    /// Resolve which property an incoming subscription message is about,
    /// from its `subscribeId`.
    fn subscribed_property(&self, request: &RequestHeader) -> Option<(String, String)> {
        let subscribe_id = request.subscribe_id.as_deref()?;
        self.subscriptions
            .iter()
            .find(|s| s.subscribe_id.as_deref() == Some(subscribe_id))
            .map(|s| (s.resource.clone(), s.res_id.clone()))
    }

    // === Value store ===

    pub(crate) fn update_value(&mut self, property_id: &str, res_id: &str, media_type: &str, body: Bytes) {
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

    /// Keep one value slot per catalog entry, preserving bytes already held.
    fn sync_values_with_catalog(&mut self) {
        for meta in &self.catalog {
            if !self.values.iter().any(|v| v.id == meta.resource) {
                self.values.push(PropertyValue::new(
                    meta.resource.clone(),
                    "",
                    meta.media_type(),
                    Bytes::new(),
                ));
            }
        }
    }

    // === Observers ===

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

    pub fn add_subscription_updated_callback(
        &mut self,
        callback: Box<dyn FnMut(&ClientSubscription)>,
    ) -> CallbackToken {
        self.subscription_updated.add(callback)
    }

    pub fn remove_subscription_updated_callback(&mut self, token: CallbackToken) -> bool {
        self.subscription_updated.remove(token)
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

    fn notify_subscription_updated(&mut self, sub: &ClientSubscription) {
        for callback in self.subscription_updated.iter_mut() {
            callback(sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn local() -> Muid {
        Muid::new(0x0102_0304)
    }
    fn peer() -> Muid {
        Muid::new(0x0506_0708)
    }

    fn client() -> PropertyClient {
        PropertyClient::new(Duration::from_secs(30))
    }

    fn reply_common() -> Common {
        Common::new(peer(), local(), 0x7F, 0)
    }

    #[test]
    fn get_reply_correlates_structurally() {
        let mut client = client();
        let header = RequestHeader::for_resource("X").to_bytes();
        client.record_open_request(42, local(), peer(), header);

        // reply from the wrong peer does not match
        let wrong = Common::new(Muid::new(0x7), local(), 0x7F, 0);
        let ok = ReplyHeader::with_status(status::OK).to_bytes();
        let actions = client.on_get_reply(42, &wrong, &ok, b"[1]", false);
        assert!(actions.callback.is_none());
        assert!(client.value("X").is_none());

        let actions = client.on_get_reply(42, &reply_common(), &ok, b"[1]", false);
        assert!(actions.fetch.is_empty());
        assert_eq!(client.value("X").unwrap().body, Bytes::from_static(b"[1]"));

        // the open request is consumed
        let again = client.on_get_reply(42, &reply_common(), &ok, b"[2]", false);
        assert!(again.callback.is_none());
        assert_eq!(client.value("X").unwrap().body, Bytes::from_static(b"[1]"));
    }

    #[test]
    fn non_ok_reply_keeps_value_untouched_but_fires_callback() {
        let mut client = client();
        client.record_open_request(1, local(), peer(), RequestHeader::for_resource("X").to_bytes());
        client.register_get_callback(1, Box::new(|_| {}));
        let err = ReplyHeader::error(status::RESOURCE_UNAVAILABLE_OR_ERROR, "nope").to_bytes();
        let actions = client.on_get_reply(1, &reply_common(), &err, b"", false);
        assert!(actions.callback.is_some());
        assert!(client.value("X").is_none());
    }

    #[test]
    fn resource_list_reply_updates_catalog_and_requests_followups() {
        let mut client = client();
        client.record_open_request(
            3,
            local(),
            peer(),
            RequestHeader::for_resource(resource::RESOURCE_LIST).to_bytes(),
        );
        let list = serde_json::json!([
            {"resource": "DeviceInfo"},
            {"resource": "AllCtrlList"},
            {"resource": "X-Temperature", "canSubscribe": true},
        ]);
        let body = serde_json::to_vec(&list).unwrap();
        let ok = ReplyHeader::with_status(status::OK).to_bytes();
        let actions = client.on_get_reply(3, &reply_common(), &ok, &body, true);
        assert_eq!(actions.fetch, vec!["DeviceInfo", "AllCtrlList"]);
        assert_eq!(client.catalog().len(), 3);
        // every catalog entry gained a value slot
        assert!(client.value("X-Temperature").is_some());
    }

    #[test]
    fn subscription_reaches_subscribed_on_ok_reply() {
        let mut client = client();
        client.add_pending_subscription(9, None, "X", "");
        assert_eq!(client.subscriptions()[0].state, SubscriptionState::Subscribing);

        let reply = ReplyHeader {
            status: Some(status::OK),
            subscribe_id: Some("12345678".into()),
            ..Default::default()
        }
        .to_bytes();
        client.on_subscribe_reply(9, &reply);
        let sub = &client.subscriptions()[0];
        assert_eq!(sub.state, SubscriptionState::Subscribed);
        assert_eq!(sub.subscribe_id.as_deref(), Some("12345678"));
        assert_eq!(sub.pending_request_id, None);
    }

    #[test]
    fn reply_without_subscribe_id_only_completes_unsubscribe() {
        let mut client = client();
        client.add_pending_subscription(5, None, "X", "");
        let bare_ok = ReplyHeader::with_status(status::OK).to_bytes();
        client.on_subscribe_reply(5, &bare_ok);
        // still subscribing: the reply lacked a subscribeId
        assert_eq!(client.subscriptions()[0].state, SubscriptionState::Subscribing);
    }

    #[test]
    fn unsubscribe_flow_removes_entry() {
        let mut client = client();
        client.add_pending_subscription(1, Some("12345678".into()), "X", "");
        let reply = ReplyHeader {
            status: Some(status::OK),
            subscribe_id: Some("12345678".into()),
            ..Default::default()
        }
        .to_bytes();
        client.on_subscribe_reply(1, &reply);

        let subscribe_id = client.begin_unsubscribe("X", "", 2).unwrap();
        assert_eq!(subscribe_id.as_deref(), Some("12345678"));
        assert_eq!(client.subscriptions()[0].state, SubscriptionState::Unsubscribing);
        // a second unsubscribe while in flight is refused
        assert!(client.begin_unsubscribe("X", "", 3).is_none());

        let bare_ok = ReplyHeader::with_status(status::OK).to_bytes();
        client.on_subscribe_reply(2, &bare_ok);
        assert!(client.subscriptions().is_empty());
    }

    #[test]
    fn incoming_full_update_applies_value_by_subscribe_id() {
        let mut client = client();
        client.add_pending_subscription(1, Some("00000001".into()), "X", "");
        let reply = ReplyHeader {
            status: Some(status::OK),
            subscribe_id: Some("00000001".into()),
            ..Default::default()
        }
        .to_bytes();
        client.on_subscribe_reply(1, &reply);

        let header = RequestHeader {
            resource: "X".into(),
            command: Some(command::FULL.into()),
            subscribe_id: Some("00000001".into()),
            ..Default::default()
        }
        .to_bytes();
        let actions = client.on_subscribe_message(&header, b"[7]");
        assert!(actions.fetch.is_none());
        assert!(ReplyHeader::from_bytes(&actions.reply_header).is_ok());
        assert_eq!(client.value("X").unwrap().body, Bytes::from_static(b"[7]"));
    }

    #[test]
    fn incoming_notify_pulls_instead_of_applying() {
        let mut client = client();
        let header = RequestHeader {
            resource: "X".into(),
            command: Some(command::NOTIFY.into()),
            ..Default::default()
        }
        .to_bytes();
        let actions = client.on_subscribe_message(&header, b"[7]");
        assert_eq!(actions.fetch, Some(("X".into(), String::new())));
        assert!(client.value("X").is_none());
    }

    #[test]
    fn incoming_end_removes_subscription() {
        let mut client = client();
        client.add_pending_subscription(1, Some("00000009".into()), "X", "");
        let header = RequestHeader {
            resource: "X".into(),
            command: Some(command::END.into()),
            subscribe_id: Some("00000009".into()),
            ..Default::default()
        }
        .to_bytes();
        let actions = client.on_subscribe_message(&header, b"");
        assert!(ReplyHeader::from_bytes(&actions.reply_header).is_ok());
        assert!(client.subscriptions().is_empty());
    }
}

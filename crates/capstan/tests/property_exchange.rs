//! Property exchange end-to-end: catalog fetch, chunked transfers and
//! subscriptions between two in-memory devices.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;
use capstan::properties::commonrules::{Encoding, ReplyHeader};
use capstan::properties::foundational;
use capstan::properties::{PropertyMetadata, SetAccess, SubscriptionState};
use capstan::{DeviceConfig, DeviceInfo, MidiCIDevice, Muid};
use capwire::{retrieval, Message};
use pretty_assertions::assert_eq;

type Wire = Rc<RefCell<VecDeque<(u8, Vec<u8>)>>>;

fn device(muid: u32, config: DeviceConfig) -> (MidiCIDevice, Wire) {
    let wire: Wire = Rc::new(RefCell::new(VecDeque::new()));
    let mut device = MidiCIDevice::new(Muid::new(muid), config);
    let out = wire.clone();
    device.set_output_sender(Box::new(move |group, data| {
        out.borrow_mut().push_back((group, data.to_vec()));
        true
    }));
    (device, wire)
}

fn pump(a: &mut MidiCIDevice, a_out: &Wire, b: &mut MidiCIDevice, b_out: &Wire) {
    loop {
        let mut progressed = false;
        loop {
            let next = a_out.borrow_mut().pop_front();
            let Some((group, data)) = next else { break };
            progressed = true;
            b.process_input(group, &data);
        }
        loop {
            let next = b_out.borrow_mut().pop_front();
            let Some((group, data)) = next else { break };
            progressed = true;
            a.process_input(group, &data);
        }
        if !progressed {
            break;
        }
    }
}

fn host_config(model: &str) -> DeviceConfig {
    DeviceConfig {
        device_info: DeviceInfo {
            model: model.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A pair of devices after the full discovery handshake (A knows B).
fn connected() -> (MidiCIDevice, Wire, MidiCIDevice, Wire) {
    let (mut a, a_out) = device(0x0102_0304, host_config("alpha"));
    let (mut b, b_out) = device(0x0506_0708, host_config("beta"));
    a.send_discovery().unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);
    (a, a_out, b, b_out)
}

#[test]
fn resource_list_lands_on_the_client_with_catalog() {
    let (mut a, a_out) = device(0x0102_0304, host_config("alpha"));
    let (mut b, b_out) = device(0x0506_0708, host_config("beta"));
    b.property_host_mut()
        .add_metadata({
            let mut meta = PropertyMetadata::new("X-Temperature");
            meta.can_subscribe = true;
            meta
        })
        .unwrap();

    a.send_discovery().unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);

    let connection = a.connection(b.muid()).unwrap();
    let value = connection
        .properties()
        .value(foundational::resource::RESOURCE_LIST)
        .expect("ResourceList value");
    let entries = foundational::parse_resource_list(&value.body).unwrap();
    let names: Vec<&str> = entries.iter().map(|m| m.resource.as_str()).collect();
    assert_eq!(
        names,
        vec!["DeviceInfo", "ChannelList", "JSONSchema", "X-Temperature"]
    );

    // the parsed catalog mirrors the host's and DeviceInfo was auto-fetched
    assert_eq!(connection.properties().catalog().len(), 4);
    assert_eq!(connection.device_info().model, "beta");
}

#[test]
fn get_property_data_callback_fires_once_with_status_200() {
    let (mut a, a_out, mut b, b_out) = connected();
    b.property_host_mut()
        .add_metadata(PropertyMetadata::new("X-Level"))
        .unwrap();
    b.set_property_value("X-Level", "", Bytes::from_static(b"[1,2,3]"), false)
        .unwrap();

    let status = Rc::new(RefCell::new(None));
    let sink = status.clone();
    a.get_property_data(
        b.muid(),
        "X-Level",
        None,
        Box::new(move |msg| {
            if let Message::GetPropertyDataReply { header, body, .. } = msg {
                *sink.borrow_mut() =
                    Some((ReplyHeader::from_bytes(header).status, body.to_vec()));
            }
        }),
    )
    .unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);

    let result = status.borrow_mut().take().expect("callback fired");
    assert_eq!(result.0, Some(200));
    assert_eq!(result.1, b"[1,2,3]");
    assert_eq!(
        a.connection(b.muid()).unwrap().properties().value("X-Level").unwrap().body,
        Bytes::from_static(b"[1,2,3]")
    );
}

#[test]
fn chunked_set_reassembles_and_replies_ok() {
    let (mut a, a_out, mut b, b_out) = connected();
    a.config_mut().max_property_chunk_size = 512;
    b.property_host_mut()
        .add_metadata({
            let mut meta = PropertyMetadata::new("Blob");
            meta.can_set = SetAccess::Full;
            meta
        })
        .unwrap();

    // ~3.7 KB JSON body
    let body = serde_json::to_vec(&(0..800).collect::<Vec<u32>>()).unwrap();
    assert!(body.len() > 3000);

    let status = Rc::new(RefCell::new(None));
    let sink = status.clone();
    a.set_property_data(
        b.muid(),
        "Blob",
        None,
        &body,
        false,
        Box::new(move |msg| {
            if let Message::SetPropertyDataReply { header, .. } = msg {
                *sink.borrow_mut() = Some(ReplyHeader::from_bytes(header).status);
            }
        }),
    )
    .unwrap();

    // inspect the queued chunks before delivering them
    {
        let queued = a_out.borrow();
        let chunks: Vec<&Vec<u8>> = queued
            .iter()
            .map(|(_, data)| data)
            .filter(|data| data[3] == 0x36)
            .collect();
        assert!(chunks.len() >= 7, "got {} chunks", chunks.len());
        let total = retrieval::property_total_chunks(chunks[0]);
        assert_eq!(total as usize, chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(retrieval::property_total_chunks(chunk), total);
            assert_eq!(retrieval::property_chunk_index(chunk), (i + 1) as u16);
        }
    }

    pump(&mut a, &a_out, &mut b, &b_out);

    assert_eq!(*status.borrow(), Some(Some(200)));
    assert_eq!(b.property_host().value("Blob", "").unwrap().body, body);
}

#[test]
fn subscription_fan_out_delivers_exactly_one_encoded_notification() {
    let (mut a, a_out, mut b, b_out) = connected();
    b.property_host_mut()
        .add_metadata({
            let mut meta = PropertyMetadata::new("X-Temperature");
            meta.can_subscribe = true;
            meta
        })
        .unwrap();

    a.send_subscribe_property(b.muid(), "X-Temperature", None, Some(Encoding::Mcoded7), None)
        .unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);

    assert_eq!(b.property_host().subscriptions().len(), 1);
    let host_subscribe_id = b.property_host().subscriptions()[0].subscribe_id.clone();
    {
        let subs = a.connection(b.muid()).unwrap().properties().subscriptions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].state, SubscriptionState::Subscribed);
        assert_eq!(subs[0].subscribe_id.as_deref(), Some(host_subscribe_id.as_str()));
    }

    // count incoming subscription messages on A from here on
    let notifications = Rc::new(RefCell::new(0));
    let counter = notifications.clone();
    a.add_message_callback(Box::new(move |msg: &Message| {
        if matches!(msg, Message::SubscribeProperty { .. }) {
            *counter.borrow_mut() += 1;
        }
    }));

    // binary payload to prove the Mcoded7 leg decodes transparently
    let payload: Vec<u8> = (0u8..=255).collect();
    b.set_property_value("X-Temperature", "", Bytes::from(payload.clone()), false)
        .unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);

    assert_eq!(*notifications.borrow(), 1);
    let received = a
        .connection(b.muid())
        .unwrap()
        .properties()
        .value("X-Temperature")
        .unwrap();
    assert_eq!(received.body, payload);
}

#[test]
fn unsubscribe_removes_both_sides() {
    let (mut a, a_out, mut b, b_out) = connected();
    b.property_host_mut()
        .add_metadata({
            let mut meta = PropertyMetadata::new("X-Temperature");
            meta.can_subscribe = true;
            meta
        })
        .unwrap();

    a.send_subscribe_property(b.muid(), "X-Temperature", None, None, None)
        .unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);
    assert_eq!(b.property_host().subscriptions().len(), 1);

    a.send_unsubscribe_property(b.muid(), "X-Temperature", "").unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);

    assert!(b.property_host().subscriptions().is_empty());
    assert!(a.connection(b.muid()).unwrap().properties().subscriptions().is_empty());
}

#[test]
fn host_initiated_shutdown_ends_client_subscription() {
    let (mut a, a_out, mut b, b_out) = connected();
    b.property_host_mut()
        .add_metadata({
            let mut meta = PropertyMetadata::new("X-Temperature");
            meta.can_subscribe = true;
            meta
        })
        .unwrap();

    a.send_subscribe_property(b.muid(), "X-Temperature", None, None, None)
        .unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);

    b.shutdown_subscription(a.muid(), "X-Temperature", "").unwrap();
    pump(&mut a, &a_out, &mut b, &b_out);

    assert!(b.property_host().subscriptions().is_empty());
    assert!(a.connection(b.muid()).unwrap().properties().subscriptions().is_empty());
}

#[test]
fn paginated_get_returns_slice_and_total_count() {
    let (mut a, a_out, mut b, b_out) = connected();
    b.property_host_mut()
        .add_metadata(PropertyMetadata::new("List"))
        .unwrap();
    b.set_property_value("List", "", Bytes::from_static(b"[10,11,12,13,14]"), false)
        .unwrap();

    let result = Rc::new(RefCell::new(None));
    let sink = result.clone();
    let request_id = a
        .send_get_property_data(b.muid(), "List", None, None, Some(1), Some(3))
        .unwrap();
    a.add_message_callback(Box::new(move |msg: &Message| {
        if let Message::GetPropertyDataReply { header, body, request_id: id, .. } = msg {
            *sink.borrow_mut() = Some((*id, ReplyHeader::from_bytes(header).total_count, body.to_vec()));
        }
    }));
    pump(&mut a, &a_out, &mut b, &b_out);

    let (id, total, body) = result.borrow_mut().take().expect("reply seen");
    assert_eq!(id, request_id);
    assert_eq!(total, Some(5));
    assert_eq!(body, b"[11,12,13]");
}

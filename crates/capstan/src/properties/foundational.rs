//! Foundational resources: the built-in properties every host serves.
//!
//! `DeviceInfo`, `ChannelList` and `JSONSchema` are synthesized from device
//! configuration; `ResourceList` is the catalog of everything else. This
//! module owns their JSON shapes in both directions.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::DeviceInfo;
use crate::properties::{Originator, PropertyMetadata};

/// Resource names of the built-in properties.
pub mod resource {
    pub const DEVICE_INFO: &str = "DeviceInfo";
    pub const CHANNEL_LIST: &str = "ChannelList";
    pub const JSON_SCHEMA: &str = "JSONSchema";
    pub const RESOURCE_LIST: &str = "ResourceList";

    /// Whether a property id names a built-in (read-only) resource.
    pub fn is_builtin(id: &str) -> bool {
        matches!(id, DEVICE_INFO | CHANNEL_LIST | JSON_SCHEMA | RESOURCE_LIST)
    }
}

#[derive(Debug, Error)]
pub enum FoundationalError {
    #[error("expected a JSON array for {0}")]
    NotAnArray(&'static str),
    #[error("expected a JSON object for {0}")]
    NotAnObject(&'static str),
}

/// One channel description in `ChannelList`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelInfo {
    pub title: String,
    /// 0-based; serialized 1-based.
    pub channel: u16,
    pub program_title: String,
    pub bank_msb: u8,
    pub bank_lsb: u8,
    pub program: u8,
    /// 0-based; serialized 1-based.
    pub cluster_channel_start: u16,
    pub cluster_length: u16,
    pub is_omni_on: bool,
    pub is_poly_mode: bool,
    pub cluster_type: String,
}

/// The `ChannelList` property body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelList {
    pub channels: Vec<ChannelInfo>,
}

fn id_bytes(value: u64, width: usize) -> Value {
    let bytes: Vec<Value> = (0..width)
        .rev()
        .map(|i| json!((value >> (8 * i)) & 0xFF))
        .collect();
    Value::Array(bytes)
}

fn number_from_id(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        // big-endian byte array form
        Value::Array(bytes) => bytes
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | b.as_u64().unwrap_or(0)),
        _ => 0,
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn number_field(obj: &Map<String, Value>, key: &str, default: u64) -> u64 {
    obj.get(key).and_then(Value::as_u64).unwrap_or(default)
}

/// `DeviceInfo` body for the host side.
pub fn device_info_to_json(info: &DeviceInfo) -> Value {
    let mut obj = Map::new();
    obj.insert("manufacturerId".into(), id_bytes(info.manufacturer_id as u64, 3));
    obj.insert("familyId".into(), id_bytes(info.family_id as u64, 2));
    obj.insert("modelId".into(), id_bytes(info.model_id as u64, 2));
    obj.insert("versionId".into(), id_bytes(info.version_id as u64, 4));
    obj.insert("manufacturer".into(), json!(info.manufacturer));
    obj.insert("family".into(), json!(info.family));
    obj.insert("model".into(), json!(info.model));
    obj.insert("version".into(), json!(info.version));
    if !info.serial_number.is_empty() {
        obj.insert("serialNumber".into(), json!(info.serial_number));
    }
    Value::Object(obj)
}

/// Parse a `DeviceInfo` body. Accepts ids both as numbers and as the
/// big-endian byte arrays the serializer emits.
pub fn parse_device_info(data: &[u8]) -> Result<DeviceInfo, FoundationalError> {
    let json: Value = serde_json::from_slice(data)
        .map_err(|_| FoundationalError::NotAnObject("device info"))?;
    let obj = json
        .as_object()
        .ok_or(FoundationalError::NotAnObject("device info"))?;
    Ok(DeviceInfo {
        manufacturer_id: obj.get("manufacturerId").map(number_from_id).unwrap_or(0) as u32,
        family_id: obj.get("familyId").map(number_from_id).unwrap_or(0) as u16,
        model_id: obj.get("modelId").map(number_from_id).unwrap_or(0) as u16,
        version_id: obj.get("versionId").map(number_from_id).unwrap_or(0) as u32,
        manufacturer: string_field(obj, "manufacturer"),
        family: string_field(obj, "family"),
        model: string_field(obj, "model"),
        version: string_field(obj, "version"),
        serial_number: string_field(obj, "serialNumber"),
    })
}

fn channel_to_json(channel: &ChannelInfo) -> Value {
    let mut obj = Map::new();
    obj.insert("title".into(), json!(channel.title));
    obj.insert("channel".into(), json!(channel.channel + 1));
    if !channel.program_title.is_empty() {
        obj.insert("programTitle".into(), json!(channel.program_title));
    }
    if channel.bank_msb != 0 || channel.bank_lsb != 0 || channel.program != 0 {
        obj.insert(
            "bankPC".into(),
            json!([channel.bank_msb, channel.bank_lsb, channel.program]),
        );
    }
    if channel.cluster_channel_start > 0 {
        obj.insert("clusterChannelStart".into(), json!(channel.cluster_channel_start + 1));
    }
    if channel.cluster_length > 1 {
        obj.insert("clusterLength".into(), json!(channel.cluster_length));
    }
    // MIDI mode 3 (poly, omni off) is the default and stays implicit
    let midi_mode = if channel.is_poly_mode {
        3
    } else if channel.is_omni_on {
        1
    } else {
        2
    };
    if midi_mode != 3 {
        obj.insert("clusterMidiMode".into(), json!(midi_mode));
    }
    if !channel.cluster_type.is_empty() && channel.cluster_type != "OTHER" {
        obj.insert("clusterType".into(), json!(channel.cluster_type));
    }
    Value::Object(obj)
}

/// `ChannelList` body; an empty list serializes as `null`.
pub fn channel_list_to_json(list: &ChannelList) -> Value {
    if list.channels.is_empty() {
        return Value::Null;
    }
    Value::Array(list.channels.iter().map(channel_to_json).collect())
}

/// Parse a `ChannelList` body; non-arrays yield an empty list.
pub fn parse_channel_list(data: &[u8]) -> ChannelList {
    let json: Value = serde_json::from_slice(data).unwrap_or(Value::Null);
    let Some(items) = json.as_array() else {
        return ChannelList::default();
    };
    let channels = items
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| {
            let bank_pc = obj.get("bankPC").and_then(Value::as_array);
            let byte = |i: usize| {
                bank_pc
                    .and_then(|a| a.get(i))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u8
            };
            let midi_mode = number_field(obj, "clusterMidiMode", 3);
            ChannelInfo {
                title: string_field(obj, "title"),
                channel: number_field(obj, "channel", 1).saturating_sub(1) as u16,
                program_title: string_field(obj, "programTitle"),
                bank_msb: byte(0),
                bank_lsb: byte(1),
                program: byte(2),
                cluster_channel_start: number_field(obj, "clusterChannelStart", 1).saturating_sub(1)
                    as u16,
                cluster_length: number_field(obj, "clusterLength", 1) as u16,
                is_omni_on: (midi_mode.wrapping_sub(1)) & 1 != 0,
                is_poly_mode: (midi_mode.wrapping_sub(1)) & 2 != 0,
                cluster_type: string_field(obj, "clusterType"),
            }
        })
        .collect();
    ChannelList { channels }
}

/// `ResourceList` body over a catalog of metadata entries.
pub fn resource_list_to_json(entries: &[PropertyMetadata]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect(),
    )
}

/// Parse a `ResourceList` body into catalog entries.
pub fn parse_resource_list(data: &[u8]) -> Result<Vec<PropertyMetadata>, FoundationalError> {
    let json: Value =
        serde_json::from_slice(data).map_err(|_| FoundationalError::NotAnArray("resource list"))?;
    let items = json
        .as_array()
        .ok_or(FoundationalError::NotAnArray("resource list"))?;
    Ok(items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| {
            let mut meta: PropertyMetadata =
                serde_json::from_value(item.clone()).unwrap_or_default();
            meta.originator = if resource::is_builtin(&meta.resource) {
                Originator::System
            } else {
                Originator::User
            };
            meta
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn device_info_roundtrip() {
        let info = DeviceInfo {
            manufacturer_id: 0x12_3456,
            family_id: 0x1234,
            model_id: 0x0042,
            version_id: 0x0102_0304,
            manufacturer: "ACME".into(),
            family: "Synth".into(),
            model: "One".into(),
            version: "1.0".into(),
            serial_number: "SN-1".into(),
        };
        let body = serde_json::to_vec(&device_info_to_json(&info)).unwrap();
        assert_eq!(parse_device_info(&body).unwrap(), info);
    }

    #[test]
    fn device_info_ids_serialize_as_byte_arrays() {
        let info = DeviceInfo {
            manufacturer_id: 0x010203,
            ..Default::default()
        };
        let json = device_info_to_json(&info);
        assert_eq!(json["manufacturerId"], json!([1, 2, 3]));
    }

    #[test]
    fn empty_channel_list_is_null() {
        assert_eq!(channel_list_to_json(&ChannelList::default()), Value::Null);
    }

    #[test]
    fn channel_list_roundtrip() {
        let list = ChannelList {
            channels: vec![ChannelInfo {
                title: "Lead".into(),
                channel: 2,
                program_title: "Saw".into(),
                bank_msb: 1,
                bank_lsb: 2,
                program: 3,
                cluster_channel_start: 0,
                cluster_length: 1,
                is_omni_on: false,
                is_poly_mode: true,
                cluster_type: String::new(),
            }],
        };
        let body = serde_json::to_vec(&channel_list_to_json(&list)).unwrap();
        assert_eq!(parse_channel_list(&body), list);
    }

    #[test]
    fn resource_list_roundtrip_keeps_order_and_flags() {
        let entries = vec![
            PropertyMetadata::new(resource::DEVICE_INFO),
            {
                let mut m = PropertyMetadata::new("X-Temperature");
                m.can_subscribe = true;
                m.can_set = crate::properties::SetAccess::Full;
                m
            },
        ];
        let body = serde_json::to_vec(&resource_list_to_json(&entries)).unwrap();
        let parsed = parse_resource_list(&body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].resource, "DeviceInfo");
        assert_eq!(parsed[0].originator, Originator::System);
        assert_eq!(parsed[1].resource, "X-Temperature");
        assert_eq!(parsed[1].originator, Originator::User);
        assert!(parsed[1].can_subscribe);
    }

    #[test]
    fn resource_list_rejects_non_arrays() {
        assert!(parse_resource_list(b"{}").is_err());
    }
}

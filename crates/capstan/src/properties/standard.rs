//! Standard typed properties: `StateList`, `State`, `AllCtrlList`,
//! `ChCtrlList`, `CtrlMapList` and `ProgramList`.
//!
//! Pure parse/serialize helpers over their fixed JSON schemas, the metadata
//! each one advertises, and typed accessors that route through the generic
//! property facades.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceError, MidiCIDevice};
use crate::properties::{PropertyColumn, PropertyMetadata, PropertyValue, SetAccess};

/// Resource names of the standard properties.
pub mod name {
    pub const STATE_LIST: &str = "StateList";
    pub const STATE: &str = "State";
    pub const ALL_CTRL_LIST: &str = "AllCtrlList";
    pub const CH_CTRL_LIST: &str = "ChCtrlList";
    pub const CTRL_MAP_LIST: &str = "CtrlMapList";
    pub const PROGRAM_LIST: &str = "ProgramList";
}

/// One saved-state descriptor in `StateList`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateEntry {
    pub title: String,
    pub state_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_rev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

/// One controller descriptor in `AllCtrlList` / `ChCtrlList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlInfo {
    pub title: String,
    pub ctrl_type: String,
    pub description: String,
    pub ctrl_index: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(rename = "default")]
    pub default_value: u32,
    pub transmit: String,
    pub recognize: String,
    pub num_sig_bits: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctrl_map_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_count: Option<i32>,
    pub min_max: Vec<u64>,
    #[serde(rename = "defaultCCMap")]
    pub default_cc_map: bool,
}

impl Default for ControlInfo {
    fn default() -> Self {
        Self {
            title: String::new(),
            ctrl_type: String::new(),
            description: String::new(),
            ctrl_index: vec![0],
            channel: None,
            priority: None,
            default_value: 0,
            transmit: transmit::ABSOLUTE.to_string(),
            recognize: transmit::ABSOLUTE.to_string(),
            num_sig_bits: 32,
            param_path: None,
            type_hint: None,
            ctrl_map_id: None,
            step_count: None,
            min_max: vec![0, u32::MAX as u64],
            default_cc_map: false,
        }
    }
}

/// `ctrlType` values.
pub mod ctrl_type {
    pub const CC: &str = "cc";
    pub const CH_PRESS: &str = "chPress";
    pub const P_PRESS: &str = "pPress";
    pub const NRPN: &str = "nrpn";
    pub const RPN: &str = "rpn";
    pub const P_BEND: &str = "pBend";
    pub const PNRC: &str = "pnrc";
    pub const PNAC: &str = "pnac";
    pub const PNP: &str = "pnp";
}

/// `transmit` / `recognize` values.
pub mod transmit {
    pub const ABSOLUTE: &str = "absolute";
    pub const RELATIVE: &str = "relative";
    pub const BOTH: &str = "both";
    pub const NONE: &str = "none";
}

/// One value/title pair in `CtrlMapList`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlMapEntry {
    pub value: u32,
    pub title: String,
}

/// One program descriptor in `ProgramList`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgramInfo {
    pub title: String,
    #[serde(rename = "bankPC")]
    pub bank_pc: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

// === Parse / serialize helpers ===
//
// Parsers are permissive: anything that is not a well-formed list yields an
// empty one.

pub fn parse_state_list(data: &[u8]) -> Vec<StateEntry> {
    serde_json::from_slice(data).unwrap_or_default()
}

pub fn parse_control_list(data: &[u8]) -> Vec<ControlInfo> {
    serde_json::from_slice(data).unwrap_or_default()
}

pub fn parse_control_map_list(data: &[u8]) -> Vec<ControlMapEntry> {
    serde_json::from_slice(data).unwrap_or_default()
}

pub fn parse_program_list(data: &[u8]) -> Vec<ProgramInfo> {
    serde_json::from_slice(data).unwrap_or_default()
}

pub fn state_list_to_json(list: &[StateEntry]) -> Vec<u8> {
    serde_json::to_vec(list).unwrap_or_default()
}

pub fn control_list_to_json(list: &[ControlInfo]) -> Vec<u8> {
    serde_json::to_vec(list).unwrap_or_default()
}

pub fn control_map_list_to_json(list: &[ControlMapEntry]) -> Vec<u8> {
    serde_json::to_vec(list).unwrap_or_default()
}

pub fn program_list_to_json(list: &[ProgramInfo]) -> Vec<u8> {
    serde_json::to_vec(list).unwrap_or_default()
}

// === Advertised metadata ===

fn ctrl_list_columns() -> Vec<PropertyColumn> {
    let column = |property: &str, title: &str| PropertyColumn {
        property: property.to_string(),
        link: String::new(),
        title: title.to_string(),
    };
    vec![
        column("title", "Active Controller Title"),
        column("description", "Description"),
        column("ctrlType", "Type"),
        column("ctrlIndex", "Controller Message index"),
        column("channel", "MIDI Channel"),
        column("priority", "Priority"),
        column("default", "Default Value"),
        column("transmit", "Transmit"),
        column("recognize", "Recognize"),
        column("numSigBits", "Number of significant bits"),
        column("typeHint", "Type Hint"),
        column("ctrlMapId", "Control Map Id"),
        column("stepCount", "Step Count"),
        column("minMax", "Min/Max"),
    ]
}

pub fn state_list_metadata() -> PropertyMetadata {
    let column = |property: &str, title: &str| PropertyColumn {
        property: property.to_string(),
        link: String::new(),
        title: title.to_string(),
    };
    PropertyMetadata {
        resource: name::STATE_LIST.to_string(),
        can_set: SetAccess::None,
        can_subscribe: false,
        can_paginate: false,
        columns: vec![
            column("title", "State Title"),
            column("stateId", "State ID"),
            column("stateRev", "State Revision"),
            column("timestamp", "UNIX Timestamp"),
            column("description", "Description"),
            column("size", "Byte Size"),
        ],
        ..PropertyMetadata::default()
    }
}

pub fn state_metadata() -> PropertyMetadata {
    PropertyMetadata {
        resource: name::STATE.to_string(),
        can_subscribe: false,
        require_res_id: true,
        ..PropertyMetadata::default()
    }
}

pub fn all_ctrl_list_metadata() -> PropertyMetadata {
    PropertyMetadata {
        resource: name::ALL_CTRL_LIST.to_string(),
        columns: ctrl_list_columns(),
        ..PropertyMetadata::default()
    }
}

pub fn ch_ctrl_list_metadata() -> PropertyMetadata {
    PropertyMetadata {
        resource: name::CH_CTRL_LIST.to_string(),
        columns: ctrl_list_columns(),
        ..PropertyMetadata::default()
    }
}

pub fn ctrl_map_list_metadata() -> PropertyMetadata {
    let column = |property: &str, title: &str| PropertyColumn {
        property: property.to_string(),
        link: String::new(),
        title: title.to_string(),
    };
    PropertyMetadata {
        resource: name::CTRL_MAP_LIST.to_string(),
        require_res_id: true,
        columns: vec![column("value", "Value"), column("title", "Title")],
        ..PropertyMetadata::default()
    }
}

pub fn program_list_metadata() -> PropertyMetadata {
    let column = |property: &str, title: &str| PropertyColumn {
        property: property.to_string(),
        link: String::new(),
        title: title.to_string(),
    };
    PropertyMetadata {
        resource: name::PROGRAM_LIST.to_string(),
        columns: vec![
            column("title", "Program Title"),
            column("bankPC", "Bank MSB, LSB and Program Change"),
            column("category", "Categories"),
            column("tags", "Meta-tags"),
        ],
        ..PropertyMetadata::default()
    }
}

// === Typed getters over any observable value list ===

fn find<'a>(values: &'a [PropertyValue], id: &str, res_id: &str) -> Option<&'a PropertyValue> {
    values
        .iter()
        .find(|v| v.id == id && (res_id.is_empty() || v.res_id == res_id))
}

pub fn state_list_from(values: &[PropertyValue]) -> Option<Vec<StateEntry>> {
    find(values, name::STATE_LIST, "").map(|v| parse_state_list(&v.body))
}

pub fn all_ctrl_list_from(values: &[PropertyValue]) -> Option<Vec<ControlInfo>> {
    find(values, name::ALL_CTRL_LIST, "").map(|v| parse_control_list(&v.body))
}

pub fn ch_ctrl_list_from(values: &[PropertyValue]) -> Option<Vec<ControlInfo>> {
    find(values, name::CH_CTRL_LIST, "").map(|v| parse_control_list(&v.body))
}

pub fn ctrl_map_list_from(values: &[PropertyValue], control: &str) -> Option<Vec<ControlMapEntry>> {
    find(values, name::CTRL_MAP_LIST, control).map(|v| parse_control_map_list(&v.body))
}

pub fn program_list_from(values: &[PropertyValue]) -> Option<Vec<ProgramInfo>> {
    find(values, name::PROGRAM_LIST, "").map(|v| parse_program_list(&v.body))
}

pub fn state_from(values: &[PropertyValue], state_id: &str) -> Option<Bytes> {
    values
        .iter()
        .find(|v| v.id == name::STATE && v.res_id == state_id)
        .map(|v| v.body.clone())
}

// === Device accessors (host side) ===

impl MidiCIDevice {
    pub fn state_list(&self) -> Option<Vec<StateEntry>> {
        state_list_from(self.property_host().values())
    }

    pub fn set_state_list(&mut self, list: &[StateEntry]) -> Result<(), DeviceError> {
        self.set_property_value(name::STATE_LIST, "", Bytes::from(state_list_to_json(list)), false)
    }

    pub fn all_ctrl_list(&self) -> Option<Vec<ControlInfo>> {
        all_ctrl_list_from(self.property_host().values())
    }

    pub fn set_all_ctrl_list(&mut self, list: &[ControlInfo]) -> Result<(), DeviceError> {
        self.set_property_value(
            name::ALL_CTRL_LIST,
            "",
            Bytes::from(control_list_to_json(list)),
            false,
        )
    }

    pub fn ch_ctrl_list(&self) -> Option<Vec<ControlInfo>> {
        ch_ctrl_list_from(self.property_host().values())
    }

    pub fn set_ch_ctrl_list(&mut self, list: &[ControlInfo]) -> Result<(), DeviceError> {
        self.set_property_value(
            name::CH_CTRL_LIST,
            "",
            Bytes::from(control_list_to_json(list)),
            false,
        )
    }

    /// Control map for one control, addressed by res id.
    pub fn ctrl_map_list(&self, control: &str) -> Option<Vec<ControlMapEntry>> {
        ctrl_map_list_from(self.property_host().values(), control)
    }

    pub fn set_ctrl_map_list(
        &mut self,
        control: &str,
        list: &[ControlMapEntry],
    ) -> Result<(), DeviceError> {
        self.set_property_value(
            name::CTRL_MAP_LIST,
            control,
            Bytes::from(control_map_list_to_json(list)),
            false,
        )
    }

    pub fn program_list(&self) -> Option<Vec<ProgramInfo>> {
        program_list_from(self.property_host().values())
    }

    pub fn set_program_list(&mut self, list: &[ProgramInfo]) -> Result<(), DeviceError> {
        self.set_property_value(
            name::PROGRAM_LIST,
            "",
            Bytes::from(program_list_to_json(list)),
            false,
        )
    }

    pub fn state(&self, state_id: &str) -> Option<Bytes> {
        state_from(self.property_host().values(), state_id)
    }

    pub fn set_state(&mut self, state_id: &str, data: Bytes) -> Result<(), DeviceError> {
        self.set_property_value(name::STATE, state_id, data, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_list_roundtrip() {
        let list = vec![
            StateEntry {
                title: "Init".into(),
                state_id: "init".into(),
                state_rev: Some("3".into()),
                timestamp: Some(1_700_000_000),
                description: None,
                size: Some(128),
            },
            StateEntry {
                title: "Live".into(),
                state_id: "live".into(),
                ..Default::default()
            },
        ];
        assert_eq!(parse_state_list(&state_list_to_json(&list)), list);
    }

    #[test]
    fn control_list_roundtrip() {
        let list = vec![
            ControlInfo {
                title: "Cutoff".into(),
                ctrl_type: ctrl_type::CC.into(),
                ctrl_index: vec![74],
                channel: Some(1),
                default_value: 64,
                num_sig_bits: 7,
                min_max: vec![0, 127],
                ..Default::default()
            },
            ControlInfo {
                title: "Pitch".into(),
                ctrl_type: ctrl_type::P_BEND.into(),
                transmit: transmit::BOTH.into(),
                ctrl_map_id: Some("pitchMap".into()),
                ..Default::default()
            },
        ];
        assert_eq!(parse_control_list(&control_list_to_json(&list)), list);
    }

    #[test]
    fn control_list_serializes_spec_field_names() {
        let list = vec![ControlInfo {
            title: "X".into(),
            default_value: 5,
            ..Default::default()
        }];
        let text = String::from_utf8(control_list_to_json(&list)).unwrap();
        assert!(text.contains("\"default\":5"));
        assert!(text.contains("\"defaultCCMap\":false"));
        assert!(text.contains("\"numSigBits\":32"));
    }

    #[test]
    fn control_map_list_roundtrip() {
        let list = vec![
            ControlMapEntry { value: 0, title: "Off".into() },
            ControlMapEntry { value: 127, title: "Max".into() },
            ControlMapEntry { value: 64, title: "Center".into() },
        ];
        assert_eq!(parse_control_map_list(&control_map_list_to_json(&list)), list);
    }

    #[test]
    fn program_list_roundtrip() {
        let list = vec![ProgramInfo {
            title: "Grand Piano".into(),
            bank_pc: vec![0, 0, 1],
            category: Some(vec!["Keys".into()]),
            tags: None,
        }];
        let text = String::from_utf8(program_list_to_json(&list)).unwrap();
        assert!(text.contains("\"bankPC\":[0,0,1]"));
        assert_eq!(parse_program_list(&program_list_to_json(&list)), list);
    }

    #[test]
    fn malformed_lists_parse_to_empty() {
        assert_eq!(parse_state_list(b"{}"), vec![]);
        assert_eq!(parse_control_list(b"garbage"), vec![]);
        assert_eq!(parse_program_list(b"null"), vec![]);
    }

    #[test]
    fn metadata_flags() {
        assert!(state_metadata().require_res_id);
        assert!(ctrl_map_list_metadata().require_res_id);
        assert!(!state_list_metadata().can_subscribe);
        assert_eq!(all_ctrl_list_metadata().columns.len(), 14);
    }
}

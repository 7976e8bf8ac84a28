//! The Common Rules for Property Exchange: JSON header vocabulary, status
//! codes and body encodings.
//!
//! Every property message carries a UTF-8 JSON object header with a fixed
//! key set (`resource`, `resId`, `mutualEncoding`, `status`, `subscribeId`,
//! `command`, …). Bodies travel under one of three encodings: `ASCII`
//! (identity), `Mcoded7` or `zlib+Mcoded7`.

use bytes::Bytes;
use capwire::mcoded7;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Default media type for property bodies.
pub const MEDIA_TYPE_JSON: &str = "application/json";

/// Property Exchange status codes carried in reply headers.
pub mod status {
    pub const OK: i64 = 200;
    pub const ACCEPTED: i64 = 202;
    pub const RESOURCE_UNAVAILABLE_OR_ERROR: i64 = 341;
    pub const BAD_DATA: i64 = 342;
    pub const TOO_MANY_REQUESTS: i64 = 343;
    pub const BAD_REQUEST: i64 = 400;
    pub const REPLY_NOT_AVAILABLE: i64 = 403;
    pub const RESOURCE_NOT_FOUND: i64 = 404;
    pub const RESOURCE_NOT_ALLOWED: i64 = 405;
    pub const PAYLOAD_TOO_LARGE: i64 = 413;
    pub const UNSUPPORTED_MEDIA_TYPE: i64 = 415;
    pub const INVALID_DATA_VERSION: i64 = 445;
    pub const INTERNAL_ERROR: i64 = 500;
}

/// Values of the subscription `command` header field.
pub mod command {
    pub const START: &str = "start";
    pub const FULL: &str = "full";
    pub const PARTIAL: &str = "partial";
    pub const NOTIFY: &str = "notify";
    pub const END: &str = "end";
}

/// NAK status codes (CI-level, not Property Exchange).
pub mod nak_status {
    pub const NAK: u8 = 0x00;
    pub const MALFORMED_MESSAGE: u8 = 0x41;
}

/// Body encoding negotiated via `mutualEncoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Ascii,
    Mcoded7,
    ZlibMcoded7,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Ascii => "ASCII",
            Encoding::Mcoded7 => "Mcoded7",
            Encoding::ZlibMcoded7 => "zlib+Mcoded7",
        }
    }

    pub fn from_name(name: &str) -> Option<Encoding> {
        match name {
            "" | "ASCII" => Some(Encoding::Ascii),
            "Mcoded7" => Some(Encoding::Mcoded7),
            "zlib+Mcoded7" => Some(Encoding::ZlibMcoded7),
            _ => None,
        }
    }
}

/// Request-side header. Also used for subscription traffic, which adds the
/// `command` / `subscribeId` keys to the same vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestHeader {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub res_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutual_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_partial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_id: Option<String>,
}

impl RequestHeader {
    pub fn for_resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }

    /// Parse permissively: anything that is not a JSON object with known
    /// keys yields defaults for the unknown parts.
    pub fn from_bytes(header: &[u8]) -> Self {
        serde_json::from_slice(header).unwrap_or_default()
    }

    pub fn to_bytes(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!("failed to serialize request header: {e}");
                Bytes::new()
            }
        }
    }

    pub fn res_id_str(&self) -> &str {
        self.res_id.as_deref().unwrap_or("")
    }

    /// Negotiated encoding; an unrecognized name falls back to ASCII with a
    /// warning, matching the tolerant wire behavior.
    pub fn encoding(&self) -> Encoding {
        let name = self.mutual_encoding.as_deref().unwrap_or("");
        Encoding::from_name(name).unwrap_or_else(|| {
            warn!("unrecognized mutualEncoding {name:?}, treating as ASCII");
            Encoding::Ascii
        })
    }

    pub fn media_type_str(&self) -> &str {
        self.media_type.as_deref().unwrap_or(MEDIA_TYPE_JSON)
    }
}

/// Reply-side header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplyHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutual_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl ReplyHeader {
    pub fn with_status(status: i64) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn error(status: i64, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn from_bytes(header: &[u8]) -> Self {
        serde_json::from_slice(header).unwrap_or_default()
    }

    pub fn to_bytes(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!("failed to serialize reply header: {e}");
                Bytes::new()
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Some(status::OK)
    }
}

/// Parse JSON, mapping every failure to `null`.
pub fn parse_or_null(data: &[u8]) -> Value {
    serde_json::from_slice(data).unwrap_or(Value::Null)
}

/// Encode a body under the given encoding.
pub fn encode_body(data: &[u8], encoding: Encoding) -> Result<Vec<u8>, capwire::WireError> {
    match encoding {
        Encoding::Ascii => Ok(data.to_vec()),
        Encoding::Mcoded7 => Ok(mcoded7::encode(data)),
        Encoding::ZlibMcoded7 => mcoded7::encode_zlib(data),
    }
}

/// Decode a body according to the `mutualEncoding` named in `header`.
/// Unknown encodings and decode failures pass the body through untouched.
pub fn decode_body(header: &[u8], body: &[u8]) -> Vec<u8> {
    let name = ReplyHeader::from_bytes(header)
        .mutual_encoding
        .unwrap_or_default();
    match Encoding::from_name(&name) {
        Some(Encoding::Ascii) => body.to_vec(),
        Some(Encoding::Mcoded7) => mcoded7::decode(body),
        Some(Encoding::ZlibMcoded7) => match mcoded7::decode_zlib(body) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("zlib+Mcoded7 body failed to decode: {e}");
                body.to_vec()
            }
        },
        None => {
            warn!("unrecognized mutualEncoding {name:?} on incoming body");
            body.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_header_roundtrip() {
        let header = RequestHeader {
            resource: "ResourceList".into(),
            offset: Some(4),
            limit: Some(10),
            set_partial: Some(false),
            ..Default::default()
        };
        let bytes = header.to_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"resource\":\"ResourceList\""));
        assert!(text.contains("\"setPartial\":false"));
        assert!(!text.contains("resId"));
        assert_eq!(RequestHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn malformed_header_parses_to_defaults() {
        let header = RequestHeader::from_bytes(b"not json at all");
        assert_eq!(header, RequestHeader::default());
        assert_eq!(parse_or_null(b"{broken"), Value::Null);
    }

    #[test]
    fn reply_header_camel_case_keys() {
        let header = ReplyHeader {
            status: Some(status::OK),
            subscribe_id: Some("12345678".into()),
            total_count: Some(3),
            ..Default::default()
        };
        let text = String::from_utf8(header.to_bytes().to_vec()).unwrap();
        assert!(text.contains("\"subscribeId\":\"12345678\""));
        assert!(text.contains("\"totalCount\":3"));
        assert!(header.is_ok());
    }

    #[test]
    fn encoding_names() {
        assert_eq!(Encoding::from_name(""), Some(Encoding::Ascii));
        assert_eq!(Encoding::from_name("Mcoded7"), Some(Encoding::Mcoded7));
        assert_eq!(Encoding::from_name("zlib+Mcoded7"), Some(Encoding::ZlibMcoded7));
        assert_eq!(Encoding::from_name("base64"), None);
    }

    #[test]
    fn body_roundtrip_under_each_encoding() {
        let data: Vec<u8> = (0u8..=255).collect();
        for encoding in [Encoding::Ascii, Encoding::Mcoded7, Encoding::ZlibMcoded7] {
            let encoded = encode_body(&data, encoding).unwrap();
            let header = ReplyHeader {
                mutual_encoding: Some(encoding.as_str().to_string()),
                ..Default::default()
            }
            .to_bytes();
            assert_eq!(decode_body(&header, &encoded), data, "{encoding:?}");
        }
    }

    #[test]
    fn ascii_body_passes_through_without_header_field() {
        assert_eq!(decode_body(b"{}", b"plain"), b"plain");
    }
}

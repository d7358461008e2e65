// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node identifiers.
//!
//! A [`NodeId`] is a namespace index plus one of four identifier kinds. The
//! binary form always picks the most compact encoding that can hold the value;
//! the text form is the canonical `ns=<n>;i|s|g|b=<id>` string.
//!
//! # Examples
//!
//! ```
//! use strand_opcua::codec::NodeId;
//!
//! let node = NodeId::numeric(2, 1001);
//! assert_eq!(node.to_string(), "ns=2;i=1001");
//!
//! let parsed: NodeId = "ns=2;s=Line1.Temperature".parse().unwrap();
//! assert_eq!(parsed.as_string(), Some("Line1.Temperature"));
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::binary::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use super::extension::TypeRegistry;
use super::json::{expect_str, JsonEncodable};
use crate::error::{CodecError, CodecResult, ConfigurationError, OpcUaError};

const ENCODING_TWO_BYTE: u8 = 0x00;
const ENCODING_FOUR_BYTE: u8 = 0x01;
const ENCODING_NUMERIC: u8 = 0x02;
const ENCODING_STRING: u8 = 0x03;
const ENCODING_GUID: u8 = 0x04;
const ENCODING_BYTE_STRING: u8 = 0x05;
const ENCODING_MASK: u8 = 0x3F;
const FLAG_NAMESPACE_URI: u8 = 0x80;
const FLAG_SERVER_INDEX: u8 = 0x40;

// =============================================================================
// NodeId
// =============================================================================

/// Node identifier: namespace index plus identifier value.
///
/// Equality compares namespace, identifier kind and value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    /// Namespace index (0 = standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node ID.
    #[inline]
    pub const fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub const fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque (byte string) node ID.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// Returns the null node ID (ns=0, i=0).
    #[inline]
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// Objects folder (i=85).
    pub const OBJECTS_FOLDER: NodeId = NodeId::numeric(0, 85);

    /// Server node (i=2253).
    pub const SERVER: NodeId = NodeId::numeric(0, 2253);

    /// Server status current time (i=2258).
    pub const SERVER_CURRENT_TIME: NodeId = NodeId::numeric(0, 2258);

    /// Server status state (i=2259), read by the session keep-alive.
    pub const SERVER_STATE: NodeId = NodeId::numeric(0, 2259);

    /// HierarchicalReferences reference type (i=33).
    pub const HIERARCHICAL_REFERENCES: NodeId = NodeId::numeric(0, 33);

    /// Returns `true` if this is the null node ID.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the numeric value if this is a numeric identifier.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value if this is a string identifier.
    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match &self.identifier {
            NodeIdentifier::String(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical text form. Namespace 0 is omitted.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }

    fn encode_with_flags(&self, encoder: &mut BinaryEncoder, flags: u8) -> CodecResult<()> {
        let ns = self.namespace_index;
        match &self.identifier {
            NodeIdentifier::Numeric(id) if ns == 0 && *id <= 0xFF => {
                encoder.write_u8(ENCODING_TWO_BYTE | flags);
                encoder.write_u8(*id as u8);
            }
            NodeIdentifier::Numeric(id) if ns <= 0xFF && *id <= 0xFFFF => {
                encoder.write_u8(ENCODING_FOUR_BYTE | flags);
                encoder.write_u8(ns as u8);
                encoder.write_u16(*id as u16);
            }
            NodeIdentifier::Numeric(id) => {
                encoder.write_u8(ENCODING_NUMERIC | flags);
                encoder.write_u16(ns);
                encoder.write_u32(*id);
            }
            NodeIdentifier::String(s) => {
                encoder.write_u8(ENCODING_STRING | flags);
                encoder.write_u16(ns);
                encoder.write_string(s)?;
            }
            NodeIdentifier::Guid(g) => {
                encoder.write_u8(ENCODING_GUID | flags);
                encoder.write_u16(ns);
                g.encode(encoder)?;
            }
            NodeIdentifier::Opaque(b) => {
                encoder.write_u8(ENCODING_BYTE_STRING | flags);
                encoder.write_u16(ns);
                encoder.write_byte_string(b)?;
            }
        }
        Ok(())
    }

    /// Decodes the node id part and returns it with the flag bits.
    fn decode_with_flags(decoder: &mut BinaryDecoder<'_>) -> CodecResult<(Self, u8)> {
        let offset = decoder.position();
        let tag = decoder.read_u8()?;
        let flags = tag & !ENCODING_MASK;
        let node = match tag & ENCODING_MASK {
            ENCODING_TWO_BYTE => Self::numeric(0, u32::from(decoder.read_u8()?)),
            ENCODING_FOUR_BYTE => {
                let ns = u16::from(decoder.read_u8()?);
                Self::numeric(ns, u32::from(decoder.read_u16()?))
            }
            ENCODING_NUMERIC => {
                let ns = decoder.read_u16()?;
                Self::numeric(ns, decoder.read_u32()?)
            }
            ENCODING_STRING => {
                let ns = decoder.read_u16()?;
                Self::string(ns, decoder.read_string()?.unwrap_or_default())
            }
            ENCODING_GUID => {
                let ns = decoder.read_u16()?;
                Self::guid(ns, Uuid::decode(decoder)?)
            }
            ENCODING_BYTE_STRING => {
                let ns = decoder.read_u16()?;
                let bytes = decoder.read_byte_string()?.unwrap_or_default();
                Self::opaque(ns, bytes.to_vec())
            }
            other => {
                return Err(CodecError::UnknownTag {
                    offset,
                    what: "node id encoding",
                    tag: other,
                })
            }
        };
        Ok((node, flags))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_opc_string())
    }
}

impl From<NodeId> for String {
    fn from(node: NodeId) -> Self {
        node.to_opc_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = OpcUaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    /// Parses a NodeId from its text form.
    ///
    /// Supported formats:
    /// - `ns=2;i=1001` (numeric)
    /// - `ns=2;s=MyNode` (string)
    /// - `ns=2;g=550e8400-e29b-41d4-a716-446655440000` (GUID)
    /// - `ns=2;b=SGVsbG8=` (opaque, base64 encoded)
    /// - `i=2259` (namespace 0)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |message: String| {
            OpcUaError::configuration(ConfigurationError::invalid_node_id(s, message))
        };

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("Missing identifier after namespace".to_string()))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| invalid("Invalid namespace index".to_string()))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = identifier_part
            .parse::<NodeIdentifier>()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

impl BinaryEncodable for NodeId {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        self.encode_with_flags(encoder, 0)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        let offset = decoder.position();
        let (node, flags) = Self::decode_with_flags(decoder)?;
        if flags != 0 {
            return Err(CodecError::Invalid {
                offset,
                what: "node id",
                message: format!("unexpected expanded flags {:#04x}", flags),
            });
        }
        Ok(node)
    }
}

impl JsonEncodable for NodeId {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::String(self.to_opc_string()))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        expect_str(value, "NodeId")?
            .parse()
            .map_err(|e: OpcUaError| CodecError::json(e.to_string()))
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// The four identifier kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),

    /// GUID identifier.
    Guid(Uuid),

    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl NodeIdentifier {
    /// Returns the identifier type prefix of the text form.
    pub const fn type_prefix(&self) -> char {
        match self {
            Self::Numeric(_) => 'i',
            Self::String(_) => 's',
            Self::Guid(_) => 'g',
            Self::Opaque(_) => 'b',
        }
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

impl FromStr for NodeIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("i=") {
            id.parse()
                .map(Self::Numeric)
                .map_err(|_| "Invalid numeric identifier".to_string())
        } else if let Some(id) = s.strip_prefix("s=") {
            Ok(Self::String(id.to_string()))
        } else if let Some(id) = s.strip_prefix("g=") {
            Uuid::parse_str(id)
                .map(Self::Guid)
                .map_err(|e| format!("Invalid GUID: {}", e))
        } else if let Some(id) = s.strip_prefix("b=") {
            BASE64
                .decode(id)
                .map(Self::Opaque)
                .map_err(|e| format!("Invalid base64: {}", e))
        } else {
            Err("Unknown identifier type. Expected i=, s=, g=, or b=".to_string())
        }
    }
}

// =============================================================================
// Guid
// =============================================================================

/// GUIDs use the mixed-endian layout: the first three fields little-endian,
/// the last eight bytes as-is.
impl BinaryEncodable for Uuid {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_raw(&self.to_bytes_le());
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(decoder.take(16)?);
        Ok(Uuid::from_bytes_le(bytes))
    }
}

impl JsonEncodable for Uuid {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::String(self.to_string()))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        let text = expect_str(value, "Guid")?;
        Uuid::parse_str(text).map_err(|e| CodecError::json(format!("invalid Guid '{}': {}", text, e)))
    }
}

// =============================================================================
// ExpandedNodeId
// =============================================================================

/// Node id with optional namespace URI and server index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExpandedNodeId {
    /// The local node id. Its namespace index is ignored when a URI is set.
    pub node_id: NodeId,

    /// Namespace URI replacing the index.
    pub namespace_uri: Option<String>,

    /// Index of the server that owns the node (0 = local server).
    pub server_index: u32,
}

impl ExpandedNodeId {
    /// Wraps a local node id.
    pub fn local(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: None,
            server_index: 0,
        }
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self::local(node_id)
    }
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        match &self.namespace_uri {
            Some(uri) => write!(f, "nsu={};{}", uri, self.node_id.identifier),
            None => write!(f, "{}", self.node_id),
        }
    }
}

impl FromStr for ExpandedNodeId {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |message: &str| {
            OpcUaError::configuration(ConfigurationError::invalid_node_id(s, message))
        };

        let mut rest = s;
        let mut server_index = 0;
        if let Some(after) = rest.strip_prefix("svr=") {
            let (index, tail) = after
                .split_once(';')
                .ok_or_else(|| invalid("Missing node id after server index"))?;
            server_index = index
                .parse()
                .map_err(|_| invalid("Invalid server index"))?;
            rest = tail;
        }

        if let Some(after) = rest.strip_prefix("nsu=") {
            // Namespace URIs may contain ';', so split at the last identifier prefix.
            let split = [";i=", ";s=", ";g=", ";b="]
                .iter()
                .filter_map(|p| after.find(p))
                .min()
                .ok_or_else(|| invalid("Missing identifier after namespace URI"))?;
            let identifier = after[split + 1..]
                .parse::<NodeIdentifier>()
                .map_err(|e| invalid(&e))?;
            return Ok(Self {
                node_id: NodeId {
                    namespace_index: 0,
                    identifier,
                },
                namespace_uri: Some(after[..split].to_string()),
                server_index,
            });
        }

        Ok(Self {
            node_id: rest.parse()?,
            namespace_uri: None,
            server_index,
        })
    }
}

impl BinaryEncodable for ExpandedNodeId {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        let mut flags = 0;
        if self.namespace_uri.is_some() {
            flags |= FLAG_NAMESPACE_URI;
        }
        if self.server_index != 0 {
            flags |= FLAG_SERVER_INDEX;
        }
        self.node_id.encode_with_flags(encoder, flags)?;
        if let Some(uri) = &self.namespace_uri {
            encoder.write_string(uri)?;
        }
        if self.server_index != 0 {
            encoder.write_u32(self.server_index);
        }
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        let (node_id, flags) = NodeId::decode_with_flags(decoder)?;
        let namespace_uri = if flags & FLAG_NAMESPACE_URI != 0 {
            Some(decoder.read_string()?.unwrap_or_default())
        } else {
            None
        };
        let server_index = if flags & FLAG_SERVER_INDEX != 0 {
            decoder.read_u32()?
        } else {
            0
        };
        Ok(Self {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

impl JsonEncodable for ExpandedNodeId {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::String(self.to_string()))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        expect_str(value, "ExpandedNodeId")?
            .parse()
            .map_err(|e: OpcUaError| CodecError::json(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodingLimits;

    fn encode<T: BinaryEncodable>(value: &T) -> Vec<u8> {
        let mut encoder = BinaryEncoder::new();
        value.encode(&mut encoder).unwrap();
        encoder.as_slice().to_vec()
    }

    fn decode<T: BinaryEncodable>(bytes: &[u8]) -> CodecResult<T> {
        let registry = TypeRegistry::new();
        let mut decoder = BinaryDecoder::new(bytes, &registry, DecodingLimits::default());
        T::decode(&mut decoder)
    }

    #[test]
    fn test_compact_numeric_encodings() {
        assert_eq!(encode(&NodeId::numeric(0, 85)), vec![0x00, 85]);
        assert_eq!(encode(&NodeId::numeric(2, 1001)), vec![0x01, 2, 0xE9, 0x03]);
        assert_eq!(
            encode(&NodeId::numeric(300, 1)),
            vec![0x02, 0x2C, 0x01, 0x01, 0x00, 0x00, 0x00]
        );
        assert_eq!(encode(&NodeId::numeric(0, 70_000))[0], 0x02);
    }

    #[test]
    fn test_string_node_id_binary() {
        let node = NodeId::string(1, "ab");
        let bytes = encode(&node);
        assert_eq!(bytes, vec![0x03, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, b'a', b'b']);
        assert_eq!(decode::<NodeId>(&bytes).unwrap(), node);
    }

    #[test]
    fn test_guid_layout() {
        let guid = Uuid::parse_str("72962b91-fa75-4ae6-8d28-b404dc7daf63").unwrap();
        let bytes = encode(&NodeId::guid(0, guid));
        assert_eq!(&bytes[3..7], &[0x91, 0x2B, 0x96, 0x72]);
        assert_eq!(decode::<NodeId>(&bytes).unwrap(), NodeId::guid(0, guid));
    }

    #[test]
    fn test_unknown_encoding_byte() {
        let error = decode::<NodeId>(&[0x09, 0x00]).unwrap_err();
        assert!(matches!(error, CodecError::UnknownTag { offset: 0, tag: 0x09, .. }));
    }

    #[test]
    fn test_parse_and_display() {
        let cases = [
            "i=2259",
            "ns=2;i=1001",
            "ns=3;s=Line1.Temperature",
            "ns=1;g=550e8400-e29b-41d4-a716-446655440000",
            "ns=4;b=SGVsbG8=",
        ];
        for text in cases {
            let node: NodeId = text.parse().unwrap();
            assert_eq!(node.to_string(), text);
        }
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_equality_includes_kind() {
        assert_ne!(NodeId::numeric(1, 5), NodeId::string(1, "5"));
        assert_ne!(NodeId::numeric(1, 5), NodeId::numeric(2, 5));
    }

    #[test]
    fn test_expanded_flags() {
        let expanded = ExpandedNodeId {
            node_id: NodeId::numeric(0, 10),
            namespace_uri: Some("urn:plant".to_string()),
            server_index: 2,
        };
        let bytes = encode(&expanded);
        assert_eq!(bytes[0], 0xC0);
        assert_eq!(decode::<ExpandedNodeId>(&bytes).unwrap(), expanded);
        assert_eq!(expanded.to_string(), "svr=2;nsu=urn:plant;i=10");
        assert_eq!(
            expanded.to_string().parse::<ExpandedNodeId>().unwrap(),
            expanded
        );
    }

    #[test]
    fn test_plain_node_id_rejects_expanded_flags() {
        assert!(decode::<NodeId>(&[0x80, 0x01]).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let node = NodeId::string(2, "Pump.Speed");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, "\"ns=2;s=Pump.Speed\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}

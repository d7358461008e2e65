// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Extension objects and the structure type registry.
//!
//! An extension object wraps a structure identified by its encoding id. Bodies
//! whose type is registered are decoded eagerly; anything else is kept as the
//! raw bytes (or XML, or JSON) it arrived as and re-encodes unchanged.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde_json::Value;

use super::binary::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use super::json::{expect_str, JsonEncodable, JsonFields, JsonObject};
use super::node_id::NodeId;
use crate::error::{CodecError, CodecResult};

const ENCODING_NONE: u8 = 0x00;
const ENCODING_BINARY: u8 = 0x01;
const ENCODING_XML: u8 = 0x02;

// =============================================================================
// Structure traits
// =============================================================================

/// A structure type that can travel inside an extension object.
pub trait EncodeableType:
    BinaryEncodable + JsonEncodable + fmt::Debug + Clone + PartialEq + Send + Sync + 'static
{
    /// Numeric id (namespace 0) of the default binary encoding node.
    const BINARY_ENCODING_ID: u32;

    /// Type name used in logs.
    const TYPE_NAME: &'static str;

    /// Binary encoding id as a node id.
    fn encoding_id() -> NodeId {
        NodeId::numeric(0, Self::BINARY_ENCODING_ID)
    }
}

/// Object-safe view of a decoded structure.
pub trait Structure: fmt::Debug + Send + Sync + 'static {
    /// Type name.
    fn type_name(&self) -> &'static str;

    /// Binary encoding id.
    fn encoding_id(&self) -> NodeId;

    /// Encodes the structure body.
    fn encode_body(&self, encoder: &mut BinaryEncoder) -> CodecResult<()>;

    /// Converts the structure body to JSON.
    fn body_to_json(&self) -> CodecResult<Value>;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality across trait objects.
    fn dyn_eq(&self, other: &dyn Structure) -> bool;
}

impl<T: EncodeableType> Structure for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn encoding_id(&self) -> NodeId {
        T::encoding_id()
    }

    fn encode_body(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        self.encode(encoder)
    }

    fn body_to_json(&self) -> CodecResult<Value> {
        self.to_json()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Structure) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }
}

// =============================================================================
// ExtensionObject
// =============================================================================

/// Body of an extension object.
#[derive(Debug, Clone, Default)]
pub enum ExtensionBody {
    /// No body.
    #[default]
    None,
    /// Undecoded binary body.
    Binary(Bytes),
    /// XML body.
    Xml(String),
    /// JSON body of an unregistered type.
    Json(Value),
    /// Body decoded through the type registry.
    Decoded(Arc<dyn Structure>),
}

impl PartialEq for ExtensionBody {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            (Self::Xml(a), Self::Xml(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Decoded(a), Self::Decoded(b)) => a.dyn_eq(b.as_ref()),
            _ => false,
        }
    }
}

/// Structure value wrapped with its encoding id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionObject {
    /// Encoding id of the body.
    pub type_id: NodeId,
    /// Body.
    pub body: ExtensionBody,
}

impl ExtensionObject {
    /// The null extension object.
    pub fn null() -> Self {
        Self::default()
    }

    /// Returns `true` when there is neither a type nor a body.
    pub fn is_null(&self) -> bool {
        self.type_id.is_null() && matches!(self.body, ExtensionBody::None)
    }

    /// Wraps a typed structure.
    pub fn from_structure<T: EncodeableType>(value: T) -> Self {
        Self {
            type_id: T::encoding_id(),
            body: ExtensionBody::Decoded(Arc::new(value)),
        }
    }

    /// Wraps a raw binary body.
    pub fn from_binary(type_id: NodeId, body: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            body: ExtensionBody::Binary(body.into()),
        }
    }

    /// Returns the decoded structure, if any.
    pub fn structure(&self) -> Option<&dyn Structure> {
        match &self.body {
            ExtensionBody::Decoded(structure) => Some(structure.as_ref()),
            _ => None,
        }
    }

    /// Borrows the body as `T` when it was decoded as that type.
    pub fn decoded<T: EncodeableType>(&self) -> Option<&T> {
        self.structure()?.as_any().downcast_ref::<T>()
    }

    /// Returns the body as `T`, decoding a raw binary body on demand.
    ///
    /// `Ok(None)` means the object carries a different type.
    pub fn decode_as<T: EncodeableType>(
        &self,
        registry: &TypeRegistry,
        limits: super::DecodingLimits,
    ) -> CodecResult<Option<T>> {
        if self.type_id != T::encoding_id() {
            return Ok(None);
        }
        match &self.body {
            ExtensionBody::Decoded(structure) => {
                Ok(structure.as_any().downcast_ref::<T>().cloned())
            }
            ExtensionBody::Binary(bytes) => {
                let mut decoder = BinaryDecoder::new(bytes, registry, limits);
                let value = T::decode(&mut decoder)?;
                decoder.finish()?;
                Ok(Some(value))
            }
            ExtensionBody::Json(value) => T::from_json(value, registry).map(Some),
            ExtensionBody::None | ExtensionBody::Xml(_) => Ok(None),
        }
    }
}

impl BinaryEncodable for ExtensionObject {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        self.type_id.encode(encoder)?;
        match &self.body {
            ExtensionBody::None => encoder.write_u8(ENCODING_NONE),
            ExtensionBody::Binary(bytes) => {
                encoder.write_u8(ENCODING_BINARY);
                encoder.write_byte_string(bytes)?;
            }
            ExtensionBody::Xml(xml) => {
                encoder.write_u8(ENCODING_XML);
                encoder.write_string(xml)?;
            }
            ExtensionBody::Decoded(structure) => {
                encoder.write_u8(ENCODING_BINARY);
                let at = encoder.len();
                encoder.write_i32(0);
                structure.encode_body(encoder)?;
                let length = encoder.len() - at - 4;
                let length = i32::try_from(length).map_err(|_| {
                    CodecError::unencodable(format!("structure body of {} bytes", length))
                })?;
                encoder.patch_u32(at, length as u32);
            }
            ExtensionBody::Json(_) => {
                return Err(CodecError::unencodable(format!(
                    "JSON body of unregistered type {} has no binary form",
                    self.type_id
                )))
            }
        }
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Self::decode_with(decoder, true)
    }
}

impl ExtensionObject {
    /// Decodes without consulting the registry; binary bodies stay raw.
    ///
    /// Used where a bad body must not fail the enclosing message.
    pub fn decode_raw(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Self::decode_with(decoder, false)
    }

    fn decode_with(decoder: &mut BinaryDecoder<'_>, resolve: bool) -> CodecResult<Self> {
        decoder.enter()?;
        let type_id = NodeId::decode(decoder)?;
        let offset = decoder.position();
        let encoding = decoder.read_u8()?;
        let body = match encoding {
            ENCODING_NONE => ExtensionBody::None,
            ENCODING_BINARY => {
                let max_length = decoder.limits().max_byte_string_length;
                let length = decoder.read_length(max_length)?.unwrap_or(0);
                let base = decoder.position();
                let bytes = decoder.take(length)?;
                let entry = if resolve {
                    decoder.registry().get(&type_id)
                } else {
                    None
                };
                match entry {
                    Some(entry) => {
                        let mut nested = decoder.nested(bytes, base);
                        let structure = (entry.decode_binary)(&mut nested)?;
                        nested.finish()?;
                        ExtensionBody::Decoded(structure)
                    }
                    None => ExtensionBody::Binary(Bytes::copy_from_slice(bytes)),
                }
            }
            ENCODING_XML => ExtensionBody::Xml(decoder.read_string()?.unwrap_or_default()),
            tag => {
                return Err(CodecError::UnknownTag {
                    offset,
                    what: "extension object encoding",
                    tag,
                })
            }
        };
        decoder.leave();
        Ok(Self { type_id, body })
    }
}

impl JsonEncodable for ExtensionObject {
    fn to_json(&self) -> CodecResult<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let mut object = JsonObject::new();
        object.field("TypeId", &self.type_id)?;
        match &self.body {
            ExtensionBody::None => {}
            ExtensionBody::Binary(bytes) => {
                object.insert("Encoding", Value::from(ENCODING_BINARY));
                object.insert("Body", Value::String(BASE64.encode(bytes)));
            }
            ExtensionBody::Xml(xml) => {
                object.insert("Encoding", Value::from(ENCODING_XML));
                object.insert("Body", Value::String(xml.clone()));
            }
            ExtensionBody::Json(value) => object.insert("Body", value.clone()),
            ExtensionBody::Decoded(structure) => object.insert("Body", structure.body_to_json()?),
        }
        Ok(object.into_value())
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        if value.is_null() {
            return Ok(Self::null());
        }
        let fields = JsonFields::new(value, "ExtensionObject", registry)?;
        let type_id: NodeId = fields.get("TypeId")?;
        let encoding: u8 = fields.get("Encoding")?;
        let body = match (encoding, fields.raw("Body")) {
            (_, None) => ExtensionBody::None,
            (ENCODING_BINARY, Some(body)) => {
                let text = expect_str(body, "ExtensionObject.Body")?;
                let bytes = BASE64
                    .decode(text)
                    .map_err(|e| CodecError::json(format!("invalid base64 body: {}", e)))?;
                ExtensionBody::Binary(Bytes::from(bytes))
            }
            (ENCODING_XML, Some(body)) => {
                ExtensionBody::Xml(expect_str(body, "ExtensionObject.Body")?.to_string())
            }
            (ENCODING_NONE, Some(body)) => match registry.get(&type_id) {
                Some(entry) => ExtensionBody::Decoded((entry.decode_json)(body, registry)?),
                None => ExtensionBody::Json(body.clone()),
            },
            (other, Some(_)) => {
                return Err(CodecError::json(format!(
                    "unknown extension object encoding {}",
                    other
                )))
            }
        };
        Ok(Self { type_id, body })
    }
}

// =============================================================================
// TypeRegistry
// =============================================================================

type DecodeBinaryFn =
    for<'a, 'b> fn(&'a mut BinaryDecoder<'b>) -> CodecResult<Arc<dyn Structure>>;
type DecodeJsonFn = fn(&Value, &TypeRegistry) -> CodecResult<Arc<dyn Structure>>;

/// Decoders for one registered structure type.
#[derive(Debug, Clone, Copy)]
pub struct TypeEntry {
    /// Type name.
    pub name: &'static str,
    pub(crate) decode_binary: DecodeBinaryFn,
    pub(crate) decode_json: DecodeJsonFn,
}

fn decode_binary<T: EncodeableType>(
    decoder: &mut BinaryDecoder<'_>,
) -> CodecResult<Arc<dyn Structure>> {
    Ok(Arc::new(T::decode(decoder)?))
}

fn decode_json<T: EncodeableType>(
    value: &Value,
    registry: &TypeRegistry,
) -> CodecResult<Arc<dyn Structure>> {
    Ok(Arc::new(T::from_json(value, registry)?))
}

/// Maps encoding ids to structure decoders.
///
/// Built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<NodeId, TypeEntry>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its binary encoding id.
    pub fn register<T: EncodeableType>(&mut self) -> &mut Self {
        self.types.insert(
            T::encoding_id(),
            TypeEntry {
                name: T::TYPE_NAME,
                decode_binary: decode_binary::<T>,
                decode_json: decode_json::<T>,
            },
        );
        self
    }

    /// Looks up an encoding id.
    pub fn get(&self, type_id: &NodeId) -> Option<&TypeEntry> {
        self.types.get(type_id)
    }

    /// Returns `true` if the encoding id is registered.
    pub fn contains(&self, type_id: &NodeId) -> bool {
        self.types.contains_key(type_id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodingLimits;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Setpoint {
        channel: u16,
        target: f64,
    }

    impl BinaryEncodable for Setpoint {
        fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
            encoder.write_u16(self.channel);
            encoder.write_f64(self.target);
            Ok(())
        }

        fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
            Ok(Self {
                channel: decoder.read_u16()?,
                target: decoder.read_f64()?,
            })
        }
    }

    impl JsonEncodable for Setpoint {
        fn to_json(&self) -> CodecResult<Value> {
            let mut object = JsonObject::new();
            object.field("Channel", &self.channel)?;
            object.field("Target", &self.target)?;
            Ok(object.into_value())
        }

        fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
            let fields = JsonFields::new(value, "Setpoint", registry)?;
            Ok(Self {
                channel: fields.get("Channel")?,
                target: fields.get("Target")?,
            })
        }
    }

    impl EncodeableType for Setpoint {
        const BINARY_ENCODING_ID: u32 = 90_001;
        const TYPE_NAME: &'static str = "Setpoint";
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register::<Setpoint>();
        registry
    }

    fn encode(value: &ExtensionObject) -> Vec<u8> {
        let mut encoder = BinaryEncoder::new();
        value.encode(&mut encoder).unwrap();
        encoder.as_slice().to_vec()
    }

    #[test]
    fn test_registered_body_decodes() {
        let registry = registry();
        let object = ExtensionObject::from_structure(Setpoint {
            channel: 3,
            target: 21.5,
        });
        let bytes = encode(&object);

        let mut decoder = BinaryDecoder::new(&bytes, &registry, DecodingLimits::default());
        let decoded = ExtensionObject::decode(&mut decoder).unwrap();
        decoder.finish().unwrap();
        assert_eq!(decoded.decoded::<Setpoint>().map(|s| s.channel), Some(3));
        assert_eq!(decoded, object);
    }

    #[test]
    fn test_unregistered_body_round_trips_raw() {
        let empty = TypeRegistry::new();
        let object = ExtensionObject::from_structure(Setpoint {
            channel: 1,
            target: 0.5,
        });
        let bytes = encode(&object);

        let mut decoder = BinaryDecoder::new(&bytes, &empty, DecodingLimits::default());
        let raw = ExtensionObject::decode(&mut decoder).unwrap();
        assert!(matches!(raw.body, ExtensionBody::Binary(_)));
        assert_eq!(encode(&raw), bytes);

        let typed = raw
            .decode_as::<Setpoint>(&empty, DecodingLimits::default())
            .unwrap();
        assert_eq!(typed.map(|s| s.target), Some(0.5));
    }

    #[test]
    fn test_nested_error_offset_is_absolute() {
        let registry = registry();
        let mut bytes = encode(&ExtensionObject::from_structure(Setpoint::default()));
        // Shorten the declared body length so the f64 is cut off.
        let length_at = bytes.len() - 10 - 4;
        bytes[length_at] = 6;
        bytes.truncate(length_at + 4 + 6);

        let mut decoder = BinaryDecoder::new(&bytes, &registry, DecodingLimits::default());
        let error = ExtensionObject::decode(&mut decoder).unwrap_err();
        assert_eq!(
            error,
            CodecError::Truncated {
                offset: length_at + 4 + 2,
                needed: 8,
                available: 4
            }
        );
    }

    #[test]
    fn test_unknown_encoding_byte() {
        let registry = TypeRegistry::new();
        let bytes = [0x00, 0x00, 0x07];
        let mut decoder = BinaryDecoder::new(&bytes, &registry, DecodingLimits::default());
        assert!(matches!(
            ExtensionObject::decode(&mut decoder),
            Err(CodecError::UnknownTag { offset: 2, tag: 7, .. })
        ));
    }

    #[test]
    fn test_json_forms() {
        let registry = registry();
        let object = ExtensionObject::from_structure(Setpoint {
            channel: 2,
            target: 1.0,
        });
        let json = object.to_json().unwrap();
        assert_eq!(
            json,
            json!({"TypeId": "i=90001", "Body": {"Channel": 2, "Target": 1.0}})
        );
        assert_eq!(ExtensionObject::from_json(&json, &registry).unwrap(), object);

        let raw = ExtensionObject::from_binary(NodeId::numeric(0, 5), vec![1u8, 2, 3]);
        let json = raw.to_json().unwrap();
        assert_eq!(json["Encoding"], json!(1));
        assert_eq!(json["Body"], json!("AQID"));
        assert_eq!(ExtensionObject::from_json(&json, &registry).unwrap(), raw);
    }

    #[test]
    fn test_unregistered_json_body_kept() {
        let registry = TypeRegistry::new();
        let json = json!({"TypeId": "i=77", "Body": {"A": 1}});
        let object = ExtensionObject::from_json(&json, &registry).unwrap();
        assert!(matches!(object.body, ExtensionBody::Json(_)));
        assert_eq!(object.to_json().unwrap(), json);

        let mut encoder = BinaryEncoder::new();
        assert!(matches!(
            object.encode(&mut encoder),
            Err(CodecError::Unencodable { .. })
        ));
    }

    #[test]
    fn test_null_object() {
        assert_eq!(encode(&ExtensionObject::null()), vec![0x00, 0x00, 0x00]);
        assert_eq!(ExtensionObject::null().to_json().unwrap(), Value::Null);
    }
}

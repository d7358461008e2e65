// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `Variant` tagged union and its array shapes.
//!
//! Binary layout: one mask byte (bits 0-5 type id, `0x80` array, `0x40`
//! dimensions present) followed by the body. Arrays carry an `Int32` element
//! count; matrices store the flattened row-major values followed by the
//! dimension array.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::binary::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use super::builtin::{
    ByteString, DataValue, DateTime, DiagnosticInfo, LocalizedText, QualifiedName, StatusCode,
    XmlElement,
};
use super::extension::{ExtensionObject, TypeRegistry};
use super::json::{kind, JsonEncodable, JsonFields, JsonObject};
use super::node_id::{ExpandedNodeId, NodeId};
use crate::error::{CodecError, CodecResult};

const TYPE_MASK: u8 = 0x3F;
const ARRAY_FLAG: u8 = 0x80;
const DIMENSIONS_FLAG: u8 = 0x40;

// =============================================================================
// BuiltinType
// =============================================================================

/// The 25 built-in wire types plus `Null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum BuiltinType {
    /// No value.
    Null = 0,
    /// `Boolean`.
    Boolean = 1,
    /// `SByte`.
    SByte = 2,
    /// `Byte`.
    Byte = 3,
    /// `Int16`.
    Int16 = 4,
    /// `UInt16`.
    UInt16 = 5,
    /// `Int32`.
    Int32 = 6,
    /// `UInt32`.
    UInt32 = 7,
    /// `Int64`.
    Int64 = 8,
    /// `UInt64`.
    UInt64 = 9,
    /// `Float`.
    Float = 10,
    /// `Double`.
    Double = 11,
    /// `String`.
    String = 12,
    /// `DateTime`.
    DateTime = 13,
    /// `Guid`.
    Guid = 14,
    /// `ByteString`.
    ByteString = 15,
    /// `XmlElement`.
    XmlElement = 16,
    /// `NodeId`.
    NodeId = 17,
    /// `ExpandedNodeId`.
    ExpandedNodeId = 18,
    /// `StatusCode`.
    StatusCode = 19,
    /// `QualifiedName`.
    QualifiedName = 20,
    /// `LocalizedText`.
    LocalizedText = 21,
    /// `ExtensionObject`.
    ExtensionObject = 22,
    /// `DataValue`.
    DataValue = 23,
    /// `Variant` (array elements only).
    Variant = 24,
    /// `DiagnosticInfo`.
    DiagnosticInfo = 25,
}

impl BuiltinType {
    const ALL: [BuiltinType; 26] = [
        Self::Null,
        Self::Boolean,
        Self::SByte,
        Self::Byte,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float,
        Self::Double,
        Self::String,
        Self::DateTime,
        Self::Guid,
        Self::ByteString,
        Self::XmlElement,
        Self::NodeId,
        Self::ExpandedNodeId,
        Self::StatusCode,
        Self::QualifiedName,
        Self::LocalizedText,
        Self::ExtensionObject,
        Self::DataValue,
        Self::Variant,
        Self::DiagnosticInfo,
    ];

    /// Wire type id.
    #[inline]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Looks up a type by wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Returns `true` for the integer and floating point types.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::SByte
                | Self::Byte
                | Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
                | Self::Float
                | Self::Double
        )
    }
}

impl fmt::Display for BuiltinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Variant
// =============================================================================

/// Tagged union over all built-in types, arrays and matrices.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// No value.
    #[default]
    Empty,
    /// `Boolean`.
    Boolean(bool),
    /// `SByte`.
    SByte(i8),
    /// `Byte`.
    Byte(u8),
    /// `Int16`.
    Int16(i16),
    /// `UInt16`.
    UInt16(u16),
    /// `Int32`.
    Int32(i32),
    /// `UInt32`.
    UInt32(u32),
    /// `Int64`.
    Int64(i64),
    /// `UInt64`.
    UInt64(u64),
    /// `Float`.
    Float(f32),
    /// `Double`.
    Double(f64),
    /// `String`.
    String(String),
    /// `DateTime`.
    DateTime(DateTime),
    /// `Guid`.
    Guid(Uuid),
    /// `ByteString`.
    ByteString(ByteString),
    /// `XmlElement`.
    XmlElement(XmlElement),
    /// `NodeId`.
    NodeId(Box<NodeId>),
    /// `ExpandedNodeId`.
    ExpandedNodeId(Box<ExpandedNodeId>),
    /// `StatusCode`.
    StatusCode(StatusCode),
    /// `QualifiedName`.
    QualifiedName(Box<QualifiedName>),
    /// `LocalizedText`.
    LocalizedText(Box<LocalizedText>),
    /// `ExtensionObject`.
    ExtensionObject(Box<ExtensionObject>),
    /// `DataValue`.
    DataValue(Box<DataValue>),
    /// `DiagnosticInfo`.
    DiagnosticInfo(Box<DiagnosticInfo>),
    /// One-dimensional array or matrix.
    Array(Box<Array>),
}

impl Variant {
    /// Type of the value; the element type for arrays.
    pub fn builtin_type(&self) -> BuiltinType {
        match self {
            Self::Empty => BuiltinType::Null,
            Self::Boolean(_) => BuiltinType::Boolean,
            Self::SByte(_) => BuiltinType::SByte,
            Self::Byte(_) => BuiltinType::Byte,
            Self::Int16(_) => BuiltinType::Int16,
            Self::UInt16(_) => BuiltinType::UInt16,
            Self::Int32(_) => BuiltinType::Int32,
            Self::UInt32(_) => BuiltinType::UInt32,
            Self::Int64(_) => BuiltinType::Int64,
            Self::UInt64(_) => BuiltinType::UInt64,
            Self::Float(_) => BuiltinType::Float,
            Self::Double(_) => BuiltinType::Double,
            Self::String(_) => BuiltinType::String,
            Self::DateTime(_) => BuiltinType::DateTime,
            Self::Guid(_) => BuiltinType::Guid,
            Self::ByteString(_) => BuiltinType::ByteString,
            Self::XmlElement(_) => BuiltinType::XmlElement,
            Self::NodeId(_) => BuiltinType::NodeId,
            Self::ExpandedNodeId(_) => BuiltinType::ExpandedNodeId,
            Self::StatusCode(_) => BuiltinType::StatusCode,
            Self::QualifiedName(_) => BuiltinType::QualifiedName,
            Self::LocalizedText(_) => BuiltinType::LocalizedText,
            Self::ExtensionObject(_) => BuiltinType::ExtensionObject,
            Self::DataValue(_) => BuiltinType::DataValue,
            Self::DiagnosticInfo(_) => BuiltinType::DiagnosticInfo,
            Self::Array(array) => array.element_type(),
        }
    }

    /// Returns `true` for the empty variant.
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` for arrays and matrices.
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Returns the array if this is one.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::SByte(v) => Some(f64::from(*v)),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int16(v) => Some(f64::from(*v)),
            Self::UInt16(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::UInt32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SByte(v) => Some(i64::from(*v)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::UInt16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// String value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    fn encode_scalar_body(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        match self {
            Self::Empty => Ok(()),
            Self::Boolean(v) => v.encode(encoder),
            Self::SByte(v) => v.encode(encoder),
            Self::Byte(v) => v.encode(encoder),
            Self::Int16(v) => v.encode(encoder),
            Self::UInt16(v) => v.encode(encoder),
            Self::Int32(v) => v.encode(encoder),
            Self::UInt32(v) => v.encode(encoder),
            Self::Int64(v) => v.encode(encoder),
            Self::UInt64(v) => v.encode(encoder),
            Self::Float(v) => v.encode(encoder),
            Self::Double(v) => v.encode(encoder),
            Self::String(v) => v.encode(encoder),
            Self::DateTime(v) => v.encode(encoder),
            Self::Guid(v) => v.encode(encoder),
            Self::ByteString(v) => v.encode(encoder),
            Self::XmlElement(v) => v.encode(encoder),
            Self::NodeId(v) => v.encode(encoder),
            Self::ExpandedNodeId(v) => v.encode(encoder),
            Self::StatusCode(v) => v.encode(encoder),
            Self::QualifiedName(v) => v.encode(encoder),
            Self::LocalizedText(v) => v.encode(encoder),
            Self::ExtensionObject(v) => v.encode(encoder),
            Self::DataValue(v) => v.encode(encoder),
            Self::DiagnosticInfo(v) => v.encode(encoder),
            Self::Array(_) => Err(CodecError::unencodable("nested array in scalar position")),
        }
    }

    fn decode_scalar(ty: BuiltinType, decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(match ty {
            BuiltinType::Null => Self::Empty,
            BuiltinType::Boolean => Self::Boolean(decoder.read()?),
            BuiltinType::SByte => Self::SByte(decoder.read()?),
            BuiltinType::Byte => Self::Byte(decoder.read()?),
            BuiltinType::Int16 => Self::Int16(decoder.read()?),
            BuiltinType::UInt16 => Self::UInt16(decoder.read()?),
            BuiltinType::Int32 => Self::Int32(decoder.read()?),
            BuiltinType::UInt32 => Self::UInt32(decoder.read()?),
            BuiltinType::Int64 => Self::Int64(decoder.read()?),
            BuiltinType::UInt64 => Self::UInt64(decoder.read()?),
            BuiltinType::Float => Self::Float(decoder.read()?),
            BuiltinType::Double => Self::Double(decoder.read()?),
            BuiltinType::String => Self::String(decoder.read()?),
            BuiltinType::DateTime => Self::DateTime(decoder.read()?),
            BuiltinType::Guid => Self::Guid(decoder.read()?),
            BuiltinType::ByteString => Self::ByteString(decoder.read()?),
            BuiltinType::XmlElement => Self::XmlElement(decoder.read()?),
            BuiltinType::NodeId => Self::NodeId(Box::new(decoder.read()?)),
            BuiltinType::ExpandedNodeId => Self::ExpandedNodeId(Box::new(decoder.read()?)),
            BuiltinType::StatusCode => Self::StatusCode(decoder.read()?),
            BuiltinType::QualifiedName => Self::QualifiedName(Box::new(decoder.read()?)),
            BuiltinType::LocalizedText => Self::LocalizedText(Box::new(decoder.read()?)),
            BuiltinType::ExtensionObject => Self::ExtensionObject(Box::new(decoder.read()?)),
            BuiltinType::DataValue => Self::DataValue(Box::new(decoder.read()?)),
            BuiltinType::DiagnosticInfo => Self::DiagnosticInfo(Box::new(decoder.read()?)),
            BuiltinType::Variant => decoder.read()?,
        })
    }

    fn scalar_body_to_json(&self) -> CodecResult<Value> {
        match self {
            Self::Empty => Ok(Value::Null),
            Self::Boolean(v) => v.to_json(),
            Self::SByte(v) => v.to_json(),
            Self::Byte(v) => v.to_json(),
            Self::Int16(v) => v.to_json(),
            Self::UInt16(v) => v.to_json(),
            Self::Int32(v) => v.to_json(),
            Self::UInt32(v) => v.to_json(),
            Self::Int64(v) => v.to_json(),
            Self::UInt64(v) => v.to_json(),
            Self::Float(v) => v.to_json(),
            Self::Double(v) => v.to_json(),
            Self::String(v) => v.to_json(),
            Self::DateTime(v) => v.to_json(),
            Self::Guid(v) => v.to_json(),
            Self::ByteString(v) => v.to_json(),
            Self::XmlElement(v) => v.to_json(),
            Self::NodeId(v) => v.to_json(),
            Self::ExpandedNodeId(v) => v.to_json(),
            Self::StatusCode(v) => v.to_json(),
            Self::QualifiedName(v) => v.to_json(),
            Self::LocalizedText(v) => v.to_json(),
            Self::ExtensionObject(v) => v.to_json(),
            Self::DataValue(v) => v.to_json(),
            Self::DiagnosticInfo(v) => v.to_json(),
            Self::Array(_) => Err(CodecError::unencodable("nested array in scalar position")),
        }
    }

    fn scalar_from_json(
        ty: BuiltinType,
        body: &Value,
        registry: &TypeRegistry,
    ) -> CodecResult<Self> {
        Ok(match ty {
            BuiltinType::Null => Self::Empty,
            BuiltinType::Boolean => Self::Boolean(JsonEncodable::from_json(body, registry)?),
            BuiltinType::SByte => Self::SByte(JsonEncodable::from_json(body, registry)?),
            BuiltinType::Byte => Self::Byte(JsonEncodable::from_json(body, registry)?),
            BuiltinType::Int16 => Self::Int16(JsonEncodable::from_json(body, registry)?),
            BuiltinType::UInt16 => Self::UInt16(JsonEncodable::from_json(body, registry)?),
            BuiltinType::Int32 => Self::Int32(JsonEncodable::from_json(body, registry)?),
            BuiltinType::UInt32 => Self::UInt32(JsonEncodable::from_json(body, registry)?),
            BuiltinType::Int64 => Self::Int64(JsonEncodable::from_json(body, registry)?),
            BuiltinType::UInt64 => Self::UInt64(JsonEncodable::from_json(body, registry)?),
            BuiltinType::Float => Self::Float(JsonEncodable::from_json(body, registry)?),
            BuiltinType::Double => Self::Double(JsonEncodable::from_json(body, registry)?),
            BuiltinType::String => Self::String(JsonEncodable::from_json(body, registry)?),
            BuiltinType::DateTime => Self::DateTime(JsonEncodable::from_json(body, registry)?),
            BuiltinType::Guid => Self::Guid(JsonEncodable::from_json(body, registry)?),
            BuiltinType::ByteString => Self::ByteString(JsonEncodable::from_json(body, registry)?),
            BuiltinType::XmlElement => Self::XmlElement(JsonEncodable::from_json(body, registry)?),
            BuiltinType::NodeId => Self::NodeId(Box::new(JsonEncodable::from_json(body, registry)?)),
            BuiltinType::ExpandedNodeId => {
                Self::ExpandedNodeId(Box::new(JsonEncodable::from_json(body, registry)?))
            }
            BuiltinType::StatusCode => Self::StatusCode(JsonEncodable::from_json(body, registry)?),
            BuiltinType::QualifiedName => {
                Self::QualifiedName(Box::new(JsonEncodable::from_json(body, registry)?))
            }
            BuiltinType::LocalizedText => {
                Self::LocalizedText(Box::new(JsonEncodable::from_json(body, registry)?))
            }
            BuiltinType::ExtensionObject => {
                Self::ExtensionObject(Box::new(JsonEncodable::from_json(body, registry)?))
            }
            BuiltinType::DataValue => {
                Self::DataValue(Box::new(JsonEncodable::from_json(body, registry)?))
            }
            BuiltinType::DiagnosticInfo => {
                Self::DiagnosticInfo(Box::new(JsonEncodable::from_json(body, registry)?))
            }
            BuiltinType::Variant => Self::from_json(body, registry)?,
        })
    }
}

impl BinaryEncodable for Variant {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        let Self::Array(array) = self else {
            encoder.write_u8(self.builtin_type().id());
            return self.encode_scalar_body(encoder);
        };

        let mut mask = array.element_type.id() | ARRAY_FLAG;
        if array.dimensions.is_some() {
            mask |= DIMENSIONS_FLAG;
        }
        encoder.write_u8(mask);

        match &array.values {
            Some(values) => {
                encoder.write_length(values.len())?;
                for value in values {
                    if array.element_type == BuiltinType::Variant {
                        value.encode(encoder)?;
                    } else {
                        value.encode_scalar_body(encoder)?;
                    }
                }
            }
            None => encoder.write_null(),
        }

        if let Some(dimensions) = &array.dimensions {
            encoder.write_length(dimensions.len())?;
            for dimension in dimensions {
                let dimension = i32::try_from(*dimension).map_err(|_| {
                    CodecError::unencodable(format!("dimension {} does not fit in Int32", dimension))
                })?;
                encoder.write_i32(dimension);
            }
        }
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        let offset = decoder.position();
        let mask = decoder.read_u8()?;
        let type_id = mask & TYPE_MASK;
        let ty = BuiltinType::from_id(type_id).ok_or(CodecError::UnknownTag {
            offset,
            what: "variant type",
            tag: type_id,
        })?;

        if mask & ARRAY_FLAG == 0 {
            if mask & DIMENSIONS_FLAG != 0 {
                return Err(CodecError::Invalid {
                    offset,
                    what: "variant",
                    message: "dimensions flag without array flag".to_string(),
                });
            }
            if ty == BuiltinType::Variant {
                return Err(CodecError::Invalid {
                    offset,
                    what: "variant",
                    message: "scalar of type Variant".to_string(),
                });
            }
            decoder.enter()?;
            let value = Self::decode_scalar(ty, decoder)?;
            decoder.leave();
            return Ok(value);
        }

        if ty == BuiltinType::Null {
            return Err(CodecError::Invalid {
                offset,
                what: "variant",
                message: "array of Null".to_string(),
            });
        }

        decoder.enter()?;
        let max_length = decoder.limits().max_array_length;
        let values = match decoder.read_length(max_length)? {
            Some(length) => {
                let mut values = Vec::with_capacity(length.min(decoder.remaining()));
                for _ in 0..length {
                    values.push(Self::decode_scalar(ty, decoder)?);
                }
                Some(values)
            }
            None => None,
        };

        let dimensions = if mask & DIMENSIONS_FLAG != 0 {
            let dims_offset = decoder.position();
            let raw: Vec<i32> = decoder.read_array()?.unwrap_or_default();
            let dimensions = raw
                .into_iter()
                .map(|d| {
                    u32::try_from(d).map_err(|_| CodecError::Invalid {
                        offset: dims_offset,
                        what: "matrix dimensions",
                        message: format!("negative dimension {}", d),
                    })
                })
                .collect::<CodecResult<Vec<u32>>>()?;
            Some((dims_offset, dimensions))
        } else {
            None
        };
        decoder.leave();

        let array = match (values, dimensions) {
            (None, None) => Array::null(ty),
            (None, Some((dims_offset, _))) => {
                return Err(CodecError::Invalid {
                    offset: dims_offset,
                    what: "matrix dimensions",
                    message: "dimensions on a null array".to_string(),
                })
            }
            (Some(values), None) => Array {
                element_type: ty,
                values: Some(values),
                dimensions: None,
            },
            (Some(values), Some((dims_offset, dimensions))) => {
                Array::check_dimensions(values.len(), &dimensions).map_err(|message| {
                    CodecError::Invalid {
                        offset: dims_offset,
                        what: "matrix dimensions",
                        message,
                    }
                })?;
                Array {
                    element_type: ty,
                    values: Some(values),
                    dimensions: Some(dimensions),
                }
            }
        };
        Ok(Self::Array(Box::new(array)))
    }
}

impl JsonEncodable for Variant {
    fn to_json(&self) -> CodecResult<Value> {
        let mut object = JsonObject::new();
        match self {
            Self::Empty => return Ok(Value::Null),
            Self::Array(array) => {
                object.field("Type", &array.element_type.id())?;
                if let Some(values) = &array.values {
                    let body = values
                        .iter()
                        .map(|value| {
                            if array.element_type == BuiltinType::Variant {
                                value.to_json()
                            } else {
                                value.scalar_body_to_json()
                            }
                        })
                        .collect::<CodecResult<Vec<_>>>()?;
                    object.insert("Body", Value::Array(body));
                }
                if let Some(dimensions) = &array.dimensions {
                    object.field("Dimensions", dimensions)?;
                }
            }
            scalar => {
                object.field("Type", &scalar.builtin_type().id())?;
                // A null body still marks a scalar; absence means a null array.
                object.insert_nullable("Body", scalar.scalar_body_to_json()?);
            }
        }
        Ok(object.into_value())
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        if value.is_null() {
            return Ok(Self::Empty);
        }
        let fields = JsonFields::new(value, "Variant", registry)?;
        let type_id: u8 = fields.required("Type")?;
        let ty = BuiltinType::from_id(type_id)
            .ok_or_else(|| CodecError::json(format!("unknown variant type {}", type_id)))?;
        let dimensions: Option<Vec<u32>> = fields.optional("Dimensions")?;

        match fields.raw("Body") {
            Some(Value::Array(items)) => {
                let values = items
                    .iter()
                    .map(|item| Self::scalar_from_json(ty, item, registry))
                    .collect::<CodecResult<Vec<_>>>()?;
                let array = match dimensions {
                    Some(dimensions) => Array::matrix(ty, values, dimensions)?,
                    None => Array::new(ty, values)?,
                };
                Ok(Self::Array(Box::new(array)))
            }
            Some(body) if dimensions.is_none() => {
                if ty == BuiltinType::Variant {
                    return Err(CodecError::json("scalar of type Variant"));
                }
                Self::scalar_from_json(ty, body, registry)
            }
            Some(body) => Err(CodecError::json(format!(
                "matrix body must be an array, found {}",
                kind(body)
            ))),
            None if ty == BuiltinType::Null => Ok(Self::Empty),
            None if fields.contains("Body")
                && dimensions.is_none()
                && ty != BuiltinType::Variant =>
            {
                Self::scalar_from_json(ty, &Value::Null, registry)
            }
            None => Ok(Self::Array(Box::new(Array::null(ty)))),
        }
    }
}

macro_rules! impl_variant_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_variant_from! {
    bool => Boolean,
    i8 => SByte,
    u8 => Byte,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
    DateTime => DateTime,
    Uuid => Guid,
    ByteString => ByteString,
    StatusCode => StatusCode,
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<NodeId> for Variant {
    fn from(value: NodeId) -> Self {
        Self::NodeId(Box::new(value))
    }
}

impl From<LocalizedText> for Variant {
    fn from(value: LocalizedText) -> Self {
        Self::LocalizedText(Box::new(value))
    }
}

impl From<ExtensionObject> for Variant {
    fn from(value: ExtensionObject) -> Self {
        Self::ExtensionObject(Box::new(value))
    }
}

impl From<Array> for Variant {
    fn from(value: Array) -> Self {
        Self::Array(Box::new(value))
    }
}

// =============================================================================
// Array
// =============================================================================

/// Homogeneous array or matrix.
///
/// Element type and rank are fixed at construction; the constructors reject
/// elements of another type and dimensions that do not match the length.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    element_type: BuiltinType,
    values: Option<Vec<Variant>>,
    dimensions: Option<Vec<u32>>,
}

impl Array {
    /// Creates a one-dimensional array.
    pub fn new(element_type: BuiltinType, values: Vec<Variant>) -> CodecResult<Self> {
        Self::check_elements(element_type, &values)?;
        Ok(Self {
            element_type,
            values: Some(values),
            dimensions: None,
        })
    }

    /// Creates a matrix from row-major values.
    pub fn matrix(
        element_type: BuiltinType,
        values: Vec<Variant>,
        dimensions: Vec<u32>,
    ) -> CodecResult<Self> {
        Self::check_elements(element_type, &values)?;
        Self::check_dimensions(values.len(), &dimensions).map_err(CodecError::invalid_value)?;
        Ok(Self {
            element_type,
            values: Some(values),
            dimensions: Some(dimensions),
        })
    }

    /// Creates the null array of a type.
    pub fn null(element_type: BuiltinType) -> Self {
        Self {
            element_type,
            values: None,
            dimensions: None,
        }
    }

    /// Element type.
    #[inline]
    pub fn element_type(&self) -> BuiltinType {
        self.element_type
    }

    /// Elements; empty for the null array.
    pub fn values(&self) -> &[Variant] {
        self.values.as_deref().unwrap_or(&[])
    }

    /// Matrix dimensions.
    pub fn dimensions(&self) -> Option<&[u32]> {
        self.dimensions.as_deref()
    }

    /// Returns `true` for the null array.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.values.is_none()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dimensions.as_ref().map_or(1, Vec::len)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.values().len()
    }

    /// Returns `true` if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    fn check_elements(element_type: BuiltinType, values: &[Variant]) -> CodecResult<()> {
        if element_type == BuiltinType::Null {
            return Err(CodecError::invalid_value("array element type cannot be Null"));
        }
        if element_type == BuiltinType::Variant {
            return Ok(());
        }
        match values
            .iter()
            .position(|v| v.is_array() || v.builtin_type() != element_type)
        {
            Some(index) => Err(CodecError::invalid_value(format!(
                "element {} is {:?}, expected {}",
                index,
                values[index].builtin_type(),
                element_type
            ))),
            None => Ok(()),
        }
    }

    fn check_dimensions(length: usize, dimensions: &[u32]) -> Result<(), String> {
        if dimensions.is_empty() {
            return Err("matrix needs at least one dimension".to_string());
        }
        let product = dimensions
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d as usize))
            .ok_or_else(|| "dimension product overflows".to_string())?;
        if product != length {
            return Err(format!(
                "dimensions {:?} require {} values, found {}",
                dimensions, product, length
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodingLimits;

    fn encode(value: &Variant) -> Vec<u8> {
        let mut encoder = BinaryEncoder::new();
        value.encode(&mut encoder).unwrap();
        encoder.as_slice().to_vec()
    }

    fn decode(bytes: &[u8]) -> CodecResult<Variant> {
        let registry = TypeRegistry::new();
        let mut decoder = BinaryDecoder::new(bytes, &registry, DecodingLimits::default());
        Variant::decode(&mut decoder)
    }

    fn int32_array(values: &[i32]) -> Variant {
        Array::new(
            BuiltinType::Int32,
            values.iter().copied().map(Variant::from).collect(),
        )
        .unwrap()
        .into()
    }

    #[test]
    fn test_scalar_mask() {
        assert_eq!(encode(&Variant::Int32(1)), vec![6, 1, 0, 0, 0]);
        assert_eq!(encode(&Variant::Empty), vec![0]);
        assert_eq!(encode(&Variant::Boolean(true)), vec![1, 1]);
    }

    #[test]
    fn test_array_mask_and_length() {
        let bytes = encode(&int32_array(&[7, 8]));
        assert_eq!(bytes[0], 0x86);
        assert_eq!(&bytes[1..5], &[2, 0, 0, 0]);
        assert_eq!(decode(&bytes).unwrap(), int32_array(&[7, 8]));
    }

    #[test]
    fn test_null_array_distinct_from_empty() {
        let null: Variant = Array::null(BuiltinType::String).into();
        let empty: Variant = Array::new(BuiltinType::String, vec![]).unwrap().into();
        assert_ne!(null, empty);
        assert_eq!(&encode(&null)[1..], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode(&encode(&null)).unwrap(), null);
        assert_eq!(decode(&encode(&empty)).unwrap(), empty);
    }

    #[test]
    fn test_matrix_layout() {
        let values = (1..=6).map(Variant::Int16).collect();
        let matrix: Variant = Array::matrix(BuiltinType::Int16, values, vec![2, 3])
            .unwrap()
            .into();
        let bytes = encode(&matrix);
        assert_eq!(bytes[0], 0x04 | 0x80 | 0x40);
        // 1 mask + 4 length + 6 * 2 values, then dimension array
        assert_eq!(&bytes[17..21], &[2, 0, 0, 0]);
        assert_eq!(&bytes[21..29], &[2, 0, 0, 0, 3, 0, 0, 0]);

        let decoded = decode(&bytes).unwrap();
        let array = decoded.as_array().unwrap();
        assert_eq!(array.rank(), 2);
        assert_eq!(array.dimensions(), Some(&[2u32, 3][..]));
        assert_eq!(decoded, matrix);
    }

    #[test]
    fn test_matrix_dimension_mismatch_rejected() {
        let values = vec![Variant::Int16(1); 5];
        assert!(Array::matrix(BuiltinType::Int16, values, vec![2, 3]).is_err());

        let mut bytes = encode(
            &Array::matrix(BuiltinType::Byte, vec![Variant::Byte(0); 4], vec![2, 2])
                .unwrap()
                .into(),
        );
        // rewrite the second dimension to 3
        let last = bytes.len() - 4;
        bytes[last] = 3;
        let error = decode(&bytes).unwrap_err();
        assert!(matches!(error, CodecError::Invalid { offset: 9, .. }));
    }

    #[test]
    fn test_heterogeneous_array_rejected() {
        let values = vec![Variant::Int32(1), Variant::Double(2.0)];
        assert!(Array::new(BuiltinType::Int32, values.clone()).is_err());
        assert!(Array::new(BuiltinType::Variant, values).is_ok());
    }

    #[test]
    fn test_variant_array_elements_carry_own_mask() {
        let array: Variant = Array::new(
            BuiltinType::Variant,
            vec![Variant::Byte(1), Variant::String("a".into())],
        )
        .unwrap()
        .into();
        let bytes = encode(&array);
        assert_eq!(bytes[0], 24 | 0x80);
        assert_eq!(bytes[5], 3);
        assert_eq!(decode(&bytes).unwrap(), array);
    }

    #[test]
    fn test_unknown_type_tag() {
        let error = decode(&[30]).unwrap_err();
        assert_eq!(
            error,
            CodecError::UnknownTag {
                offset: 0,
                what: "variant type",
                tag: 30
            }
        );
    }

    #[test]
    fn test_truncated_array_reports_element_offset() {
        let mut bytes = encode(&int32_array(&[1, 2, 3, 4]));
        bytes.truncate(1 + 4 + 8 + 2);
        let error = decode(&bytes).unwrap_err();
        assert_eq!(
            error,
            CodecError::Truncated {
                offset: 13,
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut value = Variant::Int32(1);
        for _ in 0..10 {
            value = Array::new(BuiltinType::Variant, vec![value]).unwrap().into();
        }
        let bytes = encode(&value);
        let registry = TypeRegistry::new();
        let limits = DecodingLimits {
            max_depth: 5,
            ..DecodingLimits::default()
        };
        let mut decoder = BinaryDecoder::new(&bytes, &registry, limits);
        assert!(matches!(
            Variant::decode(&mut decoder),
            Err(CodecError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn test_json_forms() {
        let registry = TypeRegistry::new();
        let json = Variant::Int64(-5).to_json().unwrap();
        assert_eq!(json, serde_json::json!({"Type": 8, "Body": "-5"}));

        let matrix: Variant = Array::matrix(
            BuiltinType::Boolean,
            vec![Variant::Boolean(true); 4],
            vec![2, 2],
        )
        .unwrap()
        .into();
        let json = matrix.to_json().unwrap();
        assert_eq!(json["Dimensions"], serde_json::json!([2, 2]));
        assert_eq!(Variant::from_json(&json, &registry).unwrap(), matrix);

        let null: Variant = Array::null(BuiltinType::Double).into();
        let json = null.to_json().unwrap();
        assert_eq!(json, serde_json::json!({"Type": 11}));
        assert_eq!(Variant::from_json(&json, &registry).unwrap(), null);

        assert_eq!(Variant::from_json(&Value::Null, &registry).unwrap(), Variant::Empty);
    }

    #[test]
    fn test_null_extension_object_scalar_stays_scalar() {
        let registry = TypeRegistry::new();
        let value = Variant::from(ExtensionObject::null());

        let json = value.to_json().unwrap();
        assert_eq!(json, serde_json::json!({"Type": 22, "Body": null}));
        assert_eq!(Variant::from_json(&json, &registry).unwrap(), value);

        let bytes = encode(&value);
        assert_eq!(decode(&bytes).unwrap(), value);

        // Without a body the same type still reads as a null array.
        let decoded = Variant::from_json(&serde_json::json!({"Type": 22}), &registry).unwrap();
        assert_eq!(decoded, Array::null(BuiltinType::ExtensionObject).into());
    }

    #[test]
    fn test_json_double_keeps_every_bit() {
        let registry = TypeRegistry::new();
        for number in [230980222322.28918f64, 0.1 + 0.2, -1.0e-300, 9007199254740993.0] {
            let value = Variant::Double(number);
            let text = serde_json::to_string(&value.to_json().unwrap()).unwrap();
            let parsed: Value = serde_json::from_str(&text).unwrap();
            let decoded = Variant::from_json(&parsed, &registry).unwrap();
            assert_eq!(decoded.as_f64().map(f64::to_bits), Some(number.to_bits()));
        }
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Variant::UInt16(7).as_f64(), Some(7.0));
        assert_eq!(Variant::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Variant::from("x").as_str(), Some("x"));
        assert!(BuiltinType::Float.is_numeric());
        assert_eq!(BuiltinType::from_id(25), Some(BuiltinType::DiagnosticInfo));
        assert_eq!(BuiltinType::from_id(26), None);
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wire codec for the built-in data types.
//!
//! Two formats share one value model: the compact little-endian binary
//! encoding used on the wire, and a reversible JSON encoding used for logs,
//! configuration and tooling. Both are lossless for every value the model can
//! express, including null-versus-empty arrays and matrix shapes.
//!
//! # Example
//!
//! ```
//! use strand_opcua::codec::{EncodingFormat, Variant, WireCodec};
//!
//! let codec = WireCodec::standard();
//! let bytes = codec.encode(&Variant::Double(20.5), EncodingFormat::Binary).unwrap();
//! let value = codec.decode(&bytes, EncodingFormat::Binary, None).unwrap();
//! assert_eq!(value, Variant::Double(20.5));
//! ```

mod binary;
mod builtin;
mod extension;
mod json;
mod node_id;
mod variant;

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use binary::{BinaryDecoder, BinaryEncodable, BinaryEncoder, NULL_LENGTH};
pub use builtin::{
    ByteString, DataValue, DateTime, DiagnosticInfo, LocalizedText, QualifiedName, StatusCode,
    XmlElement,
};
pub use extension::{
    EncodeableType, ExtensionBody, ExtensionObject, Structure, TypeEntry, TypeRegistry,
};
pub use json::{JsonEncodable, JsonFields, JsonObject};
pub use node_id::{ExpandedNodeId, NodeId, NodeIdentifier};
pub use variant::{Array, BuiltinType, Variant};

pub(crate) use json::pascal_case;

use crate::error::{CodecError, CodecResult};

// =============================================================================
// Configuration
// =============================================================================

/// Serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    /// Little-endian binary.
    Binary,
    /// Reversible JSON.
    Json,
}

/// Bounds applied while decoding untrusted input.
///
/// A value of `0` disables the corresponding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingLimits {
    /// Maximum string length in bytes.
    pub max_string_length: usize,
    /// Maximum byte string length.
    pub max_byte_string_length: usize,
    /// Maximum array element count.
    pub max_array_length: usize,
    /// Maximum structural nesting.
    pub max_depth: usize,
    /// Maximum size of a complete message.
    pub max_message_size: usize,
}

impl Default for DecodingLimits {
    fn default() -> Self {
        Self {
            max_string_length: 65_535,
            max_byte_string_length: 1_048_576,
            max_array_length: 65_535,
            max_depth: 100,
            max_message_size: 4_194_304,
        }
    }
}

// =============================================================================
// WireCodec
// =============================================================================

/// Entry point for encoding and decoding values.
///
/// Cheap to clone; the type registry is shared.
#[derive(Debug, Clone)]
pub struct WireCodec {
    registry: Arc<TypeRegistry>,
    limits: DecodingLimits,
}

impl WireCodec {
    /// Creates a codec over a registry.
    pub fn new(registry: Arc<TypeRegistry>, limits: DecodingLimits) -> Self {
        Self { registry, limits }
    }

    /// Codec with the standard service structures registered.
    pub fn standard() -> Self {
        Self::new(
            Arc::new(crate::services::standard_registry()),
            DecodingLimits::default(),
        )
    }

    /// Replaces the decoding limits.
    pub fn with_limits(mut self, limits: DecodingLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Shared type registry.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Active decoding limits.
    pub fn limits(&self) -> DecodingLimits {
        self.limits
    }

    /// Encodes a variant.
    pub fn encode(&self, value: &Variant, format: EncodingFormat) -> CodecResult<Bytes> {
        self.encode_value(value, format)
    }

    /// Decodes a variant, optionally checking its type.
    ///
    /// The whole input must be consumed. An empty variant matches any
    /// expected type.
    pub fn decode(
        &self,
        data: &[u8],
        format: EncodingFormat,
        expected: Option<BuiltinType>,
    ) -> CodecResult<Variant> {
        let value: Variant = self.decode_value(data, format)?;
        match expected {
            Some(expected) if !value.is_empty() && value.builtin_type() != expected => {
                Err(CodecError::TypeMismatch {
                    offset: 0,
                    expected: expected.to_string(),
                    found: value.builtin_type().to_string(),
                })
            }
            _ => Ok(value),
        }
    }

    /// Encodes any wire value.
    pub fn encode_value<T>(&self, value: &T, format: EncodingFormat) -> CodecResult<Bytes>
    where
        T: BinaryEncodable + JsonEncodable,
    {
        match format {
            EncodingFormat::Binary => {
                let mut encoder = BinaryEncoder::new();
                value.encode(&mut encoder)?;
                Ok(encoder.into_bytes())
            }
            EncodingFormat::Json => {
                let json = value.to_json()?;
                serde_json::to_vec(&json)
                    .map(Bytes::from)
                    .map_err(|e| CodecError::json(e.to_string()))
            }
        }
    }

    /// Decodes any wire value, requiring the whole input to be consumed.
    pub fn decode_value<T>(&self, data: &[u8], format: EncodingFormat) -> CodecResult<T>
    where
        T: BinaryEncodable + JsonEncodable,
    {
        if self.limits.max_message_size > 0 && data.len() > self.limits.max_message_size {
            return Err(CodecError::LimitExceeded {
                offset: 0,
                length: data.len(),
                limit: self.limits.max_message_size,
            });
        }
        match format {
            EncodingFormat::Binary => {
                let mut decoder = BinaryDecoder::new(data, &self.registry, self.limits);
                let value = T::decode(&mut decoder)?;
                decoder.finish()?;
                Ok(value)
            }
            EncodingFormat::Json => {
                let json: serde_json::Value =
                    serde_json::from_slice(data).map_err(|e| CodecError::json(e.to_string()))?;
                T::from_json(&json, &self.registry)
            }
        }
    }

    /// Resolves an extension object to a typed structure.
    pub fn resolve_extension<T: EncodeableType>(
        &self,
        object: &ExtensionObject,
    ) -> CodecResult<Option<T>> {
        object.decode_as(&self.registry, self.limits)
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch() {
        let codec = WireCodec::standard();
        let bytes = codec
            .encode(&Variant::Int32(4), EncodingFormat::Binary)
            .unwrap();
        let error = codec
            .decode(&bytes, EncodingFormat::Binary, Some(BuiltinType::Double))
            .unwrap_err();
        assert!(matches!(error, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let codec = WireCodec::standard();
        let error = codec
            .decode(&[1, 1, 0], EncodingFormat::Binary, None)
            .unwrap_err();
        assert!(matches!(error, CodecError::Invalid { offset: 2, .. }));
    }

    #[test]
    fn test_message_size_limit() {
        let codec = WireCodec::standard().with_limits(DecodingLimits {
            max_message_size: 4,
            ..DecodingLimits::default()
        });
        let bytes = [6u8, 1, 0, 0, 0];
        assert!(matches!(
            codec.decode(&bytes, EncodingFormat::Binary, None),
            Err(CodecError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn test_json_format() {
        let codec = WireCodec::standard();
        let value = Variant::String("pump-7".into());
        let bytes = codec.encode(&value, EncodingFormat::Json).unwrap();
        assert_eq!(&bytes[..], br#"{"Body":"pump-7","Type":12}"#);
        assert_eq!(
            codec.decode(&bytes, EncodingFormat::Json, None).unwrap(),
            value
        );
    }

    #[test]
    fn test_limits_deserialize_with_defaults() {
        let limits: DecodingLimits = serde_json::from_str(r#"{"max_depth": 8}"#).unwrap();
        assert_eq!(limits.max_depth, 8);
        assert_eq!(limits.max_array_length, 65_535);
    }
}

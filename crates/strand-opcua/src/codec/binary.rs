// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Binary encoder and decoder.
//!
//! All multi-byte values are little-endian. Strings, byte strings and arrays
//! carry an `Int32` length prefix where `-1` marks a null value.

use bytes::{BufMut, Bytes, BytesMut};

use super::extension::TypeRegistry;
use super::DecodingLimits;
use crate::error::{CodecError, CodecResult};

/// Length prefix value that marks a null string, byte string or array.
pub const NULL_LENGTH: i32 = -1;

// =============================================================================
// BinaryEncodable
// =============================================================================

/// A value with a binary wire representation.
pub trait BinaryEncodable: Sized {
    /// Appends the encoded value to `encoder`.
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()>;

    /// Reads one value from `decoder`.
    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self>;
}

// =============================================================================
// BinaryEncoder
// =============================================================================

/// Growable output buffer for binary encoding.
#[derive(Debug, Default)]
pub struct BinaryEncoder {
    buf: BytesMut,
}

impl BinaryEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the encoder and returns the frozen buffer.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Writes any encodable value.
    #[inline]
    pub fn write<T: BinaryEncodable>(&mut self, value: &T) -> CodecResult<()> {
        value.encode(self)
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Writes a signed byte.
    #[inline]
    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    /// Writes a `UInt16`.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    /// Writes an `Int16`.
    #[inline]
    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    /// Writes a `UInt32`.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Writes an `Int32`.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Writes a `UInt64`.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Writes an `Int64`.
    #[inline]
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Writes a `Float`.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    /// Writes a `Double`.
    #[inline]
    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Writes raw bytes without a length prefix.
    #[inline]
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes an `Int32` length prefix.
    pub fn write_length(&mut self, length: usize) -> CodecResult<()> {
        let length = i32::try_from(length).map_err(|_| {
            CodecError::unencodable(format!("length {} does not fit in Int32", length))
        })?;
        self.write_i32(length);
        Ok(())
    }

    /// Writes the null length marker.
    #[inline]
    pub fn write_null(&mut self) {
        self.write_i32(NULL_LENGTH);
    }

    /// Writes a length-prefixed byte string.
    pub fn write_byte_string(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.write_length(bytes.len())?;
        self.write_raw(bytes);
        Ok(())
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> CodecResult<()> {
        self.write_byte_string(value.as_bytes())
    }

    /// Writes a length-prefixed array.
    pub fn write_array<T: BinaryEncodable>(&mut self, items: &[T]) -> CodecResult<()> {
        self.write_length(items.len())?;
        items.iter().try_for_each(|item| item.encode(self))
    }

    /// Overwrites four bytes at `at` with a `UInt32`.
    pub(crate) fn patch_u32(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
}

// =============================================================================
// BinaryDecoder
// =============================================================================

/// Cursor over an input buffer.
///
/// Positions reported in errors are absolute: a decoder created for a nested
/// body carries the offset of that body within the outer message.
#[derive(Debug)]
pub struct BinaryDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
    depth: usize,
    limits: DecodingLimits,
    registry: &'a TypeRegistry,
}

impl<'a> BinaryDecoder<'a> {
    /// Creates a decoder over `data`.
    pub fn new(data: &'a [u8], registry: &'a TypeRegistry, limits: DecodingLimits) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
            depth: 0,
            limits,
            registry,
        }
    }

    /// Creates a decoder for a nested body located at absolute offset `base`.
    pub(crate) fn nested(&self, data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            pos: 0,
            base,
            depth: self.depth,
            limits: self.limits,
            registry: self.registry,
        }
    }

    /// Absolute position of the cursor.
    #[inline]
    pub fn position(&self) -> usize {
        self.base + self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns `true` if all input was consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Registry used to resolve extension objects.
    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    /// Active decoding limits.
    pub fn limits(&self) -> &DecodingLimits {
        &self.limits
    }

    /// Reads any decodable value.
    #[inline]
    pub fn read<T: BinaryEncodable>(&mut self) -> CodecResult<T> {
        T::decode(self)
    }

    /// Takes `n` raw bytes.
    pub fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.position(),
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Reads a signed byte.
    pub fn read_i8(&mut self) -> CodecResult<i8> {
        Ok(i8::from_le_bytes(self.take_array()?))
    }

    /// Reads a `UInt16`.
    pub fn read_u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Reads an `Int16`.
    pub fn read_i16(&mut self) -> CodecResult<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    /// Reads a `UInt32`.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Reads an `Int32`.
    pub fn read_i32(&mut self) -> CodecResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Reads a `UInt64`.
    pub fn read_u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Reads an `Int64`.
    pub fn read_i64(&mut self) -> CodecResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Reads a `Float`.
    pub fn read_f32(&mut self) -> CodecResult<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Reads a `Double`.
    pub fn read_f64(&mut self) -> CodecResult<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Reads an `Int32` length prefix, returning `None` for the null marker.
    pub fn read_length(&mut self, limit: usize) -> CodecResult<Option<usize>> {
        let offset = self.position();
        let length = self.read_i32()?;
        if length == NULL_LENGTH {
            return Ok(None);
        }
        if length < 0 {
            return Err(CodecError::InvalidLength { offset, length });
        }
        let length = length as usize;
        if limit > 0 && length > limit {
            return Err(CodecError::LimitExceeded {
                offset,
                length,
                limit,
            });
        }
        Ok(Some(length))
    }

    /// Reads a length-prefixed byte string.
    pub fn read_byte_string(&mut self) -> CodecResult<Option<&'a [u8]>> {
        match self.read_length(self.limits.max_byte_string_length)? {
            Some(length) => self.take(length).map(Some),
            None => Ok(None),
        }
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> CodecResult<Option<String>> {
        let Some(length) = self.read_length(self.limits.max_string_length)? else {
            return Ok(None);
        };
        let offset = self.position();
        let bytes = self.take(length)?;
        std::str::from_utf8(bytes)
            .map(|s| Some(s.to_string()))
            .map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    /// Reads a length-prefixed array.
    ///
    /// Elements are decoded one at a time so a truncated array reports the
    /// offset of the first element that could not be read.
    pub fn read_array<T: BinaryEncodable>(&mut self) -> CodecResult<Option<Vec<T>>> {
        let Some(length) = self.read_length(self.limits.max_array_length)? else {
            return Ok(None);
        };
        let mut items = Vec::with_capacity(length.min(self.remaining()));
        for _ in 0..length {
            items.push(T::decode(self)?);
        }
        Ok(Some(items))
    }

    /// Enters one level of structural nesting.
    pub fn enter(&mut self) -> CodecResult<()> {
        self.depth += 1;
        if self.limits.max_depth > 0 && self.depth > self.limits.max_depth {
            return Err(CodecError::DepthExceeded {
                offset: self.position(),
                depth: self.depth,
            });
        }
        Ok(())
    }

    /// Leaves one level of structural nesting.
    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Fails if unread bytes remain.
    pub fn finish(&self) -> CodecResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::Invalid {
                offset: self.position(),
                what: "message",
                message: format!("{} trailing bytes", self.remaining()),
            })
        }
    }
}

// =============================================================================
// Primitive implementations
// =============================================================================

macro_rules! impl_primitive {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl BinaryEncodable for $ty {
                #[inline]
                fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
                    encoder.$write(*self);
                    Ok(())
                }

                #[inline]
                fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
                    decoder.$read()
                }
            }
        )*
    };
}

impl_primitive! {
    u8 => write_u8, read_u8;
    i8 => write_i8, read_i8;
    u16 => write_u16, read_u16;
    i16 => write_i16, read_i16;
    u32 => write_u32, read_u32;
    i32 => write_i32, read_i32;
    u64 => write_u64, read_u64;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl BinaryEncodable for bool {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_u8(u8::from(*self));
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(decoder.read_u8()? != 0)
    }
}

/// Null strings decode as empty strings.
impl BinaryEncodable for String {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_string(self)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(decoder.read_string()?.unwrap_or_default())
    }
}

/// Null arrays decode as empty vectors. Use `Option<Vec<T>>` where the
/// distinction matters.
impl<T: BinaryEncodable> BinaryEncodable for Vec<T> {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_array(self)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(decoder.read_array()?.unwrap_or_default())
    }
}

impl<T: BinaryEncodable> BinaryEncodable for Option<Vec<T>> {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        match self {
            Some(items) => encoder.write_array(items),
            None => {
                encoder.write_null();
                Ok(())
            }
        }
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        decoder.read_array()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder<'a>(data: &'a [u8], registry: &'a TypeRegistry) -> BinaryDecoder<'a> {
        BinaryDecoder::new(data, registry, DecodingLimits::default())
    }

    #[test]
    fn test_primitives_are_little_endian() {
        let mut encoder = BinaryEncoder::new();
        encoder.write_u32(0x0403_0201);
        encoder.write_i16(-2);
        assert_eq!(encoder.as_slice(), &[0x01, 0x02, 0x03, 0x04, 0xFE, 0xFF]);
    }

    #[test]
    fn test_null_and_empty_arrays_are_distinct() {
        let registry = TypeRegistry::new();

        let mut encoder = BinaryEncoder::new();
        encoder.write(&None::<Vec<u32>>).unwrap();
        encoder.write(&Some(Vec::<u32>::new())).unwrap();
        let bytes = encoder.into_bytes();
        assert_eq!(&bytes[..], &[0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);

        let mut decoder = decoder(&bytes, &registry);
        assert_eq!(decoder.read::<Option<Vec<u32>>>().unwrap(), None);
        assert_eq!(decoder.read::<Option<Vec<u32>>>().unwrap(), Some(vec![]));
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_truncated_read_reports_offset() {
        let registry = TypeRegistry::new();
        let data = [0x01, 0x02, 0x03];
        let mut decoder = decoder(&data, &registry);
        decoder.read_u8().unwrap();

        let error = decoder.read_u32().unwrap_err();
        assert_eq!(
            error,
            CodecError::Truncated {
                offset: 1,
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn test_negative_length_rejected() {
        let registry = TypeRegistry::new();
        let data = (-5i32).to_le_bytes();
        let error = decoder(&data, &registry).read_string().unwrap_err();
        assert_eq!(error, CodecError::InvalidLength { offset: 0, length: -5 });
    }

    #[test]
    fn test_string_limit_enforced() {
        let registry = TypeRegistry::new();
        let limits = DecodingLimits {
            max_string_length: 4,
            ..DecodingLimits::default()
        };
        let mut encoder = BinaryEncoder::new();
        encoder.write_string("too long").unwrap();
        let bytes = encoder.into_bytes();

        let error = BinaryDecoder::new(&bytes, &registry, limits)
            .read_string()
            .unwrap_err();
        assert!(matches!(error, CodecError::LimitExceeded { offset: 0, length: 8, limit: 4 }));
    }

    #[test]
    fn test_invalid_utf8_offset() {
        let registry = TypeRegistry::new();
        let mut encoder = BinaryEncoder::new();
        encoder.write_byte_string(&[0xC3, 0x28]).unwrap();
        let bytes = encoder.into_bytes();

        let error = decoder(&bytes, &registry).read_string().unwrap_err();
        assert_eq!(error, CodecError::InvalidUtf8 { offset: 4 });
    }

    #[test]
    fn test_depth_limit() {
        let registry = TypeRegistry::new();
        let limits = DecodingLimits {
            max_depth: 2,
            ..DecodingLimits::default()
        };
        let mut decoder = BinaryDecoder::new(&[], &registry, limits);
        decoder.enter().unwrap();
        decoder.enter().unwrap();
        assert!(matches!(decoder.enter(), Err(CodecError::DepthExceeded { depth: 3, .. })));
    }

    #[test]
    fn test_nested_decoder_reports_absolute_offset() {
        let registry = TypeRegistry::new();
        let outer = decoder(&[], &registry);
        let body = [0x01];
        let mut nested = outer.nested(&body, 40);
        nested.read_u8().unwrap();
        let error = nested.read_u16().unwrap_err();
        assert_eq!(error.offset(), Some(41));
    }

    #[test]
    fn test_finish_detects_trailing_bytes() {
        let registry = TypeRegistry::new();
        let data = [0x00, 0x01];
        let mut decoder = decoder(&data, &registry);
        decoder.read_u8().unwrap();
        assert!(decoder.finish().is_err());
        decoder.read_u8().unwrap();
        assert!(decoder.finish().is_ok());
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport framing: message headers, handshake messages, and the chunking
//! of service messages into secure conversation chunks.
//!
//! Every transport message starts with an 8 byte header:
//!
//! ```text
//! +------+-------+-----------+
//! | type | chunk | size (LE) |
//! | 3 B  |  1 B  |    4 B    |
//! +------+-------+-----------+
//! ```
//!
//! `OPN`, `MSG` and `CLO` messages continue with the secure channel id, a
//! security header, a sequence header and the body fragment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use super::security::ChannelSecurity;
use crate::codec::{
    BinaryDecoder, BinaryEncodable, BinaryEncoder, ByteString, DecodingLimits, StatusCode,
    TypeRegistry,
};
use crate::error::{CodecResult, OpcUaError, OpcUaResult, ProtocolError};

/// Size of the transport message header.
pub const HEADER_SIZE: usize = 8;

/// Size of the sequence header.
pub const SEQUENCE_HEADER_SIZE: usize = 8;

/// Protocol version sent in `HEL`.
pub const PROTOCOL_VERSION: u32 = 0;

/// Smallest buffer size a peer may announce.
pub const MIN_BUFFER_SIZE: u32 = 8192;

/// Sequence numbers wrap to a small value before reaching `u32::MAX`.
const SEQUENCE_WRAP: u32 = u32::MAX - 1024;

// =============================================================================
// Header
// =============================================================================

/// Transport message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `HEL`
    Hello,
    /// `ACK`
    Acknowledge,
    /// `ERR`
    Error,
    /// `OPN`
    Open,
    /// `MSG`
    Message,
    /// `CLO`
    Close,
}

impl MessageType {
    /// Three byte code.
    pub const fn code(&self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::Open => b"OPN",
            Self::Message => b"MSG",
            Self::Close => b"CLO",
        }
    }

    /// Parses a three byte code.
    pub fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"HEL" => Some(Self::Hello),
            b"ACK" => Some(Self::Acknowledge),
            b"ERR" => Some(Self::Error),
            b"OPN" => Some(Self::Open),
            b"MSG" => Some(Self::Message),
            b"CLO" => Some(Self::Close),
            _ => None,
        }
    }

    /// Returns `true` for secure conversation messages.
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Open | Self::Message | Self::Close)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(self.code()).unwrap_or("???"))
    }
}

/// Position of a chunk within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// `F`: last chunk.
    Final,
    /// `C`: more chunks follow.
    Intermediate,
    /// `A`: the sender gave up on the message.
    Abort,
}

impl ChunkType {
    /// Byte code.
    pub const fn code(&self) -> u8 {
        match self {
            Self::Final => b'F',
            Self::Intermediate => b'C',
            Self::Abort => b'A',
        }
    }

    /// Parses a byte code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'F' => Some(Self::Final),
            b'C' => Some(Self::Intermediate),
            b'A' => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Transport message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message type.
    pub message_type: MessageType,
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Total size including the header.
    pub size: u32,
}

impl MessageHeader {
    /// Encodes the header.
    pub fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_raw(self.message_type.code());
        encoder.write_u8(self.chunk_type.code());
        encoder.write_u32(self.size);
    }

    /// Parses the header, checking the size against `max_size` (0 = no limit).
    pub fn parse(bytes: &[u8; HEADER_SIZE], max_size: usize) -> OpcUaResult<Self> {
        let message_type = MessageType::from_code(&bytes[..3]).ok_or_else(|| {
            ProtocolError::invalid_header(format!(
                "unknown message type {:?}",
                String::from_utf8_lossy(&bytes[..3])
            ))
        })?;
        let chunk_type = ChunkType::from_code(bytes[3]).ok_or_else(|| {
            ProtocolError::invalid_header(format!("unknown chunk type {:#04x}", bytes[3]))
        })?;
        let size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if (size as usize) < HEADER_SIZE {
            return Err(ProtocolError::invalid_header(format!("message size {} too small", size)).into());
        }
        if max_size > 0 && size as usize > max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: size as usize,
                max: max_size,
            }
            .into());
        }
        Ok(Self {
            message_type,
            chunk_type,
            size,
        })
    }

    /// Size of the data following the header.
    pub fn body_size(&self) -> usize {
        self.size as usize - HEADER_SIZE
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Buffer and message size limits negotiated by `HEL`/`ACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    /// Largest chunk this side accepts.
    pub receive_buffer_size: u32,
    /// Largest chunk this side sends.
    pub send_buffer_size: u32,
    /// Largest message (0 = no limit).
    pub max_message_size: u32,
    /// Most chunks per message (0 = no limit).
    pub max_chunk_count: u32,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 4_194_304,
            max_chunk_count: 0,
        }
    }
}

impl TransportLimits {
    /// Limits derived from the decoding limits.
    pub fn from_decoding(limits: &DecodingLimits) -> Self {
        Self {
            max_message_size: u32::try_from(limits.max_message_size).unwrap_or(u32::MAX),
            ..Self::default()
        }
    }

    /// Combines the local limits with the server's acknowledgement.
    ///
    /// The result describes what this side may send (`send_*`,
    /// `max_message_size`, `max_chunk_count` from the server) and receive.
    pub fn negotiate(&self, ack: &AcknowledgeMessage) -> OpcUaResult<Self> {
        if ack.receive_buffer_size < MIN_BUFFER_SIZE || ack.send_buffer_size < MIN_BUFFER_SIZE {
            return Err(ProtocolError::invalid_header(format!(
                "server buffer sizes {}/{} below minimum {}",
                ack.receive_buffer_size, ack.send_buffer_size, MIN_BUFFER_SIZE
            ))
            .into());
        }
        Ok(Self {
            receive_buffer_size: self.receive_buffer_size.min(ack.send_buffer_size),
            send_buffer_size: self.send_buffer_size.min(ack.receive_buffer_size),
            max_message_size: ack.max_message_size,
            max_chunk_count: ack.max_chunk_count,
        })
    }
}

/// `HEL` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    /// Protocol version.
    pub protocol_version: u32,
    /// Largest chunk the client accepts.
    pub receive_buffer_size: u32,
    /// Largest chunk the client sends.
    pub send_buffer_size: u32,
    /// Largest response message (0 = no limit).
    pub max_message_size: u32,
    /// Most chunks per response (0 = no limit).
    pub max_chunk_count: u32,
    /// Endpoint the client connects to.
    pub endpoint_url: String,
}

impl HelloMessage {
    /// Hello announcing `limits` for `endpoint_url`.
    pub fn new(endpoint_url: impl Into<String>, limits: &TransportLimits) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: limits.receive_buffer_size,
            send_buffer_size: limits.send_buffer_size,
            max_message_size: limits.max_message_size,
            max_chunk_count: limits.max_chunk_count,
            endpoint_url: endpoint_url.into(),
        }
    }
}

impl BinaryEncodable for HelloMessage {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_u32(self.protocol_version);
        encoder.write_u32(self.receive_buffer_size);
        encoder.write_u32(self.send_buffer_size);
        encoder.write_u32(self.max_message_size);
        encoder.write_u32(self.max_chunk_count);
        encoder.write_string(&self.endpoint_url)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            protocol_version: decoder.read_u32()?,
            receive_buffer_size: decoder.read_u32()?,
            send_buffer_size: decoder.read_u32()?,
            max_message_size: decoder.read_u32()?,
            max_chunk_count: decoder.read_u32()?,
            endpoint_url: String::decode(decoder)?,
        })
    }
}

/// `ACK` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeMessage {
    /// Protocol version.
    pub protocol_version: u32,
    /// Largest chunk the server accepts.
    pub receive_buffer_size: u32,
    /// Largest chunk the server sends.
    pub send_buffer_size: u32,
    /// Largest request message (0 = no limit).
    pub max_message_size: u32,
    /// Most chunks per request (0 = no limit).
    pub max_chunk_count: u32,
}

impl BinaryEncodable for AcknowledgeMessage {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_u32(self.protocol_version);
        encoder.write_u32(self.receive_buffer_size);
        encoder.write_u32(self.send_buffer_size);
        encoder.write_u32(self.max_message_size);
        encoder.write_u32(self.max_chunk_count);
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            protocol_version: decoder.read_u32()?,
            receive_buffer_size: decoder.read_u32()?,
            send_buffer_size: decoder.read_u32()?,
            max_message_size: decoder.read_u32()?,
            max_chunk_count: decoder.read_u32()?,
        })
    }
}

/// `ERR` body, also the body of an abort chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Error code.
    pub error: StatusCode,
    /// Reason text.
    pub reason: String,
}

impl BinaryEncodable for ErrorMessage {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        self.error.encode(encoder)?;
        encoder.write_string(&self.reason)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            error: StatusCode::decode(decoder)?,
            reason: String::decode(decoder)?,
        })
    }
}

/// Encodes a complete handshake message (`HEL`, `ACK` or `ERR`).
pub fn encode_handshake<T: BinaryEncodable>(
    message_type: MessageType,
    body: &T,
) -> OpcUaResult<Bytes> {
    let mut encoder = BinaryEncoder::new();
    MessageHeader {
        message_type,
        chunk_type: ChunkType::Final,
        size: 0,
    }
    .encode(&mut encoder);
    body.encode(&mut encoder)?;
    let size = u32::try_from(encoder.len())
        .map_err(|_| ProtocolError::MessageTooLarge { size: encoder.len(), max: u32::MAX as usize })?;
    encoder.patch_u32(4, size);
    Ok(encoder.into_bytes())
}

/// Decodes a handshake body.
pub fn decode_handshake<T: BinaryEncodable>(body: &[u8]) -> OpcUaResult<T> {
    let registry = TypeRegistry::new();
    let mut decoder = BinaryDecoder::new(body, &registry, DecodingLimits::default());
    let value = T::decode(&mut decoder)?;
    Ok(value)
}

// =============================================================================
// Secure conversation chunks
// =============================================================================

/// Security header of an `OPN` chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AsymmetricSecurityHeader {
    /// Security policy URI.
    pub security_policy_uri: String,
    /// Sender certificate.
    pub sender_certificate: ByteString,
    /// Thumbprint of the receiver certificate.
    pub receiver_certificate_thumbprint: ByteString,
}

/// Security header of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityHeader {
    /// Used by `OPN`.
    Asymmetric(AsymmetricSecurityHeader),
    /// Used by `MSG` and `CLO`: the channel token id.
    Symmetric(u32),
}

impl SecurityHeader {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        match self {
            Self::Asymmetric(header) => {
                encoder.write_string(&header.security_policy_uri)?;
                header.sender_certificate.encode(encoder)?;
                header.receiver_certificate_thumbprint.encode(encoder)
            }
            Self::Symmetric(token_id) => {
                encoder.write_u32(*token_id);
                Ok(())
            }
        }
    }

    fn decode(message_type: MessageType, decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        if message_type == MessageType::Open {
            Ok(Self::Asymmetric(AsymmetricSecurityHeader {
                security_policy_uri: String::decode(decoder)?,
                sender_certificate: ByteString::decode(decoder)?,
                receiver_certificate_thumbprint: ByteString::decode(decoder)?,
            }))
        } else {
            Ok(Self::Symmetric(decoder.read_u32()?))
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Asymmetric(header) => {
                12 + header.security_policy_uri.len()
                    + header.sender_certificate.as_bytes().len()
                    + header.receiver_certificate_thumbprint.as_bytes().len()
            }
            Self::Symmetric(_) => 4,
        }
    }
}

/// One decoded secure conversation chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Transport header.
    pub header: MessageHeader,
    /// Secure channel id.
    pub secure_channel_id: u32,
    /// Security header.
    pub security: SecurityHeader,
    /// Chunk sequence number.
    pub sequence_number: u32,
    /// Request id the chunk belongs to.
    pub request_id: u32,
    /// Body fragment.
    pub body: Bytes,
}

impl Chunk {
    /// Decodes the part after the transport header, verifying and stripping
    /// message security.
    pub fn decode(
        header: MessageHeader,
        data: &[u8],
        security: &dyn ChannelSecurity,
    ) -> OpcUaResult<Self> {
        let registry = TypeRegistry::new();
        let mut decoder = BinaryDecoder::new(data, &registry, DecodingLimits::default());
        let secure_channel_id = decoder.read_u32()?;
        let security_header = SecurityHeader::decode(header.message_type, &mut decoder)?;
        let protected_from = decoder.position();
        let plain = security.unprotect(header.message_type, &data[protected_from..])?;

        let mut decoder = BinaryDecoder::new(&plain, &registry, DecodingLimits::default());
        let sequence_number = decoder.read_u32()?;
        let request_id = decoder.read_u32()?;
        let body = Bytes::copy_from_slice(&plain[decoder.position()..]);
        Ok(Self {
            header,
            secure_channel_id,
            security: security_header,
            sequence_number,
            request_id,
            body,
        })
    }
}

/// Splits outgoing messages into chunks and numbers them.
#[derive(Debug)]
pub struct ChunkWriter {
    security: Arc<dyn ChannelSecurity>,
    limits: TransportLimits,
    secure_channel_id: u32,
    next_sequence: u32,
}

impl ChunkWriter {
    /// Creates a writer for the negotiated `limits`.
    pub fn new(security: Arc<dyn ChannelSecurity>, limits: TransportLimits) -> Self {
        Self {
            security,
            limits,
            secure_channel_id: 0,
            next_sequence: 1,
        }
    }

    /// Sets the channel id assigned by the server.
    pub fn set_channel_id(&mut self, secure_channel_id: u32) {
        self.secure_channel_id = secure_channel_id;
    }

    /// Channel id in use.
    pub fn channel_id(&self) -> u32 {
        self.secure_channel_id
    }

    /// Splits `body` into encoded chunks.
    pub fn write(
        &mut self,
        message_type: MessageType,
        security_header: &SecurityHeader,
        request_id: u32,
        body: &[u8],
    ) -> OpcUaResult<Vec<Bytes>> {
        let max_message = self.limits.max_message_size as usize;
        if max_message > 0 && body.len() > max_message {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len(),
                max: max_message,
            }
            .into());
        }

        let fixed = HEADER_SIZE
            + 4
            + security_header.encoded_len()
            + SEQUENCE_HEADER_SIZE
            + self.security.overhead(message_type);
        let capacity = (self.limits.send_buffer_size as usize)
            .checked_sub(fixed)
            .filter(|c| *c > 0)
            .ok_or_else(|| {
                ProtocolError::invalid_header(format!(
                    "send buffer of {} bytes cannot hold a chunk",
                    self.limits.send_buffer_size
                ))
            })?;

        let count = body.len().div_ceil(capacity).max(1);
        let max_chunks = self.limits.max_chunk_count as usize;
        if max_chunks > 0 && count > max_chunks {
            return Err(ProtocolError::TooManyChunks { max: max_chunks }.into());
        }

        let mut chunks = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * capacity;
            let end = (start + capacity).min(body.len());
            let chunk_type = if index + 1 == count {
                ChunkType::Final
            } else {
                ChunkType::Intermediate
            };
            chunks.push(self.encode_chunk(
                message_type,
                chunk_type,
                security_header,
                request_id,
                &body[start..end],
            )?);
        }
        Ok(chunks)
    }

    fn encode_chunk(
        &mut self,
        message_type: MessageType,
        chunk_type: ChunkType,
        security_header: &SecurityHeader,
        request_id: u32,
        fragment: &[u8],
    ) -> OpcUaResult<Bytes> {
        let mut encoder = BinaryEncoder::with_capacity(HEADER_SIZE + 64 + fragment.len());
        MessageHeader {
            message_type,
            chunk_type,
            size: 0,
        }
        .encode(&mut encoder);
        encoder.write_u32(self.secure_channel_id);
        security_header.encode(&mut encoder)?;
        let mut plain = BinaryEncoder::with_capacity(SEQUENCE_HEADER_SIZE + fragment.len());
        plain.write_u32(self.take_sequence());
        plain.write_u32(request_id);
        plain.write_raw(fragment);
        let protected = self.security.protect(message_type, plain.as_slice())?;
        encoder.write_raw(&protected);

        let size = u32::try_from(encoder.len()).map_err(|_| ProtocolError::MessageTooLarge {
            size: encoder.len(),
            max: u32::MAX as usize,
        })?;
        encoder.patch_u32(4, size);
        Ok(encoder.into_bytes())
    }

    fn take_sequence(&mut self) -> u32 {
        let current = self.next_sequence;
        self.next_sequence = if current >= SEQUENCE_WRAP { 1 } else { current + 1 };
        current
    }
}

/// Outcome of feeding a chunk to the [`ChunkAssembler`].
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    /// More chunks are needed.
    Pending,
    /// A complete message body.
    Complete {
        /// Message type.
        message_type: MessageType,
        /// Request id.
        request_id: u32,
        /// Reassembled body.
        body: Bytes,
    },
    /// The sender aborted the message.
    Aborted {
        /// Request id.
        request_id: u32,
        /// Abort status.
        status: StatusCode,
        /// Abort reason.
        reason: String,
    },
}

#[derive(Debug)]
struct PartialMessage {
    message_type: MessageType,
    chunks: usize,
    body: BytesMut,
}

/// Reassembles incoming chunks per request id.
#[derive(Debug)]
pub struct ChunkAssembler {
    partial: HashMap<u32, PartialMessage>,
    max_message_size: usize,
    max_chunk_count: usize,
    last_sequence: Option<u32>,
}

impl ChunkAssembler {
    /// Creates an assembler enforcing the given limits (0 = no limit).
    pub fn new(max_message_size: usize, max_chunk_count: usize) -> Self {
        Self {
            partial: HashMap::new(),
            max_message_size,
            max_chunk_count,
            last_sequence: None,
        }
    }

    /// Adds a chunk.
    pub fn push(&mut self, chunk: Chunk) -> OpcUaResult<Assembled> {
        self.check_sequence(chunk.sequence_number)?;
        let request_id = chunk.request_id;

        if chunk.header.chunk_type == ChunkType::Abort {
            self.partial.remove(&request_id);
            let abort: ErrorMessage = decode_handshake(&chunk.body)?;
            return Ok(Assembled::Aborted {
                request_id,
                status: abort.error,
                reason: abort.reason,
            });
        }

        let partial = self.partial.entry(request_id).or_insert_with(|| PartialMessage {
            message_type: chunk.header.message_type,
            chunks: 0,
            body: BytesMut::new(),
        });
        partial.chunks += 1;
        partial.body.extend_from_slice(&chunk.body);

        let too_many = self.max_chunk_count > 0 && partial.chunks > self.max_chunk_count;
        let too_large = self.max_message_size > 0 && partial.body.len() > self.max_message_size;
        if too_many || too_large {
            let size = partial.body.len();
            self.partial.remove(&request_id);
            return Err(if too_many {
                ProtocolError::TooManyChunks {
                    max: self.max_chunk_count,
                }
            } else {
                ProtocolError::MessageTooLarge {
                    size,
                    max: self.max_message_size,
                }
            }
            .into());
        }

        if chunk.header.chunk_type == ChunkType::Intermediate {
            return Ok(Assembled::Pending);
        }
        match self.partial.remove(&request_id) {
            Some(done) => Ok(Assembled::Complete {
                message_type: done.message_type,
                request_id,
                body: done.body.freeze(),
            }),
            None => Ok(Assembled::Pending),
        }
    }

    /// Drops partially received messages.
    pub fn clear(&mut self) {
        self.partial.clear();
    }

    fn check_sequence(&mut self, sequence_number: u32) -> OpcUaResult<()> {
        if let Some(last) = self.last_sequence {
            let wrapped = last >= SEQUENCE_WRAP && sequence_number < 1024;
            if sequence_number != last.wrapping_add(1) && !wrapped {
                return Err(OpcUaError::service_fault(
                    "SecureChannel",
                    StatusCode::BAD_SEQUENCE_NUMBER_INVALID,
                ));
            }
        }
        self.last_sequence = Some(sequence_number);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::security::NoSecurity;

    fn limits(send_buffer_size: u32) -> TransportLimits {
        TransportLimits {
            send_buffer_size,
            ..TransportLimits::default()
        }
    }

    fn parse_all(chunks: &[Bytes]) -> Vec<Chunk> {
        chunks
            .iter()
            .map(|raw| {
                let header_bytes: [u8; HEADER_SIZE] = raw[..HEADER_SIZE].try_into().unwrap();
                let header = MessageHeader::parse(&header_bytes, 0).unwrap();
                assert_eq!(header.size as usize, raw.len());
                Chunk::decode(header, &raw[HEADER_SIZE..], &NoSecurity).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_header_parse() {
        let bytes = *b"MSGF\x20\x00\x00\x00";
        let header = MessageHeader::parse(&bytes, 0).unwrap();
        assert_eq!(header.message_type, MessageType::Message);
        assert_eq!(header.chunk_type, ChunkType::Final);
        assert_eq!(header.body_size(), 24);

        assert!(MessageHeader::parse(b"XYZF\x20\x00\x00\x00", 0).is_err());
        assert!(MessageHeader::parse(&bytes, 16).is_err());
    }

    #[test]
    fn test_hello_round_trip() {
        let hello = HelloMessage::new("opc.tcp://plant:4840", &TransportLimits::default());
        let bytes = encode_handshake(MessageType::Hello, &hello).unwrap();
        assert_eq!(&bytes[..4], b"HELF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize, bytes.len());
        let decoded: HelloMessage = decode_handshake(&bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn test_negotiate_takes_minimum() {
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 16_384,
            send_buffer_size: 131_072,
            max_message_size: 1_000_000,
            max_chunk_count: 16,
        };
        let negotiated = TransportLimits::default().negotiate(&ack).unwrap();
        assert_eq!(negotiated.send_buffer_size, 16_384);
        assert_eq!(negotiated.receive_buffer_size, 65_535);
        assert_eq!(negotiated.max_chunk_count, 16);

        let tiny = AcknowledgeMessage {
            receive_buffer_size: 1024,
            ..ack
        };
        assert!(TransportLimits::default().negotiate(&tiny).is_err());
    }

    #[test]
    fn test_split_and_reassemble() {
        let mut writer = ChunkWriter::new(Arc::new(NoSecurity), limits(8192));
        writer.set_channel_id(5);
        let body: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let chunks = writer
            .write(MessageType::Message, &SecurityHeader::Symmetric(2), 77, &body)
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 8192));

        let mut assembler = ChunkAssembler::new(0, 0);
        let mut result = Assembled::Pending;
        for chunk in parse_all(&chunks) {
            assert_eq!(chunk.secure_channel_id, 5);
            result = assembler.push(chunk).unwrap();
        }
        match result {
            Assembled::Complete {
                request_id, body: assembled, ..
            } => {
                assert_eq!(request_id, 77);
                assert_eq!(&assembled[..], &body[..]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chunk_limits_enforced() {
        let mut writer = ChunkWriter::new(
            Arc::new(NoSecurity),
            TransportLimits {
                max_chunk_count: 2,
                ..limits(8192)
            },
        );
        let body = vec![0u8; 20_000];
        let error = writer
            .write(MessageType::Message, &SecurityHeader::Symmetric(1), 1, &body)
            .unwrap_err();
        assert!(matches!(
            error,
            OpcUaError::Protocol(ProtocolError::TooManyChunks { max: 2 })
        ));

        let mut writer = ChunkWriter::new(Arc::new(NoSecurity), limits(8192));
        let chunks = writer
            .write(MessageType::Message, &SecurityHeader::Symmetric(1), 1, &body)
            .unwrap();
        let mut assembler = ChunkAssembler::new(10_000, 0);
        let mut outcome = Ok(Assembled::Pending);
        for chunk in parse_all(&chunks) {
            outcome = assembler.push(chunk);
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(
            outcome,
            Err(OpcUaError::Protocol(ProtocolError::MessageTooLarge { .. }))
        ));
    }

    #[test]
    fn test_abort_chunk() {
        let mut writer = ChunkWriter::new(Arc::new(NoSecurity), limits(8192));
        let mut encoder = BinaryEncoder::new();
        ErrorMessage {
            error: StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            reason: "too big".into(),
        }
        .encode(&mut encoder)
        .unwrap();
        let mut raw = writer
            .write(MessageType::Message, &SecurityHeader::Symmetric(1), 9, encoder.as_slice())
            .unwrap()
            .remove(0)
            .to_vec();
        raw[3] = b'A';
        let header = MessageHeader::parse(&raw[..HEADER_SIZE].try_into().unwrap(), 0).unwrap();
        let chunk = Chunk::decode(header, &raw[HEADER_SIZE..], &NoSecurity).unwrap();

        let mut assembler = ChunkAssembler::new(0, 0);
        assert_eq!(
            assembler.push(chunk).unwrap(),
            Assembled::Aborted {
                request_id: 9,
                status: StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
                reason: "too big".into(),
            }
        );
    }

    #[test]
    fn test_sequence_gap_rejected() {
        let mut writer = ChunkWriter::new(Arc::new(NoSecurity), limits(8192));
        let first = writer
            .write(MessageType::Message, &SecurityHeader::Symmetric(1), 1, b"a")
            .unwrap();
        let _skipped = writer
            .write(MessageType::Message, &SecurityHeader::Symmetric(1), 2, b"b")
            .unwrap();
        let third = writer
            .write(MessageType::Message, &SecurityHeader::Symmetric(1), 3, b"c")
            .unwrap();

        let mut assembler = ChunkAssembler::new(0, 0);
        assembler.push(parse_all(&first).remove(0)).unwrap();
        assert!(assembler.push(parse_all(&third).remove(0)).is_err());
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One secure channel over one byte stream.
//!
//! [`SecureChannel::open`] runs the `HEL`/`ACK` handshake, opens the channel
//! with `OPN` and then starts two tasks:
//!
//! - a reader that reassembles chunks and completes pending requests by
//!   request id
//! - a renewal task that renews the security token at 75% of its lifetime
//!
//! Any read failure, `ERR` message or security check failure faults the
//! channel and fails every pending request with that error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::message::{
    decode_handshake, encode_handshake, AcknowledgeMessage, Assembled, Chunk, ChunkAssembler,
    ChunkWriter, ErrorMessage, HelloMessage, MessageHeader, MessageType, SecurityHeader,
    TransportLimits, HEADER_SIZE, PROTOCOL_VERSION,
};
use super::security::ChannelSecurity;
use super::transport::{ByteStream, Connector, EndpointUrl};
use super::ChannelState;
use crate::codec::{BinaryDecoder, BinaryEncoder, NodeId, StatusCode, WireCodec};
use crate::error::{OpcUaError, OpcUaResult, ProtocolError, TimeoutError, TransportError};
use crate::services::{
    ChannelSecurityToken, CloseSecureChannelRequest, OpenSecureChannelRequest, RequestHeader,
    SecurityTokenRequestType, ServiceCall, ServiceRequest, ServiceResponse,
};
use crate::types::ClientConfig;

/// Fraction of the token lifetime after which the token is renewed.
const RENEW_AT: f64 = 0.75;

/// Lower bound for the renewal delay.
const MIN_RENEW_DELAY: Duration = Duration::from_secs(1);

type PendingReply = oneshot::Sender<OpcUaResult<ServiceResponse>>;

// =============================================================================
// ChannelConfig
// =============================================================================

/// Settings for opening a secure channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Endpoint.
    pub endpoint: EndpointUrl,
    /// Requested security token lifetime.
    pub requested_lifetime: Duration,
    /// Timeout for the handshake and `OPN` requests.
    pub request_timeout: Duration,
    /// Local buffer and message limits announced in `HEL`.
    pub limits: TransportLimits,
}

impl ChannelConfig {
    /// Default settings for `endpoint`.
    pub fn new(endpoint: EndpointUrl) -> Self {
        Self {
            endpoint,
            requested_lifetime: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            limits: TransportLimits::default(),
        }
    }

    /// Derives channel settings from the client configuration.
    pub fn from_client(config: &ClientConfig) -> OpcUaResult<Self> {
        Ok(Self {
            endpoint: EndpointUrl::parse(&config.endpoint)?,
            requested_lifetime: config.channel_lifetime,
            request_timeout: config.request_timeout,
            limits: TransportLimits::from_decoding(&config.limits),
        })
    }
}

// =============================================================================
// SecureChannel
// =============================================================================

/// An open secure channel.
///
/// Requests may be sent concurrently; responses are matched by request id.
pub struct SecureChannel {
    inner: Arc<ChannelInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct WriteState {
    stream: WriteHalf<Box<dyn ByteStream>>,
    chunks: ChunkWriter,
}

struct ChannelInner {
    config: ChannelConfig,
    codec: WireCodec,
    security: Arc<dyn ChannelSecurity>,
    negotiated: TransportLimits,
    writer: tokio::sync::Mutex<WriteState>,
    pending: Mutex<HashMap<u32, PendingReply>>,
    token: RwLock<ChannelSecurityToken>,
    next_request_id: AtomicU32,
    next_handle: AtomicU32,
    state: watch::Sender<ChannelState>,
}

impl SecureChannel {
    /// Connects, runs the handshake and opens the channel.
    pub async fn open(
        connector: &dyn Connector,
        config: ChannelConfig,
        security: Arc<dyn ChannelSecurity>,
        codec: WireCodec,
    ) -> OpcUaResult<Self> {
        tracing::info!(
            endpoint = %config.endpoint,
            policy = security.policy().name(),
            mode = security.mode().name(),
            "Opening secure channel"
        );

        let mut stream = connector.connect(&config.endpoint).await?;
        let negotiated = tokio::time::timeout(config.request_timeout, handshake(&mut stream, &config))
            .await
            .map_err(|_| TimeoutError::connection(config.request_timeout))??;
        tracing::debug!(
            send_buffer = negotiated.send_buffer_size,
            receive_buffer = negotiated.receive_buffer_size,
            max_message = negotiated.max_message_size,
            max_chunks = negotiated.max_chunk_count,
            "Transport limits negotiated"
        );

        let (reader, writer) = tokio::io::split(stream);
        let (state, _) = watch::channel(ChannelState::Connecting);
        let inner = Arc::new(ChannelInner {
            writer: tokio::sync::Mutex::new(WriteState {
                stream: writer,
                chunks: ChunkWriter::new(Arc::clone(&security), negotiated),
            }),
            config,
            codec,
            security,
            negotiated,
            pending: Mutex::new(HashMap::new()),
            token: RwLock::new(ChannelSecurityToken::default()),
            next_request_id: AtomicU32::new(1),
            next_handle: AtomicU32::new(1),
            state,
        });

        let channel = Self {
            tasks: Mutex::new(vec![tokio::spawn(read_loop(Arc::clone(&inner), reader))]),
            inner,
        };

        if let Err(e) = channel.inner.open_token(SecurityTokenRequestType::Issue).await {
            channel.abort_tasks();
            return Err(e);
        }
        channel.inner.set_state(ChannelState::Open);
        channel
            .tasks
            .lock()
            .push(tokio::spawn(renew_loop(Arc::clone(&channel.inner))));

        let token = channel.token();
        tracing::info!(
            endpoint = %channel.inner.config.endpoint,
            channel_id = token.channel_id,
            token_id = token.token_id,
            lifetime_ms = token.revised_lifetime,
            "Secure channel open"
        );
        Ok(channel)
    }

    /// Sends a request and waits for its response.
    pub async fn send(
        &self,
        request: ServiceRequest,
        timeout: Duration,
    ) -> OpcUaResult<ServiceResponse> {
        let state = self.state();
        if !state.is_open() {
            return Err(TransportError::NotConnected.into());
        }
        self.inner.request(request, timeout).await
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Receiver for state changes.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Current security token.
    pub fn token(&self) -> ChannelSecurityToken {
        self.inner.token.read().clone()
    }

    /// Limits negotiated with the server.
    pub fn limits(&self) -> TransportLimits {
        self.inner.negotiated
    }

    /// Endpoint of the channel.
    pub fn endpoint(&self) -> &EndpointUrl {
        &self.inner.config.endpoint
    }

    /// Sends `CLO` and shuts the channel down.
    ///
    /// Pending requests fail with `BadSecureChannelClosed`.
    pub async fn close(&self) {
        if self.state().is_open() {
            let request = CloseSecureChannelRequest {
                request_header: self.inner.header(),
            };
            let request_id = self.inner.next_request_id();
            if let Err(e) = self.inner.write_request(&request.into(), request_id).await {
                tracing::debug!(error = %e, "Failed to send CloseSecureChannel");
            }
            let mut writer = self.inner.writer.lock().await;
            let _ = writer.stream.shutdown().await;
        }
        self.inner.set_state(ChannelState::Closed);
        self.abort_tasks();
        self.inner.fail_pending(&OpcUaError::service_fault(
            "SecureChannel",
            StatusCode::BAD_SECURE_CHANNEL_CLOSED,
        ));
        tracing::info!(endpoint = %self.inner.config.endpoint, "Secure channel closed");
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("endpoint", &self.inner.config.endpoint.url)
            .field("state", &self.state())
            .field("channel_id", &self.inner.token.read().channel_id)
            .finish()
    }
}

// =============================================================================
// ChannelInner
// =============================================================================

impl ChannelInner {
    fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn header(&self) -> RequestHeader {
        let timeout_hint = u32::try_from(self.config.request_timeout.as_millis()).unwrap_or(u32::MAX);
        RequestHeader::new(
            NodeId::null(),
            self.next_handle.fetch_add(1, Ordering::Relaxed),
            timeout_hint,
        )
    }

    fn set_state(&self, new_state: ChannelState) {
        self.state.send_if_modified(|state| {
            if *state == new_state || (*state == ChannelState::Closed && new_state.is_faulted()) {
                return false;
            }
            tracing::trace!(old_state = %state, new_state = %new_state, "Channel state changed");
            *state = new_state;
            true
        });
    }

    async fn request(
        &self,
        request: ServiceRequest,
        timeout: Duration,
    ) -> OpcUaResult<ServiceResponse> {
        let service = request.name();
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        if let Err(e) = self.write_request(&request, request_id).await {
            self.pending.lock().remove(&request_id);
            return Err(e);
        }
        tracing::trace!(service, request_id, "Request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::closed("secure channel dropped the request").into()),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(OpcUaError::request_timeout(service, timeout))
            }
        }
    }

    async fn write_request(&self, request: &ServiceRequest, request_id: u32) -> OpcUaResult<()> {
        let mut encoder = BinaryEncoder::new();
        request.encode_message(&mut encoder)?;

        let token_id = self.token.read().token_id;
        let (message_type, security_header) = match request {
            ServiceRequest::OpenSecureChannel(_) => (
                MessageType::Open,
                SecurityHeader::Asymmetric(self.security.asymmetric_header()),
            ),
            ServiceRequest::CloseSecureChannel(_) => {
                (MessageType::Close, SecurityHeader::Symmetric(token_id))
            }
            _ => (MessageType::Message, SecurityHeader::Symmetric(token_id)),
        };

        let mut writer = self.writer.lock().await;
        let chunks = writer
            .chunks
            .write(message_type, &security_header, request_id, encoder.as_slice())?;
        for chunk in chunks {
            writer.stream.write_all(&chunk).await?;
        }
        writer.stream.flush().await?;
        Ok(())
    }

    async fn open_token(&self, request_type: SecurityTokenRequestType) -> OpcUaResult<()> {
        let client_nonce = self.security.create_nonce();
        let request = OpenSecureChannelRequest {
            request_header: self.header(),
            client_protocol_version: PROTOCOL_VERSION,
            request_type,
            security_mode: self.security.mode(),
            client_nonce: client_nonce.clone(),
            requested_lifetime: u32::try_from(self.config.requested_lifetime.as_millis())
                .unwrap_or(u32::MAX),
        };

        let response = self
            .request(request.into(), self.config.request_timeout)
            .await?;
        let response = match OpenSecureChannelRequest::extract(response) {
            Ok(response) => response,
            Err(ServiceResponse::ServiceFault(fault)) => {
                return Err(OpcUaError::service_fault(
                    OpenSecureChannelRequest::NAME,
                    fault.response_header.service_result,
                ))
            }
            Err(other) => {
                return Err(
                    ProtocolError::unexpected_response(OpenSecureChannelRequest::NAME, other.name())
                        .into(),
                )
            }
        };
        let status = response.response_header.service_result;
        if status.is_bad() {
            return Err(OpcUaError::service_fault(OpenSecureChannelRequest::NAME, status));
        }

        self.security
            .derive_keys(&client_nonce, &response.server_nonce)?;
        self.writer
            .lock()
            .await
            .chunks
            .set_channel_id(response.security_token.channel_id);
        *self.token.write() = response.security_token;
        Ok(())
    }

    fn handle_message(
        &self,
        header: MessageHeader,
        body: &[u8],
        assembler: &mut ChunkAssembler,
    ) -> OpcUaResult<()> {
        match header.message_type {
            MessageType::Error => {
                let error: ErrorMessage = decode_handshake(body)?;
                Err(TransportError::server_error(error.error, error.reason).into())
            }
            message_type if message_type.is_secure() => {
                let chunk = Chunk::decode(header, body, self.security.as_ref())?;
                let channel_id = self.token.read().channel_id;
                if channel_id != 0 && chunk.secure_channel_id != channel_id {
                    return Err(OpcUaError::service_fault(
                        "SecureChannel",
                        StatusCode::BAD_SECURE_CHANNEL_ID_INVALID,
                    ));
                }
                match assembler.push(chunk)? {
                    Assembled::Pending => {}
                    Assembled::Complete {
                        request_id, body, ..
                    } => {
                        let mut decoder =
                            BinaryDecoder::new(&body, self.codec.registry(), self.codec.limits());
                        let result = ServiceResponse::decode_message(&mut decoder)
                            .map_err(OpcUaError::from);
                        self.complete(request_id, result);
                    }
                    Assembled::Aborted {
                        request_id,
                        status,
                        reason,
                    } => {
                        tracing::warn!(request_id, status = %status, reason = %reason, "Response aborted by server");
                        self.complete(
                            request_id,
                            Err(ProtocolError::ChunkAborted {
                                request_id,
                                status,
                                reason,
                            }
                            .into()),
                        );
                    }
                }
                Ok(())
            }
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "OPN, MSG or ERR".to_string(),
                actual: other.to_string(),
            }
            .into()),
        }
    }

    fn complete(&self, request_id: u32, result: OpcUaResult<ServiceResponse>) {
        match self.pending.lock().remove(&request_id) {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => tracing::debug!(request_id, "Response for unknown or expired request"),
        }
    }

    fn fail_pending(&self, error: &OpcUaError) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, reply) in pending {
            let _ = reply.send(Err(error.clone()));
        }
    }

    fn fault(&self, error: OpcUaError) {
        if *self.state.borrow() == ChannelState::Closed {
            return;
        }
        error.log("Secure channel");
        self.set_state(ChannelState::Faulted);
        self.fail_pending(&error);
    }
}

// =============================================================================
// Tasks and helpers
// =============================================================================

/// Reads one transport message (header and body).
pub(crate) async fn read_message<R>(
    reader: &mut R,
    max_size: usize,
) -> OpcUaResult<(MessageHeader, Vec<u8>)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let header = MessageHeader::parse(&header, max_size)?;
    let mut body = vec![0u8; header.body_size()];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

async fn handshake(
    stream: &mut Box<dyn ByteStream>,
    config: &ChannelConfig,
) -> OpcUaResult<TransportLimits> {
    let hello = HelloMessage::new(config.endpoint.url.clone(), &config.limits);
    stream
        .write_all(&encode_handshake(MessageType::Hello, &hello)?)
        .await?;
    stream.flush().await?;

    let (header, body) = read_message(stream, config.limits.receive_buffer_size as usize).await?;
    match header.message_type {
        MessageType::Acknowledge => {
            let ack: AcknowledgeMessage = decode_handshake(&body)?;
            config.limits.negotiate(&ack)
        }
        MessageType::Error => {
            let error: ErrorMessage = decode_handshake(&body)?;
            Err(TransportError::server_error(error.error, error.reason).into())
        }
        other => Err(ProtocolError::UnexpectedMessage {
            expected: "ACK".to_string(),
            actual: other.to_string(),
        }
        .into()),
    }
}

async fn read_loop(inner: Arc<ChannelInner>, mut reader: ReadHalf<Box<dyn ByteStream>>) {
    let max_chunk = inner.negotiated.receive_buffer_size as usize;
    let mut assembler = ChunkAssembler::new(
        inner.config.limits.max_message_size as usize,
        inner.config.limits.max_chunk_count as usize,
    );

    let error = loop {
        let (header, body) = match read_message(&mut reader, max_chunk).await {
            Ok(message) => message,
            Err(e) => break e,
        };
        if let Err(e) = inner.handle_message(header, &body, &mut assembler) {
            break e;
        }
    };
    inner.fault(error);
}

async fn renew_loop(inner: Arc<ChannelInner>) {
    loop {
        let lifetime = match inner.token.read().revised_lifetime {
            0 => inner.config.requested_lifetime,
            ms => Duration::from_millis(u64::from(ms)),
        };
        tokio::time::sleep(lifetime.mul_f64(RENEW_AT).max(MIN_RENEW_DELAY)).await;

        inner.set_state(ChannelState::Renewing);
        match inner.open_token(SecurityTokenRequestType::Renew).await {
            Ok(()) => {
                let token = inner.token.read().clone();
                tracing::debug!(
                    channel_id = token.channel_id,
                    token_id = token.token_id,
                    lifetime_ms = token.revised_lifetime,
                    "Security token renewed"
                );
                inner.set_state(ChannelState::Open);
            }
            Err(e) => {
                inner.fault(e);
                return;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::security::NoSecurity;
    use crate::codec::{DataValue, DateTime, DecodingLimits, Variant};
    use crate::services::{
        OpenSecureChannelResponse, ReadRequest, ReadResponse, ReadValueId, ResponseHeader,
        ServiceFault,
    };
    use async_trait::async_trait;
    use tokio::io::DuplexStream;

    #[derive(Debug)]
    struct DuplexConnector(Mutex<Option<DuplexStream>>);

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self, _endpoint: &EndpointUrl) -> OpcUaResult<Box<dyn ByteStream>> {
            match self.0.lock().take() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(TransportError::NotConnected.into()),
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Normal,
        RejectHello,
        DropOnRead,
        ShortLifetime,
    }

    async fn fake_server(mut stream: DuplexStream, behavior: Behavior) {
        let codec = WireCodec::standard();
        let (header, _) = read_message(&mut stream, 0).await.unwrap();
        assert_eq!(header.message_type, MessageType::Hello);
        if behavior == Behavior::RejectHello {
            let error = ErrorMessage {
                error: StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
                reason: "no".into(),
            };
            let bytes = encode_handshake(MessageType::Error, &error).unwrap();
            stream.write_all(&bytes).await.unwrap();
            return;
        }
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        let bytes = encode_handshake(MessageType::Acknowledge, &ack).unwrap();
        stream.write_all(&bytes).await.unwrap();

        let mut writer = ChunkWriter::new(Arc::new(NoSecurity), TransportLimits::default());
        writer.set_channel_id(7);
        let mut tokens = 0;
        while let Ok((header, body)) = read_message(&mut stream, 0).await {
            let chunk = Chunk::decode(header, &body, &NoSecurity).unwrap();
            let mut decoder =
                BinaryDecoder::new(&chunk.body, codec.registry(), DecodingLimits::default());
            let request = ServiceRequest::decode_message(&mut decoder).unwrap();
            let handle = request.header().request_handle;
            let response: ServiceResponse = match request {
                ServiceRequest::OpenSecureChannel(_) => {
                    tokens += 1;
                    OpenSecureChannelResponse {
                        response_header: ResponseHeader::new(handle, StatusCode::GOOD),
                        security_token: ChannelSecurityToken {
                            channel_id: 7,
                            token_id: tokens,
                            created_at: DateTime::now(),
                            revised_lifetime: if behavior == Behavior::ShortLifetime {
                                4_000
                            } else {
                                600_000
                            },
                        },
                        ..Default::default()
                    }
                    .into()
                }
                ServiceRequest::Read(_) if behavior == Behavior::DropOnRead => return,
                ServiceRequest::Read(_) => ReadResponse {
                    response_header: ResponseHeader::new(handle, StatusCode::GOOD),
                    results: vec![DataValue::new(Variant::Int32(42))],
                    ..Default::default()
                }
                .into(),
                ServiceRequest::CloseSecureChannel(_) => return,
                _ => ServiceFault {
                    response_header: ResponseHeader::new(handle, StatusCode::BAD_SERVICE_UNSUPPORTED),
                }
                .into(),
            };

            let mut encoder = BinaryEncoder::new();
            response.encode_message(&mut encoder).unwrap();
            let (message_type, security) = if header.message_type == MessageType::Open {
                (MessageType::Open, SecurityHeader::Asymmetric(NoSecurity.asymmetric_header()))
            } else {
                (MessageType::Message, SecurityHeader::Symmetric(1))
            };
            for chunk in writer
                .write(message_type, &security, chunk.request_id, encoder.as_slice())
                .unwrap()
            {
                stream.write_all(&chunk).await.unwrap();
            }
        }
    }

    async fn open_with(behavior: Behavior) -> OpcUaResult<SecureChannel> {
        let (client, server) = tokio::io::duplex(256 * 1024);
        tokio::spawn(fake_server(server, behavior));
        let connector = DuplexConnector(Mutex::new(Some(client)));
        let config = ChannelConfig::new(EndpointUrl::parse("opc.tcp://test:4840").unwrap());
        SecureChannel::open(&connector, config, Arc::new(NoSecurity), WireCodec::standard()).await
    }

    fn read_request() -> ServiceRequest {
        ReadRequest {
            nodes_to_read: vec![ReadValueId::value(NodeId::SERVER_STATE)],
            ..Default::default()
        }
        .into()
    }

    #[tokio::test]
    async fn test_open_request_close() {
        let channel = open_with(Behavior::Normal).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.token().channel_id, 7);

        let response = channel
            .send(read_request(), Duration::from_secs(5))
            .await
            .unwrap();
        let response = ReadRequest::extract(response).unwrap();
        assert_eq!(response.results[0].value, Variant::Int32(42));

        channel.close().await;
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel
            .send(read_request(), Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_server_error_on_hello() {
        let error = open_with(Behavior::RejectHello).await.unwrap_err();
        assert!(matches!(
            error,
            OpcUaError::Transport(TransportError::ServerError { .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_and_faults() {
        let channel = open_with(Behavior::DropOnRead).await.unwrap();
        let mut state = channel.watch_state();

        let error = channel
            .send(read_request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(error, OpcUaError::Transport(_)));

        state
            .wait_for(|s| s.is_faulted())
            .await
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_renewed_before_expiry() {
        let channel = open_with(Behavior::ShortLifetime).await.unwrap();
        assert_eq!(channel.token().token_id, 1);

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(channel.token().token_id, 1);

        // 75% of 4s
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(channel.token().token_id, 2);
        assert_eq!(channel.state(), ChannelState::Open);

        let response = channel
            .send(read_request(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(ReadRequest::extract(response).is_ok());
    }
}

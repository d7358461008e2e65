// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the OPC UA client engine.
//!
//! Every failure the engine can surface is classified by where it happened and
//! how the caller is expected to react:
//!
//! ```text
//! OpcUaError
//! ├── Transport     - Socket and framing level failures (retryable)
//! ├── Security      - Policy, certificate and identity failures (fatal)
//! ├── Protocol      - Malformed or unexpected messages (fatal for the call)
//! ├── Peer          - Bad status codes reported by the server
//! ├── Session       - Session faults (trigger reconnect)
//! ├── Subscription  - Lost or invalid subscriptions
//! ├── Configuration - Invalid settings
//! └── Timeout       - Per-call deadlines
//! ```
//!
//! # Examples
//!
//! ```
//! use strand_opcua::error::{OpcUaError, TransportError};
//!
//! let error = OpcUaError::transport(TransportError::refused("opc.tcp://localhost:4840"));
//! assert!(error.is_retryable());
//! assert_eq!(error.category(), "transport");
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::codec::StatusCode;

// =============================================================================
// OpcUaError - Main Error Type
// =============================================================================

/// The main error type for the client engine.
#[derive(Debug, Clone, Error)]
pub enum OpcUaError {
    /// Byte stream and framing errors.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Security policy and identity errors.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Malformed or unexpected messages.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Bad status reported by the server.
    #[error("{0}")]
    Peer(#[from] PeerError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Subscription and monitored item errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl From<CodecError> for OpcUaError {
    fn from(error: CodecError) -> Self {
        Self::Protocol(ProtocolError::Codec(error))
    }
}

impl OpcUaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a transport error.
    #[inline]
    pub fn transport(error: TransportError) -> Self {
        Self::Transport(error)
    }

    /// Creates a security error.
    #[inline]
    pub fn security(error: SecurityError) -> Self {
        Self::Security(error)
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(error: ProtocolError) -> Self {
        Self::Protocol(error)
    }

    /// Creates a peer error.
    #[inline]
    pub fn peer(error: PeerError) -> Self {
        Self::Peer(error)
    }

    /// Creates a session error.
    #[inline]
    pub fn session(error: SessionError) -> Self {
        Self::Session(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(error: TimeoutError) -> Self {
        Self::Timeout(error)
    }

    // =========================================================================
    // Convenience Constructors
    // =========================================================================

    /// Creates a not-connected error.
    pub fn not_connected() -> Self {
        Self::Transport(TransportError::NotConnected)
    }

    /// Creates a connection refused error.
    pub fn connection_refused(endpoint: impl Into<String>) -> Self {
        Self::Transport(TransportError::refused(endpoint))
    }

    /// Creates a service fault error for a bad status.
    pub fn service_fault(service: &'static str, status: StatusCode) -> Self {
        Self::Peer(PeerError::service_fault(service, status))
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::invalid_value(field, message))
    }

    /// Creates a request timeout error.
    pub fn request_timeout(service: &'static str, duration: Duration) -> Self {
        Self::Timeout(TimeoutError::request(service, duration))
    }

    // =========================================================================
    // Error Classification
    // =========================================================================

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Security(_) => false,
            Self::Protocol(_) => false,
            Self::Peer(e) => e.is_retryable(),
            Self::Session(e) => e.is_retryable(),
            Self::Subscription(e) => e.is_retryable(),
            Self::Configuration(_) => false,
            Self::Timeout(_) => true,
        }
    }

    /// Returns `true` if this error means the session must be re-established.
    pub fn requires_reconnect(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Session(_) => true,
            Self::Peer(e) => e.status().is_session_fault(),
            _ => false,
        }
    }

    /// Returns the suggested retry delay.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        if !self.is_retryable() {
            return None;
        }

        match self {
            Self::Transport(e) => Some(e.suggested_retry_delay()),
            Self::Session(_) => Some(Duration::from_secs(1)),
            Self::Peer(_) => Some(Duration::from_millis(500)),
            Self::Timeout(e) => Some(e.suggested_retry_delay()),
            _ => Some(Duration::from_secs(1)),
        }
    }

    /// Returns the peer status code carried by this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Peer(e) => Some(e.status()),
            Self::Transport(TransportError::ServerError { status, .. }) => Some(*status),
            Self::Subscription(SubscriptionError::Lost { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Returns the byte offset for decoding failures.
    pub fn decoding_offset(&self) -> Option<usize> {
        match self {
            Self::Protocol(ProtocolError::Codec(e)) => e.offset(),
            _ => None,
        }
    }

    /// Returns the error severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transport(e) => e.severity(),
            Self::Security(_) => ErrorSeverity::Critical,
            Self::Protocol(_) => ErrorSeverity::Error,
            Self::Peer(e) => e.severity(),
            Self::Session(_) => ErrorSeverity::Warning,
            Self::Subscription(e) => e.severity(),
            Self::Configuration(_) => ErrorSeverity::Error,
            Self::Timeout(_) => ErrorSeverity::Warning,
        }
    }

    /// Returns the error category as a string.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Security(_) => "security",
            Self::Protocol(_) => "protocol",
            Self::Peer(_) => "peer",
            Self::Session(_) => "session",
            Self::Subscription(_) => "subscription",
            Self::Configuration(_) => "configuration",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns the structured error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Transport(e) => e.error_code(),
            Self::Security(e) => e.error_code(),
            Self::Protocol(e) => e.error_code(),
            Self::Peer(_) => ErrorCode::new(4, 1),
            Self::Session(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
        }
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Transport(e) => e.recovery_hints(),
            Self::Security(e) => e.recovery_hints(),
            Self::Protocol(_) => vec![
                "Check that the server speaks the OPC UA binary protocol",
                "Raise the decoding limits if the message is legitimately large",
            ],
            Self::Peer(_) => vec!["Inspect the returned status code", "Check server logs"],
            Self::Session(_) => vec![
                "The session will be re-established automatically",
                "Check the session timeout configuration",
            ],
            Self::Subscription(e) => e.recovery_hints(),
            Self::Configuration(e) => e.recovery_hints(),
            Self::Timeout(_) => vec![
                "Check network connectivity",
                "Increase the request timeout",
            ],
        }
    }

    /// Returns a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(e) => e.user_message(),
            Self::Security(_) => "보안 설정 오류가 발생했습니다".to_string(),
            Self::Protocol(e) => format!("프로토콜 오류: {}", e),
            Self::Peer(e) => format!("서버 오류 상태: {}", e.status()),
            Self::Session(_) => "세션이 끊어졌습니다. 재연결 중입니다".to_string(),
            Self::Subscription(e) => format!("구독 오류: {}", e),
            Self::Configuration(e) => format!("설정 오류: {}", e),
            Self::Timeout(e) => {
                format!("요청 시간 초과 ({:.1}초)", e.duration().as_secs_f64())
            }
        }
    }

    // =========================================================================
    // Logging
    // =========================================================================

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let level = self.tracing_level();
        let code = self.error_code();

        match level {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Byte stream and connection level errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection refused.
    #[error("Connection refused to '{endpoint}'")]
    Refused {
        /// Target endpoint.
        endpoint: String,
    },

    /// Connection attempt timed out.
    #[error("Connection to '{endpoint}' timed out after {duration:?}")]
    TimedOut {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint {
        /// The invalid URL.
        url: String,
        /// Reason for invalidity.
        reason: String,
    },

    /// The server answered the handshake with an ERR message.
    #[error("Server reported {status}: {reason}")]
    ServerError {
        /// Status carried by the ERR message.
        status: StatusCode,
        /// Reason text.
        reason: String,
    },

    /// The connection was closed.
    #[error("Connection closed: {}", reason.as_deref().unwrap_or("unknown reason"))]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },

    /// No channel is open.
    #[error("Not connected to server")]
    NotConnected,

    /// I/O error.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
        /// Kind of the underlying I/O error.
        kind: io::ErrorKind,
    },
}

impl TransportError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a connection timed out error.
    pub fn timed_out(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::TimedOut {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a server error.
    pub fn server_error(status: StatusCode, reason: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            reason: reason.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: Some(reason.into()),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refused { .. }
            | Self::TimedOut { .. }
            | Self::Closed { .. }
            | Self::NotConnected
            | Self::Io { .. } => true,
            Self::ServerError { status, .. } => !status.is_security_failure(),
            Self::InvalidEndpoint { .. } => false,
        }
    }

    /// Returns the suggested retry delay.
    pub fn suggested_retry_delay(&self) -> Duration {
        match self {
            Self::Refused { .. } => Duration::from_secs(2),
            Self::TimedOut { duration, .. } => *duration,
            Self::Closed { .. } => Duration::from_millis(500),
            Self::NotConnected => Duration::from_millis(100),
            _ => Duration::from_secs(1),
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotConnected | Self::TimedOut { .. } | Self::Closed { .. } => {
                ErrorSeverity::Warning
            }
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Refused { .. } => ErrorCode::new(1, 1),
            Self::TimedOut { .. } => ErrorCode::new(1, 2),
            Self::InvalidEndpoint { .. } => ErrorCode::new(1, 3),
            Self::ServerError { .. } => ErrorCode::new(1, 4),
            Self::Closed { .. } => ErrorCode::new(1, 5),
            Self::NotConnected => ErrorCode::new(1, 6),
            Self::Io { .. } => ErrorCode::new(1, 7),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Refused { .. } => vec![
                "Check if the OPC UA server is running",
                "Verify the endpoint URL is correct",
                "Check firewall rules allow the connection",
            ],
            Self::TimedOut { .. } => vec![
                "Check network connectivity to the server",
                "Increase the connect timeout setting",
            ],
            Self::InvalidEndpoint { .. } => vec!["Use format: opc.tcp://hostname:port/path"],
            Self::ServerError { .. } => vec!["Check server logs for the rejection reason"],
            Self::Closed { .. } | Self::Io { .. } => {
                vec!["The connection will be re-established automatically"]
            }
            Self::NotConnected => vec!["Call connect() before performing operations"],
        }
    }

    /// Returns a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Refused { endpoint } => {
                format!("OPC UA 서버({})에 연결할 수 없습니다", endpoint)
            }
            Self::TimedOut { endpoint, .. } => {
                format!("OPC UA 서버({}) 연결 시간 초과", endpoint)
            }
            Self::InvalidEndpoint { url, .. } => format!("잘못된 엔드포인트 URL: {}", url),
            Self::ServerError { status, .. } => format!("서버가 연결을 거부했습니다: {}", status),
            Self::Closed { .. } => "연결이 끊어졌습니다".to_string(),
            Self::NotConnected => "OPC UA 서버에 연결되어 있지 않습니다".to_string(),
            Self::Io { .. } => "네트워크 오류가 발생했습니다".to_string(),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused {
                endpoint: "unknown".to_string(),
            },
            io::ErrorKind::UnexpectedEof => Self::Closed {
                reason: Some("peer closed the stream".to_string()),
            },
            kind => Self::Io {
                message: error.to_string(),
                kind,
            },
        }
    }
}

impl From<io::Error> for OpcUaError {
    fn from(error: io::Error) -> Self {
        Self::Transport(error.into())
    }
}

// =============================================================================
// SecurityError
// =============================================================================

/// Security policy, certificate and identity errors.
#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    /// No provider is available for the requested policy.
    #[error("Security policy '{policy}' is not supported without a security provider")]
    PolicyNotSupported {
        /// Requested policy name.
        policy: String,
    },

    /// Security mode does not match the policy.
    #[error("Security mode '{mode}' cannot be used with policy '{policy}'")]
    ModeMismatch {
        /// Requested mode.
        mode: String,
        /// Requested policy.
        policy: String,
    },

    /// Certificate rejected by the peer or the trust store.
    #[error("Certificate rejected: {reason}")]
    CertificateRejected {
        /// Rejection reason.
        reason: String,
    },

    /// Signature or decryption check failed for a chunk.
    #[error("Message security check failed: {reason}")]
    VerificationFailed {
        /// Failure reason.
        reason: String,
    },

    /// User identity was rejected.
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed {
        /// Failure reason.
        reason: String,
    },
}

impl SecurityError {
    /// Creates a policy-not-supported error.
    pub fn policy_not_supported(policy: impl Into<String>) -> Self {
        Self::PolicyNotSupported {
            policy: policy.into(),
        }
    }

    /// Creates a mode mismatch error.
    pub fn mode_mismatch(mode: impl Into<String>, policy: impl Into<String>) -> Self {
        Self::ModeMismatch {
            mode: mode.into(),
            policy: policy.into(),
        }
    }

    /// Creates a certificate rejected error.
    pub fn certificate_rejected(reason: impl Into<String>) -> Self {
        Self::CertificateRejected {
            reason: reason.into(),
        }
    }

    /// Creates a verification failure.
    pub fn verification_failed(reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            reason: reason.into(),
        }
    }

    /// Creates an authentication failure.
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::PolicyNotSupported { .. } => ErrorCode::new(2, 1),
            Self::ModeMismatch { .. } => ErrorCode::new(2, 2),
            Self::CertificateRejected { .. } => ErrorCode::new(2, 3),
            Self::VerificationFailed { .. } => ErrorCode::new(2, 4),
            Self::AuthenticationFailed { .. } => ErrorCode::new(2, 5),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::PolicyNotSupported { .. } => vec![
                "Register a ChannelSecurity provider for this policy",
                "Use SecurityPolicy::None for testing",
            ],
            Self::ModeMismatch { .. } => vec!["Use SecurityMode::None together with SecurityPolicy::None"],
            Self::CertificateRejected { .. } => vec![
                "Add the server certificate to the trust store",
                "Check certificate validity dates",
            ],
            Self::VerificationFailed { .. } => vec!["Check that both sides use the same keys"],
            Self::AuthenticationFailed { .. } => vec!["Verify the user name and password"],
        }
    }
}

// =============================================================================
// CodecError
// =============================================================================

/// Encoding and decoding failures of the wire codec.
///
/// Decoding variants carry the absolute byte offset at which the problem was
/// detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer ended before a value was complete.
    #[error("Buffer truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Offset of the incomplete read.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A length prefix is negative (other than the null marker).
    #[error("Invalid length {length} at offset {offset}")]
    InvalidLength {
        /// Offset of the length prefix.
        offset: usize,
        /// Decoded length.
        length: i32,
    },

    /// A length or count exceeds the configured decoding limit.
    #[error("Length {length} at offset {offset} exceeds limit {limit}")]
    LimitExceeded {
        /// Offset of the length prefix.
        offset: usize,
        /// Decoded length.
        length: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Unknown type tag or encoding byte.
    #[error("Unknown {what} tag {tag:#04x} at offset {offset}")]
    UnknownTag {
        /// Offset of the tag.
        offset: usize,
        /// What the tag selects.
        what: &'static str,
        /// Tag value.
        tag: u8,
    },

    /// Decoded value has a different type than expected.
    #[error("Type mismatch at offset {offset}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Offset of the value.
        offset: usize,
        /// Expected type name.
        expected: String,
        /// Actual type name.
        found: String,
    },

    /// A string is not valid UTF-8.
    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the string body.
        offset: usize,
    },

    /// Nested structures are deeper than allowed.
    #[error("Nesting depth {depth} exceeds limit at offset {offset}")]
    DepthExceeded {
        /// Offset where the limit was hit.
        offset: usize,
        /// Depth reached.
        depth: usize,
    },

    /// Structurally invalid content.
    #[error("Invalid {what} at offset {offset}: {message}")]
    Invalid {
        /// Offset of the value.
        offset: usize,
        /// What was being decoded.
        what: &'static str,
        /// Detail.
        message: String,
    },

    /// Malformed text encoding.
    #[error("Invalid JSON encoding: {message}")]
    Json {
        /// Detail.
        message: String,
    },

    /// A value cannot be represented in the requested format.
    #[error("Cannot encode value: {message}")]
    Unencodable {
        /// Detail.
        message: String,
    },

    /// A value violates a construction invariant.
    #[error("Invalid value: {message}")]
    InvalidValue {
        /// Detail.
        message: String,
    },
}

impl CodecError {
    /// Creates a JSON error.
    pub fn json(message: impl Into<String>) -> Self {
        Self::Json {
            message: message.into(),
        }
    }

    /// Creates an unencodable-value error.
    pub fn unencodable(message: impl Into<String>) -> Self {
        Self::Unencodable {
            message: message.into(),
        }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Returns the byte offset for binary decoding failures.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Truncated { offset, .. }
            | Self::InvalidLength { offset, .. }
            | Self::LimitExceeded { offset, .. }
            | Self::UnknownTag { offset, .. }
            | Self::TypeMismatch { offset, .. }
            | Self::InvalidUtf8 { offset }
            | Self::DepthExceeded { offset, .. }
            | Self::Invalid { offset, .. } => Some(*offset),
            Self::Json { .. } | Self::Unencodable { .. } | Self::InvalidValue { .. } => None,
        }
    }

    /// Shifts the offset of a decoding error by `base`.
    ///
    /// Used when a nested body was decoded from a sub-slice.
    pub fn shifted(self, base: usize) -> Self {
        match self {
            Self::Truncated {
                offset,
                needed,
                available,
            } => Self::Truncated {
                offset: offset + base,
                needed,
                available,
            },
            Self::InvalidLength { offset, length } => Self::InvalidLength {
                offset: offset + base,
                length,
            },
            Self::LimitExceeded {
                offset,
                length,
                limit,
            } => Self::LimitExceeded {
                offset: offset + base,
                length,
                limit,
            },
            Self::UnknownTag { offset, what, tag } => Self::UnknownTag {
                offset: offset + base,
                what,
                tag,
            },
            Self::TypeMismatch {
                offset,
                expected,
                found,
            } => Self::TypeMismatch {
                offset: offset + base,
                expected,
                found,
            },
            Self::InvalidUtf8 { offset } => Self::InvalidUtf8 {
                offset: offset + base,
            },
            Self::DepthExceeded { offset, depth } => Self::DepthExceeded {
                offset: offset + base,
                depth,
            },
            Self::Invalid {
                offset,
                what,
                message,
            } => Self::Invalid {
                offset: offset + base,
                what,
                message,
            },
            other => other,
        }
    }
}

/// A Result type with CodecError.
pub type CodecResult<T> = Result<T, CodecError>;

// =============================================================================
// ProtocolError
// =============================================================================

/// Malformed or unexpected protocol messages.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// Wire codec failure.
    #[error("{0}")]
    Codec(#[from] CodecError),

    /// Unexpected message type in the framing layer.
    #[error("Unexpected message '{actual}', expected '{expected}'")]
    UnexpectedMessage {
        /// Expected message type.
        expected: String,
        /// Received message type.
        actual: String,
    },

    /// The response does not match the request.
    #[error("Unexpected response '{actual}' to {expected} request")]
    UnexpectedResponse {
        /// Request service name.
        expected: &'static str,
        /// Received response name.
        actual: &'static str,
    },

    /// Message larger than the negotiated limit.
    #[error("Message of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge {
        /// Message size.
        size: usize,
        /// Negotiated maximum.
        max: usize,
    },

    /// Too many chunks for a single message.
    #[error("Message exceeds chunk limit of {max}")]
    TooManyChunks {
        /// Negotiated maximum.
        max: usize,
    },

    /// The peer aborted a multi-chunk message.
    #[error("Request {request_id} aborted by peer: {status} {reason}")]
    ChunkAborted {
        /// Request id of the aborted message.
        request_id: u32,
        /// Abort status.
        status: StatusCode,
        /// Abort reason.
        reason: String,
    },

    /// Invalid message header.
    #[error("Invalid message header: {message}")]
    InvalidHeader {
        /// Detail.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Creates an unexpected response error.
    pub fn unexpected_response(expected: &'static str, actual: &'static str) -> Self {
        Self::UnexpectedResponse { expected, actual }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Codec(_) => ErrorCode::new(3, 1),
            Self::UnexpectedMessage { .. } => ErrorCode::new(3, 2),
            Self::UnexpectedResponse { .. } => ErrorCode::new(3, 3),
            Self::MessageTooLarge { .. } => ErrorCode::new(3, 4),
            Self::TooManyChunks { .. } => ErrorCode::new(3, 5),
            Self::ChunkAborted { .. } => ErrorCode::new(3, 6),
            Self::InvalidHeader { .. } => ErrorCode::new(3, 7),
        }
    }
}

// =============================================================================
// PeerError
// =============================================================================

/// Bad status codes returned by the server.
#[derive(Debug, Clone, Error)]
pub enum PeerError {
    /// A service call returned a bad service result or ServiceFault.
    #[error("{service} failed with {status}")]
    ServiceFault {
        /// Service name.
        service: &'static str,
        /// Service result.
        status: StatusCode,
    },
}

impl PeerError {
    /// Creates a service fault.
    pub fn service_fault(service: &'static str, status: StatusCode) -> Self {
        Self::ServiceFault { service, status }
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ServiceFault { status, .. } => *status,
        }
    }

    /// Returns `true` if retrying the call may succeed.
    pub fn is_retryable(&self) -> bool {
        let status = self.status();
        status == StatusCode::BAD_TIMEOUT
            || status == StatusCode::BAD_TOO_MANY_OPERATIONS
            || status == StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS
            || status.is_session_fault()
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        if self.is_retryable() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// CreateSession failed.
    #[error("Session creation failed: {message}")]
    CreationFailed {
        /// Detail.
        message: String,
    },

    /// The server no longer knows the session.
    #[error("Session invalidated by server: {status}")]
    Invalidated {
        /// Status that invalidated the session.
        status: StatusCode,
    },

    /// Keep-alive read failed.
    #[error("Session keep-alive failed: {message}")]
    KeepAliveFailed {
        /// Detail.
        message: String,
    },

    /// No session has been created yet.
    #[error("Session not active")]
    NotActive,

    /// Session closed by the caller.
    #[error("Session closed")]
    Closed,

    /// Reconnect gave up.
    #[error("Reconnect abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

impl SessionError {
    /// Creates a creation failure.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates a keep-alive failure.
    pub fn keep_alive_failed(message: impl Into<String>) -> Self {
        Self::KeepAliveFailed {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Closed | Self::ReconnectExhausted { .. })
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CreationFailed { .. } => ErrorCode::new(5, 1),
            Self::Invalidated { .. } => ErrorCode::new(5, 3),
            Self::KeepAliveFailed { .. } => ErrorCode::new(5, 4),
            Self::NotActive => ErrorCode::new(5, 5),
            Self::Closed => ErrorCode::new(5, 6),
            Self::ReconnectExhausted { .. } => ErrorCode::new(5, 7),
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// Unknown subscription handle.
    #[error("Subscription '{handle}' not found")]
    NotFound {
        /// Local subscription handle.
        handle: u32,
    },

    /// The server no longer knows the subscription.
    #[error("Subscription {subscription_id} lost: {status}")]
    Lost {
        /// Server subscription id.
        subscription_id: u32,
        /// Reported status.
        status: StatusCode,
    },

    /// Invalid data change filter.
    #[error("Invalid monitored item filter: {message}")]
    InvalidFilter {
        /// Detail.
        message: String,
    },

    /// Client handle already registered in another subscription.
    #[error("Client handle {client_handle} is already used by another subscription")]
    ClientHandleInUse {
        /// Conflicting client handle.
        client_handle: u32,
    },

    /// Operation not allowed in the current state.
    #[error("Cannot {operation} subscription in state {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current state.
        state: String,
    },

    /// Invalid subscription parameters.
    #[error("Invalid subscription settings: {message}")]
    InvalidSettings {
        /// Detail.
        message: String,
    },

    /// The dispatch engine has stopped.
    #[error("Subscription engine stopped")]
    EngineStopped,
}

impl SubscriptionError {
    /// Creates an invalid filter error.
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            message: message.into(),
        }
    }

    /// Creates an invalid settings error.
    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(operation: &'static str, state: impl fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Lost { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Lost { .. } => ErrorSeverity::Warning,
            Self::EngineStopped => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::new(6, 1),
            Self::Lost { .. } => ErrorCode::new(6, 2),
            Self::InvalidFilter { .. } => ErrorCode::new(6, 3),
            Self::ClientHandleInUse { .. } => ErrorCode::new(6, 4),
            Self::InvalidState { .. } => ErrorCode::new(6, 5),
            Self::InvalidSettings { .. } => ErrorCode::new(6, 6),
            Self::EngineStopped => ErrorCode::new(6, 7),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::NotFound { .. } => vec!["Use the handle returned by create_subscription"],
            Self::Lost { .. } => vec!["The subscription is recreated automatically"],
            Self::InvalidFilter { .. } => vec![
                "Absolute deadband must be >= 0",
                "Percent deadband must be within 0..=100",
            ],
            Self::ClientHandleInUse { .. } => vec!["Client handles must be unique per session"],
            Self::InvalidState { .. } => vec!["Wait for the subscription to become active"],
            Self::InvalidSettings { .. } => vec![
                "Lifetime count must be at least three times the keep-alive count",
            ],
            Self::EngineStopped => vec!["Reconnect the client"],
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// Invalid endpoint URL.
    #[error("Invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// The endpoint.
        endpoint: String,
        /// Detail.
        message: String,
    },

    /// Invalid node id text.
    #[error("Invalid node id '{node_id}': {message}")]
    InvalidNodeId {
        /// The node id text.
        node_id: String,
        /// Detail.
        message: String,
    },

    /// Unknown security mode.
    #[error("Invalid security mode '{mode}'")]
    InvalidSecurityMode {
        /// The mode text.
        mode: String,
    },

    /// Unknown security policy.
    #[error("Invalid security policy '{policy}'")]
    InvalidSecurityPolicy {
        /// The policy text.
        policy: String,
    },

    /// Invalid field value.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Detail.
        message: String,
    },

    /// Required field missing.
    #[error("Missing required field '{field}'")]
    MissingField {
        /// Field name.
        field: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid security mode error.
    pub fn invalid_security_mode(mode: impl Into<String>) -> Self {
        Self::InvalidSecurityMode { mode: mode.into() }
    }

    /// Creates an invalid security policy error.
    pub fn invalid_security_policy(policy: impl Into<String>) -> Self {
        Self::InvalidSecurityPolicy {
            policy: policy.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidEndpoint { .. } => ErrorCode::new(7, 1),
            Self::InvalidNodeId { .. } => ErrorCode::new(7, 2),
            Self::InvalidSecurityMode { .. } => ErrorCode::new(7, 3),
            Self::InvalidSecurityPolicy { .. } => ErrorCode::new(7, 4),
            Self::InvalidValue { .. } => ErrorCode::new(7, 5),
            Self::MissingField { .. } => ErrorCode::new(7, 6),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::InvalidEndpoint { .. } => vec!["Use format: opc.tcp://hostname:port/path"],
            Self::InvalidNodeId { .. } => vec![
                "Use format: ns=<namespace>;i=<number>",
                "Or: ns=<namespace>;s=<string>",
            ],
            Self::InvalidSecurityMode { .. } => vec!["Valid modes: None, Sign, SignAndEncrypt"],
            Self::InvalidSecurityPolicy { .. } => {
                vec!["Valid policies: None, Basic256Sha256, Aes128Sha256RsaOaep, Aes256Sha256RsaPss"]
            }
            Self::InvalidValue { .. } | Self::MissingField { .. } => {
                vec!["Check the configuration file"]
            }
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Per-call deadline errors.
#[derive(Debug, Clone, Error)]
pub enum TimeoutError {
    /// Connection establishment timed out.
    #[error("Connection timed out after {duration:?}")]
    Connection {
        /// Timeout duration.
        duration: Duration,
    },

    /// A service request timed out.
    #[error("{service} request timed out after {duration:?}")]
    Request {
        /// Service name.
        service: &'static str,
        /// Timeout duration.
        duration: Duration,
    },

    /// A publish request timed out.
    #[error("Publish request timed out after {duration:?}")]
    Publish {
        /// Timeout duration.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Creates a connection timeout.
    pub fn connection(duration: Duration) -> Self {
        Self::Connection { duration }
    }

    /// Creates a request timeout.
    pub fn request(service: &'static str, duration: Duration) -> Self {
        Self::Request { service, duration }
    }

    /// Creates a publish timeout.
    pub fn publish(duration: Duration) -> Self {
        Self::Publish { duration }
    }

    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Connection { duration }
            | Self::Request { duration, .. }
            | Self::Publish { duration } => *duration,
        }
    }

    /// Returns the suggested retry delay.
    pub fn suggested_retry_delay(&self) -> Duration {
        self.duration().mul_f32(0.5).max(Duration::from_millis(500))
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection { .. } => ErrorCode::new(8, 1),
            Self::Request { .. } => ErrorCode::new(8, 2),
            Self::Publish { .. } => ErrorCode::new(8, 3),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code for categorization.
///
/// Format: `UA-XXYY` where XX is category and YY is specific error.
///
/// Categories:
/// - 1: Transport
/// - 2: Security
/// - 3: Protocol
/// - 4: Peer
/// - 5: Session
/// - 6: Subscription
/// - 7: Configuration
/// - 8: Timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1-8).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with OpcUaError.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// Tests
// =============================================================================

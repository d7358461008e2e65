// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client engine.
//!
//! This crate implements the client side of OPC UA over `opc.tcp`: the
//! binary and JSON encodings, secure channels, sessions and a subscription
//! engine that delivers data changes in order across reconnects.
//!
//! # Features
//!
//! - Binary and reversible JSON codec with an extension object registry
//! - Secure channel framing, chunking and security token renewal
//! - Session create, activate, keep-alive and reconnect
//! - Read, Write, Browse and Call with per-item results
//! - Subscriptions with ordered delivery, gap detection and republish
//! - Recovery that transfers subscriptions and falls back to recreation
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── Transport     - Connection failures (retryable)
//! ├── Security      - Trust and policy failures (fatal)
//! ├── Protocol      - Framing and decoding failures
//! ├── Peer          - Bad status codes returned by the server
//! ├── Session       - Session faults (trigger reconnect)
//! ├── Subscription  - Lost subscriptions and invalid requests
//! ├── Configuration - Invalid settings
//! └── Timeout       - Calls that exceeded their deadline
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use strand_opcua::{ClientConfig, NodeId, OpcUaClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .endpoint("opc.tcp://localhost:4840")
//!         .build()?;
//!
//!     let client = OpcUaClient::connect(config).await?;
//!     let values = client.read(&[NodeId::numeric(0, 2258)]).await?;
//!     println!("Server time: {:?}", values[0].value);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod client;
pub mod codec;
pub mod error;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use error::{
    CodecError, CodecResult, ConfigurationError, ErrorCode, ErrorSeverity, OpcUaError,
    OpcUaResult, PeerError, ProtocolError, SecurityError, SessionError, SubscriptionError,
    TimeoutError, TransportError,
};

pub use types::{
    ClientConfig, ClientConfigBuilder, DataChangeTrigger, DeadbandSettings, MonitoredItemSettings,
    MonitoringMode, PublishSettings, ReconnectSettings, SecurityMode, SecurityPolicy,
    SubscriptionSettings, UserIdentity,
};

pub use codec::{
    Array, BuiltinType, ByteString, DataValue, DateTime, DecodingLimits, DiagnosticInfo,
    EncodingFormat, ExpandedNodeId, ExtensionObject, LocalizedText, NodeId, NodeIdentifier,
    QualifiedName, StatusCode, TypeRegistry, Variant, WireCodec,
};

// Re-export client types
pub use client::{
    ChannelSink, ClientStats, ConnectionStatus, FnSink, ItemValue, MonitoredItemDefinition,
    MonitoredItemResult, NotificationSink, OpcUaClient, ServiceTransport, Session, SessionState,
    SubscriptionEvent, SubscriptionInfo, SubscriptionState, TransportFactory,
};

pub use channel::{ChannelSecurity, ChannelState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

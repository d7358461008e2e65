// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service transport abstraction.
//!
//! The session talks to the server through a [`ServiceTransport`]: anything
//! that can carry a [`ServiceRequest`] and return the matching
//! [`ServiceResponse`]. [`SecureChannel`] is the production implementation;
//! tests plug in in-memory servers.
//!
//! A [`TransportFactory`] opens fresh transports, which is what reconnection
//! needs after a channel fault.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::channel::{
    security_for, ChannelConfig, ChannelSecurity, ChannelState, Connector, SecureChannel,
    TcpConnector,
};
use crate::codec::WireCodec;
use crate::error::OpcUaResult;
use crate::services::{ServiceRequest, ServiceResponse};
use crate::types::ClientConfig;

// =============================================================================
// ServiceTransport Trait
// =============================================================================

/// Carries service requests to the server.
///
/// # Thread Safety
///
/// Implementations must accept concurrent `send` calls; responses are
/// matched to their requests by the implementation.
#[async_trait]
pub trait ServiceTransport: Send + Sync + fmt::Debug {
    /// Sends a request and waits up to `timeout` for its response.
    async fn send(&self, request: ServiceRequest, timeout: Duration) -> OpcUaResult<ServiceResponse>;

    /// Current channel state.
    fn state(&self) -> ChannelState;

    /// Receiver notified on channel state changes.
    fn watch_state(&self) -> watch::Receiver<ChannelState>;

    /// Closes the transport. Pending requests fail.
    async fn close(&self);
}

#[async_trait]
impl ServiceTransport for SecureChannel {
    async fn send(&self, request: ServiceRequest, timeout: Duration) -> OpcUaResult<ServiceResponse> {
        SecureChannel::send(self, request, timeout).await
    }

    fn state(&self) -> ChannelState {
        SecureChannel::state(self)
    }

    fn watch_state(&self) -> watch::Receiver<ChannelState> {
        SecureChannel::watch_state(self)
    }

    async fn close(&self) {
        SecureChannel::close(self).await
    }
}

// =============================================================================
// TransportFactory Trait
// =============================================================================

/// Opens new transports to one endpoint.
#[async_trait]
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Opens a transport.
    async fn open(&self) -> OpcUaResult<Arc<dyn ServiceTransport>>;

    /// Endpoint URL the transports connect to.
    fn endpoint_url(&self) -> &str;
}

/// Opens secure channels over `opc.tcp`.
#[derive(Debug, Clone)]
pub struct UaTcpTransportFactory {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    security: Arc<dyn ChannelSecurity>,
    codec: WireCodec,
}

impl UaTcpTransportFactory {
    /// Creates a factory from explicit parts.
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ChannelConfig,
        security: Arc<dyn ChannelSecurity>,
        codec: WireCodec,
    ) -> Self {
        Self {
            connector,
            config,
            security,
            codec,
        }
    }

    /// Creates a TCP factory for the client configuration.
    ///
    /// `provider` implements the configured security policy when it is not
    /// `None`.
    pub fn from_config(
        config: &ClientConfig,
        codec: WireCodec,
        provider: Option<Arc<dyn ChannelSecurity>>,
    ) -> OpcUaResult<Self> {
        let security = security_for(config.security_policy.clone(), config.security_mode, provider)?;
        Ok(Self::new(
            Arc::new(TcpConnector::new(config.connect_timeout)),
            ChannelConfig::from_client(config)?,
            security,
            codec,
        ))
    }
}

#[async_trait]
impl TransportFactory for UaTcpTransportFactory {
    async fn open(&self) -> OpcUaResult<Arc<dyn ServiceTransport>> {
        let channel = SecureChannel::open(
            self.connector.as_ref(),
            self.config.clone(),
            Arc::clone(&self.security),
            self.codec.clone(),
        )
        .await?;
        Ok(Arc::new(channel))
    }

    fn endpoint_url(&self) -> &str {
        &self.config.endpoint.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OpcUaError, SecurityError};
    use crate::types::{SecurityMode, SecurityPolicy};

    #[test]
    fn test_factory_from_config() {
        let config = ClientConfig::new("opc.tcp://plant:4840/UA");
        let factory = UaTcpTransportFactory::from_config(&config, WireCodec::standard(), None).unwrap();
        assert_eq!(factory.endpoint_url(), "opc.tcp://plant:4840/UA");
    }

    #[test]
    fn test_factory_requires_security_provider() {
        let mut config = ClientConfig::new("opc.tcp://plant:4840");
        config.security_policy = SecurityPolicy::Basic256Sha256;
        config.security_mode = SecurityMode::SignAndEncrypt;
        let error = UaTcpTransportFactory::from_config(&config, WireCodec::standard(), None).unwrap_err();
        assert!(matches!(
            error,
            OpcUaError::Security(SecurityError::PolicyNotSupported { .. })
        ));
    }

    #[test]
    fn test_factory_rejects_bad_endpoint() {
        let config = ClientConfig::new("http://plant");
        assert!(UaTcpTransportFactory::from_config(&config, WireCodec::standard(), None).is_err());
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Byte stream connectors.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{ConfigurationError, OpcUaResult, TransportError};

/// Default port of `opc.tcp` endpoints.
pub const DEFAULT_PORT: u16 = 4840;

const SCHEME: &str = "opc.tcp://";

// =============================================================================
// EndpointUrl
// =============================================================================

/// Parsed `opc.tcp://host[:port][/path]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    /// Original URL, sent in `HEL` and `CreateSession`.
    pub url: String,
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Path without the leading slash.
    pub path: String,
}

impl EndpointUrl {
    /// Parses an endpoint URL.
    pub fn parse(url: &str) -> OpcUaResult<Self> {
        let invalid = |reason: &str| ConfigurationError::invalid_endpoint(url, reason);

        let rest = url
            .get(..SCHEME.len())
            .filter(|scheme| scheme.eq_ignore_ascii_case(SCHEME))
            .map(|_| &url[SCHEME.len()..])
            .ok_or_else(|| invalid("scheme must be opc.tcp://"))?;

        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash + 1..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(invalid("missing host").into());
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let close = bracketed.find(']').ok_or_else(|| invalid("unterminated IPv6 host"))?;
            let port = match &bracketed[close + 1..] {
                "" => DEFAULT_PORT,
                tail => tail
                    .strip_prefix(':')
                    .and_then(parse_port)
                    .ok_or_else(|| invalid("invalid port"))?,
            };
            (bracketed[..close].to_string(), port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (
                    host.to_string(),
                    parse_port(port).ok_or_else(|| invalid("invalid port"))?,
                ),
                None => (authority.to_string(), DEFAULT_PORT),
            }
        };
        if host.is_empty() {
            return Err(invalid("missing host").into());
        }

        Ok(Self {
            url: url.to_string(),
            host,
            port,
            path: path.to_string(),
        })
    }

    /// `host:port` for socket connection.
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(text: &str) -> Option<u16> {
    text.parse::<u16>().ok().filter(|port| *port != 0)
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Bidirectional byte stream carrying the transport protocol.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Opens byte streams to endpoints.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects to `endpoint`.
    async fn connect(&self, endpoint: &EndpointUrl) -> OpcUaResult<Box<dyn ByteStream>>;
}

/// TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &EndpointUrl) -> OpcUaResult<Box<dyn ByteStream>> {
        let address = endpoint.socket_address();
        tracing::debug!(endpoint = %endpoint, address = %address, "Opening TCP connection");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::timed_out(endpoint.url.clone(), self.connect_timeout))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => TransportError::refused(endpoint.url.clone()),
                _ => TransportError::from(e),
            })?;
        stream.set_nodelay(true)?;

        tracing::debug!(endpoint = %endpoint, "TCP connection established");
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_port_and_path() {
        let url = EndpointUrl::parse("opc.tcp://plc-01:48010/UA/Server").unwrap();
        assert_eq!(url.host, "plc-01");
        assert_eq!(url.port, 48010);
        assert_eq!(url.path, "UA/Server");
        assert_eq!(url.socket_address(), "plc-01:48010");
    }

    #[test]
    fn test_parse_default_port() {
        let url = EndpointUrl::parse("opc.tcp://localhost").unwrap();
        assert_eq!(url.port, DEFAULT_PORT);
        assert_eq!(url.path, "");
    }

    #[test]
    fn test_parse_ipv6() {
        let url = EndpointUrl::parse("opc.tcp://[::1]:4841").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.socket_address(), "[::1]:4841");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(EndpointUrl::parse("http://localhost:4840").is_err());
        assert!(EndpointUrl::parse("opc.tcp://").is_err());
        assert!(EndpointUrl::parse("opc.tcp://host:notaport").is_err());
        assert!(EndpointUrl::parse("opc.tcp://host:0").is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = EndpointUrl::parse(&format!("opc.tcp://127.0.0.1:{}", port)).unwrap();
        let result = TcpConnector::new(Duration::from_secs(2)).connect(&url).await;
        assert!(result.is_err());
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel layer.
//!
//! - [`message`]: transport headers, handshake messages and chunking
//! - [`security`]: the [`ChannelSecurity`] seam and the `None` policy
//! - [`transport`]: endpoint URLs and byte stream connectors
//! - [`secure_channel`]: request/response correlation over one channel,
//!   including security token renewal

pub mod message;
pub mod secure_channel;
pub mod security;
pub mod transport;

use std::fmt;

pub use message::{MessageType, TransportLimits};
pub use secure_channel::{ChannelConfig, SecureChannel};
pub use security::{security_for, ChannelSecurity, NoSecurity};
pub use transport::{ByteStream, Connector, EndpointUrl, TcpConnector};

/// State of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    /// No channel.
    #[default]
    Closed,
    /// Connecting and running the handshake.
    Connecting,
    /// Open and usable.
    Open,
    /// Open; a token renewal is in flight.
    Renewing,
    /// The connection failed; pending requests were failed.
    Faulted,
    /// A replacement channel is being opened.
    Reconnecting,
}

impl ChannelState {
    /// Returns `true` if requests can be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open | Self::Renewing)
    }

    /// Returns `true` if the channel failed.
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted)
    }

    /// Returns `true` if the channel will never carry requests again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Renewing => write!(f, "Renewing"),
            Self::Faulted => write!(f, "Faulted"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

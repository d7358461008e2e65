// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Message security seam of the secure channel.
//!
//! The channel never signs or encrypts on its own; it hands every chunk to a
//! [`ChannelSecurity`] implementation. [`NoSecurity`] covers the `None`
//! policy. Signing and encrypting policies are provided by the application
//! through [`security_for`].

use std::fmt;
use std::sync::Arc;

use rand::RngCore;

use super::message::{AsymmetricSecurityHeader, MessageType};
use crate::codec::ByteString;
use crate::error::{OpcUaResult, SecurityError};
use crate::types::{SecurityMode, SecurityPolicy};

/// Nonce length used by the `None` policy.
const NONE_NONCE_LENGTH: usize = 32;

/// Protects and verifies secure conversation chunks.
///
/// `protect` receives the plaintext from the sequence header onwards and
/// returns what goes on the wire; `unprotect` reverses it and must reject
/// anything whose signature does not verify.
pub trait ChannelSecurity: fmt::Debug + Send + Sync {
    /// Policy implemented.
    fn policy(&self) -> SecurityPolicy;

    /// Mode implemented.
    fn mode(&self) -> SecurityMode;

    /// Client certificate (empty for `None`).
    fn local_certificate(&self) -> ByteString {
        ByteString::default()
    }

    /// Thumbprint of the server certificate (empty for `None`).
    fn receiver_thumbprint(&self) -> ByteString {
        ByteString::default()
    }

    /// Bytes added to each chunk by padding, signature and encryption.
    fn overhead(&self, _message_type: MessageType) -> usize {
        0
    }

    /// Signs and/or encrypts an outgoing chunk.
    fn protect(&self, message_type: MessageType, plain: &[u8]) -> OpcUaResult<Vec<u8>>;

    /// Verifies and/or decrypts an incoming chunk.
    fn unprotect(&self, message_type: MessageType, data: &[u8]) -> OpcUaResult<Vec<u8>>;

    /// Creates the client nonce for an `OPN` request.
    fn create_nonce(&self) -> ByteString;

    /// Derives symmetric keys after the channel was opened or renewed.
    fn derive_keys(&self, _client_nonce: &ByteString, _server_nonce: &ByteString) -> OpcUaResult<()> {
        Ok(())
    }

    /// Asymmetric header for `OPN` chunks.
    fn asymmetric_header(&self) -> AsymmetricSecurityHeader {
        AsymmetricSecurityHeader {
            security_policy_uri: self.policy().uri().to_string(),
            sender_certificate: self.local_certificate(),
            receiver_certificate_thumbprint: self.receiver_thumbprint(),
        }
    }
}

/// The `None` policy: chunks pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

impl ChannelSecurity for NoSecurity {
    fn policy(&self) -> SecurityPolicy {
        SecurityPolicy::None
    }

    fn mode(&self) -> SecurityMode {
        SecurityMode::None
    }

    fn protect(&self, _message_type: MessageType, plain: &[u8]) -> OpcUaResult<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn unprotect(&self, _message_type: MessageType, data: &[u8]) -> OpcUaResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn create_nonce(&self) -> ByteString {
        let mut nonce = vec![0u8; NONE_NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);
        ByteString(nonce)
    }
}

/// Selects the channel security for `policy` and `mode`.
///
/// The `None` policy only pairs with the `None` mode and vice versa. Any
/// other policy needs a `provider` implementing it.
pub fn security_for(
    policy: SecurityPolicy,
    mode: SecurityMode,
    provider: Option<Arc<dyn ChannelSecurity>>,
) -> OpcUaResult<Arc<dyn ChannelSecurity>> {
    let policy_is_none = policy == SecurityPolicy::None;
    if policy_is_none != mode.is_none() {
        return Err(SecurityError::mode_mismatch(mode.name(), policy.name()).into());
    }
    if policy_is_none {
        return Ok(Arc::new(NoSecurity));
    }

    let provider = provider.ok_or_else(|| SecurityError::policy_not_supported(policy.uri()))?;
    if provider.policy() != policy || provider.mode() != mode {
        return Err(SecurityError::mode_mismatch(
            provider.mode().name(),
            provider.policy().name(),
        )
        .into());
    }
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpcUaError;

    #[derive(Debug)]
    struct Signing;

    impl ChannelSecurity for Signing {
        fn policy(&self) -> SecurityPolicy {
            SecurityPolicy::Basic256Sha256
        }

        fn mode(&self) -> SecurityMode {
            SecurityMode::Sign
        }

        fn overhead(&self, _message_type: MessageType) -> usize {
            1
        }

        fn protect(&self, _message_type: MessageType, plain: &[u8]) -> OpcUaResult<Vec<u8>> {
            let checksum = plain.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            let mut out = plain.to_vec();
            out.push(checksum);
            Ok(out)
        }

        fn unprotect(&self, _message_type: MessageType, data: &[u8]) -> OpcUaResult<Vec<u8>> {
            let (body, checksum) = data.split_at(data.len().saturating_sub(1));
            let expected = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            if checksum != [expected] {
                return Err(SecurityError::verification_failed("checksum").into());
            }
            Ok(body.to_vec())
        }

        fn create_nonce(&self) -> ByteString {
            ByteString(vec![7; 32])
        }
    }

    #[test]
    fn test_none_policy() {
        let security = security_for(SecurityPolicy::None, SecurityMode::None, None).unwrap();
        assert_eq!(security.policy(), SecurityPolicy::None);
        assert_eq!(security.create_nonce().as_bytes().len(), 32);
        assert_eq!(
            security.asymmetric_header().security_policy_uri,
            "http://opcfoundation.org/UA/SecurityPolicy#None"
        );
    }

    #[test]
    fn test_mode_mismatch() {
        let error = security_for(SecurityPolicy::None, SecurityMode::Sign, None).unwrap_err();
        assert!(matches!(error, OpcUaError::Security(SecurityError::ModeMismatch { .. })));
    }

    #[test]
    fn test_missing_provider() {
        let error =
            security_for(SecurityPolicy::Basic256Sha256, SecurityMode::Sign, None).unwrap_err();
        assert!(matches!(
            error,
            OpcUaError::Security(SecurityError::PolicyNotSupported { .. })
        ));
    }

    #[test]
    fn test_provider_round_trip() {
        let security = security_for(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::Sign,
            Some(Arc::new(Signing)),
        )
        .unwrap();
        let protected = security.protect(MessageType::Message, b"abc").unwrap();
        assert_eq!(security.unprotect(MessageType::Message, &protected).unwrap(), b"abc");

        let mut tampered = protected.clone();
        tampered[0] ^= 0xFF;
        assert!(security.unprotect(MessageType::Message, &tampered).is_err());
    }
}

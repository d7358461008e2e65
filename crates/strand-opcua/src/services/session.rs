// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel and session services, plus user identity tokens.

use crate::codec::{
    ByteString, DateTime, DiagnosticInfo, ExtensionObject, LocalizedText, NodeId, StatusCode,
};
use crate::types::{SecurityMode, UserIdentity};

use super::{RequestHeader, ResponseHeader, SignatureData};

impl_wire_enum!(SecurityMode);

wire_enum! {
    /// Whether a channel token is issued or renewed.
    pub enum SecurityTokenRequestType {
        /// New channel.
        Issue = 0,
        /// Token renewal on an open channel.
        Renew = 1,
    }
    default Issue;
}

wire_enum! {
    /// Kind of application.
    pub enum ApplicationType {
        /// Server.
        Server = 0,
        /// Client.
        Client = 1,
        /// Both.
        ClientAndServer = 2,
        /// Discovery server.
        DiscoveryServer = 3,
    }
    default Client;
}

wire_enum! {
    /// User identity token kind.
    pub enum UserTokenType {
        /// No credentials.
        Anonymous = 0,
        /// User name and password.
        UserName = 1,
        /// X.509 certificate.
        Certificate = 2,
        /// Externally issued token.
        IssuedToken = 3,
    }
    default Anonymous;
}

// =============================================================================
// Secure channel
// =============================================================================

wire_struct! {
    /// Token that secures a channel until it expires.
    pub struct ChannelSecurityToken {
        /// Channel id assigned by the server.
        pub channel_id: u32,
        /// Token id.
        pub token_id: u32,
        /// Creation time.
        pub created_at: DateTime,
        /// Lifetime in milliseconds as revised by the server.
        pub revised_lifetime: u32,
    }
}

wire_struct! {
    /// Opens or renews a secure channel.
    pub struct OpenSecureChannelRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Protocol version.
        pub client_protocol_version: u32,
        /// Issue or renew.
        pub request_type: SecurityTokenRequestType,
        /// Requested security mode.
        pub security_mode: SecurityMode,
        /// Client nonce.
        pub client_nonce: ByteString,
        /// Requested token lifetime in milliseconds.
        pub requested_lifetime: u32,
    }
}

wire_struct! {
    /// Answer to [`OpenSecureChannelRequest`].
    pub struct OpenSecureChannelResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Protocol version.
        pub server_protocol_version: u32,
        /// Issued token.
        pub security_token: ChannelSecurityToken,
        /// Server nonce.
        pub server_nonce: ByteString,
    }
}

wire_struct! {
    /// Closes a secure channel. The server does not answer.
    pub struct CloseSecureChannelRequest {
        /// Header.
        pub request_header: RequestHeader,
    }
}

// =============================================================================
// Endpoint description
// =============================================================================

wire_struct! {
    /// Describes an application.
    pub struct ApplicationDescription {
        /// Application URI.
        pub application_uri: String,
        /// Product URI.
        pub product_uri: String,
        /// Display name.
        pub application_name: LocalizedText,
        /// Kind of application.
        pub application_type: ApplicationType,
        /// Gateway URI.
        pub gateway_server_uri: String,
        /// Discovery profile URI.
        pub discovery_profile_uri: String,
        /// Discovery URLs.
        pub discovery_urls: Vec<String>,
    }
}

wire_struct! {
    /// User token accepted by an endpoint.
    pub struct UserTokenPolicy {
        /// Policy id quoted in identity tokens.
        pub policy_id: String,
        /// Token kind.
        pub token_type: UserTokenType,
        /// Issued token type URI.
        pub issued_token_type: String,
        /// Issuer endpoint.
        pub issuer_endpoint_url: String,
        /// Security policy for the token.
        pub security_policy_uri: String,
    }
}

wire_struct! {
    /// Server endpoint.
    pub struct EndpointDescription {
        /// Endpoint URL.
        pub endpoint_url: String,
        /// Server description.
        pub server: ApplicationDescription,
        /// Server certificate.
        pub server_certificate: ByteString,
        /// Security mode.
        pub security_mode: SecurityMode,
        /// Security policy URI.
        pub security_policy_uri: String,
        /// Accepted user tokens.
        pub user_identity_tokens: Vec<UserTokenPolicy>,
        /// Transport profile URI.
        pub transport_profile_uri: String,
        /// Relative security level.
        pub security_level: u8,
    }
}

wire_struct! {
    /// Software certificate with signature.
    pub struct SignedSoftwareCertificate {
        /// Certificate bytes.
        pub certificate_data: ByteString,
        /// Signature bytes.
        pub signature: ByteString,
    }
}

// =============================================================================
// Session
// =============================================================================

wire_struct! {
    /// Creates a session.
    pub struct CreateSessionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Client application.
        pub client_description: ApplicationDescription,
        /// Server URI.
        pub server_uri: String,
        /// Endpoint URL used to connect.
        pub endpoint_url: String,
        /// Human-readable session name.
        pub session_name: String,
        /// Client nonce.
        pub client_nonce: ByteString,
        /// Client certificate.
        pub client_certificate: ByteString,
        /// Requested session timeout in milliseconds.
        pub requested_session_timeout: f64,
        /// Largest response the client accepts (0 = no limit).
        pub max_response_message_size: u32,
    }
}

wire_struct! {
    /// Answer to [`CreateSessionRequest`].
    pub struct CreateSessionResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Session id.
        pub session_id: NodeId,
        /// Token quoted in every request header.
        pub authentication_token: NodeId,
        /// Session timeout in milliseconds as revised by the server.
        pub revised_session_timeout: f64,
        /// Server nonce.
        pub server_nonce: ByteString,
        /// Server certificate.
        pub server_certificate: ByteString,
        /// Endpoints of the server.
        pub server_endpoints: Vec<EndpointDescription>,
        /// Software certificates.
        pub server_software_certificates: Vec<SignedSoftwareCertificate>,
        /// Server signature.
        pub server_signature: SignatureData,
        /// Largest request the server accepts.
        pub max_request_message_size: u32,
    }
}

wire_struct! {
    /// Activates a session, possibly on a new channel.
    pub struct ActivateSessionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Client signature.
        pub client_signature: SignatureData,
        /// Software certificates.
        pub client_software_certificates: Vec<SignedSoftwareCertificate>,
        /// Preferred locales.
        pub locale_ids: Vec<String>,
        /// Identity token.
        pub user_identity_token: ExtensionObject,
        /// Signature over the identity token.
        pub user_token_signature: SignatureData,
    }
}

wire_struct! {
    /// Answer to [`ActivateSessionRequest`].
    pub struct ActivateSessionResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// New server nonce.
        pub server_nonce: ByteString,
        /// Per-certificate results.
        pub results: Vec<StatusCode>,
        /// Per-certificate diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

wire_struct! {
    /// Closes a session.
    pub struct CloseSessionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Delete the session's subscriptions too.
        pub delete_subscriptions: bool,
    }
}

wire_struct! {
    /// Answer to [`CloseSessionRequest`].
    pub struct CloseSessionResponse {
        /// Header.
        pub response_header: ResponseHeader,
    }
}

// =============================================================================
// Identity tokens
// =============================================================================

wire_struct! {
    /// Anonymous identity.
    pub struct AnonymousIdentityToken {
        /// Policy id from the endpoint.
        pub policy_id: String,
    }
}

wire_struct! {
    /// User name and password identity.
    pub struct UserNameIdentityToken {
        /// Policy id from the endpoint.
        pub policy_id: String,
        /// User name.
        pub user_name: String,
        /// Password, encrypted when `encryption_algorithm` is set.
        pub password: ByteString,
        /// Encryption algorithm URI (empty = plain).
        pub encryption_algorithm: String,
    }
}

encodeable!(AnonymousIdentityToken = 321, UserNameIdentityToken = 324);

/// Builds the identity token for `identity`, quoting the policy id the
/// server advertises for that token type.
pub fn identity_token(
    identity: &UserIdentity,
    endpoints: &[EndpointDescription],
) -> ExtensionObject {
    let wanted = match identity {
        UserIdentity::Anonymous => UserTokenType::Anonymous,
        UserIdentity::UserName { .. } => UserTokenType::UserName,
    };
    let advertised = endpoints
        .iter()
        .flat_map(|endpoint| endpoint.user_identity_tokens.iter())
        .find(|policy| policy.token_type == wanted)
        .map(|policy| policy.policy_id.clone());

    match identity {
        UserIdentity::Anonymous => ExtensionObject::from_structure(AnonymousIdentityToken {
            policy_id: advertised.unwrap_or_else(|| "anonymous".to_string()),
        }),
        UserIdentity::UserName { username, password } => {
            ExtensionObject::from_structure(UserNameIdentityToken {
                policy_id: advertised.unwrap_or_else(|| "username".to_string()),
                user_name: username.clone(),
                password: ByteString::from(password.as_bytes()),
                encryption_algorithm: String::new(),
            })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

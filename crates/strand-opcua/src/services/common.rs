// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Headers and structures shared by several services.

use crate::codec::{
    ByteString, DateTime, DiagnosticInfo, ExtensionObject, NodeId, QualifiedName, StatusCode,
};

/// Attribute ids.
pub mod attribute_id {
    /// NodeId attribute.
    pub const NODE_ID: u32 = 1;
    /// NodeClass attribute.
    pub const NODE_CLASS: u32 = 2;
    /// BrowseName attribute.
    pub const BROWSE_NAME: u32 = 3;
    /// DisplayName attribute.
    pub const DISPLAY_NAME: u32 = 4;
    /// Description attribute.
    pub const DESCRIPTION: u32 = 5;
    /// Value attribute.
    pub const VALUE: u32 = 13;
    /// DataType attribute.
    pub const DATA_TYPE: u32 = 14;
    /// AccessLevel attribute.
    pub const ACCESS_LEVEL: u32 = 17;
}

wire_struct! {
    /// Header of every request.
    pub struct RequestHeader {
        /// Session authentication token (null before activation).
        pub authentication_token: NodeId,
        /// Time the request was sent.
        pub timestamp: DateTime,
        /// Client-chosen handle echoed in the response.
        pub request_handle: u32,
        /// Requested diagnostics mask.
        pub return_diagnostics: u32,
        /// Audit log entry id.
        pub audit_entry_id: String,
        /// Hint for the server-side timeout in milliseconds.
        pub timeout_hint: u32,
        /// Reserved.
        pub additional_header: ExtensionObject,
    }
}

impl RequestHeader {
    /// Creates a header stamped with the current time.
    pub fn new(authentication_token: NodeId, request_handle: u32, timeout_hint: u32) -> Self {
        Self {
            authentication_token,
            timestamp: DateTime::now(),
            request_handle,
            timeout_hint,
            ..Default::default()
        }
    }
}

wire_struct! {
    /// Header of every response.
    pub struct ResponseHeader {
        /// Time the response was sent.
        pub timestamp: DateTime,
        /// Handle copied from the request.
        pub request_handle: u32,
        /// Service-level result.
        pub service_result: StatusCode,
        /// Service-level diagnostics.
        pub service_diagnostics: DiagnosticInfo,
        /// Strings referenced by diagnostics.
        pub string_table: Vec<String>,
        /// Reserved.
        pub additional_header: ExtensionObject,
    }
}

impl ResponseHeader {
    /// Header answering `request_handle` with `service_result`.
    pub fn new(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            timestamp: DateTime::now(),
            request_handle,
            service_result,
            ..Default::default()
        }
    }
}

wire_struct! {
    /// Response sent instead of the expected one when a service fails.
    pub struct ServiceFault {
        /// Header carrying the failure code.
        pub response_header: ResponseHeader,
    }
}

wire_struct! {
    /// Identifies one attribute of one node.
    pub struct ReadValueId {
        /// Node to read.
        pub node_id: NodeId,
        /// Attribute to read.
        pub attribute_id: u32,
        /// Index range for array values.
        pub index_range: String,
        /// Requested data encoding.
        pub data_encoding: QualifiedName,
    }
}

impl ReadValueId {
    /// Value attribute of `node_id`.
    pub fn value(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute_id: attribute_id::VALUE,
            ..Default::default()
        }
    }
}

wire_struct! {
    /// Signature over the server certificate and nonce.
    pub struct SignatureData {
        /// Signature algorithm URI.
        pub algorithm: String,
        /// Signature bytes.
        pub signature: ByteString,
    }
}

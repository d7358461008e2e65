// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service request and response structures.
//!
//! Structures are declared once through [`wire_struct!`], which derives the
//! binary encoding (fields in declaration order) and the JSON encoding
//! (PascalCase member names). A message body on the wire is the binary
//! encoding id of the structure as a `NodeId` followed by the structure.

use crate::codec::{
    BinaryDecoder, BinaryEncodable, BinaryEncoder, EncodeableType, NodeId, TypeRegistry,
};
use crate::error::{CodecError, CodecResult};

/// Declares a structure with binary and JSON encodings.
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                pub $field:ident : $ty:ty,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $crate::codec::BinaryEncodable for $name {
            #[allow(unused_variables)]
            fn encode(
                &self,
                encoder: &mut $crate::codec::BinaryEncoder,
            ) -> $crate::error::CodecResult<()> {
                $( $crate::codec::BinaryEncodable::encode(&self.$field, encoder)?; )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn decode(
                decoder: &mut $crate::codec::BinaryDecoder<'_>,
            ) -> $crate::error::CodecResult<Self> {
                Ok(Self {
                    $( $field: $crate::codec::BinaryEncodable::decode(decoder)?, )*
                })
            }
        }

        impl $crate::codec::JsonEncodable for $name {
            fn to_json(&self) -> $crate::error::CodecResult<serde_json::Value> {
                #[allow(unused_mut)]
                let mut object = $crate::codec::JsonObject::new();
                $( object.field($crate::codec::pascal_case(stringify!($field)), &self.$field)?; )*
                Ok(object.into_value())
            }

            #[allow(unused_variables)]
            fn from_json(
                value: &serde_json::Value,
                registry: &$crate::codec::TypeRegistry,
            ) -> $crate::error::CodecResult<Self> {
                let fields = $crate::codec::JsonFields::new(value, stringify!($name), registry)?;
                Ok(Self {
                    $( $field: fields.get(&$crate::codec::pascal_case(stringify!($field)))?, )*
                })
            }
        }
    };
}

/// Implements the `Int32` wire encoding for an enum with `value`/`from_value`.
macro_rules! impl_wire_enum {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::codec::BinaryEncodable for $ty {
                fn encode(
                    &self,
                    encoder: &mut $crate::codec::BinaryEncoder,
                ) -> $crate::error::CodecResult<()> {
                    encoder.write_i32(self.value());
                    Ok(())
                }

                fn decode(
                    decoder: &mut $crate::codec::BinaryDecoder<'_>,
                ) -> $crate::error::CodecResult<Self> {
                    let offset = decoder.position();
                    let value = decoder.read_i32()?;
                    <$ty>::from_value(value).ok_or_else(|| $crate::error::CodecError::Invalid {
                        offset,
                        what: stringify!($ty),
                        message: format!("unknown value {}", value),
                    })
                }
            }

            impl $crate::codec::JsonEncodable for $ty {
                fn to_json(&self) -> $crate::error::CodecResult<serde_json::Value> {
                    Ok(serde_json::Value::from(self.value()))
                }

                fn from_json(
                    value: &serde_json::Value,
                    registry: &$crate::codec::TypeRegistry,
                ) -> $crate::error::CodecResult<Self> {
                    let raw = <i32 as $crate::codec::JsonEncodable>::from_json(value, registry)?;
                    <$ty>::from_value(raw).ok_or_else(|| {
                        $crate::error::CodecError::json(format!(
                            "unknown {} value {}",
                            stringify!($ty),
                            raw
                        ))
                    })
                }
            }
        )*
    };
}

/// Declares an `Int32`-encoded enumeration.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $value:literal,
            )*
        }
        default $default:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
        }

        impl $name {
            /// Wire value.
            pub const fn value(&self) -> i32 {
                match self {
                    $( Self::$variant => $value, )*
                }
            }

            /// Parses the wire value.
            pub fn from_value(value: i32) -> Option<Self> {
                match value {
                    $( $value => Some(Self::$variant), )*
                    _ => None,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl_wire_enum!($name);
    };
}

/// Implements [`EncodeableType`] for structures with a numeric encoding id.
macro_rules! encodeable {
    ($($ty:ident = $id:literal),* $(,)?) => {
        $(
            impl $crate::codec::EncodeableType for $ty {
                const BINARY_ENCODING_ID: u32 = $id;
                const TYPE_NAME: &'static str = stringify!($ty);
            }
        )*
    };
}

mod attribute;
mod common;
mod session;
mod subscription;

pub use attribute::*;
pub use common::*;
pub use session::*;
pub use subscription::*;

// =============================================================================
// Request / response envelopes
// =============================================================================

/// A typed service request paired with its response type.
pub trait ServiceCall: Into<ServiceRequest> + Send + 'static {
    /// Response structure.
    type Response: Send + 'static;

    /// Service name.
    const NAME: &'static str;

    /// Extracts the typed response, handing back anything else.
    fn extract(response: ServiceResponse) -> Result<Self::Response, ServiceResponse>;
}

macro_rules! services {
    ($( $name:ident : $req:ident = $req_id:literal => $resp:ident = $resp_id:literal; )*) => {
        /// Any request the client sends.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ServiceRequest {
            $(
                #[doc = concat!("`", stringify!($name), "` request.")]
                $name($req),
            )*
            /// `CloseSecureChannel` request (no response).
            CloseSecureChannel(CloseSecureChannelRequest),
        }

        impl ServiceRequest {
            /// Service name.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$name(_) => stringify!($name), )*
                    Self::CloseSecureChannel(_) => "CloseSecureChannel",
                }
            }

            /// Binary encoding id of the request structure.
            pub fn encoding_id(&self) -> u32 {
                match self {
                    $( Self::$name(_) => $req_id, )*
                    Self::CloseSecureChannel(_) => CloseSecureChannelRequest::BINARY_ENCODING_ID,
                }
            }

            /// Request header.
            pub fn header(&self) -> &RequestHeader {
                match self {
                    $( Self::$name(r) => &r.request_header, )*
                    Self::CloseSecureChannel(r) => &r.request_header,
                }
            }

            /// Mutable request header.
            pub fn header_mut(&mut self) -> &mut RequestHeader {
                match self {
                    $( Self::$name(r) => &mut r.request_header, )*
                    Self::CloseSecureChannel(r) => &mut r.request_header,
                }
            }

            /// Encodes the message body: encoding id then structure.
            pub fn encode_message(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
                NodeId::numeric(0, self.encoding_id()).encode(encoder)?;
                match self {
                    $( Self::$name(r) => r.encode(encoder), )*
                    Self::CloseSecureChannel(r) => r.encode(encoder),
                }
            }

            /// Decodes a message body.
            pub fn decode_message(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
                let offset = decoder.position();
                let type_id = NodeId::decode(decoder)?;
                match type_id.as_numeric().filter(|_| type_id.namespace_index == 0) {
                    $( Some($req_id) => Ok(Self::$name(<$req>::decode(decoder)?)), )*
                    Some(id) if id == CloseSecureChannelRequest::BINARY_ENCODING_ID => {
                        Ok(Self::CloseSecureChannel(CloseSecureChannelRequest::decode(decoder)?))
                    }
                    _ => Err(CodecError::Invalid {
                        offset,
                        what: "service request",
                        message: format!("unknown encoding id {}", type_id),
                    }),
                }
            }
        }

        /// Any response the server sends.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ServiceResponse {
            $(
                #[doc = concat!("`", stringify!($name), "` response.")]
                $name($resp),
            )*
            /// Service-level failure.
            ServiceFault(ServiceFault),
        }

        impl ServiceResponse {
            /// Service name.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$name(_) => stringify!($name), )*
                    Self::ServiceFault(_) => "ServiceFault",
                }
            }

            /// Binary encoding id of the response structure.
            pub fn encoding_id(&self) -> u32 {
                match self {
                    $( Self::$name(_) => $resp_id, )*
                    Self::ServiceFault(_) => ServiceFault::BINARY_ENCODING_ID,
                }
            }

            /// Response header.
            pub fn header(&self) -> &ResponseHeader {
                match self {
                    $( Self::$name(r) => &r.response_header, )*
                    Self::ServiceFault(r) => &r.response_header,
                }
            }

            /// Mutable response header.
            pub fn header_mut(&mut self) -> &mut ResponseHeader {
                match self {
                    $( Self::$name(r) => &mut r.response_header, )*
                    Self::ServiceFault(r) => &mut r.response_header,
                }
            }

            /// Encodes the message body: encoding id then structure.
            pub fn encode_message(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
                NodeId::numeric(0, self.encoding_id()).encode(encoder)?;
                match self {
                    $( Self::$name(r) => r.encode(encoder), )*
                    Self::ServiceFault(r) => r.encode(encoder),
                }
            }

            /// Decodes a message body.
            pub fn decode_message(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
                let offset = decoder.position();
                let type_id = NodeId::decode(decoder)?;
                match type_id.as_numeric().filter(|_| type_id.namespace_index == 0) {
                    $( Some($resp_id) => Ok(Self::$name(<$resp>::decode(decoder)?)), )*
                    Some(id) if id == ServiceFault::BINARY_ENCODING_ID => {
                        Ok(Self::ServiceFault(ServiceFault::decode(decoder)?))
                    }
                    _ => Err(CodecError::Invalid {
                        offset,
                        what: "service response",
                        message: format!("unknown encoding id {}", type_id),
                    }),
                }
            }
        }

        impl From<CloseSecureChannelRequest> for ServiceRequest {
            fn from(request: CloseSecureChannelRequest) -> Self {
                Self::CloseSecureChannel(request)
            }
        }

        impl From<ServiceFault> for ServiceResponse {
            fn from(fault: ServiceFault) -> Self {
                Self::ServiceFault(fault)
            }
        }

        $(
            impl From<$req> for ServiceRequest {
                fn from(request: $req) -> Self {
                    Self::$name(request)
                }
            }

            impl From<$resp> for ServiceResponse {
                fn from(response: $resp) -> Self {
                    Self::$name(response)
                }
            }

            impl ServiceCall for $req {
                type Response = $resp;
                const NAME: &'static str = stringify!($name);

                fn extract(response: ServiceResponse) -> Result<$resp, ServiceResponse> {
                    match response {
                        ServiceResponse::$name(r) => Ok(r),
                        other => Err(other),
                    }
                }
            }

            encodeable!($req = $req_id, $resp = $resp_id);
        )*
    };
}

services! {
    OpenSecureChannel: OpenSecureChannelRequest = 446 => OpenSecureChannelResponse = 449;
    CreateSession: CreateSessionRequest = 461 => CreateSessionResponse = 464;
    ActivateSession: ActivateSessionRequest = 467 => ActivateSessionResponse = 470;
    CloseSession: CloseSessionRequest = 473 => CloseSessionResponse = 476;
    Browse: BrowseRequest = 527 => BrowseResponse = 530;
    Read: ReadRequest = 631 => ReadResponse = 634;
    Write: WriteRequest = 673 => WriteResponse = 676;
    Call: CallRequest = 712 => CallResponse = 715;
    CreateMonitoredItems: CreateMonitoredItemsRequest = 751 => CreateMonitoredItemsResponse = 754;
    DeleteMonitoredItems: DeleteMonitoredItemsRequest = 781 => DeleteMonitoredItemsResponse = 784;
    CreateSubscription: CreateSubscriptionRequest = 787 => CreateSubscriptionResponse = 790;
    ModifySubscription: ModifySubscriptionRequest = 793 => ModifySubscriptionResponse = 796;
    SetPublishingMode: SetPublishingModeRequest = 799 => SetPublishingModeResponse = 802;
    Publish: PublishRequest = 826 => PublishResponse = 829;
    Republish: RepublishRequest = 832 => RepublishResponse = 835;
    TransferSubscriptions: TransferSubscriptionsRequest = 841 => TransferSubscriptionsResponse = 844;
    DeleteSubscriptions: DeleteSubscriptionsRequest = 847 => DeleteSubscriptionsResponse = 850;
}

encodeable!(
    ServiceFault = 397,
    CloseSecureChannelRequest = 452,
);

/// Registry with the structures that travel inside extension objects:
/// notifications, monitoring filters and identity tokens.
pub fn standard_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register::<DataChangeNotification>()
        .register::<EventNotificationList>()
        .register::<StatusChangeNotification>()
        .register::<DataChangeFilter>()
        .register::<AnonymousIdentityToken>()
        .register::<UserNameIdentityToken>();
    registry
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodingLimits, JsonEncodable, StatusCode};

    fn round_trip_request(request: ServiceRequest) -> ServiceRequest {
        let registry = standard_registry();
        let mut encoder = BinaryEncoder::new();
        request.encode_message(&mut encoder).unwrap();
        let bytes = encoder.into_bytes();
        let mut decoder = BinaryDecoder::new(&bytes, &registry, DecodingLimits::default());
        let decoded = ServiceRequest::decode_message(&mut decoder).unwrap();
        decoder.finish().unwrap();
        decoded
    }

    #[test]
    fn test_message_starts_with_four_byte_encoding_id() {
        let request = ServiceRequest::from(ReadRequest::default());
        let mut encoder = BinaryEncoder::new();
        request.encode_message(&mut encoder).unwrap();
        // FourByte NodeId: 0x01, namespace 0, id 631 little-endian
        assert_eq!(&encoder.as_slice()[..4], &[0x01, 0x00, 0x77, 0x02]);
    }

    #[test]
    fn test_request_round_trip() {
        let request = ServiceRequest::from(CreateSubscriptionRequest {
            requested_publishing_interval: 500.0,
            requested_lifetime_count: 60,
            requested_max_keep_alive_count: 10,
            publishing_enabled: true,
            ..Default::default()
        });
        assert_eq!(round_trip_request(request.clone()), request);
        assert_eq!(request.name(), "CreateSubscription");
    }

    #[test]
    fn test_service_fault_decodes() {
        let fault = ServiceResponse::ServiceFault(ServiceFault {
            response_header: ResponseHeader {
                service_result: StatusCode::BAD_SESSION_ID_INVALID,
                request_handle: 9,
                ..Default::default()
            },
        });
        let registry = standard_registry();
        let mut encoder = BinaryEncoder::new();
        fault.encode_message(&mut encoder).unwrap();
        let bytes = encoder.into_bytes();
        let mut decoder = BinaryDecoder::new(&bytes, &registry, DecodingLimits::default());
        let decoded = ServiceResponse::decode_message(&mut decoder).unwrap();
        assert_eq!(decoded.header().request_handle, 9);
        assert!(ReadRequest::extract(decoded).is_err());
    }

    #[test]
    fn test_fault_and_close_convert_into_envelopes() {
        let fault: ServiceResponse = ServiceFault {
            response_header: ResponseHeader {
                service_result: StatusCode::BAD_TOO_MANY_OPERATIONS,
                request_handle: 3,
                ..Default::default()
            },
        }
        .into();
        assert_eq!(fault.name(), "ServiceFault");
        assert_eq!(fault.encoding_id(), ServiceFault::BINARY_ENCODING_ID);
        assert_eq!(fault.header().request_handle, 3);

        let close: ServiceRequest = CloseSecureChannelRequest::default().into();
        assert_eq!(close.name(), "CloseSecureChannel");
        assert_eq!(round_trip_request(close.clone()), close);
    }

    #[test]
    fn test_unknown_encoding_id() {
        let registry = standard_registry();
        let mut encoder = BinaryEncoder::new();
        NodeId::numeric(0, 9999).encode(&mut encoder).unwrap();
        let bytes = encoder.into_bytes();
        let mut decoder = BinaryDecoder::new(&bytes, &registry, DecodingLimits::default());
        assert!(matches!(
            ServiceResponse::decode_message(&mut decoder),
            Err(CodecError::Invalid { offset: 0, .. })
        ));
    }

    #[test]
    fn test_struct_json_uses_pascal_case() {
        let value = SubscriptionAcknowledgement {
            subscription_id: 4,
            sequence_number: 12,
        }
        .to_json()
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"SubscriptionId": 4, "SequenceNumber": 12})
        );
        let registry = standard_registry();
        let back = SubscriptionAcknowledgement::from_json(&value, &registry).unwrap();
        assert_eq!(back.sequence_number, 12);
    }

    #[test]
    fn test_standard_registry_contents() {
        let registry = standard_registry();
        assert!(registry.contains(&DataChangeNotification::encoding_id()));
        assert!(registry.contains(&NodeId::numeric(0, 324)));
        assert_eq!(registry.len(), 6);
    }
}

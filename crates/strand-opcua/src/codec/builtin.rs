// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Built-in value types other than node ids, variants and extension objects.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::binary::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use super::extension::TypeRegistry;
use super::json::{expect_str, JsonEncodable, JsonFields, JsonObject};
use super::variant::Variant;
use crate::error::{CodecError, CodecResult};

// =============================================================================
// StatusCode
// =============================================================================

/// Operation result code.
///
/// The top two bits carry the severity (`00` good, `01` uncertain, `10` bad);
/// the upper 16 bits identify the code and the lower 16 bits carry flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

macro_rules! status_codes {
    ($($name:ident = $value:literal, $text:literal;)*) => {
        impl StatusCode {
            $(
                #[doc = $text]
                pub const $name: StatusCode = StatusCode($value);
            )*

            /// Symbolic name of the code, ignoring flag bits.
            pub fn name(self) -> Option<&'static str> {
                match self.code() {
                    $($value => Some($text),)*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    GOOD = 0x0000_0000, "Good";
    GOOD_SUBSCRIPTION_TRANSFERRED = 0x002D_0000, "GoodSubscriptionTransferred";
    UNCERTAIN = 0x4000_0000, "Uncertain";
    BAD = 0x8000_0000, "Bad";
    BAD_UNEXPECTED_ERROR = 0x8001_0000, "BadUnexpectedError";
    BAD_INTERNAL_ERROR = 0x8002_0000, "BadInternalError";
    BAD_COMMUNICATION_ERROR = 0x8005_0000, "BadCommunicationError";
    BAD_ENCODING_ERROR = 0x8006_0000, "BadEncodingError";
    BAD_DECODING_ERROR = 0x8007_0000, "BadDecodingError";
    BAD_ENCODING_LIMITS_EXCEEDED = 0x8008_0000, "BadEncodingLimitsExceeded";
    BAD_TIMEOUT = 0x800A_0000, "BadTimeout";
    BAD_SERVICE_UNSUPPORTED = 0x800B_0000, "BadServiceUnsupported";
    BAD_SERVER_HALTED = 0x800E_0000, "BadServerHalted";
    BAD_NOTHING_TO_DO = 0x800F_0000, "BadNothingToDo";
    BAD_TOO_MANY_OPERATIONS = 0x8010_0000, "BadTooManyOperations";
    BAD_CERTIFICATE_INVALID = 0x8012_0000, "BadCertificateInvalid";
    BAD_SECURITY_CHECKS_FAILED = 0x8013_0000, "BadSecurityChecksFailed";
    BAD_USER_ACCESS_DENIED = 0x801F_0000, "BadUserAccessDenied";
    BAD_IDENTITY_TOKEN_INVALID = 0x8020_0000, "BadIdentityTokenInvalid";
    BAD_SECURE_CHANNEL_ID_INVALID = 0x8022_0000, "BadSecureChannelIdInvalid";
    BAD_SESSION_ID_INVALID = 0x8025_0000, "BadSessionIdInvalid";
    BAD_SESSION_CLOSED = 0x8026_0000, "BadSessionClosed";
    BAD_SESSION_NOT_ACTIVATED = 0x8027_0000, "BadSessionNotActivated";
    BAD_SUBSCRIPTION_ID_INVALID = 0x8028_0000, "BadSubscriptionIdInvalid";
    BAD_WAITING_FOR_INITIAL_DATA = 0x8032_0000, "BadWaitingForInitialData";
    BAD_NODE_ID_INVALID = 0x8033_0000, "BadNodeIdInvalid";
    BAD_NODE_ID_UNKNOWN = 0x8034_0000, "BadNodeIdUnknown";
    BAD_ATTRIBUTE_ID_INVALID = 0x8035_0000, "BadAttributeIdInvalid";
    BAD_NOT_WRITABLE = 0x803B_0000, "BadNotWritable";
    BAD_MONITORED_ITEM_ID_INVALID = 0x8042_0000, "BadMonitoredItemIdInvalid";
    BAD_MONITORED_ITEM_FILTER_INVALID = 0x8043_0000, "BadMonitoredItemFilterInvalid";
    BAD_SECURITY_POLICY_REJECTED = 0x8055_0000, "BadSecurityPolicyRejected";
    BAD_TOO_MANY_SESSIONS = 0x8056_0000, "BadTooManySessions";
    BAD_TYPE_MISMATCH = 0x8074_0000, "BadTypeMismatch";
    BAD_TOO_MANY_PUBLISH_REQUESTS = 0x8078_0000, "BadTooManyPublishRequests";
    BAD_NO_SUBSCRIPTION = 0x8079_0000, "BadNoSubscription";
    BAD_SEQUENCE_NUMBER_UNKNOWN = 0x807A_0000, "BadSequenceNumberUnknown";
    BAD_MESSAGE_NOT_AVAILABLE = 0x807B_0000, "BadMessageNotAvailable";
    BAD_TCP_MESSAGE_TOO_LARGE = 0x8080_0000, "BadTcpMessageTooLarge";
    BAD_SECURE_CHANNEL_CLOSED = 0x8086_0000, "BadSecureChannelClosed";
    BAD_SEQUENCE_NUMBER_INVALID = 0x8088_0000, "BadSequenceNumberInvalid";
    BAD_DEADBAND_FILTER_INVALID = 0x808E_0000, "BadDeadbandFilterInvalid";
    BAD_CONNECTION_CLOSED = 0x80AE_0000, "BadConnectionClosed";
}

impl StatusCode {
    /// Code part without the flag bits.
    #[inline]
    pub const fn code(self) -> u32 {
        self.0 & 0xFFFF_0000
    }

    /// Returns `true` if the severity is good.
    #[inline]
    pub const fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is uncertain.
    #[inline]
    pub const fn is_uncertain(self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub const fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns `true` if both codes are equal ignoring flag bits.
    #[inline]
    pub const fn matches(self, other: StatusCode) -> bool {
        self.code() == other.code()
    }

    /// Codes after which the session must be re-established.
    pub fn is_session_fault(self) -> bool {
        [
            Self::BAD_SESSION_ID_INVALID,
            Self::BAD_SESSION_CLOSED,
            Self::BAD_SESSION_NOT_ACTIVATED,
        ]
        .iter()
        .any(|c| self.matches(*c))
    }

    /// Codes that indicate a rejected certificate, policy or identity.
    pub fn is_security_failure(self) -> bool {
        [
            Self::BAD_SECURITY_CHECKS_FAILED,
            Self::BAD_SECURITY_POLICY_REJECTED,
            Self::BAD_CERTIFICATE_INVALID,
            Self::BAD_USER_ACCESS_DENIED,
            Self::BAD_IDENTITY_TOKEN_INVALID,
        ]
        .iter()
        .any(|c| self.matches(*c))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#010X})", name, self.0),
            None => write!(f, "{:#010X}", self.0),
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusCode({})", self)
    }
}

impl BinaryEncodable for StatusCode {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_u32(self.0);
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        decoder.read_u32().map(StatusCode)
    }
}

impl JsonEncodable for StatusCode {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::from(self.0))
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        u32::from_json(value, registry).map(StatusCode)
    }
}

// =============================================================================
// DateTime
// =============================================================================

const TICKS_PER_SECOND: i64 = 10_000_000;
const SECONDS_1601_TO_1970: i64 = 11_644_473_600;

/// Instant as 100-nanosecond ticks since 1601-01-01 UTC.
///
/// Zero (and any negative value) is the null/minimum date. Instants at or after
/// 9999-12-31T23:59:59Z are clamped to `i64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DateTime {
    ticks: i64,
}

impl DateTime {
    /// Ticks of 9999-12-31T23:59:59Z.
    pub const MAX_DATE_TICKS: i64 = (253_402_300_799 + SECONDS_1601_TO_1970) * TICKS_PER_SECOND;

    /// Creates a value from raw ticks.
    #[inline]
    pub const fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    /// The null date.
    #[inline]
    pub const fn null() -> Self {
        Self { ticks: 0 }
    }

    /// Current time.
    pub fn now() -> Self {
        Utc::now().into()
    }

    /// Raw ticks.
    #[inline]
    pub const fn ticks(&self) -> i64 {
        self.ticks
    }

    /// Returns `true` for the null/minimum date.
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.ticks <= 0
    }

    /// Converts to a chrono timestamp, clamping to the representable range.
    pub fn to_chrono(&self) -> chrono::DateTime<Utc> {
        let ticks = self.ticks.clamp(0, Self::MAX_DATE_TICKS);
        let seconds = ticks / TICKS_PER_SECOND - SECONDS_1601_TO_1970;
        let nanos = ((ticks % TICKS_PER_SECOND) * 100) as u32;
        Utc.timestamp_opt(seconds, nanos)
            .single()
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(value: chrono::DateTime<Utc>) -> Self {
        let seconds = value.timestamp() + SECONDS_1601_TO_1970;
        if seconds < 0 {
            return Self::null();
        }
        let ticks = seconds
            .saturating_mul(TICKS_PER_SECOND)
            .saturating_add(i64::from(value.timestamp_subsec_nanos() / 100));
        if ticks >= Self::MAX_DATE_TICKS {
            Self::from_ticks(i64::MAX)
        } else {
            Self::from_ticks(ticks)
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_chrono().to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl BinaryEncodable for DateTime {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_i64(self.ticks);
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        decoder.read_i64().map(Self::from_ticks)
    }
}

impl JsonEncodable for DateTime {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::String(self.to_string()))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        let text = expect_str(value, "DateTime")?;
        chrono::DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc).into())
            .map_err(|e| CodecError::json(format!("invalid DateTime '{}': {}", text, e)))
    }
}

// =============================================================================
// ByteString / XmlElement
// =============================================================================

/// Opaque byte sequence. A null byte string decodes as empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteString(pub Vec<u8>);

impl ByteString {
    /// Returns the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl BinaryEncodable for ByteString {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_byte_string(&self.0)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(Self(decoder.read_byte_string()?.unwrap_or_default().to_vec()))
    }
}

impl JsonEncodable for ByteString {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::String(BASE64.encode(&self.0)))
    }

    fn from_json(value: &Value, _registry: &TypeRegistry) -> CodecResult<Self> {
        BASE64
            .decode(expect_str(value, "ByteString")?)
            .map(Self)
            .map_err(|e| CodecError::json(format!("invalid base64: {}", e)))
    }
}

/// XML fragment carried as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct XmlElement(pub String);

impl BinaryEncodable for XmlElement {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_string(&self.0)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        String::decode(decoder).map(Self)
    }
}

impl JsonEncodable for XmlElement {
    fn to_json(&self) -> CodecResult<Value> {
        Ok(Value::String(self.0.clone()))
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        String::from_json(value, registry).map(Self)
    }
}

// =============================================================================
// QualifiedName / LocalizedText
// =============================================================================

/// Name qualified by a namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,
    /// Name text.
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }
}

impl BinaryEncodable for QualifiedName {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_u16(self.namespace_index);
        encoder.write_string(&self.name)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            namespace_index: decoder.read_u16()?,
            name: String::decode(decoder)?,
        })
    }
}

impl JsonEncodable for QualifiedName {
    fn to_json(&self) -> CodecResult<Value> {
        let mut object = JsonObject::new();
        object.field("Name", &self.name)?;
        if self.namespace_index != 0 {
            object.field("Uri", &self.namespace_index)?;
        }
        Ok(object.into_value())
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        let fields = JsonFields::new(value, "QualifiedName", registry)?;
        Ok(Self {
            namespace_index: fields.get("Uri")?,
            name: fields.get("Name")?,
        })
    }
}

/// Text with an optional locale. Either part may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalizedText {
    /// Locale identifier such as `en-US`.
    pub locale: Option<String>,
    /// Text.
    pub text: Option<String>,
}

impl LocalizedText {
    /// Creates a text without locale.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: None,
            text: Some(text.into()),
        }
    }
}

impl BinaryEncodable for LocalizedText {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= 0x01;
        }
        if self.text.is_some() {
            mask |= 0x02;
        }
        encoder.write_u8(mask);
        if let Some(locale) = &self.locale {
            encoder.write_string(locale)?;
        }
        if let Some(text) = &self.text {
            encoder.write_string(text)?;
        }
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        let mask = decoder.read_u8()?;
        let locale = if mask & 0x01 != 0 {
            Some(String::decode(decoder)?)
        } else {
            None
        };
        let text = if mask & 0x02 != 0 {
            Some(String::decode(decoder)?)
        } else {
            None
        };
        Ok(Self { locale, text })
    }
}

impl JsonEncodable for LocalizedText {
    fn to_json(&self) -> CodecResult<Value> {
        let mut object = JsonObject::new();
        object.optional("Locale", self.locale.as_ref())?;
        object.optional("Text", self.text.as_ref())?;
        Ok(object.into_value())
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        let fields = JsonFields::new(value, "LocalizedText", registry)?;
        Ok(Self {
            locale: fields.optional("Locale")?,
            text: fields.optional("Text")?,
        })
    }
}

// =============================================================================
// DataValue
// =============================================================================

const DV_VALUE: u8 = 0x01;
const DV_STATUS: u8 = 0x02;
const DV_SOURCE_TIMESTAMP: u8 = 0x04;
const DV_SERVER_TIMESTAMP: u8 = 0x08;
const DV_SOURCE_PICOSECONDS: u8 = 0x10;
const DV_SERVER_PICOSECONDS: u8 = 0x20;

/// Value with status and timestamps.
///
/// An empty variant means the value is absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value.
    pub value: Variant,
    /// Status; absent means Good.
    pub status: Option<StatusCode>,
    /// Source timestamp.
    pub source_timestamp: Option<DateTime>,
    /// Source timestamp picoseconds.
    pub source_picoseconds: Option<u16>,
    /// Server timestamp.
    pub server_timestamp: Option<DateTime>,
    /// Server timestamp picoseconds.
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    /// Creates a good value without timestamps.
    pub fn new(value: impl Into<Variant>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Creates a value-less result carrying only a status.
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Effective status (Good when absent).
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }
}

impl BinaryEncodable for DataValue {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        let mut mask = 0u8;
        if !self.value.is_empty() {
            mask |= DV_VALUE;
        }
        if self.status.is_some() {
            mask |= DV_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= DV_SOURCE_TIMESTAMP;
        }
        if self.server_timestamp.is_some() {
            mask |= DV_SERVER_TIMESTAMP;
        }
        if self.source_picoseconds.is_some() {
            mask |= DV_SOURCE_PICOSECONDS;
        }
        if self.server_picoseconds.is_some() {
            mask |= DV_SERVER_PICOSECONDS;
        }
        encoder.write_u8(mask);

        if !self.value.is_empty() {
            self.value.encode(encoder)?;
        }
        if let Some(status) = self.status {
            status.encode(encoder)?;
        }
        if let Some(ts) = self.source_timestamp {
            ts.encode(encoder)?;
        }
        if let Some(ps) = self.source_picoseconds {
            encoder.write_u16(ps);
        }
        if let Some(ts) = self.server_timestamp {
            ts.encode(encoder)?;
        }
        if let Some(ps) = self.server_picoseconds {
            encoder.write_u16(ps);
        }
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        let mask = decoder.read_u8()?;
        let mut value = Self::default();
        if mask & DV_VALUE != 0 {
            value.value = Variant::decode(decoder)?;
        }
        if mask & DV_STATUS != 0 {
            value.status = Some(StatusCode::decode(decoder)?);
        }
        if mask & DV_SOURCE_TIMESTAMP != 0 {
            value.source_timestamp = Some(DateTime::decode(decoder)?);
        }
        if mask & DV_SOURCE_PICOSECONDS != 0 {
            value.source_picoseconds = Some(decoder.read_u16()?);
        }
        if mask & DV_SERVER_TIMESTAMP != 0 {
            value.server_timestamp = Some(DateTime::decode(decoder)?);
        }
        if mask & DV_SERVER_PICOSECONDS != 0 {
            value.server_picoseconds = Some(decoder.read_u16()?);
        }
        Ok(value)
    }
}

impl JsonEncodable for DataValue {
    fn to_json(&self) -> CodecResult<Value> {
        let mut object = JsonObject::new();
        object.field("Value", &self.value)?;
        object.optional("StatusCode", self.status.as_ref())?;
        object.optional("SourceTimestamp", self.source_timestamp.as_ref())?;
        object.optional("SourcePicoseconds", self.source_picoseconds.as_ref())?;
        object.optional("ServerTimestamp", self.server_timestamp.as_ref())?;
        object.optional("ServerPicoseconds", self.server_picoseconds.as_ref())?;
        Ok(object.into_value())
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        let fields = JsonFields::new(value, "DataValue", registry)?;
        Ok(Self {
            value: fields.get("Value")?,
            status: fields.optional("StatusCode")?,
            source_timestamp: fields.optional("SourceTimestamp")?,
            source_picoseconds: fields.optional("SourcePicoseconds")?,
            server_timestamp: fields.optional("ServerTimestamp")?,
            server_picoseconds: fields.optional("ServerPicoseconds")?,
        })
    }
}

// =============================================================================
// DiagnosticInfo
// =============================================================================

const DI_SYMBOLIC_ID: u8 = 0x01;
const DI_NAMESPACE_URI: u8 = 0x02;
const DI_LOCALIZED_TEXT: u8 = 0x04;
const DI_LOCALE: u8 = 0x08;
const DI_ADDITIONAL_INFO: u8 = 0x10;
const DI_INNER_STATUS_CODE: u8 = 0x20;
const DI_INNER_DIAGNOSTIC_INFO: u8 = 0x40;

/// Structured diagnostic detail. Indexes refer to the response string table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticInfo {
    /// Index of the symbolic id.
    pub symbolic_id: Option<i32>,
    /// Index of the namespace URI.
    pub namespace_uri: Option<i32>,
    /// Index of the locale.
    pub locale: Option<i32>,
    /// Index of the localized text.
    pub localized_text: Option<i32>,
    /// Vendor specific detail.
    pub additional_info: Option<String>,
    /// Status of a nested operation.
    pub inner_status_code: Option<StatusCode>,
    /// Diagnostics of a nested operation.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl DiagnosticInfo {
    /// Returns `true` if no field is present.
    pub fn is_empty(&self) -> bool {
        self.mask() == 0
    }

    fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.symbolic_id.is_some() {
            mask |= DI_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            mask |= DI_NAMESPACE_URI;
        }
        if self.localized_text.is_some() {
            mask |= DI_LOCALIZED_TEXT;
        }
        if self.locale.is_some() {
            mask |= DI_LOCALE;
        }
        if self.additional_info.is_some() {
            mask |= DI_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            mask |= DI_INNER_STATUS_CODE;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= DI_INNER_DIAGNOSTIC_INFO;
        }
        mask
    }
}

impl BinaryEncodable for DiagnosticInfo {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_u8(self.mask());
        if let Some(v) = self.symbolic_id {
            encoder.write_i32(v);
        }
        if let Some(v) = self.namespace_uri {
            encoder.write_i32(v);
        }
        if let Some(v) = self.locale {
            encoder.write_i32(v);
        }
        if let Some(v) = self.localized_text {
            encoder.write_i32(v);
        }
        if let Some(v) = &self.additional_info {
            encoder.write_string(v)?;
        }
        if let Some(v) = self.inner_status_code {
            v.encode(encoder)?;
        }
        if let Some(v) = &self.inner_diagnostic_info {
            v.encode(encoder)?;
        }
        Ok(())
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        decoder.enter()?;
        let mask = decoder.read_u8()?;
        let mut info = Self::default();
        if mask & DI_SYMBOLIC_ID != 0 {
            info.symbolic_id = Some(decoder.read_i32()?);
        }
        if mask & DI_NAMESPACE_URI != 0 {
            info.namespace_uri = Some(decoder.read_i32()?);
        }
        if mask & DI_LOCALE != 0 {
            info.locale = Some(decoder.read_i32()?);
        }
        if mask & DI_LOCALIZED_TEXT != 0 {
            info.localized_text = Some(decoder.read_i32()?);
        }
        if mask & DI_ADDITIONAL_INFO != 0 {
            info.additional_info = Some(String::decode(decoder)?);
        }
        if mask & DI_INNER_STATUS_CODE != 0 {
            info.inner_status_code = Some(StatusCode::decode(decoder)?);
        }
        if mask & DI_INNER_DIAGNOSTIC_INFO != 0 {
            info.inner_diagnostic_info = Some(Box::new(Self::decode(decoder)?));
        }
        decoder.leave();
        Ok(info)
    }
}

impl JsonEncodable for DiagnosticInfo {
    fn to_json(&self) -> CodecResult<Value> {
        let mut object = JsonObject::new();
        object.optional("SymbolicId", self.symbolic_id.as_ref())?;
        object.optional("NamespaceUri", self.namespace_uri.as_ref())?;
        object.optional("Locale", self.locale.as_ref())?;
        object.optional("LocalizedText", self.localized_text.as_ref())?;
        object.optional("AdditionalInfo", self.additional_info.as_ref())?;
        object.optional("InnerStatusCode", self.inner_status_code.as_ref())?;
        if let Some(inner) = &self.inner_diagnostic_info {
            object.field("InnerDiagnosticInfo", inner.as_ref())?;
        }
        Ok(object.into_value())
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let fields = JsonFields::new(value, "DiagnosticInfo", registry)?;
        Ok(Self {
            symbolic_id: fields.optional("SymbolicId")?,
            namespace_uri: fields.optional("NamespaceUri")?,
            locale: fields.optional("Locale")?,
            localized_text: fields.optional("LocalizedText")?,
            additional_info: fields.optional("AdditionalInfo")?,
            inner_status_code: fields.optional("InnerStatusCode")?,
            inner_diagnostic_info: fields
                .optional::<DiagnosticInfo>("InnerDiagnosticInfo")?
                .map(Box::new),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

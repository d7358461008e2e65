// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration types.
//!
//! - **ClientConfig**: endpoint, security, identity and timeouts, with a builder
//! - **SubscriptionSettings** / **MonitoredItemSettings**: requested parameters
//! - **PublishSettings**: publish pipeline tuning (cap, hold timeout, backoff)
//! - **ReconnectSettings**: recovery budget after a transport fault
//!
//! All durations use humantime strings (`"500ms"`, `"1m 30s"`) in serialized
//! form.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use strand_opcua::types::{ClientConfig, SecurityMode};
//!
//! let config = ClientConfig::builder()
//!     .endpoint("opc.tcp://localhost:4840")
//!     .security_mode(SecurityMode::None)
//!     .request_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.endpoint, "opc.tcp://localhost:4840");
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::retry::ExponentialBackoff;
use crate::codec::DecodingLimits;
use crate::error::{ConfigurationError, OpcUaError, OpcUaResult, SubscriptionError};

// =============================================================================
// SecurityMode
// =============================================================================

/// Message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Messages are neither signed nor encrypted.
    #[default]
    None,

    /// Messages are signed but not encrypted.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Wire value of the mode.
    pub const fn value(&self) -> i32 {
        match self {
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }

    /// Parses the wire value.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            2 => Some(Self::Sign),
            3 => Some(Self::SignAndEncrypt),
            _ => Option::None,
        }
    }

    /// Returns `true` if this mode provides no security.
    #[inline]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityMode {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" | "nosecurity" => Ok(Self::None),
            "sign" | "signed" => Ok(Self::Sign),
            "signandencrypt" | "signencrypt" | "encrypted" => Ok(Self::SignAndEncrypt),
            _ => Err(OpcUaError::configuration(
                ConfigurationError::invalid_security_mode(s),
            )),
        }
    }
}

// =============================================================================
// SecurityPolicy
// =============================================================================

/// Channel security policy.
///
/// Only `None` is implemented in-crate; the others need a
/// [`ChannelSecurity`](crate::channel::ChannelSecurity) provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security.
    #[default]
    None,

    /// Basic256Sha256.
    Basic256Sha256,

    /// Aes128Sha256RsaOaep.
    Aes128Sha256RsaOaep,

    /// Aes256Sha256RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Policy URI sent in the asymmetric security header.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128Sha256RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256Sha256RsaPss",
        }
    }

    /// Parses a policy URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            s if s.ends_with("#None") => Some(Self::None),
            s if s.ends_with("#Basic256Sha256") => Some(Self::Basic256Sha256),
            s if s.ends_with("#Aes128_Sha256_RsaOaep") => Some(Self::Aes128Sha256RsaOaep),
            s if s.ends_with("#Aes256_Sha256_RsaPss") => Some(Self::Aes256Sha256RsaPss),
            _ => Option::None,
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(policy) = Self::from_uri(s) {
            return Ok(policy);
        }

        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            "aes128sha256rsaoaep" | "aes128" => Ok(Self::Aes128Sha256RsaOaep),
            "aes256sha256rsapss" | "aes256" => Ok(Self::Aes256Sha256RsaPss),
            _ => Err(OpcUaError::configuration(
                ConfigurationError::invalid_security_policy(s),
            )),
        }
    }
}

// =============================================================================
// UserIdentity
// =============================================================================

/// How the session authenticates.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserIdentity {
    /// Anonymous.
    #[default]
    Anonymous,

    /// User name and password.
    UserName {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl UserIdentity {
    /// Returns `true` for anonymous authentication.
    #[inline]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Token type name.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Anonymous => "Anonymous",
            Self::UserName { .. } => "UserName",
        }
    }
}

// Keeps passwords out of logs.
impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => write!(f, "UserName({})", username),
        }
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL (`opc.tcp://host:port/path`).
    pub endpoint: String,

    /// Security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// Security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// User identity.
    #[serde(default)]
    pub identity: UserIdentity,

    /// Application name sent in CreateSession.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_uri: Option<String>,

    /// Session name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Requested secure channel token lifetime.
    #[serde(default = "default_channel_lifetime", with = "humantime_serde")]
    pub channel_lifetime: Duration,

    /// Timeout for ordinary service calls.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Timeout for establishing the transport.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Idle time after which the session reads the server state.
    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Default subscription parameters.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Publish pipeline tuning.
    #[serde(default)]
    pub publish: PublishSettings,

    /// Recovery after transport faults.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Decoder bounds.
    #[serde(default)]
    pub limits: DecodingLimits,
}

fn default_application_name() -> String {
    "Strand OPC UA Client".to_string()
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_channel_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(10)
}

impl ClientConfig {
    /// Creates a configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Creates a configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Loads a configuration from JSON text.
    pub fn from_json(text: &str) -> OpcUaResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| OpcUaError::invalid_config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates this configuration.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.endpoint.is_empty() {
            return Err(OpcUaError::configuration(ConfigurationError::missing_field(
                "endpoint",
            )));
        }

        if !self.endpoint.starts_with("opc.tcp://") {
            return Err(OpcUaError::configuration(
                ConfigurationError::invalid_endpoint(
                    &self.endpoint,
                    "Endpoint must start with opc.tcp://",
                ),
            ));
        }

        if self.security_mode.is_none() != (self.security_policy == SecurityPolicy::None) {
            return Err(OpcUaError::invalid_config(
                "security_policy",
                format!(
                    "Security mode {} does not match policy {}",
                    self.security_mode, self.security_policy
                ),
            ));
        }

        for (field, value) in [
            ("session_timeout", self.session_timeout),
            ("channel_lifetime", self.channel_lifetime),
            ("request_timeout", self.request_timeout),
            ("connect_timeout", self.connect_timeout),
            ("keepalive_interval", self.keepalive_interval),
        ] {
            if value.is_zero() {
                return Err(OpcUaError::invalid_config(field, "must be greater than 0"));
            }
        }

        self.subscription.validate()?;
        self.publish.validate()?;
        self.reconnect.validate()?;
        Ok(())
    }

    /// Application URI, derived from the name when not set.
    pub fn effective_application_uri(&self) -> String {
        self.application_uri.clone().unwrap_or_else(|| {
            format!("urn:strand:client:{}", self.application_name.replace(' ', ""))
        })
    }

    /// Session name, derived from the application name when not set.
    pub fn effective_session_name(&self) -> String {
        self.session_name
            .clone()
            .unwrap_or_else(|| format!("{} session", self.application_name))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            security_mode: SecurityMode::default(),
            security_policy: SecurityPolicy::default(),
            identity: UserIdentity::default(),
            application_name: default_application_name(),
            application_uri: None,
            session_name: None,
            session_timeout: default_session_timeout(),
            channel_lifetime: default_channel_lifetime(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            keepalive_interval: default_keepalive_interval(),
            subscription: SubscriptionSettings::default(),
            publish: PublishSettings::default(),
            reconnect: ReconnectSettings::default(),
            limits: DecodingLimits::default(),
        }
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
    endpoint_set: bool,
}

impl ClientConfigBuilder {
    /// Sets the endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self.endpoint_set = true;
        self
    }

    /// Sets the security mode.
    pub fn security_mode(mut self, mode: SecurityMode) -> Self {
        self.config.security_mode = mode;
        self
    }

    /// Sets the security policy.
    pub fn security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.config.security_policy = policy;
        self
    }

    /// Authenticates with user name and password.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.identity = UserIdentity::UserName {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Authenticates anonymously.
    pub fn anonymous(mut self) -> Self {
        self.config.identity = UserIdentity::Anonymous;
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Sets the session name.
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = Some(name.into());
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Sets the requested channel token lifetime.
    pub fn channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.channel_lifetime = lifetime;
        self
    }

    /// Sets the service call timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the session keep-alive interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Sets the default subscription parameters.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.config.subscription = settings;
        self
    }

    /// Sets the publish pipeline tuning.
    pub fn publish(mut self, settings: PublishSettings) -> Self {
        self.config.publish = settings;
        self
    }

    /// Sets the reconnect policy.
    pub fn reconnect(mut self, settings: ReconnectSettings) -> Self {
        self.config.reconnect = settings;
        self
    }

    /// Sets the decoding limits.
    pub fn limits(mut self, limits: DecodingLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> OpcUaResult<ClientConfig> {
        if !self.endpoint_set {
            return Err(OpcUaError::configuration(ConfigurationError::missing_field(
                "endpoint",
            )));
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Requested subscription parameters.
///
/// The server may revise them; the revised values are what the subscription
/// runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(default = "default_publishing_interval", with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Lifetime count in publishing intervals.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Keep-alive count in publishing intervals.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,

    /// Maximum notifications per publish (0 = unlimited).
    #[serde(default)]
    pub max_notifications_per_publish: u32,

    /// Relative priority.
    #[serde(default)]
    pub priority: u8,

    /// Publishing enabled at creation.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lifetime_count() -> u32 {
    60
}

fn default_keepalive_count() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            keepalive_count: default_keepalive_count(),
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }
}

impl SubscriptionSettings {
    /// Creates settings with a custom publishing interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            publishing_interval: interval,
            ..Default::default()
        }
    }

    /// Sets the keep-alive count, raising the lifetime count if needed.
    pub fn keepalive_count(mut self, count: u32) -> Self {
        self.keepalive_count = count;
        self.lifetime_count = self.lifetime_count.max(count.saturating_mul(3));
        self
    }

    /// Checks the counts and interval.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.publishing_interval.is_zero() {
            return Err(SubscriptionError::invalid_settings(
                "publishing interval must be greater than 0",
            )
            .into());
        }
        if self.keepalive_count == 0 {
            return Err(
                SubscriptionError::invalid_settings("keep-alive count must be at least 1").into(),
            );
        }
        if self.lifetime_count < self.keepalive_count.saturating_mul(3) {
            return Err(SubscriptionError::invalid_settings(format!(
                "lifetime count {} must be at least three times the keep-alive count {}",
                self.lifetime_count, self.keepalive_count
            ))
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// MonitoredItemSettings
// =============================================================================

/// Requested monitored item parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemSettings {
    /// Sampling interval.
    #[serde(default = "default_sampling_interval", with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Server-side queue size.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Overflow policy; `true` drops the oldest value.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,

    /// Monitoring mode.
    #[serde(default)]
    pub monitoring_mode: MonitoringMode,

    /// Data change trigger.
    #[serde(default)]
    pub trigger: DataChangeTrigger,

    /// Deadband filter.
    #[serde(default, skip_serializing_if = "DeadbandSettings::is_none")]
    pub deadband: DeadbandSettings,
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_queue_size() -> u32 {
    1
}

impl Default for MonitoredItemSettings {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            queue_size: default_queue_size(),
            discard_oldest: true,
            monitoring_mode: MonitoringMode::default(),
            trigger: DataChangeTrigger::default(),
            deadband: DeadbandSettings::None,
        }
    }
}

impl MonitoredItemSettings {
    /// Creates settings with a custom sampling interval.
    pub fn with_sampling_interval(interval: Duration) -> Self {
        Self {
            sampling_interval: interval,
            ..Default::default()
        }
    }

    /// Sets the deadband filter.
    pub fn with_deadband(mut self, deadband: DeadbandSettings) -> Self {
        self.deadband = deadband;
        self
    }

    /// Sets the queue size and overflow policy.
    pub fn with_queue(mut self, queue_size: u32, discard_oldest: bool) -> Self {
        self.queue_size = queue_size;
        self.discard_oldest = discard_oldest;
        self
    }

    /// Returns `true` if a data change filter has to be sent.
    pub fn has_filter(&self) -> bool {
        !self.deadband.is_none() || self.trigger != DataChangeTrigger::default()
    }
}

// =============================================================================
// MonitoringMode
// =============================================================================

/// Monitoring mode of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Neither sampling nor reporting.
    Disabled,

    /// Sampling without reporting.
    Sampling,

    /// Sampling and reporting.
    #[default]
    Reporting,
}

impl MonitoringMode {
    /// Wire value.
    pub const fn value(&self) -> i32 {
        match self {
            Self::Disabled => 0,
            Self::Sampling => 1,
            Self::Reporting => 2,
        }
    }

    /// Parses the wire value.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Sampling),
            2 => Some(Self::Reporting),
            _ => None,
        }
    }
}

// =============================================================================
// DataChangeTrigger
// =============================================================================

/// Which changes produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataChangeTrigger {
    /// Status changes only.
    Status,

    /// Status or value changes.
    #[default]
    StatusValue,

    /// Status, value or source timestamp changes.
    StatusValueTimestamp,
}

impl DataChangeTrigger {
    /// Wire value.
    pub const fn value(&self) -> i32 {
        match self {
            Self::Status => 0,
            Self::StatusValue => 1,
            Self::StatusValueTimestamp => 2,
        }
    }

    /// Parses the wire value.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Status),
            1 => Some(Self::StatusValue),
            2 => Some(Self::StatusValueTimestamp),
            _ => None,
        }
    }
}

// =============================================================================
// DeadbandSettings
// =============================================================================

/// Deadband filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeadbandSettings {
    /// No deadband.
    #[default]
    None,

    /// Report when the change exceeds an absolute value.
    Absolute {
        /// Change threshold.
        value: f64,
    },

    /// Report when the change exceeds a percentage of the EU range.
    Percent {
        /// Percentage (0-100).
        percent: f64,
    },
}

impl DeadbandSettings {
    /// Creates an absolute deadband.
    pub fn absolute(value: f64) -> Self {
        Self::Absolute { value }
    }

    /// Creates a percent deadband.
    pub fn percent(percent: f64) -> Self {
        Self::Percent { percent }
    }

    /// Returns `true` if there is no deadband.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Wire deadband type (0 none, 1 absolute, 2 percent).
    pub const fn type_value(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Absolute { .. } => 1,
            Self::Percent { .. } => 2,
        }
    }

    /// Threshold value sent on the wire.
    pub const fn threshold(&self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Absolute { value } => *value,
            Self::Percent { percent } => *percent,
        }
    }
}

// =============================================================================
// PublishSettings
// =============================================================================

/// Publish pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Upper bound on outstanding publish requests.
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,

    /// How long an out-of-order notification waits for the missing sequence
    /// numbers before the gap is reported and skipped.
    #[serde(default = "default_hold_timeout", with = "humantime_serde")]
    pub hold_timeout: Duration,

    /// Multiplier on `keepalive_count × publishing_interval` for the
    /// staleness window.
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,

    /// Timeout of a single publish round trip.
    #[serde(default = "default_publish_timeout", with = "humantime_serde")]
    pub publish_timeout: Duration,

    /// Backoff applied after a timed-out or failed publish.
    #[serde(default)]
    pub backoff: ExponentialBackoff,
}

fn default_max_outstanding() -> usize {
    5
}

fn default_hold_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_safety_factor() -> f64 {
    1.5
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_outstanding: default_max_outstanding(),
            hold_timeout: default_hold_timeout(),
            safety_factor: default_safety_factor(),
            publish_timeout: default_publish_timeout(),
            backoff: ExponentialBackoff::default(),
        }
    }
}

impl PublishSettings {
    /// Checks the settings.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.max_outstanding == 0 {
            return Err(OpcUaError::invalid_config(
                "publish.max_outstanding",
                "must be at least 1",
            ));
        }
        if !(self.safety_factor >= 1.0) {
            return Err(OpcUaError::invalid_config(
                "publish.safety_factor",
                "must be at least 1.0",
            ));
        }
        if self.publish_timeout.is_zero() {
            return Err(OpcUaError::invalid_config(
                "publish.publish_timeout",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// ReconnectSettings
// =============================================================================

/// Recovery policy after a transport fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Attempts before giving up (0 = never give up).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts.
    #[serde(default = "default_reconnect_backoff")]
    pub backoff: ExponentialBackoff,
}

fn default_max_attempts() -> u32 {
    0
}

fn default_reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(30)).with_jitter(0.2)
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_reconnect_backoff(),
        }
    }
}

impl ReconnectSettings {
    /// Returns `true` if `attempt` (1-based) is within the budget.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    /// Checks the settings.
    pub fn validate(&self) -> OpcUaResult<()> {
        self.backoff.validate("reconnect.backoff")
    }
}

// =============================================================================
// humantime_serde helper
// =============================================================================

pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_endpoint() {
        assert!(ClientConfig::builder().build().is_err());
        let config = ClientConfig::builder()
            .endpoint("opc.tcp://plc:4840")
            .build()
            .unwrap();
        assert_eq!(config.security_policy, SecurityPolicy::None);
    }

    #[test]
    fn test_endpoint_scheme_checked() {
        let result = ClientConfig::builder().endpoint("http://plc:4840").build();
        assert!(matches!(result, Err(OpcUaError::Configuration(_))));
    }

    #[test]
    fn test_mode_and_policy_must_agree() {
        let result = ClientConfig::builder()
            .endpoint("opc.tcp://plc:4840")
            .security_mode(SecurityMode::Sign)
            .build();
        assert!(result.is_err());

        let result = ClientConfig::builder()
            .endpoint("opc.tcp://plc:4840")
            .security_mode(SecurityMode::SignAndEncrypt)
            .security_policy(SecurityPolicy::Basic256Sha256)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_from_json_with_humantime() {
        let config = ClientConfig::from_json(
            r#"{
                "endpoint": "opc.tcp://localhost:4840",
                "request_timeout": "2s 500ms",
                "identity": {"type": "user_name", "username": "op", "password": "pw"},
                "subscription": {"publishing_interval": "500ms", "keepalive_count": 10},
                "publish": {"max_outstanding": 3, "hold_timeout": "1s"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.subscription.publishing_interval, Duration::from_millis(500));
        assert_eq!(config.publish.max_outstanding, 3);
        assert_eq!(config.publish.safety_factor, 1.5);
        assert!(!config.identity.is_anonymous());
        assert!(!format!("{:?}", config.identity).contains("pw"));
    }

    #[test]
    fn test_subscription_counts_validated() {
        let settings = SubscriptionSettings {
            lifetime_count: 10,
            keepalive_count: 10,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert!(SubscriptionSettings::default()
            .keepalive_count(30)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"
                .parse::<SecurityPolicy>()
                .unwrap(),
            SecurityPolicy::Basic256Sha256
        );
        assert_eq!("none".parse::<SecurityPolicy>().unwrap(), SecurityPolicy::None);
        assert!("rot13".parse::<SecurityPolicy>().is_err());
        assert_eq!("sign-and-encrypt".parse::<SecurityMode>().unwrap(), SecurityMode::SignAndEncrypt);
    }

    #[test]
    fn test_deadband_wire_values() {
        assert_eq!(DeadbandSettings::absolute(0.5).type_value(), 1);
        assert_eq!(DeadbandSettings::percent(10.0).threshold(), 10.0);
        assert!(!MonitoredItemSettings::default().has_filter());
        assert!(MonitoredItemSettings::default()
            .with_deadband(DeadbandSettings::absolute(1.0))
            .has_filter());
    }

    #[test]
    fn test_reconnect_budget() {
        let unlimited = ReconnectSettings::default();
        assert!(unlimited.allows(1_000));
        let bounded = ReconnectSettings {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(bounded.allows(3));
        assert!(!bounded.allows(4));
    }
}

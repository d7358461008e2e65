// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! High-level OPC UA client.
//!
//! [`OpcUaClient`] is the composition root: it builds the codec, the channel
//! factory, the session and the dispatch engine, then exposes node services
//! and subscription management on top of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::engine::{Command, ConnectionStatus, EngineHandle, MonitoredItemResult};
use super::monitored_item::MonitoredItemDefinition;
use super::session::Session;
use super::sink::NotificationSink;
use super::subscription::SubscriptionInfo;
use super::transport::{TransportFactory, UaTcpTransportFactory};
use crate::channel::ChannelSecurity;
use crate::codec::{DataValue, NodeId, StatusCode, Variant, WireCodec};
use crate::error::{OpcUaError, OpcUaResult};
use crate::services::{
    attribute_id, BrowseDescription, BrowseRequest, CallMethodRequest, CallMethodResult,
    CallRequest, ReadRequest, ReadValueId, ReferenceDescription, ServiceCall,
    TimestampsToReturn, WriteRequest, WriteValue,
};
use crate::types::{ClientConfig, SubscriptionSettings};

// =============================================================================
// ClientStats
// =============================================================================

/// Statistics for node service calls.
#[derive(Debug, Default)]
pub struct ClientStats {
    reads: AtomicU64,
    writes: AtomicU64,
    browses: AtomicU64,
    calls: AtomicU64,
    errors: AtomicU64,
    total_response_time_us: AtomicU64,
}

impl ClientStats {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, counter: &AtomicU64, elapsed: Duration) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records a failed call.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of successful reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of successful writes.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of successful browses.
    pub fn browses(&self) -> u64 {
        self.browses.load(Ordering::Relaxed)
    }

    /// Number of successful method calls.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Number of failed calls.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn successes(&self) -> u64 {
        self.reads() + self.writes() + self.browses() + self.calls()
    }

    /// Fraction of calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        let total = self.successes() + self.errors();
        if total == 0 {
            return 1.0;
        }
        self.successes() as f64 / total as f64
    }

    /// Average round trip of successful calls.
    pub fn average_response_time(&self) -> Duration {
        let total = self.successes();
        if total == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_response_time_us.load(Ordering::Relaxed) / total)
    }

    /// Resets all counters.
    pub fn reset(&self) {
        for counter in [
            &self.reads,
            &self.writes,
            &self.browses,
            &self.calls,
            &self.errors,
            &self.total_response_time_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Clone, Copy)]
enum Operation {
    Read,
    Write,
    Browse,
    Call,
}

// =============================================================================
// OpcUaClient
// =============================================================================

/// OPC UA client bound to one session.
///
/// Node services go straight to the session. Subscriptions are owned by a
/// dispatch task that keeps publish requests outstanding and recovers the
/// session after faults; the client only sends it commands.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use strand_opcua::{
///     ChannelSink, ClientConfig, MonitoredItemDefinition, MonitoredItemSettings, NodeId,
///     OpcUaClient, SubscriptionSettings,
/// };
///
/// # async fn run() -> strand_opcua::OpcUaResult<()> {
/// let client = OpcUaClient::connect(ClientConfig::new("opc.tcp://localhost:4840")).await?;
///
/// let (sink, mut events) = ChannelSink::new();
/// let settings = SubscriptionSettings::with_interval(Duration::from_millis(500));
/// let item = MonitoredItemDefinition::value(1, NodeId::numeric(0, 2258), MonitoredItemSettings::default());
/// let (handle, _results) = client.subscribe(settings, vec![item], sink).await?;
///
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// client.delete_subscription(handle).await?;
/// client.disconnect().await
/// # }
/// ```
#[derive(Debug)]
pub struct OpcUaClient {
    session: Arc<Session>,
    engine: EngineHandle,
    codec: WireCodec,
    stats: ClientStats,
}

impl OpcUaClient {
    /// Connects to the configured endpoint over `opc.tcp`.
    pub async fn connect(config: ClientConfig) -> OpcUaResult<Self> {
        Self::connect_secured(config, None).await
    }

    /// Connects with a security provider for the configured policy.
    pub async fn connect_secured(
        config: ClientConfig,
        provider: Option<Arc<dyn ChannelSecurity>>,
    ) -> OpcUaResult<Self> {
        config.validate()?;
        let codec = WireCodec::standard().with_limits(config.limits);
        let factory = UaTcpTransportFactory::from_config(&config, codec.clone(), provider)?;
        Self::start(config, Arc::new(factory), codec).await
    }

    /// Connects through a custom transport factory.
    pub async fn connect_with(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> OpcUaResult<Self> {
        config.validate()?;
        let codec = WireCodec::standard().with_limits(config.limits);
        Self::start(config, factory, codec).await
    }

    async fn start(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
        codec: WireCodec,
    ) -> OpcUaResult<Self> {
        let endpoint = config.endpoint.clone();
        let session = Arc::new(Session::connect(factory, config).await?);
        let engine = EngineHandle::spawn(Arc::clone(&session), codec.clone());

        tracing::info!(endpoint = %endpoint, "OPC UA client connected");

        Ok(Self {
            session,
            engine,
            codec,
            stats: ClientStats::new(),
        })
    }

    /// Closes the session, deleting its subscriptions on the server.
    pub async fn disconnect(&self) -> OpcUaResult<()> {
        let result = self.engine.shutdown().await;
        tracing::info!(
            endpoint = %self.session.config().endpoint,
            "OPC UA client disconnected"
        );
        result
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Underlying session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Codec used for this connection.
    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        self.session.config()
    }

    /// Call statistics.
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Current connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.engine.status().borrow()
    }

    /// Receiver that observes connection status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.engine.status()
    }

    // =========================================================================
    // Node services
    // =========================================================================

    async fn invoke<R: ServiceCall>(
        &self,
        operation: Operation,
        request: R,
    ) -> OpcUaResult<R::Response> {
        let started = Instant::now();
        match self.session.call(request).await {
            Ok(response) => {
                let counter = match operation {
                    Operation::Read => &self.stats.reads,
                    Operation::Write => &self.stats.writes,
                    Operation::Browse => &self.stats.browses,
                    Operation::Call => &self.stats.calls,
                };
                self.stats.record(counter, started.elapsed());
                Ok(response)
            }
            Err(e) => {
                self.stats.record_error();
                e.log(R::NAME);
                Err(e)
            }
        }
    }

    /// Reads the value attribute of each node.
    ///
    /// Per-node failures are reported in each [`DataValue`]'s status.
    pub async fn read(&self, nodes: &[NodeId]) -> OpcUaResult<Vec<DataValue>> {
        let request = ReadRequest {
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: nodes.iter().cloned().map(ReadValueId::value).collect(),
            ..Default::default()
        };
        let response = self.invoke(Operation::Read, request).await?;
        expect_count("Read", nodes.len(), response.results.len())?;
        Ok(response.results)
    }

    /// Reads one value, failing when its status is bad.
    pub async fn read_value(&self, node: &NodeId) -> OpcUaResult<DataValue> {
        let value = self
            .read(std::slice::from_ref(node))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OpcUaError::service_fault("Read", StatusCode::BAD_UNEXPECTED_ERROR))?;
        if value.status().is_bad() {
            return Err(OpcUaError::service_fault("Read", value.status()));
        }
        Ok(value)
    }

    /// Writes values and returns a status per write.
    pub async fn write(&self, writes: Vec<WriteValue>) -> OpcUaResult<Vec<StatusCode>> {
        let expected = writes.len();
        let request = WriteRequest {
            nodes_to_write: writes,
            ..Default::default()
        };
        let response = self.invoke(Operation::Write, request).await?;
        expect_count("Write", expected, response.results.len())?;
        Ok(response.results)
    }

    /// Writes the value attribute of one node.
    pub async fn write_value(&self, node: &NodeId, value: impl Into<Variant>) -> OpcUaResult<()> {
        let write = WriteValue {
            node_id: node.clone(),
            attribute_id: attribute_id::VALUE,
            value: DataValue::new(value),
            ..Default::default()
        };
        let status = self
            .write(vec![write])
            .await?
            .into_iter()
            .next()
            .unwrap_or(StatusCode::BAD_UNEXPECTED_ERROR);
        if status.is_bad() {
            return Err(OpcUaError::service_fault("Write", status));
        }
        Ok(())
    }

    /// Returns the forward hierarchical references of a node.
    pub async fn browse(&self, node: &NodeId) -> OpcUaResult<Vec<ReferenceDescription>> {
        let request = BrowseRequest {
            requested_max_references_per_node: 0,
            nodes_to_browse: vec![BrowseDescription::children(node.clone())],
            ..Default::default()
        };
        let response = self.invoke(Operation::Browse, request).await?;
        let result = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| OpcUaError::service_fault("Browse", StatusCode::BAD_UNEXPECTED_ERROR))?;
        if result.status_code.is_bad() {
            return Err(OpcUaError::service_fault("Browse", result.status_code));
        }
        if !result.continuation_point.as_bytes().is_empty() {
            tracing::debug!(
                node_id = %node,
                references = result.references.len(),
                "Browse result truncated by server"
            );
        }
        Ok(result.references)
    }

    /// Calls a method and returns its result.
    ///
    /// A bad method status is returned inside the result, not as an error.
    pub async fn call(
        &self,
        object_id: &NodeId,
        method_id: &NodeId,
        input_arguments: Vec<Variant>,
    ) -> OpcUaResult<CallMethodResult> {
        let request = CallRequest {
            methods_to_call: vec![CallMethodRequest {
                object_id: object_id.clone(),
                method_id: method_id.clone(),
                input_arguments,
            }],
            ..Default::default()
        };
        let response = self.invoke(Operation::Call, request).await?;
        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| OpcUaError::service_fault("Call", StatusCode::BAD_UNEXPECTED_ERROR))
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates a subscription and returns its local handle.
    ///
    /// The handle stays valid when the subscription is recreated on the
    /// server after a reconnect.
    pub async fn create_subscription(
        &self,
        settings: SubscriptionSettings,
        sink: impl NotificationSink + 'static,
    ) -> OpcUaResult<u32> {
        settings.validate()?;
        let sink: Arc<dyn NotificationSink> = Arc::new(sink);
        self.engine
            .request(|reply| Command::CreateSubscription {
                settings,
                sink,
                reply,
            })
            .await
    }

    /// Creates a subscription with its first monitored items.
    pub async fn subscribe(
        &self,
        settings: SubscriptionSettings,
        items: Vec<MonitoredItemDefinition>,
        sink: impl NotificationSink + 'static,
    ) -> OpcUaResult<(u32, Vec<MonitoredItemResult>)> {
        let handle = self.create_subscription(settings, sink).await?;
        if items.is_empty() {
            return Ok((handle, Vec::new()));
        }
        match self.add_monitored_items(handle, items).await {
            Ok(results) => Ok((handle, results)),
            Err(e) => {
                if let Err(cleanup) = self.delete_subscription(handle).await {
                    tracing::debug!(handle, error = %cleanup, "Cleanup after failed subscribe failed");
                }
                Err(e)
            }
        }
    }

    /// Adds monitored items and returns a result per item.
    ///
    /// Adding an item whose client handle already exists in the same
    /// subscription returns its existing server handle.
    pub async fn add_monitored_items(
        &self,
        handle: u32,
        items: Vec<MonitoredItemDefinition>,
    ) -> OpcUaResult<Vec<MonitoredItemResult>> {
        self.engine
            .request(|reply| Command::AddItems {
                handle,
                items,
                reply,
            })
            .await
    }

    /// Removes monitored items by client handle.
    ///
    /// Unknown handles report `Good`.
    pub async fn remove_monitored_items(
        &self,
        handle: u32,
        client_handles: Vec<u32>,
    ) -> OpcUaResult<Vec<StatusCode>> {
        self.engine
            .request(|reply| Command::RemoveItems {
                handle,
                client_handles,
                reply,
            })
            .await
    }

    /// Changes the timing parameters of a subscription.
    pub async fn modify_subscription(
        &self,
        handle: u32,
        settings: SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionInfo> {
        settings.validate()?;
        self.engine
            .request(|reply| Command::ModifySubscription {
                handle,
                settings,
                reply,
            })
            .await
    }

    /// Enables or disables publishing.
    pub async fn set_publishing_mode(&self, handle: u32, enabled: bool) -> OpcUaResult<()> {
        self.engine
            .request(|reply| Command::SetPublishingMode {
                handle,
                enabled,
                reply,
            })
            .await
    }

    /// Deletes a subscription.
    pub async fn delete_subscription(&self, handle: u32) -> OpcUaResult<()> {
        self.engine
            .request(|reply| Command::DeleteSubscription { handle, reply })
            .await
    }

    /// Snapshot of one subscription.
    pub async fn subscription_info(&self, handle: u32) -> OpcUaResult<SubscriptionInfo> {
        self.engine
            .request(|reply| Command::SubscriptionInfo { handle, reply })
            .await
    }

    /// Snapshots of all subscriptions.
    pub async fn subscriptions(&self) -> OpcUaResult<Vec<SubscriptionInfo>> {
        self.engine
            .request(|reply| Command::ListSubscriptions { reply })
            .await
    }
}

fn expect_count(service: &'static str, expected: usize, actual: usize) -> OpcUaResult<()> {
    if expected != actual {
        tracing::warn!(service, expected, actual, "Result count mismatch");
        return Err(OpcUaError::service_fault(service, StatusCode::BAD_UNEXPECTED_ERROR));
    }
    Ok(())
}

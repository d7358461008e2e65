// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-session dispatch task.
//!
//! The engine owns the subscription table and never waits on the network.
//! Caller commands arrive over a bounded channel and are checked against the
//! table; the service call each one needs runs as a spawned task that hands
//! its result, together with the caller's reply, back over an internal
//! channel. Publish, republish, keep-alive and recovery round trips report
//! back the same way. All subscription state is mutated inside the task, so a
//! slow call for one subscription never holds up the others.
//!
//! Every tick the engine tops up outstanding publish requests, marks
//! subscriptions late, releases held messages whose hold timeout expired,
//! reads the server state when the session was idle and starts recovery
//! when the session or transport faulted.
//!
//! Recovery reconnects with backoff. When the server still knows the session,
//! `TransferSubscriptions` moves every subscription to the new channel;
//! transferred subscriptions keep their sequence state and republish what
//! they missed. Subscriptions the server would not transfer, and all of them
//! when a new session had to be created, are recreated from their cached
//! definitions and report a discontinuity.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::monitored_item::{MonitoredItem, MonitoredItemDefinition};
use super::publish::PublishDispatcher;
use super::sequence::{is_after, Accepted};
use super::session::{ReconnectOutcome, Session};
use super::sink::NotificationSink;
use super::subscription::{Subscription, SubscriptionInfo, SubscriptionState};
use crate::codec::{StatusCode, WireCodec};
use crate::error::{OpcUaError, OpcUaResult, PeerError, SessionError, SubscriptionError};
use crate::services::{
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSubscriptionResponse,
    DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse, DeleteSubscriptionsRequest,
    DeleteSubscriptionsResponse, ModifySubscriptionResponse, PublishRequest, PublishResponse,
    RepublishRequest, RepublishResponse, ServiceCall, SetPublishingModeRequest,
    SetPublishingModeResponse, SubscriptionAcknowledgement, TimestampsToReturn,
    TransferSubscriptionsRequest, TransferSubscriptionsResponse,
};
use crate::types::{PublishSettings, ReconnectSettings, SubscriptionSettings};
const TICK: Duration = Duration::from_millis(100);
const COMMAND_CAPACITY: usize = 64;

// =============================================================================
// ConnectionStatus
// =============================================================================

/// Connection status observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Session active.
    Connected,
    /// Recovering from a fault.
    Reconnecting,
    /// Closed or recovery abandoned.
    Disconnected,
}

impl ConnectionStatus {
    /// Returns `true` when connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

// =============================================================================
// MonitoredItemResult
// =============================================================================

/// Outcome of adding one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemResult {
    /// Client handle of the item.
    pub client_handle: u32,
    /// Per-item status.
    pub status_code: StatusCode,
    /// Server handle (0 when the item was not created).
    pub server_handle: u32,
    /// Sampling interval revised by the server.
    pub revised_sampling_interval: Duration,
    /// Queue size revised by the server.
    pub revised_queue_size: u32,
}

impl MonitoredItemResult {
    fn created(item: &MonitoredItem) -> Self {
        Self {
            client_handle: item.client_handle(),
            status_code: StatusCode::GOOD,
            server_handle: item.server_handle(),
            revised_sampling_interval: item.revised_sampling_interval(),
            revised_queue_size: item.revised_queue_size(),
        }
    }

    fn failed(client_handle: u32, status_code: StatusCode) -> Self {
        Self {
            client_handle,
            status_code,
            server_handle: 0,
            revised_sampling_interval: Duration::ZERO,
            revised_queue_size: 0,
        }
    }
}

// =============================================================================
// Commands and events
// =============================================================================

type Reply<T> = oneshot::Sender<OpcUaResult<T>>;

/// Caller requests handled by the engine.
pub(crate) enum Command {
    CreateSubscription {
        settings: SubscriptionSettings,
        sink: Arc<dyn NotificationSink>,
        reply: Reply<u32>,
    },
    DeleteSubscription {
        handle: u32,
        reply: Reply<()>,
    },
    AddItems {
        handle: u32,
        items: Vec<MonitoredItemDefinition>,
        reply: Reply<Vec<MonitoredItemResult>>,
    },
    RemoveItems {
        handle: u32,
        client_handles: Vec<u32>,
        reply: Reply<Vec<StatusCode>>,
    },
    ModifySubscription {
        handle: u32,
        settings: SubscriptionSettings,
        reply: Reply<SubscriptionInfo>,
    },
    SetPublishingMode {
        handle: u32,
        enabled: bool,
        reply: Reply<()>,
    },
    SubscriptionInfo {
        handle: u32,
        reply: Reply<SubscriptionInfo>,
    },
    ListSubscriptions {
        reply: Reply<Vec<SubscriptionInfo>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Completions of spawned round trips.
enum EngineEvent {
    PublishCompleted {
        generation: u64,
        acks: Vec<SubscriptionAcknowledgement>,
        result: OpcUaResult<PublishResponse>,
    },
    RepublishCompleted {
        generation: u64,
        handle: u32,
        sequence_number: u32,
        result: OpcUaResult<RepublishResponse>,
    },
    KeepAliveCompleted {
        result: OpcUaResult<()>,
    },
    ReconnectCompleted {
        result: OpcUaResult<ReconnectOutcome>,
    },
    TransferCompleted {
        generation: u64,
        handles: Vec<u32>,
        result: OpcUaResult<TransferSubscriptionsResponse>,
    },
    Recreated {
        generation: u64,
        handle: u32,
        old_id: u32,
        definitions: Vec<MonitoredItemDefinition>,
        result: OpcUaResult<CreateSubscriptionResponse>,
    },
    ItemsRestored {
        generation: u64,
        handle: u32,
        definitions: Vec<MonitoredItemDefinition>,
        result: OpcUaResult<CreateMonitoredItemsResponse>,
    },
    Command(Completion),
}

/// A caller command whose service call returned. Carries the reply.
enum Completion {
    SubscriptionCreated {
        subscription: Box<Subscription>,
        result: OpcUaResult<CreateSubscriptionResponse>,
        reply: Reply<u32>,
    },
    SubscriptionDeleted {
        handle: u32,
        subscription_id: u32,
        result: OpcUaResult<DeleteSubscriptionsResponse>,
        reply: Reply<()>,
    },
    ItemsCreated {
        handle: u32,
        requested: Vec<u32>,
        definitions: Vec<MonitoredItemDefinition>,
        result: OpcUaResult<CreateMonitoredItemsResponse>,
        reply: Reply<Vec<MonitoredItemResult>>,
    },
    ItemsDeleted {
        handle: u32,
        /// (position in the caller's list, client handle) per deleted item.
        targets: Vec<(usize, u32)>,
        results: Vec<StatusCode>,
        result: OpcUaResult<DeleteMonitoredItemsResponse>,
        reply: Reply<Vec<StatusCode>>,
    },
    SubscriptionModified {
        handle: u32,
        settings: SubscriptionSettings,
        result: OpcUaResult<ModifySubscriptionResponse>,
        reply: Reply<SubscriptionInfo>,
    },
    PublishingModeSet {
        handle: u32,
        enabled: bool,
        result: OpcUaResult<SetPublishingModeResponse>,
        reply: Reply<()>,
    },
}

/// Unwraps `$result`, or answers `$reply` with the error and returns.
macro_rules! or_reply {
    ($reply:expr, $result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => {
                let _ = $reply.send(Err(e));
                return;
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Reconnecting,
    Stopped,
}

// =============================================================================
// EngineHandle
// =============================================================================

/// Handle to a running engine.
#[derive(Debug)]
pub(crate) struct EngineHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineHandle {
    /// Starts the engine for an active session.
    pub(crate) fn spawn(session: Arc<Session>, codec: WireCodec) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, event_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ConnectionStatus::Connected);

        let config = session.config().clone();
        let engine = Engine {
            dispatcher: PublishDispatcher::new(&config.publish),
            publish: config.publish,
            reconnect: config.reconnect,
            keepalive_interval: config.keepalive_interval,
            session,
            codec,
            subscriptions: BTreeMap::new(),
            by_id: HashMap::new(),
            client_handles: HashMap::new(),
            pending_items: HashSet::new(),
            next_handle: 1,
            republishing: HashSet::new(),
            restoring: HashSet::new(),
            abandoned: HashSet::new(),
            tasks: Vec::new(),
            calls: Vec::new(),
            generation: 0,
            phase: Phase::Running,
            keep_alive_running: false,
            events,
            status,
        };
        let task = tokio::spawn(engine.run(command_rx, event_rx));

        Self {
            commands,
            status: status_rx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Sends a command and waits for its reply.
    pub(crate) async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> OpcUaResult<T> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SubscriptionError::EngineStopped)?;
        receiver.await.map_err(|_| SubscriptionError::EngineStopped)?
    }

    /// Connection status receiver.
    pub(crate) fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Stops the engine and closes the session.
    pub(crate) async fn shutdown(&self) -> OpcUaResult<()> {
        let result = self
            .request(|reply| Command::Shutdown { reply })
            .await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            // The task ends right after replying.
            let _ = task.await;
        }
        match result {
            Err(OpcUaError::Subscription(SubscriptionError::EngineStopped)) => Ok(()),
            other => other,
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

struct Engine {
    session: Arc<Session>,
    codec: WireCodec,
    publish: PublishSettings,
    reconnect: ReconnectSettings,
    keepalive_interval: Duration,
    dispatcher: PublishDispatcher,
    subscriptions: BTreeMap<u32, Subscription>,
    /// Server subscription id to local handle.
    by_id: HashMap<u32, u32>,
    /// Client handle to owning local handle.
    client_handles: HashMap<u32, u32>,
    /// Client handles whose creation is in flight.
    pending_items: HashSet<u32>,
    next_handle: u32,
    /// Republish requests in flight as (handle, sequence number).
    republishing: HashSet<(u32, u32)>,
    /// Recreated subscriptions whose items are still being created.
    restoring: HashSet<u32>,
    /// Deleted subscriptions whose recreation failed for good.
    abandoned: HashSet<u32>,
    tasks: Vec<JoinHandle<()>>,
    /// Service calls of caller commands. They outlive a reconnect.
    calls: Vec<JoinHandle<()>>,
    /// Bumped whenever in-flight round trips become meaningless.
    generation: u64,
    phase: Phase,
    keep_alive_running: bool,
    events: mpsc::UnboundedSender<EngineEvent>,
    status: watch::Sender<ConnectionStatus>,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!("Subscription engine started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        let result = self.shutdown().await;
                        let _ = reply.send(result);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        if let Err(e) = self.shutdown().await {
                            e.log("Engine shutdown");
                        }
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = tick.tick() => self.on_tick(),
            }
        }
        tracing::debug!("Subscription engine stopped");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Checks a command and starts its service call. Shutdown is handled by
    /// [`Engine::run`].
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::CreateSubscription {
                settings,
                sink,
                reply,
            } => self.create_subscription(settings, sink, reply),
            Command::DeleteSubscription { handle, reply } => {
                self.delete_subscription(handle, reply)
            }
            Command::AddItems {
                handle,
                items,
                reply,
            } => self.add_items(handle, items, reply),
            Command::RemoveItems {
                handle,
                client_handles,
                reply,
            } => self.remove_items(handle, client_handles, reply),
            Command::ModifySubscription {
                handle,
                settings,
                reply,
            } => self.modify_subscription(handle, settings, reply),
            Command::SetPublishingMode {
                handle,
                enabled,
                reply,
            } => self.set_publishing_mode(handle, enabled, reply),
            Command::SubscriptionInfo { handle, reply } => {
                let result = self.subscription(handle).map(Subscription::info);
                let _ = reply.send(result);
            }
            Command::ListSubscriptions { reply } => {
                let infos = self.subscriptions.values().map(Subscription::info).collect();
                let _ = reply.send(Ok(infos));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(Err(SubscriptionError::EngineStopped.into()));
            }
        }
    }

    fn create_subscription(
        &mut self,
        settings: SubscriptionSettings,
        sink: Arc<dyn NotificationSink>,
        reply: Reply<u32>,
    ) {
        or_reply!(reply, settings.validate());
        or_reply!(reply, self.ensure_running());

        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        let subscription = Box::new(Subscription::new(handle, settings, sink, Instant::now()));
        let request = subscription.create_request();
        let call = self.spawn_call(request, move |result| {
            EngineEvent::Command(Completion::SubscriptionCreated {
                subscription,
                result,
                reply,
            })
        });
        self.calls.push(call);
    }

    fn delete_subscription(&mut self, handle: u32, reply: Reply<()>) {
        let subscription = or_reply!(reply, self.subscription_mut(handle));
        subscription.set_state(SubscriptionState::Closing);
        let subscription_id = subscription.subscription_id();

        if subscription_id == 0 || self.phase != Phase::Running {
            self.forget(handle, subscription_id);
            let _ = reply.send(Ok(()));
            return;
        }
        let request = DeleteSubscriptionsRequest {
            subscription_ids: vec![subscription_id],
            ..Default::default()
        };
        let call = self.spawn_call(request, move |result| {
            EngineEvent::Command(Completion::SubscriptionDeleted {
                handle,
                subscription_id,
                result,
                reply,
            })
        });
        self.calls.push(call);
    }

    fn add_items(
        &mut self,
        handle: u32,
        items: Vec<MonitoredItemDefinition>,
        reply: Reply<Vec<MonitoredItemResult>>,
    ) {
        or_reply!(reply, self.ensure_running());
        let subscription = or_reply!(reply, self.subscription(handle));
        if !subscription.state().is_live() {
            let error = SubscriptionError::invalid_state("add items to", subscription.state());
            let _ = reply.send(Err(error.into()));
            return;
        }

        for item in &items {
            or_reply!(reply, item.validate());
            let owned_elsewhere = self
                .client_handles
                .get(&item.client_handle)
                .is_some_and(|owner| *owner != handle);
            if owned_elsewhere || self.pending_items.contains(&item.client_handle) {
                let error = SubscriptionError::ClientHandleInUse {
                    client_handle: item.client_handle,
                };
                let _ = reply.send(Err(error.into()));
                return;
            }
        }

        // Existing handles answer with their current server handle.
        let requested: Vec<u32> = items.iter().map(|item| item.client_handle).collect();
        let mut batch = HashSet::new();
        let to_create: Vec<MonitoredItemDefinition> = items
            .into_iter()
            .filter(|item| subscription.item(item.client_handle).is_none())
            .filter(|item| batch.insert(item.client_handle))
            .collect();
        let subscription_id = subscription.subscription_id();

        if to_create.is_empty() {
            let _ = reply.send(self.item_results(handle, requested, HashMap::new()));
            return;
        }
        self.pending_items
            .extend(to_create.iter().map(|item| item.client_handle));
        let request = create_items_request(subscription_id, &to_create);
        let call = self.spawn_call(request, move |result| {
            EngineEvent::Command(Completion::ItemsCreated {
                handle,
                requested,
                definitions: to_create,
                result,
                reply,
            })
        });
        self.calls.push(call);
    }

    fn remove_items(&mut self, handle: u32, client_handles: Vec<u32>, reply: Reply<Vec<StatusCode>>) {
        or_reply!(reply, self.ensure_running());
        let subscription = or_reply!(reply, self.subscription(handle));
        let subscription_id = subscription.subscription_id();

        // Unknown handles are already removed.
        let results = vec![StatusCode::GOOD; client_handles.len()];
        let targets: Vec<(usize, u32, u32)> = client_handles
            .iter()
            .enumerate()
            .filter_map(|(index, client_handle)| {
                subscription
                    .item(*client_handle)
                    .map(|item| (index, *client_handle, item.server_handle()))
            })
            .collect();
        if targets.is_empty() {
            let _ = reply.send(Ok(results));
            return;
        }

        let request = DeleteMonitoredItemsRequest {
            subscription_id,
            monitored_item_ids: targets.iter().map(|(_, _, server)| *server).collect(),
            ..Default::default()
        };
        let targets = targets
            .into_iter()
            .map(|(index, client_handle, _)| (index, client_handle))
            .collect();
        let call = self.spawn_call(request, move |result| {
            EngineEvent::Command(Completion::ItemsDeleted {
                handle,
                targets,
                results,
                result,
                reply,
            })
        });
        self.calls.push(call);
    }

    fn modify_subscription(
        &mut self,
        handle: u32,
        settings: SubscriptionSettings,
        reply: Reply<SubscriptionInfo>,
    ) {
        or_reply!(reply, settings.validate());
        or_reply!(reply, self.ensure_running());
        let subscription = or_reply!(reply, self.subscription(handle));
        let request = subscription.modify_request(&settings);
        let call = self.spawn_call(request, move |result| {
            EngineEvent::Command(Completion::SubscriptionModified {
                handle,
                settings,
                result,
                reply,
            })
        });
        self.calls.push(call);
    }

    fn set_publishing_mode(&mut self, handle: u32, enabled: bool, reply: Reply<()>) {
        or_reply!(reply, self.ensure_running());
        let subscription_id = or_reply!(reply, self.subscription(handle)).subscription_id();
        let request = SetPublishingModeRequest {
            publishing_enabled: enabled,
            subscription_ids: vec![subscription_id],
            ..Default::default()
        };
        let call = self.spawn_call(request, move |result| {
            EngineEvent::Command(Completion::PublishingModeSet {
                handle,
                enabled,
                result,
                reply,
            })
        });
        self.calls.push(call);
    }

    async fn shutdown(&mut self) -> OpcUaResult<()> {
        self.abort_tasks();
        for call in self.calls.drain(..) {
            call.abort();
        }
        self.pending_items.clear();
        self.restoring.clear();
        for subscription in self.subscriptions.values_mut() {
            subscription.tracker_mut().reset();
            subscription.set_state(SubscriptionState::Closing);
        }

        let result = if self.phase == Phase::Stopped {
            Ok(())
        } else {
            self.session.close(true).await
        };

        for subscription in self.subscriptions.values_mut() {
            subscription.set_state(SubscriptionState::Closed);
        }
        self.subscriptions.clear();
        self.by_id.clear();
        self.client_handles.clear();
        self.phase = Phase::Stopped;
        self.status.send_replace(ConnectionStatus::Disconnected);
        result
    }

    // =========================================================================
    // Command completions
    // =========================================================================

    fn on_command_completed(&mut self, completion: Completion) {
        match completion {
            Completion::SubscriptionCreated {
                subscription,
                result,
                reply,
            } => self.on_subscription_created(subscription, result, reply),
            Completion::SubscriptionDeleted {
                handle,
                subscription_id,
                result,
                reply,
            } => {
                let result = result.and_then(|response| match response.results.first() {
                    Some(status)
                        if status.is_bad()
                            && !status.matches(StatusCode::BAD_SUBSCRIPTION_ID_INVALID) =>
                    {
                        Err(PeerError::service_fault("DeleteSubscriptions", *status).into())
                    }
                    _ => Ok(()),
                });
                self.forget(handle, subscription_id);
                let _ = reply.send(result);
            }
            Completion::ItemsCreated {
                handle,
                requested,
                definitions,
                result,
                reply,
            } => self.on_items_created(handle, requested, definitions, result, reply),
            Completion::ItemsDeleted {
                handle,
                targets,
                results,
                result,
                reply,
            } => self.on_items_deleted(handle, targets, results, result, reply),
            Completion::SubscriptionModified {
                handle,
                settings,
                result,
                reply,
            } => {
                let response = or_reply!(reply, result);
                let subscription = or_reply!(reply, self.subscription_mut(handle));
                subscription.apply_modified(settings, &response);
                let _ = reply.send(Ok(subscription.info()));
            }
            Completion::PublishingModeSet {
                handle,
                enabled,
                result,
                reply,
            } => {
                let response = or_reply!(reply, result);
                if let Some(status) = response.results.first().filter(|status| status.is_bad()) {
                    let error = PeerError::service_fault("SetPublishingMode", *status);
                    let _ = reply.send(Err(error.into()));
                    return;
                }
                let subscription = or_reply!(reply, self.subscription_mut(handle));
                subscription.set_publishing_enabled(enabled);
                tracing::debug!(
                    subscription_id = subscription.subscription_id(),
                    enabled = enabled,
                    "Publishing mode set"
                );
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn on_subscription_created(
        &mut self,
        mut subscription: Box<Subscription>,
        result: OpcUaResult<CreateSubscriptionResponse>,
        reply: Reply<u32>,
    ) {
        let response = or_reply!(reply, result);
        let handle = subscription.handle();
        subscription.apply_created(&response, Instant::now());
        self.by_id.insert(subscription.subscription_id(), handle);
        self.subscriptions.insert(handle, *subscription);

        self.dispatcher.resume();
        self.issue_publishes();
        let _ = reply.send(Ok(handle));
    }

    fn on_items_created(
        &mut self,
        handle: u32,
        requested: Vec<u32>,
        definitions: Vec<MonitoredItemDefinition>,
        result: OpcUaResult<CreateMonitoredItemsResponse>,
        reply: Reply<Vec<MonitoredItemResult>>,
    ) {
        for definition in &definitions {
            self.pending_items.remove(&definition.client_handle);
        }
        let response = or_reply!(reply, result);
        let results = or_reply!(reply, self.record_items(handle, definitions, &response));
        let failures = results
            .into_iter()
            .filter(|result| result.status_code.is_bad())
            .map(|result| (result.client_handle, result))
            .collect();
        let _ = reply.send(self.item_results(handle, requested, failures));
    }

    fn on_items_deleted(
        &mut self,
        handle: u32,
        targets: Vec<(usize, u32)>,
        mut results: Vec<StatusCode>,
        result: OpcUaResult<DeleteMonitoredItemsResponse>,
        reply: Reply<Vec<StatusCode>>,
    ) {
        let response = or_reply!(reply, result);
        let subscription = or_reply!(reply, self.subscription_mut(handle));
        let mut removed = Vec::new();
        for (position, (index, client_handle)) in targets.into_iter().enumerate() {
            let status = response
                .results
                .get(position)
                .copied()
                .unwrap_or(StatusCode::BAD_UNEXPECTED_ERROR);
            if status.is_good() || status.matches(StatusCode::BAD_MONITORED_ITEM_ID_INVALID) {
                subscription.remove_item(client_handle);
                removed.push(client_handle);
                results[index] = StatusCode::GOOD;
            } else {
                results[index] = status;
            }
        }
        for client_handle in removed {
            self.client_handles.remove(&client_handle);
        }
        let _ = reply.send(Ok(results));
    }

    /// Records the items the server created and drops the rejected ones.
    fn record_items(
        &mut self,
        handle: u32,
        definitions: Vec<MonitoredItemDefinition>,
        response: &CreateMonitoredItemsResponse,
    ) -> OpcUaResult<Vec<MonitoredItemResult>> {
        let subscription = self.subscription_mut(handle)?;
        let subscription_id = subscription.subscription_id();
        let mut results = Vec::with_capacity(definitions.len());
        let mut created = Vec::new();
        let mut failed = Vec::new();
        for (index, definition) in definitions.into_iter().enumerate() {
            let client_handle = definition.client_handle;
            let Some(result) = response.results.get(index) else {
                subscription.remove_item(client_handle);
                failed.push(client_handle);
                results.push(MonitoredItemResult::failed(
                    client_handle,
                    StatusCode::BAD_UNEXPECTED_ERROR,
                ));
                continue;
            };
            let mut item = MonitoredItem::new(definition);
            match item.apply_result(result) {
                Ok(()) => {
                    results.push(MonitoredItemResult::created(&item));
                    subscription.insert_item(item);
                    created.push(client_handle);
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = subscription_id,
                        client_handle = client_handle,
                        status = %result.status_code,
                        error = %e,
                        "Monitored item not created"
                    );
                    subscription.remove_item(client_handle);
                    failed.push(client_handle);
                    results.push(MonitoredItemResult::failed(client_handle, result.status_code));
                }
            }
        }
        for client_handle in created {
            self.client_handles.insert(client_handle, handle);
        }
        for client_handle in failed {
            self.client_handles.remove(&client_handle);
        }
        Ok(results)
    }

    /// Answers an add-items call in the caller's order.
    fn item_results(
        &self,
        handle: u32,
        requested: Vec<u32>,
        failures: HashMap<u32, MonitoredItemResult>,
    ) -> OpcUaResult<Vec<MonitoredItemResult>> {
        let subscription = self.subscription(handle)?;
        Ok(requested
            .into_iter()
            .map(|client_handle| match subscription.item(client_handle) {
                Some(item) => MonitoredItemResult::created(item),
                None => failures.get(&client_handle).cloned().unwrap_or_else(|| {
                    MonitoredItemResult::failed(client_handle, StatusCode::BAD_UNEXPECTED_ERROR)
                }),
            })
            .collect())
    }

    /// Drops a deleted subscription and everything indexed by it.
    fn forget(&mut self, handle: u32, subscription_id: u32) {
        if let Some(mut subscription) = self.subscriptions.remove(&handle) {
            subscription.tracker_mut().reset();
            subscription.set_state(SubscriptionState::Closed);
            self.by_id.remove(&subscription.subscription_id());
            tracing::info!(handle = handle, subscription_id = subscription_id, "Subscription deleted");
        }
        self.by_id.remove(&subscription_id);
        self.client_handles.retain(|_, owner| *owner != handle);
        self.abandoned.remove(&handle);
        self.restoring.remove(&handle);
        self.republishing.retain(|(owner, _)| *owner != handle);
    }

    // =========================================================================
    // Events
    // =========================================================================

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::PublishCompleted {
                generation,
                acks,
                result,
            } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(response) => self.on_publish_response(acks, response),
                    Err(e) => {
                        self.dispatcher.on_failure(acks, &e, Instant::now());
                    }
                }
                self.issue_publishes();
            }
            EngineEvent::RepublishCompleted {
                generation,
                handle,
                sequence_number,
                result,
            } => {
                if generation == self.generation {
                    self.on_republish(handle, sequence_number, result);
                }
            }
            EngineEvent::KeepAliveCompleted { result } => {
                self.keep_alive_running = false;
                if let Err(e) = result {
                    e.log("Session keep-alive");
                }
            }
            EngineEvent::ReconnectCompleted { result } => self.on_reconnected(result),
            EngineEvent::TransferCompleted {
                generation,
                handles,
                result,
            } => {
                if generation == self.generation {
                    self.on_transferred(handles, result);
                }
            }
            EngineEvent::Recreated {
                generation,
                handle,
                old_id,
                definitions,
                result,
            } => {
                if generation == self.generation {
                    self.on_recreated(handle, old_id, definitions, result);
                }
            }
            EngineEvent::ItemsRestored {
                generation,
                handle,
                definitions,
                result,
            } => {
                if generation == self.generation {
                    self.on_items_restored(handle, definitions, result);
                }
            }
            EngineEvent::Command(completion) => self.on_command_completed(completion),
        }
    }

    fn on_publish_response(
        &mut self,
        acks: Vec<SubscriptionAcknowledgement>,
        response: PublishResponse,
    ) {
        let now = Instant::now();
        for (ack, status) in self.dispatcher.on_response(&acks, &response) {
            if status.matches(StatusCode::BAD_SUBSCRIPTION_ID_INVALID) {
                if let Some(subscription) = self
                    .by_id
                    .get(&ack.subscription_id)
                    .and_then(|handle| self.subscriptions.get_mut(handle))
                {
                    subscription.set_state(SubscriptionState::Deleted);
                }
            }
        }

        let subscription_id = response.subscription_id;
        let message = response.notification_message;
        let keep_alive = message.is_keep_alive();
        let Some(handle) = self.by_id.get(&subscription_id).copied() else {
            tracing::debug!(
                subscription_id = subscription_id,
                sequence_number = message.sequence_number,
                "Publish response for unknown subscription"
            );
            if !keep_alive {
                self.dispatcher.acknowledge(subscription_id, message.sequence_number);
            }
            return;
        };
        let Some(subscription) = self.subscriptions.get_mut(&handle) else {
            return;
        };
        if subscription.state().is_closed() {
            if !keep_alive {
                self.dispatcher.acknowledge(subscription_id, message.sequence_number);
            }
            return;
        }

        tracing::trace!(
            subscription_id = subscription_id,
            sequence_number = message.sequence_number,
            keep_alive = keep_alive,
            "Publish response"
        );
        subscription.mark_response(now, keep_alive);

        let missing = if keep_alive {
            subscription.tracker_mut().observe_keep_alive(message.sequence_number)
        } else {
            self.dispatcher.acknowledge(subscription_id, message.sequence_number);
            match subscription.tracker_mut().accept(message, now) {
                Accepted::Deliver(deliveries) => {
                    subscription.deliver(deliveries, &self.codec);
                    Vec::new()
                }
                Accepted::Duplicate => {
                    subscription.record_duplicate();
                    Vec::new()
                }
                Accepted::Buffered { missing } => missing,
            }
        };
        self.recover_missing(handle, missing, &response.available_sequence_numbers);
    }

    /// Republishes what the server still holds; the rest is a gap now.
    fn recover_missing(&mut self, handle: u32, missing: Vec<u32>, available: &[u32]) {
        for sequence_number in missing {
            if available.contains(&sequence_number) {
                self.request_republish(handle, sequence_number);
            } else if let Some(subscription) = self.subscriptions.get_mut(&handle) {
                tracing::debug!(
                    subscription_id = subscription.subscription_id(),
                    sequence_number = sequence_number,
                    "Missing message no longer available"
                );
                let deliveries = subscription.tracker_mut().mark_unavailable(sequence_number);
                subscription.deliver(deliveries, &self.codec);
            }
        }
    }

    fn request_republish(&mut self, handle: u32, sequence_number: u32) {
        let Some(subscription) = self.subscriptions.get(&handle) else {
            return;
        };
        if !self.republishing.insert((handle, sequence_number)) {
            return;
        }
        let subscription_id = subscription.subscription_id();
        tracing::debug!(
            subscription_id = subscription_id,
            sequence_number = sequence_number,
            "Requesting republish"
        );

        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        let generation = self.generation;
        self.tasks.push(tokio::spawn(async move {
            let request = RepublishRequest {
                subscription_id,
                retransmit_sequence_number: sequence_number,
                ..Default::default()
            };
            let result = session.call(request).await;
            let _ = events.send(EngineEvent::RepublishCompleted {
                generation,
                handle,
                sequence_number,
                result,
            });
        }));
    }

    fn on_republish(
        &mut self,
        handle: u32,
        sequence_number: u32,
        result: OpcUaResult<RepublishResponse>,
    ) {
        self.republishing.remove(&(handle, sequence_number));
        let Some(subscription) = self.subscriptions.get_mut(&handle) else {
            return;
        };
        let subscription_id = subscription.subscription_id();

        match result {
            Ok(response) => {
                subscription.record_republish();
                self.dispatcher.acknowledge(subscription_id, sequence_number);
                match subscription
                    .tracker_mut()
                    .accept(response.notification_message, Instant::now())
                {
                    Accepted::Deliver(deliveries) => subscription.deliver(deliveries, &self.codec),
                    Accepted::Duplicate => subscription.record_duplicate(),
                    Accepted::Buffered { .. } => {}
                }
            }
            Err(e)
                if e.status_code().is_some_and(|status| {
                    status.matches(StatusCode::BAD_MESSAGE_NOT_AVAILABLE)
                        || status.matches(StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN)
                }) =>
            {
                let deliveries = subscription.tracker_mut().mark_unavailable(sequence_number);
                subscription.deliver(deliveries, &self.codec);
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = subscription_id,
                    sequence_number = sequence_number,
                    error = %e,
                    "Republish failed, waiting for hold timeout"
                );
            }
        }
    }


    // =========================================================================
    // Tick
    // =========================================================================

    fn on_tick(&mut self) {
        self.tasks.retain(|task| !task.is_finished());
        self.calls.retain(|call| !call.is_finished());
        if self.phase == Phase::Stopped {
            return;
        }

        let now = Instant::now();
        for subscription in self.subscriptions.values_mut() {
            subscription.check_late(now, self.publish.safety_factor);
            let deliveries = subscription
                .tracker_mut()
                .expire(now, self.publish.hold_timeout);
            if !deliveries.is_empty() {
                subscription.deliver(deliveries, &self.codec);
            }
        }

        if self.phase == Phase::Reconnecting {
            return;
        }
        if self.session.state().is_faulted() || self.session.transport_state().is_faulted() {
            self.begin_reconnect();
            return;
        }

        self.recreate_deleted();
        self.issue_publishes();

        if !self.keep_alive_running && self.session.idle_time() >= self.keepalive_interval {
            self.keep_alive_running = true;
            let session = Arc::clone(&self.session);
            let events = self.events.clone();
            self.tasks.push(tokio::spawn(async move {
                let result = session.keep_alive().await;
                let _ = events.send(EngineEvent::KeepAliveCompleted { result });
            }));
        }
    }

    fn issue_publishes(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        let live = self
            .subscriptions
            .values()
            .filter(|s| s.state().is_live() && s.subscription_id() != 0)
            .count();

        for request in self.dispatcher.next_requests(live, Instant::now()) {
            let acks = request.subscription_acknowledgements.clone();
            let session = Arc::clone(&self.session);
            let events = self.events.clone();
            let timeout = self.publish.publish_timeout;
            let generation = self.generation;
            self.tasks.push(tokio::spawn(async move {
                let result = session
                    .call_with_timeout::<PublishRequest>(request, timeout)
                    .await;
                let _ = events.send(EngineEvent::PublishCompleted {
                    generation,
                    acks,
                    result,
                });
            }));
        }
    }


    fn recreate_deleted(&mut self) {
        let deleted: Vec<u32> = self
            .subscriptions
            .values()
            .filter(|s| s.state() == SubscriptionState::Deleted)
            .map(Subscription::handle)
            .filter(|handle| !self.abandoned.contains(handle))
            .collect();
        for handle in deleted {
            self.recreate(handle);
        }
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    fn begin_reconnect(&mut self) {
        tracing::warn!(
            session_state = %self.session.state(),
            transport_state = %self.session.transport_state(),
            "Connection lost, reconnecting"
        );
        self.phase = Phase::Reconnecting;
        self.status.send_replace(ConnectionStatus::Reconnecting);
        self.abort_tasks();

        // Recreations cut short start over once the session is back.
        let restoring = std::mem::take(&mut self.restoring);
        for subscription in self.subscriptions.values_mut() {
            if subscription.state() == SubscriptionState::Creating
                || restoring.contains(&subscription.handle())
            {
                subscription.set_state(SubscriptionState::Deleted);
            }
        }

        let session = Arc::clone(&self.session);
        let settings = self.reconnect.clone();
        let events = self.events.clone();
        self.tasks.push(tokio::spawn(async move {
            let result = reconnect_with_backoff(&session, &settings).await;
            let _ = events.send(EngineEvent::ReconnectCompleted { result });
        }));
    }

    fn on_reconnected(&mut self, result: OpcUaResult<ReconnectOutcome>) {
        if self.phase != Phase::Reconnecting {
            return;
        }
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                e.log("Reconnect");
                self.phase = Phase::Stopped;
                self.status.send_replace(ConnectionStatus::Disconnected);
                for subscription in self.subscriptions.values_mut() {
                    subscription.set_state(SubscriptionState::Transferring);
                    subscription.set_state(SubscriptionState::Deleted);
                }
                return;
            }
        };

        let handles: Vec<u32> = self
            .subscriptions
            .values_mut()
            .filter(|s| s.state().is_live())
            .map(|s| {
                s.set_state(SubscriptionState::Transferring);
                s.handle()
            })
            .collect();

        match outcome {
            // Recovery finishes when the transfer answers.
            ReconnectOutcome::Reactivated if !handles.is_empty() => self.transfer(handles),
            ReconnectOutcome::Reactivated => self.finish_recovery(),
            ReconnectOutcome::NewSession {
                previous_session_id,
            } => {
                // Subscriptions died with the old session.
                tracing::info!(
                    previous_session_id = %previous_session_id.to_opc_string(),
                    subscriptions = handles.len(),
                    "Session replaced, recreating subscriptions"
                );
                for handle in handles {
                    self.recreate(handle);
                }
                self.finish_recovery();
            }
        }
    }

    fn finish_recovery(&mut self) {
        self.phase = Phase::Running;
        self.dispatcher.resume();
        self.status.send_replace(ConnectionStatus::Connected);
        tracing::info!(subscriptions = self.subscriptions.len(), "Connection recovered");
        self.issue_publishes();
    }

    /// Transfers subscriptions to the current session.
    fn transfer(&mut self, handles: Vec<u32>) {
        let ids: Vec<u32> = handles
            .iter()
            .filter_map(|handle| self.subscriptions.get(handle))
            .map(Subscription::subscription_id)
            .collect();
        let request = TransferSubscriptionsRequest {
            subscription_ids: ids,
            send_initial_values: false,
            ..Default::default()
        };
        let generation = self.generation;
        let task = self.spawn_call(request, move |result| EngineEvent::TransferCompleted {
            generation,
            handles,
            result,
        });
        self.tasks.push(task);
    }

    /// Keeps what transferred and recreates the rest.
    fn on_transferred(
        &mut self,
        handles: Vec<u32>,
        result: OpcUaResult<TransferSubscriptionsResponse>,
    ) {
        if self.phase != Phase::Reconnecting {
            return;
        }
        let results = match result {
            Ok(response) => response.results,
            Err(e) => {
                tracing::info!(error = %e, "TransferSubscriptions failed, recreating");
                Vec::new()
            }
        };

        for (index, handle) in handles.into_iter().enumerate() {
            match results.get(index) {
                Some(result) if result.status_code.is_good() => {
                    let mut available = result.available_sequence_numbers.clone();
                    self.complete_transfer(handle, &mut available);
                }
                other => {
                    if let Some(result) = other {
                        tracing::info!(
                            handle = handle,
                            status = %result.status_code,
                            "Subscription not transferred, recreating"
                        );
                    }
                    self.recreate(handle);
                }
            }
        }
        self.finish_recovery();
    }

    fn complete_transfer(&mut self, handle: u32, available: &mut [u32]) {
        let Some(subscription) = self.subscriptions.get_mut(&handle) else {
            return;
        };
        subscription.set_state(SubscriptionState::Active);
        subscription.mark_response(Instant::now(), false);
        let subscription_id = subscription.subscription_id();
        let last = subscription.tracker().last_delivered();
        tracing::info!(
            subscription_id = subscription_id,
            last_sequence_number = ?last,
            available = available.len(),
            "Subscription transferred"
        );

        available.sort_unstable();
        let mut republish = Vec::new();
        for &sequence_number in available.iter() {
            match last {
                Some(last) if !is_after(sequence_number, last) => {
                    self.dispatcher.acknowledge(subscription_id, sequence_number);
                }
                _ => republish.push(sequence_number),
            }
        }
        for sequence_number in republish {
            self.request_republish(handle, sequence_number);
        }
    }


    /// Recreates a subscription with its cached definitions.
    fn recreate(&mut self, handle: u32) {
        let (old_id, request, definitions) = match self.subscriptions.get_mut(&handle) {
            Some(subscription) => {
                let old_id = subscription.reset_for_recreate();
                (old_id, subscription.create_request(), subscription.definitions())
            }
            None => return,
        };
        self.by_id.remove(&old_id);
        self.republishing.retain(|(owner, _)| *owner != handle);

        let generation = self.generation;
        let task = self.spawn_call(request, move |result| EngineEvent::Recreated {
            generation,
            handle,
            old_id,
            definitions,
            result,
        });
        self.tasks.push(task);
    }

    fn on_recreated(
        &mut self,
        handle: u32,
        old_id: u32,
        definitions: Vec<MonitoredItemDefinition>,
        result: OpcUaResult<CreateSubscriptionResponse>,
    ) {
        let created = match result {
            Ok(response) => response,
            Err(e) => {
                self.recreate_failed(handle, e);
                return;
            }
        };
        let new_id = created.subscription_id;
        let Some(subscription) = self.subscriptions.get_mut(&handle) else {
            // Deleted by the caller meanwhile.
            self.discard(new_id);
            return;
        };
        subscription.apply_created(&created, Instant::now());
        subscription.report_discontinuity(old_id);
        self.by_id.insert(new_id, handle);

        if !definitions.is_empty() {
            self.restoring.insert(handle);
            let request = create_items_request(new_id, &definitions);
            let generation = self.generation;
            let task = self.spawn_call(request, move |result| EngineEvent::ItemsRestored {
                generation,
                handle,
                definitions,
                result,
            });
            self.tasks.push(task);
        }
        self.dispatcher.resume();
        self.issue_publishes();
    }

    fn on_items_restored(
        &mut self,
        handle: u32,
        definitions: Vec<MonitoredItemDefinition>,
        result: OpcUaResult<CreateMonitoredItemsResponse>,
    ) {
        if !self.restoring.remove(&handle) {
            return;
        }
        let restored = result.and_then(|response| self.record_items(handle, definitions, &response));
        if let Err(e) = restored {
            tracing::warn!(handle = handle, error = %e, "Monitored items not recreated");
        }
    }

    /// Deletes a server subscription nothing refers to any more.
    fn discard(&mut self, subscription_id: u32) {
        let request = DeleteSubscriptionsRequest {
            subscription_ids: vec![subscription_id],
            ..Default::default()
        };
        let session = Arc::clone(&self.session);
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = session.call(request).await {
                e.log("Delete orphaned subscription");
            }
        }));
    }

    fn recreate_failed(&mut self, handle: u32, error: OpcUaError) {
        error.log("Recreate subscription");
        if let Some(subscription) = self.subscriptions.get_mut(&handle) {
            subscription.set_state(SubscriptionState::Deleted);
        }
        if !error.requires_reconnect() {
            self.abandoned.insert(handle);
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ensure_running(&self) -> OpcUaResult<()> {
        match self.phase {
            Phase::Running => Ok(()),
            Phase::Reconnecting => Err(SessionError::NotActive.into()),
            Phase::Stopped => Err(SessionError::Closed.into()),
        }
    }

    fn subscription(&self, handle: u32) -> OpcUaResult<&Subscription> {
        self.subscriptions
            .get(&handle)
            .ok_or_else(|| SubscriptionError::NotFound { handle }.into())
    }

    fn subscription_mut(&mut self, handle: u32) -> OpcUaResult<&mut Subscription> {
        self.subscriptions
            .get_mut(&handle)
            .ok_or_else(|| SubscriptionError::NotFound { handle }.into())
    }

    /// Cancels in-flight round trips; their completions are ignored.
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.generation += 1;
        self.keep_alive_running = false;
        self.republishing.clear();
        self.dispatcher.clear();
    }

    /// Runs one service call off the engine task; `complete` wraps its result
    /// in the event that applies it.
    fn spawn_call<R, F>(&self, request: R, complete: F) -> JoinHandle<()>
    where
        R: ServiceCall,
        F: FnOnce(OpcUaResult<R::Response>) -> EngineEvent + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = session.call(request).await;
            let _ = events.send(complete(result));
        })
    }
}

/// Reconnects until it works, the attempt budget runs out or the failure is
/// not worth retrying.
async fn reconnect_with_backoff(
    session: &Session,
    settings: &ReconnectSettings,
) -> OpcUaResult<ReconnectOutcome> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if !settings.allows(attempt) {
            return Err(SessionError::ReconnectExhausted {
                attempts: attempt - 1,
            }
            .into());
        }
        tokio::time::sleep(settings.backoff.delay(attempt - 1)).await;

        match session.reconnect().await {
            Ok(outcome) => return Ok(outcome),
            Err(e @ (OpcUaError::Security(_) | OpcUaError::Configuration(_))) => return Err(e),
            Err(e) => {
                tracing::warn!(attempt = attempt, error = %e, "Reconnect attempt failed");
            }
        }
    }
}

fn create_items_request(
    subscription_id: u32,
    definitions: &[MonitoredItemDefinition],
) -> CreateMonitoredItemsRequest {
    CreateMonitoredItemsRequest {
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create: definitions
            .iter()
            .map(MonitoredItemDefinition::to_create_request)
            .collect(),
        ..Default::default()
    }
}

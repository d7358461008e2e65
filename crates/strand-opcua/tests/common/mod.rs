// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory server used by the integration tests.
//!
//! The server keeps sessions and subscriptions in memory and answers
//! publish requests on the subscriptions' publishing cycles. Links can be
//! dropped, the server can go offline and it can "restart", forgetting
//! every session and subscription.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use strand_opcua::client::{ExponentialBackoff, ServiceTransport, TransportFactory};
use strand_opcua::services::{
    ActivateSessionResponse, BrowseResponse, BrowseResult, CallMethodResult, CallResponse,
    CloseSessionResponse, CreateMonitoredItemsResponse, CreateSessionResponse,
    CreateSubscriptionResponse, DataChangeNotification, DeleteMonitoredItemsResponse,
    DeleteSubscriptionsResponse, ModifySubscriptionResponse, MonitoredItemCreateResult,
    MonitoredItemNotification, NodeClass, NotificationMessage, PublishRequest, PublishResponse,
    ReadResponse, ReferenceDescription, RepublishResponse, ResponseHeader, ServiceFault,
    ServiceRequest, ServiceResponse, SetPublishingModeResponse, TransferResult,
    TransferSubscriptionsResponse, WriteResponse,
};
use strand_opcua::{
    ChannelState, ClientConfig, DataValue, DateTime, ExtensionObject, LocalizedText, NodeId,
    OpcUaClient, OpcUaError, OpcUaResult, QualifiedName, StatusCode, SubscriptionEvent,
    TransportError, Variant,
};

pub const ENDPOINT: &str = "opc.tcp://mock:4840";

/// Node whose value is writable and monitored in the tests.
pub fn setpoint() -> NodeId {
    NodeId::string(2, "Setpoint")
}

/// 2025-01-01T00:00:00Z.
const BASE_TICKS: i64 = 133_801_632_000_000_000;

// =============================================================================
// Server state
// =============================================================================

#[derive(Debug)]
struct MockItem {
    id: u32,
    client_handle: u32,
    node_id: NodeId,
}

#[derive(Debug)]
struct MockSubscription {
    session: u32,
    interval: Duration,
    keepalive_count: u32,
    publishing_enabled: bool,
    next_sequence: u32,
    next_due: Instant,
    idle_cycles: u32,
    items: Vec<MockItem>,
    pending: VecDeque<MonitoredItemNotification>,
    retransmit: BTreeMap<u32, NotificationMessage>,
}

/// Observable state and behaviour switches of the server.
#[derive(Debug, Default)]
pub struct ServerState {
    sessions: HashSet<u32>,
    next_session: u32,
    subscriptions: BTreeMap<u32, MockSubscription>,
    next_subscription_id: u32,
    next_item_id: u32,
    values: HashMap<NodeId, Variant>,
    outstanding_publishes: usize,
    /// Highest number of publish requests held at once.
    pub peak_outstanding: usize,
    /// Publish requests beyond this are answered `BadTooManyPublishRequests`.
    pub publish_limit: Option<usize>,
    /// `TransferSubscriptions` is answered `BadServiceUnsupported` when unset.
    pub transfer_supported: bool,
    /// The next notification message is kept for republish but never sent,
    /// and the link drops.
    pub lose_next_message: bool,
    /// `CreateSubscription` answers only after this long.
    pub create_delay: Option<Duration>,
    pub subscriptions_created: u32,
    pub transfers: u32,
    pub republished: Vec<u32>,
    pub acknowledged: Vec<(u32, u32)>,
    pub rejected_publishes: u32,
}

impl ServerState {
    /// Number of subscriptions currently held.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Monitored items held by subscription `id`.
    pub fn item_count(&self, id: u32) -> usize {
        self.subscriptions.get(&id).map_or(0, |s| s.items.len())
    }

    /// Unacknowledged sequence numbers of subscription `id`.
    pub fn retained(&self, id: u32) -> Vec<u32> {
        self.subscriptions
            .get(&id)
            .map(|s| s.retransmit.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Publishing interval of subscription `id`.
    pub fn interval(&self, id: u32) -> Option<Duration> {
        self.subscriptions.get(&id).map(|s| s.interval)
    }

    fn session_of(&self, token: &NodeId) -> Option<u32> {
        if token.namespace_index != 1 {
            return None;
        }
        let session = token.as_numeric()?.checked_sub(1000)?;
        self.sessions.contains(&session).then_some(session)
    }
}

enum Cycle {
    Message(u32, NotificationMessage, Vec<u32>),
    Lost,
    Wait(Option<Instant>),
}

// =============================================================================
// MockServer
// =============================================================================

#[derive(Debug)]
pub struct MockServer {
    state: Mutex<ServerState>,
    link: watch::Sender<u64>,
    online: AtomicBool,
    opens: AtomicU32,
    started: Instant,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        let (link, _) = watch::channel(0);
        let mut state = ServerState {
            transfer_supported: true,
            ..Default::default()
        };
        state.values.insert(setpoint(), Variant::Double(20.0));
        Arc::new(Self {
            state: Mutex::new(state),
            link,
            online: AtomicBool::new(true),
            opens: AtomicU32::new(0),
            started: Instant::now(),
        })
    }

    /// Runs `f` on the server state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Breaks every open link.
    pub fn drop_connections(&self) {
        self.link.send_modify(|epoch| *epoch += 1);
    }

    /// Accepts or refuses new connections.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Forgets sessions and subscriptions and breaks every link.
    pub fn restart(&self) {
        {
            let mut state = self.state.lock();
            state.sessions.clear();
            state.subscriptions.clear();
            state.outstanding_publishes = 0;
        }
        self.drop_connections();
    }

    /// Transports opened so far.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Server clock, advancing with the (paused) tokio clock.
    pub fn clock(&self) -> DateTime {
        let elapsed = Instant::now().duration_since(self.started);
        DateTime::from_ticks(BASE_TICKS + (elapsed.as_nanos() / 100) as i64)
    }

    /// Handles one request. `None` means the response is lost with the link.
    async fn handle(&self, request: ServiceRequest) -> Option<ServiceResponse> {
        let handle = request.header().request_handle;
        let header = |status| ResponseHeader::new(handle, status);
        let fault = |status| -> Option<ServiceResponse> {
            Some(ServiceResponse::ServiceFault(ServiceFault {
                response_header: header(status),
            }))
        };

        if let ServiceRequest::CreateSession(_) = request {
            let mut state = self.state.lock();
            state.next_session += 1;
            let session = state.next_session;
            state.sessions.insert(session);
            return Some(
                CreateSessionResponse {
                    response_header: header(StatusCode::GOOD),
                    session_id: NodeId::numeric(1, session),
                    authentication_token: NodeId::numeric(1, 1000 + session),
                    revised_session_timeout: 60_000.0,
                    ..Default::default()
                }
                .into(),
            );
        }

        let token = request.header().authentication_token.clone();
        let Some(session) = self.state.lock().session_of(&token) else {
            return fault(StatusCode::BAD_SESSION_ID_INVALID);
        };

        match request {
            ServiceRequest::ActivateSession(_) => Some(
                ActivateSessionResponse {
                    response_header: header(StatusCode::GOOD),
                    ..Default::default()
                }
                .into(),
            ),
            ServiceRequest::CloseSession(r) => {
                let mut state = self.state.lock();
                state.sessions.remove(&session);
                if r.delete_subscriptions {
                    state.subscriptions.retain(|_, s| s.session != session);
                }
                Some(
                    CloseSessionResponse {
                        response_header: header(StatusCode::GOOD),
                    }
                    .into(),
                )
            }
            ServiceRequest::Read(r) => {
                let clock = self.clock();
                let state = self.state.lock();
                let results = r
                    .nodes_to_read
                    .iter()
                    .map(|item| {
                        if item.node_id == NodeId::SERVER_CURRENT_TIME {
                            DataValue::new(clock)
                        } else if item.node_id == NodeId::SERVER_STATE {
                            DataValue::new(0i32)
                        } else {
                            match state.values.get(&item.node_id) {
                                Some(value) => DataValue::new(value.clone()),
                                None => DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN),
                            }
                        }
                    })
                    .collect();
                Some(
                    ReadResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::Write(r) => {
                let mut state = self.state.lock();
                let mut results = Vec::with_capacity(r.nodes_to_write.len());
                for write in r.nodes_to_write {
                    let value = write.value.value;
                    if !state.values.contains_key(&write.node_id) {
                        results.push(StatusCode::BAD_NODE_ID_UNKNOWN);
                        continue;
                    }
                    state.values.insert(write.node_id.clone(), value.clone());
                    for subscription in state.subscriptions.values_mut() {
                        for item in subscription.items.iter().filter(|i| i.node_id == write.node_id) {
                            subscription.pending.push_back(MonitoredItemNotification {
                                client_handle: item.client_handle,
                                value: DataValue::new(value.clone()),
                            });
                        }
                    }
                    results.push(StatusCode::GOOD);
                }
                Some(
                    WriteResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::Browse(r) => {
                let results = r
                    .nodes_to_browse
                    .iter()
                    .map(|_| BrowseResult {
                        status_code: StatusCode::GOOD,
                        references: vec![
                            reference(NodeId::SERVER, "Server", NodeClass::Object),
                            reference(setpoint(), "Setpoint", NodeClass::Variable),
                        ],
                        ..Default::default()
                    })
                    .collect();
                Some(
                    BrowseResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::Call(r) => {
                let results = r
                    .methods_to_call
                    .into_iter()
                    .map(|call| CallMethodResult {
                        status_code: StatusCode::GOOD,
                        output_arguments: call.input_arguments.into_iter().rev().collect(),
                        ..Default::default()
                    })
                    .collect();
                Some(
                    CallResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::CreateSubscription(r) => {
                let delay = self.state.lock().create_delay;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let interval = r.requested_publishing_interval.max(50.0);
                let keepalive_count = r.requested_max_keep_alive_count.max(1);
                let mut state = self.state.lock();
                state.next_subscription_id += 1;
                state.subscriptions_created += 1;
                let id = state.next_subscription_id;
                let interval_duration = Duration::from_secs_f64(interval / 1000.0);
                state.subscriptions.insert(
                    id,
                    MockSubscription {
                        session,
                        interval: interval_duration,
                        keepalive_count,
                        publishing_enabled: r.publishing_enabled,
                        next_sequence: 1,
                        next_due: Instant::now() + interval_duration,
                        idle_cycles: 0,
                        items: Vec::new(),
                        pending: VecDeque::new(),
                        retransmit: BTreeMap::new(),
                    },
                );
                Some(
                    CreateSubscriptionResponse {
                        response_header: header(StatusCode::GOOD),
                        subscription_id: id,
                        revised_publishing_interval: interval,
                        revised_lifetime_count: r.requested_lifetime_count.max(keepalive_count * 3),
                        revised_max_keep_alive_count: keepalive_count,
                    }
                    .into(),
                )
            }
            ServiceRequest::ModifySubscription(r) => {
                let mut state = self.state.lock();
                let Some(subscription) = state.subscriptions.get_mut(&r.subscription_id) else {
                    return fault(StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                };
                // Intervals below 100ms are raised.
                let interval = r.requested_publishing_interval.max(100.0);
                subscription.interval = Duration::from_secs_f64(interval / 1000.0);
                subscription.keepalive_count = r.requested_max_keep_alive_count.max(1);
                Some(
                    ModifySubscriptionResponse {
                        response_header: header(StatusCode::GOOD),
                        revised_publishing_interval: interval,
                        revised_lifetime_count: r.requested_lifetime_count,
                        revised_max_keep_alive_count: subscription.keepalive_count,
                    }
                    .into(),
                )
            }
            ServiceRequest::SetPublishingMode(r) => {
                let mut state = self.state.lock();
                let results = r
                    .subscription_ids
                    .iter()
                    .map(|id| match state.subscriptions.get_mut(id) {
                        Some(subscription) => {
                            subscription.publishing_enabled = r.publishing_enabled;
                            StatusCode::GOOD
                        }
                        None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                    })
                    .collect();
                Some(
                    SetPublishingModeResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::DeleteSubscriptions(r) => {
                let mut state = self.state.lock();
                let results = r
                    .subscription_ids
                    .iter()
                    .map(|id| match state.subscriptions.remove(id) {
                        Some(_) => StatusCode::GOOD,
                        None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                    })
                    .collect();
                Some(
                    DeleteSubscriptionsResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::CreateMonitoredItems(r) => {
                let mut state = self.state.lock();
                if !state.subscriptions.contains_key(&r.subscription_id) {
                    return fault(StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                }
                let mut results = Vec::with_capacity(r.items_to_create.len());
                for create in r.items_to_create {
                    let node_id = create.item_to_monitor.node_id;
                    let known = node_id == NodeId::SERVER_CURRENT_TIME
                        || node_id == NodeId::SERVER_STATE
                        || state.values.contains_key(&node_id);
                    if !known {
                        results.push(MonitoredItemCreateResult {
                            status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                            ..Default::default()
                        });
                        continue;
                    }
                    state.next_item_id += 1;
                    let id = state.next_item_id;
                    let initial = state.values.get(&node_id).cloned();
                    let params = create.requested_parameters;
                    let Some(subscription) = state.subscriptions.get_mut(&r.subscription_id) else {
                        continue;
                    };
                    if let Some(value) = initial {
                        subscription.pending.push_back(MonitoredItemNotification {
                            client_handle: params.client_handle,
                            value: DataValue::new(value),
                        });
                    }
                    subscription.items.push(MockItem {
                        id,
                        client_handle: params.client_handle,
                        node_id,
                    });
                    results.push(MonitoredItemCreateResult {
                        status_code: StatusCode::GOOD,
                        monitored_item_id: id,
                        revised_sampling_interval: params.sampling_interval.max(100.0),
                        revised_queue_size: params.queue_size.max(1),
                        ..Default::default()
                    });
                }
                Some(
                    CreateMonitoredItemsResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::DeleteMonitoredItems(r) => {
                let mut state = self.state.lock();
                let Some(subscription) = state.subscriptions.get_mut(&r.subscription_id) else {
                    return fault(StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                };
                let results = r
                    .monitored_item_ids
                    .iter()
                    .map(|id| {
                        let before = subscription.items.len();
                        subscription.items.retain(|item| item.id != *id);
                        if subscription.items.len() < before {
                            StatusCode::GOOD
                        } else {
                            StatusCode::BAD_MONITORED_ITEM_ID_INVALID
                        }
                    })
                    .collect();
                Some(
                    DeleteMonitoredItemsResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::TransferSubscriptions(r) => {
                let mut state = self.state.lock();
                if !state.transfer_supported {
                    return fault(StatusCode::BAD_SERVICE_UNSUPPORTED);
                }
                state.transfers += 1;
                let results = r
                    .subscription_ids
                    .iter()
                    .map(|id| match state.subscriptions.get_mut(id) {
                        Some(subscription) => {
                            subscription.session = session;
                            TransferResult {
                                status_code: StatusCode::GOOD,
                                available_sequence_numbers: subscription
                                    .retransmit
                                    .keys()
                                    .copied()
                                    .collect(),
                            }
                        }
                        None => TransferResult {
                            status_code: StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                            available_sequence_numbers: Vec::new(),
                        },
                    })
                    .collect();
                Some(
                    TransferSubscriptionsResponse {
                        response_header: header(StatusCode::GOOD),
                        results,
                        ..Default::default()
                    }
                    .into(),
                )
            }
            ServiceRequest::Republish(r) => {
                let mut state = self.state.lock();
                let message = match state.subscriptions.get(&r.subscription_id) {
                    Some(subscription) => subscription
                        .retransmit
                        .get(&r.retransmit_sequence_number)
                        .cloned(),
                    None => return fault(StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
                };
                match message {
                    Some(notification_message) => {
                        state.republished.push(r.retransmit_sequence_number);
                        Some(
                            RepublishResponse {
                                response_header: header(StatusCode::GOOD),
                                notification_message,
                            }
                            .into(),
                        )
                    }
                    None => fault(StatusCode::BAD_MESSAGE_NOT_AVAILABLE),
                }
            }
            ServiceRequest::Publish(r) => self.publish(session, handle, r).await,
            _ => fault(StatusCode::BAD_SERVICE_UNSUPPORTED),
        }
    }

    async fn publish(
        &self,
        session: u32,
        handle: u32,
        request: PublishRequest,
    ) -> Option<ServiceResponse> {
        let fault = |status| -> Option<ServiceResponse> {
            Some(ServiceResponse::ServiceFault(ServiceFault {
                response_header: ResponseHeader::new(handle, status),
            }))
        };

        let results = {
            let mut state = self.state.lock();
            let results: Vec<StatusCode> = request
                .subscription_acknowledgements
                .iter()
                .map(|ack| {
                    state.acknowledged.push((ack.subscription_id, ack.sequence_number));
                    match state.subscriptions.get_mut(&ack.subscription_id) {
                        Some(subscription) => {
                            if subscription.retransmit.remove(&ack.sequence_number).is_some() {
                                StatusCode::GOOD
                            } else {
                                StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN
                            }
                        }
                        None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                    }
                })
                .collect();
            if let Some(limit) = state.publish_limit {
                if state.outstanding_publishes >= limit {
                    state.rejected_publishes += 1;
                    return fault(StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS);
                }
            }
            state.outstanding_publishes += 1;
            state.peak_outstanding = state.peak_outstanding.max(state.outstanding_publishes);
            results
        };
        let _outstanding = Outstanding(self);

        loop {
            let cycle = {
                let mut state = self.state.lock();
                if !state.sessions.contains(&session) {
                    return fault(StatusCode::BAD_SESSION_CLOSED);
                }
                self.next_cycle(&mut state, session)
            };
            match cycle {
                Cycle::Message(subscription_id, message, available) => {
                    return Some(
                        PublishResponse {
                            response_header: ResponseHeader::new(handle, StatusCode::GOOD),
                            subscription_id,
                            available_sequence_numbers: available,
                            more_notifications: false,
                            notification_message: message,
                            results,
                            ..Default::default()
                        }
                        .into(),
                    );
                }
                Cycle::Lost => return None,
                Cycle::Wait(None) => return fault(StatusCode::BAD_NO_SUBSCRIPTION),
                Cycle::Wait(Some(at)) => tokio::time::sleep_until(at).await,
            }
        }
    }

    /// Runs every publishing cycle that is due and returns the first message
    /// produced, or when to look again.
    fn next_cycle(&self, state: &mut ServerState, session: u32) -> Cycle {
        let now = Instant::now();
        let clock = self.clock();
        let lose = state.lose_next_message;

        let mut due: Vec<(Instant, u32)> = state
            .subscriptions
            .iter()
            .filter(|(_, s)| s.session == session)
            .map(|(id, s)| (s.next_due, *id))
            .collect();
        due.sort();

        for (at, id) in due.iter().copied() {
            if at > now {
                break;
            }
            let Some(subscription) = state.subscriptions.get_mut(&id) else {
                continue;
            };
            subscription.next_due += subscription.interval;
            if subscription.next_due <= now {
                subscription.next_due = now + subscription.interval;
            }

            for item in subscription
                .items
                .iter()
                .filter(|item| item.node_id == NodeId::SERVER_CURRENT_TIME)
            {
                subscription.pending.push_back(MonitoredItemNotification {
                    client_handle: item.client_handle,
                    value: DataValue::new(clock),
                });
            }

            if subscription.publishing_enabled && !subscription.pending.is_empty() {
                let sequence_number = subscription.next_sequence;
                subscription.next_sequence += 1;
                subscription.idle_cycles = 0;
                let message = NotificationMessage {
                    sequence_number,
                    publish_time: clock,
                    notification_data: vec![ExtensionObject::from_structure(
                        DataChangeNotification {
                            monitored_items: subscription.pending.drain(..).collect(),
                            ..Default::default()
                        },
                    )],
                };
                subscription.retransmit.insert(sequence_number, message.clone());
                let available = subscription.retransmit.keys().copied().collect();
                if lose {
                    state.lose_next_message = false;
                    return Cycle::Lost;
                }
                return Cycle::Message(id, message, available);
            }
            if !subscription.publishing_enabled {
                subscription.pending.clear();
            }

            subscription.idle_cycles += 1;
            if subscription.idle_cycles >= subscription.keepalive_count {
                subscription.idle_cycles = 0;
                let message = NotificationMessage {
                    sequence_number: subscription.next_sequence,
                    publish_time: clock,
                    notification_data: Vec::new(),
                };
                let available = subscription.retransmit.keys().copied().collect();
                return Cycle::Message(id, message, available);
            }
        }

        Cycle::Wait(
            state
                .subscriptions
                .values()
                .filter(|s| s.session == session)
                .map(|s| s.next_due)
                .min(),
        )
    }
}

struct Outstanding<'a>(&'a MockServer);

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.outstanding_publishes = state.outstanding_publishes.saturating_sub(1);
    }
}

fn reference(node_id: NodeId, name: &str, node_class: NodeClass) -> ReferenceDescription {
    ReferenceDescription {
        reference_type_id: NodeId::HIERARCHICAL_REFERENCES,
        is_forward: true,
        node_id: node_id.into(),
        browse_name: QualifiedName::new(0, name),
        display_name: LocalizedText::new(name),
        node_class,
        ..Default::default()
    }
}

// =============================================================================
// Transport
// =============================================================================

#[derive(Debug)]
pub struct MockTransport {
    server: Arc<MockServer>,
    epoch: u64,
    state: watch::Sender<ChannelState>,
}

impl MockTransport {
    fn fault(&self) {
        self.state.send_replace(ChannelState::Faulted);
    }
}

#[async_trait]
impl ServiceTransport for MockTransport {
    async fn send(&self, request: ServiceRequest, timeout: Duration) -> OpcUaResult<ServiceResponse> {
        if !self.state.borrow().is_open() {
            return Err(TransportError::NotConnected.into());
        }
        let mut link = self.server.link.subscribe();
        let current = *link.borrow_and_update();
        if current != self.epoch {
            self.fault();
            return Err(TransportError::closed("connection reset").into());
        }

        let epoch = self.epoch;
        let dropped = async move {
            loop {
                if link.changed().await.is_err() {
                    return;
                }
                let current = *link.borrow_and_update();
                if current != epoch {
                    return;
                }
            }
        };
        let service = request.name();

        tokio::select! {
            biased;
            _ = dropped => {
                self.fault();
                Err(TransportError::closed("connection reset").into())
            }
            response = self.server.handle(request) => match response {
                Some(response) => Ok(response),
                None => {
                    self.server.drop_connections();
                    self.fault();
                    Err(TransportError::closed("connection reset").into())
                }
            },
            _ = tokio::time::sleep(timeout) => Err(OpcUaError::request_timeout(service, timeout)),
        }
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    async fn close(&self) {
        self.state.send_if_modified(|state| {
            if *state == ChannelState::Open {
                *state = ChannelState::Closed;
                true
            } else {
                false
            }
        });
    }
}

#[derive(Debug)]
pub struct MockFactory {
    server: Arc<MockServer>,
}

impl MockFactory {
    pub fn new(server: &Arc<MockServer>) -> Arc<Self> {
        Arc::new(Self {
            server: Arc::clone(server),
        })
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn open(&self) -> OpcUaResult<Arc<dyn ServiceTransport>> {
        self.server.opens.fetch_add(1, Ordering::SeqCst);
        if !self.server.online.load(Ordering::SeqCst) {
            return Err(TransportError::refused(ENDPOINT).into());
        }
        let epoch = *self.server.link.borrow();
        let (state, _) = watch::channel(ChannelState::Open);
        Ok(Arc::new(MockTransport {
            server: Arc::clone(&self.server),
            epoch,
            state,
        }))
    }

    fn endpoint_url(&self) -> &str {
        ENDPOINT
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Client configuration with short, jitter-free reconnect backoff.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(ENDPOINT);
    config.keepalive_interval = Duration::from_secs(30);
    config.reconnect.backoff =
        ExponentialBackoff::new(Duration::from_millis(200), Duration::from_secs(1)).with_jitter(0.0);
    config
}

pub async fn connect(server: &Arc<MockServer>) -> OpcUaClient {
    connect_with(server, test_config()).await
}

pub async fn connect_with(server: &Arc<MockServer>, config: ClientConfig) -> OpcUaClient {
    OpcUaClient::connect_with(config, MockFactory::new(server))
        .await
        .expect("connect to mock server")
}

/// Receives events until one matches `pred` or `within` elapses.
///
/// Returns the events seen, the match last.
pub async fn collect_until(
    events: &mut mpsc::UnboundedReceiver<SubscriptionEvent>,
    within: Duration,
    mut pred: impl FnMut(&SubscriptionEvent) -> bool,
) -> Option<Vec<SubscriptionEvent>> {
    let deadline = Instant::now() + within;
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv()).await.ok()??;
        let done = pred(&event);
        seen.push(event);
        if done {
            return Some(seen);
        }
    }
}

/// Receives events for `period`.
pub async fn collect_for(
    events: &mut mpsc::UnboundedReceiver<SubscriptionEvent>,
    period: Duration,
) -> Vec<SubscriptionEvent> {
    let deadline = Instant::now() + period;
    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}

/// Sequence numbers of the data changes among `events`.
pub fn data_sequence_numbers(events: &[SubscriptionEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            SubscriptionEvent::DataChange {
                sequence_number, ..
            } => Some(*sequence_number),
            _ => None,
        })
        .collect()
}

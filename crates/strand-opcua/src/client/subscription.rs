// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client-side subscription state.
//!
//! A [`Subscription`] owns its monitored items and the sequence tracker of
//! its notification stream. It is mutated only by the dispatch task.
//!
//! # State machine
//!
//! ```text
//! Creating ──► Active ◄──► KeepAliveOnly
//!                │  ▲          │
//!                ▼  │          ▼
//!              Late ◄──────────┘
//!
//! Active/KeepAliveOnly/Late ──► Transferring ──► Active | Creating
//! Active/KeepAliveOnly/Late ──► Deleted ──► Creating
//! any ──► Closing ──► Closed
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::monitored_item::{ItemValue, MonitoredItem, MonitoredItemDefinition};
use super::sequence::{Delivery, SequenceTracker};
use super::sink::{NotificationSink, SubscriptionEvent};
use crate::codec::{DateTime, StatusCode, WireCodec};
use crate::services::{
    CreateSubscriptionRequest, CreateSubscriptionResponse, DataChangeNotification,
    ModifySubscriptionRequest, ModifySubscriptionResponse, Notification,
};
use crate::types::SubscriptionSettings;

// =============================================================================
// SubscriptionState
// =============================================================================

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// CreateSubscription in flight.
    Creating,
    /// Last matched response carried notifications.
    Active,
    /// Last matched response was a keep-alive.
    KeepAliveOnly,
    /// No matched response within the staleness window.
    Late,
    /// Being moved to a new session.
    Transferring,
    /// Deletion requested.
    Closing,
    /// Deleted by the caller.
    Closed,
    /// The server no longer knows the subscription.
    Deleted,
}

impl SubscriptionState {
    /// Returns `true` if publish responses are expected.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::KeepAliveOnly | Self::Late)
    }

    /// Returns `true` if the subscription will not be used again.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Returns `true` if moving to `next` is allowed.
    pub fn can_transition_to(&self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;
        if next == Closing {
            return !matches!(self, Closing | Closed);
        }
        matches!(
            (self, next),
            (Creating, Active | Closed | Deleted)
                | (Active, KeepAliveOnly | Late | Transferring | Deleted)
                | (KeepAliveOnly, Active | Late | Transferring | Deleted)
                | (Late, Active | KeepAliveOnly | Transferring | Deleted)
                | (Transferring, Active | Creating | Deleted)
                | (Deleted, Creating | Closed)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "Creating"),
            Self::Active => write!(f, "Active"),
            Self::KeepAliveOnly => write!(f, "KeepAliveOnly"),
            Self::Late => write!(f, "Late"),
            Self::Transferring => write!(f, "Transferring"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

// =============================================================================
// Statistics and info
// =============================================================================

/// Per-subscription counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionStats {
    /// Notification messages delivered.
    pub notifications: u64,
    /// Keep-alive messages received.
    pub keep_alives: u64,
    /// Gaps reported.
    pub gaps: u64,
    /// Messages recovered through republish.
    pub republishes: u64,
    /// Duplicate messages dropped.
    pub duplicates: u64,
    /// Notifications skipped because they failed to decode.
    pub decode_errors: u64,
    /// Publish time of the latest message.
    pub last_publish_time: Option<DateTime>,
}

/// Snapshot of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    /// Local handle.
    pub handle: u32,
    /// Server id (0 before creation).
    pub subscription_id: u32,
    /// Current state.
    pub state: SubscriptionState,
    /// Revised publishing interval.
    pub publishing_interval: Duration,
    /// Revised keep-alive count.
    pub keepalive_count: u32,
    /// Revised lifetime count.
    pub lifetime_count: u32,
    /// Publishing enabled.
    pub publishing_enabled: bool,
    /// Number of monitored items.
    pub item_count: usize,
    /// Last delivered sequence number.
    pub last_sequence_number: Option<u32>,
    /// Counters.
    pub stats: SubscriptionStats,
}

// =============================================================================
// Subscription
// =============================================================================

/// One subscription and its monitored items.
pub struct Subscription {
    handle: u32,
    subscription_id: u32,
    requested: SubscriptionSettings,
    publishing_interval: Duration,
    keepalive_count: u32,
    lifetime_count: u32,
    publishing_enabled: bool,
    state: SubscriptionState,
    items: BTreeMap<u32, MonitoredItem>,
    tracker: SequenceTracker,
    last_response: Instant,
    stats: SubscriptionStats,
    sink: Arc<dyn NotificationSink>,
}

impl Subscription {
    /// Creates a subscription in `Creating` state.
    pub fn new(
        handle: u32,
        settings: SubscriptionSettings,
        sink: Arc<dyn NotificationSink>,
        now: Instant,
    ) -> Self {
        Self {
            handle,
            subscription_id: 0,
            publishing_interval: settings.publishing_interval,
            keepalive_count: settings.keepalive_count,
            lifetime_count: settings.lifetime_count,
            publishing_enabled: settings.publishing_enabled,
            requested: settings,
            state: SubscriptionState::Creating,
            items: BTreeMap::new(),
            tracker: SequenceTracker::new(),
            last_response: now,
            stats: SubscriptionStats::default(),
            sink,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Local handle.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Server id.
    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    /// Current state.
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Requested settings.
    pub fn requested(&self) -> &SubscriptionSettings {
        &self.requested
    }

    /// Revised publishing interval.
    pub fn publishing_interval(&self) -> Duration {
        self.publishing_interval
    }

    /// Counters.
    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// Sequence tracker.
    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut SequenceTracker {
        &mut self.tracker
    }

    /// Snapshot for callers.
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            handle: self.handle,
            subscription_id: self.subscription_id,
            state: self.state,
            publishing_interval: self.publishing_interval,
            keepalive_count: self.keepalive_count,
            lifetime_count: self.lifetime_count,
            publishing_enabled: self.publishing_enabled,
            item_count: self.items.len(),
            last_sequence_number: self.tracker.last_delivered(),
            stats: self.stats.clone(),
        }
    }

    /// Time without a matched response after which the subscription is late.
    pub fn staleness_window(&self, safety_factor: f64) -> Duration {
        let keep_alive = self.publishing_interval.saturating_mul(self.keepalive_count.max(1));
        keep_alive.mul_f64(safety_factor.max(1.0))
    }

    // =========================================================================
    // Server interaction
    // =========================================================================

    /// Request creating this subscription with the requested settings.
    pub fn create_request(&self) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            requested_publishing_interval: millis(self.requested.publishing_interval),
            requested_lifetime_count: self.requested.lifetime_count,
            requested_max_keep_alive_count: self.requested.keepalive_count,
            max_notifications_per_publish: self.requested.max_notifications_per_publish,
            publishing_enabled: self.publishing_enabled,
            priority: self.requested.priority,
            ..Default::default()
        }
    }

    /// Records the create response and moves to `Active`.
    pub fn apply_created(&mut self, response: &CreateSubscriptionResponse, now: Instant) {
        self.subscription_id = response.subscription_id;
        self.adopt_revised(
            response.revised_publishing_interval,
            response.revised_max_keep_alive_count,
            response.revised_lifetime_count,
        );
        self.last_response = now;
        tracing::info!(
            handle = self.handle,
            subscription_id = self.subscription_id,
            publishing_interval = ?self.publishing_interval,
            keepalive_count = self.keepalive_count,
            "Subscription created"
        );
        self.set_state(SubscriptionState::Active);
    }

    /// Request modifying the timing of this subscription.
    pub fn modify_request(&self, settings: &SubscriptionSettings) -> ModifySubscriptionRequest {
        ModifySubscriptionRequest {
            subscription_id: self.subscription_id,
            requested_publishing_interval: millis(settings.publishing_interval),
            requested_lifetime_count: settings.lifetime_count,
            requested_max_keep_alive_count: settings.keepalive_count,
            max_notifications_per_publish: settings.max_notifications_per_publish,
            priority: settings.priority,
            ..Default::default()
        }
    }

    /// Adopts the revised timing; the requested settings are kept for
    /// recreation.
    pub fn apply_modified(
        &mut self,
        settings: SubscriptionSettings,
        response: &ModifySubscriptionResponse,
    ) {
        self.requested = settings;
        self.adopt_revised(
            response.revised_publishing_interval,
            response.revised_max_keep_alive_count,
            response.revised_lifetime_count,
        );
        tracing::info!(
            subscription_id = self.subscription_id,
            publishing_interval = ?self.publishing_interval,
            keepalive_count = self.keepalive_count,
            "Subscription modified"
        );
    }

    /// Records the publishing mode.
    pub fn set_publishing_enabled(&mut self, enabled: bool) {
        self.publishing_enabled = enabled;
        self.requested.publishing_enabled = enabled;
    }

    /// Drops server state before the subscription is created again.
    ///
    /// Item definitions survive; their server handles and queued values do
    /// not. Sequence numbering restarts.
    pub fn reset_for_recreate(&mut self) -> u32 {
        let old_id = self.subscription_id;
        self.subscription_id = 0;
        self.tracker.reset();
        for item in self.items.values_mut() {
            *item = MonitoredItem::new(item.definition().clone());
        }
        self.set_state(SubscriptionState::Creating);
        old_id
    }

    fn adopt_revised(&mut self, interval_ms: f64, keepalive_count: u32, lifetime_count: u32) {
        if interval_ms > 0.0 {
            self.publishing_interval = Duration::from_secs_f64(interval_ms / 1000.0);
        }
        if keepalive_count > 0 {
            self.keepalive_count = keepalive_count;
        }
        if lifetime_count > 0 {
            self.lifetime_count = lifetime_count;
        }
    }

    // =========================================================================
    // Items
    // =========================================================================

    /// Item by client handle.
    pub fn item(&self, client_handle: u32) -> Option<&MonitoredItem> {
        self.items.get(&client_handle)
    }

    /// All items ordered by client handle.
    pub fn items(&self) -> impl Iterator<Item = &MonitoredItem> {
        self.items.values()
    }

    /// Item definitions, for recreation.
    pub fn definitions(&self) -> Vec<MonitoredItemDefinition> {
        self.items.values().map(|item| item.definition().clone()).collect()
    }

    /// Adds or replaces an item.
    pub fn insert_item(&mut self, item: MonitoredItem) {
        self.items.insert(item.client_handle(), item);
    }

    /// Removes an item.
    pub fn remove_item(&mut self, client_handle: u32) -> Option<MonitoredItem> {
        self.items.remove(&client_handle)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Moves to `next` if allowed and reports the change to the sink.
    pub fn set_state(&mut self, next: SubscriptionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                subscription_id = self.subscription_id,
                old_state = %self.state,
                new_state = %next,
                "Ignoring invalid subscription transition"
            );
            return false;
        }
        let from = self.state;
        self.state = next;
        tracing::trace!(
            subscription_id = self.subscription_id,
            old_state = %from,
            new_state = %next,
            "Subscription state changed"
        );
        self.sink.deliver(SubscriptionEvent::StateChanged {
            subscription: self.handle,
            from,
            to: next,
        });
        true
    }

    /// Records a matched publish response.
    pub fn mark_response(&mut self, now: Instant, keep_alive: bool) {
        self.last_response = now;
        if keep_alive {
            self.stats.keep_alives += 1;
        }
        if self.state.is_live() {
            let next = if keep_alive {
                SubscriptionState::KeepAliveOnly
            } else {
                SubscriptionState::Active
            };
            self.set_state(next);
        }
    }

    /// Moves to `Late` when nothing arrived within the staleness window.
    pub fn check_late(&mut self, now: Instant, safety_factor: f64) -> bool {
        if !matches!(
            self.state,
            SubscriptionState::Active | SubscriptionState::KeepAliveOnly
        ) {
            return false;
        }
        let window = self.staleness_window(safety_factor);
        if now.saturating_duration_since(self.last_response) <= window {
            return false;
        }
        tracing::warn!(
            subscription_id = self.subscription_id,
            window = ?window,
            "Subscription is late"
        );
        self.set_state(SubscriptionState::Late)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Hands released deliveries to the sink.
    pub fn deliver(&mut self, deliveries: Vec<Delivery>, codec: &WireCodec) {
        for delivery in deliveries {
            match delivery {
                Delivery::Message(message) => {
                    self.stats.notifications += 1;
                    self.stats.last_publish_time = Some(message.publish_time);
                    let notifications = message.notifications(codec.registry(), codec.limits());
                    for (index, notification) in notifications.into_iter().enumerate() {
                        match notification {
                            Ok(notification) => self.route(
                                notification,
                                message.sequence_number,
                                message.publish_time,
                            ),
                            Err(e) => {
                                self.stats.decode_errors += 1;
                                tracing::warn!(
                                    subscription_id = self.subscription_id,
                                    sequence_number = message.sequence_number,
                                    notification = index,
                                    offset = ?e.offset(),
                                    error = %e,
                                    "Skipping undecodable notification"
                                );
                            }
                        }
                    }
                }
                Delivery::Gap { from, to } => {
                    self.stats.gaps += 1;
                    tracing::warn!(
                        subscription_id = self.subscription_id,
                        from = from,
                        to = to,
                        "Notification sequence gap"
                    );
                    self.sink.deliver(SubscriptionEvent::Gap {
                        subscription: self.handle,
                        from,
                        to,
                    });
                }
            }
        }
    }

    /// Counts a message recovered by republish.
    pub fn record_republish(&mut self) {
        self.stats.republishes += 1;
    }

    /// Counts a dropped duplicate.
    pub fn record_duplicate(&mut self) {
        self.stats.duplicates += 1;
    }

    /// Reports that the subscription was recreated under a new id.
    pub fn report_discontinuity(&self, old_subscription_id: u32) {
        tracing::warn!(
            handle = self.handle,
            old_subscription_id = old_subscription_id,
            new_subscription_id = self.subscription_id,
            "Subscription recreated, values in between are lost"
        );
        self.sink.deliver(SubscriptionEvent::Discontinuity {
            subscription: self.handle,
            old_subscription_id,
            new_subscription_id: self.subscription_id,
        });
    }

    fn route(&mut self, notification: Notification, sequence_number: u32, publish_time: DateTime) {
        match notification {
            Notification::DataChange(data) => {
                let values = self.route_data_change(data);
                if !values.is_empty() {
                    self.sink.deliver(SubscriptionEvent::DataChange {
                        subscription: self.handle,
                        sequence_number,
                        publish_time,
                        values,
                    });
                }
            }
            Notification::Event(list) => {
                self.sink.deliver(SubscriptionEvent::Events {
                    subscription: self.handle,
                    sequence_number,
                    events: list.events,
                });
            }
            Notification::StatusChange(change) => {
                tracing::info!(
                    subscription_id = self.subscription_id,
                    status = %change.status,
                    "Subscription status change"
                );
                self.sink.deliver(SubscriptionEvent::StatusChange {
                    subscription: self.handle,
                    status: change.status,
                });
                if change.status.matches(StatusCode::BAD_TIMEOUT)
                    || change.status.matches(StatusCode::BAD_SUBSCRIPTION_ID_INVALID)
                {
                    self.set_state(SubscriptionState::Deleted);
                }
            }
            Notification::Other(type_id) => {
                tracing::debug!(
                    subscription_id = self.subscription_id,
                    type_id = %type_id.to_opc_string(),
                    "Ignoring unsupported notification type"
                );
            }
        }
    }

    /// Queues every value, then drains the queues in server order.
    fn route_data_change(&mut self, data: DataChangeNotification) -> Vec<ItemValue> {
        let mut touched = Vec::new();
        for (position, notification) in data.monitored_items.into_iter().enumerate() {
            match self.items.get_mut(&notification.client_handle) {
                Some(item) => {
                    item.push_at(position, notification.value);
                    if !touched.contains(&notification.client_handle) {
                        touched.push(notification.client_handle);
                    }
                }
                None => tracing::debug!(
                    subscription_id = self.subscription_id,
                    client_handle = notification.client_handle,
                    "Value for unknown client handle"
                ),
            }
        }

        let mut values: Vec<(usize, ItemValue)> = Vec::new();
        for handle in &touched {
            if let Some(item) = self.items.get_mut(handle) {
                values.extend(item.drain_positioned());
            }
        }
        values.sort_by_key(|(position, _)| *position);
        values.into_iter().map(|(_, value)| value).collect()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("subscription_id", &self.subscription_id)
            .field("state", &self.state)
            .field("items", &self.items.len())
            .finish()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::sink::ChannelSink;
    use crate::codec::{DataValue, ExtensionObject, NodeId, Variant};
    use crate::services::{
        MonitoredItemNotification, NotificationMessage, StatusChangeNotification,
    };
    use crate::types::MonitoredItemSettings;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn subscription() -> (Subscription, UnboundedReceiver<SubscriptionEvent>) {
        let (sink, receiver) = ChannelSink::new();
        let mut subscription = Subscription::new(
            1,
            SubscriptionSettings::with_interval(Duration::from_millis(500)).keepalive_count(4),
            Arc::new(sink),
            Instant::now(),
        );
        subscription.apply_created(
            &CreateSubscriptionResponse {
                subscription_id: 77,
                revised_publishing_interval: 500.0,
                revised_max_keep_alive_count: 4,
                revised_lifetime_count: 12,
                ..Default::default()
            },
            Instant::now(),
        );
        (subscription, receiver)
    }

    fn drain(receiver: &mut UnboundedReceiver<SubscriptionEvent>) -> Vec<SubscriptionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    fn item(handle: u32, queue_size: u32) -> MonitoredItem {
        MonitoredItem::new(MonitoredItemDefinition::value(
            handle,
            NodeId::numeric(2, handle),
            MonitoredItemSettings::default().with_queue(queue_size, true),
        ))
    }

    fn data_message(sequence_number: u32, values: &[(u32, i32)]) -> NotificationMessage {
        let notification = DataChangeNotification {
            monitored_items: values
                .iter()
                .map(|(handle, value)| MonitoredItemNotification {
                    client_handle: *handle,
                    value: DataValue::new(Variant::Int32(*value)),
                })
                .collect(),
            ..Default::default()
        };
        NotificationMessage {
            sequence_number,
            publish_time: DateTime::now(),
            notification_data: vec![ExtensionObject::from_structure(notification)],
        }
    }

    #[test]
    fn test_transition_table() {
        use SubscriptionState::*;
        assert!(Creating.can_transition_to(Active));
        assert!(Active.can_transition_to(Late));
        assert!(Late.can_transition_to(Active));
        assert!(Active.can_transition_to(Transferring));
        assert!(Transferring.can_transition_to(Creating));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Closing));
        assert!(!Creating.can_transition_to(Late));
        assert!(Closing.is_closed());
        assert!(!Deleted.is_closed());
    }

    #[tokio::test]
    async fn test_created_reports_state() {
        let (subscription, mut receiver) = subscription();
        assert_eq!(subscription.state(), SubscriptionState::Active);
        assert_eq!(subscription.subscription_id(), 77);
        assert_eq!(
            drain(&mut receiver),
            [SubscriptionEvent::StateChanged {
                subscription: 1,
                from: SubscriptionState::Creating,
                to: SubscriptionState::Active,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_and_recovery() {
        let (mut subscription, mut receiver) = subscription();
        drain(&mut receiver);
        // 500ms x 4 x 1.5
        assert_eq!(subscription.staleness_window(1.5), Duration::from_secs(3));

        tokio::time::advance(Duration::from_millis(2900)).await;
        assert!(!subscription.check_late(Instant::now(), 1.5));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(subscription.check_late(Instant::now(), 1.5));
        assert_eq!(subscription.state(), SubscriptionState::Late);

        subscription.mark_response(Instant::now(), true);
        assert_eq!(subscription.state(), SubscriptionState::KeepAliveOnly);
        assert_eq!(subscription.stats().keep_alives, 1);

        subscription.mark_response(Instant::now(), false);
        assert_eq!(subscription.state(), SubscriptionState::Active);
        assert_eq!(drain(&mut receiver).len(), 3);
    }

    #[tokio::test]
    async fn test_data_change_preserves_server_order() {
        let (mut subscription, mut receiver) = subscription();
        subscription.insert_item(item(1, 5));
        subscription.insert_item(item(2, 5));
        drain(&mut receiver);

        let message = data_message(1, &[(2, 20), (1, 10), (2, 21), (9, 0)]);
        subscription.deliver(vec![Delivery::Message(message)], &WireCodec::standard());

        let events = drain(&mut receiver);
        let SubscriptionEvent::DataChange { values, sequence_number, .. } = &events[0] else {
            panic!("expected data change, got {:?}", events);
        };
        assert_eq!(*sequence_number, 1);
        let order: Vec<(u32, Variant)> = values
            .iter()
            .map(|v| (v.client_handle, v.value.value.clone()))
            .collect();
        assert_eq!(
            order,
            [
                (2, Variant::Int32(20)),
                (1, Variant::Int32(10)),
                (2, Variant::Int32(21)),
            ]
        );
        assert_eq!(subscription.stats().notifications, 1);
    }

    #[tokio::test]
    async fn test_queue_overflow_in_batch() {
        let (mut subscription, mut receiver) = subscription();
        subscription.insert_item(item(1, 1));
        drain(&mut receiver);

        let message = data_message(1, &[(1, 1), (1, 2), (1, 3)]);
        subscription.deliver(vec![Delivery::Message(message)], &WireCodec::standard());

        let events = drain(&mut receiver);
        let SubscriptionEvent::DataChange { values, .. } = &events[0] else {
            panic!("expected data change");
        };
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value.value, Variant::Int32(3));
        assert!(values[0].overflow);
    }

    #[tokio::test]
    async fn test_bad_notification_is_skipped() {
        let (mut subscription, mut receiver) = subscription();
        subscription.insert_item(item(1, 1));
        drain(&mut receiver);

        let mut message = data_message(1, &[(1, 5)]);
        message.notification_data.insert(
            0,
            ExtensionObject::from_binary(NodeId::numeric(0, 811), vec![0x05, 0x00]),
        );
        subscription.deliver(vec![Delivery::Message(message)], &WireCodec::standard());

        assert_eq!(subscription.stats().decode_errors, 1);
        let events = drain(&mut receiver);
        assert!(matches!(events[0], SubscriptionEvent::DataChange { .. }));
    }

    #[tokio::test]
    async fn test_status_change_deletes() {
        let (mut subscription, mut receiver) = subscription();
        drain(&mut receiver);

        let message = NotificationMessage {
            sequence_number: 1,
            publish_time: DateTime::now(),
            notification_data: vec![ExtensionObject::from_structure(StatusChangeNotification {
                status: StatusCode::BAD_TIMEOUT,
                ..Default::default()
            })],
        };
        subscription.deliver(vec![Delivery::Message(message)], &WireCodec::standard());
        assert_eq!(subscription.state(), SubscriptionState::Deleted);

        let events = drain(&mut receiver);
        assert!(matches!(events[0], SubscriptionEvent::StatusChange { .. }));
        assert!(matches!(
            events[1],
            SubscriptionEvent::StateChanged {
                to: SubscriptionState::Deleted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_gap_reported() {
        let (mut subscription, mut receiver) = subscription();
        drain(&mut receiver);
        subscription.deliver(vec![Delivery::Gap { from: 3, to: 4 }], &WireCodec::standard());
        assert_eq!(subscription.stats().gaps, 1);
        assert_eq!(
            drain(&mut receiver),
            [SubscriptionEvent::Gap {
                subscription: 1,
                from: 3,
                to: 4
            }]
        );
    }

    #[tokio::test]
    async fn test_reset_for_recreate_keeps_definitions() {
        let (mut subscription, _receiver) = subscription();
        subscription.insert_item(item(1, 1));
        subscription.set_state(SubscriptionState::Transferring);

        let old = subscription.reset_for_recreate();
        assert_eq!(old, 77);
        assert_eq!(subscription.subscription_id(), 0);
        assert_eq!(subscription.state(), SubscriptionState::Creating);
        assert_eq!(subscription.definitions().len(), 1);
        assert_eq!(subscription.item(1).map(|i| i.server_handle()), Some(0));
    }
}

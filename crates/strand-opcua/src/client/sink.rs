// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Delivery of subscription events to the caller.

use std::fmt;

use tokio::sync::mpsc;

use super::monitored_item::ItemValue;
use super::subscription::SubscriptionState;
use crate::codec::{DateTime, StatusCode};
use crate::services::EventFieldList;

// =============================================================================
// SubscriptionEvent
// =============================================================================

/// Something that happened to a subscription.
///
/// `subscription` is always the local handle returned by
/// `create_subscription`; it stays the same when the subscription is
/// recreated on the server under a new id.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// Data changes of one notification message, in server order.
    DataChange {
        /// Local subscription handle.
        subscription: u32,
        /// Sequence number of the message.
        sequence_number: u32,
        /// Server publish time.
        publish_time: DateTime,
        /// Changed values.
        values: Vec<ItemValue>,
    },

    /// Events of one notification message.
    Events {
        /// Local subscription handle.
        subscription: u32,
        /// Sequence number of the message.
        sequence_number: u32,
        /// Event field lists.
        events: Vec<EventFieldList>,
    },

    /// The server reported a subscription status change.
    StatusChange {
        /// Local subscription handle.
        subscription: u32,
        /// Reported status.
        status: StatusCode,
    },

    /// The subscription changed state.
    StateChanged {
        /// Local subscription handle.
        subscription: u32,
        /// Previous state.
        from: SubscriptionState,
        /// New state.
        to: SubscriptionState,
    },

    /// Sequence numbers `from..=to` will never be delivered.
    Gap {
        /// Local subscription handle.
        subscription: u32,
        /// First skipped sequence number.
        from: u32,
        /// Last skipped sequence number.
        to: u32,
    },

    /// The subscription was recreated; values in between are lost and
    /// sequence numbering restarts.
    Discontinuity {
        /// Local subscription handle.
        subscription: u32,
        /// Server id before recreation.
        old_subscription_id: u32,
        /// Server id after recreation.
        new_subscription_id: u32,
    },
}

impl SubscriptionEvent {
    /// Local handle of the subscription the event belongs to.
    pub fn subscription(&self) -> u32 {
        match self {
            Self::DataChange { subscription, .. }
            | Self::Events { subscription, .. }
            | Self::StatusChange { subscription, .. }
            | Self::StateChanged { subscription, .. }
            | Self::Gap { subscription, .. }
            | Self::Discontinuity { subscription, .. } => *subscription,
        }
    }
}

// =============================================================================
// NotificationSink
// =============================================================================

/// Receives subscription events.
///
/// Called from the dispatch task; implementations must not block.
pub trait NotificationSink: Send + Sync + fmt::Debug {
    /// Delivers one event.
    fn deliver(&self, event: SubscriptionEvent);
}

/// Sink forwarding events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, event: SubscriptionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Notification receiver dropped, event discarded");
        }
    }
}

/// Sink calling a closure.
pub struct FnSink<F>(pub F);

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSink")
    }
}

impl<F> NotificationSink for FnSink<F>
where
    F: Fn(SubscriptionEvent) + Send + Sync,
{
    fn deliver(&self, event: SubscriptionEvent) {
        (self.0)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut receiver) = ChannelSink::new();
        sink.deliver(SubscriptionEvent::Gap {
            subscription: 3,
            from: 4,
            to: 5,
        });
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.subscription(), 3);
    }

    #[test]
    fn test_channel_sink_without_receiver() {
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        sink.deliver(SubscriptionEvent::StatusChange {
            subscription: 1,
            status: StatusCode::BAD_TIMEOUT,
        });
    }

    #[test]
    fn test_fn_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sink = FnSink(move |_event: SubscriptionEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.deliver(SubscriptionEvent::Gap {
            subscription: 1,
            from: 1,
            to: 1,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client.
//!
//! - **Client**: [`OpcUaClient`], node services and subscription management
//! - **Engine**: per-session dispatch task owning all subscription state
//! - **Subscriptions**: state machine, monitored items, sequence tracking
//! - **Session**: create, activate, keep alive and reconnect
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        OpcUaClient                              │
//! │            (read / write / browse / call / subscribe)           │
//! └─────────────────────────────────────────────────────────────────┘
//!                  │ commands                 │ node services
//!                  ▼                          │
//! ┌──────────────────────────────────┐        │
//! │         Engine (task)            │        │
//! │  Subscription ─ MonitoredItem    │        │
//! │  PublishDispatcher               │        │
//! │  SequenceTracker                 │        │
//! └──────────────────────────────────┘        │
//!                  │ Publish / Republish      │
//!                  ▼                          ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Session                                │
//! │          (activation, keep-alive, reconnect, transfer)          │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               ServiceTransport (SecureChannel)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Notifications reach the caller through a [`NotificationSink`] in
//! sequence-number order per subscription; anything that can never be
//! delivered is reported as a [`SubscriptionEvent::Gap`].

mod engine;
mod monitored_item;
mod publish;
pub mod retry;
pub mod sequence;
mod session;
mod sink;
mod subscription;
mod transport;
mod wrapper;

pub use engine::{ConnectionStatus, MonitoredItemResult};
pub use monitored_item::{
    data_change_filter, validate_filter, ItemValue, MonitoredItem, MonitoredItemDefinition,
};
pub use publish::{PublishDispatcher, PublishStats};
pub use retry::ExponentialBackoff;
pub use sequence::{Accepted, Delivery, SequenceTracker};
pub use session::{ReconnectOutcome, Session, SessionInfo, SessionState, SessionStats};
pub use sink::{ChannelSink, FnSink, NotificationSink, SubscriptionEvent};
pub use subscription::{Subscription, SubscriptionInfo, SubscriptionState, SubscriptionStats};
pub use transport::{ServiceTransport, TransportFactory, UaTcpTransportFactory};
pub use wrapper::{ClientStats, OpcUaClient};

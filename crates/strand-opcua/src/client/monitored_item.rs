// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored items.
//!
//! A [`MonitoredItemDefinition`] is what the caller asked for and what a
//! subscription keeps to recreate the item after a lost session. A
//! [`MonitoredItem`] adds what the server answered and the client-side
//! value queue.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{DataValue, ExtensionObject, NodeId, StatusCode};
use crate::error::{OpcUaResult, PeerError, SubscriptionError};
use crate::services::{
    attribute_id, DataChangeFilter, MonitoredItemCreateRequest, MonitoredItemCreateResult,
    MonitoringParameters, ReadValueId,
};
use crate::types::{DataChangeTrigger, DeadbandSettings, MonitoredItemSettings};

/// Info bits marking a value the server dropped older values for.
const OVERFLOW_INFO_BITS: u32 = 0x0000_0480;

// =============================================================================
// Definition
// =============================================================================

/// What to monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemDefinition {
    /// Handle the caller uses to identify values; unique per session.
    pub client_handle: u32,

    /// Node to monitor.
    pub node_id: NodeId,

    /// Attribute to monitor.
    #[serde(default = "default_attribute")]
    pub attribute_id: u32,

    /// Sampling, queue and filter settings.
    #[serde(default)]
    pub settings: MonitoredItemSettings,
}

fn default_attribute() -> u32 {
    attribute_id::VALUE
}

impl MonitoredItemDefinition {
    /// Monitors the value attribute of `node_id`.
    pub fn value(client_handle: u32, node_id: NodeId, settings: MonitoredItemSettings) -> Self {
        Self {
            client_handle,
            node_id,
            attribute_id: attribute_id::VALUE,
            settings,
        }
    }

    /// Validates the filter settings.
    pub fn validate(&self) -> OpcUaResult<()> {
        validate_filter(&self.settings)
    }

    /// Builds the create request.
    pub fn to_create_request(&self) -> MonitoredItemCreateRequest {
        MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId {
                node_id: self.node_id.clone(),
                attribute_id: self.attribute_id,
                ..Default::default()
            },
            monitoring_mode: self.settings.monitoring_mode,
            requested_parameters: MonitoringParameters {
                client_handle: self.client_handle,
                sampling_interval: self.settings.sampling_interval.as_secs_f64() * 1000.0,
                filter: data_change_filter(&self.settings),
                queue_size: self.settings.queue_size,
                discard_oldest: self.settings.discard_oldest,
            },
        }
    }
}

/// Checks deadband settings before they are sent.
///
/// - absolute deadbands must be finite and non-negative
/// - percent deadbands must lie in `0..=100`
/// - a deadband needs a trigger that reports value changes
pub fn validate_filter(settings: &MonitoredItemSettings) -> OpcUaResult<()> {
    match settings.deadband {
        DeadbandSettings::None => return Ok(()),
        DeadbandSettings::Absolute { value } => {
            if !value.is_finite() || value < 0.0 {
                return Err(SubscriptionError::invalid_filter(format!(
                    "absolute deadband must be finite and >= 0, got {}",
                    value
                ))
                .into());
            }
        }
        DeadbandSettings::Percent { percent } => {
            if !(0.0..=100.0).contains(&percent) {
                return Err(SubscriptionError::invalid_filter(format!(
                    "percent deadband must be within 0..=100, got {}",
                    percent
                ))
                .into());
            }
        }
    }
    if settings.trigger == DataChangeTrigger::Status {
        return Err(SubscriptionError::invalid_filter(
            "a deadband requires a trigger that includes value changes",
        )
        .into());
    }
    Ok(())
}

/// Filter extension object for `settings` (null when none is needed).
pub fn data_change_filter(settings: &MonitoredItemSettings) -> ExtensionObject {
    if !settings.has_filter() {
        return ExtensionObject::null();
    }
    ExtensionObject::from_structure(DataChangeFilter {
        trigger: settings.trigger,
        deadband_type: settings.deadband.type_value(),
        deadband_value: settings.deadband.threshold(),
    })
}

// =============================================================================
// ItemValue
// =============================================================================

/// A value delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemValue {
    /// Client handle of the item.
    pub client_handle: u32,

    /// Value as reported.
    pub value: DataValue,

    /// Older values were dropped before this one.
    pub overflow: bool,
}

// =============================================================================
// MonitoredItem
// =============================================================================

/// A created monitored item.
#[derive(Debug, Clone)]
pub struct MonitoredItem {
    definition: MonitoredItemDefinition,
    server_handle: u32,
    revised_sampling_interval: Duration,
    revised_queue_size: u32,
    queue: VecDeque<(usize, ItemValue)>,
    pushed: usize,
    overflows: u64,
}

impl MonitoredItem {
    /// Wraps a definition that has not been created yet.
    pub fn new(definition: MonitoredItemDefinition) -> Self {
        Self {
            revised_sampling_interval: definition.settings.sampling_interval,
            revised_queue_size: definition.settings.queue_size,
            definition,
            server_handle: 0,
            queue: VecDeque::new(),
            pushed: 0,
            overflows: 0,
        }
    }

    /// Records the create result.
    ///
    /// Revised values that differ from the requested ones are logged.
    pub fn apply_result(&mut self, result: &MonitoredItemCreateResult) -> OpcUaResult<()> {
        if result.status_code.is_bad() {
            return Err(PeerError::service_fault("CreateMonitoredItems", result.status_code).into());
        }
        self.server_handle = result.monitored_item_id;
        self.revised_sampling_interval =
            Duration::from_secs_f64(result.revised_sampling_interval.max(0.0) / 1000.0);
        self.revised_queue_size = result.revised_queue_size;

        let settings = &self.definition.settings;
        if self.revised_sampling_interval != settings.sampling_interval
            || self.revised_queue_size != settings.queue_size
        {
            tracing::info!(
                client_handle = self.definition.client_handle,
                node_id = %self.definition.node_id.to_opc_string(),
                requested_sampling = ?settings.sampling_interval,
                revised_sampling = ?self.revised_sampling_interval,
                requested_queue = settings.queue_size,
                revised_queue = self.revised_queue_size,
                "Server revised monitored item parameters"
            );
        }
        Ok(())
    }

    /// Definition.
    pub fn definition(&self) -> &MonitoredItemDefinition {
        &self.definition
    }

    /// Client handle.
    pub fn client_handle(&self) -> u32 {
        self.definition.client_handle
    }

    /// Server-assigned id (0 before creation).
    pub fn server_handle(&self) -> u32 {
        self.server_handle
    }

    /// Sampling interval revised by the server.
    pub fn revised_sampling_interval(&self) -> Duration {
        self.revised_sampling_interval
    }

    /// Queue size revised by the server.
    pub fn revised_queue_size(&self) -> u32 {
        self.revised_queue_size
    }

    /// Number of values dropped by the client queue.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Queues a reported value, applying the overflow policy.
    pub fn push(&mut self, value: DataValue) {
        let position = self.pushed;
        self.push_at(position, value);
    }

    /// Queues a value tagged with its position in the notification batch.
    pub(crate) fn push_at(&mut self, position: usize, value: DataValue) {
        self.pushed = position + 1;
        let server_overflow = value
            .status
            .is_some_and(|status: StatusCode| status.0 & OVERFLOW_INFO_BITS == OVERFLOW_INFO_BITS);
        let item = ItemValue {
            client_handle: self.definition.client_handle,
            value,
            overflow: server_overflow,
        };

        let capacity = self.definition.settings.queue_size.max(1) as usize;
        if self.queue.len() < capacity {
            self.queue.push_back((position, item));
            return;
        }

        self.overflows += 1;
        if self.definition.settings.discard_oldest {
            self.queue.pop_front();
            self.queue.push_back((position, item));
            if let Some((_, front)) = self.queue.front_mut() {
                front.overflow = true;
            }
        } else if let Some(back) = self.queue.back_mut() {
            *back = (position, item);
            back.1.overflow = true;
        }
    }

    /// Takes the queued values in order.
    pub fn drain(&mut self) -> Vec<ItemValue> {
        self.queue.drain(..).map(|(_, value)| value).collect()
    }

    /// Takes the queued values with their batch positions.
    pub(crate) fn drain_positioned(&mut self) -> impl Iterator<Item = (usize, ItemValue)> + '_ {
        self.pushed = 0;
        self.queue.drain(..)
    }

    /// Drops queued values.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.pushed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Variant;
    use crate::error::OpcUaError;

    fn definition(queue_size: u32, discard_oldest: bool) -> MonitoredItemDefinition {
        MonitoredItemDefinition::value(
            7,
            NodeId::numeric(2, 100),
            MonitoredItemSettings::default().with_queue(queue_size, discard_oldest),
        )
    }

    fn values(item: &mut MonitoredItem) -> Vec<(i32, bool)> {
        item.drain()
            .into_iter()
            .map(|v| match v.value.value {
                Variant::Int32(n) => (n, v.overflow),
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_filter_validation() {
        let ok = MonitoredItemSettings::default().with_deadband(DeadbandSettings::absolute(0.5));
        assert!(validate_filter(&ok).is_ok());

        let negative = MonitoredItemSettings::default().with_deadband(DeadbandSettings::absolute(-1.0));
        assert!(matches!(
            validate_filter(&negative),
            Err(OpcUaError::Subscription(SubscriptionError::InvalidFilter { .. }))
        ));

        let nan = MonitoredItemSettings::default().with_deadband(DeadbandSettings::absolute(f64::NAN));
        assert!(validate_filter(&nan).is_err());

        let percent = MonitoredItemSettings::default().with_deadband(DeadbandSettings::percent(100.5));
        assert!(validate_filter(&percent).is_err());
        let percent = MonitoredItemSettings::default().with_deadband(DeadbandSettings::percent(100.0));
        assert!(validate_filter(&percent).is_ok());

        let mut status_only = MonitoredItemSettings::default().with_deadband(DeadbandSettings::absolute(1.0));
        status_only.trigger = DataChangeTrigger::Status;
        assert!(validate_filter(&status_only).is_err());
    }

    #[test]
    fn test_filter_object() {
        let plain = MonitoredItemSettings::default();
        assert!(data_change_filter(&plain).is_null());

        let settings = MonitoredItemSettings::default().with_deadband(DeadbandSettings::percent(5.0));
        let filter = data_change_filter(&settings);
        let filter = filter.decoded::<DataChangeFilter>().unwrap();
        assert_eq!(filter.deadband_type, 2);
        assert_eq!(filter.deadband_value, 5.0);
    }

    #[test]
    fn test_create_request() {
        let request = definition(4, true).to_create_request();
        assert_eq!(request.requested_parameters.client_handle, 7);
        assert_eq!(request.requested_parameters.sampling_interval, 250.0);
        assert_eq!(request.requested_parameters.queue_size, 4);
        assert_eq!(request.item_to_monitor.attribute_id, attribute_id::VALUE);
    }

    #[test]
    fn test_apply_result() {
        let mut item = MonitoredItem::new(definition(1, true));
        item.apply_result(&MonitoredItemCreateResult {
            status_code: StatusCode::GOOD,
            monitored_item_id: 42,
            revised_sampling_interval: 1000.0,
            revised_queue_size: 1,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(item.server_handle(), 42);
        assert_eq!(item.revised_sampling_interval(), Duration::from_secs(1));

        let error = item
            .apply_result(&MonitoredItemCreateResult {
                status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.status_code(), Some(StatusCode::BAD_NODE_ID_UNKNOWN));
    }

    #[test]
    fn test_queue_discard_oldest() {
        let mut item = MonitoredItem::new(definition(2, true));
        for n in 1..=4 {
            item.push(DataValue::new(Variant::Int32(n)));
        }
        assert_eq!(values(&mut item), [(3, true), (4, false)]);
        assert_eq!(item.overflows(), 2);
    }

    #[test]
    fn test_queue_discard_newest() {
        let mut item = MonitoredItem::new(definition(2, false));
        for n in 1..=4 {
            item.push(DataValue::new(Variant::Int32(n)));
        }
        assert_eq!(values(&mut item), [(1, false), (4, true)]);
    }

    #[test]
    fn test_server_overflow_bit() {
        let mut item = MonitoredItem::new(definition(1, true));
        let mut value = DataValue::new(Variant::Int32(1));
        value.status = Some(StatusCode(0x0000_0480));
        item.push(value);
        assert_eq!(values(&mut item), [(1, true)]);
    }
}

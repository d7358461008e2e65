// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription, monitored item and publish services, and the notification
//! structures carried by publish responses.

use serde_json::Value;

use crate::codec::{
    BinaryDecoder, BinaryEncodable, BinaryEncoder, DataValue, DateTime, DecodingLimits,
    DiagnosticInfo, EncodeableType, ExtensionObject, JsonEncodable, JsonFields, JsonObject,
    NodeId, StatusCode, TypeRegistry, Variant,
};
use crate::error::CodecResult;
use crate::types::{DataChangeTrigger, MonitoringMode};

use super::{ReadValueId, RequestHeader, ResponseHeader, TimestampsToReturn};

impl_wire_enum!(MonitoringMode, DataChangeTrigger);

// =============================================================================
// Monitored items
// =============================================================================

wire_struct! {
    /// Data change filter with optional deadband.
    pub struct DataChangeFilter {
        /// Which changes are reported.
        pub trigger: DataChangeTrigger,
        /// Deadband type (0 none, 1 absolute, 2 percent).
        pub deadband_type: u32,
        /// Deadband threshold.
        pub deadband_value: f64,
    }
}

wire_struct! {
    /// Requested sampling and queueing parameters.
    pub struct MonitoringParameters {
        /// Client-assigned handle reported in notifications.
        pub client_handle: u32,
        /// Sampling interval in milliseconds.
        pub sampling_interval: f64,
        /// Filter (null = none).
        pub filter: ExtensionObject,
        /// Server-side queue size.
        pub queue_size: u32,
        /// Overflow policy.
        pub discard_oldest: bool,
    }
}

wire_struct! {
    /// One monitored item to create.
    pub struct MonitoredItemCreateRequest {
        /// Attribute to monitor.
        pub item_to_monitor: ReadValueId,
        /// Monitoring mode.
        pub monitoring_mode: MonitoringMode,
        /// Requested parameters.
        pub requested_parameters: MonitoringParameters,
    }
}

wire_struct! {
    /// Result of creating one monitored item.
    pub struct MonitoredItemCreateResult {
        /// Per-item status.
        pub status_code: StatusCode,
        /// Server handle.
        pub monitored_item_id: u32,
        /// Revised sampling interval in milliseconds.
        pub revised_sampling_interval: f64,
        /// Revised queue size.
        pub revised_queue_size: u32,
        /// Filter result.
        pub filter_result: ExtensionObject,
    }
}

wire_struct! {
    /// Creates monitored items.
    pub struct CreateMonitoredItemsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Owning subscription.
        pub subscription_id: u32,
        /// Timestamps to report.
        pub timestamps_to_return: TimestampsToReturn,
        /// Items to create.
        pub items_to_create: Vec<MonitoredItemCreateRequest>,
    }
}

wire_struct! {
    /// Answer to [`CreateMonitoredItemsRequest`].
    pub struct CreateMonitoredItemsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per item.
        pub results: Vec<MonitoredItemCreateResult>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

wire_struct! {
    /// Deletes monitored items.
    pub struct DeleteMonitoredItemsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Owning subscription.
        pub subscription_id: u32,
        /// Server handles.
        pub monitored_item_ids: Vec<u32>,
    }
}

wire_struct! {
    /// Answer to [`DeleteMonitoredItemsRequest`].
    pub struct DeleteMonitoredItemsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One status per item.
        pub results: Vec<StatusCode>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

wire_struct! {
    /// Creates a subscription.
    pub struct CreateSubscriptionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Publishing interval in milliseconds.
        pub requested_publishing_interval: f64,
        /// Lifetime count.
        pub requested_lifetime_count: u32,
        /// Keep-alive count.
        pub requested_max_keep_alive_count: u32,
        /// Notifications per publish (0 = unlimited).
        pub max_notifications_per_publish: u32,
        /// Publishing enabled.
        pub publishing_enabled: bool,
        /// Priority.
        pub priority: u8,
    }
}

wire_struct! {
    /// Answer to [`CreateSubscriptionRequest`].
    pub struct CreateSubscriptionResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Server subscription id.
        pub subscription_id: u32,
        /// Revised publishing interval.
        pub revised_publishing_interval: f64,
        /// Revised lifetime count.
        pub revised_lifetime_count: u32,
        /// Revised keep-alive count.
        pub revised_max_keep_alive_count: u32,
    }
}

wire_struct! {
    /// Modifies subscription timing.
    pub struct ModifySubscriptionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscription.
        pub subscription_id: u32,
        /// Publishing interval in milliseconds.
        pub requested_publishing_interval: f64,
        /// Lifetime count.
        pub requested_lifetime_count: u32,
        /// Keep-alive count.
        pub requested_max_keep_alive_count: u32,
        /// Notifications per publish.
        pub max_notifications_per_publish: u32,
        /// Priority.
        pub priority: u8,
    }
}

wire_struct! {
    /// Answer to [`ModifySubscriptionRequest`].
    pub struct ModifySubscriptionResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Revised publishing interval.
        pub revised_publishing_interval: f64,
        /// Revised lifetime count.
        pub revised_lifetime_count: u32,
        /// Revised keep-alive count.
        pub revised_max_keep_alive_count: u32,
    }
}

wire_struct! {
    /// Enables or disables publishing.
    pub struct SetPublishingModeRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// New mode.
        pub publishing_enabled: bool,
        /// Subscriptions.
        pub subscription_ids: Vec<u32>,
    }
}

wire_struct! {
    /// Answer to [`SetPublishingModeRequest`].
    pub struct SetPublishingModeResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One status per subscription.
        pub results: Vec<StatusCode>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

wire_struct! {
    /// Transfer outcome of one subscription.
    pub struct TransferResult {
        /// Per-subscription status.
        pub status_code: StatusCode,
        /// Sequence numbers still available for republish.
        pub available_sequence_numbers: Vec<u32>,
    }
}

wire_struct! {
    /// Moves subscriptions to the calling session.
    pub struct TransferSubscriptionsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscriptions.
        pub subscription_ids: Vec<u32>,
        /// Resend current values.
        pub send_initial_values: bool,
    }
}

wire_struct! {
    /// Answer to [`TransferSubscriptionsRequest`].
    pub struct TransferSubscriptionsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per subscription.
        pub results: Vec<TransferResult>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

wire_struct! {
    /// Deletes subscriptions.
    pub struct DeleteSubscriptionsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscriptions.
        pub subscription_ids: Vec<u32>,
    }
}

wire_struct! {
    /// Answer to [`DeleteSubscriptionsRequest`].
    pub struct DeleteSubscriptionsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One status per subscription.
        pub results: Vec<StatusCode>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

// =============================================================================
// Publish
// =============================================================================

wire_struct! {
    /// Acknowledges one delivered notification message.
    pub struct SubscriptionAcknowledgement {
        /// Subscription.
        pub subscription_id: u32,
        /// Delivered sequence number.
        pub sequence_number: u32,
    }
}

wire_struct! {
    /// Asks the server for the next notification message.
    pub struct PublishRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Acknowledgements for delivered messages.
        pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
    }
}

wire_struct! {
    /// Answer to [`PublishRequest`].
    pub struct PublishResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Subscription the message belongs to.
        pub subscription_id: u32,
        /// Sequence numbers still held by the server.
        pub available_sequence_numbers: Vec<u32>,
        /// More messages are queued.
        pub more_notifications: bool,
        /// The message.
        pub notification_message: NotificationMessage,
        /// One status per acknowledgement.
        pub results: Vec<StatusCode>,
        /// Per-acknowledgement diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

wire_struct! {
    /// Asks for a message again.
    pub struct RepublishRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscription.
        pub subscription_id: u32,
        /// Missing sequence number.
        pub retransmit_sequence_number: u32,
    }
}

wire_struct! {
    /// Answer to [`RepublishRequest`].
    pub struct RepublishResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// The retransmitted message.
        pub notification_message: NotificationMessage,
    }
}

// =============================================================================
// Notifications
// =============================================================================

wire_struct! {
    /// New value of one monitored item.
    pub struct MonitoredItemNotification {
        /// Client handle of the item.
        pub client_handle: u32,
        /// The value.
        pub value: DataValue,
    }
}

wire_struct! {
    /// Batch of data changes.
    pub struct DataChangeNotification {
        /// Changed items in server order.
        pub monitored_items: Vec<MonitoredItemNotification>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

wire_struct! {
    /// Fields of one event.
    pub struct EventFieldList {
        /// Client handle of the item.
        pub client_handle: u32,
        /// Selected fields.
        pub event_fields: Vec<Variant>,
    }
}

wire_struct! {
    /// Batch of events.
    pub struct EventNotificationList {
        /// Events.
        pub events: Vec<EventFieldList>,
    }
}

wire_struct! {
    /// Subscription status change reported by the server.
    pub struct StatusChangeNotification {
        /// New status.
        pub status: StatusCode,
        /// Diagnostics.
        pub diagnostic_info: DiagnosticInfo,
    }
}

encodeable!(
    DataChangeFilter = 724,
    DataChangeNotification = 811,
    StatusChangeNotification = 820,
    EventNotificationList = 916,
);

/// Notification decoded from a [`NotificationMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Data changes.
    DataChange(DataChangeNotification),
    /// Events.
    Event(EventNotificationList),
    /// Subscription status change.
    StatusChange(StatusChangeNotification),
    /// Notification of a type this client does not handle.
    Other(NodeId),
}

/// Notification message of a publish or republish response.
///
/// Notification bodies are kept undecoded so that one malformed body does not
/// fail the whole response; [`notifications`](Self::notifications) decodes
/// them individually.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationMessage {
    /// Per-subscription sequence number.
    pub sequence_number: u32,
    /// Time the message was sent.
    pub publish_time: DateTime,
    /// Notification bodies.
    pub notification_data: Vec<ExtensionObject>,
}

impl NotificationMessage {
    /// A message without notifications is a keep-alive.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.is_empty()
    }

    /// Decodes every notification. Errors carry the offset within the body.
    pub fn notifications(
        &self,
        registry: &TypeRegistry,
        limits: DecodingLimits,
    ) -> Vec<CodecResult<Notification>> {
        self.notification_data
            .iter()
            .map(|object| decode_notification(object, registry, limits))
            .collect()
    }
}

fn decode_notification(
    object: &ExtensionObject,
    registry: &TypeRegistry,
    limits: DecodingLimits,
) -> CodecResult<Notification> {
    let id = object.type_id.as_numeric().filter(|_| object.type_id.namespace_index == 0);
    let decoded = match id {
        Some(DataChangeNotification::BINARY_ENCODING_ID) => object
            .decode_as::<DataChangeNotification>(registry, limits)?
            .map(Notification::DataChange),
        Some(EventNotificationList::BINARY_ENCODING_ID) => object
            .decode_as::<EventNotificationList>(registry, limits)?
            .map(Notification::Event),
        Some(StatusChangeNotification::BINARY_ENCODING_ID) => object
            .decode_as::<StatusChangeNotification>(registry, limits)?
            .map(Notification::StatusChange),
        _ => None,
    };
    Ok(decoded.unwrap_or_else(|| Notification::Other(object.type_id.clone())))
}

impl BinaryEncodable for NotificationMessage {
    fn encode(&self, encoder: &mut BinaryEncoder) -> CodecResult<()> {
        encoder.write_u32(self.sequence_number);
        self.publish_time.encode(encoder)?;
        encoder.write_array(&self.notification_data)
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> CodecResult<Self> {
        let sequence_number = decoder.read_u32()?;
        let publish_time = DateTime::decode(decoder)?;
        let max_length = decoder.limits().max_array_length;
        let count = decoder.read_length(max_length)?.unwrap_or(0);
        let mut notification_data = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            notification_data.push(ExtensionObject::decode_raw(decoder)?);
        }
        Ok(Self {
            sequence_number,
            publish_time,
            notification_data,
        })
    }
}

impl JsonEncodable for NotificationMessage {
    fn to_json(&self) -> CodecResult<Value> {
        let mut object = JsonObject::new();
        object.field("SequenceNumber", &self.sequence_number)?;
        object.field("PublishTime", &self.publish_time)?;
        object.field("NotificationData", &self.notification_data)?;
        Ok(object.into_value())
    }

    fn from_json(value: &Value, registry: &TypeRegistry) -> CodecResult<Self> {
        let fields = JsonFields::new(value, "NotificationMessage", registry)?;
        Ok(Self {
            sequence_number: fields.get("SequenceNumber")?,
            publish_time: fields.get("PublishTime")?,
            notification_data: fields.get("NotificationData")?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncodingFormat, WireCodec};
    use crate::error::CodecError;

    fn data_change(handle: u32, value: f64) -> ExtensionObject {
        ExtensionObject::from_structure(DataChangeNotification {
            monitored_items: vec![MonitoredItemNotification {
                client_handle: handle,
                value: DataValue::new(value),
            }],
            diagnostic_infos: Vec::new(),
        })
    }

    #[test]
    fn test_publish_response_round_trip() {
        let codec = WireCodec::standard();
        let response = PublishResponse {
            subscription_id: 7,
            available_sequence_numbers: vec![3, 4],
            notification_message: NotificationMessage {
                sequence_number: 4,
                publish_time: DateTime::from_ticks(133_000_000_000_000_000),
                notification_data: vec![data_change(1, 20.5)],
            },
            results: vec![StatusCode::GOOD],
            ..Default::default()
        };
        let bytes = codec.encode_value(&response, EncodingFormat::Binary).unwrap();
        let decoded: PublishResponse = codec.decode_value(&bytes, EncodingFormat::Binary).unwrap();

        assert_eq!(decoded.available_sequence_numbers, vec![3, 4]);
        let message = &decoded.notification_message;
        assert!(!message.is_keep_alive());
        let notifications = message.notifications(codec.registry(), codec.limits());
        match &notifications[0] {
            Ok(Notification::DataChange(change)) => {
                assert_eq!(change.monitored_items[0].client_handle, 1);
                assert_eq!(change.monitored_items[0].value.value, Variant::Double(20.5));
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[test]
    fn test_malformed_notification_is_isolated() {
        let codec = WireCodec::standard();
        // Declares two items but carries bytes for none.
        let broken = ExtensionObject::from_binary(
            DataChangeNotification::encoding_id(),
            vec![2u8, 0, 0, 0],
        );
        let message = NotificationMessage {
            sequence_number: 1,
            publish_time: DateTime::null(),
            notification_data: vec![broken, data_change(5, 1.0)],
        };
        let bytes = codec.encode_value(&message, EncodingFormat::Binary).unwrap();
        let decoded: NotificationMessage =
            codec.decode_value(&bytes, EncodingFormat::Binary).unwrap();

        let notifications = decoded.notifications(codec.registry(), codec.limits());
        assert_eq!(notifications.len(), 2);
        assert!(matches!(
            notifications[0],
            Err(CodecError::Truncated { offset: 4, .. })
        ));
        assert!(matches!(notifications[1], Ok(Notification::DataChange(_))));
    }

    #[test]
    fn test_unknown_notification_type() {
        let codec = WireCodec::standard();
        let object = ExtensionObject::from_binary(NodeId::numeric(2, 5000), vec![1u8, 2, 3]);
        let message = NotificationMessage {
            notification_data: vec![object],
            ..Default::default()
        };
        let notifications = message.notifications(codec.registry(), codec.limits());
        assert!(matches!(
            &notifications[0],
            Ok(Notification::Other(id)) if *id == NodeId::numeric(2, 5000)
        ));
    }

    #[test]
    fn test_keep_alive_message() {
        assert!(NotificationMessage::default().is_keep_alive());
    }

    #[test]
    fn test_data_change_filter_json() {
        let filter = DataChangeFilter {
            trigger: DataChangeTrigger::StatusValueTimestamp,
            deadband_type: 1,
            deadband_value: 0.5,
        };
        assert_eq!(
            filter.to_json().unwrap(),
            serde_json::json!({"Trigger": 2, "DeadbandType": 1, "DeadbandValue": 0.5})
        );
    }
}

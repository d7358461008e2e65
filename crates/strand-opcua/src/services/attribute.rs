// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read, Write, Browse and Call services.

use crate::codec::{
    ByteString, DataValue, DateTime, DiagnosticInfo, ExpandedNodeId, LocalizedText, NodeId,
    QualifiedName, StatusCode, Variant,
};

use super::{ReadValueId, RequestHeader, ResponseHeader};

wire_enum! {
    /// Which timestamps a read or monitored item returns.
    pub enum TimestampsToReturn {
        /// Source timestamp only.
        Source = 0,
        /// Server timestamp only.
        Server = 1,
        /// Both timestamps.
        Both = 2,
        /// No timestamps.
        Neither = 3,
    }
    default Both;
}

wire_enum! {
    /// Direction of the references to follow.
    pub enum BrowseDirection {
        /// Forward references.
        Forward = 0,
        /// Inverse references.
        Inverse = 1,
        /// Both directions.
        Both = 2,
    }
    default Forward;
}

wire_enum! {
    /// Class of a node.
    pub enum NodeClass {
        /// Unspecified.
        Unspecified = 0,
        /// Object.
        Object = 1,
        /// Variable.
        Variable = 2,
        /// Method.
        Method = 4,
        /// Object type.
        ObjectType = 8,
        /// Variable type.
        VariableType = 16,
        /// Reference type.
        ReferenceType = 32,
        /// Data type.
        DataType = 64,
        /// View.
        View = 128,
    }
    default Unspecified;
}

// =============================================================================
// Read / Write
// =============================================================================

wire_struct! {
    /// Reads attributes.
    pub struct ReadRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Maximum age of a cached value in milliseconds.
        pub max_age: f64,
        /// Timestamps to return.
        pub timestamps_to_return: TimestampsToReturn,
        /// Attributes to read.
        pub nodes_to_read: Vec<ReadValueId>,
    }
}

wire_struct! {
    /// Answer to [`ReadRequest`].
    pub struct ReadResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One value per requested attribute.
        pub results: Vec<DataValue>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

wire_struct! {
    /// One attribute to write.
    pub struct WriteValue {
        /// Node to write.
        pub node_id: NodeId,
        /// Attribute to write.
        pub attribute_id: u32,
        /// Index range for array values.
        pub index_range: String,
        /// New value.
        pub value: DataValue,
    }
}

wire_struct! {
    /// Writes attributes.
    pub struct WriteRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Attributes to write.
        pub nodes_to_write: Vec<WriteValue>,
    }
}

wire_struct! {
    /// Answer to [`WriteRequest`].
    pub struct WriteResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One status per written attribute.
        pub results: Vec<StatusCode>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

// =============================================================================
// Browse
// =============================================================================

wire_struct! {
    /// View to browse (null = whole address space).
    pub struct ViewDescription {
        /// View node.
        pub view_id: NodeId,
        /// View timestamp.
        pub timestamp: DateTime,
        /// View version.
        pub view_version: u32,
    }
}

wire_struct! {
    /// One node to browse.
    pub struct BrowseDescription {
        /// Starting node.
        pub node_id: NodeId,
        /// Direction.
        pub browse_direction: BrowseDirection,
        /// Reference type to follow (null = all).
        pub reference_type_id: NodeId,
        /// Include subtypes of the reference type.
        pub include_subtypes: bool,
        /// Node classes to return (0 = all).
        pub node_class_mask: u32,
        /// Fields to return.
        pub result_mask: u32,
    }
}

impl BrowseDescription {
    /// Hierarchical children of `node_id` with every result field.
    pub fn children(node_id: NodeId) -> Self {
        Self {
            node_id,
            browse_direction: BrowseDirection::Forward,
            reference_type_id: NodeId::HIERARCHICAL_REFERENCES,
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: 0x3F,
        }
    }
}

wire_struct! {
    /// Browses references.
    pub struct BrowseRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// View.
        pub view: ViewDescription,
        /// Maximum references per node (0 = no limit).
        pub requested_max_references_per_node: u32,
        /// Nodes to browse.
        pub nodes_to_browse: Vec<BrowseDescription>,
    }
}

wire_struct! {
    /// One reference found by browsing.
    pub struct ReferenceDescription {
        /// Reference type.
        pub reference_type_id: NodeId,
        /// Forward reference.
        pub is_forward: bool,
        /// Target node.
        pub node_id: ExpandedNodeId,
        /// Browse name.
        pub browse_name: QualifiedName,
        /// Display name.
        pub display_name: LocalizedText,
        /// Node class.
        pub node_class: NodeClass,
        /// Type definition.
        pub type_definition: ExpandedNodeId,
    }
}

wire_struct! {
    /// References of one browsed node.
    pub struct BrowseResult {
        /// Per-node status.
        pub status_code: StatusCode,
        /// Continuation point when references remain.
        pub continuation_point: ByteString,
        /// References.
        pub references: Vec<ReferenceDescription>,
    }
}

wire_struct! {
    /// Answer to [`BrowseRequest`].
    pub struct BrowseResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per browsed node.
        pub results: Vec<BrowseResult>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

// =============================================================================
// Call
// =============================================================================

wire_struct! {
    /// One method invocation.
    pub struct CallMethodRequest {
        /// Object owning the method.
        pub object_id: NodeId,
        /// Method node.
        pub method_id: NodeId,
        /// Input arguments.
        pub input_arguments: Vec<Variant>,
    }
}

wire_struct! {
    /// Result of one method invocation.
    pub struct CallMethodResult {
        /// Overall status.
        pub status_code: StatusCode,
        /// Per-argument status.
        pub input_argument_results: Vec<StatusCode>,
        /// Per-argument diagnostics.
        pub input_argument_diagnostic_infos: Vec<DiagnosticInfo>,
        /// Output arguments.
        pub output_arguments: Vec<Variant>,
    }
}

wire_struct! {
    /// Calls methods.
    pub struct CallRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Methods to call.
        pub methods_to_call: Vec<CallMethodRequest>,
    }
}

wire_struct! {
    /// Answer to [`CallRequest`].
    pub struct CallResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per call.
        pub results: Vec<CallMethodResult>,
        /// Per-item diagnostics.
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncodingFormat, JsonEncodable, WireCodec};

    #[test]
    fn test_read_response_per_item_status() {
        let codec = WireCodec::standard();
        let response = ReadResponse {
            results: vec![
                DataValue::new(Variant::Double(21.5)),
                DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN),
            ],
            ..Default::default()
        };
        let bytes = codec.encode_value(&response, EncodingFormat::Binary).unwrap();
        let decoded: ReadResponse = codec.decode_value(&bytes, EncodingFormat::Binary).unwrap();
        assert_eq!(decoded.results[0].value, Variant::Double(21.5));
        assert_eq!(decoded.results[1].status(), StatusCode::BAD_NODE_ID_UNKNOWN);
    }

    #[test]
    fn test_node_class_values() {
        assert_eq!(NodeClass::from_value(4), Some(NodeClass::Method));
        assert_eq!(NodeClass::from_value(3), None);
        assert_eq!(NodeClass::View.value(), 128);
    }

    #[test]
    fn test_call_json_form() {
        let request = CallMethodRequest {
            object_id: NodeId::numeric(2, 10),
            method_id: NodeId::numeric(2, 11),
            input_arguments: vec![Variant::UInt32(3)],
        };
        let json = request.to_json().unwrap();
        assert_eq!(json["ObjectId"], "ns=2;i=10");
        assert_eq!(json["InputArguments"][0]["Type"], 7);
        let codec = WireCodec::standard();
        let back = CallMethodRequest::from_json(&json, codec.registry()).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_browse_children_defaults() {
        let description = BrowseDescription::children(NodeId::OBJECTS_FOLDER);
        assert_eq!(description.reference_type_id, NodeId::numeric(0, 33));
        assert!(description.include_subtypes);
    }
}

//! Property-based test generators using proptest.
//!
//! Strategies for generating random payloads and names that maintain the
//! engine's invariants (valid resource names, kind-consistent payloads).

use dendro_core::{DocumentKind, NodePayload};
use proptest::prelude::*;

/// Strategy for generating valid resource names.
pub fn resource_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_-]{0,31}").expect("invalid regex")
}

/// Strategy for generating XML element names.
pub fn element_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("invalid regex")
}

/// Strategy for generating attribute lists.
pub fn attributes_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(
        (
            element_name_strategy(),
            prop::string::string_regex("[ -~]{0,16}").expect("invalid regex"),
        ),
        0..4,
    )
}

/// Strategy for generating XML payloads.
pub fn xml_payload_strategy() -> impl Strategy<Value = NodePayload> {
    prop_oneof![
        (element_name_strategy(), attributes_strategy())
            .prop_map(|(name, attributes)| NodePayload::Element { name, attributes }),
        prop::string::string_regex("[ -~]{0,32}")
            .expect("invalid regex")
            .prop_map(|value| NodePayload::Text { value }),
        prop::string::string_regex("[ -~]{0,32}")
            .expect("invalid regex")
            .prop_map(|value| NodePayload::Comment { value }),
    ]
}

/// Strategy for generating JSON payloads.
pub fn json_payload_strategy() -> impl Strategy<Value = NodePayload> {
    prop_oneof![
        Just(NodePayload::Object),
        Just(NodePayload::Array),
        Just(NodePayload::NullValue),
        element_name_strategy().prop_map(|key| NodePayload::Field { key }),
        prop::string::string_regex("[ -~]{0,32}")
            .expect("invalid regex")
            .prop_map(|value| NodePayload::StringValue { value }),
        any::<bool>().prop_map(|value| NodePayload::BoolValue { value }),
        (-1.0e9f64..1.0e9).prop_map(|value| NodePayload::NumberValue { value }),
    ]
}

/// Strategy for generating payloads of a given document kind.
pub fn payload_strategy(kind: DocumentKind) -> BoxedStrategy<NodePayload> {
    match kind {
        DocumentKind::Xml => xml_payload_strategy().boxed(),
        DocumentKind::Json => json_payload_strategy().boxed(),
    }
}

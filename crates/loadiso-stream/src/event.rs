//! Domain events, topic names and outbound metadata

use loadiso_core::{
    TrafficClassification, LOAD_TEST_VALUE, PLACEHOLDER_RUN_ID, PRODUCTION_VALUE,
    TEST_RUN_ID_HEADER, TRAFFIC_TYPE_HEADER,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shared stream of the single-stream strategy
pub const SHARED_TOPIC: &str = "user-events";
/// Only consumer group of the shared stream
pub const SHARED_GROUP: &str = "user-event-processor";

/// Production stream of the topic-routed strategy
pub const REAL_TOPIC: &str = "user-events.real";
/// Load-test stream of the topic-routed strategy
pub const TEST_TOPIC: &str = "user-events.test";
/// Consumer group of the production stream
pub const REAL_GROUP: &str = "user-events-real-group";
/// Consumer group of the load-test stream
pub const TEST_GROUP: &str = "user-events-test-group";

/// Producer principal for the production stream
pub const REAL_PRODUCER: &str = "prod_producer";
/// Producer principal for the load-test stream
pub const TEST_PRODUCER: &str = "test_producer";
/// Consumer principal for the production stream
pub const REAL_CONSUMER: &str = "prod_consumer";
/// Consumer principal for the load-test stream
pub const TEST_CONSUMER: &str = "test_consumer";

/// Published after a user row is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreatedEvent {
    /// User id, also the message key
    pub id: i64,
    /// Login name
    pub username: String,
    /// Email address
    pub email: String,
    /// Partition of the user row
    pub is_test: bool,
}

impl UserCreatedEvent {
    /// Message key
    #[inline]
    #[must_use]
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Outbound metadata for `classification`
///
/// The traffic type is always present; the run id only when it is not the
/// placeholder.
#[must_use]
pub fn outbound_headers(classification: &TrafficClassification) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    let traffic_type = if classification.is_test() {
        LOAD_TEST_VALUE
    } else {
        PRODUCTION_VALUE
    };
    headers.insert(TRAFFIC_TYPE_HEADER.to_string(), traffic_type.to_string());

    let run_id = classification.run_id_or_placeholder();
    if run_id != PLACEHOLDER_RUN_ID {
        headers.insert(TEST_RUN_ID_HEADER.to_string(), run_id.to_string());
    }
    headers
}

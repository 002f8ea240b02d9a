//! User event consumers
//!
//! Each consumer keeps what it saw in inspection lists that tests and the
//! simulator read back. The lists are inspection-only state with no bound;
//! callers that run for long reset them with `clear_events`.

use crate::broker::Record;
use crate::event::UserCreatedEvent;
use async_trait::async_trait;
use loadiso_core::{TrafficKind, TEST_RUN_ID_HEADER, TRAFFIC_TYPE_HEADER};
use parking_lot::Mutex;
use std::fmt::Debug;

/// Metadata of a delivered event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    /// Source topic
    pub topic: String,
    /// Offset in the topic
    pub offset: u64,
    /// `X-Traffic-Type` header, if any
    pub traffic_type: Option<String>,
    /// `X-Test-Run-Id` header, if any
    pub run_id: Option<String>,
}

impl EventMetadata {
    /// Extract metadata from a record
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            topic: record.topic.clone(),
            offset: record.offset,
            traffic_type: record.header(TRAFFIC_TYPE_HEADER).map(str::to_string),
            run_id: record.header(TEST_RUN_ID_HEADER).map(str::to_string),
        }
    }

    /// Traffic kind the header declares; production when absent or unknown
    #[must_use]
    pub fn traffic_kind(&self) -> TrafficKind {
        TrafficKind::from_signal(self.traffic_type.as_deref())
    }
}

/// Receives decoded user events
#[async_trait]
pub trait UserEventConsumer: Send + Sync + Debug {
    /// Name for logs
    fn name(&self) -> &str;

    /// Handle one event
    async fn on_user_created(&self, event: UserCreatedEvent, metadata: EventMetadata);
}

/// Event and the run it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEvent {
    /// Event
    pub event: UserCreatedEvent,
    /// Run id from the metadata
    pub run_id: Option<String>,
}

/// Only consumer group of the shared stream
///
/// Branches on the traffic-type header: load-test events are ignored, every
/// other event is processed. A second group on the shared stream that does not
/// branch like this would process load-test events as production ones.
#[derive(Debug, Default)]
pub struct SharedStreamConsumer {
    /// Inspection only, unbounded until `clear_events`
    processed: Mutex<Vec<UserCreatedEvent>>,
    /// Inspection only, unbounded until `clear_events`
    ignored: Mutex<Vec<TrackedEvent>>,
}

impl SharedStreamConsumer {
    /// Create consumer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events that ran business logic
    #[must_use]
    pub fn processed_events(&self) -> Vec<UserCreatedEvent> {
        self.processed.lock().clone()
    }

    /// Load-test events skipped
    #[must_use]
    pub fn ignored_events(&self) -> Vec<TrackedEvent> {
        self.ignored.lock().clone()
    }

    /// Reset inspection lists
    pub fn clear_events(&self) {
        self.processed.lock().clear();
        self.ignored.lock().clear();
    }
}

#[async_trait]
impl UserEventConsumer for SharedStreamConsumer {
    fn name(&self) -> &str {
        "shared-stream-consumer"
    }

    async fn on_user_created(&self, event: UserCreatedEvent, metadata: EventMetadata) {
        if metadata.traffic_kind().is_test() {
            tracing::info!(
                id = event.id,
                run_id = metadata.run_id.as_deref().unwrap_or("-"),
                "ignoring load-test event"
            );
            self.ignored.lock().push(TrackedEvent {
                event,
                run_id: metadata.run_id,
            });
            return;
        }
        tracing::info!(id = event.id, email = %event.email, "processing user created event");
        self.processed.lock().push(event);
    }
}

/// Consumer of the production stream; runs full side effects
#[derive(Debug, Default)]
pub struct RealEventConsumer {
    /// Inspection only, unbounded until `clear_events`
    processed: Mutex<Vec<UserCreatedEvent>>,
}

impl RealEventConsumer {
    /// Create consumer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events processed
    #[must_use]
    pub fn processed_events(&self) -> Vec<UserCreatedEvent> {
        self.processed.lock().clone()
    }

    /// Reset inspection list
    pub fn clear_events(&self) {
        self.processed.lock().clear();
    }
}

#[async_trait]
impl UserEventConsumer for RealEventConsumer {
    fn name(&self) -> &str {
        "real-event-consumer"
    }

    async fn on_user_created(&self, event: UserCreatedEvent, metadata: EventMetadata) {
        tracing::info!(
            id = event.id,
            email = %event.email,
            topic = %metadata.topic,
            "sending welcome email"
        );
        self.processed.lock().push(event);
    }
}

/// Consumer of the load-test stream; tracks events, no side effects
#[derive(Debug, Default)]
pub struct TestEventConsumer {
    /// Inspection only, unbounded until `clear_events`
    tracked: Mutex<Vec<TrackedEvent>>,
}

impl TestEventConsumer {
    /// Create consumer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events tracked
    #[must_use]
    pub fn tracked_events(&self) -> Vec<TrackedEvent> {
        self.tracked.lock().clone()
    }

    /// Tracked events of one run
    #[must_use]
    pub fn events_for_run(&self, run_id: &str) -> Vec<UserCreatedEvent> {
        self.tracked
            .lock()
            .iter()
            .filter(|t| t.run_id.as_deref() == Some(run_id))
            .map(|t| t.event.clone())
            .collect()
    }

    /// Reset inspection list
    pub fn clear_events(&self) {
        self.tracked.lock().clear();
    }
}

#[async_trait]
impl UserEventConsumer for TestEventConsumer {
    fn name(&self) -> &str {
        "test-event-consumer"
    }

    async fn on_user_created(&self, event: UserCreatedEvent, metadata: EventMetadata) {
        tracing::debug!(
            id = event.id,
            run_id = metadata.run_id.as_deref().unwrap_or("-"),
            "tracking load-test event"
        );
        self.tracked.lock().push(TrackedEvent {
            event,
            run_id: metadata.run_id,
        });
    }
}

//! Loadiso Stream - isolated event streams
//!
//! - [`Broker`]: topics, consumer groups and principal ACLs
//! - [`SingleStreamPublisher`]: one shared stream, classification in metadata
//!   (advisory isolation, see [`SharedStreamConsumer`])
//! - [`TopicRoutingPublisher`]: separate streams and credentials per
//!   classification (structural isolation)
//! - [`spawn_listener`]: background task feeding a [`UserEventConsumer`]

#![warn(unreachable_pub)]

pub mod broker;
pub mod consumer;
pub mod error;
pub mod event;
pub mod listener;
pub mod publisher;
pub mod topology;

pub use broker::{
    AclOperation, AclResource, Broker, Consumer, Credentials, Producer, ProducerRecord, Record,
    RecordMetadata, SecurityProtocol, ANONYMOUS,
};
pub use consumer::{
    EventMetadata, RealEventConsumer, SharedStreamConsumer, TestEventConsumer, TrackedEvent,
    UserEventConsumer,
};
pub use error::StreamError;
pub use event::{
    outbound_headers, UserCreatedEvent, REAL_CONSUMER, REAL_GROUP, REAL_PRODUCER, REAL_TOPIC,
    SHARED_GROUP, SHARED_TOPIC, TEST_CONSUMER, TEST_GROUP, TEST_PRODUCER, TEST_TOPIC,
};
pub use listener::{spawn_listener, ListenerHandle, MAX_POLL_RECORDS, POLL_TIMEOUT};
pub use publisher::{
    PublishHandle, SingleStreamPublisher, StreamRoute, TopicRoutingPublisher, UserEventPublisher,
};
pub use topology::{provision_shared_stream, RoutedStream};

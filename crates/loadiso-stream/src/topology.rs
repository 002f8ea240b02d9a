//! Topics, principals and ACLs of the isolation setup

use crate::broker::{AclOperation, AclResource, Broker, Credentials};
use crate::event::{
    REAL_CONSUMER, REAL_GROUP, REAL_PRODUCER, REAL_TOPIC, SHARED_GROUP, SHARED_TOPIC,
    TEST_CONSUMER, TEST_GROUP, TEST_PRODUCER, TEST_TOPIC,
};

/// Producer and consumer credentials of one routed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedStream {
    /// Topic
    pub topic: String,
    /// Consumer group
    pub group: String,
    /// Producer login
    pub producer: Credentials,
    /// Consumer login
    pub consumer: Credentials,
}

impl RoutedStream {
    /// Production stream with default names
    #[must_use]
    pub fn real(password: &str) -> Self {
        Self {
            topic: REAL_TOPIC.to_string(),
            group: REAL_GROUP.to_string(),
            producer: Credentials::new(REAL_PRODUCER, password),
            consumer: Credentials::new(REAL_CONSUMER, password),
        }
    }

    /// Load-test stream with default names
    #[must_use]
    pub fn test(password: &str) -> Self {
        Self {
            topic: TEST_TOPIC.to_string(),
            group: TEST_GROUP.to_string(),
            producer: Credentials::new(TEST_PRODUCER, password),
            consumer: Credentials::new(TEST_CONSUMER, password),
        }
    }

    /// Create the topic, both users, and grant exactly their ACLs
    pub fn provision(&self, broker: &Broker) {
        broker.create_topic(&self.topic);
        broker.add_user(&self.producer);
        broker.add_user(&self.consumer);
        broker.grant(
            &self.producer.username,
            AclResource::Topic(self.topic.clone()),
            AclOperation::Write,
        );
        broker.grant(
            &self.consumer.username,
            AclResource::Topic(self.topic.clone()),
            AclOperation::Read,
        );
        broker.grant(
            &self.consumer.username,
            AclResource::Group(self.group.clone()),
            AclOperation::Read,
        );
    }
}

/// Create the shared stream
pub fn provision_shared_stream(broker: &Broker) {
    broker.create_topic(SHARED_TOPIC);
    tracing::debug!(topic = SHARED_TOPIC, group = SHARED_GROUP, "shared stream provisioned");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{ProducerRecord, SecurityProtocol};
    use std::time::Duration;

    #[tokio::test]
    async fn test_consumer_cannot_reach_real_stream() {
        let broker = Broker::new(SecurityProtocol::SaslPlaintext);
        let real = RoutedStream::real("pw");
        let test = RoutedStream::test("pw");
        real.provision(&broker);
        test.provision(&broker);

        let err = broker
            .consumer(Some(&test.consumer), &real.group, &real.topic)
            .unwrap_err();
        assert!(err.is_authorization_error());
        let err = broker
            .consumer(Some(&test.consumer), &test.group, &real.topic)
            .unwrap_err();
        assert!(err.is_authorization_error());

        let producer = broker.producer(Some(&test.producer)).unwrap();
        assert!(producer
            .send(ProducerRecord::new(&real.topic, "1", "{}"))
            .await
            .is_err());

        producer
            .send(ProducerRecord::new(&test.topic, "1", "{}"))
            .await
            .unwrap();
        let consumer = broker
            .consumer(Some(&test.consumer), &test.group, &test.topic)
            .unwrap();
        assert_eq!(consumer.poll(10, Duration::ZERO).await.unwrap().len(), 1);
    }
}

//! In-process message broker
//!
//! Stands in for the Kafka cluster: named topics with append-only logs, consumer
//! groups with committed offsets, and per-principal ACLs. ACLs are only enforced
//! under [`SecurityProtocol::SaslPlaintext`]; `PLAINTEXT` clients are anonymous
//! and unrestricted.

use crate::error::StreamError;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Principal of unauthenticated clients
pub const ANONYMOUS: &str = "ANONYMOUS";

/// Listener security protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityProtocol {
    /// No authentication, no ACLs
    #[default]
    Plaintext,
    /// SASL/PLAIN authentication with ACL enforcement
    SaslPlaintext,
}

impl SecurityProtocol {
    /// Protocol name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::SaslPlaintext => "SASL_PLAINTEXT",
        }
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityProtocol {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLAINTEXT" => Ok(Self::Plaintext),
            "SASL_PLAINTEXT" => Ok(Self::SaslPlaintext),
            other => Err(StreamError::InvalidConfig(format!(
                "unsupported security protocol '{other}'"
            ))),
        }
    }
}

/// ACL operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclOperation {
    /// Produce to a topic
    Write,
    /// Consume a topic or join a group
    Read,
}

impl AclOperation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Write => "WRITE",
            Self::Read => "READ",
        }
    }
}

/// ACL resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AclResource {
    /// Topic by name
    Topic(String),
    /// Consumer group by id
    Group(String),
}

/// SASL/PLAIN credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Principal name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Record as stored in a topic log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Topic
    pub topic: String,
    /// Position in the log
    pub offset: u64,
    /// Message key
    pub key: Option<String>,
    /// Message value
    pub value: String,
    /// String-valued metadata
    pub headers: BTreeMap<String, String>,
}

impl Record {
    /// Header value by exact name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Record about to be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    /// Destination topic
    pub topic: String,
    /// Message key
    pub key: Option<String>,
    /// Message value
    pub value: String,
    /// String-valued metadata
    pub headers: BTreeMap<String, String>,
}

impl ProducerRecord {
    /// Create record without headers
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: Some(key.into()),
            value: value.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Acknowledgement of a produced record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Topic written
    pub topic: String,
    /// Offset assigned
    pub offset: u64,
}

#[derive(Debug, Default)]
struct TopicLog {
    records: RwLock<Vec<Record>>,
    appended: Notify,
}

#[derive(Debug)]
struct BrokerInner {
    protocol: SecurityProtocol,
    topics: DashMap<String, Arc<TopicLog>>,
    users: DashMap<String, String>,
    acls: DashMap<String, HashSet<(AclResource, AclOperation)>>,
    /// Committed offsets by (group, topic)
    offsets: DashMap<(String, String), u64>,
}

/// Shared broker handle
#[derive(Debug, Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    /// Create broker with the given listener protocol
    #[must_use]
    pub fn new(protocol: SecurityProtocol) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                protocol,
                topics: DashMap::new(),
                users: DashMap::new(),
                acls: DashMap::new(),
                offsets: DashMap::new(),
            }),
        }
    }

    /// Listener protocol
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> SecurityProtocol {
        self.inner.protocol
    }

    /// Create `name` if it does not exist
    pub fn create_topic(&self, name: &str) {
        self.inner.topics.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(topic = name, "creating topic");
            Arc::new(TopicLog::default())
        });
    }

    /// Register a SASL user
    pub fn add_user(&self, credentials: &Credentials) {
        self.inner
            .users
            .insert(credentials.username.clone(), credentials.password.clone());
    }

    /// Grant `operation` on `resource` to `principal`
    pub fn grant(&self, principal: &str, resource: AclResource, operation: AclOperation) {
        tracing::debug!(principal, ?resource, operation = operation.as_str(), "adding ACL");
        self.inner
            .acls
            .entry(principal.to_string())
            .or_default()
            .insert((resource, operation));
    }

    fn authenticate(&self, credentials: Option<&Credentials>) -> Result<String, StreamError> {
        if self.inner.protocol == SecurityProtocol::Plaintext {
            return Ok(ANONYMOUS.to_string());
        }
        let credentials =
            credentials.ok_or_else(|| StreamError::AuthenticationFailed(ANONYMOUS.to_string()))?;
        let known = self
            .inner
            .users
            .get(&credentials.username)
            .is_some_and(|password| *password == credentials.password);
        if known {
            Ok(credentials.username.clone())
        } else {
            Err(StreamError::AuthenticationFailed(credentials.username.clone()))
        }
    }

    fn allowed(&self, principal: &str, resource: &AclResource, operation: AclOperation) -> bool {
        self.inner.protocol == SecurityProtocol::Plaintext
            || self
                .inner
                .acls
                .get(principal)
                .is_some_and(|acls| acls.contains(&(resource.clone(), operation)))
    }

    fn authorize_topic(
        &self,
        principal: &str,
        topic: &str,
        operation: AclOperation,
    ) -> Result<(), StreamError> {
        if self.allowed(principal, &AclResource::Topic(topic.to_string()), operation) {
            Ok(())
        } else {
            Err(StreamError::TopicAuthorizationFailed {
                principal: principal.to_string(),
                topic: topic.to_string(),
                operation: operation.as_str().to_string(),
            })
        }
    }

    fn authorize_group(&self, principal: &str, group: &str) -> Result<(), StreamError> {
        if self.allowed(principal, &AclResource::Group(group.to_string()), AclOperation::Read) {
            Ok(())
        } else {
            Err(StreamError::GroupAuthorizationFailed {
                principal: principal.to_string(),
                group: group.to_string(),
            })
        }
    }

    fn log(&self, topic: &str) -> Result<Arc<TopicLog>, StreamError> {
        self.inner
            .topics
            .get(topic)
            .map(|log| Arc::clone(log.value()))
            .ok_or_else(|| StreamError::UnknownTopic(topic.to_string()))
    }

    /// Producer client; `credentials` are ignored under `PLAINTEXT`
    ///
    /// # Errors
    /// - `StreamError::AuthenticationFailed` if SASL login fails
    pub fn producer(&self, credentials: Option<&Credentials>) -> Result<Producer, StreamError> {
        let principal = self.authenticate(credentials)?;
        Ok(Producer {
            broker: self.clone(),
            principal,
        })
    }

    /// Consumer in `group` subscribed to `topic`
    ///
    /// # Errors
    /// - `StreamError::AuthenticationFailed` if SASL login fails
    /// - `StreamError::TopicAuthorizationFailed` without READ on the topic
    /// - `StreamError::GroupAuthorizationFailed` without READ on the group
    /// - `StreamError::UnknownTopic` if the topic does not exist
    pub fn consumer(
        &self,
        credentials: Option<&Credentials>,
        group: &str,
        topic: &str,
    ) -> Result<Consumer, StreamError> {
        let principal = self.authenticate(credentials)?;
        self.authorize_topic(&principal, topic, AclOperation::Read)?;
        self.authorize_group(&principal, group)?;
        let log = self.log(topic)?;
        tracing::debug!(principal = %principal, group, topic, "consumer subscribed");
        Ok(Consumer {
            broker: self.clone(),
            principal,
            group: group.to_string(),
            topic: topic.to_string(),
            log,
        })
    }

    /// Every record of `topic`, for inspection
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.log(topic)
            .map(|log| log.records.read().clone())
            .unwrap_or_default()
    }

    /// Next offset of `topic`
    #[must_use]
    pub fn end_offset(&self, topic: &str) -> u64 {
        self.log(topic)
            .map(|log| log.records.read().len() as u64)
            .unwrap_or_default()
    }

    /// Offset committed by `group` on `topic`
    #[must_use]
    pub fn committed(&self, group: &str, topic: &str) -> u64 {
        self.inner
            .offsets
            .get(&(group.to_string(), topic.to_string()))
            .map_or(0, |offset| *offset)
    }
}

/// Authenticated producer
#[derive(Debug, Clone)]
pub struct Producer {
    broker: Broker,
    principal: String,
}

impl Producer {
    /// Authenticated principal
    #[inline]
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Append `record` to its topic
    ///
    /// # Errors
    /// - `StreamError::TopicAuthorizationFailed` without WRITE on the topic
    /// - `StreamError::UnknownTopic` if the topic does not exist
    pub async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, StreamError> {
        tokio::task::yield_now().await;
        self.broker
            .authorize_topic(&self.principal, &record.topic, AclOperation::Write)?;
        let log = self.broker.log(&record.topic)?;

        let offset = {
            let mut records = log.records.write();
            let offset = records.len() as u64;
            records.push(Record {
                topic: record.topic.clone(),
                offset,
                key: record.key,
                value: record.value,
                headers: record.headers,
            });
            offset
        };
        log.appended.notify_waiters();

        Ok(RecordMetadata {
            topic: record.topic,
            offset,
        })
    }
}

/// Group member subscribed to one topic
///
/// Offsets start at the earliest record and are committed on every poll, so
/// members of one group split the log between them.
#[derive(Debug)]
pub struct Consumer {
    broker: Broker,
    principal: String,
    group: String,
    topic: String,
    log: Arc<TopicLog>,
}

impl Consumer {
    /// Consumer group
    #[inline]
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Subscribed topic
    #[inline]
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Authenticated principal
    #[inline]
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    fn take(&self, max: usize) -> Vec<Record> {
        let records = self.log.records.read();
        let mut committed = self
            .broker
            .inner
            .offsets
            .entry((self.group.clone(), self.topic.clone()))
            .or_insert(0);
        let start = usize::try_from(*committed).unwrap_or(usize::MAX).min(records.len());
        let end = start.saturating_add(max).min(records.len());
        let batch = records[start..end].to_vec();
        *committed = end as u64;
        batch
    }

    /// Up to `max` records, waiting at most `timeout` for the first one
    ///
    /// # Errors
    /// - `StreamError::TopicAuthorizationFailed` if READ was revoked
    pub async fn poll(&self, max: usize, timeout: Duration) -> Result<Vec<Record>, StreamError> {
        self.broker
            .authorize_topic(&self.principal, &self.topic, AclOperation::Read)?;

        let appended = self.log.appended.notified();
        let batch = self.take(max);
        if !batch.is_empty() {
            return Ok(batch);
        }
        let _ = tokio::time::timeout(timeout, appended).await;
        Ok(self.take(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secured() -> Broker {
        let broker = Broker::new(SecurityProtocol::SaslPlaintext);
        broker.create_topic("orders");
        broker.add_user(&Credentials::new("writer", "pw"));
        broker.add_user(&Credentials::new("reader", "pw"));
        broker.grant("writer", AclResource::Topic("orders".into()), AclOperation::Write);
        broker.grant("reader", AclResource::Topic("orders".into()), AclOperation::Read);
        broker.grant("reader", AclResource::Group("g".into()), AclOperation::Read);
        broker
    }

    #[tokio::test]
    async fn produce_and_consume_from_earliest() {
        let broker = secured();
        let producer = broker.producer(Some(&Credentials::new("writer", "pw"))).unwrap();
        for i in 0..3 {
            producer
                .send(ProducerRecord::new("orders", i.to_string(), "{}").with_header("h", "v"))
                .await
                .unwrap();
        }

        let consumer = broker
            .consumer(Some(&Credentials::new("reader", "pw")), "g", "orders")
            .unwrap();
        let batch = consumer.poll(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].header("h"), Some("v"));
        assert_eq!(broker.committed("g", "orders"), 3);

        let empty = consumer.poll(10, Duration::from_millis(10)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn acls_are_enforced_under_sasl() {
        let broker = secured();
        assert!(matches!(
            broker.producer(Some(&Credentials::new("writer", "bad"))),
            Err(StreamError::AuthenticationFailed(_))
        ));
        assert!(broker.producer(None).is_err());

        let reader_as_producer = broker.producer(Some(&Credentials::new("reader", "pw"))).unwrap();
        let err = reader_as_producer
            .send(ProducerRecord::new("orders", "1", "{}"))
            .await
            .unwrap_err();
        assert!(err.is_authorization_error());

        let err = broker
            .consumer(Some(&Credentials::new("writer", "pw")), "g", "orders")
            .unwrap_err();
        assert!(err.is_authorization_error());

        let err = broker
            .consumer(Some(&Credentials::new("reader", "pw")), "other", "orders")
            .unwrap_err();
        assert!(matches!(err, StreamError::GroupAuthorizationFailed { .. }));
    }

    #[tokio::test]
    async fn plaintext_skips_acls() {
        let broker = Broker::new(SecurityProtocol::Plaintext);
        broker.create_topic("orders");
        let producer = broker.producer(None).unwrap();
        assert_eq!(producer.principal(), ANONYMOUS);
        producer
            .send(ProducerRecord::new("orders", "1", "{}"))
            .await
            .unwrap();
        let consumer = broker.consumer(None, "any", "orders").unwrap();
        assert_eq!(consumer.poll(1, Duration::ZERO).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_topic() {
        let broker = Broker::new(SecurityProtocol::Plaintext);
        let producer = broker.producer(None).unwrap();
        assert!(matches!(
            producer.send(ProducerRecord::new("nope", "1", "{}")).await,
            Err(StreamError::UnknownTopic(_))
        ));
    }

    #[tokio::test]
    async fn poll_wakes_on_append() {
        let broker = Broker::new(SecurityProtocol::Plaintext);
        broker.create_topic("orders");
        let consumer = broker.consumer(None, "g", "orders").unwrap();
        let producer = broker.producer(None).unwrap();

        let waiter = tokio::spawn(async move { consumer.poll(5, Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer
            .send(ProducerRecord::new("orders", "1", "{}"))
            .await
            .unwrap();

        let batch = waiter.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn groups_track_offsets_independently() {
        let broker = Broker::new(SecurityProtocol::Plaintext);
        broker.create_topic("orders");
        let producer = broker.producer(None).unwrap();
        producer
            .send(ProducerRecord::new("orders", "1", "{}"))
            .await
            .unwrap();

        let a = broker.consumer(None, "a", "orders").unwrap();
        let b = broker.consumer(None, "b", "orders").unwrap();
        assert_eq!(a.poll(5, Duration::ZERO).await.unwrap().len(), 1);
        assert_eq!(b.poll(5, Duration::ZERO).await.unwrap().len(), 1);
        assert_eq!(broker.end_offset("orders"), 1);
    }
}

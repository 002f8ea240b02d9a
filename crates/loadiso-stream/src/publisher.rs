//! Event publishers
//!
//! Publishing is fire-and-forget: the send runs on its own task and the caller
//! gets a [`PublishHandle`] as the completion signal. Failures are logged and
//! never undo the business operation that produced the event.
//!
//! With [`SingleStreamPublisher`] isolation is advisory. Production and test
//! events share one stream and only the traffic-type header tells them apart,
//! so any consumer that skips the header check processes load-test events as
//! real ones. [`TopicRoutingPublisher`] writes to separate streams with separate
//! credentials instead.

use crate::broker::{Producer, ProducerRecord, RecordMetadata};
use crate::error::StreamError;
use crate::event::{outbound_headers, UserCreatedEvent};
use loadiso_core::{BackendRouter, ClassificationContext, ResourceKind, RouterError};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Completion signal of one publish
///
/// Dropping the handle detaches it; the publish still runs to completion.
#[derive(Debug)]
pub struct PublishHandle {
    task: JoinHandle<Result<RecordMetadata, StreamError>>,
}

impl PublishHandle {
    /// Wait for the broker's acknowledgement
    ///
    /// # Errors
    /// - The send's own error
    /// - `StreamError::PublishAborted` if the task panicked or was cancelled
    pub async fn wait(self) -> Result<RecordMetadata, StreamError> {
        self.task
            .await
            .map_err(|err| StreamError::PublishAborted(err.to_string()))?
    }

    /// Whether the publish already finished
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn spawn_send(producer: Producer, record: Result<ProducerRecord, StreamError>) -> PublishHandle {
    let task = tokio::spawn(async move {
        let record = record?;
        let topic = record.topic.clone();
        let key = record.key.clone().unwrap_or_default();
        match producer.send(record).await {
            Ok(metadata) => {
                tracing::info!(
                    topic = %metadata.topic,
                    offset = metadata.offset,
                    key = %key,
                    "event published"
                );
                Ok(metadata)
            }
            Err(err) => {
                tracing::error!(topic = %topic, key = %key, error = %err, "failed to publish event");
                Err(err)
            }
        }
    });
    PublishHandle { task }
}

fn build_record(
    topic: &str,
    ctx: &ClassificationContext,
    event: &UserCreatedEvent,
) -> Result<ProducerRecord, StreamError> {
    let value = serde_json::to_string(event)?;
    Ok(ProducerRecord {
        topic: topic.to_string(),
        key: Some(event.key()),
        value,
        headers: outbound_headers(&ctx.current()),
    })
}

/// Publishes user events for the classification in `ctx`
pub trait UserEventPublisher: Send + Sync + Debug {
    /// Start publishing `event`; must be called within a tokio runtime
    fn publish_user_created(
        &self,
        ctx: &ClassificationContext,
        event: &UserCreatedEvent,
    ) -> PublishHandle;
}

/// Every event to one shared stream, tagged with its classification
#[derive(Debug, Clone)]
pub struct SingleStreamPublisher {
    producer: Producer,
    topic: String,
}

impl SingleStreamPublisher {
    /// Create publisher writing to `topic`
    #[must_use]
    pub fn new(producer: Producer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

impl UserEventPublisher for SingleStreamPublisher {
    fn publish_user_created(
        &self,
        ctx: &ClassificationContext,
        event: &UserCreatedEvent,
    ) -> PublishHandle {
        tracing::debug!(topic = %self.topic, is_test = ctx.is_test(), id = event.id, "publishing to shared stream");
        spawn_send(self.producer.clone(), build_record(&self.topic, ctx, event))
    }
}

/// Destination stream and the producer credentialed for it
#[derive(Debug, Clone)]
pub struct StreamRoute {
    /// Topic
    pub topic: String,
    /// Producer allowed to write `topic`
    pub producer: Producer,
}

impl StreamRoute {
    /// Create route
    #[must_use]
    pub fn new(topic: impl Into<String>, producer: Producer) -> Self {
        Self {
            topic: topic.into(),
            producer,
        }
    }
}

/// Resolves stream and producer per publish
#[derive(Debug, Clone)]
pub struct TopicRoutingPublisher {
    router: BackendRouter<StreamRoute>,
}

impl TopicRoutingPublisher {
    /// Wrap an existing router
    #[inline]
    #[must_use]
    pub fn new(router: BackendRouter<StreamRoute>) -> Self {
        Self { router }
    }

    /// Build from the two routes
    ///
    /// # Errors
    /// - `RouterError::MissingBackend` if a route is missing
    pub fn from_routes(
        real: Option<StreamRoute>,
        test: Option<StreamRoute>,
    ) -> Result<Self, RouterError> {
        let mut builder = BackendRouter::builder(ResourceKind::Stream);
        if let Some(real) = real {
            builder = builder.real(Arc::new(real));
        }
        if let Some(test) = test {
            builder = builder.test(Arc::new(test));
        }
        builder.build().map(Self::new)
    }

    /// Topic the next publish for `ctx` would use
    #[must_use]
    pub fn resolve_topic(&self, ctx: &ClassificationContext) -> &str {
        &self.router.select(ctx).topic
    }
}

impl UserEventPublisher for TopicRoutingPublisher {
    fn publish_user_created(
        &self,
        ctx: &ClassificationContext,
        event: &UserCreatedEvent,
    ) -> PublishHandle {
        let route = self.router.select(ctx);
        tracing::debug!(
            topic = %route.topic,
            principal = route.producer.principal(),
            id = event.id,
            "publishing to routed stream"
        );
        spawn_send(route.producer.clone(), build_record(&route.topic, ctx, event))
    }
}

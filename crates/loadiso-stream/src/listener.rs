//! Background listener feeding a consumer from a subscription

use crate::broker::Consumer;
use crate::consumer::{EventMetadata, UserEventConsumer};
use crate::event::UserCreatedEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Records fetched per poll
pub const MAX_POLL_RECORDS: usize = 100;
/// Longest wait of one poll
pub const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Running listener
#[derive(Debug)]
pub struct ListenerHandle {
    group: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Consumer group of the listener
    #[inline]
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Stop after the current batch and wait for the task
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(group = %self.group, error = %err, "listener task ended abnormally");
        }
    }
}

/// Spawn a task polling `subscription` and dispatching to `consumer`
///
/// Records that do not decode are logged and skipped. The task stops on
/// shutdown or when the broker refuses the subscription.
#[must_use]
pub fn spawn_listener(
    subscription: Consumer,
    consumer: Arc<dyn UserEventConsumer>,
) -> ListenerHandle {
    let (shutdown, mut stop) = watch::channel(false);
    let group = subscription.group().to_string();

    let task = tokio::spawn(async move {
        tracing::info!(
            group = subscription.group(),
            topic = subscription.topic(),
            consumer = consumer.name(),
            "listener started"
        );
        loop {
            let batch = tokio::select! {
                _ = stop.changed() => break,
                batch = subscription.poll(MAX_POLL_RECORDS, POLL_TIMEOUT) => batch,
            };
            let records = match batch {
                Ok(records) => records,
                Err(err) => {
                    tracing::error!(group = subscription.group(), error = %err, "listener stopped");
                    break;
                }
            };
            for record in records {
                match serde_json::from_str::<UserCreatedEvent>(&record.value) {
                    Ok(event) => {
                        consumer
                            .on_user_created(event, EventMetadata::from_record(&record))
                            .await;
                    }
                    Err(err) => tracing::warn!(
                        topic = %record.topic,
                        offset = record.offset,
                        error = %err,
                        "skipping undecodable record"
                    ),
                }
            }
            if *stop.borrow() {
                break;
            }
        }
        tracing::info!(group = subscription.group(), "listener stopped");
    });

    ListenerHandle {
        group,
        shutdown,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, ProducerRecord, SecurityProtocol};
    use crate::consumer::SharedStreamConsumer;

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn dispatches_and_skips_garbage() {
        let broker = Broker::new(SecurityProtocol::Plaintext);
        broker.create_topic("user-events");
        let consumer = Arc::new(SharedStreamConsumer::new());
        let handle = spawn_listener(
            broker.consumer(None, "g", "user-events").unwrap(),
            Arc::clone(&consumer) as Arc<dyn UserEventConsumer>,
        );

        let producer = broker.producer(None).unwrap();
        producer
            .send(ProducerRecord::new("user-events", "x", "not json"))
            .await
            .unwrap();
        producer
            .send(ProducerRecord::new(
                "user-events",
                "1",
                r#"{"id":1,"username":"u","email":"u@x","isTest":false}"#,
            ))
            .await
            .unwrap();

        assert!(eventually(|| consumer.processed_events().len() == 1).await);
        assert_eq!(handle.group(), "g");
        handle.shutdown().await;
        assert_eq!(broker.committed("g", "user-events"), 2);
    }
}

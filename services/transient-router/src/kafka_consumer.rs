use crate::config::KafkaConfig;
use crate::error::RouteError;
use crate::event::EventGridEvent;
use crate::router::{Invocation, TransientRouter};
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Kafka payloads carry either a single event or an Event Grid array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventBatch {
    Many(Vec<EventGridEvent>),
    One(Box<EventGridEvent>),
}

/// Decode a message payload into the events it carries
pub fn parse_events(payload: &[u8]) -> Result<Vec<EventGridEvent>, serde_json::Error> {
    Ok(match serde_json::from_slice(payload)? {
        EventBatch::Many(events) => events,
        EventBatch::One(event) => vec![*event],
    })
}

/// Kafka consumer feeding storage events to the router
pub struct EventKafkaConsumer {
    consumer: StreamConsumer,
    router: Arc<TransientRouter>,
}

impl EventKafkaConsumer {
    pub fn new(config: &KafkaConfig, router: Arc<TransientRouter>) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.events_topic])
            .context("Failed to subscribe to events topic")?;

        info!(
            topic = %config.events_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self { consumer, router })
    }

    /// Consume until `shutdown` is cancelled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting event Kafka consumer");

        let mut message_stream = self.consumer.stream();

        loop {
            let message_result = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = message_stream.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            match message_result {
                Ok(message) => {
                    if let Err(e) = self.process_message(&message).await {
                        error!(
                            error = %e,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Failed to process message"
                        );
                    } else if let Err(e) =
                        self.consumer.commit_message(&message, CommitMode::Async)
                    {
                        warn!(error = %e, "Failed to commit offset");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                }
            }
        }

        info!("Event Kafka consumer stopped");
        Ok(())
    }

    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let payload = message.payload().context("Message has no payload")?;
        let events = parse_events(payload).context("Failed to deserialize storage event")?;

        let failed = failed_events(self.router.handle_batch(&events).await);
        if !failed.is_empty() {
            anyhow::bail!("Error in function for events {}", failed.join(", "));
        }

        Ok(())
    }
}

/// Log each failed invocation and return the IDs of the failed events
fn failed_events(results: Vec<(String, Result<Invocation, RouteError>)>) -> Vec<String> {
    results
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(_) => None,
            Err(e) => {
                error!(event_id = %id, error = %e, "Event routing failed");
                Some(id)
            }
        })
        .collect()
}

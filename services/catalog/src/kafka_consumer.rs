use crate::config::KafkaConfig;
use crate::ingest::{IngestError, IngestionHandler};
use crate::notification::{created_objects, NotificationError};
use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Kafka consumer for blob store bucket notifications
///
/// An offset is committed only after every record of its message has been
/// indexed or rejected as malformed, so delivery into the catalog is
/// at-least-once.
pub struct NotificationConsumer {
    consumer: StreamConsumer,
    processor: NotificationProcessor,
}

/// What became of one notification message. Every variant may be committed.
#[derive(Debug, PartialEq)]
pub enum MessageOutcome {
    /// The envelope is not valid event JSON and never will be
    Malformed(NotificationError),
    /// The envelope held no creation records
    NoCreations,
    /// Every creation record was indexed, rejected, or failed permanently
    Settled {
        indexed: usize,
        rejected: usize,
        failed: usize,
    },
}

/// Turns message payloads into settled ingestion batches
pub struct NotificationProcessor {
    handler: Arc<IngestionHandler>,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

/// Build the librdkafka client settings for the notification consumer
pub fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", &config.consumer_group)
        .set("auto.offset.reset", &config.auto_offset_reset)
        .set("enable.auto.commit", "false")
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

    // Configure SSL if enabled
    if config.ssl_enabled {
        client_config.set("security.protocol", "SASL_SSL");
        if let Some(ref ca_location) = config.ssl_ca_location {
            client_config.set("ssl.ca.location", ca_location);
        }
    }

    // Configure SASL if credentials provided
    if let (Some(ref username), Some(ref password)) = (&config.sasl_username, &config.sasl_password)
    {
        client_config
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    client_config
}

impl NotificationProcessor {
    pub fn new(handler: Arc<IngestionHandler>, config: &KafkaConfig) -> Self {
        Self {
            handler,
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
        }
    }

    /// Index every creation record in one message payload.
    ///
    /// `Ok` means the message may be committed. Transient upsert failures are
    /// retried until they succeed; `IngestError::Interrupted` is returned when
    /// `shutdown` fires first and the message must stay uncommitted.
    pub async fn process_payload(
        &self,
        payload: &[u8],
        shutdown: &CancellationToken,
    ) -> Result<MessageOutcome, IngestError> {
        let objects = match created_objects(payload) {
            Ok(objects) => objects,
            Err(e) => return Ok(MessageOutcome::Malformed(e)),
        };

        if objects.is_empty() {
            return Ok(MessageOutcome::NoCreations);
        }

        let report = self.handler.process_raw_batch(objects).await?;
        let retried = report.retryable().len();

        info!(
            indexed = report.indexed_count(),
            rejected = report.rejected_count(),
            failed = report.failed_count(),
            "Processed notification batch"
        );

        self.handler
            .settle(&report, self.retry_backoff(), shutdown)
            .await?;

        Ok(MessageOutcome::Settled {
            indexed: report.indexed_count() + retried,
            rejected: report.rejected_count(),
            failed: report.failed_count() - retried,
        })
    }

    fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.retry_base_delay,
            max_interval: self.retry_max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

impl NotificationConsumer {
    /// Create a new consumer subscribed to the notifications topic
    pub fn new(config: &KafkaConfig, handler: Arc<IngestionHandler>) -> Result<Self> {
        let consumer: StreamConsumer = client_config(config)
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.notifications_topic])
            .context("Failed to subscribe to notifications topic")?;

        info!(
            topic = %config.notifications_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            processor: NotificationProcessor::new(handler, config),
        })
    }

    /// Consume and index notifications until `shutdown` fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting notification consumer");

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
                Ok(message) => match self.process_message(&message, &shutdown).await {
                    Ok(()) => {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                        metrics::counter!("catalog.messages.processed").increment(1);
                    }
                    Err(IngestError::Interrupted { pending }) => {
                        warn!(
                            pending = pending,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Stopping with uncommitted notifications; they will be redelivered"
                        );
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to process message");
                    }
                },
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("catalog.kafka.errors").increment(1);
                }
            }
        }

        info!("Notification consumer stopped");
        Ok(())
    }

    #[instrument(skip_all, fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(
        &self,
        message: &BorrowedMessage<'_>,
        shutdown: &CancellationToken,
    ) -> Result<(), IngestError> {
        let Some(payload) = message.payload() else {
            warn!("Skipping message without payload");
            return Ok(());
        };

        match self.processor.process_payload(payload, shutdown).await? {
            MessageOutcome::Malformed(e) => {
                // Commit past it: redelivery cannot fix the envelope
                error!(error = %e, "Skipping malformed notification message");
                metrics::counter!("catalog.messages.rejected").increment(1);
            }
            MessageOutcome::NoCreations => debug!("No creation records in message"),
            MessageOutcome::Settled { .. } => {}
        }

        Ok(())
    }
}

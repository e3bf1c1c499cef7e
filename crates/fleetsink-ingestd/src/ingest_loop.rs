use fleetsink_domain::{DomainError, IngestOutcome, ReadingIngestService};
use fleetsink_mqtt::InboundMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PAYLOAD_PREVIEW_LIMIT: usize = 128;

/// The orchestrator of the pipeline: pulls messages from the bounded intake
/// queue and runs each through decode → dedup key → persistence gate.
///
/// A single malformed payload or storage failure never stops the loop; it is
/// logged and the next message is processed. Messages are persisted in the
/// order they are dequeued.
pub struct IngestLoop {
    intake: mpsc::Receiver<InboundMessage>,
    service: Arc<ReadingIngestService>,
}

impl IngestLoop {
    pub fn new(intake: mpsc::Receiver<InboundMessage>, service: Arc<ReadingIngestService>) -> Self {
        Self { intake, service }
    }

    /// Consume intake until cancellation or until the producer side closes.
    ///
    /// On cancellation the loop stops accepting new intake, drains every
    /// already-buffered message through the same decode/persist path, and
    /// only then returns.
    pub async fn run(mut self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!("starting ingestion loop");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                message = self.intake.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        info!("intake channel closed, stopping ingestion loop");
                        return Ok(());
                    }
                }
            }
        }

        // Refuse new intake, then drain what is already buffered
        self.intake.close();
        let mut drained = 0usize;
        while let Some(message) = self.intake.recv().await {
            self.handle_message(message).await;
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "drained buffered messages during shutdown");
        }

        info!("ingestion loop stopped");
        Ok(())
    }

    async fn handle_message(&self, message: InboundMessage) {
        match self.service.ingest(&message.payload).await {
            Ok(IngestOutcome::Persisted(key)) => {
                info!(topic = %message.topic, key = %key, "stored sensor reading");
            }
            Ok(IngestOutcome::Duplicate(key)) => {
                // Expected under at-least-once redelivery
                debug!(
                    topic = %message.topic,
                    key = %key,
                    duplicate_flag = message.duplicate,
                    "duplicate reading ignored"
                );
            }
            Err(DomainError::PayloadDecode(e)) => {
                warn!(
                    topic = %message.topic,
                    error = %e,
                    payload = %payload_preview(&message.payload),
                    "discarding undecodable message"
                );
            }
            Err(e) => {
                error!(
                    topic = %message.topic,
                    error = %e,
                    "failed to persist reading, continuing"
                );
            }
        }
    }
}

/// Truncated, lossy rendering of a payload for diagnostics
fn payload_preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= PAYLOAD_PREVIEW_LIMIT {
        text.into_owned()
    } else {
        let mut preview: String = text.chars().take(PAYLOAD_PREVIEW_LIMIT).collect();
        preview.push_str("...");
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fleetsink_domain::{InsertOutcome, MockSensorDatumRepository};
    use fleetsink_mqtt::QoS;

    const VALID: &[u8] =
        br#"{"vehicleId":"car-1","timestamp":1700000000,"voltage":12.6,"current":0.8}"#;
    const MISSING_TIMESTAMP: &[u8] = br#"{"vehicleId":"car-1","voltage":12.6,"current":0.8}"#;

    fn message(payload: &'static [u8]) -> InboundMessage {
        InboundMessage {
            topic: "fleet/telemetry".to_string(),
            payload: Bytes::from_static(payload),
            qos: QoS::AtLeastOnce,
            duplicate: false,
        }
    }

    fn service_with(mock: MockSensorDatumRepository) -> Arc<ReadingIngestService> {
        Arc::new(ReadingIngestService::new(Arc::new(mock)))
    }

    #[tokio::test]
    async fn test_loop_persists_valid_messages_until_channel_closes() {
        let mut mock_repo = MockSensorDatumRepository::new();
        mock_repo
            .expect_insert_datum()
            .times(2)
            .returning(|_| Ok(InsertOutcome::Inserted));

        let (tx, rx) = mpsc::channel(8);
        let ingest_loop = IngestLoop::new(rx, service_with(mock_repo));

        tx.send(message(VALID)).await.unwrap();
        tx.send(message(VALID)).await.unwrap();
        drop(tx);

        ingest_loop.run(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_halt_the_loop() {
        let mut mock_repo = MockSensorDatumRepository::new();
        // Only the two decodable messages reach the gate
        mock_repo
            .expect_insert_datum()
            .times(2)
            .returning(|_| Ok(InsertOutcome::Inserted));

        let (tx, rx) = mpsc::channel(8);
        let ingest_loop = IngestLoop::new(rx, service_with(mock_repo));

        tx.send(message(VALID)).await.unwrap();
        tx.send(message(MISSING_TIMESTAMP)).await.unwrap();
        tx.send(message(VALID)).await.unwrap();
        drop(tx);

        ingest_loop.run(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_halt_the_loop() {
        let mut mock_repo = MockSensorDatumRepository::new();
        let mut calls = 0;
        mock_repo
            .expect_insert_datum()
            .times(2)
            .returning(move |_| {
                calls += 1;
                if calls == 1 {
                    Err(fleetsink_domain::DomainError::RepositoryError(
                        anyhow::anyhow!("disk full"),
                    ))
                } else {
                    Ok(InsertOutcome::Inserted)
                }
            });

        let (tx, rx) = mpsc::channel(8);
        let ingest_loop = IngestLoop::new(rx, service_with(mock_repo));

        tx.send(message(VALID)).await.unwrap();
        tx.send(message(VALID)).await.unwrap();
        drop(tx);

        ingest_loop.run(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_buffered_messages_are_drained_on_shutdown() {
        let mut mock_repo = MockSensorDatumRepository::new();
        mock_repo
            .expect_insert_datum()
            .times(5)
            .returning(|_| Ok(InsertOutcome::Inserted));

        let (tx, rx) = mpsc::channel(8);
        let ingest_loop = IngestLoop::new(rx, service_with(mock_repo));

        for _ in 0..5 {
            tx.send(message(VALID)).await.unwrap();
        }

        // Cancellation arrives before the loop even starts; everything
        // already buffered must still flow through the gate
        let ctx = CancellationToken::new();
        ctx.cancel();

        ingest_loop.run(ctx).await.unwrap();
    }

    #[test]
    fn test_payload_preview_truncates_long_payloads() {
        let long = "x".repeat(500);
        let preview = payload_preview(long.as_bytes());

        assert!(preview.len() < long.len());
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_payload_preview_is_lossy_for_invalid_utf8() {
        let preview = payload_preview(&[0xff, 0xfe]);

        assert!(!preview.is_empty());
    }
}

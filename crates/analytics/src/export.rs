//! ClickHouse export of accepted events for long-term analysis.
//!
//! Publishing never blocks ingestion: events go through a bounded channel
//! with `try_send` and a background writer flushes them in batches. When the
//! channel is full the event is dropped and counted.

use campaign_core::config::ClickHouseConfig;
use campaign_core::types::Event;
use campaign_core::EventSink;
use clickhouse::Row;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const QUEUE_CAPACITY: usize = 100_000;

/// Flat row written to the `campaign_events` table. Timestamps are epoch
/// milliseconds for the `DateTime64(3)` columns.
#[derive(Debug, Clone, PartialEq, Row, Serialize)]
pub struct EventRow {
    #[serde(with = "clickhouse::serde::uuid")]
    pub event_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    pub campaign_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    pub lead_id: Uuid,
    pub channel: &'static str,
    pub kind: &'static str,
    pub idempotency_key: String,
    pub provider_message_id: Option<String>,
    pub attempts: u32,
    pub node_id: String,
    pub occurred_at: i64,
    pub recorded_at: i64,
}

impl EventRow {
    pub fn from_event(event: &Event, node_id: &str) -> Self {
        Self {
            event_id: event.id,
            campaign_id: event.campaign_id,
            lead_id: event.lead_id,
            channel: event.channel.as_str(),
            kind: event.kind.as_str(),
            idempotency_key: event.idempotency_key.clone(),
            provider_message_id: event.provider_message_id.clone(),
            attempts: event.attempts,
            node_id: node_id.to_string(),
            occurred_at: event.occurred_at.timestamp_millis(),
            recorded_at: event.recorded_at.timestamp_millis(),
        }
    }
}

/// Event sink that forwards accepted events to ClickHouse.
pub struct ClickHouseExporter {
    sender: mpsc::Sender<EventRow>,
    node_id: String,
}

impl ClickHouseExporter {
    /// Connects, verifies the schema and spawns the background writer.
    pub async fn start(config: &ClickHouseConfig, node_id: String) -> anyhow::Result<Self> {
        let writer = BatchWriter::new(config).await?;
        let (exporter, receiver) = Self::with_queue(QUEUE_CAPACITY, node_id);

        let batch_size = config.batch_size.max(1);
        let flush_interval = std::time::Duration::from_millis(config.flush_interval_ms.max(1));
        tokio::spawn(async move {
            writer.run(receiver, batch_size, flush_interval).await;
        });

        info!(url = %config.url, database = %config.database, "ClickHouse event export enabled");
        Ok(exporter)
    }

    fn with_queue(capacity: usize, node_id: String) -> (Self, mpsc::Receiver<EventRow>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, node_id }, receiver)
    }
}

impl EventSink for ClickHouseExporter {
    fn publish(&self, event: &Event) {
        let row = EventRow::from_event(event, &self.node_id);
        if let Err(e) = self.sender.try_send(row) {
            metrics::counter!("analytics.export_dropped").increment(1);
            warn!(event_id = %event.id, "Event export dropped: {}", e);
        } else {
            metrics::counter!("analytics.export_queued").increment(1);
        }
    }
}

struct BatchWriter {
    client: clickhouse::Client,
}

impl BatchWriter {
    async fn new(config: &ClickHouseConfig) -> anyhow::Result<Self> {
        let client = clickhouse::Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        Self::ensure_schema(&client).await?;

        Ok(Self { client })
    }

    async fn ensure_schema(client: &clickhouse::Client) -> anyhow::Result<()> {
        client
            .query(
                "CREATE TABLE IF NOT EXISTS campaign_events (
                    event_id UUID,
                    campaign_id UUID,
                    lead_id UUID,
                    channel LowCardinality(String),
                    kind LowCardinality(String),
                    idempotency_key String,
                    provider_message_id Nullable(String),
                    attempts UInt32,
                    node_id String,
                    occurred_at DateTime64(3),
                    recorded_at DateTime64(3)
                ) ENGINE = ReplacingMergeTree()
                ORDER BY (campaign_id, kind, occurred_at, event_id)
                PARTITION BY toYYYYMM(occurred_at)",
            )
            .execute()
            .await?;

        info!("ClickHouse schema verified");
        Ok(())
    }

    async fn run(
        self,
        mut receiver: mpsc::Receiver<EventRow>,
        batch_size: usize,
        flush_interval: std::time::Duration,
    ) {
        let mut buffer: Vec<EventRow> = Vec::with_capacity(batch_size);
        let mut interval = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                received = receiver.recv() => match received {
                    Some(row) => {
                        buffer.push(row);
                        if buffer.len() >= batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => {
                        if !buffer.is_empty() {
                            self.flush(&mut buffer).await;
                        }
                        info!("Event export queue closed, writer stopping");
                        return;
                    }
                },
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
            }
        }
    }

    /// Writes the buffered rows and empties the buffer. A failed batch is
    /// logged and dropped.
    async fn flush(&self, buffer: &mut Vec<EventRow>) {
        let count = buffer.len();
        debug!(count, "Flushing event batch to ClickHouse");

        let result = self.write_batch(buffer).await;
        buffer.clear();
        match result {
            Ok(()) => {
                metrics::counter!("analytics.export_flushed").increment(count as u64);
                debug!(count, "Event batch flushed");
            }
            Err(e) => {
                metrics::counter!("analytics.export_flush_errors").increment(1);
                error!(error = %e, count, "Failed to flush event batch");
            }
        }
    }

    async fn write_batch(&self, rows: &[EventRow]) -> clickhouse::error::Result<()> {
        let mut insert = self.client.insert::<EventRow>("campaign_events")?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::{Channel, EventKind};
    use chrono::{TimeZone, Utc};

    fn event() -> Event {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        Event {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            channel: Channel::Text,
            kind: EventKind::Delivered,
            occurred_at: at,
            recorded_at: at,
            idempotency_key: "cb-1".into(),
            provider_message_id: Some("SM123".into()),
            detail: None,
            attempts: 1,
        }
    }

    #[test]
    fn test_row_from_event() {
        let e = event();
        let row = EventRow::from_event(&e, "node-a");
        assert_eq!(row.event_id, e.id);
        assert_eq!(row.kind, "delivered");
        assert_eq!(row.channel, "text");
        assert_eq!(row.node_id, "node-a");
        assert_eq!(row.occurred_at, 1_709_993_107_000);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_writer_alive() {
        // Nothing listens on port 1, so every insert fails.
        let writer = BatchWriter {
            client: clickhouse::Client::default().with_url("http://127.0.0.1:1"),
        };
        let mut row = EventRow::from_event(&event(), "node-a");
        row.idempotency_key = "provider?retry=1".into();
        row.provider_message_id = Some("{?}".into());

        let mut buffer = vec![row.clone(), row];
        writer.flush(&mut buffer).await;
        assert!(buffer.is_empty());

        buffer.push(EventRow::from_event(&event(), "node-a"));
        writer.flush(&mut buffer).await;
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (exporter, mut receiver) = ClickHouseExporter::with_queue(1, "node-a".into());
        exporter.publish(&event());
        exporter.publish(&event());

        assert!(receiver.recv().await.is_some());
        assert!(receiver.try_recv().is_err());
    }
}

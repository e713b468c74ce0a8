//! Relays booking events from the outbox table to Kafka.
//!
//! Events are published in creation order and keyed by reservation, so a
//! consumer sees each reservation's history in sequence. A publish failure
//! ends the batch; the unpublished tail is retried on the next poll.

use anyhow::Result;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::*;
use crate::pg::DbPool;
use crate::schema::*;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OutboxRelay {
    pool: DbPool,
    producer: FutureProducer,
    topic: String,
    poll_interval: Duration,
    batch_size: i64,
}

impl OutboxRelay {
    pub fn new(pool: DbPool, producer: FutureProducer, topic: String) -> Self {
        Self {
            pool,
            producer,
            topic,
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn run(&self) {
        info!(
            "Relaying outbox to topic {} every {:?}",
            self.topic, self.poll_interval
        );
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // keep draining while full batches come back
            loop {
                match self.drain_batch().await {
                    Ok(relayed) if backlog_remains(relayed, self.batch_size) => continue,
                    Ok(_) => break,
                    Err(e) => {
                        error!("Outbox relay failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    /// Publishes the oldest unprocessed events and marks the published prefix.
    async fn drain_batch(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;

        let batch = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(self.batch_size)
            .load::<DbOutboxEvent>(&mut conn)
            .await?;

        let mut published: Vec<Uuid> = Vec::with_capacity(batch.len());
        for event in &batch {
            if let Err(e) = self.publish(event).await {
                warn!(
                    "Could not publish {} {} for reservation {}: {}",
                    event.event_type, event.id, event.aggregate_id, e
                );
                break;
            }
            published.push(event.id);
        }

        if !published.is_empty() {
            diesel::update(outbox_events::table.filter(outbox_events::id.eq_any(&published)))
                .set(outbox_events::processed.eq(true))
                .execute(&mut conn)
                .await?;
            debug!("Relayed {} of {} outbox events", published.len(), batch.len());
        }

        Ok(published.len())
    }

    async fn publish(&self, event: &DbOutboxEvent) -> Result<()> {
        let (key, payload) = encode(event)?;
        let record = FutureRecord::to(&self.topic)
            .payload(&payload)
            .key(&key)
            .headers(OwnedHeaders::new().insert(Header {
                key: "event_type",
                value: Some(event.event_type.as_str()),
            }));

        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| anyhow::anyhow!("kafka send: {}", e))?;
        Ok(())
    }
}

fn backlog_remains(relayed: usize, batch_size: i64) -> bool {
    relayed as i64 >= batch_size
}

/// Message key and JSON payload for an outbox row.
fn encode(event: &DbOutboxEvent) -> Result<(String, String)> {
    Ok((event.aggregate_id.to_string(), serde_json::to_string(&event.event_data)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::BookingEvent;

    #[test]
    fn rows_are_keyed_by_reservation() {
        let reservation_id = Uuid::new_v4();
        let event = BookingEvent::ReservationCancelled { reservation_id };
        let row = DbOutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id: reservation_id,
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(&event).unwrap(),
            processed: Some(false),
            created_at: None,
        };

        let (key, payload) = encode(&row).unwrap();
        assert_eq!(key, reservation_id.to_string());
        let decoded: BookingEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn only_full_batches_poll_again() {
        assert!(backlog_remains(100, 100));
        assert!(!backlog_remains(99, 100));
        assert!(!backlog_remains(0, 100));
    }
}

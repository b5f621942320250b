use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio_util::sync::CancellationToken;

use super::{BusError, DELIVER_AT_HEADER, Publisher, parse_deliver_at};
use crate::config::RabbitMqConfig;
use crate::storage::TaskStore;
use crate::util::UnixMillis;

const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// RabbitMQ adapter: consumes the ingress queue into the task store and
/// publishes due payloads to the egress queue.
pub struct RabbitMq {
    cfg: RabbitMqConfig,
    conn: Connection,
    chan: Channel,
}

impl RabbitMq {
    pub async fn connect(cfg: RabbitMqConfig) -> Result<Self, BusError> {
        let conn = Connection::connect(
            &cfg.rabbitmq_server.connection_uri(),
            ConnectionProperties::default(),
        )
        .await?;
        let chan = conn.create_channel().await?;

        Ok(Self { cfg, conn, chan })
    }

    /// Starts draining the consume queue into `store`. Deliveries are
    /// auto-acked; a message with a missing or malformed deliver-at header
    /// is logged and dropped.
    pub async fn consume(
        &self,
        store: Arc<TaskStore>,
        shutdown: CancellationToken,
    ) -> Result<(), BusError> {
        let queue = &self.cfg.rabbitmq_data_exchange.consume_queue_name;

        if self.cfg.rabbitmq_data_exchange.declare_queue {
            self.chan
                .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
                .await?;
        }

        let consumer = self
            .chan
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        tokio::spawn(consume_loop(consumer, store, queue.clone(), shutdown));

        Ok(())
    }

    pub async fn close(&self) {
        if let Err(err) = self.chan.close(200, "bye").await {
            tracing::error!(error = %err, "failed to close rabbitmq channel");
        }
        if let Err(err) = self.conn.close(200, "bye").await {
            tracing::error!(error = %err, "failed to close rabbitmq connection");
        }
    }
}

#[async_trait]
impl Publisher for RabbitMq {
    async fn publish(&self, payload: &[u8]) -> Result<(), BusError> {
        self.chan
            .basic_publish(
                "",
                &self.cfg.rabbitmq_data_exchange.produce_queue_name,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("text/plain".into())
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE),
            )
            .await?
            .await?;
        Ok(())
    }
}

async fn consume_loop(
    mut consumer: Consumer,
    store: Arc<TaskStore>,
    queue: String,
    shutdown: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.next() => next,
        };

        let delivery = match delivery {
            Some(Ok(delivery)) => delivery,
            Some(Err(err)) => {
                tracing::error!(queue = %queue, error = %err, "error receiving delivery");
                continue;
            }
            None => break,
        };

        let started = Instant::now();
        let result = handle_delivery(&store, &delivery).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(due) => tracing::debug!(
                queue = %queue,
                delivery_tag = delivery.delivery_tag,
                routing_key = %delivery.routing_key,
                due,
                duration_ms,
                "message processed successfully"
            ),
            Err(err) => tracing::error!(
                queue = %queue,
                delivery_tag = delivery.delivery_tag,
                routing_key = %delivery.routing_key,
                error = %err,
                duration_ms,
                "error in processing message"
            ),
        }
    }

    tracing::debug!(queue = %queue, "consume loop stopped");
}

async fn handle_delivery(store: &TaskStore, delivery: &Delivery) -> Result<UnixMillis, BusError> {
    let due = deliver_at(delivery)?;
    store.add(&delivery.data, due).await?;
    Ok(due)
}

fn deliver_at(delivery: &Delivery) -> Result<UnixMillis, BusError> {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .ok_or(BusError::MissingDeliverAt)?;
    let key: ShortString = DELIVER_AT_HEADER.into();
    let value = headers.inner().get(&key).ok_or(BusError::MissingDeliverAt)?;
    parse_deliver_at(value)
}

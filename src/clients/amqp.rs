use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{info, warn};

use crate::{
    clients::{Broker, Delivery, DeliveryStream},
    config::Config,
    models::message::{
        Channel, DeadLetterEntry, FAILED_QUEUE, MessageHeaders, NOTIFICATIONS_EXCHANGE,
        QueuedMessage,
    },
};

pub struct AmqpBroker {
    channel: lapin::Channel,
}

impl AmqpBroker {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {e}"))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {e}"))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set prefetch count: {e}"))?;

        let broker = Self { channel };
        broker.declare_topology().await?;

        info!("RabbitMQ topology declared");

        Ok(broker)
    }

    /// Declares the direct exchange, one durable work queue per channel bound
    /// to its routing key, one wait queue per channel that dead-letters back
    /// into the exchange when a per-message TTL elapses, and the terminal
    /// failed queue.
    async fn declare_topology(&self) -> Result<(), Error> {
        self.channel
            .exchange_declare(
                NOTIFICATIONS_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare exchange: {e}"))?;

        for channel in Channel::ALL {
            self.channel
                .queue_declare(
                    channel.queue(),
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to declare queue {}: {e}", channel.queue()))?;

            self.channel
                .queue_bind(
                    channel.queue(),
                    NOTIFICATIONS_EXCHANGE,
                    channel.routing_key(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to bind queue {}: {e}", channel.queue()))?;

            let mut wait_args = FieldTable::default();
            wait_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(NOTIFICATIONS_EXCHANGE.into()),
            );
            wait_args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(channel.routing_key().into()),
            );

            self.channel
                .queue_declare(
                    channel.wait_queue(),
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    wait_args,
                )
                .await
                .map_err(|e| anyhow!("Failed to declare wait queue {}: {e}", channel.wait_queue()))?;
        }

        self.channel
            .queue_declare(
                FAILED_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare failed queue: {e}"))?;

        Ok(())
    }

    fn properties(headers: &MessageHeaders) -> BasicProperties {
        let mut table = FieldTable::default();
        table.insert(
            "x-idempotency-key".into(),
            AMQPValue::LongString(headers.idempotency_key.as_str().into()),
        );
        table.insert(
            "x-retry-count".into(),
            AMQPValue::LongUInt(headers.retry_count),
        );

        BasicProperties::default()
            .with_delivery_mode(2)
            .with_correlation_id(headers.correlation_id.as_str().into())
            .with_headers(table)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &QueuedMessage,
        headers: MessageHeaders,
    ) -> Result<()> {
        let payload = serde_json::to_vec(message)?;

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                Self::properties(&headers),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {e}"))?;

        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer on {queue}: {e}"))?;

        info!(queue, consumer_tag, "Consumer created");

        let stream = consumer.filter_map(|delivery| async move {
            match delivery {
                Ok(delivery) => Some(Delivery {
                    delivery_tag: delivery.delivery_tag,
                    payload: delivery.data,
                }),
                Err(e) => {
                    warn!(error = %e, "Consumer stream error, skipping delivery");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {e}"))?;

        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {e}"))?;

        Ok(())
    }

    /// Parks the message on the channel's wait queue with a per-message TTL.
    /// When the TTL elapses the broker dead-letters it back through the
    /// exchange onto the work queue. No worker thread waits on the delay.
    async fn schedule_requeue(&self, message: &QueuedMessage, delay: Duration) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        let expiration = delay.as_millis().to_string();

        self.channel
            .basic_publish(
                "",
                message.channel().wait_queue(),
                BasicPublishOptions::default(),
                &payload,
                Self::properties(&MessageHeaders::from(message))
                    .with_expiration(expiration.into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to schedule requeue: {e}"))?;

        Ok(())
    }

    async fn publish_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()> {
        let payload = serde_json::to_vec(entry)?;

        self.channel
            .basic_publish(
                "",
                FAILED_QUEUE,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message to failed queue: {e}"))?;

        Ok(())
    }
}

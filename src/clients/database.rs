use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::clients::DeliveryLog;
use crate::models::audit::DeliveryRecord;

/// Audit sink backed by the `delivery_log` table.
pub struct PostgresDeliveryLog {
    client: Client,
}

impl PostgresDeliveryLog {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {e}"))?;

        // The connection object drives the socket and must be polled for the
        // client to make progress.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection task ended");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS delivery_log (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    correlation_id TEXT NOT NULL,
                    idempotency_key TEXT NOT NULL,
                    channel TEXT NOT NULL,
                    recipient_ref TEXT NOT NULL,
                    template_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    attempts INTEGER NOT NULL,
                    error_message TEXT,
                    metadata JSONB NOT NULL DEFAULT '{}',
                    recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE INDEX IF NOT EXISTS delivery_log_correlation_idx
                    ON delivery_log (correlation_id);
                "#,
            )
            .await
            .map_err(|e| anyhow!("Failed to ensure delivery_log schema: {e}"))?;

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {e}"))?;

        Ok(())
    }
}

#[async_trait]
impl DeliveryLog for PostgresDeliveryLog {
    async fn record(&self, record: DeliveryRecord) -> Result<()> {
        let status = record.status.to_string();
        let attempts = record.attempts as i32;

        self.client
            .execute(
                r#"
                INSERT INTO delivery_log (
                    correlation_id,
                    idempotency_key,
                    channel,
                    recipient_ref,
                    template_id,
                    status,
                    attempts,
                    error_message,
                    metadata
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
                &[
                    &record.correlation_id,
                    &record.idempotency_key,
                    &record.channel.as_str(),
                    &record.recipient_ref,
                    &record.template_id,
                    &status,
                    &attempts,
                    &record.error_message,
                    &record.metadata,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    correlation_id = %record.correlation_id,
                    "Failed to write delivery log row"
                );
                anyhow!("Database write failed: {e}")
            })?;

        debug!(
            correlation_id = %record.correlation_id,
            status = %status,
            "Delivery log row written"
        );

        Ok(())
    }
}

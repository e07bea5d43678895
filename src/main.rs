use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use tracing::{error, info};

use notification_relay::api::run_api_server;
use notification_relay::clients::amqp::AmqpBroker;
use notification_relay::clients::circuit_breaker::BreakerRegistry;
use notification_relay::clients::database::PostgresDeliveryLog;
use notification_relay::clients::email::MailGatewayTransport;
use notification_relay::clients::health::HealthChecker;
use notification_relay::clients::push::FcmTransport;
use notification_relay::clients::redis::{self, RedisIdempotencyStore, RedisRateLimiter};
use notification_relay::clients::template::HttpTemplateResolver;
use notification_relay::clients::{
    Broker, ChannelTransport, DeliveryLog, IdempotencyStore, RateLimiter, TemplateResolver,
};
use notification_relay::config::Config;
use notification_relay::dispatcher::Dispatcher;
use notification_relay::models::message::Channel;
use notification_relay::utils::{RetrySettings, retry_with_backoff};
use notification_relay::worker::{ChannelWorker, WorkerContext};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notification_relay=info".into()),
        )
        .json()
        .init();

    let config = Config::load()?;
    info!(instance = %config.instance_id, "Notification relay starting");

    let retry_settings = RetrySettings::from_config(&config);

    let broker: Arc<dyn Broker> =
        Arc::new(retry_with_backoff(&retry_settings, || AmqpBroker::connect(&config)).await?);

    let redis_connection =
        retry_with_backoff(&retry_settings, || redis::connect(&config)).await?;
    let store: Arc<dyn IdempotencyStore> = Arc::new(RedisIdempotencyStore::new(
        redis_connection.clone(),
        retry_settings.clone(),
    ));
    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(RedisRateLimiter::new(
        redis_connection,
        config.rate_limit_per_hour,
    ));

    let delivery_log = retry_with_backoff(&retry_settings, || {
        PostgresDeliveryLog::connect(&config.database_url)
    })
    .await?;
    delivery_log.ensure_schema().await?;
    let delivery_log: Arc<dyn DeliveryLog> = Arc::new(delivery_log);

    let resolver: Arc<dyn TemplateResolver> = Arc::new(HttpTemplateResolver::new(&config)?);

    let registry = BreakerRegistry::new();

    let dispatcher = Dispatcher::new(
        Arc::clone(&broker),
        Arc::clone(&store),
        config.idempotency_ttl(),
        config.idempotency_fail_open,
    );

    let mut workers = tokio::task::JoinSet::new();
    for channel in Channel::ALL {
        let transport: Arc<dyn ChannelTransport> = match channel {
            Channel::Email => Arc::new(MailGatewayTransport::new(&config)?),
            Channel::Push => Arc::new(FcmTransport::new(&config)?),
        };

        for index in 0..config.worker_concurrency {
            let context = WorkerContext {
                broker: Arc::clone(&broker),
                store: Arc::clone(&store),
                resolver: Arc::clone(&resolver),
                transport: Arc::clone(&transport),
                rate_limiter: Arc::clone(&rate_limiter),
                delivery_log: Arc::clone(&delivery_log),
                retry_policy: config.retry_policy(),
                breaker_config: config.breaker_config(),
            };

            let instance = format!("{}-{}-{}", config.instance_id, channel, index);
            let worker = ChannelWorker::new(&instance, channel, context, &registry).await;
            workers.spawn(async move { worker.run().await });
        }
    }

    let health_checker =
        HealthChecker::new(config.clone(), config.instance_id.clone(), registry);

    tokio::select! {
        result = run_api_server(config, dispatcher, health_checker) => {
            if let Err(e) = result {
                error!(error = %e, "API server exited with error");
                return Err(e);
            }
        }
        Some(result) = workers.join_next() => {
            match result {
                Ok(Ok(())) => {
                    error!("Worker consumer stream ended unexpectedly");
                    return Err(anyhow!("Worker consumer stream ended"));
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Worker exited with error");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Worker task panicked");
                    return Err(anyhow!("Worker task panicked: {e}"));
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping gracefully");
        }
    }

    workers.shutdown().await;
    info!("Notification relay stopped");

    Ok(())
}

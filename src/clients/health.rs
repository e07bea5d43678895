use std::{collections::HashMap, time::Instant};

use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::{
    clients::amqp::AmqpBroker,
    clients::circuit_breaker::BreakerRegistry,
    clients::database::PostgresDeliveryLog,
    config::Config,
    models::health::{DependencyHealth, HealthCheckResponse, summarize},
};

pub struct HealthChecker {
    config: Config,
    instance: String,
    registry: BreakerRegistry,
}

impl HealthChecker {
    pub fn new(config: Config, instance: String, registry: BreakerRegistry) -> Self {
        Self {
            config,
            instance,
            registry,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("message_broker".to_string(), self.check_broker().await);
        checks.insert("cache_store".to_string(), self.check_redis().await);
        checks.insert("database".to_string(), self.check_database().await);

        let breakers = self.registry.states().await;
        let status = summarize(&checks, &breakers);

        HealthCheckResponse {
            status,
            instance: self.instance.clone(),
            timestamp: Utc::now(),
            checks,
            breakers,
        }
    }

    async fn check_broker(&self) -> DependencyHealth {
        let start = Instant::now();

        match AmqpBroker::connect(&self.config).await {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "RabbitMQ health check passed");
                DependencyHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "RabbitMQ connection failed");
                DependencyHealth::unhealthy(format!("Connection failed: {e}"))
            }
        }
    }

    async fn check_redis(&self) -> DependencyHealth {
        let start = Instant::now();

        match redis::Client::open(self.config.redis_url.as_str()) {
            Ok(client) => match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => match conn.ping::<String>().await {
                    Ok(_) => {
                        let elapsed = start.elapsed().as_millis() as u64;
                        debug!(response_time_ms = elapsed, "Redis health check passed");
                        DependencyHealth::healthy(elapsed)
                    }
                    Err(e) => {
                        warn!(error = %e, "Redis ping failed");
                        DependencyHealth::unhealthy(format!("Ping failed: {e}"))
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Redis connection failed");
                    DependencyHealth::unhealthy(format!("Connection failed: {e}"))
                }
            },
            Err(e) => {
                warn!(error = %e, "Redis client creation failed");
                DependencyHealth::unhealthy(format!("Client creation failed: {e}"))
            }
        }
    }

    async fn check_database(&self) -> DependencyHealth {
        let start = Instant::now();

        match PostgresDeliveryLog::connect(&self.config.database_url).await {
            Ok(log) => match log.health_check().await {
                Ok(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    debug!(response_time_ms = elapsed, "Database health check passed");
                    DependencyHealth::healthy(elapsed)
                }
                Err(e) => {
                    warn!(error = %e, "Database health check failed");
                    DependencyHealth::unhealthy(format!("Health check query failed: {e}"))
                }
            },
            Err(e) => {
                warn!(error = %e, "Database connection failed");
                DependencyHealth::unhealthy(format!("Connection failed: {e}"))
            }
        }
    }
}

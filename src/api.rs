use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::health::HealthChecker,
    config::Config,
    dispatcher::{Dispatcher, SubmitResponse},
    error::ErrorKind,
    models::health::HealthStatus,
    models::message::{Channel, NotificationRequest},
    models::response::{ApiResponse, SubmitBody},
};

pub struct AppState {
    dispatcher: Dispatcher,
    health_checker: HealthChecker,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub idempotency_key: String,
    pub channel: Channel,
    pub recipient_ref: String,
    pub template_id: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

fn default_locale() -> String {
    "en".to_string()
}

pub async fn run_api_server(
    config: Config,
    dispatcher: Dispatcher,
    health_checker: HealthChecker,
) -> Result<()> {
    let state = Arc::new(AppState {
        dispatcher,
        health_checker,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/notifications", post(submit_notification))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn submit_notification(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitRequest>,
) -> impl IntoResponse {
    let request = NotificationRequest {
        idempotency_key: body.idempotency_key,
        channel: body.channel,
        recipient_ref: body.recipient_ref,
        template_id: body.template_id,
        locale: body.locale,
        variables: body.variables,
        created_at: Utc::now(),
    };

    match state.dispatcher.submit(request).await {
        SubmitResponse::Accepted { correlation_id } => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(
                SubmitBody {
                    correlation_id: Some(correlation_id),
                    duplicate: false,
                },
                "Notification accepted".to_string(),
            )),
        ),
        SubmitResponse::Duplicate { correlation_id } => (
            StatusCode::OK,
            Json(ApiResponse::success(
                SubmitBody {
                    correlation_id,
                    duplicate: true,
                },
                "Duplicate request suppressed".to_string(),
            )),
        ),
        SubmitResponse::Rejected { error, detail } => {
            let status_code = match error {
                ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status_code, Json(ApiResponse::error(error, detail)))
        }
    }
}

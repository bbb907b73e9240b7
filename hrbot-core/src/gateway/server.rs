//! Webhook server built on axum.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::ServerConfig;
use crate::channels::whatsapp::{Inbound, WhatsAppConfig, parse_inbound};
use crate::service::ChatService;

/// Shared state of the webhook handlers.
pub struct WebhookState {
    service: Arc<ChatService>,
    verify_token: String,
    channel: WhatsAppConfig,
}

impl WebhookState {
    pub fn new(service: Arc<ChatService>, verify_token: String, channel: WhatsAppConfig) -> Self {
        Self {
            service,
            verify_token,
            channel,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Build an axum Router with `/webhook` and `/health` routes.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", get(verify_handler).post(receive_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Meta subscription handshake.
async fn verify_handler(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    let subscribed = params.mode.as_deref() == Some("subscribe")
        && params.token.as_deref() == Some(state.verify_token.as_str());
    if subscribed {
        info!("Webhook verified");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        warn!(mode = ?params.mode, "Webhook verification failed");
        (StatusCode::FORBIDDEN, String::new())
    }
}

/// Inbound events. Always 200; processing happens on a spawned task.
async fn receive_handler(State(state): State<Arc<WebhookState>>, body: Bytes) -> StatusCode {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Ignoring webhook body that is not JSON");
            return StatusCode::OK;
        }
    };

    match parse_inbound(&value) {
        Inbound::Text { from, body } => {
            if !state.channel.is_allowed(&from) {
                info!(from = %from, "Ignoring message from number not in allow list");
                return StatusCode::OK;
            }
            debug!(from = %from, "Text message received");
            let service = state.service.clone();
            tokio::spawn(async move {
                service.handle_text(&from, &body).await;
            });
        }
        Inbound::Unsupported { from, kind } => {
            info!(from = %from, kind = %kind, "Ignoring non-text message");
        }
        Inbound::Status => debug!("Ignoring status event"),
        Inbound::Malformed(reason) => warn!(reason = %reason, "Ignoring unexpected webhook payload"),
    }
    StatusCode::OK
}

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<WebhookState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "message": "WhatsApp Bot is running",
        "side_effect_failures": state.service.monitor().snapshot(),
    }))
}

/// Serve until Ctrl-C.
pub async fn run(state: Arc<WebhookState>, config: &ServerConfig) -> Result<(), std::io::Error> {
    let app = router(state);
    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Webhook server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down webhook server");
        })
        .await
}

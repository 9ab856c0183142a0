//! Webhook HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `HEAD`/`GET` | `/api/trello` | Liveness probe used by Trello on webhook registration |
//! | `POST` | `/api/trello` | Card events, authenticated by `x-trello-webhook` |
//! | `POST` | `/api/sns` | SNS deliveries (subscription handshake and SES notifications) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Acknowledgement Contract
//!
//! Authentic, well-formed deliveries always get `200 {"status":"ok"}`, even
//! when reconciliation fails, so the sender does not retry-storm us. The
//! failure is logged server-side only. Error responses are reserved for:
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "invalid signature" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401).

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db;
use crate::events::{decode_card_event, decode_inbound_email, SnsEnvelope, SnsMessageKind};
use crate::migrate;
use crate::reconcile::{ReconcileSettings, Reconciler};
use crate::s3::S3ObjectStore;
use crate::signature::sns::{validate_sns_url, HttpCertFetcher, SnsVerifier};
use crate::signature::trello;
use crate::store::sqlite::SqliteStore;
use crate::trello::TrelloClient;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub sns: Arc<SnsVerifier>,
    /// `None` disables Trello signature checks (open mode).
    pub trello_secret: Option<String>,
    pub trello_callback_url: Option<String>,
    /// Client used for the SNS `SubscribeURL` handshake.
    pub http: reqwest::Client,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/trello", get(handle_trello_probe).post(handle_trello))
        .route("/api/sns", post(handle_sns))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wires the production clients and serves until the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let reconciler = Reconciler::new(
        Arc::new(SqliteStore::new(pool)),
        Arc::new(TrelloClient::new(&config.trello, &config.http)?),
        Arc::new(S3ObjectStore::new(&config.s3, &config.http)?),
        ReconcileSettings::from_config(config),
    );
    let fetcher = HttpCertFetcher::new(config.http.timeout())?;
    let http = reqwest::Client::builder()
        .timeout(config.http.timeout())
        .build()?;

    if config.trello.webhook_secret.is_none() {
        warn!("No Trello webhook secret configured, accepting unsigned card events");
    }

    let state = AppState {
        reconciler: Arc::new(reconciler),
        sns: Arc::new(SnsVerifier::new(
            Arc::new(fetcher),
            config.sns.cert_host_suffix.clone(),
        )),
        trello_secret: config.trello.webhook_secret.clone(),
        trello_callback_url: config.trello.callback_url.clone(),
        http,
    };

    let app = build_router(state);
    let bind_addr = &config.server.bind;
    info!(%bind_addr, "Webhook server listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Responses ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "invalid signature".to_string(),
    }
}

fn ack() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /api/trello ============

async fn handle_trello_probe() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "trello-webhook" }))
}

async fn handle_trello(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(trello::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !trello::verify(
        state.trello_secret.as_deref(),
        &body,
        state.trello_callback_url.as_deref(),
        signature,
    ) {
        warn!("Trello signature mismatch");
        return Err(unauthorized());
    }

    let event = match decode_card_event(&body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!("Card action not reconciled, acknowledging");
            return Ok(ack());
        }
        Err(e) => return Err(bad_request(format!("invalid webhook body: {}", e))),
    };

    match state.reconciler.handle_card_event(&event).await {
        Ok(outcome) => debug!(
            action = event.action_type(),
            card_id = %event.card_id(),
            ?outcome,
            "Card event reconciled"
        ),
        Err(e) => error!(
            action = event.action_type(),
            card_id = %event.card_id(),
            error = %format!("{:#}", e),
            "Card event failed"
        ),
    }
    Ok(ack())
}

// ============ POST /api/sns ============

async fn handle_sns(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, AppError> {
    let envelope: SnsEnvelope = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("invalid SNS envelope: {}", e)))?;

    if !state.sns.verify(&envelope).await {
        return Err(unauthorized());
    }

    match envelope.kind() {
        SnsMessageKind::SubscriptionConfirmation => confirm_subscription(&state, &envelope).await,
        SnsMessageKind::UnsubscribeConfirmation => {
            info!(topic_arn = %envelope.topic_arn, "SNS unsubscribe confirmed");
            Ok(ack())
        }
        SnsMessageKind::Notification => handle_notification(&state, &envelope).await,
        SnsMessageKind::Unknown => {
            warn!(message_type = %envelope.message_type, "Unknown SNS message type");
            Ok(ack())
        }
    }
}

async fn confirm_subscription(
    state: &AppState,
    envelope: &SnsEnvelope,
) -> Result<Json<Value>, AppError> {
    let raw = envelope
        .subscribe_url
        .as_deref()
        .ok_or_else(|| bad_request("SubscribeURL missing"))?;
    let url = validate_sns_url(raw, state.sns.cert_host_suffix(), false)
        .map_err(|e| bad_request(e.to_string()))?;

    match state.http.get(url).send().await {
        Ok(resp) if resp.status().is_success() => {
            info!(topic_arn = %envelope.topic_arn, "SNS subscription confirmed")
        }
        Ok(resp) => error!(
            topic_arn = %envelope.topic_arn,
            status = resp.status().as_u16(),
            "SNS subscription confirmation rejected"
        ),
        Err(e) => error!(
            topic_arn = %envelope.topic_arn,
            error = %e,
            "SNS subscription confirmation failed"
        ),
    }
    Ok(ack())
}

async fn handle_notification(
    state: &AppState,
    envelope: &SnsEnvelope,
) -> Result<Json<Value>, AppError> {
    let event = match decode_inbound_email(&envelope.message) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!(message_id = %envelope.message_id, "Notification is not a received email");
            return Ok(ack());
        }
        Err(e) => return Err(bad_request(format!("invalid SES notification: {}", e))),
    };

    match state.reconciler.handle_inbound_email(&event).await {
        Ok(outcome) => debug!(message_id = %envelope.message_id, ?outcome, "Email reconciled"),
        Err(e) => error!(
            message_id = %envelope.message_id,
            error = %format!("{:#}", e),
            "Inbound email failed"
        ),
    }
    Ok(ack())
}

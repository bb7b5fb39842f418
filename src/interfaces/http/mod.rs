//! HTTP and WebSocket surface.
//!
//! ## Endpoints
//!
//! - `POST /servers` - Provision a server and open its payment intent
//! - `GET /servers/{id}` - Current status of a server
//! - `POST /webhooks/payments` - Processor webhook, signed via `Processor-Signature`
//! - `GET /ws` - Live status subscriptions
//! - `GET /healthz` - Liveness

mod ws;

use crate::application::fanout::StatusFanout;
use crate::application::provisioning::{
    Pricing, ProvisionRequest, Provisioned, ProvisioningService,
};
use crate::application::reconciler::WebhookReconciler;
use crate::application::signature::WebhookVerifier;
use crate::domain::ports::{LedgerStoreRef, PaymentProcessorRef};
use crate::domain::server::{ServerId, ServerStatus};
use crate::error::{ProvisionError, ReconcileError, StoreError, ValidationErrors};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub const SIGNATURE_HEADER: &str = "processor-signature";

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    pub provisioning: Arc<ProvisioningService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub fanout: Arc<StatusFanout>,
}

impl AppState {
    /// Wires the use cases around one ledger store and one processor.
    pub fn new(
        store: LedgerStoreRef,
        processor: PaymentProcessorRef,
        pricing: Pricing,
        processor_timeout: Duration,
        verifier: WebhookVerifier,
    ) -> Self {
        let fanout = StatusFanout::new(Arc::clone(&store));
        let provisioning = Arc::new(ProvisioningService::new(
            Arc::clone(&store),
            processor,
            pricing,
            processor_timeout,
        ));
        let reconciler = Arc::new(WebhookReconciler::new(store, Arc::clone(&fanout), verifier));
        Self {
            provisioning,
            reconciler,
            fanout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/servers", post(create_server))
        .route("/servers/{id}", get(get_server_status))
        .route("/webhooks/payments", post(payment_webhook))
        .route("/ws", get(ws::upgrade))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<ValidationErrors>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub server_id: ServerId,
    pub status: ServerStatus,
}

pub enum ApiError {
    Provision(ProvisionError),
    Reconcile(ReconcileError),
    Store(StoreError),
    NotFound(String),
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        ApiError::Provision(err)
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        ApiError::Reconcile(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

fn store_status(err: &StoreError) -> (StatusCode, &'static str) {
    match err {
        StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
        StoreError::Duplicate(_) => (StatusCode::CONFLICT, "DUPLICATE"),
        StoreError::NotFound(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INCONSISTENT_LEDGER"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut fields = None;
        let (status, code) = match &self {
            ApiError::Provision(ProvisionError::Validation(errors)) => {
                fields = Some(errors.clone());
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST")
            }
            ApiError::Provision(ProvisionError::UpstreamPayment { .. }) => {
                (StatusCode::BAD_GATEWAY, "PAYMENT_PROCESSOR_ERROR")
            }
            ApiError::Provision(ProvisionError::Store(e)) | ApiError::Store(e) => store_status(e),
            ApiError::Reconcile(ReconcileError::Authentication(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE")
            }
            ApiError::Reconcile(ReconcileError::MalformedEvent(_)) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_EVENT")
            }
            // The webhook handler acknowledges conflicts before converting errors.
            ApiError::Reconcile(ReconcileError::Conflict(_)) => (StatusCode::OK, "CONFLICT"),
            ApiError::Reconcile(ReconcileError::NotYetProvisioned(_) | ReconcileError::Store(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "RETRY_LATER")
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        };

        let error = match &self {
            ApiError::Provision(e) => e.to_string(),
            ApiError::Reconcile(e) => e.to_string(),
            ApiError::Store(e) => e.to_string(),
            ApiError::NotFound(what) => format!("{what} not found"),
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code,
                fields,
            }),
        )
            .into_response()
    }
}

/// POST /servers
async fn create_server(
    State(state): State<AppState>,
    request: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Provisioned>), ApiError> {
    let Json(request) = request.map_err(|rejection| {
        let mut errors = ValidationErrors::default();
        errors.push("body", rejection.body_text());
        ApiError::Provision(ProvisionError::Validation(errors))
    })?;
    let provisioned = state.provisioning.provision(request).await?;
    Ok((StatusCode::CREATED, Json(provisioned)))
}

/// GET /servers/{id}
async fn get_server_status(
    State(state): State<AppState>,
    Path(server_id): Path<ServerId>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state
        .fanout
        .snapshot(server_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("server {server_id}")))?;
    Ok(Json(StatusResponse { server_id, status }))
}

/// POST /webhooks/payments
///
/// Takes the raw body; the signature covers the exact bytes sent.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state.reconciler.handle(&body, signature).await {
        Ok(reconciled) => {
            let mut body = serde_json::json!({ "received": true });
            if let (Some(map), Ok(serde_json::Value::Object(outcome))) =
                (body.as_object_mut(), serde_json::to_value(&reconciled))
            {
                map.extend(outcome);
            }
            Ok(Json(body))
        }
        Err(err) if err.acknowledge() => Ok(Json(serde_json::json!({
            "received": true,
            "outcome": "conflict",
            "error": err.to_string(),
        }))),
        Err(err) => Err(err.into()),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use chrono::Utc;
use gsp_billing::application::provisioning::{
    DEFAULT_CURRENCY, DEFAULT_TIER_PRICES, Pricing, ProvisionRequest, Provisioned,
};
use gsp_billing::application::signature::{DEFAULT_TOLERANCE, WebhookVerifier};
use gsp_billing::domain::payment::PaymentIntentRef;
use gsp_billing::domain::server::ServerId;
use gsp_billing::infrastructure::fake_processor::FakePaymentProcessor;
use gsp_billing::infrastructure::in_memory::InMemoryLedgerStore;
use gsp_billing::interfaces::http::{AppState, SIGNATURE_HEADER, router};
use gsp_billing::domain::payment::{Payment, PaymentId, PaymentStatus};
use gsp_billing::domain::ports::{ConditionalUpdate, LedgerStore};
use gsp_billing::domain::server::{Server, ServerStatus};
use gsp_billing::error::{StoreError, StoreResult};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tower::ServiceExt;

pub const SECRET: &str = "whsec_integration";

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<InMemoryLedgerStore>,
    pub processor: Arc<FakePaymentProcessor>,
}

/// In-memory ledger that can be switched into an outage.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryLedgerStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("ledger offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn create_server_and_payment(
        &self,
        server: Server,
        payment: Payment,
    ) -> StoreResult<(Server, Payment)> {
        self.check()?;
        self.inner.create_server_and_payment(server, payment).await
    }

    async fn attach_intent_reference(
        &self,
        payment_id: PaymentId,
        intent_ref: PaymentIntentRef,
    ) -> StoreResult<Payment> {
        self.check()?;
        self.inner.attach_intent_reference(payment_id, intent_ref).await
    }

    async fn conditional_update_payment_status(
        &self,
        intent_ref: &PaymentIntentRef,
        expected: PaymentStatus,
        new: PaymentStatus,
    ) -> StoreResult<ConditionalUpdate> {
        self.check()?;
        self.inner
            .conditional_update_payment_status(intent_ref, expected, new)
            .await
    }

    async fn get_server_status(&self, server_id: ServerId) -> StoreResult<Option<ServerStatus>> {
        self.check()?;
        self.inner.get_server_status(server_id).await
    }

    async fn get_server(&self, server_id: ServerId) -> StoreResult<Option<Server>> {
        self.check()?;
        self.inner.get_server(server_id).await
    }

    async fn get_payment_for_server(&self, server_id: ServerId) -> StoreResult<Option<Payment>> {
        self.check()?;
        self.inner.get_payment_for_server(server_id).await
    }
}

fn app_state(store: Arc<dyn LedgerStore>, processor: Arc<FakePaymentProcessor>) -> AppState {
    AppState::new(
        store,
        processor,
        Pricing::from_major(DEFAULT_TIER_PRICES, DEFAULT_CURRENCY).unwrap(),
        Duration::from_secs(2),
        WebhookVerifier::new(SECRET, DEFAULT_TOLERANCE),
    )
}

/// An app whose ledger can be taken offline; the store handle is returned
/// alongside.
pub fn flaky_app() -> (AppState, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let state = app_state(store.clone(), Arc::new(FakePaymentProcessor::new()));
    (state, store)
}

pub fn test_app() -> TestApp {
    let store = Arc::new(InMemoryLedgerStore::new());
    let processor = Arc::new(FakePaymentProcessor::new());
    let state = app_state(store.clone(), processor.clone());
    TestApp {
        state,
        store,
        processor,
    }
}

impl TestApp {
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub async fn provision(&self, game: &str, region: &str, tier: i64) -> Provisioned {
        self.state
            .provisioning
            .provision(ProvisionRequest::new("user-42", game, region, tier))
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        send_to(&self.state, request).await
    }
}

pub async fn send_to(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    read_json(response).await
}

pub async fn read_json(response: Response<Body>) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, json)
}

pub fn intent_of(provisioned: &Provisioned) -> PaymentIntentRef {
    provisioned.payment.intent_ref.clone().unwrap()
}

pub fn event_body(kind: &str, intent: &PaymentIntentRef, server_id: ServerId) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "type": kind,
        "data": {
            "paymentIntentReference": intent.as_str(),
            "metadata": {"serverId": server_id.to_string()}
        }
    }))
    .unwrap()
}

pub fn sign(body: &[u8]) -> String {
    WebhookVerifier::new(SECRET, DEFAULT_TOLERANCE).sign(body, Utc::now().timestamp())
}

pub fn webhook_request(body: Vec<u8>, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

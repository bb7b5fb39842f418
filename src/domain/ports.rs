use super::payment::{Amount, Payment, PaymentId, PaymentIntentRef, PaymentStatus};
use super::server::{Server, ServerId, ServerStatus};
use crate::error::{ProcessorError, StoreResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Result of a compare-and-set on a payment's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionalUpdate {
    /// Whether this call performed the transition.
    pub applied: bool,
    /// The payment status after the call.
    pub current: PaymentStatus,
    /// The server paired with the payment.
    pub server_id: ServerId,
}

/// Durable record of servers and their paired payments.
///
/// Implementations must make `create_server_and_payment` and
/// `conditional_update_payment_status` atomic: concurrent callers never
/// observe half of either write.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persists a server and its payment together, or neither.
    async fn create_server_and_payment(
        &self,
        server: Server,
        payment: Payment,
    ) -> StoreResult<(Server, Payment)>;

    /// Binds the processor's intent reference to a payment.
    async fn attach_intent_reference(
        &self,
        payment_id: PaymentId,
        intent_ref: PaymentIntentRef,
    ) -> StoreResult<Payment>;

    /// Sets the payment identified by `intent_ref` to `new` only if its status
    /// is currently `expected`. When applied, the paired server's status is
    /// derived from `new` and written in the same atomic step.
    async fn conditional_update_payment_status(
        &self,
        intent_ref: &PaymentIntentRef,
        expected: PaymentStatus,
        new: PaymentStatus,
    ) -> StoreResult<ConditionalUpdate>;

    async fn get_server_status(&self, server_id: ServerId) -> StoreResult<Option<ServerStatus>>;

    async fn get_server(&self, server_id: ServerId) -> StoreResult<Option<Server>>;

    async fn get_payment_for_server(&self, server_id: ServerId) -> StoreResult<Option<Payment>>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;

/// A freshly created payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub reference: PaymentIntentRef,
    /// Secret handed to the client to complete payment.
    pub client_token: String,
}

/// The external card-payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Creates an intent for `amount`, tagging it with `server_id` as
    /// processor-held metadata.
    async fn create_payment_intent(
        &self,
        amount: Amount,
        currency: &str,
        server_id: ServerId,
    ) -> Result<PaymentIntent, ProcessorError>;
}

pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;

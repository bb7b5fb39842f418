use crate::domain::payment::{Payment, PaymentId, PaymentIntentRef, PaymentStatus};
use crate::domain::ports::{ConditionalUpdate, LedgerStore};
use crate::domain::server::{Server, ServerId, ServerStatus};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Ledger {
    servers: HashMap<ServerId, Server>,
    payments: HashMap<PaymentId, Payment>,
    by_server: HashMap<ServerId, PaymentId>,
    by_intent: HashMap<PaymentIntentRef, PaymentId>,
}

/// A thread-safe in-memory ledger of servers and payments.
///
/// Both tables sit behind a single `RwLock` so paired writes are atomic. The
/// lock is only held for map operations, never across external I/O.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_server_and_payment(
        &self,
        server: Server,
        payment: Payment,
    ) -> StoreResult<(Server, Payment)> {
        debug_assert_eq!(payment.server_id, server.id);

        let mut ledger = self.ledger.write().await;
        if ledger.servers.contains_key(&server.id) {
            return Err(StoreError::Duplicate(format!("server {}", server.id)));
        }
        if ledger.payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate(format!("payment {}", payment.id)));
        }
        if let Some(intent_ref) = &payment.intent_ref {
            if ledger.by_intent.contains_key(intent_ref) {
                return Err(StoreError::Duplicate(format!("intent {intent_ref}")));
            }
            ledger.by_intent.insert(intent_ref.clone(), payment.id);
        }

        ledger.by_server.insert(server.id, payment.id);
        ledger.servers.insert(server.id, server.clone());
        ledger.payments.insert(payment.id, payment.clone());
        Ok((server, payment))
    }

    async fn attach_intent_reference(
        &self,
        payment_id: PaymentId,
        intent_ref: PaymentIntentRef,
    ) -> StoreResult<Payment> {
        let mut ledger = self.ledger.write().await;
        if let Some(owner) = ledger.by_intent.get(&intent_ref)
            && *owner != payment_id
        {
            return Err(StoreError::Duplicate(format!("intent {intent_ref}")));
        }

        let payment = ledger
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;
        let previous = payment.intent_ref.replace(intent_ref.clone());
        let updated = payment.clone();

        if let Some(previous) = previous {
            ledger.by_intent.remove(&previous);
        }
        ledger.by_intent.insert(intent_ref, payment_id);
        Ok(updated)
    }

    async fn conditional_update_payment_status(
        &self,
        intent_ref: &PaymentIntentRef,
        expected: PaymentStatus,
        new: PaymentStatus,
    ) -> StoreResult<ConditionalUpdate> {
        let mut guard = self.ledger.write().await;
        let ledger = &mut *guard;
        let payment_id = *ledger
            .by_intent
            .get(intent_ref)
            .ok_or_else(|| StoreError::NotFound(format!("intent {intent_ref}")))?;
        let payment = ledger
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;

        let server_id = payment.server_id;
        if payment.status != expected {
            return Ok(ConditionalUpdate {
                applied: false,
                current: payment.status,
                server_id,
            });
        }
        let server = ledger
            .servers
            .get_mut(&server_id)
            .ok_or_else(|| StoreError::NotFound(format!("server {server_id}")))?;
        payment.status = new;
        server.status = ServerStatus::from(new);

        Ok(ConditionalUpdate {
            applied: true,
            current: new,
            server_id,
        })
    }

    async fn get_server_status(&self, server_id: ServerId) -> StoreResult<Option<ServerStatus>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.servers.get(&server_id).map(|s| s.status))
    }

    async fn get_server(&self, server_id: ServerId) -> StoreResult<Option<Server>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.servers.get(&server_id).cloned())
    }

    async fn get_payment_for_server(&self, server_id: ServerId) -> StoreResult<Option<Payment>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .by_server
            .get(&server_id)
            .and_then(|id| ledger.payments.get(id))
            .cloned())
    }
}

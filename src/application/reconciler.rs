//! Applies processor payment outcomes to payments and their servers.
//!
//! Delivery is at-least-once and unordered, so every transition is a
//! compare-and-set against `requires_payment_method`. A payment leaves that
//! state at most once; every later event for it is either a replay (same
//! outcome) or a conflict (different outcome).

use super::fanout::StatusFanout;
use super::signature::WebhookVerifier;
use crate::domain::event::WebhookEvent;
use crate::domain::payment::{PaymentIntentRef, PaymentStatus};
use crate::domain::ports::LedgerStoreRef;
use crate::domain::server::{ServerId, ServerStatus};
use crate::error::{ReconcileError, ReconciliationConflict};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to an accepted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Reconciled {
    /// This event resolved the payment.
    Applied {
        server_id: ServerId,
        status: ServerStatus,
    },
    /// The payment was already resolved with this outcome.
    Replayed {
        server_id: ServerId,
        status: ServerStatus,
    },
    /// The event type carries no payment outcome.
    Ignored { event_type: String },
}

pub struct WebhookReconciler {
    store: LedgerStoreRef,
    fanout: Arc<StatusFanout>,
    verifier: WebhookVerifier,
}

impl WebhookReconciler {
    pub fn new(store: LedgerStoreRef, fanout: Arc<StatusFanout>, verifier: WebhookVerifier) -> Self {
        Self {
            store,
            fanout,
            verifier,
        }
    }

    /// Verifies, parses and applies one webhook delivery.
    ///
    /// Nothing is read or written before the signature over the raw body has
    /// been checked.
    pub async fn handle(&self, body: &[u8], signature: &str) -> Result<Reconciled, ReconcileError> {
        self.verifier.verify(body, signature).inspect_err(|e| {
            warn!(error = %e, "Rejected webhook with invalid signature");
        })?;

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| ReconcileError::MalformedEvent(e.to_string()))?;

        let result = self.reconcile(&event).await;
        match &result {
            Ok(outcome) => debug!(event_id = ?event.id, ?outcome, "Webhook reconciled"),
            Err(ReconcileError::Conflict(conflict)) => error!(
                event_id = ?event.id,
                event_type = %event.kind,
                %conflict,
                "Reconciliation conflict; acknowledging without changes"
            ),
            Err(e) => warn!(event_id = ?event.id, event_type = %event.kind, error = %e, "Webhook not processed; awaiting redelivery"),
        }
        result
    }

    async fn reconcile(&self, event: &WebhookEvent) -> Result<Reconciled, ReconcileError> {
        let Some(outcome) = event.outcome() else {
            return Ok(Reconciled::Ignored {
                event_type: event.kind.clone(),
            });
        };

        let intent_ref = event.data.payment_intent_reference.clone().ok_or_else(|| {
            ReconcileError::MalformedEvent("missing paymentIntentReference".to_string())
        })?;
        let server_id = event
            .data
            .metadata
            .server_id
            .as_deref()
            .ok_or_else(|| ReconcileError::MalformedEvent("missing metadata.serverId".into()))?
            .parse::<ServerId>()
            .map_err(|e| ReconcileError::MalformedEvent(format!("invalid metadata.serverId: {e}")))?;

        self.check_pairing(server_id, &intent_ref).await?;

        let update = self
            .store
            .conditional_update_payment_status(
                &intent_ref,
                PaymentStatus::RequiresPaymentMethod,
                outcome,
            )
            .await?;
        let status = ServerStatus::from(update.current);

        let reconciled = if update.applied {
            info!(
                intent = %intent_ref,
                server_id = %update.server_id,
                payment_status = %outcome,
                server_status = %status,
                "Payment resolved"
            );
            Reconciled::Applied {
                server_id: update.server_id,
                status,
            }
        } else if update.current == outcome {
            debug!(intent = %intent_ref, payment_status = %outcome, "Duplicate payment event");
            Reconciled::Replayed {
                server_id: update.server_id,
                status,
            }
        } else {
            return Err(ReconciliationConflict::OutcomeMismatch {
                intent_ref,
                resolved: update.current,
                incoming: outcome,
            }
            .into());
        };

        self.fanout.publish(update.server_id, status);
        Ok(reconciled)
    }

    /// Ensures the server named in the processor metadata is the one paired
    /// with the event's intent.
    async fn check_pairing(
        &self,
        server_id: ServerId,
        intent_ref: &PaymentIntentRef,
    ) -> Result<(), ReconcileError> {
        let payment = self
            .store
            .get_payment_for_server(server_id)
            .await?
            .ok_or(ReconciliationConflict::UnknownServer(server_id))?;

        match payment.intent_ref {
            Some(expected) if expected == *intent_ref => Ok(()),
            Some(expected) => Err(ReconciliationConflict::MetadataMismatch {
                server_id,
                expected,
                received: intent_ref.clone(),
            }
            .into()),
            None => Err(ReconcileError::NotYetProvisioned(server_id)),
        }
    }
}

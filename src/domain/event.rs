//! Payment-outcome events as delivered by the processor's webhook.

use super::payment::{PaymentIntentRef, PaymentStatus};
use serde::Deserialize;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const PAYMENT_CANCELED: &str = "payment_intent.canceled";
pub const PAYMENT_EXPIRED: &str = "payment_intent.expired";

/// Metadata key under which the server id is attached to a payment intent and
/// echoed back in `data.metadata`.
pub const SERVER_ID_METADATA_KEY: &str = "serverId";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub payment_intent_reference: Option<PaymentIntentRef>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// Metadata attached at intent creation. The processor echoes it back untouched.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub server_id: Option<String>,
}

impl WebhookEvent {
    /// The resolved payment status this event reports, or `None` for event
    /// types that carry no payment outcome.
    pub fn outcome(&self) -> Option<PaymentStatus> {
        match self.kind.as_str() {
            PAYMENT_SUCCEEDED => Some(PaymentStatus::Succeeded),
            PAYMENT_FAILED | PAYMENT_CANCELED | PAYMENT_EXPIRED => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

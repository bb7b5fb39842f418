use crate::domain::payment::{PaymentIntentRef, PaymentStatus};
use crate::domain::server::ServerId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by a ledger store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Duplicate(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Failures talking to the payment processor.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("payment processor did not answer within {0:?}")]
    Timeout(Duration),
    #[error("payment processor unreachable: {0}")]
    Transport(String),
    #[error("payment processor rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected payment processor response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// All offending fields of a rejected provisioning request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|e| e.field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", err.field, err.message)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("invalid request: {0}")]
    Validation(ValidationErrors),
    /// The server and payment were recorded but no intent could be obtained.
    #[error("payment processor error for server {server_id}: {source}")]
    UpstreamPayment {
        server_id: ServerId,
        #[source]
        source: ProcessorError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// Contradictory input for a payment that can never be resolved by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationConflict {
    #[error("payment intent {intent_ref} already resolved as {resolved}, event reports {incoming}")]
    OutcomeMismatch {
        intent_ref: PaymentIntentRef,
        resolved: PaymentStatus,
        incoming: PaymentStatus,
    },
    #[error("server {server_id} is paired with intent {expected}, event carries {received}")]
    MetadataMismatch {
        server_id: ServerId,
        expected: PaymentIntentRef,
        received: PaymentIntentRef,
    },
    #[error("event references unknown server {0}")]
    UnknownServer(ServerId),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("webhook authentication failed: {0}")]
    Authentication(#[from] SignatureError),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("reconciliation conflict: {0}")]
    Conflict(#[from] ReconciliationConflict),
    #[error("payment for server {0} has no intent reference yet")]
    NotYetProvisioned(ServerId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Whether the processor should consider the event consumed.
    ///
    /// Conflicts are acknowledged: redelivery cannot fix them. Everything else
    /// is rejected so the processor redelivers.
    pub fn acknowledge(&self) -> bool {
        matches!(self, ReconcileError::Conflict(_))
    }
}

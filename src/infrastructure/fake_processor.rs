use crate::domain::payment::{Amount, PaymentIntentRef};
use crate::domain::ports::{PaymentIntent, PaymentProcessor};
use crate::domain::server::ServerId;
use crate::error::ProcessorError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// An intent as recorded by [`FakePaymentProcessor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedIntent {
    pub amount: Amount,
    pub currency: String,
    pub server_id: ServerId,
}

/// Local stand-in for the card processor.
///
/// Issues `pi_<uuid>` references and remembers the metadata each one was
/// tagged with, so webhook events can be forged against it in development.
#[derive(Default, Clone)]
pub struct FakePaymentProcessor {
    intents: Arc<DashMap<PaymentIntentRef, IssuedIntent>>,
    unavailable: Arc<AtomicBool>,
}

impl FakePaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent calls fail as if the processor were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn issued(&self, reference: &PaymentIntentRef) -> Option<IssuedIntent> {
        self.intents.get(reference).map(|entry| entry.value().clone())
    }

    pub fn issued_count(&self) -> usize {
        self.intents.len()
    }
}

#[async_trait]
impl PaymentProcessor for FakePaymentProcessor {
    async fn create_payment_intent(
        &self,
        amount: Amount,
        currency: &str,
        server_id: ServerId,
    ) -> Result<PaymentIntent, ProcessorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProcessorError::Transport("fake processor offline".into()));
        }

        let id = Uuid::new_v4().simple().to_string();
        let reference = PaymentIntentRef::new(format!("pi_{id}"));
        self.intents.insert(
            reference.clone(),
            IssuedIntent {
                amount,
                currency: currency.to_string(),
                server_id,
            },
        );

        Ok(PaymentIntent {
            client_token: format!("{reference}_secret_{}", &id[..8]),
            reference,
        })
    }
}

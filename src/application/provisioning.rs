use crate::domain::payment::{Amount, AmountError, Payment};
use crate::domain::ports::{LedgerStoreRef, PaymentProcessorRef};
use crate::domain::server::{GameType, PackageTier, Region, Server};
use crate::error::{ProcessorError, ProvisionError, ValidationErrors};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_TIER_PRICES: [Decimal; 3] = [dec!(3.00), dec!(5.00), dec!(10.00)];
pub const DEFAULT_CURRENCY: &str = "eur";

/// Tier → price table, in minor units of a single currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pricing {
    tiers: [Amount; 3],
    currency: String,
}

impl Pricing {
    pub fn new(tiers: [Amount; 3], currency: impl Into<String>) -> Self {
        Self {
            tiers,
            currency: currency.into().to_ascii_lowercase(),
        }
    }

    /// Builds the table from major-unit prices such as `5.00`.
    pub fn from_major(prices: [Decimal; 3], currency: impl Into<String>) -> Result<Self, AmountError> {
        let [one, two, three] = prices;
        Ok(Self::new(
            [
                Amount::from_major(one)?,
                Amount::from_major(two)?,
                Amount::from_major(three)?,
            ],
            currency,
        ))
    }

    pub fn price(&self, tier: PackageTier) -> Amount {
        self.tiers[usize::from(tier.value() - PackageTier::MIN)]
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

/// An incoming server request, not yet validated.
///
/// Fields are kept as raw JSON so that missing or mistyped values are reported
/// per field by `validate` rather than failing deserialization as a whole.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub game: Option<Value>,
    #[serde(default)]
    pub region: Option<Value>,
    #[serde(default)]
    pub tier: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provisioned {
    pub server: Server,
    pub payment: Payment,
    pub client_token: String,
}

struct ValidRequest {
    user_id: String,
    game: GameType,
    region: Region,
    tier: PackageTier,
}

impl ProvisionRequest {
    pub fn new(
        user_id: impl Into<String>,
        game: impl Into<String>,
        region: impl Into<String>,
        tier: i64,
    ) -> Self {
        Self {
            user_id: Some(Value::String(user_id.into())),
            game: Some(Value::String(game.into())),
            region: Some(Value::String(region.into())),
            tier: Some(Value::from(tier)),
        }
    }

    fn validate(self) -> Result<ValidRequest, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let user_id = match string_field(&mut errors, "userId", self.user_id) {
            Some(id) if id.trim().is_empty() => {
                errors.push("userId", "must not be empty");
                None
            }
            other => other.map(|id| id.trim().to_string()),
        };
        let game = string_field(&mut errors, "game", self.game).and_then(|game| {
            let parsed = game.parse::<GameType>().ok();
            if parsed.is_none() {
                errors.push("game", format!("unknown game '{game}'"));
            }
            parsed
        });
        let region = string_field(&mut errors, "region", self.region).and_then(|region| {
            let parsed = region.parse::<Region>().ok();
            if parsed.is_none() {
                errors.push("region", format!("unknown region '{region}'"));
            }
            parsed
        });
        let tier = match self.tier {
            None | Some(Value::Null) => {
                errors.push("tier", "is required");
                None
            }
            Some(value) => {
                let tier = value
                    .as_i64()
                    .and_then(|t| u8::try_from(t).ok())
                    .and_then(PackageTier::new);
                if tier.is_none() {
                    errors.push("tier", "must be 1, 2 or 3");
                }
                tier
            }
        };

        match (user_id, game, region, tier) {
            (Some(user_id), Some(game), Some(region), Some(tier)) if errors.is_empty() => {
                Ok(ValidRequest {
                    user_id,
                    game,
                    region,
                    tier,
                })
            }
            _ => Err(errors),
        }
    }
}

fn string_field(
    errors: &mut ValidationErrors,
    field: &'static str,
    value: Option<Value>,
) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s),
        None | Some(Value::Null) => {
            errors.push(field, "is required");
            None
        }
        Some(_) => {
            errors.push(field, "must be a string");
            None
        }
    }
}

/// Creates server/payment pairs and obtains their payment intents.
pub struct ProvisioningService {
    store: LedgerStoreRef,
    processor: PaymentProcessorRef,
    pricing: Pricing,
    processor_timeout: Duration,
}

impl ProvisioningService {
    pub fn new(
        store: LedgerStoreRef,
        processor: PaymentProcessorRef,
        pricing: Pricing,
        processor_timeout: Duration,
    ) -> Self {
        Self {
            store,
            processor,
            pricing,
            processor_timeout,
        }
    }

    /// Validates the request, persists the `installing` server with its
    /// unresolved payment, and asks the processor for an intent.
    ///
    /// On processor failure the records stay in their initial states.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let request = request.validate().map_err(ProvisionError::Validation)?;

        let amount = self.pricing.price(request.tier);
        let server = Server::new(request.user_id, request.game, request.region, request.tier);
        let payment = Payment::new(server.id, amount, self.pricing.currency());
        let (server, payment) = self.store.create_server_and_payment(server, payment).await?;

        let intent = tokio::time::timeout(
            self.processor_timeout,
            self.processor
                .create_payment_intent(amount, self.pricing.currency(), server.id),
        )
        .await
        .unwrap_or_else(|_| Err(ProcessorError::Timeout(self.processor_timeout)))
        .map_err(|e| {
            warn!(server_id = %server.id, payment_id = %payment.id, error = %e, "Payment intent creation failed");
            ProvisionError::UpstreamPayment {
                server_id: server.id,
                source: e,
            }
        })?;

        let payment = self
            .store
            .attach_intent_reference(payment.id, intent.reference)
            .await?;

        info!(
            server_id = %server.id,
            user_id = %server.user_id,
            game = server.game.as_str(),
            region = server.region.as_str(),
            tier = server.tier.value(),
            amount = %amount,
            "Server provisioned, awaiting payment"
        );

        Ok(Provisioned {
            server,
            payment,
            client_token: intent.client_token,
        })
    }
}

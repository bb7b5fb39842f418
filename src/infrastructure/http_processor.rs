use crate::domain::event::SERVER_ID_METADATA_KEY;
use crate::domain::payment::{Amount, PaymentIntentRef};
use crate::domain::ports::{PaymentIntent, PaymentProcessor};
use crate::domain::server::ServerId;
use crate::error::ProcessorError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Payment processor client speaking the processor's form-encoded REST API.
///
/// Every request is bounded by `timeout`; a slow processor surfaces as
/// [`ProcessorError::Timeout`] rather than being retried here.
#[derive(Clone)]
pub struct HttpPaymentProcessor {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    timeout: Duration,
}

impl HttpPaymentProcessor {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            timeout,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> ProcessorError {
        if err.is_timeout() {
            ProcessorError::Timeout(self.timeout)
        } else {
            ProcessorError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn create_payment_intent(
        &self,
        amount: Amount,
        currency: &str,
        server_id: ServerId,
    ) -> Result<PaymentIntent, ProcessorError> {
        let amount = amount.minor_units().to_string();
        let server_id = server_id.to_string();
        let metadata_key = format!("metadata[{SERVER_ID_METADATA_KEY}]");
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency),
            (metadata_key.as_str(), server_id.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", server_id.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), %message, "Payment intent creation rejected");
            return Err(ProcessorError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let intent: IntentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProcessorError::Timeout(self.timeout)
            } else {
                ProcessorError::InvalidResponse(e.to_string())
            }
        })?;
        debug!(intent = %intent.id, server_id = %server_id, "Payment intent created");

        Ok(PaymentIntent {
            reference: PaymentIntentRef::new(intent.id),
            client_token: intent.client_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::WebhookEvent;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_create_payment_intent_success() {
        let mock_server = MockServer::start().await;
        let server_id = ServerId::new();

        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("authorization", "Bearer sk_test"))
            .and(body_string_contains("amount=500"))
            .and(body_string_contains("currency=eur"))
            .and(body_string_contains(server_id.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_abc",
                "client_secret": "pi_abc_secret_xyz"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let processor =
            HttpPaymentProcessor::new(mock_server.uri(), "sk_test", Duration::from_secs(5))
                .unwrap();
        let intent = processor
            .create_payment_intent(Amount::new(500).unwrap(), "eur", server_id)
            .await
            .unwrap();

        assert_eq!(intent.reference, PaymentIntentRef::new("pi_abc"));
        assert_eq!(intent.client_token, "pi_abc_secret_xyz");
    }

    /// Decodes the `metadata[...]` pairs of a form body into a JSON object,
    /// the shape the processor echoes back in webhook events.
    fn echoed_metadata(form: &str) -> serde_json::Map<String, serde_json::Value> {
        form.split('&')
            .filter_map(|pair| pair.split_once('='))
            .filter_map(|(key, value)| {
                let key = key.replace("%5B", "[").replace("%5D", "]");
                let inner = key.strip_prefix("metadata[")?.strip_suffix(']')?;
                Some((inner.to_string(), serde_json::Value::String(value.to_string())))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_metadata_survives_webhook_round_trip() {
        let mock_server = MockServer::start().await;
        let server_id = ServerId::new();

        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_echo",
                "client_secret": "pi_echo_secret"
            })))
            .mount(&mock_server)
            .await;

        let processor =
            HttpPaymentProcessor::new(mock_server.uri(), "sk_test", Duration::from_secs(5))
                .unwrap();
        processor
            .create_payment_intent(Amount::new(500).unwrap(), "eur", server_id)
            .await
            .unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let form = String::from_utf8(requests[0].body.clone()).unwrap();
        let metadata = echoed_metadata(&form);
        assert_eq!(metadata.len(), 1, "{form}");

        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": {"paymentIntentReference": "pi_echo", "metadata": metadata}
        }))
        .unwrap();
        assert_eq!(
            event.data.metadata.server_id.as_deref(),
            Some(server_id.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_create_payment_intent_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": {"message": "card declined"}
            })))
            .mount(&mock_server)
            .await;

        let processor =
            HttpPaymentProcessor::new(mock_server.uri(), "sk_test", Duration::from_secs(5))
                .unwrap();
        let err = processor
            .create_payment_intent(Amount::new(300).unwrap(), "eur", ServerId::new())
            .await
            .unwrap_err();

        match err {
            ProcessorError::Rejected { status, message } => {
                assert_eq!(status, 402);
                assert_eq!(message, "card declined");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_payment_intent_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(serde_json::json!({"id": "pi_late", "client_secret": "s"})),
            )
            .mount(&mock_server)
            .await;

        let processor =
            HttpPaymentProcessor::new(mock_server.uri(), "sk_test", Duration::from_millis(100))
                .unwrap();
        let err = processor
            .create_payment_intent(Amount::new(300).unwrap(), "eur", ServerId::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Timeout(_)), "{err:?}");
    }
}

//! Stripe payment gateway client.
//!
//! Implements the payment-intent lifecycle used by the purchase flow:
//! intent creation, intent retrieval, and refunds. Stripe's API takes
//! form-encoded bodies and authenticates with a bearer secret key.

use crate::config::StripeConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request timed out. The gateway-side outcome is unknown; callers
    /// must not treat this as a failure.
    #[error("payment gateway timed out")]
    Timeout,
    #[error("payment gateway error: {0}")]
    Api(String),
    #[error("unexpected gateway response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Api(err.to_string())
        }
    }
}

/// Parties tagged onto a payment intent at creation time, so a later
/// confirmation can be reconciled without a separate lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentMetadata {
    pub book_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
}

impl IntentMetadata {
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, GatewayError> {
        let parse = |key: &str| -> Result<Uuid, GatewayError> {
            map.get(key)
                .and_then(|v| Uuid::parse_str(v).ok())
                .ok_or_else(|| {
                    GatewayError::Malformed(format!("intent metadata missing or invalid: {}", key))
                })
        };
        Ok(Self {
            book_id: parse("book_id")?,
            buyer_id: parse("buyer_id")?,
            seller_id: parse("seller_id")?,
        })
    }
}

/// A gateway-side payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Secret handed to the browser client to drive the checkout UI.
    pub client_secret: Option<String>,
    /// Gateway lifecycle status; only `succeeded` is terminal-success.
    pub status: String,
    /// Amount in the smallest currency unit (cents for USD).
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Populated by the gateway after a declined attempt.
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
}

/// Error detail the gateway attaches to a failed payment attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentError {
    pub message: Option<String>,
    pub code: Option<String>,
}

pub const INTENT_STATUS_SUCCEEDED: &str = "succeeded";

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: Option<String>,
}

/// Stripe API error envelope.
#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    code: Option<String>,
    message: Option<String>,
}

/// Seam between the transaction coordinator and the hosted processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount_minor: u64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn create_refund(&self, payment_intent_id: &str) -> Result<Refund, GatewayError>;
}

/// Stripe client for interacting with the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Check if Stripe is configured (secret key is set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, context = %context, "Stripe response");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                GatewayError::Malformed(format!("{}: {} (body: {})", context, e, body))
            })
        } else {
            let message = match serde_json::from_str::<StripeErrorBody>(&body) {
                Ok(err) => {
                    tracing::error!(
                        kind = %err.error.kind,
                        code = ?err.error.code,
                        context = %context,
                        "Stripe API error"
                    );
                    err.error
                        .message
                        .unwrap_or_else(|| format!("{} failed with status {}", context, status))
                }
                Err(_) => format!("{} failed with status {}: {}", context, status, body),
            };
            Err(GatewayError::Api(message))
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    /// Open a payment intent for `amount_minor`, tagging it with the
    /// transacting parties.
    async fn create_intent(
        &self,
        amount_minor: u64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::Api(
                "Stripe credentials not configured".to_string(),
            ));
        }

        let url = format!("{}/payment_intents", self.config.api_base_url);
        let form = [
            ("amount", amount_minor.to_string()),
            ("currency", currency.to_string()),
            ("metadata[book_id]", metadata.book_id.to_string()),
            ("metadata[buyer_id]", metadata.buyer_id.to_string()),
            ("metadata[seller_id]", metadata.seller_id.to_string()),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .form(&form)
            .send()
            .await?;

        let intent: PaymentIntent = self.parse_response(response, "create_intent").await?;
        tracing::info!(
            intent_id = %intent.id,
            amount = intent.amount,
            currency = %intent.currency,
            "Stripe payment intent created"
        );
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::Api(
                "Stripe credentials not configured".to_string(),
            ));
        }

        let url = format!("{}/payment_intents/{}", self.config.api_base_url, intent_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await?;

        self.parse_response(response, "retrieve_intent").await
    }

    async fn create_refund(&self, payment_intent_id: &str) -> Result<Refund, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::Api(
                "Stripe credentials not configured".to_string(),
            ));
        }

        let url = format!("{}/refunds", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .form(&[("payment_intent", payment_intent_id)])
            .send()
            .await?;

        let refund: Refund = self.parse_response(response, "create_refund").await?;
        tracing::info!(
            refund_id = %refund.id,
            payment_intent_id = %payment_intent_id,
            "Stripe refund created"
        );
        Ok(refund)
    }
}

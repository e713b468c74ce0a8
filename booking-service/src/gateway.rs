//! Payment Gateway Adapter.
//!
//! Holds no local state and never retries; the lifecycle service owns the
//! timeout and retry policy.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::{Client, StatusCode};
use shared::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Fails with `InvalidAmount` when `amount <= 0` and
    /// `GatewayUnavailable` when the provider cannot be reached.
    async fn create_intent(
        &self,
        reservation_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<CreatedIntent, BookingError>;

    /// Fails with `IntentNotFound` when the provider does not know `intent_id`.
    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, BookingError>;
}

fn checked_minor_units(amount: &BigDecimal) -> Result<i64, BookingError> {
    match to_minor_units(amount) {
        Some(minor) if minor > 0 => Ok(minor),
        _ => Err(BookingError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        ))),
    }
}

/// Client for a provider speaking the `/v1/payment_intents` REST contract.
#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn unavailable(err: reqwest::Error) -> BookingError {
        BookingError::GatewayUnavailable(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_intent(
        &self,
        reservation_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<CreatedIntent, BookingError> {
        let params = CreateIntentParams {
            amount: checked_minor_units(amount)?,
            currency: currency.to_string(),
            metadata: IntentMetadata {
                reservation_id: Some(reservation_id),
            },
        };

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&params)
            .send()
            .await
            .map_err(Self::unavailable)?;

        match response.status() {
            status if status.is_success() => {
                let intent: GatewayIntent = response.json().await.map_err(Self::unavailable)?;
                let client_secret = intent.client_secret.ok_or_else(|| {
                    BookingError::GatewayUnavailable(format!(
                        "intent {} returned without a client secret",
                        intent.id
                    ))
                })?;
                Ok(CreatedIntent {
                    intent_id: intent.id,
                    client_secret,
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await.unwrap_or_default();
                Err(BookingError::InvalidAmount(body))
            }
            status => {
                warn!("Gateway rejected intent creation with {}", status);
                Err(BookingError::GatewayUnavailable(format!(
                    "gateway responded {}",
                    status
                )))
            }
        }
    }

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, BookingError> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.base_url, intent_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::unavailable)?;

        match response.status() {
            status if status.is_success() => {
                let intent: GatewayIntent = response.json().await.map_err(Self::unavailable)?;
                Ok(intent.into())
            }
            StatusCode::NOT_FOUND => Err(BookingError::IntentNotFound(intent_id.to_string())),
            status => {
                warn!("Gateway lookup of intent {} failed with {}", intent_id, status);
                Err(BookingError::GatewayUnavailable(format!(
                    "gateway responded {}",
                    status
                )))
            }
        }
    }
}

/// In-process gateway double. Intents start unsettled; tests drive them
/// with [`InMemoryGateway::settle`].
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    intents: Arc<RwLock<HashMap<String, PaymentIntent>>>,
    fail_next: Arc<RwLock<bool>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call fail with `GatewayUnavailable`.
    pub async fn set_fail_next(&self, fail: bool) {
        *self.fail_next.write().await = fail;
    }

    pub async fn settle(&self, intent_id: &str, status: IntentStatus) {
        if let Some(intent) = self.intents.write().await.get_mut(intent_id) {
            intent.status = status;
        }
    }

    /// Overrides the amount the gateway reports for an intent.
    pub async fn report_amount(&self, intent_id: &str, amount: BigDecimal) {
        if let Some(intent) = self.intents.write().await.get_mut(intent_id) {
            intent.amount = amount;
        }
    }

    /// Overrides the reservation named in an intent's metadata.
    pub async fn report_reservation(&self, intent_id: &str, reservation_id: Option<Uuid>) {
        if let Some(intent) = self.intents.write().await.get_mut(intent_id) {
            intent.reservation_id = reservation_id;
        }
    }

    pub async fn intent_count(&self) -> usize {
        self.intents.read().await.len()
    }

    async fn take_failure(&self) -> Result<(), BookingError> {
        let mut fail = self.fail_next.write().await;
        if *fail {
            *fail = false;
            return Err(BookingError::GatewayUnavailable(
                "gateway configured to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn create_intent(
        &self,
        reservation_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<CreatedIntent, BookingError> {
        self.take_failure().await?;
        checked_minor_units(amount)?;

        let id = format!("pi_mem_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            id: id.clone(),
            amount: amount.clone(),
            currency: currency.to_string(),
            status: IntentStatus::RequiresPaymentMethod,
            payment_method: Some("card".to_string()),
            reservation_id: Some(reservation_id),
        };
        self.intents.write().await.insert(id.clone(), intent);

        Ok(CreatedIntent {
            client_secret: format!("{}_secret", id),
            intent_id: id,
        })
    }

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, BookingError> {
        self.take_failure().await?;
        self.intents
            .read()
            .await
            .get(intent_id)
            .cloned()
            .ok_or_else(|| BookingError::IntentNotFound(intent_id.to_string()))
    }
}

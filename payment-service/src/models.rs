use serde::Deserialize;
use shared::*;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmParams {
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("unsupported currency {0:?}")]
    InvalidCurrency(String),
    #[error("no such payment intent: {0}")]
    NotFound(String),
    #[error("payment intent {id} is already {status:?}")]
    AlreadySettled { id: String, status: IntentStatus },
}

/// Intents held by the sandbox. Nothing is persisted; a restart forgets them.
#[derive(Clone, Default)]
pub struct IntentLedger {
    intents: Arc<RwLock<HashMap<String, GatewayIntent>>>,
}

impl IntentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, params: CreateIntentParams) -> Result<GatewayIntent, LedgerError> {
        if params.amount <= 0 {
            return Err(LedgerError::InvalidAmount(params.amount));
        }
        let currency = params.currency.to_lowercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LedgerError::InvalidCurrency(params.currency));
        }

        let id = format!("pi_{}", Uuid::new_v4().simple());
        let intent = GatewayIntent {
            client_secret: Some(format!("{}_secret_{}", id, Uuid::new_v4().simple())),
            id: id.clone(),
            amount: params.amount,
            currency,
            status: IntentStatus::RequiresPaymentMethod,
            payment_method: None,
            metadata: params.metadata,
        };
        self.intents.write().await.insert(id, intent.clone());
        Ok(intent)
    }

    pub async fn get(&self, id: &str) -> Result<GatewayIntent, LedgerError> {
        self.intents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    /// Moves an unsettled intent to `status`. Settled intents are left alone.
    pub async fn settle(
        &self,
        id: &str,
        status: IntentStatus,
        payment_method: Option<String>,
    ) -> Result<GatewayIntent, LedgerError> {
        let mut intents = self.intents.write().await;
        let intent = intents
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        if intent.status.is_settled() {
            return Err(LedgerError::AlreadySettled {
                id: id.to_string(),
                status: intent.status,
            });
        }

        intent.status = status;
        if payment_method.is_some() {
            intent.payment_method = payment_method;
        }
        Ok(intent.clone())
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.intents.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(amount: i64) -> CreateIntentParams {
        CreateIntentParams {
            amount,
            currency: "BRL".to_string(),
            metadata: IntentMetadata {
                reservation_id: Some(Uuid::new_v4()),
            },
        }
    }

    #[tokio::test]
    async fn create_starts_unsettled() {
        let ledger = IntentLedger::new();
        let intent = ledger.create(params(80000)).await.unwrap();

        assert!(intent.id.starts_with("pi_"));
        assert_eq!(intent.currency, "brl");
        assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
        assert!(intent.client_secret.as_deref().unwrap().starts_with(&intent.id));
        assert_eq!(ledger.get(&intent.id).await.unwrap().amount, 80000);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_refused() {
        let ledger = IntentLedger::new();
        assert_eq!(ledger.create(params(0)).await, Err(LedgerError::InvalidAmount(0)));
        assert_eq!(ledger.create(params(-5)).await, Err(LedgerError::InvalidAmount(-5)));
        assert_eq!(ledger.len().await, 0);
    }

    #[tokio::test]
    async fn settled_intents_stay_settled() {
        let ledger = IntentLedger::new();
        let intent = ledger.create(params(1000)).await.unwrap();

        let settled = ledger
            .settle(&intent.id, IntentStatus::Failed, Some("card".to_string()))
            .await
            .unwrap();
        assert_eq!(settled.status, IntentStatus::Failed);
        assert_eq!(settled.payment_method.as_deref(), Some("card"));

        let again = ledger.settle(&intent.id, IntentStatus::Succeeded, None).await;
        assert!(matches!(again, Err(LedgerError::AlreadySettled { .. })));
        assert_eq!(ledger.get(&intent.id).await.unwrap().status, IntentStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_intent() {
        let ledger = IntentLedger::new();
        assert_eq!(
            ledger.get("pi_missing").await,
            Err(LedgerError::NotFound("pi_missing".to_string()))
        );
    }
    #[tokio::test]
    async fn refusals_explain_themselves() {
        let ledger = IntentLedger::new();
        let mut bad_currency = params(100);
        bad_currency.currency = "reais".to_string();
        let err = ledger.create(bad_currency).await.unwrap_err();
        assert_eq!(err.to_string(), "unsupported currency \"reais\"");

        let intent = ledger.create(params(100)).await.unwrap();
        ledger.settle(&intent.id, IntentStatus::Canceled, None).await.unwrap();
        let err = ledger.settle(&intent.id, IntentStatus::Succeeded, None).await.unwrap_err();
        assert_eq!(err.to_string(), format!("payment intent {} is already Canceled", intent.id));
        assert_eq!(LedgerError::InvalidAmount(-1).to_string(), "amount must be positive, got -1");
    }
}

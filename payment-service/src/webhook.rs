use anyhow::{bail, Result};
use reqwest::Client;
use shared::signature::{sign_payload, SIGNATURE_HEADER};
use shared::*;
use tracing::{error, info};
use uuid::Uuid;

/// Posts signed settlement events to the booking service.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
    secret: String,
}

pub fn event_type(status: IntentStatus) -> &'static str {
    match status {
        IntentStatus::Succeeded => "payment_intent.succeeded",
        IntentStatus::Failed => "payment_intent.payment_failed",
        IntentStatus::Canceled => "payment_intent.canceled",
        _ => "payment_intent.updated",
    }
}

pub fn build_event(intent: &GatewayIntent, created: i64) -> WebhookEvent {
    WebhookEvent {
        id: format!("evt_{}", Uuid::new_v4().simple()),
        event_type: event_type(intent.status).to_string(),
        data: intent.clone(),
        created,
    }
}

impl WebhookNotifier {
    pub fn new(url: String, secret: String) -> Self {
        Self {
            http: Client::new(),
            url,
            secret,
        }
    }

    pub async fn notify(&self, intent: &GatewayIntent) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let event = build_event(intent, now);
        let body = serde_json::to_vec(&event)?;
        let signature = sign_payload(&body, &self.secret, now)?;

        let response = self
            .http
            .post(&self.url)
            .header(SIGNATURE_HEADER, signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("webhook {} answered {}", event.id, response.status());
        }
        info!("Delivered {} for intent {}", event.event_type, intent.id);
        Ok(())
    }

    /// Fire and forget; delivery failures are only logged.
    pub fn spawn_notify(&self, intent: GatewayIntent) {
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&intent).await {
                error!("Failed to deliver webhook for intent {}: {}", intent.id, e);
            }
        });
    }
}

mod handlers;
mod models;
mod webhook;

use anyhow::{bail, Result};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handlers::SandboxState;
use crate::models::IntentLedger;
use crate::webhook::WebhookNotifier;

/// Sandbox payment provider speaking the `/v1/payment_intents` contract.
#[derive(Parser)]
#[command(name = "payment-service")]
struct Args {
    #[arg(long, env = "PORT", default_value = "3002")]
    port: u16,

    #[arg(long, env = "SUCCESS_RATE", default_value = "0.8")]
    success_rate: f64,

    #[arg(long, env = "GATEWAY_API_KEY")]
    api_key: Option<String>,

    /// Where settlement events are posted, e.g. http://localhost:3001/webhooks/payment
    #[arg(long, env = "WEBHOOK_URL")]
    webhook_url: Option<String>,

    #[arg(long, env = "WEBHOOK_SECRET")]
    webhook_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if !(0.0..=1.0).contains(&args.success_rate) {
        bail!("SUCCESS_RATE must be within [0, 1], got {}", args.success_rate);
    }

    let notifier = match (args.webhook_url, args.webhook_secret) {
        (Some(url), Some(secret)) => {
            info!("Posting settlement webhooks to {}", url);
            Some(WebhookNotifier::new(url, secret))
        }
        (Some(_), None) => bail!("WEBHOOK_URL requires WEBHOOK_SECRET"),
        _ => None,
    };

    let state = SandboxState {
        ledger: IntentLedger::new(),
        success_rate: args.success_rate,
        api_key: args.api_key,
        notifier,
    };
    let app = handlers::router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!("Payment sandbox listening on port {}", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}

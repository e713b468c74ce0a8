use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use shared::*;
use tracing::{info, warn};

use crate::models::*;
use crate::webhook::WebhookNotifier;

#[derive(Clone)]
pub struct SandboxState {
    pub ledger: IntentLedger,
    /// Probability, in `[0, 1]`, that a confirmation succeeds.
    pub success_rate: f64,
    /// Bearer token callers must present; any token is accepted when unset.
    pub api_key: Option<String>,
    pub notifier: Option<WebhookNotifier>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

fn error_response(err: LedgerError) -> ApiError {
    let status = match &err {
        LedgerError::InvalidAmount(_) | LedgerError::InvalidCurrency(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::AlreadySettled { .. } => StatusCode::CONFLICT,
    };
    (status, Json(ErrorResponse { error: err.to_string() }))
}

fn authorize(state: &SandboxState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "invalid api key".to_string(),
            }),
        ))
    }
}

pub fn router(state: SandboxState) -> Router {
    Router::new()
        .route("/v1/payment_intents", post(create_intent))
        .route("/v1/payment_intents/:id", get(get_intent))
        .route("/v1/payment_intents/:id/confirm", post(confirm_intent))
        .route("/v1/payment_intents/:id/cancel", post(cancel_intent))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn create_intent(
    State(state): State<SandboxState>,
    headers: HeaderMap,
    Json(params): Json<CreateIntentParams>,
) -> ApiResult<(StatusCode, Json<GatewayIntent>)> {
    authorize(&state, &headers)?;
    let intent = state.ledger.create(params).await.map_err(error_response)?;
    info!(
        "Created intent {} for {} {} (reservation {:?})",
        intent.id, intent.amount, intent.currency, intent.metadata.reservation_id
    );
    Ok((StatusCode::CREATED, Json(intent)))
}

pub async fn get_intent(
    State(state): State<SandboxState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<GatewayIntent>> {
    authorize(&state, &headers)?;
    let intent = state.ledger.get(&id).await.map_err(error_response)?;
    Ok(Json(intent))
}

pub async fn confirm_intent(
    State(state): State<SandboxState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    params: Option<Json<ConfirmParams>>,
) -> ApiResult<Json<GatewayIntent>> {
    authorize(&state, &headers)?;
    let params = params.map(|Json(p)| p).unwrap_or_default();
    let method = params.payment_method.unwrap_or_else(|| "card".to_string());
    let status = draw_outcome(state.success_rate);

    let intent = state
        .ledger
        .settle(&id, status, Some(method))
        .await
        .map_err(error_response)?;
    info!("Intent {} settled as {:?}", intent.id, intent.status);

    notify(&state, &intent);
    Ok(Json(intent))
}

pub async fn cancel_intent(
    State(state): State<SandboxState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<GatewayIntent>> {
    authorize(&state, &headers)?;
    let intent = state
        .ledger
        .settle(&id, IntentStatus::Canceled, None)
        .await
        .map_err(error_response)?;
    info!("Intent {} canceled", intent.id);

    notify(&state, &intent);
    Ok(Json(intent))
}

fn draw_outcome(success_rate: f64) -> IntentStatus {
    if rand::random::<f64>() < success_rate {
        IntentStatus::Succeeded
    } else {
        IntentStatus::Failed
    }
}

fn notify(state: &SandboxState, intent: &GatewayIntent) {
    match &state.notifier {
        Some(notifier) => notifier.spawn_notify(intent.clone()),
        None => warn!("No webhook configured, intent {} settles silently", intent.id),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

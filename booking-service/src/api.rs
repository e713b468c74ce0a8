use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::signature::{verify_signature, SIGNATURE_HEADER};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregates::HotelRating;
use crate::lifecycle::{BookingDetail, BookingRequest, BookingService, BookingTicket};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BookingService>,
    /// Webhooks are accepted only when a signing secret is configured.
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub reservation_id: Uuid,
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub status: PaymentStatus,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ConfirmationResult>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

fn error_response(err: BookingError) -> ApiError {
    let status = match &err {
        BookingError::Validation(_) | BookingError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        BookingError::ReservationNotFound(_)
        | BookingError::PaymentNotFound(_)
        | BookingError::IntentNotFound(_) => StatusCode::NOT_FOUND,
        BookingError::AmountMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        BookingError::ConflictingState(_) => StatusCode::CONFLICT,
        BookingError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BookingError::LedgerInconsistent { .. } | BookingError::Storage(_) => {
            tracing::error!("Request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorResponse { error: err.to_string() }))
}

pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/bookings/request", post(request_booking))
        .route("/bookings/user/:user_id", get(user_bookings))
        .route("/bookings/hotel/:hotel_id", get(hotel_bookings))
        .route("/bookings/:id", get(booking_detail))
        .route("/bookings/:id/intent", post(create_intent))
        .route("/bookings/:id/confirm", post(confirm_payment))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/hotels/:id/rating", get(hotel_rating))
        .route("/payments/:id/status", put(correct_payment_status))
        .route("/health", get(health_check));

    if state.webhook_secret.is_some() {
        router = router.route("/webhooks/payment", post(payment_webhook));
    }

    router.with_state(state).layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}

pub async fn request_booking(
    State(state): State<AppState>,
    Json(request): Json<BookingRequest>,
) -> ApiResult<(StatusCode, Json<BookingTicket>)> {
    let ticket = state
        .service
        .request_booking(request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn create_intent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BookingTicket>> {
    state
        .service
        .create_payment_intent(id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<(StatusCode, Json<ConfirmationResult>)> {
    let result = state
        .service
        .confirm_payment(id, &request.intent_id)
        .await
        .map_err(error_response)?;

    let status = match result {
        ConfirmationResult::Pending { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(result)))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state
        .service
        .cancel_reservation(id)
        .await
        .map_err(error_response)?;
    Ok(Json(CancelResponse {
        reservation_id: id,
        cancelled,
    }))
}

pub async fn booking_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BookingDetail>> {
    state
        .service
        .booking_detail(id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn user_bookings(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<Reservation>>> {
    state
        .service
        .booking_history(user_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn hotel_bookings(
    State(state): State<AppState>,
    Path(hotel_id): Path<i64>,
) -> ApiResult<Json<Vec<Reservation>>> {
    state
        .service
        .hotel_bookings(hotel_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn hotel_rating(
    State(state): State<AppState>,
    Path(hotel_id): Path<i64>,
) -> ApiResult<Json<HotelRating>> {
    state
        .service
        .hotel_rating(hotel_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn correct_payment_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PaymentStatusRequest>,
) -> ApiResult<Json<Payment>> {
    state
        .service
        .correct_payment_status(id, request.status)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Gateway callback. Only the intent id and reservation are taken from the
/// body; the outcome is always re-read from the gateway.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let bad_request = |error: String| (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }));

    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or_else(|| (StatusCode::NOT_FOUND, Json(ErrorResponse { error: "webhooks disabled".to_string() })))?;
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| bad_request("missing signature header".to_string()))?;

    verify_signature(&body, header, secret, chrono::Utc::now().timestamp())
        .map_err(|e| bad_request(e.to_string()))?;

    let event: WebhookEvent =
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid event: {}", e)))?;

    if !event.event_type.starts_with("payment_intent.") {
        tracing::info!("Ignoring webhook event {} of type {}", event.id, event.event_type);
        return Ok(Json(WebhookResponse { received: true, result: None }));
    }

    let Some(reservation_id) = event.data.metadata.reservation_id else {
        tracing::warn!("Webhook event {} carries no reservation id", event.id);
        return Ok(Json(WebhookResponse { received: true, result: None }));
    };

    let result = match state.service.confirm_payment(reservation_id, &event.data.id).await {
        Ok(result) => result,
        // redelivery cannot change a settled outcome
        Err(BookingError::ConflictingState(reason)) => {
            tracing::info!("Acknowledging webhook {} without effect: {}", event.id, reason);
            return Ok(Json(WebhookResponse { received: true, result: None }));
        }
        Err(e) => return Err(error_response(e)),
    };
    tracing::info!("Processed webhook {} for reservation {}", event.id, reservation_id);

    Ok(Json(WebhookResponse {
        received: true,
        result: Some(result),
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BookingConfig;
    use crate::gateway::InMemoryGateway;
    use crate::memory::*;
    use axum::body::Body;
    use axum::http::Request;
    use bigdecimal::BigDecimal;
    use shared::signature::sign_payload;
    use tower::ServiceExt;

    const SECRET: &str = "whsec_test";

    fn app() -> (Router, InMemoryGateway) {
        let gateway = InMemoryGateway::new();
        let service = BookingService::new(
            Arc::new(InMemoryReservationStore::new()),
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(InMemoryReviews::new()),
            Arc::new(gateway.clone()),
            Arc::new(StaticCatalog::new().with_hotel(10, BigDecimal::from(100))),
            BookingConfig::default(),
        );
        let state = AppState {
            service: Arc::new(service),
            webhook_secret: Some(SECRET.to_string()),
        };
        (create_router(state), gateway)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn book(app: &Router) -> serde_json::Value {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/bookings/request",
                serde_json::json!({
                    "user_id": 1,
                    "target": {"kind": "hotel", "id": 10},
                    "start_date": "2025-01-01",
                    "end_date": "2025-01-05",
                    "party_size": 2
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    #[tokio::test]
    async fn request_then_confirm_over_http() {
        let (app, gateway) = app();
        let ticket = book(&app).await;
        let id = ticket["reservation"]["id"].as_str().unwrap().to_string();
        let intent_id = ticket["intent"]["intent_id"].as_str().unwrap().to_string();
        assert_eq!(ticket["reservation"]["status"], "pending");

        let pending = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/bookings/{}/confirm", id),
                serde_json::json!({ "intent_id": intent_id }),
            ))
            .await
            .unwrap();
        assert_eq!(pending.status(), StatusCode::ACCEPTED);

        gateway.settle(&intent_id, IntentStatus::Succeeded).await;
        let confirmed = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/bookings/{}/confirm", id),
                serde_json::json!({ "intent_id": intent_id }),
            ))
            .await
            .unwrap();
        assert_eq!(confirmed.status(), StatusCode::OK);
        let body = body_json(confirmed).await;
        assert_eq!(body["outcome"], "confirmed");
        assert_eq!(body["reservation"]["status"], "confirmed");

        let cancel = app
            .clone()
            .oneshot(json_request("POST", &format!("/bookings/{}/cancel", id), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(cancel.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_reservation_is_404() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/bookings/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inverted_dates_are_400() {
        let (app, _) = app();
        let response = app
            .oneshot(json_request(
                "POST",
                "/bookings/request",
                serde_json::json!({
                    "user_id": 1,
                    "target": {"kind": "hotel", "id": 10},
                    "start_date": "2025-01-05",
                    "end_date": "2025-01-01",
                    "party_size": 2
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn webhook_body(reservation_id: &str, intent_id: &str) -> String {
        serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1_700_000_000,
            "data": {
                "id": intent_id,
                "amount": 80000,
                "currency": "brl",
                "status": "succeeded",
                "metadata": { "reservation_id": reservation_id }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn signed_webhook_confirms_reservation() {
        let (app, gateway) = app();
        let ticket = book(&app).await;
        let id = ticket["reservation"]["id"].as_str().unwrap().to_string();
        let intent_id = ticket["intent"]["intent_id"].as_str().unwrap().to_string();
        gateway.settle(&intent_id, IntentStatus::Succeeded).await;

        let body = webhook_body(&id, &intent_id);
        let signature = sign_payload(body.as_bytes(), SECRET, chrono::Utc::now().timestamp()).unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/payment")
                    .header(SIGNATURE_HEADER, signature)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["result"]["outcome"], "confirmed");
    }

    #[tokio::test]
    async fn unsigned_webhook_is_rejected() {
        let (app, gateway) = app();
        let ticket = book(&app).await;
        let id = ticket["reservation"]["id"].as_str().unwrap().to_string();
        let intent_id = ticket["intent"]["intent_id"].as_str().unwrap().to_string();
        gateway.settle(&intent_id, IntentStatus::Succeeded).await;

        let body = webhook_body(&id, &intent_id);
        let forged = sign_payload(body.as_bytes(), "whsec_other", chrono::Utc::now().timestamp()).unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/payment")
                    .header(SIGNATURE_HEADER, forged)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let detail = app
            .oneshot(
                Request::builder()
                    .uri(format!("/bookings/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(detail).await;
        assert_eq!(json["reservation"]["status"], "pending");
        assert_eq!(json["payments"].as_array().unwrap().len(), 0);
    }
    async fn deliver(app: &Router, body: String) -> axum::response::Response {
        let signature = sign_payload(body.as_bytes(), SECRET, chrono::Utc::now().timestamp()).unwrap();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/payment")
                    .header(SIGNATURE_HEADER, signature)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn webhook_for_cancelled_reservation_is_acknowledged() {
        let (app, gateway) = app();
        let ticket = book(&app).await;
        let id = ticket["reservation"]["id"].as_str().unwrap().to_string();
        let intent_id = ticket["intent"]["intent_id"].as_str().unwrap().to_string();

        let cancel = app
            .clone()
            .oneshot(json_request("POST", &format!("/bookings/{}/cancel", id), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(cancel.status(), StatusCode::OK);
        gateway.settle(&intent_id, IntentStatus::Succeeded).await;

        let response = deliver(&app, webhook_body(&id, &intent_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["received"], true);
        assert!(json["result"].is_null());
    }

    #[tokio::test]
    async fn redelivered_webhook_is_acknowledged_each_time() {
        let (app, gateway) = app();
        let ticket = book(&app).await;
        let id = ticket["reservation"]["id"].as_str().unwrap().to_string();
        let intent_id = ticket["intent"]["intent_id"].as_str().unwrap().to_string();
        gateway.settle(&intent_id, IntentStatus::Succeeded).await;

        for _ in 0..2 {
            let response = deliver(&app, webhook_body(&id, &intent_id)).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["result"]["outcome"], "confirmed");
        }

        let detail = app
            .oneshot(
                Request::builder()
                    .uri(format!("/bookings/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(detail).await;
        assert_eq!(json["reservation"]["status"], "confirmed");
        let payments = json["payments"].as_array().unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0]["status"], "approved");
    }
}

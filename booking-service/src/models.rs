use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct DbReservation {
    pub id: Uuid,
    pub user_id: i64,
    pub hotel_id: Option<i64>,
    pub package_id: Option<i64>,
    pub status: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub travel_date: Option<NaiveDate>,
    pub party_size: i32,
    pub total_amount: BigDecimal,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct DbPayment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub method: String,
    pub status: String,
    pub amount: BigDecimal,
    pub receipt: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl From<Reservation> for DbReservation {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            hotel_id: r.target.hotel_id(),
            package_id: r.target.package_id(),
            status: r.status.as_str().to_string(),
            start_date: r.start_date,
            end_date: r.end_date,
            travel_date: r.travel_date,
            party_size: r.party_size,
            total_amount: r.total_amount,
            payment_intent_id: r.payment_intent_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl TryFrom<DbReservation> for Reservation {
    type Error = BookingError;

    fn try_from(row: DbReservation) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            target: BookingTarget::from_columns(row.hotel_id, row.package_id)?,
            status: row.status.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            travel_date: row.travel_date,
            party_size: row.party_size,
            total_amount: row.total_amount,
            payment_intent_id: row.payment_intent_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<Payment> for DbPayment {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            reservation_id: p.reservation_id,
            method: p.method,
            status: p.status.as_str().to_string(),
            amount: p.amount,
            receipt: p.receipt,
            created_at: p.created_at,
        }
    }
}

impl TryFrom<DbPayment> for Payment {
    type Error = BookingError;

    fn try_from(row: DbPayment) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            reservation_id: row.reservation_id,
            method: row.method,
            status: row.status.parse()?,
            amount: row.amount,
            receipt: row.receipt,
            created_at: row.created_at,
        })
    }
}

impl NewOutboxEvent {
    pub fn from_event(event: &BookingEvent) -> Result<Self, BookingError> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.reservation_id(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event)?,
        })
    }
}

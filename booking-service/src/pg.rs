//! Postgres-backed stores.
//!
//! Status transitions are conditional updates (`WHERE status = 'pending'`)
//! and the payments table carries a partial unique index on approved rows, so
//! the terminal-state and one-approval invariants also hold across processes.
//! Every state change writes its [`BookingEvent`] to the outbox in the same
//! transaction.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use std::fmt::Display;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;
use crate::store::{CatalogRate, PaymentStore, RateCatalog, ReservationStore, ReviewSource};

pub type DbPool = Pool<AsyncPgConnection>;

fn pool_error(err: impl Display) -> BookingError {
    BookingError::Storage(format!("connection pool: {}", err))
}

/// Maps the payments unique indexes onto the conflicts they guard.
fn approved_conflict(reservation_id: Uuid) -> impl FnOnce(DieselError) -> BookingError {
    move |err| match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
            if info.constraint_name() == Some("payments_one_per_receipt") =>
        {
            BookingError::ConflictingState(format!(
                "reservation {} already has a payment for this receipt",
                reservation_id
            ))
        }
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            BookingError::ConflictingState(format!(
                "reservation {} already has an approved payment",
                reservation_id
            ))
        }
        other => other.into(),
    }
}

fn into_reservations(rows: Vec<DbReservation>) -> Result<Vec<Reservation>, BookingError> {
    rows.into_iter().map(Reservation::try_from).collect()
}

#[derive(Clone)]
pub struct PgReservationStore {
    pool: DbPool,
}

impl PgReservationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, conn: &mut AsyncPgConnection, id: Uuid) -> Result<bool, BookingError> {
        let found = reservations::table
            .filter(reservations::id.eq(id))
            .select(reservations::id)
            .first::<Uuid>(conn)
            .await
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn create(&self, draft: NewReservation) -> Result<Reservation, BookingError> {
        draft.validate()?;
        let reservation = draft.into_reservation(Uuid::new_v4(), Utc::now());
        let row = DbReservation::from(reservation.clone());
        let event = NewOutboxEvent::from_event(&BookingEvent::ReservationRequested {
            reservation_id: reservation.id,
            user_id: reservation.user_id,
            total_amount: reservation.total_amount.clone(),
        })?;

        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(reservations::table)
                    .values(&row)
                    .execute(conn)
                    .await?;

                diesel::insert_into(outbox_events::table)
                    .values(&event)
                    .execute(conn)
                    .await?;

                Ok(())
            })
        })
        .await?;

        Ok(reservation)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        reservations::table
            .filter(reservations::id.eq(id))
            .first::<DbReservation>(&mut conn)
            .await
            .optional()?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn set_status(&self, id: Uuid, status: ReservationStatus) -> Result<bool, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        if !ReservationStatus::Pending.can_transition_to(status) {
            return if self.exists(&mut conn, id).await? {
                Ok(false)
            } else {
                Err(BookingError::ReservationNotFound(id))
            };
        }

        let event = BookingEvent::for_transition(id, status)
            .map(|e| NewOutboxEvent::from_event(&e))
            .transpose()?;

        let updated = conn
            .transaction::<_, BookingError, _>(|conn| {
                Box::pin(async move {
                    let updated = diesel::update(
                        reservations::table
                            .filter(reservations::id.eq(id))
                            .filter(reservations::status.eq(ReservationStatus::Pending.as_str())),
                    )
                    .set((
                        reservations::status.eq(status.as_str()),
                        reservations::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                    if updated == 1 {
                        if let Some(event) = event {
                            diesel::insert_into(outbox_events::table)
                                .values(&event)
                                .execute(conn)
                                .await?;
                        }
                    }

                    Ok(updated)
                })
            })
            .await?;

        if updated == 1 {
            return Ok(true);
        }
        if self.exists(&mut conn, id).await? {
            Ok(false)
        } else {
            Err(BookingError::ReservationNotFound(id))
        }
    }

    async fn attach_intent(&self, id: Uuid, intent_id: &str) -> Result<bool, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let updated = diesel::update(
            reservations::table
                .filter(reservations::id.eq(id))
                .filter(reservations::status.eq(ReservationStatus::Pending.as_str())),
        )
        .set((
            reservations::payment_intent_id.eq(intent_id),
            reservations::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        if updated == 1 {
            Ok(true)
        } else if self.exists(&mut conn, id).await? {
            Ok(false)
        } else {
            Err(BookingError::ReservationNotFound(id))
        }
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Reservation>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows = reservations::table
            .filter(reservations::user_id.eq(user_id))
            .order(reservations::created_at.asc())
            .load::<DbReservation>(&mut conn)
            .await?;
        into_reservations(rows)
    }

    async fn list_by_hotel(&self, hotel_id: i64) -> Result<Vec<Reservation>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows = reservations::table
            .filter(reservations::hotel_id.eq(hotel_id))
            .order(reservations::created_at.asc())
            .load::<DbReservation>(&mut conn)
            .await?;
        into_reservations(rows)
    }

    async fn list_overlapping(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Reservation>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows = reservations::table
            .filter(reservations::user_id.eq(user_id))
            .filter(reservations::status.ne(ReservationStatus::Cancelled.as_str()))
            .filter(reservations::start_date.lt(end))
            .filter(reservations::end_date.gt(start))
            .order(reservations::created_at.asc())
            .load::<DbReservation>(&mut conn)
            .await?;
        into_reservations(rows)
    }
}

#[derive(Clone)]
pub struct PgPaymentStore {
    pool: DbPool,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create(&self, payment: NewPayment) -> Result<Payment, BookingError> {
        let payment = payment.into_payment(Uuid::new_v4(), Utc::now());
        let row = DbPayment::from(payment.clone());
        let event = NewOutboxEvent::from_event(&BookingEvent::payment_recorded(&payment))?;
        let reservation_id = payment.reservation_id;

        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(payments::table)
                    .values(&row)
                    .execute(conn)
                    .await
                    .map_err(approved_conflict(reservation_id))?;

                diesel::insert_into(outbox_events::table)
                    .values(&event)
                    .execute(conn)
                    .await?;

                Ok(())
            })
        })
        .await?;

        Ok(payment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        payments::table
            .filter(payments::id.eq(id))
            .first::<DbPayment>(&mut conn)
            .await
            .optional()?
            .map(Payment::try_from)
            .transpose()
    }

    async fn list_by_reservation(&self, reservation_id: Uuid) -> Result<Vec<Payment>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        payments::table
            .filter(payments::reservation_id.eq(reservation_id))
            .order(payments::created_at.asc())
            .load::<DbPayment>(&mut conn)
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn has_approved(&self, reservation_id: Uuid) -> Result<bool, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let found = diesel::select(diesel::dsl::exists(
            payments::table
                .filter(payments::reservation_id.eq(reservation_id))
                .filter(payments::status.eq(PaymentStatus::Approved.as_str())),
        ))
        .get_result::<bool>(&mut conn)
        .await?;
        Ok(found)
    }

    async fn total_approved_amount(&self, reservation_id: Uuid) -> Result<BigDecimal, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let total = payments::table
            .filter(payments::reservation_id.eq(reservation_id))
            .filter(payments::status.eq(PaymentStatus::Approved.as_str()))
            .select(diesel::dsl::sum(payments::amount))
            .first::<Option<BigDecimal>>(&mut conn)
            .await?;
        Ok(total.unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Payment>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                let Some(existing) = payments::table
                    .filter(payments::id.eq(id))
                    .for_update()
                    .first::<DbPayment>(conn)
                    .await
                    .optional()?
                else {
                    return Ok(None);
                };

                let row = diesel::update(payments::table.filter(payments::id.eq(id)))
                    .set(payments::status.eq(status.as_str()))
                    .get_result::<DbPayment>(conn)
                    .await
                    .map_err(approved_conflict(existing.reservation_id))?;
                let payment = Payment::try_from(row)?;

                let event = NewOutboxEvent::from_event(&BookingEvent::payment_recorded(&payment))?;
                diesel::insert_into(outbox_events::table)
                    .values(&event)
                    .execute(conn)
                    .await?;

                Ok(Some(payment))
            })
        })
        .await
    }
}

#[derive(Clone)]
pub struct PgReviewSource {
    pool: DbPool,
}

impl PgReviewSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReviewSource for PgReviewSource {
    async fn reviews_for_hotel(&self, hotel_id: i64) -> Result<Vec<Review>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows = reviews::table
            .filter(reviews::hotel_id.eq(hotel_id))
            .select((reviews::hotel_id, reviews::user_id, reviews::score))
            .load::<(i64, i64, i32)>(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(hotel_id, user_id, score)| Review { hotel_id, user_id, score })
            .collect())
    }
}

/// Reads rates from the catalog tables sharing this database.
#[derive(Clone)]
pub struct PgRateCatalog {
    pool: DbPool,
}

impl PgRateCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateCatalog for PgRateCatalog {
    async fn rate_for(&self, target: &BookingTarget) -> Result<Option<CatalogRate>, BookingError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rate = match *target {
            BookingTarget::Hotel(id) => hotels::table
                .filter(hotels::id.eq(id))
                .select(hotels::daily_rate)
                .first::<BigDecimal>(&mut conn)
                .await
                .optional()?
                .map(CatalogRate::PerNight),
            BookingTarget::Package(id) => packages::table
                .filter(packages::id.eq(id))
                .select(packages::price_per_person)
                .first::<BigDecimal>(&mut conn)
                .await
                .optional()?
                .map(CatalogRate::PerPerson),
        };
        Ok(rate)
    }
}

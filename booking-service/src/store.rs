//! Narrow storage capabilities the lifecycle service is built on.
//!
//! Implementations: [`crate::pg`] (Postgres through diesel-async) and
//! [`crate::memory`] (process-local, used by tests and local wiring).

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use shared::*;
use uuid::Uuid;

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Inserts a Pending reservation. Fails with `Validation` on a bad draft.
    async fn create(&self, draft: NewReservation) -> Result<Reservation, BookingError>;

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, BookingError>;

    /// Compare-and-set from Pending to `status`.
    ///
    /// Returns `false` without touching anything when the reservation is
    /// already terminal, which makes duplicate calls harmless.
    async fn set_status(&self, id: Uuid, status: ReservationStatus) -> Result<bool, BookingError>;

    /// Records the latest intent id while the reservation is still Pending.
    async fn attach_intent(&self, id: Uuid, intent_id: &str) -> Result<bool, BookingError>;

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Reservation>, BookingError>;

    async fn list_by_hotel(&self, hotel_id: i64) -> Result<Vec<Reservation>, BookingError>;

    /// Non-cancelled reservations of `user_id` whose stay intersects `[start, end)`.
    async fn list_overlapping(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Reservation>, BookingError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a payment attempt. A second Approved payment for the same
    /// reservation fails with `ConflictingState`.
    async fn create(&self, payment: NewPayment) -> Result<Payment, BookingError>;

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, BookingError>;

    /// Attempts for a reservation, oldest first.
    async fn list_by_reservation(&self, reservation_id: Uuid) -> Result<Vec<Payment>, BookingError>;

    async fn has_approved(&self, reservation_id: Uuid) -> Result<bool, BookingError>;

    async fn total_approved_amount(&self, reservation_id: Uuid) -> Result<BigDecimal, BookingError>;

    /// Administrative correction of a recorded outcome.
    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Payment>, BookingError>;
}

/// Raw review records, owned by the review collaborator.
#[async_trait]
pub trait ReviewSource: Send + Sync {
    async fn reviews_for_hotel(&self, hotel_id: i64) -> Result<Vec<Review>, BookingError>;
}

/// Rate quoted by the catalog for a booking target.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogRate {
    /// Hotels: charged per night per guest.
    PerNight(BigDecimal),
    /// Packages: a fixed price per guest regardless of length.
    PerPerson(BigDecimal),
}

#[async_trait]
pub trait RateCatalog: Send + Sync {
    /// `None` when the catalog has no such hotel or package.
    async fn rate_for(&self, target: &BookingTarget) -> Result<Option<CatalogRate>, BookingError>;
}

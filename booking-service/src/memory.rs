//! Process-local stores.
//!
//! Every mutation happens under a single write lock, so `set_status` and the
//! one-approved-payment check are atomic within the process.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use shared::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{CatalogRate, PaymentStore, RateCatalog, ReservationStore, ReviewSource};

#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    reservations: Arc<RwLock<HashMap<Uuid, Reservation>>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.reservations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reservations.read().await.is_empty()
    }
}

fn sorted(mut reservations: Vec<Reservation>) -> Vec<Reservation> {
    reservations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    reservations
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn create(&self, draft: NewReservation) -> Result<Reservation, BookingError> {
        draft.validate()?;
        let reservation = draft.into_reservation(Uuid::new_v4(), Utc::now());
        self.reservations
            .write()
            .await
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, BookingError> {
        Ok(self.reservations.read().await.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: ReservationStatus) -> Result<bool, BookingError> {
        let mut reservations = self.reservations.write().await;
        let reservation = reservations
            .get_mut(&id)
            .ok_or(BookingError::ReservationNotFound(id))?;

        if !reservation.status.can_transition_to(status) {
            return Ok(false);
        }
        reservation.status = status;
        reservation.updated_at = Utc::now();
        Ok(true)
    }

    async fn attach_intent(&self, id: Uuid, intent_id: &str) -> Result<bool, BookingError> {
        let mut reservations = self.reservations.write().await;
        let reservation = reservations
            .get_mut(&id)
            .ok_or(BookingError::ReservationNotFound(id))?;

        if reservation.status != ReservationStatus::Pending {
            return Ok(false);
        }
        reservation.payment_intent_id = Some(intent_id.to_string());
        reservation.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Reservation>, BookingError> {
        let reservations = self.reservations.read().await;
        Ok(sorted(
            reservations
                .values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_hotel(&self, hotel_id: i64) -> Result<Vec<Reservation>, BookingError> {
        let reservations = self.reservations.read().await;
        Ok(sorted(
            reservations
                .values()
                .filter(|r| r.target.hotel_id() == Some(hotel_id))
                .cloned()
                .collect(),
        ))
    }

    async fn list_overlapping(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Reservation>, BookingError> {
        let reservations = self.reservations.read().await;
        Ok(sorted(
            reservations
                .values()
                .filter(|r| {
                    r.user_id == user_id
                        && r.status != ReservationStatus::Cancelled
                        && r.overlaps(start, end)
                })
                .cloned()
                .collect(),
        ))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    // insertion order doubles as creation order
    payments: Arc<RwLock<Vec<Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn approved_count(&self, reservation_id: Uuid) -> usize {
        self.payments
            .read()
            .await
            .iter()
            .filter(|p| p.reservation_id == reservation_id && p.status == PaymentStatus::Approved)
            .count()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: NewPayment) -> Result<Payment, BookingError> {
        let mut payments = self.payments.write().await;
        if payment.status == PaymentStatus::Approved
            && payments.iter().any(|p| {
                p.reservation_id == payment.reservation_id && p.status == PaymentStatus::Approved
            })
        {
            return Err(BookingError::ConflictingState(format!(
                "reservation {} already has an approved payment",
                payment.reservation_id
            )));
        }
        if payment.receipt.is_some()
            && payments
                .iter()
                .any(|p| p.reservation_id == payment.reservation_id && p.receipt == payment.receipt)
        {
            return Err(BookingError::ConflictingState(format!(
                "reservation {} already has a payment for receipt {:?}",
                payment.reservation_id, payment.receipt
            )));
        }

        let payment = payment.into_payment(Uuid::new_v4(), Utc::now());
        payments.push(payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, BookingError> {
        Ok(self.payments.read().await.iter().find(|p| p.id == id).cloned())
    }

    async fn list_by_reservation(&self, reservation_id: Uuid) -> Result<Vec<Payment>, BookingError> {
        Ok(self
            .payments
            .read()
            .await
            .iter()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn has_approved(&self, reservation_id: Uuid) -> Result<bool, BookingError> {
        Ok(self.approved_count(reservation_id).await > 0)
    }

    async fn total_approved_amount(&self, reservation_id: Uuid) -> Result<BigDecimal, BookingError> {
        Ok(self
            .payments
            .read()
            .await
            .iter()
            .filter(|p| p.reservation_id == reservation_id && p.status == PaymentStatus::Approved)
            .map(|p| p.amount.clone())
            .sum())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Payment>, BookingError> {
        let mut payments = self.payments.write().await;
        let Some(index) = payments.iter().position(|p| p.id == id) else {
            return Ok(None);
        };

        let reservation_id = payments[index].reservation_id;
        if status == PaymentStatus::Approved
            && payments.iter().any(|p| {
                p.id != id && p.reservation_id == reservation_id && p.status == PaymentStatus::Approved
            })
        {
            return Err(BookingError::ConflictingState(format!(
                "reservation {} already has an approved payment",
                reservation_id
            )));
        }

        payments[index].status = status;
        Ok(Some(payments[index].clone()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryReviews {
    reviews: Arc<RwLock<Vec<Review>>>,
}

impl InMemoryReviews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the review of `review.user_id` for `review.hotel_id`.
    pub async fn upsert(&self, review: Review) {
        let mut reviews = self.reviews.write().await;
        reviews.retain(|r| !(r.user_id == review.user_id && r.hotel_id == review.hotel_id));
        reviews.push(review);
    }
}

#[async_trait]
impl ReviewSource for InMemoryReviews {
    async fn reviews_for_hotel(&self, hotel_id: i64) -> Result<Vec<Review>, BookingError> {
        Ok(self
            .reviews
            .read()
            .await
            .iter()
            .filter(|r| r.hotel_id == hotel_id)
            .cloned()
            .collect())
    }
}

/// Fixed catalog of rates.
#[derive(Clone, Default)]
pub struct StaticCatalog {
    rates: HashMap<BookingTarget, CatalogRate>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hotel(mut self, hotel_id: i64, daily_rate: BigDecimal) -> Self {
        self.rates
            .insert(BookingTarget::Hotel(hotel_id), CatalogRate::PerNight(daily_rate));
        self
    }

    pub fn with_package(mut self, package_id: i64, price_per_person: BigDecimal) -> Self {
        self.rates.insert(
            BookingTarget::Package(package_id),
            CatalogRate::PerPerson(price_per_person),
        );
        self
    }
}

#[async_trait]
impl RateCatalog for StaticCatalog {
    async fn rate_for(&self, target: &BookingTarget) -> Result<Option<CatalogRate>, BookingError> {
        Ok(self.rates.get(target).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(user_id: i64, start: (u32, u32), end: (u32, u32)) -> NewReservation {
        NewReservation {
            user_id,
            target: BookingTarget::Hotel(10),
            start_date: NaiveDate::from_ymd_opt(2025, start.0, start.1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, end.0, end.1).unwrap(),
            travel_date: None,
            party_size: 2,
            total_amount: BigDecimal::from(800),
        }
    }

    fn payment(reservation_id: Uuid, status: PaymentStatus) -> NewPayment {
        NewPayment {
            reservation_id,
            method: "card".to_string(),
            status,
            amount: BigDecimal::from(800),
            receipt: Some(format!("pi_{}", Uuid::new_v4().simple())),
        }
    }

    #[tokio::test]
    async fn create_rejects_inverted_dates_without_storing() {
        let store = InMemoryReservationStore::new();
        let result = store.create(draft(1, (1, 5), (1, 1))).await;
        assert!(matches!(result, Err(BookingError::Validation(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn set_status_is_compare_and_set_from_pending() {
        let store = InMemoryReservationStore::new();
        let r = store.create(draft(1, (1, 1), (1, 5))).await.unwrap();

        assert!(store.set_status(r.id, ReservationStatus::Confirmed).await.unwrap());
        assert!(!store.set_status(r.id, ReservationStatus::Confirmed).await.unwrap());
        assert!(!store.set_status(r.id, ReservationStatus::Cancelled).await.unwrap());
        assert!(!store.set_status(r.id, ReservationStatus::Pending).await.unwrap());

        let stored = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn set_status_on_unknown_reservation_is_not_found() {
        let store = InMemoryReservationStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.set_status(id, ReservationStatus::Cancelled).await,
            Err(BookingError::ReservationNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn attach_intent_only_while_pending() {
        let store = InMemoryReservationStore::new();
        let r = store.create(draft(1, (1, 1), (1, 5))).await.unwrap();

        assert!(store.attach_intent(r.id, "pi_1").await.unwrap());
        store.set_status(r.id, ReservationStatus::Cancelled).await.unwrap();
        assert!(!store.attach_intent(r.id, "pi_2").await.unwrap());

        let stored = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn overlapping_ignores_cancelled_and_other_users() {
        let store = InMemoryReservationStore::new();
        let kept = store.create(draft(1, (1, 1), (1, 5))).await.unwrap();
        let cancelled = store.create(draft(1, (1, 2), (1, 6))).await.unwrap();
        store
            .set_status(cancelled.id, ReservationStatus::Cancelled)
            .await
            .unwrap();
        store.create(draft(2, (1, 1), (1, 5))).await.unwrap();
        store.create(draft(1, (1, 5), (1, 9))).await.unwrap();

        let start = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        let found = store.list_overlapping(1, start, end).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, kept.id);
    }

    #[tokio::test]
    async fn second_approved_payment_is_refused() {
        let store = InMemoryPaymentStore::new();
        let reservation_id = Uuid::new_v4();

        store.create(payment(reservation_id, PaymentStatus::Rejected)).await.unwrap();
        store.create(payment(reservation_id, PaymentStatus::Approved)).await.unwrap();
        let second = store.create(payment(reservation_id, PaymentStatus::Approved)).await;

        assert!(matches!(second, Err(BookingError::ConflictingState(_))));
        assert_eq!(store.approved_count(reservation_id).await, 1);
        assert_eq!(
            store.total_approved_amount(reservation_id).await.unwrap(),
            BigDecimal::from(800)
        );
    }

    #[tokio::test]
    async fn duplicate_receipt_is_refused() {
        let store = InMemoryPaymentStore::new();
        let reservation_id = Uuid::new_v4();
        let failed = payment(reservation_id, PaymentStatus::Rejected);

        store.create(failed.clone()).await.unwrap();
        let repeat = store.create(failed.clone()).await;
        assert!(matches!(repeat, Err(BookingError::ConflictingState(_))));

        let mut elsewhere = failed.clone();
        elsewhere.reservation_id = Uuid::new_v4();
        store.create(elsewhere).await.unwrap();

        let mut manual = failed;
        manual.receipt = None;
        store.create(manual.clone()).await.unwrap();
        store.create(manual).await.unwrap();

        assert_eq!(store.list_by_reservation(reservation_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn payments_listed_in_creation_order() {
        let store = InMemoryPaymentStore::new();
        let reservation_id = Uuid::new_v4();
        let first = store.create(payment(reservation_id, PaymentStatus::Rejected)).await.unwrap();
        let second = store.create(payment(reservation_id, PaymentStatus::Approved)).await.unwrap();

        let listed = store.list_by_reservation(reservation_id).await.unwrap();
        assert_eq!(
            listed.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[tokio::test]
    async fn update_status_cannot_create_second_approval() {
        let store = InMemoryPaymentStore::new();
        let reservation_id = Uuid::new_v4();
        store.create(payment(reservation_id, PaymentStatus::Approved)).await.unwrap();
        let rejected = store.create(payment(reservation_id, PaymentStatus::Rejected)).await.unwrap();

        let result = store.update_status(rejected.id, PaymentStatus::Approved).await;
        assert!(matches!(result, Err(BookingError::ConflictingState(_))));
        assert!(store.update_status(Uuid::new_v4(), PaymentStatus::Rejected).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn total_approved_is_zero_without_payments() {
        let store = InMemoryPaymentStore::new();
        assert_eq!(
            store.total_approved_amount(Uuid::new_v4()).await.unwrap(),
            BigDecimal::from(0)
        );
    }

    #[tokio::test]
    async fn review_upsert_keeps_one_per_user_and_hotel() {
        let reviews = InMemoryReviews::new();
        reviews.upsert(Review { hotel_id: 10, user_id: 1, score: 2 }).await;
        reviews.upsert(Review { hotel_id: 10, user_id: 1, score: 5 }).await;
        reviews.upsert(Review { hotel_id: 11, user_id: 1, score: 3 }).await;

        let for_hotel = reviews.reviews_for_hotel(10).await.unwrap();
        assert_eq!(for_hotel, vec![Review { hotel_id: 10, user_id: 1, score: 5 }]);
    }
}

//! Booking lifecycle: turns a tentative reservation into a confirmed, paid one.
//!
//! Reservation status moves only Pending -> Confirmed (through
//! [`BookingService::confirm_payment`]) or Pending -> Cancelled (through
//! [`BookingService::cancel_reservation`]). Every sequence that reads payment
//! state and then writes it runs inside the reservation's critical section,
//! so a reservation never gets a second Approved payment from this process;
//! the stores enforce the same rule across processes.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::*;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregates::{AggregateHelper, HotelRating};
use crate::config::{BookingConfig, OverlapPolicy};
use crate::gateway::PaymentGateway;
use crate::locks::ReservationLocks;
use crate::store::{PaymentStore, RateCatalog, ReservationStore, ReviewSource};

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub user_id: i64,
    pub target: BookingTarget,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub travel_date: Option<NaiveDate>,
    pub party_size: i32,
}

/// A Pending reservation plus the intent the client should pay.
///
/// `intent` is absent when the gateway could not be reached; the reservation
/// stays Pending and the intent can be requested again.
#[derive(Debug, Clone, Serialize)]
pub struct BookingTicket {
    pub reservation: Reservation,
    pub intent: Option<CreatedIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingDetail {
    pub reservation: Reservation,
    pub payments: Vec<Payment>,
    pub total_approved: BigDecimal,
}

pub struct BookingService {
    reservations: Arc<dyn ReservationStore>,
    payments: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<dyn RateCatalog>,
    aggregates: AggregateHelper,
    locks: ReservationLocks,
    config: BookingConfig,
}

impl BookingService {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        payments: Arc<dyn PaymentStore>,
        reviews: Arc<dyn ReviewSource>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn RateCatalog>,
        config: BookingConfig,
    ) -> Self {
        let aggregates = AggregateHelper::new(reviews, reservations.clone());
        Self {
            reservations,
            payments,
            gateway,
            catalog,
            aggregates,
            locks: ReservationLocks::new(),
            config,
        }
    }

    pub fn aggregates(&self) -> &AggregateHelper {
        &self.aggregates
    }

    pub async fn request_booking(&self, request: BookingRequest) -> Result<BookingTicket, BookingError> {
        validate_stay(request.start_date, request.end_date, request.party_size)?;

        let rate = self
            .catalog
            .rate_for(&request.target)
            .await?
            .ok_or_else(|| BookingError::Validation(format!("unknown booking target {:?}", request.target)))?;

        if self.config.overlap_policy != OverlapPolicy::Allow
            && self
                .aggregates
                .has_overlap(request.user_id, request.start_date, request.end_date)
                .await?
        {
            if self.config.overlap_policy == OverlapPolicy::Reject {
                return Err(BookingError::Validation(format!(
                    "user {} already has a reservation between {} and {}",
                    request.user_id, request.start_date, request.end_date
                )));
            }
            warn!(
                "User {} requested an overlapping stay {}..{}",
                request.user_id, request.start_date, request.end_date
            );
        }

        let nights = (request.end_date - request.start_date).num_days();
        let total_amount = self.config.pricing.quote(&rate, nights, request.party_size);

        let reservation = self
            .reservations
            .create(NewReservation {
                user_id: request.user_id,
                target: request.target,
                start_date: request.start_date,
                end_date: request.end_date,
                travel_date: request.travel_date,
                party_size: request.party_size,
                total_amount,
            })
            .await?;
        info!(
            "Reservation {} created for user {} with total {}",
            reservation.id, reservation.user_id, reservation.total_amount
        );

        match self.open_intent(&reservation).await {
            Ok((reservation, intent)) => Ok(BookingTicket {
                reservation,
                intent: Some(intent),
                intent_error: None,
            }),
            Err(e) => {
                warn!("Reservation {} left without a payment intent: {}", reservation.id, e);
                Ok(BookingTicket {
                    reservation,
                    intent: None,
                    intent_error: Some(e.to_string()),
                })
            }
        }
    }

    /// Requests a fresh intent for a Pending reservation's fixed total.
    pub async fn create_payment_intent(&self, reservation_id: Uuid) -> Result<BookingTicket, BookingError> {
        let reservation = self.load(reservation_id).await?;
        if reservation.status.is_terminal() {
            return Err(BookingError::ConflictingState(format!(
                "reservation {} is already {}",
                reservation.id, reservation.status
            )));
        }

        let (reservation, intent) = self.open_intent(&reservation).await?;
        Ok(BookingTicket {
            reservation,
            intent: Some(intent),
            intent_error: None,
        })
    }

    async fn open_intent(&self, reservation: &Reservation) -> Result<(Reservation, CreatedIntent), BookingError> {
        let intent = self
            .with_timeout(self.gateway.create_intent(
                reservation.id,
                &reservation.total_amount,
                &self.config.currency,
            ))
            .await?;

        if !self
            .reservations
            .attach_intent(reservation.id, &intent.intent_id)
            .await?
        {
            return Err(BookingError::ConflictingState(format!(
                "reservation {} left Pending before intent {} was attached",
                reservation.id, intent.intent_id
            )));
        }
        info!("Intent {} attached to reservation {}", intent.intent_id, reservation.id);

        let reservation = self.load(reservation.id).await?;
        Ok((reservation, intent))
    }

    pub async fn confirm_payment(
        &self,
        reservation_id: Uuid,
        intent_id: &str,
    ) -> Result<ConfirmationResult, BookingError> {
        let _guard = self.locks.acquire(reservation_id).await;

        let reservation = self.load(reservation_id).await?;
        match reservation.status {
            ReservationStatus::Confirmed => {
                info!("Reservation {} already confirmed, returning settled result", reservation_id);
                return self.confirmed_result(reservation).await;
            }
            ReservationStatus::Cancelled => {
                return Err(BookingError::ConflictingState(format!(
                    "reservation {} is cancelled",
                    reservation_id
                )));
            }
            ReservationStatus::Pending => {}
        }

        if self.payments.has_approved(reservation_id).await? {
            warn!("Reservation {} has an approved payment but is still pending, repairing", reservation_id);
            return self.finish_confirmation(reservation).await;
        }

        let intent = self.with_timeout(self.gateway.get_intent(intent_id)).await?;

        if !issued_for(&intent, &reservation) {
            warn!(
                "Intent {} (metadata reservation {:?}) presented for reservation {}",
                intent.id, intent.reservation_id, reservation_id
            );
            return Err(BookingError::ConflictingState(format!(
                "intent {} was not issued for reservation {}",
                intent.id, reservation_id
            )));
        }

        if intent.amount != reservation.total_amount {
            warn!(
                "Intent {} reports {} for reservation {} totalling {}",
                intent.id, intent.amount, reservation_id, reservation.total_amount
            );
            return Err(BookingError::AmountMismatch {
                expected: reservation.total_amount,
                reported: intent.amount,
            });
        }

        match intent.status.outcome() {
            IntentOutcome::Approved => {
                // the gateway round trip may have raced another process
                if self.payments.has_approved(reservation_id).await? {
                    return self.finish_confirmation(reservation).await;
                }

                match self
                    .payments
                    .create(self.payment_from(&reservation, &intent, PaymentStatus::Approved))
                    .await
                {
                    Ok(payment) => {
                        info!("Payment {} approved for reservation {}", payment.id, reservation_id)
                    }
                    Err(BookingError::ConflictingState(reason)) => {
                        if !self.payments.has_approved(reservation_id).await? {
                            // the receipt is already recorded under another outcome
                            error!("Intent {} succeeded but cannot be recorded: {}", intent.id, reason);
                            return Err(BookingError::ConflictingState(reason));
                        }
                        info!("Lost approval race for reservation {}: {}", reservation_id, reason)
                    }
                    Err(e) => return Err(e),
                }
                self.finish_confirmation(reservation).await
            }
            IntentOutcome::Rejected => {
                if let Some(payment) = self.payment_for_intent(reservation_id, &intent.id).await? {
                    info!("Intent {} already recorded as payment {}", intent.id, payment.id);
                    return Ok(ConfirmationResult::Rejected { reservation, payment });
                }

                let payment = match self
                    .payments
                    .create(self.payment_from(&reservation, &intent, PaymentStatus::Rejected))
                    .await
                {
                    Ok(payment) => payment,
                    Err(BookingError::ConflictingState(reason)) => {
                        // recorded by another process between the lookup and the insert
                        info!("Rejection for intent {} already recorded: {}", intent.id, reason);
                        self.payment_for_intent(reservation_id, &intent.id)
                            .await?
                            .ok_or(BookingError::ConflictingState(reason))?
                    }
                    Err(e) => return Err(e),
                };
                info!(
                    "Payment {} rejected for reservation {} (intent {})",
                    payment.id, reservation_id, intent.id
                );
                Ok(ConfirmationResult::Rejected { reservation, payment })
            }
            IntentOutcome::Unsettled => {
                info!("Intent {} still {:?}, reservation {} stays pending", intent.id, intent.status, reservation_id);
                Ok(ConfirmationResult::Pending {
                    reservation,
                    intent_status: intent.status,
                })
            }
        }
    }

    async fn payment_for_intent(
        &self,
        reservation_id: Uuid,
        intent_id: &str,
    ) -> Result<Option<Payment>, BookingError> {
        Ok(self
            .payments
            .list_by_reservation(reservation_id)
            .await?
            .into_iter()
            .find(|p| p.receipt.as_deref() == Some(intent_id)))
    }

    fn payment_from(&self, reservation: &Reservation, intent: &PaymentIntent, status: PaymentStatus) -> NewPayment {
        NewPayment {
            reservation_id: reservation.id,
            method: intent.payment_method.clone().unwrap_or_else(|| "card".to_string()),
            status,
            amount: intent.amount.clone(),
            receipt: Some(intent.id.clone()),
        }
    }

    /// Moves a reservation with an approved payment to Confirmed.
    async fn finish_confirmation(&self, reservation: Reservation) -> Result<ConfirmationResult, BookingError> {
        self.check_ledger(&reservation).await?;

        if self
            .reservations
            .set_status(reservation.id, ReservationStatus::Confirmed)
            .await?
        {
            info!("Reservation {} confirmed", reservation.id);
        }

        let reservation = self.load(reservation.id).await?;
        match reservation.status {
            ReservationStatus::Confirmed => self.confirmed_result(reservation).await,
            status => {
                error!(
                    "Reservation {} holds an approved payment but ended {}",
                    reservation.id, status
                );
                Err(BookingError::ConflictingState(format!(
                    "reservation {} is {} despite an approved payment",
                    reservation.id, status
                )))
            }
        }
    }

    async fn confirmed_result(&self, reservation: Reservation) -> Result<ConfirmationResult, BookingError> {
        let payment = self
            .payments
            .list_by_reservation(reservation.id)
            .await?
            .into_iter()
            .find(|p| p.status == PaymentStatus::Approved);
        Ok(ConfirmationResult::Confirmed { reservation, payment })
    }

    /// Total approved for the reservation; more than its total is a defect.
    async fn check_ledger(&self, reservation: &Reservation) -> Result<BigDecimal, BookingError> {
        let approved = self.payments.total_approved_amount(reservation.id).await?;
        if approved > reservation.total_amount {
            error!(
                "Reservation {} has {} approved against a total of {}",
                reservation.id, approved, reservation.total_amount
            );
            return Err(BookingError::LedgerInconsistent {
                reservation_id: reservation.id,
                approved,
                total: reservation.total_amount.clone(),
            });
        }
        Ok(approved)
    }

    /// Cancels a Pending reservation. `false` if it was already cancelled.
    pub async fn cancel_reservation(&self, reservation_id: Uuid) -> Result<bool, BookingError> {
        let _guard = self.locks.acquire(reservation_id).await;

        let reservation = self.load(reservation_id).await?;
        match reservation.status {
            ReservationStatus::Cancelled => return Ok(false),
            ReservationStatus::Confirmed => {
                return Err(BookingError::ConflictingState(format!(
                    "reservation {} is confirmed and cannot be cancelled",
                    reservation_id
                )));
            }
            ReservationStatus::Pending => {}
        }

        if self.payments.has_approved(reservation_id).await? {
            return Err(BookingError::ConflictingState(format!(
                "reservation {} has an approved payment awaiting confirmation",
                reservation_id
            )));
        }

        let cancelled = self
            .reservations
            .set_status(reservation_id, ReservationStatus::Cancelled)
            .await?;
        if cancelled {
            info!("Reservation {} cancelled", reservation_id);
        }
        Ok(cancelled)
    }

    pub async fn booking_history(&self, user_id: i64) -> Result<Vec<Reservation>, BookingError> {
        self.reservations.list_by_user(user_id).await
    }

    pub async fn hotel_bookings(&self, hotel_id: i64) -> Result<Vec<Reservation>, BookingError> {
        self.reservations.list_by_hotel(hotel_id).await
    }

    pub async fn booking_detail(&self, reservation_id: Uuid) -> Result<BookingDetail, BookingError> {
        let reservation = self.load(reservation_id).await?;
        let total_approved = self.check_ledger(&reservation).await?;
        let payments = self.payments.list_by_reservation(reservation_id).await?;
        Ok(BookingDetail {
            reservation,
            payments,
            total_approved,
        })
    }

    pub async fn hotel_rating(&self, hotel_id: i64) -> Result<HotelRating, BookingError> {
        self.aggregates.rating(hotel_id).await
    }

    /// Administrative correction of a recorded payment outcome.
    ///
    /// Refuses to approve a payment that does not cover the reservation total,
    /// to approve a second payment or one on a cancelled reservation, and to
    /// demote the payment backing a confirmed reservation.
    pub async fn correct_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<Payment, BookingError> {
        let reservation_id = self
            .payments
            .get(payment_id)
            .await?
            .ok_or(BookingError::PaymentNotFound(payment_id))?
            .reservation_id;

        let _guard = self.locks.acquire(reservation_id).await;
        // status may have moved while waiting for the lock
        let payment = self
            .payments
            .get(payment_id)
            .await?
            .ok_or(BookingError::PaymentNotFound(payment_id))?;
        let reservation = self.load(reservation_id).await?;

        if payment.status == status {
            return Ok(payment);
        }

        if status == PaymentStatus::Approved && reservation.status == ReservationStatus::Cancelled {
            return Err(BookingError::ConflictingState(format!(
                "reservation {} is cancelled; payment {} cannot be approved",
                reservation_id, payment_id
            )));
        }

        if status == PaymentStatus::Approved && payment.amount != reservation.total_amount {
            return Err(BookingError::AmountMismatch {
                expected: reservation.total_amount,
                reported: payment.amount,
            });
        }

        if payment.status == PaymentStatus::Approved && reservation.status == ReservationStatus::Confirmed {
            return Err(BookingError::ConflictingState(format!(
                "payment {} backs confirmed reservation {}",
                payment_id, reservation.id
            )));
        }

        let updated = self
            .payments
            .update_status(payment_id, status)
            .await?
            .ok_or(BookingError::PaymentNotFound(payment_id))?;
        info!(
            "Payment {} corrected from {} to {}",
            payment_id, payment.status, updated.status
        );
        Ok(updated)
    }

    async fn load(&self, reservation_id: Uuid) -> Result<Reservation, BookingError> {
        self.reservations
            .get(reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound(reservation_id))
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, BookingError>>,
    ) -> Result<T, BookingError> {
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BookingError::GatewayUnavailable(format!(
                "no response within {:?}",
                self.config.gateway_timeout
            ))),
        }
    }
}

/// An intent settles a reservation only if its metadata names that
/// reservation, or, lacking metadata, it is the intent last attached to it.
fn issued_for(intent: &PaymentIntent, reservation: &Reservation) -> bool {
    match intent.reservation_id {
        Some(_) => intent.belongs_to(reservation.id),
        None => reservation.payment_intent_id.as_deref() == Some(intent.id.as_str()),
    }
}

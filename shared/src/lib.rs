mod error;
pub mod signature;

pub use error::BookingError;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MAX_PARTY_SIZE: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    /// The only edges are Pending -> Confirmed and Pending -> Cancelled.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Confirmed)
                | (ReservationStatus::Pending, ReservationStatus::Cancelled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(BookingError::Storage(format!(
                "unknown reservation status '{}'",
                other
            ))),
        }
    }
}

/// What is being booked. Exactly one of hotel or package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum BookingTarget {
    Hotel(i64),
    Package(i64),
}

impl BookingTarget {
    pub fn hotel_id(&self) -> Option<i64> {
        match self {
            BookingTarget::Hotel(id) => Some(*id),
            BookingTarget::Package(_) => None,
        }
    }

    pub fn package_id(&self) -> Option<i64> {
        match self {
            BookingTarget::Package(id) => Some(*id),
            BookingTarget::Hotel(_) => None,
        }
    }

    /// Rebuilds a target from the two nullable foreign-key columns.
    pub fn from_columns(hotel_id: Option<i64>, package_id: Option<i64>) -> Result<Self, BookingError> {
        match (hotel_id, package_id) {
            (Some(id), None) => Ok(BookingTarget::Hotel(id)),
            (None, Some(id)) => Ok(BookingTarget::Package(id)),
            (Some(_), Some(_)) => Err(BookingError::Storage(
                "reservation references both a hotel and a package".to_string(),
            )),
            (None, None) => Err(BookingError::Storage(
                "reservation references neither a hotel nor a package".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: i64,
    pub target: BookingTarget,
    pub status: ReservationStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub travel_date: Option<NaiveDate>,
    pub party_size: i32,
    pub total_amount: BigDecimal,
    /// Latest payment intent requested for this reservation, if any.
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    /// Half-open date ranges: a stay ending on day D does not overlap one starting on D.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date < end && start < self.end_date
    }
}

/// Draft of a reservation. Carries no status: every created reservation starts Pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservation {
    pub user_id: i64,
    pub target: BookingTarget,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub travel_date: Option<NaiveDate>,
    pub party_size: i32,
    pub total_amount: BigDecimal,
}

impl NewReservation {
    pub fn validate(&self) -> Result<(), BookingError> {
        validate_stay(self.start_date, self.end_date, self.party_size)?;
        if self.total_amount < BigDecimal::from(0) {
            return Err(BookingError::Validation(format!(
                "total amount must be non-negative, got {}",
                self.total_amount
            )));
        }
        Ok(())
    }

    pub fn into_reservation(self, id: Uuid, now: DateTime<Utc>) -> Reservation {
        Reservation {
            id,
            user_id: self.user_id,
            target: self.target,
            status: ReservationStatus::Pending,
            start_date: self.start_date,
            end_date: self.end_date,
            travel_date: self.travel_date,
            party_size: self.party_size,
            total_amount: self.total_amount,
            payment_intent_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn validate_stay(start: NaiveDate, end: NaiveDate, party_size: i32) -> Result<(), BookingError> {
    if start >= end {
        return Err(BookingError::Validation(format!(
            "start date {} must be before end date {}",
            start, end
        )));
    }
    if !(1..=MAX_PARTY_SIZE).contains(&party_size) {
        return Err(BookingError::Validation(format!(
            "party size must be between 1 and {}, got {}",
            MAX_PARTY_SIZE, party_size
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "approved" => Ok(PaymentStatus::Approved),
            "rejected" => Ok(PaymentStatus::Rejected),
            other => Err(BookingError::Storage(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    /// Free-text category: card, pix, boleto...
    pub method: String,
    pub status: PaymentStatus,
    pub amount: BigDecimal,
    /// Gateway intent id the outcome was read from.
    pub receipt: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub reservation_id: Uuid,
    pub method: String,
    pub status: PaymentStatus,
    pub amount: BigDecimal,
    pub receipt: Option<String>,
}

impl NewPayment {
    pub fn into_payment(self, id: Uuid, now: DateTime<Utc>) -> Payment {
        Payment {
            id,
            reservation_id: self.reservation_id,
            method: self.method,
            status: self.status,
            amount: self.amount,
            receipt: self.receipt,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

/// How an intent status settles a confirmation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    Approved,
    Rejected,
    Unsettled,
}

impl IntentStatus {
    pub fn outcome(&self) -> IntentOutcome {
        match self {
            IntentStatus::Succeeded => IntentOutcome::Approved,
            IntentStatus::Failed | IntentStatus::Canceled => IntentOutcome::Rejected,
            _ => IntentOutcome::Unsettled,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.outcome() != IntentOutcome::Unsettled
    }
}

/// A payment intent as reported by the gateway. Never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: IntentStatus,
    pub payment_method: Option<String>,
    /// Reservation the intent was opened for, as recorded in its metadata.
    pub reservation_id: Option<Uuid>,
}

impl PaymentIntent {
    /// True when the metadata names `reservation_id`.
    pub fn belongs_to(&self, reservation_id: Uuid) -> bool {
        self.reservation_id == Some(reservation_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// Wire shape of the gateway's intent object; amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub metadata: IntentMetadata,
}

impl From<GatewayIntent> for PaymentIntent {
    fn from(intent: GatewayIntent) -> Self {
        Self {
            id: intent.id,
            amount: from_minor_units(intent.amount),
            currency: intent.currency,
            status: intent.status,
            payment_method: intent.payment_method,
            reservation_id: intent.metadata.reservation_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentMetadata {
    #[serde(default)]
    pub reservation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIntentParams {
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: IntentMetadata,
}

/// Event posted by the gateway to the booking service's webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: GatewayIntent,
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationResult {
    Confirmed {
        reservation: Reservation,
        payment: Option<Payment>,
    },
    Rejected {
        reservation: Reservation,
        payment: Payment,
    },
    /// The gateway has not settled the intent yet; poll again later.
    Pending {
        reservation: Reservation,
        intent_status: IntentStatus,
    },
}

impl ConfirmationResult {
    pub fn reservation(&self) -> &Reservation {
        match self {
            ConfirmationResult::Confirmed { reservation, .. }
            | ConfirmationResult::Rejected { reservation, .. }
            | ConfirmationResult::Pending { reservation, .. } => reservation,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConfirmationResult::Confirmed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub hotel_id: i64,
    pub user_id: i64,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    ReservationRequested {
        reservation_id: Uuid,
        user_id: i64,
        total_amount: BigDecimal,
    },
    ReservationConfirmed {
        reservation_id: Uuid,
    },
    ReservationCancelled {
        reservation_id: Uuid,
    },
    PaymentRecorded {
        reservation_id: Uuid,
        payment_id: Uuid,
        status: PaymentStatus,
        amount: BigDecimal,
    },
}

impl BookingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::ReservationRequested { .. } => "ReservationRequested",
            BookingEvent::ReservationConfirmed { .. } => "ReservationConfirmed",
            BookingEvent::ReservationCancelled { .. } => "ReservationCancelled",
            BookingEvent::PaymentRecorded { .. } => "PaymentRecorded",
        }
    }

    pub fn reservation_id(&self) -> Uuid {
        match self {
            BookingEvent::ReservationRequested { reservation_id, .. }
            | BookingEvent::ReservationConfirmed { reservation_id }
            | BookingEvent::ReservationCancelled { reservation_id }
            | BookingEvent::PaymentRecorded { reservation_id, .. } => *reservation_id,
        }
    }

    /// Announces `payment` as it now stands, on insert and on every status change.
    pub fn payment_recorded(payment: &Payment) -> Self {
        BookingEvent::PaymentRecorded {
            reservation_id: payment.reservation_id,
            payment_id: payment.id,
            status: payment.status,
            amount: payment.amount.clone(),
        }
    }

    /// Event emitted when a reservation lands in `status`, if that transition is announced.
    pub fn for_transition(reservation_id: Uuid, status: ReservationStatus) -> Option<Self> {
        match status {
            ReservationStatus::Confirmed => Some(BookingEvent::ReservationConfirmed { reservation_id }),
            ReservationStatus::Cancelled => Some(BookingEvent::ReservationCancelled { reservation_id }),
            ReservationStatus::Pending => None,
        }
    }
}

/// Converts a decimal amount into gateway minor units (cents).
pub fn to_minor_units(amount: &BigDecimal) -> Option<i64> {
    (amount * &BigDecimal::from(100)).round(0).to_i64()
}

pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::new(minor.into(), 2)
}

use chrono::NaiveDate;
use serde::Serialize;
use shared::BookingError;
use std::sync::Arc;

use crate::store::{ReservationStore, ReviewSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotelRating {
    pub hotel_id: i64,
    pub average: f64,
    pub count: usize,
}

/// Review aggregates and reservation-period lookups used to validate bookings.
#[derive(Clone)]
pub struct AggregateHelper {
    reviews: Arc<dyn ReviewSource>,
    reservations: Arc<dyn ReservationStore>,
}

impl AggregateHelper {
    pub fn new(reviews: Arc<dyn ReviewSource>, reservations: Arc<dyn ReservationStore>) -> Self {
        Self { reviews, reservations }
    }

    /// Mean review score; 0 when the hotel has no reviews.
    pub async fn average_rating(&self, hotel_id: i64) -> Result<f64, BookingError> {
        Ok(self.rating(hotel_id).await?.average)
    }

    pub async fn review_count(&self, hotel_id: i64) -> Result<usize, BookingError> {
        Ok(self.reviews.reviews_for_hotel(hotel_id).await?.len())
    }

    /// Average and count from a single read of the hotel's reviews.
    pub async fn rating(&self, hotel_id: i64) -> Result<HotelRating, BookingError> {
        let reviews = self.reviews.reviews_for_hotel(hotel_id).await?;
        let count = reviews.len();
        let average = if count == 0 {
            0.0
        } else {
            reviews.iter().map(|r| f64::from(r.score)).sum::<f64>() / count as f64
        };
        Ok(HotelRating { hotel_id, average, count })
    }

    /// Whether the user already holds a live reservation intersecting `[start, end)`.
    /// Reports only; blocking is the caller's decision.
    pub async fn has_overlap(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, BookingError> {
        Ok(!self
            .reservations
            .list_overlapping(user_id, start, end)
            .await?
            .is_empty())
    }
}

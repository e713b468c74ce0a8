#![allow(dead_code)]

use bigdecimal::BigDecimal;
use booking_service::gateway::InMemoryGateway;
use booking_service::memory::*;
use booking_service::{BookingConfig, BookingRequest, BookingService};
use chrono::NaiveDate;
use shared::BookingTarget;
use std::sync::Arc;

pub struct Harness {
    pub service: Arc<BookingService>,
    pub reservations: InMemoryReservationStore,
    pub payments: InMemoryPaymentStore,
    pub reviews: InMemoryReviews,
    pub gateway: InMemoryGateway,
}

pub fn harness() -> Harness {
    harness_with(BookingConfig::default())
}

pub fn harness_with(config: BookingConfig) -> Harness {
    let reservations = InMemoryReservationStore::new();
    let payments = InMemoryPaymentStore::new();
    let reviews = InMemoryReviews::new();
    let gateway = InMemoryGateway::new();
    let catalog = StaticCatalog::new()
        .with_hotel(10, BigDecimal::from(100))
        .with_hotel(11, BigDecimal::from(250))
        .with_package(20, BigDecimal::from(1200));

    let service = BookingService::new(
        Arc::new(reservations.clone()),
        Arc::new(payments.clone()),
        Arc::new(reviews.clone()),
        Arc::new(gateway.clone()),
        Arc::new(catalog),
        config,
    );

    Harness {
        service: Arc::new(service),
        reservations,
        payments,
        reviews,
        gateway,
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// user 1, hotel 10, 2025-01-01..2025-01-05, party of 2.
pub fn hotel_request() -> BookingRequest {
    BookingRequest {
        user_id: 1,
        target: BookingTarget::Hotel(10),
        start_date: date(2025, 1, 1),
        end_date: date(2025, 1, 5),
        travel_date: None,
        party_size: 2,
    }
}

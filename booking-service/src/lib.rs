pub mod aggregates;
pub mod api;
pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod locks;
pub mod memory;
pub mod models;
pub mod outbox;
pub mod pg;
pub mod pricing;
pub mod schema;
pub mod store;

pub use config::{BookingConfig, OverlapPolicy};
pub use lifecycle::{BookingDetail, BookingRequest, BookingService, BookingTicket};

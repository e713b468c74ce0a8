use clap::ValueEnum;
use std::time::Duration;

use crate::pricing::PricingPolicy;

/// What RequestBooking does when the user already holds an overlapping stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OverlapPolicy {
    Allow,
    #[default]
    Warn,
    Reject,
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// ISO currency code sent to the gateway, lowercase.
    pub currency: String,
    /// Request-level timeout imposed on every gateway call.
    pub gateway_timeout: Duration,
    pub pricing: PricingPolicy,
    pub overlap_policy: OverlapPolicy,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            currency: "brl".to_string(),
            gateway_timeout: Duration::from_secs(10),
            pricing: PricingPolicy::default(),
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

use bigdecimal::BigDecimal;
use shared::BookingError;
use std::str::FromStr;

use crate::store::CatalogRate;

/// Length-of-stay discount: stays of at least `min_nights` get `percent` off.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountTier {
    pub min_nights: i64,
    pub percent: BigDecimal,
}

/// Turns a catalog rate into a reservation total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingPolicy {
    tiers: Vec<DiscountTier>,
}

impl PricingPolicy {
    pub fn new(mut tiers: Vec<DiscountTier>) -> Result<Self, BookingError> {
        for tier in &tiers {
            if tier.min_nights < 1 {
                return Err(BookingError::Validation(format!(
                    "discount tier needs at least one night, got {}",
                    tier.min_nights
                )));
            }
            if tier.percent < BigDecimal::from(0) || tier.percent > BigDecimal::from(100) {
                return Err(BookingError::Validation(format!(
                    "discount percent must be within 0..=100, got {}",
                    tier.percent
                )));
            }
        }
        tiers.sort_by_key(|tier| tier.min_nights);
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[DiscountTier] {
        &self.tiers
    }

    /// Highest tier the stay qualifies for.
    pub fn discount_for(&self, nights: i64) -> Option<&DiscountTier> {
        self.tiers.iter().rev().find(|tier| nights >= tier.min_nights)
    }

    pub fn quote(&self, rate: &CatalogRate, nights: i64, party_size: i32) -> BigDecimal {
        let party = BigDecimal::from(party_size);
        let subtotal = match rate {
            CatalogRate::PerNight(daily) => daily * &BigDecimal::from(nights) * &party,
            CatalogRate::PerPerson(price) => price * &party,
        };

        let total = match self.discount_for(nights) {
            Some(tier) => {
                let hundred = BigDecimal::from(100);
                subtotal * (&hundred - &tier.percent) / hundred
            }
            None => subtotal,
        };
        total.round(2)
    }
}

/// Parses `"<min_nights>:<percent>,..."`, e.g. `"2:5,4:10,6:15"`. Empty means no discounts.
impl FromStr for PricingPolicy {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tiers = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (nights, percent) = part.split_once(':').ok_or_else(|| {
                BookingError::Validation(format!("discount tier '{}' is not nights:percent", part))
            })?;
            let min_nights = nights.trim().parse::<i64>().map_err(|_| {
                BookingError::Validation(format!("invalid nights in discount tier '{}'", part))
            })?;
            let percent = percent.trim().parse::<BigDecimal>().map_err(|_| {
                BookingError::Validation(format!("invalid percent in discount tier '{}'", part))
            })?;
            tiers.push(DiscountTier { min_nights, percent });
        }
        Self::new(tiers)
    }
}

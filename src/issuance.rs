//! # Reward issuance
//! Time based issuance of the reward token distributed to Stability Pool depositors through `G`.
//! The ledger does not care about the shape of the schedule: anything implementing [`IssuanceCurve`]
//! can drive it.

use crate::errors::*;
use scrypto::prelude::*;
use scrypto_math::*;

pub trait IssuanceCurve {
    /// Total amount issued `minutes` after deployment.
    fn cumulative_issuance(&self, minutes: Decimal) -> ProtocolResult<Decimal>;
}

/// `supply_cap * (1 - minute_factor ^ minutes)`. With the default factor half of the remaining supply
/// is issued every year.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct HalvingIssuance {
    pub supply_cap: Decimal,
    pub minute_factor: Decimal,
}

impl HalvingIssuance {
    pub fn yearly(supply_cap: Decimal) -> Self {
        Self {
            supply_cap,
            minute_factor: dec!("0.999998681227695"),
        }
    }
}

impl IssuanceCurve for HalvingIssuance {
    fn cumulative_issuance(&self, minutes: Decimal) -> ProtocolResult<Decimal> {
        if minutes <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let remaining_fraction = self
            .minute_factor
            .pow(minutes)
            .ok_or_else(|| ProtocolError::bounds("issuance exponent out of range"))?;
        let issued_fraction = (Decimal::ONE - remaining_fraction).max(Decimal::ZERO);

        self.supply_cap
            .checked_mul(issued_fraction)
            .map(|issued| issued.min(self.supply_cap))
            .ok_or_else(|| ProtocolError::bounds("issuance overflow"))
    }
}

/// Tracks what has been issued so far, so every trigger issues only the increase.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct IssuanceTracker {
    pub deployed_at: i64,
    pub total_issued: Decimal,
}

impl IssuanceTracker {
    pub fn new(deployed_at: i64) -> Self {
        Self {
            deployed_at,
            total_issued: Decimal::ZERO,
        }
    }

    /// Amount due since the last trigger. Whole minutes only, so calls within the same minute issue
    /// nothing.
    pub fn issue(&mut self, curve: &impl IssuanceCurve, now: i64) -> ProtocolResult<Decimal> {
        let minutes = (now - self.deployed_at).max(0) / 60;
        let cumulative = curve.cumulative_issuance(Decimal::from(minutes))?;
        let issued = (cumulative - self.total_issued).max(Decimal::ZERO);
        self.total_issued += issued;
        Ok(issued)
    }
}

//! # Ballast shared structs
//! Data structures used by the ledgers, the engines and both blueprints.

use crate::errors::*;
use scrypto::prelude::*;

/// Lifecycle of a position. Every status besides `Active` is terminal.
#[derive(ScryptoSbor, PartialEq, Eq, Clone, Copy, Debug)]
pub enum PositionStatus {
    NonExistent,
    Active,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

/// Redistribution accumulators a position observed the last time its pending rewards were applied.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedistributionSnapshot {
    pub l_coll: Decimal,
    pub l_debt: Decimal,
}

impl Default for RedistributionSnapshot {
    fn default() -> Self {
        Self {
            l_coll: Decimal::ZERO,
            l_debt: Decimal::ZERO,
        }
    }
}

/// Data of a position receipt, minted when opening a position.
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug, PartialEq)]
pub struct Position {
    /// Debt including the gas compensation reserve and borrowing fees.
    #[mutable]
    pub debt: Decimal,
    #[mutable]
    pub collateral: Decimal,
    /// Claim on redistributed debt and collateral.
    #[mutable]
    pub stake: Decimal,
    #[mutable]
    pub status: PositionStatus,
    #[mutable]
    pub snapshot: RedistributionSnapshot,
    /// Key the position is stored under in the position index. See `position_ledger::sort_key`.
    #[mutable]
    pub sort_key: Decimal,
    /// Collateral left over after a capped liquidation or a full redemption, claimable by the owner.
    #[mutable]
    pub surplus_collateral: Decimal,
}

impl Position {
    pub fn non_existent() -> Self {
        Self {
            debt: Decimal::ZERO,
            collateral: Decimal::ZERO,
            stake: Decimal::ZERO,
            status: PositionStatus::NonExistent,
            snapshot: RedistributionSnapshot::default(),
            sort_key: Decimal::ZERO,
            surplus_collateral: Decimal::ZERO,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }
}

/// Global Stability Pool accumulators observed when a deposit or front end stake last changed.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositSnapshot {
    pub s: Decimal,
    pub p: Decimal,
    pub g: Decimal,
    pub scale: u64,
    pub epoch: u64,
}

impl Default for DepositSnapshot {
    fn default() -> Self {
        Self {
            s: Decimal::ZERO,
            p: Decimal::ONE,
            g: Decimal::ZERO,
            scale: 0,
            epoch: 0,
        }
    }
}

/// A Stability Pool deposit. Stored as the data of the depositor badge.
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug, PartialEq)]
pub struct Deposit {
    /// Deposited amount at the last provide / withdraw.
    #[mutable]
    pub initial_value: Decimal,
    #[mutable]
    pub snapshot: DepositSnapshot,
    /// Front end the deposit was made through. Fixed until the deposit is fully withdrawn.
    #[mutable]
    pub front_end: Option<NonFungibleLocalId>,
}

impl Deposit {
    pub fn empty() -> Self {
        Self {
            initial_value: Decimal::ZERO,
            snapshot: DepositSnapshot::default(),
            front_end: None,
        }
    }
}

/// A registered front end (referrer). Stored as the data of the front end badge.
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug, PartialEq)]
pub struct FrontEnd {
    /// Share of the reward gain passed on to depositors tagged with this front end.
    pub kickback_rate: Decimal,
    /// Sum of the deposits tagged with this front end, at the last change.
    #[mutable]
    pub stake: Decimal,
    /// Only `p`, `g`, `scale` and `epoch` are used. Front ends never share in collateral.
    #[mutable]
    pub snapshot: DepositSnapshot,
    #[mutable]
    pub unclaimed_reward: Decimal,
}

/// Price as read from the oracle, with the unix second it was published at.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceReading {
    pub price: Decimal,
    pub published_at: i64,
}

impl PriceReading {
    /// The price, if it is positive and at most `max_age` seconds old at `now`.
    pub fn validated(&self, now: i64, max_age: i64) -> ProtocolResult<Decimal> {
        if self.price <= Decimal::ZERO {
            return Err(ProtocolError::bad_price("Oracle price must be positive."));
        }
        if now - self.published_at > max_age {
            return Err(ProtocolError::bad_price(format!(
                "Oracle price is stale: published at {}, now {}.",
                self.published_at, now
            )));
        }
        Ok(self.price)
    }
}

/// Configurable parameters of the Ballast component.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct ProtocolParameters {
    /// Minimum collateral ratio of a single position.
    pub mcr: Decimal,
    /// Total collateral ratio below which the system is in recovery mode.
    pub ccr: Decimal,
    /// bUSD reserved from every position and paid to its liquidator.
    pub gas_compensation: Decimal,
    /// Minimum debt of a position, excluding the gas compensation.
    pub min_net_debt: Decimal,
    /// Share of the liquidated collateral paid to the liquidator.
    pub coll_gas_compensation_rate: Decimal,
    pub borrowing_fee_floor: Decimal,
    pub max_borrowing_fee: Decimal,
    pub redemption_fee_floor: Decimal,
    /// Base rate multiplier applied per elapsed minute.
    pub minute_decay_factor: Decimal,
    /// Divisor of the redeemed fraction when bumping the base rate.
    pub beta: Decimal,
    /// Seconds after which an oracle price is considered stale.
    pub max_price_age: i64,
    /// Maximum number of positions stored under one index key.
    pub max_vector_length: u64,
    /// Maximum number of positions touched by one redemption. Zero means no limit.
    pub max_redemption_iterations: u64,
    pub stop_openings: bool,
    pub stop_liquidations: bool,
    pub stop_redemptions: bool,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            mcr: dec!("1.1"),
            ccr: dec!("1.5"),
            gas_compensation: dec!(200),
            min_net_debt: dec!(1800),
            coll_gas_compensation_rate: dec!("0.005"),
            borrowing_fee_floor: dec!("0.005"),
            max_borrowing_fee: dec!("0.05"),
            redemption_fee_floor: dec!("0.005"),
            minute_decay_factor: dec!("0.999037758833783"),
            beta: dec!(2),
            max_price_age: 120,
            max_vector_length: 250,
            max_redemption_iterations: 0,
            stop_openings: false,
            stop_liquidations: false,
            stop_redemptions: false,
        }
    }
}

/// A view on a position with its pending redistribution rewards applied.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct PositionInfoReturn {
    pub id: NonFungibleLocalId,
    pub status: PositionStatus,
    pub debt: Decimal,
    pub collateral: Decimal,
    pub pending_debt: Decimal,
    pub pending_collateral: Decimal,
    pub stake: Decimal,
    pub icr: Decimal,
    pub surplus_collateral: Decimal,
}

/// A view on the system totals of the Ballast component.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct SystemInfoReturn {
    pub active_debt: Decimal,
    pub active_collateral: Decimal,
    pub default_debt: Decimal,
    pub default_collateral: Decimal,
    pub total_stakes: Decimal,
    pub active_positions: u64,
    pub circulating_debt: Decimal,
    pub base_rate: Decimal,
    pub price: Decimal,
    pub tcr: Decimal,
    pub recovery_mode: bool,
}

/// A view on a Stability Pool deposit.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct DepositInfoReturn {
    pub id: NonFungibleLocalId,
    pub initial_value: Decimal,
    pub compounded_value: Decimal,
    pub collateral_gain: Decimal,
    pub reward_gain: Decimal,
    pub front_end: Option<NonFungibleLocalId>,
}

/// A view on the Stability Pool accumulators.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct PoolInfoReturn {
    pub total_deposits: Decimal,
    pub total_collateral: Decimal,
    pub p: Decimal,
    pub current_scale: u64,
    pub current_epoch: u64,
    pub total_reward_issued: Decimal,
}

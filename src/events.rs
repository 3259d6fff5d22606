//! Defines events emitted by the Ballast protocol components.

use scrypto::prelude::*;
use crate::shared_structs::*;

/// Event emitted when a new position is opened.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventNewPosition {
    /// The data of the newly opened position.
    pub position: Position,
    /// The `NonFungibleLocalId` of the new position receipt.
    pub position_id: NonFungibleLocalId,
    /// Borrowing fee added to the position's debt.
    pub borrowing_fee: Decimal,
}

/// Event emitted when the debt or collateral of a position changes by its owner.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventUpdatePosition {
    pub position: Position,
    pub position_id: NonFungibleLocalId,
    pub borrowing_fee: Decimal,
}

/// Event emitted when a position is closed by its owner.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventClosePosition {
    pub position_id: NonFungibleLocalId,
    pub debt_repaid: Decimal,
    pub collateral_returned: Decimal,
}

/// Event emitted for every position closed by a liquidation.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidatePosition {
    pub position_id: NonFungibleLocalId,
}

/// Event emitted once per liquidation batch with its totals.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidation {
    pub liquidated: u64,
    pub recovery_mode: bool,
    pub price: Decimal,
    pub debt_offset: Decimal,
    pub collateral_to_pool: Decimal,
    pub debt_redistributed: Decimal,
    pub collateral_redistributed: Decimal,
    pub collateral_gas_compensation: Decimal,
    pub debt_gas_compensation: Decimal,
    pub collateral_surplus: Decimal,
}

/// Event emitted when the redistribution accumulators change.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRedistribution {
    pub l_coll: Decimal,
    pub l_debt: Decimal,
    pub total_stakes_snapshot: Decimal,
    pub total_collateral_snapshot: Decimal,
}

/// Event emitted for every position touched by a redemption.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRedeemPosition {
    pub position_id: NonFungibleLocalId,
    pub debt_redeemed: Decimal,
    pub collateral_drawn: Decimal,
    /// Fully redeemed or not
    pub fully_redeemed: bool,
}

/// Event emitted once per redemption.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRedemption {
    pub debt_redeemed: Decimal,
    pub collateral_drawn: Decimal,
    pub fee: Decimal,
    pub price: Decimal,
}

/// Event emitted when surplus collateral is claimed.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventClaimSurplus {
    pub position_id: NonFungibleLocalId,
    pub amount: Decimal,
}

#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventBaseRateUpdated {
    pub base_rate: Decimal,
    pub last_fee_operation: i64,
}

/// Event emitted when the protocol parameters are changed.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventParametersChanged {
    pub parameters: ProtocolParameters,
}

/// Event emitted when a Stability Pool deposit changes.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventDepositChange {
    pub deposit_id: NonFungibleLocalId,
    pub deposit: Deposit,
    pub collateral_gain: Decimal,
    pub reward_gain: Decimal,
}

/// Event emitted when the pool absorbs debt from a liquidation.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventOffset {
    pub debt_offset: Decimal,
    pub collateral_added: Decimal,
    pub loss_per_unit: Decimal,
    pub gain_per_unit: Decimal,
    pub p: Decimal,
    pub scale: u64,
    pub epoch: u64,
}

/// Event emitted when an offset empties the pool and a new epoch starts.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventEpochReset {
    pub epoch: u64,
}

/// Event emitted when `P` is rescaled.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventScaleChange {
    pub scale: u64,
    pub p: Decimal,
}

#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventFrontEndRegistered {
    pub front_end_id: NonFungibleLocalId,
    pub kickback_rate: Decimal,
}

/// Event emitted when reward tokens are issued to the pool.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRewardIssued {
    pub issued: Decimal,
    pub total_issued: Decimal,
}

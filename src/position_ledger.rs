//! # Position ledger
//!
//! Bookkeeping of all positions of the protocol: the active pool (collateral and debt of active
//! positions), the default pool (redistributed collateral and debt not yet applied to a position), the
//! stakes and the redistribution accumulators `L_coll` / `L_debt`.
//!
//! Redistribution is lazy. A redistribution bumps the accumulators by the amount per unit of stake, and
//! every position picks up `stake * (L_now - L_snapshot)` the next time it is touched. Stakes are
//! computed against the `total_stakes_snapshot / total_collateral_snapshot` pair taken after the last
//! liquidation, so a position opened after a redistribution does not share in it.
//!
//! The positions themselves live outside of the ledger (as NFT data in the component) and are reached
//! through a [`PositionStore`]. Every operation on the ledger is staged on copies and only committed when
//! it succeeds, so a failed operation leaves the ledger and the position untouched.

use crate::errors::*;
use crate::fixed_point::*;
use crate::shared_structs::*;
use scrypto::prelude::*;

/// Storage of the positions, keyed by receipt id.
pub trait PositionStore {
    /// Loads a position. `None` for ids that were never created.
    fn load(&self, id: &NonFungibleLocalId) -> Option<Position>;
    fn save(&mut self, id: &NonFungibleLocalId, position: &Position);
}

/// Writes that have not reached the underlying store yet. Reads see the staged version first.
pub struct StagedStore<'a, S: PositionStore> {
    inner: &'a mut S,
    staged: HashMap<NonFungibleLocalId, Position>,
}

impl<'a, S: PositionStore> StagedStore<'a, S> {
    pub fn new(inner: &'a mut S) -> Self {
        Self {
            inner,
            staged: HashMap::new(),
        }
    }

    pub fn load(&self, id: &NonFungibleLocalId) -> Option<Position> {
        self.staged
            .get(id)
            .cloned()
            .or_else(|| self.inner.load(id))
    }

    pub fn stage(&mut self, id: &NonFungibleLocalId, position: Position) {
        self.staged.insert(id.clone(), position);
    }

    pub fn commit(self) {
        for (id, position) in self.staged.iter() {
            self.inner.save(id, position);
        }
    }
}

/// Key of a position in the position index, `L_debt snapshot - debt / stake`.
///
/// Stakes are handed out so that the entire collateral per unit of stake is the same for every active
/// position. The entire debt per unit of stake is `debt / stake + L_debt - L_debt snapshot`, so ordering by
/// this key is ordering by the current NICR, pending rewards included. A redistribution moves `L_debt` for
/// all positions at once and leaves the key untouched. Must be taken after the stake is updated.
pub fn sort_key(position: &Position) -> ProtocolResult<Decimal> {
    if position.stake <= Decimal::ZERO {
        return Err(ProtocolError::invalid_state("Position without stake cannot be indexed."));
    }
    Ok(position.snapshot.l_debt - div_floor(position.debt, position.stake)?)
}

/// Debt and collateral of a position including its pending redistribution rewards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntireDebtAndColl {
    pub debt: Decimal,
    pub collateral: Decimal,
    pub pending_debt: Decimal,
    pub pending_collateral: Decimal,
}

/// Change requested by an adjustment. Positive values add to the position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionChange {
    pub debt_change: Decimal,
    pub collateral_change: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct PositionLedger {
    pub total_stakes: Decimal,
    pub total_stakes_snapshot: Decimal,
    pub total_collateral_snapshot: Decimal,
    pub l_coll: Decimal,
    pub l_debt: Decimal,
    pub last_coll_error: PreciseDecimal,
    pub last_debt_error: PreciseDecimal,
    pub active_collateral: Decimal,
    pub active_debt: Decimal,
    pub default_collateral: Decimal,
    pub default_debt: Decimal,
    pub active_positions: u64,
}

impl Default for PositionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionLedger {
    pub fn new() -> Self {
        Self {
            total_stakes: Decimal::ZERO,
            total_stakes_snapshot: Decimal::ZERO,
            total_collateral_snapshot: Decimal::ZERO,
            l_coll: Decimal::ZERO,
            l_debt: Decimal::ZERO,
            last_coll_error: PreciseDecimal::ZERO,
            last_debt_error: PreciseDecimal::ZERO,
            active_collateral: Decimal::ZERO,
            active_debt: Decimal::ZERO,
            default_collateral: Decimal::ZERO,
            default_debt: Decimal::ZERO,
            active_positions: 0,
        }
    }

    pub fn entire_system_debt(&self) -> Decimal {
        self.active_debt + self.default_debt
    }

    pub fn entire_system_collateral(&self) -> Decimal {
        self.active_collateral + self.default_collateral
    }

    pub fn tcr(&self, price: Decimal) -> ProtocolResult<Decimal> {
        collateral_ratio(self.entire_system_collateral(), self.entire_system_debt(), price)
    }

    pub fn is_recovery_mode(&self, price: Decimal, params: &ProtocolParameters) -> ProtocolResult<bool> {
        Ok(self.tcr(price)? < params.ccr)
    }

    //==================================================================
    //                       REDISTRIBUTION REWARDS
    //==================================================================

    /// Collateral and debt accrued by the position since its snapshot.
    pub fn pending_rewards(&self, position: &Position) -> ProtocolResult<(Decimal, Decimal)> {
        if !position.is_active() {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }
        let coll_per_stake = self.l_coll - position.snapshot.l_coll;
        let debt_per_stake = self.l_debt - position.snapshot.l_debt;
        if coll_per_stake.is_zero() && debt_per_stake.is_zero() {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }
        Ok((
            mul_floor(position.stake, coll_per_stake)?,
            mul_floor(position.stake, debt_per_stake)?,
        ))
    }

    pub fn entire_debt_and_coll(&self, position: &Position) -> ProtocolResult<EntireDebtAndColl> {
        let (pending_collateral, pending_debt) = self.pending_rewards(position)?;
        Ok(EntireDebtAndColl {
            debt: position.debt + pending_debt,
            collateral: position.collateral + pending_collateral,
            pending_debt,
            pending_collateral,
        })
    }

    pub fn icr(&self, position: &Position, price: Decimal) -> ProtocolResult<Decimal> {
        let entire = self.entire_debt_and_coll(position)?;
        collateral_ratio(entire.collateral, entire.debt, price)
    }

    /// Folds the pending rewards into the position, moving them from the default pool to the active
    /// pool, and refreshes the position's snapshot.
    pub fn apply_pending_rewards(&mut self, position: &mut Position) -> ProtocolResult<()> {
        if !position.is_active() {
            return Err(ProtocolError::invalid_state("Position is not active."));
        }
        let (pending_collateral, pending_debt) = self.pending_rewards(position)?;

        if !pending_collateral.is_zero() || !pending_debt.is_zero() {
            position.collateral += pending_collateral;
            position.debt += pending_debt;

            // Floor rounding keeps the sum of all pending rewards at or below the default pool.
            self.default_collateral = (self.default_collateral - pending_collateral).max(Decimal::ZERO);
            self.default_debt = (self.default_debt - pending_debt).max(Decimal::ZERO);
            self.active_collateral += pending_collateral;
            self.active_debt += pending_debt;
        }

        self.update_reward_snapshot(position);
        Ok(())
    }

    fn update_reward_snapshot(&self, position: &mut Position) {
        position.snapshot = RedistributionSnapshot {
            l_coll: self.l_coll,
            l_debt: self.l_debt,
        };
    }

    //==================================================================
    //                              STAKES
    //==================================================================

    pub fn compute_new_stake(&self, collateral: Decimal) -> ProtocolResult<Decimal> {
        if self.total_collateral_snapshot.is_zero() {
            return Ok(collateral);
        }
        mul_div_floor(
            collateral,
            self.total_stakes_snapshot,
            self.total_collateral_snapshot,
        )
    }

    /// Recomputes the stake of the position from its current collateral.
    pub fn update_stake(&mut self, position: &mut Position) -> ProtocolResult<Decimal> {
        let new_stake = self.compute_new_stake(position.collateral)?;
        self.total_stakes = self.total_stakes - position.stake + new_stake;
        position.stake = new_stake;
        Ok(new_stake)
    }

    pub fn remove_stake(&mut self, position: &mut Position) {
        self.total_stakes -= position.stake;
        position.stake = Decimal::ZERO;
    }

    /// Refreshes the stake correction pair. Called after every liquidation batch, once the liquidated
    /// collateral has left the active pool.
    pub fn update_system_snapshots(&mut self) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = self.entire_system_collateral();
    }

    /// Spreads debt and collateral over all active stakes by bumping `L_debt` / `L_coll`, carrying the
    /// rounding error into the next redistribution. The amounts land in the default pool.
    pub fn redistribute(&mut self, debt: Decimal, collateral: Decimal) -> ProtocolResult<()> {
        if debt.is_zero() && collateral.is_zero() {
            return Ok(());
        }
        if self.total_stakes.is_zero() {
            return Err(ProtocolError::bounds("Cannot redistribute without any stakes."));
        }

        let (coll_per_stake, coll_error) = div_with_remainder(
            PreciseDecimal::from(collateral) + self.last_coll_error,
            self.total_stakes,
        )?;
        let (debt_per_stake, debt_error) = div_with_remainder(
            PreciseDecimal::from(debt) + self.last_debt_error,
            self.total_stakes,
        )?;

        self.last_coll_error = coll_error;
        self.last_debt_error = debt_error;
        self.l_coll += coll_per_stake;
        self.l_debt += debt_per_stake;
        self.default_collateral += collateral;
        self.default_debt += debt;
        Ok(())
    }

    //==================================================================
    //                        BORROWER OPERATIONS
    //==================================================================

    /// Registers a new active position. `debt` includes the gas compensation reserve and the
    /// borrowing fee.
    pub fn open(
        &mut self,
        collateral: Decimal,
        debt: Decimal,
        price: Decimal,
        params: &ProtocolParameters,
    ) -> ProtocolResult<Position> {
        if collateral <= Decimal::ZERO || debt <= Decimal::ZERO {
            return Err(ProtocolError::invalid_amount("Collateral and debt must be positive."));
        }
        require_min_net_debt(debt, params)?;

        let icr = collateral_ratio(collateral, debt, price)?;
        if self.is_recovery_mode(price, params)? {
            if icr < params.ccr {
                return Err(ProtocolError::undercollateralized(
                    "In recovery mode a new position must be above the critical collateral ratio.",
                ));
            }
        } else {
            if icr < params.mcr {
                return Err(ProtocolError::undercollateralized(
                    "Position would be below the minimum collateral ratio.",
                ));
            }
            let new_tcr = collateral_ratio(
                self.entire_system_collateral() + collateral,
                self.entire_system_debt() + debt,
                price,
            )?;
            if new_tcr < params.ccr {
                return Err(ProtocolError::undercollateralized(
                    "Opening would push the system into recovery mode.",
                ));
            }
        }

        let mut ledger = self.clone();
        let mut position = Position {
            debt,
            collateral,
            stake: Decimal::ZERO,
            status: PositionStatus::Active,
            snapshot: RedistributionSnapshot::default(),
            sort_key: Decimal::ZERO,
            surplus_collateral: Decimal::ZERO,
        };
        ledger.update_reward_snapshot(&mut position);
        ledger.update_stake(&mut position)?;
        position.sort_key = sort_key(&position)?;
        ledger.active_collateral += collateral;
        ledger.active_debt += debt;
        ledger.active_positions += 1;

        *self = ledger;
        Ok(position)
    }

    /// Changes the debt and / or collateral of an active position, after applying its pending rewards.
    /// Returns the index key the position was stored under before the change.
    pub fn adjust(
        &mut self,
        position: &mut Position,
        change: PositionChange,
        price: Decimal,
        params: &ProtocolParameters,
    ) -> ProtocolResult<Decimal> {
        if change.debt_change.is_zero() && change.collateral_change.is_zero() {
            return Err(ProtocolError::invalid_amount("Adjustment without any change."));
        }
        let recovery_mode = self.is_recovery_mode(price, params)?;

        self.staged(position, |ledger, position| {
            let old_key = position.sort_key;
            ledger.apply_pending_rewards(position)?;

            let old_icr = collateral_ratio(position.collateral, position.debt, price)?;
            let new_debt = position.debt + change.debt_change;
            let new_collateral = position.collateral + change.collateral_change;

            if new_collateral <= Decimal::ZERO {
                return Err(ProtocolError::invalid_amount(
                    "Cannot withdraw all collateral of an open position.",
                ));
            }
            if new_debt <= Decimal::ZERO {
                return Err(ProtocolError::invalid_amount("Cannot repay more than the debt."));
            }
            if change.debt_change < Decimal::ZERO {
                require_min_net_debt(new_debt, params)?;
            }

            let new_icr = collateral_ratio(new_collateral, new_debt, price)?;
            if recovery_mode {
                if change.collateral_change < Decimal::ZERO {
                    return Err(ProtocolError::undercollateralized(
                        "Collateral withdrawal is not allowed in recovery mode.",
                    ));
                }
                if change.debt_change > Decimal::ZERO && new_icr < params.ccr {
                    return Err(ProtocolError::undercollateralized(
                        "In recovery mode new debt requires a ratio above the critical collateral ratio.",
                    ));
                }
                if new_icr < old_icr {
                    return Err(ProtocolError::undercollateralized(
                        "In recovery mode an adjustment cannot decrease the collateral ratio.",
                    ));
                }
            } else {
                if new_icr < params.mcr {
                    return Err(ProtocolError::undercollateralized(
                        "Position would be below the minimum collateral ratio.",
                    ));
                }
                let new_tcr = collateral_ratio(
                    ledger.entire_system_collateral() + change.collateral_change,
                    ledger.entire_system_debt() + change.debt_change,
                    price,
                )?;
                if new_tcr < params.ccr {
                    return Err(ProtocolError::undercollateralized(
                        "Adjustment would push the system into recovery mode.",
                    ));
                }
            }

            position.debt = new_debt;
            position.collateral = new_collateral;
            ledger.active_debt += change.debt_change;
            ledger.active_collateral += change.collateral_change;
            ledger.update_stake(position)?;
            position.sort_key = sort_key(position)?;

            Ok(old_key)
        })
    }

    /// Closes an active position on behalf of its owner. Returns its debt and collateral after pending
    /// rewards, which the caller settles.
    pub fn close(
        &mut self,
        position: &mut Position,
        price: Decimal,
        params: &ProtocolParameters,
    ) -> ProtocolResult<EntireDebtAndColl> {
        if !position.is_active() {
            return Err(ProtocolError::invalid_state("Position is not active."));
        }
        if self.active_positions <= 1 {
            return Err(ProtocolError::invalid_state("Cannot close the last active position."));
        }
        if self.is_recovery_mode(price, params)? {
            return Err(ProtocolError::undercollateralized(
                "Positions cannot be closed in recovery mode.",
            ));
        }

        self.staged(position, |ledger, position| {
            ledger.apply_pending_rewards(position)?;
            let entire = EntireDebtAndColl {
                debt: position.debt,
                collateral: position.collateral,
                pending_debt: Decimal::ZERO,
                pending_collateral: Decimal::ZERO,
            };

            let new_tcr = collateral_ratio(
                ledger.entire_system_collateral() - entire.collateral,
                ledger.entire_system_debt() - entire.debt,
                price,
            )?;
            if new_tcr < params.ccr {
                return Err(ProtocolError::undercollateralized(
                    "Closing would push the system into recovery mode.",
                ));
            }

            ledger.remove_stake(position);
            ledger.active_debt -= entire.debt;
            ledger.active_collateral -= entire.collateral;
            ledger.active_positions -= 1;
            position.debt = Decimal::ZERO;
            position.collateral = Decimal::ZERO;
            position.status = PositionStatus::ClosedByOwner;

            Ok(entire)
        })
    }

    /// Runs `operation` on copies of the ledger and the position, committing both only on success.
    pub fn staged<T>(
        &mut self,
        position: &mut Position,
        operation: impl FnOnce(&mut Self, &mut Position) -> ProtocolResult<T>,
    ) -> ProtocolResult<T> {
        let mut ledger = self.clone();
        let mut staged_position = position.clone();
        let result = operation(&mut ledger, &mut staged_position)?;
        *self = ledger;
        *position = staged_position;
        Ok(result)
    }
}

pub fn require_min_net_debt(debt: Decimal, params: &ProtocolParameters) -> ProtocolResult<()> {
    if debt - params.gas_compensation < params.min_net_debt {
        return Err(ProtocolError::invalid_amount(format!(
            "Net debt must be at least {}.",
            params.min_net_debt
        )));
    }
    Ok(())
}

//! # Liquidation engine
//!
//! Decides which positions can be liquidated and how their debt and collateral are disposed of:
//! offset against the Stability Pool deposits first, redistributed over all other active positions for
//! whatever the pool cannot absorb.
//!
//! A batch is processed in ascending ICR order against the price and totals taken at batch start. The
//! running system totals only decide when a batch that started in recovery mode is back to normal. All
//! position writes, stake removals and the final redistribution are staged and only committed when the
//! whole batch succeeds. The Stability Pool offset of the batch totals is left to the caller, so it
//! happens once per batch.

use crate::errors::*;
use crate::fixed_point::*;
use crate::position_ledger::*;
use crate::shared_structs::*;
use crate::sorted_positions::*;
use scrypto::prelude::*;

/// How a single liquidated position is disposed of.
#[derive(Clone, Debug, PartialEq)]
pub struct LiquidationValues {
    pub entire_debt: Decimal,
    pub entire_coll: Decimal,
    pub coll_gas_compensation: Decimal,
    pub debt_gas_compensation: Decimal,
    pub debt_to_offset: Decimal,
    pub coll_to_send_to_pool: Decimal,
    pub debt_to_redistribute: Decimal,
    pub coll_to_redistribute: Decimal,
    pub coll_surplus: Decimal,
}

impl LiquidationValues {
    fn empty(entire: &EntireDebtAndColl) -> Self {
        Self {
            entire_debt: entire.debt,
            entire_coll: entire.collateral,
            coll_gas_compensation: Decimal::ZERO,
            debt_gas_compensation: Decimal::ZERO,
            debt_to_offset: Decimal::ZERO,
            coll_to_send_to_pool: Decimal::ZERO,
            debt_to_redistribute: Decimal::ZERO,
            coll_to_redistribute: Decimal::ZERO,
            coll_surplus: Decimal::ZERO,
        }
    }
}

/// Sum of the liquidation values of a batch.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct LiquidationTotals {
    pub liquidated: Vec<NonFungibleLocalId>,
    pub recovery_mode: bool,
    pub debt_in_sequence: Decimal,
    pub coll_in_sequence: Decimal,
    pub coll_gas_compensation: Decimal,
    pub debt_gas_compensation: Decimal,
    pub debt_to_offset: Decimal,
    pub coll_to_send_to_pool: Decimal,
    pub debt_to_redistribute: Decimal,
    pub coll_to_redistribute: Decimal,
    pub coll_surplus: Decimal,
}

impl LiquidationTotals {
    pub fn new(recovery_mode: bool) -> Self {
        Self {
            liquidated: vec![],
            recovery_mode,
            debt_in_sequence: Decimal::ZERO,
            coll_in_sequence: Decimal::ZERO,
            coll_gas_compensation: Decimal::ZERO,
            debt_gas_compensation: Decimal::ZERO,
            debt_to_offset: Decimal::ZERO,
            coll_to_send_to_pool: Decimal::ZERO,
            debt_to_redistribute: Decimal::ZERO,
            coll_to_redistribute: Decimal::ZERO,
            coll_surplus: Decimal::ZERO,
        }
    }

    fn add(&mut self, id: NonFungibleLocalId, values: &LiquidationValues) {
        self.liquidated.push(id);
        self.debt_in_sequence += values.entire_debt;
        self.coll_in_sequence += values.entire_coll;
        self.coll_gas_compensation += values.coll_gas_compensation;
        self.debt_gas_compensation += values.debt_gas_compensation;
        self.debt_to_offset += values.debt_to_offset;
        self.coll_to_send_to_pool += values.coll_to_send_to_pool;
        self.debt_to_redistribute += values.debt_to_redistribute;
        self.coll_to_redistribute += values.coll_to_redistribute;
        self.coll_surplus += values.coll_surplus;
    }
}

/// Splits debt and collateral (after gas compensation) between the pool and redistribution.
pub fn offset_and_redistribution_values(
    debt: Decimal,
    coll: Decimal,
    pool_deposits: Decimal,
) -> ProtocolResult<(Decimal, Decimal, Decimal, Decimal)> {
    if pool_deposits > Decimal::ZERO && debt > Decimal::ZERO {
        let debt_to_offset = debt.min(pool_deposits);
        let coll_to_send_to_pool = mul_div_floor(coll, debt_to_offset, debt)?;
        Ok((
            debt_to_offset,
            coll_to_send_to_pool,
            debt - debt_to_offset,
            coll - coll_to_send_to_pool,
        ))
    } else {
        Ok((Decimal::ZERO, Decimal::ZERO, debt, coll))
    }
}

/// Liquidation values of a position below the MCR, or of any position liquidated in normal mode.
pub fn normal_liquidation_values(
    entire: &EntireDebtAndColl,
    pool_deposits: Decimal,
    params: &ProtocolParameters,
) -> ProtocolResult<LiquidationValues> {
    let mut values = LiquidationValues::empty(entire);
    values.coll_gas_compensation = mul_floor(entire.collateral, params.coll_gas_compensation_rate)?;
    values.debt_gas_compensation = params.gas_compensation.min(entire.debt);

    let (debt_to_offset, coll_to_send_to_pool, debt_to_redistribute, coll_to_redistribute) =
        offset_and_redistribution_values(
            entire.debt,
            entire.collateral - values.coll_gas_compensation,
            pool_deposits,
        )?;
    values.debt_to_offset = debt_to_offset;
    values.coll_to_send_to_pool = coll_to_send_to_pool;
    values.debt_to_redistribute = debt_to_redistribute;
    values.coll_to_redistribute = coll_to_redistribute;
    Ok(values)
}

/// Liquidation values in recovery mode. `None` when the position cannot be liquidated.
pub fn recovery_liquidation_values(
    entire: &EntireDebtAndColl,
    icr: Decimal,
    tcr: Decimal,
    pool_deposits: Decimal,
    price: Decimal,
    params: &ProtocolParameters,
) -> ProtocolResult<Option<LiquidationValues>> {
    if icr <= Decimal::ONE {
        // Nothing the pool would want: everything goes to redistribution.
        let mut values = LiquidationValues::empty(entire);
        values.coll_gas_compensation = mul_floor(entire.collateral, params.coll_gas_compensation_rate)?;
        values.debt_gas_compensation = params.gas_compensation.min(entire.debt);
        values.debt_to_redistribute = entire.debt;
        values.coll_to_redistribute = entire.collateral - values.coll_gas_compensation;
        return Ok(Some(values));
    }

    if icr < params.mcr {
        return normal_liquidation_values(entire, pool_deposits, params).map(Some);
    }

    if icr < tcr && entire.debt <= pool_deposits {
        // Capped at the MCR, the rest of the collateral stays claimable by the owner.
        let mut values = LiquidationValues::empty(entire);
        let capped_coll = mul_div_floor(entire.debt, params.mcr, price)?.min(entire.collateral);
        values.coll_gas_compensation = mul_floor(capped_coll, params.coll_gas_compensation_rate)?;
        values.debt_gas_compensation = params.gas_compensation.min(entire.debt);
        values.debt_to_offset = entire.debt;
        values.coll_to_send_to_pool = capped_coll - values.coll_gas_compensation;
        values.coll_surplus = entire.collateral - capped_coll;
        return Ok(Some(values));
    }

    Ok(None)
}

/// Liquidates `ids` at `price`, skipping positions that are unknown, closed, or healthy.
///
/// `pool_deposits` is what the Stability Pool can absorb. Fails with `InvalidState` when nothing was
/// liquidated. Never liquidates the last active position.
pub fn batch_liquidate<S: PositionStore, I: PositionIndex>(
    ledger: &mut PositionLedger,
    store: &mut S,
    index: &mut I,
    ids: &[NonFungibleLocalId],
    price: Decimal,
    pool_deposits: Decimal,
    params: &ProtocolParameters,
) -> ProtocolResult<LiquidationTotals> {
    if price <= Decimal::ZERO {
        return Err(ProtocolError::bad_price("Price must be positive."));
    }

    // Ascending ICR, ties by id, each id once.
    let mut candidates: Vec<(Decimal, NonFungibleLocalId)> = vec![];
    for id in ids {
        if candidates.iter().any(|(_, seen)| seen == id) {
            continue;
        }
        let Some(position) = store.load(id) else {
            continue;
        };
        if !position.is_active() {
            continue;
        }
        candidates.push((ledger.icr(&position, price)?, id.clone()));
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let ordered: Vec<NonFungibleLocalId> = candidates.into_iter().map(|(_, id)| id).collect();

    liquidate_in_order(ledger, store, index, &ordered, false, price, pool_deposits, params)
}

/// Walks the index from the riskiest position and liquidates up to `count` positions, stopping at the
/// first one that cannot be liquidated.
pub fn liquidate_lowest<S: PositionStore, I: PositionIndex>(
    ledger: &mut PositionLedger,
    store: &mut S,
    index: &mut I,
    count: usize,
    price: Decimal,
    pool_deposits: Decimal,
    params: &ProtocolParameters,
) -> ProtocolResult<LiquidationTotals> {
    if price <= Decimal::ZERO {
        return Err(ProtocolError::bad_price("Price must be positive."));
    }
    let ordered: Vec<NonFungibleLocalId> = index.ascending().take(count).map(|(_, id)| id).collect();
    liquidate_in_order(ledger, store, index, &ordered, true, price, pool_deposits, params)
}

/// Liquidates `ordered` front to back. A position that cannot be liquidated is skipped, or ends the run
/// when `stop_at_first_skip` is set.
#[allow(clippy::too_many_arguments)]
fn liquidate_in_order<S: PositionStore, I: PositionIndex>(
    ledger: &mut PositionLedger,
    store: &mut S,
    index: &mut I,
    ordered: &[NonFungibleLocalId],
    stop_at_first_skip: bool,
    price: Decimal,
    pool_deposits: Decimal,
    params: &ProtocolParameters,
) -> ProtocolResult<LiquidationTotals> {
    let mut staged_ledger = ledger.clone();
    let mut staged_store = StagedStore::new(store);

    let recovery_mode = staged_ledger.is_recovery_mode(price, params)?;
    let mut totals = LiquidationTotals::new(recovery_mode);
    let mut remaining_deposits = pool_deposits;
    let mut system_debt = staged_ledger.entire_system_debt();
    let mut system_coll = staged_ledger.entire_system_collateral();
    let mut back_to_normal = !recovery_mode;
    let mut removals: Vec<(NonFungibleLocalId, Decimal)> = vec![];

    for id in ordered {
        if staged_ledger.active_positions <= 1 {
            break;
        }
        let mut position = match staged_store.load(id) {
            Some(position) if position.is_active() => position,
            _ if stop_at_first_skip => break,
            _ => continue,
        };
        let icr = staged_ledger.icr(&position, price)?;
        let entire = staged_ledger.entire_debt_and_coll(&position)?;

        let values = if back_to_normal {
            if icr >= params.mcr {
                None
            } else {
                Some(normal_liquidation_values(&entire, remaining_deposits, params)?)
            }
        } else if icr >= params.mcr && remaining_deposits.is_zero() {
            None
        } else {
            let tcr = collateral_ratio(system_coll, system_debt, price)?;
            recovery_liquidation_values(&entire, icr, tcr, remaining_deposits, price, params)?
        };
        let values = match values {
            Some(values) => values,
            None if stop_at_first_skip => break,
            None => continue,
        };

        staged_ledger.apply_pending_rewards(&mut position)?;
        staged_ledger.remove_stake(&mut position);
        staged_ledger.active_debt -= entire.debt;
        staged_ledger.active_collateral -= entire.collateral;
        staged_ledger.active_positions -= 1;

        removals.push((id.clone(), position.sort_key));
        position.debt = Decimal::ZERO;
        position.collateral = Decimal::ZERO;
        position.status = PositionStatus::ClosedByLiquidation;
        position.surplus_collateral += values.coll_surplus;
        staged_store.stage(id, position);

        remaining_deposits -= values.debt_to_offset;
        system_debt -= values.debt_to_offset;
        system_coll -= values.coll_to_send_to_pool + values.coll_gas_compensation + values.coll_surplus;
        if !back_to_normal {
            back_to_normal = collateral_ratio(system_coll, system_debt, price)? >= params.ccr;
        }

        totals.add(id.clone(), &values);
    }

    if totals.liquidated.is_empty() {
        return Err(ProtocolError::invalid_state("Nothing to liquidate."));
    }
    if !removals.iter().all(|(id, key)| index.contains(id, *key)) {
        return Err(ProtocolError::invalid_state("Liquidated position is missing from the index."));
    }

    staged_ledger.redistribute(totals.debt_to_redistribute, totals.coll_to_redistribute)?;
    staged_ledger.update_system_snapshots();

    for (id, key) in removals {
        index.remove(&id, key)?;
    }
    *ledger = staged_ledger;
    staged_store.commit();

    Ok(totals)
}

/// True when the riskiest position is below the MCR at `price`.
pub fn has_undercollateralized_positions<S: PositionStore, I: PositionIndex>(
    ledger: &PositionLedger,
    store: &S,
    index: &I,
    price: Decimal,
    params: &ProtocolParameters,
) -> ProtocolResult<bool> {
    let lowest = index.ascending().next();
    match lowest.and_then(|(_, id)| store.load(&id)) {
        Some(position) if position.is_active() => Ok(ledger.icr(&position, price)? < params.mcr),
        _ => Ok(false),
    }
}

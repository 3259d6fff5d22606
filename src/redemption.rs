//! # Redemption engine
//! Exchanging bUSD for collateral at face value against the riskiest positions, and the decaying base
//! rate that prices both redemptions and borrowing.

use crate::errors::*;
use crate::fixed_point::*;
use crate::position_ledger::*;
use crate::shared_structs::*;
use crate::sorted_positions::*;
use scrypto::prelude::*;

/// Minutes the decay is capped at, about a thousand years.
const MAX_DECAY_MINUTES: i64 = 525_600_000;

/// Base rate shared by the borrowing and redemption fees. Grows with redemption volume and decays
/// per elapsed minute.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct BaseRate {
    pub base_rate: Decimal,
    /// Unix second of the last fee operation that moved the decay clock.
    pub last_fee_operation: i64,
}

impl BaseRate {
    pub fn new(now: i64) -> Self {
        Self {
            base_rate: Decimal::ZERO,
            last_fee_operation: now,
        }
    }

    fn minutes_passed(&self, now: i64) -> i64 {
        ((now - self.last_fee_operation) / 60).max(0)
    }

    pub fn decayed(&self, now: i64, params: &ProtocolParameters) -> ProtocolResult<Decimal> {
        let minutes = self.minutes_passed(now).min(MAX_DECAY_MINUTES);
        let decay = params
            .minute_decay_factor
            .checked_powi(minutes)
            .ok_or_else(|| ProtocolError::bounds("decay overflow"))?;
        mul_floor(self.base_rate, decay)
    }

    pub fn borrowing_rate(&self, now: i64, params: &ProtocolParameters) -> ProtocolResult<Decimal> {
        Ok((params.borrowing_fee_floor + self.decayed(now, params)?).min(params.max_borrowing_fee))
    }

    pub fn borrowing_fee(&self, amount: Decimal, now: i64, params: &ProtocolParameters) -> ProtocolResult<Decimal> {
        mul_floor(amount, self.borrowing_rate(now, params)?)
    }

    /// Borrowing only decays the base rate, it never raises it.
    pub fn decay_on_borrowing(&mut self, now: i64, params: &ProtocolParameters) -> ProtocolResult<()> {
        self.base_rate = self.decayed(now, params)?;
        self.touch(now);
        Ok(())
    }

    /// Raises the base rate by the redeemed fraction of the supply, divided by `beta`.
    pub fn update_from_redemption(
        &mut self,
        collateral_drawn: Decimal,
        price: Decimal,
        total_debt_supply: Decimal,
        now: i64,
        params: &ProtocolParameters,
    ) -> ProtocolResult<Decimal> {
        let redeemed_fraction = mul_div_floor(collateral_drawn, price, total_debt_supply)?;
        let new_base_rate = (self.decayed(now, params)? + div_floor(redeemed_fraction, params.beta)?)
            .min(Decimal::ONE);
        if new_base_rate <= Decimal::ZERO {
            return Err(ProtocolError::invalid_state("Base rate must be positive after a redemption."));
        }
        self.base_rate = new_base_rate;
        self.touch(now);
        Ok(new_base_rate)
    }

    pub fn redemption_rate(&self, params: &ProtocolParameters) -> Decimal {
        (params.redemption_fee_floor + self.base_rate).min(Decimal::ONE)
    }

    /// The decay clock only moves in whole minutes, so frequent operations cannot stall the decay.
    fn touch(&mut self, now: i64) {
        if self.minutes_passed(now) >= 1 {
            self.last_fee_operation = now;
        }
    }
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct RedeemedPosition {
    pub id: NonFungibleLocalId,
    pub debt_redeemed: Decimal,
    pub collateral_drawn: Decimal,
    pub fully_redeemed: bool,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct RedemptionOutcome {
    pub debt_redeemed: Decimal,
    /// Collateral taken from the positions, fee included.
    pub collateral_drawn: Decimal,
    pub fee: Decimal,
    pub base_rate: Decimal,
    /// bUSD gas compensation reserve of the fully redeemed positions, to be burned.
    pub gas_compensation_to_burn: Decimal,
    /// Collateral left in fully redeemed positions, claimable by their owners.
    pub surplus_collateral: Decimal,
    pub positions: Vec<RedeemedPosition>,
}

/// Redeems up to `amount` bUSD against the positions with the lowest ratio, skipping positions below
/// the MCR. Stops at a partial redemption that would leave the position under the minimum net debt.
#[allow(clippy::too_many_arguments)]
pub fn redeem<S: PositionStore, I: PositionIndex>(
    ledger: &mut PositionLedger,
    store: &mut S,
    index: &mut I,
    base_rate: &mut BaseRate,
    amount: Decimal,
    max_fee_percentage: Decimal,
    price: Decimal,
    total_debt_supply: Decimal,
    now: i64,
    params: &ProtocolParameters,
) -> ProtocolResult<RedemptionOutcome> {
    if amount <= Decimal::ZERO {
        return Err(ProtocolError::invalid_amount("Redemption amount must be positive."));
    }
    if amount > total_debt_supply {
        return Err(ProtocolError::invalid_amount("Redemption amount exceeds the supply."));
    }
    if max_fee_percentage < params.redemption_fee_floor || max_fee_percentage > Decimal::ONE {
        return Err(ProtocolError::invalid_amount(
            "Max fee percentage must be between the fee floor and 100%.",
        ));
    }
    if price <= Decimal::ZERO {
        return Err(ProtocolError::bad_price("Price must be positive."));
    }
    if ledger.tcr(price)? < params.mcr {
        return Err(ProtocolError::undercollateralized(
            "Cannot redeem while the system is below the minimum collateral ratio.",
        ));
    }

    let mut staged_ledger = ledger.clone();
    let mut staged_store = StagedStore::new(store);
    let mut remaining = amount;
    let mut outcome = RedemptionOutcome {
        debt_redeemed: Decimal::ZERO,
        collateral_drawn: Decimal::ZERO,
        fee: Decimal::ZERO,
        base_rate: base_rate.base_rate,
        gas_compensation_to_burn: Decimal::ZERO,
        surplus_collateral: Decimal::ZERO,
        positions: vec![],
    };
    let mut removals: Vec<(NonFungibleLocalId, Decimal)> = vec![];
    let mut reinsert: Option<(NonFungibleLocalId, Decimal, Decimal)> = None;

    for (_, id) in index.ascending() {
        if remaining.is_zero() {
            break;
        }
        if params.max_redemption_iterations > 0
            && outcome.positions.len() as u64 >= params.max_redemption_iterations
        {
            break;
        }
        let Some(mut position) = staged_store.load(&id) else {
            continue;
        };
        if !position.is_active() || staged_ledger.icr(&position, price)? < params.mcr {
            continue;
        }

        staged_ledger.apply_pending_rewards(&mut position)?;
        let debt_lot = remaining.min(position.debt - params.gas_compensation);
        let coll_lot = div_floor(debt_lot, price)?.min(position.collateral);
        let new_debt = position.debt - debt_lot;
        let new_coll = position.collateral - coll_lot;

        let fully_redeemed = new_debt <= params.gas_compensation;
        if fully_redeemed {
            if staged_ledger.active_positions <= 1 {
                break;
            }
            staged_ledger.remove_stake(&mut position);
            staged_ledger.active_debt -= position.debt;
            staged_ledger.active_collateral -= position.collateral;
            staged_ledger.active_positions -= 1;

            removals.push((id.clone(), position.sort_key));
            outcome.gas_compensation_to_burn += new_debt;
            outcome.surplus_collateral += new_coll;
            position.surplus_collateral += new_coll;
            position.debt = Decimal::ZERO;
            position.collateral = Decimal::ZERO;
            position.status = PositionStatus::ClosedByRedemption;
        } else {
            if new_debt - params.gas_compensation < params.min_net_debt {
                break;
            }
            let old_key = position.sort_key;
            staged_ledger.active_debt -= debt_lot;
            staged_ledger.active_collateral -= coll_lot;
            position.debt = new_debt;
            position.collateral = new_coll;
            staged_ledger.update_stake(&mut position)?;
            position.sort_key = sort_key(&position)?;
            reinsert = Some((id.clone(), old_key, position.sort_key));
        }

        staged_store.stage(&id, position);
        remaining -= debt_lot;
        outcome.debt_redeemed += debt_lot;
        outcome.collateral_drawn += coll_lot;
        outcome.positions.push(RedeemedPosition {
            id,
            debt_redeemed: debt_lot,
            collateral_drawn: coll_lot,
            fully_redeemed,
        });

        if !fully_redeemed {
            break;
        }
    }

    if outcome.debt_redeemed.is_zero() {
        return Err(ProtocolError::invalid_state("Unable to redeem any amount."));
    }

    let mut staged_base_rate = base_rate.clone();
    outcome.base_rate = staged_base_rate.update_from_redemption(
        outcome.collateral_drawn,
        price,
        total_debt_supply,
        now,
        params,
    )?;
    let fee_rate = staged_base_rate.redemption_rate(params);
    if fee_rate > max_fee_percentage {
        return Err(ProtocolError::invalid_amount("Redemption fee exceeds the accepted maximum."));
    }
    outcome.fee = mul_floor(outcome.collateral_drawn, fee_rate)?;

    let all_indexed = removals.iter().all(|(id, key)| index.contains(id, *key))
        && reinsert.iter().all(|(id, old_key, _)| index.contains(id, *old_key));
    if !all_indexed {
        return Err(ProtocolError::invalid_state("Redeemed position is missing from the index."));
    }

    // The reinsert is the only index write that can still fail, so it goes first.
    if let Some((id, old_key, new_key)) = reinsert {
        if let Err(error) = index.reinsert(id.clone(), old_key, new_key) {
            if !index.contains(&id, old_key) {
                index.insert(id, old_key)?;
            }
            return Err(error);
        }
    }
    for (id, key) in removals {
        index.remove(&id, key)?;
    }
    *ledger = staged_ledger;
    *base_rate = staged_base_rate;
    staged_store.commit();

    Ok(outcome)
}

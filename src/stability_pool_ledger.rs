//! # Stability Pool ledger
//!
//! Product-sum accounting of the Stability Pool. Depositors are never iterated: an offset only updates
//! a handful of global accumulators and every deposit reconciles against them when it is touched.
//!
//! - `P` is the running product of `(1 - loss per unit)` over all offsets. A deposit made when the product
//!   was `P0` is worth `initial_value * P / P0` now.
//! - `S[epoch][scale]` is the running sum of `collateral gain per unit * P`. A deposit's collateral gain
//!   is `initial_value * (S - S0) / P0`.
//! - `G[epoch][scale]` does the same as `S` for the reward token, fed by the issuance schedule.
//!
//! When `P` falls below 1e-9 it is multiplied by 1e9 and the scale increments, so the product keeps its
//! significant digits. An offset that empties the pool starts a new epoch with `P = 1`; every deposit
//! made in an earlier epoch is worth zero from then on.

use crate::errors::*;
use crate::fixed_point::*;
use crate::shared_structs::*;
use scrypto::prelude::*;

/// Outcome of an offset, for the caller to emit.
#[derive(Clone, Debug, PartialEq)]
pub struct OffsetOutcome {
    pub loss_per_unit: Decimal,
    pub gain_per_unit: Decimal,
    pub new_p: Decimal,
    pub scale: u64,
    pub epoch: u64,
    pub epoch_reset: bool,
    pub rescaled: bool,
}

/// What a provide / withdraw pays out, or took in.
#[derive(Clone, Debug, PartialEq)]
pub struct DepositorPayout {
    /// Deposit value before the change, after all absorbed losses.
    pub compounded_before: Decimal,
    /// Debt tokens to return to the depositor.
    pub withdrawn: Decimal,
    pub collateral_gain: Decimal,
    /// Reward tokens for the depositor, after the front end's cut.
    pub reward_gain: Decimal,
    /// Reward tokens credited to the deposit's front end.
    pub front_end_reward: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct StabilityPoolLedger {
    pub p: Decimal,
    pub current_scale: u64,
    pub current_epoch: u64,
    pub total_deposits: Decimal,
    /// Collateral held for depositors and not yet paid out.
    pub total_collateral: Decimal,
    pub epoch_to_scale_to_sum: HashMap<(u64, u64), Decimal>,
    pub epoch_to_scale_to_g: HashMap<(u64, u64), Decimal>,
    pub last_coll_error: PreciseDecimal,
    pub last_reward_error: PreciseDecimal,
}

impl Default for StabilityPoolLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityPoolLedger {
    pub fn new() -> Self {
        Self {
            p: Decimal::ONE,
            current_scale: 0,
            current_epoch: 0,
            total_deposits: Decimal::ZERO,
            total_collateral: Decimal::ZERO,
            epoch_to_scale_to_sum: HashMap::new(),
            epoch_to_scale_to_g: HashMap::new(),
            last_coll_error: PreciseDecimal::ZERO,
            last_reward_error: PreciseDecimal::ZERO,
        }
    }

    pub fn sum_at(&self, epoch: u64, scale: u64) -> Decimal {
        self.epoch_to_scale_to_sum
            .get(&(epoch, scale))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn g_at(&self, epoch: u64, scale: u64) -> Decimal {
        self.epoch_to_scale_to_g
            .get(&(epoch, scale))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn current_snapshot(&self) -> DepositSnapshot {
        DepositSnapshot {
            s: self.sum_at(self.current_epoch, self.current_scale),
            p: self.p,
            g: self.g_at(self.current_epoch, self.current_scale),
            scale: self.current_scale,
            epoch: self.current_epoch,
        }
    }

    //==================================================================
    //                             OFFSET
    //==================================================================

    /// Cancels `debt_to_offset` against the pool deposits and hands `coll_to_add` to the depositors.
    pub fn offset(&mut self, debt_to_offset: Decimal, coll_to_add: Decimal) -> ProtocolResult<OffsetOutcome> {
        let mut outcome = OffsetOutcome {
            loss_per_unit: Decimal::ZERO,
            gain_per_unit: Decimal::ZERO,
            new_p: self.p,
            scale: self.current_scale,
            epoch: self.current_epoch,
            epoch_reset: false,
            rescaled: false,
        };

        if debt_to_offset.is_zero() && coll_to_add.is_zero() {
            return Ok(outcome);
        }
        if debt_to_offset < Decimal::ZERO || coll_to_add < Decimal::ZERO {
            return Err(ProtocolError::invalid_amount("Offset amounts cannot be negative."));
        }
        if self.total_deposits.is_zero() {
            return Err(ProtocolError::bounds("Cannot offset against an empty pool."));
        }
        if debt_to_offset > self.total_deposits {
            return Err(ProtocolError::bounds("Offset exceeds the pool deposits."));
        }

        let (gain_per_unit, coll_error) = div_with_remainder(
            PreciseDecimal::from(coll_to_add) + self.last_coll_error,
            self.total_deposits,
        )?;

        let mut loss_per_unit = if debt_to_offset == self.total_deposits {
            Decimal::ONE
        } else {
            div_ceil(debt_to_offset, self.total_deposits)?
        };
        // A loss rounding up to the whole unit empties the pool just the same.
        if loss_per_unit >= Decimal::ONE {
            loss_per_unit = Decimal::ONE;
        }

        let marginal_gain = mul_floor(gain_per_unit, self.p)?;

        // Next (p, scale, epoch), computed before anything is written.
        let (new_p, new_scale, new_epoch) = if loss_per_unit == Decimal::ONE {
            outcome.epoch_reset = true;
            (Decimal::ONE, 0, self.current_epoch + 1)
        } else {
            let product = PreciseDecimal::from(self.p)
                .checked_mul(PreciseDecimal::from(Decimal::ONE - loss_per_unit))
                .ok_or_else(|| ProtocolError::bounds("P overflow"))?;

            let (product, scale) = if product < PreciseDecimal::from(p_rescale_threshold()) {
                outcome.rescaled = true;
                (
                    product.checked_mul(PreciseDecimal::from(rescale_factor())),
                    self.current_scale + 1,
                )
            } else {
                (Some(product), self.current_scale)
            };
            let new_p = product
                .and_then(|p| p.checked_truncate(RoundingMode::ToZero))
                .ok_or_else(|| ProtocolError::bounds("P overflow"))?;

            if new_p <= Decimal::ZERO {
                return Err(ProtocolError::bounds("P fell to zero."));
            }
            (new_p, scale, self.current_epoch)
        };

        let key = (self.current_epoch, self.current_scale);
        let sum = self.sum_at(key.0, key.1) + marginal_gain;
        self.epoch_to_scale_to_sum.insert(key, sum);
        self.last_coll_error = coll_error;
        self.p = new_p;
        self.current_scale = new_scale;
        self.current_epoch = new_epoch;
        self.total_deposits -= debt_to_offset;
        self.total_collateral += coll_to_add;

        outcome.loss_per_unit = loss_per_unit;
        outcome.gain_per_unit = gain_per_unit;
        outcome.new_p = self.p;
        outcome.scale = self.current_scale;
        outcome.epoch = self.current_epoch;
        Ok(outcome)
    }

    /// Adds freshly issued reward tokens to `G`. Returns false, distributing nothing, while the pool is
    /// empty.
    pub fn distribute_reward(&mut self, issued: Decimal) -> ProtocolResult<bool> {
        if issued <= Decimal::ZERO || self.total_deposits.is_zero() {
            return Ok(false);
        }
        let (reward_per_unit, reward_error) = div_with_remainder(
            PreciseDecimal::from(issued) + self.last_reward_error,
            self.total_deposits,
        )?;
        let marginal_gain = mul_floor(reward_per_unit, self.p)?;
        let key = (self.current_epoch, self.current_scale);
        let g = self.g_at(key.0, key.1) + marginal_gain;
        self.epoch_to_scale_to_g.insert(key, g);
        self.last_reward_error = reward_error;
        Ok(true)
    }

    //==================================================================
    //                         DEPOSIT VALUES
    //==================================================================

    /// Value of a stake made at `snapshot`, after the losses absorbed since.
    pub fn compounded_stake(&self, initial: Decimal, snapshot: &DepositSnapshot) -> ProtocolResult<Decimal> {
        if initial.is_zero() || snapshot.epoch < self.current_epoch {
            return Ok(Decimal::ZERO);
        }

        let compounded = match self.current_scale.saturating_sub(snapshot.scale) {
            0 => mul_div_floor(initial, self.p, snapshot.p)?,
            1 => div_floor(mul_div_floor(initial, self.p, snapshot.p)?, rescale_factor())?,
            _ => Decimal::ZERO,
        };

        // Below a billionth of the initial value the result is rounding noise.
        if compounded < div_floor(initial, rescale_factor())? {
            return Ok(Decimal::ZERO);
        }
        Ok(compounded)
    }

    /// Sum of `first + second / 1e9`, where `first` is the growth of an accumulator at the snapshot's
    /// scale and `second` what was recorded one scale later.
    fn accrued_per_unit(
        &self,
        snapshot: &DepositSnapshot,
        accumulator: &HashMap<(u64, u64), Decimal>,
        snapshot_value: Decimal,
    ) -> ProtocolResult<Decimal> {
        let at_scale = accumulator
            .get(&(snapshot.epoch, snapshot.scale))
            .copied()
            .unwrap_or(Decimal::ZERO);
        let next_scale = accumulator
            .get(&(snapshot.epoch, snapshot.scale + 1))
            .copied()
            .unwrap_or(Decimal::ZERO);

        let first = (at_scale - snapshot_value).max(Decimal::ZERO);
        Ok(first + div_floor(next_scale, rescale_factor())?)
    }

    pub fn compounded_deposit(&self, deposit: &Deposit) -> ProtocolResult<Decimal> {
        self.compounded_stake(deposit.initial_value, &deposit.snapshot)
    }

    pub fn depositor_collateral_gain(&self, deposit: &Deposit) -> ProtocolResult<Decimal> {
        if deposit.initial_value.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let per_unit = self.accrued_per_unit(&deposit.snapshot, &self.epoch_to_scale_to_sum, deposit.snapshot.s)?;
        mul_div_floor(deposit.initial_value, per_unit, deposit.snapshot.p)
    }

    /// Reward gain of a deposit, after the cut of its front end.
    pub fn depositor_reward_gain(&self, deposit: &Deposit, front_end: Option<&FrontEnd>) -> ProtocolResult<Decimal> {
        if deposit.initial_value.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let kickback_rate = match (&deposit.front_end, front_end) {
            (Some(_), Some(front_end)) => front_end.kickback_rate,
            (Some(_), None) => {
                return Err(ProtocolError::invalid_state("Front end of the deposit is missing."))
            }
            (None, _) => Decimal::ONE,
        };
        let per_unit = self.accrued_per_unit(&deposit.snapshot, &self.epoch_to_scale_to_g, deposit.snapshot.g)?;
        let gain = mul_div_floor(deposit.initial_value, per_unit, deposit.snapshot.p)?;
        mul_floor(gain, kickback_rate)
    }

    pub fn compounded_front_end_stake(&self, front_end: &FrontEnd) -> ProtocolResult<Decimal> {
        self.compounded_stake(front_end.stake, &front_end.snapshot)
    }

    pub fn front_end_reward_gain(&self, front_end: &FrontEnd) -> ProtocolResult<Decimal> {
        if front_end.stake.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let per_unit = self.accrued_per_unit(&front_end.snapshot, &self.epoch_to_scale_to_g, front_end.snapshot.g)?;
        let gain = mul_div_floor(front_end.stake, per_unit, front_end.snapshot.p)?;
        mul_floor(gain, Decimal::ONE - front_end.kickback_rate)
    }

    //==================================================================
    //                        DEPOSIT OPERATIONS
    //==================================================================

    pub fn register_front_end(&self, kickback_rate: Decimal) -> ProtocolResult<FrontEnd> {
        if kickback_rate < Decimal::ZERO || kickback_rate > Decimal::ONE {
            return Err(ProtocolError::invalid_amount("Kickback rate must be between 0 and 1."));
        }
        Ok(FrontEnd {
            kickback_rate,
            stake: Decimal::ZERO,
            snapshot: DepositSnapshot::default(),
            unclaimed_reward: Decimal::ZERO,
        })
    }

    /// Adds `amount` to a deposit, paying out its gains first.
    ///
    /// `front_end` must be the front end the deposit is tagged with. A deposit without value takes the
    /// given front end as its new tag.
    pub fn provide(
        &mut self,
        deposit: &mut Deposit,
        amount: Decimal,
        front_end: Option<(NonFungibleLocalId, &mut FrontEnd)>,
    ) -> ProtocolResult<DepositorPayout> {
        if amount <= Decimal::ZERO {
            return Err(ProtocolError::invalid_amount("Deposit amount must be positive."));
        }

        let front_end_id = front_end.as_ref().map(|(id, _)| id.clone());
        let mut tagged = deposit.clone();
        if tagged.initial_value.is_zero() {
            tagged.front_end = front_end_id;
        } else if tagged.front_end != front_end_id {
            return Err(ProtocolError::invalid_state(
                "A deposit keeps its front end until fully withdrawn.",
            ));
        }

        let payout = self.change_deposit(&mut tagged, front_end.map(|(_, front_end)| front_end), |compounded| {
            Ok((amount, compounded + amount))
        })?;
        *deposit = tagged;
        Ok(payout)
    }

    /// Withdraws up to `amount` from a deposit, capped at its compounded value, and pays out its gains.
    /// An amount of zero only claims the gains.
    pub fn withdraw(
        &mut self,
        deposit: &mut Deposit,
        amount: Decimal,
        front_end: Option<&mut FrontEnd>,
    ) -> ProtocolResult<DepositorPayout> {
        if deposit.initial_value.is_zero() {
            return Err(ProtocolError::invalid_state("No deposit to withdraw from."));
        }
        if amount < Decimal::ZERO {
            return Err(ProtocolError::invalid_amount("Withdraw amount cannot be negative."));
        }

        self.change_deposit(deposit, front_end, |compounded| {
            let withdrawn = amount.min(compounded);
            Ok((-withdrawn, compounded - withdrawn))
        })
    }

    /// Shared body of provide and withdraw. `new_value` maps the compounded deposit to the change in
    /// total deposits and the new deposit value.
    fn change_deposit(
        &mut self,
        deposit: &mut Deposit,
        front_end: Option<&mut FrontEnd>,
        new_value: impl FnOnce(Decimal) -> ProtocolResult<(Decimal, Decimal)>,
    ) -> ProtocolResult<DepositorPayout> {
        let mut ledger = self.clone();
        let mut staged_deposit = deposit.clone();
        let mut staged_front_end = front_end.as_deref().cloned();

        let collateral_gain = ledger
            .depositor_collateral_gain(&staged_deposit)?
            .min(ledger.total_collateral);
        let reward_gain = ledger.depositor_reward_gain(&staged_deposit, staged_front_end.as_ref())?;
        let compounded = ledger.compounded_deposit(&staged_deposit)?;

        let (deposit_change, new_deposit) = new_value(compounded)?;
        let deposit_change = deposit_change.max(-ledger.total_deposits);

        let mut front_end_reward = Decimal::ZERO;
        if let Some(front_end) = staged_front_end.as_mut() {
            front_end_reward = ledger.front_end_reward_gain(front_end)?;
            let compounded_stake = ledger.compounded_front_end_stake(front_end)?;
            let stake_change = new_deposit - compounded;
            let new_stake = (compounded_stake + stake_change).max(Decimal::ZERO);
            front_end.unclaimed_reward += front_end_reward;
            ledger.update_front_end_stake(front_end, new_stake);
        }

        ledger.update_deposit(&mut staged_deposit, new_deposit);
        ledger.total_deposits += deposit_change;
        ledger.total_collateral -= collateral_gain;

        *self = ledger;
        *deposit = staged_deposit;
        if let (Some(front_end), Some(staged)) = (front_end, staged_front_end) {
            *front_end = staged;
        }

        Ok(DepositorPayout {
            compounded_before: compounded,
            withdrawn: if deposit_change < Decimal::ZERO { -deposit_change } else { Decimal::ZERO },
            collateral_gain,
            reward_gain,
            front_end_reward,
        })
    }

    /// Settles the reward gain on a front end's own stake and hands out everything it accrued.
    pub fn claim_front_end_reward(&mut self, front_end: &mut FrontEnd) -> ProtocolResult<Decimal> {
        let gain = self.front_end_reward_gain(front_end)?;
        let compounded_stake = self.compounded_front_end_stake(front_end)?;
        let claimable = front_end.unclaimed_reward + gain;

        self.update_front_end_stake(front_end, compounded_stake);
        front_end.unclaimed_reward = Decimal::ZERO;
        Ok(claimable)
    }

    fn update_deposit(&self, deposit: &mut Deposit, new_value: Decimal) {
        deposit.initial_value = new_value;
        if new_value.is_zero() {
            deposit.snapshot = DepositSnapshot::default();
            deposit.front_end = None;
        } else {
            deposit.snapshot = self.current_snapshot();
        }
    }

    fn update_front_end_stake(&self, front_end: &mut FrontEnd, new_stake: Decimal) {
        front_end.stake = new_stake;
        front_end.snapshot = if new_stake.is_zero() {
            DepositSnapshot::default()
        } else {
            DepositSnapshot {
                s: Decimal::ZERO,
                ..self.current_snapshot()
            }
        };
    }
}

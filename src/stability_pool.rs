//! # Ballast Stability Pool Blueprint
//!
//! The `StabilityPool` component holds bUSD deposits that absorb the debt of liquidated positions. In
//! exchange depositors receive the liquidated collateral, at a discount, pro-rata to their deposit.
//!
//! ## Functionality
//! - **Deposits:** Depositors receive a badge holding their deposit data. Every provide or withdraw pays
//!   out the collateral and reward gains accrued since the previous one.
//! - **Liquidations:** Anyone can trigger liquidations. The pool calls the core `Ballast` component with its
//!   controller badge, burns the offset bUSD and keeps the collateral for its depositors. The caller
//!   receives the gas compensation.
//! - **Rewards:** A reward token is issued over time following an [`IssuanceCurve`] and distributed over the
//!   deposits.
//! - **Front Ends:** Deposits can be tagged with a registered front end, which keeps part of the reward
//!   gain of the deposits made through it.
//!
//! No depositor is ever iterated: all accounting goes through the [`StabilityPoolLedger`].

use crate::ballast_component::ballast_component::*;
use crate::errors::*;
use crate::events::*;
use crate::issuance::*;
use crate::shared_structs::*;
use crate::stability_pool_ledger::*;
use scrypto::prelude::*;

#[blueprint]
#[types(Decimal, NonFungibleLocalId, Deposit, FrontEnd)]
#[events(
    EventDepositChange,
    EventOffset,
    EventEpochReset,
    EventScaleChange,
    EventFrontEndRegistered,
    EventRewardIssued,
)]
mod stability_pool {
    enable_method_auth! {
        methods {
            provide => PUBLIC;
            withdraw => PUBLIC;
            register_front_end => PUBLIC;
            claim_front_end_reward => PUBLIC;
            liquidate => PUBLIC;
            liquidate_lowest => PUBLIC;
            trigger_issuance => PUBLIC;
            get_deposit_infos => PUBLIC;
            get_front_end_reward => PUBLIC;
            get_pool_info => PUBLIC;
            set_issuance_curve => restrict_to: [OWNER];
        }
    }

    struct StabilityPool {
        ledger: StabilityPoolLedger,
        ballast: Global<Ballast>,
        /// Controller badges authorizing liquidations and bUSD burns.
        badge_vault: FungibleVault,
        busd_vault: Vault,
        /// Collateral gained by depositors and not yet paid out.
        collateral_vault: Vault,
        reward_manager: ResourceManager,
        deposit_manager: ResourceManager,
        front_end_manager: ResourceManager,
        deposit_counter: u64,
        front_end_counter: u64,
        issuance: IssuanceTracker,
        issuance_curve: HalvingIssuance,
    }

    impl StabilityPool {
        /// Instantiates the `StabilityPool` component.
        ///
        /// # Arguments
        /// * `controller_badge`: Controller badges of the `Ballast` component, kept to authorize liquidations.
        /// * `ballast_address`: The core component.
        /// * `collateral_address`: Collateral the liquidations pay out in.
        /// * `reward_supply_cap`: Total amount of reward tokens ever issued.
        /// * `dapp_def_address`: DApp definition to link in metadata.
        ///
        /// # Returns
        /// * `Global<StabilityPool>`: The component.
        /// * `ResourceAddress`: The depositor badge resource.
        /// * `ResourceAddress`: The front end badge resource.
        /// * `ResourceAddress`: The reward token.
        pub fn instantiate(
            controller_badge: Bucket,
            ballast_address: ComponentAddress,
            collateral_address: ResourceAddress,
            reward_supply_cap: Decimal,
            dapp_def_address: GlobalAddress,
        ) -> (Global<StabilityPool>, ResourceAddress, ResourceAddress, ResourceAddress) {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(StabilityPool::blueprint_id());

            let ballast: Global<Ballast> = Global::from(ballast_address);
            let busd_address = ballast.get_busd_address();
            let badge_address = controller_badge.resource_address();
            let owner_role = OwnerRole::Fixed(rule!(require_amount(dec!("0.75"), badge_address)));

            let reward_manager: ResourceManager = ResourceBuilder::new_fungible(owner_role.clone())
                .divisibility(DIVISIBILITY_MAXIMUM)
                .metadata(metadata! (
                    init {
                        "name" => "Ballast Reward", updatable;
                        "symbol" => "BLST", updatable;
                        "dapp_definitions" => vec![dapp_def_address], updatable;
                    }
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address)));
                    minter_updater => rule!(deny_all);
                ))
                .create_with_no_initial_supply()
                .into();

            let deposit_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<Deposit>(owner_role.clone())
                    .metadata(metadata!(
                        init {
                            "name" => "Ballast Stability Deposit", locked;
                            "symbol" => "busdSP", locked;
                            "description" => "A badge holding your Stability Pool deposit.", locked;
                            "dapp_definitions" => vec![dapp_def_address], updatable;
                        }
                    ))
                    .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                        non_fungible_data_updater => rule!(require(global_caller(component_address)));
                        non_fungible_data_updater_updater => rule!(deny_all);
                    ))
                    .mint_roles(mint_roles!(
                        minter => rule!(require(global_caller(component_address)));
                        minter_updater => rule!(deny_all);
                    ))
                    .create_with_no_initial_supply()
                    .into();

            let front_end_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<FrontEnd>(owner_role.clone())
                    .metadata(metadata!(
                        init {
                            "name" => "Ballast Front End", locked;
                            "symbol" => "busdFE", locked;
                            "dapp_definitions" => vec![dapp_def_address], updatable;
                        }
                    ))
                    .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                        non_fungible_data_updater => rule!(require(global_caller(component_address)));
                        non_fungible_data_updater_updater => rule!(deny_all);
                    ))
                    .mint_roles(mint_roles!(
                        minter => rule!(require(global_caller(component_address)));
                        minter_updater => rule!(deny_all);
                    ))
                    .create_with_no_initial_supply()
                    .into();

            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;

            let pool = Self {
                ledger: StabilityPoolLedger::new(),
                ballast,
                badge_vault: FungibleVault::with_bucket(controller_badge.as_fungible()),
                busd_vault: Vault::new(busd_address),
                collateral_vault: Vault::new(collateral_address),
                reward_manager,
                deposit_manager,
                front_end_manager,
                deposit_counter: 0,
                front_end_counter: 0,
                issuance: IssuanceTracker::new(now),
                issuance_curve: HalvingIssuance::yearly(reward_supply_cap),
            }
            .instantiate()
            .prepare_to_globalize(owner_role)
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Ballast Stability Pool".to_string(), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (
                pool,
                deposit_manager.address(),
                front_end_manager.address(),
                reward_manager.address(),
            )
        }

        /// Adds bUSD to a deposit, or opens a new one when no badge is presented.
        ///
        /// # Arguments
        /// * `busd`: The bUSD to deposit.
        /// * `deposit_proof`: Proof of an existing depositor badge.
        /// * `front_end_id`: Front end to tag the deposit with. Only taken into account for a deposit without
        ///   value; an existing deposit keeps its tag.
        ///
        /// # Returns
        /// * `Option<Bucket>`: A new depositor badge, if no proof was given.
        /// * `Bucket`: Collateral gain.
        /// * `Bucket`: Reward gain.
        pub fn provide(
            &mut self,
            busd: Bucket,
            deposit_proof: Option<NonFungibleProof>,
            front_end_id: Option<NonFungibleLocalId>,
        ) -> (Option<Bucket>, Bucket, Bucket) {
            assert!(
                busd.resource_address() == self.busd_vault.resource_address(),
                "Only bUSD can be deposited."
            );
            self.trigger_issuance();

            let (deposit_id, mut deposit, new_badge) = match deposit_proof {
                Some(proof) => {
                    let id = self.check_deposit(proof);
                    let deposit: Deposit = self.deposit_manager.get_non_fungible_data(&id);
                    (id, deposit, false)
                }
                None => {
                    self.deposit_counter += 1;
                    (NonFungibleLocalId::integer(self.deposit_counter), Deposit::empty(), true)
                }
            };

            let front_end_id = if deposit.initial_value.is_zero() {
                front_end_id
            } else {
                deposit.front_end.clone()
            };
            let mut front_end = front_end_id.as_ref().map(|id| {
                assert!(
                    self.front_end_manager.non_fungible_exists(id),
                    "Front end is not registered."
                );
                self.front_end_manager.get_non_fungible_data::<FrontEnd>(id)
            });

            let payout = self
                .ledger
                .provide(
                    &mut deposit,
                    busd.amount(),
                    front_end_id.clone().zip(front_end.as_mut()),
                )
                .or_revert();

            self.busd_vault.put(busd);
            if let (Some(id), Some(front_end)) = (front_end_id.as_ref(), front_end.as_ref()) {
                self.save_front_end(id, front_end);
            }

            let badge = if new_badge {
                Some(self.deposit_manager.mint_non_fungible(&deposit_id, deposit.clone()))
            } else {
                self.save_deposit(&deposit_id, &deposit);
                None
            };

            let (collateral, reward) = self.pay_out(&deposit_id, &deposit, &payout);
            (badge, collateral, reward)
        }

        /// Withdraws up to `amount` bUSD from a deposit, capped at its compounded value, together with all
        /// gains. An amount of zero only claims the gains.
        ///
        /// # Panics
        /// * If `amount` is not zero while a position is below the MCR. Those have to be liquidated first.
        pub fn withdraw(
            &mut self,
            deposit_proof: NonFungibleProof,
            amount: Decimal,
        ) -> (Bucket, Bucket, Bucket) {
            let deposit_id = self.check_deposit(deposit_proof);
            if amount > Decimal::ZERO {
                assert!(
                    !self.ballast.has_undercollateralized_positions(),
                    "Cannot withdraw while there are positions to liquidate."
                );
            }
            self.trigger_issuance();

            let mut deposit: Deposit = self.deposit_manager.get_non_fungible_data(&deposit_id);
            let front_end_id = deposit.front_end.clone();
            let mut front_end = front_end_id
                .as_ref()
                .map(|id| self.front_end_manager.get_non_fungible_data::<FrontEnd>(id));

            let payout = self
                .ledger
                .withdraw(&mut deposit, amount, front_end.as_mut())
                .or_revert();

            if let (Some(id), Some(front_end)) = (front_end_id.as_ref(), front_end.as_ref()) {
                self.save_front_end(id, front_end);
            }
            self.save_deposit(&deposit_id, &deposit);

            let busd = self.busd_vault.take_advanced(
                payout.withdrawn,
                WithdrawStrategy::Rounded(RoundingMode::ToZero),
            );
            let (collateral, reward) = self.pay_out(&deposit_id, &deposit, &payout);
            (busd, collateral, reward)
        }

        /// Registers a front end with the share of the reward gain it passes on to its depositors.
        pub fn register_front_end(&mut self, kickback_rate: Decimal) -> Bucket {
            let front_end = self.ledger.register_front_end(kickback_rate).or_revert();

            self.front_end_counter += 1;
            let front_end_id = NonFungibleLocalId::integer(self.front_end_counter);

            Runtime::emit_event(EventFrontEndRegistered {
                front_end_id: front_end_id.clone(),
                kickback_rate,
            });

            self.front_end_manager.mint_non_fungible(&front_end_id, front_end)
        }

        pub fn claim_front_end_reward(&mut self, front_end_proof: NonFungibleProof) -> Bucket {
            let front_end_proof = front_end_proof.check_with_message(
                self.front_end_manager.address(),
                "Incorrect proof! Not a registered front end.",
            );
            let front_end_id = front_end_proof.non_fungible::<FrontEnd>().local_id().clone();
            self.trigger_issuance();

            let mut front_end: FrontEnd = self.front_end_manager.get_non_fungible_data(&front_end_id);
            let reward = self.ledger.claim_front_end_reward(&mut front_end).or_revert();
            self.save_front_end(&front_end_id, &front_end);

            self.mint_reward(reward)
        }

        /// Liquidates the given positions against the pool.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: collateral and bUSD gas compensation for the caller.
        pub fn liquidate(&mut self, position_ids: Vec<NonFungibleLocalId>) -> (Bucket, Bucket) {
            self.trigger_issuance();
            let pool_deposits = self.ledger.total_deposits;

            let (totals, collateral_for_pool, collateral_gas_compensation, busd_gas_compensation) =
                self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                    self.ballast.liquidate_positions(position_ids, pool_deposits)
                });

            self.absorb(totals.debt_to_offset, collateral_for_pool);
            (collateral_gas_compensation, busd_gas_compensation)
        }

        /// Liquidates up to `count` positions, riskiest first.
        pub fn liquidate_lowest(&mut self, count: u64) -> (Bucket, Bucket) {
            self.trigger_issuance();
            let pool_deposits = self.ledger.total_deposits;

            let (totals, collateral_for_pool, collateral_gas_compensation, busd_gas_compensation) =
                self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                    self.ballast.liquidate_lowest(count, pool_deposits)
                });

            self.absorb(totals.debt_to_offset, collateral_for_pool);
            (collateral_gas_compensation, busd_gas_compensation)
        }

        /// Issues the reward accrued since the last trigger and adds it to `G`. Issuance falling in a period
        /// without deposits is not distributed.
        pub fn trigger_issuance(&mut self) {
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            let issued = self.issuance.issue(&self.issuance_curve, now).or_revert();
            if issued.is_zero() {
                return;
            }

            if self.ledger.distribute_reward(issued).or_revert() {
                Runtime::emit_event(EventRewardIssued {
                    issued,
                    total_issued: self.issuance.total_issued,
                });
            } else {
                debug!("Skipped {} reward issuance with an empty pool", issued);
            }
        }

        pub fn get_deposit_infos(&self, deposit_ids: Vec<NonFungibleLocalId>) -> Vec<DepositInfoReturn> {
            deposit_ids
                .into_iter()
                .map(|id| {
                    let deposit: Deposit = self.deposit_manager.get_non_fungible_data(&id);
                    let front_end = deposit
                        .front_end
                        .as_ref()
                        .map(|fe| self.front_end_manager.get_non_fungible_data::<FrontEnd>(fe));

                    DepositInfoReturn {
                        compounded_value: self.ledger.compounded_deposit(&deposit).or_revert(),
                        collateral_gain: self.ledger.depositor_collateral_gain(&deposit).or_revert(),
                        reward_gain: self
                            .ledger
                            .depositor_reward_gain(&deposit, front_end.as_ref())
                            .or_revert(),
                        id,
                        initial_value: deposit.initial_value,
                        front_end: deposit.front_end,
                    }
                })
                .collect()
        }

        /// Reward claimable by a front end: what was credited so far plus the gain on its own stake.
        pub fn get_front_end_reward(&self, front_end_id: NonFungibleLocalId) -> Decimal {
            let front_end: FrontEnd = self.front_end_manager.get_non_fungible_data(&front_end_id);
            front_end.unclaimed_reward + self.ledger.front_end_reward_gain(&front_end).or_revert()
        }

        pub fn get_pool_info(&self) -> PoolInfoReturn {
            PoolInfoReturn {
                total_deposits: self.ledger.total_deposits,
                total_collateral: self.ledger.total_collateral,
                p: self.ledger.p,
                current_scale: self.ledger.current_scale,
                current_epoch: self.ledger.current_epoch,
                total_reward_issued: self.issuance.total_issued,
            }
        }

        pub fn set_issuance_curve(&mut self, issuance_curve: HalvingIssuance) {
            assert!(
                issuance_curve.minute_factor > Decimal::ZERO && issuance_curve.minute_factor < Decimal::ONE,
                "Minute factor must be between 0 and 1."
            );
            self.trigger_issuance();
            self.issuance_curve = issuance_curve;
        }

        //==================================================================
        //                          HELPER METHODS
        //==================================================================

        fn check_deposit(&self, deposit_proof: NonFungibleProof) -> NonFungibleLocalId {
            let deposit_proof = deposit_proof.check_with_message(
                self.deposit_manager.address(),
                "Incorrect proof! Are you sure this deposit is yours?",
            );
            deposit_proof.non_fungible::<Deposit>().local_id().clone()
        }

        /// Offsets the liquidated debt against the deposits and burns it.
        fn absorb(&mut self, debt_to_offset: Decimal, collateral: Bucket) {
            let outcome = self
                .ledger
                .offset(debt_to_offset, collateral.amount())
                .or_revert();

            if debt_to_offset > Decimal::ZERO {
                let burned = self.busd_vault.take(debt_to_offset);
                self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                    burned.burn();
                });
            }
            let collateral_added = collateral.amount();
            self.collateral_vault.put(collateral);

            Runtime::emit_event(EventOffset {
                debt_offset: debt_to_offset,
                collateral_added,
                loss_per_unit: outcome.loss_per_unit,
                gain_per_unit: outcome.gain_per_unit,
                p: outcome.new_p,
                scale: outcome.scale,
                epoch: outcome.epoch,
            });
            if outcome.epoch_reset {
                info!("Stability Pool emptied, starting epoch {}", outcome.epoch);
                Runtime::emit_event(EventEpochReset { epoch: outcome.epoch });
            }
            if outcome.rescaled {
                Runtime::emit_event(EventScaleChange {
                    scale: outcome.scale,
                    p: outcome.new_p,
                });
            }
        }

        fn pay_out(
            &mut self,
            deposit_id: &NonFungibleLocalId,
            deposit: &Deposit,
            payout: &DepositorPayout,
        ) -> (Bucket, Bucket) {
            let collateral = if payout.collateral_gain.is_zero() {
                Bucket::new(self.collateral_vault.resource_address())
            } else {
                self.collateral_vault.take_advanced(
                    payout.collateral_gain,
                    WithdrawStrategy::Rounded(RoundingMode::ToZero),
                )
            };
            let reward = self.mint_reward(payout.reward_gain);

            Runtime::emit_event(EventDepositChange {
                deposit_id: deposit_id.clone(),
                deposit: deposit.clone(),
                collateral_gain: payout.collateral_gain,
                reward_gain: payout.reward_gain,
            });

            (collateral, reward)
        }

        fn mint_reward(&self, amount: Decimal) -> Bucket {
            if amount.is_zero() {
                Bucket::new(self.reward_manager.address())
            } else {
                self.reward_manager.mint(amount)
            }
        }

        fn save_deposit(&self, id: &NonFungibleLocalId, deposit: &Deposit) {
            self.deposit_manager
                .update_non_fungible_data(id, "initial_value", deposit.initial_value);
            self.deposit_manager
                .update_non_fungible_data(id, "snapshot", deposit.snapshot);
            self.deposit_manager
                .update_non_fungible_data(id, "front_end", deposit.front_end.clone());
        }

        fn save_front_end(&self, id: &NonFungibleLocalId, front_end: &FrontEnd) {
            self.front_end_manager
                .update_non_fungible_data(id, "stake", front_end.stake);
            self.front_end_manager
                .update_non_fungible_data(id, "snapshot", front_end.snapshot);
            self.front_end_manager
                .update_non_fungible_data(id, "unclaimed_reward", front_end.unclaimed_reward);
        }
    }
}

//! # The Ballast Core Blueprint
//!
//! This blueprint owns every position of the protocol, the collateral backing them and the bUSD
//! stablecoin minted against it.
//!
//! ## Overview
//! - **Open a Position:** Deposit collateral and mint bUSD. Every position carries a fixed bUSD gas
//!   compensation reserve and a borrowing fee on top of the minted amount.
//! - **Adjust a Position:** Add or withdraw collateral, borrow more or repay, in one call.
//! - **Close a Position:** Repay the debt (minus the gas compensation reserve, which is burned from the
//!   reserve vault) and take back all collateral.
//! - **Redemption:** Exchange bUSD for collateral at face value against the lowest ratio positions.
//! - **Liquidation:** Only callable by the `StabilityPool` component (holding a controller badge). The
//!   liquidation engine returns what the pool has to absorb, and this component hands out the collateral
//!   and gas compensation accordingly.
//!
//! The accounting itself lives in [`PositionLedger`], the sort order in [`PositionTree`]. Positions are
//! stored as the data of their receipt NFTs.

use crate::errors::*;
use crate::events::*;
use crate::liquidation::*;
use crate::position_ledger::*;
use crate::redemption::*;
use crate::shared_structs::*;
use crate::sorted_positions::*;
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

/// Positions as receipt NFT data.
pub struct ReceiptStore<'a> {
    pub manager: &'a ResourceManager,
}

impl PositionStore for ReceiptStore<'_> {
    fn load(&self, id: &NonFungibleLocalId) -> Option<Position> {
        if self.manager.non_fungible_exists(id) {
            Some(self.manager.get_non_fungible_data::<Position>(id))
        } else {
            None
        }
    }

    fn save(&mut self, id: &NonFungibleLocalId, position: &Position) {
        self.manager.update_non_fungible_data(id, "debt", position.debt);
        self.manager.update_non_fungible_data(id, "collateral", position.collateral);
        self.manager.update_non_fungible_data(id, "stake", position.stake);
        self.manager.update_non_fungible_data(id, "status", position.status);
        self.manager.update_non_fungible_data(id, "snapshot", position.snapshot);
        self.manager.update_non_fungible_data(id, "sort_key", position.sort_key);
        self.manager
            .update_non_fungible_data(id, "surplus_collateral", position.surplus_collateral);
    }
}

#[blueprint]
#[types(Decimal, AvlTree<Decimal, Vec<NonFungibleLocalId>>, Vec<NonFungibleLocalId>, NonFungibleLocalId, Position)]
#[events(
    EventNewPosition,
    EventUpdatePosition,
    EventClosePosition,
    EventLiquidatePosition,
    EventLiquidation,
    EventRedistribution,
    EventRedeemPosition,
    EventRedemption,
    EventClaimSurplus,
    EventBaseRateUpdated,
    EventParametersChanged,
)]
mod ballast_component {
    enable_method_auth! {
        methods {
            open_position => PUBLIC;
            adjust_position => PUBLIC;
            close_position => PUBLIC;
            claim_surplus_collateral => PUBLIC;
            redeem => PUBLIC;
            liquidate_positions => restrict_to: [OWNER];
            liquidate_lowest => restrict_to: [OWNER];
            set_parameters => restrict_to: [OWNER];
            set_stops => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
            withdraw_fees => restrict_to: [OWNER];
            has_undercollateralized_positions => PUBLIC;
            get_position_infos => PUBLIC;
            get_system_info => PUBLIC;
            get_next_liquidations => PUBLIC;
            get_borrowing_rate => PUBLIC;
            get_redemption_rate => PUBLIC;
            get_price => PUBLIC;
            get_busd_address => PUBLIC;
        }
    }
    struct Ballast {
        /// Aggregates of all positions: active / default pool, stakes and redistribution accumulators.
        ledger: PositionLedger,
        /// Active positions sorted by nominal collateral ratio.
        index: PositionTree,
        parameters: ProtocolParameters,
        base_rate: BaseRate,
        /// Counter generating the ids of the position receipts.
        position_counter: u64,
        position_manager: ResourceManager,
        busd_manager: ResourceManager,
        controller_badge_manager: ResourceManager,
        collateral_address: ResourceAddress,
        /// Collateral of the active and the default pool.
        collateral_vault: Vault,
        /// Collateral claimable by owners of liquidated or redeemed positions.
        surplus_vault: Vault,
        /// bUSD gas compensation reserve of every active position.
        gas_reserve: Vault,
        /// Borrowing fees, in bUSD.
        borrowing_fee_vault: Vault,
        /// Redemption fees, in collateral.
        redemption_fee_vault: Vault,
        oracle: Global<AnyComponent>,
        oracle_method_name: String,
        /// Minted bUSD minus burned bUSD.
        circulating_debt: Decimal,
    }

    impl Ballast {
        /// Instantiates the `Ballast` component with its bUSD token, position receipt and controller badge.
        ///
        /// # Arguments
        /// * `collateral_address`: The only collateral the component accepts.
        /// * `oracle_address`: Component providing `(price, published_at)` for the collateral.
        /// * `oracle_method_name`: Name of the price method on the oracle.
        /// * `dapp_def_address`: DApp definition to link in metadata.
        ///
        /// # Returns
        /// * `Global<Ballast>`: The component.
        /// * `Bucket`: The controller badges. Holding 0.75 of them grants the owner role.
        /// * `ResourceAddress`: The position receipt resource.
        /// * `ResourceAddress`: The bUSD resource.
        pub fn instantiate(
            collateral_address: ResourceAddress,
            oracle_address: ComponentAddress,
            oracle_method_name: String,
            dapp_def_address: GlobalAddress,
        ) -> (Global<Ballast>, Bucket, ResourceAddress, ResourceAddress) {
            let parameters = ProtocolParameters::default();

            let (address_reservation, component_address) =
                Runtime::allocate_component_address(Ballast::blueprint_id());

            let controller_role: Bucket = ResourceBuilder::new_fungible(OwnerRole::Fixed(rule!(
                require(global_caller(component_address))
            )))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "controller badge ballast", locked;
                    "symbol" => "busdCTRL", locked;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address)));
                minter_updater => rule!(deny_all);
            ))
            .mint_initial_supply(10)
            .into();

            let controller_badge_manager: ResourceManager = controller_role.resource_manager();
            let badge_address = controller_role.resource_address();

            let busd_manager: ResourceManager = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require(badge_address)),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "bUSD", updatable;
                    "symbol" => "bUSD", updatable;
                    "tags" => vec!["stablecoin", "defi", "usd"], updatable;
                    "dapp_definitions" => vec![dapp_def_address], updatable;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address))
                || require_amount(dec!("0.75"), badge_address));
                minter_updater => rule!(require_amount(dec!("0.75"), badge_address));
            ))
            .burn_roles(burn_roles!(
                burner => rule!(require(global_caller(component_address))
                || require_amount(dec!("0.75"), badge_address));
                burner_updater => rule!(require_amount(dec!("0.75"), badge_address));
            ))
            .create_with_no_initial_supply()
            .into();

            let position_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<Position>(OwnerRole::Fixed(rule!(
                    require_amount(dec!("0.75"), badge_address)
                )))
                .metadata(metadata!(
                    init {
                        "name" => "Ballast Position", locked;
                        "symbol" => "busdPOS", locked;
                        "description" => "A receipt for your bUSD position.", locked;
                        "dapp_definitions" => vec![dapp_def_address], updatable;
                    }
                ))
                .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                    non_fungible_data_updater => rule!(require(global_caller(component_address))
                        || require_amount(dec!("0.75"), badge_address));
                    non_fungible_data_updater_updater => rule!(require_amount(dec!("0.75"), badge_address));
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address))
                    || require_amount(dec!("0.75"), badge_address));
                    minter_updater => rule!(require_amount(dec!("0.75"), badge_address));
                ))
                .burn_roles(burn_roles!(
                    burner => rule!(require(global_caller(component_address))
                    || require_amount(dec!("0.75"), badge_address));
                    burner_updater => rule!(require_amount(dec!("0.75"), badge_address));
                ))
                .create_with_no_initial_supply()
                .into();

            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;

            let ballast = Self {
                ledger: PositionLedger::new(),
                index: PositionTree::new(parameters.max_vector_length),
                base_rate: BaseRate::new(now),
                parameters,
                position_counter: 0,
                position_manager,
                busd_manager,
                controller_badge_manager,
                collateral_address,
                collateral_vault: Vault::new(collateral_address),
                surplus_vault: Vault::new(collateral_address),
                gas_reserve: Vault::new(busd_manager.address()),
                borrowing_fee_vault: Vault::new(busd_manager.address()),
                redemption_fee_vault: Vault::new(collateral_address),
                oracle: Global::from(oracle_address),
                oracle_method_name,
                circulating_debt: Decimal::ZERO,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Ballast Protocol Core".to_string(), updatable;
                    "description" => "Positions, liquidations and redemptions of the Ballast protocol".to_string(), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (ballast, controller_role, position_manager.address(), busd_manager.address())
        }

        /// Opens a new position, minting `busd_amount` bUSD against the deposited collateral.
        ///
        /// # Arguments
        /// * `collateral`: The collateral to lock.
        /// * `busd_amount`: bUSD to receive. The position's debt is this amount plus the borrowing fee plus
        ///   the gas compensation reserve.
        /// * `max_fee_percentage`: Highest borrowing fee rate the caller accepts.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: the minted bUSD and the position receipt.
        ///
        /// # Panics
        /// * If openings are stopped, the collateral is of the wrong resource, or the price is stale.
        /// * If the position or the system would end up under-collateralized (see [`PositionLedger::open`]).
        /// * If the borrowing fee rate is above `max_fee_percentage`.
        pub fn open_position(
            &mut self,
            collateral: Bucket,
            busd_amount: Decimal,
            max_fee_percentage: Decimal,
        ) -> (Bucket, Bucket) {
            assert!(!self.parameters.stop_openings, "Not allowed to open positions right now.");
            assert!(
                collateral.resource_address() == self.collateral_address,
                "Invalid collateral."
            );
            assert!(busd_amount > Decimal::ZERO, "bUSD amount must be positive.");

            let price = self.fetch_price();
            let recovery_mode = self.ledger.is_recovery_mode(price, &self.parameters).or_revert();
            let borrowing_fee = self.charge_borrowing_fee(busd_amount, max_fee_percentage, recovery_mode);
            let debt = busd_amount + borrowing_fee + self.parameters.gas_compensation;

            let position = self
                .ledger
                .open(collateral.amount(), debt, price, &self.parameters)
                .or_revert();

            self.position_counter += 1;
            let position_id = NonFungibleLocalId::integer(self.position_counter);
            self.index.insert(position_id.clone(), position.sort_key).or_revert();

            self.collateral_vault.put(collateral);
            self.gas_reserve
                .put(self.busd_manager.mint(self.parameters.gas_compensation));
            if borrowing_fee > Decimal::ZERO {
                self.borrowing_fee_vault.put(self.busd_manager.mint(borrowing_fee));
            }
            let busd = self.busd_manager.mint(busd_amount);
            self.circulating_debt += debt;

            let receipt = self
                .position_manager
                .mint_non_fungible(&position_id, position.clone());

            Runtime::emit_event(EventNewPosition {
                position,
                position_id,
                borrowing_fee,
            });

            (busd, receipt)
        }

        /// Adjusts a position: deposit or withdraw collateral, and repay or borrow bUSD.
        ///
        /// # Arguments
        /// * `receipt_proof`: Proof of the position receipt.
        /// * `collateral_deposit`: Collateral to add, if any.
        /// * `collateral_withdrawal`: Collateral to take out. Cannot be combined with a deposit.
        /// * `debt_repayment`: bUSD to repay, if any.
        /// * `debt_increase`: bUSD to borrow. Cannot be combined with a repayment.
        /// * `max_fee_percentage`: Highest borrowing fee rate accepted when borrowing.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: withdrawn collateral and borrowed bUSD (either may be empty).
        pub fn adjust_position(
            &mut self,
            receipt_proof: NonFungibleProof,
            collateral_deposit: Option<Bucket>,
            collateral_withdrawal: Decimal,
            debt_repayment: Option<Bucket>,
            debt_increase: Decimal,
            max_fee_percentage: Decimal,
        ) -> (Bucket, Bucket) {
            let position_id = self.check_receipt(receipt_proof);

            let deposited = collateral_deposit.as_ref().map(|b| b.amount()).unwrap_or(Decimal::ZERO);
            let repaid = debt_repayment.as_ref().map(|b| b.amount()).unwrap_or(Decimal::ZERO);
            assert!(
                collateral_withdrawal >= Decimal::ZERO && debt_increase >= Decimal::ZERO,
                "Amounts cannot be negative."
            );
            assert!(
                deposited.is_zero() || collateral_withdrawal.is_zero(),
                "Cannot deposit and withdraw collateral at once."
            );
            assert!(
                repaid.is_zero() || debt_increase.is_zero(),
                "Cannot repay and borrow at once."
            );
            if let Some(ref deposit) = collateral_deposit {
                assert!(deposit.resource_address() == self.collateral_address, "Invalid collateral.");
            }
            if let Some(ref repayment) = debt_repayment {
                assert!(repayment.resource_address() == self.busd_manager.address(), "Invalid bUSD payment.");
            }

            let price = self.fetch_price();
            let recovery_mode = self.ledger.is_recovery_mode(price, &self.parameters).or_revert();
            let borrowing_fee = if debt_increase > Decimal::ZERO {
                self.charge_borrowing_fee(debt_increase, max_fee_percentage, recovery_mode)
            } else {
                Decimal::ZERO
            };

            let change = PositionChange {
                debt_change: debt_increase + borrowing_fee - repaid,
                collateral_change: deposited - collateral_withdrawal,
            };

            let mut store = ReceiptStore { manager: &self.position_manager };
            let mut position = store.load(&position_id).unwrap_or_else(Position::non_existent);
            let old_key = self
                .ledger
                .adjust(&mut position, change, price, &self.parameters)
                .or_revert();
            self.index
                .reinsert(position_id.clone(), old_key, position.sort_key)
                .or_revert();
            store.save(&position_id, &position);

            if let Some(deposit) = collateral_deposit {
                self.collateral_vault.put(deposit);
            }
            let withdrawn = self.take_collateral(collateral_withdrawal);

            if let Some(repayment) = debt_repayment {
                repayment.burn();
            }
            let borrowed = if debt_increase > Decimal::ZERO {
                if borrowing_fee > Decimal::ZERO {
                    self.borrowing_fee_vault.put(self.busd_manager.mint(borrowing_fee));
                }
                self.busd_manager.mint(debt_increase)
            } else {
                Bucket::new(self.busd_manager.address())
            };
            self.circulating_debt += change.debt_change;

            Runtime::emit_event(EventUpdatePosition {
                position,
                position_id,
                borrowing_fee,
            });

            (withdrawn, borrowed)
        }

        /// Closes a position, repaying its debt apart from the gas compensation reserve.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: the position's collateral and the unused part of the payment.
        ///
        /// # Panics
        /// * If the payment is short, the system is in recovery mode, closing would push it there, or this
        ///   is the last active position.
        pub fn close_position(
            &mut self,
            receipt_proof: NonFungibleProof,
            mut busd_payment: Bucket,
        ) -> (Bucket, Bucket) {
            let position_id = self.check_receipt(receipt_proof);
            assert!(
                busd_payment.resource_address() == self.busd_manager.address(),
                "Invalid bUSD payment."
            );

            let price = self.fetch_price();
            let mut store = ReceiptStore { manager: &self.position_manager };
            let mut position = store.load(&position_id).unwrap_or_else(Position::non_existent);
            let key = position.sort_key;
            let entire = self
                .ledger
                .close(&mut position, price, &self.parameters)
                .or_revert();

            let to_repay = entire.debt - self.parameters.gas_compensation;
            assert!(
                busd_payment.amount() >= to_repay,
                "Not enough bUSD supplied to close completely."
            );
            store.save(&position_id, &position);
            self.index.remove(&position_id, key).or_revert();

            busd_payment.take(to_repay).burn();
            self.gas_reserve.take(self.parameters.gas_compensation).burn();
            self.circulating_debt -= entire.debt;

            let collateral = self.take_collateral(entire.collateral);

            Runtime::emit_event(EventClosePosition {
                position_id,
                debt_repaid: entire.debt,
                collateral_returned: entire.collateral,
            });

            (collateral, busd_payment)
        }

        /// Hands out the collateral left over after a capped liquidation or a full redemption.
        pub fn claim_surplus_collateral(&mut self, receipt_proof: NonFungibleProof) -> Bucket {
            let position_id = self.check_receipt(receipt_proof);
            let position: Position = self.position_manager.get_non_fungible_data(&position_id);
            assert!(
                position.surplus_collateral > Decimal::ZERO,
                "No surplus collateral to claim."
            );

            self.position_manager
                .update_non_fungible_data(&position_id, "surplus_collateral", Decimal::ZERO);

            Runtime::emit_event(EventClaimSurplus {
                position_id,
                amount: position.surplus_collateral,
            });

            self.surplus_vault.take_advanced(
                position.surplus_collateral,
                WithdrawStrategy::Rounded(RoundingMode::ToZero),
            )
        }

        /// Redeems bUSD for collateral at face value, against the lowest ratio positions first.
        ///
        /// # Arguments
        /// * `payment`: bUSD to redeem. Whatever cannot be redeemed is returned.
        /// * `max_fee_percentage`: Highest redemption fee rate accepted.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: collateral after the redemption fee, and the unredeemed bUSD.
        ///
        /// # Logic
        /// 1. Walk the index upward from the lowest ratio, skipping positions below the MCR.
        /// 2. Each position is redeemed down to its gas compensation reserve. A position left with exactly
        ///    the reserve is closed, the reserve is burned, and its remaining collateral becomes surplus.
        /// 3. A partial redemption that would leave less than the minimum net debt ends the walk.
        /// 4. The base rate grows with the redeemed fraction; the fee is taken from the collateral.
        pub fn redeem(&mut self, mut payment: Bucket, max_fee_percentage: Decimal) -> (Bucket, Bucket) {
            assert!(!self.parameters.stop_redemptions, "Redemptions are stopped.");
            assert!(
                payment.resource_address() == self.busd_manager.address(),
                "Invalid bUSD payment."
            );

            let price = self.fetch_price();
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            let mut store = ReceiptStore { manager: &self.position_manager };
            let outcome = redeem(
                &mut self.ledger,
                &mut store,
                &mut self.index,
                &mut self.base_rate,
                payment.amount(),
                max_fee_percentage,
                price,
                self.circulating_debt,
                now,
                &self.parameters,
            )
            .or_revert();

            payment.take(outcome.debt_redeemed).burn();
            if outcome.gas_compensation_to_burn > Decimal::ZERO {
                self.gas_reserve.take(outcome.gas_compensation_to_burn).burn();
            }
            self.circulating_debt -= outcome.debt_redeemed + outcome.gas_compensation_to_burn;

            let surplus = self.take_collateral(outcome.surplus_collateral);
            self.surplus_vault.put(surplus);

            let mut collateral = self.take_collateral(outcome.collateral_drawn);
            self.redemption_fee_vault.put(collateral.take_advanced(
                outcome.fee,
                WithdrawStrategy::Rounded(RoundingMode::ToZero),
            ));

            for redeemed in outcome.positions.iter() {
                Runtime::emit_event(EventRedeemPosition {
                    position_id: redeemed.id.clone(),
                    debt_redeemed: redeemed.debt_redeemed,
                    collateral_drawn: redeemed.collateral_drawn,
                    fully_redeemed: redeemed.fully_redeemed,
                });
            }
            Runtime::emit_event(EventRedemption {
                debt_redeemed: outcome.debt_redeemed,
                collateral_drawn: outcome.collateral_drawn,
                fee: outcome.fee,
                price,
            });
            Runtime::emit_event(EventBaseRateUpdated {
                base_rate: self.base_rate.base_rate,
                last_fee_operation: self.base_rate.last_fee_operation,
            });

            (collateral, payment)
        }

        /// Liquidates the given positions. Called by the Stability Pool.
        ///
        /// # Arguments
        /// * `position_ids`: Candidates. Healthy, closed and unknown positions are skipped.
        /// * `pool_deposits`: bUSD the Stability Pool can absorb.
        ///
        /// # Returns
        /// * `LiquidationTotals`: what the pool has to offset.
        /// * `Bucket`: collateral for the pool.
        /// * `Bucket`: collateral gas compensation for the liquidator.
        /// * `Bucket`: bUSD gas compensation for the liquidator.
        ///
        /// The caller must burn `debt_to_offset` bUSD from the pool within the same transaction.
        pub fn liquidate_positions(
            &mut self,
            position_ids: Vec<NonFungibleLocalId>,
            pool_deposits: Decimal,
        ) -> (LiquidationTotals, Bucket, Bucket, Bucket) {
            assert!(!self.parameters.stop_liquidations, "Not allowed to liquidate right now.");
            let price = self.fetch_price();

            let mut store = ReceiptStore { manager: &self.position_manager };
            let totals = batch_liquidate(
                &mut self.ledger,
                &mut store,
                &mut self.index,
                &position_ids,
                price,
                pool_deposits,
                &self.parameters,
            )
            .or_revert();

            self.settle_liquidation(totals, price)
        }

        /// Liquidates up to `count` positions, starting from the lowest ratio. Called by the Stability Pool.
        pub fn liquidate_lowest(
            &mut self,
            count: u64,
            pool_deposits: Decimal,
        ) -> (LiquidationTotals, Bucket, Bucket, Bucket) {
            assert!(!self.parameters.stop_liquidations, "Not allowed to liquidate right now.");
            let price = self.fetch_price();

            let mut store = ReceiptStore { manager: &self.position_manager };
            let totals = liquidate_lowest(
                &mut self.ledger,
                &mut store,
                &mut self.index,
                count as usize,
                price,
                pool_deposits,
                &self.parameters,
            )
            .or_revert();

            self.settle_liquidation(totals, price)
        }

        pub fn set_parameters(&mut self, parameters: ProtocolParameters) {
            assert!(parameters.mcr > Decimal::ONE, "MCR must be above 100%.");
            assert!(parameters.ccr >= parameters.mcr, "CCR cannot be below the MCR.");
            assert!(
                parameters.borrowing_fee_floor <= parameters.max_borrowing_fee
                    && parameters.max_borrowing_fee <= Decimal::ONE,
                "Invalid borrowing fee bounds."
            );
            assert!(
                parameters.minute_decay_factor > Decimal::ZERO
                    && parameters.minute_decay_factor < Decimal::ONE,
                "Decay factor must be between 0 and 1."
            );
            assert!(parameters.beta > Decimal::ZERO, "Beta must be positive.");
            assert!(parameters.max_price_age > 0, "Max price age must be positive.");

            self.index.set_max_vector_length(parameters.max_vector_length);
            self.parameters = parameters.clone();
            Runtime::emit_event(EventParametersChanged { parameters });
        }

        pub fn set_stops(&mut self, stop_openings: bool, stop_liquidations: bool, stop_redemptions: bool) {
            self.parameters.stop_openings = stop_openings;
            self.parameters.stop_liquidations = stop_liquidations;
            self.parameters.stop_redemptions = stop_redemptions;
            Runtime::emit_event(EventParametersChanged {
                parameters: self.parameters.clone(),
            });
        }

        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, oracle_method_name: String) {
            self.oracle = Global::from(oracle_address);
            self.oracle_method_name = oracle_method_name;
        }

        /// Takes out the collected fees: borrowing fees in bUSD and redemption fees in collateral.
        pub fn withdraw_fees(&mut self) -> (Bucket, Bucket) {
            (
                self.borrowing_fee_vault.take_all(),
                self.redemption_fee_vault.take_all(),
            )
        }

        /// True when the lowest ratio position is below the MCR.
        pub fn has_undercollateralized_positions(&self) -> bool {
            let price = self.fetch_price();
            let store = ReceiptStore { manager: &self.position_manager };
            has_undercollateralized_positions(&self.ledger, &store, &self.index, price, &self.parameters)
                .or_revert()
        }

        pub fn get_position_infos(&self, position_ids: Vec<NonFungibleLocalId>) -> Vec<PositionInfoReturn> {
            let price = self.fetch_price();
            let store = ReceiptStore { manager: &self.position_manager };

            position_ids
                .into_iter()
                .map(|id| {
                    let position = store.load(&id).unwrap_or_else(Position::non_existent);
                    let entire = self.ledger.entire_debt_and_coll(&position).or_revert();
                    PositionInfoReturn {
                        icr: self.ledger.icr(&position, price).or_revert(),
                        id,
                        status: position.status,
                        debt: entire.debt,
                        collateral: entire.collateral,
                        pending_debt: entire.pending_debt,
                        pending_collateral: entire.pending_collateral,
                        stake: position.stake,
                        surplus_collateral: position.surplus_collateral,
                    }
                })
                .collect()
        }

        pub fn get_system_info(&self) -> SystemInfoReturn {
            let price = self.fetch_price();
            SystemInfoReturn {
                active_debt: self.ledger.active_debt,
                active_collateral: self.ledger.active_collateral,
                default_debt: self.ledger.default_debt,
                default_collateral: self.ledger.default_collateral,
                total_stakes: self.ledger.total_stakes,
                active_positions: self.ledger.active_positions,
                circulating_debt: self.circulating_debt,
                base_rate: self.base_rate.base_rate,
                price,
                tcr: self.ledger.tcr(price).or_revert(),
                recovery_mode: self.ledger.is_recovery_mode(price, &self.parameters).or_revert(),
            }
        }

        /// Up to `count` positions below the MCR, riskiest first.
        pub fn get_next_liquidations(&self, count: u64) -> Vec<NonFungibleLocalId> {
            let price = self.fetch_price();
            let store = ReceiptStore { manager: &self.position_manager };
            let mut liquidations: Vec<NonFungibleLocalId> = vec![];

            for (_, id) in self.index.ascending() {
                if liquidations.len() as u64 >= count {
                    break;
                }
                let Some(position) = store.load(&id) else { continue };
                if self.ledger.icr(&position, price).or_revert() >= self.parameters.mcr {
                    break;
                }
                liquidations.push(id);
            }
            liquidations
        }

        pub fn get_borrowing_rate(&self) -> Decimal {
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            self.base_rate.borrowing_rate(now, &self.parameters).or_revert()
        }

        pub fn get_redemption_rate(&self) -> Decimal {
            self.base_rate.redemption_rate(&self.parameters)
        }

        pub fn get_price(&self) -> Decimal {
            self.fetch_price()
        }

        pub fn get_busd_address(&self) -> ResourceAddress {
            self.busd_manager.address()
        }

        //==================================================================
        //                          HELPER METHODS
        //==================================================================

        /// Reads the oracle and rejects zero and stale prices.
        fn fetch_price(&self) -> Decimal {
            let (price, published_at): (Decimal, i64) = self.oracle.call_raw(
                &self.oracle_method_name,
                scrypto_args!(self.collateral_address),
            );
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            PriceReading { price, published_at }
                .validated(now, self.parameters.max_price_age)
                .or_revert()
        }

        fn check_receipt(&self, receipt_proof: NonFungibleProof) -> NonFungibleLocalId {
            let receipt_proof = receipt_proof.check_with_message(
                self.position_manager.address(),
                "Incorrect proof! Are you sure this position is yours?",
            );
            receipt_proof.non_fungible::<Position>().local_id().clone()
        }

        /// Computes the borrowing fee and decays the base rate. No fee in recovery mode.
        fn charge_borrowing_fee(
            &mut self,
            amount: Decimal,
            max_fee_percentage: Decimal,
            recovery_mode: bool,
        ) -> Decimal {
            assert!(max_fee_percentage <= Decimal::ONE, "Max fee percentage cannot exceed 100%.");
            if recovery_mode {
                return Decimal::ZERO;
            }
            assert!(
                max_fee_percentage >= self.parameters.borrowing_fee_floor,
                "Max fee percentage must be at least the borrowing fee floor."
            );

            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            self.base_rate.decay_on_borrowing(now, &self.parameters).or_revert();
            let rate = self.base_rate.borrowing_rate(now, &self.parameters).or_revert();
            assert!(rate <= max_fee_percentage, "Borrowing fee exceeds the accepted maximum.");

            Runtime::emit_event(EventBaseRateUpdated {
                base_rate: self.base_rate.base_rate,
                last_fee_operation: self.base_rate.last_fee_operation,
            });

            self.base_rate.borrowing_fee(amount, now, &self.parameters).or_revert()
        }

        fn take_collateral(&mut self, amount: Decimal) -> Bucket {
            if amount.is_zero() {
                return Bucket::new(self.collateral_address);
            }
            self.collateral_vault
                .take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero))
        }

        /// Moves collateral and gas compensation out after a liquidation batch.
        fn settle_liquidation(
            &mut self,
            totals: LiquidationTotals,
            price: Decimal,
        ) -> (LiquidationTotals, Bucket, Bucket, Bucket) {
            let collateral_for_pool = self.take_collateral(totals.coll_to_send_to_pool);
            let collateral_gas_compensation = self.take_collateral(totals.coll_gas_compensation);
            let surplus = self.take_collateral(totals.coll_surplus);
            self.surplus_vault.put(surplus);
            let debt_gas_compensation = self.gas_reserve.take(totals.debt_gas_compensation);

            // Burned by the pool in the same transaction.
            self.circulating_debt -= totals.debt_to_offset;

            for position_id in totals.liquidated.iter() {
                Runtime::emit_event(EventLiquidatePosition {
                    position_id: position_id.clone(),
                });
            }
            Runtime::emit_event(EventLiquidation {
                liquidated: totals.liquidated.len() as u64,
                recovery_mode: totals.recovery_mode,
                price,
                debt_offset: totals.debt_to_offset,
                collateral_to_pool: totals.coll_to_send_to_pool,
                debt_redistributed: totals.debt_to_redistribute,
                collateral_redistributed: totals.coll_to_redistribute,
                collateral_gas_compensation: totals.coll_gas_compensation,
                debt_gas_compensation: totals.debt_gas_compensation,
                collateral_surplus: totals.coll_surplus,
            });
            Runtime::emit_event(EventRedistribution {
                l_coll: self.ledger.l_coll,
                l_debt: self.ledger.l_debt,
                total_stakes_snapshot: self.ledger.total_stakes_snapshot,
                total_collateral_snapshot: self.ledger.total_collateral_snapshot,
            });
            if totals.recovery_mode {
                info!("Liquidated {} positions in recovery mode", totals.liquidated.len());
            }

            (
                totals,
                collateral_for_pool,
                collateral_gas_compensation,
                debt_gas_compensation,
            )
        }
    }
}

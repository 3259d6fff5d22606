//! # Ballast Protocol Crate
//!
//! This crate contains the Scrypto blueprints of the Ballast protocol, a decentralized borrowing protocol
//! that lets users mint bUSD stablecoins against a single collateral in over-collateralized positions.
//!
//! Positions below the minimum collateral ratio are liquidated against the Stability Pool, a pool of bUSD
//! deposits that absorbs their debt in exchange for their collateral. Whatever the pool cannot absorb is
//! redistributed over all other positions. bUSD can always be redeemed for collateral at face value.
//!
//! ## Modules
//!
//! The crate is organized into the following modules:
//!
//! - `ballast_component`: Defines the `Ballast` component, owning positions, collateral and bUSD, and exposing
//!   opening, adjusting, closing, redemption and (for the Stability Pool) liquidation.
//! - `stability_pool`: Implements the `StabilityPool` component: deposits, liquidations, front ends and reward
//!   issuance.
//! - `position_ledger`: System totals, stakes and the redistribution accumulators, plus the rules for opening,
//!   adjusting and closing positions.
//! - `sorted_positions`: Index of active positions in nominal collateral ratio order.
//! - `liquidation`: Liquidation values in normal and recovery mode, and batch liquidation.
//! - `redemption`: Redemption against the lowest ratio positions and the decaying base rate.
//! - `stability_pool_ledger`: Product-sum accounting of deposits, collateral gains and rewards.
//! - `issuance`: Time based issuance schedule of the reward token.
//! - `fixed_point`: Decimal helpers with explicit rounding direction.
//! - `errors`: The `ProtocolError` returned by every ledger operation.
//! - `events`: Events emitted by both components.
//! - `shared_structs`: Data structures shared across modules, such as `Position`, `Deposit` and
//!   `ProtocolParameters`.

pub mod ballast_component;
pub mod errors;
pub mod events;
pub mod fixed_point;
pub mod issuance;
pub mod liquidation;
pub mod position_ledger;
pub mod redemption;
pub mod shared_structs;
pub mod sorted_positions;
pub mod stability_pool;
pub mod stability_pool_ledger;

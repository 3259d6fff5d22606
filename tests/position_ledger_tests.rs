use ledger_helper::System;

use ballast_protocol::errors::*;
use ballast_protocol::fixed_point::*;
use ballast_protocol::liquidation::*;
use ballast_protocol::position_ledger::*;
use ballast_protocol::shared_structs::*;
use ballast_protocol::sorted_positions::*;
use scrypto::prelude::*;

#[test]
fn test_open_position() {
    let mut system = System::new();

    let id = system.open(dec!(100), dec!(2000), dec!(100)).unwrap();
    let position = system.position(&id);

    assert_eq!(position.status, PositionStatus::Active);
    assert_eq!(position.debt, dec!(2000));
    assert_eq!(position.collateral, dec!(100));
    // First position: no stake correction yet
    assert_eq!(position.stake, dec!(100));
    // No redistribution yet: minus the debt per unit of stake
    assert_eq!(position.sort_key, dec!(-20));
    assert_eq!(system.ledger.active_debt, dec!(2000));
    assert_eq!(system.ledger.active_collateral, dec!(100));
    assert_eq!(system.ledger.active_positions, 1);
}

#[test]
fn test_open_below_min_net_debt_fails() {
    let mut system = System::new();

    // 1999 - 200 gas compensation is below the 1800 minimum
    let result = system.open(dec!(100), dec!(1999), dec!(100));
    assert!(matches!(result, Err(ProtocolError::InvalidAmount(_))));
    assert_eq!(system.ledger, PositionLedger::new());
}

#[test]
fn test_open_that_would_trigger_recovery_mode_fails() {
    let mut system = System::new();

    // ICR 1.25 is above the MCR, but as the only position it would be the TCR as well
    let result = system.open(dec!(25), dec!(2000), dec!(100));
    assert!(matches!(result, Err(ProtocolError::InsufficientCollateralization(_))));

    // Exactly at the CCR is fine
    assert!(system.open(dec!(30), dec!(2000), dec!(100)).is_ok());
}

#[test]
fn test_recovery_mode_open_requires_ccr() {
    let mut system = System::new();
    system.open(dec!(20), dec!(2000), dec!(200)).unwrap();
    system.open(dec!(20), dec!(2000), dec!(200)).unwrap();

    // TCR = 40 * 140 / 4000 = 1.4
    let price = dec!(140);
    assert!(system.ledger.is_recovery_mode(price, &system.params).unwrap());

    // ICR 1.4
    let result = system.open(dec!(20), dec!(2000), price);
    assert!(matches!(result, Err(ProtocolError::InsufficientCollateralization(_))));

    // ICR 1.54
    assert!(system.open(dec!(22), dec!(2000), price).is_ok());
}

#[test]
fn test_adjust_position() {
    let mut system = System::new();
    let price = dec!(100);
    let id = system.open(dec!(100), dec!(2000), price).unwrap();

    system
        .adjust(
            &id,
            PositionChange {
                debt_change: dec!(1000),
                collateral_change: dec!(-10),
            },
            price,
        )
        .unwrap();

    let position = system.position(&id);
    assert_eq!(position.debt, dec!(3000));
    assert_eq!(position.collateral, dec!(90));
    assert_eq!(position.sort_key, -(dec!(3000) / dec!(90)));
    assert!(system.index.contains(&id, position.sort_key));
    assert!(!system.index.contains(&id, dec!(-20)));
    assert_eq!(system.ledger.active_debt, dec!(3000));
    assert_eq!(system.ledger.active_collateral, dec!(90));
}

#[test]
fn test_failed_adjust_leaves_state_untouched() {
    let mut system = System::new();
    let price = dec!(100);
    let id = system.open(dec!(100), dec!(2000), price).unwrap();
    let ledger_before = system.ledger.clone();
    let position_before = system.position(&id);

    // Would end at ICR 0.5
    let result = system.adjust(
        &id,
        PositionChange {
            debt_change: Decimal::ZERO,
            collateral_change: dec!(-90),
        },
        price,
    );
    assert!(matches!(result, Err(ProtocolError::InsufficientCollateralization(_))));

    // Repaying below the minimum net debt
    let result = system.adjust(
        &id,
        PositionChange {
            debt_change: dec!(-100),
            collateral_change: Decimal::ZERO,
        },
        price,
    );
    assert!(matches!(result, Err(ProtocolError::InvalidAmount(_))));

    assert_eq!(system.ledger, ledger_before);
    assert_eq!(system.position(&id), position_before);
}

#[test]
fn test_recovery_mode_blocks_collateral_withdrawal() {
    let mut system = System::new();
    let a = system.open(dec!(20), dec!(2000), dec!(200)).unwrap();
    system.open(dec!(20), dec!(2000), dec!(200)).unwrap();
    let price = dec!(140);

    let result = system.adjust(
        &a,
        PositionChange {
            debt_change: Decimal::ZERO,
            collateral_change: dec!(-1),
        },
        price,
    );
    assert!(matches!(result, Err(ProtocolError::InsufficientCollateralization(_))));

    // Topping up is always fine
    assert!(system
        .adjust(
            &a,
            PositionChange {
                debt_change: Decimal::ZERO,
                collateral_change: dec!(5),
            },
            price,
        )
        .is_ok());
}

#[test]
fn test_close_position() {
    let mut system = System::new();
    let price = dec!(100);
    let a = system.open(dec!(100), dec!(2000), price).unwrap();
    let b = system.open(dec!(50), dec!(2500), price).unwrap();

    let entire = system.close(&b, price).unwrap();
    assert_eq!(entire.debt, dec!(2500));
    assert_eq!(entire.collateral, dec!(50));

    let position = system.position(&b);
    assert_eq!(position.status, PositionStatus::ClosedByOwner);
    assert_eq!(position.debt, Decimal::ZERO);
    assert_eq!(position.stake, Decimal::ZERO);
    assert_eq!(system.ledger.active_positions, 1);
    assert_eq!(system.ledger.total_stakes, dec!(100));

    // The last one cannot be closed
    assert!(matches!(system.close(&a, price), Err(ProtocolError::InvalidState(_))));
    // Nor can a closed one
    assert!(matches!(system.close(&b, price), Err(ProtocolError::InvalidState(_))));
}

#[test]
fn test_adjust_unknown_position_fails() {
    let mut system = System::new();
    system.open(dec!(100), dec!(2000), dec!(100)).unwrap();

    let result = system.adjust(
        &NonFungibleLocalId::integer(42),
        PositionChange {
            debt_change: Decimal::ZERO,
            collateral_change: dec!(1),
        },
        dec!(100),
    );
    assert!(matches!(result, Err(ProtocolError::InvalidState(_))));
}

/// Opens B and C at 100 collateral / 2000 debt and a riskier A, then liquidates A without a pool.
fn redistribution_setup() -> (System, NonFungibleLocalId, NonFungibleLocalId, NonFungibleLocalId) {
    let mut system = System::new();
    let b = system.open(dec!(100), dec!(2000), dec!(200)).unwrap();
    let c = system.open(dec!(100), dec!(2000), dec!(200)).unwrap();
    let a = system.open(dec!(12), dec!(2000), dec!(200)).unwrap();

    let price = dec!(100);
    let System {
        ledger,
        store,
        index,
        params,
        ..
    } = &mut system;
    let totals = batch_liquidate(ledger, store, index, &[a.clone()], price, Decimal::ZERO, params).unwrap();
    assert_eq!(totals.liquidated, vec![a.clone()]);

    (system, a, b, c)
}

#[test]
fn test_redistribution_to_remaining_positions() {
    let (system, a, b, c) = redistribution_setup();

    // 0.5% of 12 goes to the liquidator, the rest is shared by the 200 remaining stakes
    assert_eq!(system.ledger.l_coll, dec!("11.94") / dec!(200));
    assert_eq!(system.ledger.l_debt, dec!(10));
    assert_eq!(system.ledger.default_debt, dec!(2000));
    assert_eq!(system.ledger.default_collateral, dec!("11.94"));

    for id in [&b, &c] {
        let entire = system.ledger.entire_debt_and_coll(&system.position(id)).unwrap();
        assert_eq!(entire.pending_debt, dec!(1000));
        assert_eq!(entire.pending_collateral, dec!("5.97"));
    }
    assert_eq!(system.position(&a).status, PositionStatus::ClosedByLiquidation);
    assert!(!system.index.contains(&a, system.position(&a).sort_key));
}

#[test]
fn test_redistribution_conserves_debt_and_collateral() {
    let (system, _, _, _) = redistribution_setup();

    assert_eq!(system.summed_entire_debt(), system.ledger.entire_system_debt());
    assert!(system.summed_entire_collateral() <= system.ledger.entire_system_collateral());
    assert_eq!(system.ledger.total_stakes, dec!(200));
}

#[test]
fn test_applying_rewards_moves_default_to_active() {
    let (mut system, _, b, _) = redistribution_setup();
    let price = dec!(100);

    system
        .adjust(
            &b,
            PositionChange {
                debt_change: Decimal::ZERO,
                collateral_change: dec!(10),
            },
            price,
        )
        .unwrap();

    let position = system.position(&b);
    assert_eq!(position.debt, dec!(3000));
    assert_eq!(position.collateral, dec!("115.97"));
    assert_eq!(position.snapshot.l_debt, system.ledger.l_debt);
    assert_eq!(system.ledger.default_debt, dec!(1000));
    assert_eq!(system.ledger.default_collateral, dec!("5.97"));
    assert_eq!(system.ledger.active_debt, dec!(5000));
}

#[test]
fn test_stake_correction_after_redistribution() {
    let (mut system, _, _, _) = redistribution_setup();

    // Snapshots taken after the liquidation: 200 stakes against 211.94 collateral
    assert_eq!(system.ledger.total_stakes_snapshot, dec!(200));
    assert_eq!(system.ledger.total_collateral_snapshot, dec!("211.94"));

    let d = system.open(dec!(100), dec!(2000), dec!(100)).unwrap();
    let position = system.position(&d);
    assert_eq!(
        position.stake,
        mul_div_floor(dec!(100), dec!(200), dec!("211.94")).unwrap()
    );
    assert!(position.stake < dec!(100));

    // A new position does not share in earlier redistributions
    let entire = system.ledger.entire_debt_and_coll(&position).unwrap();
    assert_eq!(entire.pending_debt, Decimal::ZERO);
    assert_eq!(entire.pending_collateral, Decimal::ZERO);
}

#[test]
fn test_redistribution_without_stakes_fails() {
    let mut ledger = PositionLedger::new();
    assert!(matches!(
        ledger.redistribute(dec!(100), dec!(1)),
        Err(ProtocolError::ArithmeticBounds(_))
    ));
    assert_eq!(ledger, PositionLedger::new());
}

#[test]
fn test_redistribution_carries_rounding_error() {
    let mut ledger = PositionLedger::new();
    ledger.total_stakes = dec!(3);

    ledger.redistribute(dec!(1), dec!(1)).unwrap();
    assert!(ledger.last_debt_error > PreciseDecimal::ZERO);
    let first = ledger.l_debt;

    ledger.redistribute(dec!(2), dec!(2)).unwrap();
    // 3 units over 3 stakes: the carried error completes the second step to exactly 1
    assert_eq!(ledger.l_debt, Decimal::ONE);
    assert!(first < dec!("0.34"));
    assert_eq!(ledger.last_debt_error, PreciseDecimal::ZERO);
}

#[test]
fn test_sort_key_requires_a_stake() {
    let result = sort_key(&Position::non_existent());
    assert!(matches!(result, Err(ProtocolError::InvalidState(_))));
}

#[test]
fn test_sort_key_survives_redistribution() {
    let (system, _, b, c) = redistribution_setup();

    // Keys were taken before the liquidation and still order B and C by their current ratio
    assert_eq!(system.position(&b).sort_key, dec!(-20));
    assert_eq!(system.position(&c).sort_key, dec!(-20));
    assert_eq!(system.index_order(), vec![b, c]);
}

#[test]
fn test_reinsert_under_wrong_key_fails() {
    let mut system = System::new();
    let a = system.open(dec!(100), dec!(2000), dec!(100)).unwrap();
    let key = system.position(&a).sort_key;

    let result = system.index.reinsert(a.clone(), key - dec!(1), key + dec!(1));
    assert!(matches!(result, Err(ProtocolError::InvalidState(_))));
    assert!(system.index.contains(&a, key));
    assert!(!system.index.contains(&a, key + dec!(1)));

    let result = system.index.remove(&NonFungibleLocalId::integer(99), key);
    assert!(matches!(result, Err(ProtocolError::InvalidState(_))));
}

use ledger_helper::{redistributed_positions, System};

use ballast_protocol::errors::*;
use ballast_protocol::fixed_point::*;
use ballast_protocol::redemption::*;
use ballast_protocol::shared_structs::*;
use ballast_protocol::sorted_positions::*;
use scrypto::prelude::*;

const NOW: i64 = 1_700_000_000;

/// C is the safest, A the riskiest: C 100 / 2000, B 50 / 3000, A 30 / 2500 at a price of 100.
fn setup() -> (System, NonFungibleLocalId, NonFungibleLocalId, NonFungibleLocalId) {
    let mut system = System::new();
    let price = dec!(100);
    let c = system.open(dec!(100), dec!(2000), price).unwrap();
    let b = system.open(dec!(50), dec!(3000), price).unwrap();
    let a = system.open(dec!(30), dec!(2500), price).unwrap();
    (system, a, b, c)
}

fn redeem_from(
    system: &mut System,
    base_rate: &mut BaseRate,
    amount: Decimal,
    max_fee: Decimal,
    price: Decimal,
) -> ProtocolResult<RedemptionOutcome> {
    let supply = system.ledger.entire_system_debt();
    redeem(
        &mut system.ledger,
        &mut system.store,
        &mut system.index,
        base_rate,
        amount,
        max_fee,
        price,
        supply,
        NOW,
        &system.params,
    )
}

#[test]
fn test_partial_redemption_of_lowest_position() {
    let (mut system, a, _, _) = setup();
    let mut base_rate = BaseRate::new(NOW);

    let outcome = redeem_from(&mut system, &mut base_rate, dec!(500), Decimal::ONE, dec!(100)).unwrap();

    assert_eq!(outcome.debt_redeemed, dec!(500));
    assert_eq!(outcome.collateral_drawn, dec!(5));
    assert_eq!(outcome.positions.len(), 1);
    assert!(!outcome.positions[0].fully_redeemed);

    let position = system.position(&a);
    assert_eq!(position.debt, dec!(2000));
    assert_eq!(position.collateral, dec!(25));
    // Reindexed under its new debt per unit of stake
    assert_eq!(position.sort_key, dec!(-80));
    assert!(system.index.contains(&a, dec!(-80)));
    assert!(!system.index.contains(&a, dec!(-2500) / dec!(30)));
    assert_eq!(system.ledger.active_debt, dec!(7000));

    // 500 redeemed out of 7500: base rate = (5 * 100 / 7500) / 2
    let expected_base_rate = div_floor(mul_div_floor(dec!(5), dec!(100), dec!(7500)).unwrap(), dec!(2)).unwrap();
    assert_eq!(outcome.base_rate, expected_base_rate);
    assert_eq!(base_rate.base_rate, expected_base_rate);
    assert_eq!(
        outcome.fee,
        mul_floor(dec!(5), dec!("0.005") + expected_base_rate).unwrap()
    );
}

#[test]
fn test_full_redemption_closes_position() {
    let (mut system, a, b, _) = setup();
    let mut base_rate = BaseRate::new(NOW);

    let outcome = redeem_from(&mut system, &mut base_rate, dec!(2300), Decimal::ONE, dec!(100)).unwrap();

    assert_eq!(outcome.debt_redeemed, dec!(2300));
    assert_eq!(outcome.collateral_drawn, dec!(23));
    assert_eq!(outcome.gas_compensation_to_burn, dec!(200));
    assert_eq!(outcome.surplus_collateral, dec!(7));

    let position = system.position(&a);
    assert_eq!(position.status, PositionStatus::ClosedByRedemption);
    assert_eq!(position.surplus_collateral, dec!(7));
    assert_eq!(position.debt, Decimal::ZERO);
    assert_eq!(system.ledger.active_positions, 2);
    assert_eq!(system.ledger.active_debt, dec!(5000));
    assert_eq!(system.ledger.active_collateral, dec!(150));

    // Next in line is B
    assert_eq!(system.index.ascending().next().map(|(_, id)| id), Some(b));
}

#[test]
fn test_redemption_continues_past_closed_positions() {
    let (mut system, a, b, _) = setup();
    let mut base_rate = BaseRate::new(NOW);

    // A fully (2300) then B down to 2500 debt
    let outcome = redeem_from(&mut system, &mut base_rate, dec!(2800), Decimal::ONE, dec!(100)).unwrap();

    assert_eq!(outcome.positions.len(), 2);
    assert_eq!(outcome.positions[0].id, a);
    assert!(outcome.positions[0].fully_redeemed);
    assert_eq!(outcome.positions[1].id, b);
    assert_eq!(outcome.positions[1].debt_redeemed, dec!(500));
    assert_eq!(system.position(&b).debt, dec!(2500));
}

#[test]
fn test_redemption_stops_before_min_net_debt() {
    let (mut system, a, _, _) = setup();
    let mut base_rate = BaseRate::new(NOW);
    let ledger_before = system.ledger.clone();

    // Leaves A with 2100 debt, 1900 net
    let outcome = redeem_from(&mut system, &mut base_rate, dec!(400), Decimal::ONE, dec!(100)).unwrap();
    assert_eq!(outcome.debt_redeemed, dec!(400));

    // Another 200 would leave 1700 net, below the minimum, without closing A
    let result = redeem_from(&mut system, &mut base_rate, dec!(200), Decimal::ONE, dec!(100));
    assert!(matches!(result, Err(ProtocolError::InvalidState(_))));
    assert_eq!(system.position(&a).debt, dec!(2100));
    assert_ne!(system.ledger, ledger_before);
}

#[test]
fn test_positions_below_mcr_are_skipped() {
    let (mut system, a, b, _) = setup();
    let mut base_rate = BaseRate::new(NOW);

    // At 90: A at 1.08 is below the MCR, B at 1.5 is not
    let outcome = redeem_from(&mut system, &mut base_rate, dec!(500), Decimal::ONE, dec!(90)).unwrap();
    assert_eq!(outcome.positions[0].id, b);
    assert_eq!(system.position(&a).debt, dec!(2500));
}

#[test]
fn test_redemption_fee_above_max_reverts() {
    let (mut system, a, _, _) = setup();
    let mut base_rate = BaseRate::new(NOW);
    let ledger_before = system.ledger.clone();
    let position_before = system.position(&a);

    let result = redeem_from(&mut system, &mut base_rate, dec!(2300), dec!("0.01"), dec!(100));
    assert!(matches!(result, Err(ProtocolError::InvalidAmount(_))));

    assert_eq!(system.ledger, ledger_before);
    assert_eq!(system.position(&a), position_before);
    assert_eq!(base_rate, BaseRate::new(NOW));
    assert!(system.index.contains(&a, position_before.sort_key));
}

#[test]
fn test_redemption_input_validation() {
    let (mut system, _, _, _) = setup();
    let mut base_rate = BaseRate::new(NOW);

    assert!(matches!(
        redeem_from(&mut system, &mut base_rate, Decimal::ZERO, Decimal::ONE, dec!(100)),
        Err(ProtocolError::InvalidAmount(_))
    ));
    assert!(matches!(
        redeem_from(&mut system, &mut base_rate, dec!(100), dec!("0.001"), dec!(100)),
        Err(ProtocolError::InvalidAmount(_))
    ));
    assert!(matches!(
        redeem_from(&mut system, &mut base_rate, dec!(100), Decimal::ONE, Decimal::ZERO),
        Err(ProtocolError::StaleOrInvalidPrice(_))
    ));
    // TCR = 180 * 40 / 7500, below the MCR
    assert!(matches!(
        redeem_from(&mut system, &mut base_rate, dec!(100), Decimal::ONE, dec!(40)),
        Err(ProtocolError::InsufficientCollateralization(_))
    ));
}

#[test]
fn test_base_rate_halves_in_twelve_hours() {
    let params = ProtocolParameters::default();
    let base_rate = BaseRate {
        base_rate: dec!("0.1"),
        last_fee_operation: NOW,
    };

    let decayed = base_rate.decayed(NOW + 720 * 60, &params).unwrap();
    assert!(decayed > dec!("0.0499") && decayed < dec!("0.0501"));

    // Partial minutes do not count
    assert_eq!(base_rate.decayed(NOW + 59, &params).unwrap(), dec!("0.1"));
}

#[test]
fn test_borrowing_rate_is_bounded() {
    let params = ProtocolParameters::default();

    let idle = BaseRate::new(NOW);
    assert_eq!(idle.borrowing_rate(NOW, &params).unwrap(), dec!("0.005"));
    assert_eq!(idle.borrowing_fee(dec!(1000), NOW, &params).unwrap(), dec!(5));

    let busy = BaseRate {
        base_rate: dec!("0.3"),
        last_fee_operation: NOW,
    };
    assert_eq!(busy.borrowing_rate(NOW, &params).unwrap(), dec!("0.05"));
    assert_eq!(busy.redemption_rate(&params), dec!("0.305"));
}

#[test]
fn test_decay_clock_moves_in_whole_minutes() {
    let params = ProtocolParameters::default();
    let mut base_rate = BaseRate {
        base_rate: dec!("0.1"),
        last_fee_operation: NOW,
    };

    base_rate.decay_on_borrowing(NOW + 30, &params).unwrap();
    assert_eq!(base_rate.last_fee_operation, NOW);

    base_rate.decay_on_borrowing(NOW + 90, &params).unwrap();
    assert_eq!(base_rate.last_fee_operation, NOW + 90);
    assert!(base_rate.base_rate < dec!("0.1"));
}

#[test]
fn test_redemption_after_redistribution_starts_at_riskiest_position() {
    let (mut system, a, b, _) = redistributed_positions();
    let mut base_rate = BaseRate::new(NOW);
    let price = dec!(90);
    let a_before = system.position(&a);

    let outcome = redeem_from(&mut system, &mut base_rate, dec!(50), Decimal::ONE, price).unwrap();

    assert_eq!(outcome.positions.len(), 1);
    assert_eq!(outcome.positions[0].id, b);
    assert!(!outcome.positions[0].fully_redeemed);
    assert_eq!(system.position(&a), a_before);
    system.assert_index_follows_icr(price);
}

#[test]
fn test_redemption_of_position_missing_from_index_fails_without_changes() {
    let (mut system, a, _, _) = setup();
    let mut base_rate = BaseRate::new(NOW);

    // Index entry under a key the position does not carry
    let position_before = system.position(&a);
    let key = position_before.sort_key;
    system.index.remove(&a, key).unwrap();
    system.index.insert(a.clone(), key - dec!(1)).unwrap();
    let ledger_before = system.ledger.clone();

    let result = redeem_from(&mut system, &mut base_rate, dec!(500), Decimal::ONE, dec!(100));
    assert!(matches!(result, Err(ProtocolError::InvalidState(_))));
    assert_eq!(system.ledger, ledger_before);
    assert_eq!(system.position(&a), position_before);
    assert_eq!(base_rate, BaseRate::new(NOW));
    assert!(system.index.contains(&a, key - dec!(1)));
}

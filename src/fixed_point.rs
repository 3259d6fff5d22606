//! # Fixed point helpers
//! All ledger arithmetic runs on 18 decimal `Decimal` values and rounds toward zero (floor, as every
//! amount in the ledgers is non-negative) unless stated otherwise. Intermediate products that could lose
//! precision go through `PreciseDecimal`, which holds the exact product of two 18 decimal values.

use crate::errors::*;
use scrypto::prelude::*;

/// Factor `P` is multiplied by when it loses significant digits, and the divisor applied to sums
/// recorded one scale later.
pub fn rescale_factor() -> Decimal {
    dec!(1000000000)
}

/// `P` below this value (1e-9 of a unit) triggers a rescale.
pub fn p_rescale_threshold() -> Decimal {
    dec!("0.000000001")
}

/// The smallest representable amount.
pub fn atto() -> Decimal {
    dec!("0.000000000000000001")
}

pub fn mul_floor(a: Decimal, b: Decimal) -> ProtocolResult<Decimal> {
    a.checked_mul(b)
        .ok_or_else(|| ProtocolError::bounds("multiplication overflow"))
}

pub fn div_floor(a: Decimal, b: Decimal) -> ProtocolResult<Decimal> {
    if b.is_zero() {
        return Err(ProtocolError::bounds("division by zero"));
    }
    a.checked_div(b)
        .ok_or_else(|| ProtocolError::bounds("division overflow"))
}

/// Division rounding up to the next atto. Used where rounding must favor the protocol.
pub fn div_ceil(a: Decimal, b: Decimal) -> ProtocolResult<Decimal> {
    let quotient = div_floor(a, b)?;
    let back = PreciseDecimal::from(quotient)
        .checked_mul(PreciseDecimal::from(b))
        .ok_or_else(|| ProtocolError::bounds("multiplication overflow"))?;

    if back < PreciseDecimal::from(a) {
        quotient
            .checked_add(atto())
            .ok_or_else(|| ProtocolError::bounds("addition overflow"))
    } else {
        Ok(quotient)
    }
}

/// `a * b / c`, floored once at the end.
pub fn mul_div_floor(a: Decimal, b: Decimal, c: Decimal) -> ProtocolResult<Decimal> {
    if c.is_zero() {
        return Err(ProtocolError::bounds("division by zero"));
    }
    PreciseDecimal::from(a)
        .checked_mul(PreciseDecimal::from(b))
        .and_then(|product| product.checked_div(PreciseDecimal::from(c)))
        .and_then(|quotient| quotient.checked_truncate(RoundingMode::ToZero))
        .ok_or_else(|| ProtocolError::bounds("mul_div overflow"))
}

/// Floors `numerator / denominator` to 18 decimals and returns the exact remainder
/// (`numerator - quotient * denominator`), so the caller can feed it into the next division.
pub fn div_with_remainder(
    numerator: PreciseDecimal,
    denominator: Decimal,
) -> ProtocolResult<(Decimal, PreciseDecimal)> {
    if denominator.is_zero() {
        return Err(ProtocolError::bounds("division by zero"));
    }
    let denominator = PreciseDecimal::from(denominator);
    let quotient = numerator
        .checked_div(denominator)
        .and_then(|q| q.checked_truncate(RoundingMode::ToZero))
        .ok_or_else(|| ProtocolError::bounds("division overflow"))?;
    let remainder = PreciseDecimal::from(quotient)
        .checked_mul(denominator)
        .and_then(|back| numerator.checked_sub(back))
        .ok_or_else(|| ProtocolError::bounds("remainder overflow"))?;

    Ok((quotient, remainder))
}

/// Collateral value over debt. A position without debt has an infinite ratio.
pub fn collateral_ratio(collateral: Decimal, debt: Decimal, price: Decimal) -> ProtocolResult<Decimal> {
    if debt.is_zero() {
        return Ok(Decimal::MAX);
    }
    mul_div_floor(collateral, price, debt)
}

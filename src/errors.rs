//! # Protocol errors
//! Every fallible ledger operation returns a [`ProtocolResult`]. The blueprints turn an error into a
//! panic carrying the error message, which aborts the whole transaction and leaves the component state
//! untouched.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Operating on a position or deposit that does not exist or is no longer active.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// An operation would leave a position (or the system) below the required collateral ratio.
    #[error("Insufficient collateralization: {0}")]
    InsufficientCollateralization(String),
    /// The oracle returned a zero price or a price older than the maximum allowed age.
    #[error("Stale or invalid price: {0}")]
    StaleOrInvalidPrice(String),
    /// Overflow, division by zero, or an amount outside of what the ledger can hold.
    #[error("Arithmetic bounds: {0}")]
    ArithmeticBounds(String),
    /// A caller supplied amount or limit that is not acceptable.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

impl ProtocolError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn undercollateralized(msg: impl Into<String>) -> Self {
        Self::InsufficientCollateralization(msg.into())
    }

    pub fn bad_price(msg: impl Into<String>) -> Self {
        Self::StaleOrInvalidPrice(msg.into())
    }

    pub fn bounds(msg: impl Into<String>) -> Self {
        Self::ArithmeticBounds(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }
}

/// Unwraps a ledger result inside a blueprint method, reverting the transaction on error.
pub trait OrRevert<T> {
    fn or_revert(self) -> T;
}

impl<T> OrRevert<T> for ProtocolResult<T> {
    fn or_revert(self) -> T {
        match self {
            Ok(value) => value,
            Err(error) => panic!("{}", error),
        }
    }
}

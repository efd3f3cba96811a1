//! Order types for the OffOrder store.
//!
//! An [`Order`] is persisted as a single JSON value under its market's order
//! key. Its terms ([`OrderData`]) never change once stored; only `taken` is
//! meant to move, and only under a matching process that lives elsewhere.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Address, OffOrderError, Result};

/// Which side of the book this order rests on.
///
/// The side also decides which asset the order's balance reservation is
/// taken from: bids reserve the base asset, asks the quote asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Lowercase name, as it appears in store keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = OffOrderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bid" => Ok(Self::Bid),
            "ask" => Ok(Self::Ask),
            other => Err(OffOrderError::InvalidSide(other.to_string())),
        }
    }
}

/// Immutable order terms, as signed by the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderData {
    pub address: Address,
    pub base: String,
    pub quote: String,
    pub amount: i64,
    pub price: i64,
}

impl OrderData {
    /// The balance this order must reserve when placed on `side`.
    ///
    /// # Errors
    /// Returns `InvalidAmount` unless both `amount` and `price` are positive,
    /// and `AmountOverflow` if `amount * price` does not fit in an `i64`.
    pub fn reservation(&self, side: Side) -> Result<Reservation> {
        if self.amount <= 0 || self.price <= 0 {
            return Err(OffOrderError::InvalidAmount {
                amount: self.amount,
                price: self.price,
            });
        }
        match side {
            Side::Bid => {
                let amount = self
                    .amount
                    .checked_mul(self.price)
                    .ok_or(OffOrderError::AmountOverflow {
                        amount: self.amount,
                        price: self.price,
                    })?;
                Ok(Reservation {
                    asset: self.base.clone(),
                    amount,
                })
            }
            Side::Ask => Ok(Reservation {
                asset: self.quote.clone(),
                amount: self.amount,
            }),
        }
    }

    /// Canonical bytes a client signs for this order.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Asset and amount debited from an account when an order is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub asset: String,
    pub amount: i64,
}

/// An order resting in a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub data: OrderData,
    /// Cumulative amount already filled.
    pub taken: i64,
}

impl Order {
    /// A fresh, unfilled order.
    #[must_use]
    pub fn new(data: OrderData) -> Self {
        Self { data, taken: 0 }
    }

    #[must_use]
    pub fn price(&self) -> i64 {
        self.data.price
    }

    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.data.amount.saturating_sub(self.taken)
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.taken >= self.data.amount
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    pub fn dummy(address: &str, base: &str, quote: &str, amount: i64, price: i64) -> Self {
        Self::new(OrderData {
            address: Address::from(address),
            base: base.to_string(),
            quote: quote.to_string(),
            amount,
            price,
        })
    }

    /// An order with random non-negative 31-bit amount and price.
    #[cfg(feature = "test-helpers")]
    pub fn random(address: &str, base: &str, quote: &str) -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Self::dummy(
            address,
            base,
            quote,
            i64::from(rng.gen_range(0..i32::MAX)),
            i64::from(rng.gen_range(0..i32::MAX)),
        )
    }
}

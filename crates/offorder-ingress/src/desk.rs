//! Order placement and cancellation as the request layer drives them.
//!
//! ## Placement
//!
//! [`OrderDesk::place_order`] runs under the submitter's account lock:
//!
//! ```text
//! lock ─▶ reservation ─▶ balance ≥ reservation? ─▶ verify ─▶ next id
//!      ─▶ store + index order ─▶ debit balance ─▶ unlock
//! ```
//!
//! The lock is released on every exit path. The order write and the debit
//! are separate store calls; a crash between them leaves the order booked
//! without the debit.
//!
//! [`OrderDesk::place_order_atomic`] takes the same lock and performs the
//! same checks, but commits the order record, its index entry and the debit
//! in one watched transaction over the balance, order and index keys. Any
//! concurrent write to those keys aborts the transaction and the whole body
//! is re-run, up to the configured retry limit.
//!
//! Amounts and prices must be positive; a debit that would leave the
//! balance outside `i64` fails with `AmountOverflow`.

use std::sync::Arc;

use async_trait::async_trait;
use offorder_db::{App, Market, User};
use offorder_store::{Tx, TxBody, all_ok, run_watched_with_retry};
use offorder_types::{OffOrderError, Order, OrderData, OrderId, Reservation, Result, Side};
use serde::{Deserialize, Serialize};

use crate::verifier::SignatureVerifier;

/// A signed request to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    #[serde(flatten)]
    pub data: OrderData,
    pub side: Side,
    #[serde(rename = "sign", with = "base64_bytes")]
    pub signature: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Entry point for order placement and cancellation.
#[derive(Clone)]
pub struct OrderDesk {
    app: App,
    verifier: Arc<dyn SignatureVerifier>,
}

impl OrderDesk {
    pub fn new(app: App, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { app, verifier }
    }

    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }

    /// Place `req` under the submitter's account lock and return its id.
    pub async fn place_order(&self, req: &PlaceOrder) -> Result<OrderId> {
        let user = self.app.user(req.data.address.clone());
        user.acquire().await?;

        let outcome = self.place_locked(&user, req).await;
        release(&user).await;
        outcome
    }

    async fn place_locked(&self, user: &User, req: &PlaceOrder) -> Result<OrderId> {
        let reservation = req.data.reservation(req.side)?;
        let balance = user.get_balance(&reservation.asset).await?;
        let remaining = debited(&reservation, balance)?;
        self.verify(req)?;

        let market = self.app.market(&req.data.base, &req.data.quote);
        let id = market.incr_order_len().await?;
        market
            .set_order(id, req.side, &Order::new(req.data.clone()))
            .await?;
        user.set_balance(&reservation.asset, remaining).await?;

        tracing::info!(
            market = %market,
            %id,
            side = %req.side,
            user = %user.address().short(),
            reserved = reservation.amount,
            "order placed"
        );
        Ok(id)
    }

    /// Place `req` with the order write and the debit committed together.
    pub async fn place_order_atomic(&self, req: &PlaceOrder) -> Result<OrderId> {
        let user = self.app.user(req.data.address.clone());
        user.acquire().await?;

        let outcome = self.place_atomic_locked(&user, req).await;
        release(&user).await;
        outcome
    }

    async fn place_atomic_locked(&self, user: &User, req: &PlaceOrder) -> Result<OrderId> {
        let reservation = req.data.reservation(req.side)?;
        self.verify(req)?;

        let market = self.app.market(&req.data.base, &req.data.quote);
        let id = market.incr_order_len().await?;

        let body = Placement {
            market: &market,
            user,
            id,
            side: req.side,
            order: Order::new(req.data.clone()),
            reservation: &reservation,
        };
        let keys = [
            user.balance_key(&reservation.asset),
            market.order_key(id),
            market.orderbook_key(req.side),
        ];
        let results =
            run_watched_with_retry(self.app.store(), &keys, &body, self.app.tx_retry_limit())
                .await?;
        all_ok(results)?;

        tracing::info!(
            market = %market,
            %id,
            side = %req.side,
            user = %user.address().short(),
            reserved = reservation.amount,
            "order placed atomically"
        );
        Ok(id)
    }

    /// Delete an order record. Its index entry is left in place.
    pub async fn cancel_order(&self, base: &str, quote: &str, id: OrderId) -> Result<()> {
        let market = self.app.market(base, quote);
        if market.del_order(id).await? {
            tracing::info!(market = %market, %id, "order cancelled");
            Ok(())
        } else {
            Err(OffOrderError::OrderNotFound {
                market: market.to_string(),
                id,
            })
        }
    }

    fn verify(&self, req: &PlaceOrder) -> Result<()> {
        let message = req.data.signing_bytes()?;
        if self
            .verifier
            .verify(&message, &req.signature, &req.data.address)
        {
            Ok(())
        } else {
            tracing::warn!(user = %req.data.address.short(), "order signature rejected");
            Err(OffOrderError::SignatureRejected {
                address: req.data.address.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for OrderDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderDesk")
            .field("app", &self.app)
            .finish_non_exhaustive()
    }
}

async fn release(user: &User) {
    if let Err(err) = user.unlock().await {
        tracing::error!(
            user = %user.address().short(),
            error = %err,
            "failed to release account lock"
        );
    }
}

/// Balance left after taking `reservation` out of `balance`.
fn debited(reservation: &Reservation, balance: i64) -> Result<i64> {
    if balance < reservation.amount {
        return Err(OffOrderError::InsufficientBalance {
            needed: reservation.amount,
            available: balance,
        });
    }
    balance
        .checked_sub(reservation.amount)
        .ok_or(OffOrderError::AmountOverflow {
            amount: reservation.amount,
            price: 1,
        })
}

/// Body of an atomic placement.
struct Placement<'a> {
    market: &'a Market,
    user: &'a User,
    id: OrderId,
    side: Side,
    order: Order,
    reservation: &'a Reservation,
}

#[async_trait]
impl TxBody for Placement<'_> {
    async fn apply(&self, tx: &mut Tx<'_>) -> Result<()> {
        let asset = &self.reservation.asset;
        let balance: i64 = tx
            .get_json(&self.user.balance_key(asset))
            .await?
            .ok_or_else(|| OffOrderError::BalanceNotFound {
                token: asset.clone(),
            })?;
        let remaining = debited(self.reservation, balance)?;

        let member = self.id.to_string();
        if tx
            .zscore(&self.market.orderbook_key(self.side), &member)
            .await?
            .is_some()
        {
            return Err(OffOrderError::DuplicateOrder {
                id: self.id,
                side: self.side,
            });
        }

        self.market
            .stage_order(tx, self.id, self.side, &self.order)?;
        self.user
            .stage_balance(tx, asset, remaining)?;
        Ok(())
    }
}

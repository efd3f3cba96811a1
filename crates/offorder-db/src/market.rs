//! Per-market order storage and the price-ordered book index.
//!
//! Key layout (namespace `P`, base `B`, quote `Q`):
//!
//! | Key | Holds |
//! |-----|-------|
//! | `P:init` | initialization flag (`1`) |
//! | `P:B:Q:orderlen` | last assigned order id |
//! | `P:B:Q:order:<id>` | JSON-encoded [`Order`] |
//! | `P:B:Q:orderbook:<side>` | sorted index, member = id, score = price |
//! | `P:nonce:<addr>` | per-address nonce |
//!
//! The layout is shared with existing deployments and must not change.
//!
//! Deleting an order with [`Market::del_order`] leaves its id in the side
//! index. Readers of the book see the stale id and fail to resolve it;
//! [`Market::cancel_order`] removes both in one batch when the side is known.

use std::fmt;

use offorder_store::{Key, RangeOrder, Store, Tx, all_ok};
use offorder_types::{Address, OffOrderError, Order, OrderId, Result, Side, constants};

use crate::app::App;

/// Sorted-index score for a price. Scores are doubles on the store side.
#[allow(clippy::cast_precision_loss)]
fn price_score(price: i64) -> f64 {
    price as f64
}

/// View of one `(base, quote)` market inside a namespace.
#[derive(Debug, Clone)]
pub struct Market {
    app: App,
    base: String,
    quote: String,
}

impl Market {
    pub(crate) fn new(app: App, base: String, quote: String) -> Self {
        Self { app, base, quote }
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote
    }

    fn store(&self) -> &dyn Store {
        self.app.store()
    }

    fn market_key(&self) -> Key {
        self.app.root_key().push(&self.base).push(&self.quote)
    }

    // =================================================================
    // Keys
    // =================================================================

    /// Namespace-wide initialization flag.
    #[must_use]
    pub fn init_key(&self) -> Key {
        self.app.root_key().push("init")
    }

    #[must_use]
    pub fn order_key(&self, id: OrderId) -> Key {
        self.market_key().push("order").push(id.to_string())
    }

    #[must_use]
    pub fn order_len_key(&self) -> Key {
        self.market_key().push("orderlen")
    }

    #[must_use]
    pub fn orderbook_key(&self, side: Side) -> Key {
        self.market_key().push("orderbook").push(side.as_str())
    }

    #[must_use]
    pub fn nonce_key(&self, addr: &Address) -> Key {
        self.app.root_key().push("nonce").push_addr(addr)
    }

    // =================================================================
    // Initialization
    // =================================================================

    /// Reset the order counter to 0 and raise the initialization flag.
    ///
    /// Two independent writes. Running this on a market that already has
    /// orders rewinds the counter and ids will be handed out again.
    pub async fn initialize(&self) -> Result<()> {
        self.store().set(&self.order_len_key(), "0", None).await?;
        self.store()
            .set(&self.init_key(), constants::FLAG_SET, None)
            .await?;
        tracing::info!(market = %self, "market initialized");
        Ok(())
    }

    /// Whether the initialization flag is set. A namespace that was never
    /// initialized reports `false`.
    pub async fn initialized(&self) -> Result<bool> {
        Ok(self
            .store()
            .get(&self.init_key())
            .await?
            .is_some_and(|flag| flag == constants::FLAG_SET))
    }

    // =================================================================
    // Orders
    // =================================================================

    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        let raw = self
            .store()
            .get(&self.order_key(id))
            .await?
            .ok_or_else(|| OffOrderError::OrderNotFound {
                market: self.to_string(),
                id,
            })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Store `order` under `id` and index it on `side` by price.
    ///
    /// Two store calls. If indexing fails, or `id` is already a member of
    /// the side's index, the record just written is deleted again and the
    /// call fails ([`OffOrderError::DuplicateOrder`] for the latter).
    pub async fn set_order(&self, id: OrderId, side: Side, order: &Order) -> Result<()> {
        let key = self.order_key(id);
        let encoded = serde_json::to_string(order)?;
        self.store().set(&key, &encoded, None).await?;

        let added = match self
            .store()
            .zadd(
                &self.orderbook_key(side),
                price_score(order.price()),
                &id.to_string(),
            )
            .await
        {
            Ok(added) => added,
            Err(err) => {
                self.discard_record(&key).await;
                return Err(err.into());
            }
        };

        if added != 1 {
            tracing::warn!(market = %self, %id, %side, "order id already indexed");
            self.discard_record(&key).await;
            return Err(OffOrderError::DuplicateOrder { id, side });
        }

        tracing::debug!(market = %self, %id, %side, price = order.price(), "order stored");
        Ok(())
    }

    async fn discard_record(&self, key: &Key) {
        if let Err(err) = self.store().del(key).await {
            tracing::error!(key = %key, %err, "failed to remove orphaned order record");
        }
    }

    /// Queue the writes of [`Market::set_order`] on a watched transaction,
    /// so they commit together with whatever else the transaction holds.
    pub fn stage_order(&self, tx: &mut Tx<'_>, id: OrderId, side: Side, order: &Order) -> Result<()> {
        tx.set_json(self.order_key(id), order)?;
        tx.zadd(
            self.orderbook_key(side),
            price_score(order.price()),
            id.to_string(),
        );
        Ok(())
    }

    pub async fn has_order(&self, id: OrderId) -> Result<bool> {
        Ok(self.store().exists(&self.order_key(id)).await?)
    }

    /// Delete the order record. The side index is left untouched.
    pub async fn del_order(&self, id: OrderId) -> Result<bool> {
        let deleted = self.store().del(&self.order_key(id)).await?;
        tracing::debug!(market = %self, %id, deleted, "order record deleted");
        Ok(deleted)
    }

    /// Delete the order record and its index entry on `side` in one atomic
    /// batch. Returns whether the record existed.
    pub async fn cancel_order(&self, id: OrderId, side: Side) -> Result<bool> {
        let mut pipe = self.app.pipe();
        pipe.del(self.order_key(id))
            .zrem(self.orderbook_key(side), id.to_string());
        let replies = all_ok(pipe.exec().await?)?;
        let deleted = replies.first().and_then(|r| r.as_int()) == Some(1);
        tracing::debug!(market = %self, %id, %side, deleted, "order cancelled");
        Ok(deleted)
    }

    // =================================================================
    // Order counter
    // =================================================================

    /// Last assigned order id; 0 if none was ever assigned.
    pub async fn get_order_len(&self) -> Result<i64> {
        match self.store().get(&self.order_len_key()).await? {
            None => Ok(0),
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| OffOrderError::CorruptCounter {
                    market: self.to_string(),
                }),
        }
    }

    /// Atomically assign the next order id (the first is 1).
    pub async fn incr_order_len(&self) -> Result<OrderId> {
        Ok(OrderId(self.store().incr(&self.order_len_key()).await?))
    }

    // =================================================================
    // Book
    // =================================================================

    /// Orders on `side` from rank `depth` to the end of the index.
    ///
    /// Bids are read in ascending rank (lowest price first), asks in
    /// descending rank (highest price first). Existing consumers depend on
    /// this orientation. The call fails as a whole if any indexed id cannot
    /// be resolved to an order record.
    pub async fn get_orderbook(&self, side: Side, depth: i64) -> Result<Vec<Order>> {
        let order = match side {
            Side::Bid => RangeOrder::Ascending,
            Side::Ask => RangeOrder::Descending,
        };
        let members = self
            .store()
            .zrange(&self.orderbook_key(side), depth, -1, order)
            .await?;

        let mut orders = Vec::with_capacity(members.len());
        for member in members {
            let id: i64 = serde_json::from_str(&member)
                .map_err(|_| OffOrderError::MalformedMember(member.clone()))?;
            orders.push(self.get_order(OrderId(id)).await?);
        }
        Ok(orders)
    }

    /// Number of ids indexed on `side`, stale ones included.
    pub async fn orderbook_len(&self, side: Side) -> Result<u64> {
        Ok(self.store().zcard(&self.orderbook_key(side)).await?)
    }

    // =================================================================
    // Nonces
    // =================================================================

    /// Current nonce for `addr`; 0 if none was recorded.
    pub async fn get_nonce(&self, addr: &Address) -> Result<i64> {
        match self.store().get(&self.nonce_key(addr)).await? {
            None => Ok(0),
            Some(raw) => Ok(serde_json::from_str(&raw)?),
        }
    }

    pub async fn incr_nonce(&self, addr: &Address) -> Result<i64> {
        Ok(self.store().incr(&self.nonce_key(addr)).await?)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

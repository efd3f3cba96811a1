//! Per-account balances and the account lock.
//!
//! Key layout (namespace `P`, address `A` as raw bytes):
//! `P:user:A:balance:<token>` holds a JSON integer, `P:user:A:lock` is the
//! lock entry.
//!
//! The lock is advisory and lives in the shared store, so it serializes
//! every process working on the same account, not just this one. It is
//! written with a lease: a holder that dies without unlocking blocks the
//! account for at most one lease.

use offorder_store::{Key, Store, Tx};
use offorder_types::{Address, OffOrderError, Result, Side, constants};

use crate::app::App;

/// View of one account inside a namespace.
#[derive(Debug, Clone)]
pub struct User {
    app: App,
    addr: Address,
}

impl User {
    pub(crate) fn new(app: App, addr: Address) -> Self {
        Self { app, addr }
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        &self.addr
    }

    fn store(&self) -> &dyn Store {
        self.app.store()
    }

    fn user_key(&self) -> Key {
        self.app.root_key().push("user").push_addr(&self.addr)
    }

    #[must_use]
    pub fn balance_key(&self, token: &str) -> Key {
        self.user_key().push("balance").push(token)
    }

    #[must_use]
    pub fn mutex_key(&self) -> Key {
        self.user_key().push("lock")
    }

    // =================================================================
    // Lock
    // =================================================================

    /// Take the account lock if nobody holds it. `false` means contention.
    pub async fn lock(&self) -> Result<bool> {
        let acquired = self
            .store()
            .set_nx(
                &self.mutex_key(),
                constants::FLAG_SET,
                Some(self.app.lock_lease()),
            )
            .await?;
        if !acquired {
            tracing::debug!(user = %self.addr.short(), "account lock contended");
        }
        Ok(acquired)
    }

    /// Like [`User::lock`], but contention is an
    /// [`OffOrderError::AccountLocked`] error.
    pub async fn acquire(&self) -> Result<()> {
        if self.lock().await? {
            Ok(())
        } else {
            Err(OffOrderError::AccountLocked {
                address: self.addr.to_string(),
            })
        }
    }

    /// Release the lock. Returns whether a lock entry was actually removed.
    pub async fn unlock(&self) -> Result<bool> {
        Ok(self.store().del(&self.mutex_key()).await?)
    }

    // =================================================================
    // Balances
    // =================================================================

    pub async fn get_balance(&self, token: &str) -> Result<i64> {
        let raw = self
            .store()
            .get(&self.balance_key(token))
            .await?
            .ok_or_else(|| OffOrderError::BalanceNotFound {
                token: token.to_string(),
            })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Balance of `base` for a bid, of `quote` for an ask.
    pub async fn get_balance_with_side(&self, base: &str, quote: &str, side: Side) -> Result<i64> {
        match side {
            Side::Bid => self.get_balance(base).await,
            Side::Ask => self.get_balance(quote).await,
        }
    }

    pub async fn set_balance(&self, token: &str, amount: i64) -> Result<()> {
        let encoded = serde_json::to_string(&amount)?;
        self.store()
            .set(&self.balance_key(token), &encoded, None)
            .await?;
        Ok(())
    }

    /// Queue a balance write on a watched transaction.
    pub fn stage_balance(&self, tx: &mut Tx<'_>, token: &str, amount: i64) -> Result<()> {
        tx.set_json(self.balance_key(token), &amount)?;
        Ok(())
    }
}

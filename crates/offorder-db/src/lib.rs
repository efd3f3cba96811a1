//! # offorder-db
//!
//! The order-book store proper: namespaced markets, user balances and
//! account locks, and a worker for watched transactions with rollback.
//!
//! ## Architecture
//!
//! ```text
//!                 App (store + prefix)
//!        ┌──────────┬──────┴──────┬──────────┐
//!      Market      User         Pipe       Worker
//!   orders, book  balances,   atomic     watched tx +
//!   counter,      lock        batches    compensation
//!   nonces
//! ```
//!
//! Every handle derives keys from the app prefix and issues store calls of
//! its own. Market and User operations return store errors to the caller
//! without retrying; only the [`Worker`] retries, and only compensations.

pub mod app;
pub mod market;
pub mod user;
pub mod worker;

pub use app::{App, Pipe};
pub use market::Market;
pub use user::User;
pub use worker::{Work, WorkState, WorkTicket, Worker};

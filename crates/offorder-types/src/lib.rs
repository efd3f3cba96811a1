//! # offorder-types
//!
//! Shared types, errors, and configuration for the **OffOrder** order-book store.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`OrderId`], [`Address`]
//! - **Order model**: [`Order`], [`OrderData`], [`Side`]
//! - **Configuration**: [`OffOrderConfig`], [`WorkerConfig`]
//! - **Errors**: [`OffOrderError`] with `OO_ERR_` prefix codes and [`ErrorKind`]
//! - **Constants**: key-space defaults, lease and retry limits

pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod order;

// Re-export all primary types at crate root for ergonomic imports:
//   use offorder_types::{Order, OrderData, Side, OffOrderError, ...};

pub use config::*;
pub use error::*;
pub use ids::*;
pub use order::*;

// Constants are accessed via `offorder_types::constants::FOO`
// (not re-exported to avoid name collisions).

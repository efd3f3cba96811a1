//! Error types for the OffOrder store.
//!
//! All errors use the `OO_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Order errors
//! - 2xx: Balance errors
//! - 3xx: Account lock errors
//! - 4xx: Market errors
//! - 5xx: Store / transaction errors
//! - 6xx: Worker errors
//! - 7xx: Signature errors
//! - 9xx: General / internal errors
//!
//! Callers that need to tell failures apart (the REST layer mapping to
//! status codes, retry loops) should match on [`OffOrderError::kind`]
//! rather than on individual variants.

use thiserror::Error;

use crate::{OrderId, Side};

/// Coarse classification of an [`OffOrderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested order or account state is absent.
    NotFound,
    /// Lock contention or duplicate insertion.
    Conflict,
    /// Bad input: invalid side, insufficient balance, overflow.
    Validation,
    /// Signature did not match the claimed address.
    Unauthorized,
    /// Network or store-level failure, possibly retryable.
    Store,
    /// A watched key changed concurrently; re-issue the whole operation.
    Aborted,
    /// Bug or misconfiguration.
    Internal,
}

/// Central error enum for all OffOrder operations.
#[derive(Debug, Error)]
pub enum OffOrderError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// No order record exists under this id.
    #[error("OO_ERR_100: Order not found: {market} #{id}")]
    OrderNotFound { market: String, id: OrderId },

    /// The id is already a member of the side's index.
    #[error("OO_ERR_101: Order {id} already indexed on {side} side")]
    DuplicateOrder { id: OrderId, side: Side },

    /// Side value other than `bid` or `ask`.
    #[error("OO_ERR_102: Invalid side: {0:?}")]
    InvalidSide(String),

    /// A book entry could not be resolved to an order id.
    #[error("OO_ERR_103: Malformed orderbook member: {0:?}")]
    MalformedMember(String),

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    /// No balance entry stored for this asset.
    #[error("OO_ERR_200: Balance not found: {token}")]
    BalanceNotFound { token: String },

    /// Not enough balance to cover the order's reservation.
    #[error("OO_ERR_201: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: i64, available: i64 },

    /// `amount * price` overflowed.
    #[error("OO_ERR_202: Reservation overflow: amount {amount} x price {price}")]
    AmountOverflow { amount: i64, price: i64 },

    /// Order amount or price is not strictly positive.
    #[error("OO_ERR_203: Invalid order terms: amount {amount}, price {price}")]
    InvalidAmount { amount: i64, price: i64 },

    // =================================================================
    // Account Lock Errors (3xx)
    // =================================================================
    /// Another holder owns the account's lock.
    #[error("OO_ERR_300: Account locked: {address}")]
    AccountLocked { address: String },

    // =================================================================
    // Market Errors (4xx)
    // =================================================================
    /// The order-length counter holds something other than an integer.
    #[error("OO_ERR_400: Corrupt order counter for {market}")]
    CorruptCounter { market: String },

    // =================================================================
    // Store / Transaction Errors (5xx)
    // =================================================================
    /// The store rejected the call or could not be reached.
    #[error("OO_ERR_500: Store error: {0}")]
    Store(String),

    /// A watched key was modified between watch and commit.
    #[error("OO_ERR_501: Transaction aborted: watched key modified")]
    TxAborted,

    /// An atomic operation kept aborting under contention.
    #[error("OO_ERR_502: Transaction gave up after {attempts} attempts")]
    TxRetriesExhausted { attempts: u32 },

    // =================================================================
    // Worker Errors (6xx)
    // =================================================================
    /// The worker's queue is closed.
    #[error("OO_ERR_600: Worker stopped")]
    WorkerStopped,

    /// The work body itself failed.
    #[error("OO_ERR_601: Work failed: {reason}")]
    WorkFailed { reason: String },

    // =================================================================
    // Signature Errors (7xx)
    // =================================================================
    /// The signature does not belong to the claimed address.
    #[error("OO_ERR_700: Signature rejected for {address}")]
    SignatureRejected { address: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("OO_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("OO_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("OO_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl OffOrderError {
    /// Which class of failure this is.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OrderNotFound { .. } | Self::BalanceNotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateOrder { .. } | Self::AccountLocked { .. } => ErrorKind::Conflict,
            Self::InvalidSide(_)
            | Self::InsufficientBalance { .. }
            | Self::AmountOverflow { .. }
            | Self::InvalidAmount { .. } => ErrorKind::Validation,
            Self::SignatureRejected { .. } => ErrorKind::Unauthorized,
            Self::Store(_) | Self::WorkerStopped => ErrorKind::Store,
            Self::TxAborted | Self::TxRetriesExhausted { .. } => ErrorKind::Aborted,
            Self::MalformedMember(_)
            | Self::CorruptCounter { .. }
            | Self::WorkFailed { .. }
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-issuing the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Aborted | ErrorKind::Store)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, OffOrderError>;

impl From<serde_json::Error> for OffOrderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

//! System-wide constants for the OffOrder store.

/// Namespace prefix used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "offorder";

/// Lease on a user's mutual-exclusion lock, in milliseconds (one minute).
pub const DEFAULT_LOCK_LEASE_MS: u64 = 60_000;

/// Attempts made by an atomic multi-key operation before giving up on
/// concurrent modification of its watched keys.
pub const DEFAULT_TX_RETRY_LIMIT: u32 = 16;

/// Failed compensation attempts after which a work item is reported stuck.
pub const DEFAULT_REVERT_ESCALATE_AFTER: u32 = 64;

/// Pause between compensation attempts, in milliseconds. Zero retries
/// immediately (yielding to the scheduler between attempts).
pub const DEFAULT_REVERT_BACKOFF_MS: u64 = 0;

/// Value written to the initialization flag and to a held lock.
pub const FLAG_SET: &str = "1";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

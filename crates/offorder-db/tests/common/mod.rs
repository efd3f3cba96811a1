//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use offorder_db::App;
use offorder_store::MemoryStore;
use tracing_subscriber::EnvFilter;

pub const NAMESPACE: &str = "test-api";

/// Route `tracing` output through the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh app over an empty in-process store.
pub fn app() -> (App, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let app = App::new(store.clone(), NAMESPACE);
    (app, store)
}

//! Durable key-value storage abstraction.
//!
//! The [`KeyValueStore`] trait is the only persistence seam the pipeline
//! needs: the assessment cache and the settings overrides are both plain
//! string values under namespaced keys. Backends may be unavailable
//! altogether (probe fails) or refuse writes when full; callers treat both
//! as non-fatal.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Abstract string key-value backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`probe`](KeyValueStore::probe) | Check that reads and writes work at all |
/// | [`get`](KeyValueStore::get) | Read one value |
/// | [`set`](KeyValueStore::set) | Insert or overwrite one value |
/// | [`remove`](KeyValueStore::remove) | Delete one key |
/// | [`keys`](KeyValueStore::keys) | List keys starting with a prefix |
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Round-trip a throwaway key; `false` means every other call should be
    /// treated as a no-op by the caller.
    async fn probe(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

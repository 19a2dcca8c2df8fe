// src/storage/kv_store.rs
//! Asynchronous key-value store capability.
//!
//! The wallet persists its card collection through this interface and
//! treats the engine behind it as opaque: any store able to get and put
//! JSON values under a namespace + key pair will do. [`MemoryStore`] is
//! the default in-process implementation used by tests and demos.

use crate::error::WalletError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Async get/put of JSON values under a namespace + key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `namespace`/`key`.
    ///
    /// # Returns
    /// - `Ok(Some(value))` when a value exists
    /// - `Ok(None)` when nothing was stored under the pair
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, WalletError>;

    /// Writes `value` under `namespace`/`key`, replacing any previous value.
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), WalletError>;
}

/// In-memory [`KeyValueStore`] backed by a hashmap.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        MemoryStore {
            records: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, WalletError> {
        let records = self.records.lock().await;
        Ok(records
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), WalletError> {
        let mut records = self.records.lock().await;
        records.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}

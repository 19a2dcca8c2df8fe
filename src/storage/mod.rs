// src/storage/mod.rs
//! Persistence capabilities consumed by the wallet.

pub mod kv_store;

pub use kv_store::{KeyValueStore, MemoryStore};

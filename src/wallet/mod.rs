// src/wallet/mod.rs
//! The Wallet: the process-wide card store.

pub mod card_store;

pub use card_store::Wallet;

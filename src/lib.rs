// src/lib.rs

//! # Wallet System - Credential Wallet Core
//!
//! Core of a verifiable-credential wallet split across isolated contexts
//! (background coordinator, user panel, page observers) that can only talk
//! through a routed message bus.
//!
//! ## Architecture Overview
//! 1. **Bus Layer**: routed request/reply messaging plus a broadcast event
//!    stream; messages sent before a context activates are buffered in order
//! 2. **Models Layer**: cards, decoded tokens, and the card status machine
//! 3. **Schema Layer**: registry of schema-bound token decoders (JWT, MDOC)
//! 4. **Wallet Layer**: the persistent card collection with id allocation
//! 5. **Services Layer**: the credential-helper HTTP client and the
//!    background orchestrator that drives card lifecycles
//!
//! ## Environment Variables
//! - `CLIENT_HELPER_URL`: (Optional) credential helper base URL
//!   (default: http://127.0.0.1:8003)
//! - `PREPARE_POLL_INTERVAL`: (Optional) status poll interval in ms
//! - `PREPARE_POLL_LIMIT`: (Optional) max status polls, 0 to disable
//! - `WALLET_OWNER`: (Optional) owner label stored with the cards

// Module declarations (organized by functional domain)
pub mod bus; // routed messaging and wallet events
pub mod config; // environment-driven configuration
pub mod error; // shared error types
pub mod models; // data structures
pub mod schema; // token decoders
pub mod services; // helper client and orchestrator
pub mod storage; // key-value persistence
pub mod wallet; // the card store

pub use bus::{ContextListener, Envelope, MessageBus, WalletEvent};
pub use config::Config;
pub use error::{BusFault, WalletError};
pub use models::card::{Card, CardStatus};
pub use schema::SchemaRegistry;
pub use services::helper_client::HelperClient;
pub use services::orchestrator::Orchestrator;
pub use storage::{KeyValueStore, MemoryStore};
pub use wallet::Wallet;

// src/main.rs

//! # Wallet System - Main Entry Point
//!
//! Boots the background context of the credential wallet: storage, message
//! bus, card store, helper client, and the orchestrator that ties them
//! together. Other contexts (panel, page observers) register their own
//! listeners on the same bus.
//!
//! ## Initialization Sequence
//! 1. Load environment configuration
//! 2. Initialize the wallet over its key-value store
//! 3. Register the `background` destination and attach the orchestrator
//! 4. Probe the credential helper service
//!
//! ## Panics
//! - If the wallet fails to load its persisted cards

use std::sync::Arc;
use wallet_system::services::orchestrator::{Orchestrator, BACKGROUND};
use wallet_system::{Config, HelperClient, MemoryStore, MessageBus, SchemaRegistry, Wallet};

#[tokio::main]
async fn main() {
    env_logger::init();
    let config = Config::from_env();

    let bus = MessageBus::new();
    let store = Arc::new(MemoryStore::new());
    let wallet = Wallet::new(store, bus.clone());
    wallet
        .init(&config.store_owner)
        .await
        .expect("Failed to initialize wallet - check the backing store");

    let helper = HelperClient::new(&config);
    if !helper.ping(&config.client_helper_url).await {
        log::warn!(
            "credential helper at {} is not responding; preparation will fail until it is up",
            config.client_helper_url
        );
    }

    let registry = Arc::new(SchemaRegistry::builtin());
    let listener = bus.register(BACKGROUND);
    let orchestrator = Orchestrator::new(wallet, helper, bus, registry);
    let background = orchestrator.attach(listener);

    log::info!("wallet system running; background context active");
    let _ = background.await;
}

// src/config.rs
//! Runtime configuration for the wallet core.
//!
//! All settings come from environment variables (with a `.env` file loaded
//! first when present) and fall back to defaults suitable for a local
//! helper service.
//!
//! ## Environment Variables
//! - `CLIENT_HELPER_URL`: base URL of the external preparation service
//!   (default: `http://127.0.0.1:8003`)
//! - `PREPARE_POLL_INTERVAL`: status polling interval in milliseconds
//!   (default: 5000)
//! - `PREPARE_POLL_LIMIT`: maximum number of status polls before a
//!   preparation is abandoned; `0` disables the cap (default: 720)
//! - `WALLET_OWNER`: namespace under which the card collection is persisted
//!   (default: `crescent`)

use dotenv::dotenv;
use std::time::Duration;

const DEFAULT_HELPER_URL: &str = "http://127.0.0.1:8003";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
const DEFAULT_POLL_LIMIT: u32 = 720;
const DEFAULT_OWNER: &str = "crescent";

/// Resolved configuration values.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the external preparation (client helper) service.
    pub client_helper_url: String,
    /// Fixed interval between status polls.
    pub poll_interval: Duration,
    /// Maximum status polls per preparation; `None` polls until terminal.
    pub poll_limit: Option<u32>,
    /// Persistence namespace owning the card collection.
    pub store_owner: String,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Missing or unparsable variables fall back to their defaults rather
    /// than failing, so the core can start against a local helper with no
    /// configuration at all.
    pub fn from_env() -> Self {
        dotenv().ok();

        let client_helper_url = std::env::var("CLIENT_HELPER_URL")
            .unwrap_or_else(|_| DEFAULT_HELPER_URL.to_string());

        let poll_interval = std::env::var("PREPARE_POLL_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));

        let poll_limit = match std::env::var("PREPARE_POLL_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            Some(0) => None,
            Some(limit) => Some(limit),
            None => Some(DEFAULT_POLL_LIMIT),
        };

        let store_owner =
            std::env::var("WALLET_OWNER").unwrap_or_else(|_| DEFAULT_OWNER.to_string());

        Config {
            client_helper_url,
            poll_interval,
            poll_limit,
            store_owner,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client_helper_url: DEFAULT_HELPER_URL.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_limit: Some(DEFAULT_POLL_LIMIT),
            store_owner: DEFAULT_OWNER.to_string(),
        }
    }
}

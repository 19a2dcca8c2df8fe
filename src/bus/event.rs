// src/bus/event.rs
//! Fire-and-forget event topics published on the message bus.
//!
//! Events are broadcast to every subscriber in any context; no response is
//! expected. Because persistence is not transactional with notification, a
//! watcher may observe stale or duplicate progress events across retries
//! and must tolerate them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A matched card for a pending disclosure request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisclosureMatch {
    /// Id of the matching card.
    pub id: u64,
    /// The requested property name.
    pub property: String,
    /// The card's value for that property.
    pub value: Value,
}

/// Events broadcast by the wallet and the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "kebab-case")]
pub enum WalletEvent {
    /// The persisted card collection changed; contexts holding a wallet
    /// should reload.
    WalletUpdated,

    /// A preparation polling tick advanced a card's progress.
    PrepareProgress {
        /// Card being prepared.
        id: u64,
        /// New progress value (0-99 while polling).
        progress: u8,
    },

    /// A preparation reached terminal success.
    Prepared {
        /// Card that is now prepared.
        id: u64,
    },

    /// A preparation failed, either at submission or during polling.
    PrepareFailed {
        /// Card that moved to the error state.
        id: u64,
        /// Failure description for display.
        message: String,
    },

    /// A verifying page requested disclosure and one or more cards match.
    DisclosureRequested {
        /// Verifier callback URL.
        url: String,
        /// Opaque disclosure predicate identifier.
        uid: String,
        /// Cards that can satisfy the request.
        matches: Vec<DisclosureMatch>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_are_json_serializable() {
        let event = WalletEvent::PrepareProgress { id: 3, progress: 15 };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["topic"], "prepare-progress");
        assert_eq!(value["payload"]["progress"], 15);

        let rebuilt: WalletEvent = serde_json::from_value(value).unwrap();
        assert_eq!(rebuilt, event);
    }

    #[test]
    fn test_unit_topic_roundtrip() {
        let value = serde_json::to_value(WalletEvent::WalletUpdated).unwrap();
        assert_eq!(value, json!({"topic": "wallet-updated"}));
        let rebuilt: WalletEvent = serde_json::from_value(value).unwrap();
        assert_eq!(rebuilt, WalletEvent::WalletUpdated);
    }
}

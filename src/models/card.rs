// src/models/card.rs
//! Card entity and its lifecycle state machine.
//!
//! A [`Card`] wraps one imported credential token plus its lifecycle state.
//! The original encoded string (`data`) is the source of truth: the decoded
//! `token` is always derivable from it through the schema registry and the
//! two must never diverge.
//!
//! Lifecycle (driven by the orchestrator):
//!
//! ```text
//! PENDING --approve--> PREPARING --ready--> PREPARED --page match--> DISCLOSABLE
//!    ^                     |                                             |
//!    |                     +--failure--> ERROR --re-approve--> PREPARING |
//!    |                                                                   v
//!    +------------------- (user delete removes any state)          DISCLOSING
//! ```
//!
//! The `DISCLOSABLE -> DISCLOSING` cycle is re-enterable: a card can be
//! asked to disclose any number of times.

use crate::error::WalletError;
use crate::models::token::Token;
use crate::schema::SchemaRegistry;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    /// Imported, awaiting user approval.
    Pending,
    /// The helper service is preparing the credential.
    Preparing,
    /// Preparation finished; selective-disclosure proofs can be produced.
    Prepared,
    /// Preparation failed; recoverable by re-approving.
    Error,
    /// A disclosure request matched this card and awaits user confirmation.
    Disclosable,
    /// A disclosure proof is being produced and forwarded.
    Disclosing,
}

impl CardStatus {
    /// Whether a preparation may be requested from this state.
    ///
    /// Guards against double-submission: a card that is already
    /// `Preparing` (or further along) is rejected.
    pub fn preparable(self) -> bool {
        matches!(self, CardStatus::Pending | CardStatus::Error)
    }
}

/// Issuing site of an imported credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    /// Origin the credential was imported from.
    pub url: String,
    /// Display name (currently the import domain).
    pub name: String,
}

/// One imported credential and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Wallet-unique identifier; 0 until assigned by `Wallet::add`.
    pub id: u64,
    /// The original encoded credential string (never mutated).
    pub data: String,
    /// Decoded form of `data`.
    pub token: Token,
    /// Where the credential came from.
    pub issuer: Issuer,
    /// Current lifecycle state.
    pub status: CardStatus,
    /// Preparation progress, 0-100; meaningful only while `Preparing`.
    pub progress: u8,
    /// Identifier assigned by the helper service once `prepare` succeeds;
    /// empty until then.
    pub cred_uid: String,
}

impl Card {
    /// Imports an encoded credential discovered on `domain`.
    ///
    /// The schema is selected explicitly by the importer; a mis-selected
    /// schema yields a decode failure rather than a fallback to another
    /// format. The resulting card is `Pending` with no id assigned.
    ///
    /// # Arguments
    /// * `domain` - origin of the importing page; becomes the issuer
    /// * `schema_name` - schema binding to decode with
    /// * `encoded` - the raw credential string
    /// * `registry` - schema registry performing the decode
    pub fn import(
        domain: &str,
        schema_name: &str,
        encoded: &str,
        registry: &SchemaRegistry,
    ) -> Result<Card, WalletError> {
        let token = registry.decode(schema_name, encoded)?;
        Ok(Card {
            id: 0,
            data: encoded.to_string(),
            token,
            issuer: Issuer {
                url: domain.to_string(),
                name: domain.to_string(),
            },
            status: CardStatus::Pending,
            progress: 0,
            cred_uid: String::new(),
        })
    }

    /// Advances the preparation progress by one polling tick.
    ///
    /// Each tick covers 5% of the remaining distance (rounded up), so the
    /// value decays toward 100 without ever reaching it: polling alone
    /// stops at 99, and 100 is set only on terminal success.
    ///
    /// # Returns
    /// The new progress value.
    pub fn advance_progress(&mut self) -> u8 {
        let remaining = u16::from(100u8.saturating_sub(self.progress));
        let step = (remaining + 19) / 20;
        self.progress = (u16::from(self.progress) + step).min(99) as u8;
        self.progress
    }
}

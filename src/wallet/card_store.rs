// src/wallet/card_store.rs
//! Card store: CRUD, id allocation, persistence, change notification.
//!
//! The wallet owns every [`Card`]. Its in-memory collection is
//! authoritative only within the context that initialized it (typically
//! the background coordinator); other contexts hold no copy and query
//! through the message bus. After any mutating operation, successful or
//! failed, the in-memory collection is a faithful mirror of the persisted
//! collection: a mutation that cannot be persisted is rolled back before
//! the error is returned.
//!
//! Invariants:
//! - card ids are unique and strictly increasing on allocation, never
//!   reused even after deletion or a reload
//! - the collection is persisted replace-all, as one unit
//! - only one initialization per wallet instance; a second `init` is a
//!   state error
//!
//! Mutations are serialized through an internal lock, but two wallets over
//! the same store still race on `save` with last-write-wins semantics;
//! callers should funnel mutations through one wallet per process.

use crate::bus::{MessageBus, WalletEvent};
use crate::error::WalletError;
use crate::models::card::Card;
use crate::storage::kv_store::KeyValueStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

/// Key under which the card collection is persisted (the namespace is the
/// owner id given to `init`).
const CARDS_KEY: &str = "cards";

struct WalletInner {
    /// Persistence namespace; `Some` once `init` has run.
    owner: Option<String>,
    cards: Vec<Card>,
    next_id: u64,
}

/// Handle to the card store; cheap to clone, all clones share state.
#[derive(Clone)]
pub struct Wallet {
    store: Arc<dyn KeyValueStore>,
    bus: MessageBus,
    inner: Arc<Mutex<WalletInner>>,
}

impl Wallet {
    /// Creates an uninitialized wallet over the given store and bus.
    pub fn new(store: Arc<dyn KeyValueStore>, bus: MessageBus) -> Self {
        Wallet {
            store,
            bus,
            inner: Arc::new(Mutex::new(WalletInner {
                owner: None,
                cards: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Initializes the wallet: loads the persisted collection, computes the
    /// next card id, and subscribes to change events so the collection
    /// reloads whenever any context reports an update.
    ///
    /// # Errors
    /// - `State` if the wallet was already initialized
    /// - `Storage` if the persisted collection cannot be loaded
    pub async fn init(&self, owner: &str) -> Result<(), WalletError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.owner.is_some() {
                return Err(WalletError::State("wallet already initialized".to_string()));
            }
            let cards = self.load(owner).await?;
            inner.owner = Some(owner.to_string());
            inner.next_id = next_id_for(&cards);
            inner.cards = cards;
        }

        // Reload on every wallet-updated event, for the lifetime of the bus.
        let wallet = self.clone();
        let mut events = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(WalletEvent::WalletUpdated) => {
                        if let Err(e) = wallet.reload().await {
                            log::error!("wallet reload failed: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("wallet event stream lagged by {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(())
    }

    /// Re-reads the persisted collection into memory.
    ///
    /// The id allocator never moves backwards: even if the highest cards
    /// were deleted by another context, previously allocated ids are not
    /// reused.
    pub async fn reload(&self) -> Result<(), WalletError> {
        let owner = {
            let inner = self.inner.lock().await;
            inner
                .owner
                .clone()
                .ok_or_else(|| WalletError::State("wallet not initialized".to_string()))?
        };
        let cards = self.load(&owner).await?;
        let mut inner = self.inner.lock().await;
        inner.next_id = inner.next_id.max(next_id_for(&cards));
        inner.cards = cards;
        Ok(())
    }

    /// Adds a card: assigns the next id, appends, persists, and publishes
    /// a wallet-updated event so other contexts refresh without polling.
    ///
    /// # Returns
    /// The id assigned to the card.
    pub async fn add(&self, mut card: Card) -> Result<u64, WalletError> {
        let id = {
            let mut inner = self.inner.lock().await;
            ensure_initialized(&inner)?;
            let id = inner.next_id;
            card.id = id;
            inner.cards.push(card);
            if let Err(e) = self.persist(&inner).await {
                // Undo the append and leave the id unconsumed, so memory
                // keeps mirroring the store.
                inner.cards.pop();
                return Err(e);
            }
            inner.next_id += 1;
            id
        };
        self.bus.publish(WalletEvent::WalletUpdated);
        Ok(id)
    }

    /// Removes a card by id. Absent ids are a silent no-op.
    pub async fn remove(&self, id: u64) -> Result<(), WalletError> {
        let removed = {
            let mut inner = self.inner.lock().await;
            ensure_initialized(&inner)?;
            match inner.cards.iter().position(|c| c.id == id) {
                Some(index) => {
                    let card = inner.cards.remove(index);
                    if let Err(e) = self.persist(&inner).await {
                        inner.cards.insert(index, card);
                        return Err(e);
                    }
                    true
                }
                None => false,
            }
        };
        if removed {
            self.bus.publish(WalletEvent::WalletUpdated);
        }
        Ok(())
    }

    /// Looks up a card by id.
    ///
    /// Returns a snapshot; external callers must re-look-up by id after any
    /// suspension rather than hold on to the copy.
    pub async fn find(&self, id: u64) -> Option<Card> {
        let inner = self.inner.lock().await;
        inner.cards.iter().find(|c| c.id == id).cloned()
    }

    /// Mutates a card in place, persists, and publishes the change.
    ///
    /// # Returns
    /// A snapshot of the card after the mutation.
    ///
    /// # Errors
    /// - `NotFound` if no card has the given id (e.g. it was deleted while
    ///   an external call was in flight)
    pub async fn update<F>(&self, id: u64, mutate: F) -> Result<Card, WalletError>
    where
        F: FnOnce(&mut Card),
    {
        self.try_update(id, |card| {
            mutate(card);
            Ok(())
        })
        .await
    }

    /// Like [`update`](Self::update), but the mutation may reject the card
    /// based on its current state. The check and the write happen under one
    /// lock, so no concurrent caller can observe the card between them.
    ///
    /// On rejection or persistence failure the card is left exactly as it
    /// was and nothing is published.
    pub async fn try_update<F>(&self, id: u64, mutate: F) -> Result<Card, WalletError>
    where
        F: FnOnce(&mut Card) -> Result<(), WalletError>,
    {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            ensure_initialized(&inner)?;
            let index = inner
                .cards
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| WalletError::NotFound(format!("card {}", id)))?;
            let previous = inner.cards[index].clone();
            if let Err(e) = mutate(&mut inner.cards[index]) {
                inner.cards[index] = previous;
                return Err(e);
            }
            let snapshot = inner.cards[index].clone();
            if let Err(e) = self.persist(&inner).await {
                inner.cards[index] = previous;
                return Err(e);
            }
            snapshot
        };
        self.bus.publish(WalletEvent::WalletUpdated);
        Ok(snapshot)
    }

    /// Persists the entire collection as one unit.
    pub async fn save(&self) -> Result<(), WalletError> {
        let inner = self.inner.lock().await;
        ensure_initialized(&inner)?;
        self.persist(&inner).await
    }

    /// Snapshot of all cards.
    pub async fn cards(&self) -> Vec<Card> {
        let inner = self.inner.lock().await;
        inner.cards.clone()
    }

    /// Cards whose decoded token exposes the named field, i.e. the
    /// candidates for a disclosure request on that property.
    pub async fn filter(&self, property: &str) -> Vec<Card> {
        let inner = self.inner.lock().await;
        inner
            .cards
            .iter()
            .filter(|card| card.token.field(property).is_some())
            .cloned()
            .collect()
    }

    async fn load(&self, owner: &str) -> Result<Vec<Card>, WalletError> {
        match self.store.get(owner, CARDS_KEY).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| WalletError::Storage(format!("corrupt card collection: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self, inner: &WalletInner) -> Result<(), WalletError> {
        let owner = inner
            .owner
            .as_deref()
            .ok_or_else(|| WalletError::State("wallet not initialized".to_string()))?;
        let value = serde_json::to_value(&inner.cards)
            .map_err(|e| WalletError::Storage(format!("unserializable cards: {}", e)))?;
        self.store
            .put(owner, CARDS_KEY, value)
            .await
            .map_err(|e| WalletError::Storage(format!("failed to store cards: {}", e)))
    }
}

fn ensure_initialized(inner: &WalletInner) -> Result<(), WalletError> {
    if inner.owner.is_none() {
        return Err(WalletError::State("wallet not initialized".to_string()));
    }
    Ok(())
}

fn next_id_for(cards: &[Card]) -> u64 {
    cards.iter().map(|c| c.id + 1).max().unwrap_or(0)
}

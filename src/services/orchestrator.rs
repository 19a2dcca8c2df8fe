// src/services/orchestrator.rs
//! Background coordinator: wires message-bus handlers to the wallet, the
//! schema registry, and the external preparation client.
//!
//! The orchestrator runs in the `background` context and is the only
//! component that mutates cards. Each handler is a thin composition of
//! wallet + card + helper-client calls; it translates internal results
//! into the reply shape callers expect and re-publishes progress/terminal
//! events so other contexts can update their views.
//!
//! Handlers interleave arbitrarily with one another: every suspension
//! point re-checks card state by id, because a card may have been deleted
//! while an external call was in flight.

use crate::bus::{ContextListener, DisclosureMatch, Envelope, MessageBus, WalletEvent};
use crate::error::{BusFault, WalletError};
use crate::models::card::{Card, CardStatus};
use crate::schema::SchemaRegistry;
use crate::services::helper_client::HelperClient;
use crate::wallet::Wallet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Destination name the orchestrator listens on.
pub const BACKGROUND: &str = "background";
/// Destination name of the content context (the observer injected into the
/// verifying page), which performs the verifier callback POST.
pub const CONTENT: &str = "content";

/// Messages addressed to the background coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "kebab-case")]
pub enum Request {
    /// Import a credential discovered on a page or chosen by the user.
    ImportCard {
        /// Origin the credential came from.
        domain: String,
        /// Schema binding to decode with.
        schema: String,
        /// The raw encoded credential.
        encoded: String,
    },
    /// Delete a card (and best-effort clean up its remote state).
    DeleteCard {
        /// Card to delete.
        id: u64,
    },
    /// User approved an imported card; start preparation.
    RequestPreparation {
        /// Card to prepare.
        id: u64,
    },
    /// User confirmed disclosure for a matched card.
    RequestDisclosure {
        /// Card to disclose from.
        id: u64,
    },
    /// A verifying page asked for disclosure of one property.
    DisclosureRequestFromPage {
        /// Verifier callback URL.
        url: String,
        /// Opaque disclosure predicate identifier.
        uid: String,
        /// Property the verifier wants disclosed.
        property: String,
    },
    /// Snapshot of the card collection, for contexts that hold no copy.
    ListCards {},
}

/// Messages addressed to the content context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "kebab-case")]
pub enum PageRequest {
    /// Forward a disclosure proof to the verifying page, which POSTs it to
    /// the verifier callback URL.
    SendProof {
        /// Verifier callback URL.
        url: String,
        /// Issuer of the disclosed credential.
        #[serde(rename = "issuer_URL")]
        issuer_url: String,
        /// Schema the credential was prepared under.
        #[serde(rename = "schema_UID")]
        schema_uid: String,
        /// The disclosure predicate this proof answers.
        disclosure_uid: String,
        /// The opaque proof string.
        proof: String,
    },
}

/// Reply to `import-card`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportCardReply {
    /// Whether the import succeeded.
    pub ok: bool,
    /// Id of the new card on success.
    pub id: Option<u64>,
    /// Decode failure message otherwise.
    pub error: Option<String>,
}

/// Reply to `delete-card`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteCardReply {
    /// Always true; deletion of an absent id is a no-op.
    pub ok: bool,
}

/// Reply to `request-preparation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPreparationReply {
    /// Whether the preparation was accepted by the helper.
    pub ok: bool,
    /// Credential uid assigned by the helper on success.
    pub cred_uid: Option<String>,
    /// Failure message otherwise.
    pub error: Option<String>,
}

/// Reply to `request-disclosure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDisclosureReply {
    /// Whether the proof was produced and forwarded.
    pub ok: bool,
    /// Failure message otherwise.
    pub error: Option<String>,
}

/// Reply to `disclosure-request-from-page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisclosureRequestReply {
    /// Whether any card can satisfy the request.
    pub ok: bool,
    /// The cards that matched, with their property values.
    pub matches: Vec<DisclosureMatch>,
}

/// Reply to `list-cards`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCardsReply {
    /// Snapshot of the card collection.
    pub cards: Vec<Card>,
}

/// A disclosure request waiting for user confirmation on one card.
#[derive(Debug, Clone)]
struct PendingDisclosure {
    url: String,
    uid: String,
}

/// The background coordinator.
pub struct Orchestrator {
    wallet: Wallet,
    helper: HelperClient,
    bus: MessageBus,
    registry: Arc<SchemaRegistry>,
    pending: Mutex<HashMap<u64, PendingDisclosure>>,
}

impl Orchestrator {
    /// Creates the coordinator over its collaborators.
    pub fn new(
        wallet: Wallet,
        helper: HelperClient,
        bus: MessageBus,
        registry: Arc<SchemaRegistry>,
    ) -> Arc<Self> {
        Arc::new(Orchestrator {
            wallet,
            helper,
            bus,
            registry,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Installs the request handler on the `background` listener and
    /// activates it, draining any messages queued while the coordinator
    /// was starting.
    pub fn attach(self: Arc<Self>, mut listener: ContextListener) -> tokio::task::JoinHandle<()> {
        let orchestrator = self;
        listener.handle(move |envelope| {
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.dispatch(envelope).await }
        });
        listener.activate()
    }

    /// Parses and dispatches one routed message.
    async fn dispatch(self: Arc<Self>, envelope: Envelope) -> Result<Value, BusFault> {
        let request: Request = match envelope.parse() {
            Ok(request) => request,
            Err(e) => {
                log::error!("{}", e);
                return Err(BusFault::no_handler(&envelope.action));
            }
        };

        match request {
            Request::ImportCard {
                domain,
                schema,
                encoded,
            } => self.import_card(&domain, &schema, &encoded).await,
            Request::DeleteCard { id } => self.delete_card(id).await,
            Request::RequestPreparation { id } => self.request_preparation(id).await,
            Request::RequestDisclosure { id } => self.request_disclosure(id).await,
            Request::DisclosureRequestFromPage { url, uid, property } => {
                self.page_disclosure_request(url, uid, &property).await
            }
            Request::ListCards {} => self.list_cards().await,
        }
    }

    /// `import-card`: decode and store a new pending card.
    ///
    /// A decode failure is a user-visible outcome, not a rejected call: the
    /// importing context receives `{ok: false}` with the error message.
    async fn import_card(
        &self,
        domain: &str,
        schema: &str,
        encoded: &str,
    ) -> Result<Value, BusFault> {
        match Card::import(domain, schema, encoded, &self.registry) {
            Ok(card) => {
                let id = self.wallet.add(card).await.map_err(BusFault::from)?;
                log::info!("imported card {} from {}", id, domain);
                reply(ImportCardReply {
                    ok: true,
                    id: Some(id),
                    error: None,
                })
            }
            Err(e) => {
                log::warn!("import from {} failed: {}", domain, e);
                reply(ImportCardReply {
                    ok: false,
                    id: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// `delete-card`: remove locally, then best-effort remote cleanup.
    async fn delete_card(&self, id: u64) -> Result<Value, BusFault> {
        let card = self.wallet.find(id).await;
        self.wallet.remove(id).await.map_err(BusFault::from)?;
        self.pending.lock().await.remove(&id);

        if let Some(card) = card {
            if !card.cred_uid.is_empty() && !self.helper.delete_cred(&card.cred_uid).await {
                log::warn!("remote cleanup of cred {} failed", card.cred_uid);
            }
        }
        reply(DeleteCardReply { ok: true })
    }

    /// `request-preparation`: drive a card through the helper's prepare
    /// step and, on acceptance, start the status polling task.
    ///
    /// Only `Pending` and `Error` cards may be prepared; anything else is
    /// rejected so a double submission cannot start a second polling loop.
    /// The guard and the transition to `Preparing` happen inside one wallet
    /// critical section, so two concurrent submissions for the same card
    /// cannot both pass.
    async fn request_preparation(self: Arc<Self>, id: u64) -> Result<Value, BusFault> {
        let card = self
            .wallet
            .try_update(id, |c| {
                if !c.status.preparable() {
                    return Err(WalletError::State(format!(
                        "card {} cannot be prepared while {:?}",
                        id, c.status
                    )));
                }
                c.status = CardStatus::Preparing;
                c.progress = 0;
                Ok(())
            })
            .await
            .map_err(BusFault::from)?;

        let schema_uid = card.token.schema_name.clone();
        match self.helper.prepare(&card.issuer.url, &card.data, &schema_uid).await {
            Ok(cred_uid) => {
                // The card may have been deleted while prepare was in
                // flight; if so, drop the remote state again.
                match self
                    .wallet
                    .update(id, |c| c.cred_uid = cred_uid.clone())
                    .await
                {
                    Ok(_) => {
                        self.spawn_status_poll(id, cred_uid.clone());
                        reply(RequestPreparationReply {
                            ok: true,
                            cred_uid: Some(cred_uid),
                            error: None,
                        })
                    }
                    Err(WalletError::NotFound(_)) => {
                        log::warn!("card {} deleted during prepare; discarding {}", id, cred_uid);
                        self.helper.delete_cred(&cred_uid).await;
                        reply(RequestPreparationReply {
                            ok: false,
                            cred_uid: None,
                            error: Some(format!("card {} was deleted", id)),
                        })
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                log::error!("prepare for card {} failed: {}", id, e);
                self.fail_preparation(id, &e.to_string()).await;
                reply(RequestPreparationReply {
                    ok: false,
                    cred_uid: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Spawns the status polling loop for one in-flight preparation.
    ///
    /// Each preparation polls independently; concurrent preparations for
    /// different cards do not interact.
    fn spawn_status_poll(self: Arc<Self>, id: u64, cred_uid: String) {
        let orchestrator = self;
        tokio::spawn(async move {
            let progress_side = Arc::clone(&orchestrator);
            let result = orchestrator
                .helper
                .status(&cred_uid, move || {
                    // Progress updates are persisted and published on
                    // their own tasks; watchers tolerate stale or
                    // duplicate values.
                    let orchestrator = Arc::clone(&progress_side);
                    tokio::spawn(async move {
                        match orchestrator.wallet.update(id, |c| {
                            c.advance_progress();
                        }).await {
                            Ok(card) => orchestrator.bus.publish(WalletEvent::PrepareProgress {
                                id,
                                progress: card.progress,
                            }),
                            Err(_) => log::debug!("progress tick for missing card {}", id),
                        }
                    });
                })
                .await;

            match result {
                Ok(_) => {
                    match orchestrator
                        .wallet
                        .update(id, |c| {
                            c.status = CardStatus::Prepared;
                            c.progress = 100;
                        })
                        .await
                    {
                        Ok(_) => {
                            log::info!("card {} prepared ({})", id, cred_uid);
                            orchestrator.bus.publish(WalletEvent::Prepared { id });
                        }
                        Err(_) => {
                            log::warn!("card {} deleted before preparation finished", id);
                        }
                    }
                }
                Err(e) => {
                    log::error!("preparation of card {} failed: {}", id, e);
                    if orchestrator.wallet.find(id).await.is_some() {
                        orchestrator.fail_preparation(id, &e.to_string()).await;
                    }
                }
            }
        });
    }

    /// Moves a card to `Error` and notifies watchers.
    async fn fail_preparation(&self, id: u64, message: &str) {
        if let Err(e) = self.wallet.update(id, |c| c.status = CardStatus::Error).await {
            log::error!("could not mark card {} as failed: {}", id, e);
        }
        self.bus.publish(WalletEvent::PrepareFailed {
            id,
            message: message.to_string(),
        });
    }

    /// `disclosure-request-from-page`: find the cards that can satisfy the
    /// requested property, mark them disclosable, and notify the panel.
    async fn page_disclosure_request(
        &self,
        url: String,
        uid: String,
        property: &str,
    ) -> Result<Value, BusFault> {
        let candidates = self.wallet.filter(property).await;
        let mut matches = Vec::new();

        for card in candidates {
            // Only prepared cards can disclose. A card already matched by
            // an earlier request, or left mid-disclosure by a failed one,
            // is re-pointed at the new request.
            if !matches!(
                card.status,
                CardStatus::Prepared | CardStatus::Disclosable | CardStatus::Disclosing
            ) {
                continue;
            }
            let value = card.token.field(property).cloned().unwrap_or(Value::Null);
            match self
                .wallet
                .update(card.id, |c| c.status = CardStatus::Disclosable)
                .await
            {
                Ok(_) => {
                    self.pending.lock().await.insert(
                        card.id,
                        PendingDisclosure {
                            url: url.clone(),
                            uid: uid.clone(),
                        },
                    );
                    matches.push(DisclosureMatch {
                        id: card.id,
                        property: property.to_string(),
                        value,
                    });
                }
                Err(_) => continue, // deleted in the meantime
            }
        }

        if matches.is_empty() {
            log::info!("no card satisfies disclosure of {} for {}", property, url);
            return reply(DisclosureRequestReply {
                ok: false,
                matches: Vec::new(),
            });
        }

        self.bus.publish(WalletEvent::DisclosureRequested {
            url,
            uid,
            matches: matches.clone(),
        });
        reply(DisclosureRequestReply { ok: true, matches })
    }

    /// `request-disclosure`: the user confirmed one matched card; produce
    /// the proof and forward it to the requesting page.
    ///
    /// A failed disclosure is logged and aborted without changing the
    /// card's status; the card stays `Disclosing` until a new page request
    /// re-matches it back to `Disclosable`.
    async fn request_disclosure(&self, id: u64) -> Result<Value, BusFault> {
        let card = self
            .wallet
            .find(id)
            .await
            .ok_or_else(|| BusFault::from(WalletError::NotFound(format!("card {}", id))))?;
        if card.status != CardStatus::Disclosable {
            return Err(WalletError::State(format!(
                "card {} is not disclosable (currently {:?})",
                id, card.status
            ))
            .into());
        }
        let pending = self
            .pending
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| {
                BusFault::from(WalletError::NotFound(format!(
                    "pending disclosure for card {}",
                    id
                )))
            })?;

        self.wallet
            .update(id, |c| c.status = CardStatus::Disclosing)
            .await
            .map_err(BusFault::from)?;

        let proof = match self.helper.show(&card.cred_uid, &pending.uid).await {
            Ok(proof) => proof,
            Err(e) => {
                log::error!("disclosure for card {} failed: {}", id, e);
                return reply(RequestDisclosureReply {
                    ok: false,
                    error: Some(e.to_string()),
                });
            }
        };

        let forward = PageRequest::SendProof {
            url: pending.url.clone(),
            issuer_url: card.issuer.url.clone(),
            schema_uid: card.token.schema_name.clone(),
            disclosure_uid: pending.uid.clone(),
            proof,
        };
        if let Err(e) = self.bus.call(CONTENT, &forward).await {
            log::error!("could not forward proof for card {}: {}", id, e);
            return reply(RequestDisclosureReply {
                ok: false,
                error: Some(e.to_string()),
            });
        }

        // The disclosure cycle is re-enterable: back to disclosable.
        if let Err(e) = self
            .wallet
            .update(id, |c| c.status = CardStatus::Disclosable)
            .await
        {
            log::warn!("card {} vanished after disclosure: {}", id, e);
        }
        reply(RequestDisclosureReply {
            ok: true,
            error: None,
        })
    }

    /// `list-cards`: snapshot for contexts without wallet access.
    async fn list_cards(&self) -> Result<Value, BusFault> {
        reply(ListCardsReply {
            cards: self.wallet.cards().await,
        })
    }
}

fn reply<T: Serialize>(value: T) -> Result<Value, BusFault> {
    serde_json::to_value(value).map_err(|e| {
        BusFault::from(WalletError::Transport(format!(
            "unserializable reply: {}",
            e
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_actions() {
        let value = serde_json::to_value(Request::ImportCard {
            domain: "domain.example".to_string(),
            schema: "jwt_corporate_1".to_string(),
            encoded: "a.b.c".to_string(),
        })
        .unwrap();
        assert_eq!(value["action"], "import-card");
        assert_eq!(value["data"]["schema"], "jwt_corporate_1");

        let value = serde_json::to_value(Request::DisclosureRequestFromPage {
            url: "https://verifier.example/verify".to_string(),
            uid: "crescent://email_domain".to_string(),
            property: "email".to_string(),
        })
        .unwrap();
        assert_eq!(value["action"], "disclosure-request-from-page");
    }

    #[test]
    fn test_send_proof_wire_shape() {
        // The verifier callback body uses the helper service's field names.
        let value = serde_json::to_value(PageRequest::SendProof {
            url: "https://verifier.example/verify".to_string(),
            issuer_url: "domain.example".to_string(),
            schema_uid: "jwt_corporate_1".to_string(),
            disclosure_uid: "crescent://email_domain".to_string(),
            proof: "p".to_string(),
        })
        .unwrap();
        assert_eq!(value["action"], "send-proof");
        assert_eq!(value["data"]["issuer_URL"], "domain.example");
        assert_eq!(value["data"]["schema_UID"], "jwt_corporate_1");
        assert_eq!(value["data"]["disclosure_uid"], "crescent://email_domain");
    }

    #[test]
    fn test_request_roundtrips_through_envelope() {
        let request = Request::RequestPreparation { id: 3 };
        let envelope = Envelope::for_request(BACKGROUND, &request).unwrap();
        assert_eq!(envelope.action, "request-preparation");
        let parsed: Request = envelope.parse().unwrap();
        assert_eq!(parsed, request);
    }
}

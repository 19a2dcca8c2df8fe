// src/services/helper_client.rs
//! Client for the external preparation (client helper) HTTP service.
//!
//! The helper performs the cryptographic work this core delegates:
//! preparing an imported credential for selective disclosure and producing
//! disclosure proofs. The service is stateless from our point of view and
//! reachable only by polling; its protocol is plain text over HTTP:
//! - `POST /prepare {issuer_URL, cred, schema_UID}` → credential uid, or a
//!   body prefixed `ERROR`
//! - `GET /status?cred_uid=` → `ready`, `unknown`, an `Error:`-prefixed
//!   message, or any other text while still working
//! - `GET /show?cred_uid=&disc_uid=` → opaque proof string
//! - `GET /delete?cred_uid=` → best-effort cleanup
//!
//! Transport and remote failures are mapped to typed errors, never thrown
//! past the caller as panics or unhandled rejections.

use crate::config::Config;
use crate::error::WalletError;
use serde::Serialize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Body of a `POST /prepare` request.
#[derive(Serialize)]
struct PrepareRequest<'a> {
    #[serde(rename = "issuer_URL")]
    issuer_url: &'a str,
    cred: &'a str,
    #[serde(rename = "schema_UID")]
    schema_uid: &'a str,
}

/// HTTP client for the helper service.
#[derive(Clone)]
pub struct HelperClient {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    poll_limit: Option<u32>,
}

impl HelperClient {
    /// Creates a client from resolved configuration.
    pub fn new(config: &Config) -> Self {
        Self::with_endpoint(&config.client_helper_url, config.poll_interval, config.poll_limit)
    }

    /// Creates a client against an explicit endpoint.
    ///
    /// # Arguments
    /// * `base_url` - helper service base URL, without a trailing slash
    /// * `poll_interval` - fixed delay between status polls
    /// * `poll_limit` - maximum polls per preparation; `None` is unbounded
    pub fn with_endpoint(
        base_url: &str,
        poll_interval: Duration,
        poll_limit: Option<u32>,
    ) -> Self {
        HelperClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            poll_limit,
        }
    }

    /// Submits a credential for preparation.
    ///
    /// # Returns
    /// The credential uid assigned by the helper.
    ///
    /// # Errors
    /// - `Transport` if the request never produced a response
    /// - `RemoteService` if the helper answered with an `ERROR` body
    pub async fn prepare(
        &self,
        issuer_url: &str,
        cred: &str,
        schema_uid: &str,
    ) -> Result<String, WalletError> {
        let body = PrepareRequest {
            issuer_url,
            cred,
            schema_uid,
        };
        let response = self
            .http
            .post(format!("{}/prepare", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::Transport(format!("prepare request failed: {}", e)))?;
        let cred_uid = response
            .text()
            .await
            .map_err(|e| WalletError::Transport(format!("prepare response unreadable: {}", e)))?;

        if cred_uid.starts_with("ERROR") {
            return Err(WalletError::RemoteService(cred_uid));
        }
        Ok(cred_uid)
    }

    /// Polls the preparation status at a fixed interval until terminal.
    /// The first poll fires one full interval after the call; preparation
    /// is never instantaneous, so an immediate probe would be wasted.
    ///
    /// Terminal outcomes: `ready` resolves with the original `cred_uid`;
    /// `unknown`, an `Error:`-prefixed body, or a transport failure reject.
    /// Every non-terminal tick invokes `on_progress` so the caller can
    /// advance its own progress model. When a poll limit is configured,
    /// exceeding it rejects like a terminal remote failure.
    pub async fn status<F>(&self, cred_uid: &str, mut on_progress: F) -> Result<String, WalletError>
    where
        F: FnMut() + Send,
    {
        let first_tick = tokio::time::Instant::now() + self.poll_interval;
        let mut ticker = tokio::time::interval_at(first_tick, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: u32 = 0;

        loop {
            ticker.tick().await;

            let response = self
                .http
                .get(format!("{}/status", self.base_url))
                .query(&[("cred_uid", cred_uid)])
                .send()
                .await
                .map_err(|e| WalletError::Transport(format!("status request failed: {}", e)))?;
            let status = response
                .text()
                .await
                .map_err(|e| WalletError::Transport(format!("status response unreadable: {}", e)))?;

            if status == "ready" {
                return Ok(cred_uid.to_string());
            }
            if status == "unknown" || status.starts_with("Error:") {
                return Err(WalletError::RemoteService(status));
            }

            on_progress();
            attempts += 1;
            if let Some(limit) = self.poll_limit {
                if attempts >= limit {
                    return Err(WalletError::RemoteService(format!(
                        "status polling limit exceeded after {} attempts",
                        attempts
                    )));
                }
            }
        }
    }

    /// Requests a disclosure proof for one prepared credential.
    ///
    /// # Arguments
    /// * `cred_uid` - the prepared credential's uid
    /// * `disclosure_uid` - opaque identifier of the disclosure predicate
    ///
    /// # Returns
    /// The opaque proof string to forward to the verifier.
    pub async fn show(&self, cred_uid: &str, disclosure_uid: &str) -> Result<String, WalletError> {
        let response = self
            .http
            .get(format!("{}/show", self.base_url))
            .query(&[("cred_uid", cred_uid), ("disc_uid", disclosure_uid)])
            .send()
            .await
            .map_err(|e| WalletError::Transport(format!("show request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(WalletError::RemoteService(format!(
                "show failed with status {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| WalletError::Transport(format!("show response unreadable: {}", e)))
    }

    /// Best-effort remote cleanup of a prepared credential. Failures are
    /// logged, not escalated.
    pub async fn delete_cred(&self, cred_uid: &str) -> bool {
        match self
            .http
            .get(format!("{}/delete", self.base_url))
            .query(&[("cred_uid", cred_uid)])
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::error!("failed to delete cred {}: {}", cred_uid, e);
                false
            }
        }
    }

    /// Probes a helper endpoint for connectivity.
    pub async fn ping(&self, url: &str) -> bool {
        match self
            .http
            .get(format!("{}/status", url.trim_end_matches('/')))
            .query(&[("cred_uid", "ping")])
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::error!("failed to ping {}: {}", url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_client(base_url: &str) -> HelperClient {
        HelperClient::with_endpoint(base_url, Duration::from_millis(5), Some(50))
    }

    #[tokio::test]
    async fn test_prepare_returns_cred_uid() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/prepare")
            .match_header("content-type", "application/json")
            .with_body("abc-123")
            .create_async()
            .await;

        let client = test_client(&server.url());
        let cred_uid = client
            .prepare("domain.example", "a.b.c", "jwt_corporate_1")
            .await
            .unwrap();
        assert_eq!(cred_uid, "abc-123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_prepare_error_body_is_remote_service_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/prepare")
            .with_body("ERROR: timeout")
            .create_async()
            .await;

        let client = test_client(&server.url());
        let result = client.prepare("domain.example", "a.b.c", "jwt_corporate_1").await;
        assert!(matches!(result, Err(WalletError::RemoteService(m)) if m == "ERROR: timeout"));
    }

    #[tokio::test]
    async fn test_prepare_network_failure_is_transport_error() {
        // Nothing listens here.
        let client = test_client("http://127.0.0.1:1");
        let result = client.prepare("domain.example", "a.b.c", "jwt_corporate_1").await;
        assert!(matches!(result, Err(WalletError::Transport(_))));
    }

    #[tokio::test]
    async fn test_status_ticks_then_ready() {
        let mut server = mockito::Server::new_async().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_mock = Arc::clone(&calls);
        server
            .mock("GET", "/status")
            .match_query(mockito::Matcher::UrlEncoded(
                "cred_uid".into(),
                "abc".into(),
            ))
            .with_body_from_request(move |_| {
                // Three non-terminal ticks, then ready.
                if calls_in_mock.fetch_add(1, Ordering::SeqCst) < 3 {
                    b"working".to_vec()
                } else {
                    b"ready".to_vec()
                }
            })
            .expect(4)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let progressed = Arc::new(AtomicUsize::new(0));
        let progressed_in_callback = Arc::clone(&progressed);
        let result = client
            .status("abc", move || {
                progressed_in_callback.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(result, "abc");
        // Exactly one progress call per non-terminal tick.
        assert_eq!(progressed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_status_waits_one_interval_before_first_poll() {
        let mut server = mockito::Server::new_async().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_mock = Arc::clone(&hits);
        server
            .mock("GET", "/status")
            .match_query(mockito::Matcher::Any)
            .with_body_from_request(move |_| {
                hits_in_mock.fetch_add(1, Ordering::SeqCst);
                b"ready".to_vec()
            })
            .create_async()
            .await;

        let client =
            HelperClient::with_endpoint(&server.url(), Duration::from_millis(100), Some(5));
        let polling = {
            let client = client.clone();
            tokio::spawn(async move { client.status("abc", || {}).await })
        };

        // Well inside the first interval, nothing has been polled yet.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let result = polling.await.unwrap().unwrap();
        assert_eq!(result, "abc");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_unknown_is_terminal_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .match_query(mockito::Matcher::Any)
            .with_body("unknown")
            .create_async()
            .await;

        let client = test_client(&server.url());
        let result = client.status("abc", || {}).await;
        assert!(matches!(result, Err(WalletError::RemoteService(m)) if m == "unknown"));
    }

    #[tokio::test]
    async fn test_status_error_prefix_is_terminal_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .match_query(mockito::Matcher::Any)
            .with_body("Error: cred folder missing")
            .create_async()
            .await;

        let client = test_client(&server.url());
        let result = client.status("abc", || {}).await;
        assert!(matches!(result, Err(WalletError::RemoteService(_))));
    }

    #[tokio::test]
    async fn test_status_poll_limit_bounds_the_loop() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .match_query(mockito::Matcher::Any)
            .with_body("working")
            .expect(3)
            .create_async()
            .await;

        let client = HelperClient::with_endpoint(&server.url(), Duration::from_millis(5), Some(3));
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_in_callback = Arc::clone(&ticks);
        let result = client
            .status("abc", move || {
                ticks_in_callback.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(WalletError::RemoteService(_))));
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_show_returns_proof() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/show")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("cred_uid".into(), "abc".into()),
                mockito::Matcher::UrlEncoded("disc_uid".into(), "disc-1".into()),
            ]))
            .with_body("proof-bytes-b64")
            .create_async()
            .await;

        let client = test_client(&server.url());
        let proof = client.show("abc", "disc-1").await.unwrap();
        assert_eq!(proof, "proof-bytes-b64");
    }

    #[tokio::test]
    async fn test_show_non_success_is_remote_service_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/show")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let result = client.show("abc", "disc-1").await;
        assert!(matches!(result, Err(WalletError::RemoteService(_))));
    }

    #[tokio::test]
    async fn test_delete_cred_is_best_effort() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/delete")
            .match_query(mockito::Matcher::UrlEncoded("cred_uid".into(), "abc".into()))
            .with_body("ok")
            .create_async()
            .await;

        let client = test_client(&server.url());
        assert!(client.delete_cred("abc").await);

        // Unreachable helper: logged, reported false, never an error.
        let offline = test_client("http://127.0.0.1:1");
        assert!(!offline.delete_cred("abc").await);
    }

    #[tokio::test]
    async fn test_ping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .match_query(mockito::Matcher::UrlEncoded("cred_uid".into(), "ping".into()))
            .with_body("unknown")
            .create_async()
            .await;

        let client = test_client(&server.url());
        assert!(client.ping(&server.url()).await);
        assert!(!client.ping("http://127.0.0.1:1").await);
    }
}

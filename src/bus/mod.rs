// src/bus/mod.rs
//! Cross-context asynchronous message bus.
//!
//! Execution contexts are isolated: no shared memory, only JSON-serializable
//! message passing. Two patterns are supported:
//! - **Call/response**: [`MessageBus::call`] routes an [`Envelope`] to a
//!   destination context and resolves with the handler's reply (or its
//!   typed failure).
//! - **Fire-and-forget events**: [`MessageBus::publish`] broadcasts a
//!   [`WalletEvent`] to every subscriber in any context.
//!
//! A context may register its handler after messages addressed to it have
//! already been sent (e.g. a panel opens after the coordinator decided to
//! notify it). Messages for a registered-but-inactive destination buffer in
//! its mailbox; [`ContextListener::activate`] drains them strictly in
//! arrival order before any newly arriving message. Messages to the same
//! destination preserve send order; nothing is guaranteed across
//! destinations. There is no cancellation: a call resolves, rejects, or
//! fails with a transport error if the receiving context disappears.

pub mod event;

pub use event::{DisclosureMatch, WalletEvent};

use crate::error::{BusFault, WalletError};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Wire format of one routed message.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Envelope {
    /// Receiving context.
    pub destination: String,
    /// Operation name the receiving handler dispatches on.
    pub action: String,
    /// Operation arguments.
    pub data: Value,
}

impl Envelope {
    /// Wraps a serializable request (an `action`-tagged enum) for routing.
    pub fn for_request<R: Serialize>(
        destination: &str,
        request: &R,
    ) -> Result<Envelope, WalletError> {
        let value = serde_json::to_value(request)
            .map_err(|e| WalletError::Transport(format!("unserializable request: {}", e)))?;
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                WalletError::Transport("request carries no action tag".to_string())
            })?
            .to_string();
        let data = value.get("data").cloned().unwrap_or_else(|| json!({}));
        Ok(Envelope {
            destination: destination.to_string(),
            action,
            data,
        })
    }

    /// Reconstructs the typed request on the receiving side.
    ///
    /// # Errors
    /// Returns `NotFound` when the action does not match any message the
    /// receiving direction defines (the "no handler" case).
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, WalletError> {
        serde_json::from_value(json!({ "action": self.action, "data": self.data }))
            .map_err(|_| WalletError::NotFound(format!("no handler for action {}", self.action)))
    }
}

/// One delivery queued in a context mailbox.
struct Delivery {
    envelope: Envelope,
    reply: oneshot::Sender<Result<Value, BusFault>>,
}

/// Handler a context runs for each delivered envelope.
type Handler = Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<Value, BusFault>> + Send + Sync>;

struct BusShared {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
    events: broadcast::Sender<WalletEvent>,
}

/// Shared transport handle; cheap to clone into every context.
#[derive(Clone)]
pub struct MessageBus {
    shared: Arc<BusShared>,
}

impl MessageBus {
    /// Creates a bus with no registered destinations.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        MessageBus {
            shared: Arc::new(BusShared {
                routes: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Registers a destination and returns its listener.
    ///
    /// From this point messages addressed to `destination` buffer in its
    /// mailbox; they are processed only once the listener activates.
    /// Re-registering a destination replaces the previous route.
    pub fn register(&self, destination: &str) -> ContextListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.shared.routes.lock().expect("route table poisoned");
        routes.insert(destination.to_string(), tx);
        log::debug!("registered destination {}", destination);
        ContextListener {
            destination: destination.to_string(),
            rx,
            handler: None,
        }
    }

    /// Sends a request to `destination` and awaits the handler's reply.
    ///
    /// # Errors
    /// - `NotFound` if the destination never registered
    /// - `Transport` if the receiving context disappeared before replying
    /// - the handler's own typed failure otherwise
    pub async fn call<R: Serialize>(
        &self,
        destination: &str,
        request: &R,
    ) -> Result<Value, WalletError> {
        let envelope = Envelope::for_request(destination, request)?;
        log::debug!("call {} {}", destination, envelope.action);

        let route = {
            let routes = self.shared.routes.lock().expect("route table poisoned");
            routes.get(destination).cloned()
        };
        let route = route.ok_or_else(|| {
            WalletError::NotFound(format!("destination {} is not registered", destination))
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        route
            .send(Delivery {
                envelope,
                reply: reply_tx,
            })
            .map_err(|_| {
                WalletError::Transport(format!("destination {} is gone", destination))
            })?;

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(fault.into()),
            Err(_) => Err(WalletError::Transport(format!(
                "context {} disappeared before replying",
                destination
            ))),
        }
    }

    /// Broadcasts an event to all subscribers. Having no subscriber is not
    /// an error.
    pub fn publish(&self, event: WalletEvent) {
        log::debug!("publish {:?}", event);
        let _ = self.shared.events.send(event);
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.shared.events.subscribe()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        MessageBus::new()
    }
}

/// Receiving side of one destination.
///
/// Deliveries buffer in the mailbox until [`activate`](Self::activate)
/// spawns the dispatch loop, which preserves arrival order exactly.
pub struct ContextListener {
    destination: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
    handler: Option<Handler>,
}

impl ContextListener {
    /// Installs the context's handler. Must be called before `activate`;
    /// deliveries dispatched without a handler are answered with a
    /// "no handler" fault.
    pub fn handle<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BusFault>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |envelope| Box::pin(handler(envelope))));
    }

    /// Signals readiness: drains buffered deliveries in arrival order, then
    /// keeps dispatching new ones until the bus side is dropped.
    ///
    /// Handlers are spawned, not awaited inline, so a long-running handler
    /// (e.g. one that polls a remote service) does not block later
    /// messages; dispatch *start* order still follows arrival order.
    pub fn activate(mut self) -> JoinHandle<()> {
        log::debug!("activating destination {}", self.destination);
        tokio::spawn(async move {
            while let Some(delivery) = self.rx.recv().await {
                let handler = self.handler.clone();
                let destination = self.destination.clone();
                tokio::spawn(async move {
                    let Delivery { envelope, reply } = delivery;
                    let action = envelope.action.clone();
                    let result = match handler {
                        Some(handler) => handler(envelope).await,
                        None => {
                            log::error!(
                                "no handler registered for {} (action {})",
                                destination,
                                action
                            );
                            Err(BusFault::no_handler(&action))
                        }
                    };
                    // The caller may have stopped waiting; that is fine.
                    let _ = reply.send(result);
                });
            }
            log::debug!("destination {} mailbox closed", self.destination);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "action", content = "data", rename_all = "kebab-case")]
    enum TestRequest {
        Echo { value: u64 },
        Fail {},
    }

    fn echo_handler(envelope: Envelope) -> impl Future<Output = Result<Value, BusFault>> {
        async move {
            let request: TestRequest = envelope.parse().map_err(BusFault::from)?;
            match request {
                TestRequest::Echo { value } => Ok(json!({ "echo": value })),
                TestRequest::Fail {} => {
                    Err(WalletError::State("told to fail".to_string()).into())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_call_and_response() {
        let bus = MessageBus::new();
        let mut listener = bus.register("panel");
        listener.handle(echo_handler);
        listener.activate();

        let reply = bus.call("panel", &TestRequest::Echo { value: 7 }).await.unwrap();
        assert_eq!(reply, json!({ "echo": 7 }));
    }

    #[tokio::test]
    async fn test_handler_failure_rejects_the_call() {
        let bus = MessageBus::new();
        let mut listener = bus.register("panel");
        listener.handle(echo_handler);
        listener.activate();

        let result = bus.call("panel", &TestRequest::Fail {}).await;
        assert!(matches!(result, Err(WalletError::State(_))));
    }

    #[tokio::test]
    async fn test_messages_before_activation_are_delivered_once_in_order() {
        let bus = MessageBus::new();
        let mut listener = bus.register("panel");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let counted = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = Arc::clone(&seen);
        let counted_in_handler = Arc::clone(&counted);
        listener.handle(move |envelope: Envelope| {
            let seen = Arc::clone(&seen_in_handler);
            let counted = Arc::clone(&counted_in_handler);
            async move {
                let request: TestRequest = envelope.parse().map_err(BusFault::from)?;
                if let TestRequest::Echo { value } = request {
                    seen.lock().unwrap().push(value);
                    counted.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Value::Null)
            }
        });

        // Send before the destination is ready. join_all polls the call
        // futures in index order, so the mailbox receives them in order
        // while every reply stays pending.
        let calls = futures::future::join_all((0..5u64).map(|value| {
            let bus = bus.clone();
            async move {
                bus.call("panel", &TestRequest::Echo { value }).await.unwrap();
            }
        }));
        let pending = tokio::spawn(calls);

        // Give the sends time to land in the mailbox, then activate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counted.load(Ordering::SeqCst), 0);
        listener.activate();
        pending.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(counted.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_unknown_action_resolves_as_no_handler() {
        #[derive(Serialize)]
        #[serde(tag = "action", content = "data", rename_all = "kebab-case")]
        enum OtherRequest {
            Mystery {},
        }

        let bus = MessageBus::new();
        let mut listener = bus.register("panel");
        listener.handle(echo_handler);
        listener.activate();

        let result = bus.call("panel", &OtherRequest::Mystery {}).await;
        assert!(matches!(result, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_listener_without_handler_replies_no_handler() {
        let bus = MessageBus::new();
        let listener = bus.register("panel");
        listener.activate();

        let result = bus.call("panel", &TestRequest::Echo { value: 1 }).await;
        assert!(matches!(result, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unregistered_destination_is_not_found() {
        let bus = MessageBus::new();
        let result = bus.call("nowhere", &TestRequest::Echo { value: 1 }).await;
        assert!(matches!(result, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dropped_context_is_a_transport_error() {
        let bus = MessageBus::new();
        let listener = bus.register("panel");
        drop(listener);

        let result = bus.call("panel", &TestRequest::Echo { value: 1 }).await;
        assert!(matches!(result, Err(WalletError::Transport(_))));
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = MessageBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(WalletEvent::Prepared { id: 9 });

        assert_eq!(first.recv().await.unwrap(), WalletEvent::Prepared { id: 9 });
        assert_eq!(second.recv().await.unwrap(), WalletEvent::Prepared { id: 9 });
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = MessageBus::new();
        bus.publish(WalletEvent::WalletUpdated);
    }
}

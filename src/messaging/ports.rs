//! Duplex port multiplexer.
//!
//! A port connects an initiator context to whichever context currently
//! serves the target owner. The port record is stored before the responder
//! is resolved, and every message towards the responder goes through a
//! per-port delivery task, so messages posted right after `open_port` are
//! queued in order rather than lost.
//!
//! # Port Lifecycle
//!
//! ```text
//! open_port ──► record stored ──► responder resolved ──► port.connect sent
//!                   │                    │                      │
//!                   │              unreachable:                 ▼
//!                   │         initiator gets port.disconnect   open
//!                   ▼                                           │
//!            messages queued ─────────── flushed in order ──────┤
//!                                                               ▼
//!                              disconnect / endpoint destroyed / sweep
//! ```
//!
//! A worker responder that restarts is re-resolved on the next message and
//! receives a fresh `port.connect`. If nothing is reachable the message is
//! dropped.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{OwnerId, PortId};
use crate::protocol::{
    CHANNEL_PORT_CONNECT, CHANNEL_PORT_DISCONNECT, CHANNEL_PORT_MESSAGE, PortConnect,
    PortDisconnect, PortMessage, SenderInfo,
};
use crate::transport::{Endpoint, EndpointKind, WatchId};

use super::resolver::RecipientResolver;

// ============================================================================
// Constants
// ============================================================================

/// Error reported to an initiator whose port found no responder.
pub const NO_RECEIVER_ERROR: &str =
    "Could not establish connection. Receiving end does not exist.";

// ============================================================================
// Types
// ============================================================================

/// Which end of a port an operation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSide {
    /// The context that opened the port.
    Initiator,
    /// The context serving the target owner.
    Responder,
}

/// Items queued towards the responder.
enum PortFrame {
    Message(Value),
    Disconnect(Option<String>),
}

/// One open port.
struct PortRecord {
    initiator: Endpoint,
    initiator_watch: Option<WatchId>,
    responder: Option<Endpoint>,
    responder_watch: Option<WatchId>,
    to_responder: mpsc::UnboundedSender<PortFrame>,
    /// Set when the responder side closed; the delivery task stops at once.
    halted: Arc<AtomicBool>,
}

impl PortRecord {
    /// Only the initiator and the currently bound responder are parties.
    fn side_of(&self, endpoint: &Endpoint) -> Option<PortSide> {
        if endpoint.same_as(&self.initiator) {
            Some(PortSide::Initiator)
        } else if self.responder.as_ref().is_some_and(|r| r.same_as(endpoint)) {
            Some(PortSide::Responder)
        } else {
            None
        }
    }

    fn cancel_watches(&mut self) {
        if let Some(id) = self.initiator_watch.take() {
            self.initiator.cancel_watch(id);
        }
        if let (Some(id), Some(responder)) = (self.responder_watch.take(), &self.responder) {
            responder.cancel_watch(id);
        }
    }
}

// ============================================================================
// PortMultiplexer
// ============================================================================

/// Table of open ports.
pub struct PortMultiplexer {
    ports: Mutex<FxHashMap<PortId, PortRecord>>,
    resolver: Arc<RecipientResolver>,
}

impl fmt::Debug for PortMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortMultiplexer")
            .field("open_ports", &self.port_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PortMultiplexer - Constructor
// ============================================================================

impl PortMultiplexer {
    /// Creates an empty multiplexer.
    #[must_use]
    pub fn new(resolver: Arc<RecipientResolver>) -> Arc<Self> {
        Arc::new(Self {
            ports: Mutex::new(FxHashMap::default()),
            resolver,
        })
    }
}

// ============================================================================
// PortMultiplexer - Public API
// ============================================================================

impl PortMultiplexer {
    /// Opens a port from `initiator` to the contexts of `target`.
    ///
    /// Returns immediately; the responder is resolved in the background.
    /// Must be called within a tokio runtime.
    pub fn open_port(self: &Arc<Self>, initiator: &Endpoint, target: OwnerId, name: &str) -> PortId {
        let port_id = PortId::generate();
        let (to_responder, rx) = mpsc::unbounded_channel();
        let halted = Arc::new(AtomicBool::new(false));

        self.ports.lock().insert(
            port_id,
            PortRecord {
                initiator: initiator.clone(),
                initiator_watch: None,
                responder: None,
                responder_watch: None,
                to_responder,
                halted: Arc::clone(&halted),
            },
        );

        let weak = Arc::downgrade(self);
        let watch = initiator.on_destroyed(move || {
            if let Some(ports) = weak.upgrade() {
                ports.close(port_id, PortSide::Initiator, None);
            }
        });
        if let Some(record) = self.ports.lock().get_mut(&port_id) {
            record.initiator_watch = watch;
        }

        let connect = PortConnect {
            port_id,
            name: name.to_string(),
            sender: SenderInfo::from_endpoint(initiator),
        };

        debug!(%port_id, name, owner = %target, "Port opened");

        tokio::spawn(run_delivery(
            Arc::downgrade(self),
            Arc::clone(&self.resolver),
            initiator.clone(),
            target,
            connect,
            rx,
            halted,
        ));

        port_id
    }

    /// Forwards `message` from `from` to the other side of the port.
    ///
    /// Towards the responder the message is queued and delivered in order.
    /// Towards the initiator it is sent directly; if the initiator is gone
    /// the message is dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::PortNotFound`] if the port is closed or unknown
    /// - [`Error::InvalidArgument`] if `from` is not a party to the port
    pub fn post_message(&self, port_id: PortId, from: &Endpoint, message: Value) -> Result<()> {
        let initiator = {
            let ports = self.ports.lock();
            let record = ports.get(&port_id).ok_or(Error::PortNotFound { port_id })?;

            match record.side_of(from) {
                Some(PortSide::Initiator) => {
                    return record
                        .to_responder
                        .send(PortFrame::Message(message))
                        .map_err(|_| Error::PortNotFound { port_id });
                }
                Some(PortSide::Responder) => record.initiator.clone(),
                None => {
                    return Err(Error::invalid_argument(format!(
                        "{} is not connected to port {port_id}",
                        from.id()
                    )));
                }
            }
        };

        if let Err(e) = send_json(&initiator, CHANNEL_PORT_MESSAGE, &PortMessage { port_id, message }) {
            debug!(%port_id, error = %e, "Dropping message to unreachable initiator");
        }
        Ok(())
    }

    /// Closes the port on behalf of `from`.
    ///
    /// The other side receives exactly one `port.disconnect`. Returns
    /// `false` if the port was already closed.
    pub fn disconnect(&self, port_id: PortId, from: &Endpoint) -> bool {
        let side = {
            let ports = self.ports.lock();
            match ports.get(&port_id) {
                Some(record) => record.side_of(from),
                None => return false,
            }
        };

        match side {
            Some(side) => self.close(port_id, side, None),
            None => {
                warn!(%port_id, endpoint = %from.id(), "Disconnect from non-party ignored");
                false
            }
        }
    }

    /// Closes the port as if `side` disconnected.
    ///
    /// Returns `false` if the port was already closed.
    pub fn close(&self, port_id: PortId, side: PortSide, error: Option<String>) -> bool {
        let Some(mut record) = self.ports.lock().remove(&port_id) else {
            return false;
        };
        record.cancel_watches();

        match side {
            PortSide::Initiator => {
                // Delivered after any messages still queued
                let _ = record.to_responder.send(PortFrame::Disconnect(error));
            }
            PortSide::Responder => {
                record.halted.store(true, Ordering::SeqCst);
                if record.initiator.is_alive() {
                    let notice = PortDisconnect { port_id, error };
                    if let Err(e) = send_json(&record.initiator, CHANNEL_PORT_DISCONNECT, &notice) {
                        debug!(%port_id, error = %e, "Disconnect undeliverable");
                    }
                }
            }
        }

        debug!(%port_id, ?side, "Port closed");
        true
    }

    /// Closes every port, notifying both sides.
    pub fn close_all(&self) {
        let records: Vec<(PortId, PortRecord)> = self.ports.lock().drain().collect();
        for (port_id, mut record) in records {
            record.cancel_watches();
            let _ = record.to_responder.send(PortFrame::Disconnect(None));
            if record.initiator.is_alive() {
                let _ = send_json(
                    &record.initiator,
                    CHANNEL_PORT_DISCONNECT,
                    &PortDisconnect { port_id, error: None },
                );
            }
        }
    }

    /// Closes ports whose endpoints died without the destruction being
    /// observed. Returns the number of ports pruned.
    pub fn sweep(&self) -> usize {
        let stale: Vec<(PortId, PortSide)> = {
            let ports = self.ports.lock();
            ports
                .iter()
                .filter_map(|(id, record)| {
                    if !record.initiator.is_alive() {
                        return Some((*id, PortSide::Initiator));
                    }
                    let dead_frame = record
                        .responder
                        .as_ref()
                        .is_some_and(|r| r.kind() == EndpointKind::Frame && !r.is_alive());
                    dead_frame.then_some((*id, PortSide::Responder))
                })
                .collect()
        };

        let pruned = stale
            .into_iter()
            .filter(|(id, side)| self.close(*id, *side, None))
            .count();

        if pruned > 0 {
            debug!(pruned, "Swept stale ports");
        }
        pruned
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until the multiplexer
    /// is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(ports) => {
                        ports.sweep();
                    }
                    None => break,
                }
            }
            trace!("Port sweeper stopped");
        })
    }

    /// Returns `true` if the port is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self, port_id: PortId) -> bool {
        self.ports.lock().contains_key(&port_id)
    }

    /// Returns the number of open ports.
    #[inline]
    #[must_use]
    pub fn port_count(&self) -> usize {
        self.ports.lock().len()
    }
}

// ============================================================================
// PortMultiplexer - Responder Binding
// ============================================================================

impl PortMultiplexer {
    /// Records `responder` for the port and watches frame responders.
    ///
    /// Returns `false` if the port closed meanwhile.
    fn bind_responder(self: &Arc<Self>, port_id: PortId, responder: &Endpoint) -> bool {
        let previous = {
            let mut ports = self.ports.lock();
            let Some(record) = ports.get_mut(&port_id) else {
                return false;
            };
            let previous = record
                .responder_watch
                .take()
                .zip(record.responder.take());
            record.responder = Some(responder.clone());
            previous
        };

        if let Some((watch, old)) = previous {
            old.cancel_watch(watch);
        }

        // Worker responders are re-resolved instead of closing the port
        if responder.kind() == EndpointKind::Frame {
            let weak = Arc::downgrade(self);
            let watch = responder.on_destroyed(move || {
                if let Some(ports) = weak.upgrade() {
                    ports.close(port_id, PortSide::Responder, None);
                }
            });
            if let Some(record) = self.ports.lock().get_mut(&port_id) {
                record.responder_watch = watch;
            }
        }
        true
    }
}

// ============================================================================
// Delivery Task
// ============================================================================

/// Resolves a responder, announces the port, and sends it `port.connect`.
async fn connect_responder(
    ports: &Weak<PortMultiplexer>,
    resolver: &RecipientResolver,
    initiator: &Endpoint,
    owner: &OwnerId,
    connect: &PortConnect,
) -> Option<Endpoint> {
    let responder = resolver.resolve(owner, Some(initiator)).await?;
    let port_id = connect.port_id;

    if !ports.upgrade()?.bind_responder(port_id, &responder) {
        return None;
    }

    match send_json(&responder, CHANNEL_PORT_CONNECT, connect) {
        Ok(()) => {
            trace!(%port_id, responder = %responder.id(), "Port connected");
            Some(responder)
        }
        Err(e) => {
            debug!(%port_id, error = %e, "Port connect undeliverable");
            None
        }
    }
}

/// Delivers everything queued towards the responder, in order.
async fn run_delivery(
    ports: Weak<PortMultiplexer>,
    resolver: Arc<RecipientResolver>,
    initiator: Endpoint,
    owner: OwnerId,
    connect: PortConnect,
    mut rx: mpsc::UnboundedReceiver<PortFrame>,
    halted: Arc<AtomicBool>,
) {
    let port_id = connect.port_id;

    let Some(mut responder) = connect_responder(&ports, &resolver, &initiator, &owner, &connect).await else {
        debug!(%port_id, %owner, "No responder for port");
        if let Some(ports) = ports.upgrade() {
            ports.close(port_id, PortSide::Responder, Some(NO_RECEIVER_ERROR.to_string()));
        }
        return;
    };

    while let Some(frame) = rx.recv().await {
        if halted.load(Ordering::SeqCst) {
            break;
        }

        match frame {
            PortFrame::Message(message) => {
                if !responder.is_alive() {
                    match connect_responder(&ports, &resolver, &initiator, &owner, &connect).await {
                        Some(next) => {
                            debug!(%port_id, responder = %next.id(), "Port responder re-resolved");
                            responder = next;
                        }
                        None => {
                            debug!(%port_id, "Dropping message, responder unreachable");
                            continue;
                        }
                    }
                }

                if let Err(e) = send_json(&responder, CHANNEL_PORT_MESSAGE, &PortMessage { port_id, message }) {
                    debug!(%port_id, error = %e, "Dropping undeliverable port message");
                }
            }
            PortFrame::Disconnect(error) => {
                if responder.is_alive() {
                    let _ = send_json(&responder, CHANNEL_PORT_DISCONNECT, &PortDisconnect { port_id, error });
                }
                break;
            }
        }
    }

    trace!(%port_id, "Port delivery finished");
}

/// Serializes `payload` and sends it on `channel`.
fn send_json(endpoint: &Endpoint, channel: &str, payload: &impl Serialize) -> Result<()> {
    endpoint.send(channel, serde_json::to_value(payload)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::router::RouterOptions;
    use crate::testing::{ScriptedHost, TestContext};
    use crate::transport::Delivery;
    use crate::worker::WorkerTracker;

    const SCOPE: &str = "chrome-extension://abc/";

    fn multiplexer(host: Arc<ScriptedHost>) -> Arc<PortMultiplexer> {
        let options = RouterOptions::new();
        let workers = Arc::new(WorkerTracker::new(options.clone()));
        PortMultiplexer::new(Arc::new(RecipientResolver::new(host, workers, options)))
    }

    fn port_of(delivery: &Delivery) -> PortId {
        serde_json::from_value(delivery.payload["portId"].clone()).expect("portId")
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_messages_before_resolution_arrive_in_order() {
        let host = ScriptedHost::new();
        let gate = host.gate_worker_start();
        let mut worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let ports = multiplexer(Arc::clone(&host));

        let initiator = TestContext::frame("abc");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        ports.post_message(port_id, &initiator.endpoint, json!({ "n": 1 })).expect("post");
        ports.post_message(port_id, &initiator.endpoint, json!({ "n": 2 })).expect("post");

        settle().await;
        assert!(worker.drain().is_empty());

        gate.notify_one();

        let connect = worker.next().await;
        assert_eq!(connect.channel, CHANNEL_PORT_CONNECT);
        assert_eq!(connect.payload["name"], "chan");
        assert_eq!(port_of(&connect), port_id);

        let first = worker.next().await;
        assert_eq!(first.channel, CHANNEL_PORT_MESSAGE);
        assert_eq!(first.payload["message"], json!({ "n": 1 }));
        let second = worker.next().await;
        assert_eq!(second.payload["message"], json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn test_responder_reply_reaches_initiator() {
        let host = ScriptedHost::new();
        let mut worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let ports = multiplexer(host);

        let mut initiator = TestContext::frame("abc");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        assert_eq!(worker.next().await.channel, CHANNEL_PORT_CONNECT);

        ports.post_message(port_id, &worker.endpoint, json!("hi")).expect("post");
        let delivery = initiator.next().await;
        assert_eq!(delivery.channel, CHANNEL_PORT_MESSAGE);
        assert_eq!(delivery.payload["message"], "hi");
    }

    #[tokio::test]
    async fn test_disconnect_twice_notifies_once() {
        let host = ScriptedHost::new();
        let mut worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let ports = multiplexer(host);

        let initiator = TestContext::frame("abc");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        assert_eq!(worker.next().await.channel, CHANNEL_PORT_CONNECT);

        assert!(ports.disconnect(port_id, &initiator.endpoint));
        assert!(!ports.disconnect(port_id, &initiator.endpoint));
        assert!(!ports.is_open(port_id));

        let disconnect = worker.next().await;
        assert_eq!(disconnect.channel, CHANNEL_PORT_DISCONNECT);
        settle().await;
        assert!(worker.drain().is_empty());

        let err = ports.post_message(port_id, &initiator.endpoint, json!(1)).unwrap_err();
        assert!(matches!(err, Error::PortNotFound { .. }));
    }

    #[tokio::test]
    async fn test_responder_disconnect_notifies_initiator() {
        let host = ScriptedHost::new();
        let mut worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let ports = multiplexer(host);

        let mut initiator = TestContext::frame("abc");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        worker.next().await;

        assert!(ports.disconnect(port_id, &worker.endpoint));
        let delivery = initiator.next().await;
        assert_eq!(delivery.channel, CHANNEL_PORT_DISCONNECT);
        assert!(delivery.payload.get("error").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_responder_disconnects_initiator() {
        let ports = multiplexer(ScriptedHost::new());
        let mut initiator = TestContext::frame("abc");

        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        let delivery = initiator.next().await;

        assert_eq!(delivery.channel, CHANNEL_PORT_DISCONNECT);
        assert_eq!(delivery.payload["error"], NO_RECEIVER_ERROR);
        assert!(!ports.is_open(port_id));
    }

    #[tokio::test]
    async fn test_restarted_worker_is_re_resolved() {
        let host = ScriptedHost::new();
        let mut first = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, first.endpoint.clone());
        let ports = multiplexer(Arc::clone(&host));

        let initiator = TestContext::frame("abc");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        assert_eq!(first.next().await.channel, CHANNEL_PORT_CONNECT);

        first.endpoint.destroy();
        let mut second = TestContext::worker("abc", 2);
        host.set_worker(SCOPE, second.endpoint.clone());

        ports.post_message(port_id, &initiator.endpoint, json!("after restart")).expect("post");

        let connect = second.next().await;
        assert_eq!(connect.channel, CHANNEL_PORT_CONNECT);
        let message = second.next().await;
        assert_eq!(message.payload["message"], "after restart");
        assert!(ports.is_open(port_id));
    }

    #[tokio::test]
    async fn test_initiator_destruction_closes_port() {
        let host = ScriptedHost::new();
        let mut worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let ports = multiplexer(host);

        let initiator = TestContext::frame("abc");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        worker.next().await;

        initiator.endpoint.destroy();
        assert!(!ports.is_open(port_id));
        let delivery = worker.next().await;
        assert_eq!(delivery.channel, CHANNEL_PORT_DISCONNECT);
    }

    #[tokio::test]
    async fn test_frame_responder_destruction_closes_port() {
        let host = ScriptedHost::new();
        let popup = TestContext::frame("abc");
        host.set_live_context("abc", popup.endpoint.clone());
        let ports = multiplexer(host);

        let mut initiator = TestContext::frame("other");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        settle().await;
        assert!(ports.is_open(port_id));

        popup.endpoint.destroy();
        assert!(!ports.is_open(port_id));
        assert_eq!(initiator.next().await.channel, CHANNEL_PORT_DISCONNECT);
    }

    #[tokio::test]
    async fn test_sweep_prunes_unobserved_dead_initiator() {
        let host = ScriptedHost::new();
        let mut worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let ports = multiplexer(host);

        let TestContext { endpoint, rx } = TestContext::frame("abc");
        let port_id = ports.open_port(&endpoint, OwnerId::new("abc"), "chan");
        worker.next().await;

        // Context vanished without a destruction signal
        drop(rx);
        assert!(ports.is_open(port_id));

        assert_eq!(ports.sweep(), 1);
        assert!(!ports.is_open(port_id));
        assert_eq!(worker.next().await.channel, CHANNEL_PORT_DISCONNECT);
        assert_eq!(ports.sweep(), 0);
    }

    #[tokio::test]
    async fn test_non_party_cannot_post() {
        let host = ScriptedHost::new();
        let worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let ports = multiplexer(host);

        let initiator = TestContext::frame("abc");
        let stranger = TestContext::frame("zzz");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");

        let err = ports.post_message(port_id, &stranger.endpoint, json!(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(!ports.disconnect(port_id, &stranger.endpoint));
        assert!(ports.is_open(port_id));
    }

    #[tokio::test]
    async fn test_sibling_frame_is_not_a_party() {
        let host = ScriptedHost::new();
        let mut worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let ports = multiplexer(host);

        let initiator = TestContext::frame("abc");
        let sibling = TestContext::frame("abc");
        let port_id = ports.open_port(&initiator.endpoint, OwnerId::new("abc"), "chan");
        assert_eq!(worker.next().await.channel, CHANNEL_PORT_CONNECT);

        let err = ports.post_message(port_id, &sibling.endpoint, json!(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(!ports.disconnect(port_id, &sibling.endpoint));
        assert!(ports.is_open(port_id));
    }

    #[tokio::test]
    async fn test_worker_port_to_own_owner_reaches_popup() {
        let host = ScriptedHost::new();
        let mut popup = TestContext::frame("abc");
        host.set_live_context("abc", popup.endpoint.clone());
        let options = RouterOptions::new();
        let workers = Arc::new(WorkerTracker::new(options.clone()));
        let ports = PortMultiplexer::new(Arc::new(RecipientResolver::new(host, Arc::clone(&workers), options)));

        let mut worker = TestContext::worker("abc", 1);
        workers.observe(
            crate::worker::WorkerTransition::new(
                crate::identifiers::WorkerInstanceId::new(1),
                SCOPE,
                crate::worker::WorkerStatus::Running,
            )
            .with_endpoint(worker.endpoint.clone()),
        );

        let port_id = ports.open_port(&worker.endpoint, OwnerId::new("abc"), "chan");
        ports.post_message(port_id, &worker.endpoint, json!("hello")).expect("post");

        let connect = popup.next().await;
        assert_eq!(connect.channel, CHANNEL_PORT_CONNECT);
        let message = popup.next().await;
        assert_eq!(message.channel, CHANNEL_PORT_MESSAGE);
        assert_eq!(message.payload["message"], "hello");

        ports.post_message(port_id, &popup.endpoint, json!("back")).expect("reply");
        let reply = worker.next().await;
        assert_eq!(reply.channel, CHANNEL_PORT_MESSAGE);
        assert_eq!(reply.payload["message"], "back");
        assert!(worker.drain().is_empty());
    }
}

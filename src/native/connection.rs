//! One native helper connection.
//!
//! # State Machine
//!
//! ```text
//! Created ──► ResolvingConfig ──┬──► Disallowed          (terminal)
//!                               ├──► NotFound            (terminal)
//!                               └──► Spawning ──► Connected ──► Closed
//! ```
//!
//! Messages posted before `Connected` are queued and flushed in FIFO order
//! exactly once when the helper is up. Process exit, spawn failure, and
//! [`NativeConnection::destroy`] all end in `Closed`, after which every
//! subscriber receives a single [`NativeEvent::Disconnected`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::ChildStdout;
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, trace, warn};

use crate::error::{Error, HelperFailure, Result};
use crate::identifiers::ConnectionId;

use super::framing::{read_frame, write_frame};
use super::manifest::HostLookup;
use super::process::ProcessGuard;

// ============================================================================
// Types
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started yet.
    Created,
    /// Looking up the helper descriptor.
    ResolvingConfig,
    /// Origin not allowed by the descriptor.
    Disallowed,
    /// No usable descriptor or executable.
    NotFound,
    /// Starting the helper process.
    Spawning,
    /// Helper is running; messages flow.
    Connected,
    /// Torn down.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for states the connection never leaves.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disallowed | Self::NotFound | Self::Closed)
    }
}

/// Something a helper connection reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    /// A decoded message from the helper.
    Message(Value),
    /// The connection ended; `None` for an explicit destroy.
    Disconnected(Option<HelperFailure>),
}

/// Why the read loop stopped.
enum PumpEnd {
    Destroyed,
    /// Stdout reached EOF; the helper may still be reading stdin.
    OutputClosed,
    Failed(HelperFailure),
}

enum Outbound {
    Queued(VecDeque<Value>),
    Open(mpsc::UnboundedSender<Value>),
    Closed,
}

// ============================================================================
// NativeConnection
// ============================================================================

/// Connection to one native helper process.
pub struct NativeConnection {
    id: ConnectionId,
    application: String,
    origin: String,
    outbound: Mutex<Outbound>,
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<NativeEvent>>>>,
    state: watch::Sender<ConnectionState>,
    shutdown: Notify,
}

impl fmt::Debug for NativeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeConnection")
            .field("id", &self.id)
            .field("application", &self.application)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// NativeConnection - Constructor
// ============================================================================

impl NativeConnection {
    /// Creates a connection in the `Created` state.
    ///
    /// Nothing happens until [`start`](Self::start); subscribe first to
    /// observe every event.
    #[must_use]
    pub fn new(application: impl Into<String>, origin: impl Into<String>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Created);
        Arc::new(Self {
            id: ConnectionId::next(),
            application: application.into(),
            origin: origin.into(),
            outbound: Mutex::new(Outbound::Queued(VecDeque::new())),
            subscribers: Mutex::new(Some(Vec::new())),
            state,
            shutdown: Notify::new(),
        })
    }

    /// Resolves, spawns, and runs the helper in the background.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(self: &Arc<Self>, lookup: Arc<HostLookup>) {
        let connection = Arc::clone(self);
        tokio::spawn(async move { connection.run(&lookup).await });
    }
}

// ============================================================================
// NativeConnection - Public API
// ============================================================================

impl NativeConnection {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the helper name.
    #[inline]
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribes to helper messages and the final disconnect.
    ///
    /// After the connection closed the returned stream is already ended.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<NativeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.push(tx);
        }
        rx
    }

    /// Sends `message` to the helper, queueing it until connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the connection is closed.
    pub fn post(&self, message: Value) -> Result<()> {
        match &mut *self.outbound.lock() {
            Outbound::Queued(queue) => {
                queue.push_back(message);
                trace!(connection = %self.id, queued = queue.len(), "Message queued");
                Ok(())
            }
            Outbound::Open(tx) => tx.send(message).map_err(|_| Error::ConnectionClosed),
            Outbound::Closed => Err(Error::ConnectionClosed),
        }
    }

    /// Tears the connection down.
    ///
    /// Returns `false` if it was already closed.
    pub fn destroy(&self) -> bool {
        {
            let mut outbound = self.outbound.lock();
            if matches!(*outbound, Outbound::Closed) {
                return false;
            }
            *outbound = Outbound::Closed;
        }
        debug!(connection = %self.id, "Native connection destroy requested");
        self.shutdown.notify_one();
        true
    }
}

// ============================================================================
// NativeConnection - Lifecycle
// ============================================================================

impl NativeConnection {
    fn is_closing(&self) -> bool {
        matches!(*self.outbound.lock(), Outbound::Closed)
    }

    async fn run(self: Arc<Self>, lookup: &HostLookup) {
        self.state.send_replace(ConnectionState::ResolvingConfig);

        let resolved = tokio::select! {
            resolved = lookup.resolve(&self.application, &self.origin) => resolved,
            () = self.shutdown.notified() => {
                self.finish(ConnectionState::Closed, None);
                return;
            }
        };

        let host = match resolved {
            Ok(host) => host,
            Err(failure) => {
                debug!(connection = %self.id, application = %self.application, %failure, "Native host unavailable");
                let state = match failure {
                    HelperFailure::Disallowed => ConnectionState::Disallowed,
                    _ => ConnectionState::NotFound,
                };
                self.finish(state, Some(failure));
                return;
            }
        };

        if self.is_closing() {
            self.finish(ConnectionState::Closed, None);
            return;
        }

        self.state.send_replace(ConnectionState::Spawning);
        let (mut guard, pipes) = match ProcessGuard::spawn(&host.executable, &self.origin) {
            Ok(spawned) => spawned,
            Err(failure) => {
                warn!(connection = %self.id, %failure, "Native host spawn failed");
                self.finish(ConnectionState::Closed, Some(failure));
                return;
            }
        };

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(self.id, pipes.stdin, writer_rx));

        if !self.open(writer_tx) {
            guard.kill().await;
            self.finish(ConnectionState::Closed, None);
            return;
        }

        debug!(connection = %self.id, pid = guard.pid(), "Native connection established");
        let failure = match self.pump(pipes.stdout).await {
            PumpEnd::Destroyed => None,
            PumpEnd::Failed(failure) => Some(failure),
            PumpEnd::OutputClosed => self.await_exit(&mut guard).await,
        };

        guard.kill().await;
        self.finish(ConnectionState::Closed, failure);
    }

    /// Flushes the queue into the writer and switches to `Connected`.
    ///
    /// Returns `false` if the connection was destroyed meanwhile.
    fn open(&self, writer: mpsc::UnboundedSender<Value>) -> bool {
        let mut outbound = self.outbound.lock();
        let queue = match &mut *outbound {
            Outbound::Queued(queue) => std::mem::take(queue),
            Outbound::Open(_) | Outbound::Closed => return false,
        };

        let flushed = queue.len();
        for message in queue {
            let _ = writer.send(message);
        }
        *outbound = Outbound::Open(writer);
        drop(outbound);

        trace!(connection = %self.id, flushed, "Queued messages flushed");
        self.state.send_replace(ConnectionState::Connected);
        true
    }

    /// Reads frames until the helper closes its output, fails, or the
    /// connection is destroyed.
    async fn pump(&self, mut stdout: ChildStdout) -> PumpEnd {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.notified() => return PumpEnd::Destroyed,
                frame = read_frame(&mut stdout) => match frame {
                    Ok(Some(message)) => self.emit(NativeEvent::Message(message)),
                    // Destroy closes stdin, so the helper may exit first
                    _ if self.is_closing() => return PumpEnd::Destroyed,
                    Ok(None) => {
                        debug!(connection = %self.id, "Native host closed its output");
                        return PumpEnd::OutputClosed;
                    }
                    Err(e) => {
                        warn!(connection = %self.id, error = %e, "Native host stream failed");
                        return PumpEnd::Failed(HelperFailure::Exited(e.to_string()));
                    }
                }
            }
        }
    }

    /// Keeps the connection open until the helper exits or it is destroyed.
    ///
    /// Queued writes keep draining meanwhile.
    async fn await_exit(&self, guard: &mut ProcessGuard) -> Option<HelperFailure> {
        tokio::select! {
            biased;
            () = self.shutdown.notified() => None,
            status = guard.wait() => {
                if self.is_closing() {
                    None
                } else {
                    Some(HelperFailure::Exited(status))
                }
            }
        }
    }

    fn emit(&self, event: NativeEvent) {
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Enters a terminal state and notifies subscribers exactly once.
    fn finish(&self, state: ConnectionState, failure: Option<HelperFailure>) {
        *self.outbound.lock() = Outbound::Closed;
        self.state.send_replace(state);

        let Some(subscribers) = self.subscribers.lock().take() else {
            return;
        };
        for tx in subscribers {
            let _ = tx.send(NativeEvent::Disconnected(failure.clone()));
        }
        debug!(connection = %self.id, ?state, "Native connection finished");
    }
}

/// Writes queued messages to the helper's stdin in order.
async fn run_writer(
    id: ConnectionId,
    mut stdin: tokio::process::ChildStdin,
    mut rx: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_frame(&mut stdin, &message).await {
            warn!(connection = %id, error = %e, "Write to native host failed");
            break;
        }
    }
    trace!(connection = %id, "Native writer finished");
}

// ============================================================================
// Tests
// ============================================================================

//! Test fixtures: recording contexts and a scripted host.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{Notify, mpsc};

use crate::error::{Error, Result};
use crate::host::Host;
use crate::identifiers::{OwnerId, SessionId, WorkerInstanceId};
use crate::transport::{ChannelTransport, Delivery, Endpoint};

// ============================================================================
// TestContext
// ============================================================================

/// An endpoint paired with the receiver of everything sent to it.
pub(crate) struct TestContext {
    pub endpoint: Endpoint,
    pub rx: mpsc::UnboundedReceiver<Delivery>,
}

impl TestContext {
    pub fn frame(owner: &str) -> Self {
        Self::frame_in(owner, SessionId::default())
    }

    pub fn frame_in(owner: &str, session: SessionId) -> Self {
        let (transport, rx) = ChannelTransport::new();
        Self {
            endpoint: Endpoint::frame(Some(OwnerId::new(owner)), session, transport),
            rx,
        }
    }

    pub fn worker(owner: &str, instance: u64) -> Self {
        let (transport, rx) = ChannelTransport::new();
        Self {
            endpoint: Endpoint::worker(
                OwnerId::new(owner),
                WorkerInstanceId::new(instance),
                SessionId::default(),
                transport,
            ),
            rx,
        }
    }

    /// Returns everything delivered so far.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(delivery) = self.rx.try_recv() {
            out.push(delivery);
        }
        out
    }

    /// Returns deliveries on one channel.
    pub fn drain_channel(&mut self, channel: &str) -> Vec<Delivery> {
        self.drain()
            .into_iter()
            .filter(|d| d.channel == channel)
            .collect()
    }

    /// Waits for the next delivery.
    pub async fn next(&mut self) -> Delivery {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("delivery within 5s")
            .expect("transport open")
    }
}

// ============================================================================
// ScriptedHost
// ============================================================================

/// Host whose answers are set up by the test.
#[derive(Default)]
pub(crate) struct ScriptedHost {
    owners: Mutex<FxHashSet<OwnerId>>,
    permissions: Mutex<FxHashSet<(OwnerId, String)>>,
    workers: Mutex<FxHashMap<String, Endpoint>>,
    live: Mutex<FxHashMap<OwnerId, Endpoint>>,
    start_gate: Mutex<Option<Arc<Notify>>>,
    pub start_calls: AtomicUsize,
}

impl ScriptedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_owner(self: Arc<Self>, owner: &str) -> Arc<Self> {
        self.owners.lock().insert(OwnerId::new(owner));
        self
    }

    pub fn grant(self: Arc<Self>, owner: &str, permission: &str) -> Arc<Self> {
        self.permissions
            .lock()
            .insert((OwnerId::new(owner), permission.to_string()));
        self
    }

    /// Makes `start_worker(scope)` return `endpoint`.
    pub fn set_worker(&self, scope: &str, endpoint: Endpoint) {
        self.workers.lock().insert(scope.to_string(), endpoint);
    }

    /// Makes `find_live_context(owner)` return `endpoint`.
    pub fn set_live_context(&self, owner: &str, endpoint: Endpoint) {
        self.live.lock().insert(OwnerId::new(owner), endpoint);
    }

    /// Holds every `start_worker` call until the returned notify fires.
    pub fn gate_worker_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl Host for ScriptedHost {
    fn is_known_owner(&self, owner: &OwnerId) -> bool {
        self.owners.lock().contains(owner)
    }

    fn has_permission(&self, owner: &OwnerId, permission: &str) -> bool {
        self.permissions
            .lock()
            .contains(&(owner.clone(), permission.to_string()))
    }

    async fn start_worker(&self, scope: &str) -> Result<Endpoint> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.start_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.workers
            .lock()
            .get(scope)
            .cloned()
            .ok_or_else(|| Error::handler(format!("no worker registered for {scope}")))
    }

    fn find_live_context(&self, owner: &OwnerId) -> Option<Endpoint> {
        self.live.lock().get(owner).cloned()
    }
}

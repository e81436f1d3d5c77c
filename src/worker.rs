//! Background worker lifecycle tracking.
//!
//! The host reports every worker status change. The tracker keeps one
//! registration per worker instance, installs each [`WorkerHook`] exactly
//! once for it, and uninstalls them when that instance stops. A restarted
//! worker arrives with a new instance ID and installs from scratch, so hooks
//! neither accumulate across restarts nor stay bound to a dead instance.
//!
//! # Registration States
//!
//! ```text
//!   Starting/Running           hooks installed          Stopped
//! ───────────────────► Installing ─────────────► Installed ─────────► (removed)
//!                          │                                              ▲
//!                          └──────────── Stopped (uninstall on finish) ───┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::identifiers::{OwnerId, WorkerInstanceId};
use crate::router::RouterOptions;
use crate::transport::Endpoint;

// ============================================================================
// Types
// ============================================================================

/// Undoes one hook installation.
pub type Uninstall = Box<dyn FnOnce() + Send>;

/// Worker status reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Instance is starting.
    Starting,
    /// Instance is running.
    Running,
    /// Instance stopped; it will never run again.
    Stopped,
}

/// One status change of one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerTransition {
    /// Instance that changed status.
    pub instance: WorkerInstanceId,
    /// Registration scope, e.g. `chrome-extension://<owner>/`.
    pub scope: String,
    /// New status.
    pub status: WorkerStatus,
    /// Transport for the instance, once known.
    pub endpoint: Option<Endpoint>,
}

impl WorkerTransition {
    /// Creates a transition without an endpoint.
    #[must_use]
    pub fn new(instance: WorkerInstanceId, scope: impl Into<String>, status: WorkerStatus) -> Self {
        Self {
            instance,
            scope: scope.into(),
            status,
            endpoint: None,
        }
    }

    /// Attaches the instance's endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

/// A tracked worker instance as seen by hooks.
#[derive(Debug, Clone)]
pub struct WorkerInstance {
    /// Instance ID.
    pub id: WorkerInstanceId,
    /// Owning extension.
    pub owner: OwnerId,
    /// Registration scope.
    pub scope: String,
    /// Transport, if the host supplied one.
    pub endpoint: Option<Endpoint>,
}

// ============================================================================
// WorkerHook
// ============================================================================

/// Per-instance installation performed by the tracker.
pub trait WorkerHook: Send + Sync {
    /// Installs for `worker`, returning how to undo it.
    fn install(&self, worker: &WorkerInstance) -> Option<Uninstall>;
}

impl<F> WorkerHook for F
where
    F: Fn(&WorkerInstance) -> Option<Uninstall> + Send + Sync,
{
    fn install(&self, worker: &WorkerInstance) -> Option<Uninstall> {
        self(worker)
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Registration record keyed by instance ID.
enum Registration {
    /// Hooks are being installed outside the lock.
    Installing {
        worker: WorkerInstance,
        seq: u64,
        stop_requested: bool,
    },
    /// Hooks installed.
    Installed {
        worker: WorkerInstance,
        seq: u64,
        uninstallers: Vec<Uninstall>,
    },
}

impl Registration {
    fn worker(&self) -> &WorkerInstance {
        match self {
            Self::Installing { worker, .. } | Self::Installed { worker, .. } => worker,
        }
    }

    fn worker_mut(&mut self) -> &mut WorkerInstance {
        match self {
            Self::Installing { worker, .. } | Self::Installed { worker, .. } => worker,
        }
    }

    fn seq(&self) -> u64 {
        match self {
            Self::Installing { seq, .. } | Self::Installed { seq, .. } => *seq,
        }
    }
}

#[derive(Default)]
struct TrackerState {
    registrations: FxHashMap<WorkerInstanceId, Registration>,
    next_seq: u64,
}

// ============================================================================
// WorkerTracker
// ============================================================================

/// Tracks worker instances within one scope prefix.
pub struct WorkerTracker {
    options: RouterOptions,
    hooks: RwLock<Vec<Arc<dyn WorkerHook>>>,
    state: Mutex<TrackerState>,
}

impl fmt::Debug for WorkerTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTracker")
            .field("scope_prefix", &self.options.scope_prefix())
            .field("hooks", &self.hooks.read().len())
            .field("instances", &self.instance_count())
            .finish()
    }
}

impl WorkerTracker {
    /// Creates a tracker for the scheme configured in `options`.
    #[must_use]
    pub fn new(options: RouterOptions) -> Self {
        Self {
            options,
            hooks: RwLock::new(Vec::new()),
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Adds a hook, installing it into every instance already registered.
    pub fn add_hook(&self, hook: Arc<dyn WorkerHook>) {
        self.hooks.write().push(Arc::clone(&hook));

        let workers: Vec<WorkerInstance> = {
            let state = self.state.lock();
            state
                .registrations
                .values()
                .filter(|r| matches!(r, Registration::Installed { .. }))
                .map(|r| r.worker().clone())
                .collect()
        };

        for worker in workers {
            if let Some(uninstall) = hook.install(&worker) {
                let mut state = self.state.lock();
                match state.registrations.get_mut(&worker.id) {
                    Some(Registration::Installed { uninstallers, .. }) => uninstallers.push(uninstall),
                    _ => {
                        drop(state);
                        uninstall();
                    }
                }
            }
        }
    }

    /// Applies one status change.
    ///
    /// Returns `true` if the change installed or removed a registration.
    pub fn observe(&self, transition: WorkerTransition) -> bool {
        let Some(owner) = self.options.owner_of_scope(&transition.scope) else {
            trace!(scope = %transition.scope, "Ignoring worker outside scope prefix");
            return false;
        };

        match transition.status {
            WorkerStatus::Starting | WorkerStatus::Running => self.register(owner, transition),
            WorkerStatus::Stopped => self.unregister(transition.instance),
        }
    }

    fn register(&self, owner: OwnerId, transition: WorkerTransition) -> bool {
        let worker = {
            let mut state = self.state.lock();
            if let Some(existing) = state.registrations.get_mut(&transition.instance) {
                if let Some(endpoint) = transition.endpoint {
                    existing.worker_mut().endpoint = Some(endpoint);
                }
                trace!(instance = %transition.instance, "Worker already registered");
                return false;
            }

            let worker = WorkerInstance {
                id: transition.instance,
                owner,
                scope: transition.scope,
                endpoint: transition.endpoint,
            };
            let seq = state.next_seq;
            state.next_seq += 1;
            state.registrations.insert(
                worker.id,
                Registration::Installing {
                    worker: worker.clone(),
                    seq,
                    stop_requested: false,
                },
            );
            worker
        };

        let hooks: Vec<Arc<dyn WorkerHook>> = self.hooks.read().clone();
        let uninstallers: Vec<Uninstall> = hooks.iter().filter_map(|h| h.install(&worker)).collect();

        let mut state = self.state.lock();
        match state.registrations.remove(&worker.id) {
            Some(Registration::Installing {
                worker: current,
                seq,
                stop_requested: false,
            }) => {
                state.registrations.insert(
                    worker.id,
                    Registration::Installed {
                        worker: current,
                        seq,
                        uninstallers,
                    },
                );
                debug!(instance = %worker.id, owner = %worker.owner, hooks = hooks.len(), "Worker hooks installed");
            }
            _ => {
                drop(state);
                debug!(instance = %worker.id, "Worker stopped during install");
                uninstallers.into_iter().for_each(|uninstall| uninstall());
            }
        }
        true
    }

    fn unregister(&self, instance: WorkerInstanceId) -> bool {
        let uninstallers = {
            let mut state = self.state.lock();
            match state.registrations.get_mut(&instance) {
                None => {
                    trace!(%instance, "Stop for unknown worker");
                    return false;
                }
                Some(Registration::Installing { stop_requested, .. }) => {
                    *stop_requested = true;
                    return true;
                }
                Some(Registration::Installed { .. }) => {}
            }

            match state.registrations.remove(&instance) {
                Some(Registration::Installed { uninstallers, .. }) => uninstallers,
                _ => Vec::new(),
            }
        };

        let count = uninstallers.len();
        uninstallers.into_iter().for_each(|uninstall| uninstall());
        debug!(%instance, hooks = count, "Worker hooks removed");
        true
    }

    /// Returns the most recently registered live worker for `owner`.
    #[must_use]
    pub fn active_worker(&self, owner: &OwnerId) -> Option<Endpoint> {
        let state = self.state.lock();
        state
            .registrations
            .values()
            .filter(|r| &r.worker().owner == owner)
            .filter_map(|r| {
                r.worker()
                    .endpoint
                    .as_ref()
                    .filter(|e| e.is_alive())
                    .map(|e| (r.seq(), e.clone()))
            })
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, endpoint)| endpoint)
    }

    /// Returns `true` if `instance` is registered.
    #[inline]
    #[must_use]
    pub fn is_registered(&self, instance: WorkerInstanceId) -> bool {
        self.state.lock().registrations.contains_key(&instance)
    }

    /// Returns the number of registered instances.
    #[inline]
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.state.lock().registrations.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

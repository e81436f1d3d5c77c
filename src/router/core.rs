//! Router composition root.
//!
//! [`Router::on_message`] is the single inbound entry point. Every call is
//! validated in a fixed order before its handler runs:
//!
//! | Step | Check | Error |
//! |------|-------|-------|
//! | 1 | handler registered | [`Error::UnknownHandler`] / [`Error::DuplicateHandler`] |
//! | 2 | same session, or handler allows remote calls | [`Error::RemoteNotAllowed`] |
//! | 3 | caller resolves to a known owner | [`Error::UnknownCaller`] |
//! | 4 | caller holds the required permission | [`Error::PermissionDenied`] |
//!
//! The router registers the built-in handlers in [`crate::protocol::handlers`]
//! on construction, so listeners, requests, ports, and native helpers are all
//! driven through the same entry point.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::host::Host;
use crate::identifiers::{ConnectionId, OwnerId, PortId};
use crate::messaging::{Correlator, PortMultiplexer, RecipientResolver};
use crate::native::{HostLookup, NativeBridge};
use crate::protocol::{NATIVE_MESSAGING_PERMISSION, ReplyEnvelope, SenderInfo, handlers};
use crate::transport::{Endpoint, EndpointKind};
use crate::worker::{WorkerHook, WorkerTracker, WorkerTransition};

use super::builder::RouterBuilder;
use super::handlers::{HandlerEvent, HandlerOptions, HandlerRegistry, optional_arg, required_arg};
use super::listeners::{Listener, ListenerRegistry, ListenerTarget};
use super::options::RouterOptions;

// ============================================================================
// Types
// ============================================================================

/// Snapshot of router bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    /// Registered handler names.
    pub handlers: usize,
    /// Registered listeners across all events.
    pub listeners: usize,
    /// Correlated requests awaiting replies.
    pub pending_requests: usize,
    /// Correlated requests that timed out so far.
    pub timed_out_requests: u64,
    /// Open ports.
    pub open_ports: usize,
    /// Tracked worker instances.
    pub worker_instances: usize,
    /// Bridged native helper connections.
    pub native_connections: usize,
}

pub(crate) struct RouterInner {
    options: RouterOptions,
    host: Arc<dyn Host>,
    handlers: HandlerRegistry,
    listeners: Arc<ListenerRegistry>,
    workers: Arc<WorkerTracker>,
    resolver: Arc<RecipientResolver>,
    correlator: Correlator,
    ports: Arc<PortMultiplexer>,
    native: Arc<NativeBridge>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// Router
// ============================================================================

/// Routes calls, events, requests, and ports between extension contexts.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("session", &self.inner.options.session)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Router - Constructor
// ============================================================================

impl Router {
    /// Creates a router builder.
    #[inline]
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Creates a router with validated options.
    ///
    /// Starts the periodic port sweep when called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` fail validation.
    pub fn new(host: Arc<dyn Host>, options: RouterOptions) -> Result<Self> {
        options.validate()?;

        let workers = Arc::new(WorkerTracker::new(options.clone()));
        let resolver = Arc::new(RecipientResolver::new(
            Arc::clone(&host),
            Arc::clone(&workers),
            options.clone(),
        ));
        let lookup = options
            .native_search_locations
            .clone()
            .map_or_else(HostLookup::platform_default, HostLookup::new);

        let inner = Arc::new(RouterInner {
            correlator: Correlator::new(options.request_timeout, options.max_pending_requests),
            ports: PortMultiplexer::new(Arc::clone(&resolver)),
            native: NativeBridge::new(lookup),
            handlers: HandlerRegistry::default(),
            listeners: ListenerRegistry::new(),
            sweeper: Mutex::new(None),
            options,
            host,
            workers,
            resolver,
        });

        register_builtins(&inner);

        let router = Self { inner };
        if Handle::try_current().is_ok() {
            router.spawn_port_sweeper();
        }

        debug!(session = %router.inner.options.session, "Router created");
        Ok(router)
    }
}

// ============================================================================
// Router - Handlers
// ============================================================================

impl Router {
    /// Registers `callback` under `name`.
    ///
    /// Returns `false` if the name was taken. The name then fails with
    /// [`Error::DuplicateHandler`] whenever it is invoked.
    pub fn handle<F, Fut>(&self, name: &str, callback: F, options: HandlerOptions) -> bool
    where
        F: Fn(HandlerEvent, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.inner.handlers.register(name, callback, options)
    }

    /// Validates and dispatches one inbound call.
    ///
    /// `caller_id` falls back to the endpoint's owner.
    ///
    /// # Errors
    ///
    /// Returns the first failing validation step's error, or whatever the
    /// handler returns.
    pub async fn on_message(
        &self,
        endpoint: &Endpoint,
        caller_id: Option<&str>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let inner = &self.inner;
        let (handler, options) = inner.handlers.lookup(name)?;

        if endpoint.session() != inner.options.session && !options.allow_remote {
            debug!(handler = name, session = %endpoint.session(), "Remote call rejected");
            return Err(Error::remote_not_allowed(name));
        }

        let caller = caller_id
            .map(OwnerId::new)
            .or_else(|| endpoint.owner().cloned());

        if options.requires_caller_context
            && !caller.as_ref().is_some_and(|c| inner.host.is_known_owner(c))
        {
            debug!(handler = name, caller = ?caller_id, "Unknown caller");
            return Err(Error::unknown_caller(caller.as_ref().map(OwnerId::as_str)));
        }

        if let Some(permission) = &options.required_permission {
            let Some(owner) = &caller else {
                return Err(Error::unknown_caller(None));
            };
            if !inner.host.has_permission(owner, permission) {
                debug!(handler = name, %owner, permission, "Permission denied");
                return Err(Error::permission_denied(owner.clone(), permission.clone()));
            }
        }

        trace!(handler = name, endpoint = %endpoint.id(), "Dispatching");
        let result = handler(HandlerEvent::new(endpoint.clone(), caller), args).await;
        if let Err(e) = &result {
            debug!(handler = name, error = %e, "Handler failed");
        }
        result
    }
}

// ============================================================================
// Router - Events
// ============================================================================

impl Router {
    /// Registers `endpoint` for `event` on behalf of `owner`.
    ///
    /// Worker endpoints register for their owner's worker, so the listener
    /// follows the worker across restarts. Returns `false` for duplicates.
    pub fn add_listener(&self, endpoint: &Endpoint, owner: OwnerId, event: &str) -> bool {
        let target = listener_target(endpoint, &owner);
        self.inner.listeners.add(event, target, owner)
    }

    /// Removes the listener `add_listener` created.
    pub fn remove_listener(&self, endpoint: &Endpoint, owner: &OwnerId, event: &str) -> bool {
        let target = listener_target(endpoint, owner);
        self.inner.listeners.remove(event, &target)
    }

    /// Delivers `event` to the listeners of `target_owner`, or to every
    /// listener if `None`.
    ///
    /// Failed deliveries are logged and never block the others. Returns the
    /// number of listeners reached.
    pub async fn send_event(&self, target_owner: Option<&OwnerId>, event: &str, args: Vec<Value>) -> usize {
        let listeners = self.inner.listeners.matching(event, target_owner);
        if listeners.is_empty() {
            trace!(event, "No listeners");
            return 0;
        }

        let payload = Value::Array(args);
        let deliveries = listeners
            .into_iter()
            .map(|listener| self.deliver(listener, event, payload.clone()));
        let delivered = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();

        trace!(event, delivered, "Event sent");
        delivered
    }

    /// Delivers `event` to every listener.
    pub async fn broadcast_event(&self, event: &str, args: Vec<Value>) -> usize {
        self.send_event(None, event, args).await
    }

    async fn deliver(&self, listener: Listener, event: &str, payload: Value) -> bool {
        let endpoint = match &listener.target {
            ListenerTarget::Frame(endpoint) => endpoint.clone(),
            ListenerTarget::Worker(owner) => match self.inner.resolver.wake_worker(owner).await {
                Some(endpoint) => endpoint,
                None => {
                    warn!(event, %owner, "Delivery failed: worker unavailable");
                    return false;
                }
            },
        };

        match endpoint.send(event, payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(event, owner = %listener.owner, error = %e, "Delivery failed");
                if endpoint.kind() == EndpointKind::Frame && !endpoint.is_alive() {
                    self.inner.listeners.remove_endpoint(endpoint.id());
                }
                false
            }
        }
    }
}

fn listener_target(endpoint: &Endpoint, owner: &OwnerId) -> ListenerTarget {
    match endpoint.kind() {
        EndpointKind::Frame => ListenerTarget::Frame(endpoint.clone()),
        EndpointKind::Worker => ListenerTarget::Worker(endpoint.owner().unwrap_or(owner).clone()),
    }
}

// ============================================================================
// Router - Requests and Ports
// ============================================================================

impl Router {
    /// Sends a correlated request from `from` to the best reachable context
    /// of `owner`. `from` itself is never chosen.
    ///
    /// Resolves to `None` if nobody is reachable or nobody answers in time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyPendingRequests`] when the pending cap is hit.
    pub async fn request(
        &self,
        from: &Endpoint,
        owner: &OwnerId,
        payload: Value,
        sender: SenderInfo,
    ) -> Result<Option<Value>> {
        let Some(endpoint) = self.inner.resolver.resolve(owner, Some(from)).await else {
            debug!(%owner, "Request has no recipient");
            return Ok(None);
        };
        self.inner.correlator.request(&endpoint, payload, sender).await
    }

    /// Resolves the pending request `reply.id` with `reply.result`.
    ///
    /// Returns `false` for unknown or already settled requests.
    pub fn reply(&self, reply: ReplyEnvelope) -> bool {
        self.inner.correlator.resolve(reply.id, reply.result)
    }

    /// Opens a port from `initiator` to `target`.
    pub fn open_port(&self, initiator: &Endpoint, target: OwnerId, name: &str) -> PortId {
        self.inner.ports.open_port(initiator, target, name)
    }

    /// Posts on a port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortNotFound`] for closed ports.
    pub fn post_message(&self, port_id: PortId, from: &Endpoint, message: Value) -> Result<()> {
        self.inner.ports.post_message(port_id, from, message)
    }

    /// Closes a port. Repeated calls return `false`.
    pub fn disconnect_port(&self, port_id: PortId, from: &Endpoint) -> bool {
        self.inner.ports.disconnect(port_id, from)
    }

    /// Prunes ports of destroyed endpoints now.
    pub fn sweep_ports(&self) -> usize {
        self.inner.ports.sweep()
    }

    /// Starts the periodic port sweep, replacing a running one.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn_port_sweeper(&self) {
        let handle = self.inner.ports.spawn_sweeper(self.inner.options.port_sweep_interval);
        if let Some(previous) = self.inner.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }
}

// ============================================================================
// Router - Native Helpers
// ============================================================================

impl Router {
    /// Opens a native helper connection owned by `endpoint`.
    pub fn connect_native(&self, endpoint: &Endpoint, owner: &OwnerId, application: &str) -> ConnectionId {
        let origin = self.inner.options.scope_for(owner);
        self.inner.native.connect(application, &origin, endpoint)
    }

    /// One-shot exchange with a native helper on behalf of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HelperUnavailable`] if the helper cannot be reached.
    pub async fn send_native_message(&self, owner: &OwnerId, application: &str, message: Value) -> Result<Value> {
        let origin = self.inner.options.scope_for(owner);
        self.inner
            .native
            .send_native_message(application, &origin, message)
            .await
    }

    /// Returns the native helper bridge.
    #[inline]
    #[must_use]
    pub fn native(&self) -> &Arc<NativeBridge> {
        &self.inner.native
    }
}

// ============================================================================
// Router - Workers
// ============================================================================

impl Router {
    /// Feeds a worker status change to the tracker.
    pub fn observe_worker(&self, transition: WorkerTransition) -> bool {
        self.inner.workers.observe(transition)
    }

    /// Installs `hook` into every current and future worker instance.
    pub fn add_worker_hook(&self, hook: Arc<dyn WorkerHook>) {
        self.inner.workers.add_hook(hook);
    }

    /// Returns the worker tracker.
    #[inline]
    #[must_use]
    pub fn workers(&self) -> &Arc<WorkerTracker> {
        &self.inner.workers
    }
}

// ============================================================================
// Router - Lifecycle
// ============================================================================

impl Router {
    /// Returns the router options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RouterOptions {
        &self.inner.options
    }

    /// Returns current bookkeeping counts.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let inner = &self.inner;
        RouterStats {
            handlers: inner.handlers.len(),
            listeners: inner.listeners.listener_count(),
            pending_requests: inner.correlator.pending_count(),
            timed_out_requests: inner.correlator.timed_out_count(),
            open_ports: inner.ports.port_count(),
            worker_instances: inner.workers.instance_count(),
            native_connections: inner.native.connection_count(),
        }
    }

    /// Stops the sweep, resolves pending requests with no response, and
    /// closes every port and helper connection.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        self.inner.correlator.fail_all();
        self.inner.ports.close_all();
        self.inner.native.destroy_all();
        debug!("Router shut down");
    }
}

// ============================================================================
// Built-in Handlers
// ============================================================================

fn register_builtins(inner: &Arc<RouterInner>) {
    let native = HandlerOptions::new().with_permission(NATIVE_MESSAGING_PERMISSION);

    builtin(inner, handlers::ADD_LISTENER, HandlerOptions::new(), add_listener);
    builtin(inner, handlers::REMOVE_LISTENER, HandlerOptions::new(), remove_listener);
    builtin(inner, handlers::SEND_MESSAGE, HandlerOptions::new(), send_message);
    builtin(inner, handlers::REPLY, HandlerOptions::new(), reply);
    builtin(inner, handlers::CONNECT, HandlerOptions::new(), connect);
    builtin(inner, handlers::PORT_POST_MESSAGE, HandlerOptions::new(), port_post_message);
    builtin(inner, handlers::PORT_DISCONNECT, HandlerOptions::new(), port_disconnect);
    builtin(inner, handlers::CONNECT_NATIVE, native.clone(), connect_native);
    builtin(inner, handlers::SEND_NATIVE_MESSAGE, native, send_native_message);
    builtin(inner, handlers::NATIVE_POST_MESSAGE, HandlerOptions::new(), native_post_message);
    builtin(inner, handlers::NATIVE_DISCONNECT, HandlerOptions::new(), native_disconnect);
}

/// Registers a handler that receives the router itself.
fn builtin<F, Fut>(inner: &Arc<RouterInner>, name: &str, options: HandlerOptions, handler: F)
where
    F: Fn(Router, HandlerEvent, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let weak = Arc::downgrade(inner);
    inner.handlers.register(
        name,
        move |event, args| {
            let call = weak
                .upgrade()
                .map(|inner| handler(Router { inner }, event, args));
            async move {
                match call {
                    Some(call) => call.await,
                    None => Err(Error::handler("router has shut down")),
                }
            }
        },
        options,
    );
}

async fn add_listener(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let name: String = required_arg(&args, 0, "eventName")?;
    let owner = event.require_caller()?.clone();
    Ok(Value::Bool(router.add_listener(&event.endpoint, owner, &name)))
}

async fn remove_listener(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let name: String = required_arg(&args, 0, "eventName")?;
    let owner = event.require_caller()?;
    Ok(Value::Bool(router.remove_listener(&event.endpoint, owner, &name)))
}

async fn send_message(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let target = target_owner(&event, &args)?;
    let message = args.get(1).cloned().unwrap_or(Value::Null);
    let reply = router.request(&event.endpoint, &target, message, event.sender_info()).await?;
    Ok(reply.unwrap_or(Value::Null))
}

/// Accepts `[requestId, result]` or a single `{id, result}` envelope.
async fn reply(router: Router, _event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let envelope = match args.first() {
        Some(Value::Object(_)) => required_arg::<ReplyEnvelope>(&args, 0, "reply")?,
        _ => ReplyEnvelope {
            id: required_arg(&args, 0, "requestId")?,
            result: args.get(1).cloned().unwrap_or(Value::Null),
        },
    };
    Ok(Value::Bool(router.reply(envelope)))
}

async fn connect(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let target = target_owner(&event, &args)?;
    let name: Option<String> = optional_arg(&args, 1, "name")?;
    let port_id = router.open_port(&event.endpoint, target, name.as_deref().unwrap_or_default());
    Ok(serde_json::to_value(port_id)?)
}

async fn port_post_message(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let port_id: PortId = required_arg(&args, 0, "portId")?;
    let message = args.get(1).cloned().unwrap_or(Value::Null);
    router.post_message(port_id, &event.endpoint, message)?;
    Ok(Value::Null)
}

async fn port_disconnect(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let port_id: PortId = required_arg(&args, 0, "portId")?;
    Ok(Value::Bool(router.disconnect_port(port_id, &event.endpoint)))
}

async fn connect_native(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let application: String = required_arg(&args, 0, "application")?;
    let owner = event.require_caller()?;
    let id = router.connect_native(&event.endpoint, owner, &application);
    Ok(serde_json::to_value(id)?)
}

async fn send_native_message(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let application: String = required_arg(&args, 0, "application")?;
    let message = args.get(1).cloned().unwrap_or(Value::Null);
    let owner = event.require_caller()?;
    router.send_native_message(owner, &application, message).await
}

async fn native_post_message(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let id: ConnectionId = required_arg(&args, 0, "connectionId")?;
    let message = args.get(1).cloned().unwrap_or(Value::Null);
    router.native().post(id, &event.endpoint, message)?;
    Ok(Value::Null)
}

async fn native_disconnect(router: Router, event: HandlerEvent, args: Vec<Value>) -> Result<Value> {
    let id: ConnectionId = required_arg(&args, 0, "connectionId")?;
    Ok(Value::Bool(router.native().disconnect(id, &event.endpoint)))
}

/// First argument, defaulting to the caller.
fn target_owner(event: &HandlerEvent, args: &[Value]) -> Result<OwnerId> {
    match optional_arg::<OwnerId>(args, 0, "targetOwner")? {
        Some(owner) => Ok(owner),
        None => event.require_caller().cloned(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::identifiers::{SessionId, WorkerInstanceId};
    use crate::protocol::{CHANNEL_PORT_CONNECT, CHANNEL_PORT_MESSAGE, CHANNEL_REQUEST, RequestEnvelope};
    use crate::testing::{ScriptedHost, TestContext};
    use crate::worker::WorkerStatus;

    const SCOPE: &str = "chrome-extension://abc/";

    fn router_with(host: Arc<ScriptedHost>) -> Router {
        Router::new(host, RouterOptions::new()).expect("router")
    }

    fn known_host() -> Arc<ScriptedHost> {
        ScriptedHost::new().with_owner("abc").with_owner("def")
    }

    fn echo(router: &Router, name: &str, options: HandlerOptions) {
        router.handle(name, |_event, args| async move { Ok(Value::Array(args)) }, options);
    }

    #[tokio::test]
    async fn test_dispatches_to_handler() {
        let router = router_with(known_host());
        echo(&router, "test.echo", HandlerOptions::new());
        let ctx = TestContext::frame("abc");

        let result = router
            .on_message(&ctx.endpoint, Some("abc"), "test.echo", vec![json!(1), json!("two")])
            .await
            .expect("dispatch");
        assert_eq!(result, json!([1, "two"]));
    }

    #[tokio::test]
    async fn test_unknown_handler() {
        let router = router_with(known_host());
        let ctx = TestContext::frame("abc");

        let err = router.on_message(&ctx.endpoint, Some("abc"), "nope", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownHandler { .. }));
        assert!(err.is_caller_error());
    }

    #[tokio::test]
    async fn test_validation_order_remote_before_caller() {
        let router = router_with(ScriptedHost::new());
        echo(&router, "test.local", HandlerOptions::new().with_permission("tabs"));
        let remote = TestContext::frame_in("ghost", SessionId::new(9));

        let err = router.on_message(&remote.endpoint, None, "test.local", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::RemoteNotAllowed { .. }));
    }

    #[tokio::test]
    async fn test_validation_order_caller_before_permission() {
        let router = router_with(ScriptedHost::new());
        echo(&router, "test.perm", HandlerOptions::new().with_permission("tabs"));
        let ctx = TestContext::frame("ghost");

        let err = router.on_message(&ctx.endpoint, None, "test.perm", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCaller { .. }));
    }

    #[tokio::test]
    async fn test_permission_denied_then_granted() {
        let host = known_host();
        let router = router_with(Arc::clone(&host));
        echo(&router, "test.perm", HandlerOptions::new().with_permission("tabs"));
        let ctx = TestContext::frame("abc");

        let err = router.on_message(&ctx.endpoint, None, "test.perm", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));

        let router = router_with(host.grant("abc", "tabs"));
        echo(&router, "test.perm", HandlerOptions::new().with_permission("tabs"));
        assert!(router.on_message(&ctx.endpoint, None, "test.perm", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_remote_allowed_without_caller() {
        let router = router_with(ScriptedHost::new());
        echo(
            &router,
            "test.open",
            HandlerOptions::new().with_allow_remote(true).with_caller_context(false),
        );
        let remote = TestContext::frame_in("ghost", SessionId::new(2));

        assert!(router.on_message(&remote.endpoint, None, "test.open", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails_only_when_invoked() {
        let router = router_with(known_host());
        echo(&router, "test.dup", HandlerOptions::new());
        echo(&router, "test.dup", HandlerOptions::new());
        echo(&router, "test.other", HandlerOptions::new());
        let ctx = TestContext::frame("abc");

        let err = router.on_message(&ctx.endpoint, None, "test.dup", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateHandler { .. }));
        assert!(router.on_message(&ctx.endpoint, None, "test.other", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let router = router_with(known_host());
        router.handle(
            "test.fail",
            |_, _| async { Err(Error::handler("No tab with id: 4")) },
            HandlerOptions::new(),
        );
        let ctx = TestContext::frame("abc");

        let err = router.on_message(&ctx.endpoint, None, "test.fail", vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "No tab with id: 4");
    }

    #[tokio::test]
    async fn test_listener_round_trip_through_builtins() {
        let router = router_with(known_host());
        let mut ctx = TestContext::frame("abc");

        let added = router
            .on_message(&ctx.endpoint, None, handlers::ADD_LISTENER, vec![json!("tabs.onCreated")])
            .await
            .expect("add");
        assert_eq!(added, json!(true));

        let owner = OwnerId::new("abc");
        assert_eq!(router.send_event(Some(&owner), "tabs.onCreated", vec![json!({ "id": 1 })]).await, 1);
        let delivery = ctx.next().await;
        assert_eq!(delivery.channel, "tabs.onCreated");
        assert_eq!(delivery.payload, json!([{ "id": 1 }]));

        router
            .on_message(&ctx.endpoint, None, handlers::REMOVE_LISTENER, vec![json!("tabs.onCreated")])
            .await
            .expect("remove");
        assert_eq!(router.send_event(Some(&owner), "tabs.onCreated", vec![]).await, 0);
        assert_eq!(router.stats().listeners, 0);
    }

    #[tokio::test]
    async fn test_send_event_is_scoped_to_owner() {
        let router = router_with(known_host());
        let mut abc = TestContext::frame("abc");
        let mut def = TestContext::frame("def");
        router.add_listener(&abc.endpoint, OwnerId::new("abc"), "e");
        router.add_listener(&def.endpoint, OwnerId::new("def"), "e");

        assert_eq!(router.send_event(Some(&OwnerId::new("def")), "e", vec![]).await, 1);
        assert!(abc.drain().is_empty());
        assert_eq!(def.drain().len(), 1);

        assert_eq!(router.broadcast_event("e", vec![]).await, 2);
    }

    #[tokio::test]
    async fn test_dead_listener_does_not_block_others() {
        let router = router_with(known_host());
        let TestContext { endpoint: dead, rx } = TestContext::frame("abc");
        let mut live = TestContext::frame("abc");
        router.add_listener(&dead, OwnerId::new("abc"), "e");
        router.add_listener(&live.endpoint, OwnerId::new("abc"), "e");

        drop(rx);
        assert_eq!(router.broadcast_event("e", vec![json!(1)]).await, 1);
        assert_eq!(live.drain().len(), 1);
        assert_eq!(router.stats().listeners, 1);
    }

    #[tokio::test]
    async fn test_worker_listener_follows_restart() {
        let router = router_with(known_host());
        let mut first = TestContext::worker("abc", 1);
        let mut second = TestContext::worker("abc", 2);

        router.observe_worker(
            WorkerTransition::new(WorkerInstanceId::new(1), SCOPE, WorkerStatus::Running)
                .with_endpoint(first.endpoint.clone()),
        );
        router
            .on_message(&first.endpoint, None, handlers::ADD_LISTENER, vec![json!("e")])
            .await
            .expect("add");

        router.observe_worker(WorkerTransition::new(WorkerInstanceId::new(1), SCOPE, WorkerStatus::Stopped));
        first.endpoint.destroy();
        router.observe_worker(
            WorkerTransition::new(WorkerInstanceId::new(2), SCOPE, WorkerStatus::Running)
                .with_endpoint(second.endpoint.clone()),
        );
        let again = router
            .on_message(&second.endpoint, None, handlers::ADD_LISTENER, vec![json!("e")])
            .await
            .expect("add");
        assert_eq!(again, json!(false));

        assert_eq!(router.broadcast_event("e", vec![]).await, 1);
        assert_eq!(second.drain_channel("e").len(), 1);
        assert!(first.drain_channel("e").is_empty());
    }

    #[tokio::test]
    async fn test_send_message_round_trip() {
        let host = known_host();
        let mut worker = TestContext::worker("def", 1);
        host.set_worker("chrome-extension://def/", worker.endpoint.clone());
        let router = router_with(host);
        let caller = TestContext::frame("abc");

        let call = {
            let router = router.clone();
            let endpoint = caller.endpoint.clone();
            tokio::spawn(async move {
                router
                    .on_message(&endpoint, None, handlers::SEND_MESSAGE, vec![json!("def"), json!({ "op": "ping" })])
                    .await
            })
        };

        let delivery = worker.next().await;
        assert_eq!(delivery.channel, CHANNEL_REQUEST);
        let envelope: RequestEnvelope = serde_json::from_value(delivery.payload).expect("envelope");
        assert_eq!(envelope.sender.owner, Some(OwnerId::new("abc")));

        router
            .on_message(
                &worker.endpoint,
                None,
                handlers::REPLY,
                vec![serde_json::to_value(envelope.id).expect("id"), json!("pong")],
            )
            .await
            .expect("reply");

        let result = call.await.expect("join").expect("send");
        assert_eq!(result, json!("pong"));
    }

    #[tokio::test]
    async fn test_worker_request_reaches_own_popup() {
        let host = known_host();
        let mut popup = TestContext::frame("abc");
        host.set_live_context("abc", popup.endpoint.clone());
        let router = router_with(host);
        let mut worker = TestContext::worker("abc", 1);
        router.observe_worker(
            WorkerTransition::new(WorkerInstanceId::new(1), SCOPE, WorkerStatus::Running)
                .with_endpoint(worker.endpoint.clone()),
        );

        let call = {
            let router = router.clone();
            let endpoint = worker.endpoint.clone();
            tokio::spawn(async move {
                router
                    .on_message(&endpoint, None, handlers::SEND_MESSAGE, vec![Value::Null, json!("status?")])
                    .await
            })
        };

        let delivery = popup.next().await;
        assert_eq!(delivery.channel, CHANNEL_REQUEST);
        let envelope: RequestEnvelope = serde_json::from_value(delivery.payload).expect("envelope");

        let settled = router
            .on_message(
                &popup.endpoint,
                None,
                handlers::REPLY,
                vec![json!({ "id": envelope.id, "result": "idle" })],
            )
            .await
            .expect("reply");
        assert_eq!(settled, json!(true));

        assert_eq!(call.await.expect("join").expect("send"), json!("idle"));
        assert!(worker.drain_channel(CHANNEL_REQUEST).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_without_reply_is_null() {
        let host = known_host();
        let worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let router = router_with(host);
        let caller = TestContext::frame("abc");

        let result = router
            .on_message(&caller.endpoint, None, handlers::SEND_MESSAGE, vec![Value::Null, json!(1)])
            .await
            .expect("send");
        assert_eq!(result, Value::Null);
        assert_eq!(router.stats().timed_out_requests, 1);
    }

    #[tokio::test]
    async fn test_send_message_to_unreachable_owner_is_null() {
        let router = router_with(known_host());
        let caller = TestContext::frame("abc");

        let result = router
            .on_message(&caller.endpoint, None, handlers::SEND_MESSAGE, vec![json!("def"), json!(1)])
            .await
            .expect("send");
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_port_through_builtins() {
        let host = known_host();
        let mut worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let router = router_with(host);
        let mut caller = TestContext::frame("abc");

        let port = router
            .on_message(&caller.endpoint, None, handlers::CONNECT, vec![Value::Null, json!("chan")])
            .await
            .expect("connect");
        router
            .on_message(&caller.endpoint, None, handlers::PORT_POST_MESSAGE, vec![port.clone(), json!({ "n": 1 })])
            .await
            .expect("post");

        assert_eq!(worker.next().await.channel, CHANNEL_PORT_CONNECT);
        let message = worker.next().await;
        assert_eq!(message.channel, CHANNEL_PORT_MESSAGE);
        assert_eq!(message.payload["message"], json!({ "n": 1 }));

        router
            .on_message(&worker.endpoint, None, handlers::PORT_POST_MESSAGE, vec![port.clone(), json!("back")])
            .await
            .expect("reply");
        assert_eq!(caller.next().await.payload["message"], "back");

        let closed = router
            .on_message(&caller.endpoint, None, handlers::PORT_DISCONNECT, vec![port.clone()])
            .await
            .expect("disconnect");
        assert_eq!(closed, json!(true));
        let again = router
            .on_message(&caller.endpoint, None, handlers::PORT_DISCONNECT, vec![port])
            .await
            .expect("disconnect again");
        assert_eq!(again, json!(false));
    }

    #[tokio::test]
    async fn test_connect_native_requires_permission() {
        let router = router_with(known_host());
        let ctx = TestContext::frame("abc");

        let err = router
            .on_message(&ctx.endpoint, None, handlers::CONNECT_NATIVE, vec![json!("com.example.host")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_invalid_argument() {
        let router = router_with(known_host());
        let ctx = TestContext::frame("abc");

        let err = router
            .on_message(&ctx.endpoint, None, handlers::ADD_LISTENER, vec![json!(42)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let host = known_host();
        let worker = TestContext::worker("abc", 1);
        host.set_worker(SCOPE, worker.endpoint.clone());
        let router = router_with(host);
        let mut caller = TestContext::frame("abc");

        let port_id = router.open_port(&caller.endpoint, OwnerId::new("abc"), "chan");
        assert_eq!(router.stats().open_ports, 1);

        router.shutdown();
        assert_eq!(router.stats().open_ports, 0);
        assert!(caller.drain().iter().any(|d| d.payload["portId"] == json!(port_id)));
    }
}

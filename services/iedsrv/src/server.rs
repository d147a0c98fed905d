//! Data server
//!
//! Owns the frozen model behind a single `parking_lot::Mutex` together with
//! the report engine and the access controller. The TCP accept loop, the
//! session tasks and the application update loop all go through that lock;
//! it is never held across an `.await`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use errors::{IedError, IedResult};
use iec61850_model::{FunctionalConstraint, IedModel, NodeId, Quality, Value};
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::access::{self, AccessController};
use crate::client::IedConnection;
use crate::config::{AccessPolicy, ServerConfig};
use crate::protocol;
use crate::report::{ReportEngine, ReportReceiver, SessionId, SubscriptionHandle};
use crate::session::{self, Session};

/// Everything guarded by the model lock
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) model: IedModel,
    pub(crate) reports: ReportEngine,
    pub(crate) access: AccessController,
}

/// Connected session as seen by the server
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
}

/// State shared between the server handle and its tasks
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<ServerState>,
    pub(crate) config: ServerConfig,
    sessions: Mutex<FxHashMap<SessionId, SessionInfo>>,
    next_session: AtomicU64,
    /// Cancelled by `stop()`; replaced afterwards so the server can restart
    shutdown: Mutex<CancellationToken>,
    /// Runtime seen by `new()` or `start()`, for timers requested off-runtime
    runtime: Mutex<Option<Handle>>,
}

impl Shared {
    /// Admit a new session, refusing it when `max_sessions` is reached
    pub(crate) fn register_session(&self, peer: &str) -> IedResult<SessionId> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.config.max_sessions {
            return Err(IedError::ConnectionFailed {
                endpoint: peer.to_string(),
                reason: format!("maximum of {} sessions reached", self.config.max_sessions),
            });
        }
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        sessions.insert(
            id,
            SessionInfo {
                id,
                peer: peer.to_string(),
                connected_at: Utc::now(),
            },
        );
        Ok(id)
    }

    pub(crate) fn unregister_session(&self, id: SessionId) {
        self.sessions.lock().remove(&id);
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.lock().clone()
    }

    /// Runtime for background timers: the caller's, else the server's
    pub(crate) fn runtime(&self) -> IedResult<Handle> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(handle);
        }
        self.runtime.lock().clone().ok_or_else(|| {
            IedError::Internal("no Tokio runtime available for background tasks".to_string())
        })
    }

    /// Periodic integrity reports for one subscription
    pub(crate) fn spawn_integrity(
        self: &Arc<Self>,
        runtime: &Handle,
        handle: SubscriptionHandle,
        period: Duration,
        token: CancellationToken,
    ) {
        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut state = shared.state.lock();
                        let ServerState { model, reports, .. } = &mut *state;
                        if !reports.integrity_report(model, handle) {
                            break;
                        }
                    }
                }
            }
            debug!("Integrity timer of {} stopped", handle);
        });
    }
}

struct Listener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// IEC 61850 data server
pub struct IedServer {
    shared: Arc<Shared>,
    listener: Mutex<Option<Listener>>,
}

impl IedServer {
    /// Validate and freeze `model` and build the server around it
    pub fn new(mut model: IedModel, config: ServerConfig) -> IedResult<Self> {
        config.validate()?;
        model.validate()?;
        model.freeze();
        info!(
            "Data model '{}' ready: {} nodes, {} logical devices",
            model.ied_name(),
            model.node_count(),
            model.devices().len()
        );

        let state = ServerState {
            access: AccessController::from_config(&config),
            reports: ReportEngine::new(config.report_queue_warn),
            model,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                config,
                sessions: Mutex::new(FxHashMap::default()),
                next_session: AtomicU64::new(1),
                shutdown: Mutex::new(CancellationToken::new()),
                runtime: Mutex::new(Handle::try_current().ok()),
            }),
            listener: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Bind the listener and start accepting sessions
    ///
    /// Port 0 binds an ephemeral port; the bound address is returned.
    pub async fn start(&self, port: u16) -> IedResult<SocketAddr> {
        if self.is_running() {
            return Err(IedError::AlreadyRunning);
        }

        let addr = self.shared.config.bind_addr(port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| IedError::Bind {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr()?;

        let mut slot = self.listener.lock();
        if slot.as_ref().is_some_and(|l| !l.task.is_finished()) {
            return Err(IedError::AlreadyRunning);
        }
        if let Ok(runtime) = Handle::try_current() {
            *self.shared.runtime.lock() = Some(runtime);
        }
        let token = self.shared.shutdown_token();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&self.shared), token));
        *slot = Some(Listener { local_addr, task });

        info!("IEC 61850 server listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Close the listener and every session; calling it again is a no-op
    pub async fn stop(&self) {
        let listener = self.listener.lock().take();
        let token = std::mem::replace(&mut *self.shared.shutdown.lock(), CancellationToken::new());
        token.cancel();

        if let Some(listener) = listener {
            if let Err(e) = listener.task.await {
                error!("Accept loop ended abnormally: {}", e);
            }
            info!("IEC 61850 server on {} stopped", listener.local_addr);
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|l| !l.task.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(|l| l.local_addr)
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.shared.sessions.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.state.lock().reports.len()
    }

    pub fn set_read_access_policy(&self, fc: FunctionalConstraint, policy: AccessPolicy) {
        self.shared.state.lock().access.set_read_policy(fc, policy);
    }

    pub fn set_write_access_policy(&self, fc: FunctionalConstraint, policy: AccessPolicy) {
        self.shared.state.lock().access.set_write_policy(fc, policy);
    }

    /// Take the model lock for a batch of application updates
    ///
    /// Client requests wait until the guard is dropped, so the batch is
    /// observed as a whole or not at all.
    pub fn lock_model(&self) -> ModelGuard<'_> {
        ModelGuard {
            state: self.shared.state.lock(),
        }
    }

    /// Resolve a basic attribute once for repeated updates
    pub fn attribute(&self, path: &str) -> IedResult<AttributeHandle> {
        let state = self.shared.state.lock();
        let id = state.model.resolve(path)?;
        let node = state.model.node(id);
        if !node.is_basic_attribute() {
            return Err(IedError::type_mismatch("basic data attribute", node.kind().as_str()));
        }
        Ok(AttributeHandle {
            id,
            path: Arc::from(state.model.path(id)),
        })
    }

    /// Open a session driven directly by the caller, without any transport
    pub fn open_session(&self, peer: &str) -> IedResult<(Session, ReportReceiver)> {
        Session::open(Arc::clone(&self.shared), peer)
    }

    /// Connect an in-process client
    ///
    /// The session runs the same connection task as a TCP session over an
    /// in-memory duplex stream.
    pub fn connect_local(&self) -> IedResult<IedConnection> {
        let runtime = self.shared.runtime()?;
        let (session, reports) = Session::open(Arc::clone(&self.shared), "local")?;
        let (client_io, server_io) = tokio::io::duplex(protocol::MAX_FRAME_LENGTH);
        runtime.spawn(session::serve(
            server_io,
            session,
            reports,
            self.shared.shutdown_token(),
            self.shared.config.idle_timeout_duration(),
        ));
        Ok(IedConnection::from_stream(client_io, "local"))
    }
}

impl Drop for IedServer {
    fn drop(&mut self) {
        self.shared.shutdown.lock().cancel();
        if let Some(listener) = self.listener.get_mut().take() {
            listener.task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, token: CancellationToken) {
    let idle_timeout = shared.config.idle_timeout_duration();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {},
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let (session, reports) = match Session::open(Arc::clone(&shared), &peer.to_string()) {
                        Ok(opened) => opened,
                        Err(e) => {
                            warn!("Refusing connection from {}: {}", peer, e);
                            continue;
                        },
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    info!("Session {} connected from {}", session.id(), peer);
                    connections.spawn(session::serve(
                        stream,
                        session,
                        reports,
                        token.clone(),
                        idle_timeout,
                    ));
                },
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                },
            },
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    debug!("Accept loop finished");
}

// ============================================================================
// Model guard
// ============================================================================

/// Resolved basic attribute, valid for the server that issued it
#[derive(Debug, Clone)]
pub struct AttributeHandle {
    id: NodeId,
    path: Arc<str>,
}

impl AttributeHandle {
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Anything that names an attribute of the model
pub trait AttributeLookup {
    fn lookup(&self, model: &IedModel) -> IedResult<NodeId>;
}

impl AttributeLookup for str {
    fn lookup(&self, model: &IedModel) -> IedResult<NodeId> {
        model.resolve(self)
    }
}

impl AttributeLookup for String {
    fn lookup(&self, model: &IedModel) -> IedResult<NodeId> {
        model.resolve(self)
    }
}

impl AttributeLookup for AttributeHandle {
    fn lookup(&self, model: &IedModel) -> IedResult<NodeId> {
        match model.get(self.id) {
            Some(node) if node.is_basic_attribute() => Ok(self.id),
            _ => Err(IedError::not_found(self.path.as_ref())),
        }
    }
}

impl<T: AttributeLookup + ?Sized> AttributeLookup for &T {
    fn lookup(&self, model: &IedModel) -> IedResult<NodeId> {
        (**self).lookup(model)
    }
}

/// Exclusive access to the model for application updates
///
/// Holding the guard blocks every session; keep batches short.
pub struct ModelGuard<'a> {
    state: MutexGuard<'a, ServerState>,
}

impl ModelGuard<'_> {
    pub fn model(&self) -> &IedModel {
        &self.state.model
    }

    pub fn read(&self, attribute: impl AttributeLookup) -> IedResult<Value> {
        let id = attribute.lookup(&self.state.model)?;
        self.state.model.read_value(id)
    }

    /// Store a value and run report evaluation; the type must match exactly
    pub fn update_value(
        &mut self,
        attribute: impl AttributeLookup,
        value: impl Into<Value>,
    ) -> IedResult<()> {
        let ServerState { model, reports, .. } = &mut *self.state;
        let id = attribute.lookup(model)?;
        access::store(model, reports, id, value.into())
    }

    pub fn update_timestamp(
        &mut self,
        attribute: impl AttributeLookup,
        time: DateTime<Utc>,
    ) -> IedResult<()> {
        self.update_value(attribute, Value::UtcTimestamp(time))
    }

    pub fn update_quality(&mut self, attribute: impl AttributeLookup, quality: Quality) -> IedResult<()> {
        self.update_value(attribute, Value::Quality(quality))
    }
}

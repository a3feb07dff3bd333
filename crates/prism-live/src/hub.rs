//! Live-update hub.
//!
//! One coordination task owns the table of connected clients. Everything
//! else reaches that table only through three channels: `register` (new
//! clients), `unregister` (departures, with a reason) and `broadcast`
//! (serialized messages). A separate read-mostly snapshot backs
//! [`LiveUpdateHub::connected_clients`].
//!
//! Admission happens before the table is involved: the origin is checked,
//! then a [`ConnectionSlot`] is taken against the global and per-IP caps.
//! The slot travels with the client and releases its capacity on drop, so a
//! failed upgrade or a disconnect can never leak a slot.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Utf8Bytes, WebSocketUpgrade};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use prism_config::HubConfig;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{self, Session};
use crate::error::{DisconnectReason, HubError, Result};
use crate::message::UpdateMessage;
use crate::origin::OriginValidator;
use crate::rate_limit::{RateLimiter, SlidingWindowLimiter};

/// Builds the per-client rate limiter.
pub type RateLimiterFactory = Arc<dyn Fn() -> Box<dyn RateLimiter> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Close signal shared by the hub and a client's reader/writer loops.
///
/// The first reason recorded wins; later calls only re-cancel.
#[derive(Debug, Default)]
pub struct ClientControl {
    token: CancellationToken,
    reason: Mutex<Option<DisconnectReason>>,
}

impl ClientControl {
    /// Request the connection be closed. Returns `true` if this call set the reason.
    pub fn close(&self, reason: DisconnectReason) -> bool {
        let first = {
            let mut current = self.reason.lock();
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        first
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<DisconnectReason> {
        *self.reason.lock()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// Public view of one connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedClient {
    pub id: ClientId,
    pub ip: IpAddr,
    pub origin: String,
    pub connected_at: DateTime<Utc>,
}

/// Counters since the hub started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub accepted: u64,
    pub rejected: u64,
    pub active: usize,
    /// Upgraded sockets whose reader/writer loops are still running.
    pub sessions: usize,
    pub broadcasts: u64,
    pub slow_consumer_disconnects: u64,
    pub rate_limit_disconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    broadcasts: AtomicU64,
    slow_consumer: AtomicU64,
    rate_limited: AtomicU64,
}

impl Counters {
    fn record_disconnect(&self, reason: DisconnectReason) {
        match reason {
            DisconnectReason::SlowConsumer => {
                self.slow_consumer.fetch_add(1, Ordering::Relaxed);
            }
            DisconnectReason::RateLimited => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

struct Shared {
    config: HubConfig,
    token: CancellationToken,
    active: AtomicUsize,
    sessions: AtomicUsize,
    per_ip: DashMap<IpAddr, usize>,
    counters: Counters,
    clients_view: RwLock<Vec<ConnectedClient>>,
}

/// Capacity held by one admitted connection. Released on drop.
pub struct ConnectionSlot {
    shared: Arc<Shared>,
    ip: IpAddr,
}

impl ConnectionSlot {
    fn acquire(shared: &Arc<Shared>, ip: IpAddr) -> Result<Self> {
        let limit = shared.config.max_connections;
        if shared
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < limit).then_some(active + 1)
            })
            .is_err()
        {
            return Err(HubError::TooManyConnections { limit });
        }

        let per_ip_limit = shared.config.max_connections_per_ip;
        let admitted = {
            let mut count = shared.per_ip.entry(ip).or_insert(0);
            if *count < per_ip_limit {
                *count += 1;
                true
            } else {
                false
            }
        };

        if !admitted {
            shared.active.fetch_sub(1, Ordering::AcqRel);
            shared.per_ip.remove_if(&ip, |_, count| *count == 0);
            return Err(HubError::TooManyConnectionsFromIp {
                ip,
                limit: per_ip_limit,
            });
        }

        Ok(Self {
            shared: Arc::clone(shared),
            ip,
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        if let Some(mut count) = self.shared.per_ip.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
        }
        self.shared.per_ip.remove_if(&self.ip, |_, count| *count == 0);
        self.shared.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot").field("ip", &self.ip).finish()
    }
}

/// Counts one running socket session until dropped.
struct SessionGuard {
    shared: Arc<Shared>,
}

impl SessionGuard {
    fn enter(shared: &Arc<Shared>) -> Self {
        shared.sessions.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.shared.sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A request that passed origin and capacity checks but is not yet registered.
#[derive(Debug)]
pub struct Admission {
    origin: String,
    ip: IpAddr,
    slot: ConnectionSlot,
}

impl Admission {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

/// The hub-side end of a registered client: its id, its outbound queue and
/// its close signal.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    outbound: mpsc::Receiver<Utf8Bytes>,
    control: Arc<ClientControl>,
}

impl ClientHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn control(&self) -> &Arc<ClientControl> {
        &self.control
    }

    /// Next queued message. `None` once the hub dropped the client.
    pub async fn recv(&mut self) -> Option<Utf8Bytes> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Utf8Bytes> {
        self.outbound.try_recv().ok()
    }

    pub(crate) fn into_parts(self) -> (ClientId, mpsc::Receiver<Utf8Bytes>, Arc<ClientControl>) {
        (self.id, self.outbound, self.control)
    }
}

struct ClientEntry {
    info: ConnectedClient,
    outbound: mpsc::Sender<Utf8Bytes>,
    control: Arc<ClientControl>,
    _slot: ConnectionSlot,
}

type Unregister = (ClientId, DisconnectReason);

pub struct LiveUpdateHub {
    shared: Arc<Shared>,
    validator: Arc<dyn OriginValidator>,
    rate_limiter: RateLimiterFactory,
    next_client_id: AtomicU64,
    register_tx: mpsc::UnboundedSender<ClientEntry>,
    unregister_tx: mpsc::UnboundedSender<Unregister>,
    broadcast_tx: mpsc::Sender<Utf8Bytes>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    shutdown: OnceCell<()>,
}

impl LiveUpdateHub {
    /// Start the coordination task on the current Tokio runtime, using a
    /// sliding-window rate limiter built from `config.rate_limit`.
    pub fn start(config: HubConfig, validator: Arc<dyn OriginValidator>) -> Arc<Self> {
        let rate_limit = config.rate_limit.clone();
        let factory: RateLimiterFactory =
            Arc::new(move || Box::new(SlidingWindowLimiter::from_config(&rate_limit)));
        Self::start_with_rate_limiter(config, validator, factory)
    }

    pub fn start_with_rate_limiter(
        config: HubConfig,
        validator: Arc<dyn OriginValidator>,
        rate_limiter: RateLimiterFactory,
    ) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_buffer.max(1));

        let shared = Arc::new(Shared {
            config,
            token: CancellationToken::new(),
            active: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            per_ip: DashMap::new(),
            counters: Counters::default(),
            clients_view: RwLock::new(Vec::new()),
        });

        let coordinator = tokio::spawn(coordinate(
            Arc::clone(&shared),
            register_rx,
            unregister_rx,
            unregister_tx.clone(),
            broadcast_rx,
        ));

        Arc::new(Self {
            shared,
            validator,
            rate_limiter,
            next_client_id: AtomicU64::new(1),
            register_tx,
            unregister_tx,
            broadcast_tx,
            coordinator: Mutex::new(Some(coordinator)),
            shutdown: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Check origin and connection caps without touching the socket.
    pub fn admit(&self, origin: Option<&str>, ip: IpAddr) -> Result<Admission> {
        let admission = self.check_admission(origin, ip);
        if let Err(err) = &admission {
            self.record_rejection(err, ip);
        }
        admission
    }

    fn check_admission(&self, origin: Option<&str>, ip: IpAddr) -> Result<Admission> {
        if self.shared.token.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }
        let origin = origin.ok_or(HubError::MissingOrigin)?;
        if !self.validator.is_allowed_origin(origin) {
            return Err(HubError::OriginNotAllowed(origin.to_string()));
        }
        let slot = ConnectionSlot::acquire(&self.shared, ip)?;
        Ok(Admission {
            origin: origin.to_string(),
            ip,
            slot,
        })
    }

    fn record_rejection(&self, err: &HubError, ip: IpAddr) {
        self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%ip, error = %err, "live-update connection rejected");
    }

    /// Register an admitted client with the coordination task.
    pub fn connect(&self, admission: Admission) -> Result<ClientHandle> {
        if self.shared.token.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }

        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let (outbound_tx, outbound_rx) = mpsc::channel(self.shared.config.outbound_queue.max(1));
        let control = Arc::new(ClientControl::default());
        let Admission { origin, ip, slot } = admission;

        let entry = ClientEntry {
            info: ConnectedClient {
                id,
                ip,
                origin,
                connected_at: Utc::now(),
            },
            outbound: outbound_tx,
            control: Arc::clone(&control),
            _slot: slot,
        };
        self.register_tx
            .send(entry)
            .map_err(|_| HubError::ShuttingDown)?;

        self.shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(client_id = %id, %ip, "live-update client connected");

        Ok(ClientHandle {
            id,
            outbound: outbound_rx,
            control,
        })
    }

    /// Admit, upgrade and serve one WebSocket request.
    ///
    /// Never panics on a malformed request: a non-upgrade request, a missing
    /// or disallowed origin and a full hub all become error responses.
    pub fn handle_connection(
        self: &Arc<Self>,
        upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
        headers: &HeaderMap,
        remote: SocketAddr,
    ) -> Response {
        let ip = remote.ip();
        let upgrade = match upgrade {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                self.record_rejection(&HubError::NotUpgrade(rejection.body_text()), ip);
                return rejection.into_response();
            }
        };

        // A non-UTF-8 origin is treated as present but disallowed.
        let origin = headers
            .get(header::ORIGIN)
            .map(|value| value.to_str().unwrap_or_default());
        let admission = match self.admit(origin, ip) {
            Ok(admission) => admission,
            Err(err) => return err.into_response(),
        };

        let hub = Arc::clone(self);
        upgrade
            .max_message_size(self.shared.config.max_message_bytes)
            .on_failed_upgrade(move |err| {
                tracing::debug!(%ip, error = %err, "WebSocket upgrade failed");
            })
            .on_upgrade(move |socket| async move {
                let _guard = SessionGuard::enter(&hub.shared);
                match hub.connect(admission) {
                    Ok(handle) => client::run(socket, hub.session(handle)).await,
                    Err(err) => tracing::debug!(%ip, error = %err, "dropping upgraded socket"),
                }
            })
    }

    pub(crate) fn session(&self, handle: ClientHandle) -> Session {
        let config = &self.shared.config;
        let max_missed_pings = config.max_missed_pings.max(1);
        Session {
            handle,
            limiter: (self.rate_limiter)(),
            unregister: self.unregister_tx.clone(),
            ping_interval: config.ping_interval(),
            max_missed_pings,
            idle_timeout: config.idle_timeout(),
            // A frame stuck this long would have failed the keep-alive anyway.
            write_timeout: config.ping_interval().saturating_mul(max_missed_pings),
        }
    }

    /// Queue a message for every connected client, waiting if the broadcast
    /// channel is full.
    pub async fn broadcast(&self, message: &UpdateMessage) -> Result<()> {
        let payload = Utf8Bytes::from(message.to_json()?);
        if self.shared.token.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }
        self.broadcast_tx
            .send(payload)
            .await
            .map_err(|_| HubError::ShuttingDown)
    }

    /// Like [`broadcast`](Self::broadcast) but never waits.
    pub fn try_broadcast(&self, message: &UpdateMessage) -> Result<()> {
        let payload = Utf8Bytes::from(message.to_json()?);
        if self.shared.token.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }
        self.broadcast_tx.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => HubError::BroadcastBacklog,
            TrySendError::Closed(_) => HubError::ShuttingDown,
        })
    }

    /// Close every connection and stop the coordination task.
    ///
    /// Runs once; concurrent and later calls wait for that run to finish.
    /// Callers wanting a deadline wrap this in `tokio::time::timeout`.
    pub async fn shutdown(&self) {
        self.shutdown
            .get_or_init(|| async {
                self.shared.token.cancel();
                let coordinator = self.coordinator.lock().take();
                if let Some(coordinator) = coordinator {
                    if let Err(err) = coordinator.await {
                        tracing::warn!(error = %err, "live-update coordinator ended abnormally");
                    }
                }
                tracing::info!("live-update hub shut down");
            })
            .await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Snapshot of registered clients, ordered by id.
    pub fn connected_clients(&self) -> Vec<ConnectedClient> {
        self.shared.clients_view.read().clone()
    }

    /// Connections currently holding a slot, including ones mid-upgrade.
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> HubStats {
        let counters = &self.shared.counters;
        HubStats {
            accepted: counters.accepted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            active: self.active_connections(),
            sessions: self.shared.sessions.load(Ordering::Acquire),
            broadcasts: counters.broadcasts.load(Ordering::Relaxed),
            slow_consumer_disconnects: counters.slow_consumer.load(Ordering::Relaxed),
            rate_limit_disconnects: counters.rate_limited.load(Ordering::Relaxed),
        }
    }
}

impl Drop for LiveUpdateHub {
    fn drop(&mut self) {
        self.shared.token.cancel();
    }
}

impl std::fmt::Debug for LiveUpdateHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveUpdateHub")
            .field("active", &self.active_connections())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

async fn coordinate(
    shared: Arc<Shared>,
    mut register_rx: mpsc::UnboundedReceiver<ClientEntry>,
    mut unregister_rx: mpsc::UnboundedReceiver<Unregister>,
    unregister_tx: mpsc::UnboundedSender<Unregister>,
    mut broadcast_rx: mpsc::Receiver<Utf8Bytes>,
) {
    let mut clients: FxHashMap<ClientId, ClientEntry> = FxHashMap::default();

    loop {
        // Registrations and departures go first so a broadcast sent right
        // after `connect` reaches the new client.
        tokio::select! {
            biased;
            _ = shared.token.cancelled() => break,
            Some(entry) = register_rx.recv() => {
                if entry.control.is_closed() {
                    continue;
                }
                clients.insert(entry.info.id, entry);
                publish(&shared, &clients);
            }
            Some((id, reason)) = unregister_rx.recv() => {
                if let Some(entry) = clients.remove(&id) {
                    entry.control.close(reason);
                    // Release the slot before the view shows the client gone.
                    drop(entry);
                    shared.counters.record_disconnect(reason);
                    tracing::info!(client_id = %id, %reason, "live-update client disconnected");
                    publish(&shared, &clients);
                }
            }
            Some(payload) = broadcast_rx.recv() => {
                shared.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
                for (id, entry) in &clients {
                    if entry.control.is_closed() {
                        continue;
                    }
                    let reason = match entry.outbound.try_send(payload.clone()) {
                        Ok(()) => continue,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(client_id = %id, "client outbound queue full, disconnecting");
                            DisconnectReason::SlowConsumer
                        }
                        Err(TrySendError::Closed(_)) => DisconnectReason::Transport,
                    };
                    entry.control.close(reason);
                    let _ = unregister_tx.send((*id, reason));
                }
            }
        }
    }

    for (_, entry) in clients.drain() {
        entry.control.close(DisconnectReason::Shutdown);
    }
    publish(&shared, &clients);
    tracing::debug!("live-update coordinator stopped");
}

fn publish(shared: &Shared, clients: &FxHashMap<ClientId, ClientEntry>) {
    let mut view: Vec<ConnectedClient> = clients.values().map(|entry| entry.info.clone()).collect();
    view.sort_by_key(|client| client.id);
    *shared.clients_view.write() = view;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    fn allow_all() -> Arc<dyn OriginValidator> {
        Arc::new(|_: &str| true)
    }

    #[tokio::test]
    async fn test_control_first_reason_wins() {
        let control = ClientControl::default();
        assert!(control.close(DisconnectReason::RateLimited));
        assert!(!control.close(DisconnectReason::Shutdown));
        assert_eq!(control.reason(), Some(DisconnectReason::RateLimited));
        assert!(control.is_closed());
    }

    #[tokio::test]
    async fn test_slot_released_when_admission_dropped() {
        let config = HubConfig {
            max_connections: 1,
            max_connections_per_ip: 1,
            ..HubConfig::default()
        };
        let hub = LiveUpdateHub::start(config, allow_all());

        let admission = hub.admit(Some("http://localhost"), local()).unwrap();
        assert_eq!(hub.active_connections(), 1);
        assert!(matches!(
            hub.admit(Some("http://localhost"), local()),
            Err(HubError::TooManyConnections { limit: 1 })
        ));

        drop(admission);
        assert_eq!(hub.active_connections(), 0);
        assert!(hub.shared.per_ip.is_empty());
        assert!(hub.admit(Some("http://localhost"), local()).is_ok());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_per_ip_rejection_does_not_hold_global_slot() {
        let config = HubConfig {
            max_connections: 10,
            max_connections_per_ip: 1,
            ..HubConfig::default()
        };
        let hub = LiveUpdateHub::start(config, allow_all());

        let _first = hub.admit(Some("http://localhost"), local()).unwrap();
        assert!(matches!(
            hub.admit(Some("http://localhost"), local()),
            Err(HubError::TooManyConnectionsFromIp { limit: 1, .. })
        ));
        assert_eq!(hub.active_connections(), 1);
        assert_eq!(hub.stats().rejected, 1);

        hub.shutdown().await;
    }
}

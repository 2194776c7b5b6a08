//! # Connection Manager
//!
//! Owns the box's single authenticated connection to the hub.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌────────────┐  connect_once() ┌────────────┐  success  ┌───────────┐ │
//! │  │Disconnected│ ──────────────► │ Connecting │ ────────► │ Connected │ │
//! │  └────────────┘                 └─────┬──────┘           └─────┬─────┘ │
//! │        ▲                              │ identity/token/         │       │
//! │        │                              │ transport failure       │       │
//! │        │                              ▼                         │       │
//! │        │                        ┌────────────┐                  │       │
//! │        │       10s later ◄───── │  Faulted   │                  │       │
//! │        │     (Connecting)       └────────────┘                  │       │
//! │        │                                                        │       │
//! │        └──── close notification OR 1s status poll ◄─────────────┘       │
//! │                     (then 10s, then Connecting)                         │
//! │                                                                         │
//! │  No retry limit. A box keeps trying for as long as it runs.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use boxsync_core::HubMessage;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::agent::{NoOpEmitter, SyncEventEmitter};
use crate::config::{RECONNECT_DELAY, STATUS_POLL_INTERVAL};
use crate::debounce::SyncTrigger;
use crate::error::{SyncError, SyncResult};
use crate::identity::{CredentialProvisioner, SharedSession};
use crate::token::SessionToken;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state, owned by the [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Last attempt failed; waiting for the reconnect delay.
    Faulted,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Faulted => write!(f, "faulted"),
        }
    }
}

// =============================================================================
// Hub Link
// =============================================================================

/// An open connection as seen by the manager.
///
/// `outgoing` feeds the transport's writer; `closed` flips to `true` (or its
/// sender is dropped) when the transport goes away.
#[derive(Clone)]
pub struct HubLink {
    outgoing: mpsc::Sender<HubMessage>,
    closed: watch::Receiver<bool>,
}

impl HubLink {
    pub fn new(outgoing: mpsc::Sender<HubMessage>, closed: watch::Receiver<bool>) -> Self {
        HubLink { outgoing, closed }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err() || self.outgoing.is_closed()
    }

    /// A receiver that resolves [`wait_closed`] when the link drops.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Sends a message to the hub.
    pub async fn invoke(&self, message: HubMessage) -> SyncResult<()> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| SyncError::Disconnected)
    }
}

/// Resolves once the link behind `closed` reports closure.
pub async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|is_closed| *is_closed).await;
}

/// Opens connections to the hub.
#[async_trait]
pub trait HubConnector: Send + Sync {
    /// Opens an authenticated connection. Messages pushed by the hub are
    /// forwarded to `inbound`.
    async fn connect(
        &self,
        token: &SessionToken,
        inbound: mpsc::Sender<HubMessage>,
    ) -> SyncResult<HubLink>;
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Drives connect attempts and supervises the live connection.
pub struct ConnectionManager {
    provisioner: Arc<CredentialProvisioner>,
    session: SharedSession,
    connector: Arc<dyn HubConnector>,
    inbound_tx: mpsc::Sender<HubMessage>,
    state: RwLock<ConnectionState>,
    link: Mutex<Option<HubLink>>,
    attempts: AtomicU64,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl ConnectionManager {
    pub fn new(
        provisioner: Arc<CredentialProvisioner>,
        session: SharedSession,
        connector: Arc<dyn HubConnector>,
        inbound_tx: mpsc::Sender<HubMessage>,
    ) -> Self {
        ConnectionManager {
            provisioner,
            session,
            connector,
            inbound_tx,
            state: RwLock::new(ConnectionState::Disconnected),
            link: Mutex::new(None),
            attempts: AtomicU64::new(0),
            emitter: Arc::new(NoOpEmitter),
        }
    }

    /// Reports state transitions to `emitter`.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn provisioner(&self) -> &Arc<CredentialProvisioner> {
        &self.provisioner
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
        self.emitter.emit_state(state);
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Returns true if currently connected.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Number of connect attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Makes one connect attempt.
    ///
    /// Returns `Ok(false)` without doing anything if an attempt is already in
    /// flight or the connection is up.
    pub async fn connect_once(&self) -> SyncResult<bool> {
        {
            let mut state = self.state.write().await;
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(state = %*state, "Connect already in progress, ignoring");
                return Ok(false);
            }
            *state = ConnectionState::Connecting;
        }
        self.emitter.emit_state(ConnectionState::Connecting);

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(attempt, "Connecting to sync hub");

        match self.open().await {
            Ok(link) => {
                *self.link.lock().await = Some(link);
                self.set_state(ConnectionState::Connected).await;
                info!(attempt, "Connected to sync hub");
                Ok(true)
            }
            Err(e) => {
                self.set_state(ConnectionState::Faulted).await;
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
                Err(e)
            }
        }
    }

    async fn open(&self) -> SyncResult<HubLink> {
        self.provisioner.ensure_identity(&self.session).await?;
        let token = {
            let mut session = self.session.lock().await;
            self.provisioner.session_token(&mut session, Utc::now())?
        };

        self.connector.connect(&token, self.inbound_tx.clone()).await
    }

    /// Sends a message over the live connection.
    ///
    /// The link lock is released before the send, so a stalled writer never
    /// blocks the supervisor's status poll.
    pub async fn invoke(&self, message: HubMessage) -> SyncResult<()> {
        if !self.is_connected().await {
            return Err(SyncError::NotConnected);
        }
        let link = self.link.lock().await.clone();
        match link {
            Some(link) => link.invoke(message).await,
            None => Err(SyncError::NotConnected),
        }
    }

    /// Drops the live link and marks the manager disconnected.
    pub async fn disconnect(&self) {
        self.link.lock().await.take();
        self.set_state(ConnectionState::Disconnected).await;
    }

    async fn link_lost(&self) -> bool {
        if !self.is_connected().await {
            return true;
        }
        match self.link.lock().await.as_ref() {
            Some(link) => link.is_closed(),
            None => true,
        }
    }

    /// Supervisory loop: connect, watch the connection, reconnect.
    ///
    /// Runs until `shutdown_rx` fires. Each successful connect issues one
    /// sync request through `trigger`.
    pub async fn run(self: Arc<Self>, trigger: Arc<dyn SyncTrigger>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!("Connection supervisor starting");

        loop {
            match self.connect_once().await {
                Ok(true) => {
                    let trigger = trigger.clone();
                    tokio::spawn(async move {
                        trigger.request_sync().await;
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    if e.is_bootstrap_unresolved() {
                        warn!(error = %e, "Waiting for device provisioning");
                    } else {
                        warn!(error = %e, attempt = self.attempts(), "Connect attempt failed");
                    }
                    if !pause(RECONNECT_DELAY, &mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            }

            if !self.supervise(&mut shutdown_rx).await {
                break;
            }

            info!("Connection to sync hub lost");
            self.disconnect().await;

            if !pause(RECONNECT_DELAY, &mut shutdown_rx).await {
                break;
            }
        }

        self.disconnect().await;
        info!("Connection supervisor stopped");
    }

    /// Watches the live link. Returns `false` on shutdown, `true` once the
    /// link is gone.
    async fn supervise(&self, shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
        let mut closed = match self.link.lock().await.as_ref() {
            Some(link) => link.close_signal(),
            None => return true,
        };

        let mut poll = tokio::time::interval(STATUS_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return false,
                _ = wait_closed(&mut closed) => {
                    debug!("Close notification received");
                    return true;
                }
                _ = poll.tick() => {
                    if self.link_lost().await {
                        debug!("Status poll found the connection down");
                        return true;
                    }
                }
            }
        }
    }
}

/// Sleeps for `delay`. Returns `false` if shutdown was requested first.
async fn pause(delay: Duration, shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
    tokio::select! {
        _ = shutdown_rx.recv() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identity::tests::{identity, CountingSigner, FakeDeviceInfo, FakeDirectory};
    use crate::identity::{IdentityFile, SessionState};
    use crate::device::DeviceInfoSource;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    // =========================================================================
    // Fakes
    // =========================================================================

    /// Connector that fails a fixed number of times, then hands out links
    /// the test can close.
    #[derive(Default)]
    pub struct FakeConnector {
        pub fail_first: usize,
        pub attempts: std::sync::Mutex<Vec<Instant>>,
        pub tokens: std::sync::Mutex<Vec<String>>,
        closers: std::sync::Mutex<Vec<watch::Sender<bool>>>,
        pub outgoing: std::sync::Mutex<Vec<Option<mpsc::Receiver<HubMessage>>>>,
        pub inbound: std::sync::Mutex<Vec<mpsc::Sender<HubMessage>>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeConnector {
        pub fn failing(n: usize) -> Self {
            FakeConnector {
                fail_first: n,
                ..Default::default()
            }
        }

        /// Each attempt waits on `gate` before completing.
        pub fn gated(gate: Arc<Notify>) -> Self {
            FakeConnector {
                gate: Some(gate),
                ..Default::default()
            }
        }

        pub fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }

        /// Signals closure of link `i`.
        pub fn close(&self, i: usize) {
            let _ = self.closers.lock().unwrap()[i].send(true);
        }

        /// Kills link `i` without a close notification.
        pub fn kill_silently(&self, i: usize) {
            self.outgoing.lock().unwrap()[i] = None;
        }

        /// Pushes a message from the hub on link `i`.
        pub async fn push(&self, i: usize, message: HubMessage) {
            let tx = self.inbound.lock().unwrap()[i].clone();
            tx.send(message).await.unwrap();
        }

        /// Messages the edge sent on link `i` so far.
        pub fn sent(&self, i: usize) -> Vec<HubMessage> {
            let mut guard = self.outgoing.lock().unwrap();
            let mut sent = Vec::new();
            if let Some(rx) = guard[i].as_mut() {
                while let Ok(msg) = rx.try_recv() {
                    sent.push(msg);
                }
            }
            sent
        }
    }

    #[async_trait]
    impl HubConnector for FakeConnector {
        async fn connect(
            &self,
            token: &SessionToken,
            inbound: mpsc::Sender<HubMessage>,
        ) -> SyncResult<HubLink> {
            let n = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len()
            };
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if n <= self.fail_first {
                return Err(SyncError::ConnectionFailed(format!("refused #{}", n)));
            }

            self.tokens.lock().unwrap().push(token.value().to_string());
            self.inbound.lock().unwrap().push(inbound);
            let (out_tx, out_rx) = mpsc::channel(16);
            let (close_tx, close_rx) = watch::channel(false);
            self.closers.lock().unwrap().push(close_tx);
            self.outgoing.lock().unwrap().push(Some(out_rx));
            Ok(HubLink::new(out_tx, close_rx))
        }
    }

    #[derive(Default)]
    pub struct CountingTrigger {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl SyncTrigger for CountingTrigger {
        async fn request_sync(&self) {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// Manager whose session already holds an identity, so no file I/O runs.
    pub fn manager(connector: Arc<FakeConnector>) -> (Arc<ConnectionManager>, SharedSession) {
        let provisioner = Arc::new(CredentialProvisioner::new(
            IdentityFile::new("unused-practiceinfo.json"),
            Arc::new(FakeDeviceInfo::default()),
            Arc::new(FakeDirectory::tagged("P1")),
            Arc::new(CountingSigner::default()),
        ));
        let session: SharedSession = Arc::new(Mutex::new(SessionState {
            identity: Some(identity("P1")),
            token: None,
        }));
        let (inbound_tx, _inbound_rx) = mpsc::channel(16);
        let manager = Arc::new(ConnectionManager::new(
            provisioner,
            session.clone(),
            connector,
            inbound_tx,
        ));
        (manager, session)
    }

    fn spawn_supervisor(
        manager: &Arc<ConnectionManager>,
        trigger: Arc<CountingTrigger>,
    ) -> (mpsc::Sender<()>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(manager.clone().run(trigger, shutdown_rx));
        (shutdown_tx, task)
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Faulted.to_string(), "faulted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_failures_give_n_plus_one_attempts() {
        let connector = Arc::new(FakeConnector::failing(3));
        let (manager, _) = manager(connector.clone());
        let trigger = Arc::new(CountingTrigger::default());
        let (_shutdown, _task) = spawn_supervisor(&manager, trigger.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;

        let attempts = connector.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1] - pair[0], RECONNECT_DELAY);
        }
        assert_eq!(manager.state().await, ConnectionState::Connected);
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);

        // Stays connected; no further attempts.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_notification_reconnects_after_delay() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, _) = manager(connector.clone());
        let trigger = Arc::new(CountingTrigger::default());
        let (_shutdown, _task) = spawn_supervisor(&manager, trigger.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.is_connected().await);

        connector.close(0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
        assert_eq!(connector.attempt_count(), 1);

        tokio::time::sleep(RECONNECT_DELAY).await;
        assert!(manager.is_connected().await);
        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_poll_catches_missed_close() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, _) = manager(connector.clone());
        let (_shutdown, _task) = spawn_supervisor(&manager, Arc::new(CountingTrigger::default()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        connector.kill_silently(0);

        tokio::time::sleep(STATUS_POLL_INTERVAL + Duration::from_millis(100)).await;
        assert_eq!(manager.state().await, ConnectionState::Disconnected);

        tokio::time::sleep(RECONNECT_DELAY).await;
        assert_eq!(connector.attempt_count(), 2);
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_reentrant_connect_is_ignored() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, _) = manager(connector.clone());

        assert!(manager.connect_once().await.unwrap());
        assert!(!manager.connect_once().await.unwrap());
        assert_eq!(manager.attempts(), 1);
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_while_connecting_is_ignored() {
        let gate = Arc::new(Notify::new());
        let connector = Arc::new(FakeConnector::gated(gate.clone()));
        let (manager, _) = manager(connector.clone());

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect_once().await }
        });
        while connector.attempt_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.state().await, ConnectionState::Connecting);

        assert!(!manager.connect_once().await.unwrap());
        assert_eq!(manager.attempts(), 1);

        gate.notify_one();
        assert!(first.await.unwrap().unwrap());
        assert_eq!(manager.state().await, ConnectionState::Connected);
        assert_eq!(connector.attempt_count(), 1);
    }

    /// Device info source that blocks until released.
    struct GatedDeviceInfo {
        gate: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeviceInfoSource for GatedDeviceInfo {
        async fn device_id(&self) -> SyncResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok("tpm-9".into())
        }
    }

    #[tokio::test]
    async fn test_bootstrap_runs_outside_session_lock() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let info = Arc::new(GatedDeviceInfo {
            gate: gate.clone(),
            calls: AtomicUsize::new(0),
        });
        let provisioner = Arc::new(CredentialProvisioner::new(
            IdentityFile::new(dir.path().join("practiceinfo.json")),
            info.clone(),
            Arc::new(FakeDirectory::tagged("P2")),
            Arc::new(CountingSigner::default()),
        ));
        let session: SharedSession = Arc::new(Mutex::new(SessionState::default()));
        let (inbound_tx, _inbound_rx) = mpsc::channel(16);
        let manager = Arc::new(ConnectionManager::new(
            provisioner,
            session.clone(),
            Arc::new(FakeConnector::default()),
            inbound_tx,
        ));

        let attempt = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect_once().await }
        });
        while info.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Companion round trip pending; status readers still get the session.
        assert!(session.try_lock().is_ok());
        assert_eq!(manager.state().await, ConnectionState::Connecting);

        gate.notify_one();
        assert!(attempt.await.unwrap().unwrap());
        assert_eq!(session.lock().await.practice_id(), Some("P2"));
    }

    #[tokio::test]
    async fn test_stalled_send_does_not_hold_link() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, _) = manager(connector.clone());
        manager.connect_once().await.unwrap();

        // Fill the link's outgoing buffer so the next send has to wait.
        for _ in 0..16 {
            manager.invoke(HubMessage::upload_trigger("P1")).await.unwrap();
        }
        let stalled = tokio::spawn({
            let manager = manager.clone();
            async move { manager.invoke(HubMessage::upload_trigger("P1")).await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!stalled.is_finished());

        assert!(manager.link.try_lock().is_ok());
        assert!(!manager.link_lost().await);

        assert_eq!(connector.sent(0).len(), 16);
        assert!(stalled.await.unwrap().is_ok());
        assert_eq!(connector.sent(0).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_faulted() {
        let connector = Arc::new(FakeConnector::failing(1));
        let (manager, _) = manager(connector);

        assert!(manager.connect_once().await.is_err());
        assert_eq!(manager.state().await, ConnectionState::Faulted);
        assert!(matches!(
            manager.invoke(HubMessage::upload_trigger("P1")).await,
            Err(SyncError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_token_reused_across_reconnects() {
        let connector = Arc::new(FakeConnector::default());
        let (manager, session) = manager(connector.clone());

        manager.connect_once().await.unwrap();
        manager.disconnect().await;
        manager.connect_once().await.unwrap();

        let tokens = connector.tokens.lock().unwrap().clone();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], tokens[1]);
        assert!(session.lock().await.token.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_reconnect_wait() {
        let connector = Arc::new(FakeConnector::failing(usize::MAX));
        let (manager, _) = manager(connector.clone());
        let (shutdown, task) = spawn_supervisor(&manager, Arc::new(CountingTrigger::default()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = Instant::now();
        shutdown.send(()).await.unwrap();
        task.await.unwrap();

        assert!(Instant::now() - started < RECONNECT_DELAY);
        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }
}

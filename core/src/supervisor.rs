/// Connection supervisor: dials the server, watches for disconnects and
/// retries a failed initial connection with a growing backoff
///
/// Only the *initial* connection failure starts the retry loop. A connection
/// that drops later in the session is reported once and not retried.
use crate::client::Work;
use crate::config::{HostSettings, RetryPolicy};
use crate::error::{ChatError, Result};
use crate::transport::{Connection, Connector, TransportEvent};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Connection state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Dial in progress
    Connecting,
    /// Transport up, events flowing
    Connected,
}

/// Where the background retry loop is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Waiting { attempt: u32 },
    Attempting { attempt: u32 },
    /// Reconnected; the loop is done
    Restored,
    /// Every attempt failed; the loop is done
    Exhausted,
    /// Session closed while the loop was running
    Cancelled,
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Restored | RetryState::Exhausted | RetryState::Cancelled
        )
    }
}

struct Inner<C> {
    connector: C,
    policy: RetryPolicy,
    settings_path: PathBuf,
    work_tx: mpsc::UnboundedSender<Work>,
    state: watch::Sender<ConnectionState>,
    retry: watch::Sender<RetryState>,
    shutdown: watch::Receiver<bool>,
    retrying: AtomicBool,
    generation: AtomicU64,
}

pub struct ConnectionSupervisor<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionSupervisor<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(
        connector: C,
        policy: RetryPolicy,
        settings_path: PathBuf,
        work_tx: mpsc::UnboundedSender<Work>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (retry, _) = watch::channel(RetryState::Idle);
        Self {
            inner: Arc::new(Inner {
                connector,
                policy,
                settings_path,
                work_tx,
                state,
                retry,
                shutdown,
                retrying: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Follow the connection state
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Follow the retry loop
    pub fn retry_state(&self) -> watch::Receiver<RetryState> {
        self.inner.retry.subscribe()
    }

    /// Dial `host:port`. A failed first attempt is reported and hands over to
    /// the background retry loop; a failed retry just returns false.
    pub async fn connect(&self, host: &str, port: u16, is_retry: bool) -> bool {
        match self.try_connect(host, port).await {
            Ok(()) => true,
            Err(e) => {
                if is_retry {
                    debug!("Retry dial to {}:{} failed: {}", host, port, e);
                } else {
                    warn!("Can't connect to {}:{}: {}", host, port, e);
                    self.notify(format!(
                        "Can't connect to host \"{}:{}\"\nNext try after: {} sec\nDescription: {}\n",
                        host,
                        port,
                        self.inner.policy.initial_delay.as_secs(),
                        e
                    ));
                    self.spawn_retry_loop();
                }
                false
            }
        }
    }

    async fn try_connect(&self, host: &str, port: u16) -> Result<()> {
        if self.is_shut_down() {
            return Err(ChatError::Connectivity("Session is closed".to_string()));
        }
        self.inner.state.send_replace(ConnectionState::Connecting);
        sleep(self.inner.policy.settle_delay).await;

        info!("Dialing {}:{}", host, port);
        match self.inner.connector.dial(host, port).await {
            Ok(connection) => {
                self.attach(connection);
                Ok(())
            }
            Err(e) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Hand a fresh connection to the session task and arm the disconnect watcher
    fn attach(&self, connection: Connection) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Connection { handle, events } = connection;
        // Queue the handle first so anyone who sees Connected acts on the new transport
        let _ = self.inner.work_tx.send(Work::Connected { generation, handle });
        self.inner.state.send_replace(ConnectionState::Connected);

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.forward_events(generation, events).await });
    }

    async fn forward_events(
        &self,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => info!("Connected"),
                TransportEvent::Event { name, payload } => {
                    if self.inner.work_tx.send(Work::Inbound { name, payload }).is_err() {
                        return;
                    }
                }
                TransportEvent::Disconnected(reason) => {
                    match reason {
                        Some(reason) => warn!("Disconnected from server: {}", reason),
                        None => warn!("Disconnected from server"),
                    }
                    self.mark_disconnected(generation);
                    return;
                }
            }
        }
        // The transport went away without saying so, e.g. after a failed write
        warn!("Event stream for connection {} ended", generation);
        self.mark_disconnected(generation);
    }

    fn mark_disconnected(&self, generation: u64) {
        // A newer connection may already be attached
        if self.inner.generation.load(Ordering::SeqCst) == generation {
            self.inner.state.send_replace(ConnectionState::Disconnected);
        }
        let _ = self.inner.work_tx.send(Work::Disconnected { generation });
    }

    fn spawn_retry_loop(&self) {
        if self.inner.retrying.swap(true, Ordering::SeqCst) {
            debug!("Retry loop already running");
            return;
        }
        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.run_retry_loop().await;
            supervisor.inner.retrying.store(false, Ordering::SeqCst);
        });
    }

    async fn run_retry_loop(&self) {
        let policy = self.inner.policy;
        for attempt in 1..=policy.max_attempts {
            self.inner.retry.send_replace(RetryState::Waiting { attempt });
            if self.wait_or_cancel(policy.delay_before(attempt)).await {
                info!("Reconnect cancelled");
                self.inner.retry.send_replace(RetryState::Cancelled);
                return;
            }

            let settings = HostSettings::load_or_init(&self.inner.settings_path);
            info!("Try reconnect to: {} (attempt {}/{})", settings.address(), attempt, policy.max_attempts);
            self.inner.retry.send_replace(RetryState::Attempting { attempt });

            if self.connect(&settings.host, settings.port, true).await {
                self.notify("Connection restored!".to_string());
                self.inner.retry.send_replace(RetryState::Restored);
                return;
            }
            if attempt < policy.max_attempts {
                info!(
                    "Unsuccessful reconnect to {}, next try after {} minutes",
                    settings.address(),
                    policy.delay_before(attempt + 1).as_secs() / 60
                );
            }
        }
        info!("Giving up after {} reconnect attempts", policy.max_attempts);
        self.inner.retry.send_replace(RetryState::Exhausted);
    }

    /// Sleep for `delay`; true if the session closed meanwhile
    async fn wait_or_cancel(&self, delay: Duration) -> bool {
        let mut shutdown = self.inner.shutdown.clone();
        if *shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = sleep(delay) => self.is_shut_down(),
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    fn notify(&self, description: String) {
        let _ = self.inner.work_tx.send(Work::Notify(description));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportHandle;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails the first `failures` dials, then hands out in-memory connections
    #[derive(Clone)]
    struct FlakyConnector {
        failures: usize,
        dials: Arc<Mutex<Vec<Instant>>>,
        peers: Arc<Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>>,
    }

    impl FlakyConnector {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                dials: Arc::new(Mutex::new(Vec::new())),
                peers: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn dial_times(&self) -> Vec<Instant> {
            self.dials.lock().unwrap().clone()
        }

        fn last_peer(&self) -> mpsc::UnboundedSender<TransportEvent> {
            self.peers.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Connector for FlakyConnector {
        fn dial(&self, _host: &str, _port: u16) -> impl std::future::Future<Output = Result<Connection>> + Send {
            let mut dials = self.dials.lock().unwrap();
            dials.push(Instant::now());
            let result = if dials.len() <= self.failures {
                Err(ChatError::Connectivity("connection refused".to_string()))
            } else {
                let (handle, _outgoing) = TransportHandle::channel();
                let (events_tx, events) = mpsc::unbounded_channel();
                self.peers.lock().unwrap().push(events_tx);
                Ok(Connection { handle, events })
            };
            async move { result }
        }
    }

    struct Harness {
        supervisor: ConnectionSupervisor<FlakyConnector>,
        connector: FlakyConnector,
        work_rx: mpsc::UnboundedReceiver<Work>,
        shutdown_tx: watch::Sender<bool>,
        _dir: tempfile::TempDir,
    }

    fn harness(failures: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.json");
        let connector = FlakyConnector::new(failures);
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = ConnectionSupervisor::new(
            connector.clone(),
            RetryPolicy::default(),
            settings_path,
            work_tx,
            shutdown_rx,
        );
        Harness {
            supervisor,
            connector,
            work_rx,
            shutdown_tx,
            _dir: dir,
        }
    }

    fn notifications(work_rx: &mut mpsc::UnboundedReceiver<Work>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(work) = work_rx.try_recv() {
            if let Work::Notify(text) = work {
                out.push(text);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_connect_success() {
        let mut h = harness(0);
        assert!(h.supervisor.connect("localhost", 3811, false).await);
        assert_eq!(*h.supervisor.state().borrow(), ConnectionState::Connected);
        assert!(matches!(h.work_rx.recv().await, Some(Work::Connected { generation: 1, .. })));
        assert_eq!(*h.supervisor.retry_state().borrow(), RetryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_schedule_until_restored() {
        // Initial dial plus two retries fail, the third retry succeeds
        let mut h = harness(3);
        let policy = RetryPolicy::default();
        let start = Instant::now();

        assert!(!h.supervisor.connect("localhost", 3811, false).await);
        let mut retry = h.supervisor.retry_state();
        retry.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(*retry.borrow(), RetryState::Restored);

        let dials = h.connector.dial_times();
        assert_eq!(dials.len(), 4);
        for (k, dialed_at) in dials.iter().enumerate().skip(1) {
            assert!(*dialed_at - start >= policy.earliest_start(k as u32));
        }
        let gaps: Vec<Duration> = dials.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[0] < g[1]));

        let notes = notifications(&mut h.work_rx);
        assert_eq!(notes.len(), 2);
        assert!(notes[0].starts_with("Can't connect to host \"localhost:3811\""));
        assert_eq!(notes[1], "Connection restored!");
        assert_eq!(*h.supervisor.state().borrow(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_is_silent() {
        let mut h = harness(usize::MAX);
        assert!(!h.supervisor.connect("localhost", 3811, false).await);
        let mut retry = h.supervisor.retry_state();
        retry.wait_for(|s| s.is_terminal()).await.unwrap();

        assert_eq!(*retry.borrow(), RetryState::Exhausted);
        assert_eq!(h.connector.dial_times().len(), 11);
        assert_eq!(notifications(&mut h.work_rx).len(), 1);
        assert_eq!(*h.supervisor.state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_retry_loop() {
        let h = harness(usize::MAX);
        assert!(!h.supervisor.connect("localhost", 3811, false).await);
        let mut retry = h.supervisor.retry_state();
        retry
            .wait_for(|s| matches!(s, RetryState::Waiting { attempt: 1 }))
            .await
            .unwrap();

        h.shutdown_tx.send(true).unwrap();
        retry.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(*retry.borrow(), RetryState::Cancelled);
        assert_eq!(h.connector.dial_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retry_does_not_notify() {
        let mut h = harness(usize::MAX);
        assert!(!h.supervisor.connect("localhost", 3811, true).await);
        assert!(notifications(&mut h.work_rx).is_empty());
        assert_eq!(*h.supervisor.retry_state().borrow(), RetryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_stream_ending_counts_as_disconnect() {
        let mut h = harness(0);
        assert!(h.supervisor.connect("localhost", 3811, false).await);
        assert!(matches!(h.work_rx.recv().await, Some(Work::Connected { generation: 1, .. })));

        // Drop the only sender without a Disconnected event
        h.connector.peers.lock().unwrap().clear();

        assert!(matches!(h.work_rx.recv().await, Some(Work::Disconnected { generation: 1 })));
        assert_eq!(*h.supervisor.state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_disconnect_keeps_newer_connection_state() {
        let mut h = harness(0);
        assert!(h.supervisor.connect("localhost", 3811, false).await);
        assert!(h.supervisor.connect("localhost", 3811, false).await);

        // The first connection dies after the second one attached
        drop(h.connector.peers.lock().unwrap().remove(0));

        loop {
            match h.work_rx.recv().await {
                Some(Work::Disconnected { generation }) => {
                    assert_eq!(generation, 1);
                    break;
                }
                Some(_) => continue,
                None => panic!("work queue closed"),
            }
        }
        assert_eq!(*h.supervisor.state().borrow(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_organic_disconnect_is_reported_not_retried() {
        let mut h = harness(0);
        assert!(h.supervisor.connect("localhost", 3811, false).await);
        assert!(matches!(h.work_rx.recv().await, Some(Work::Connected { .. })));

        let peer = h.connector.last_peer();
        peer.send(TransportEvent::Connected).unwrap();
        peer.send(TransportEvent::Event {
            name: "/message".to_string(),
            payload: serde_json::json!({}),
        })
        .unwrap();
        peer.send(TransportEvent::Disconnected(None)).unwrap();

        assert!(matches!(h.work_rx.recv().await, Some(Work::Inbound { name, .. }) if name == "/message"));
        assert!(matches!(h.work_rx.recv().await, Some(Work::Disconnected { generation: 1 })));
        assert_eq!(*h.supervisor.state().borrow(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(h.connector.dial_times().len(), 1);
        assert_eq!(*h.supervisor.retry_state().borrow(), RetryState::Idle);
    }
}

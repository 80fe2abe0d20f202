// =============================================================================
// Game Socket Client: self-healing push channel with subscription replay
// =============================================================================
//
// State machine:
//   Idle -> Connecting -> Open -> Closed -> (Connecting | Idle)
//
// Every successful open resets the reconnect counter and sends the channel
// subscribe frame.  A failed handshake or a dropped connection schedules one
// reconnect after a fixed delay, up to `max_reconnect_attempts`; after that
// the client stays Idle until `connect()` is called again.  `disconnect()`
// cancels any pending timer and disables automatic reconnection.
//
// Each connection carries a generation number.  Events from a superseded
// generation (a late handshake, the read task of a closed session) are
// ignored, which keeps at most one live session at a time.  Handshakes are
// serialised through a gate and `disconnect()` aborts the running one, so a
// new attempt never starts while an old connector future is still alive.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{abortable, AbortHandle, BoxFuture, FutureExt};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SocketError;
use crate::runtime_config::SocketConfig;
use crate::socket::listeners::{ListenerId, ListenerSet};
use crate::socket::transport::{Connector, Transport};

/// Lifecycle of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Connection tunables.
#[derive(Debug, Clone)]
pub struct SocketSettings {
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub subscribe_channel: String,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            subscribe_channel: "agent_live_game_list".to_string(),
        }
    }
}

impl SocketSettings {
    pub fn from_config(cfg: &SocketConfig) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(cfg.handshake_timeout_secs),
            reconnect_delay: Duration::from_secs(cfg.reconnect_delay_secs),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            subscribe_channel: cfg.subscribe_channel.clone(),
        }
    }
}

/// The frame sent on every successful open.
pub fn subscribe_frame(channel: &str) -> Value {
    json!({
        "type": "subscribe",
        "channel": channel,
        "params": {},
    })
}

/// Who asked for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// `connect()` from outside; re-enables automatic reconnection.
    Caller,
    /// The reconnect timer; gives up if reconnection was disabled meanwhile.
    Reconnect,
}

struct Session {
    id: Uuid,
    /// Dropping the sender ends the session task, which closes the transport.
    outbound: mpsc::UnboundedSender<String>,
    _task: JoinHandle<()>,
}

struct Control {
    state: ConnectionState,
    attempts: u32,
    should_reconnect: bool,
    generation: u64,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Abort handle of the handshake for the current generation.
    handshake: Option<AbortHandle>,
    session: Option<Session>,
}

struct Inner {
    connector: Box<dyn Connector>,
    settings: SocketSettings,
    control: Mutex<Control>,
    /// Held for the whole lifetime of a connector future.
    handshake_gate: tokio::sync::Mutex<()>,
    listeners: ListenerSet,
    state_tx: watch::Sender<ConnectionState>,
}

/// Persistent push-notification client.  Cheap to clone; every clone drives
/// the same connection.
#[derive(Clone)]
pub struct SocketClient {
    inner: Arc<Inner>,
}

impl SocketClient {
    pub fn new(connector: impl Connector, settings: SocketSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                connector: Box::new(connector),
                settings,
                control: Mutex::new(Control {
                    state: ConnectionState::Idle,
                    attempts: 0,
                    should_reconnect: true,
                    generation: 0,
                    reconnect_timer: None,
                    handshake: None,
                    session: None,
                }),
                handshake_gate: tokio::sync::Mutex::new(()),
                listeners: ListenerSet::new(),
                state_tx,
            }),
        }
    }

    /// Open the connection.  A no-op while a handshake is already running or
    /// the connection is open.  On failure a reconnect is scheduled (if any
    /// attempts remain) and the error is returned.
    pub async fn connect(&self) -> Result<(), SocketError> {
        Arc::clone(&self.inner).connect(Trigger::Caller).await
    }

    /// Queue `message` for sending.  Returns `false` if the connection is not
    /// open or the message cannot be serialised.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        self.inner.send(message)
    }

    /// Register a handler for every parsed inbound payload.
    pub fn on_message<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.listeners.add(handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Close the connection and permanently disable automatic reconnection.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Lifecycle hook for the owning process (signal handlers, supervisor).
    pub fn shutdown(&self) {
        info!("socket client shutting down");
        self.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.control.lock().state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.control.lock().attempts
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }
}

impl Inner {
    fn set_state(&self, ctl: &mut Control, state: ConnectionState) {
        if ctl.state != state {
            debug!(from = %ctl.state, to = %state, "socket state transition");
        }
        ctl.state = state;
        self.state_tx.send_replace(state);
    }

    fn connect(self: Arc<Self>, trigger: Trigger) -> BoxFuture<'static, Result<(), SocketError>> {
        async move {
            let generation = {
                let mut ctl = self.control.lock();
                if trigger == Trigger::Reconnect {
                    // Our own timer handle; disconnect() may have run since it fired.
                    ctl.reconnect_timer = None;
                    if !ctl.should_reconnect {
                        return Err(SocketError::Cancelled);
                    }
                }
                match ctl.state {
                    ConnectionState::Connecting => {
                        info!("connection attempt already in progress");
                        return Ok(());
                    }
                    ConnectionState::Open => {
                        debug!("socket already open");
                        return Ok(());
                    }
                    ConnectionState::Idle | ConnectionState::Closed => {}
                }
                if trigger == Trigger::Caller {
                    if let Some(timer) = ctl.reconnect_timer.take() {
                        timer.abort();
                    }
                    ctl.should_reconnect = true;
                }
                ctl.generation += 1;
                self.set_state(&mut ctl, ConnectionState::Connecting);
                ctl.generation
            };

            // Wait out a handshake abandoned by disconnect() before starting ours.
            let _gate = self.handshake_gate.lock().await;

            let timeout = self.settings.handshake_timeout;
            let (handshake, abort) =
                abortable(tokio::time::timeout(timeout, self.connector.connect()));
            {
                let mut ctl = self.control.lock();
                if ctl.generation != generation {
                    debug!("connection attempt superseded before handshake started");
                    return Err(SocketError::Cancelled);
                }
                ctl.handshake = Some(abort);
            }

            let outcome = match handshake.await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(SocketError::HandshakeTimeout(timeout)),
                Err(_aborted) => {
                    info!("handshake aborted by disconnect");
                    return Err(SocketError::Cancelled);
                }
            };

            {
                let mut ctl = self.control.lock();
                if ctl.generation == generation {
                    ctl.handshake = None;
                }
            }

            match outcome {
                Ok(transport) => self.open(generation, transport),
                Err(e) => {
                    error!(error = %e, "failed to connect to game socket");
                    self.closed(generation);
                    Err(e)
                }
            }
        }
        .boxed()
    }

    fn open(self: &Arc<Self>, generation: u64, transport: Transport) -> Result<(), SocketError> {
        let session_id = {
            let mut ctl = self.control.lock();
            if ctl.generation != generation {
                info!("discarding connection completed after disconnect");
                return Err(SocketError::Cancelled);
            }

            let id = Uuid::new_v4();
            let (outbound, rx) = mpsc::unbounded_channel();
            let task = tokio::spawn(run_session(
                Arc::clone(self),
                generation,
                id,
                transport,
                rx,
            ));
            ctl.session = Some(Session {
                id,
                outbound,
                _task: task,
            });
            ctl.attempts = 0;
            self.set_state(&mut ctl, ConnectionState::Open);
            id
        };

        info!(session = %session_id, "game socket connection established");
        if !self.send(&subscribe_frame(&self.settings.subscribe_channel)) {
            warn!(session = %session_id, "failed to queue subscribe frame");
        }
        Ok(())
    }

    /// Handle the end of a handshake or session belonging to `generation`.
    fn closed(self: &Arc<Self>, generation: u64) {
        let mut ctl = self.control.lock();
        if ctl.generation != generation {
            return;
        }

        ctl.session = None;
        self.set_state(&mut ctl, ConnectionState::Closed);

        if !ctl.should_reconnect {
            self.set_state(&mut ctl, ConnectionState::Idle);
            return;
        }

        let max = self.settings.max_reconnect_attempts;
        if ctl.attempts >= max {
            error!(max_attempts = max, "maximum reconnection attempts reached");
            self.set_state(&mut ctl, ConnectionState::Idle);
            return;
        }

        ctl.attempts += 1;
        let delay = self.settings.reconnect_delay;
        info!(
            attempt = ctl.attempts,
            max_attempts = max,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let inner = Arc::clone(self);
        ctl.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = Arc::clone(&inner).connect(Trigger::Reconnect).await {
                warn!(error = %e, "reconnection attempt failed");
            }
        }));
    }

    fn send<T: Serialize>(&self, message: &T) -> bool {
        let ctl = self.control.lock();
        let session = match (&ctl.state, &ctl.session) {
            (ConnectionState::Open, Some(session)) => session,
            _ => {
                warn!("game socket is not connected");
                return false;
            }
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to serialise socket message");
                return false;
            }
        };

        if session.outbound.send(text).is_err() {
            error!(session = %session.id, "socket writer has stopped");
            return false;
        }
        true
    }

    fn disconnect(&self) {
        let mut ctl = self.control.lock();
        info!(state = %ctl.state, "disconnecting from game socket");
        ctl.should_reconnect = false;
        ctl.generation += 1;
        if let Some(timer) = ctl.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(handshake) = ctl.handshake.take() {
            handshake.abort();
        }
        ctl.session = None;
        self.set_state(&mut ctl, ConnectionState::Idle);
    }

    fn dispatch(&self, session_id: Uuid, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(payload) => {
                self.listeners.dispatch(&payload);
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "dropping unparseable socket frame");
            }
        }
    }
}

/// Pump one connection: write queued frames, dispatch inbound frames in
/// arrival order, and report the close back to the state machine.
async fn run_session(
    inner: Arc<Inner>,
    generation: u64,
    session_id: Uuid,
    transport: Transport,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let Transport {
        mut sink,
        mut stream,
    } = transport;

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(text).await {
                        error!(session = %session_id, error = %e, "socket write failed");
                        break;
                    }
                }
                None => {
                    // Session dropped by disconnect(); no reconnect.
                    let _ = sink.close().await;
                    debug!(session = %session_id, "socket session closed locally");
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(text)) => inner.dispatch(session_id, &text),
                Some(Err(e)) => {
                    error!(session = %session_id, error = %e, "socket read error");
                    break;
                }
                None => {
                    warn!(session = %session_id, "socket connection closed by peer");
                    break;
                }
            },
        }
    }

    let _ = sink.close().await;
    inner.closed(generation);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Plan {
        Accept,
        Fail,
        Hang,
        AcceptAfter(Duration),
    }

    /// Server half of an in-memory transport.
    struct ServerEnd {
        to_client: fmpsc::UnboundedSender<Result<String, SocketError>>,
        from_client: fmpsc::UnboundedReceiver<String>,
    }

    impl ServerEnd {
        fn push(&self, text: &str) {
            self.to_client.unbounded_send(Ok(text.to_string())).unwrap();
        }

        async fn next_frame(&mut self) -> Option<Value> {
            self.from_client
                .next()
                .await
                .map(|text| serde_json::from_str(&text).unwrap())
        }
    }

    struct MockConnector {
        plans: Arc<Mutex<VecDeque<Plan>>>,
        attempts: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        servers: mpsc::UnboundedSender<ServerEnd>,
    }

    /// Counts a handshake as live until its future is dropped.
    struct LiveHandshake<'a>(&'a AtomicUsize);

    impl Drop for LiveHandshake<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        client: SocketClient,
        plans: Arc<Mutex<VecDeque<Plan>>>,
        attempts: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        servers: mpsc::UnboundedReceiver<ServerEnd>,
    }

    impl Harness {
        fn new(plans: Vec<Plan>) -> Self {
            let plans = Arc::new(Mutex::new(plans.into_iter().collect::<VecDeque<_>>()));
            let attempts = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let (tx, servers) = mpsc::unbounded_channel();
            let connector = MockConnector {
                plans: plans.clone(),
                attempts: attempts.clone(),
                live: Arc::new(AtomicUsize::new(0)),
                peak: peak.clone(),
                servers: tx,
            };
            Self {
                client: SocketClient::new(connector, SocketSettings::default()),
                plans,
                attempts,
                peak,
                servers,
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn peak_handshakes(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        async fn server(&mut self) -> ServerEnd {
            self.servers.recv().await.expect("connector dropped")
        }
    }

    fn accept(servers: &mpsc::UnboundedSender<ServerEnd>) -> Transport {
        let (to_client, from_server) = fmpsc::unbounded();
        let (to_server, from_client) = fmpsc::unbounded::<String>();
        servers
            .send(ServerEnd {
                to_client,
                from_client,
            })
            .unwrap();
        Transport {
            sink: Box::pin(
                to_server.sink_map_err(|e| SocketError::Transport(e.to_string())),
            ),
            stream: Box::pin(from_server),
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<Transport, SocketError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(live, Ordering::SeqCst);
            let _live = LiveHandshake(&self.live);
            let plan = self.plans.lock().pop_front().unwrap_or(Plan::Accept);
            match plan {
                Plan::Accept => Ok(accept(&self.servers)),
                Plan::Fail => Err(SocketError::Transport("connection refused".into())),
                Plan::Hang => futures::future::pending().await,
                Plan::AcceptAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(accept(&self.servers))
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_sends_subscribe_frame_exactly_once() {
        let mut h = Harness::new(vec![Plan::Accept]);
        h.client.connect().await.unwrap();
        assert_eq!(h.client.state(), ConnectionState::Open);

        let mut server = h.server().await;
        assert_eq!(
            server.next_frame().await,
            Some(json!({"type": "subscribe", "channel": "agent_live_game_list", "params": {}}))
        );
        tokio::task::yield_now().await;
        assert!(server.from_client.try_next().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connecting_is_a_noop() {
        let h = Harness::new(vec![Plan::Hang]);
        let client = h.client.clone();
        let first = tokio::spawn(async move { client.connect().await });
        tokio::task::yield_now().await;
        assert_eq!(h.client.state(), ConnectionState::Connecting);

        h.client.connect().await.unwrap();
        assert_eq!(h.attempts(), 1);

        h.client.disconnect();
        let _ = first.await;
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_closes_and_schedules_reconnect() {
        let h = Harness::new(vec![Plan::Hang]);
        let err = h.client.connect().await.unwrap_err();
        assert!(matches!(err, SocketError::HandshakeTimeout(_)));
        assert_eq!(h.client.state(), ConnectionState::Closed);
        assert_eq!(h.client.reconnect_attempts(), 1);
        h.client.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_stops_after_max_attempts() {
        let h = Harness::new((0..10).map(|_| Plan::Fail).collect());
        assert!(h.client.connect().await.is_err());

        tokio::time::sleep(Duration::from_secs(120)).await;
        // Initial attempt plus five scheduled reconnects.
        assert_eq!(h.attempts(), 6);
        assert_eq!(h.client.state(), ConnectionState::Idle);
        assert_eq!(h.client.reconnect_attempts(), 5);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_counter_and_subscribes_once() {
        let mut h = Harness::new(vec![Plan::Fail, Plan::Fail, Plan::Accept]);
        assert!(h.client.connect().await.is_err());

        let mut server = h.server().await;
        assert_eq!(h.attempts(), 3);
        tokio::task::yield_now().await;
        assert_eq!(h.client.state(), ConnectionState::Open);
        assert_eq!(h.client.reconnect_attempts(), 0);

        let frame = server.next_frame().await.unwrap();
        assert_eq!(frame["type"], "subscribe");
        tokio::task::yield_now().await;
        assert!(server.from_client.try_next().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_triggers_reconnect_and_subscription_replay() {
        let mut h = Harness::new(vec![Plan::Accept, Plan::Accept]);
        h.client.connect().await.unwrap();
        let first = h.server().await;
        drop(first);

        let mut second = h.server().await;
        assert_eq!(h.attempts(), 2);
        assert_eq!(second.next_frame().await.unwrap()["channel"], "agent_live_game_list");
        assert_eq!(h.client.state(), ConnectionState::Open);
        assert_eq!(h.client.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_is_treated_as_close() {
        let mut h = Harness::new(vec![Plan::Accept, Plan::Accept]);
        h.client.connect().await.unwrap();
        let first = h.server().await;
        first
            .to_client
            .unbounded_send(Err(SocketError::Transport("reset by peer".into())))
            .unwrap();

        let _second = h.server().await;
        assert_eq!(h.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let h = Harness::new(vec![Plan::Fail, Plan::Accept]);
        assert!(h.client.connect().await.is_err());
        assert_eq!(h.client.state(), ConnectionState::Closed);

        h.client.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.attempts(), 1);
        assert_eq!(h.client.state(), ConnectionState::Idle);
        assert_eq!(h.plans.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_open_connection_without_reconnect() {
        let mut h = Harness::new(vec![Plan::Accept]);
        h.client.connect().await.unwrap();
        let mut server = h.server().await;
        server.next_frame().await.unwrap();

        h.client.disconnect();
        assert_eq!(server.next_frame().await, None);
        assert!(!h.client.send(&json!({"type": "ping"})));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.attempts(), 1);
        assert_eq!(h.client.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_handshake_cancels_connect() {
        let h = Harness::new(vec![Plan::AcceptAfter(Duration::from_secs(3))]);
        let client = h.client.clone();
        let pending = tokio::spawn(async move { client.connect().await });
        tokio::task::yield_now().await;

        h.client.disconnect();
        let result = pending.await.unwrap();

        assert!(matches!(result, Err(SocketError::Cancelled)));
        assert_eq!(h.client.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_disconnect_never_overlaps_handshakes() {
        let mut h = Harness::new(vec![
            Plan::AcceptAfter(Duration::from_secs(3)),
            Plan::AcceptAfter(Duration::from_secs(3)),
        ]);
        let client = h.client.clone();
        let abandoned = tokio::spawn(async move { client.connect().await });
        tokio::task::yield_now().await;
        assert_eq!(h.attempts(), 1);

        h.client.disconnect();
        h.client.connect().await.unwrap();

        assert!(matches!(abandoned.await.unwrap(), Err(SocketError::Cancelled)));
        assert_eq!(h.attempts(), 2);
        assert_eq!(h.peak_handshakes(), 1);
        assert_eq!(h.client.state(), ConnectionState::Open);

        let mut server = h.server().await;
        assert_eq!(server.next_frame().await.unwrap()["type"], "subscribe");
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_open_connection() {
        let h = Harness::new(vec![]);
        assert!(!h.client.send(&json!({"type": "ping"})));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped_and_dispatch_continues() {
        let mut h = Harness::new(vec![Plan::Accept]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for tag in ["first", "second"] {
            let tx = tx.clone();
            h.client.on_message(move |v| {
                let _ = tx.send((tag, v["n"].as_i64().unwrap_or(-1)));
            });
        }

        h.client.connect().await.unwrap();
        let server = h.server().await;
        server.push("{not json");
        server.push(r#"{"n": 1}"#);
        server.push(r#"{"n": 2}"#);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![("first", 1), ("second", 1), ("first", 2), ("second", 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_listener_does_not_block_later_listeners() {
        let mut h = Harness::new(vec![Plan::Accept]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.client.on_message(|_| panic!("listener bug"));
        h.client.on_message(move |v| {
            let _ = tx.send(v.clone());
        });

        h.client.connect().await.unwrap();
        let server = h.server().await;
        server.push(r#"{"type": "game", "n": 1}"#);
        server.push(r#"{"type": "game", "n": 2}"#);

        assert_eq!(rx.recv().await.unwrap()["n"], 1);
        assert_eq!(rx.recv().await.unwrap()["n"], 2);
        assert_eq!(h.client.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_listener_receives_nothing() {
        let mut h = Harness::new(vec![Plan::Accept]);
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
        let removed_tx = tx.clone();
        let id = h.client.on_message(move |_| {
            let _ = removed_tx.send("removed");
        });
        h.client.on_message(move |_| {
            let _ = tx.send("kept");
        });
        assert!(h.client.remove_listener(id));

        h.client.connect().await.unwrap();
        let server = h.server().await;
        server.push("{}");

        assert_eq!(rx.recv().await, Some("kept"));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_observable() {
        let h = Harness::new(vec![Plan::Accept]);
        let mut states = h.client.subscribe_state();
        assert_eq!(*states.borrow(), ConnectionState::Idle);

        h.client.connect().await.unwrap();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Open);
    }
}

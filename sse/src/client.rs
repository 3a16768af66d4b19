//! Client side of the host's `/events` stream.
//!
//! One driver task runs per `connect()` (a generation). The driver owns the
//! underlying connection, the pending reconnect deadline and the monitor
//! timer, and funnels every trigger through [`Driver::transition`]. State is
//! published on a watch channel; writes from a generation that is no longer
//! current are discarded.

use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::*;
use session::SessionState;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use crate::connection::{ConnectionId, ConnectionSnapshot, ConnectionState};
use crate::error::{not_authenticated, Error, ErrorKind};
use crate::message::ReceivedMessage;
use crate::transport::{EventStream, Transport, TransportEvent};

/// Only events of this type carry messages.
pub const MESSAGE_EVENT: &str = "message";

/// Receives each parsed message, strictly in transport order.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: ReceivedMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(ReceivedMessage) + Send + Sync,
{
    fn handle(&self, message: ReceivedMessage) {
        self(message)
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Fixed pause before reopening a lost connection.
    pub reconnect_delay: Duration,
    /// How often the monitor inspects readiness.
    pub monitor_interval: Duration,
    /// A connection still opening after this long is treated as stuck.
    pub connect_timeout: Duration,
    /// A connected stream silent for this long is treated as dead. `None` disables the check.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            monitor_interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(45)),
        }
    }
}

struct RunningDriver {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct EventStreamClient {
    session: Arc<SessionState>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler>,
    config: StreamConfig,
    state: Arc<watch::Sender<ConnectionSnapshot>>,
    generation: AtomicU64,
    running: tokio::sync::Mutex<Option<RunningDriver>>,
}

impl EventStreamClient {
    pub fn new(
        session: Arc<SessionState>,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn MessageHandler>,
        config: StreamConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionSnapshot {
            generation: 0,
            state: ConnectionState::Disconnected,
        });

        Self {
            session,
            transport,
            handler,
            config,
            state: Arc::new(state),
            generation: AtomicU64::new(0),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Replaces any existing connection with a fresh one against the bound host.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut running = self.running.lock().await;
        self.restart(&mut running).await
    }

    /// Connects unless a driver is already running. The check and the start
    /// happen under one lock, so overlapping calls open a single connection.
    pub async fn ensure_connected(&self) -> Result<(), Error> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|driver| !driver.task.is_finished()) {
            return Ok(());
        }
        self.restart(&mut running).await
    }

    async fn restart(&self, running: &mut Option<RunningDriver>) -> Result<(), Error> {
        self.stop_driver(running.take()).await;

        if !self.session.is_authenticated() {
            warn!("Not connecting the event stream: session is not authenticated");
            self.publish_idle();
            return Err(not_authenticated());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ConnectionSnapshot {
            generation,
            state: ConnectionState::Connecting,
        });
        info!("Starting event stream (generation {generation})");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = Driver {
            generation,
            session: self.session.clone(),
            transport: self.transport.clone(),
            handler: self.handler.clone(),
            config: self.config.clone(),
            state_tx: self.state.clone(),
            state: ConnectionState::Connecting,
            stream: None,
            connection_id: None,
            reconnect_at: None,
            connecting_since: Instant::now(),
            last_activity: Instant::now(),
        };
        let task = tokio::spawn(driver.run(shutdown_rx));

        *running = Some(RunningDriver {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Closes the connection and clears every timer. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let mut running = self.running.lock().await;
        if let Some(driver) = running.take() {
            info!("Stopping event stream");
            self.stop_driver(Some(driver)).await;
        }
        self.publish_idle();
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state.subscribe()
    }

    /// Resolves once the stream reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), Error> {
        let mut receiver = self.state.subscribe();
        receiver
            .wait_for(|snapshot| snapshot.state == target)
            .await
            .map(|_| ())
            .map_err(|err| Error {
                source: Some(Box::new(err)),
                error_kind: ErrorKind::Closed,
            })
    }

    async fn stop_driver(&self, driver: Option<RunningDriver>) {
        if let Some(driver) = driver {
            let _ = driver.shutdown.send(());
            if let Err(err) = driver.task.await {
                warn!("Event stream task ended abnormally: {err}");
            }
        }
    }

    fn publish_idle(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ConnectionSnapshot {
            generation,
            state: ConnectionState::Disconnected,
        });
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        if let Some(driver) = self.running.get_mut().take() {
            driver.task.abort();
        }
    }
}

#[derive(Debug)]
enum Trigger {
    Opened,
    Received { event_type: String, data: String },
    KeepAlive,
    Failed(Error),
    Closed,
    ReconnectDue,
    MonitorTick,
}

struct Driver {
    generation: u64,
    session: Arc<SessionState>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler>,
    config: StreamConfig,
    state_tx: Arc<watch::Sender<ConnectionSnapshot>>,

    state: ConnectionState,
    stream: Option<EventStream>,
    connection_id: Option<ConnectionId>,
    reconnect_at: Option<Instant>,
    connecting_since: Instant,
    last_activity: Instant,
}

impl Driver {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut monitor = tokio::time::interval_at(
            Instant::now() + self.config.monitor_interval,
            self.config.monitor_interval,
        );
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.open_connection().await;

        loop {
            let trigger = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                item = next_item(&mut self.stream) => match item {
                    Some(Ok(TransportEvent::Open)) => Trigger::Opened,
                    Some(Ok(TransportEvent::Message { event_type, data })) => {
                        Trigger::Received { event_type, data }
                    }
                    Some(Ok(TransportEvent::KeepAlive)) => Trigger::KeepAlive,
                    Some(Err(err)) => Trigger::Failed(err),
                    None => Trigger::Closed,
                },
                _ = wait_until(self.reconnect_at) => Trigger::ReconnectDue,
                _ = monitor.tick() => Trigger::MonitorTick,
            };

            self.transition(trigger).await;
        }

        self.stream = None;
        debug!("Event stream driver {} stopped", self.generation);
    }

    /// The only place state changes.
    async fn transition(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Opened => self.mark_connected(),
            Trigger::Received { event_type, data } => {
                self.mark_connected();
                self.last_activity = Instant::now();
                self.deliver(&event_type, &data);
            }
            Trigger::KeepAlive => {
                self.mark_connected();
                self.last_activity = Instant::now();
            }
            Trigger::Failed(err) => {
                warn!("Event stream {} failed: {err}", self.connection_label());
                self.connection_lost();
            }
            Trigger::Closed => {
                info!("Event stream {} closed by host", self.connection_label());
                self.connection_lost();
            }
            Trigger::ReconnectDue => {
                self.reconnect_at = None;
                if self.state == ConnectionState::Disconnected {
                    self.open_connection().await;
                }
            }
            Trigger::MonitorTick => self.inspect().await,
        }
    }

    async fn inspect(&mut self) {
        match self.state {
            ConnectionState::Disconnected if self.reconnect_at.is_none() => {
                warn!("Event stream is down with no reconnect pending, reconnecting");
                self.open_connection().await;
            }
            ConnectionState::Connecting
                if self.connecting_since.elapsed() >= self.config.connect_timeout =>
            {
                warn!(
                    "Event stream {} stuck connecting for {:?}, reconnecting",
                    self.connection_label(),
                    self.connecting_since.elapsed()
                );
                self.open_connection().await;
            }
            ConnectionState::Connected => {
                if let Some(idle_timeout) = self.config.idle_timeout {
                    let silent_for = self.last_activity.elapsed();
                    if silent_for >= idle_timeout {
                        warn!(
                            "Event stream {} silent for {:?}, reconnecting",
                            self.connection_label(),
                            silent_for
                        );
                        self.open_connection().await;
                    }
                }
            }
            _ => trace!("Event stream {} is {}", self.connection_label(), self.state),
        }
    }

    fn deliver(&self, event_type: &str, data: &str) {
        if event_type != MESSAGE_EVENT {
            debug!("Ignoring '{event_type}' event");
            return;
        }

        match serde_json::from_str::<ReceivedMessage>(data) {
            Ok(message) => {
                debug!("Received message from {}", message.from);
                self.handler.handle(message);
            }
            Err(err) => warn!("Dropping unparsable message payload: {err}"),
        }
    }

    /// Drops whatever connection exists and opens a new one.
    async fn open_connection(&mut self) {
        self.stream = None;
        self.reconnect_at = None;
        self.connecting_since = Instant::now();
        self.set_state(ConnectionState::Connecting);

        let url = match self.session.get_base_url().await {
            Ok(base_url) => format!("{base_url}/events"),
            Err(err) => {
                warn!("Cannot open event stream: {err}");
                self.connection_lost();
                return;
            }
        };
        let headers = self.session.get_auth_headers().await;

        match self.transport.open(&url, &headers) {
            Ok(stream) => {
                let connection_id = ConnectionId::new();
                info!("Opening event stream {connection_id} to {url}");
                self.connection_id = Some(connection_id);
                self.stream = Some(stream);
            }
            Err(err) => {
                warn!("Failed to open event stream to {url}: {err}");
                self.connection_lost();
            }
        }
    }

    fn mark_connected(&mut self) {
        if self.state == ConnectionState::Connecting {
            info!("Event stream {} connected", self.connection_label());
            self.last_activity = Instant::now();
            self.set_state(ConnectionState::Connected);
        }
    }

    fn connection_lost(&mut self) {
        self.stream = None;
        self.connection_id = None;
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_none() {
            info!("Reconnecting event stream in {:?}", self.config.reconnect_delay);
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        let generation = self.generation;
        self.state_tx.send_if_modified(|snapshot| {
            if snapshot.generation != generation || snapshot.state == state {
                return false;
            }
            snapshot.state = state;
            true
        });
    }

    fn connection_label(&self) -> &str {
        self.connection_id
            .as_ref()
            .map(ConnectionId::as_str)
            .unwrap_or("-")
    }
}

async fn next_item(stream: &mut Option<EventStream>) -> Option<Result<TransportEvent, Error>> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::transport_error;
    use futures_util::stream;
    use reqwest::header::HeaderMap;
    use secrecy::SecretString;
    use serde_json::json;
    use session::{AuthStatus, HostInfo, MemoryStore, SessionConfig};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    enum Script {
        Fail,
        /// Yields the items, then stays open when `hold` is set or closes otherwise.
        Stream {
            items: Vec<TransportEvent>,
            hold: bool,
        },
        /// Opens, then sends a keep-alive comment every period.
        Heartbeat(Duration),
    }

    #[derive(Default)]
    struct FakeTransport {
        opens: AtomicUsize,
        urls: Mutex<Vec<String>>,
        script: Mutex<VecDeque<Script>>,
    }

    impl FakeTransport {
        fn scripted(script: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl Transport for FakeTransport {
        fn open(&self, url: &str, headers: &HeaderMap) -> Result<EventStream, Error> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            assert!(headers.contains_key("authorization"));

            // Unscripted opens succeed and stay open
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Script::Stream {
                items: vec![TransportEvent::Open],
                hold: true,
            });

            match next {
                Script::Fail => Err(transport_error("connection refused")),
                Script::Heartbeat(period) => {
                    let beats = stream::unfold((), move |()| async move {
                        tokio::time::sleep(period).await;
                        Some((Ok(TransportEvent::KeepAlive), ()))
                    });
                    Ok(stream::iter([Ok(TransportEvent::Open)]).chain(beats).boxed())
                }
                Script::Stream { items, hold } => {
                    let items = stream::iter(items.into_iter().map(Ok));
                    if hold {
                        Ok(items.chain(stream::pending()).boxed())
                    } else {
                        Ok(items.boxed())
                    }
                }
            }
        }
    }

    fn message(body: &str) -> TransportEvent {
        TransportEvent::Message {
            event_type: MESSAGE_EVENT.to_string(),
            data: json!({
                "from": "192.168.1.20",
                "from_name": "phone",
                "message": body,
                "message_type": "text",
                "timestamp": "2024-05-01T10:00:00Z",
                "is_self": false,
                "attachments": []
            })
            .to_string(),
        }
    }

    async fn authenticated_session() -> Arc<SessionState> {
        let session = SessionState::new(
            Arc::new(MemoryStore::new()),
            reqwest::Client::new(),
            SessionConfig::default(),
            events::EventPublisher::new(),
        );
        session
            .sync_from(
                Some(SecretString::new("T1".to_string())),
                AuthStatus {
                    is_server_reachable: true,
                    is_authenticated: true,
                    host: Some(HostInfo::new("192.168.1.10", 8000)),
                    credentials: None,
                    last_error: None,
                },
            )
            .await;
        Arc::new(session)
    }

    fn config() -> StreamConfig {
        StreamConfig {
            reconnect_delay: Duration::from_secs(3),
            monitor_interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
        }
    }

    fn client_with(
        session: Arc<SessionState>,
        transport: Arc<FakeTransport>,
        config: StreamConfig,
    ) -> (EventStreamClient, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = move |message: ReceivedMessage| {
            let _ = tx.send(message.message);
        };
        let client = EventStreamClient::new(session, transport, Arc::new(handler), config);
        (client, rx)
    }

    async fn wait_connected(client: &EventStreamClient) {
        tokio::time::timeout(
            Duration::from_secs(60),
            client.wait_for_state(ConnectionState::Connected),
        )
        .await
        .expect("stream never connected")
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_fixed_delay_until_connected() {
        let transport = FakeTransport::scripted(vec![Script::Fail, Script::Fail, Script::Fail]);
        let (client, _rx) = client_with(authenticated_session().await, transport.clone(), config());

        let started = Instant::now();
        client.connect().await.unwrap();
        wait_connected(&client).await;

        assert_eq!(transport.opens(), 4);
        // Three fixed delays, never growing
        assert!(started.elapsed() >= Duration::from_secs(9));
        assert!(started.elapsed() < Duration::from_secs(12));
        assert_eq!(
            transport.urls.lock().unwrap()[0],
            "http://192.168.1.10:8000/events"
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.opens(), 4);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_arrive_in_order_across_reconnect() {
        let transport = FakeTransport::scripted(vec![
            Script::Stream {
                items: vec![TransportEvent::Open, message("one"), message("two")],
                hold: false,
            },
            Script::Stream {
                items: vec![TransportEvent::Open, message("three")],
                hold: true,
            },
        ]);
        let (client, mut rx) = client_with(authenticated_session().await, transport.clone(), config());

        client.connect().await.unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            let next = tokio::time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(next);
        }

        assert_eq!(received, vec!["one", "two", "three"]);
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_requires_authentication() {
        let session = Arc::new(SessionState::new(
            Arc::new(MemoryStore::new()),
            reqwest::Client::new(),
            SessionConfig::default(),
            events::EventPublisher::new(),
        ));
        let transport = FakeTransport::scripted(vec![]);
        let (client, _rx) = client_with(session, transport.clone(), config());

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::NotAuthenticated);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.opens(), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_stops_timers() {
        let transport = FakeTransport::scripted(vec![]);
        let (client, _rx) = client_with(authenticated_session().await, transport.clone(), config());

        client.connect().await.unwrap();
        wait_connected(&client).await;

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.opens(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_replaces_existing_connection() {
        let transport = FakeTransport::scripted(vec![]);
        let (client, _rx) = client_with(authenticated_session().await, transport.clone(), config());

        client.connect().await.unwrap();
        wait_connected(&client).await;
        let first = client.subscribe_state().borrow().generation;

        client.connect().await.unwrap();
        wait_connected(&client).await;

        assert_eq!(transport.opens(), 2);
        assert!(client.subscribe_state().borrow().generation > first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_connected_keeps_running_stream() {
        let transport = FakeTransport::scripted(vec![]);
        let (client, _rx) = client_with(authenticated_session().await, transport.clone(), config());

        client.ensure_connected().await.unwrap();
        wait_connected(&client).await;
        client.ensure_connected().await.unwrap();
        client.ensure_connected().await.unwrap();

        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ensure_connected_opens_once() {
        let transport = FakeTransport::scripted(vec![]);
        let (client, _rx) = client_with(authenticated_session().await, transport.clone(), config());

        let (first, second) = tokio::join!(client.ensure_connected(), client.ensure_connected());
        first.unwrap();
        second.unwrap();
        wait_connected(&client).await;

        assert_eq!(transport.opens(), 1);
        assert_eq!(client.subscribe_state().borrow().generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_replaces_stuck_connection() {
        let transport = FakeTransport::scripted(vec![Script::Stream {
            items: vec![],
            hold: true,
        }]);
        let (client, _rx) = client_with(authenticated_session().await, transport.clone(), config());

        client.connect().await.unwrap();
        wait_connected(&client).await;

        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_replaces_silent_connection() {
        let transport = FakeTransport::scripted(vec![Script::Stream {
            items: vec![TransportEvent::Open],
            hold: true,
        }]);
        let mut config = config();
        config.idle_timeout = Some(Duration::from_secs(10));
        let (client, _rx) = client_with(authenticated_session().await, transport.clone(), config);

        client.connect().await.unwrap();
        wait_connected(&client).await;
        assert_eq!(transport.opens(), 1);

        tokio::time::sleep(Duration::from_secs(13)).await;
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_prevents_idle_reconnect() {
        let transport = FakeTransport::scripted(vec![Script::Heartbeat(Duration::from_secs(4))]);
        let mut config = config();
        config.idle_timeout = Some(Duration::from_secs(10));
        let (client, _rx) = client_with(authenticated_session().await, transport.clone(), config);

        client.connect().await.unwrap();
        wait_connected(&client).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.opens(), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_and_foreign_events_are_dropped() {
        let transport = FakeTransport::scripted(vec![Script::Stream {
            items: vec![
                TransportEvent::Open,
                TransportEvent::Message {
                    event_type: MESSAGE_EVENT.to_string(),
                    data: "{not json".to_string(),
                },
                TransportEvent::Message {
                    event_type: "presence".to_string(),
                    data: "{}".to_string(),
                },
                message("kept"),
            ],
            hold: true,
        }]);
        let (client, mut rx) = client_with(authenticated_session().await, transport.clone(), config());

        client.connect().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, "kept");
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(transport.opens(), 1);
    }
}

//! Connection controller: socket handshake, frame routing, link loss.
//!
//! A *link* is one authenticated socket together with its writer, reader,
//! and monitor tasks. The controller owns the current link, the cached
//! socket parameters, and the connection state, and is the
//! [`LinkEstablisher`] the reconnect engine drives.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use livepush_core::{FrameCodec, LiveEvent, Opcode, decode_event};
use livepush_settings::ClientSettings;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::heartbeat::{self, HeartbeatResult, ReplyClock};
use crate::reconnect::{LinkEstablisher, ReconnectEngine};
use crate::session::{ConnectParams, SessionManager};
use crate::shutdown::ShutdownCoordinator;
use crate::state::{AtomicConnectionState, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const OUTBOUND_QUEUE: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Item on a link's outbound queue.
#[derive(Debug)]
pub enum Outbound {
    /// Encoded frame, sent as one binary message.
    Frame(Bytes),
    /// Send a close frame and stop writing.
    Close,
}

/// One authenticated socket.
struct Link {
    id: u64,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    manual: AtomicBool,
    lost: AtomicBool,
    clock: Arc<ReplyClock>,
}

impl Link {
    /// Close on purpose; no reconnect follows.
    fn close_manual(&self) {
        self.manual.store(true, Ordering::Release);
        let _ = self.outbound.try_send(Outbound::Close);
        self.cancel.cancel();
    }
}

/// Drives the socket side of the client.
pub struct ConnectionController {
    me: Weak<Self>,
    settings: ClientSettings,
    codec: FrameCodec,
    state: AtomicConnectionState,
    session: Arc<SessionManager>,
    engine: Arc<ReconnectEngine>,
    shutdown: ShutdownCoordinator,
    events: broadcast::Sender<LiveEvent>,
    params: Mutex<Option<ConnectParams>>,
    link: Mutex<Option<Arc<Link>>>,
    next_link_id: AtomicU64,
    reloads: AtomicU64,
    reload_lock: tokio::sync::Mutex<()>,
    failure: Mutex<Option<String>>,
}

impl ConnectionController {
    /// Controller for `settings`, identifying with `code`.
    pub fn new(settings: ClientSettings, code: impl Into<String>) -> Result<Arc<Self>> {
        let session = Arc::new(SessionManager::new(&settings, code)?);
        let shutdown = ShutdownCoordinator::new();
        let policy = livepush_core::BackoffPolicy {
            base_delay_ms: settings.reconnect.base_delay_ms,
            max_delay_ms: settings.reconnect.max_delay_ms,
            max_attempts: settings.reconnect.max_attempts,
            ..livepush_core::BackoffPolicy::default()
        };
        let engine = Arc::new(ReconnectEngine::new(policy, shutdown.token()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let codec = FrameCodec::with_max_frame_size(settings.max_frame_size);

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            settings,
            codec,
            state: AtomicConnectionState::default(),
            session,
            engine,
            shutdown,
            events,
            params: Mutex::new(None),
            link: Mutex::new(None),
            next_link_id: AtomicU64::new(1),
            reloads: AtomicU64::new(0),
            reload_lock: tokio::sync::Mutex::new(()),
            failure: Mutex::new(None),
        }))
    }

    // ── Accessors ──────────────────────────────────────────────────────

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Session manager shared with the monitors.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Reconnect engine.
    pub fn engine(&self) -> &ReconnectEngine {
        &self.engine
    }

    /// New receiver for decoded events.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.events.subscribe()
    }

    /// Reloads performed so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Reason for the last terminal failure, cleared by the next success.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Whether `close` has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Open a session and connect.
    ///
    /// Only a failed session start is returned; a failed connect is handed
    /// to the reconnect engine. Calling this on a running client is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.shutdown.is_shutting_down() {
            return Err(ClientError::ShutdownInProgress);
        }
        if !self
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            warn!(state = %self.state(), "start ignored, client already running");
            return Ok(());
        }
        self.engine.reset();

        let params = match self.session.start(&self.shutdown.token()).await {
            Ok(params) => params,
            Err(e) => {
                let _ = self.state.set(ConnectionState::Disconnected);
                if !matches!(e, ClientError::ShutdownInProgress) {
                    error!(error = %e, "session start failed");
                    *self.failure.lock() = Some(e.to_string());
                }
                return Err(e);
            }
        };

        match self.establish(params).await {
            Ok(()) | Err(ClientError::ShutdownInProgress) => {}
            Err(e) => {
                warn!(error = %e, "initial connect failed");
                let _ = self.state.set(ConnectionState::Reconnecting);
                self.trigger_reconnect("initial connect failed");
            }
        }
        Ok(())
    }

    /// Tear down the link and connect again with a fresh session, now.
    pub async fn reload(&self) {
        if self.shutdown.is_shutting_down() {
            return;
        }
        let _guard = self.reload_lock.lock().await;
        let _ = self.reloads.fetch_add(1, Ordering::Relaxed);
        info!("reloading connection");

        self.engine.cancel_sequence().await;
        self.engine.reset();
        self.drop_link();
        let _ = self.state.set(ConnectionState::Connecting);

        let result = match self.session.start(&self.shutdown.token()).await {
            Ok(params) => self.establish(params).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!("reload complete"),
            Err(ClientError::ShutdownInProgress) => {}
            Err(e) => {
                warn!(error = %e, "reload failed, handing over to reconnect");
                let _ = self.state.set(ConnectionState::Reconnecting);
                self.trigger_reconnect("reload failed");
            }
        }
    }

    /// End the session, close the socket, and stop every task.
    pub async fn close(&self) {
        if self.state() == ConnectionState::ShuttingDown {
            return;
        }
        let _ = self.state.set(ConnectionState::ShuttingDown);
        self.shutdown.shutdown();
        info!(tasks = self.shutdown.active_tasks(), "closing client");

        self.session.end().await;
        self.drop_link();
        self.shutdown.graceful_shutdown(None).await;
        info!("client closed");
    }

    // ── Handshake ──────────────────────────────────────────────────────

    /// Connect, authenticate, and start the link tasks.
    async fn establish(&self, params: ConnectParams) -> Result<()> {
        if self.shutdown.is_shutting_down() {
            return Err(ClientError::ShutdownInProgress);
        }
        let _ = self.state.set(ConnectionState::Connecting);
        debug!(url = %params.socket_url, "connecting socket");

        let (socket, _) = tokio::time::timeout(
            self.settings.connect_timeout(),
            connect_async(params.socket_url.as_str()),
        )
        .await
        .map_err(|_| ClientError::timeout("socket connect"))??;

        let _ = self.state.set(ConnectionState::Authenticating);
        let (mut sink, mut source) = socket.split();
        let auth = self.codec.encode(Opcode::Auth, params.auth_body.as_bytes());
        sink.send(Message::Binary(auth)).await?;

        tokio::time::timeout(
            self.settings.auth_timeout(),
            self.await_auth_reply(&mut source),
        )
        .await
        .map_err(|_| ClientError::timeout("auth reply"))??;

        if !self.state.set(ConnectionState::Connected) {
            close_sink(&mut sink).await;
            return Err(ClientError::ShutdownInProgress);
        }

        let link = self.install_link(sink, source);
        self.engine.reset();
        *self.params.lock() = Some(params);
        *self.failure.lock() = None;
        info!(link = link.id, game_id = ?self.session.game_id(), "connected");

        if self.shutdown.is_shutting_down() {
            link.close_manual();
        }
        Ok(())
    }

    async fn await_auth_reply(&self, source: &mut WsSource) -> Result<()> {
        loop {
            let message = match source.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ClientError::Protocol("socket closed before auth reply".into())),
            };
            let Message::Binary(data) = message else {
                if matches!(message, Message::Close(_)) {
                    return Err(ClientError::Protocol("socket closed before auth reply".into()));
                }
                continue;
            };
            let frame = match self.codec.decode(&data) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame during auth");
                    continue;
                }
            };
            if frame.op() != Opcode::AuthReply {
                debug!(opcode = frame.opcode, "frame before auth reply ignored");
                continue;
            }

            let code = serde_json::from_slice::<Value>(&frame.body)
                .ok()
                .and_then(|v| v.get("code").and_then(Value::as_i64))
                .unwrap_or(0);
            if code != 0 {
                return Err(ClientError::AuthRejected { code });
            }
            info!("authenticated");
            return Ok(());
        }
    }

    fn install_link(&self, sink: WsSink, source: WsSource) -> Arc<Link> {
        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE);
        let link = Arc::new(Link {
            id: self.next_link_id.fetch_add(1, Ordering::Relaxed),
            outbound,
            cancel: CancellationToken::new(),
            manual: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            clock: Arc::new(ReplyClock::new()),
        });

        if let Some(previous) = self.link.lock().replace(Arc::clone(&link)) {
            previous.close_manual();
        }

        let Some(me) = self.me.upgrade() else {
            return link;
        };
        let s = &self.settings;

        self.shutdown.track(tokio::spawn(run_writer(
            sink,
            queue,
            Arc::clone(&link),
            Arc::clone(&me),
        )));
        self.shutdown.track(tokio::spawn(run_reader(
            source,
            Arc::clone(&link),
            Arc::clone(&me),
        )));

        let ping = heartbeat::run_socket_ping(
            link.outbound.clone(),
            self.codec,
            s.heartbeat_interval(),
            link.cancel.clone(),
        );
        let (ping_link, ping_me) = (Arc::clone(&link), Arc::clone(&me));
        self.shutdown.track(tokio::spawn(async move {
            if ping.await == HeartbeatResult::SendFailed {
                ping_me.on_link_lost(&ping_link, "heartbeat could not be queued");
            }
        }));

        let refresh = heartbeat::run_session_refresh(
            Arc::clone(&self.session),
            s.session_refresh_interval(),
            link.cancel.clone(),
        );
        self.shutdown.track(tokio::spawn(async move {
            let _ = refresh.await;
        }));

        let liveness = heartbeat::run_liveness_check(
            Arc::clone(&link.clock),
            s.liveness_grace(),
            s.liveness_interval(),
            s.liveness_timeout(),
            link.cancel.clone(),
        );
        let (live_link, live_me) = (Arc::clone(&link), me);
        self.shutdown.track(tokio::spawn(async move {
            if let HeartbeatResult::TimedOut { silent } = liveness.await {
                warn!(
                    link = live_link.id,
                    silent_ms = u64::try_from(silent.as_millis()).unwrap_or(u64::MAX),
                    "no heartbeat reply, closing stalled socket"
                );
                live_me.on_link_lost(&live_link, "heartbeat replies stopped");
            }
        }));

        link
    }

    // ── Routing ────────────────────────────────────────────────────────

    fn route_frame(&self, link: &Link, data: &[u8]) {
        let frame = match self.codec.decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(link = link.id, error = %e, "dropping undecodable frame");
                return;
            }
        };
        match frame.op() {
            Opcode::HeartbeatReply => {
                link.clock.mark();
                debug!("heartbeat reply");
            }
            Opcode::Message => self.route_event(&frame.body_text()),
            other => info!(opcode = other.as_raw(), "ignoring frame"),
        }
    }

    fn route_event(&self, payload: &str) {
        let event = match decode_event(payload) {
            Ok(LiveEvent::Unknown(tag)) => {
                info!(cmd = %tag, "unhandled command");
                return;
            }
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undecodable event");
                return;
            }
        };

        let reload = event.requires_reload();
        debug!(cmd = event.command(), "event");
        if self.events.send(event).is_err() {
            debug!("no event subscribers");
        }

        if reload {
            info!("push channel ended by the platform, reloading");
            if let Some(me) = self.me.upgrade() {
                self.shutdown.track(tokio::spawn(async move { me.reload().await }));
            }
        }
    }

    // ── Loss handling ──────────────────────────────────────────────────

    /// Report that `link` failed. Only the first report per link counts.
    fn on_link_lost(&self, link: &Link, reason: &str) {
        if link.manual.load(Ordering::Acquire) || self.shutdown.is_shutting_down() {
            return;
        }
        if link.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(link = link.id, reason, "link lost");
        link.cancel.cancel();
        {
            let mut current = self.link.lock();
            if current.as_ref().is_some_and(|l| l.id == link.id) {
                *current = None;
            }
        }
        let _ = self.state.set(ConnectionState::Reconnecting);
        self.trigger_reconnect(reason);
    }

    fn trigger_reconnect(&self, reason: &str) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        if let Some(handle) = self.engine.trigger(me, reason) {
            self.shutdown.track(handle);
        }
    }

    fn drop_link(&self) {
        if let Some(link) = self.link.lock().take() {
            debug!(link = link.id, "closing link");
            link.close_manual();
        }
    }

    fn mark_reconnecting(&self) {
        let _ = self.state.set(ConnectionState::Reconnecting);
    }
}

#[async_trait]
impl LinkEstablisher for ConnectionController {
    async fn reconnect_cached(&self) -> Result<()> {
        let params = self
            .params
            .lock()
            .clone()
            .ok_or_else(|| ClientError::Protocol("no cached socket parameters".into()))?;
        self.establish(params)
            .await
            .inspect_err(|_| self.mark_reconnecting())
    }

    async fn reconnect_fresh(&self) -> Result<()> {
        let params = self
            .session
            .start(&self.shutdown.token())
            .await
            .inspect_err(|_| self.mark_reconnecting())?;
        self.establish(params)
            .await
            .inspect_err(|_| self.mark_reconnecting())
    }

    fn on_exhausted(&self, attempts: u32) {
        let _ = self.state.set(ConnectionState::Disconnected);
        let reason = format!("reconnect gave up after {attempts} attempts");
        error!("{reason}");
        *self.failure.lock() = Some(reason);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Link tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn run_writer(
    mut sink: WsSink,
    mut queue: mpsc::Receiver<Outbound>,
    link: Arc<Link>,
    controller: Arc<ConnectionController>,
) {
    loop {
        tokio::select! {
            item = queue.recv() => match item {
                Some(Outbound::Frame(bytes)) => {
                    if let Err(e) = sink.send(Message::Binary(bytes)).await {
                        warn!(link = link.id, error = %e, "socket send failed");
                        controller.on_link_lost(&link, "send failed");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    close_sink(&mut sink).await;
                    break;
                }
            },
            () = link.cancel.cancelled() => {
                close_sink(&mut sink).await;
                break;
            }
        }
    }
    debug!(link = link.id, "writer stopped");
}

async fn run_reader(mut source: WsSource, link: Arc<Link>, controller: Arc<ConnectionController>) {
    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(Message::Binary(data))) => controller.route_frame(&link, &data),
                Some(Ok(Message::Close(frame))) => {
                    info!(link = link.id, ?frame, "socket closed by server");
                    controller.on_link_lost(&link, "closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(link = link.id, error = %e, "socket read failed");
                    controller.on_link_lost(&link, "read failed");
                    break;
                }
                None => {
                    controller.on_link_lost(&link, "socket stream ended");
                    break;
                }
            },
            () = link.cancel.cancelled() => break,
        }
    }
    debug!(link = link.id, "reader stopped");
}

async fn close_sink(sink: &mut WsSink) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client closing".to_string().into(),
    };
    let close = async {
        let _ = sink.send(Message::Close(Some(frame))).await;
        let _ = sink.close().await;
    };
    if tokio::time::timeout(CLOSE_FRAME_TIMEOUT, close).await.is_err() {
        debug!("close frame not delivered in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn controller() -> Arc<ConnectionController> {
        let settings = ClientSettings {
            app_id: 7,
            access_key: "key".into(),
            access_secret: "secret".into(),
            ..ClientSettings::default()
        };
        ConnectionController::new(settings, "ID-CODE").unwrap()
    }

    fn link() -> (Link, mpsc::Receiver<Outbound>) {
        let (outbound, queue) = mpsc::channel(4);
        let link = Link {
            id: 1,
            outbound,
            cancel: CancellationToken::new(),
            manual: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            clock: Arc::new(ReplyClock::new()),
        };
        (link, queue)
    }

    #[tokio::test]
    async fn undecodable_frames_are_dropped() {
        let controller = controller();
        let mut events = controller.subscribe();
        let (link, _queue) = link();
        let codec = controller.codec;

        controller.route_frame(&link, &[1, 2, 3]);
        controller.route_frame(&link, &codec.encode(Opcode::Message, &[b'x'; 4096]));
        controller.route_frame(&link, &codec.encode(Opcode::Message, b"not json"));
        controller.route_frame(&link, &codec.encode(Opcode::Message, br#"{"cmd":"NEW_THING"}"#));
        controller.route_frame(&link, &codec.encode(Opcode::Other(42), b"{}"));

        assert_matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty));
        assert!(!link.lost.load(Ordering::Acquire));
        assert!(!link.cancel.is_cancelled());
        assert_eq!(controller.engine().trigger_count(), 0);
    }

    #[tokio::test]
    async fn message_frames_are_broadcast() {
        let controller = controller();
        let mut events = controller.subscribe();
        let (link, _queue) = link();
        let payload = serde_json::json!({
            "cmd": "LIVE_OPEN_PLATFORM_LIVE_START",
            "data": { "room_id": 1, "open_id": "o", "title": "T", "area_name": "A", "timestamp": 100 }
        })
        .to_string();

        controller.route_frame(&link, &controller.codec.encode(Opcode::Message, payload.as_bytes()));

        assert_matches!(events.try_recv(), Ok(LiveEvent::LiveStart(msg)) if msg.title == "T");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_reply_marks_the_clock() {
        let controller = controller();
        let (link, _queue) = link();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(link.clock.since_reply() >= Duration::from_secs(10));

        controller.route_frame(&link, &controller.codec.encode(Opcode::HeartbeatReply, &[]));
        assert!(link.clock.since_reply() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn closed_link_loss_is_ignored() {
        let controller = controller();
        let (link, mut queue) = link();

        link.close_manual();
        controller.on_link_lost(&link, "closed by server");

        assert_matches!(queue.try_recv(), Ok(Outbound::Close));
        assert_eq!(controller.engine().trigger_count(), 0);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn loss_is_reported_once_per_link() {
        let controller = controller();
        let (link, _queue) = link();

        controller.on_link_lost(&link, "read failed");
        controller.on_link_lost(&link, "heartbeat replies stopped");

        assert!(link.cancel.is_cancelled());
        assert_eq!(controller.engine().trigger_count(), 1);
        assert_eq!(controller.state(), ConnectionState::Reconnecting);
        controller.close().await;
    }
}

//! End-to-end client scenarios against a mock platform API and a fake push socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use livepush_client::{ConnectionState, LivePushClient};
use livepush_core::frame::{self, Opcode};
use livepush_core::LiveEvent;
use livepush_settings::{ClientSettings, ReconnectSettings};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ─────────────────────────────────────────────────────────────────────────────
// Fake push server
// ─────────────────────────────────────────────────────────────────────────────

/// How the push server treats one accepted connection.
#[derive(Clone)]
enum Script {
    /// Authenticate, push these payloads, answer heartbeats.
    Push(Vec<String>),
    /// Authenticate, send these raw binary messages, then push the payloads.
    Junk { raw: Vec<Vec<u8>>, then: Vec<String> },
    /// Send these raw binary messages ahead of the auth reply, then push.
    NoiseBeforeAuth { raw: Vec<Vec<u8>>, then: Vec<String> },
    /// Answer the auth frame with a non-zero code, then close.
    RejectAuth,
    /// Authenticate, then close the socket.
    CloseAfterAuth,
    /// Authenticate, never answer heartbeats.
    Silent,
}

#[derive(Default)]
struct PushStats {
    connections: AtomicUsize,
    heartbeats: AtomicUsize,
    auth_bodies: Mutex<Vec<String>>,
}

struct PushServer {
    url: String,
    stats: Arc<PushStats>,
}

impl PushServer {
    /// Serve connection `n` with `scripts[n]`, or the last script once they run out.
    async fn start(scripts: Vec<Script>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/sub", listener.local_addr().unwrap());
        let stats = Arc::new(PushStats::default());

        let server_stats = Arc::clone(&stats);
        let _ = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = server_stats.connections.fetch_add(1, Ordering::SeqCst);
                let script = scripts
                    .get(n)
                    .or_else(|| scripts.last())
                    .cloned()
                    .unwrap_or(Script::Push(Vec::new()));
                let _ = tokio::spawn(serve(stream, script, Arc::clone(&server_stats)));
            }
        });

        Self { url, stats }
    }

    fn connections(&self) -> usize {
        self.stats.connections.load(Ordering::SeqCst)
    }
}

async fn serve(stream: TcpStream, script: Script, stats: Arc<PushStats>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    let Some(Ok(Message::Binary(data))) = ws.next().await else {
        return;
    };
    let auth = frame::decode(&data).unwrap();
    assert_eq!(auth.op(), Opcode::Auth);
    stats.auth_bodies.lock().push(auth.body_text());

    if let Script::NoiseBeforeAuth { raw, .. } = &script {
        for message in raw {
            if ws.send(Message::Binary(message.clone().into())).await.is_err() {
                return;
            }
        }
    }
    let code = if matches!(script, Script::RejectAuth) { -1 } else { 0 };
    let reply = frame::encode(Opcode::AuthReply, json!({ "code": code }).to_string().as_bytes());
    if ws.send(Message::Binary(reply)).await.is_err() {
        return;
    }

    let payloads = match script {
        Script::CloseAfterAuth | Script::RejectAuth => {
            let _ = ws.close(None).await;
            return;
        }
        Script::Silent => None,
        Script::Push(then) | Script::NoiseBeforeAuth { then, .. } => Some(then),
        Script::Junk { raw, then } => {
            for message in raw {
                if ws.send(Message::Binary(message.into())).await.is_err() {
                    return;
                }
            }
            Some(then)
        }
    };
    let answer_heartbeats = payloads.is_some();
    for payload in payloads.unwrap_or_default() {
        let push = frame::encode(Opcode::Message, payload.as_bytes());
        if ws.send(Message::Binary(push)).await.is_err() {
            return;
        }
    }

    while let Some(Ok(message)) = ws.next().await {
        let Message::Binary(data) = message else {
            continue;
        };
        let Ok(frame) = frame::decode(&data) else {
            continue;
        };
        if frame.op() == Opcode::Heartbeat {
            let _ = stats.heartbeats.fetch_add(1, Ordering::SeqCst);
            if answer_heartbeats {
                let pong = frame::encode(Opcode::HeartbeatReply, &[]);
                if ws.send(Message::Binary(pong)).await.is_err() {
                    return;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn mock_platform(socket_url: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/app/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "message": "0",
            "data": {
                "game_info": { "game_id": "game-1" },
                "websocket_info": {
                    "wss_link": [socket_url],
                    "auth_body": "{\"token\":\"t\"}"
                }
            }
        })))
        .mount(&server)
        .await;
    for endpoint in ["/v2/app/heartbeat", "/v2/app/end"] {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
            .mount(&server)
            .await;
    }
    server
}

async fn requests_to(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .count()
}

fn settings(api_host: &str) -> ClientSettings {
    ClientSettings {
        api_host: api_host.to_string(),
        app_id: 7,
        access_key: "key".into(),
        access_secret: "secret".into(),
        heartbeat_interval_ms: 50,
        session_refresh_interval_ms: 50,
        liveness_grace_ms: 200,
        liveness_interval_ms: 50,
        liveness_timeout_ms: 300,
        connect_timeout_ms: 2_000,
        auth_timeout_ms: 2_000,
        http_timeout_ms: 2_000,
        end_timeout_ms: 1_000,
        start_retry_step_ms: 10,
        reconnect: ReconnectSettings {
            base_delay_ms: 10,
            max_delay_ms: 100,
            max_attempts: 5,
        },
        ..ClientSettings::default()
    }
}

async fn next_event(events: &mut broadcast::Receiver<LiveEvent>) -> LiveEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event within 5s")
        .expect("event channel closed")
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn live_start() -> String {
    json!({
        "cmd": "LIVE_OPEN_PLATFORM_LIVE_START",
        "data": { "room_id": 1, "open_id": "o", "title": "T", "area_name": "A", "timestamp": 100 }
    })
    .to_string()
}

fn interaction_end() -> String {
    json!({
        "cmd": "LIVE_OPEN_PLATFORM_INTERACTION_END",
        "data": { "game_id": "game-1", "timestamp": 200 }
    })
    .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_start_is_delivered_after_auth() {
    let push = PushServer::start(vec![Script::Push(vec![
        json!({ "cmd": "SOMETHING_NEW", "data": {} }).to_string(),
        live_start(),
    ])])
    .await;
    let platform = mock_platform(&push.url).await;

    let client = LivePushClient::new(settings(&platform.uri())).unwrap();
    let mut events = client.subscribe();
    client.start("ID-CODE").await.unwrap();

    // The unknown command is dropped; the first delivered event is LIVE_START.
    let LiveEvent::LiveStart(msg) = next_event(&mut events).await else {
        panic!("expected LIVE_START");
    };
    assert_eq!(msg.title, "T");
    assert_eq!(msg.area_name, "A");
    assert_eq!(msg.timestamp, 100);

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.status(), "connected (game game-1)");
    assert_eq!(client.stats().reconnect_triggers, 0);
    assert_eq!(push.stats.auth_bodies.lock().as_slice(), ["{\"token\":\"t\"}"]);

    client.close().await;
    assert_eq!(client.state(), ConnectionState::ShuttingDown);
    assert_eq!(requests_to(&platform, "/v2/app/end").await, 1);
}

#[tokio::test]
async fn heartbeats_are_sent_and_session_refreshed() {
    let push = PushServer::start(vec![Script::Push(Vec::new())]).await;
    let platform = mock_platform(&push.url).await;

    let client = LivePushClient::new(settings(&platform.uri())).unwrap();
    client.start("ID-CODE").await.unwrap();

    let stats = Arc::clone(&push.stats);
    eventually("socket heartbeats", || stats.heartbeats.load(Ordering::SeqCst) >= 3).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(requests_to(&platform, "/v2/app/heartbeat").await >= 2);
    // Replies keep the link healthy past the liveness timeout.
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(push.connections(), 1);
    assert_eq!(client.stats().reconnect_triggers, 0);

    client.close().await;
}

#[tokio::test]
async fn interaction_end_reloads_with_fresh_session() {
    let push = PushServer::start(vec![
        Script::Push(vec![interaction_end()]),
        Script::Push(vec![live_start()]),
    ])
    .await;
    let platform = mock_platform(&push.url).await;

    let client = LivePushClient::new(settings(&platform.uri())).unwrap();
    let mut events = client.subscribe();
    client.start("ID-CODE").await.unwrap();

    assert!(matches!(next_event(&mut events).await, LiveEvent::InteractionEnd(_)));
    assert!(matches!(next_event(&mut events).await, LiveEvent::LiveStart(_)));

    assert_eq!(requests_to(&platform, "/v2/app/start").await, 2);
    assert_eq!(push.connections(), 2);
    let stats = client.stats();
    assert_eq!(stats.reloads, 1);
    assert_eq!(stats.reconnect_triggers, 0);

    client.close().await;
}

#[tokio::test]
async fn dropped_socket_reconnects_with_cached_parameters() {
    let push = PushServer::start(vec![
        Script::CloseAfterAuth,
        Script::Push(vec![live_start()]),
    ])
    .await;
    let platform = mock_platform(&push.url).await;

    let client = LivePushClient::new(settings(&platform.uri())).unwrap();
    let mut events = client.subscribe();
    client.start("ID-CODE").await.unwrap();

    assert!(matches!(next_event(&mut events).await, LiveEvent::LiveStart(_)));
    let watched = client.clone();
    eventually("reconnected state", move || {
        watched.state() == ConnectionState::Connected
    })
    .await;

    assert_eq!(push.connections(), 2);
    assert_eq!(requests_to(&platform, "/v2/app/start").await, 1);
    let stats = client.stats();
    assert_eq!(stats.reconnect_triggers, 1);
    assert_eq!(stats.attempt, 0);
    assert!(!stats.exhausted);

    client.close().await;
}

#[tokio::test]
async fn stalled_socket_is_replaced() {
    let push = PushServer::start(vec![Script::Silent, Script::Push(Vec::new())]).await;
    let platform = mock_platform(&push.url).await;

    let client = LivePushClient::new(settings(&platform.uri())).unwrap();
    client.start("ID-CODE").await.unwrap();

    let stats = Arc::clone(&push.stats);
    eventually("second connection", move || {
        stats.connections.load(Ordering::SeqCst) >= 2
    })
    .await;
    let watched = client.clone();
    eventually("reconnected state", move || {
        watched.state() == ConnectionState::Connected
    })
    .await;
    assert!(client.stats().reconnect_triggers >= 1);

    client.close().await;
}

#[tokio::test]
async fn unreachable_socket_exhausts_reconnects() {
    // Bind and drop a listener to get a port nothing listens on.
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("ws://{}/sub", listener.local_addr().unwrap())
    };
    let platform = mock_platform(&dead).await;

    let mut settings = settings(&platform.uri());
    settings.reconnect.max_attempts = 2;
    settings.start_max_attempts = 1;
    let client = LivePushClient::new(settings).unwrap();

    // Session start succeeds, so start reports success and reconnects run in the background.
    client.start("ID-CODE").await.unwrap();

    let watched = client.clone();
    eventually("exhaustion", move || watched.stats().exhausted).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.status().contains("gave up after 2 attempts"));

    client.close().await;
}

/// Sixteen-byte header that declares a twelve-byte header.
fn bad_header_frame() -> Vec<u8> {
    let mut raw = Vec::with_capacity(16);
    raw.extend_from_slice(&16u32.to_be_bytes());
    raw.extend_from_slice(&12u16.to_be_bytes());
    raw.extend_from_slice(&0u16.to_be_bytes());
    raw.extend_from_slice(&5u32.to_be_bytes());
    raw.extend_from_slice(&0u32.to_be_bytes());
    raw
}

#[tokio::test]
async fn malformed_frames_leave_the_link_up() {
    let raw = vec![
        vec![0, 1, 2],
        bad_header_frame(),
        frame::encode(Opcode::Message, &[b'x'; 4096]).to_vec(),
        frame::encode(Opcode::Other(99), b"{}").to_vec(),
        frame::encode(Opcode::Message, b"not json").to_vec(),
    ];
    let push = PushServer::start(vec![Script::Junk {
        raw,
        then: vec![live_start()],
    }])
    .await;
    let platform = mock_platform(&push.url).await;

    let client = LivePushClient::new(settings(&platform.uri())).unwrap();
    let mut events = client.subscribe();
    client.start("ID-CODE").await.unwrap();

    assert!(matches!(next_event(&mut events).await, LiveEvent::LiveStart(_)));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(push.connections(), 1);
    assert_eq!(client.stats().reconnect_triggers, 0);

    client.close().await;
}

#[tokio::test]
async fn frames_ahead_of_auth_reply_are_skipped() {
    let push = PushServer::start(vec![Script::NoiseBeforeAuth {
        raw: vec![
            vec![9, 9, 9],
            frame::encode(Opcode::HeartbeatReply, &[]).to_vec(),
        ],
        then: vec![live_start()],
    }])
    .await;
    let platform = mock_platform(&push.url).await;

    let client = LivePushClient::new(settings(&platform.uri())).unwrap();
    let mut events = client.subscribe();
    client.start("ID-CODE").await.unwrap();

    assert!(matches!(next_event(&mut events).await, LiveEvent::LiveStart(_)));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(push.connections(), 1);
    assert_eq!(client.stats().reconnect_triggers, 0);

    client.close().await;
}

#[tokio::test]
async fn rejected_auth_is_retried() {
    let push = PushServer::start(vec![Script::RejectAuth, Script::Push(vec![live_start()])]).await;
    let platform = mock_platform(&push.url).await;

    let client = LivePushClient::new(settings(&platform.uri())).unwrap();
    let mut events = client.subscribe();
    client.start("ID-CODE").await.unwrap();

    assert!(matches!(next_event(&mut events).await, LiveEvent::LiveStart(_)));
    let watched = client.clone();
    eventually("reconnected state", move || {
        watched.state() == ConnectionState::Connected
    })
    .await;

    assert_eq!(push.connections(), 2);
    let stats = client.stats();
    assert_eq!(stats.reconnect_triggers, 1);
    assert_eq!(stats.attempt, 0);

    client.close().await;
}

#[tokio::test]
async fn reload_after_exhaustion_connects_again() {
    // The first connect and both attempts (cached, then fresh) are rejected.
    let mut scripts = vec![Script::RejectAuth; 5];
    scripts.push(Script::Push(vec![live_start()]));
    let push = PushServer::start(scripts).await;
    let platform = mock_platform(&push.url).await;

    let mut settings = settings(&platform.uri());
    settings.reconnect.max_attempts = 2;
    let client = LivePushClient::new(settings).unwrap();
    let mut events = client.subscribe();
    client.start("ID-CODE").await.unwrap();

    let watched = client.clone();
    eventually("exhaustion", move || watched.stats().exhausted).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(push.connections(), 5);

    client.reload().await;

    assert!(matches!(next_event(&mut events).await, LiveEvent::LiveStart(_)));
    assert_eq!(client.state(), ConnectionState::Connected);
    let stats = client.stats();
    assert_eq!(stats.attempt, 0);
    assert!(!stats.exhausted);
    assert_eq!(stats.reloads, 1);
    assert_eq!(push.connections(), 6);
    assert_eq!(client.status(), "connected (game game-1)");

    client.close().await;
}

#[tokio::test]
async fn reload_cuts_a_backoff_short() {
    let push = PushServer::start(vec![
        Script::CloseAfterAuth,
        Script::Push(vec![live_start()]),
    ])
    .await;
    let platform = mock_platform(&push.url).await;

    let mut settings = settings(&platform.uri());
    settings.reconnect.base_delay_ms = 30_000;
    settings.reconnect.max_delay_ms = 60_000;
    let client = LivePushClient::new(settings).unwrap();
    let mut events = client.subscribe();
    client.start("ID-CODE").await.unwrap();

    let watched = client.clone();
    eventually("backoff in progress", move || {
        watched.stats().attempt == 1 && watched.state() == ConnectionState::Reconnecting
    })
    .await;

    let started = std::time::Instant::now();
    client.reload().await;
    assert!(started.elapsed() < Duration::from_secs(5), "reload waited {:?}", started.elapsed());

    assert!(matches!(next_event(&mut events).await, LiveEvent::LiveStart(_)));
    assert_eq!(client.state(), ConnectionState::Connected);
    let stats = client.stats();
    assert_eq!(stats.attempt, 0);
    assert_eq!(stats.reconnect_triggers, 1);
    assert_eq!(push.connections(), 2);

    client.close().await;
}

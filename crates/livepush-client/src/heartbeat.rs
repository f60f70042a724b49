//! Socket pings, session refresh, and reply-based liveness monitoring.
//!
//! Each authenticated link runs three monitors, all stopped by the link's
//! cancellation token:
//!
//! - [`run_socket_ping`] queues an empty heartbeat frame every period
//! - [`run_session_refresh`] refreshes the HTTP session every period
//! - [`run_liveness_check`] reports a stall once no heartbeat reply has
//!   arrived within the timeout

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use livepush_core::{FrameCodec, Opcode};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::Outbound;
use crate::session::SessionManager;

/// Outcome of a monitor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No heartbeat reply within the timeout.
    TimedOut {
        /// Time since the last reply when the stall was detected.
        silent: Duration,
    },
    /// The outbound queue is closed.
    SendFailed,
    /// The monitor was cancelled externally.
    Cancelled,
}

/// Time of the last heartbeat reply.
#[derive(Debug)]
pub struct ReplyClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ReplyClock {
    /// Clock marked at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record a reply now.
    pub fn mark(&self) {
        #[allow(clippy::cast_possible_truncation)]
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Release);
    }

    /// Time since the last recorded reply.
    pub fn since_reply(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Acquire));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for ReplyClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue a heartbeat frame every `period`, starting one period from now.
pub async fn run_socket_ping(
    outbound: mpsc::Sender<Outbound>,
    codec: FrameCodec,
    period: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frame = codec.encode(Opcode::Heartbeat, &[]);
                if outbound.send(Outbound::Frame(frame)).await.is_err() {
                    return HeartbeatResult::SendFailed;
                }
                debug!("heartbeat sent");
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

/// Refresh the HTTP session every `period`, starting one period from now.
pub async fn run_session_refresh(
    session: Arc<SessionManager>,
    period: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tokio::select! {
                    () = session.heartbeat() => {}
                    () = cancel.cancelled() => return HeartbeatResult::Cancelled,
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

/// Check `clock` after `grace`, then every `period`.
///
/// Returns [`HeartbeatResult::TimedOut`] at the first check where the last
/// reply is older than `timeout`.
pub async fn run_liveness_check(
    clock: Arc<ReplyClock>,
    grace: Duration,
    period: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(Instant::now() + grace, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let silent = clock.since_reply();
                if silent > timeout {
                    return HeartbeatResult::TimedOut { silent };
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use livepush_core::frame;

    #[tokio::test(start_paused = true)]
    async fn clock_measures_since_last_mark() {
        let clock = ReplyClock::new();
        time::advance(Duration::from_secs(5)).await;
        assert!(clock.since_reply() >= Duration::from_secs(5));
        clock.mark();
        assert!(clock.since_reply() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn ping_sends_heartbeat_frames_each_period() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_socket_ping(
            tx,
            FrameCodec::new(),
            Duration::from_secs(20),
            cancel.clone(),
        ));

        let started = Instant::now();
        for _ in 0..2 {
            let Some(Outbound::Frame(bytes)) = rx.recv().await else {
                panic!("expected a frame");
            };
            let decoded = frame::decode(&bytes).unwrap();
            assert_eq!(decoded.op(), Opcode::Heartbeat);
            assert!(decoded.body.is_empty());
        }
        assert!(started.elapsed() >= Duration::from_secs(40));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_reports_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result =
            run_socket_ping(tx, FrameCodec::new(), Duration::from_secs(1), CancellationToken::new())
                .await;
        assert_eq!(result, HeartbeatResult::SendFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_stalls_after_timeout() {
        let clock = Arc::new(ReplyClock::new());
        let started = Instant::now();
        let result = run_liveness_check(
            clock,
            Duration::from_secs(30),
            Duration::from_secs(20),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await;

        // Checks at 30s and 50s pass; 70s is past the timeout.
        assert_matches!(result, HeartbeatResult::TimedOut { silent } if silent >= Duration::from_secs(70));
        assert!(started.elapsed() >= Duration::from_secs(70));
        assert!(started.elapsed() < Duration::from_secs(71));
    }

    #[tokio::test(start_paused = true)]
    async fn replies_keep_link_alive() {
        let clock = Arc::new(ReplyClock::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_liveness_check(
            Arc::clone(&clock),
            Duration::from_secs(30),
            Duration::from_secs(20),
            Duration::from_secs(60),
            cancel.clone(),
        ));

        for _ in 0..10 {
            time::sleep(Duration::from_secs(20)).await;
            clock.mark();
        }
        assert!(!handle.is_finished());

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_before_first_check() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_liveness_check(
            Arc::new(ReplyClock::new()),
            Duration::from_secs(30),
            Duration::from_secs(20),
            Duration::from_secs(60),
            cancel,
        )
        .await;
        assert_eq!(result, HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn session_refresh_calls_heartbeat_endpoint() {
        use livepush_settings::ClientSettings;
        use wiremock::matchers::path;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(path("/v2/app/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": {
                    "game_info": { "game_id": "g" },
                    "websocket_info": { "wss_link": ["ws://x"], "auth_body": "a" }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(path("/v2/app/heartbeat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "code": 0 })))
            .mount(&server)
            .await;

        let settings = ClientSettings {
            api_host: server.uri(),
            access_key: "k".into(),
            access_secret: "s".into(),
            ..ClientSettings::default()
        };
        let session = Arc::new(SessionManager::new(&settings, "code").unwrap());
        let _ = session.start(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_session_refresh(
            session,
            Duration::from_millis(50),
            cancel.clone(),
        ));
        time::sleep(Duration::from_millis(280)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);

        let refreshes = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/v2/app/heartbeat")
            .count();
        assert!(refreshes >= 2, "expected at least two refreshes, got {refreshes}");
    }
}

//! Reconnect engine.
//!
//! At most one reconnect sequence runs at a time. A sequence sleeps for the
//! backoff delay, retries the cached socket parameters, and falls back to a
//! fresh session start, until a link is up or the attempt limit is passed.
//! Cancelling a sequence drops whatever attempt it is in and waits for its
//! task to exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use livepush_core::BackoffPolicy;
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;

/// What the engine drives to bring a link back.
#[async_trait]
pub trait LinkEstablisher: Send + Sync {
    /// Connect with the most recent socket parameters.
    async fn reconnect_cached(&self) -> Result<()>;

    /// Start a new session and connect with its parameters.
    async fn reconnect_fresh(&self) -> Result<()>;

    /// Every attempt failed; `attempts` is the number made.
    fn on_exhausted(&self, attempts: u32);
}

struct Sequence {
    id: u64,
    cancel: CancellationToken,
    /// Cancelled when the sequence task exits, however it exits.
    exited: CancellationToken,
}

/// Backoff-driven reconnect loop with a single in-flight sequence.
pub struct ReconnectEngine {
    policy: BackoffPolicy,
    shutdown: CancellationToken,
    attempts: AtomicU32,
    in_flight: AtomicBool,
    pending: AtomicBool,
    exhausted: AtomicBool,
    triggers: AtomicU64,
    next_sequence: AtomicU64,
    current: Mutex<Option<Sequence>>,
}

impl ReconnectEngine {
    /// Engine following `policy`; nothing runs once `shutdown` is cancelled.
    pub fn new(policy: BackoffPolicy, shutdown: CancellationToken) -> Self {
        Self {
            policy,
            shutdown,
            attempts: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            triggers: AtomicU64::new(0),
            next_sequence: AtomicU64::new(1),
            current: Mutex::new(None),
        }
    }

    /// Start a reconnect sequence unless one is running or shutdown began.
    ///
    /// A trigger that arrives while a sequence runs is remembered: if that
    /// sequence then succeeds, it makes another pass instead of stopping.
    pub fn trigger(
        self: &Arc<Self>,
        establisher: Arc<dyn LinkEstablisher>,
        reason: &str,
    ) -> Option<JoinHandle<()>> {
        if self.shutdown.is_cancelled() {
            return None;
        }

        let mut current = self.current.lock();
        if current.is_some() {
            self.pending.store(true, Ordering::Release);
            info!(reason, "reconnect already in progress");
            return None;
        }

        let id = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let exited = CancellationToken::new();
        *current = Some(Sequence {
            id,
            cancel: cancel.clone(),
            exited: exited.clone(),
        });
        self.in_flight.store(true, Ordering::Release);
        self.pending.store(false, Ordering::Release);
        let _ = self.triggers.fetch_add(1, Ordering::Relaxed);
        drop(current);

        info!(reason, sequence = id, "reconnect triggered");
        let engine = Arc::clone(self);
        let exit_guard = exited.drop_guard();
        Some(tokio::spawn(async move {
            let _exit_guard = exit_guard;
            loop {
                engine.run_sequence(&*establisher, &cancel).await;
                if !engine.finish(id, &cancel) {
                    break;
                }
                info!(sequence = id, "link lost again while reconnecting, continuing");
            }
        }))
    }

    /// Zero the attempt counter and clear the exhausted flag.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Release);
        self.exhausted.store(false, Ordering::Release);
    }

    /// Stop the running sequence, if any, and wait for its task to exit.
    ///
    /// An attempt in progress is dropped, so no link it was building gets
    /// installed after this returns.
    pub async fn cancel_sequence(&self) {
        let running = self
            .current
            .lock()
            .as_ref()
            .map(|s| (s.id, s.cancel.clone(), s.exited.clone()));

        if let Some((id, cancel, exited)) = running {
            cancel.cancel();
            exited.cancelled().await;
            info!(sequence = id, "reconnect sequence cancelled");

            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|s| s.id == id) {
                *current = None;
                self.in_flight.store(false, Ordering::Release);
            }
        }
        self.pending.store(false, Ordering::Release);
    }

    /// Attempts made by the current or last sequence.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Whether a sequence is running.
    pub fn is_reconnecting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the last sequence gave up.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// Sequences started so far.
    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    /// Backoff in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// One pass: back off and retry until a link is up, the limit is
    /// passed, or `cancel` fires.
    async fn run_sequence(&self, establisher: &dyn LinkEstablisher, cancel: &CancellationToken) {
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
            if self.policy.is_exhausted(attempt) {
                let made = attempt - 1;
                error!(attempts = made, "reconnect attempts exhausted, giving up");
                establisher.on_exhausted(made);
                self.exhausted.store(true, Ordering::Release);
                return;
            }

            let delay = self.policy.delay(attempt, rand::rng().random::<f64>());
            info!(
                attempt,
                max = self.policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting after delay"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return,
            }

            let cached = tokio::select! {
                result = establisher.reconnect_cached() => result,
                () = cancel.cancelled() => return,
            };
            let Err(e) = cached else {
                info!(attempt, "reconnected");
                return;
            };
            if !e.is_retryable() {
                return;
            }
            warn!(attempt, kind = ?e.kind(), error = %e, "reconnect with cached parameters failed");

            let fresh = tokio::select! {
                result = establisher.reconnect_fresh() => result,
                () = cancel.cancelled() => return,
            };
            match fresh {
                Ok(()) => {
                    info!(attempt, "reconnected with a fresh session");
                    return;
                }
                Err(e) if !e.is_retryable() => return,
                Err(e) => {
                    warn!(attempt, kind = ?e.kind(), error = %e, "reconnect with fresh session failed");
                }
            }
        }
    }

    /// Retire sequence `id`, unless a trigger arrived while it ran and it
    /// should make another pass. Shares the `current` lock with `trigger`,
    /// so a loss reported at any point before this call is seen here.
    fn finish(&self, id: u64, cancel: &CancellationToken) -> bool {
        let mut current = self.current.lock();
        if !current.as_ref().is_some_and(|s| s.id == id) {
            return false;
        }
        let again = self.pending.swap(false, Ordering::AcqRel)
            && !cancel.is_cancelled()
            && !self.is_exhausted();
        if !again {
            *current = None;
            self.in_flight.store(false, Ordering::Release);
        }
        again
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

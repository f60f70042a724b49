//! Session lifecycle over the signed HTTP API.
//!
//! A session is opened with `/v2/app/start`, which yields the platform game
//! id and the push socket parameters, kept alive with `/v2/app/heartbeat`,
//! and closed with `/v2/app/end`.

use std::time::Duration;

use livepush_settings::ClientSettings;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::signer::RequestSigner;

const START_PATH: &str = "/v2/app/start";
const HEARTBEAT_PATH: &str = "/v2/app/heartbeat";
const END_PATH: &str = "/v2/app/end";

/// Socket address and opaque auth payload returned by a session start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectParams {
    /// Push socket URL.
    pub socket_url: String,
    /// Body of the auth frame, passed through unchanged.
    pub auth_body: String,
}

/// Owns the platform session: identity code, game id, and the signed HTTP calls.
pub struct SessionManager {
    http: reqwest::Client,
    signer: RequestSigner,
    base_url: String,
    app_id: i64,
    code: Mutex<String>,
    game_id: Mutex<Option<String>>,
    start_max_attempts: u32,
    start_retry_step: Duration,
    end_timeout: Duration,
}

impl SessionManager {
    /// Build a session manager for `code`.
    pub fn new(settings: &ClientSettings, code: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout())
            .build()?;
        Ok(Self {
            http,
            signer: RequestSigner::new(&settings.access_key, &settings.access_secret),
            base_url: settings.api_base().to_string(),
            app_id: settings.app_id,
            code: Mutex::new(code.into()),
            game_id: Mutex::new(None),
            start_max_attempts: settings.start_max_attempts.max(1),
            start_retry_step: Duration::from_millis(settings.start_retry_step_ms),
            end_timeout: settings.end_timeout(),
        })
    }

    /// Replace the identity code used by the next start.
    pub fn set_code(&self, code: impl Into<String>) {
        *self.code.lock() = code.into();
    }

    /// Current identity code.
    pub fn code(&self) -> String {
        self.code.lock().clone()
    }

    /// Game id of the open session, if any.
    pub fn game_id(&self) -> Option<String> {
        self.game_id.lock().clone()
    }

    /// Open a session, retrying with a linearly growing delay.
    ///
    /// Returns [`ClientError::ShutdownInProgress`] as soon as `shutdown` is
    /// cancelled, and [`ClientError::SessionStartFailed`] once every attempt
    /// has failed.
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<ConnectParams> {
        let mut last = None;
        for attempt in 1..=self.start_max_attempts {
            if shutdown.is_cancelled() {
                return Err(ClientError::ShutdownInProgress);
            }
            match self.start_once().await {
                Ok(params) => return Ok(params),
                Err(e) => {
                    warn!(attempt, max = self.start_max_attempts, kind = ?e.kind(), error = %e, "session start failed");
                    last = Some(e);
                }
            }
            if attempt < self.start_max_attempts {
                let delay = self.start_retry_step * attempt;
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = shutdown.cancelled() => return Err(ClientError::ShutdownInProgress),
                }
            }
        }
        Err(ClientError::SessionStartFailed {
            attempts: self.start_max_attempts,
            last: Box::new(last.unwrap_or(ClientError::ShutdownInProgress)),
        })
    }

    #[tracing::instrument(skip_all)]
    async fn start_once(&self) -> Result<ConnectParams> {
        let body = json!({ "code": self.code(), "app_id": self.app_id });
        let response = self.post(START_PATH, &body).await?;

        let data = response
            .get("data")
            .filter(|d| d.is_object())
            .ok_or_else(|| ClientError::Protocol("start response has no data".into()))?;

        let game_id = data
            .pointer("/game_info/game_id")
            .map(value_text)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ClientError::Protocol("start response has no game id".into()))?;

        let socket_url = data
            .pointer("/websocket_info/wss_link")
            .and_then(Value::as_array)
            .and_then(|links| links.first())
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ClientError::Protocol("start response has no socket link".into()))?
            .to_string();

        let auth_body = data
            .pointer("/websocket_info/auth_body")
            .map(value_text)
            .ok_or_else(|| ClientError::Protocol("start response has no auth body".into()))?;

        info!(game_id = %game_id, "session started");
        *self.game_id.lock() = Some(game_id);
        Ok(ConnectParams {
            socket_url,
            auth_body,
        })
    }

    /// Refresh the session. Failures are logged only.
    #[tracing::instrument(skip_all)]
    pub async fn heartbeat(&self) {
        let Some(game_id) = self.game_id() else {
            return;
        };
        match self.post(HEARTBEAT_PATH, &json!({ "game_id": game_id })).await {
            Ok(_) => debug!(game_id = %game_id, "session heartbeat ok"),
            Err(e) => warn!(game_id = %game_id, kind = ?e.kind(), error = %e, "session heartbeat failed"),
        }
    }

    /// Close the session, bounded by the end timeout. Never fails.
    #[tracing::instrument(skip_all)]
    pub async fn end(&self) {
        let Some(game_id) = self.game_id.lock().take() else {
            return;
        };
        let body = json!({ "game_id": game_id, "app_id": self.app_id });
        match tokio::time::timeout(self.end_timeout, self.post(END_PATH, &body)).await {
            Ok(Ok(_)) => info!(game_id = %game_id, "session ended"),
            Ok(Err(e)) => warn!(game_id = %game_id, kind = ?e.kind(), error = %e, "session end failed"),
            Err(_) => warn!(game_id = %game_id, "session end timed out"),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let payload = serde_json::to_string(body)?;
        let mut request = self.http.post(format!("{}{path}", self.base_url));
        for (name, value) in self.signer.sign(&payload) {
            request = request.header(name, value);
        }

        let response = request.body(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let value: Value = serde_json::from_slice(&response.bytes().await?)?;
        let code = response_code(&value);
        if code != 0 {
            let message = value
                .get("message")
                .map(value_text)
                .unwrap_or_default();
            return Err(ClientError::Api { code, message });
        }
        Ok(value)
    }
}

/// `code` field as a number; absent or non-numeric codes read as -1.
fn response_code(value: &Value) -> i64 {
    match value.get("code") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

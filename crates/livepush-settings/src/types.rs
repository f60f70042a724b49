//! Client settings.
//!
//! Every field has a compiled default so a partial `settings.json` is
//! enough. Durations are stored in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default open-platform API host.
pub const DEFAULT_API_HOST: &str = "https://live-open.biliapi.com";

/// Everything the client needs to talk to the platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base URL for the session HTTP API.
    pub api_host: String,
    /// Application id registered with the platform.
    pub app_id: i64,
    /// Access key id used for request signing.
    pub access_key: String,
    /// Access secret used for request signing.
    pub access_secret: String,
    /// Socket ping period.
    pub heartbeat_interval_ms: u64,
    /// Session refresh (HTTP heartbeat) period.
    pub session_refresh_interval_ms: u64,
    /// Delay before the first liveness check after connecting.
    pub liveness_grace_ms: u64,
    /// Liveness check period.
    pub liveness_interval_ms: u64,
    /// Silence after which the socket is considered stalled.
    pub liveness_timeout_ms: u64,
    /// Socket connect timeout.
    pub connect_timeout_ms: u64,
    /// Time allowed for the auth reply after the auth frame is sent.
    pub auth_timeout_ms: u64,
    /// Per-request HTTP timeout.
    pub http_timeout_ms: u64,
    /// Upper bound on the best-effort session end call.
    pub end_timeout_ms: u64,
    /// Largest accepted frame, header included.
    pub max_frame_size: usize,
    /// Session start attempts before giving up.
    pub start_max_attempts: u32,
    /// Session start retry delay step (delay = step × attempt).
    pub start_retry_step_ms: u64,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            app_id: 0,
            access_key: String::new(),
            access_secret: String::new(),
            heartbeat_interval_ms: 20_000,
            session_refresh_interval_ms: 20_000,
            liveness_grace_ms: 30_000,
            liveness_interval_ms: 20_000,
            liveness_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            auth_timeout_ms: 10_000,
            http_timeout_ms: 10_000,
            end_timeout_ms: 5_000,
            max_frame_size: 2048,
            start_max_attempts: 3,
            start_retry_step_ms: 2_000,
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Reconnect backoff parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Base delay.
    pub base_delay_ms: u64,
    /// Cap on the exponential delay.
    pub max_delay_ms: u64,
    /// Attempts before terminal failure.
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
        }
    }
}

impl ClientSettings {
    /// Check that the settings can drive a client.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("apiHost", self.api_host.trim()),
            ("accessKey", self.access_key.as_str()),
            ("accessSecret", self.access_secret.as_str()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.is_empty()) {
            return Err(SettingsError::Missing(*name));
        }
        let periods = [
            ("heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("sessionRefreshIntervalMs", self.session_refresh_interval_ms),
            ("livenessIntervalMs", self.liveness_interval_ms),
            ("livenessTimeoutMs", self.liveness_timeout_ms),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, v)| *v == 0) {
            return Err(SettingsError::InvalidValue(format!("{name} must be positive")));
        }
        if self.max_frame_size < 16 {
            return Err(SettingsError::InvalidValue(
                "maxFrameSize must cover the 16-byte header".into(),
            ));
        }
        if self.start_max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "startMaxAttempts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// API host without a trailing slash.
    pub fn api_base(&self) -> &str {
        self.api_host.trim_end_matches('/')
    }

    /// Socket ping period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Session refresh period.
    pub fn session_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.session_refresh_interval_ms)
    }

    /// Delay before the first liveness check.
    pub fn liveness_grace(&self) -> Duration {
        Duration::from_millis(self.liveness_grace_ms)
    }

    /// Liveness check period.
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    /// Stall threshold.
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    /// Socket connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Auth reply timeout.
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// HTTP request timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Session end bound.
    pub fn end_timeout(&self) -> Duration {
        Duration::from_millis(self.end_timeout_ms)
    }
}

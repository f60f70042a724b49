//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientSettings::default()`]
//! 2. If `~/.livepush/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `LIVEPUSH_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ClientSettings;

/// Directory holding livepush state (`~/.livepush`).
pub fn livepush_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".livepush")
}

/// Resolve the path to the settings file (`~/.livepush/settings.json`).
pub fn settings_path() -> PathBuf {
    livepush_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Load settings from a file without consulting the environment.
pub fn read_settings_file(path: &Path) -> Result<ClientSettings> {
    let defaults = serde_json::to_value(ClientSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut ClientSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Split out from [`apply_env_overrides`] so tests need not touch the
/// process environment.
pub fn apply_overrides<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| {
        let raw = lookup(name)?;
        let parsed = parse_u64_range(&raw, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %raw, "invalid numeric env var, ignoring");
        }
        parsed
    };

    // ── Credentials ────────────────────────────────────────────────
    if let Some(v) = string("LIVEPUSH_API_HOST") {
        settings.api_host = v;
    }
    if let Some(v) = string("LIVEPUSH_APP_ID") {
        match v.parse::<i64>() {
            Ok(id) => settings.app_id = id,
            Err(_) => tracing::warn!(key = "LIVEPUSH_APP_ID", value = %v, "invalid app id, ignoring"),
        }
    }
    if let Some(v) = string("LIVEPUSH_ACCESS_KEY") {
        settings.access_key = v;
    }
    if let Some(v) = string("LIVEPUSH_ACCESS_SECRET") {
        settings.access_secret = v;
    }

    // ── Timings ────────────────────────────────────────────────────
    if let Some(v) = number("LIVEPUSH_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.heartbeat_interval_ms = v;
    }
    if let Some(v) = number("LIVEPUSH_LIVENESS_TIMEOUT_MS", 100, 3_600_000) {
        settings.liveness_timeout_ms = v;
    }
    if let Some(v) = number("LIVEPUSH_HTTP_TIMEOUT_MS", 100, 600_000) {
        settings.http_timeout_ms = v;
    }
    if let Some(v) = number("LIVEPUSH_MAX_FRAME_SIZE", 16, 16 * 1024 * 1024) {
        #[allow(clippy::cast_possible_truncation)]
        let size = v as usize;
        settings.max_frame_size = size;
    }

    // ── Reconnect ──────────────────────────────────────────────────
    if let Some(v) = number("LIVEPUSH_RECONNECT_MAX_ATTEMPTS", 1, 1_000) {
        #[allow(clippy::cast_possible_truncation)]
        let attempts = v as u32;
        settings.reconnect.max_attempts = attempts;
    }
    if let Some(v) = number("LIVEPUSH_RECONNECT_BASE_DELAY_MS", 1, 600_000) {
        settings.reconnect.base_delay_ms = v;
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! # livepush-settings
//!
//! Configuration for the livepush client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`ClientSettings::default()`]
//! 2. **User file** — `~/.livepush/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `LIVEPUSH_*` overrides (highest priority)
//!
//! The identity code is kept separately in a [`CodeStore`] because the host
//! changes it at runtime.
//!
//! # Usage
//!
//! ```no_run
//! use livepush_settings::{load_settings, CodeStore, FileCodeStore};
//!
//! let settings = load_settings().unwrap_or_default();
//! let code = FileCodeStore::open_default().load().unwrap_or_default();
//! println!("{} as app {}", settings.api_host, settings.app_id);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod store;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, livepush_dir, load_settings, load_settings_from_path,
    settings_path,
};
pub use store::{CodeStore, FileCodeStore, MemoryCodeStore, code_path};
pub use types::{ClientSettings, DEFAULT_API_HOST, ReconnectSettings};

//! Persisted identity code.
//!
//! The identity code ties the client to one broadcaster's room and is
//! changed by the host at runtime, so it lives apart from
//! [`ClientSettings`](crate::ClientSettings). [`FileCodeStore`] keeps it in
//! `~/.livepush/code.json` as `{"idCode": "..."}` and re-reads the file only
//! when its modification time changes.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::loader::livepush_dir;

/// Key-value store for the identity code.
pub trait CodeStore: Send + Sync {
    /// Current code (empty when none is configured).
    fn load(&self) -> Result<String>;

    /// Persist a new code.
    fn save(&self, code: &str) -> Result<()>;

    /// Whether the stored code changed since the last `load`/`save`.
    fn changed(&self) -> bool;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CodeFile {
    id_code: String,
}

#[derive(Default)]
struct Cached {
    code: Option<String>,
    modified: Option<SystemTime>,
}

/// JSON-file backed [`CodeStore`].
pub struct FileCodeStore {
    path: PathBuf,
    cache: Mutex<Cached>,
}

/// Resolve the default code file path (`~/.livepush/code.json`).
pub fn code_path() -> PathBuf {
    livepush_dir().join("code.json")
}

impl FileCodeStore {
    /// Store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(Cached::default()),
        }
    }

    /// Store at the default path.
    pub fn open_default() -> Self {
        Self::new(code_path())
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn write(&self, code: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&CodeFile {
            id_code: code.to_string(),
        })?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl CodeStore for FileCodeStore {
    fn load(&self) -> Result<String> {
        let modified = self.modified();
        let mut cache = self.cache.lock();
        if let Some(code) = &cache.code {
            if modified.is_some() && modified == cache.modified {
                return Ok(code.clone());
            }
        }

        if modified.is_none() {
            debug!(path = ?self.path, "code file not found, creating default");
            self.write("")?;
            cache.code = Some(String::new());
            cache.modified = self.modified();
            return Ok(String::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let code = if content.trim().is_empty() {
            String::new()
        } else {
            match serde_json::from_str::<CodeFile>(&content) {
                Ok(file) => file.id_code,
                Err(e) => {
                    warn!(path = ?self.path, error = %e, "code file unreadable, resetting");
                    self.write("")?;
                    String::new()
                }
            }
        };
        cache.code = Some(code.clone());
        cache.modified = self.modified();
        Ok(code)
    }

    fn save(&self, code: &str) -> Result<()> {
        self.write(code)?;
        let mut cache = self.cache.lock();
        cache.code = Some(code.to_string());
        cache.modified = self.modified();
        Ok(())
    }

    fn changed(&self) -> bool {
        let cache = self.cache.lock();
        cache.code.is_some() && self.modified() != cache.modified
    }
}

/// In-memory [`CodeStore`] for tests and embedding hosts with their own persistence.
#[derive(Default)]
pub struct MemoryCodeStore {
    code: Mutex<String>,
    dirty: std::sync::atomic::AtomicBool,
}

impl MemoryCodeStore {
    /// Store holding `code`.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: Mutex::new(code.into()),
            dirty: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Replace the code as if changed by another writer.
    pub fn set_external(&self, code: &str) {
        *self.code.lock() = code.to_string();
        self.dirty.store(true, std::sync::atomic::Ordering::Release);
    }
}

impl CodeStore for MemoryCodeStore {
    fn load(&self) -> Result<String> {
        self.dirty.store(false, std::sync::atomic::Ordering::Release);
        Ok(self.code.lock().clone())
    }

    fn save(&self, code: &str) -> Result<()> {
        *self.code.lock() = code.to_string();
        self.dirty.store(false, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    fn changed(&self) -> bool {
        self.dirty.load(std::sync::atomic::Ordering::Acquire)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! ## leechwarden-telemetry::audit
//! Append-only record of every block and unblock, one JSON object per line.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use leechwarden_core::time::{Clock, SystemClock};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write audit log: {0}")]
    Write(#[from] io::Error),

    #[error("Failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDetails {
    pub ip: String,
    pub peer_id: String,
    pub client_name: String,
    pub reason: String,
    pub duration_secs: u64,
    pub violations: u32,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub share_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum AuditEvent {
    Blocked(BlockDetails),
    Unblocked { ip: String, reason: String },
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// Opens `path` for appending, creating missing parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| AuditError::Open {
                path: path.clone(),
                source,
            })?;
        }
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_block(&self, details: BlockDetails) -> Result<(), AuditError> {
        self.append(AuditEvent::Blocked(details))
    }

    pub fn log_unblock(&self, ip: &str, reason: &str) -> Result<(), AuditError> {
        self.append(AuditEvent::Unblocked {
            ip: ip.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Moves the current file to `<file>.<YYYYmmdd-HHMMSS>` and starts a new
    /// one. On a failed rename the current file stays in use.
    pub fn rotate(&self) -> Result<PathBuf, AuditError> {
        let mut file = self.file.lock();
        file.flush()?;

        let stamp = self.clock.now().format("%Y%m%d-%H%M%S");
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".{stamp}"));
        let backup = PathBuf::from(backup);

        fs::rename(&self.path, &backup)?;
        *file = open_append(&self.path)?;
        info!("Rotated audit log to {}", backup.display());
        Ok(backup)
    }

    fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let record = AuditRecord {
            timestamp: self.clock.now(),
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, AuditError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| AuditError::Open {
            path: path.to_path_buf(),
            source,
        })
}

//! Append-only audit trail.
//!
//! Every privileged operation attempt produces exactly one [`AuditEntry`],
//! whether it succeeded or not. [`AuditLog`] is write-only: it hands entries
//! to an [`AuditSink`] and reports sink failures as
//! [`VaultError::AuditWrite`], separate from the audited operation's own
//! result.
//!
//! # Sinks
//!
//! - [`FileAuditSink`] — one text line per entry:
//!   `2026-01-31 12:00:00 | decrypt | k1 | app1 | DENIED`
//! - [`SqliteAuditSink`] — insert-only `audit_log` table.
//! - [`MemoryAuditSink`] — in-process vector, for tests and embedding.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Placeholder written when an entry has no application.
const NO_APP: &str = "None";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Generate,
    GetKey,
    Rotate,
    Revoke,
    Authorize,
    RevokeAccess,
    CheckAccess,
    Encrypt,
    Decrypt,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::GetKey => "get_key",
            Self::Rotate => "rotate",
            Self::Revoke => "revoke",
            Self::Authorize => "authorize",
            Self::RevokeAccess => "revoke_access",
            Self::CheckAccess => "check_access",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generate" => Some(Self::Generate),
            "get_key" => Some(Self::GetKey),
            "rotate" => Some(Self::Rotate),
            "revoke" => Some(Self::Revoke),
            "authorize" => Some(Self::Authorize),
            "revoke_access" => Some(Self::RevokeAccess),
            "check_access" => Some(Self::CheckAccess),
            "encrypt" => Some(Self::Encrypt),
            "decrypt" => Some(Self::Decrypt),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Denied,
}

impl Outcome {
    pub fn from_success(success: bool) -> Self {
        if success { Self::Success } else { Self::Denied }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub key_id: String,
    /// Absent when the operation is not application-scoped.
    pub app_name: Option<String>,
    pub outcome: Outcome,
}

impl AuditEntry {
    /// The single-line text form used by [`FileAuditSink`].
    ///
    /// Identifier fields are escaped (`\\`, `\n`, `\r`, `\|`) so a value can
    /// never split the entry or add a field.
    pub fn to_line(&self) -> String {
        let status = match self.outcome {
            Outcome::Success => "SUCCESS",
            Outcome::Denied => "DENIED",
        };
        format!(
            "{} | {} | {} | {} | {}\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action,
            escape_field(&self.key_id),
            self.app_name.as_deref().map_or(Cow::Borrowed(NO_APP), escape_field),
            status,
        )
    }
}

fn escape_field(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '\n', '\r', '|']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '|' => escaped.push_str("\\|"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// Destination for audit entries. Implementations serialize their own
/// appends so concurrent writers never interleave partial entries.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<()>;
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

pub struct AuditLog {
    sink: Box<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Box<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append one entry stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::AuditWrite`] if the sink fails. The error records
    /// `success` so the caller still learns the audited operation's outcome.
    pub fn record(
        &self,
        action: AuditAction,
        key_id: &str,
        app_name: Option<&str>,
        success: bool,
    ) -> Result<()> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            action,
            key_id: key_id.to_string(),
            app_name: app_name.map(str::to_string),
            outcome: Outcome::from_success(success),
        };

        match self.sink.append(&entry) {
            Ok(()) => {
                tracing::trace!(
                    action = %action,
                    key_id,
                    outcome = entry.outcome.as_str(),
                    "audit entry recorded"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(action = %action, key_id, error = %e, "audit write failed");
                Err(VaultError::AuditWrite {
                    action: action.as_str().to_string(),
                    key_id: key_id.to_string(),
                    reason: e.to_string(),
                    operation_succeeded: success,
                    operation_error: None,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// File sink
// ---------------------------------------------------------------------------

/// Text log opened in append mode.
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!(path = %path.display(), "opened audit log");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let line = entry.to_line();
        let mut file = self
            .file
            .lock()
            .map_err(|_| VaultError::LockPoisoned { store: "audit" })?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite sink
// ---------------------------------------------------------------------------

/// Insert-only SQLite table.
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    /// Open (or create) an audit database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %path.display(), "opening audit database");
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory audit database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;

             CREATE TABLE IF NOT EXISTS audit_log (
                 id        INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp INTEGER NOT NULL,
                 action    TEXT NOT NULL,
                 key_id    TEXT NOT NULL,
                 app_name  TEXT,
                 outcome   TEXT NOT NULL CHECK(outcome IN ('success','denied'))
             );

             CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// The most recent `limit` entries, newest first. For operator
    /// inspection; the vault itself never reads the trail.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| VaultError::LockPoisoned { store: "audit" })?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, action, key_id, app_name, outcome
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], map_audit_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl AuditSink for SqliteAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| VaultError::LockPoisoned { store: "audit" })?;
        conn.execute(
            "INSERT INTO audit_log (timestamp, action, key_id, app_name, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.timestamp.timestamp_millis(),
                entry.action.as_str(),
                entry.key_id,
                entry.app_name,
                entry.outcome.as_str(),
            ],
        )?;
        Ok(())
    }
}

fn map_audit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action: String = row.get(1)?;
    let outcome: String = row.get(4)?;
    Ok(AuditEntry {
        timestamp: DateTime::from_timestamp_millis(row.get(0)?).unwrap_or_default(),
        action: AuditAction::parse(&action).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(1, "action".into(), rusqlite::types::Type::Text)
        })?,
        key_id: row.get(2)?,
        app_name: row.get(3)?,
        outcome: Outcome::parse(&outcome).unwrap_or(Outcome::Denied),
    })
}

// ---------------------------------------------------------------------------
// Memory sink
// ---------------------------------------------------------------------------

/// Entries kept in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| VaultError::LockPoisoned { store: "audit" })?
            .push(entry.clone());
        Ok(())
    }
}

// Lets a caller keep a handle on a sink it also gave to an `AuditLog`.
impl<S: AuditSink + ?Sized> AuditSink for std::sync::Arc<S> {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        (**self).append(entry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Persistence for users, environments, credentials, tests, results and
//! reports, backed by SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Store                              │
//! │  - CRUD per entity (one file each)       │
//! │  - Transparent secret encryption         │
//! │  - JSON columns parsed on every read     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SecretCipher (AES-256-GCM)         │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite (single connection)         │
//! │  - Foreign keys with cascading deletes   │
//! │  - Unique constraints → 409 Conflict     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Secret columns (`client_secret`, `access_token`, `refresh_token`,
//! `api_key`) only ever hold `iv:ciphertext` tokens. Domain structs returned
//! by the store carry decrypted values; the API layer decides what leaves
//! the process.

use crate::crypto::SecretCipher;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

mod credentials;
mod environments;
mod reports;
mod results;
mod test_cases;
mod users;

pub use credentials::{AuthType, Credential, NewCredential};
pub use environments::{Environment, EnvironmentType, NewEnvironment, OAuthStatus, OAuthTokens};
pub use reports::TestReport;
pub use results::{NewTestResult, ResultFilter, ResultWithTest, TestResult, TestStatus};
pub use test_cases::{NewTestCase, TestCase};
pub use users::User;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,
    name       TEXT UNIQUE NOT NULL,
    token      TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS environments (
    id               TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name             TEXT NOT NULL,
    env_type         TEXT NOT NULL,
    instance_url     TEXT NOT NULL,
    client_id        TEXT,
    client_secret    TEXT,              -- Encrypted
    access_token     TEXT,              -- Encrypted
    refresh_token    TEXT,              -- Encrypted
    token_expires_at TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE(user_id, name)
);

CREATE TABLE IF NOT EXISTS credentials (
    id             TEXT PRIMARY KEY,
    environment_id TEXT NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
    auth_type      TEXT NOT NULL,
    org_name       TEXT NOT NULL,
    member_id      TEXT,
    branch_id      TEXT,
    api_key        TEXT,                -- Encrypted (apikey only)
    client_id      TEXT,                -- oauth2 only
    client_secret  TEXT,                -- Encrypted (oauth2 only)
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    UNIQUE(environment_id, org_name, member_id, branch_id)
);

CREATE TABLE IF NOT EXISTS tests (
    id              TEXT PRIMARY KEY,
    environment_id  TEXT NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
    credential_id   TEXT REFERENCES credentials(id) ON DELETE SET NULL,
    name            TEXT NOT NULL,
    category        TEXT,
    endpoint        TEXT NOT NULL,
    method          TEXT NOT NULL,
    headers         TEXT NOT NULL,      -- JSON object
    body            TEXT,               -- JSON
    expected_status INTEGER NOT NULL,
    validations     TEXT NOT NULL,      -- JSON array
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE(environment_id, name)
);

CREATE TABLE IF NOT EXISTS test_results (
    id                 TEXT PRIMARY KEY,
    test_id            TEXT NOT NULL REFERENCES tests(id) ON DELETE CASCADE,
    credential_id      TEXT REFERENCES credentials(id) ON DELETE SET NULL,
    status             TEXT NOT NULL,
    manual_status      TEXT,
    request            TEXT NOT NULL,   -- JSON
    response           TEXT NOT NULL,   -- JSON
    validation_results TEXT NOT NULL,   -- JSON array
    duration_ms        INTEGER,
    executed_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS test_reports (
    id             TEXT PRIMARY KEY,
    user_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    environment_id TEXT REFERENCES environments(id) ON DELETE SET NULL,
    summary        TEXT NOT NULL,       -- JSON
    generated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_environments_user ON environments(user_id);
CREATE INDEX IF NOT EXISTS idx_credentials_environment ON credentials(environment_id);
CREATE INDEX IF NOT EXISTS idx_tests_environment ON tests(environment_id);
CREATE INDEX IF NOT EXISTS idx_results_test ON test_results(test_id, executed_at);
CREATE INDEX IF NOT EXISTS idx_reports_user ON test_reports(user_id, generated_at);
"#;

/// SQLite-backed store for every entity.
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - Each public method holds the lock for one statement or transaction
pub struct Store {
    conn: Mutex<Connection>,
    cipher: SecretCipher,
}

impl Store {
    /// Creates or opens the database and ensures the schema exists.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`":memory:"` for tests)
    /// * `cipher` - Cipher used for secret columns
    pub fn open<P: AsRef<Path>>(db_path: P, cipher: SecretCipher) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    fn encrypt(&self, value: &str) -> Result<String> {
        Ok(self.cipher.encrypt(value)?)
    }

    fn encrypt_opt(&self, value: Option<&str>) -> Result<Option<String>> {
        value.map(|v| self.encrypt(v)).transpose()
    }

    fn decrypt_opt(&self, value: Option<String>, column: &str) -> Result<Option<String>> {
        value
            .map(|v| {
                self.cipher
                    .decrypt(&v)
                    .with_context(|| format!("Failed to decrypt {}", column))
            })
            .transpose()
    }
}

/// A window into a list query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}

/// LIMIT/OFFSET values; SQLite treats a negative limit as unbounded
pub(crate) fn limit_offset(page: Option<Page>) -> (i64, i64) {
    match page {
        Some(p) => (i64::from(p.limit), i64::try_from(p.offset).unwrap_or(i64::MAX)),
        None => (-1, 0),
    }
}

/// Generates a time-ordered record id
pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Fixed-width UTC timestamp, so lexical order in SQL matches time order
pub(crate) fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse timestamp '{}'", value))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(value: &str, column: &str) -> Result<T> {
    serde_json::from_str(value).with_context(|| format!("Failed to parse {} JSON", column))
}

/// Returns true if the error chain contains a SQLite UNIQUE constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_open_creates_schema_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.db");
        let cipher = SecretCipher::from_secret("store-test-secret-0123456789").unwrap();

        let store = Store::open(&path, cipher.clone()).unwrap();
        store.create_user("alice").unwrap();
        drop(store);

        // Reopening keeps existing rows
        let store = Store::open(&path, cipher).unwrap();
        assert!(store.create_user("alice").is_err());
    }

    #[test]
    fn test_timestamp_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(timestamp(&a), "2026-01-02T03:04:05.000Z");
        assert_eq!(parse_timestamp(&timestamp(&a)).unwrap(), a);
    }

    #[test]
    fn test_unique_violation_detected_through_context() {
        let store = testing::store();
        store.create_user("alice").unwrap();
        let err = store.create_user("alice").unwrap_err();
        assert!(is_unique_violation(&err));

        let other = anyhow!("something else");
        assert!(!is_unique_violation(&other));
    }

    #[test]
    fn test_limit_offset_never_wraps() {
        assert_eq!(limit_offset(None), (-1, 0));
        assert_eq!(limit_offset(Some(Page { limit: 10, offset: 20 })), (10, 20));
        assert_eq!(
            limit_offset(Some(Page { limit: 2, offset: u64::MAX })),
            (2, i64::MAX)
        );
    }
}

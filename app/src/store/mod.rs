//! SQLite record store.
//!
//! One connection guarded by a mutex; every operation runs on the blocking
//! pool. Writes additionally take `write_lock` so read-modify-write sequences
//! (number counters, revision snapshots) never interleave.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{describe_sqlite_error, Error, Result};

mod clients;
mod ledger;
mod quotes;
mod receipts;
mod settings;

pub use quotes::{quote_draft_from_analysis, quote_draft_from_receipt, QuoteSummary};

const SCHEMA_VERSION: i64 = 1;

pub(crate) fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub(crate) fn today_ymd() -> String {
    crate::locale::format_ymd(OffsetDateTime::now_utc().date())
}

fn configure_sqlite(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS app_meta (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            id TEXT PRIMARY KEY NOT NULL,
            quotePrefix TEXT NOT NULL,
            nextQuoteNumber INTEGER NOT NULL,
            receiptPrefix TEXT NOT NULL,
            nextReceiptNumber INTEGER NOT NULL,
            data_json TEXT NOT NULL,
            updatedAt TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            taxId TEXT NOT NULL DEFAULT '',
            createdAt TEXT NOT NULL,
            data_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS receipts (
            id TEXT PRIMARY KEY NOT NULL,
            number TEXT NOT NULL,
            clientId TEXT NOT NULL,
            receivedAt TEXT NOT NULL,
            createdAt TEXT NOT NULL,
            data_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY NOT NULL,
            receiptId TEXT NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
            createdAt TEXT NOT NULL,
            data_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quotes (
            id TEXT PRIMARY KEY NOT NULL,
            number TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0,
            clientId TEXT,
            issueDate TEXT NOT NULL,
            totalAmount REAL NOT NULL,
            createdAt TEXT NOT NULL,
            updatedAt TEXT NOT NULL,
            header_json TEXT NOT NULL,
            photos_json TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS quote_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            quoteId TEXT NOT NULL REFERENCES quotes(id) ON DELETE CASCADE,
            groupKind TEXT NOT NULL,
            position INTEGER NOT NULL,
            code TEXT,
            description TEXT NOT NULL,
            quantity REAL NOT NULL,
            unitPrice REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quote_revisions (
            id TEXT PRIMARY KEY NOT NULL,
            quoteId TEXT NOT NULL REFERENCES quotes(id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            snapshot_json TEXT NOT NULL,
            createdAt TEXT NOT NULL,
            UNIQUE (quoteId, sequence)
        );

        CREATE TABLE IF NOT EXISTS ledger_entries (
            id TEXT PRIMARY KEY NOT NULL,
            kind TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT NOT NULL,
            amount REAL NOT NULL,
            competenceDate TEXT NOT NULL,
            dueDate TEXT,
            settledAt TEXT,
            quoteId TEXT,
            createdAt TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_quotes_number ON quotes(number);
        CREATE INDEX IF NOT EXISTS idx_quotes_clientId ON quotes(clientId);
        CREATE INDEX IF NOT EXISTS idx_quote_items_quoteId ON quote_items(quoteId, groupKind, position);
        CREATE INDEX IF NOT EXISTS idx_clients_name ON clients(name);
        CREATE INDEX IF NOT EXISTS idx_receipts_clientId ON receipts(clientId);
        CREATE INDEX IF NOT EXISTS idx_ledger_competence ON ledger_entries(competenceDate);
        CREATE INDEX IF NOT EXISTS idx_ledger_settled ON ledger_entries(settledAt);
        "#,
    )?;
    Ok(())
}

const META_CREATED_AT: &str = "createdAt";
const META_APP_VERSION: &str = "appVersion";

fn apply_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    // v=0 means a fresh DB: init_schema already created the latest tables.
    if v == 0 {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        app_meta_set(conn, META_CREATED_AT, &now_iso())?;
    } else if v > SCHEMA_VERSION {
        tracing::warn!(found = v, supported = SCHEMA_VERSION, "database was written by a newer version");
    }
    // Future steps go here as `if v < 2 { ...; PRAGMA user_version = 2 }`.

    app_meta_set(conn, META_APP_VERSION, env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

pub(crate) fn app_meta_get(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row("SELECT value FROM app_meta WHERE key = ?1", params![key], |r| r.get(0))
        .optional()
}

pub(crate) fn app_meta_set(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO app_meta(key, value) VALUES(?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// What the database says about itself.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    pub schema_version: i64,
    pub created_at: Option<String>,
    /// Version of the last build that opened the file.
    pub app_version: Option<String>,
}

#[derive(Clone)]
pub struct DbState {
    conn: Arc<Mutex<Connection>>,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for DbState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbState").finish_non_exhaustive()
    }
}

impl DbState {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure_sqlite(&conn)?;
        init_schema(&conn)?;
        apply_migrations(&conn)?;
        settings::ensure_settings_row(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub(crate) async fn with_read<T, F>(&self, op_name: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| Error::Task("db mutex poisoned".to_string()))?;
            f(&guard).inspect_err(|e| log_failure(op_name, e))
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }

    pub(crate) async fn with_write<T, F>(&self, op_name: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let write_lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || {
            let _wg = write_lock
                .lock()
                .map_err(|_| Error::Task("write mutex poisoned".to_string()))?;
            let mut guard = conn.lock().map_err(|_| Error::Task("db mutex poisoned".to_string()))?;
            f(&mut guard).inspect_err(|e| log_failure(op_name, e))
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }

    pub async fn database_info(&self) -> Result<DatabaseInfo> {
        self.with_read("database_info", |conn| {
            Ok(DatabaseInfo {
                schema_version: conn.query_row("PRAGMA user_version", [], |r| r.get(0))?,
                created_at: app_meta_get(conn, META_CREATED_AT)?,
                app_version: app_meta_get(conn, META_APP_VERSION)?,
            })
        })
        .await
    }
}

fn log_failure(op_name: &'static str, e: &Error) {
    match e {
        Error::Sqlite(inner) => {
            tracing::error!(op = op_name, error = %describe_sqlite_error(inner), "sqlite operation failed")
        }
        Error::Validation(_) | Error::NotFound { .. } => {
            tracing::debug!(op = op_name, error = %e, "operation rejected")
        }
        other => tracing::error!(op = op_name, error = %other, "operation failed"),
    }
}

/// Decodes a JSON column, mapping failures to a conversion error that names
/// the column so corrupt rows are traceable.
pub(crate) fn from_json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_database_is_stamped_with_schema_version() {
        let db = DbState::open_in_memory().unwrap();
        let v = db
            .with_read("user_version", |conn| {
                Ok(conn.query_row("PRAGMA user_version", [], |r| r.get::<_, i64>(0))?)
            })
            .await
            .unwrap();
        assert_eq!(v, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn fresh_database_records_creation_and_app_version() {
        let db = DbState::open_in_memory().unwrap();
        let info = db.database_info().await.unwrap();
        assert_eq!(info.schema_version, SCHEMA_VERSION);
        assert!(info.created_at.is_some());
        assert_eq!(info.app_version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn reopening_keeps_creation_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("oficina.db");
        let created = {
            let db = DbState::open(&path).unwrap();
            db.database_info().await.unwrap().created_at
        };
        assert!(path.exists());

        let db = DbState::open(&path).unwrap();
        let info = db.database_info().await.unwrap();
        assert_eq!(info.created_at, created);
        assert_eq!(info.schema_version, SCHEMA_VERSION);
    }
}

//! Local SQLite storage for cached records and the pending queue.
//!
//! Each entity type owns exactly one durable slot; the pending operation
//! queue is stored row-per-operation so appends and clears are single
//! atomic statements.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::{
    AppError, CreditScore, EntityKind, Farm, Loan, MarketPrice, PendingOperation, Result,
    SyncMeta, User, Weather,
};

/// Durable key-value storage, one slot per entity kind.
///
/// Pure storage: no ordering or business rules live here.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the JSON payload stored for `kind`.
    async fn get(&self, kind: EntityKind) -> Result<Option<String>>;

    /// Replace the payload stored for `kind`.
    async fn put(&self, kind: EntityKind, payload: String) -> Result<()>;

    /// Delete the slot for `kind`.
    async fn remove(&self, kind: EntityKind) -> Result<()>;

    /// Append one operation to the queue slot.
    async fn append_operation(&self, op: &PendingOperation) -> Result<()>;

    /// All queued operations, ordered by `seq`.
    async fn load_operations(&self) -> Result<Vec<PendingOperation>>;

    /// Delete every queued operation with `seq <= through`. Returns the count removed.
    async fn remove_operations_through(&self, through: u64) -> Result<usize>;

    /// Delete every queued operation. Returns the count removed.
    async fn clear_operations(&self) -> Result<usize>;

    async fn load_sync_meta(&self) -> Result<SyncMeta>;

    async fn save_sync_meta(&self, meta: &SyncMeta) -> Result<()>;
}

/// Binds a Rust type to the single slot it may occupy.
pub trait CachedEntity: Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;
}

impl CachedEntity for User {
    const KIND: EntityKind = EntityKind::User;
}

impl CachedEntity for Vec<Farm> {
    const KIND: EntityKind = EntityKind::Farms;
}

impl CachedEntity for Vec<Loan> {
    const KIND: EntityKind = EntityKind::Loans;
}

impl CachedEntity for Weather {
    const KIND: EntityKind = EntityKind::Weather;
}

impl CachedEntity for Vec<MarketPrice> {
    const KIND: EntityKind = EntityKind::MarketPrices;
}

impl CachedEntity for CreditScore {
    const KIND: EntityKind = EntityKind::CreditScore;
}

/// Read and decode the slot for `T`.
///
/// # Errors
/// Returns a storage error if the read fails, or a JSON error if the slot is corrupt.
pub async fn load_entity<T: CachedEntity>(store: &dyn DurableStore) -> Result<Option<T>> {
    store
        .get(T::KIND)
        .await?
        .map(|payload| serde_json::from_str(&payload).map_err(AppError::json_parse))
        .transpose()
}

/// Encode and write `value` into the slot for `T`.
///
/// # Errors
/// Returns a storage error if the write fails.
pub async fn save_entity<T: CachedEntity>(store: &dyn DurableStore, value: &T) -> Result<()> {
    let payload = serde_json::to_string(value).map_err(AppError::json_parse)?;
    store.put(T::KIND, payload).await
}

/// Local storage repository using SQLite.
#[derive(Clone)]
pub struct LocalStorage {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStorage {
    /// Opens or creates the local storage database.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or schema creation fails.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create storage directory", e))?;
        }

        let conn = Connection::open(path).map_err(AppError::storage)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(AppError::storage)?;

        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    /// Returns error if schema creation fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::storage)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection off the async executor.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AppError::storage_msg("storage connection lock poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| AppError::storage_msg(format!("storage task failed: {e}")))?
    }
}

/// Initialize database schema.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- One slot per entity kind
        CREATE TABLE IF NOT EXISTS entities (
            kind TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Pending operation queue, replayed in seq order
        CREATE TABLE IF NOT EXISTS pending_operations (
            seq INTEGER PRIMARY KEY,
            id TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL,
            payload TEXT NOT NULL
        );

        -- Sync bookkeeping
        CREATE TABLE IF NOT EXISTS sync_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_sync TEXT,
            last_error TEXT
        );

        -- Queue rows that could not be decoded, kept for inspection
        CREATE TABLE IF NOT EXISTS quarantined_operations (
            id INTEGER PRIMARY KEY,
            seq INTEGER NOT NULL,
            payload TEXT NOT NULL,
            error TEXT NOT NULL,
            quarantined_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO sync_meta (id) VALUES (1);
        ",
    )
    .map_err(AppError::storage)
}

/// Move undecodable queue rows aside so one bad row cannot block the rest.
fn quarantine_operations(conn: &Connection, rows: &[(i64, String)]) -> Result<()> {
    let tx = conn.unchecked_transaction().map_err(AppError::storage)?;
    for (seq, error) in rows {
        tracing::warn!(seq, error = %error, "Quarantining undecodable pending operation");
        tx.execute(
            r"
            INSERT INTO quarantined_operations (seq, payload, error)
            SELECT seq, payload, ?2 FROM pending_operations WHERE seq = ?1
            ",
            params![seq, error],
        )
        .map_err(AppError::storage)?;
        tx.execute("DELETE FROM pending_operations WHERE seq = ?1", [seq])
            .map_err(AppError::storage)?;
    }
    tx.commit().map_err(AppError::storage)
}

fn seq_to_sql(seq: u64) -> Result<i64> {
    i64::try_from(seq).map_err(|_| AppError::storage_msg(format!("sequence {seq} out of range")))
}

#[async_trait]
impl DurableStore for LocalStorage {
    async fn get(&self, kind: EntityKind) -> Result<Option<String>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT payload FROM entities WHERE kind = ?1",
                [kind.key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(AppError::storage)
        })
        .await
    }

    async fn put(&self, kind: EntityKind, payload: String) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                r"
                INSERT INTO entities (kind, payload) VALUES (?1, ?2)
                ON CONFLICT(kind) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = datetime('now')
                ",
                params![kind.key(), payload],
            )
            .map_err(AppError::storage)?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, kind: EntityKind) -> Result<()> {
        self.run(move |conn| {
            conn.execute("DELETE FROM entities WHERE kind = ?1", [kind.key()])
                .map_err(AppError::storage)?;
            Ok(())
        })
        .await
    }

    async fn append_operation(&self, op: &PendingOperation) -> Result<()> {
        let seq = seq_to_sql(op.seq)?;
        let id = op.id.to_string();
        let created_at = op.created_at.to_rfc3339();
        let payload = serde_json::to_string(op).map_err(AppError::json_parse)?;

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO pending_operations (seq, id, created_at, payload) VALUES (?1, ?2, ?3, ?4)",
                params![seq, id, created_at, payload],
            )
            .map_err(AppError::storage)?;
            Ok(())
        })
        .await
    }

    async fn load_operations(&self) -> Result<Vec<PendingOperation>> {
        self.run(|conn| {
            let rows = {
                let mut stmt = conn
                    .prepare("SELECT seq, payload FROM pending_operations ORDER BY seq ASC")
                    .map_err(AppError::storage)?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
                    .map_err(AppError::storage)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(AppError::storage)?
            };

            let mut operations = Vec::with_capacity(rows.len());
            let mut undecodable = Vec::new();
            for (seq, payload) in rows {
                match serde_json::from_str::<PendingOperation>(&payload) {
                    Ok(op) => operations.push(op),
                    Err(e) => undecodable.push((seq, e.to_string())),
                }
            }

            if !undecodable.is_empty() {
                quarantine_operations(conn, &undecodable)?;
            }

            Ok(operations)
        })
        .await
    }

    async fn remove_operations_through(&self, through: u64) -> Result<usize> {
        let through = seq_to_sql(through)?;
        self.run(move |conn| {
            conn.execute("DELETE FROM pending_operations WHERE seq <= ?1", [through])
                .map_err(AppError::storage)
        })
        .await
    }

    async fn clear_operations(&self) -> Result<usize> {
        self.run(|conn| {
            conn.execute("DELETE FROM pending_operations", [])
                .map_err(AppError::storage)
        })
        .await
    }

    async fn load_sync_meta(&self) -> Result<SyncMeta> {
        self.run(|conn| {
            conn.query_row(
                "SELECT last_sync, last_error FROM sync_meta WHERE id = 1",
                [],
                |row| {
                    let last_sync_str: Option<String> = row.get(0)?;
                    let last_sync = last_sync_str
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|dt| dt.with_timezone(&Utc));

                    Ok(SyncMeta {
                        last_sync,
                        last_error: row.get(1)?,
                    })
                },
            )
            .map_err(AppError::storage)
        })
        .await
    }

    async fn save_sync_meta(&self, meta: &SyncMeta) -> Result<()> {
        let last_sync = meta.last_sync.map(|dt| dt.to_rfc3339());
        let last_error = meta.last_error.clone();
        self.run(move |conn| {
            conn.execute(
                "UPDATE sync_meta SET last_sync = ?1, last_error = ?2 WHERE id = 1",
                params![last_sync, last_error],
            )
            .map_err(AppError::storage)?;
            Ok(())
        })
        .await
    }
}

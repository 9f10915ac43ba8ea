use crate::store::{rank_by_distance, KnowledgeRecord, KnowledgeStore};
use async_trait::async_trait;
use chrono::DateTime;
use mnemo_core::{MnemoError, MnemoResult};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS knowledge (
    key        TEXT PRIMARY KEY,
    layer      TEXT NOT NULL DEFAULT '',
    content    TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    embedding  TEXT
);
CREATE INDEX IF NOT EXISTS knowledge_updated_at ON knowledge(updated_at DESC);
";

const COLUMNS: &str = "key, layer, content, updated_at, embedding";

/// SQL function folding case the way `str::to_lowercase` does. SQLite's own
/// `lower()` only folds ASCII.
const UNICODE_LOWER: &str = "unicode_lower";

/// SQLite-backed knowledge store.
///
/// `updated_at` is stored as Unix milliseconds and embeddings as JSON
/// arrays. Queries run on the blocking pool so the async executor is never
/// held up by disk I/O.
#[derive(Clone)]
pub struct SqliteKnowledgeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKnowledgeStore {
    /// Open (or create) a database file and make sure the table exists.
    pub fn open(path: impl AsRef<Path>) -> MnemoResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        debug!(path = %path.display(), "Opened knowledge database");
        Self::with_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> MnemoResult<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(store_err)?)
    }

    fn with_connection(conn: Connection) -> MnemoResult<Self> {
        conn.create_scalar_function(
            UNICODE_LOWER,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text: Option<String> = ctx.get(0)?;
                Ok(text.map(|t| t.to_lowercase()))
            },
        )
        .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a record by key. Used for seeding.
    pub async fn insert(&self, record: KnowledgeRecord) -> MnemoResult<()> {
        let embedding = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO knowledge (key, layer, content, updated_at, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    layer = excluded.layer,
                    content = excluded.content,
                    updated_at = excluded.updated_at,
                    embedding = excluded.embedding",
                params![
                    record.key,
                    record.layer,
                    record.content,
                    record.updated_at.timestamp_millis(),
                    embedding
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    /// Fetch one record by key.
    pub async fn get(&self, key: &str) -> MnemoResult<Option<KnowledgeRecord>> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let sql = format!("SELECT {COLUMNS} FROM knowledge WHERE key = ?1");
            conn.query_row(&sql, params![key], read_row)
                .optional()
                .map_err(store_err)?
                .transpose()
        })
        .await
    }

    /// Number of stored records.
    pub async fn count(&self) -> MnemoResult<usize> {
        self.blocking(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM knowledge", [], |row| row.get(0))
                .map_err(store_err)?;
            Ok(n.max(0) as usize)
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> MnemoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> MnemoResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&*guard)
        })
        .await
        .map_err(|e| MnemoError::Store(format!("database task failed: {e}")))?
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn search_text(
        &self,
        needle: &str,
        layer: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<KnowledgeRecord>> {
        let needle = needle.to_lowercase();
        let layer = layer.map(str::to_string);

        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM knowledge
                 WHERE instr({UNICODE_LOWER}(content), ?1) > 0
                   AND (?2 IS NULL OR layer = ?2)
                 ORDER BY updated_at DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql).map_err(store_err)?;
            let rows = stmt
                .query_map(params![needle, layer, limit as i64], read_row)
                .map_err(store_err)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(store_err)??);
            }
            Ok(records)
        })
        .await
    }

    async fn nearest(
        &self,
        vector: &[f32],
        layer: Option<&str>,
        limit: usize,
    ) -> MnemoResult<Vec<(KnowledgeRecord, f32)>> {
        if vector.is_empty() {
            return Err(MnemoError::Store("empty query vector".to_string()));
        }
        let query = vector.to_vec();
        let layer = layer.map(str::to_string);

        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM knowledge
                 WHERE embedding IS NOT NULL
                   AND (?1 IS NULL OR layer = ?1)"
            );
            let mut stmt = conn.prepare(&sql).map_err(store_err)?;
            let rows = stmt.query_map(params![layer], read_row).map_err(store_err)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(store_err)??);
            }

            let candidates = records
                .iter()
                .filter_map(|r| r.embedding.as_deref().map(|e| (r, e)));
            Ok(rank_by_distance(&query, candidates, limit))
        })
        .await
    }
}

/// Decode one row. The outer `Result` is rusqlite's, the inner one covers
/// values that SQLite accepted but we cannot interpret.
fn read_row(row: &Row<'_>) -> rusqlite::Result<MnemoResult<KnowledgeRecord>> {
    let key: String = row.get(0)?;
    let layer: String = row.get(1)?;
    let content: String = row.get(2)?;
    let updated_ms: i64 = row.get(3)?;
    let embedding: Option<String> = row.get(4)?;

    let record = (|| -> MnemoResult<KnowledgeRecord> {
        let updated_at = DateTime::from_timestamp_millis(updated_ms).ok_or_else(|| {
            MnemoError::Store(format!("record '{key}' has invalid updated_at {updated_ms}"))
        })?;
        let embedding = embedding
            .map(|raw| serde_json::from_str::<Vec<f32>>(&raw))
            .transpose()
            .map_err(|e| MnemoError::Store(format!("record '{key}' has invalid embedding: {e}")))?;
        Ok(KnowledgeRecord {
            key: key.clone(),
            layer,
            content,
            updated_at,
            embedding,
        })
    })();
    Ok(record)
}

fn store_err(e: rusqlite::Error) -> MnemoError {
    MnemoError::Store(e.to_string())
}

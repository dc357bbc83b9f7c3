use crate::error::{MetadataStoreError, Result};
use crate::schema::SCHEMA;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::task;

/// Lifecycle state of a file in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingState {
    /// Discovered but not yet processed.
    Pending,
    /// Content embedded and searchable semantically.
    ContentIndexed,
    /// Extraction or embedding unavailable; filename-searchable only.
    MetadataOnly,
    /// Unrecoverable per-file failure.
    Failed,
}

impl IndexingState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ContentIndexed => "content_indexed",
            Self::MetadataOnly => "metadata_only",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "content_indexed" => Ok(Self::ContentIndexed),
            "metadata_only" => Ok(Self::MetadataOnly),
            "failed" => Ok(Self::Failed),
            other => Err(MetadataStoreError::UnknownState(other.to_string())),
        }
    }
}

/// One row of the files table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub absolute_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub modified_time: i64,
    pub file_type: String,
    pub content_hash: String,
    pub indexing_state: IndexingState,
    pub state_reason: Option<String>,
    pub embedding_id: Option<i64>,
    pub last_indexed_at: i64,
}

/// Input for `upsert`; the store assigns (and preserves) the id.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub absolute_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub modified_time: i64,
    pub file_type: String,
    pub content_hash: String,
    pub indexing_state: IndexingState,
    pub state_reason: Option<String>,
    pub embedding_id: Option<i64>,
    pub last_indexed_at: i64,
}

/// Transactional record store of per-file state, keyed by absolute path.
///
/// Each call opens its own connection inside `spawn_blocking`; SQLite
/// serializes the writes, and statement-level transactions keep every
/// mutation atomic. The pipeline orders durable vector appends *before* the
/// metadata commit carrying the embedding_id, so a crash leaves at worst an
/// orphan vector, never a dangling reference.
#[derive(Clone)]
pub struct MetadataStore {
    db_path: PathBuf,
}

impl MetadataStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join("metadata.db");

        let path = db_path.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await??;

        log::info!("Opened metadata store at {}", db_path.display());
        Ok(Self { db_path })
    }

    /// Create-or-update keyed by absolute path. The rowid of an existing
    /// record is preserved across updates, so file ids stay stable.
    pub async fn upsert(&self, record: NewFileRecord) -> Result<i64> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO files
                   (absolute_path, file_name, size_bytes, modified_time, file_type,
                    content_hash, indexing_state, state_reason, embedding_id, last_indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(absolute_path) DO UPDATE SET
                   file_name = excluded.file_name,
                   size_bytes = excluded.size_bytes,
                   modified_time = excluded.modified_time,
                   file_type = excluded.file_type,
                   content_hash = excluded.content_hash,
                   indexing_state = excluded.indexing_state,
                   state_reason = excluded.state_reason,
                   embedding_id = excluded.embedding_id,
                   last_indexed_at = excluded.last_indexed_at",
                params![
                    record.absolute_path,
                    record.file_name,
                    record.size_bytes,
                    record.modified_time,
                    record.file_type,
                    record.content_hash,
                    record.indexing_state.as_str(),
                    record.state_reason,
                    record.embedding_id,
                    record.last_indexed_at,
                ],
            )?;

            let id = conn.query_row(
                "SELECT id FROM files WHERE absolute_path = ?1",
                params![record.absolute_path],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    pub async fn find_by_path(&self, absolute_path: &str) -> Result<Option<FileRecord>> {
        let absolute_path = absolute_path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&select("WHERE absolute_path = ?1"))?;
            let result = stmt.query_row(params![absolute_path], row_to_record);
            optional(result)
        })
        .await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&select("WHERE id = ?1"))?;
            let result = stmt.query_row(params![id], row_to_record);
            optional(result)
        })
        .await
    }

    pub async fn list_all(&self) -> Result<Vec<FileRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&select("ORDER BY id"))?;
            let rows = stmt.query_map([], row_to_record)?;
            collect(rows)
        })
        .await
    }

    /// All records whose absolute path starts with `prefix`.
    pub async fn list_by_directory_prefix(&self, prefix: &str) -> Result<Vec<FileRecord>> {
        let pattern = format!("{}%", escape_like(prefix));
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare(&select("WHERE absolute_path LIKE ?1 ESCAPE '\\' ORDER BY id"))?;
            let rows = stmt.query_map(params![pattern], row_to_record)?;
            collect(rows)
        })
        .await
    }

    /// Records whose embedding_id is in `ids`. Used by the search path to
    /// join retrieval candidates back to file metadata in one round trip.
    pub async fn find_by_embedding_ids(&self, ids: &[i64]) -> Result<Vec<FileRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let mut stmt = conn.prepare(&select(&format!(
                "WHERE embedding_id IN ({placeholders}) ORDER BY id"
            )))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), row_to_record)?;
            collect(rows)
        })
        .await
    }

    pub async fn list_by_state(&self, state: IndexingState) -> Result<Vec<FileRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&select("WHERE indexing_state = ?1 ORDER BY id"))?;
            let rows = stmt.query_map(params![state.as_str()], row_to_record)?;
            collect(rows)
        })
        .await
    }

    pub async fn mark_state(
        &self,
        id: i64,
        state: IndexingState,
        reason: Option<String>,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE files SET indexing_state = ?1, state_reason = ?2 WHERE id = ?3",
                params![state.as_str(), reason, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Point the record at a (possibly absent) embedding vector.
    pub async fn set_embedding(&self, id: i64, embedding_id: Option<i64>) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE files SET embedding_id = ?1 WHERE id = ?2",
                params![embedding_id, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Delete by path, returning the removed record so the caller can
    /// tombstone its vector in the same breath.
    pub async fn remove_by_path(&self, absolute_path: &str) -> Result<Option<FileRecord>> {
        let absolute_path = absolute_path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&select("WHERE absolute_path = ?1"))?;
            let existing = optional(stmt.query_row(params![&absolute_path], row_to_record))?;
            if existing.is_some() {
                conn.execute(
                    "DELETE FROM files WHERE absolute_path = ?1",
                    params![absolute_path],
                )?;
            }
            Ok(existing)
        })
        .await
    }

    pub async fn count_by_state(&self) -> Result<HashMap<IndexingState, usize>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT indexing_state, COUNT(*) FROM files GROUP BY indexing_state")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut counts = HashMap::new();
            for row in rows {
                let (state, count) = row?;
                counts.insert(
                    IndexingState::parse(&state)?,
                    usize::try_from(count).unwrap_or(0),
                );
            }
            Ok(counts)
        })
        .await
    }

    pub async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM files", [])?;
            Ok(())
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            f(&conn)
        })
        .await?
    }
}

fn select(clause: &str) -> String {
    format!(
        "SELECT id, absolute_path, file_name, size_bytes, modified_time, file_type,
                content_hash, indexing_state, state_reason, embedding_id, last_indexed_at
         FROM files {clause}"
    )
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let state_raw: String = row.get(7)?;
    let indexing_state = IndexingState::parse(&state_raw).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown indexing state '{state_raw}'").into(),
        )
    })?;

    Ok(FileRecord {
        id: row.get(0)?,
        absolute_path: row.get(1)?,
        file_name: row.get(2)?,
        size_bytes: row.get(3)?,
        modified_time: row.get(4)?,
        file_type: row.get(5)?,
        content_hash: row.get(6)?,
        indexing_state,
        state_reason: row.get(8)?,
        embedding_id: row.get(9)?,
        last_indexed_at: row.get(10)?,
    })
}

fn optional(result: rusqlite::Result<FileRecord>) -> Result<Option<FileRecord>> {
    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<FileRecord>>,
) -> Result<Vec<FileRecord>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(path: &str, state: IndexingState) -> NewFileRecord {
        NewFileRecord {
            absolute_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            size_bytes: 1024,
            modified_time: 1_700_000_000,
            file_type: "txt".to_string(),
            content_hash: "abc123".to_string(),
            indexing_state: state,
            state_reason: None,
            embedding_id: None,
            last_indexed_at: 1_700_000_001,
        }
    }

    #[tokio::test]
    async fn upsert_preserves_id_on_update() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).await.unwrap();

        let first = store
            .upsert(record("/docs/a.txt", IndexingState::Pending))
            .await
            .unwrap();

        let mut updated = record("/docs/a.txt", IndexingState::ContentIndexed);
        updated.embedding_id = Some(9);
        updated.content_hash = "def456".to_string();
        let second = store.upsert(updated).await.unwrap();

        assert_eq!(first, second);
        let found = store.find_by_path("/docs/a.txt").await.unwrap().unwrap();
        assert_eq!(found.indexing_state, IndexingState::ContentIndexed);
        assert_eq!(found.embedding_id, Some(9));
        assert_eq!(found.content_hash, "def456");
    }

    #[tokio::test]
    async fn find_by_path_returns_none_for_unknown() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).await.unwrap();
        assert!(store.find_by_path("/nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_directory_prefix_filters() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).await.unwrap();

        store
            .upsert(record("/home/u/Downloads/a.pdf", IndexingState::Pending))
            .await
            .unwrap();
        store
            .upsert(record("/home/u/Downloads/b.pdf", IndexingState::Pending))
            .await
            .unwrap();
        store
            .upsert(record("/home/u/Desktop/c.pdf", IndexingState::Pending))
            .await
            .unwrap();

        let downloads = store
            .list_by_directory_prefix("/home/u/Downloads/")
            .await
            .unwrap();
        assert_eq!(downloads.len(), 2);
        assert!(downloads
            .iter()
            .all(|r| r.absolute_path.starts_with("/home/u/Downloads/")));
    }

    #[tokio::test]
    async fn mark_state_records_reason() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).await.unwrap();

        let id = store
            .upsert(record("/docs/broken.pdf", IndexingState::Pending))
            .await
            .unwrap();
        store
            .mark_state(
                id,
                IndexingState::MetadataOnly,
                Some("extraction failed: encrypted".to_string()),
            )
            .await
            .unwrap();

        let found = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.indexing_state, IndexingState::MetadataOnly);
        assert_eq!(
            found.state_reason.as_deref(),
            Some("extraction failed: encrypted")
        );
    }

    #[tokio::test]
    async fn set_embedding_repoints_and_clears() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).await.unwrap();

        let id = store
            .upsert(record("/docs/a.txt", IndexingState::ContentIndexed))
            .await
            .unwrap();

        store.set_embedding(id, Some(7)).await.unwrap();
        assert_eq!(
            store.find_by_id(id).await.unwrap().unwrap().embedding_id,
            Some(7)
        );

        store.set_embedding(id, None).await.unwrap();
        assert_eq!(store.find_by_id(id).await.unwrap().unwrap().embedding_id, None);
    }

    #[tokio::test]
    async fn remove_by_path_returns_the_removed_record() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).await.unwrap();

        let mut rec = record("/docs/a.txt", IndexingState::ContentIndexed);
        rec.embedding_id = Some(3);
        store.upsert(rec).await.unwrap();

        let removed = store.remove_by_path("/docs/a.txt").await.unwrap().unwrap();
        assert_eq!(removed.embedding_id, Some(3));
        assert!(store.find_by_path("/docs/a.txt").await.unwrap().is_none());
        assert!(store.remove_by_path("/docs/a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn count_by_state_groups_correctly() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).await.unwrap();

        store
            .upsert(record("/a.txt", IndexingState::ContentIndexed))
            .await
            .unwrap();
        store
            .upsert(record("/b.txt", IndexingState::ContentIndexed))
            .await
            .unwrap();
        store
            .upsert(record("/c.bin", IndexingState::MetadataOnly))
            .await
            .unwrap();

        let counts = store.count_by_state().await.unwrap();
        assert_eq!(counts.get(&IndexingState::ContentIndexed), Some(&2));
        assert_eq!(counts.get(&IndexingState::MetadataOnly), Some(&1));
        assert_eq!(counts.get(&IndexingState::Failed), None);
    }

    #[tokio::test]
    async fn clear_empties_the_table() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).await.unwrap();

        store
            .upsert(record("/a.txt", IndexingState::Pending))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}

//! SQLite implementation of IMetadataStore
//!
//! ## Type Mapping
//!
//! | Domain Type          | SQL Type | Strategy                                   |
//! |----------------------|----------|--------------------------------------------|
//! | NodeId, RevisionTag  | TEXT     | `.as_str()` / `::new()`                    |
//! | SyncCursor           | TEXT     | single row with `id = 1`                   |
//! | SyncState            | TEXT     | `as_str()` / `FromStr`                     |
//! | DateTime<Utc>        | TEXT     | RFC 3339                                   |
//! | RemoteItem           | TEXT     | serde_json (conflict snapshots only)       |
//! | Bytes                | BLOB     | staged upload content                      |
//!
//! ## Transactions
//!
//! Multi-statement writes run in a transaction whose first statement is a
//! write, so SQLite takes the write lock up front and concurrent writers
//! wait on the busy timeout instead of failing a lock upgrade.
//! Tree validation runs after the write; returning early drops the
//! transaction, which rolls it back.

use std::collections::HashMap;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use vaultspace_core::domain::{
    ConflictRecord, DomainError, FileNode, NodeId, RemoteItem, RevisionTag, SyncCursor, SyncState,
    FOLDER_MIME_TYPE,
};
use vaultspace_core::ports::{IMetadataStore, StagedUpload};
use vaultspace_core::StoreError;

use crate::CacheError;

const NODE_COLUMNS: &str = "id, parent_id, name, mime_type, size_bytes, revision_tag, \
                            sync_state, last_synced_at, modified_at";

/// SQLite-backed metadata store
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Creates a store over an already migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn db(e: sqlx::Error) -> StoreError {
    CacheError::from(e).into()
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> CacheError {
    CacheError::SerializationError(format!("Corrupt {what} in database: {e}"))
}

/// Parse a DateTime<Utc> from an RFC3339 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn parse_node_id(s: String) -> Result<NodeId, CacheError> {
    NodeId::new(s).map_err(|e| corrupt("node id", e))
}

fn parse_revision(s: Option<String>) -> Result<Option<RevisionTag>, CacheError> {
    s.map(|tag| RevisionTag::new(tag).map_err(|e| corrupt("revision tag", e)))
        .transpose()
}

/// Escapes LIKE wildcards so user input matches literally
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn node_from_row(row: &SqliteRow) -> Result<FileNode, CacheError> {
    let id: String = row.get("id");
    let parent_id: String = row.get("parent_id");
    let name: String = row.get("name");
    let mime_type: String = row.get("mime_type");
    let size_bytes: i64 = row.get("size_bytes");
    let revision_tag: Option<String> = row.get("revision_tag");
    let sync_state: String = row.get("sync_state");
    let last_synced_at: Option<String> = row.get("last_synced_at");
    let modified_at: Option<String> = row.get("modified_at");

    FileNode::from_parts(
        parse_node_id(id)?,
        parse_node_id(parent_id)?,
        name,
        mime_type,
        u64::try_from(size_bytes).map_err(|e| corrupt("size", e))?,
        parse_revision(revision_tag)?,
        SyncState::from_str(&sync_state).map_err(|e| corrupt("sync state", e))?,
        parse_optional_datetime(last_synced_at)?,
        parse_optional_datetime(modified_at)?,
    )
    .map_err(|e| corrupt("node", e))
}

fn staged_from_row(row: &SqliteRow) -> Result<StagedUpload, CacheError> {
    let node_id: String = row.get("node_id");
    let data: Vec<u8> = row.get("data");
    let attempts: i64 = row.get("attempts");
    let last_error: Option<String> = row.get("last_error");
    let retryable: bool = row.get("retryable");
    let staged_at: String = row.get("staged_at");

    Ok(StagedUpload {
        node_id: parse_node_id(node_id)?,
        data: Bytes::from(data),
        attempts: u32::try_from(attempts).map_err(|e| corrupt("attempt count", e))?,
        last_error,
        retryable,
        staged_at: parse_datetime(&staged_at)?,
    })
}

fn conflict_from_row(row: &SqliteRow) -> Result<ConflictRecord, CacheError> {
    let node_id: String = row.get("node_id");
    let local_revision: Option<String> = row.get("local_revision");
    let remote: String = row.get("remote");
    let detected_at: String = row.get("detected_at");

    let remote: RemoteItem = serde_json::from_str(&remote).map_err(|e| {
        CacheError::SerializationError(format!("Failed to deserialize remote snapshot: {}", e))
    })?;

    Ok(ConflictRecord {
        node_id: parse_node_id(node_id)?,
        local_revision: parse_revision(local_revision)?,
        remote,
        detected_at: parse_datetime(&detected_at)?,
    })
}

// ============================================================================
// Transaction-scoped writes
// ============================================================================

/// Writes a node and checks the tree invariants it could break
async fn write_node(conn: &mut SqliteConnection, node: &FileNode) -> Result<(), StoreError> {
    let id = node.id().as_str();
    let parent_id = node.parent_id().as_str();

    sqlx::query(&format!(
        "INSERT OR REPLACE INTO file_nodes ({NODE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(id)
    .bind(parent_id)
    .bind(node.name())
    .bind(node.mime_type())
    .bind(node.size_bytes() as i64)
    .bind(node.revision_tag().map(RevisionTag::as_str))
    .bind(node.sync_state().as_str())
    .bind(node.last_synced_at().map(|dt| dt.to_rfc3339()))
    .bind(node.modified_at().map(|dt| dt.to_rfc3339()))
    .execute(&mut *conn)
    .await
    .map_err(db)?;

    if !node.parent_id().is_root() {
        let parent_mime: Option<String> =
            sqlx::query_scalar("SELECT mime_type FROM file_nodes WHERE id = ?")
                .bind(parent_id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db)?;
        match parent_mime {
            None => {
                return Err(DomainError::MissingParent {
                    node: id.to_string(),
                    parent: parent_id.to_string(),
                }
                .into())
            }
            Some(mime) if mime != FOLDER_MIME_TYPE => {
                return Err(DomainError::NotAFolder(parent_id.to_string()).into())
            }
            Some(_) => {}
        }

        let cycles: i64 = sqlx::query_scalar(
            "WITH RECURSIVE ancestors(id) AS ( \
                 SELECT ? \
                 UNION \
                 SELECT f.parent_id FROM file_nodes f JOIN ancestors a ON f.id = a.id \
             ) \
             SELECT COUNT(*) FROM ancestors WHERE id = ?",
        )
        .bind(parent_id)
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db)?;
        if cycles > 0 {
            return Err(DomainError::ParentCycle {
                node: id.to_string(),
                parent: parent_id.to_string(),
            }
            .into());
        }
    }

    if !node.is_folder() {
        let children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_nodes WHERE parent_id = ?")
            .bind(id)
            .fetch_one(&mut *conn)
            .await
            .map_err(db)?;
        if children > 0 {
            return Err(DomainError::NotAFolder(id.to_string()).into());
        }
    }

    Ok(())
}

// ============================================================================
// IMetadataStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IMetadataStore for SqliteMetadataStore {
    async fn upsert(&self, node: &FileNode) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        write_node(&mut *tx, node).await?;
        tx.commit().await.map_err(db)?;

        tracing::trace!(node_id = %node.id(), state = %node.sync_state(), "Saved node");
        Ok(())
    }

    async fn get(&self, id: &NodeId) -> Result<Option<FileNode>, StoreError> {
        let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM file_nodes WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        match row {
            Some(ref r) => Ok(Some(node_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_children(&self, parent_id: &NodeId) -> Result<Vec<FileNode>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM file_nodes WHERE parent_id = ? \
             ORDER BY name COLLATE NOCASE, id"
        ))
        .bind(parent_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|r| node_from_row(r).map_err(StoreError::from))
            .collect()
    }

    async fn mark_pending(&self, id: &NodeId, state: SyncState) -> Result<FileNode, StoreError> {
        // Compare-and-set on the previous state; a concurrent writer makes
        // the update miss and the transition is re-validated.
        loop {
            let mut node = self
                .get(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let previous = node.sync_state();
            node.transition_to(state)?;

            let result = sqlx::query(
                "UPDATE file_nodes SET sync_state = ? WHERE id = ? AND sync_state = ?",
            )
            .bind(state.as_str())
            .bind(id.as_str())
            .bind(previous.as_str())
            .execute(&self.pool)
            .await
            .map_err(db)?;

            if result.rows_affected() == 1 {
                tracing::trace!(node_id = %id, from = %previous, to = %state, "Node state changed");
                return Ok(node);
            }
        }
    }

    async fn delete(&self, id: &NodeId) -> Result<Vec<NodeId>, StoreError> {
        if id.is_root() {
            return Err(DomainError::RootImmutable.into());
        }

        const SUBTREE: &str = "WITH RECURSIVE subtree(id) AS ( \
                                   SELECT ? \
                                   UNION \
                                   SELECT f.id FROM file_nodes f JOIN subtree s ON f.parent_id = s.id \
                               )";

        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query(&format!(
            "{SUBTREE} DELETE FROM staged_uploads WHERE node_id IN (SELECT id FROM subtree)"
        ))
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query(&format!(
            "{SUBTREE} DELETE FROM conflicts WHERE node_id IN (SELECT id FROM subtree)"
        ))
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        let removed: Vec<String> = sqlx::query_scalar(&format!(
            "{SUBTREE} DELETE FROM file_nodes WHERE id IN (SELECT id FROM subtree) RETURNING id"
        ))
        .bind(id.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;

        tracing::debug!(node_id = %id, removed = removed.len(), "Deleted subtree");

        removed
            .into_iter()
            .map(|s| parse_node_id(s).map_err(StoreError::from))
            .collect()
    }

    async fn search(&self, query: &str) -> Result<Vec<FileNode>, StoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM file_nodes WHERE name LIKE ? ESCAPE '\\' \
             ORDER BY name COLLATE NOCASE, id"
        ))
        .bind(like_pattern(query))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|r| node_from_row(r).map_err(StoreError::from))
            .collect()
    }

    async fn list_by_state(&self, state: SyncState) -> Result<Vec<FileNode>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM file_nodes WHERE sync_state = ? \
             ORDER BY name COLLATE NOCASE, id"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|r| node_from_row(r).map_err(StoreError::from))
            .collect()
    }

    async fn count_by_state(&self) -> Result<HashMap<SyncState, u64>, StoreError> {
        let rows = sqlx::query(
            "SELECT sync_state, COUNT(*) AS total FROM file_nodes GROUP BY sync_state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut counts: HashMap<SyncState, u64> =
            SyncState::ALL.into_iter().map(|s| (s, 0)).collect();
        for row in &rows {
            let state: String = row.get("sync_state");
            let total: i64 = row.get("total");
            let state = SyncState::from_str(&state).map_err(|e| corrupt("sync state", e))?;
            counts.insert(state, total.max(0) as u64);
        }
        Ok(counts)
    }

    async fn all_ids(&self) -> Result<Vec<NodeId>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM file_nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        ids.into_iter()
            .map(|s| parse_node_id(s).map_err(StoreError::from))
            .collect()
    }

    async fn rekey(
        &self,
        old_id: &NodeId,
        new_id: &NodeId,
        revision: &RevisionTag,
    ) -> Result<FileNode, StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(db)?;

        let copied = sqlx::query(
            "INSERT OR REPLACE INTO file_nodes \
                 (id, parent_id, name, mime_type, size_bytes, revision_tag, \
                  sync_state, last_synced_at, modified_at) \
             SELECT ?, parent_id, name, mime_type, size_bytes, ?, 'synced', ?, modified_at \
             FROM file_nodes WHERE id = ?",
        )
        .bind(new_id.as_str())
        .bind(revision.as_str())
        .bind(&now)
        .bind(old_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if copied.rows_affected() == 0 {
            return Err(StoreError::NotFound(old_id.clone()));
        }

        if old_id != new_id {
            sqlx::query("UPDATE file_nodes SET parent_id = ? WHERE parent_id = ?")
                .bind(new_id.as_str())
                .bind(old_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db)?;

            sqlx::query("DELETE FROM file_nodes WHERE id = ?")
                .bind(old_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db)?;
        }

        sqlx::query("DELETE FROM staged_uploads WHERE node_id = ?")
            .bind(old_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        sqlx::query("DELETE FROM conflicts WHERE node_id = ?")
            .bind(old_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM file_nodes WHERE id = ?"))
            .bind(new_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
        let node = node_from_row(&row)?;

        tx.commit().await.map_err(db)?;

        tracing::debug!(from = %old_id, to = %new_id, revision = %revision, "Re-keyed node");
        Ok(node)
    }

    async fn get_cursor(&self) -> Result<Option<SyncCursor>, StoreError> {
        let cursor: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM sync_cursor WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;

        Ok(cursor
            .map(|c| SyncCursor::new(c).map_err(|e| corrupt("cursor", e)))
            .transpose()?)
    }

    async fn set_cursor(&self, cursor: &SyncCursor) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO sync_cursor (id, cursor, updated_at) VALUES (1, ?, ?)")
            .bind(cursor.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db)?;

        tracing::trace!(cursor = %cursor, "Saved sync cursor");
        Ok(())
    }

    async fn clear_cursor(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_cursor")
            .execute(&self.pool)
            .await
            .map_err(db)?;

        tracing::debug!("Cleared sync cursor");
        Ok(())
    }

    async fn stage_upload(&self, node: &FileNode, data: Bytes) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        write_node(&mut *tx, node).await?;

        sqlx::query(
            "INSERT OR REPLACE INTO staged_uploads \
                 (node_id, data, attempts, last_error, retryable, staged_at) \
             VALUES (?, ?, 0, NULL, 1, ?)",
        )
        .bind(node.id().as_str())
        .bind(&data[..])
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;

        tracing::trace!(node_id = %node.id(), bytes = data.len(), "Staged upload");
        Ok(())
    }

    async fn staged_upload(&self, id: &NodeId) -> Result<Option<StagedUpload>, StoreError> {
        let row = sqlx::query("SELECT * FROM staged_uploads WHERE node_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        match row {
            Some(ref r) => Ok(Some(staged_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn discard_upload(&self, id: &NodeId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM staged_uploads WHERE node_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db)?;

        tracing::trace!(node_id = %id, "Discarded staged upload");
        Ok(())
    }

    async fn record_upload_failure(
        &self,
        id: &NodeId,
        error: &str,
        retryable: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE staged_uploads \
             SET attempts = attempts + 1, last_error = ?, retryable = ? \
             WHERE node_id = ?",
        )
        .bind(error)
        .bind(retryable)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }

        tracing::trace!(node_id = %id, retryable, "Recorded upload failure");
        Ok(())
    }

    async fn clear_upload_failure(&self, id: &NodeId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE staged_uploads SET last_error = NULL, retryable = 1 WHERE node_id = ?",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn failed_uploads(&self) -> Result<Vec<StagedUpload>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM staged_uploads WHERE last_error IS NOT NULL \
             ORDER BY staged_at, node_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|r| staged_from_row(r).map_err(StoreError::from))
            .collect()
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> Result<(), StoreError> {
        let remote = serde_json::to_string(&record.remote).map_err(|e| {
            CacheError::SerializationError(format!("Failed to serialize remote snapshot: {}", e))
        })?;

        // Refreshing an open conflict keeps its original detection time
        sqlx::query(
            "INSERT INTO conflicts (node_id, local_revision, remote, detected_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(node_id) DO UPDATE SET \
                 local_revision = excluded.local_revision, \
                 remote = excluded.remote",
        )
        .bind(record.node_id.as_str())
        .bind(record.local_revision.as_ref().map(RevisionTag::as_str))
        .bind(remote)
        .bind(record.detected_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        tracing::trace!(node_id = %record.node_id, "Saved conflict");
        Ok(())
    }

    async fn get_conflict(&self, id: &NodeId) -> Result<Option<ConflictRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE node_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        match row {
            Some(ref r) => Ok(Some(conflict_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM conflicts ORDER BY detected_at, node_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        rows.iter()
            .map(|r| conflict_from_row(r).map_err(StoreError::from))
            .collect()
    }

    async fn remove_conflict(&self, id: &NodeId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conflicts WHERE node_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db)?;

        tracing::trace!(node_id = %id, "Removed conflict");
        Ok(())
    }
}

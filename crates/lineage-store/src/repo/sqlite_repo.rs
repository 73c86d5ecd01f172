//! SQLite implementation of the metadata store
//!
//! One connection behind a mutex; every multi-row mutation runs in a single
//! transaction. Timestamps are stored as Unix milliseconds.

#![allow(clippy::result_large_err)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use lineage_core::errors::{ExError, ExErrorKind};
use lineage_core::model::{
    DatasetVersion, ModelTrainingLink, TransformationLineageEdge, TransformationStep, VersionState,
};
use lineage_core::ports::MetadataStore;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::db;
use crate::errors::{from_rusqlite, json_error, version_conflict, version_not_found, Result};
use crate::migrations::apply_migrations;

const VERSION_COLUMNS: &str = "version_id, content_hash, parent_version_id, created_at, created_by,
     row_count, column_count, storage_location, pinned, access_count, last_accessed_at, state,
     deleted_at";

const EDGE_COLUMNS: &str =
    "edge_id, source_version_id, target_version_id, steps, applied_at, applied_by";

pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) a database file and bring its schema up to date
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(db::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(db::open_in_memory()?)
    }

    pub fn from_connection(mut conn: Connection) -> Result<Self> {
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            ExError::new(ExErrorKind::Internal)
                .with_op("sqlite")
                .with_message("Metadata connection mutex poisoned")
        })
    }
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

fn opt_from_millis(ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<DatasetVersion> {
    let state: String = row.get(11)?;
    Ok(DatasetVersion {
        version_id: row.get(0)?,
        content_hash: row.get(1)?,
        parent_version_id: row.get(2)?,
        created_at: from_millis(row.get(3)?)?,
        created_by: row.get(4)?,
        row_count: row.get::<_, i64>(5)? as u64,
        column_count: row.get::<_, i64>(6)? as u64,
        storage_location: row.get(7)?,
        pinned: row.get(8)?,
        access_count: row.get::<_, i64>(9)? as u64,
        last_accessed_at: opt_from_millis(row.get(10)?)?,
        state: VersionState::parse(&state)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(11, state.clone(), Type::Text))?,
        deleted_at: opt_from_millis(row.get(12)?)?,
    })
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<TransformationLineageEdge> {
    let steps_json: String = row.get(3)?;
    let steps: Vec<TransformationStep> = serde_json::from_str(&steps_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(TransformationLineageEdge {
        edge_id: row.get(0)?,
        source_version_id: row.get(1)?,
        target_version_id: row.get(2)?,
        steps,
        applied_at: from_millis(row.get(4)?)?,
        applied_by: row.get(5)?,
    })
}

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<ModelTrainingLink> {
    Ok(ModelTrainingLink {
        model_id: row.get(0)?,
        dataset_version_id: row.get(1)?,
        created_at: from_millis(row.get(2)?)?,
    })
}

fn state_of(tx: &Transaction<'_>, version_id: &str) -> Result<Option<(VersionState, String)>> {
    let row: Option<(String, String)> = tx
        .query_row(
            "SELECT state, content_hash FROM dataset_versions WHERE version_id = ?1",
            [version_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(from_rusqlite)?;

    row.map(|(state, hash)| {
        VersionState::parse(&state)
            .map(|s| (s, hash))
            .ok_or_else(|| {
                ExError::new(ExErrorKind::Persistence)
                    .with_entity_id(version_id)
                    .with_message(format!("Unknown version state {:?}", state))
            })
    })
    .transpose()
}

/// Drop one reference; returns the location when it was the last one
fn release_ref(tx: &Transaction<'_>, content_hash: &str) -> Result<Option<String>> {
    tx.execute(
        "UPDATE storage_objects SET ref_count = ref_count - 1 WHERE content_hash = ?1",
        [content_hash],
    )
    .map_err(from_rusqlite)?;

    let row: Option<(i64, String)> = tx
        .query_row(
            "SELECT ref_count, location FROM storage_objects WHERE content_hash = ?1",
            [content_hash],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(from_rusqlite)?;

    match row {
        Some((0, location)) => {
            tx.execute(
                "DELETE FROM storage_objects WHERE content_hash = ?1",
                [content_hash],
            )
            .map_err(from_rusqlite)?;
            Ok(Some(location))
        }
        _ => Ok(None),
    }
}

fn insert_edge_tx(tx: &Transaction<'_>, edge: &TransformationLineageEdge) -> Result<()> {
    let steps = serde_json::to_string(&edge.steps).map_err(|e| json_error("insert_edge", e))?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT edge_id FROM lineage_edges WHERE target_version_id = ?1",
            [&edge.target_version_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)?;
    if let Some(existing) = existing {
        return Err(version_conflict(
            &edge.target_version_id,
            &format!("Version already has parent edge {}", existing),
        ));
    }

    tx.execute(
        &format!(
            "INSERT INTO lineage_edges ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            EDGE_COLUMNS
        ),
        params![
            edge.edge_id,
            edge.source_version_id,
            edge.target_version_id,
            steps,
            edge.applied_at.timestamp_millis(),
            edge.applied_by,
        ],
    )
    .map_err(from_rusqlite)?;

    tx.execute(
        "UPDATE dataset_versions SET parent_version_id = ?1 WHERE version_id = ?2",
        params![edge.source_version_id, edge.target_version_id],
    )
    .map_err(from_rusqlite)?;

    Ok(())
}

impl MetadataStore for SqliteMetadataStore {
    fn object_location(&self, content_hash: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT location FROM storage_objects WHERE content_hash = ?1",
                [content_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(from_rusqlite)
    }

    fn object_ref_count(&self, content_hash: &str) -> Result<u64> {
        let count: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT ref_count FROM storage_objects WHERE content_hash = ?1",
                [content_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(from_rusqlite)?;
        Ok(count.unwrap_or(0) as u64)
    }

    fn insert_staged(&self, version: &DatasetVersion, size_bytes: u64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(from_rusqlite)?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM dataset_versions WHERE version_id = ?1",
                [&version.version_id],
                |_| Ok(true),
            )
            .optional()
            .map_err(from_rusqlite)?
            .unwrap_or(false);
        if exists {
            return Err(version_conflict(
                &version.version_id,
                "Version id already exists",
            ));
        }

        tx.execute(
            "INSERT INTO storage_objects (content_hash, location, size_bytes, ref_count, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(content_hash) DO UPDATE SET ref_count = ref_count + 1",
            params![
                version.content_hash,
                version.storage_location,
                size_bytes as i64,
                version.created_at.timestamp_millis(),
            ],
        )
        .map_err(from_rusqlite)?;

        tx.execute(
            &format!(
                "INSERT INTO dataset_versions ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                VERSION_COLUMNS
            ),
            params![
                version.version_id,
                version.content_hash,
                version.parent_version_id,
                version.created_at.timestamp_millis(),
                version.created_by,
                version.row_count as i64,
                version.column_count as i64,
                version.storage_location,
                version.pinned,
                version.access_count as i64,
                version.last_accessed_at.map(|t| t.timestamp_millis()),
                VersionState::Staged.as_str(),
                None::<i64>,
            ],
        )
        .map_err(from_rusqlite)?;

        tx.commit().map_err(from_rusqlite)
    }

    fn commit_version(
        &self,
        version_id: &str,
        edge: Option<&TransformationLineageEdge>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(from_rusqlite)?;

        match state_of(&tx, version_id)? {
            None => return Err(version_not_found(version_id).with_op("commit_version")),
            Some((VersionState::Staged, _)) => {}
            Some((state, _)) => {
                return Err(version_conflict(
                    version_id,
                    &format!("Cannot commit a {} version", state),
                )
                .with_op("commit_version"))
            }
        }

        if let Some(edge) = edge {
            if edge.target_version_id != version_id {
                return Err(ExError::new(ExErrorKind::InvalidInput)
                    .with_op("commit_version")
                    .with_entity_id(version_id)
                    .with_message("Edge targets a different version"));
            }
            insert_edge_tx(&tx, edge)?;
        }

        tx.execute(
            "UPDATE dataset_versions SET state = ?1 WHERE version_id = ?2",
            params![VersionState::Committed.as_str(), version_id],
        )
        .map_err(from_rusqlite)?;

        tx.commit().map_err(from_rusqlite)
    }

    fn remove_staged(&self, version_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(from_rusqlite)?;

        let hash = match state_of(&tx, version_id)? {
            None => return Ok(None),
            Some((VersionState::Staged, hash)) => hash,
            Some((state, _)) => {
                return Err(version_conflict(
                    version_id,
                    &format!("Cannot discard a {} version", state),
                )
                .with_op("remove_staged"))
            }
        };

        tx.execute(
            "DELETE FROM lineage_edges WHERE target_version_id = ?1",
            [version_id],
        )
        .map_err(from_rusqlite)?;
        tx.execute(
            "DELETE FROM dataset_versions WHERE version_id = ?1",
            [version_id],
        )
        .map_err(from_rusqlite)?;
        let released = release_ref(&tx, &hash)?;

        tx.commit().map_err(from_rusqlite)?;
        Ok(released)
    }

    fn mark_deleted(&self, version_id: &str, at: DateTime<Utc>) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(from_rusqlite)?;

        let hash = match state_of(&tx, version_id)? {
            None => return Err(version_not_found(version_id).with_op("mark_deleted")),
            Some((VersionState::Committed, hash)) => hash,
            Some((VersionState::Deleted, _)) => {
                return Err(ExError::new(ExErrorKind::Deleted)
                    .with_op("mark_deleted")
                    .with_entity_id(version_id)
                    .with_message("Version already deleted"))
            }
            Some((VersionState::Staged, _)) => {
                return Err(version_conflict(version_id, "Cannot delete a staged version")
                    .with_op("mark_deleted"))
            }
        };

        tx.execute(
            "UPDATE dataset_versions SET state = ?1, deleted_at = ?2 WHERE version_id = ?3",
            params![
                VersionState::Deleted.as_str(),
                at.timestamp_millis(),
                version_id
            ],
        )
        .map_err(from_rusqlite)?;
        let released = release_ref(&tx, &hash)?;

        tx.commit().map_err(from_rusqlite)?;
        Ok(released)
    }

    fn purge_deleted(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(from_rusqlite)?;
        let cutoff_ms = cutoff.timestamp_millis();

        tx.execute(
            "DELETE FROM lineage_edges
             WHERE target_version_id IN (
                 SELECT version_id FROM dataset_versions
                 WHERE state = 'deleted' AND deleted_at < ?1)
                OR source_version_id IN (
                 SELECT version_id FROM dataset_versions
                 WHERE state = 'deleted' AND deleted_at < ?1)",
            [cutoff_ms],
        )
        .map_err(from_rusqlite)?;

        let purged = tx
            .execute(
                "DELETE FROM dataset_versions WHERE state = 'deleted' AND deleted_at < ?1",
                [cutoff_ms],
            )
            .map_err(from_rusqlite)?;

        tx.commit().map_err(from_rusqlite)?;
        Ok(purged)
    }

    fn staged_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT version_id FROM dataset_versions
                 WHERE state = 'staged' AND created_at < ?1
                 ORDER BY version_id",
            )
            .map_err(from_rusqlite)?;
        let ids = stmt
            .query_map([cutoff.timestamp_millis()], |row| row.get(0))
            .map_err(from_rusqlite)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(from_rusqlite)?;
        Ok(ids)
    }

    fn get_version(&self, version_id: &str) -> Result<Option<DatasetVersion>> {
        self.conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM dataset_versions WHERE version_id = ?1",
                    VERSION_COLUMNS
                ),
                [version_id],
                row_to_version,
            )
            .optional()
            .map_err(from_rusqlite)
    }

    fn list_committed(&self) -> Result<Vec<DatasetVersion>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM dataset_versions WHERE state = 'committed'
                 ORDER BY created_at, version_id",
                VERSION_COLUMNS
            ))
            .map_err(from_rusqlite)?;
        let versions = stmt
            .query_map([], row_to_version)
            .map_err(from_rusqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(from_rusqlite)?;
        Ok(versions)
    }

    fn list_children_page(
        &self,
        parent_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT version_id FROM dataset_versions
                 WHERE parent_version_id = ?1 AND state = 'committed'
                   AND (?2 IS NULL OR version_id > ?2)
                 ORDER BY version_id
                 LIMIT ?3",
            )
            .map_err(from_rusqlite)?;
        let ids = stmt
            .query_map(params![parent_id, after, limit as i64], |row| row.get(0))
            .map_err(from_rusqlite)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(from_rusqlite)?;
        Ok(ids)
    }

    fn live_child_count(&self, parent_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM dataset_versions
                 WHERE parent_version_id = ?1 AND state IN ('staged', 'committed')",
                [parent_id],
                |row| row.get(0),
            )
            .map_err(from_rusqlite)?;
        Ok(count as usize)
    }

    fn record_access(&self, version_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE dataset_versions
                 SET access_count = access_count + 1, last_accessed_at = ?1
                 WHERE version_id = ?2 AND state = 'committed'",
                params![at.timestamp_millis(), version_id],
            )
            .map_err(from_rusqlite)?;
        Ok(changed == 1)
    }

    fn set_pinned(&self, version_id: &str, pinned: bool) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE dataset_versions SET pinned = ?1
                 WHERE version_id = ?2 AND state = 'committed'",
                params![pinned, version_id],
            )
            .map_err(from_rusqlite)?;
        Ok(changed == 1)
    }

    fn get_parent_edge(&self, child_id: &str) -> Result<Option<TransformationLineageEdge>> {
        self.conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM lineage_edges WHERE target_version_id = ?1",
                    EDGE_COLUMNS
                ),
                [child_id],
                row_to_edge,
            )
            .optional()
            .map_err(from_rusqlite)
    }

    fn insert_edge(&self, edge: &TransformationLineageEdge) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(from_rusqlite)?;
        insert_edge_tx(&tx, edge)?;
        tx.commit().map_err(from_rusqlite)
    }

    fn insert_model_link(&self, link: &ModelTrainingLink) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO model_training_links (model_id, dataset_version_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    link.model_id,
                    link.dataset_version_id,
                    link.created_at.timestamp_millis()
                ],
            )
            .map_err(|e| {
                from_rusqlite(e)
                    .with_op("insert_model_link")
                    .with_entity_id(link.model_id.clone())
            })?;
        Ok(())
    }

    fn get_model_link(&self, model_id: &str) -> Result<Option<ModelTrainingLink>> {
        self.conn()?
            .query_row(
                "SELECT model_id, dataset_version_id, created_at
                 FROM model_training_links WHERE model_id = ?1",
                [model_id],
                row_to_link,
            )
            .optional()
            .map_err(from_rusqlite)
    }

    fn model_links_for_version(&self, version_id: &str) -> Result<Vec<ModelTrainingLink>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT model_id, dataset_version_id, created_at
                 FROM model_training_links WHERE dataset_version_id = ?1
                 ORDER BY created_at, model_id",
            )
            .map_err(from_rusqlite)?;
        let links = stmt
            .query_map([version_id], row_to_link)
            .map_err(from_rusqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(from_rusqlite)?;
        Ok(links)
    }

    fn linked_version_ids(&self) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT dataset_version_id FROM model_training_links")
            .map_err(from_rusqlite)?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(from_rusqlite)?
            .collect::<rusqlite::Result<HashSet<String>>>()
            .map_err(from_rusqlite)?;
        Ok(ids)
    }
}

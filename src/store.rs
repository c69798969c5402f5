use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::category::Category;
use crate::dedup::{HistoricalCandidate, WorkItem};
use crate::embedding::{decode_embedding_blob, embedding_text_hash, encode_embedding_blob};
use crate::model::{
    BatchState, BatchStatus, ClusterType, FeedbackRecord, GrievanceStatus, LocalStatus,
    MatchTarget, SubmissionType,
};
use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "0.1.0";
/// The historical pool holds the most recent processed grievances.
pub const HISTORICAL_POOL_LIMIT: usize = 1000;

pub fn open_database(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processing_batches (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          user_id INTEGER,
          state TEXT NOT NULL DEFAULT 'pending',
          total_pdfs INTEGER NOT NULL DEFAULT 0,
          processed_pdfs INTEGER NOT NULL DEFAULT 0,
          total_grievances INTEGER NOT NULL DEFAULT 0,
          unique_count INTEGER NOT NULL DEFAULT 0,
          duplicate_count INTEGER NOT NULL DEFAULT 0,
          near_duplicate_count INTEGER NOT NULL DEFAULT 0,
          error_message TEXT,
          created_at TEXT NOT NULL,
          started_at TEXT,
          completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS grievances (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          original_text TEXT NOT NULL,
          processed_text TEXT NOT NULL,
          submission_type TEXT NOT NULL DEFAULT 'pdf',
          pdf_id INTEGER,
          source_filename TEXT,
          page_number INTEGER,
          batch_id INTEGER,
          status TEXT NOT NULL DEFAULT 'UNIQUE',
          similarity_score REAL NOT NULL DEFAULT 0,
          matched_grievance_id INTEGER,
          local_duplicate_of INTEGER,
          cosine_score REAL NOT NULL DEFAULT 0,
          jaccard_score REAL NOT NULL DEFAULT 0,
          ngram_score REAL NOT NULL DEFAULT 0,
          contextual_score REAL NOT NULL DEFAULT 0,
          category TEXT NOT NULL DEFAULT 'OTHER',
          category_confidence REAL NOT NULL DEFAULT 0,
          area TEXT NOT NULL DEFAULT '',
          location_details TEXT,
          processed INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          FOREIGN KEY(batch_id) REFERENCES processing_batches(id)
        );

        CREATE TABLE IF NOT EXISTS embeddings (
          grievance_id INTEGER PRIMARY KEY,
          model_name TEXT NOT NULL,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL,
          text_hash TEXT NOT NULL,
          created_at TEXT NOT NULL,
          FOREIGN KEY(grievance_id) REFERENCES grievances(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS duplicate_clusters (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          batch_id INTEGER,
          cluster_type TEXT NOT NULL,
          primary_grievance_id INTEGER NOT NULL,
          member_count INTEGER NOT NULL DEFAULT 0,
          avg_similarity_score REAL NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          FOREIGN KEY(batch_id) REFERENCES processing_batches(id),
          FOREIGN KEY(primary_grievance_id) REFERENCES grievances(id)
        );

        CREATE TABLE IF NOT EXISTS cluster_members (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          cluster_id INTEGER NOT NULL,
          grievance_id INTEGER NOT NULL,
          similarity_to_primary REAL NOT NULL DEFAULT 0,
          FOREIGN KEY(cluster_id) REFERENCES duplicate_clusters(id) ON DELETE CASCADE,
          FOREIGN KEY(grievance_id) REFERENCES grievances(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS adaptive_thresholds (
          kind TEXT PRIMARY KEY,
          current_value REAL NOT NULL,
          min_value REAL NOT NULL,
          max_value REAL NOT NULL,
          adjustment_count INTEGER NOT NULL DEFAULT 0,
          last_adjusted_at TEXT
        );

        CREATE TABLE IF NOT EXISTS feedback_log (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          grievance_id INTEGER NOT NULL,
          matched_grievance_id INTEGER,
          original_status TEXT NOT NULL,
          corrected_status TEXT NOT NULL,
          original_score REAL,
          applied_to_threshold INTEGER NOT NULL DEFAULT 0,
          notes TEXT,
          created_at TEXT NOT NULL,
          FOREIGN KEY(grievance_id) REFERENCES grievances(id)
        );

        CREATE INDEX IF NOT EXISTS idx_grievances_batch ON grievances(batch_id);
        CREATE INDEX IF NOT EXISTS idx_grievances_category ON grievances(category);
        CREATE INDEX IF NOT EXISTS idx_grievances_status ON grievances(status);
        CREATE INDEX IF NOT EXISTS idx_clusters_batch ON duplicate_clusters(batch_id);
        CREATE INDEX IF NOT EXISTS idx_clusters_primary ON duplicate_clusters(primary_grievance_id);
        CREATE INDEX IF NOT EXISTS idx_cluster_members_cluster ON cluster_members(cluster_id);
        CREATE INDEX IF NOT EXISTS idx_cluster_members_grievance ON cluster_members(grievance_id);
        ",
    )?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

pub fn create_batch(connection: &Connection, user_id: i64, total_pdfs: usize) -> Result<i64> {
    connection.execute(
        "
        INSERT INTO processing_batches(user_id, state, total_pdfs, created_at)
        VALUES(?1, ?2, ?3, ?4)
        ",
        params![
            user_id,
            BatchState::Pending.as_str(),
            total_pdfs as i64,
            now_utc_string()
        ],
    )?;
    Ok(connection.last_insert_rowid())
}

pub fn mark_batch_processing(connection: &Connection, batch_id: i64) -> Result<()> {
    connection.execute(
        "UPDATE processing_batches SET state = ?2, started_at = ?3 WHERE id = ?1",
        params![batch_id, BatchState::Processing.as_str(), now_utc_string()],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchCounters {
    pub processed_pdfs: usize,
    pub total_grievances: usize,
    pub unique_count: usize,
    pub duplicate_count: usize,
    pub near_duplicate_count: usize,
}

pub fn mark_batch_completed(
    connection: &Connection,
    batch_id: i64,
    counters: &BatchCounters,
) -> Result<()> {
    connection.execute(
        "
        UPDATE processing_batches
        SET state = ?2,
            processed_pdfs = ?3,
            total_grievances = ?4,
            unique_count = ?5,
            duplicate_count = ?6,
            near_duplicate_count = ?7,
            completed_at = ?8
        WHERE id = ?1
        ",
        params![
            batch_id,
            BatchState::Completed.as_str(),
            counters.processed_pdfs as i64,
            counters.total_grievances as i64,
            counters.unique_count as i64,
            counters.duplicate_count as i64,
            counters.near_duplicate_count as i64,
            now_utc_string()
        ],
    )?;
    Ok(())
}

pub fn mark_batch_failed(connection: &Connection, batch_id: i64, error_message: &str) -> Result<()> {
    connection.execute(
        "
        UPDATE processing_batches
        SET state = ?2, error_message = ?3, completed_at = ?4
        WHERE id = ?1
        ",
        params![
            batch_id,
            BatchState::Failed.as_str(),
            error_message,
            now_utc_string()
        ],
    )?;
    Ok(())
}

/// One classified grievance after the batch insert, with every match
/// reference resolved to a real row id.
#[derive(Debug, Clone, Copy)]
pub struct PersistedGrievance {
    pub id: i64,
    pub status: GrievanceStatus,
    pub matched_grievance_id: Option<i64>,
    pub similarity_score: f64,
}

/// Insert the classified batch in input order inside one transaction,
/// then resolve every `Pending` match target against the assigned row
/// ids. Resolution runs after all rows exist because a density-cluster
/// primary may sit later in batch order than its members; the synthetic
/// index never reaches the database. A failed insert aborts the batch.
pub fn insert_batch_grievances(
    connection: &mut Connection,
    batch_id: i64,
    items: &[WorkItem],
    model_name: &str,
) -> Result<Vec<PersistedGrievance>> {
    let tx = connection.transaction()?;
    let mut persisted = Vec::with_capacity(items.len());
    let mut assigned_ids: Vec<i64> = Vec::with_capacity(items.len());

    {
        let mut grievance_statement = tx.prepare(
            "
            INSERT INTO grievances(
              original_text, processed_text, submission_type, pdf_id, source_filename,
              page_number, batch_id, status, similarity_score,
              cosine_score, jaccard_score, ngram_score, contextual_score,
              category, category_confidence, area, location_details, processed, created_at
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 1, ?18)
            ",
        )?;
        let mut embedding_statement = tx.prepare(
            "
            INSERT INTO embeddings(grievance_id, model_name, embedding, embedding_dim, text_hash, created_at)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )?;

        for (index, item) in items.iter().enumerate() {
            grievance_statement
                .execute(params![
                    item.original_text,
                    item.processed_text,
                    SubmissionType::Pdf.as_str(),
                    item.pdf_id,
                    item.source_filename,
                    item.page_number,
                    batch_id,
                    item.status.as_str(),
                    item.similarity_score,
                    item.breakdown.cosine,
                    item.breakdown.jaccard,
                    item.breakdown.ngram,
                    item.breakdown.contextual,
                    item.category.as_str(),
                    item.category_confidence,
                    item.area,
                    item.location_details,
                    now_utc_string()
                ])
                .with_context(|| format!("failed to insert grievance at batch index {index}"))?;

            let grievance_id = tx.last_insert_rowid();
            assigned_ids.push(grievance_id);

            embedding_statement
                .execute(params![
                    grievance_id,
                    model_name,
                    encode_embedding_blob(&item.embedding),
                    item.embedding.len() as i64,
                    embedding_text_hash(&item.original_text),
                    now_utc_string()
                ])
                .with_context(|| format!("failed to insert embedding for grievance {grievance_id}"))?;
        }
    }

    {
        let mut update_statement = tx.prepare(
            "
            UPDATE grievances
            SET matched_grievance_id = ?2, local_duplicate_of = ?3
            WHERE id = ?1
            ",
        )?;

        for (index, item) in items.iter().enumerate() {
            let matched_id = match item.matched {
                Some(MatchTarget::Persisted(id)) => Some(id),
                Some(MatchTarget::Pending(sibling)) => assigned_ids.get(sibling).copied(),
                None => None,
            };
            let local_duplicate_of = if item.local_status == LocalStatus::LocalDuplicate {
                item.local_best
                    .and_then(|found| assigned_ids.get(found.sibling_index).copied())
            } else {
                None
            };

            if matched_id.is_some() || local_duplicate_of.is_some() {
                update_statement
                    .execute(params![assigned_ids[index], matched_id, local_duplicate_of])
                    .with_context(|| {
                        format!("failed to resolve match references at batch index {index}")
                    })?;
            }

            persisted.push(PersistedGrievance {
                id: assigned_ids[index],
                status: item.status,
                matched_grievance_id: matched_id,
                similarity_score: item.similarity_score,
            });
        }
    }

    tx.commit()?;
    Ok(persisted)
}

/// Most recent processed grievances with their embeddings, newest
/// first. Rows whose stored embedding does not decode are skipped.
pub fn load_historical_pool(connection: &Connection, limit: usize) -> Result<Vec<HistoricalCandidate>> {
    let mut statement = connection.prepare(
        "
        SELECT g.id, g.processed_text, g.category, g.area, e.embedding, e.embedding_dim
        FROM grievances g
        JOIN embeddings e ON e.grievance_id = g.id
        WHERE g.processed = 1
        ORDER BY g.id DESC
        LIMIT ?1
        ",
    )?;

    let mut rows = statement.query([limit as i64])?;
    let mut pool = Vec::new();
    while let Some(row) = rows.next()? {
        let grievance_id: i64 = row.get(0)?;
        let processed_text: String = row.get(1)?;
        let category_text: String = row.get(2)?;
        let area: String = row.get(3)?;
        let blob: Vec<u8> = row.get(4)?;
        let dim: i64 = row.get(5)?;

        let Some(embedding) = decode_embedding_blob(&blob, dim as usize) else {
            warn!(grievance_id, "skipping historical embedding with bad blob");
            continue;
        };

        pool.push(HistoricalCandidate {
            grievance_id,
            tokens: processed_text
                .split_whitespace()
                .map(ToOwned::to_owned)
                .collect(),
            category: Category::parse(&category_text),
            area,
            embedding,
        });
    }

    Ok(pool)
}

/// Cluster materialization: group the batch by resolved match target
/// and status, skip invalid keys, and keep going when a single cluster
/// fails to insert.
pub fn materialize_clusters(
    connection: &mut Connection,
    batch_id: i64,
    results: &[PersistedGrievance],
) -> usize {
    let mut groups: BTreeMap<(i64, &'static str), Vec<&PersistedGrievance>> = BTreeMap::new();
    for result in results {
        let Some(cluster_type) = ClusterType::for_status(result.status) else {
            continue;
        };
        let Some(primary_id) = result.matched_grievance_id else {
            continue;
        };
        if primary_id == result.id {
            continue;
        }
        groups
            .entry((primary_id, cluster_type.as_str()))
            .or_default()
            .push(result);
    }

    let mut created = 0_usize;
    for ((primary_id, cluster_type), members) in groups {
        if members.is_empty() {
            continue;
        }

        match insert_cluster(connection, batch_id, primary_id, cluster_type, &members) {
            Ok(()) => created += 1,
            Err(error) => {
                warn!(
                    primary_id,
                    cluster_type,
                    error = %error,
                    "skipping cluster that failed to persist"
                );
            }
        }
    }

    if created > 0 {
        info!(batch_id, clusters = created, "materialized duplicate clusters");
    }

    created
}

fn insert_cluster(
    connection: &mut Connection,
    batch_id: i64,
    primary_id: i64,
    cluster_type: &str,
    members: &[&PersistedGrievance],
) -> Result<()> {
    let avg_score =
        members.iter().map(|member| member.similarity_score).sum::<f64>() / members.len() as f64;

    let tx = connection.transaction()?;
    tx.execute(
        "
        INSERT INTO duplicate_clusters(batch_id, cluster_type, primary_grievance_id, member_count, avg_similarity_score, created_at)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            batch_id,
            cluster_type,
            primary_id,
            members.len() as i64,
            avg_score,
            now_utc_string()
        ],
    )?;
    let cluster_id = tx.last_insert_rowid();

    {
        let mut member_statement = tx.prepare(
            "
            INSERT INTO cluster_members(cluster_id, grievance_id, similarity_to_primary)
            VALUES(?1, ?2, ?3)
            ",
        )?;
        for member in members {
            member_statement.execute(params![cluster_id, member.id, member.similarity_score])?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Counter partition recomputed from the persisted rows so the batch
/// record cannot drift from its grievances.
pub fn count_batch_partition(connection: &Connection, batch_id: i64) -> Result<BatchCounters> {
    let mut statement = connection.prepare(
        "SELECT status, COUNT(*) FROM grievances WHERE batch_id = ?1 GROUP BY status",
    )?;

    let mut counters = BatchCounters::default();
    let mut rows = statement.query([batch_id])?;
    while let Some(row) = rows.next()? {
        let status_text: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        counters.total_grievances += count as usize;
        match GrievanceStatus::parse(&status_text) {
            Some(GrievanceStatus::Unique) => counters.unique_count += count as usize,
            Some(GrievanceStatus::Duplicate) => counters.duplicate_count += count as usize,
            Some(GrievanceStatus::NearDuplicate) => counters.near_duplicate_count += count as usize,
            None => warn!(status = %status_text, "unknown grievance status in store"),
        }
    }

    Ok(counters)
}

pub fn load_batch_status(
    connection: &Connection,
    batch_id: Option<i64>,
) -> Result<Option<BatchStatus>> {
    let query = "
        SELECT id, state, total_pdfs, processed_pdfs, total_grievances,
               unique_count, duplicate_count, near_duplicate_count,
               started_at, completed_at, error_message
        FROM processing_batches
    ";

    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(BatchStatus {
            batch_id: row.get(0)?,
            status: row.get(1)?,
            total_pdfs: row.get(2)?,
            processed_pdfs: row.get(3)?,
            total_grievances: row.get(4)?,
            unique_count: row.get(5)?,
            duplicate_count: row.get(6)?,
            near_duplicate_count: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
            error_message: row.get(10)?,
        })
    };

    let status = match batch_id {
        Some(id) => connection
            .query_row(&format!("{query} WHERE id = ?1"), [id], map_row)
            .optional()?,
        None => connection
            .query_row(&format!("{query} ORDER BY id DESC LIMIT 1"), [], map_row)
            .optional()?,
    };

    Ok(status)
}

#[derive(Debug, Clone)]
pub struct GrievanceSummary {
    pub id: i64,
    pub status: Option<GrievanceStatus>,
    pub similarity_score: f64,
    pub matched_grievance_id: Option<i64>,
}

pub fn load_grievance(connection: &Connection, grievance_id: i64) -> Result<Option<GrievanceSummary>> {
    let summary = connection
        .query_row(
            "SELECT id, status, similarity_score, matched_grievance_id FROM grievances WHERE id = ?1",
            [grievance_id],
            |row| {
                let status_text: String = row.get(1)?;
                Ok(GrievanceSummary {
                    id: row.get(0)?,
                    status: GrievanceStatus::parse(&status_text),
                    similarity_score: row.get(2)?,
                    matched_grievance_id: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(summary)
}

/// Status is the one field an admin correction may rewrite.
pub fn update_grievance_status(
    connection: &Connection,
    grievance_id: i64,
    status: GrievanceStatus,
) -> Result<bool> {
    let changed = connection.execute(
        "UPDATE grievances SET status = ?2 WHERE id = ?1",
        params![grievance_id, status.as_str()],
    )?;
    Ok(changed > 0)
}

pub fn record_feedback(
    connection: &Connection,
    record: &FeedbackRecord,
    applied_to_threshold: bool,
) -> Result<()> {
    connection.execute(
        "
        INSERT INTO feedback_log(
          grievance_id, matched_grievance_id, original_status, corrected_status,
          original_score, applied_to_threshold, notes, created_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
        params![
            record.grievance_id,
            record.matched_grievance_id,
            record.original_status.as_str(),
            record.corrected_status.as_str(),
            record.original_score,
            applied_to_threshold,
            record.notes,
            now_utc_string()
        ],
    )?;
    Ok(())
}

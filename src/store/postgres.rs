// src/store/postgres.rs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Row, Transaction};
use uuid::Uuid;

use crate::error::ResolutionError;
use crate::models::{
    BlockingEntry, CanonicalEntity, ClusterMembership, ClusterResolution, EmployerFields,
    EmployerRecord, EntityTarget, PendingCanonicalCluster, RecordSource, ReviewCursor,
    ReviewDecision,
};
use crate::store::ResolutionStore;
use crate::utils::db_connect::PgPool;

// Upper bound on rows per multi-row INSERT, keeps the parameter count well
// under the protocol limit.
const BATCH_SIZE_DB_OPS: usize = 500;

const RECORD_COLUMNS: &str = "r.id::bigint AS id, r.name, r.trade_name_dba, r.city, r.state, \
     r.country, r.phone, r.source, r.first_seen, r.last_seen, r.unique_employer_id";

const MEMBERSHIP_COLUMNS: &str = "canon_id, employer_record_id, cluster_score, is_valid_cluster, \
     review_date, processed_to_canonical_employer";

const ENTITY_COLUMNS: &str =
    "id, name, trade_name_dba, city, state, country, phone, first_seen, last_seen, sources";

const SCHEMA_STATEMENTS: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS public.dedupe_blocking_map (
        block_key TEXT NOT NULL,
        employer_record_id BIGINT NOT NULL,
        PRIMARY KEY (block_key, employer_record_id)
    )",
    "CREATE TABLE IF NOT EXISTS public.dedupe_entity_map (
        employer_record_id BIGINT PRIMARY KEY,
        canon_id BIGINT NOT NULL,
        cluster_score DOUBLE PRECISION NOT NULL,
        is_valid_cluster BOOLEAN,
        review_date TIMESTAMP,
        processed_to_canonical_employer BOOLEAN NOT NULL DEFAULT FALSE
    )",
    "CREATE INDEX IF NOT EXISTS idx_dedupe_entity_map_canon_id
        ON public.dedupe_entity_map (canon_id)",
    "CREATE INDEX IF NOT EXISTS idx_dedupe_entity_map_review
        ON public.dedupe_entity_map (cluster_score, employer_record_id)
        WHERE review_date IS NULL",
    "CREATE TABLE IF NOT EXISTS public.unique_employer (
        id UUID PRIMARY KEY,
        name TEXT,
        trade_name_dba TEXT,
        city TEXT,
        state TEXT,
        country TEXT,
        phone TEXT,
        first_seen TIMESTAMP,
        last_seen TIMESTAMP,
        sources JSONB NOT NULL DEFAULT '[]'::jsonb
    )",
    "ALTER TABLE public.employer_record
        ADD COLUMN IF NOT EXISTS unique_employer_id UUID REFERENCES public.unique_employer (id)",
];

/// `ResolutionStore` over the `employer_record`, `dedupe_blocking_map`,
/// `dedupe_entity_map` and `unique_employer` tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the resolution tables if they are missing. The
    /// `employer_record` table belongs to ingestion and must already exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut client = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for schema setup")?;
        let transaction = client
            .transaction()
            .await
            .context("Failed to start schema transaction")?;
        for statement in SCHEMA_STATEMENTS {
            transaction
                .batch_execute(statement)
                .await
                .with_context(|| format!("Schema statement failed: {}", statement))?;
        }
        transaction
            .commit()
            .await
            .context("Failed to commit schema setup")?;
        info!("Resolution tables are in place.");
        Ok(())
    }
}

fn params_slice(params: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_record(row: &Row) -> Result<EmployerRecord> {
    let id: i64 = row.get("id");
    let source_raw: String = row.get("source");
    let source = RecordSource::from_db_str(&source_raw)
        .ok_or_else(|| anyhow!("employer_record {} has unknown source '{}'", id, source_raw))?;
    Ok(EmployerRecord {
        id,
        fields: EmployerFields {
            name: row.get("name"),
            trade_name: row.get("trade_name_dba"),
            city: row.get("city"),
            state: row.get("state"),
            country: row.get("country"),
            phone: row.get("phone"),
        },
        source,
        first_seen: row.get("first_seen"),
        last_seen: row.get("last_seen"),
        canonical_entity_id: row.get("unique_employer_id"),
    })
}

fn rows_to_records(rows: &[Row]) -> Result<Vec<EmployerRecord>> {
    rows.iter().map(row_to_record).collect()
}

fn row_to_membership(row: &Row) -> ClusterMembership {
    ClusterMembership {
        canon_id: row.get("canon_id"),
        record_id: row.get("employer_record_id"),
        cluster_score: row.get("cluster_score"),
        is_valid_cluster: row.get("is_valid_cluster"),
        review_date: row.get("review_date"),
        processed: row.get("processed_to_canonical_employer"),
    }
}

fn row_to_entity(row: &Row) -> Result<CanonicalEntity> {
    let id: Uuid = row.get("id");
    let sources_json: serde_json::Value = row.get("sources");
    let sources: Vec<RecordSource> = serde_json::from_value(sources_json)
        .with_context(|| format!("unique_employer {} has malformed sources", id))?;
    Ok(CanonicalEntity {
        id,
        fields: EmployerFields {
            name: row.get("name"),
            trade_name: row.get("trade_name_dba"),
            city: row.get("city"),
            state: row.get("state"),
            country: row.get("country"),
            phone: row.get("phone"),
        },
        first_seen: row.get("first_seen"),
        last_seen: row.get("last_seen"),
        sources,
    })
}

async fn lock_entity(client: &Transaction<'_>, entity_id: Uuid) -> Result<CanonicalEntity> {
    let query = format!(
        "SELECT {} FROM public.unique_employer WHERE id = $1 FOR UPDATE",
        ENTITY_COLUMNS
    );
    let row = client
        .query_opt(query.as_str(), &[&entity_id])
        .await
        .context("Failed to lock unique_employer row")?
        .ok_or_else(|| anyhow!("canonical employer {} not found", entity_id))?;
    row_to_entity(&row)
}

async fn write_resolution(
    client: &Transaction<'_>,
    resolution: &ClusterResolution,
) -> Result<Uuid> {
    let resolved_id = match &resolution.target {
        EntityTarget::Create(entity) => {
            let sources = serde_json::to_value(&entity.sources)
                .context("Failed to serialize canonical sources")?;
            client
                .execute(
                    "INSERT INTO public.unique_employer
                        (id, name, trade_name_dba, city, state, country, phone, first_seen, last_seen, sources)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                    &[
                        &entity.id,
                        &entity.fields.name,
                        &entity.fields.trade_name,
                        &entity.fields.city,
                        &entity.fields.state,
                        &entity.fields.country,
                        &entity.fields.phone,
                        &entity.first_seen,
                        &entity.last_seen,
                        &sources,
                    ],
                )
                .await
                .context("Failed to insert unique_employer")?;
            entity.id
        }
        EntityTarget::Extend { entity_id, window } => {
            let mut entity = lock_entity(client, *entity_id).await?;
            entity.absorb(window);
            let sources = serde_json::to_value(&entity.sources)
                .context("Failed to serialize canonical sources")?;
            client
                .execute(
                    "UPDATE public.unique_employer
                     SET first_seen = $2, last_seen = $3, sources = $4
                     WHERE id = $1",
                    &[&entity.id, &entity.first_seen, &entity.last_seen, &sources],
                )
                .await
                .context("Failed to widen unique_employer")?;
            entity.id
        }
    };

    for chunk in resolution.record_ids.chunks(BATCH_SIZE_DB_OPS) {
        let ids: Vec<i64> = chunk.to_vec();
        let linked = client
            .execute(
                "UPDATE public.employer_record SET unique_employer_id = $1
                 WHERE id = ANY($2::bigint[])",
                &[&resolved_id, &ids],
            )
            .await
            .context("Failed to link employer_record rows")?;
        if linked as usize != ids.len() {
            let found: BTreeSet<i64> = client
                .query(
                    "SELECT id::bigint AS id FROM public.employer_record WHERE id = ANY($1::bigint[])",
                    &[&ids],
                )
                .await
                .context("Failed to look up employer_record ids")?
                .iter()
                .map(|row| row.get::<_, i64>("id"))
                .collect();
            let missing = ids.into_iter().filter(|id| !found.contains(id)).collect();
            return Err(ResolutionError::MissingRecords(missing).into());
        }

        if resolution.mark_processed {
            client
                .execute(
                    "UPDATE public.dedupe_entity_map SET processed_to_canonical_employer = TRUE
                     WHERE employer_record_id = ANY($1::bigint[])",
                    &[&ids],
                )
                .await
                .context("Failed to mark dedupe_entity_map rows processed")?;
        }
    }
    Ok(resolved_id)
}

#[async_trait]
impl ResolutionStore for PgStore {
    async fn fetch_records_after(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EmployerRecord>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = format!(
            "SELECT {} FROM public.employer_record r
             WHERE r.id > $1::bigint ORDER BY r.id LIMIT $2",
            RECORD_COLUMNS
        );
        let rows = conn
            .query(
                query.as_str(),
                &[&after_id.unwrap_or(i64::MIN), &limit_param(limit)],
            )
            .await
            .context("Failed to page employer_record")?;
        rows_to_records(&rows)
    }

    async fn fetch_records_by_ids(&self, ids: &[i64]) -> Result<Vec<EmployerRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = format!(
            "SELECT {} FROM public.employer_record r
             WHERE r.id = ANY($1::bigint[]) ORDER BY r.id",
            RECORD_COLUMNS
        );
        let ids = ids.to_vec();
        let rows = conn
            .query(query.as_str(), &[&ids])
            .await
            .context("Failed to fetch employer_record rows by id")?;
        rows_to_records(&rows)
    }

    async fn clear_blocking_entries(&self) -> Result<u64> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let cleared = conn
            .execute("DELETE FROM public.dedupe_blocking_map", &[])
            .await
            .context("Failed to clear dedupe_blocking_map")?;
        info!("Cleared {} blocking entries.", cleared);
        Ok(cleared)
    }

    async fn insert_blocking_entries(&self, entries: &[BlockingEntry]) -> Result<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut client = self.pool.get().await.context("Failed to get DB connection")?;
        let transaction = client
            .transaction()
            .await
            .context("Failed to start blocking insert transaction")?;
        let mut inserted = 0u64;
        for chunk in entries.chunks(BATCH_SIZE_DB_OPS) {
            let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(chunk.len() * 2);
            let mut values = Vec::with_capacity(chunk.len());
            for (n, entry) in chunk.iter().enumerate() {
                let i = n * 2 + 1;
                values.push(format!("(${}, ${})", i, i + 1));
                params.push(Box::new(entry.block_key.clone()));
                params.push(Box::new(entry.record_id));
            }
            let query = format!(
                "INSERT INTO public.dedupe_blocking_map (block_key, employer_record_id) VALUES {}
                 ON CONFLICT DO NOTHING",
                values.join(", ")
            );
            inserted += transaction
                .execute(query.as_str(), &params_slice(&params)[..])
                .await
                .context("Failed to batch insert dedupe_blocking_map")?;
        }
        transaction
            .commit()
            .await
            .map_err(|e| ResolutionError::CommitFailed(e.to_string()))?;
        debug!("Inserted {} blocking entries.", inserted);
        Ok(inserted)
    }

    async fn fetch_blocking_entries_after(
        &self,
        after: Option<&BlockingEntry>,
        limit: usize,
    ) -> Result<Vec<BlockingEntry>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let limit = limit_param(limit);
        let rows = match after {
            Some(cursor) => {
                conn.query(
                    "SELECT block_key, employer_record_id FROM public.dedupe_blocking_map
                     WHERE (block_key, employer_record_id) > ($1, $2)
                     ORDER BY block_key, employer_record_id LIMIT $3",
                    &[&cursor.block_key, &cursor.record_id, &limit],
                )
                .await
            }
            None => {
                conn.query(
                    "SELECT block_key, employer_record_id FROM public.dedupe_blocking_map
                     ORDER BY block_key, employer_record_id LIMIT $1",
                    &[&limit],
                )
                .await
            }
        }
        .context("Failed to page dedupe_blocking_map")?;
        Ok(rows
            .iter()
            .map(|row| BlockingEntry::new(row.get::<_, String>("block_key"), row.get("employer_record_id")))
            .collect())
    }

    async fn count_blocking_entries(&self) -> Result<u64> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM public.dedupe_blocking_map", &[])
            .await
            .context("Failed to count dedupe_blocking_map")?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn clear_memberships(&self) -> Result<u64> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let cleared = conn
            .execute("DELETE FROM public.dedupe_entity_map", &[])
            .await
            .context("Failed to clear dedupe_entity_map")?;
        info!("Cleared {} cluster memberships.", cleared);
        Ok(cleared)
    }

    async fn fetch_memberships_for_records(
        &self,
        record_ids: &[i64],
    ) -> Result<Vec<ClusterMembership>> {
        if record_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = format!(
            "SELECT {} FROM public.dedupe_entity_map
             WHERE employer_record_id = ANY($1) ORDER BY employer_record_id",
            MEMBERSHIP_COLUMNS
        );
        let ids = record_ids.to_vec();
        let rows = conn
            .query(query.as_str(), &[&ids])
            .await
            .context("Failed to fetch dedupe_entity_map rows")?;
        Ok(rows.iter().map(row_to_membership).collect())
    }

    async fn insert_memberships_if_absent(&self, rows: &[ClusterMembership]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut client = self.pool.get().await.context("Failed to get DB connection")?;
        let transaction = client
            .transaction()
            .await
            .context("Failed to start membership insert transaction")?;
        let mut inserted = 0u64;
        for chunk in rows.chunks(BATCH_SIZE_DB_OPS) {
            let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(chunk.len() * 3);
            let mut values = Vec::with_capacity(chunk.len());
            for (n, row) in chunk.iter().enumerate() {
                let i = n * 3 + 1;
                values.push(format!("(${}, ${}, ${}, NULL, NULL, FALSE)", i, i + 1, i + 2));
                params.push(Box::new(row.record_id));
                params.push(Box::new(row.canon_id));
                params.push(Box::new(row.cluster_score));
            }
            let query = format!(
                "INSERT INTO public.dedupe_entity_map
                    (employer_record_id, canon_id, cluster_score, is_valid_cluster, review_date,
                     processed_to_canonical_employer)
                 VALUES {}
                 ON CONFLICT (employer_record_id) DO NOTHING",
                values.join(", ")
            );
            inserted += transaction
                .execute(query.as_str(), &params_slice(&params)[..])
                .await
                .context("Failed to batch insert dedupe_entity_map")?;
        }
        transaction
            .commit()
            .await
            .map_err(|e| ResolutionError::CommitFailed(e.to_string()))?;
        Ok(inserted)
    }

    async fn count_memberships(&self) -> Result<u64> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM public.dedupe_entity_map", &[])
            .await
            .context("Failed to count dedupe_entity_map")?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn fetch_pending_reviews(
        &self,
        review_threshold: f64,
        after: Option<ReviewCursor>,
        limit: usize,
    ) -> Result<Vec<ClusterMembership>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let limit = limit_param(limit);
        let rows = match after {
            Some(cursor) => {
                let query = format!(
                    "SELECT {} FROM public.dedupe_entity_map
                     WHERE cluster_score <= $1 AND review_date IS NULL AND is_valid_cluster IS NULL
                       AND (cluster_score, employer_record_id) > ($2, $3)
                     ORDER BY cluster_score, employer_record_id LIMIT $4",
                    MEMBERSHIP_COLUMNS
                );
                conn.query(
                    query.as_str(),
                    &[&review_threshold, &cursor.cluster_score, &cursor.record_id, &limit],
                )
                .await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM public.dedupe_entity_map
                     WHERE cluster_score <= $1 AND review_date IS NULL AND is_valid_cluster IS NULL
                     ORDER BY cluster_score, employer_record_id LIMIT $2",
                    MEMBERSHIP_COLUMNS
                );
                conn.query(query.as_str(), &[&review_threshold, &limit]).await
            }
        }
        .context("Failed to page pending reviews")?;
        Ok(rows.iter().map(row_to_membership).collect())
    }

    async fn count_pending_reviews(&self, review_threshold: f64) -> Result<u64> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM public.dedupe_entity_map
                 WHERE cluster_score <= $1 AND review_date IS NULL AND is_valid_cluster IS NULL",
                &[&review_threshold],
            )
            .await
            .context("Failed to count pending reviews")?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn fetch_cluster_members(&self, canon_id: i64) -> Result<Vec<EmployerRecord>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = format!(
            "SELECT {} FROM public.employer_record r
             JOIN public.dedupe_entity_map m ON m.employer_record_id = r.id
             WHERE m.canon_id = $1 ORDER BY r.id",
            RECORD_COLUMNS
        );
        let rows = conn
            .query(query.as_str(), &[&canon_id])
            .await
            .context("Failed to fetch cluster members")?;
        rows_to_records(&rows)
    }

    async fn apply_review_decisions(&self, decisions: &[ReviewDecision]) -> Result<u64> {
        if decisions.is_empty() {
            return Ok(0);
        }
        let mut client = self.pool.get().await.context("Failed to get DB connection")?;
        let transaction = client
            .transaction()
            .await
            .context("Failed to start review transaction")?;
        let mut updated = 0u64;
        for decision in decisions {
            updated += transaction
                .execute(
                    "UPDATE public.dedupe_entity_map SET is_valid_cluster = $1, review_date = $2
                     WHERE employer_record_id = $3",
                    &[
                        &decision.is_valid_cluster,
                        &decision.review_date,
                        &decision.record_id,
                    ],
                )
                .await
                .context("Failed to record review decision")?;
        }
        transaction
            .commit()
            .await
            .map_err(|e| ResolutionError::CommitFailed(e.to_string()))?;
        Ok(updated)
    }

    async fn fetch_pending_canonical_clusters(
        &self,
        review_threshold: f64,
        limit: usize,
    ) -> Result<Vec<PendingCanonicalCluster>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = format!(
            "WITH eligible AS (
                SELECT {cols} FROM public.dedupe_entity_map
                WHERE is_valid_cluster IS TRUE
                   OR (is_valid_cluster IS NULL AND review_date IS NULL AND cluster_score > $1)
             ), pending AS (
                SELECT canon_id FROM eligible
                GROUP BY canon_id
                HAVING NOT bool_and(processed_to_canonical_employer)
                ORDER BY canon_id
                LIMIT $2
             )
             SELECT e.* FROM eligible e JOIN pending p ON p.canon_id = e.canon_id
             ORDER BY e.canon_id, e.employer_record_id",
            cols = MEMBERSHIP_COLUMNS
        );
        let rows = conn
            .query(query.as_str(), &[&review_threshold, &limit_param(limit)])
            .await
            .context("Failed to fetch pending canonical clusters")?;

        let mut grouped: BTreeMap<i64, Vec<ClusterMembership>> = BTreeMap::new();
        for row in &rows {
            let membership = row_to_membership(row);
            grouped.entry(membership.canon_id).or_default().push(membership);
        }
        Ok(grouped
            .into_iter()
            .map(|(canon_id, rows)| PendingCanonicalCluster { canon_id, rows })
            .collect())
    }

    async fn find_canonical_entities(
        &self,
        fields: &EmployerFields,
    ) -> Result<Vec<CanonicalEntity>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = format!(
            "SELECT {} FROM public.unique_employer
             WHERE name IS NOT DISTINCT FROM $1
               AND trade_name_dba IS NOT DISTINCT FROM $2
               AND city IS NOT DISTINCT FROM $3
               AND state IS NOT DISTINCT FROM $4
               AND country IS NOT DISTINCT FROM $5
               AND phone IS NOT DISTINCT FROM $6
             ORDER BY id",
            ENTITY_COLUMNS
        );
        let rows = conn
            .query(
                query.as_str(),
                &[
                    &fields.name,
                    &fields.trade_name,
                    &fields.city,
                    &fields.state,
                    &fields.country,
                    &fields.phone,
                ],
            )
            .await
            .context("Failed to search unique_employer")?;
        rows.iter().map(row_to_entity).collect()
    }

    async fn commit_resolutions(&self, resolutions: &[ClusterResolution]) -> Result<Vec<Uuid>> {
        if resolutions.is_empty() {
            return Ok(Vec::new());
        }
        let mut client = self.pool.get().await.context("Failed to get DB connection")?;
        let transaction = client
            .transaction()
            .await
            .context("Failed to start canonicalization transaction")?;
        let mut entity_ids = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            // An error drops the transaction, which rolls it back.
            entity_ids.push(write_resolution(&transaction, resolution).await?);
        }
        transaction
            .commit()
            .await
            .map_err(|e| ResolutionError::CommitFailed(e.to_string()))?;
        debug!("Committed {} cluster resolutions.", resolutions.len());
        Ok(entity_ids)
    }

    async fn fetch_unresolved_singletons(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EmployerRecord>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = format!(
            "SELECT {} FROM public.employer_record r
             LEFT JOIN public.dedupe_entity_map m ON m.employer_record_id = r.id
             WHERE r.unique_employer_id IS NULL
               AND (m.employer_record_id IS NULL OR m.is_valid_cluster IS FALSE)
               AND r.id > $1::bigint
             ORDER BY r.id LIMIT $2",
            RECORD_COLUMNS
        );
        let rows = conn
            .query(
                query.as_str(),
                &[&after_id.unwrap_or(i64::MIN), &limit_param(limit)],
            )
            .await
            .context("Failed to page unresolved singletons")?;
        rows_to_records(&rows)
    }

    async fn fetch_canonical_entities(&self) -> Result<Vec<CanonicalEntity>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let query = format!("SELECT {} FROM public.unique_employer ORDER BY id", ENTITY_COLUMNS);
        let rows = conn
            .query(query.as_str(), &[])
            .await
            .context("Failed to list unique_employer")?;
        rows.iter().map(row_to_entity).collect()
    }

    async fn count_canonical_entities(&self) -> Result<u64> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM public.unique_employer", &[])
            .await
            .context("Failed to count unique_employer")?;
        Ok(row.get::<_, i64>(0) as u64)
    }
}


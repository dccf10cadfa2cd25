//! Postgres-backed cache repository
//!
//! Batch reads pass one array per column through `UNNEST` and join back to the
//! cache table, so every probe of every request is answered by one query.
//! Writes rely on `ON CONFLICT ... DO UPDATE` for the ratchet; there is no
//! application-level locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::PgPool;
use std::sync::LazyLock;

use super::{merge_by_key, CacheRepository, HitBuffer};
use crate::error::{ConfigError, ConfigResult, LookupError, LookupResult};
use crate::types::{LookupKey, NormalizedRequest, Resolution};

// constant pattern, covered by test_table_ref_validation
static TABLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*(\.[a-z_][a-z0-9_]*)?$").unwrap());

/// Validated, quoted table reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    schema: Option<String>,
    table: String,
}

impl TableRef {
    pub fn parse(name: &str) -> ConfigResult<Self> {
        if !TABLE_NAME_RE.is_match(name) {
            return Err(ConfigError::InvalidTableName(name.to_string()));
        }
        Ok(match name.split_once('.') {
            Some((schema, table)) => Self {
                schema: Some(schema.to_string()),
                table: table.to_string(),
            },
            None => Self {
                schema: None,
                table: name.to_string(),
            },
        })
    }

    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!(r#""{}"."{}""#, schema, self.table),
            None => format!(r#""{}""#, self.table),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    row_idx: i32,
    lookup_type: String,
    lookup_key: String,
    company_id: String,
    confidence: f64,
    source: String,
    hit_count: i64,
    last_hit_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CacheRow> for Resolution {
    type Error = LookupError;

    fn try_from(row: CacheRow) -> Result<Self, Self::Error> {
        Ok(Resolution {
            lookup_type: row.lookup_type.parse().map_err(|value| LookupError::CorruptRow {
                field: "lookup_type",
                value,
            })?,
            lookup_key: row.lookup_key,
            company_id: row.company_id,
            confidence: row.confidence,
            source: row.source.parse().map_err(|value| LookupError::CorruptRow {
                field: "source",
                value,
            })?,
            hit_count: row.hit_count,
            last_hit_at: row.last_hit_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Column arrays for the batch probe query
#[derive(Debug, Default, PartialEq)]
struct ProbeArrays {
    row_idx: Vec<i32>,
    probe_rank: Vec<i32>,
    lookup_type: Vec<String>,
    lookup_key: Vec<String>,
}

impl ProbeArrays {
    fn build(requests: &[NormalizedRequest]) -> Self {
        let mut arrays = Self::default();
        for (idx, request) in requests.iter().enumerate() {
            for (rank, key) in request.cache_keys().into_iter().enumerate() {
                arrays.row_idx.push(idx as i32);
                arrays.probe_rank.push(rank as i32);
                arrays.lookup_type.push(key.lookup_type.as_str().to_string());
                arrays.lookup_key.push(key.key);
            }
        }
        arrays
    }
}

pub struct PgCacheRepository {
    pool: PgPool,
    table: TableRef,
    hits: HitBuffer,
}

impl PgCacheRepository {
    pub fn new(pool: PgPool, table: &str) -> ConfigResult<Self> {
        Ok(Self {
            pool,
            table: TableRef::parse(table)?,
            hits: HitBuffer::default(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema and cache table if they do not exist yet
    pub async fn ensure_schema(&self) -> LookupResult<()> {
        if let Some(schema) = &self.table.schema {
            sqlx::query(&format!(r#"CREATE SCHEMA IF NOT EXISTS "{}""#, schema))
                .execute(&self.pool)
                .await?;
        }
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                lookup_type TEXT NOT NULL,
                lookup_key  TEXT NOT NULL,
                company_id  TEXT NOT NULL,
                confidence  DOUBLE PRECISION NOT NULL CHECK (confidence >= 0 AND confidence <= 1),
                source      TEXT NOT NULL,
                hit_count   BIGINT NOT NULL DEFAULT 0,
                last_hit_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (lookup_type, lookup_key)
            )
            "#,
            self.table.qualified()
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn lookup_sql(&self) -> String {
        format!(
            r#"
            SELECT DISTINCT ON (q.row_idx)
                   q.row_idx, c.lookup_type, c.lookup_key, c.company_id, c.confidence,
                   c.source, c.hit_count, c.last_hit_at, c.created_at, c.updated_at
            FROM UNNEST($1::int4[], $2::int4[], $3::text[], $4::text[])
                 AS q(row_idx, probe_rank, lookup_type, lookup_key)
            JOIN {} c
              ON c.lookup_type = q.lookup_type AND c.lookup_key = q.lookup_key
            ORDER BY q.row_idx, q.probe_rank
            "#,
            self.table.qualified()
        )
    }

    fn upsert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO {} AS c
                (lookup_type, lookup_key, company_id, confidence, source,
                 hit_count, last_hit_at, created_at, updated_at)
            SELECT u.lookup_type, u.lookup_key, u.company_id, u.confidence, u.source,
                   u.hit_count, u.last_hit_at, NOW(), NOW()
            FROM UNNEST($1::text[], $2::text[], $3::text[], $4::float8[], $5::text[],
                        $6::int8[], $7::timestamptz[])
                 AS u(lookup_type, lookup_key, company_id, confidence, source,
                      hit_count, last_hit_at)
            ON CONFLICT (lookup_type, lookup_key) DO UPDATE SET
                company_id  = CASE WHEN EXCLUDED.confidence > c.confidence
                                   THEN EXCLUDED.company_id ELSE c.company_id END,
                source      = CASE WHEN EXCLUDED.confidence > c.confidence
                                   THEN EXCLUDED.source ELSE c.source END,
                confidence  = GREATEST(c.confidence, EXCLUDED.confidence),
                hit_count   = c.hit_count + EXCLUDED.hit_count,
                last_hit_at = GREATEST(c.last_hit_at, EXCLUDED.last_hit_at),
                updated_at  = NOW()
            "#,
            self.table.qualified()
        )
    }

    fn flush_hits_sql(&self) -> String {
        format!(
            r#"
            UPDATE {} AS c
            SET hit_count   = c.hit_count + h.hits,
                last_hit_at = GREATEST(c.last_hit_at, h.last_hit_at)
            FROM UNNEST($1::text[], $2::text[], $3::int8[], $4::timestamptz[])
                 AS h(lookup_type, lookup_key, hits, last_hit_at)
            WHERE c.lookup_type = h.lookup_type AND c.lookup_key = h.lookup_key
            "#,
            self.table.qualified()
        )
    }
}

#[async_trait]
impl CacheRepository for PgCacheRepository {
    async fn batch_lookup(
        &self,
        requests: &[NormalizedRequest],
    ) -> LookupResult<Vec<Option<Resolution>>> {
        let mut results: Vec<Option<Resolution>> = vec![None; requests.len()];
        let probes = ProbeArrays::build(requests);
        if probes.row_idx.is_empty() {
            return Ok(results);
        }

        let rows = sqlx::query_as::<_, CacheRow>(&self.lookup_sql())
            .bind(&probes.row_idx)
            .bind(&probes.probe_rank)
            .bind(&probes.lookup_type)
            .bind(&probes.lookup_key)
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(
            requests = requests.len(),
            probes = probes.row_idx.len(),
            hits = rows.len(),
            "Cache batch lookup"
        );

        for row in rows {
            let idx = row.row_idx as usize;
            if let Some(slot) = results.get_mut(idx) {
                *slot = Some(Resolution::try_from(row)?);
            }
        }
        Ok(results)
    }

    async fn upsert(&self, resolution: &Resolution) -> LookupResult<()> {
        self.upsert_many(std::slice::from_ref(resolution)).await
    }

    async fn upsert_many(&self, resolutions: &[Resolution]) -> LookupResult<()> {
        // ON CONFLICT cannot touch the same row twice in one statement
        let merged = merge_by_key(resolutions);
        if merged.is_empty() {
            return Ok(());
        }

        let lookup_types: Vec<String> = merged
            .iter()
            .map(|r| r.lookup_type.as_str().to_string())
            .collect();
        let lookup_keys: Vec<String> = merged.iter().map(|r| r.lookup_key.clone()).collect();
        let company_ids: Vec<String> = merged.iter().map(|r| r.company_id.clone()).collect();
        let confidences: Vec<f64> = merged.iter().map(|r| r.confidence).collect();
        let sources: Vec<String> = merged.iter().map(|r| r.source.as_str().to_string()).collect();
        let hit_counts: Vec<i64> = merged.iter().map(|r| r.hit_count).collect();
        let last_hits: Vec<DateTime<Utc>> = merged.iter().map(|r| r.last_hit_at).collect();

        sqlx::query(&self.upsert_sql())
            .bind(&lookup_types)
            .bind(&lookup_keys)
            .bind(&company_ids)
            .bind(&confidences)
            .bind(&sources)
            .bind(&hit_counts)
            .bind(&last_hits)
            .execute(&self.pool)
            .await?;

        tracing::debug!(rows = merged.len(), "Cache upsert");
        Ok(())
    }

    fn record_hit(&self, key: &LookupKey) {
        self.hits.record(key);
    }

    async fn flush_hits(&self) -> LookupResult<usize> {
        let pending = self.hits.drain();
        if pending.is_empty() {
            return Ok(0);
        }

        let lookup_types: Vec<String> = pending
            .iter()
            .map(|(k, _)| k.lookup_type.as_str().to_string())
            .collect();
        let lookup_keys: Vec<String> = pending.iter().map(|(k, _)| k.key.clone()).collect();
        let hits: Vec<i64> = pending.iter().map(|(_, h)| h.hits).collect();
        let last_hits: Vec<DateTime<Utc>> = pending.iter().map(|(_, h)| h.last_hit_at).collect();

        let result = sqlx::query(&self.flush_hits_sql())
            .bind(&lookup_types)
            .bind(&lookup_keys)
            .bind(&hits)
            .bind(&last_hits)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }
}

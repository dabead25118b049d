//! Postgres persistence: append-only raw sink, curated merge, quality checks.

use std::time::Duration;

use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;

use cdim_core::{CuratedBatch, RawPayload};

pub const CRATE_NAME: &str = "cdim-store";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Guards against loading a batch that would carry no signal forward.
    #[error("curated batch is empty, refusing to load")]
    EmptyBatch,
    #[error("dim_country row count too low: {rows} < {min_rows}")]
    RowCountTooLow { rows: i64, min_rows: i64 },
    #[error("duplicate country_code values: {keys:?}")]
    DuplicateKey { keys: Vec<String> },
    #[error("{rows} dim_country rows with null or empty country_code")]
    InvalidKey { rows: i64 },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Outcome of a passing quality-check run, carried into the run summary.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QualityReport {
    pub rows: i64,
    pub min_rows: i64,
}

pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Idempotent DDL for the raw and curated tables.
pub async fn create_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_countries (
            source      TEXT NOT NULL,
            payload     JSONB NOT NULL,
            inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_country (
            country_code  TEXT PRIMARY KEY,
            name_common   TEXT,
            name_official TEXT,
            region        TEXT,
            subregion     TEXT,
            capital       TEXT,
            population    BIGINT,
            area          DOUBLE PRECISION,
            independent   BOOLEAN,
            landlocked    BOOLEAN,
            flag_png      TEXT,
            updated_at    TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Appends the payload envelope verbatim. Rows are never updated or
/// deleted; a write failure is fatal to the run.
pub async fn append_raw(pool: &PgPool, payload: &RawPayload) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO raw_countries (source, payload) VALUES ($1, $2)")
        .bind(&payload.source)
        .bind(sqlx::types::Json(payload))
        .execute(pool)
        .await?;
    debug!(source = %payload.source, records = payload.data.len(), "appended raw payload");
    Ok(())
}

// Merge, not replace-all: keys absent from the batch stay untouched. The
// casts pin the numeric and boolean column types at merge time.
const MERGE_SQL: &str = r#"
INSERT INTO dim_country (
    country_code, name_common, name_official, region, subregion, capital,
    population, area, independent, landlocked, flag_png, updated_at
)
VALUES (
    $1, $2, $3, $4, $5, $6,
    $7::BIGINT, $8::DOUBLE PRECISION, $9::BOOLEAN, $10::BOOLEAN, $11, NOW()
)
ON CONFLICT (country_code) DO UPDATE SET
    name_common   = EXCLUDED.name_common,
    name_official = EXCLUDED.name_official,
    region        = EXCLUDED.region,
    subregion     = EXCLUDED.subregion,
    capital       = EXCLUDED.capital,
    population    = EXCLUDED.population,
    area          = EXCLUDED.area,
    independent   = EXCLUDED.independent,
    landlocked    = EXCLUDED.landlocked,
    flag_png      = EXCLUDED.flag_png,
    updated_at    = NOW()
"#;

/// Rejects batches that would merge nothing.
pub fn ensure_loadable(batch: &CuratedBatch) -> Result<(), StoreError> {
    if batch.is_empty() {
        return Err(StoreError::EmptyBatch);
    }
    Ok(())
}

/// Merges the batch into `dim_country` inside one transaction: all staged
/// records apply or none do. Records sharing a key resolve last-wins in
/// batch order. Returns the number of merged rows.
pub async fn upsert_batch(pool: &PgPool, batch: &CuratedBatch) -> Result<u64, StoreError> {
    ensure_loadable(batch)?;

    let mut tx = pool.begin().await?;
    let mut merged = 0u64;
    for record in &batch.records {
        let result = sqlx::query(MERGE_SQL)
            .bind(&record.country_code)
            .bind(&record.name_common)
            .bind(&record.name_official)
            .bind(&record.region)
            .bind(&record.subregion)
            .bind(&record.capital)
            .bind(record.population)
            .bind(record.area)
            .bind(record.independent)
            .bind(record.landlocked)
            .bind(&record.flag_png)
            .execute(&mut *tx)
            .await?;
        merged += result.rows_affected();
    }
    tx.commit().await?;

    debug!(merged, dropped = batch.dropped, "merged curated batch");
    Ok(merged)
}

/// Post-load invariant checks, in order, inside one read transaction for a
/// consistent snapshot. The first violated check aborts with its error.
pub async fn run_quality_checks(pool: &PgPool, min_rows: i64) -> Result<QualityReport, StoreError> {
    let mut tx = pool.begin().await?;

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dim_country")
        .fetch_one(&mut *tx)
        .await?;
    if rows < min_rows {
        return Err(StoreError::RowCountTooLow { rows, min_rows });
    }

    // The primary key should make duplicates impossible; this defends
    // against a schema or constraint bypass.
    let keys: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT country_code
          FROM dim_country
         GROUP BY country_code
        HAVING COUNT(*) > 1
         ORDER BY country_code
         LIMIT 5
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;
    if !keys.is_empty() {
        return Err(StoreError::DuplicateKey { keys });
    }

    let invalid: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM dim_country WHERE country_code IS NULL OR country_code = ''",
    )
    .fetch_one(&mut *tx)
    .await?;
    if invalid > 0 {
        return Err(StoreError::InvalidKey { rows: invalid });
    }

    tx.commit().await?;
    Ok(QualityReport { rows, min_rows })
}

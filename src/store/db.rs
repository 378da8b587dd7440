use super::{HistoryQuery, StoredBucket};
use crate::ingest::Sample;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder, Row};

pub(super) async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub(super) async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS samples (
            measure text NOT NULL,
            ts timestamptz NOT NULL,
            value double precision NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create samples table")?;
    sqlx::query("CREATE INDEX IF NOT EXISTS samples_measure_ts_idx ON samples (measure, ts)")
        .execute(pool)
        .await
        .context("failed to create samples index")?;
    Ok(())
}

pub(super) async fn write_batch(pool: &PgPool, samples: &[Sample]) -> Result<u64> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO samples (measure, ts, value) ");
    builder.push_values(samples.iter(), |mut b, sample| {
        b.push_bind(sample.measure.as_str())
            .push_bind(millis_to_dt(sample.timestamp_ms))
            .push_bind(sample.value);
    });
    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

pub(super) async fn read(pool: &PgPool, query: &HistoryQuery) -> Result<Vec<StoredBucket>> {
    let window_secs = query.window_ms as f64 / 1000.0;
    let rows = sqlx::query(
        r#"
        SELECT
            time_bucket(make_interval(secs => $3), ts) AS bucket,
            avg(value) AS value
        FROM samples
        WHERE measure = $1
          AND ts >= $2
        GROUP BY bucket
        ORDER BY bucket ASC
        LIMIT $4
        "#,
    )
    .bind(&query.measure)
    .bind(millis_to_dt(query.start_ms))
    .bind(window_secs)
    .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let bucket: DateTime<Utc> = row.try_get("bucket")?;
        let value: f64 = row.try_get("value")?;
        out.push(StoredBucket {
            id: idx as i64 + 1,
            timestamp_ms: bucket.timestamp_millis(),
            value,
        });
    }
    Ok(out)
}

pub(super) async fn has_samples_since(pool: &PgPool, measure: &str, start_ms: i64) -> Result<bool> {
    let found: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM samples WHERE measure = $1 AND ts >= $2)",
    )
    .bind(measure)
    .bind(millis_to_dt(start_ms))
    .fetch_one(pool)
    .await?;
    Ok(found)
}

fn millis_to_dt(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

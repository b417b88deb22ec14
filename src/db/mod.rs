pub mod sql;

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{Executor, MySqlPool, Row, Statement};
use tracing::{debug, info};

use crate::config::DatabaseConfig;

/// One sample joined out of a history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRow {
    /// Sample timestamp, epoch seconds on the source's clock.
    pub clock: i64,
    /// Raw sample value; numeric parsing happens at forward time.
    pub value: String,
    /// Raw host name the sample originated from.
    pub host: String,
    /// Raw item key.
    pub key: String,
}

/// Phase timings for one windowed query, reported by the executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTimings {
    pub acquire: Duration,
    pub prepare: Duration,
    pub execute: Duration,
}

/// Windowed read access to the relational monitoring source.
pub trait QueryExecutor: Send + Sync {
    /// Current clock on the database host, as epoch seconds.
    ///
    /// Query windows are computed against this clock, not the local one, so
    /// skew between the integration host and the database cannot open or
    /// close the window.
    fn current_source_time(&self) -> impl std::future::Future<Output = Result<i64>> + Send;

    /// Rows with clock strictly greater than `since_exclusive`, capped at
    /// `limit`. Rows are returned in the source's natural order; callers must
    /// not assume they are sorted by clock.
    fn fetch_window(
        &self,
        table: &str,
        since_exclusive: i64,
        limit: i64,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<(Vec<SampleRow>, QueryTimings)>> + Send;
}

/// MySQL-backed executor over a connection pool.
pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    /// Opens the connection pool and verifies connectivity.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let opts = MySqlConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .database(&cfg.name)
            .username(&cfg.user)
            .password(&cfg.password);

        let pool = MySqlPoolOptions::new()
            .max_connections(cfg.pool_size)
            .connect_with(opts)
            .await
            .with_context(|| format!("connecting to mysql at {}:{}", cfg.host, cfg.port))?;

        info!(host = %cfg.host, port = cfg.port, database = %cfg.name, "mysql pool ready");

        Ok(Self { pool })
    }
}

impl QueryExecutor for MySqlExecutor {
    async fn current_source_time(&self) -> Result<i64> {
        let row = sqlx::query(sql::CLOCK_QUERY)
            .fetch_one(&self.pool)
            .await
            .context("querying source clock")?;

        row.try_get("clock").context("decoding source clock")
    }

    async fn fetch_window(
        &self,
        table: &str,
        since_exclusive: i64,
        limit: i64,
        timeout: Duration,
    ) -> Result<(Vec<SampleRow>, QueryTimings)> {
        let mut timings = QueryTimings::default();

        let acquire_start = Instant::now();
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("acquiring mysql connection")?;
        timings.acquire = acquire_start.elapsed();

        let sql = sql::window_query_with_limit(table);
        debug!(table, since_exclusive, limit, "running window query");

        let prepare_start = Instant::now();
        let stmt = (&mut *conn)
            .prepare(sql.as_str())
            .await
            .with_context(|| format!("preparing window query for {table}"))?;
        timings.prepare = prepare_start.elapsed();

        let execute_start = Instant::now();
        let rows = run_with_timeout(
            timeout,
            stmt.query().bind(since_exclusive).bind(limit).fetch_all(&mut *conn),
        )
        .await
        .with_context(|| format!("querying window for {table}"))?;
        timings.execute = execute_start.elapsed();

        let mut samples = Vec::with_capacity(rows.len());
        for row in &rows {
            samples.push(decode_row(row)?);
        }

        Ok((samples, timings))
    }
}

/// Runs a query future under the configured timeout; zero disables it.
async fn run_with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = sqlx::Result<T>>,
) -> Result<T> {
    if timeout.is_zero() {
        return fut.await.map_err(anyhow::Error::from);
    }

    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(anyhow::Error::from),
        Err(_) => bail!("query exceeded timeout of {}ms", timeout.as_millis()),
    }
}

fn decode_row(row: &MySqlRow) -> Result<SampleRow> {
    Ok(SampleRow {
        clock: row.try_get("clock").context("decoding clock column")?,
        value: decode_value(row)?,
        host: row.try_get("host").context("decoding host column")?,
        key: row.try_get("key_").context("decoding key_ column")?,
    })
}

/// `history.value` is DOUBLE, `history_uint.value` is BIGINT UNSIGNED and the
/// log/text variants are CHAR/TEXT. Decode whichever shape the table has into
/// the raw string the forward path expects.
fn decode_value(row: &MySqlRow) -> Result<String> {
    if let Ok(s) = row.try_get::<String, _>("value") {
        return Ok(s);
    }
    if let Ok(v) = row.try_get::<f64, _>("value") {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<u64, _>("value") {
        return Ok(v.to_string());
    }

    row.try_get::<i64, _>("value")
        .map(|v| v.to_string())
        .context("decoding value column")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_timeout_disables_deadline() {
        let out = run_with_timeout(Duration::ZERO, async { sqlx::Result::Ok(7) })
            .await
            .expect("future resolves");
        assert_eq!(out, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_stuck_query() {
        let res = run_with_timeout(
            Duration::from_millis(50),
            std::future::pending::<sqlx::Result<i64>>(),
        )
        .await;

        let err = res.expect_err("deadline fires");
        assert!(err.to_string().contains("timeout"));
    }
}

pub mod metrics;
pub mod rate;
pub mod report;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{QueryExecutor, SampleRow};
use crate::health::HealthMetrics;
use crate::normalize;
use crate::sink::{SinkClient, SinkFactory};
use crate::watermark::WatermarkStore;

use self::metrics::CycleMetrics;
use self::report::Reporter;
use self::state::SourceState;

/// Drives the repeating fetch cycle for one source: resolve the source-side
/// clock, query the window above the watermark, normalize and forward each
/// row, advance the watermark, retune the limit, then wait or loop
/// immediately.
///
/// The controller exclusively owns its [`SourceState`]; nothing is shared
/// between sources. Any query-executor or sink error terminates the
/// controller permanently (fail-stop, no retry) without affecting other
/// sources. Cancellation is honored between cycles.
pub struct FetchCycleController<Q, S>
where
    Q: QueryExecutor,
    S: SinkFactory,
{
    state: SourceState,
    metrics: CycleMetrics,
    executor: Arc<Q>,
    sinks: Arc<S>,
    reporter: Reporter<S>,
    watermarks: Option<Arc<dyn WatermarkStore>>,
    health: Option<Arc<HealthMetrics>>,
}

impl<Q, S> FetchCycleController<Q, S>
where
    Q: QueryExecutor,
    S: SinkFactory,
{
    pub fn new(
        state: SourceState,
        executor: Arc<Q>,
        sinks: Arc<S>,
        watermarks: Option<Arc<dyn WatermarkStore>>,
        health: Option<Arc<HealthMetrics>>,
        report_origin: &str,
    ) -> Self {
        let reporter = Reporter::new(
            Arc::clone(&sinks),
            state.metrics_enabled,
            &state.prefix,
            report_origin,
        );

        Self {
            state,
            metrics: CycleMetrics::new(),
            executor,
            sinks,
            reporter,
            watermarks,
            health,
        }
    }

    /// Current per-source state.
    pub fn state(&self) -> &SourceState {
        &self.state
    }

    /// Counters of the most recent cycle.
    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    /// Runs cycles until cancelled or until an infrastructure error.
    pub async fn run(mut self, cancel: CancellationToken) {
        let source = self.state.source_id.clone();
        info!(source = %source, limit = self.state.limit, "fetch controller started");

        loop {
            if cancel.is_cancelled() {
                info!(source = %source, "fetch controller cancelled");
                break;
            }

            let sent = match self.cycle().await {
                Ok(sent) => sent,
                Err(e) => {
                    if let Some(health) = &self.health {
                        health.cycle_errors.with_label_values(&[source.as_str()]).inc();
                    }
                    error!(source = %source, error = %format!("{e:#}"), "fetch controller exiting");
                    break;
                }
            };

            if sent == 0 {
                info!(
                    source = %source,
                    interval = ?self.state.interval,
                    "no data found, sleeping"
                );
                if self.wait(&cancel).await {
                    break;
                }
            } else if (sent as i64) < self.state.limit {
                info!(
                    source = %source,
                    sent,
                    limit = self.state.limit,
                    interval = ?self.state.interval,
                    "data under limit, sleeping"
                );
                if self.wait(&cancel).await {
                    break;
                }
            }
            // Saturated: the next cycle starts immediately to drain backlog.
        }

        self.reporter.close().await;
        info!(source = %source, "fetch controller stopped");
    }

    /// Runs one complete fetch cycle; returns the number of samples
    /// forwarded.
    pub async fn cycle(&mut self) -> Result<u64> {
        let cycle_start = Instant::now();
        let source = self.state.source_id.clone();

        self.reporter.send(&tag(&source, "cycle.mark"), 1.0).await?;

        // The window is computed on the source's clock, not the local one,
        // so clock skew cannot open or close it.
        let source_time = self
            .executor
            .current_source_time()
            .await
            .context("resolving source time")?;

        if self.state.watermark == 0 {
            self.state.watermark = source_time - self.state.lag_seconds;
            info!(
                source = %source,
                watermark = self.state.watermark,
                "initialized watermark from source clock"
            );
        }

        let time_lag = source_time - self.state.watermark;
        self.reporter
            .send_at(&tag(&source, "timeLag"), time_lag as f64, source_time)
            .await?;

        self.metrics.reset();

        if !self.state.profile_only {
            self.query_and_forward().await?;
        }

        // Samples per millisecond over the cycle's wall time; the ratio of
        // consecutive rates is what the limit controller acts on.
        let wall_ms = cycle_start.elapsed().as_millis() as f64;
        let sent = self.metrics.sent();
        let sent_rate = sent as f64 / wall_ms;

        self.state.record_rate(sent_rate);
        debug!(
            source = %source,
            sent_rate,
            avg_ratio = self.state.avg_ratio(),
            "cycle rate recorded"
        );

        self.reporter.send(&tag(&source, "sentRate"), sent_rate).await?;
        self.reporter.send(&tag(&source, "cycle.time"), wall_ms).await?;

        rate::adjust_limit(&mut self.state, sent);

        if let Some(health) = &self.health {
            health.cycles_total.with_label_values(&[source.as_str()]).inc();
            health
                .samples_forwarded
                .with_label_values(&[source.as_str()])
                .inc_by(sent);
            health
                .watermark
                .with_label_values(&[source.as_str()])
                .set(self.state.watermark);
            health
                .fetch_limit
                .with_label_values(&[source.as_str()])
                .set(self.state.limit);
        }

        self.reporter.close().await;

        Ok(sent)
    }

    /// Queries the current window and forwards every row through a sink
    /// connection scoped to this cycle.
    async fn query_and_forward(&mut self) -> Result<()> {
        let source = self.state.source_id.clone();

        let (rows, timings) = self
            .executor
            .fetch_window(
                &source,
                self.state.watermark,
                self.state.limit,
                self.state.query_timeout,
            )
            .await
            .with_context(|| format!("querying window for {source}"))?;

        self.metrics.add_conn_time(timings.acquire);
        self.metrics.add_prep_time(timings.prepare);
        self.metrics.add_exec_time(timings.execute);

        let mut sink = self.sinks.connect().await.context("connecting sink")?;

        let forwarded = self.forward_rows(&mut sink, &rows).await;

        // The connection is per-cycle: closed before any error surfaces.
        if let Err(e) = sink.close().await {
            warn!(source = %source, error = %e, "closing sink connection");
        }

        let (sent, largest_clock) = forwarded?;

        self.metrics.add_sent(sent);

        // Only a cycle that forwarded rows may move the watermark, and only
        // forward. An empty cycle re-queries the same window next time.
        if sent > 0 && largest_clock > self.state.watermark {
            self.state.watermark = largest_clock;
            info!(source = %source, watermark = largest_clock, "advanced watermark");

            if let Some(store) = &self.watermarks {
                if let Err(e) = store.save(&source, largest_clock) {
                    warn!(source = %source, error = %e, "persisting watermark");
                }
            }
        }

        let conn_ms = self.metrics.conn_time().as_millis() as f64;
        let prep_ms = self.metrics.prep_time().as_millis() as f64;
        let exec_ms = self.metrics.exec_time().as_millis() as f64;
        let iter_ms = self.metrics.iter_time().as_millis() as f64;

        self.reporter.send(&tag(&source, "dbconn.time"), conn_ms).await?;
        self.reporter.send(&tag(&source, "queryprep.time"), prep_ms).await?;
        self.reporter.send(&tag(&source, "queryexec.time"), exec_ms).await?;
        self.reporter.send(&tag(&source, "resultitr.time"), iter_ms).await?;
        self.reporter.send(&tag(&source, "sent"), sent as f64).await?;

        Ok(())
    }

    /// Normalizes and forwards rows; returns the forwarded count and the
    /// largest clock among forwarded rows.
    ///
    /// A row whose value does not parse as a number is skipped and does not
    /// contribute its clock.
    async fn forward_rows(
        &mut self,
        sink: &mut S::Client,
        rows: &[SampleRow],
    ) -> Result<(u64, i64)> {
        let iter_start = Instant::now();
        let mut largest_clock = 0i64;
        let mut sent = 0u64;

        for row in rows {
            let value = match row.value.trim().parse::<f64>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(
                        source = %self.state.source_id,
                        key = %row.key,
                        value = %row.value,
                        "skipping sample with non-numeric value"
                    );
                    if let Some(health) = &self.health {
                        health
                            .samples_skipped
                            .with_label_values(&[self.state.source_id.as_str()])
                            .inc();
                    }
                    continue;
                }
            };

            let key = normalize::normalize_key(&row.key);
            let origin = normalize::normalize_origin(&row.host);
            let name = format!("{}{}", self.state.prefix, key);

            let send_start = Instant::now();
            let send_result = sink.send(&name, value, row.clock, &origin).await;
            self.metrics.add_send_time(send_start.elapsed());

            if let Err(e) = send_result {
                self.metrics.add_iter_time(iter_start.elapsed());
                return Err(e)
                    .with_context(|| format!("forwarding sample for {}", self.state.source_id));
            }

            if row.clock > largest_clock {
                largest_clock = row.clock;
            }
            sent += 1;
        }

        let flushed = sink.flush().await;
        self.metrics.add_iter_time(iter_start.elapsed());
        flushed.context("flushing sink")?;

        Ok((sent, largest_clock))
    }

    /// Sleeps one interval; returns true if cancelled while waiting.
    async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.state.interval) => false,
        }
    }
}

fn tag(source: &str, suffix: &str) -> String {
    format!("integration.{source}.{suffix}")
}

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Prometheus metrics for relay health and observability.
///
/// All metrics use the "histrelay" namespace and are labeled by source
/// table where that makes sense.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Completed fetch cycles per source.
    pub cycles_total: IntCounterVec,
    /// Cycles terminated by an infrastructure error, per source.
    pub cycle_errors: IntCounterVec,
    /// Samples forwarded to the sink, per source.
    pub samples_forwarded: IntCounterVec,
    /// Samples skipped for non-numeric values, per source.
    pub samples_skipped: IntCounterVec,
    /// Current watermark (epoch seconds) per source.
    pub watermark: IntGaugeVec,
    /// Current per-cycle row limit per source.
    pub fetch_limit: IntGaugeVec,
    /// Number of fetch controllers started.
    pub sources_active: IntGauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let cycles_total = IntCounterVec::new(
            Opts::new("cycles_total", "Completed fetch cycles per source.")
                .namespace("histrelay"),
            &["source"],
        )?;
        let cycle_errors = IntCounterVec::new(
            Opts::new(
                "cycle_errors_total",
                "Cycles terminated by an infrastructure error, per source.",
            )
            .namespace("histrelay"),
            &["source"],
        )?;
        let samples_forwarded = IntCounterVec::new(
            Opts::new(
                "samples_forwarded_total",
                "Samples forwarded to the sink, per source.",
            )
            .namespace("histrelay"),
            &["source"],
        )?;
        let samples_skipped = IntCounterVec::new(
            Opts::new(
                "samples_skipped_total",
                "Samples skipped for non-numeric values, per source.",
            )
            .namespace("histrelay"),
            &["source"],
        )?;
        let watermark = IntGaugeVec::new(
            Opts::new("watermark_seconds", "Current watermark (epoch seconds) per source.")
                .namespace("histrelay"),
            &["source"],
        )?;
        let fetch_limit = IntGaugeVec::new(
            Opts::new("fetch_limit_rows", "Current per-cycle row limit per source.")
                .namespace("histrelay"),
            &["source"],
        )?;
        let sources_active = IntGauge::with_opts(
            Opts::new("sources_active", "Number of fetch controllers started.")
                .namespace("histrelay"),
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_errors.clone()))?;
        registry.register(Box::new(samples_forwarded.clone()))?;
        registry.register(Box::new(samples_skipped.clone()))?;
        registry.register(Box::new(watermark.clone()))?;
        registry.register(Box::new(fetch_limit.clone()))?;
        registry.register(Box::new(sources_active.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            cycles_total,
            cycle_errors,
            samples_forwarded,
            samples_skipped,
            watermark,
            fetch_limit,
            sources_active,
        })
    }

    /// Starts the metrics HTTP server in a background task.
    pub async fn start(&self) -> Result<()> {
        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("listening on {}", self.addr))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

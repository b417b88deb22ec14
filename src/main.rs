use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use histrelay::config::Config;
use histrelay::db::MySqlExecutor;
use histrelay::fetch::state::SourceState;
use histrelay::fetch::FetchCycleController;
use histrelay::health::HealthMetrics;
use histrelay::sink::ProxyFactory;
use histrelay::watermark::{FileWatermarkStore, WatermarkStore};

/// Relays samples from Zabbix-style MySQL history tables to a metrics proxy.
#[derive(Parser)]
#[command(name = "histrelay", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Target OS.
    pub fn target_os() -> &'static str {
        std::env::consts::OS
    }

    /// Target architecture.
    pub fn target_arch() -> &'static str {
        std::env::consts::ARCH
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            target_os(),
            target_arch(),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("histrelay {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Config is required for the main relay run.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        sources = cfg.sources.len(),
        "starting histrelay",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling; controllers stop at their next cycle boundary.
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("received SIGINT, shutting down");
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                }
            }

            cancel.cancel();
        });
    }

    let health = if cfg.health.enabled {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        health
            .start()
            .await
            .context("starting health metrics server")?;
        Some(health)
    } else {
        None
    };

    let executor = Arc::new(
        MySqlExecutor::connect(&cfg.database)
            .await
            .context("opening source database")?,
    );
    let sinks = Arc::new(ProxyFactory::new(&cfg.proxy.host, cfg.proxy.port, cfg.forward));

    let watermarks: Option<Arc<dyn WatermarkStore>> = match &cfg.watermark_dir {
        Some(dir) => Some(Arc::new(
            FileWatermarkStore::create(dir).context("opening watermark store")?,
        )),
        None => None,
    };

    let mut handles = Vec::with_capacity(cfg.sources.len());
    for source in &cfg.sources {
        let settings = cfg.settings_for(source);
        let mut state = SourceState::new(&source.table, &settings, &cfg.prefix, cfg.self_metrics);

        if let Some(store) = &watermarks {
            if let Some(watermark) = store
                .load(&source.table)
                .with_context(|| format!("loading persisted watermark for {}", source.table))?
            {
                state.watermark = watermark;
                tracing::info!(source = %source.table, watermark, "restored persisted watermark");
            }
        }

        let controller = FetchCycleController::new(
            state,
            Arc::clone(&executor),
            Arc::clone(&sinks),
            watermarks.clone(),
            health.clone(),
            &cfg.report_source,
        );

        tracing::info!(source = %source.table, "starting fetch controller");
        handles.push(tokio::spawn(controller.run(cancel.clone())));
    }

    if let Some(health) = &health {
        health.sources_active.set(handles.len() as i64);
    }

    // The process runs until every source controller has terminated.
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "fetch controller task panicked");
        }
    }

    if let Some(health) = &health {
        health.stop().await.context("stopping health metrics server")?;
    }

    tracing::info!("histrelay stopped");

    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sluice::config::{LogFormat, LoggingConfig, SluiceConfig};
use sluice::dispatch::Dispatcher;
use sluice::ratelimit::WindowLimiter;

/// Push a batch of jobs through a sliding-window admission limiter.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Permits per window (0 disables limiting)
    #[arg(long)]
    limit: Option<usize>,

    /// Window length in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Number of jobs to dispatch
    #[arg(long)]
    jobs: Option<usize>,

    /// Simulated work per job in milliseconds
    #[arg(long)]
    job_ms: Option<u64>,

    /// Give up on a job if it is not admitted within this many milliseconds
    #[arg(long)]
    admit_timeout_ms: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut SluiceConfig) {
        if let Some(limit) = self.limit {
            config.limiter.limit = limit;
        }
        if let Some(window_ms) = self.window_ms {
            config.limiter.window_ms = window_ms;
        }
        if let Some(jobs) = self.jobs {
            config.dispatch.jobs = jobs;
        }
        if let Some(job_ms) = self.job_ms {
            config.dispatch.job_ms = job_ms;
        }
        if self.admit_timeout_ms.is_some() {
            config.dispatch.admit_timeout_ms = self.admit_timeout_ms;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SluiceConfig::from_file(path)?,
        None => SluiceConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Sluice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        limit = config.limiter.limit,
        window_ms = config.limiter.window_ms,
        "Configuration loaded"
    );

    let limiter = Arc::new(WindowLimiter::from_config(&config.limiter)?);
    info!(?limiter, "Limiter initialized");

    let dispatcher = Dispatcher::new(config.dispatch.clone(), limiter.clone());
    let report = dispatcher
        .run_with_shutdown(shutdown_signal(limiter.clone()))
        .await;

    info!(
        admitted = report.admitted,
        completed = report.completed,
        rejected = report.rejected,
        interrupted = report.interrupted,
        "Sluice stopped"
    );
    Ok(())
}

/// Initialize the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Resolve once Ctrl+C or SIGTERM arrives, logging how much work the limiter
/// is still holding back at that moment.
async fn shutdown_signal(limiter: Arc<WindowLimiter>) {
    let received = wait_for_signal().await;
    info!(
        signal = received,
        queued = limiter.queue_length(),
        active = limiter.active_count(),
        "Shutdown signal received, abandoning queued jobs"
    );
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        received = ctrl_c() => received,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

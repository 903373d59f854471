use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use currency_exchange::admission::AdmissionController;
use currency_exchange::config::{ExchangeConfig, LoggingConfig};
use currency_exchange::processor::RequestProcessor;
use currency_exchange::rates::{RateRefresher, RateTable, RefreshHandle};
use currency_exchange::server::Server;

/// Command line arguments; each flag overrides the loaded configuration.
#[derive(Parser, Debug)]
#[command(name = "currency-exchange")]
#[command(about = "Line-based currency exchange server with per-client admission control")]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Requests allowed per client before it is blocked
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: Option<u32>,

    /// Seconds a blocked client must wait
    #[arg(long)]
    retry_window: Option<u64>,

    /// Seconds between exchange rate refreshes
    #[arg(long)]
    refresh_interval: Option<u64>,

    /// Log filter when RUST_LOG is unset (e.g. "debug")
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut ExchangeConfig) {
        if let Some(addr) = self.listen {
            config.server.listen_addr = addr;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.admission.max_attempts = max_attempts;
        }
        if let Some(secs) = self.retry_window {
            config.admission.retry_window_secs = secs;
        }
        if let Some(secs) = self.refresh_interval {
            config.rates.refresh_interval_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ExchangeConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Currency Exchange Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        max_attempts = config.admission.max_attempts,
        retry_window_secs = config.admission.retry_window_secs,
        charging = ?config.admission.charging,
        "Configuration loaded"
    );

    let admission = Arc::new(AdmissionController::with_charging(
        config.admission.max_attempts,
        config.admission.retry_window(),
        config.admission.charging,
    ));
    let rates = Arc::new(RateTable::new());

    let refresher = RateRefresher::from_config(rates.clone(), &config.rates)?;

    // Serve with an empty table if the first fetch fails; the refresher retries.
    refresher.refresh_now().await;
    let refresh = refresher.spawn();

    let processor = Arc::new(RequestProcessor::new(admission, rates));
    let server = Server::bind(config.server.listen_addr, processor)
        .await?
        .identify_by_port(config.server.identify_by_port);

    server.serve_with_shutdown(shutdown_signal(refresh)).await?;

    info!("Currency Exchange Service stopped");
    Ok(())
}

/// Resolve once the process is asked to stop. The rate refresher is stopped
/// before this returns.
async fn shutdown_signal(refresh: RefreshHandle) {
    let signal_name = next_signal().await;
    info!(signal = signal_name, "Shutting down exchange service");
    refresh.stop().await;
}

/// Name of the first stop signal delivered to the process.
#[cfg(unix)]
async fn next_signal() -> &'static str {
    use tokio::signal::unix::SignalKind;

    let mut terminate = match signal::unix::signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C only");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn next_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}

//! POOLSCAN — new pool discovery scanner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! starts the configured sources under the aggregator, serves the
//! dashboard, and shuts everything down on Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use poolscan::config;
use poolscan::dashboard::{self, routes::DashboardState};
use poolscan::engine::{Aggregator, CancelToken, Store};
use poolscan::sources;

const BANNER: &str = r#"
 ____   ___   ___  _     ____   ____    _    _   _
|  _ \ / _ \ / _ \| |   / ___| / ___|  / \  | \ | |
| |_) | | | | | | | |   \___ \| |     / _ \ |  \| |
|  __/| |_| | |_| | |___ ___) | |___ / ___ \| |\  |
|_|    \___/ \___/|_____|____/ \____/_/   \_\_| \_|

  New pool discovery scanner
"#;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path =
        std::env::var("POOLSCAN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    println!("{BANNER}");
    info!(
        config = %config_path,
        sources = cfg.sources.iter().filter(|s| s.enabled()).count(),
        dashboard = cfg.dashboard.enabled,
        "POOLSCAN starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Store::with_subscriber_buffer(cfg.scanner.subscriber_buffer);
    let sources = sources::build_sources(&cfg.sources)?;
    let aggregator = Aggregator::new(store.clone(), sources)
        .with_event_buffer(cfg.scanner.event_buffer)
        .with_shutdown_grace(cfg.scanner.shutdown_grace())
        .with_discovery_log(cfg.scanner.log_discoveries);

    let cancel = CancelToken::new();

    let dashboard_task = if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(store.clone(), cancel.clone()));
        Some(dashboard::spawn_dashboard(state, cfg.dashboard.port, cancel.clone()))
    } else {
        None
    };

    // -- Main loop -------------------------------------------------------

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let run = aggregator.run(&cancel);
    tokio::pin!(run);

    info!("Scanner running. Press Ctrl+C to stop.");

    let outcome = tokio::select! {
        result = &mut run => result,
        _ = &mut shutdown => {
            info!("Shutdown signal received.");
            cancel.cancel();
            // Let the aggregator stop its sources before we exit.
            run.await
        }
    };
    cancel.cancel();

    if let Some(task) = dashboard_task {
        let grace = cfg.scanner.shutdown_grace();
        match tokio::time::timeout(grace, task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "Dashboard exited with error"),
            Ok(Err(e)) => warn!(error = %e, "Dashboard task failed"),
            Err(_) => warn!(
                grace_ms = grace.as_millis() as u64,
                "Dashboard did not stop within grace period, abandoning it"
            ),
        }
    }

    match outcome {
        Ok(()) => {
            info!(pools = store.len(), "POOLSCAN shut down cleanly.");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, pools = store.len(), "Scanner stopped on source failure");
            Err(e.into())
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("poolscan=info"));

    let json_logging = std::env::var("POOLSCAN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

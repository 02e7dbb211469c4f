//! scopecast server binary.
//!
//! Streams float32 sample frames over WebSocket to the bundled chart page
//! under one of three flow-control policies (demand, interval, adaptive).

use scopecast::{Config, Server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let session = &config.session;
    info!(
        listen = %config.listen,
        policy = %session.policy,
        group_width = session.group_width,
        default_groups = session.default_groups,
        max_groups = session.max_groups,
        interval_ms = session.interval.as_millis() as u64,
        idle_timeout_secs = session.idle_timeout.map(|d| d.as_secs()),
        min = session.range.min,
        max = session.range.max,
        "Starting scopecast server"
    );
    if session.idle_timeout.is_none() {
        warn!("No idle timeout: sessions waiting on silent clients stay open indefinitely");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::new(config);
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    server.run().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C or, on unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

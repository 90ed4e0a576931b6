use clap::Parser;
use queue_drain_cli::{run_cli, Cli};
use queue_drain_core::error_chain;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run_cli(cli, shutdown_signal()).await {
        Ok(Some(summary)) if summary.cancelled => {
            info!(
                messages = summary.total_messages(),
                "Drain cancelled by operator"
            );
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %error_chain(&e), "Drain run failed");
            eprintln!("queue-drain: {}", error_chain(&e));
            std::process::exit(e.exit_code());
        }
    }
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

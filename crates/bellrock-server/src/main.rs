use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use bellrock_server::api::{self, AppState};
use bellrock_server::{BellrockServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bellrock_server=debug")),
        )
        .init();

    info!(
        "Starting Bellrock server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = ServerConfig::from_env();
    // The master key stays out of the logs.
    info!(
        db = %config.db_path.display(),
        keystore = %config.keystore_path.display(),
        cell_map = ?config.cell_map_path,
        commit_interval_secs = config.commit_interval_secs,
        parallel_threshold = config.parallel_threshold,
        "Loaded configuration"
    );

    let server = Arc::new(BellrockServer::open(&config)?);
    info!(users = server.user_count(), "Server state loaded");

    // Commit ticker: buffered writes become durable at least this often.
    let flusher = server.clone();
    let commit_interval = config.commit_interval_secs;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(commit_interval));
        loop {
            interval.tick().await;
            if let Err(e) = flusher.flush() {
                tracing::warn!(error = %e, "periodic commit failed");
            }
        }
    });

    let app_state = AppState {
        server: server.clone(),
    };

    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Last chance for buffered rows before the process exits.
    server.flush()?;

    Ok(())
}

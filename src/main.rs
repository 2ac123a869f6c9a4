use std::sync::Arc;

use tollgate::config::Config;
use tollgate::server::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load(Config::path_from_env())?;
    let addr = cfg.listen_addr();
    let server = Arc::new(Server::new(cfg));

    let mut serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.start(&addr).await }
    });

    tokio::select! {
        res = &mut serving => {
            // The accept loop only returns on its own when binding failed.
            return res?;
        }

        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let result = server.shutdown().await;
    serving.await??;
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

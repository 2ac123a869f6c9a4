use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::http::connection::{Connection, Handler};

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until `shutdown` flips to true.
///
/// Every connection task holds a clone of `drain`; the receiving side sees
/// the channel close once the loop and all its connections are done.
pub async fn run<H: Handler>(
    listener: TcpListener,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
    drain: mpsc::Sender<()>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        let (socket, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        debug!("Accepted connection from {}", peer);

        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        let drain = drain.clone();

        tokio::spawn(async move {
            let mut conn = Connection::new(socket, peer, handler, shutdown);
            if let Err(e) = conn.run().await {
                debug!("Connection error from {}: {}", peer, e);
            }
            drop(drain);
        });
    }

    info!("Stopped accepting connections");
}

//! Active health checking
//!
//! Every interval each backend receives `GET {base}/health`. A backend is
//! alive iff that request completes within the probe timeout with a 200.
//! The result overwrites liveness, reviving backends the request path
//! marked dead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::HealthCheckConfig;
use crate::http::response::StatusCode;
use crate::proxy::backend::{Backend, BackendPool};
use crate::proxy::upstream::HttpForwarder;

/// Probe one backend once.
pub async fn probe(client: &HttpForwarder, backend: &Backend, path: &str, limit: Duration) -> Result<()> {
    let response = match tokio::time::timeout(limit, client.get(backend.url(), path)).await {
        Ok(result) => result?,
        Err(_) => bail!("health probe timed out after {limit:?}"),
    };

    if response.status != StatusCode::Ok {
        bail!("health probe returned {}", response.status.as_u16());
    }
    Ok(())
}

/// Probe every backend concurrently and record the outcomes.
pub async fn check_all(pool: &BackendPool, cfg: &HealthCheckConfig) {
    let client = Arc::new(HttpForwarder::new(cfg.timeout(), cfg.timeout()));
    let mut probes = JoinSet::new();

    for backend in pool.backends() {
        let backend = Arc::clone(backend);
        let client = Arc::clone(&client);
        let path = cfg.path.clone();
        let limit = cfg.timeout();

        probes.spawn(async move {
            let outcome = probe(&client, &backend, &path, limit).await;
            record(&backend, outcome);
        });
    }

    while let Some(joined) = probes.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Health probe task failed");
        }
    }
}

fn record(backend: &Backend, outcome: Result<()>) {
    match outcome {
        Ok(()) => {
            let was_alive = backend.set_alive(true);
            if was_alive {
                debug!(backend = %backend.url(), "Health check passed");
            } else {
                info!(backend = %backend.url(), "Backend recovered");
            }
        }
        Err(e) => {
            backend.set_alive(false);
            warn!(backend = %backend.url(), error = %e, "Health check failed");
        }
    }
}

/// Spawns the periodic prober. It exits once `shutdown` flips to true,
/// abandoning any round still in flight.
pub fn spawn_health_checker(
    pool: Arc<BackendPool>,
    cfg: HealthCheckConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cfg.interval());

        // Prevent immediately ticking when spawned
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }

            tokio::select! {
                _ = check_all(&pool, &cfg) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        info!("Health checker stopped");
    })
}

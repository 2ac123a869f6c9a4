//! Server lifecycle
//!
//! Wires configuration into the pool, limiter and handler, runs the accept
//! loop with its two background tasks, and drains everything on shutdown.

pub mod listener;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::proxy::health::spawn_health_checker;
use crate::proxy::{BackendPool, HttpForwarder, ProxyHandler};
use crate::ratelimit::{RateLimiter, spawn_cleanup};

pub struct Server {
    config: Config,
    pool: Arc<BackendPool>,
    limiter: Arc<RateLimiter>,
    handler: Arc<ProxyHandler>,
    shutdown: watch::Sender<bool>,
    drain_tx: Mutex<Option<mpsc::Sender<()>>>,
    drain_rx: Mutex<mpsc::Receiver<()>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Build the pool, limiter and handler. Nothing runs until [`Server::serve`].
    pub fn new(config: Config) -> Self {
        let pool = Arc::new(BackendPool::new(&config.backends));
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let forwarder = HttpForwarder::from_config(&config.proxy);
        let handler = Arc::new(ProxyHandler::new(
            Arc::clone(&pool),
            Arc::clone(&limiter),
            forwarder,
        ));

        info!(
            port = config.port,
            backends = pool.len(),
            capacity = config.rate_limit.capacity,
            refill_rate = config.rate_limit.refill_rate,
            "Initialized load balancer"
        );

        let (shutdown, _) = watch::channel(false);
        let (drain_tx, drain_rx) = mpsc::channel(1);

        Self {
            config,
            pool,
            limiter,
            handler,
            shutdown,
            drain_tx: Mutex::new(Some(drain_tx)),
            drain_rx: Mutex::new(drain_rx),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn handler(&self) -> &Arc<ProxyHandler> {
        &self.handler
    }

    /// Bind `addr` and serve until [`Server::shutdown`].
    ///
    /// Only a bind failure is returned as an error.
    pub async fn start(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        self.serve(listener).await;
        Ok(())
    }

    /// Serve on an already-bound listener until [`Server::shutdown`].
    ///
    /// Starts the health checker and the rate limiter cleanup, both of
    /// which stop together with the accept loop.
    pub async fn serve(&self, listener: TcpListener) {
        let Some(drain) = self.drain_tx.lock().await.clone() else {
            // Already shut down.
            return;
        };

        {
            let mut background = self.background.lock().await;
            background.push(spawn_health_checker(
                Arc::clone(&self.pool),
                self.config.health_check.clone(),
                self.shutdown.subscribe(),
            ));
            background.push(spawn_cleanup(
                Arc::clone(&self.limiter),
                self.config.cleanup.interval(),
                self.config.cleanup.idle_timeout(),
                self.shutdown.subscribe(),
            ));
        }

        listener::run(
            listener,
            Arc::clone(&self.handler),
            self.shutdown.subscribe(),
            drain,
        )
        .await;
    }

    /// Stop accepting, let in-flight requests finish within the grace
    /// period, then stop the background tasks.
    ///
    /// Overrunning the grace period is logged and returned as an error;
    /// the stragglers are left to die with the runtime.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_within(self.config.shutdown_grace()).await
    }

    pub async fn shutdown_within(&self, grace: Duration) -> Result<()> {
        info!("Shutting down HTTP server");
        self.shutdown.send_replace(true);
        self.drain_tx.lock().await.take();

        let drained = {
            let mut drain_rx = self.drain_rx.lock().await;
            tokio::time::timeout(grace, drain_rx.recv()).await.is_ok()
        };

        let background: Vec<_> = self.background.lock().await.drain(..).collect();
        for task in background {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }

        if !drained {
            error!(grace = ?grace, "Graceful shutdown timed out");
            bail!("in-flight requests still running after {grace:?}");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

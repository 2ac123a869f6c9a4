//! Backend server management
//!
//! This module owns the fixed pool of backend servers, tracks their
//! liveness and hands out the next live backend in round-robin order.

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use url::Url;

/// Represents the current state of a backend server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Backend is healthy and accepting requests
    Up,
    /// Backend is down or unreachable
    Down,
}

/// One upstream server.
///
/// The URL never changes after construction. Liveness is written by the
/// health prober and by the request path, so it lives in an atomic.
#[derive(Debug)]
pub struct Backend {
    url: Url,
    alive: AtomicBool,
}

impl Backend {
    /// Create a backend that starts out alive.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            alive: AtomicBool::new(true),
        }
    }

    /// Backend base URL (e.g., "http://localhost:3000/")
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Value for the outbound `Host` header: host plus any explicit port.
    pub fn host_header(&self) -> String {
        host_header(&self.url)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Overwrite liveness. Returns the previous value.
    pub fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }

    pub fn state(&self) -> BackendState {
        if self.is_alive() {
            BackendState::Up
        } else {
            BackendState::Down
        }
    }
}

/// `host[:port]` of a URL, the port only when it was written explicitly.
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Validate a configured backend address.
///
/// Only plain `http` URLs with a host are accepted; the forwarder has no
/// TLS client.
pub fn parse_backend_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid backend URL {raw:?}"))?;

    if url.scheme() != "http" {
        bail!("unsupported scheme {:?} in backend URL {raw:?}", url.scheme());
    }
    if url.host_str().is_none_or(str::is_empty) {
        bail!("backend URL {raw:?} has no host");
    }

    Ok(url)
}

/// Picks backends for requests.
pub trait Balancer: Send + Sync + 'static {
    /// Next live backend, or `None` when none is alive.
    fn select_next(&self) -> Option<Arc<Backend>>;

    /// Take a backend out of rotation until a health probe revives it.
    fn mark_dead(&self, url: &Url);
}

/// Round-robin pool over a fixed, ordered set of backends.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    cursor: AtomicUsize,
}

impl BackendPool {
    /// Build a pool from configured addresses.
    ///
    /// Addresses that fail [`parse_backend_url`] are logged and skipped.
    pub fn new<S: AsRef<str>>(addresses: &[S]) -> Self {
        let mut backends = Vec::with_capacity(addresses.len());

        for raw in addresses {
            match parse_backend_url(raw.as_ref()) {
                Ok(url) => {
                    info!(backend = %url, "Added backend");
                    backends.push(Arc::new(Backend::new(url)));
                }
                Err(e) => {
                    warn!(error = %e, "Skipping backend");
                }
            }
        }

        Self {
            backends,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Select the next live backend in round-robin order.
    ///
    /// Each attempt advances the shared cursor once, and at most one full
    /// lap of the pool is scanned.
    pub fn select_next(&self) -> Option<Arc<Backend>> {
        let total = self.backends.len();

        for _ in 0..total {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % total;
            let backend = &self.backends[index];

            if backend.is_alive() {
                debug!(backend = %backend.url, "Selected backend");
                return Some(Arc::clone(backend));
            }
        }

        warn!("No alive backends available");
        None
    }

    /// Mark the backend with this URL as dead. Unknown URLs are ignored.
    pub fn mark_dead(&self, url: &Url) {
        if let Some(backend) = self.backends.iter().find(|b| b.url == *url) {
            backend.set_alive(false);
            warn!(backend = %url, "Marked backend dead");
        }
    }

    /// All backends, in configuration order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Get count of alive backends
    pub fn available_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_alive()).count()
    }
}

impl Balancer for BackendPool {
    fn select_next(&self) -> Option<Arc<Backend>> {
        BackendPool::select_next(self)
    }

    fn mark_dead(&self, url: &Url) {
        BackendPool::mark_dead(self, url)
    }
}

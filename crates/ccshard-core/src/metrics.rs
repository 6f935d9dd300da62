//! Prometheus exposition: pull endpoint and on-exit text dump.
//!
//! Each pipeline owns its own [`Registry`]; nothing here is process-global.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::stream::SHARED_RUNTIME;

/// Create and register a plain counter.
pub fn register_counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric can be created");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric can be registered");
    counter
}

/// Create and register a counter with labels.
pub fn register_counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).expect("metric can be created");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric can be registered");
    counter
}

/// Render a registry in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> String {
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buf) {
        log::warn!("Failed to encode metrics: {e}");
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Write the registry to `path`, creating parent directories.
pub fn write_to_textfile(registry: &Registry, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, encode_text(registry))?;
    fs::rename(&tmp, path)
}

/// Dumps a registry to a text file when dropped, on every exit path.
pub struct TextfileOnDrop {
    registry: Registry,
    path: PathBuf,
}

impl TextfileOnDrop {
    pub fn new(registry: &Registry, path: impl Into<PathBuf>) -> Self {
        Self {
            registry: registry.clone(),
            path: path.into(),
        }
    }
}

impl Drop for TextfileOnDrop {
    fn drop(&mut self) {
        match write_to_textfile(&self.registry, &self.path) {
            Ok(()) => log::info!("Metrics written to {}", self.path.display()),
            Err(e) => log::warn!("Failed to write metrics to {}: {e}", self.path.display()),
        }
    }
}

/// Handle to the background metrics server; aborts it on drop.
pub struct MetricsServer {
    addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl MetricsServer {
    /// Bind `addr` and serve `/metrics` and `/health` on the shared runtime.
    pub fn start(addr: SocketAddr, registry: Registry) -> io::Result<Self> {
        let listener = SHARED_RUNTIME
            .handle()
            .block_on(tokio::net::TcpListener::bind(addr))?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(|| async { "OK" }))
            .with_state(registry);

        let task = SHARED_RUNTIME.spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("Metrics server stopped: {e}");
            }
        });
        log::info!("Serving metrics on http://{addr}/metrics");
        Ok(Self { addr, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_text(&registry),
    )
        .into_response()
}

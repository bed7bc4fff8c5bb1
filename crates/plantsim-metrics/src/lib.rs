//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to resolve metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Per-plant metrics recorded by the plant workers.
#[derive(Clone, Debug)]
pub struct PlantMetrics {
    registry: SharedRegistry,
    plants_total: IntGauge,
    signals: IntCounterVec,
    active_power: GaugeVec,
    set_point: GaugeVec,
}

impl PlantMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let plants_total = IntGauge::with_opts(Opts::new(
            "plantsim_plants_total",
            "Number of plant workers currently running",
        ))?;
        registry.register(Box::new(plants_total.clone()))?;

        let signals = IntCounterVec::new(
            Opts::new(
                "plantsim_signals_total",
                "Signals emitted by plant workers, by plant and signal kind",
            ),
            &["plant", "kind"],
        )?;
        registry.register(Box::new(signals.clone()))?;

        let active_power = GaugeVec::new(
            Opts::new(
                "plantsim_active_power",
                "Simulated active power output of each plant",
            ),
            &["plant"],
        )?;
        registry.register(Box::new(active_power.clone()))?;

        let set_point = GaugeVec::new(
            Opts::new("plantsim_set_point", "Commanded set-point of each plant"),
            &["plant"],
        )?;
        registry.register(Box::new(set_point.clone()))?;

        Ok(Self {
            registry,
            plants_total,
            signals,
            active_power,
            set_point,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_plant_count(&self, count: usize) {
        self.plants_total.set(count as i64);
    }

    pub fn record_signal(&self, plant: u64, kind: &str) {
        self.signals
            .with_label_values(&[&plant.to_string(), kind])
            .inc();
    }

    pub fn observe_power(&self, plant: u64, active_power: f64, set_point: f64) {
        let label = plant.to_string();
        self.active_power
            .with_label_values(&[&label])
            .set(active_power);
        self.set_point.with_label_values(&[&label]).set(set_point);
    }

    /// Drop the per-plant series once a worker has been torn down.
    pub fn forget_plant(&self, plant: u64) {
        let label = plant.to_string();
        let _ = self.active_power.remove_label_values(&[&label]);
        let _ = self.set_point.remove_label_values(&[&label]);
    }
}

pub use prometheus;

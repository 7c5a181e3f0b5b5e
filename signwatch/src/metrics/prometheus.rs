//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and the monitor's strongly-typed metrics, and an async HTTP
//! exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, header::HeaderValue,
    server::conn::http1, service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::live::PipelineObserver;
use crate::query::{QueryAttempt, QueryObserver};
use crate::report::ReportEvent;
use crate::state::Snapshot;

/// Monitor Prometheus metrics.
///
/// Cloning is cheap: every field is a handle to the registered collector.
#[derive(Clone)]
pub struct MonitorMetrics {
    /// Endpoint attempts by chain, host, query type and outcome.
    pub query_attempts_total: IntCounterVec,
    /// Latency of one endpoint attempt, in seconds.
    pub query_duration_seconds: HistogramVec,
    pub validator_signed_blocks: IntGaugeVec,
    pub validator_missed_blocks: IntGaugeVec,
    pub validator_proposed_blocks: IntGaugeVec,
    pub validator_jailed: IntGaugeVec,
    pub validator_active: IntGaugeVec,
    /// Reported events by kind.
    pub events_total: IntCounterVec,
    pub latest_height: IntGaugeVec,
    pub ws_messages_total: IntCounterVec,
    pub ws_reconnects_total: IntCounterVec,
    /// Blocks dropped because another peer delivered them first.
    pub ws_duplicates_total: IntCounterVec,
    /// Monitor cycles aborted by an error.
    pub cycle_errors_total: IntCounterVec,
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, prometheus::Error> {
    let metric = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntGaugeVec, prometheus::Error> {
    let metric = IntGaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

const VALIDATOR_LABELS: &[&str] = &["chain", "operator", "moniker"];

impl MonitorMetrics {
    /// Registers monitor metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let query_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "query_duration_seconds",
                "Time spent on one endpoint attempt in seconds",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["chain", "query"],
        )?;
        registry.register(Box::new(query_duration_seconds.clone()))?;

        Ok(Self {
            query_attempts_total: counter_vec(
                registry,
                "query_attempts_total",
                "Endpoint attempts by outcome",
                &["chain", "host", "query", "outcome"],
            )?,
            query_duration_seconds,
            validator_signed_blocks: gauge_vec(
                registry,
                "validator_signed_blocks",
                "Blocks signed by a validator in the window",
                VALIDATOR_LABELS,
            )?,
            validator_missed_blocks: gauge_vec(
                registry,
                "validator_missed_blocks",
                "Blocks missed by a validator in the window",
                VALIDATOR_LABELS,
            )?,
            validator_proposed_blocks: gauge_vec(
                registry,
                "validator_proposed_blocks",
                "Blocks proposed by a validator in the window",
                VALIDATOR_LABELS,
            )?,
            validator_jailed: gauge_vec(
                registry,
                "validator_jailed",
                "Whether a validator is jailed (0/1)",
                VALIDATOR_LABELS,
            )?,
            validator_active: gauge_vec(
                registry,
                "validator_active",
                "Whether a validator is in the active set (0/1)",
                VALIDATOR_LABELS,
            )?,
            events_total: counter_vec(
                registry,
                "events_total",
                "Reported events by kind",
                &["chain", "kind"],
            )?,
            latest_height: gauge_vec(
                registry,
                "latest_height",
                "Latest block height in the window",
                &["chain"],
            )?,
            ws_messages_total: counter_vec(
                registry,
                "ws_messages_total",
                "New-block messages received per peer",
                &["chain", "peer"],
            )?,
            ws_reconnects_total: counter_vec(
                registry,
                "ws_reconnects_total",
                "Websocket reconnects per peer",
                &["chain", "peer"],
            )?,
            ws_duplicates_total: counter_vec(
                registry,
                "ws_duplicates_total",
                "Duplicate blocks dropped by the live pipeline",
                &["chain"],
            )?,
            cycle_errors_total: counter_vec(
                registry,
                "cycle_errors_total",
                "Monitor cycles aborted by an error",
                &["chain"],
            )?,
        })
    }

    /// Publishes per-validator statistics of a committed snapshot.
    pub fn record_snapshot(&self, chain: &str, snapshot: &Snapshot) {
        self.latest_height
            .with_label_values(&[chain])
            .set(snapshot.height);

        for entry in snapshot.entries.values() {
            let validator = &entry.validator;
            let labels = [
                chain,
                validator.operator_address.as_str(),
                validator.moniker.as_str(),
            ];
            let info = &entry.signature_info;
            self.validator_signed_blocks
                .with_label_values(&labels)
                .set(info.signed);
            self.validator_missed_blocks
                .with_label_values(&labels)
                .set(info.missed());
            self.validator_proposed_blocks
                .with_label_values(&labels)
                .set(info.proposed);
            self.validator_jailed
                .with_label_values(&labels)
                .set(i64::from(validator.jailed));
            self.validator_active
                .with_label_values(&labels)
                .set(i64::from(entry.is_active));
        }
    }

    pub fn record_events(&self, chain: &str, events: &[ReportEvent]) {
        for event in events {
            self.events_total
                .with_label_values(&[chain, event.kind().as_str()])
                .inc();
        }
    }
}

impl QueryObserver for MonitorMetrics {
    fn on_attempt(&self, attempt: &QueryAttempt<'_>) {
        let outcome = if attempt.success { "success" } else { "failure" };
        self.query_attempts_total
            .with_label_values(&[attempt.chain, attempt.host, attempt.query, outcome])
            .inc();
        self.query_duration_seconds
            .with_label_values(&[attempt.chain, attempt.query])
            .observe(attempt.duration.as_secs_f64());
    }
}

impl PipelineObserver for MonitorMetrics {
    fn on_message(&self, chain: &str, peer: &str) {
        self.ws_messages_total.with_label_values(&[chain, peer]).inc();
    }

    fn on_duplicate(&self, chain: &str) {
        self.ws_duplicates_total.with_label_values(&[chain]).inc();
    }

    fn on_reconnect(&self, chain: &str, peer: &str) {
        self.ws_reconnects_total.with_label_values(&[chain, peer]).inc();
    }
}

/// Wrapper around a Prometheus registry and the monitor metrics.
///
/// This is the main handle passed around the process. It can be wrapped
/// in an [`Arc`] and shared across tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub monitor: MonitorMetrics,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with a fresh underlying `Registry`
    /// and registers the monitor metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("signwatch".to_string()), None)?;
        let monitor = MonitorMetrics::register(&registry)?;
        Ok(Self { registry, monitor })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "prometheus exporter listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                error!(error = %err, "prometheus HTTP server error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut response = Response::new(Full::new(Bytes::from(metrics.gather_text())));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(response)
        }
        _ => {
            let mut response = Response::new(Full::new(Bytes::from("not found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
    }
}

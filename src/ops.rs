//! Operational metrics and health surfaces.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tiny_http::{Header, Response, Server};

#[derive(Debug, Clone)]
pub struct HealthState {
    healthy: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    frames_total: IntCounter,
    pings_sent: IntCounter,
    desync_total: IntCounter,
    rest_retries: IntCounter,
    rest_failures: IntCounterVec,
    orders_submitted: IntCounter,
    orders_canceled: IntCounter,
    fills_total: IntCounter,
    last_frame_ms: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let frames_total =
            IntCounter::new("stream_frames_total", "Frames received on the stream")
                .expect("metric");
        let pings_sent =
            IntCounter::new("stream_pings_sent", "Keepalive pings sent").expect("metric");
        let desync_total =
            IntCounter::new("ladder_desync_total", "Ladder checksum mismatches").expect("metric");
        let rest_retries =
            IntCounter::new("rest_retries_total", "REST attempts retried").expect("metric");
        let rest_failures = IntCounterVec::new(
            Opts::new("rest_failures_total", "REST failures by reason"),
            &["reason"],
        )
        .expect("metric");
        let orders_submitted =
            IntCounter::new("orders_submitted_total", "Orders submitted").expect("metric");
        let orders_canceled =
            IntCounter::new("orders_canceled_total", "Orders canceled").expect("metric");
        let fills_total = IntCounter::new("fills_total", "Fills observed").expect("metric");
        let last_frame_ms =
            IntGauge::new("stream_last_frame_ms", "Timestamp of the last frame").expect("metric");

        for collector in [
            Box::new(frames_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(pings_sent.clone()),
            Box::new(desync_total.clone()),
            Box::new(rest_retries.clone()),
            Box::new(rest_failures.clone()),
            Box::new(orders_submitted.clone()),
            Box::new(orders_canceled.clone()),
            Box::new(fills_total.clone()),
            Box::new(last_frame_ms.clone()),
        ] {
            registry.register(collector).expect("register metric");
        }

        Self {
            registry,
            frames_total,
            pings_sent,
            desync_total,
            rest_retries,
            rest_failures,
            orders_submitted,
            orders_canceled,
            fills_total,
            last_frame_ms,
        }
    }

    pub fn inc_frame(&self) {
        self.frames_total.inc();
    }

    pub fn inc_ping(&self) {
        self.pings_sent.inc();
    }

    pub fn inc_desync(&self) {
        self.desync_total.inc();
    }

    pub fn inc_rest_retry(&self) {
        self.rest_retries.inc();
    }

    pub fn inc_rest_failure(&self, reason: &str) {
        self.rest_failures.with_label_values(&[reason]).inc();
    }

    pub fn inc_order_submitted(&self) {
        self.orders_submitted.inc();
    }

    pub fn inc_order_canceled(&self) {
        self.orders_canceled.inc();
    }

    pub fn inc_fill(&self) {
        self.fills_total.inc();
    }

    pub fn set_last_frame_ms(&self, timestamp_ms: i64) {
        self.last_frame_ms.set(timestamp_ms);
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `/metrics` and `/healthz` on a background thread.
pub fn spawn_ops_server(
    metrics: Metrics,
    health: HealthState,
    addr: String,
) -> std::io::Result<thread::JoinHandle<()>> {
    let server = Server::http(&addr)
        .map_err(|err| std::io::Error::other(format!("ops server bind {addr}: {err}")))?;
    Ok(thread::spawn(move || {
        let text_plain = Header::from_bytes(&b"Content-Type"[..], &b"text/plain; version=0.0.4"[..])
            .expect("static header");
        for request in server.incoming_requests() {
            let response = match request.url() {
                "/metrics" => {
                    Response::from_string(metrics.render()).with_header(text_plain.clone())
                }
                "/healthz" => {
                    if health.is_healthy() && health.is_ready() {
                        Response::from_string("ok")
                    } else {
                        Response::from_string("unhealthy").with_status_code(503)
                    }
                }
                _ => Response::from_string("not found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    }))
}

// ===============================
// src/metrics.rs
// ===============================
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::sync::watch;
use tracing::info;

use crate::coordinator::EventReport;
use crate::domain::EngineSnapshot;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Intake --------
pub static EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("engine_events_total", "intake events handled"), &["kind"]).unwrap()
});

pub static TICKS_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticks_total_by_symbol", "market data snapshots per symbol"),
        &["symbol"],
    )
    .unwrap()
});

// Time spent inside one `handle` call, venue round-trips included (microseconds)
pub static EVENT_LATENCY_US: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("engine_event_handle_us", "event handling latency (us)")
            .buckets(vec![10.0, 50.0, 100.0, 500.0, 1_000.0, 5_000.0, 20_000.0, 100_000.0, 1_000_000.0]),
    )
    .unwrap()
});

// -------- Decisions --------
pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("orders_total", "actions submitted to the venue"), &["action"]).unwrap()
});

pub static RISK_VIOLATIONS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("risk_violations_total", "creates shrunk away or rejected by risk").unwrap());

pub static STALE_EVENTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("stale_events_total", "acks/fills dropped as stale").unwrap());

pub static TRANSPORT_ERRORS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("venue_transport_errors_total", "venue calls failed after retries").unwrap());

pub static EXECS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("exec_reports_total", "execution reports"),
        &["status", "venue"],
    )
    .unwrap()
});

// -------- State --------
pub static LIVE_ORDERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("live_orders", "committed orders per symbol"), &["symbol"]).unwrap()
});

pub static INV_QTY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("inventory_qty", "net qty per symbol"), &["symbol"]).unwrap()
});

pub static PNL_REALIZED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("pnl_realized", "realized PnL (ticks)").unwrap());

pub static PNL_UNREALIZED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("pnl_unrealized", "unrealized PnL (ticks)").unwrap());

pub static DEGRADED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("engine_degraded", "1 if unresolved venue errors persist").unwrap());

// -------- Binance user-data stream health --------
pub static BIN_WS_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("binance_ws_connected", "1 if WS userDataStream connected, 0 otherwise"),
        &["venue"],
    )
    .unwrap()
});

pub static BIN_WS_RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("binance_ws_reconnects_total", "Number of reconnects to userDataStream WS"),
        &["venue"],
    )
    .unwrap()
});

pub static BIN_LISTEN_KEEPALIVE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("binance_listenkey_keepalive_total", "listenKey keepalive calls"),
        &["venue", "result"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_mode", "run mode (label: mode)"), &["mode"]).unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_symbol", "configured symbols (label: symbol)"), &["symbol"]).unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(EVENTS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(EVENT_LATENCY_US.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(RISK_VIOLATIONS.clone())),
        REGISTRY.register(Box::new(STALE_EVENTS.clone())),
        REGISTRY.register(Box::new(TRANSPORT_ERRORS.clone())),
        REGISTRY.register(Box::new(EXECS.clone())),
        REGISTRY.register(Box::new(LIVE_ORDERS.clone())),
        REGISTRY.register(Box::new(INV_QTY.clone())),
        REGISTRY.register(Box::new(PNL_REALIZED.clone())),
        REGISTRY.register(Box::new(PNL_UNREALIZED.clone())),
        REGISTRY.register(Box::new(DEGRADED.clone())),
        // Binance WS health
        REGISTRY.register(Box::new(BIN_WS_CONNECTED.clone())),
        REGISTRY.register(Box::new(BIN_WS_RECONNECTS.clone())),
        REGISTRY.register(Box::new(BIN_LISTEN_KEEPALIVE.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ] {
        if let Err(e) = m {
            tracing::debug!(error = %e, "metric already registered");
        }
    }
}

/// Count what one `handle` call did.
pub fn observe_event(kind: &str, report: &EventReport, elapsed: Duration) {
    EVENTS.with_label_values(&[kind]).inc();
    EVENT_LATENCY_US.observe(elapsed.as_micros() as f64);
    for a in &report.submitted {
        ORDERS.with_label_values(&[a.label()]).inc();
    }
    RISK_VIOLATIONS.inc_by(report.violations.len() as u64);
    STALE_EVENTS.inc_by(report.stale.len() as u64);
    TRANSPORT_ERRORS.inc_by(report.transport_errors as u64);
}

/// Mirror an engine snapshot into gauges.
pub fn publish_snapshot(snap: &EngineSnapshot) {
    for p in &snap.positions {
        INV_QTY.with_label_values(&[&p.symbol]).set(p.qty);
        let live = snap.live_orders.iter().filter(|o| o.symbol == p.symbol).count();
        LIVE_ORDERS.with_label_values(&[&p.symbol]).set(live as i64);
    }
    PNL_REALIZED.set(snap.pnl.realized);
    PNL_UNREALIZED.set(snap.pnl.unrealized);
    DEGRADED.set(snap.degraded as i64);
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

fn respond(req: &Request<Body>, snapshots: &watch::Receiver<EngineSnapshot>) -> Response<Body> {
    let (status, content_type, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") | (&Method::GET, "/metrics") => {
            (StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", encode_metrics())
        }
        (&Method::GET, "/inspect") => {
            // salinan, bukan referensi ke state engine
            let snap = snapshots.borrow().clone();
            match serde_json::to_vec_pretty(&snap) {
                Ok(b) => (StatusCode::OK, "application/json", b),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string().into_bytes()),
            }
        }
        _ => (StatusCode::NOT_FOUND, "text/plain", b"not found\n".to_vec()),
    };
    let mut rsp = Response::new(Body::from(body));
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    rsp
}

/// Serve `/metrics` and `/inspect` until the process exits.
pub async fn serve(port: u16, snapshots: watch::Receiver<EngineSnapshot>) -> Result<(), hyper::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let snapshots = snapshots.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let rsp = respond(&req, &snapshots);
                async move { Ok::<_, Infallible>(rsp) }
            }))
        }
    });
    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "metrics listening on /metrics and /inspect");
    server.await
}

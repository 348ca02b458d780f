//! Prometheus metrics registry and metric definitions.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global registry under crate namespace
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("corp_registry_api".into()), None)
        .expect("failed to create Prometheus registry")
});

/// Requests served, by route and status code
pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("http_requests_total", "Total number of HTTP requests served");
    let c = IntCounterVec::new(opts, &["route", "status"]).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Histogram of request handling durations
pub static HTTP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "http_request_duration_seconds",
        "Duration of request handling in seconds",
    );
    let h = HistogramVec::new(opts, &["route"]).expect("histogram opts");
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

/// Rows written to `flow_map` by the last startup load
pub static FLOWMAP_ROWS_LOADED: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("flowmap_rows_loaded", "Rows loaded from the flow-map CSV")
        .expect("gauge opts");
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

/// Encode all metrics as text
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    encoder.encode(&mf, &mut buffer).expect("failed to encode");
    String::from_utf8(buffer).expect("invalid utf8")
}

/// MIME type Prometheus expects on a scrape response.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

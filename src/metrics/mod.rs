use std::sync::Once;
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::warn;

use crate::constants::METRIC_LABEL_NONE;
use crate::CloudEventsType;
use crate::Envelope;

lazy_static! {
    pub static ref SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sent_total", "The total number of cloud events sent"),
        &["source", "original_source", "cluster", "type", "subresource", "action"]
    )
    .expect("metric can not be created");

    pub static ref RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("received_total", "The total number of cloud events received"),
        &["source", "cluster", "type", "subresource", "action"]
    )
    .expect("metric can not be created");

    pub static ref RECONNECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("reconnected_total", "The total number of transport reconnects"),
        &["client_id"]
    )
    .expect("metric can not be created");

    pub static ref SPEC_RESYNC_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "spec_resync_duration_seconds",
            "Time taken to answer a spec resync request"
        )
        .buckets(exponential_buckets(0.001, 2.0, 16).unwrap()),
        &["source", "cluster", "type"]
    )
    .expect("metric can not be created");

    pub static ref STATUS_RESYNC_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "status_resync_duration_seconds",
            "Time taken to answer a status resync request"
        )
        .buckets(exponential_buckets(0.001, 2.0, 16).unwrap()),
        &["source", "cluster", "type"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Registers every collector with [`REGISTRY`]. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(SENT_TOTAL.clone()),
            Box::new(RECEIVED_TOTAL.clone()),
            Box::new(RECONNECTED_TOTAL.clone()),
            Box::new(SPEC_RESYNC_DURATION_SECONDS.clone()),
            Box::new(STATUS_RESYNC_DURATION_SECONDS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                warn!("collector can not be registered: {:?}", e);
            }
        }
    });
}

/// Clears every series. Tests call this to isolate assertions.
pub fn reset_metrics() {
    SENT_TOTAL.reset();
    RECEIVED_TOTAL.reset();
    RECONNECTED_TOTAL.reset();
    SPEC_RESYNC_DURATION_SECONDS.reset();
    STATUS_RESYNC_DURATION_SECONDS.reset();
}

/// Renders [`REGISTRY`] in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub(crate) fn record_sent(envelope: &Envelope, event_type: &CloudEventsType) {
    let original_source = envelope
        .original_source()
        .unwrap_or_else(|| METRIC_LABEL_NONE.to_string());
    let cluster = envelope.cluster_name().unwrap_or_default();
    let data_type = event_type.data_type.to_string();
    SENT_TOTAL
        .with_label_values(&[
            envelope.source.as_str(),
            original_source.as_str(),
            cluster.as_str(),
            data_type.as_str(),
            event_type.sub_resource.as_str(),
            event_type.action.as_str(),
        ])
        .inc();
}

pub(crate) fn record_received(envelope: &Envelope, event_type: &CloudEventsType) {
    let cluster = envelope.cluster_name().unwrap_or_default();
    let data_type = event_type.data_type.to_string();
    RECEIVED_TOTAL
        .with_label_values(&[
            envelope.source.as_str(),
            cluster.as_str(),
            data_type.as_str(),
            event_type.sub_resource.as_str(),
            event_type.action.as_str(),
        ])
        .inc();
}

pub(crate) fn record_reconnected(client_id: &str) {
    RECONNECTED_TOTAL.with_label_values(&[client_id]).inc();
}

pub(crate) fn observe_spec_resync(source: &str, cluster: &str, data_type: &str, elapsed: Duration) {
    SPEC_RESYNC_DURATION_SECONDS
        .with_label_values(&[source, cluster, data_type])
        .observe(elapsed.as_secs_f64());
}

pub(crate) fn observe_status_resync(
    source: &str,
    cluster: &str,
    data_type: &str,
    elapsed: Duration,
) {
    STATUS_RESYNC_DURATION_SECONDS
        .with_label_values(&[source, cluster, data_type])
        .observe(elapsed.as_secs_f64());
}

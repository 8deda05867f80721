use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, HistogramTimer, HistogramVec, IntCounter,
    IntCounterVec, Registry, TextEncoder,
};

use crate::delivery::RecordKind;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Delivery metrics
    pub static ref RECORDS_SENT: IntCounterVec = register_int_counter_vec_with_registry!(
        "zenoss_exporter_records_sent_total",
        "Records accepted by the backend",
        &["kind"],
        REGISTRY
    ).unwrap();

    pub static ref RECORDS_FAILED: IntCounterVec = register_int_counter_vec_with_registry!(
        "zenoss_exporter_records_failed_total",
        "Records rejected by the backend or lost to transport errors",
        &["kind"],
        REGISTRY
    ).unwrap();

    pub static ref SEND_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        "zenoss_exporter_send_duration_seconds",
        "Duration of one outbound batch call",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0],
        REGISTRY
    ).unwrap();

    // Pipeline metrics
    pub static ref RECORDS_DROPPED: IntCounterVec = register_int_counter_vec_with_registry!(
        "zenoss_exporter_records_dropped_total",
        "Records dropped before sending",
        &["kind", "reason"],
        REGISTRY
    ).unwrap();

    pub static ref MODELS_SUPPRESSED: IntCounter = register_int_counter_with_registry!(
        "zenoss_exporter_models_suppressed_total",
        "Models skipped because an identical one was sent recently",
        REGISTRY
    ).unwrap();

    pub static ref VIEWS_IGNORED: IntCounter = register_int_counter_with_registry!(
        "zenoss_exporter_views_ignored_total",
        "Views skipped because their name matched an ignore pattern",
        REGISTRY
    ).unwrap();
}

pub fn record_sent(kind: RecordKind, count: usize) {
    RECORDS_SENT
        .with_label_values(&[kind.as_str()])
        .inc_by(count as u64);
}

pub fn record_failed(kind: RecordKind, count: usize) {
    RECORDS_FAILED
        .with_label_values(&[kind.as_str()])
        .inc_by(count as u64);
}

pub fn record_dropped(kind: RecordKind, reason: &str) {
    RECORDS_DROPPED
        .with_label_values(&[kind.as_str(), reason])
        .inc();
}

pub fn record_suppressed_model() {
    MODELS_SUPPRESSED.inc();
}

pub fn record_ignored_view() {
    VIEWS_IGNORED.inc();
}

/// Observes the send duration for `kind` when dropped.
pub fn send_timer(kind: RecordKind) -> HistogramTimer {
    SEND_DURATION.with_label_values(&[kind.as_str()]).start_timer()
}

/// Text exposition of every exporter metric.
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %err, "failed to encode exporter metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_gather() {
        let before = RECORDS_SENT.with_label_values(&["models"]).get();
        record_sent(RecordKind::Models, 3);
        assert!(RECORDS_SENT.with_label_values(&["models"]).get() >= before + 3);

        record_dropped(RecordKind::Metrics, "overflow");
        let text = gather();
        assert!(text.contains("zenoss_exporter_records_sent_total"));
        assert!(text.contains("reason=\"overflow\""));
    }
}

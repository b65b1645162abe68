// src/telemetry/metrics.rs
//! Nombres y descripciones de las métricas del motor.
//!
//! Se usa la fachada `metrics`: sin un recorder instalado las llamadas son
//! no-ops, así que los tests no necesitan exportador. Las etiquetas se limitan
//! a valores acotados (canal, severidad, estado, modelo) para controlar la
//! cardinalidad.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Duration;

use crate::domain::model::alert::AlertState;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::severity::Severity;

pub const METRIC_CACHE_HITS: &str = "metric_cache_hits_total";
pub const METRIC_CACHE_MISSES: &str = "metric_cache_misses_total";
pub const METRIC_CACHE_INVALIDATIONS: &str = "metric_cache_invalidations_total";
pub const METRIC_CACHE_ERRORS: &str = "metric_cache_errors_total";
pub const METRIC_COMPUTE_LATENCY: &str = "metric_compute_latency_seconds";
pub const BOOKINGS_INGESTED: &str = "bookings_ingested_total";
pub const FORECASTS_GENERATED: &str = "forecasts_generated_total";
pub const FORECASTS_REJECTED: &str = "forecasts_rejected_total";
pub const ANOMALIES_FLAGGED: &str = "anomalies_flagged_total";
pub const ALERTS_FIRED: &str = "alerts_fired_total";
pub const ALERTS_SUPPRESSED: &str = "alerts_suppressed_total";
pub const ALERTS_TERMINAL: &str = "alerts_terminal_total";
pub const DELIVERY_ATTEMPTS: &str = "delivery_attempts_total";
pub const DELIVERY_LATENCY: &str = "delivery_latency_seconds";
pub const RETRY_QUEUE_DEPTH: &str = "retry_queue_depth";

/// Registra las descripciones una sola vez al arrancar.
pub fn register_core_metrics() {
    describe_counter!(METRIC_CACHE_HITS, "Metric results served from cache");
    describe_counter!(METRIC_CACHE_MISSES, "Metric results computed on demand");
    describe_counter!(METRIC_CACHE_INVALIDATIONS, "Cache entries invalidated by ingestion");
    describe_counter!(METRIC_CACHE_ERRORS, "Cache failures degraded to recomputation");
    describe_histogram!(METRIC_COMPUTE_LATENCY, Unit::Seconds, "Metric computation latency");
    describe_counter!(BOOKINGS_INGESTED, "Booking records appended to the store");
    describe_counter!(FORECASTS_GENERATED, "Forecast series produced");
    describe_counter!(FORECASTS_REJECTED, "Forecast requests rejected by model preconditions");
    describe_counter!(ANOMALIES_FLAGGED, "Points flagged as anomalous");
    describe_counter!(ALERTS_FIRED, "Alert events created");
    describe_counter!(ALERTS_SUPPRESSED, "Rule firings collapsed into an existing alert");
    describe_counter!(ALERTS_TERMINAL, "Alerts reaching a terminal state");
    describe_counter!(DELIVERY_ATTEMPTS, "Channel delivery attempts by outcome");
    describe_histogram!(DELIVERY_LATENCY, Unit::Seconds, "Channel adapter call latency");
    describe_gauge!(RETRY_QUEUE_DEPTH, "Delivery attempts waiting in the retry queue");
}

pub fn record_cache_hit(metric: &str) {
    counter!(METRIC_CACHE_HITS, "metric" => metric.to_string()).increment(1);
}

pub fn record_cache_miss(metric: &str) {
    counter!(METRIC_CACHE_MISSES, "metric" => metric.to_string()).increment(1);
}

pub fn record_cache_invalidations(count: usize) {
    counter!(METRIC_CACHE_INVALIDATIONS).increment(count as u64);
}

pub fn record_cache_error(op: &'static str) {
    counter!(METRIC_CACHE_ERRORS, "op" => op).increment(1);
}

pub fn record_compute_latency(metric: &str, elapsed: Duration) {
    histogram!(METRIC_COMPUTE_LATENCY, "metric" => metric.to_string()).record(elapsed.as_secs_f64());
}

pub fn record_bookings_ingested(n: usize) {
    counter!(BOOKINGS_INGESTED).increment(n as u64);
}

pub fn record_forecast(model: &str, ok: bool) {
    if ok {
        counter!(FORECASTS_GENERATED, "model" => model.to_string()).increment(1);
    } else {
        counter!(FORECASTS_REJECTED, "model" => model.to_string()).increment(1);
    }
}

pub fn record_anomalies(model: &str, flagged: usize) {
    counter!(ANOMALIES_FLAGGED, "model" => model.to_string()).increment(flagged as u64);
}

pub fn record_alert_fired(severity: Severity) {
    counter!(ALERTS_FIRED, "severity" => severity.as_str()).increment(1);
}

pub fn record_alert_suppressed(severity: Severity) {
    counter!(ALERTS_SUPPRESSED, "severity" => severity.as_str()).increment(1);
}

pub fn record_alert_terminal(state: AlertState) {
    counter!(ALERTS_TERMINAL, "state" => state.as_str()).increment(1);
}

pub fn record_delivery_attempt(channel: ChannelId, outcome: &'static str, elapsed: Duration) {
    counter!(DELIVERY_ATTEMPTS, "channel" => channel.as_str(), "outcome" => outcome).increment(1);
    histogram!(DELIVERY_LATENCY, "channel" => channel.as_str()).record(elapsed.as_secs_f64());
}

pub fn record_retry_queue_depth(depth: usize) {
    gauge!(RETRY_QUEUE_DEPTH).set(depth as f64);
}

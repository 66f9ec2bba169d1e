use crate::idempotency::DecisionKind;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::sync::OnceLock;
use std::time::Instant;

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics emitted by the idempotency core.
///
/// Values go to whichever `metrics` recorder the host process installed.
/// Without one every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_decision(&self, decision: DecisionKind) {
        counter!("idempotency_decisions_total", "decision" => decision.as_str()).increment(1);
    }

    pub fn record_cas(&self, operation: &'static str, applied: bool) {
        let outcome = if applied { "applied" } else { "lost" };
        counter!("idempotency_cas_total", "operation" => operation, "outcome" => outcome).increment(1);
    }

    pub fn record_swept(&self, count: u64) {
        counter!("idempotency_swept_records_total").increment(count);
    }

    pub fn record_store_latency(&self, operation: &'static str, duration_ms: f64) {
        histogram!("idempotency_store_duration_ms", "operation" => operation).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!("idempotency_decisions_total", Unit::Count, "Begin decisions by kind");
    describe_counter!("idempotency_cas_total", Unit::Count, "Lease compare-and-swap outcomes by operation");
    describe_counter!("idempotency_swept_records_total", Unit::Count, "Expired terminal records deleted");
    describe_histogram!("idempotency_store_duration_ms", Unit::Milliseconds, "Store statement latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

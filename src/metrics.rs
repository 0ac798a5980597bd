//! Prometheus metrics for the transfer pool
//!
//! Counters are process-wide and shared by every pool instance.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref READ_BYTES_TOTAL: IntCounter = IntCounter::new(
        "transferbuf_read_bytes_total",
        "Bytes committed into the pool by readers"
    ).unwrap();

    pub static ref WRITTEN_BYTES_TOTAL: IntCounter = IntCounter::new(
        "transferbuf_written_bytes_total",
        "Bytes drained from the pool by writers"
    ).unwrap();

    pub static ref DIGESTED_BYTES_TOTAL: IntCounter = IntCounter::new(
        "transferbuf_digested_bytes_total",
        "Bytes fed to checksum accumulators"
    ).unwrap();

    pub static ref WITHHELD_TOTAL: IntCounter = IntCounter::new(
        "transferbuf_withheld_total",
        "Write acquisitions held back until the checksum caught up"
    ).unwrap();

    pub static ref WAITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("transferbuf_waits_total", "Blocking waits entered"),
        &["side"]
    ).unwrap();

    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("transferbuf_errors_total", "Errors flagged on the pool"),
        &["kind"]
    ).unwrap();

    pub static ref RECONFIGURATIONS_TOTAL: IntCounter = IntCounter::new(
        "transferbuf_reconfigurations_total",
        "Pool (re)configurations"
    ).unwrap();

    pub static ref SLOTS_CONFIGURED: IntGauge = IntGauge::new(
        "transferbuf_slots_configured",
        "Slots in the most recently configured pool"
    ).unwrap();
}

/// Register all metrics with [`METRICS_REGISTRY`]
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(READ_BYTES_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(WRITTEN_BYTES_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(DIGESTED_BYTES_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(WITHHELD_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(WAITS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(ERRORS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(RECONFIGURATIONS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(SLOTS_CONFIGURED.clone())).ok();
}

/// Render registered metrics in Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_after_init() {
        init_metrics();
        // Registering twice is harmless
        init_metrics();

        READ_BYTES_TOTAL.inc_by(3);
        WAITS_TOTAL.with_label_values(&["read"]).inc();

        let text = gather();
        assert!(text.contains("transferbuf_read_bytes_total"));
        assert!(text.contains("transferbuf_waits_total"));
    }
}

use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

const RESPONSES_TOTAL: &str = "inkshot_http_responses_total";

/// Handles for every metric the service records.
///
/// Handles are registered against whatever recorder is installed when
/// [`Metrics::new`] runs; without one they are no-ops.
pub struct Metrics {
    pub captures_succeeded: Counter,
    pub captures_failed: Counter,
    pub capture_timeouts: Counter,
    pub transforms_failed: Counter,
    pub slots_updated: Counter,
    pub cache_set_failures: Counter,
    pub cycles_completed: Counter,
    pub cycle_duration: Histogram,
    pub slots_initialized: Gauge,
    pub responses_ok: Counter,
    pub responses_not_found: Counter,
    pub responses_bad_path: Counter,
    pub response_write_failures: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            captures_succeeded: register_counter!("inkshot_captures_total", "outcome" => "ok"),
            captures_failed: register_counter!("inkshot_captures_total", "outcome" => "error"),
            capture_timeouts: register_counter!("inkshot_capture_timeouts_total"),
            transforms_failed: register_counter!("inkshot_transform_failures_total"),
            slots_updated: register_counter!("inkshot_slots_updated_total"),
            cache_set_failures: register_counter!("inkshot_cache_set_failures_total"),
            cycles_completed: register_counter!("inkshot_cycles_total"),
            cycle_duration: register_histogram!("inkshot_cycle_duration_seconds"),
            slots_initialized: register_gauge!("inkshot_slots_initialized"),
            responses_ok: register_counter!(RESPONSES_TOTAL, "status" => "200"),
            responses_not_found: register_counter!(RESPONSES_TOTAL, "status" => "404"),
            responses_bad_path: register_counter!(RESPONSES_TOTAL, "status" => "500"),
            response_write_failures: register_counter!("inkshot_http_write_failures_total"),
        }
    }

    /// Handles that never record anything, for tests and tools.
    pub fn noop() -> Self {
        Self {
            captures_succeeded: Counter::noop(),
            captures_failed: Counter::noop(),
            capture_timeouts: Counter::noop(),
            transforms_failed: Counter::noop(),
            slots_updated: Counter::noop(),
            cache_set_failures: Counter::noop(),
            cycles_completed: Counter::noop(),
            cycle_duration: Histogram::noop(),
            slots_initialized: Gauge::noop(),
            responses_ok: Counter::noop(),
            responses_not_found: Counter::noop(),
            responses_bad_path: Counter::noop(),
            response_write_failures: Counter::noop(),
        }
    }

    pub fn record_cycle(&self, duration: Duration, initialized_slots: usize) {
        self.cycles_completed.increment(1);
        self.cycle_duration.record(duration.as_secs_f64());
        self.slots_initialized.set(initialized_slots as f64);
    }

    pub fn record_status(&self, status: u16) {
        match status {
            200 => self.responses_ok.increment(1),
            404 => self.responses_not_found.increment(1),
            _ => self.responses_bad_path.increment(1),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global Prometheus recorder with its own scrape listener.
///
/// Must run inside the tokio runtime and before [`Metrics::new`].
pub fn install_prometheus_exporter(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}

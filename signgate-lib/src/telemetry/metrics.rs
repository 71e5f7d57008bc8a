use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

pub mod labels {
    pub const ERROR_TYPE: &str = "error_type";
    pub const WINDOW: &str = "window";
    pub const TIER: &str = "tier";
    pub const REASON: &str = "reason";
    pub const OPERATION: &str = "operation";
    pub const QUEUE: &str = "queue";
    pub const RULE_TYPE: &str = "rule_type";
    pub const STATUS_CODE: &str = "status_code";
    pub const METHOD: &str = "method";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

pub mod values {
    pub const WINDOW_NONE: &str = "none";

    pub const AUTH_INVALID_CREDENTIAL: &str = "invalid_credential";
    pub const AUTH_UNAUTHENTICATED: &str = "unauthenticated";
    pub const AUTH_VALIDATOR_UNAVAILABLE: &str = "validator_unavailable";

    pub const OP_READ: &str = "read";
    pub const OP_INCREMENT: &str = "increment";
    pub const OP_APPEND_OUTCOME: &str = "append_outcome";
    pub const OP_RECENT_OUTCOMES: &str = "recent_outcomes";
    pub const OP_OUTCOME_SUMMARY: &str = "outcome_summary";
    pub const OP_ALERT_WRITE: &str = "alert_write";

    pub const ERROR_SIGNER_UNREACHABLE: &str = "signer_unreachable";
    pub const ERROR_SIGNER_TIMEOUT: &str = "signer_timeout";
    pub const ERROR_NOTIFICATION: &str = "notification";
}

#[derive(Clone)]
pub struct Metrics {
    pub connections_total: Counter<u64>,
    pub connections_active: UpDownCounter<i64>,

    pub requests_total: Counter<u64>,

    // Limiter decisions
    pub decisions_allowed_total: Counter<u64>,
    pub decisions_denied_total: Counter<u64>,
    pub decisions_degraded_total: Counter<u64>,

    pub auth_failures_total: Counter<u64>,

    // Accounting
    pub accounting_writes_total: Counter<u64>,
    pub background_jobs_dropped_total: Counter<u64>,

    pub store_errors_total: Counter<u64>,

    pub alerts_fired_total: Counter<u64>,

    // Upstream signer
    pub signer_duration_seconds: Histogram<f64>,
    pub signer_errors_total: Counter<u64>,

    pub errors_total: Counter<u64>,

    // Build info
    pub build_info: Gauge<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            connections_total: meter
                .u64_counter("signgate_connections_total")
                .with_description("Total number of connections established")
                .build(),
            connections_active: meter
                .i64_up_down_counter("signgate_connections_active")
                .with_description("Number of active connections")
                .build(),

            requests_total: meter
                .u64_counter("signgate_requests_total")
                .with_description("Total number of requests processed")
                .build(),

            decisions_allowed_total: meter
                .u64_counter("signgate_decisions_allowed_total")
                .with_description("Total number of rate limit decisions that allowed the request")
                .build(),
            decisions_denied_total: meter
                .u64_counter("signgate_decisions_denied_total")
                .with_description("Total number of rate limit decisions that denied the request (429)")
                .build(),
            decisions_degraded_total: meter
                .u64_counter("signgate_decisions_degraded_total")
                .with_description("Total number of decisions made while the quota store was unreachable")
                .build(),

            auth_failures_total: meter
                .u64_counter("signgate_auth_failures_total")
                .with_description("Total number of requests rejected during identity resolution")
                .build(),

            accounting_writes_total: meter
                .u64_counter("signgate_accounting_writes_total")
                .with_description("Total number of outcomes fully written to the quota store")
                .build(),
            background_jobs_dropped_total: meter
                .u64_counter("signgate_background_jobs_dropped_total")
                .with_description("Total number of best-effort jobs dropped because the queue was full or closed")
                .build(),

            store_errors_total: meter
                .u64_counter("signgate_store_errors_total")
                .with_description("Total number of failed quota store operations")
                .build(),

            alerts_fired_total: meter
                .u64_counter("signgate_alerts_fired_total")
                .with_description("Total number of alerts raised by the evaluator")
                .build(),

            signer_duration_seconds: meter
                .f64_histogram("signgate_signer_duration_seconds")
                .with_description("Upstream signer request duration in seconds")
                .build(),
            signer_errors_total: meter
                .u64_counter("signgate_signer_errors_total")
                .with_description("Total number of failed upstream signer requests")
                .build(),

            errors_total: meter
                .u64_counter("signgate_errors_total")
                .with_description("Total number of errors")
                .build(),

            build_info: meter
                .u64_gauge("signgate_build_info")
                .with_description("Build information (version, rust version)")
                .build(),
        }
    }

    /// Set build info metric with version labels
    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");

        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_decision_allowed(&self, tier: &str) {
        self.decisions_allowed_total.add(
            1,
            &[
                KeyValue::new(labels::WINDOW, values::WINDOW_NONE),
                KeyValue::new(labels::TIER, tier.to_string()),
            ],
        );
    }

    pub fn record_decision_denied(&self, window: &str, tier: &str) {
        self.decisions_denied_total.add(
            1,
            &[
                KeyValue::new(labels::WINDOW, window.to_string()),
                KeyValue::new(labels::TIER, tier.to_string()),
            ],
        );
    }

    pub fn record_decision_degraded(&self, tier: &str) {
        self.decisions_degraded_total
            .add(1, &[KeyValue::new(labels::TIER, tier.to_string())]);
    }

    pub fn record_auth_failure(&self, reason: &str) {
        self.auth_failures_total
            .add(1, &[KeyValue::new(labels::REASON, reason.to_string())]);
    }

    pub fn record_accounting_write(&self) {
        self.accounting_writes_total.add(1, &[]);
    }

    pub fn record_background_drop(&self, queue: &str) {
        self.background_jobs_dropped_total
            .add(1, &[KeyValue::new(labels::QUEUE, queue.to_string())]);
    }

    pub fn record_store_error(&self, operation: &str) {
        self.store_errors_total
            .add(1, &[KeyValue::new(labels::OPERATION, operation.to_string())]);
    }

    pub fn record_alert_fired(&self, rule_type: &str) {
        self.alerts_fired_total
            .add(1, &[KeyValue::new(labels::RULE_TYPE, rule_type.to_string())]);
    }

    pub fn record_signer_duration(&self, duration: f64, status_code: u16) {
        self.signer_duration_seconds.record(
            duration,
            &[KeyValue::new(labels::STATUS_CODE, status_code.to_string())],
        );
    }

    pub fn record_signer_error(&self, error_type: &str) {
        self.signer_errors_total
            .add(1, &[KeyValue::new(labels::ERROR_TYPE, error_type.to_string())]);
    }

    pub fn record_request(&self, method: &str, status_code: u16) {
        self.requests_total.add(
            1,
            &[
                KeyValue::new(labels::METHOD, method.to_string()),
                KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
            ],
        );
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new(labels::ERROR_TYPE, error_type.to_string())]);
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("signgate");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}

/// Metrics bound to a no-op meter, for tests and embedded use
pub fn noop_metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new(global::meter("signgate-noop")))
}

//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Process-wide metrics registry
pub struct Metrics {
    registry: Registry,

    // Submission lifecycle
    pub submissions_total: IntCounter,
    pub confirmations_total: IntCounter,
    pub failures_total: IntCounterVec,
    pub timeouts_total: IntCounter,
    pub freshness_rebuilds: IntCounter,

    // Ledger access
    pub rpc_retries: IntCounter,
    pub endpoint_rotations: IntCounter,

    // Swap quotes
    pub quotes_applied: IntCounter,
    pub quotes_discarded: IntCounter,

    // Webhooks
    pub webhooks_delivered: IntCounter,
    pub webhooks_failed: IntCounter,

    // Histograms
    pub confirmation_latency: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("walletflow".to_string()), None)?;

        let submissions_total = IntCounter::with_opts(Opts::new(
            "submissions_total",
            "Signed transactions handed to the ledger",
        ))?;

        let confirmations_total = IntCounter::with_opts(Opts::new(
            "confirmations_total",
            "Submissions that reached the configured commitment",
        ))?;

        let failures_total = IntCounterVec::new(
            Opts::new("failures_total", "Failed user actions by error kind"),
            &["kind"],
        )?;

        let timeouts_total = IntCounter::with_opts(Opts::new(
            "timeouts_total",
            "Submissions without a terminal status inside the polling window",
        ))?;

        let freshness_rebuilds = IntCounter::with_opts(Opts::new(
            "freshness_rebuilds_total",
            "Transactions rebuilt after the freshness token expired",
        ))?;

        let rpc_retries = IntCounter::with_opts(Opts::new(
            "rpc_retries_total",
            "Ledger reads retried after a transient error",
        ))?;

        let endpoint_rotations = IntCounter::with_opts(Opts::new(
            "endpoint_rotations_total",
            "Failovers to the next ledger endpoint",
        ))?;

        let quotes_applied = IntCounter::with_opts(Opts::new(
            "quotes_applied_total",
            "Quotes that reached the swap session",
        ))?;

        let quotes_discarded = IntCounter::with_opts(Opts::new(
            "quotes_discarded_total",
            "Quotes dropped because a newer edit superseded them",
        ))?;

        let webhooks_delivered = IntCounter::with_opts(Opts::new(
            "webhooks_delivered_total",
            "Payment callbacks acknowledged by the receiver",
        ))?;

        let webhooks_failed = IntCounter::with_opts(Opts::new(
            "webhooks_failed_total",
            "Payment callbacks that failed",
        ))?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from submission to confirmation",
            )
            .buckets(vec![0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 30.0]),
        )?;

        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(confirmations_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(timeouts_total.clone()))?;
        registry.register(Box::new(freshness_rebuilds.clone()))?;
        registry.register(Box::new(rpc_retries.clone()))?;
        registry.register(Box::new(endpoint_rotations.clone()))?;
        registry.register(Box::new(quotes_applied.clone()))?;
        registry.register(Box::new(quotes_discarded.clone()))?;
        registry.register(Box::new(webhooks_delivered.clone()))?;
        registry.register(Box::new(webhooks_failed.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            submissions_total,
            confirmations_total,
            failures_total,
            timeouts_total,
            freshness_rebuilds,
            rpc_retries,
            endpoint_rotations,
            quotes_applied,
            quotes_discarded,
            webhooks_delivered,
            webhooks_failed,
            confirmation_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count a failed action under its error kind label
    pub fn record_failure(&self, kind: &str) {
        self.failures_total.with_label_values(&[kind]).inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for the runtime
// ============================================================================
//
// Provides metrics for:
// - Event store saves (persisted events, failures, latency)
// - Dispatcher deliveries (per event type) and handler failures
// - Unit of work commit outcomes
//
// Components take an optional `Arc<Metrics>`; nothing is recorded without one.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Event Store Metrics
    pub events_persisted_total: IntCounter,
    pub store_save_failures_total: IntCounter,
    pub store_save_duration: Histogram,

    // Dispatcher Metrics
    pub events_dispatched_total: IntCounterVec,
    pub handler_failures_total: IntCounterVec,

    // Unit of Work Metrics
    pub unit_of_work_commits_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_persisted_total = IntCounter::with_opts(Opts::new(
            "events_persisted_total",
            "Total events durably written by the event store",
        ))?;
        registry.register(Box::new(events_persisted_total.clone()))?;

        let store_save_failures_total = IntCounter::with_opts(Opts::new(
            "store_save_failures_total",
            "Total event store saves that were rolled back",
        ))?;
        registry.register(Box::new(store_save_failures_total.clone()))?;

        let store_save_duration = Histogram::with_opts(HistogramOpts::new(
            "store_save_duration_seconds",
            "Event store save duration",
        ))?;
        registry.register(Box::new(store_save_duration.clone()))?;

        let events_dispatched_total = IntCounterVec::new(
            Opts::new("events_dispatched_total", "Total envelopes handed to the dispatcher"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_dispatched_total.clone()))?;

        let handler_failures_total = IntCounterVec::new(
            Opts::new("handler_failures_total", "Total failed handler deliveries"),
            &["handler"],
        )?;
        registry.register(Box::new(handler_failures_total.clone()))?;

        let unit_of_work_commits_total = IntCounterVec::new(
            Opts::new("unit_of_work_commits_total", "Unit of work commits by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(unit_of_work_commits_total.clone()))?;

        Ok(Self {
            registry,
            events_persisted_total,
            store_save_failures_total,
            store_save_duration,
            events_dispatched_total,
            handler_failures_total,
            unit_of_work_commits_total,
        })
    }

    /// Get the Prometheus registry for exposing metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Helper to record an event store save
    pub fn record_save(&self, event_count: usize, duration_secs: f64, success: bool) {
        if success {
            self.events_persisted_total.inc_by(event_count as u64);
        } else {
            self.store_save_failures_total.inc();
        }
        self.store_save_duration.observe(duration_secs);
    }

    pub fn record_dispatch(&self, event_type: &str) {
        self.events_dispatched_total.with_label_values(&[event_type]).inc();
    }

    pub fn record_handler_failure(&self, handler: &str) {
        self.handler_failures_total.with_label_values(&[handler]).inc();
    }

    /// outcome: "committed", "empty", "store_failed", "dispatch_failed"
    pub fn record_commit(&self, outcome: &str) {
        self.unit_of_work_commits_total.with_label_values(&[outcome]).inc();
    }
}

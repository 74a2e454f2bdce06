//! Prometheus metrics for mqtt2opcua
//!
//! Counts what the bridge does with each message and each namespace access.
//! Exposed at /metrics when `metrics.enabled` is set.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

mod server;

pub use server::MetricsServer;

/// All bridge metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Bus side
    pub messages_received: IntCounter,
    pub messages_unroutable: IntCounter,
    pub publishes_sent: IntCounter,
    pub publishes_dropped: IntCounter,

    // Conversion failures by direction
    pub conversion_failures: IntCounterVec,

    // Address space
    pub folders_created: IntCounter,
    pub variables_current: IntGauge,
    pub node_failures: IntCounter,

    // Namespace access
    pub reads_total: IntCounter,
    pub reads_pending: IntCounter,
    pub writes_total: IntCounter,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_received = counter(
            "mqtt2opcua_messages_received_total",
            "Total messages received from the bus",
        )?;
        let messages_unroutable = counter(
            "mqtt2opcua_messages_unroutable_total",
            "Messages dropped because no forward handler matched",
        )?;
        let publishes_sent = counter(
            "mqtt2opcua_publishes_sent_total",
            "Messages handed to the bus client",
        )?;
        let publishes_dropped = counter(
            "mqtt2opcua_publishes_dropped_total",
            "Messages dropped because the bus client was busy or gone",
        )?;
        let conversion_failures = IntCounterVec::new(
            Opts::new(
                "mqtt2opcua_conversion_failures_total",
                "Converter failures by direction",
            ),
            &["direction"],
        )?;
        let folders_created = counter(
            "mqtt2opcua_folders_created_total",
            "Folders created in the address space",
        )?;
        let variables_current = IntGauge::with_opts(Opts::new(
            "mqtt2opcua_variables_current",
            "Variables present in the address space",
        ))?;
        let node_failures = counter(
            "mqtt2opcua_node_failures_total",
            "Failed folder or variable creations",
        )?;
        let reads_total = counter(
            "mqtt2opcua_reads_total",
            "Variable reads served through the callbacks",
        )?;
        let reads_pending = counter(
            "mqtt2opcua_reads_pending_total",
            "Reads answered with BadCommunicationError while awaiting confirmation",
        )?;
        let writes_total = counter(
            "mqtt2opcua_writes_total",
            "Variable writes received through the callbacks",
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_unroutable.clone()))?;
        registry.register(Box::new(publishes_sent.clone()))?;
        registry.register(Box::new(publishes_dropped.clone()))?;
        registry.register(Box::new(conversion_failures.clone()))?;
        registry.register(Box::new(folders_created.clone()))?;
        registry.register(Box::new(variables_current.clone()))?;
        registry.register(Box::new(node_failures.clone()))?;
        registry.register(Box::new(reads_total.clone()))?;
        registry.register(Box::new(reads_pending.clone()))?;
        registry.register(Box::new(writes_total.clone()))?;

        Ok(Metrics {
            registry,
            messages_received,
            messages_unroutable,
            publishes_sent,
            publishes_dropped,
            conversion_failures,
            folders_created,
            variables_current,
            node_failures,
            reads_total,
            reads_pending,
            writes_total,
        })
    }

    pub fn conversion_failed(&self, direction: &str) {
        self.conversion_failures
            .with_label_values(&[direction])
            .inc();
    }

    pub fn nodes_created(&self, folders: usize) {
        self.folders_created.inc_by(folders as u64);
        self.variables_current.inc();
    }
}

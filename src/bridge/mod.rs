//! Bridge runtime
//!
//! Wires bus messages to the handler table, the address space builder and the
//! variable store, and publishes the messages produced by namespace writes.
//!
//! Bus messages and namespace callbacks may arrive on different threads. One
//! mutex over the store and the builder serializes them; publishing happens
//! after it is released.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::builder::AddressSpaceBuilder;
use crate::bus::{MessageCallback, Publisher};
use crate::config::BridgeConfig;
use crate::convert::{DataType, PublishRequest, Variant};
use crate::dispatch::Handlers;
use crate::metrics::Metrics;
use crate::namespace::{Namespace, StatusCode, VariableCallbacks};
use crate::store::{EntryState, Observed, ReadFailure, VariableStore, WriteOutcome};


struct BridgeState {
    store: VariableStore,
    builder: AddressSpaceBuilder,
}

struct BridgeInner {
    handlers: Handlers,
    namespace: Arc<dyn Namespace>,
    publisher: Arc<dyn Publisher>,
    metrics: Option<Arc<Metrics>>,
    state: Mutex<BridgeState>,
}

/// Callbacks attached to every variable node
///
/// Holds the runtime weakly so the namespace does not keep it alive.
struct Access(Weak<BridgeInner>);

impl VariableCallbacks for Access {
    fn get(&self, topic: &str) -> Result<Variant, StatusCode> {
        match self.0.upgrade() {
            Some(inner) => inner.get(topic),
            None => Err(StatusCode::BadCommunicationError),
        }
    }

    fn set(&self, topic: &str, value: Variant) -> StatusCode {
        match self.0.upgrade() {
            Some(inner) => inner.set(topic, value),
            None => StatusCode::BadCommunicationError,
        }
    }
}

/// The bridging engine
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
    callbacks: Arc<dyn VariableCallbacks>,
}

impl Bridge {
    pub fn new(
        handlers: Handlers,
        namespace: Arc<dyn Namespace>,
        publisher: Arc<dyn Publisher>,
        config: &BridgeConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let store =
            VariableStore::new(config.roundtrip).with_roundtrip_timeout(config.roundtrip_timeout);
        let inner = Arc::new(BridgeInner {
            handlers,
            namespace,
            publisher,
            metrics,
            state: Mutex::new(BridgeState {
                store,
                builder: AddressSpaceBuilder::new(),
            }),
        });
        let callbacks: Arc<dyn VariableCallbacks> = Arc::new(Access(Arc::downgrade(&inner)));
        Self { inner, callbacks }
    }

    /// Callback to hand to the bus client
    pub fn message_callback(&self) -> MessageCallback {
        let bridge = self.clone();
        Arc::new(move |topic: &str, payload: Bytes| bridge.on_message(topic, payload))
    }

    /// Handle one inbound bus message
    ///
    /// The payload is converted before it is cached. A known topic only
    /// refreshes the cache. The first accepted message on a topic fixes its
    /// data type and creates its nodes; if that fails the topic keeps its
    /// cache entry and is not retried.
    pub fn on_message(&self, topic: &str, payload: Bytes) {
        let inner = &self.inner;
        if let Some(metrics) = &inner.metrics {
            metrics.messages_received.inc();
        }

        let len = payload.len();
        let mut state = inner.state.lock();
        let data_type = match state.store.observe(topic, payload, &inner.handlers) {
            Ok(Observed::Updated) => {
                debug!("Update {} ({} bytes)", topic, len);
                return;
            }
            Ok(Observed::New(data_type)) => data_type,
            Err(ReadFailure::Unroutable) => {
                warn!("No forward handler for {}, dropping message", topic);
                if let Some(metrics) = &inner.metrics {
                    metrics.messages_unroutable.inc();
                }
                return;
            }
            Err(failure) => {
                warn!("Dropping message on {}: {}", topic, failure);
                if let Some(metrics) = &inner.metrics {
                    metrics.conversion_failed("forward");
                }
                return;
            }
        };

        let folders_before = state.builder.folder_count();
        let result = state.builder.ensure_node(
            inner.namespace.as_ref(),
            topic,
            data_type,
            self.callbacks.clone(),
        );
        let folders = state.builder.folder_count() - folders_before;
        drop(state);

        match result {
            Ok(node_id) => {
                debug!("New variable {} for {} ({})", node_id, topic, data_type);
                if let Some(metrics) = &inner.metrics {
                    metrics.nodes_created(folders);
                }
            }
            Err(e) => {
                warn!("Could not add {} to the address space: {}", topic, e);
                if let Some(metrics) = &inner.metrics {
                    metrics.folders_created.inc_by(folders as u64);
                    metrics.node_failures.inc();
                }
            }
        }
    }

    pub fn roundtrip(&self) -> bool {
        self.inner.state.lock().store.roundtrip()
    }

    pub fn variable_count(&self) -> usize {
        self.inner.state.lock().builder.variable_count()
    }

    pub fn folder_count(&self) -> usize {
        self.inner.state.lock().builder.folder_count()
    }

    /// Data type fixed by the first accepted message on a topic
    pub fn data_type(&self, topic: &str) -> Option<DataType> {
        self.inner.state.lock().store.data_type(topic)
    }

    /// Acknowledgement state of a topic's cache entry
    pub fn entry_state(&self, topic: &str) -> Option<EntryState> {
        self.inner.state.lock().store.state(topic)
    }
}

impl BridgeInner {
    fn get(&self, topic: &str) -> Result<Variant, StatusCode> {
        if let Some(metrics) = &self.metrics {
            metrics.reads_total.inc();
        }

        let result = self.state.lock().store.read(topic, &self.handlers);
        result.map_err(|failure| {
            match &failure {
                ReadFailure::Pending => {
                    debug!("Read of {} while awaiting confirmation", topic);
                    if let Some(metrics) = &self.metrics {
                        metrics.reads_pending.inc();
                    }
                }
                ReadFailure::Conversion(_) => {
                    warn!("Read of {} failed: {}", topic, failure);
                    if let Some(metrics) = &self.metrics {
                        metrics.conversion_failed("forward");
                    }
                }
                ReadFailure::Unknown | ReadFailure::Unroutable => {
                    warn!("Read of {} failed: {}", topic, failure);
                }
            }
            failure.status()
        })
    }

    fn set(&self, topic: &str, value: Variant) -> StatusCode {
        if let Some(metrics) = &self.metrics {
            metrics.writes_total.inc();
        }

        let outcome = self.state.lock().store.write(topic, value, &self.handlers);
        match outcome {
            WriteOutcome::Publish(message) => self.publish(message),
            WriteOutcome::Skipped => debug!("Write to {} produced no message", topic),
            WriteOutcome::Unroutable => warn!("No backward handler for {}", topic),
            WriteOutcome::Failed(e) => {
                warn!("Write to {} not published: {}", topic, e);
                if let Some(metrics) = &self.metrics {
                    metrics.conversion_failed("backward");
                }
            }
        }

        // Converter failures are only logged; the write itself succeeded.
        StatusCode::Good
    }

    fn publish(&self, message: PublishRequest) {
        let PublishRequest { topic, payload } = message;
        match self.publisher.publish(&topic, payload) {
            Ok(()) => {
                debug!("Published write to {}", topic);
                if let Some(metrics) = &self.metrics {
                    metrics.publishes_sent.inc();
                }
            }
            Err(e) => {
                warn!("Dropped publish to {}: {}", topic, e);
                if let Some(metrics) = &self.metrics {
                    metrics.publishes_dropped.inc();
                }
            }
        }
    }
}

//! mqtt2opcua - bridge between an MQTT bus and an OPC UA style address space
//!
//! Messages on the bus are converted into typed values and exposed as
//! variables in a folder tree mirroring the topic hierarchy. Writes to those
//! variables are converted back into bus messages.

pub mod bridge;
pub mod builder;
pub mod bus;
pub mod codec;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod metrics;
pub mod namespace;
pub mod protocol;
pub mod store;
pub mod topic;

pub use bridge::Bridge;
pub use bus::{BusError, MqttClient, Publisher};
pub use config::Config;
pub use convert::{DataType, Variant};
pub use dispatch::{HandlerRegistry, Handlers};
pub use metrics::{Metrics, MetricsServer};
pub use namespace::{MemoryNamespace, Namespace, NodeId, StatusCode, VariableCallbacks};

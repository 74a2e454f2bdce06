//! Namespace engine interface
//!
//! The bridge talks to the hierarchical address space only through the
//! [`Namespace`] trait, and the address space talks back only through
//! [`VariableCallbacks`]. [`MemoryNamespace`] is the in-process engine used by
//! the binary and the tests.

mod memory;

use std::fmt;
use std::sync::Arc;

use crate::convert::{DataType, Variant};

pub use memory::{MemoryNamespace, NodeClass, NodeInfo};

/// Status codes returned to namespace clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Good,
    /// Value is unavailable or pending confirmation by the device
    BadCommunicationError,
    BadNodeIdUnknown,
    BadNodeIdExists,
    BadBrowseNameInvalid,
    BadBrowseNameDuplicated,
    BadTypeMismatch,
    BadNotWritable,
    BadNotReadable,
}

impl StatusCode {
    pub fn is_good(self) -> bool {
        self == StatusCode::Good
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    Numeric(u32),
    String(Arc<str>),
}

impl NodeId {
    /// The standard Objects folder, root of everything the bridge creates
    pub const OBJECTS_FOLDER: NodeId = NodeId::Numeric(85);

    pub fn string(id: &str) -> Self {
        NodeId::String(id.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Numeric(id) => write!(f, "i={}", id),
            NodeId::String(id) => write!(f, "s={}", id),
        }
    }
}

/// Errors raised by the namespace engine when creating nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceError {
    pub status: StatusCode,
    pub message: String,
}

impl NamespaceError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for NamespaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for NamespaceError {}

/// Read/write capability attached to a variable node
///
/// Implemented by the bridge, invoked by the namespace engine whenever one of
/// its clients reads or writes the variable bound to `topic`.
pub trait VariableCallbacks: Send + Sync {
    /// Current value of the variable
    fn get(&self, topic: &str) -> Result<Variant, StatusCode>;

    /// External write to the variable
    fn set(&self, topic: &str, value: Variant) -> StatusCode;
}

/// Description of a variable node to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSpec {
    pub browse_name: String,
    pub node_id: NodeId,
    pub data_type: DataType,
    /// Topic passed back to the callbacks
    pub topic: String,
}

/// Hierarchical namespace engine
pub trait Namespace: Send + Sync {
    /// Create a folder below `parent`
    fn create_folder(&self, parent: &NodeId, browse_name: &str) -> Result<NodeId, NamespaceError>;

    /// Create a variable below `parent`, bound to `callbacks`
    fn create_variable(
        &self,
        parent: &NodeId,
        spec: VariableSpec,
        callbacks: Arc<dyn VariableCallbacks>,
    ) -> Result<NodeId, NamespaceError>;
}

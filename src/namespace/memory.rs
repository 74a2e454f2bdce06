//! In-process address space
//!
//! Keeps folders and variables in a node table behind a `RwLock`. Browse names
//! are unique per parent and string node ids are unique overall, mirroring the
//! rejections a real address space server produces.
//!
//! Variable callbacks are always invoked after the table lock is released, so
//! a callback may take its own locks without ordering constraints against this
//! table.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{Namespace, NamespaceError, NodeId, StatusCode, VariableCallbacks, VariableSpec};
use crate::convert::{DataType, Variant};
use crate::topic::SEPARATOR;

/// First numeric id handed out to created folders
const FIRST_NUMERIC_ID: u32 = 1000;

/// Node class as seen by browsing clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Folder,
    Variable,
}

/// Browse result entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub browse_name: String,
    pub class: NodeClass,
    pub data_type: Option<DataType>,
}

enum NodeKind {
    Folder,
    Variable {
        data_type: DataType,
        topic: String,
        callbacks: Arc<dyn VariableCallbacks>,
    },
}

struct Node {
    browse_name: String,
    children: Vec<NodeId>,
    kind: NodeKind,
}

impl Node {
    fn info(&self, node_id: &NodeId) -> NodeInfo {
        let (class, data_type) = match &self.kind {
            NodeKind::Folder => (NodeClass::Folder, None),
            NodeKind::Variable { data_type, .. } => (NodeClass::Variable, Some(*data_type)),
        };
        NodeInfo {
            node_id: node_id.clone(),
            browse_name: self.browse_name.clone(),
            class,
            data_type,
        }
    }
}

struct Inner {
    nodes: AHashMap<NodeId, Node>,
    next_id: u32,
    folders: usize,
    variables: usize,
}

impl Inner {
    /// Check that `browse_name` can be added below `parent`
    fn check_child(&self, parent: &NodeId, browse_name: &str) -> Result<(), NamespaceError> {
        if browse_name.is_empty() {
            return Err(NamespaceError::new(
                StatusCode::BadBrowseNameInvalid,
                format!("empty browse name below {}", parent),
            ));
        }

        let parent_node = self.nodes.get(parent).ok_or_else(|| {
            NamespaceError::new(StatusCode::BadNodeIdUnknown, format!("no parent {}", parent))
        })?;

        let duplicate = parent_node.children.iter().any(|child| {
            self.nodes
                .get(child)
                .is_some_and(|node| node.browse_name == browse_name)
        });
        if duplicate {
            return Err(NamespaceError::new(
                StatusCode::BadBrowseNameDuplicated,
                format!("{} already has a child named {:?}", parent, browse_name),
            ));
        }

        Ok(())
    }

    fn attach(&mut self, parent: &NodeId, node_id: NodeId, node: Node) {
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.push(node_id.clone());
        }
        self.nodes.insert(node_id, node);
    }
}

/// Address space held in memory
pub struct MemoryNamespace {
    inner: RwLock<Inner>,
}

impl MemoryNamespace {
    pub fn new() -> Self {
        let mut nodes = AHashMap::new();
        nodes.insert(
            NodeId::OBJECTS_FOLDER,
            Node {
                browse_name: "Objects".to_string(),
                children: Vec::new(),
                kind: NodeKind::Folder,
            },
        );

        Self {
            inner: RwLock::new(Inner {
                nodes,
                next_id: FIRST_NUMERIC_ID,
                folders: 0,
                variables: 0,
            }),
        }
    }

    /// Number of folders created (the Objects folder is not counted)
    pub fn folder_count(&self) -> usize {
        self.inner.read().folders
    }

    /// Number of variables created
    pub fn variable_count(&self) -> usize {
        self.inner.read().variables
    }

    /// Describe a single node
    pub fn node(&self, node_id: &NodeId) -> Option<NodeInfo> {
        self.inner.read().nodes.get(node_id).map(|n| n.info(node_id))
    }

    /// List the children of a node in creation order
    pub fn browse(&self, node_id: &NodeId) -> Result<Vec<NodeInfo>, StatusCode> {
        let inner = self.inner.read();
        let node = inner.nodes.get(node_id).ok_or(StatusCode::BadNodeIdUnknown)?;
        Ok(node
            .children
            .iter()
            .filter_map(|child| inner.nodes.get(child).map(|n| n.info(child)))
            .collect())
    }

    /// Resolve a `/`-separated browse path starting below the Objects folder
    pub fn resolve_path(&self, path: &str) -> Option<NodeId> {
        let inner = self.inner.read();
        let mut current = NodeId::OBJECTS_FOLDER;

        for name in path.split(SEPARATOR).filter(|s| !s.is_empty()) {
            let node = inner.nodes.get(&current)?;
            current = node
                .children
                .iter()
                .find(|child| {
                    inner
                        .nodes
                        .get(*child)
                        .is_some_and(|n| n.browse_name == name)
                })?
                .clone();
        }

        Some(current)
    }

    /// Read a variable's value through its callbacks
    pub fn read(&self, node_id: &NodeId) -> Result<Variant, StatusCode> {
        let (topic, callbacks) = self.binding(node_id).ok_or(StatusCode::BadNotReadable)?;
        debug!("Namespace read: {}", node_id);
        callbacks.get(&topic)
    }

    /// Write a variable's value through its callbacks
    ///
    /// The value must carry the variable's declared data type.
    pub fn write(&self, node_id: &NodeId, value: Variant) -> StatusCode {
        let declared = match self.node(node_id) {
            Some(NodeInfo {
                data_type: Some(data_type),
                ..
            }) => data_type,
            Some(_) => return StatusCode::BadNotWritable,
            None => return StatusCode::BadNodeIdUnknown,
        };
        if value.data_type() != declared {
            return StatusCode::BadTypeMismatch;
        }

        let Some((topic, callbacks)) = self.binding(node_id) else {
            return StatusCode::BadNotWritable;
        };
        debug!("Namespace write: {} = {}", node_id, value);
        callbacks.set(&topic, value)
    }

    /// Clone a variable's topic and callbacks out of the table
    fn binding(&self, node_id: &NodeId) -> Option<(String, Arc<dyn VariableCallbacks>)> {
        let inner = self.inner.read();
        match &inner.nodes.get(node_id)?.kind {
            NodeKind::Variable {
                topic, callbacks, ..
            } => Some((topic.clone(), callbacks.clone())),
            NodeKind::Folder => None,
        }
    }
}

impl Default for MemoryNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace for MemoryNamespace {
    fn create_folder(&self, parent: &NodeId, browse_name: &str) -> Result<NodeId, NamespaceError> {
        let mut inner = self.inner.write();
        inner.check_child(parent, browse_name)?;

        let node_id = NodeId::Numeric(inner.next_id);
        inner.next_id += 1;
        inner.folders += 1;
        inner.attach(
            parent,
            node_id.clone(),
            Node {
                browse_name: browse_name.to_string(),
                children: Vec::new(),
                kind: NodeKind::Folder,
            },
        );

        Ok(node_id)
    }

    fn create_variable(
        &self,
        parent: &NodeId,
        spec: VariableSpec,
        callbacks: Arc<dyn VariableCallbacks>,
    ) -> Result<NodeId, NamespaceError> {
        let mut inner = self.inner.write();
        inner.check_child(parent, &spec.browse_name)?;

        if inner.nodes.contains_key(&spec.node_id) {
            return Err(NamespaceError::new(
                StatusCode::BadNodeIdExists,
                format!("node {} already exists", spec.node_id),
            ));
        }

        inner.variables += 1;
        inner.attach(
            parent,
            spec.node_id.clone(),
            Node {
                browse_name: spec.browse_name,
                children: Vec::new(),
                kind: NodeKind::Variable {
                    data_type: spec.data_type,
                    topic: spec.topic,
                    callbacks,
                },
            },
        );

        Ok(spec.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Callbacks holding a single value
    struct Cell(Mutex<Variant>);

    impl VariableCallbacks for Cell {
        fn get(&self, _topic: &str) -> Result<Variant, StatusCode> {
            Ok(self.0.lock().clone())
        }

        fn set(&self, _topic: &str, value: Variant) -> StatusCode {
            *self.0.lock() = value;
            StatusCode::Good
        }
    }

    fn spec(name: &str, topic: &str) -> VariableSpec {
        VariableSpec {
            browse_name: name.to_string(),
            node_id: NodeId::string(topic),
            data_type: DataType::Double,
            topic: topic.to_string(),
        }
    }

    #[test]
    fn test_folder_names_unique_per_parent() {
        let ns = MemoryNamespace::new();
        let a = ns.create_folder(&NodeId::OBJECTS_FOLDER, "a").unwrap();
        ns.create_folder(&a, "b").unwrap();

        let err = ns.create_folder(&a, "b").unwrap_err();
        assert_eq!(err.status, StatusCode::BadBrowseNameDuplicated);

        // Same name under another parent is fine
        ns.create_folder(&NodeId::OBJECTS_FOLDER, "b").unwrap();
        assert_eq!(ns.folder_count(), 3);
    }

    #[test]
    fn test_rejects_empty_name_and_unknown_parent() {
        let ns = MemoryNamespace::new();
        let err = ns.create_folder(&NodeId::OBJECTS_FOLDER, "").unwrap_err();
        assert_eq!(err.status, StatusCode::BadBrowseNameInvalid);

        let err = ns.create_folder(&NodeId::Numeric(4242), "x").unwrap_err();
        assert_eq!(err.status, StatusCode::BadNodeIdUnknown);
    }

    #[test]
    fn test_read_write_through_callbacks() {
        let ns = MemoryNamespace::new();
        let cell = Arc::new(Cell(Mutex::new(Variant::Double(1.0))));
        let id = ns
            .create_variable(&NodeId::OBJECTS_FOLDER, spec("level", "level"), cell)
            .unwrap();

        assert_eq!(ns.read(&id), Ok(Variant::Double(1.0)));
        assert_eq!(ns.write(&id, Variant::Double(2.0)), StatusCode::Good);
        assert_eq!(ns.read(&id), Ok(Variant::Double(2.0)));

        assert_eq!(
            ns.write(&id, Variant::String("2".to_string())),
            StatusCode::BadTypeMismatch
        );
    }

    #[test]
    fn test_folders_are_not_readable() {
        let ns = MemoryNamespace::new();
        let folder = ns.create_folder(&NodeId::OBJECTS_FOLDER, "plant").unwrap();

        assert_eq!(ns.read(&folder), Err(StatusCode::BadNotReadable));
        assert_eq!(ns.write(&folder, Variant::Double(1.0)), StatusCode::BadNotWritable);
    }

    #[test]
    fn test_duplicate_string_node_id() {
        let ns = MemoryNamespace::new();
        let cell = Arc::new(Cell(Mutex::new(Variant::Double(0.0))));
        let folder = ns.create_folder(&NodeId::OBJECTS_FOLDER, "f").unwrap();

        ns.create_variable(&NodeId::OBJECTS_FOLDER, spec("x", "x"), cell.clone())
            .unwrap();
        let err = ns.create_variable(&folder, spec("x", "x"), cell).unwrap_err();
        assert_eq!(err.status, StatusCode::BadNodeIdExists);
    }

    #[test]
    fn test_browse_and_resolve_path() {
        let ns = MemoryNamespace::new();
        let cell = Arc::new(Cell(Mutex::new(Variant::Double(0.0))));
        let a = ns.create_folder(&NodeId::OBJECTS_FOLDER, "a").unwrap();
        let var = ns.create_variable(&a, spec("b", "a/b"), cell).unwrap();

        let children = ns.browse(&a).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].browse_name, "b");
        assert_eq!(children[0].class, NodeClass::Variable);
        assert_eq!(children[0].data_type, Some(DataType::Double));

        assert_eq!(ns.resolve_path("a/b"), Some(var));
        assert_eq!(ns.resolve_path("/a"), Some(a));
        assert_eq!(ns.resolve_path("a/c"), None);
    }
}

//! Address space builder
//!
//! Mirrors the topic hierarchy into the namespace: every path prefix of a
//! topic becomes a folder below the Objects folder and the topic itself
//! becomes a variable with node id `s=<topic>`.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::debug;

use crate::convert::DataType;
use crate::namespace::{Namespace, NamespaceError, NodeId, VariableCallbacks, VariableSpec};
use crate::topic::SEPARATOR;

/// Node creation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The topic has no segments
    EmptyTopic,
    /// The namespace rejected a node
    Namespace { path: String, source: NamespaceError },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::EmptyTopic => write!(f, "empty topic"),
            BuildError::Namespace { path, source } => {
                write!(f, "failed to create node {:?}: {}", path, source)
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Namespace { source, .. } => Some(source),
            BuildError::EmptyTopic => None,
        }
    }
}

/// Tracks which nodes have been created for which topics
#[derive(Debug, Default)]
pub struct AddressSpaceBuilder {
    /// Normalized path prefix -> node (folder or variable)
    paths: AHashMap<String, NodeId>,
    /// Topic -> variable node
    variables: AHashMap<String, NodeId>,
    folders: usize,
}

impl AddressSpaceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a variable exists for the topic
    pub fn contains(&self, topic: &str) -> bool {
        self.variables.contains_key(topic)
    }

    /// Variable node of a topic
    pub fn variable(&self, topic: &str) -> Option<&NodeId> {
        self.variables.get(topic)
    }

    pub fn folder_count(&self) -> usize {
        self.folders
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Make sure the folders and the variable for `topic` exist
    ///
    /// Returns the variable's node id. Calling again for the same topic
    /// creates nothing.
    pub fn ensure_node(
        &mut self,
        namespace: &dyn Namespace,
        topic: &str,
        data_type: DataType,
        callbacks: Arc<dyn VariableCallbacks>,
    ) -> Result<NodeId, BuildError> {
        if let Some(node_id) = self.variables.get(topic) {
            return Ok(node_id.clone());
        }

        if topic.is_empty() {
            return Err(BuildError::EmptyTopic);
        }
        let trimmed = topic.strip_prefix(SEPARATOR).unwrap_or(topic);
        let segments: Vec<&str> = trimmed.split(SEPARATOR).collect();
        let (leaf, folders) = match segments.split_last() {
            Some(split) => split,
            None => return Err(BuildError::EmptyTopic),
        };

        let mut parent = NodeId::OBJECTS_FOLDER;
        let mut path = String::with_capacity(trimmed.len());

        for segment in folders {
            if !path.is_empty() {
                path.push(SEPARATOR);
            }
            path.push_str(segment);

            parent = match self.paths.get(&path).cloned() {
                Some(node_id) => node_id,
                None => {
                    let node_id = namespace.create_folder(&parent, segment).map_err(|source| {
                        BuildError::Namespace {
                            path: path.clone(),
                            source,
                        }
                    })?;
                    debug!("Created folder {} for {}", node_id, path);
                    self.folders += 1;
                    self.paths.insert(path.clone(), node_id.clone());
                    node_id
                }
            };
        }

        if !path.is_empty() {
            path.push(SEPARATOR);
        }
        path.push_str(leaf);

        let spec = VariableSpec {
            browse_name: leaf.to_string(),
            node_id: NodeId::string(topic),
            data_type,
            topic: topic.to_string(),
        };
        let node_id = namespace
            .create_variable(&parent, spec, callbacks)
            .map_err(|source| BuildError::Namespace {
                path: path.clone(),
                source,
            })?;
        debug!("Created variable {} ({})", node_id, data_type);

        self.paths.entry(path).or_insert_with(|| node_id.clone());
        self.variables.insert(topic.to_string(), node_id.clone());
        Ok(node_id)
    }
}

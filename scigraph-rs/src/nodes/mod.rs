//! Node types for the knowledge graph.
//!
//! A node's identity is its [`NodeKey`]: the canonical name plus the entity
//! type. Everything else about a node is mergeable metadata.

pub mod entity;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use entity::{EntityNode, EntityType};

/// Property holding a node's human-facing name. Written once, when the node
/// is created.
pub const DISPLAY_NAME: &str = "display_name";

/// Open key→value metadata attached to nodes and edges.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// The identity of a node: canonical name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub name: String,
    pub entity_type: EntityType,
}

impl NodeKey {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.entity_type)
    }
}

impl From<&EntityNode> for NodeKey {
    fn from(node: &EntityNode) -> Self {
        NodeKey::new(node.name.clone(), node.entity_type)
    }
}

/// Merge `incoming` into `existing`, last write wins per key.
///
/// Keys present only in `existing` are kept. Returns whether anything changed.
pub fn merge_properties(existing: &mut Properties, incoming: &Properties) -> bool {
    let mut changed = false;
    for (k, v) in incoming {
        if existing.get(k) != Some(v) {
            existing.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed
}

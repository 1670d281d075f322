//! Edge types for the knowledge graph.
//!
//! - [`EntityEdge`]: a typed relationship between two entity nodes, with
//!   the citation text that justifies it.
//! - [`RelationPolicy`]: which relation labels are admissible, and which of
//!   them may connect a node to itself.

pub mod entity;

use std::collections::BTreeSet;

pub use entity::{EntityEdge, RelationType};

/// Admissible relation labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationPolicy {
    allowed: BTreeSet<RelationType>,
    reflexive: BTreeSet<RelationType>,
}

impl Default for RelationPolicy {
    /// All built-in labels, none reflexive.
    fn default() -> Self {
        Self {
            allowed: RelationType::BUILTIN.into_iter().collect(),
            reflexive: BTreeSet::new(),
        }
    }
}

impl RelationPolicy {
    /// Extend the allowed set with extra labels (e.g. from `EXTRA_RELATION_TYPES`).
    pub fn with_extra<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for label in labels {
            if let Ok(t) = label.as_ref().parse::<RelationType>() {
                self.allowed.insert(t);
            }
        }
        self
    }

    /// Permit self-loops for `relation`. Also makes it allowed.
    pub fn allow_reflexive(mut self, relation: RelationType) -> Self {
        self.allowed.insert(relation.clone());
        self.reflexive.insert(relation);
        self
    }

    pub fn is_allowed(&self, relation: &RelationType) -> bool {
        self.allowed.contains(relation)
    }

    pub fn is_reflexive(&self, relation: &RelationType) -> bool {
        self.reflexive.contains(relation)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &RelationType> {
        self.allowed.iter()
    }
}

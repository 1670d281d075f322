//! Name normalization.
//!
//! [`Normalizer::normalize`] turns a free-text entity name and its type into
//! the [`NodeKey`] used for identity comparison. The key's name is what the
//! Store persists, so two spellings that normalize alike are the same node.
//!
//! Synonym folding goes through a [`SynonymPolicy`]. The shipped policy,
//! [`AliasTable`], only folds names that were explicitly declared as
//! aliases; an unmapped name is left as its cleaned self.
//!
//! The folded key is for comparison only. [`Normalizer::display_name`] gives
//! the human-facing spelling stored alongside it.

mod alias_table;

use std::fmt;
use std::sync::Arc;

use crate::nodes::{EntityType, NodeKey};
use crate::utils::{fold_name, normalize_whitespace};

pub use alias_table::{AliasTable, SynonymEntry};

/// Maps a cleaned name to its canonical cleaned name, if one is declared.
///
/// Implementations must be pure: the same input always yields the same
/// output for the lifetime of the process.
pub trait SynonymPolicy: Send + Sync + fmt::Debug {
    /// `cleaned` has already been passed through [`fold_name`]. The returned
    /// name must be in folded form too.
    fn canonical(&self, cleaned: &str, entity_type: EntityType) -> Option<String>;

    /// The declared spelling of a canonical name, e.g. `3D Gaussian Splatting`
    /// for `3d gaussian splatting`.
    fn display_name(&self, _canonical: &str, _entity_type: EntityType) -> Option<String> {
        None
    }
}

/// Canonicalizes entity names. Cheap to clone; the policy is shared.
#[derive(Debug, Clone)]
pub struct Normalizer {
    policy: Arc<dyn SynonymPolicy>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Arc::new(AliasTable::default()))
    }
}

impl Normalizer {
    pub fn new(policy: Arc<dyn SynonymPolicy>) -> Self {
        Self { policy }
    }

    /// Case, separator and whitespace folding only; no synonyms.
    pub fn clean(&self, name: &str) -> String {
        fold_name(name)
    }

    pub fn normalize(&self, name: &str, entity_type: EntityType) -> NodeKey {
        let cleaned = self.clean(name);
        let canonical = self
            .policy
            .canonical(&cleaned, entity_type)
            .unwrap_or(cleaned);
        NodeKey::new(canonical, entity_type)
    }

    /// Spelling to show for a node created from `raw` under `key`: the
    /// policy's declared spelling when there is one, else `raw` with its
    /// whitespace collapsed.
    pub fn display_name(&self, raw: &str, key: &NodeKey) -> String {
        self.policy
            .display_name(&key.name, key.entity_type)
            .unwrap_or_else(|| normalize_whitespace(raw))
    }

    /// Every distinct canonical name `name` could denote, across all types.
    ///
    /// Used to look up a bare reference whose type is unknown.
    pub fn candidate_keys(&self, name: &str) -> Vec<NodeKey> {
        EntityType::ALL
            .into_iter()
            .map(|t| self.normalize(name, t))
            .collect()
    }
}

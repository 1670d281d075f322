//! Exact alias list, loaded once at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::SynonymPolicy;
use crate::errors::{Result, ScigraphError};
use crate::nodes::EntityType;
use crate::utils::{fold_name, normalize_whitespace};

/// One declared equivalence, as written in the synonyms file.
///
/// ```json
/// [
///   { "canonical": "3D Gaussian Splatting", "aliases": ["3DGS"], "entity_type": "Method" },
///   { "canonical": "Neural Radiance Fields", "aliases": ["NeRF"] }
/// ]
/// ```
///
/// Without `entity_type` the entry applies to every type.
#[derive(Debug, Clone, Deserialize)]
pub struct SynonymEntry {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
}

/// Alias → canonical lookup. Type-scoped entries win over global ones.
///
/// Aliases are not chained: if `A → B` and `B → C` are both declared, `A`
/// still folds to `B`.
#[derive(Debug, Default)]
pub struct AliasTable {
    entries: HashMap<(Option<EntityType>, String), String>,
    /// Folded canonical → canonical as first written in the file.
    display: HashMap<(Option<EntityType>, String), String>,
}

impl AliasTable {
    pub fn from_entries(entries: Vec<SynonymEntry>) -> Result<Self> {
        let mut table = AliasTable::default();

        for entry in entries {
            let scope = match &entry.entity_type {
                Some(raw) => Some(raw.parse::<EntityType>().map_err(ScigraphError::Validation)?),
                None => None,
            };
            let canonical = fold_name(&entry.canonical);
            if canonical.is_empty() {
                return Err(ScigraphError::Validation(
                    "synonym entry with empty canonical name".to_string(),
                ));
            }
            table
                .display
                .entry((scope, canonical.clone()))
                .or_insert_with(|| normalize_whitespace(&entry.canonical));

            for alias in &entry.aliases {
                let alias = fold_name(alias);
                if alias.is_empty() || alias == canonical {
                    continue;
                }
                match table.entries.get(&(scope, alias.clone())) {
                    Some(existing) if *existing != canonical => {
                        return Err(ScigraphError::Validation(format!(
                            "alias '{alias}' declared for both '{existing}' and '{canonical}'"
                        )));
                    }
                    _ => {
                        table.entries.insert((scope, alias), canonical.clone());
                    }
                }
            }
        }

        Ok(table)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let entries: Vec<SynonymEntry> = serde_json::from_str(raw)?;
        Self::from_entries(entries)
    }

    /// Read a synonyms file. Called once during startup.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScigraphError::Validation(format!("cannot read synonyms file {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SynonymPolicy for AliasTable {
    fn canonical(&self, cleaned: &str, entity_type: EntityType) -> Option<String> {
        self.entries
            .get(&(Some(entity_type), cleaned.to_string()))
            .or_else(|| self.entries.get(&(None, cleaned.to_string())))
            .cloned()
    }

    fn display_name(&self, canonical: &str, entity_type: EntityType) -> Option<String> {
        self.display
            .get(&(Some(entity_type), canonical.to_string()))
            .or_else(|| self.display.get(&(None, canonical.to_string())))
            .cloned()
    }
}

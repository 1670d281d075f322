//! EntityNode: a canonical scientific entity, unique by (name, type).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Properties, DISPLAY_NAME};

/// The fixed set of entity types a node may carry.
///
/// Declaration order is significant: it is the tie-break order when a bare
/// name matches nodes of several types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Paper,
    Method,
    Concept,
    Metric,
    Dataset,
    Author,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Paper,
        EntityType::Method,
        EntityType::Concept,
        EntityType::Metric,
        EntityType::Dataset,
        EntityType::Author,
    ];

    /// The spelling persisted in the `nodes.type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Paper => "Paper",
            EntityType::Method => "Method",
            EntityType::Concept => "Concept",
            EntityType::Metric => "Metric",
            EntityType::Dataset => "Dataset",
            EntityType::Author => "Author",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown entity type '{wanted}'"))
    }
}

/// A canonical entity persisted in the `nodes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    /// Assigned at first creation, never reused.
    pub uuid: Uuid,
    /// Canonical name (see [`crate::normalize::Normalizer`]).
    pub name: String,
    pub entity_type: EntityType,
    /// Open metadata, e.g. `description`, `source_paper`, `year`.
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

impl EntityNode {
    pub fn new(uuid: Uuid, name: impl Into<String>, entity_type: EntityType, properties: Properties) -> Self {
        Self {
            uuid,
            name: name.into(),
            entity_type,
            properties,
            created_at: Utc::now(),
        }
    }

    /// The stored display spelling, falling back to the canonical name for
    /// nodes written without one.
    pub fn display_name(&self) -> &str {
        self.properties
            .get(DISPLAY_NAME)
            .and_then(|v| v.as_str())
            .unwrap_or(&self.name)
    }
}

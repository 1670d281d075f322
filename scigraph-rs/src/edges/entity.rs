//! EntityEdge: a directed, typed, evidence-bearing relationship between EntityNodes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::nodes::Properties;

/// Relationship label.
///
/// Built-in labels cover the relations the extraction prompt asks for;
/// [`RelationType::Other`] carries labels that only become admissible when
/// configured in a [`super::RelationPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    ImprovesOn,
    Extends,
    Uses,
    EvaluatedOn,
    Achieves,
    Introduces,
    AlternativeTo,
    Other(String),
}

impl RelationType {
    pub const BUILTIN: [RelationType; 7] = [
        RelationType::ImprovesOn,
        RelationType::Extends,
        RelationType::Uses,
        RelationType::EvaluatedOn,
        RelationType::Achieves,
        RelationType::Introduces,
        RelationType::AlternativeTo,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            RelationType::ImprovesOn => "IMPROVES_ON",
            RelationType::Extends => "EXTENDS",
            RelationType::Uses => "USES",
            RelationType::EvaluatedOn => "EVALUATED_ON",
            RelationType::Achieves => "ACHIEVES",
            RelationType::Introduces => "INTRODUCES",
            RelationType::AlternativeTo => "ALTERNATIVE_TO",
            RelationType::Other(label) => label,
        }
    }

    /// Canonical label spelling: upper-case, words joined by `_`.
    ///
    /// `"improves on"`, `"Improves-On"` and `"IMPROVES_ON"` all become `IMPROVES_ON`.
    pub fn canonical_label(raw: &str) -> String {
        raw.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .filter(|part| !part.is_empty())
            .map(str::to_uppercase)
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = RelationType::canonical_label(s);
        if label.is_empty() {
            return Err("relation type is empty".to_string());
        }
        Ok(RelationType::from(label))
    }
}

impl From<String> for RelationType {
    fn from(label: String) -> Self {
        RelationType::BUILTIN
            .into_iter()
            .find(|t| t.as_str() == label)
            .unwrap_or(RelationType::Other(label))
    }
}

impl From<RelationType> for String {
    fn from(t: RelationType) -> Self {
        t.as_str().to_string()
    }
}

/// A relationship persisted in the `edges` table.
///
/// Edges have no identity beyond their row: several edges may connect the
/// same pair, with the same or different labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEdge {
    /// Unique identifier for this edge.
    pub uuid: Uuid,
    /// UUID of the source EntityNode.
    pub source_node_uuid: Uuid,
    /// UUID of the target EntityNode.
    pub target_node_uuid: Uuid,
    pub relation: RelationType,
    /// Verbatim text supporting the relationship.
    pub citation_context: Option<String>,
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_builtin_labels_in_any_spelling() {
        assert_eq!("IMPROVES_ON".parse::<RelationType>().unwrap(), RelationType::ImprovesOn);
        assert_eq!("improves on".parse::<RelationType>().unwrap(), RelationType::ImprovesOn);
        assert_eq!(" evaluated-on ".parse::<RelationType>().unwrap(), RelationType::EvaluatedOn);
        assert_eq!("Alternative_To".parse::<RelationType>().unwrap(), RelationType::AlternativeTo);
    }

    #[test]
    fn unknown_labels_become_other() {
        assert_eq!(
            "cites".parse::<RelationType>().unwrap(),
            RelationType::Other("CITES".to_string())
        );
        assert!("  - _ ".parse::<RelationType>().is_err());
    }

    #[test]
    fn serializes_as_plain_label() {
        let json = serde_json::to_string(&RelationType::EvaluatedOn).unwrap();
        assert_eq!(json, "\"EVALUATED_ON\"");
        let back: RelationType = serde_json::from_str("\"USES\"").unwrap();
        assert_eq!(back, RelationType::Uses);
    }
}

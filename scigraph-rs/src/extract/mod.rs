//! Extractor boundary.
//!
//! An [`Extractor`] turns a document into an [`Extraction`]: candidate
//! entities and relations exactly as the model produced them. Nothing here is
//! trusted. Every field is optional, each item is read independently, and an
//! item that cannot be read at all is kept with a `parse_error` so the
//! validator can reject it with a reason instead of it vanishing.

pub mod llm;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::documents::Document;
use crate::errors::{LlmError, Result, ScigraphError};
use crate::nodes::Properties;

pub use llm::LlmExtractor;

/// Produces candidate records for one document.
#[allow(async_fn_in_trait)]
pub trait Extractor: Send + Sync {
    async fn extract(&self, document: &Document) -> Result<Extraction>;
}

/// An unvalidated entity as emitted by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    /// Optional batch-local handle that relations may refer to.
    #[serde(default, alias = "id", alias = "ref", deserialize_with = "lenient_string")]
    pub ref_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(
        default,
        rename = "type",
        alias = "entity_type",
        alias = "label",
        deserialize_with = "lenient_string"
    )]
    pub entity_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, alias = "attributes", deserialize_with = "lenient_properties")]
    pub properties: Properties,
    /// Set when the raw item could not be read.
    #[serde(skip)]
    pub parse_error: Option<String>,
}

impl CandidateEntity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            entity_type: Some(entity_type.into()),
            ..Default::default()
        }
    }

    pub fn with_ref(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Human-readable label for rejections and logs.
    pub fn describe(&self) -> String {
        match (&self.name, &self.entity_type) {
            (Some(n), Some(t)) => format!("{n} [{t}]"),
            (Some(n), None) => format!("{n} [?]"),
            (None, Some(t)) => format!("<unnamed> [{t}]"),
            (None, None) => "<unnamed>".to_string(),
        }
    }
}

/// An unvalidated relation. Endpoints are batch-local references: an entity
/// `ref_id`, or an entity name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRelation {
    #[serde(
        default,
        alias = "source",
        alias = "sourceRef",
        alias = "from",
        deserialize_with = "lenient_string"
    )]
    pub source_ref: Option<String>,
    #[serde(
        default,
        alias = "target",
        alias = "targetRef",
        alias = "to",
        deserialize_with = "lenient_string"
    )]
    pub target_ref: Option<String>,
    #[serde(
        default,
        rename = "type",
        alias = "relation",
        alias = "relationship",
        alias = "relation_type",
        deserialize_with = "lenient_string"
    )]
    pub relation_type: Option<String>,
    #[serde(
        default,
        alias = "context",
        alias = "citationContext",
        alias = "citation",
        deserialize_with = "lenient_string"
    )]
    pub citation_context: Option<String>,
    #[serde(default, alias = "attributes", deserialize_with = "lenient_properties")]
    pub properties: Properties,
    #[serde(skip)]
    pub parse_error: Option<String>,
}

impl CandidateRelation {
    pub fn new(
        source_ref: impl Into<String>,
        relation_type: impl Into<String>,
        target_ref: impl Into<String>,
    ) -> Self {
        Self {
            source_ref: Some(source_ref.into()),
            target_ref: Some(target_ref.into()),
            relation_type: Some(relation_type.into()),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.citation_context = Some(context.into());
        self
    }

    pub fn describe(&self) -> String {
        let part = |p: &Option<String>| p.clone().unwrap_or_else(|| "?".to_string());
        format!(
            "{} --{}--> {}",
            part(&self.source_ref),
            part(&self.relation_type),
            part(&self.target_ref)
        )
    }
}

/// Everything the extractor produced for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Vec<CandidateEntity>,
    pub relations: Vec<CandidateRelation>,
}

impl Extraction {
    pub fn new(entities: Vec<CandidateEntity>, relations: Vec<CandidateRelation>) -> Self {
        Self { entities, relations }
    }

    /// Read untyped extractor output.
    ///
    /// The top level must be an object. `entities` (or `nodes`) and
    /// `relations` (or `edges`) are optional arrays. Items are read one by
    /// one; unreadable items are kept with `parse_error` set.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut top) = value else {
            return Err(malformed("top-level value is not an object"));
        };

        let entities = take_array(&mut top, &["entities", "nodes"])?
            .into_iter()
            .map(|item| {
                serde_json::from_value::<CandidateEntity>(item).unwrap_or_else(|e| CandidateEntity {
                    parse_error: Some(e.to_string()),
                    ..Default::default()
                })
            })
            .collect();

        let relations = take_array(&mut top, &["relations", "edges"])?
            .into_iter()
            .map(|item| {
                serde_json::from_value::<CandidateRelation>(item).unwrap_or_else(|e| {
                    CandidateRelation {
                        parse_error: Some(e.to_string()),
                        ..Default::default()
                    }
                })
            })
            .collect();

        Ok(Self { entities, relations })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ScigraphError::Llm(LlmError::MalformedResponse(e.to_string())))?;
        Self::from_value(value)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

fn malformed(reason: &str) -> ScigraphError {
    ScigraphError::Llm(LlmError::MalformedResponse(reason.to_string()))
}

fn take_array(top: &mut serde_json::Map<String, Value>, keys: &[&str]) -> Result<Vec<Value>> {
    for key in keys {
        match top.remove(*key) {
            Some(Value::Array(items)) => return Ok(items),
            Some(Value::Null) | None => continue,
            Some(_) => return Err(malformed(&format!("'{key}' is not an array"))),
        }
    }
    Ok(Vec::new())
}

/// Strings pass through, numbers and booleans are stringified, null is absent.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, found {other}"
        ))),
    }
}

/// Objects pass through, null is empty, anything else is an error.
fn lenient_properties<'de, D>(deserializer: D) -> std::result::Result<Properties, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Properties::new()),
        Value::Object(map) => Ok(map),
        other => Err(serde::de::Error::custom(format!(
            "expected an object of properties, found {other}"
        ))),
    }
}

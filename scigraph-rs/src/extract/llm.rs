//! LLM-backed extractor.

use schemars::JsonSchema;
use tracing::debug;

use super::{Extraction, Extractor};
use crate::documents::{Document, MAX_EXCERPT_CHARS};
use crate::edges::RelationPolicy;
use crate::errors::Result;
use crate::llm_client::LlmClient;
use crate::prompts::extract_graph;

/// Shape requested from the model. Only used to derive the response schema;
/// the reply is read leniently by [`Extraction::from_value`].
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ExtractionSchema {
    entities: Vec<EntitySchema>,
    relations: Vec<RelationSchema>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct EntitySchema {
    #[schemars(rename = "ref")]
    ref_id: String,
    name: String,
    #[schemars(rename = "type")]
    entity_type: String,
    description: Option<String>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct RelationSchema {
    source: String,
    target: String,
    #[schemars(rename = "type")]
    relation_type: String,
    context: String,
}

/// Extracts candidates by prompting an [`LlmClient`].
pub struct LlmExtractor<C> {
    client: C,
    relations: RelationPolicy,
    max_chars: usize,
}

impl<C: LlmClient> LlmExtractor<C> {
    pub fn new(client: C, relations: RelationPolicy) -> Self {
        Self {
            client,
            relations,
            max_chars: MAX_EXCERPT_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    fn schema() -> Result<serde_json::Value> {
        Ok(serde_json::to_value(schemars::schema_for!(ExtractionSchema))?)
    }
}

impl<C: LlmClient> Extractor for LlmExtractor<C> {
    async fn extract(&self, document: &Document) -> Result<Extraction> {
        let text: String = document.full_text().chars().take(self.max_chars).collect();
        let messages = extract_graph::messages(&document.title, &text, &self.relations);

        let value = self.client.generate_json(&messages, &Self::schema()?).await?;
        let extraction = Extraction::from_value(value)?;

        debug!(
            document = %document.id,
            entities = extraction.entities.len(),
            relations = extraction.relations.len(),
            "extraction received"
        );
        Ok(extraction)
    }
}

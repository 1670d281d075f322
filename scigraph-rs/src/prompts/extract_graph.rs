//! Paper text → candidate entities and relations.

use crate::edges::RelationPolicy;
use crate::llm_client::Message;
use crate::nodes::EntityType;

const SYSTEM: &str = "You are a research assistant building a knowledge graph of scientific \
literature. You extract entities and the semantic relationships a paper states between them. \
You answer with JSON only.";

/// Build the extraction conversation for one paper excerpt.
pub fn messages(paper_title: &str, text: &str, relations: &RelationPolicy) -> Vec<Message> {
    let entity_types = EntityType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let relation_types = relations
        .allowed()
        .map(|r| r.as_str().to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let user = format!(
        r#"INPUT TEXT (excerpt from "{paper_title}"):
{text}

TASK:
1. Identify the paper's core contribution, the methods it improves on or compares against,
   and the datasets and metrics it is evaluated with.
2. Extract entities with a "name" and a "type" from: {entity_types}.
   Prefer the full canonical name of a method over an abbreviation or "our method".
   Give each entity a short "ref" (e1, e2, ...) and an optional "description".
3. Extract relations with "source" and "target" (entity refs), a "type" from:
   {relation_types}, and a "context": the verbatim sentence that states the relationship.
   Only extract relationships the text describes; a bare citation is not a relationship.
4. Every relation endpoint must be one of your entities.

Return {{"entities": [...], "relations": [...]}}."#
    );

    vec![Message::system(SYSTEM), Message::user(user)]
}

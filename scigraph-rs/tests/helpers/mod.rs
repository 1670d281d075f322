#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use scigraph_rs::documents::Document;
use scigraph_rs::edges::RelationPolicy;
use scigraph_rs::errors::{LlmError, Result, ScigraphError};
use scigraph_rs::extract::{Extraction, Extractor};
use scigraph_rs::normalize::{AliasTable, Normalizer};
use scigraph_rs::validate::ConsistencyValidator;

/// What the scripted extractor does for one document id.
#[derive(Clone)]
pub enum Script {
    Returns(Extraction),
    /// Fails permanently, e.g. the model refused.
    Refuses,
    /// Fails transiently `n` times, then returns the extraction.
    FlakyThen(usize, Extraction),
}

/// Extractor that replays canned extractions per document id.
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: HashMap<String, Script>,
    calls: HashMap<String, AtomicUsize>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, document_id: &str, script: Script) -> Self {
        self.scripts.insert(document_id.to_string(), script);
        self.calls.insert(document_id.to_string(), AtomicUsize::new(0));
        self
    }

    pub fn calls(&self, document_id: &str) -> usize {
        self.calls
            .get(document_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl Extractor for ScriptedExtractor {
    async fn extract(&self, document: &Document) -> Result<Extraction> {
        let call = self
            .calls
            .get(&document.id)
            .map(|c| c.fetch_add(1, Ordering::SeqCst))
            .unwrap_or(0);
        // Let concurrently running documents interleave.
        tokio::task::yield_now().await;

        match self.scripts.get(&document.id) {
            Some(Script::Returns(extraction)) => Ok(extraction.clone()),
            Some(Script::Refuses) => Err(LlmError::Refusal.into()),
            Some(Script::FlakyThen(failures, extraction)) => {
                if call < *failures {
                    Err(LlmError::RateLimit.into())
                } else {
                    Ok(extraction.clone())
                }
            }
            None => Err(ScigraphError::Source(format!("no script for {}", document.id))),
        }
    }
}

/// Alias table declaring 3DGS ≡ 3D Gaussian Splatting ≡ Gaussian Splatting
/// for methods.
pub fn splatting_synonyms() -> Normalizer {
    let table = AliasTable::from_json_str(
        r#"[
            {
                "canonical": "3D Gaussian Splatting",
                "aliases": ["3DGS", "Gaussian Splatting"],
                "entity_type": "Method"
            }
        ]"#,
    )
    .expect("valid alias table");
    Normalizer::new(Arc::new(table))
}

pub fn splatting_validator() -> ConsistencyValidator {
    ConsistencyValidator::new(splatting_synonyms(), RelationPolicy::default())
}

pub fn paper(id: &str, title: &str) -> Document {
    Document::from_text(id, title, format!("Full text of {title}."))
}

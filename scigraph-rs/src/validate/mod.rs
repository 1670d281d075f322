//! Consistency validation.
//!
//! Turns an untrusted [`Extraction`] into typed candidates. Anything that
//! would break a graph invariant is rejected here, one record at a time:
//!
//! 1. entities need a non-empty name and a known type (`InvalidEntity`);
//! 2. relation endpoints must resolve to an accepted batch entity or a node
//!    already in the graph (`DanglingEdge`);
//! 3. endpoints must differ unless the relation is reflexive
//!    (`SelfReferentialEdge`);
//! 4. the relation label must be admissible (`UnknownEdgeType`).
//!
//! Validation never fails as a whole. A bad record becomes a [`Rejection`]
//! and the rest of the batch goes on.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::edges::{RelationPolicy, RelationType};
use crate::extract::{CandidateEntity, CandidateRelation, Extraction};
use crate::nodes::{EntityNode, EntityType, NodeKey, Properties};
use crate::normalize::Normalizer;
use crate::utils::{fold_name, scrub_text};

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RejectionKind {
    InvalidEntity,
    DanglingEdge,
    SelfReferentialEdge,
    UnknownEdgeType,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionKind::InvalidEntity => "InvalidEntity",
            RejectionKind::DanglingEdge => "DanglingEdge",
            RejectionKind::SelfReferentialEdge => "SelfReferentialEdge",
            RejectionKind::UnknownEdgeType => "UnknownEdgeType",
        };
        f.write_str(s)
    }
}

/// A dropped candidate and the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    /// The candidate as it was emitted, e.g. `EAGLES --IMPROVES_ON--> 3DGS`.
    pub subject: String,
    pub reason: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}

/// An entity that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEntity {
    pub key: NodeKey,
    /// The name as the extractor spelled it, trimmed.
    pub raw_name: String,
    /// Spelling shown for the node if this entity creates it.
    pub display_name: String,
    pub ref_id: Option<String>,
    /// Candidate properties, plus `description` when one was given.
    pub properties: Properties,
}

/// A relation whose endpoints are known canonical keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRelation {
    pub source: NodeKey,
    pub target: NodeKey,
    pub relation: RelationType,
    pub citation_context: Option<String>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedBatch {
    pub entities: Vec<ValidEntity>,
    pub relations: Vec<ValidRelation>,
    pub rejections: Vec<Rejection>,
}

/// Graph nodes a relation may point at without the batch declaring them.
///
/// Prefetched by the caller so that validation stays synchronous.
#[derive(Debug, Clone, Default)]
pub struct KnownNodes {
    by_key: HashMap<NodeKey, EntityNode>,
}

impl KnownNodes {
    pub fn new(nodes: impl IntoIterator<Item = EntityNode>) -> Self {
        let mut by_key = HashMap::new();
        for node in nodes {
            let key = NodeKey::new(fold_name(&node.name), node.entity_type);
            by_key.entry(key).or_insert(node);
        }
        Self { by_key }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// The node a bare reference denotes. Several types may match; the
    /// lowest [`EntityType`] wins.
    fn lookup(&self, normalizer: &Normalizer, reference: &str) -> Option<NodeKey> {
        normalizer
            .candidate_keys(reference)
            .into_iter()
            .find(|key| self.by_key.contains_key(key))
    }
}

/// Lookup table over the accepted entities of one batch.
#[derive(Default)]
struct BatchIndex {
    by_ref: HashMap<String, usize>,
    by_clean_name: HashMap<String, usize>,
    by_key: HashMap<NodeKey, usize>,
}

impl BatchIndex {
    fn build(entities: &[ValidEntity], normalizer: &Normalizer) -> Self {
        let mut index = BatchIndex::default();
        for (i, entity) in entities.iter().enumerate() {
            if let Some(r) = &entity.ref_id {
                index.by_ref.entry(r.clone()).or_insert(i);
            }
            index
                .by_clean_name
                .entry(normalizer.clean(&entity.raw_name))
                .or_insert(i);
            index.by_key.entry(entity.key.clone()).or_insert(i);
        }
        index
    }

    /// Explicit ref id, then cleaned name, then canonical key. Ties go to
    /// the first declared entity.
    fn lookup(&self, normalizer: &Normalizer, reference: &str) -> Option<usize> {
        if let Some(&i) = self.by_ref.get(reference) {
            return Some(i);
        }
        if let Some(&i) = self.by_clean_name.get(&normalizer.clean(reference)) {
            return Some(i);
        }
        normalizer
            .candidate_keys(reference)
            .iter()
            .filter_map(|key| self.by_key.get(key).copied())
            .min()
    }
}

/// Validates extraction batches against the graph's invariants.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyValidator {
    normalizer: Normalizer,
    policy: RelationPolicy,
}

impl ConsistencyValidator {
    pub fn new(normalizer: Normalizer, policy: RelationPolicy) -> Self {
        Self { normalizer, policy }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn policy(&self) -> &RelationPolicy {
        &self.policy
    }

    /// Names to look up in the graph before validating: every canonical
    /// spelling of each relation endpoint that no batch entity accounts for.
    pub fn lookup_names(&self, extraction: &Extraction) -> Vec<String> {
        let mut entities = Vec::new();
        for candidate in &extraction.entities {
            if let Ok(entity) = self.check_entity(candidate) {
                entities.push(entity);
            }
        }
        let index = BatchIndex::build(&entities, &self.normalizer);

        let mut names = BTreeSet::new();
        let endpoints = extraction
            .relations
            .iter()
            .filter(|r| r.parse_error.is_none())
            .flat_map(|r| [r.source_ref.as_deref(), r.target_ref.as_deref()])
            .flatten()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        for reference in endpoints {
            if index.lookup(&self.normalizer, reference).is_some() {
                continue;
            }
            names.insert(self.normalizer.clean(reference));
            for key in self.normalizer.candidate_keys(reference) {
                names.insert(key.name);
            }
        }
        names.into_iter().collect()
    }

    pub fn validate(&self, extraction: &Extraction, known: &KnownNodes) -> ValidatedBatch {
        let mut batch = ValidatedBatch::default();

        for candidate in &extraction.entities {
            match self.check_entity(candidate) {
                Ok(entity) => batch.entities.push(entity),
                Err(rejection) => batch.rejections.push(rejection),
            }
        }

        let index = BatchIndex::build(&batch.entities, &self.normalizer);
        for candidate in &extraction.relations {
            match self.check_relation(candidate, &batch.entities, &index, known) {
                Ok(relation) => batch.relations.push(relation),
                Err(rejection) => {
                    if rejection.kind == RejectionKind::UnknownEdgeType {
                        warn!(relation = %rejection.subject, reason = %rejection.reason, "relation rejected");
                    } else {
                        debug!(kind = %rejection.kind, subject = %rejection.subject, reason = %rejection.reason, "candidate rejected");
                    }
                    batch.rejections.push(rejection);
                }
            }
        }

        batch
    }

    fn check_entity(&self, candidate: &CandidateEntity) -> Result<ValidEntity, Rejection> {
        let reject = |reason: String| Rejection::new(RejectionKind::InvalidEntity, candidate.describe(), reason);

        if let Some(err) = &candidate.parse_error {
            return Err(reject(format!("unreadable entity record: {err}")));
        }
        let raw_name = candidate.name.as_deref().map(scrub_text).unwrap_or_default();
        if self.normalizer.clean(&raw_name).is_empty() {
            return Err(reject("name is empty".to_string()));
        }
        let entity_type = match candidate.entity_type.as_deref() {
            None => return Err(reject("type is missing".to_string())),
            Some(t) => t.parse::<EntityType>().map_err(reject)?,
        };

        let mut properties = candidate.properties.clone();
        if let Some(description) = candidate.description.as_deref().map(scrub_text) {
            if !description.is_empty() {
                properties.insert("description".to_string(), description.into());
            }
        }

        let key = self.normalizer.normalize(&raw_name, entity_type);
        Ok(ValidEntity {
            display_name: self.normalizer.display_name(&raw_name, &key),
            key,
            raw_name,
            ref_id: candidate
                .ref_id
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            properties,
        })
    }

    fn check_relation(
        &self,
        candidate: &CandidateRelation,
        entities: &[ValidEntity],
        index: &BatchIndex,
        known: &KnownNodes,
    ) -> Result<ValidRelation, Rejection> {
        let subject = candidate.describe();
        let reject = |kind: RejectionKind, reason: String| Rejection::new(kind, subject.clone(), reason);

        if let Some(err) = &candidate.parse_error {
            return Err(reject(
                RejectionKind::DanglingEdge,
                format!("unreadable relation record: {err}"),
            ));
        }

        let resolve_endpoint = |side: &str, reference: Option<&str>| -> Result<NodeKey, Rejection> {
            let reference = reference.map(str::trim).filter(|r| !r.is_empty()).ok_or_else(|| {
                reject(RejectionKind::DanglingEdge, format!("{side} is missing"))
            })?;
            if let Some(i) = index.lookup(&self.normalizer, reference) {
                return Ok(entities[i].key.clone());
            }
            known.lookup(&self.normalizer, reference).ok_or_else(|| {
                reject(
                    RejectionKind::DanglingEdge,
                    format!("{side} '{reference}' matches no entity in the batch or the graph"),
                )
            })
        };
        let source = resolve_endpoint("source", candidate.source_ref.as_deref())?;
        let target = resolve_endpoint("target", candidate.target_ref.as_deref())?;

        let relation = candidate
            .relation_type
            .as_deref()
            .and_then(|t| t.parse::<RelationType>().ok());

        if source == target && !relation.as_ref().is_some_and(|r| self.policy.is_reflexive(r)) {
            return Err(reject(
                RejectionKind::SelfReferentialEdge,
                format!("source and target are both {source}"),
            ));
        }

        let relation = match relation {
            Some(r) if self.policy.is_allowed(&r) => r,
            Some(r) => {
                return Err(reject(
                    RejectionKind::UnknownEdgeType,
                    format!("relation type '{r}' is not allowed"),
                ))
            }
            None => {
                return Err(reject(
                    RejectionKind::UnknownEdgeType,
                    "relation type is missing".to_string(),
                ))
            }
        };

        Ok(ValidRelation {
            source,
            target,
            relation,
            citation_context: candidate
                .citation_context
                .as_deref()
                .map(scrub_text)
                .filter(|c| !c.is_empty()),
            properties: candidate.properties.clone(),
        })
    }
}

//! Identity resolution.
//!
//! Decides, for every validated entity, whether it names a node that already
//! exists or a new one. Resolution only reads the Store; creating a node is
//! left to the writer's atomic insert-if-absent, so two documents resolving
//! the same key concurrently both see `New` and the Store picks the winner.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::driver::GraphStore;
use crate::edges::RelationType;
use crate::errors::{Result, ScigraphError};
use crate::nodes::{merge_properties, EntityNode, NodeKey, Properties};
use crate::validate::{Rejection, RejectionKind, ValidEntity, ValidatedBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// No node holds the key yet; `uuid` is freshly allocated.
    New,
    /// `uuid` is the existing node's id.
    Existing,
}

/// A batch entity bound to a node id.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub key: NodeKey,
    pub uuid: Uuid,
    pub disposition: Disposition,
    /// Written as the `display_name` property if this node is created.
    pub display_name: String,
    /// Properties to write (new node) or merge (existing node).
    pub properties: Properties,
}

/// A relation bound to node ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEdge {
    pub source_key: NodeKey,
    pub source: Uuid,
    pub target_key: NodeKey,
    pub target: Uuid,
    pub relation: RelationType,
    pub citation_context: Option<String>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedBatch {
    pub nodes: Vec<ResolvedNode>,
    pub edges: Vec<ResolvedEdge>,
    /// Relations whose graph endpoint disappeared between validation and
    /// resolution.
    pub rejections: Vec<Rejection>,
}

/// Maps candidate keys to node ids by looking them up in a [`GraphStore`].
pub struct IdentityResolver<'s, S> {
    store: &'s S,
}

impl<'s, S: GraphStore> IdentityResolver<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// The single node holding `key`, if any. Several nodes folding to one
    /// key is an identity conflict.
    async fn lookup(&self, key: &NodeKey) -> Result<Option<EntityNode>> {
        let mut matches = self.store.find_nodes_by_key(key).await?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => {
                let ids: Vec<String> = matches.iter().map(|m| m.uuid.to_string()).collect();
                error!(key = %key, count = n, ids = ?ids, "uniqueness invariant violated");
                Err(ScigraphError::IdentityConflict {
                    key: key.to_string(),
                    detail: format!("{n} nodes share this key: {}", ids.join(", ")),
                })
            }
        }
    }

    pub async fn resolve(&self, entity: &ValidEntity) -> Result<ResolvedNode> {
        let (uuid, disposition) = match self.lookup(&entity.key).await? {
            Some(node) => (node.uuid, Disposition::Existing),
            None => (Uuid::new_v4(), Disposition::New),
        };
        debug!(key = %entity.key, %uuid, ?disposition, "resolved");
        Ok(ResolvedNode {
            key: entity.key.clone(),
            uuid,
            disposition,
            display_name: entity.display_name.clone(),
            properties: entity.properties.clone(),
        })
    }

    /// Resolve a whole batch. Entities sharing a key collapse into one node
    /// whose properties are merged in declaration order. The first entity's
    /// spelling is kept.
    pub async fn resolve_batch(&self, batch: &ValidatedBatch) -> Result<ResolvedBatch> {
        let mut merged: Vec<ValidEntity> = Vec::new();
        let mut position: HashMap<NodeKey, usize> = HashMap::new();
        for entity in &batch.entities {
            match position.get(&entity.key) {
                Some(&i) => {
                    merge_properties(&mut merged[i].properties, &entity.properties);
                }
                None => {
                    position.insert(entity.key.clone(), merged.len());
                    merged.push(entity.clone());
                }
            }
        }

        let mut resolved = ResolvedBatch::default();
        let mut ids: HashMap<NodeKey, Uuid> = HashMap::new();
        for entity in &merged {
            let node = self.resolve(entity).await?;
            ids.insert(node.key.clone(), node.uuid);
            resolved.nodes.push(node);
        }

        for relation in &batch.relations {
            let source = self.endpoint(&relation.source, &mut ids).await?;
            let target = self.endpoint(&relation.target, &mut ids).await?;
            let (Some(source), Some(target)) = (source, target) else {
                resolved.rejections.push(Rejection::new(
                    RejectionKind::DanglingEdge,
                    format!("{} --{}--> {}", relation.source, relation.relation, relation.target),
                    "endpoint no longer exists in the graph",
                ));
                continue;
            };
            resolved.edges.push(ResolvedEdge {
                source_key: relation.source.clone(),
                source,
                target_key: relation.target.clone(),
                target,
                relation: relation.relation.clone(),
                citation_context: relation.citation_context.clone(),
                properties: relation.properties.clone(),
            });
        }

        Ok(resolved)
    }

    /// Id for a relation endpoint: a batch node, or a graph node looked up
    /// once and cached.
    async fn endpoint(&self, key: &NodeKey, ids: &mut HashMap<NodeKey, Uuid>) -> Result<Option<Uuid>> {
        if let Some(id) = ids.get(key) {
            return Ok(Some(*id));
        }
        let found = self.lookup(key).await?.map(|node| node.uuid);
        if let Some(id) = found {
            ids.insert(key.clone(), id);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{GraphTransaction, MemoryStore};
    use crate::nodes::EntityType;
    use crate::validate::ValidRelation;
    use serde_json::json;

    fn entity(name: &str, entity_type: EntityType, props: serde_json::Value) -> ValidEntity {
        ValidEntity {
            key: NodeKey::new(name, entity_type),
            raw_name: name.to_string(),
            display_name: name.to_string(),
            ref_id: None,
            properties: props.as_object().cloned().unwrap_or_default(),
        }
    }

    async fn seed(store: &MemoryStore, name: &str, entity_type: EntityType) -> Uuid {
        let node = EntityNode::new(Uuid::new_v4(), name, entity_type, Properties::new());
        let mut tx = store.begin().await.unwrap();
        tx.insert_node_if_absent(&node).await.unwrap();
        tx.commit().await.unwrap();
        node.uuid
    }

    #[tokio::test]
    async fn new_and_existing_keys() {
        let store = MemoryStore::new();
        let nerf = seed(&store, "nerf", EntityType::Method).await;
        let resolver = IdentityResolver::new(&store);

        let existing = resolver
            .resolve(&entity("nerf", EntityType::Method, json!({})))
            .await
            .unwrap();
        assert_eq!(existing.disposition, Disposition::Existing);
        assert_eq!(existing.uuid, nerf);

        let fresh = resolver
            .resolve(&entity("nerf", EntityType::Paper, json!({})))
            .await
            .unwrap();
        assert_eq!(fresh.disposition, Disposition::New);
        assert_ne!(fresh.uuid, nerf);
    }

    #[tokio::test]
    async fn bypassed_uniqueness_is_a_conflict() {
        let store = MemoryStore::new();
        for name in ["NeRF", "nerf "] {
            store
                .insert_raw(EntityNode::new(Uuid::new_v4(), name, EntityType::Method, Properties::new()))
                .await
                .unwrap();
        }
        let err = IdentityResolver::new(&store)
            .resolve(&entity("nerf", EntityType::Method, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ScigraphError::IdentityConflict { .. }));
    }

    #[tokio::test]
    async fn batch_duplicates_collapse_with_last_write_wins() {
        let store = MemoryStore::new();
        let batch = ValidatedBatch {
            entities: vec![
                entity("mip nerf 360", EntityType::Dataset, json!({"scenes": 9, "year": 2021})),
                entity("mip nerf 360", EntityType::Dataset, json!({"year": 2022})),
            ],
            ..Default::default()
        };
        let resolved = IdentityResolver::new(&store).resolve_batch(&batch).await.unwrap();
        assert_eq!(resolved.nodes.len(), 1);
        assert_eq!(resolved.nodes[0].display_name, "mip nerf 360");
        assert_eq!(
            resolved.nodes[0].properties,
            json!({"scenes": 9, "year": 2022}).as_object().cloned().unwrap()
        );
    }

    #[tokio::test]
    async fn edges_bind_batch_and_graph_endpoints() {
        let store = MemoryStore::new();
        let splat = seed(&store, "3d gaussian splatting", EntityType::Method).await;
        let eagles = NodeKey::new("eagles", EntityType::Method);
        let splat_key = NodeKey::new("3d gaussian splatting", EntityType::Method);
        let gone = NodeKey::new("pruned", EntityType::Method);

        let relation = |target: &NodeKey| ValidRelation {
            source: eagles.clone(),
            target: target.clone(),
            relation: RelationType::ImprovesOn,
            citation_context: None,
            properties: Properties::new(),
        };
        let batch = ValidatedBatch {
            entities: vec![entity("eagles", EntityType::Method, json!({}))],
            relations: vec![relation(&splat_key), relation(&gone)],
            rejections: vec![],
        };

        let resolved = IdentityResolver::new(&store).resolve_batch(&batch).await.unwrap();
        assert_eq!(resolved.edges.len(), 1);
        assert_eq!(resolved.edges[0].source, resolved.nodes[0].uuid);
        assert_eq!(resolved.edges[0].target, splat);
        assert_eq!(resolved.rejections.len(), 1);
        assert_eq!(resolved.rejections[0].kind, RejectionKind::DanglingEdge);
    }
}

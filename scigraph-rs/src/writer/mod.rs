//! Graph writer: the only code that mutates persisted graph state.
//!
//! One resolved batch is applied in one [`GraphTransaction`]. Either every
//! node and edge of the batch lands or none does.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::driver::{GraphStore, GraphTransaction, NodeInsert};
use crate::edges::EntityEdge;
use crate::errors::{Result, ScigraphError};
use crate::nodes::{EntityNode, NodeKey, Properties, DISPLAY_NAME};
use crate::resolve::{Disposition, ResolvedBatch, ResolvedNode};
use crate::utils::{fold_name, RetryPolicy};

/// What one commit changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub nodes_created: usize,
    pub nodes_merged: usize,
    pub edges_created: usize,
    /// Final id of every batch node, after insert races were settled.
    #[serde(skip)]
    pub node_ids: HashMap<NodeKey, Uuid>,
}

/// Audit records, logged once the transaction is durable.
struct Applied {
    result: WriteResult,
    created_nodes: Vec<(Uuid, NodeKey)>,
    created_edges: Vec<EntityEdge>,
}

pub struct GraphWriter<'s, S> {
    store: &'s S,
    retry: RetryPolicy,
}

impl<'s, S: GraphStore> GraphWriter<'s, S> {
    pub fn new(store: &'s S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Commit a batch, retrying transient store failures.
    ///
    /// Identity conflicts are returned as they are; any other failure that
    /// survives the retry budget becomes [`ScigraphError::CommitFailure`].
    pub async fn commit(&self, batch: &ResolvedBatch) -> Result<WriteResult> {
        let applied = self
            .retry
            .run("commit", || self.apply(batch))
            .await
            .map_err(|exhausted| match exhausted.error {
                conflict @ ScigraphError::IdentityConflict { .. } => conflict,
                other => ScigraphError::CommitFailure {
                    attempts: exhausted.attempts,
                    message: other.to_string(),
                },
            })?;

        for (uuid, key) in &applied.created_nodes {
            info!(node = %uuid, name = %key.name, entity_type = %key.entity_type, "node created");
        }
        for edge in &applied.created_edges {
            info!(
                edge = %edge.uuid,
                source = %edge.source_node_uuid,
                target = %edge.target_node_uuid,
                relation = %edge.relation,
                "edge created"
            );
        }
        Ok(applied.result)
    }

    async fn apply(&self, batch: &ResolvedBatch) -> Result<Applied> {
        let mut tx = self.store.begin().await?;
        let mut applied = Applied {
            result: WriteResult::default(),
            created_nodes: Vec::new(),
            created_edges: Vec::new(),
        };

        for node in &batch.nodes {
            let uuid = match node.disposition {
                Disposition::New => insert_or_merge(&mut tx, node, node.uuid, &mut applied).await?,
                Disposition::Existing => {
                    match tx.merge_node_properties(node.uuid, &merge_payload(node)).await? {
                        Some(row) => {
                            let stored = NodeKey::new(fold_name(&row.name), row.entity_type);
                            if stored != node.key {
                                return Err(ScigraphError::IdentityConflict {
                                    key: node.key.to_string(),
                                    detail: format!("node {} now holds {stored}", row.uuid),
                                });
                            }
                            applied.result.nodes_merged += 1;
                            row.uuid
                        }
                        // Pruned since resolution.
                        None => insert_or_merge(&mut tx, node, Uuid::new_v4(), &mut applied).await?,
                    }
                }
            };
            applied.result.node_ids.insert(node.key.clone(), uuid);
        }

        for resolved in &batch.edges {
            let ids = &applied.result.node_ids;
            let edge = EntityEdge {
                uuid: Uuid::new_v4(),
                source_node_uuid: ids.get(&resolved.source_key).copied().unwrap_or(resolved.source),
                target_node_uuid: ids.get(&resolved.target_key).copied().unwrap_or(resolved.target),
                relation: resolved.relation.clone(),
                citation_context: resolved.citation_context.clone(),
                properties: resolved.properties.clone(),
                created_at: Utc::now(),
            };
            tx.insert_edge(&edge).await?;
            applied.created_edges.push(edge);
        }
        applied.result.edges_created = applied.created_edges.len();

        tx.commit().await?;
        Ok(applied)
    }
}

/// Properties merged into a node that already exists. The display name
/// stays as it was written at creation.
fn merge_payload(node: &ResolvedNode) -> Properties {
    let mut properties = node.properties.clone();
    properties.remove(DISPLAY_NAME);
    properties
}

/// Insert-if-absent; a lost race merges into the winner instead.
async fn insert_or_merge<T: GraphTransaction>(
    tx: &mut T,
    node: &ResolvedNode,
    uuid: Uuid,
    applied: &mut Applied,
) -> Result<Uuid> {
    let mut properties = node.properties.clone();
    properties.insert(DISPLAY_NAME.to_string(), node.display_name.clone().into());
    let candidate = EntityNode::new(uuid, node.key.name.clone(), node.key.entity_type, properties);
    match tx.insert_node_if_absent(&candidate).await? {
        NodeInsert::Created => {
            applied.result.nodes_created += 1;
            applied.created_nodes.push((uuid, node.key.clone()));
            Ok(uuid)
        }
        NodeInsert::Existing(winner) => {
            debug!(key = %node.key, tentative = %uuid, winner = %winner.uuid, "node already created elsewhere");
            tx.merge_node_properties(winner.uuid, &merge_payload(node)).await?;
            applied.result.nodes_merged += 1;
            Ok(winner.uuid)
        }
    }
}

//! In-process graph store.
//!
//! Same contract as the relational store: `(name, type)` is unique, edges
//! need both endpoints, deleting a node cascades to its edges. A write
//! transaction holds the store lock from `begin` to `commit`/`rollback` and
//! works on a private copy, so readers never observe a half-applied batch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{GraphCounts, GraphStore, GraphTransaction, NodeInsert};
use crate::edges::{EntityEdge, RelationType};
use crate::errors::{Result, ScigraphError};
use crate::nodes::{merge_properties, EntityNode, EntityType, NodeKey, Properties};
use crate::utils::fold_name;

#[derive(Debug, Default, Clone)]
struct GraphState {
    nodes: HashMap<Uuid, EntityNode>,
    /// Exact stored `(name, type)` → id. This is the uniqueness constraint.
    by_key: HashMap<(String, EntityType), Uuid>,
    edges: Vec<EntityEdge>,
}

impl GraphState {
    fn insert_node(&mut self, node: &EntityNode) -> Result<NodeInsert> {
        if let Some(id) = self.by_key.get(&(node.name.clone(), node.entity_type)) {
            return Ok(NodeInsert::Existing(self.nodes[id].clone()));
        }
        if self.nodes.contains_key(&node.uuid) {
            return Err(ScigraphError::IdentityConflict {
                key: NodeKey::from(node).to_string(),
                detail: format!("id {} already belongs to another node", node.uuid),
            });
        }
        self.by_key
            .insert((node.name.clone(), node.entity_type), node.uuid);
        self.nodes.insert(node.uuid, node.clone());
        Ok(NodeInsert::Created)
    }

    fn sorted_nodes(&self) -> Vec<EntityNode> {
        let mut nodes: Vec<EntityNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uuid.cmp(&b.uuid)));
        nodes
    }
}

/// In-memory [`GraphStore`]. Clones share the same graph.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<GraphState>>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a transient error, rolling
    /// their transactions back.
    pub fn inject_commit_failures(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Insert a node the way an external writer would: only the exact
    /// `(name, type)` constraint applies, no normalization.
    pub async fn insert_raw(&self, node: EntityNode) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.insert_node(&node)? {
            NodeInsert::Created => Ok(()),
            NodeInsert::Existing(_) => Err(ScigraphError::store(format!(
                "duplicate key value violates unique constraint on ({}, {})",
                node.name, node.entity_type
            ))),
        }
    }
}

impl GraphStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        *self.state.lock().await = GraphState::default();
        Ok(())
    }

    async fn begin(&self) -> Result<MemoryTransaction> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTransaction {
            guard,
            working,
            failing_commits: self.failing_commits.clone(),
        })
    }

    async fn find_nodes_by_key(&self, key: &NodeKey) -> Result<Vec<EntityNode>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_nodes()
            .into_iter()
            .filter(|n| n.entity_type == key.entity_type && fold_name(&n.name) == key.name)
            .collect())
    }

    async fn find_nodes_by_names(&self, names: &[String]) -> Result<Vec<EntityNode>> {
        let wanted: HashSet<String> = names.iter().map(|n| fold_name(n)).collect();
        let state = self.state.lock().await;
        Ok(state
            .sorted_nodes()
            .into_iter()
            .filter(|n| wanted.contains(&fold_name(&n.name)))
            .collect())
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<EntityNode>> {
        Ok(self.state.lock().await.nodes.get(&id).cloned())
    }

    async fn list_nodes(&self, types: Option<&[EntityType]>) -> Result<Vec<EntityNode>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_nodes()
            .into_iter()
            .filter(|n| types.map_or(true, |ts| ts.contains(&n.entity_type)))
            .collect())
    }

    async fn list_edges(&self, relations: Option<&[RelationType]>) -> Result<Vec<EntityEdge>> {
        let state = self.state.lock().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| relations.map_or(true, |rs| rs.contains(&e.relation)))
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let state = self.state.lock().await;
        Ok(GraphCounts {
            nodes: state.nodes.len() as u64,
            edges: state.edges.len() as u64,
        })
    }

    async fn delete_node(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(node) = state.nodes.remove(&id) else {
            return Ok(false);
        };
        state.by_key.remove(&(node.name, node.entity_type));
        state
            .edges
            .retain(|e| e.source_node_uuid != id && e.target_node_uuid != id);
        Ok(true)
    }
}

/// Write transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<GraphState>,
    working: GraphState,
    failing_commits: Arc<AtomicUsize>,
}

impl GraphTransaction for MemoryTransaction {
    async fn insert_node_if_absent(&mut self, node: &EntityNode) -> Result<NodeInsert> {
        self.working.insert_node(node)
    }

    async fn merge_node_properties(
        &mut self,
        id: Uuid,
        properties: &Properties,
    ) -> Result<Option<EntityNode>> {
        Ok(self.working.nodes.get_mut(&id).map(|node| {
            merge_properties(&mut node.properties, properties);
            node.clone()
        }))
    }

    async fn insert_edge(&mut self, edge: &EntityEdge) -> Result<()> {
        for endpoint in [edge.source_node_uuid, edge.target_node_uuid] {
            if !self.working.nodes.contains_key(&endpoint) {
                return Err(ScigraphError::store(format!(
                    "edge {} references missing node {endpoint}",
                    edge.uuid
                )));
            }
        }
        self.working.edges.push(edge.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let should_fail = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ScigraphError::Store {
                message: "injected commit failure".to_string(),
                transient: true,
            });
        }

        let MemoryTransaction {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

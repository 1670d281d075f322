//! Graph store abstraction.
//!
//! Defines the [`GraphStore`] trait every backend implements, plus two
//! backends:
//! - [`memory::MemoryStore`]: in-process, for tests and dry runs.
//! - [`postgres::PostgresStore`]: the relational schema on PostgreSQL via `sqlx`.
//!
//! Reads go straight to the store. All writes go through a
//! [`GraphTransaction`], and only the graph writer opens one.

pub mod memory;
pub mod postgres;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::edges::{EntityEdge, RelationType};
use crate::errors::Result;
use crate::nodes::{EntityNode, EntityType, NodeKey, Properties};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Outcome of an insert-if-absent on the `(name, type)` constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInsert {
    /// The row was inserted with the caller's UUID.
    Created,
    /// A row with the same `(name, type)` already existed; here it is.
    Existing(EntityNode),
}

/// Node and edge counts, for status reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCounts {
    pub nodes: u64,
    pub edges: u64,
}

/// Trait representing a graph storage backend.
#[allow(async_fn_in_trait)]
pub trait GraphStore: Send + Sync {
    type Transaction: GraphTransaction;

    /// Verify connectivity.
    async fn ping(&self) -> Result<()>;

    /// Create the schema if it does not exist.
    async fn ensure_schema(&self) -> Result<()>;

    /// Drop everything and recreate an empty schema.
    async fn reset(&self) -> Result<()>;

    /// Open a write transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Nodes of `key.entity_type` whose stored name folds to `key.name`
    /// (case- and whitespace-insensitive). More than one result means the
    /// uniqueness invariant has been bypassed.
    async fn find_nodes_by_key(&self, key: &NodeKey) -> Result<Vec<EntityNode>>;

    /// Nodes whose stored name folds to any of `names`, any type.
    async fn find_nodes_by_names(&self, names: &[String]) -> Result<Vec<EntityNode>>;

    async fn get_node(&self, id: Uuid) -> Result<Option<EntityNode>>;

    /// All nodes, optionally restricted to some types.
    async fn list_nodes(&self, types: Option<&[EntityType]>) -> Result<Vec<EntityNode>>;

    /// All edges, optionally restricted to some relation types.
    async fn list_edges(&self, relations: Option<&[RelationType]>) -> Result<Vec<EntityEdge>>;

    async fn counts(&self) -> Result<GraphCounts>;

    /// Prune a node. Every edge touching it goes too. Returns whether the
    /// node existed.
    async fn delete_node(&self, id: Uuid) -> Result<bool>;
}

/// A write transaction. Dropping it without [`commit`](Self::commit) discards
/// every change made through it.
#[allow(async_fn_in_trait)]
pub trait GraphTransaction: Send {
    /// Insert `node` unless a node with the same `(name, type)` exists.
    async fn insert_node_if_absent(&mut self, node: &EntityNode) -> Result<NodeInsert>;

    /// Merge `properties` into node `id` (last write wins per key). Returns the
    /// updated node, or `None` if no such node exists.
    async fn merge_node_properties(
        &mut self,
        id: Uuid,
        properties: &Properties,
    ) -> Result<Option<EntityNode>>;

    /// Append an edge. Fails if either endpoint does not exist.
    async fn insert_edge(&mut self, edge: &EntityEdge) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

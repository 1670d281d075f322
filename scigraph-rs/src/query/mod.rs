//! Read-only views of the graph for renderers and status reports.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::driver::GraphStore;
use crate::edges::{EntityEdge, RelationType};
use crate::errors::{Result, ScigraphError};
use crate::nodes::{EntityNode, EntityType};

/// Every node and edge, or a filtered part of the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<EntityEdge>,
}

/// Which part of the graph [`GraphReader::subgraph`] returns.
///
/// Edges are kept only when both endpoints are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubgraphFilter {
    pub entity_types: Option<Vec<EntityType>>,
    pub relation_types: Option<Vec<RelationType>>,
    /// Restrict to nodes within `depth` hops of this node, ignoring edge
    /// direction.
    pub focus: Option<Uuid>,
    pub depth: usize,
}

impl SubgraphFilter {
    pub fn entity_types(mut self, types: impl IntoIterator<Item = EntityType>) -> Self {
        self.entity_types = Some(types.into_iter().collect());
        self
    }

    pub fn relation_types(mut self, relations: impl IntoIterator<Item = RelationType>) -> Self {
        self.relation_types = Some(relations.into_iter().collect());
        self
    }

    pub fn around(mut self, node: Uuid, depth: usize) -> Self {
        self.focus = Some(node);
        self.depth = depth;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: u64,
    pub edges: u64,
    pub nodes_by_type: BTreeMap<String, u64>,
    pub edges_by_type: BTreeMap<String, u64>,
}

/// An edge with its endpoint display names filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipView {
    pub source: String,
    pub source_type: EntityType,
    pub relation: RelationType,
    pub target: String,
    pub target_type: EntityType,
    pub citation_context: Option<String>,
}

pub struct GraphReader<'s, S> {
    store: &'s S,
}

impl<'s, S: GraphStore> GraphReader<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub async fn snapshot(&self) -> Result<GraphSnapshot> {
        Ok(GraphSnapshot {
            nodes: self.store.list_nodes(None).await?,
            edges: self.store.list_edges(None).await?,
        })
    }

    pub async fn subgraph(&self, filter: &SubgraphFilter) -> Result<GraphSnapshot> {
        let mut nodes = self.store.list_nodes(filter.entity_types.as_deref()).await?;
        let mut edges = self.store.list_edges(filter.relation_types.as_deref()).await?;

        let kept: HashSet<Uuid> = nodes.iter().map(|n| n.uuid).collect();
        edges.retain(|e| kept.contains(&e.source_node_uuid) && kept.contains(&e.target_node_uuid));

        if let Some(focus) = filter.focus {
            if !kept.contains(&focus) {
                return Err(ScigraphError::NodeNotFound(focus));
            }
            let reached = neighbourhood(focus, filter.depth, &edges);
            nodes.retain(|n| reached.contains(&n.uuid));
            edges.retain(|e| reached.contains(&e.source_node_uuid) && reached.contains(&e.target_node_uuid));
        }

        Ok(GraphSnapshot { nodes, edges })
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        let counts = self.store.counts().await?;
        let mut stats = GraphStats {
            nodes: counts.nodes,
            edges: counts.edges,
            ..Default::default()
        };
        for node in &self.store.list_nodes(None).await? {
            *stats.nodes_by_type.entry(node.entity_type.to_string()).or_default() += 1;
        }
        for edge in &self.store.list_edges(None).await? {
            *stats.edges_by_type.entry(edge.relation.to_string()).or_default() += 1;
        }
        Ok(stats)
    }

    /// Up to `limit` nodes, oldest first.
    pub async fn sample_nodes(&self, limit: usize) -> Result<Vec<EntityNode>> {
        let mut nodes = self.store.list_nodes(None).await?;
        nodes.truncate(limit);
        Ok(nodes)
    }

    /// Up to `limit` edges with endpoint names resolved.
    pub async fn sample_relationships(&self, limit: usize) -> Result<Vec<RelationshipView>> {
        let snapshot = self.snapshot().await?;
        let by_id: HashMap<Uuid, &EntityNode> = snapshot.nodes.iter().map(|n| (n.uuid, n)).collect();

        Ok(snapshot
            .edges
            .iter()
            .filter_map(|edge| {
                let source = by_id.get(&edge.source_node_uuid)?;
                let target = by_id.get(&edge.target_node_uuid)?;
                Some(RelationshipView {
                    source: source.display_name().to_string(),
                    source_type: source.entity_type,
                    relation: edge.relation.clone(),
                    target: target.display_name().to_string(),
                    target_type: target.entity_type,
                    citation_context: edge.citation_context.clone(),
                })
            })
            .take(limit)
            .collect())
    }
}

/// Breadth-first reach from `start` over `edges` in both directions.
fn neighbourhood(start: Uuid, depth: usize, edges: &[EntityEdge]) -> HashSet<Uuid> {
    let mut adjacent: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges {
        adjacent.entry(edge.source_node_uuid).or_default().push(edge.target_node_uuid);
        adjacent.entry(edge.target_node_uuid).or_default().push(edge.source_node_uuid);
    }

    let mut reached = HashSet::from([start]);
    let mut queue = VecDeque::from([(start, 0usize)]);
    while let Some((node, hops)) = queue.pop_front() {
        if hops == depth {
            continue;
        }
        for next in adjacent.get(&node).into_iter().flatten() {
            if reached.insert(*next) {
                queue.push_back((*next, hops + 1));
            }
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{GraphTransaction, MemoryStore};
    use crate::nodes::{Properties, DISPLAY_NAME};
    use serde_json::json;
    use chrono::Utc;

    struct Fixture {
        store: MemoryStore,
        eagles: Uuid,
        splat: Uuid,
        nerf: Uuid,
        mip: Uuid,
    }

    /// eagles -IMPROVES_ON-> splat -IMPROVES_ON-> nerf, eagles -EVALUATED_ON-> mip
    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let node = |name: &str, t| EntityNode::new(Uuid::new_v4(), name, t, Properties::new());
        let shown = |name: &str, display: &str| {
            let mut n = node(name, EntityType::Method);
            n.properties.insert(DISPLAY_NAME.into(), json!(display));
            n
        };
        let eagles = shown("eagles", "EAGLES");
        let splat = shown("3d gaussian splatting", "3D Gaussian Splatting");
        let nerf = node("nerf", EntityType::Method);
        let mip = node("mip nerf 360", EntityType::Dataset);
        let edge = |s: &EntityNode, t: &EntityNode, relation| EntityEdge {
            uuid: Uuid::new_v4(),
            source_node_uuid: s.uuid,
            target_node_uuid: t.uuid,
            relation,
            citation_context: Some(format!("{} vs {}", s.name, t.name)),
            properties: Properties::new(),
            created_at: Utc::now(),
        };

        let mut tx = store.begin().await.unwrap();
        for n in [&eagles, &splat, &nerf, &mip] {
            tx.insert_node_if_absent(n).await.unwrap();
        }
        tx.insert_edge(&edge(&eagles, &splat, RelationType::ImprovesOn)).await.unwrap();
        tx.insert_edge(&edge(&splat, &nerf, RelationType::ImprovesOn)).await.unwrap();
        tx.insert_edge(&edge(&eagles, &mip, RelationType::EvaluatedOn)).await.unwrap();
        tx.commit().await.unwrap();

        Fixture {
            store,
            eagles: eagles.uuid,
            splat: splat.uuid,
            nerf: nerf.uuid,
            mip: mip.uuid,
        }
    }

    #[tokio::test]
    async fn type_filter_drops_edges_to_filtered_nodes() {
        let f = fixture().await;
        let sub = GraphReader::new(&f.store)
            .subgraph(&SubgraphFilter::default().entity_types([EntityType::Method]))
            .await
            .unwrap();
        assert_eq!(sub.nodes.len(), 3);
        assert_eq!(sub.edges.len(), 2);
        assert!(sub.edges.iter().all(|e| e.relation == RelationType::ImprovesOn));
    }

    #[tokio::test]
    async fn neighbourhood_respects_depth() {
        let f = fixture().await;
        let reader = GraphReader::new(&f.store);

        let one_hop = reader
            .subgraph(&SubgraphFilter::default().around(f.splat, 1))
            .await
            .unwrap();
        let ids: HashSet<Uuid> = one_hop.nodes.iter().map(|n| n.uuid).collect();
        assert_eq!(ids, HashSet::from([f.splat, f.eagles, f.nerf]));
        assert_eq!(one_hop.edges.len(), 2);

        let two_hops = reader
            .subgraph(&SubgraphFilter::default().around(f.nerf, 2))
            .await
            .unwrap();
        assert!(two_hops.nodes.iter().any(|n| n.uuid == f.eagles));
        assert!(!two_hops.nodes.iter().any(|n| n.uuid == f.mip));

        let err = reader
            .subgraph(&SubgraphFilter::default().around(Uuid::new_v4(), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ScigraphError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn stats_and_samples() {
        let f = fixture().await;
        let reader = GraphReader::new(&f.store);

        let stats = reader.stats().await.unwrap();
        let counts = f.store.counts().await.unwrap();
        assert_eq!((stats.nodes, stats.edges), (counts.nodes, counts.edges));
        assert_eq!((stats.nodes, stats.edges), (4, 3));
        assert_eq!(stats.nodes_by_type["Method"], 3);
        assert_eq!(stats.edges_by_type["IMPROVES_ON"], 2);

        let sample = reader.sample_relationships(2).await.unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!(sample[0].source, "EAGLES");
        assert_eq!(sample[0].target, "3D Gaussian Splatting");
        assert_eq!(sample[1].target, "nerf");
        assert_eq!(reader.sample_nodes(1).await.unwrap().len(), 1);
    }
}

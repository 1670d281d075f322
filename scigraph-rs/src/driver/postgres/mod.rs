//! PostgreSQL graph store.
//!
//! Uses `sqlx` 0.8 with a shared `PgPool` and runtime-checked queries, so
//! building the crate never needs a live database.

use chrono::NaiveDateTime;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres};
use tracing::{debug, info};
use uuid::Uuid;

use super::{GraphCounts, GraphStore, GraphTransaction, NodeInsert};
use crate::edges::{EntityEdge, RelationType};
use crate::errors::{Result, ScigraphError};
use crate::nodes::{EntityNode, EntityType, NodeKey, Properties};
use crate::utils::fold_name;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        properties JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
        UNIQUE (name, type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        id UUID PRIMARY KEY,
        source_id UUID NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        target_id UUID NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        type TEXT NOT NULL,
        citation_context TEXT,
        properties JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
    )
    "#,
    "CREATE INDEX IF NOT EXISTS edges_source_id_idx ON edges (source_id)",
    "CREATE INDEX IF NOT EXISTS edges_target_id_idx ON edges (target_id)",
    // Serves key lookups, which compare the folded form of `name`.
    r"CREATE INDEX IF NOT EXISTS nodes_folded_name_idx ON nodes (type, (btrim(regexp_replace(lower(name), '[\s_-]+', ' ', 'g'))))",
];

/// SQL spelling of [`fold_name`] applied to the `name` column.
const FOLDED_NAME: &str = r"btrim(regexp_replace(lower(name), '[\s_-]+', ' ', 'g'))";

const NODE_COLUMNS: &str = "id, name, type, properties, created_at";

#[derive(Debug, FromRow)]
struct NodeRow {
    id: Uuid,
    name: String,
    #[sqlx(rename = "type")]
    entity_type: String,
    properties: serde_json::Value,
    created_at: NaiveDateTime,
}

impl TryFrom<NodeRow> for EntityNode {
    type Error = ScigraphError;

    fn try_from(row: NodeRow) -> Result<Self> {
        let entity_type = row
            .entity_type
            .parse::<EntityType>()
            .map_err(|e| ScigraphError::store(format!("node {}: {e}", row.id)))?;
        Ok(EntityNode {
            uuid: row.id,
            name: row.name,
            entity_type,
            properties: into_properties(row.properties),
            created_at: row.created_at.and_utc(),
        })
    }
}

#[derive(Debug, FromRow)]
struct EdgeRow {
    id: Uuid,
    source_id: Uuid,
    target_id: Uuid,
    #[sqlx(rename = "type")]
    relation: String,
    citation_context: Option<String>,
    properties: serde_json::Value,
    created_at: NaiveDateTime,
}

impl From<EdgeRow> for EntityEdge {
    fn from(row: EdgeRow) -> Self {
        EntityEdge {
            uuid: row.id,
            source_node_uuid: row.source_id,
            target_node_uuid: row.target_id,
            relation: RelationType::from(row.relation),
            citation_context: row.citation_context,
            properties: into_properties(row.properties),
            created_at: row.created_at.and_utc(),
        }
    }
}

fn into_properties(value: serde_json::Value) -> Properties {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Properties::new(),
    }
}

fn rows_to_nodes(rows: Vec<NodeRow>) -> Result<Vec<EntityNode>> {
    rows.into_iter().map(EntityNode::try_from).collect()
}

/// Dropped connections, pool exhaustion, serialization failures and
/// deadlocks are worth retrying. Constraint violations are not.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001" | "40P01")),
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn db_err(context: &'static str, err: sqlx::Error) -> ScigraphError {
    ScigraphError::Store {
        message: format!("{context}: {err}"),
        transient: is_transient(&err),
    }
}

/// [`GraphStore`] over the `nodes` / `edges` tables.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|err| db_err("Failed to connect to database", err))?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl GraphStore for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|err| db_err("Failed to reach database", err))?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|err| db_err("Failed to create schema", err))?;
        }
        debug!("schema ensured");
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to begin transaction", err))?;
        for statement in ["DROP TABLE IF EXISTS edges", "DROP TABLE IF EXISTS nodes"] {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|err| db_err("Failed to drop tables", err))?;
        }
        tx.commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))?;
        info!("graph tables dropped");
        self.ensure_schema().await
    }

    async fn begin(&self) -> Result<PostgresTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to begin transaction", err))?;
        Ok(PostgresTransaction { tx })
    }

    async fn find_nodes_by_key(&self, key: &NodeKey) -> Result<Vec<EntityNode>> {
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE type = $1 AND {FOLDED_NAME} = $2 \
             ORDER BY created_at, id"
        ))
        .bind(key.entity_type.as_str())
        .bind(&key.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("Failed to query nodes", err))?;
        rows_to_nodes(rows)
    }

    async fn find_nodes_by_names(&self, names: &[String]) -> Result<Vec<EntityNode>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let folded: Vec<String> = names.iter().map(|n| fold_name(n)).collect();
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE {FOLDED_NAME} = ANY($1) \
             ORDER BY created_at, id"
        ))
        .bind(&folded)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("Failed to query nodes", err))?;
        rows_to_nodes(rows)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<EntityNode>> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("Failed to query node", err))?;
        row.map(EntityNode::try_from).transpose()
    }

    async fn list_nodes(&self, types: Option<&[EntityType]>) -> Result<Vec<EntityNode>> {
        let types: Option<Vec<String>> =
            types.map(|ts| ts.iter().map(|t| t.as_str().to_string()).collect());
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes \
             WHERE $1::text[] IS NULL OR type = ANY($1) \
             ORDER BY created_at, id"
        ))
        .bind(types)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("Failed to list nodes", err))?;
        rows_to_nodes(rows)
    }

    async fn list_edges(&self, relations: Option<&[RelationType]>) -> Result<Vec<EntityEdge>> {
        let relations: Option<Vec<String>> =
            relations.map(|rs| rs.iter().map(|r| r.as_str().to_string()).collect());
        let rows = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT id, source_id, target_id, type, citation_context, properties, created_at
            FROM edges
            WHERE $1::text[] IS NULL OR type = ANY($1)
            ORDER BY created_at, id
            "#,
        )
        .bind(relations)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("Failed to list edges", err))?;
        Ok(rows.into_iter().map(EntityEdge::from).collect())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let (nodes, edges): (i64, i64) =
            sqlx::query_as("SELECT (SELECT count(*) FROM nodes), (SELECT count(*) FROM edges)")
                .fetch_one(&self.pool)
                .await
                .map_err(|err| db_err("Failed to count graph", err))?;
        Ok(GraphCounts {
            nodes: nodes as u64,
            edges: edges as u64,
        })
    }

    async fn delete_node(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| db_err("Failed to delete node", err))?;
        Ok(result.rows_affected() > 0)
    }
}

/// One open database transaction. Dropping it rolls back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl GraphTransaction for PostgresTransaction {
    async fn insert_node_if_absent(&mut self, node: &EntityNode) -> Result<NodeInsert> {
        let key = NodeKey::from(node);
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO nodes (id, name, type, properties, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name, type) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(node.uuid)
        .bind(&node.name)
        .bind(node.entity_type.as_str())
        .bind(serde_json::Value::Object(node.properties.clone()))
        .bind(node.created_at.naive_utc())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ScigraphError::IdentityConflict {
                    key: key.to_string(),
                    detail: format!("insert of {} rejected: {err}", node.uuid),
                }
            } else {
                db_err("Failed to insert node", err)
            }
        })?;

        if inserted.is_some() {
            return Ok(NodeInsert::Created);
        }

        let existing = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE name = $1 AND type = $2"
        ))
        .bind(&node.name)
        .bind(node.entity_type.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to query node", err))?;

        match existing {
            Some(row) => Ok(NodeInsert::Existing(row.try_into()?)),
            None => Err(ScigraphError::IdentityConflict {
                key: key.to_string(),
                detail: "insert conflicted but no row holds the key".to_string(),
            }),
        }
    }

    async fn merge_node_properties(
        &mut self,
        id: Uuid,
        properties: &Properties,
    ) -> Result<Option<EntityNode>> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "UPDATE nodes SET properties = properties || $2 WHERE id = $1 RETURNING {NODE_COLUMNS}"
        ))
        .bind(id)
        .bind(serde_json::Value::Object(properties.clone()))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to merge node properties", err))?;
        row.map(EntityNode::try_from).transpose()
    }

    async fn insert_edge(&mut self, edge: &EntityEdge) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO edges (id, source_id, target_id, type, citation_context, properties, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(edge.uuid)
        .bind(edge.source_node_uuid)
        .bind(edge.target_node_uuid)
        .bind(edge.relation.as_str())
        .bind(edge.citation_context.as_deref())
        .bind(serde_json::Value::Object(edge.properties.clone()))
        .bind(edge.created_at.naive_utc())
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to insert edge", err))?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|err| db_err("Failed to roll back transaction", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Option<PostgresStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PostgresStore::connect(&url, 4).await.ok()?;
        store.reset().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch database"]
    async fn insert_if_absent_and_cascade() {
        let Some(store) = store().await else { return };

        let a = EntityNode::new(Uuid::new_v4(), "nerf", EntityType::Method, Properties::new());
        let dup = EntityNode::new(Uuid::new_v4(), "nerf", EntityType::Method, Properties::new());
        let b = EntityNode::new(Uuid::new_v4(), "mip nerf 360", EntityType::Dataset, Properties::new());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.insert_node_if_absent(&a).await.unwrap(), NodeInsert::Created);
        assert!(matches!(
            tx.insert_node_if_absent(&dup).await.unwrap(),
            NodeInsert::Existing(n) if n.uuid == a.uuid
        ));
        tx.insert_node_if_absent(&b).await.unwrap();
        tx.insert_edge(&EntityEdge {
            uuid: Uuid::new_v4(),
            source_node_uuid: a.uuid,
            target_node_uuid: b.uuid,
            relation: RelationType::EvaluatedOn,
            citation_context: Some("evaluated on Mip-NeRF 360".into()),
            properties: Properties::new(),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.counts().await.unwrap(), GraphCounts { nodes: 2, edges: 1 });
        let found = store
            .find_nodes_by_key(&NodeKey::new("nerf", EntityType::Method))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        assert!(store.delete_node(b.uuid).await.unwrap());
        assert_eq!(store.counts().await.unwrap(), GraphCounts { nodes: 1, edges: 0 });
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch database"]
    async fn concurrent_inserts_of_one_key_settle_on_one_row() {
        let Some(store) = store().await else { return };

        let first = EntityNode::new(Uuid::new_v4(), "eagles", EntityType::Method, Properties::new());
        let second = EntityNode::new(Uuid::new_v4(), "eagles", EntityType::Method, Properties::new());

        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();
        assert_eq!(tx1.insert_node_if_absent(&first).await.unwrap(), NodeInsert::Created);

        // tx2 blocks on the uncommitted row until tx1 commits, then re-reads it.
        let (outcome, committed) = tokio::join!(tx2.insert_node_if_absent(&second), async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            tx1.commit().await
        });
        committed.unwrap();
        assert!(matches!(
            outcome.unwrap(),
            NodeInsert::Existing(winner) if winner.uuid == first.uuid
        ));
        tx2.commit().await.unwrap();

        assert_eq!(store.counts().await.unwrap(), GraphCounts { nodes: 1, edges: 0 });
    }

    #[test]
    fn key_lookups_have_a_matching_index() {
        assert!(SCHEMA
            .iter()
            .any(|s| s.contains("nodes_folded_name_idx") && s.contains(&format!("(type, ({FOLDED_NAME}))"))));
    }

    #[test]
    fn unknown_type_column_is_a_store_error() {
        let row = NodeRow {
            id: Uuid::new_v4(),
            name: "x".into(),
            entity_type: "Organization".into(),
            properties: serde_json::json!({}),
            created_at: chrono::Utc::now().naive_utc(),
        };
        assert!(matches!(EntityNode::try_from(row), Err(ScigraphError::Store { .. })));
    }
}

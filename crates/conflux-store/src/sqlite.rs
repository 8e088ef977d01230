use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conflux_graph::{GraphNode, Project, Topology};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use tracing::{debug, info};

use crate::types::{LinkRow, NodeRow, ProjectRow, ResourceRow, TriggerRow, to_db};
use crate::{Error, Store};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path.as_ref())
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn load(&self) -> Result<Topology, Error> {
    let resources: Vec<ResourceRow> = sqlx::query_as(
      r#"
      SELECT kind, id, body
      FROM resources
      ORDER BY kind, id
      "#,
    )
    .fetch_all(&self.pool)
    .await?;

    let nodes: Vec<NodeRow> = sqlx::query_as(
      r#"
      SELECT id, owner_id, org_id, resource_kind, resource_id, parent_node_id,
             origin_node_id, shared_origin_node_id, status, project_id
      FROM graph_nodes
      ORDER BY id
      "#,
    )
    .fetch_all(&self.pool)
    .await?;

    let projects: Vec<ProjectRow> = sqlx::query_as(
      r#"
      SELECT id, name, owner_id, org_id
      FROM projects
      ORDER BY id
      "#,
    )
    .fetch_all(&self.pool)
    .await?;

    let triggers: Vec<TriggerRow> = sqlx::query_as("SELECT body FROM trigger_edges ORDER BY id")
      .fetch_all(&self.pool)
      .await?;
    let links: Vec<LinkRow> = sqlx::query_as("SELECT body FROM flow_links ORDER BY id")
      .fetch_all(&self.pool)
      .await?;

    let resources = resources
      .into_iter()
      .map(ResourceRow::into_resource)
      .collect::<Result<Vec<_>, _>>()?;
    let nodes = nodes
      .into_iter()
      .map(GraphNode::try_from)
      .collect::<Result<Vec<_>, _>>()?;

    debug!(
      resources = resources.len(),
      nodes = nodes.len(),
      triggers = triggers.len(),
      links = links.len(),
      "topology loaded"
    );
    let topology = Topology::from_parts(
      nodes,
      resources,
      projects.into_iter().map(Project::from).collect(),
      triggers.into_iter().map(|row| row.body.0).collect(),
      links.into_iter().map(|row| row.body.0).collect(),
    )?;
    Ok(topology)
  }

  async fn save(&self, topology: &Topology) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;

    for table in ["graph_nodes", "resources", "projects", "trigger_edges", "flow_links"] {
      sqlx::query(&format!("DELETE FROM {}", table))
        .execute(&mut *tx)
        .await?;
    }

    for resource in topology.resources() {
      sqlx::query("INSERT INTO resources (kind, id, body) VALUES (?, ?, ?)")
        .bind(resource.kind().as_str())
        .bind(to_db(resource.id()))
        .bind(Json(resource))
        .execute(&mut *tx)
        .await?;
    }

    for node in topology.nodes() {
      sqlx::query(
        r#"
        INSERT INTO graph_nodes (id, owner_id, org_id, resource_kind, resource_id, parent_node_id,
                                 origin_node_id, shared_origin_node_id, status, project_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
      )
      .bind(to_db(node.id.0))
      .bind(to_db(node.owner_id.0))
      .bind(to_db(node.org_id.0))
      .bind(node.resource.kind.as_str())
      .bind(to_db(node.resource.id))
      .bind(node.parent_node_id.map(|id| to_db(id.0)))
      .bind(to_db(node.origin_node_id.0))
      .bind(node.shared_origin_node_id.map(|id| to_db(id.0)))
      .bind(node.status.as_str())
      .bind(node.project_id.map(|id| to_db(id.0)))
      .execute(&mut *tx)
      .await?;
    }

    for project in topology.projects() {
      sqlx::query("INSERT INTO projects (id, name, owner_id, org_id) VALUES (?, ?, ?, ?)")
        .bind(to_db(project.id.0))
        .bind(&project.name)
        .bind(to_db(project.owner_id.0))
        .bind(to_db(project.org_id.0))
        .execute(&mut *tx)
        .await?;
    }

    for trigger in topology.triggers() {
      sqlx::query(
        r#"
        INSERT INTO trigger_edges (id, triggering_origin_node_id, triggered_origin_node_id, body)
        VALUES (?, ?, ?, ?)
        "#,
      )
      .bind(to_db(trigger.id))
      .bind(to_db(trigger.triggering_origin_node_id.0))
      .bind(to_db(trigger.triggered_origin_node_id.0))
      .bind(Json(trigger))
      .execute(&mut *tx)
      .await?;
    }

    for link in topology.links() {
      sqlx::query(
        r#"
        INSERT INTO flow_links (id, left_origin_node_id, right_origin_node_id, body)
        VALUES (?, ?, ?, ?)
        "#,
      )
      .bind(to_db(link.id))
      .bind(to_db(link.left_origin_node_id.0))
      .bind(to_db(link.right_origin_node_id.0))
      .bind(Json(link))
      .execute(&mut *tx)
      .await?;
    }

    let node_count = topology.node_count();
    sqlx::query("INSERT INTO topology_saves (node_count, saved_at) VALUES (?, ?)")
      .bind(node_count as i64)
      .bind(Utc::now())
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    info!(nodes = node_count, "topology saved");
    Ok(())
  }

  async fn last_saved_at(&self) -> Result<Option<DateTime<Utc>>, Error> {
    let saved_at: Option<DateTime<Utc>> =
      sqlx::query_scalar("SELECT saved_at FROM topology_saves ORDER BY id DESC LIMIT 1")
        .fetch_optional(&self.pool)
        .await?;
    Ok(saved_at)
  }
}

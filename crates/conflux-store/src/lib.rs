//! Conflux Store
//!
//! Persistence for the topology arena. The engine works on an in-memory
//! [`conflux_graph::Topology`]; a [`Store`] loads it at startup and writes it
//! back after a batch of operations commits.
//!
//! Saves replace the stored topology inside one database transaction, so a
//! reader sees either the previous snapshot or the new one.

mod sqlite;
mod types;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conflux_graph::{GraphError, Topology};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// Stored rows do not form a valid topology.
  #[error("stored topology is invalid: {0}")]
  Graph(#[from] GraphError),

  /// A stored value could not be decoded.
  #[error("corrupt row: {0}")]
  Corrupt(String),
}

/// Storage trait for topology snapshots.
#[async_trait]
pub trait Store: Send + Sync {
  /// Load the stored topology. An empty database yields an empty topology.
  async fn load(&self) -> Result<Topology, Error>;

  /// Replace the stored topology with `topology`.
  async fn save(&self, topology: &Topology) -> Result<(), Error>;

  /// When the topology was last saved.
  async fn last_saved_at(&self) -> Result<Option<DateTime<Utc>>, Error>;
}

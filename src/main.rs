mod batch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conflux_config::EngineConfig;
use conflux_engine::{
  AdminLevel, ChannelPublisher, ControlPlaneEvent, Grant, StaticAccess, TopologyEngine, Viewer,
};
use conflux_graph::{OrgId, ResourceKind, ResourceRef, UserId};
use conflux_store::{SqliteStore, Store};

/// Conflux - control plane for data pipeline topologies
#[derive(Parser)]
#[command(name = "conflux")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.conflux)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to the topology database (default: <data-dir>/topology.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Path to the engine config (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Path to a JSON list of access grants
  #[arg(long, global = true)]
  grants: Option<PathBuf>,

  /// User to act as
  #[arg(long, global = true, default_value_t = 1)]
  user: u64,

  /// Organization of the acting user
  #[arg(long, global = true, default_value_t = 1)]
  org: u64,

  /// Administrative level of the acting user
  #[arg(long, global = true, value_enum, default_value_t = Admin::None)]
  admin: Admin,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Apply a batch of operations and save the result
  Apply {
    /// Path to the batch file (JSON array of operations)
    batch_file: PathBuf,
  },

  /// Render the flow containing a resource
  Flow {
    /// Resource kind (source, set, sink)
    kind: ResourceKind,

    /// Resource id
    id: u64,
  },

  /// List every flow visible to the acting user
  List {
    /// Restrict to flows reachable from these sources
    #[arg(long = "source")]
    sources: Vec<u64>,
  },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Admin {
  None,
  OrgAdmin,
  SuperUser,
}

impl From<Admin> for AdminLevel {
  fn from(admin: Admin) -> Self {
    match admin {
      Admin::None => AdminLevel::None,
      Admin::OrgAdmin => AdminLevel::OrgAdmin,
      Admin::SuperUser => AdminLevel::SuperUser,
    }
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conflux=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let Some(command) = cli.command.as_ref() else {
    println!("conflux - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run(&cli, command).await })
}

async fn run(cli: &Cli, command: &Commands) -> Result<()> {
  let data_dir = match &cli.data_dir {
    Some(dir) => dir.clone(),
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".conflux"),
  };
  let db_path = cli
    .db
    .clone()
    .unwrap_or_else(|| data_dir.join("topology.db"));
  if let Some(parent) = db_path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
  }

  let config = match &cli.config {
    Some(path) => EngineConfig::from_file(path)
      .with_context(|| format!("failed to load config: {}", path.display()))?,
    None => EngineConfig::default(),
  };
  let access = match &cli.grants {
    Some(path) => load_grants(path).await?,
    None => StaticAccess::new(),
  };
  let viewer = Viewer {
    user_id: UserId(cli.user),
    org_id: OrgId(cli.org),
    admin_level: cli.admin.into(),
  };

  let store = SqliteStore::open(&db_path)
    .await
    .with_context(|| format!("failed to open database: {}", db_path.display()))?;
  let topology = store.load().await.context("failed to load topology")?;
  eprintln!(
    "Loaded topology: {} nodes from {}",
    topology.node_count(),
    db_path.display()
  );

  let (sender, receiver) = mpsc::unbounded_channel();
  let delivery = tokio::spawn(deliver_events(receiver));

  let mut engine = TopologyEngine::new(Arc::new(config), Arc::new(access))
    .with_topology(topology)
    .with_publisher(Arc::new(ChannelPublisher::new(sender)));

  let output = match command {
    Commands::Apply { batch_file } => {
      let content = tokio::fs::read_to_string(batch_file)
        .await
        .with_context(|| format!("failed to read batch file: {}", batch_file.display()))?;
      let operations = batch::parse(&content)
        .with_context(|| format!("invalid batch file: {}", batch_file.display()))?;
      eprintln!("Applying {} operations", operations.len());

      let results = batch::apply_all(&mut engine, &viewer, operations)?;
      store
        .save(engine.topology())
        .await
        .context("failed to save topology")?;
      eprintln!("Saved topology: {} nodes", engine.topology().node_count());
      serde_json::to_value(results)?
    }
    Commands::Flow { kind, id } => {
      let result = engine
        .flow(&viewer, ResourceRef::new(*kind, *id))
        .context("failed to assemble flow")?;
      serde_json::to_value(result)?
    }
    Commands::List { sources } => {
      let filter = (!sources.is_empty()).then_some(sources.as_slice());
      let result = engine
        .list_flows(&viewer, filter)
        .context("failed to list flows")?;
      eprintln!("Found {} resources", result.len());
      serde_json::to_value(result)?
    }
  };

  // Dropping the engine closes the channel so the delivery task finishes.
  drop(engine);
  if let Err(e) = delivery.await {
    warn!(error = %e, "event delivery task failed");
  }

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn load_grants(path: &Path) -> Result<StaticAccess> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read grants file: {}", path.display()))?;
  let grants: Vec<Grant> = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse grants file: {}", path.display()))?;
  Ok(StaticAccess::from_grants(grants))
}

async fn deliver_events(mut receiver: mpsc::UnboundedReceiver<ControlPlaneEvent>) {
  while let Some(event) = receiver.recv().await {
    info!(
      resource = %event.resource,
      event_type = ?event.event_type,
      "control plane event"
    );
  }
}

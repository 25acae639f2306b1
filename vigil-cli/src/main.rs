//! Vigil CLI
//!
//! Threat-intelligence graph with incremental MISP feed sync.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use vigil_core::{
    GraphError, GraphStore, InvestigationId, LinkId, LinkManager, LinkRef, NewLinkParams, NodeId,
    NodeKind, Rejection, SnapshotLock,
};
use vigil_feeds::CursorStore;
use vigil_runtime::{InstanceOutcome, SyncCycle, VigilConfig};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(author, version, about = "Vigil: threat-intelligence graph with MISP feed sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, env = "VIGIL_CONFIG", default_value = "vigil.toml")]
    config: PathBuf,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every configured MISP instance
    Sync {
        /// Keep running, one cycle per configured interval
        #[arg(long)]
        watch: bool,

        /// Stop after this many cycles in watch mode (0 = until ctrl-c)
        #[arg(long, default_value = "0")]
        cycles: usize,
    },

    /// Show instances, cursors and graph size
    Status,

    /// Add or look up observables and entities
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },

    /// Create, delete and describe links
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },

    /// Group links into investigations
    Investigation {
        #[command(subcommand)]
        action: InvestigationAction,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    /// Get or create a node
    Add { kind: String, value: String },
}

#[derive(Subcommand)]
enum LinkAction {
    /// Create a link (historical when both dates are given, active otherwise)
    New {
        /// Class of the source node (observable, indicator, entity)
        #[arg(long)]
        type_src: Option<String>,
        #[arg(long)]
        src: Option<String>,
        #[arg(long)]
        type_dst: Option<String>,
        #[arg(long)]
        dst: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        source: Option<String>,
        /// RFC 3339 timestamp
        #[arg(long)]
        first_seen: Option<DateTime<Utc>>,
        /// RFC 3339 timestamp
        #[arg(long)]
        last_seen: Option<DateTime<Utc>>,
    },

    /// Delete one link
    Delete { id: String },

    /// Delete several links
    DeleteMany { ids: Vec<String> },

    /// Set the description of several links
    UpdateDescription {
        #[arg(long)]
        description: String,
        ids: Vec<String>,
    },

    /// List links touching a node
    List { node: String },
}

#[derive(Subcommand)]
enum InvestigationAction {
    /// Create an investigation
    Create { name: String },

    /// Reference a link from an investigation
    Attach { investigation: String, link: String },

    /// Show an investigation's link slots
    Show { investigation: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Sync { watch, cycles } => run_sync(&config, watch, cycles).await?,
        Commands::Status => show_status(&config)?,
        Commands::Node { action } => run_node(&config, action)?,
        Commands::Link { action } => run_link(&config, action)?,
        Commands::Investigation { action } => run_investigation(&config, action)?,
    }

    Ok(())
}

/// A missing config file is fine for graph-only commands
fn load_config(path: &Path) -> Result<VigilConfig> {
    if path.exists() {
        VigilConfig::load(path)
    } else {
        Ok(VigilConfig::default())
    }
}

async fn run_sync(config: &VigilConfig, watch: bool, cycles: usize) -> Result<()> {
    let mut cycle = SyncCycle::from_config(config)?;
    if cycle.instances().is_empty() {
        println!("⚠️  No usable MISP instances configured");
        return Ok(());
    }

    if watch {
        println!(
            "🔁 Syncing {} instances every {}s",
            cycle.instances().len(),
            config.interval().as_secs()
        );
        return cycle.watch(config.interval(), cycles).await;
    }

    let report = cycle.run_once(Local::now().date_naive()).await?;
    for outcome in &report.outcomes {
        match outcome {
            InstanceOutcome::Synced(sync) => {
                let mark = if sync.cursor_advanced { "✅" } else { "⚠️ " };
                println!(
                    "{} {} ({}): {} windows, {} events, {} new nodes, stopped on {}",
                    mark,
                    sync.instance,
                    sync.mode,
                    sync.windows,
                    sync.imported,
                    sync.attributes.created,
                    sync.stop
                );
            }
            InstanceOutcome::Panicked { instance, message } => {
                println!("❌ {}: aborted ({})", instance, message);
            }
        }
    }
    println!(
        "📊 Graph: {} nodes, {} links",
        cycle.store().node_count(),
        cycle.store().link_count()
    );

    Ok(())
}

fn show_status(config: &VigilConfig) -> Result<()> {
    let cursors = CursorStore::load(&config.state_path)?;
    let store = GraphStore::open(&config.graph_path)?;

    println!("📡 Instances:");
    let instances = config.feed_instances();
    if instances.is_empty() {
        println!("   (none configured)");
    }
    for instance in &instances {
        let last_run = cursors
            .get(instance.name())
            .last_run
            .map(|d| d.to_string())
            .unwrap_or_else(|| "never (next sync is a backfill)".to_string());
        println!(
            "   {} [{}] {} - last run: {}",
            instance.name(),
            instance.display_name,
            instance.endpoint.url,
            last_run
        );
    }

    println!("\n📊 Graph ({}):", config.graph_path.display());
    println!("   Nodes: {}", store.node_count());
    println!("   Links: {}", store.link_count());
    println!("   Investigations: {}", store.investigation_count());

    let dangling = store.dangling_references();
    if !dangling.is_empty() {
        println!("   ⚠️  {} dangling investigation references", dangling.len());
    }

    Ok(())
}

/// Open the graph for a read-modify-write. Holding the lock keeps a running
/// `sync --watch` from saving over this command's changes.
fn open_graph(config: &VigilConfig) -> Result<(SnapshotLock, Arc<GraphStore>)> {
    let lock = SnapshotLock::acquire(&config.graph_path)?;
    let store = Arc::new(GraphStore::open(&config.graph_path)?);
    Ok((lock, store))
}

fn run_node(config: &VigilConfig, action: NodeAction) -> Result<()> {
    let (_lock, store) = open_graph(config)?;

    match action {
        NodeAction::Add { kind, value } => {
            let kind = NodeKind::from_name(&kind).map_err(rejected)?;
            let node = store.get_or_create(kind, &value).map_err(rejected)?;
            let state = if node.created { "created" } else { "exists" };
            println!("{} {} {} ({})", node.id, node.kind, node.value, state);
        }
    }

    store.save(&config.graph_path)?;
    Ok(())
}

fn run_link(config: &VigilConfig, action: LinkAction) -> Result<()> {
    let (_lock, store) = open_graph(config)?;
    let manager = LinkManager::new(store.clone());

    match action {
        LinkAction::New {
            type_src,
            src,
            type_dst,
            dst,
            description,
            source,
            first_seen,
            last_seen,
        } => {
            let params = NewLinkParams {
                type_src,
                type_dst,
                link_src: src,
                link_dst: dst,
                description,
                source,
                first_seen,
                last_seen,
            };
            let link = manager.new_link(&params).map_err(rejected)?;
            println!(
                "✅ {} {} → {} ({}, last seen {})",
                link.id,
                link.src,
                link.dst,
                if link.active { "active" } else { "historical" },
                link.last_seen
            );
        }
        LinkAction::Delete { id } => {
            let id = parse_link_id(&id)?;
            manager.delete_link(id).map_err(rejected)?;
            println!("🗑️  Deleted {}", id);
        }
        LinkAction::DeleteMany { ids } => {
            let ids = ids
                .iter()
                .map(|id| parse_link_id(id))
                .collect::<Result<Vec<_>>>()?;
            let removed = manager.delete_links(&ids);
            println!("🗑️  Deleted {} of {} links", removed.len(), ids.len());
        }
        LinkAction::UpdateDescription { description, ids } => {
            let ids = ids
                .iter()
                .map(|id| parse_link_id(id))
                .collect::<Result<Vec<_>>>()?;
            let update = manager.update_description(&ids, &description);
            println!("✏️  Updated {} links", update.updated.len());
            for (id, e) in &update.failed {
                println!("   ⚠️  {}: {}", id, e);
            }
        }
        LinkAction::List { node } => {
            let node = NodeId::parse(&node).ok_or_else(|| anyhow!("Invalid node id: {}", node))?;
            for link in manager.links_of(node) {
                println!(
                    "{} {} → {} [{}] {} ({} .. {})",
                    link.id,
                    link.src,
                    link.dst,
                    link.source,
                    link.description,
                    link.first_seen,
                    link.last_seen
                );
            }
            return Ok(());
        }
    }

    store.save(&config.graph_path)?;
    Ok(())
}

fn run_investigation(config: &VigilConfig, action: InvestigationAction) -> Result<()> {
    let (_lock, store) = open_graph(config)?;

    match action {
        InvestigationAction::Create { name } => {
            let id = store.create_investigation(&name);
            println!("{} {}", id, name);
        }
        InvestigationAction::Attach { investigation, link } => {
            let investigation = parse_investigation_id(&investigation)?;
            store
                .attach_link(investigation, parse_link_id(&link)?)
                .map_err(rejected)?;
        }
        InvestigationAction::Show { investigation } => {
            let id = parse_investigation_id(&investigation)?;
            let inv = store
                .investigation(id)
                .ok_or_else(|| anyhow!("Investigation {} not found", id))?;
            println!("{} ({} slots)", inv.name, inv.links.len());
            for (pos, slot) in inv.links.iter().enumerate() {
                match slot {
                    LinkRef::Live { id } => println!("   {:>3}  {}", pos, id),
                    LinkRef::Tombstone { token, .. } => println!("   {:>3}  {} (deleted)", pos, token),
                }
            }
            return Ok(());
        }
    }

    store.save(&config.graph_path)?;
    Ok(())
}

fn parse_link_id(raw: &str) -> Result<LinkId> {
    LinkId::parse(raw).ok_or_else(|| anyhow!("Invalid link id: {}", raw))
}

fn parse_investigation_id(raw: &str) -> Result<InvestigationId> {
    InvestigationId::parse(raw).ok_or_else(|| anyhow!("Invalid investigation id: {}", raw))
}

/// Prefix a graph error with the rejection class a client would see
fn rejected(e: GraphError) -> anyhow::Error {
    let class = match e.rejection() {
        Rejection::BadRequest => "bad request",
        Rejection::NotFound => "not found",
        Rejection::Internal => "internal error",
    };
    anyhow!("{}: {}", class, e)
}

//! Command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cairn_enrich::{Enricher, LoggingProvider, OpenAiCompatibleProvider};
use cairn_graph::{
    FileWatcher, GraphStore, GraphUpdater, QueryEngine, StoreError, UpdateSummary, UpdaterConfig,
    grammar,
};
use tracing::{debug, error, info};

use crate::config::{CONFIG_FILE, Config, DEFAULT_CONFIG};

/// A loaded config with its paths resolved.
pub struct Workspace {
    pub config: Config,
    pub cairn_dir: PathBuf,
    pub project_root: PathBuf,
    pub graph_path: PathBuf,
}

impl Workspace {
    pub fn new(config: Config, cairn_dir: PathBuf) -> Self {
        let project_root = config.resolve_project_root(&cairn_dir);
        let graph_path = config.resolve_graph_path(&cairn_dir);
        Self {
            config,
            cairn_dir,
            project_root,
            graph_path,
        }
    }

    fn query_engine(&self) -> Result<QueryEngine> {
        match self.config.resolve_queries_dir(&self.cairn_dir) {
            Some(dir) => QueryEngine::with_queries_dir(&dir)
                .with_context(|| format!("Failed to load queries from {}", dir.display())),
            None => Ok(QueryEngine::new()),
        }
    }

    fn updater(&self) -> Result<GraphUpdater> {
        let config = UpdaterConfig {
            project_root: self.project_root.clone(),
            graph_path: self.graph_path.clone(),
            walk: self.config.walk_options(),
        };
        Ok(GraphUpdater::new(config, self.query_engine()?))
    }

    fn load_graph(&self) -> Result<GraphStore> {
        match GraphStore::load(&self.graph_path) {
            Ok(store) => Ok(store),
            Err(StoreError::NotFound(path)) => {
                bail!("No graph at {}. Run 'cairn update' first.", path.display())
            }
            Err(e) => Err(e).context("Failed to load graph"),
        }
    }
}

pub fn init(cairn_dir: &Path, force: bool) -> Result<()> {
    let config_path = cairn_dir.join(CONFIG_FILE);
    if config_path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(cairn_dir)
        .with_context(|| format!("Failed to create {}", cairn_dir.display()))?;
    std::fs::write(&config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    info!("Created {}", config_path.display());
    info!("Next steps:");
    info!("  1. Edit {} to configure your project", config_path.display());
    info!("  2. Run 'cairn update' to build the code graph");
    info!("  3. Run 'cairn enrich' to summarize it");
    Ok(())
}

pub fn update(ws: &Workspace) -> Result<()> {
    info!(root = %ws.project_root.display(), "Updating graph");
    let mut updater = ws.updater()?;
    let (store, summary) = updater.update().context("Update failed")?;

    print_summary(&summary);
    let stats = store.stats();
    println!("Graph: {} nodes, {} edges", stats.nodes, stats.edges);
    Ok(())
}

fn print_summary(summary: &UpdateSummary) {
    println!("{summary}");
    for skipped in &summary.skipped {
        println!("  skipped {}: {}", skipped.path, skipped.reason);
    }
}

pub async fn enrich(ws: &Workspace, batch_size: Option<usize>, force: bool) -> Result<()> {
    let mut store = ws.load_graph()?;

    let provider_config = ws.config.provider_config()?;
    info!(
        provider = %provider_config.kind,
        model = %provider_config.model,
        "Using enrichment provider"
    );
    let provider = OpenAiCompatibleProvider::new(provider_config)
        .context("Failed to configure enrichment provider")?;

    let enrich_config = ws.config.enrich_config(ws.project_root.clone(), force);
    let mut enricher = Enricher::new(LoggingProvider::new(provider), enrich_config);
    enricher.enrich(&mut store, batch_size).await;

    store.save(&ws.graph_path).context("Failed to save graph")?;
    if let Some(report) = enricher.last_report() {
        println!("{report}");
    }
    Ok(())
}

pub fn stats(ws: &Workspace) -> Result<()> {
    let store = ws.load_graph()?;
    let stats = store.stats();
    let code = store.code_nodes();
    let enriched = code.iter().filter(|c| c.is_enriched()).count();

    println!("Graph: {}", ws.graph_path.display());
    println!("Nodes: {}", stats.nodes);
    for (kind, count) in &stats.nodes_by_kind {
        println!("  {kind}: {count}");
    }
    println!("Edges: {}", stats.edges);
    for (relation, count) in &stats.edges_by_relation {
        println!("  {relation}: {count}");
    }
    println!("Enriched: {}/{} code nodes", enriched, code.len());

    match store.metadata() {
        Some(meta) => {
            let revision = meta.revision.as_deref().unwrap_or("unknown revision");
            println!(
                "Last build: {} ({})",
                meta.last_build.format("%Y-%m-%d %H:%M:%S UTC"),
                revision
            );
        }
        None => println!("Last build: never"),
    }
    Ok(())
}

pub fn languages(ws: &Workspace) -> Result<()> {
    let engine = ws.query_engine()?;
    for language in engine.list_supported_languages() {
        let extensions = grammar(&language)
            .map(|g| g.extensions.join(", "))
            .unwrap_or_default();
        println!("{language}\t{extensions}");
    }
    Ok(())
}

pub fn show(ws: &Workspace, id: &str) -> Result<()> {
    let store = ws.load_graph()?;
    let description = match store.describe(id) {
        Ok(value) => value,
        Err(StoreError::MissingNode(_)) => bail!("No node with id '{id}'"),
        Err(e) => return Err(e.into()),
    };
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

/// Run one update, then another after every debounced batch of changes.
/// Blocks until the watcher stops.
pub fn watch(ws: &Workspace) -> Result<()> {
    let mut updater = ws.updater()?;
    let (_, summary) = updater.update().context("Initial update failed")?;
    print_summary(&summary);

    let watcher = FileWatcher::new(
        &ws.project_root,
        ws.config.walk_options(),
        ws.config.debounce(),
    )
    .context("Failed to start file watcher")?;
    info!(root = %watcher.root().display(), "Watching for changes (Ctrl-C to stop)");

    while let Some(changed) = watcher.next_batch() {
        debug!(files = ?changed, "Files changed");
        match updater.update() {
            Ok((_, summary)) if summary.has_changes() => {
                info!(%summary, "Graph updated");
                for skipped in &summary.skipped {
                    tracing::warn!(path = %skipped.path, reason = %skipped.reason, "Skipped file");
                }
            }
            Ok(_) => debug!("No indexed content changed"),
            Err(e) => error!(error = %e, "Update failed"),
        }
    }
    Ok(())
}

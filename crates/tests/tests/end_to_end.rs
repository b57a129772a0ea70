//! End-to-end flows across cairn-graph and cairn-enrich
//!
//! Each test builds a scratch project, indexes it with the updater,
//! enriches it through a scripted provider, and checks what lands in the
//! persisted graph.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cairn_enrich::{
    CompletionProvider, EnrichConfig, Enricher, MockProvider, ProviderError, summary_reply,
};
use cairn_graph::{GraphNode, GraphStore, GraphUpdater, QueryEngine, Relation};
use cairn_tests::{graph_path, updater_config, write_files};

const PROJECT: &[(&str, &str)] = &[
    ("pkg/__init__.py", ""),
    (
        "pkg/util.py",
        "def helper(x):\n    return x + 1\n\n\nclass Box:\n    def get(self):\n        return 1\n",
    ),
    (
        "main.py",
        "from pkg.util import helper\nimport os\n\n\ndef main():\n    return helper(1)\n",
    ),
];

fn enrich_config(root: &std::path::Path) -> EnrichConfig {
    EnrichConfig {
        project_root: Some(root.to_path_buf()),
        initial_backoff: Duration::from_millis(1),
        ..EnrichConfig::default()
    }
}

fn summary_of(store: &GraphStore, id: &str) -> Option<String> {
    store.node(id)?.as_code()?.summary.clone()
}

/// Index, enrich, persist, edit, re-index, enrich again.
#[tokio::test]
async fn test_index_enrich_and_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_files(root, PROJECT).unwrap();

    let mut updater = GraphUpdater::new(updater_config(root), QueryEngine::new());
    let (mut store, summary) = updater.update().unwrap();
    assert_eq!(summary.added, 3);
    assert_eq!(summary.unresolved_imports, 1);
    assert_eq!(store.imports_of("main.py"), vec!["pkg/util.py"]);

    let code_ids: Vec<String> = store.code_nodes().iter().map(|c| c.id.clone()).collect();
    assert_eq!(
        code_ids,
        vec![
            "main.py::main",
            "pkg/util.py::Box",
            "pkg/util.py::get",
            "pkg/util.py::helper"
        ]
    );

    // Enrich everything and persist.
    let mock = Arc::new(MockProvider::summarizing());
    let mut enricher = Enricher::new(Arc::clone(&mock), enrich_config(root));
    enricher.enrich(&mut store, Some(3)).await;
    assert_eq!(mock.request_count(), 2);
    assert!(mock.requests()[0].prompt.contains("return helper(1)"));
    store.save(&graph_path(root)).unwrap();

    let reloaded = GraphStore::load(&graph_path(root)).unwrap();
    assert_eq!(reloaded, store);
    assert_eq!(
        summary_of(&reloaded, "pkg/util.py::helper").as_deref(),
        Some("summary of pkg/util.py::helper")
    );

    // Nothing left to do.
    let mut store = reloaded;
    enricher.enrich(&mut store, Some(3)).await;
    assert_eq!(mock.request_count(), 2);

    // Editing main.py re-creates its declarations without summaries; other
    // files keep theirs.
    fs::write(
        root.join("main.py"),
        "from pkg.util import helper\n\n\ndef main():\n    return helper(2)\n\n\ndef extra():\n    pass\n",
    )
    .unwrap();
    let (mut store, summary) = updater.update().unwrap();
    assert_eq!((summary.modified, summary.unchanged), (1, 2));
    assert!(summary_of(&store, "main.py::main").is_none());
    assert!(summary_of(&store, "main.py::extra").is_none());
    assert!(summary_of(&store, "pkg/util.py::Box").is_some());

    enricher.enrich(&mut store, Some(3)).await;
    assert_eq!(mock.request_count(), 3);
    assert_eq!(
        mock.requests()[2].node_ids(),
        vec!["main.py::extra", "main.py::main"]
    );
    assert!(summary_of(&store, "main.py::extra").is_some());
}

/// Deleting a file removes its node, its declarations and every edge
/// touching them.
#[test]
fn test_delete_purges_file_subgraph() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_files(root, PROJECT).unwrap();

    let mut updater = GraphUpdater::new(updater_config(root), QueryEngine::new());
    let (before, _) = updater.update().unwrap();
    let stats = before.stats();
    assert_eq!(stats.edges_by_relation.get(Relation::Imports.as_str()), Some(&1));

    fs::remove_file(root.join("pkg/util.py")).unwrap();
    let (after, summary) = updater.update().unwrap();

    assert_eq!(summary.deleted, 1);
    assert!(!after.contains("pkg/util.py"));
    assert!(after.code_nodes_in_file("pkg/util.py").is_empty());
    assert!(
        after
            .code_nodes()
            .iter()
            .all(|c| !c.id.starts_with("pkg/util.py::"))
    );

    // `pkg.util.helper` falls back to the package itself.
    assert_eq!(after.imports_of("main.py"), vec!["pkg/__init__.py"]);
    let main = after.node("main.py").and_then(GraphNode::as_file).unwrap();
    assert_eq!(main.unresolved_imports, vec!["os".to_string()]);
}

/// Provider that tracks how many calls are in flight at once.
struct SlowProvider {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowProvider {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompletionProvider for SlowProvider {
    async fn send(&self, _system: &str, prompt: &str) -> Result<String, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        // Later batches finish first.
        tokio::time::sleep(Duration::from_millis(60 - 20 * call as u64)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let ids: Vec<String> = prompt
            .lines()
            .filter_map(|l| l.strip_prefix("Node: "))
            .map(str::to_string)
            .collect();
        if call == 1 {
            return Err(ProviderError::Auth("key revoked".to_string()));
        }
        Ok(summary_reply(&ids))
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Batches run concurrently, complete out of order, and one failing batch
/// leaves the others intact.
#[tokio::test]
async fn test_batches_run_concurrently_with_isolated_failure() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let source: String = (0..9)
        .map(|i| format!("int f{i}(void) {{\n    return {i};\n}}\n\n"))
        .collect();
    write_files(root, &[("lib.c", source.as_str())]).unwrap();

    let mut updater = GraphUpdater::new(updater_config(root), QueryEngine::new());
    let (mut store, _) = updater.update().unwrap();
    assert_eq!(store.code_nodes().len(), 9);

    let provider = Arc::new(SlowProvider::new());
    let mut enricher = Enricher::new(Arc::clone(&provider), enrich_config(root));
    enricher.enrich(&mut store, Some(3)).await;

    assert_eq!(provider.peak.load(Ordering::SeqCst), 3);
    // auth failures are not retried
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    let enriched: Vec<String> = store
        .code_nodes()
        .iter()
        .filter(|c| c.is_enriched())
        .map(|c| c.name.clone())
        .collect();
    assert_eq!(enriched, vec!["f0", "f1", "f2", "f6", "f7", "f8"]);

    let report = enricher.last_report().unwrap();
    assert_eq!(report.batches, 3);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.nodes_enriched, 6);
}

/// A chatty reply with the array buried in prose still lands.
#[tokio::test]
async fn test_prose_reply_applied_to_indexed_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_files(
        root,
        &[(
            "src/lib.rs",
            "pub struct Cache {\n    slots: Vec<u8>,\n}\n\npub fn evict(cache: &mut Cache) {\n    cache.slots.clear();\n}\n",
        )],
    )
    .unwrap();

    let mut updater = GraphUpdater::new(updater_config(root), QueryEngine::new());
    let (mut store, _) = updater.update().unwrap();

    let reply = "I looked at both items.\n\n\
        [\n  {\"node_id\": \"src/lib.rs::Cache\", \"summary\": \"Byte slot storage.\", \"risks\": []},\n  \
        {\"node_id\": \"src/lib.rs::evict\", \"summary\": \"Empties every slot.\", \"risks\": [\"drops data in slots[..]\"]},\n  \
        {\"node_id\": \"src/lib.rs::ghost\", \"summary\": \"Not real.\", \"risks\": []}\n]\n\n\
        Let me know if you need anything else.";
    let mut enricher = Enricher::new(MockProvider::with_text(reply), enrich_config(root));
    enricher.enrich(&mut store, None).await;

    let evict = store
        .node("src/lib.rs::evict")
        .and_then(GraphNode::as_code)
        .unwrap();
    assert_eq!(evict.summary.as_deref(), Some("Empties every slot."));
    assert_eq!(
        evict.risks.as_deref(),
        Some(&["drops data in slots[..]".to_string()][..])
    );
    assert_eq!(
        summary_of(&store, "src/lib.rs::Cache").as_deref(),
        Some("Byte slot storage.")
    );
    assert_eq!(
        enricher.last_report().unwrap().unknown_ids,
        vec!["src/lib.rs::ghost"]
    );

    // Enrichment survives a save/load and a no-op update.
    store.save(&graph_path(root)).unwrap();
    let (store, summary) = updater.update().unwrap();
    assert!(!summary.has_changes());
    assert!(summary_of(&store, "src/lib.rs::evict").is_some());
}

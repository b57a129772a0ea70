//! Batched LLM enrichment of code nodes.
//!
//! Unenriched function and class nodes are grouped into fixed-size batches,
//! one prompt per batch. All batch calls run concurrently and are joined;
//! each batch's outcome is captured on its own, so one failed call never
//! affects the others. The graph is only touched after every call has
//! resolved.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use cairn_graph::{ContentReader, FsContentReader, GraphNode, GraphStore};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::prompt::{PromptNode, SYSTEM_INSTRUCTION, SnippetSource, build_prompt};
use crate::provider::{CompletionProvider, with_retry};
use crate::response::{EnrichmentRecord, parse_reply};

/// Default number of nodes per provider call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default cap on snippet length, in lines.
pub const DEFAULT_MAX_SNIPPET_LINES: usize = 60;

#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Nodes per provider call, used when `enrich` is not given a size.
    pub batch_size: usize,

    /// Snippets longer than this are cut. Zero disables the cap.
    pub max_snippet_lines: usize,

    /// Where node file ids are resolved for snippets. Without a root, nodes
    /// are described by metadata only.
    pub project_root: Option<PathBuf>,

    /// Attempts per batch call, counting the first.
    pub max_attempts: u32,

    /// Wait before the first retry; doubles on each further retry.
    pub initial_backoff: Duration,

    /// Ask again for every code node, including ones that already have a
    /// summary. An existing summary is only replaced when the node's batch
    /// returns a record for it.
    pub force: bool,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_snippet_lines: DEFAULT_MAX_SNIPPET_LINES,
            project_root: None,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            force: false,
        }
    }
}

/// What the last enrichment pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    /// Nodes sent to the provider: those lacking a summary, or all code
    /// nodes in a forced pass.
    pub candidates: usize,
    pub batches: usize,
    /// Batches whose call failed or whose reply could not be parsed.
    pub batches_failed: usize,
    pub nodes_enriched: usize,
    /// Ids named in replies that are not code nodes in the graph.
    pub unknown_ids: Vec<String>,
}

impl fmt::Display for EnrichReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates, {} batches ({} failed), {} nodes enriched, {} unknown ids",
            self.candidates,
            self.batches,
            self.batches_failed,
            self.nodes_enriched,
            self.unknown_ids.len()
        )
    }
}

struct Batch {
    index: usize,
    node_ids: Vec<String>,
    /// Ids a reply may enrich; anything else it names is ignored.
    members: HashSet<String>,
    prompt: String,
}

/// Adds summaries and risks to code nodes through a [`CompletionProvider`].
pub struct Enricher<P, R = FsContentReader> {
    provider: P,
    reader: R,
    config: EnrichConfig,
    last_report: Option<EnrichReport>,
}

impl<P: CompletionProvider> Enricher<P> {
    pub fn new(provider: P, config: EnrichConfig) -> Self {
        Self {
            provider,
            reader: FsContentReader,
            config,
            last_report: None,
        }
    }
}

impl<P: CompletionProvider, R: ContentReader> Enricher<P, R> {
    /// Replace the reader used for snippets.
    pub fn with_reader<R2: ContentReader>(self, reader: R2) -> Enricher<P, R2> {
        Enricher {
            provider: self.provider,
            reader,
            config: self.config,
            last_report: self.last_report,
        }
    }

    pub fn config(&self) -> &EnrichConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn last_report(&self) -> Option<&EnrichReport> {
        self.last_report.as_ref()
    }

    /// Ids of code nodes to send, sorted: those without a summary, or every
    /// code node when `force` is set.
    pub fn candidates(store: &GraphStore, force: bool) -> Vec<String> {
        store
            .code_nodes()
            .into_iter()
            .filter(|node| force || !node.is_enriched())
            .map(|node| node.id.clone())
            .collect()
    }

    /// Enrich every code node that lacks a summary, or every code node when
    /// the config forces it.
    ///
    /// `batch_size` overrides the configured size. Provider and parse
    /// failures are logged and leave the affected nodes for a later pass;
    /// nothing is returned. See [`Enricher::last_report`] for the outcome.
    pub async fn enrich(&mut self, store: &mut GraphStore, batch_size: Option<usize>) {
        let batch_size = batch_size.unwrap_or(self.config.batch_size).max(1);

        let candidates = Self::candidates(store, self.config.force);
        let batches = self.build_batches(store, &candidates, batch_size);
        let mut report = EnrichReport {
            candidates: candidates.len(),
            batches: batches.len(),
            ..EnrichReport::default()
        };

        if batches.is_empty() {
            debug!("No code nodes need enrichment");
            self.last_report = Some(report);
            return;
        }

        info!(
            candidates = report.candidates,
            batches = report.batches,
            batch_size,
            provider = self.provider.name(),
            "Enriching code nodes"
        );

        let replies = self.dispatch(&batches).await;

        for (batch, reply) in batches.iter().zip(replies) {
            match reply {
                Ok(text) => apply_reply(store, batch, &text, &mut report),
                Err(e) => {
                    warn!(
                        batch = batch.index,
                        nodes = batch.node_ids.len(),
                        error = %e,
                        "Enrichment batch failed"
                    );
                    report.batches_failed += 1;
                }
            }
        }

        info!(
            enriched = report.nodes_enriched,
            failed_batches = report.batches_failed,
            unknown_ids = report.unknown_ids.len(),
            "Enrichment finished"
        );
        self.last_report = Some(report);
    }

    fn build_batches(
        &self,
        store: &GraphStore,
        candidates: &[String],
        batch_size: usize,
    ) -> Vec<Batch> {
        let mut source = SnippetSource::new(
            &self.reader,
            self.config.project_root.as_deref(),
            self.config.max_snippet_lines,
        );
        let batches: Vec<Batch> = candidates
            .chunks(batch_size)
            .enumerate()
            .map(|(index, ids)| {
                let nodes: Vec<PromptNode> = ids
                    .iter()
                    .filter_map(|id| store.node(id).and_then(GraphNode::as_code))
                    .map(|node| source.describe(node))
                    .collect();
                Batch {
                    index,
                    node_ids: ids.to_vec(),
                    members: ids.iter().cloned().collect(),
                    prompt: build_prompt(&nodes),
                }
            })
            .collect();
        debug!(files = source.files_loaded(), "Loaded source for prompts");
        batches
    }

    /// Send every batch at once and collect each outcome in batch order.
    async fn dispatch(&self, batches: &[Batch]) -> Vec<Result<String, ProviderError>> {
        let provider = &self.provider;
        let name = provider.name();
        let max_attempts = self.config.max_attempts;
        let backoff = self.config.initial_backoff;

        let calls = batches.iter().map(|batch| {
            let prompt = batch.prompt.as_str();
            with_retry(max_attempts, backoff, name, move || {
                provider.send(SYSTEM_INSTRUCTION, prompt)
            })
        });
        join_all(calls).await
    }
}

fn apply_reply(store: &mut GraphStore, batch: &Batch, reply: &str, report: &mut EnrichReport) {
    let records = match parse_reply(reply) {
        Ok(records) => records,
        Err(e) => {
            warn!(batch = batch.index, error = %e, "Skipping unparseable enrichment reply");
            report.batches_failed += 1;
            return;
        }
    };

    let mut applied = 0;
    for EnrichmentRecord {
        node_id,
        summary,
        risks,
    } in records
    {
        if !batch.members.contains(&node_id) {
            warn!(batch = batch.index, node = %node_id, "Reply names a node outside its batch");
            report.unknown_ids.push(node_id);
            continue;
        }
        if let Err(e) = store.set_enrichment(&node_id, summary, risks) {
            warn!(node = %node_id, error = %e, "Failed to store enrichment");
            continue;
        }
        applied += 1;
    }

    if applied < batch.node_ids.len() {
        debug!(
            batch = batch.index,
            applied,
            expected = batch.node_ids.len(),
            "Some nodes in the batch were not enriched"
        );
    }
    report.nodes_enriched += applied;
}

//! cairn-enrich: LLM summaries for the cairn code graph
//!
//! This crate adds summaries and risk notes to code nodes:
//! - A provider boundary with retry, logging and test doubles
//! - An OpenAI-compatible chat-completions provider
//! - Prompt building with source snippets
//! - Tolerant reply parsing
//! - Concurrent, failure-isolated batch enrichment

pub mod enricher;
pub mod error;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod response;

pub use enricher::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_SNIPPET_LINES, EnrichConfig, EnrichReport, Enricher,
};
pub use error::{ParseResponseError, ProviderError, Result};
pub use openai::{OpenAiCompatibleProvider, OpenAiConfig, ProviderKind};
pub use prompt::{PromptNode, SYSTEM_INSTRUCTION, SnippetSource, build_prompt};
pub use provider::{
    CompletionProvider, LoggingProvider, MockProvider, MockRequest, SharedProvider, is_retryable,
    summary_reply, with_retry,
};
pub use response::{EnrichmentRecord, parse_reply};

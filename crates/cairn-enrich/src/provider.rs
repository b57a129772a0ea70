//! Provider boundary for enrichment.
//!
//! A provider turns one `(system, prompt)` pair into reply text. This module
//! holds the trait, the retry policy applied around it, and the test and
//! logging wrappers. The HTTP implementation lives in [`crate::openai`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{ProviderError, Result};

/// A text-completion service used to summarize code.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send one system instruction and one user prompt, returning the reply text.
    async fn send(&self, system: &str, prompt: &str) -> Result<String>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<P: CompletionProvider + ?Sized> CompletionProvider for Arc<P> {
    async fn send(&self, system: &str, prompt: &str) -> Result<String> {
        (**self).send(system, prompt).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A provider that can be shared across threads.
pub type SharedProvider = Arc<dyn CompletionProvider>;

/// Run `f` up to `max_attempts` times, backing off exponentially between
/// attempts. Only transient errors are retried; anything else is returned
/// at once.
pub async fn with_retry<F, Fut, T>(
    max_attempts: u32,
    initial_backoff: Duration,
    provider_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut backoff = initial_backoff;
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                tracing::warn!(
                    provider = provider_name,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Provider call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Rate limiting, connection failures, timeouts and 5xx responses are
/// worth another attempt. Malformed replies and auth failures are not.
pub fn is_retryable(error: &ProviderError) -> bool {
    error.is_transient()
}

/// A request seen by [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub system: String,
    pub prompt: String,
}

impl MockRequest {
    /// Node ids named in the prompt, in prompt order.
    pub fn node_ids(&self) -> Vec<String> {
        self.prompt
            .lines()
            .filter_map(|line| line.strip_prefix(crate::prompt::NODE_LINE_PREFIX))
            .map(|id| id.trim().to_string())
            .collect()
    }
}

type MockHandler = Box<dyn Fn(&MockRequest) -> Result<String> + Send + Sync>;

/// A scriptable provider for tests.
///
/// Every call is recorded, then answered by the handler closure. The
/// handler sees the full request so it can fail selectively.
pub struct MockProvider {
    name: String,
    handler: MockHandler,
    request_log: Mutex<Vec<MockRequest>>,
}

impl MockProvider {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&MockRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: "mock".to_string(),
            handler: Box::new(handler),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with the same text.
    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Reply with a well-formed record for every node in the prompt.
    ///
    /// Summaries read `summary of {id}` and carry no risks.
    pub fn summarizing() -> Self {
        Self::new(|request| Ok(summary_reply(&request.node_ids())))
    }

    /// Get all requests that were made to this provider.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.log().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.log().len()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<MockRequest>> {
        // A panicking handler must not hide the requests made before it.
        self.request_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.name)
            .field("requests", &self.request_count())
            .finish()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn send(&self, system: &str, prompt: &str) -> Result<String> {
        let request = MockRequest {
            system: system.to_string(),
            prompt: prompt.to_string(),
        };
        self.log().push(request.clone());
        (self.handler)(&request)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Render the reply [`MockProvider::summarizing`] gives for `ids`.
pub fn summary_reply(ids: &[String]) -> String {
    let records: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "node_id": id,
                "summary": format!("summary of {id}"),
                "risks": [],
            })
        })
        .collect();
    serde_json::Value::Array(records).to_string()
}

/// A provider that wraps another with call logging.
pub struct LoggingProvider<P: CompletionProvider> {
    inner: P,
    name: String,
}

impl<P: CompletionProvider> LoggingProvider<P> {
    pub fn new(inner: P) -> Self {
        let name = format!("logging({})", inner.name());
        Self { inner, name }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for LoggingProvider<P> {
    async fn send(&self, system: &str, prompt: &str) -> Result<String> {
        tracing::debug!(
            provider = self.inner.name(),
            prompt_bytes = prompt.len(),
            "Sending enrichment prompt"
        );

        let start = Instant::now();
        let result = self.inner.send(system, prompt).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(reply) => tracing::debug!(
                provider = self.inner.name(),
                reply_bytes = reply.len(),
                duration_ms,
                "Provider replied"
            ),
            Err(e) => tracing::warn!(
                provider = self.inner.name(),
                error = %e,
                duration_ms,
                "Provider call failed"
            ),
        }

        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//! Chat-completions provider.
//!
//! Speaks the OpenAI-compatible `/chat/completions` API, which OpenAI, Groq
//! and Ollama all serve. Retries are not done here; the enricher wraps each
//! call in [`crate::provider::with_retry`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};
use crate::provider::CompletionProvider;

/// Default timeout for one request.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default cap on reply length.
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Known chat-completions services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Groq,
    Ollama,
}

impl ProviderKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "groq" => Some(ProviderKind::Groq),
            "ollama" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Groq => "groq",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Groq => "llama-3.1-8b-instant",
            ProviderKind::Ollama => "qwen2.5-coder:7b",
        }
    }

    /// Service-specific environment variable holding the API key.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Groq => Some("GROQ_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    /// Whether requests are refused without a key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for [`OpenAiCompatibleProvider`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub kind: ProviderKind,

    /// Sent as a bearer token when present.
    pub api_key: Option<String>,

    /// Base URL up to and including the API version, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    pub model: String,

    /// Timeout for a single request.
    pub timeout: Duration,

    pub max_tokens: u32,
}

impl OpenAiConfig {
    /// Defaults for `kind`, with no API key.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            base_url: kind.default_base_url().to_string(),
            model: kind.default_model().to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Provider backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(ProviderError::Config("model must not be empty".to_string()));
        }
        if config.kind.requires_api_key() && config.api_key.is_none() {
            return Err(ProviderError::Config(format!(
                "{} requires an API key",
                config.kind
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");
        match &self.config.api_key {
            Some(key) => builder.header(header::AUTHORIZATION, format!("Bearer {key}")),
            None => builder,
        }
    }

    fn to_chat_request<'a>(&'a self, system: &'a str, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
        }
    }

    async fn handle_response(response: Response) -> Result<String> {
        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("reply has no message content".into()))
    }

    async fn handle_error_response(response: Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        classify_status(status, message)
    }
}

/// Map a non-success HTTP status to an error.
pub fn classify_status(status: u16, message: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited(message),
        401 | 403 => ProviderError::Auth(message),
        500..=599 => ProviderError::Server { status, message },
        _ => ProviderError::Http {
            status,
            body: message,
        },
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    async fn send(&self, system: &str, prompt: &str) -> Result<String> {
        let request = self.to_chat_request(system, prompt);
        tracing::debug!(
            provider = %self.config.kind,
            model = %request.model,
            prompt_bytes = prompt.len(),
            "Sending chat completion request"
        );

        let response = self
            .add_headers(self.client.post(self.completions_url()))
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    fn name(&self) -> &str {
        self.config.kind.as_str()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;

    #[derive(Default)]
    struct ServerState {
        replies: Mutex<Vec<(StatusCode, Value)>>,
        captured: Mutex<Vec<(Option<String>, Value)>>,
    }

    async fn handle_chat(
        State(state): State<Arc<ServerState>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        state.captured.lock().unwrap().push((auth, body));

        let mut replies = state.replies.lock().unwrap();
        if replies.is_empty() {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
        }
        let (status, body) = replies.remove(0);
        (status, Json(body))
    }

    async fn start_server(replies: Vec<(StatusCode, Value)>) -> (SocketAddr, Arc<ServerState>) {
        let state = Arc::new(ServerState {
            replies: Mutex::new(replies),
            captured: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/v1/chat/completions", post(handle_chat))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (addr, state)
    }

    fn provider_for(addr: SocketAddr) -> OpenAiCompatibleProvider {
        let config = OpenAiConfig::new(ProviderKind::Groq)
            .with_api_key("test-key")
            .with_base_url(format!("http://{addr}/v1/"))
            .with_model("test-model")
            .with_timeout(Duration::from_secs(5));
        OpenAiCompatibleProvider::new(config).unwrap()
    }

    fn chat_reply(text: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
        })
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let (addr, state) = start_server(vec![(StatusCode::OK, chat_reply("[]"))]).await;
        let provider = provider_for(addr);

        let reply = provider.send("be brief", "describe f").await.unwrap();
        assert_eq!(reply, "[]");

        let captured = state.captured.lock().unwrap();
        let (auth, body) = &captured[0];
        assert_eq!(auth.as_deref(), Some("Bearer test-key"));
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "describe f");
        assert_eq!(body["max_tokens"], 2048);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (addr, _state) = start_server(vec![
            (
                StatusCode::TOO_MANY_REQUESTS,
                json!({"error": {"message": "slow down"}}),
            ),
            (
                StatusCode::UNAUTHORIZED,
                json!({"error": {"message": "bad key"}}),
            ),
            (StatusCode::BAD_GATEWAY, json!({"detail": "upstream"})),
            (StatusCode::OK, json!({"choices": []})),
        ])
        .await;
        let provider = provider_for(addr);

        match provider.send("s", "p").await {
            Err(ProviderError::RateLimited(message)) => assert_eq!(message, "slow down"),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert!(matches!(
            provider.send("s", "p").await,
            Err(ProviderError::Auth(_))
        ));
        assert!(matches!(
            provider.send("s", "p").await,
            Err(ProviderError::Server { status: 502, .. })
        ));
        assert!(matches!(
            provider.send("s", "p").await,
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = provider_for(addr).send("s", "p").await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(403, "no".into()),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            classify_status(404, "missing".into()),
            ProviderError::Http { status: 404, .. }
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            OpenAiCompatibleProvider::new(OpenAiConfig::new(ProviderKind::OpenAi)),
            Err(ProviderError::Config(_))
        ));
        assert!(OpenAiCompatibleProvider::new(OpenAiConfig::new(ProviderKind::Ollama)).is_ok());
        assert!(matches!(
            OpenAiCompatibleProvider::new(OpenAiConfig::new(ProviderKind::Ollama).with_model(" ")),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_provider_kind() {
        assert_eq!(ProviderKind::parse("Groq"), Some(ProviderKind::Groq));
        assert_eq!(ProviderKind::parse("anthropic"), None);
        assert_eq!(ProviderKind::Ollama.api_key_env(), None);
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
    }
}

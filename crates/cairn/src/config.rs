//! Configuration file support for cairn.
//!
//! All cairn data is stored in a `.cairn/` directory:
//! - `.cairn/config.toml` - Configuration file
//! - `.cairn/graph.json` - Code graph document
//! - `.cairn/logs/` - Log files
//!
//! Config discovery searches for `.cairn/config.toml` starting from the current
//! directory and walking up to parent directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cairn_enrich::{EnrichConfig, OpenAiConfig, ProviderKind};
use cairn_graph::WalkOptions;
use cairn_graph::walker::DEFAULT_MAX_FILE_SIZE;
use serde::{Deserialize, Serialize};

/// The cairn data directory name.
pub const CAIRN_DIR: &str = ".cairn";
/// The config file name within the cairn directory.
pub const CONFIG_FILE: &str = "config.toml";
/// Environment variable checked for an API key before the provider's own.
pub const API_KEY_ENV: &str = "CAIRN_API_KEY";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub graph: GraphConfig,
    pub walker: WalkerConfig,
    pub provider: ProviderConfig,
    pub enrich: EnrichSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root, relative to the directory that holds `.cairn/`.
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Graph document, relative to `.cairn/`.
    pub path: PathBuf,
    /// Only index these extensions. Every supported extension when unset.
    pub extensions: Option<Vec<String>>,
    /// Directory of `<language>.scm` files that add to or replace the
    /// built-in queries, relative to `.cairn/`.
    pub queries_dir: Option<PathBuf>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("graph.json"),
            extensions: None,
            queries_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WalkerConfig {
    /// Extra gitignore-style patterns.
    pub ignore: Vec<String>,
    /// Files larger than this many bytes are not indexed.
    pub max_file_size: u64,
    pub follow_links: bool,
    /// Quiet period for `cairn watch`, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            follow_links: false,
            debounce_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// "openai", "groq", or "ollama".
    pub kind: String,
    /// Model name (optional, provider-specific default).
    pub model: Option<String>,
    /// API base URL override.
    pub base_url: Option<String>,
    /// Falls back to `CAIRN_API_KEY`, then the provider's own variable.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "groq".to_string(),
            model: None,
            base_url: None,
            api_key: None,
            timeout_secs: 120,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichSection {
    pub batch_size: usize,
    pub max_snippet_lines: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for EnrichSection {
    fn default() -> Self {
        Self {
            batch_size: cairn_enrich::DEFAULT_BATCH_SIZE,
            max_snippet_lines: cairn_enrich::DEFAULT_MAX_SNIPPET_LINES,
            max_attempts: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Looks for `.cairn/config.toml` in `start` and its parents. Returns the
    /// config and the `.cairn` directory it was found in.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let cairn_dir = dir.join(CAIRN_DIR);
            let config_path = cairn_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, cairn_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// The `.cairn` directory to use when none was discovered.
    pub fn default_cairn_dir() -> PathBuf {
        PathBuf::from(CAIRN_DIR)
    }

    /// Resolve the graph path relative to the `.cairn` directory.
    pub fn resolve_graph_path(&self, cairn_dir: &Path) -> PathBuf {
        if self.graph.path.is_absolute() {
            self.graph.path.clone()
        } else {
            cairn_dir.join(&self.graph.path)
        }
    }

    /// Resolve the project root relative to the directory holding `.cairn`.
    pub fn resolve_project_root(&self, cairn_dir: &Path) -> PathBuf {
        if self.project.root.is_absolute() {
            return self.project.root.clone();
        }
        let base = cairn_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let root = base.join(&self.project.root);
        root.canonicalize().unwrap_or(root)
    }

    pub fn resolve_queries_dir(&self, cairn_dir: &Path) -> Option<PathBuf> {
        self.graph.queries_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                cairn_dir.join(dir)
            }
        })
    }

    pub fn walk_options(&self) -> WalkOptions {
        let defaults = WalkOptions::default();
        WalkOptions {
            extensions: self
                .graph
                .extensions
                .clone()
                .unwrap_or(defaults.extensions),
            ignore_patterns: self.walker.ignore.clone(),
            max_file_size: self.walker.max_file_size,
            follow_links: self.walker.follow_links,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.walker.debounce_ms)
    }

    /// Enrichment settings, with snippets read from `project_root`.
    pub fn enrich_config(&self, project_root: PathBuf, force: bool) -> EnrichConfig {
        EnrichConfig {
            batch_size: self.enrich.batch_size,
            max_snippet_lines: self.enrich.max_snippet_lines,
            project_root: Some(project_root),
            max_attempts: self.enrich.max_attempts,
            initial_backoff: Duration::from_millis(self.enrich.initial_backoff_ms),
            force,
        }
    }

    /// Pick the API key: config first, then `CAIRN_API_KEY`, then the
    /// provider's own variable. `env` looks up an environment variable.
    pub fn resolve_api_key<F>(&self, kind: ProviderKind, env: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.provider
            .api_key
            .clone()
            .or_else(|| env(API_KEY_ENV))
            .or_else(|| kind.api_key_env().and_then(&env))
            .filter(|key| !key.trim().is_empty())
    }

    /// Build the HTTP provider settings, reading keys from the environment.
    pub fn provider_config(&self) -> Result<OpenAiConfig> {
        let kind = ProviderKind::parse(&self.provider.kind)
            .with_context(|| format!("Unknown provider kind '{}'", self.provider.kind))?;

        let mut config = OpenAiConfig::new(kind)
            .with_timeout(Duration::from_secs(self.provider.timeout_secs))
            .with_max_tokens(self.provider.max_tokens);
        if let Some(model) = &self.provider.model {
            config = config.with_model(model.clone());
        }
        if let Some(url) = &self.provider.base_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(key) = self.resolve_api_key(kind, |name| std::env::var(name).ok()) {
            config = config.with_api_key(key);
        }
        Ok(config)
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Returns every problem found; empty when the config is usable.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigValidationError {
                field: field.to_string(),
                message,
            })
        };

        if ProviderKind::parse(&self.provider.kind).is_none() {
            push(
                "provider.kind",
                format!(
                    "Invalid provider '{}'. Expected 'openai', 'groq', or 'ollama'.",
                    self.provider.kind
                ),
            );
        }
        if self
            .provider
            .model
            .as_ref()
            .is_some_and(|m| m.trim().is_empty())
        {
            push("provider.model", "Model name cannot be empty.".to_string());
        }
        if self.provider.timeout_secs == 0 {
            push(
                "provider.timeout_secs",
                "Timeout must be at least one second.".to_string(),
            );
        }
        if self.enrich.batch_size == 0 {
            push(
                "enrich.batch_size",
                "Batch size must be at least 1.".to_string(),
            );
        }
        if self.enrich.max_attempts == 0 {
            push(
                "enrich.max_attempts",
                "At least one attempt is required.".to_string(),
            );
        }
        if self
            .graph
            .extensions
            .as_ref()
            .is_some_and(|exts| exts.is_empty())
        {
            push(
                "graph.extensions",
                "Extension list is empty; nothing would be indexed.".to_string(),
            );
        }

        errors
    }
}

/// Written by `cairn init`.
pub const DEFAULT_CONFIG: &str = r#"# cairn configuration
# Paths are relative to this .cairn/ directory unless absolute

[project]
root = "."  # Relative to the directory containing .cairn/

[graph]
path = "graph.json"
# extensions = ["rs", "py", "c", "h", "cpp", "hpp"]
# queries_dir = "queries"  # Extra or replacement <language>.scm files

[walker]
ignore = []  # Gitignore-style patterns, on top of .gitignore and .cairnignore
max_file_size = 1048576
debounce_ms = 300

[provider]
kind = "groq"  # Options: "openai", "groq", "ollama"
# model = "llama-3.1-8b-instant"
# base_url = "https://api.groq.com/openai/v1"
# api_key = "..."  # Or use CAIRN_API_KEY / GROQ_API_KEY / OPENAI_API_KEY
timeout_secs = 120
max_tokens = 2048

[enrich]
batch_size = 10
max_snippet_lines = 60
max_attempts = 3
initial_backoff_ms = 500
"#;

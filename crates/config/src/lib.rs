//! Configuration loading, validation, and management for loopwright.
//!
//! Loads configuration from `~/.loopwright/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use loopwright_core::{AgentMode, AgentProfile, ExecutionMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Tier names accepted in `tiers.fallback_order`.
pub const TIER_NAMES: [&str; 3] = ["fast", "smart", "cheap"];

/// The root configuration structure.
///
/// Maps directly to `~/.loopwright/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Model bound to each capability tier
    #[serde(default)]
    pub tiers: TierConfig,

    /// Who the agent is
    #[serde(default)]
    pub profile: AgentProfile,

    /// Orchestration budgets and mode
    #[serde(default)]
    pub agent: AgentRunConfig,

    /// Tool invocation limits
    #[serde(default)]
    pub tools: ToolConfig,

    /// Short- and long-term memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Provider retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Usage tracking and token budget
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("providers", &self.providers)
            .field("tiers", &self.tiers)
            .field("profile", &self.profile)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("memory", &self.memory)
            .field("retry", &self.retry)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

/// A concrete model bound to one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModelConfig {
    /// Key into `providers` (e.g., "openai", "ollama")
    pub provider: String,

    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Providers tried in order, with the same model, when `provider` fails
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_providers: Vec<String>,
}

impl TierModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: None,
            fallback_providers: Vec::new(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast: Option<TierModelConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart: Option<TierModelConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cheap: Option<TierModelConfig>,

    /// Order in which unbound tiers fall back to bound ones
    #[serde(default = "default_fallback_order")]
    pub fallback_order: Vec<String>,
}

fn default_fallback_order() -> Vec<String> {
    vec!["smart".into(), "fast".into(), "cheap".into()]
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            fast: Some(TierModelConfig::new("openai", "gpt-4o-mini")),
            smart: Some(TierModelConfig::new("openai", "gpt-4o")),
            cheap: Some(TierModelConfig {
                temperature: 0.2,
                ..TierModelConfig::new("openai", "gpt-4o-mini")
            }),
            fallback_order: default_fallback_order(),
        }
    }
}

impl TierConfig {
    fn bound(&self) -> impl Iterator<Item = (&'static str, &TierModelConfig)> {
        [("fast", &self.fast), ("smart", &self.smart), ("cheap", &self.cheap)]
            .into_iter()
            .filter_map(|(name, t)| t.as_ref().map(|t| (name, t)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunConfig {
    #[serde(default)]
    pub mode: AgentMode,

    /// Initial planning behaviour of a new session
    #[serde(default = "default_execution_mode")]
    pub execution_mode: ExecutionMode,

    /// Reasoning/tool steps per Task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Reasoning turns per Task, retries included
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Total node visits per session
    #[serde(default = "default_max_graph_steps")]
    pub max_graph_steps: u32,

    /// Hard timeout for one reasoning call
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,

    /// Accept reasoning replies without the respond/action tool pair
    #[serde(default)]
    pub free_form: bool,
}

fn default_execution_mode() -> ExecutionMode {
    ExecutionMode::Automatic
}
fn default_max_steps() -> u32 {
    10
}
fn default_max_iterations() -> u32 {
    20
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_graph_steps() -> u32 {
    100
}
fn default_execution_timeout_ms() -> u64 {
    60_000
}

impl Default for AgentRunConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::default(),
            execution_mode: default_execution_mode(),
            max_steps: default_max_steps(),
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            max_graph_steps: default_max_graph_steps(),
            execution_timeout_ms: default_execution_timeout_ms(),
            free_form: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Results longer than this are summarized before entering memory
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold_chars: usize,

    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_batch_timeout_ms() -> u64 {
    60_000
}
fn default_summarize_threshold() -> usize {
    4_000
}
fn default_summary_max_chars() -> usize {
    1_000
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
            summarize_threshold_chars: default_summarize_threshold(),
            summary_max_chars: default_summary_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Capacity of the STM ring
    #[serde(default = "default_stm_max_size")]
    pub stm_max_size: usize,

    /// STM slots read by the retrieval step
    #[serde(default = "default_retrieval_window")]
    pub retrieval_window: usize,

    #[serde(default = "default_ltm_top_k")]
    pub ltm_top_k: usize,

    #[serde(default = "default_fact_limit")]
    pub episodic_limit: usize,

    #[serde(default = "default_fact_limit")]
    pub semantic_limit: usize,

    /// Minimum cosine similarity for a search hit
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Cosine similarity at which a new fact merges into an existing one
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,

    /// Truncation length of step previews sent to consolidation
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    #[serde(default = "default_true")]
    pub consolidate: bool,

    /// Dimensions of the offline hashing embedder
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Provider serving embeddings; the hashing embedder is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_stm_max_size() -> usize {
    20
}
fn default_retrieval_window() -> usize {
    5
}
fn default_ltm_top_k() -> usize {
    5
}
fn default_fact_limit() -> usize {
    500
}
fn default_similarity_threshold() -> f32 {
    0.3
}
fn default_merge_threshold() -> f32 {
    0.92
}
fn default_preview_chars() -> usize {
    200
}
fn default_embedding_dimensions() -> usize {
    256
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            stm_max_size: default_stm_max_size(),
            retrieval_window: default_retrieval_window(),
            ltm_top_k: default_ltm_top_k(),
            episodic_limit: default_fact_limit(),
            semantic_limit: default_fact_limit(),
            similarity_threshold: default_similarity_threshold(),
            merge_threshold: default_merge_threshold(),
            preview_chars: default_preview_chars(),
            consolidate: true,
            embedding_dimensions: default_embedding_dimensions(),
            embedding_provider: None,
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per provider call, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Usage tracking and token budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether telemetry is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Token cap per session (0 = unlimited)
    #[serde(default)]
    pub max_session_tokens: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_session_tokens: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.loopwright/config.toml).
    ///
    /// Also checks environment variables:
    /// - `LOOPWRIGHT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `LOOPWRIGHT_MODE` overrides `agent.mode`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            self.api_key = std::env::var("LOOPWRIGHT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(mode) = std::env::var("LOOPWRIGHT_MODE") {
            self.agent.mode = mode.parse().map_err(ConfigError::ValidationError)?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".loopwright")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, tier) in self.tiers.bound() {
            if !(0.0..=2.0).contains(&tier.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "tiers.{name}.temperature must be between 0.0 and 2.0"
                )));
            }
            if tier.model.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "tiers.{name}.model must not be empty"
                )));
            }
        }

        if let Some(bad) = self
            .tiers
            .fallback_order
            .iter()
            .find(|t| !TIER_NAMES.contains(&t.as_str()))
        {
            return Err(ConfigError::ValidationError(format!(
                "unknown tier '{bad}' in tiers.fallback_order"
            )));
        }

        if self.memory.stm_max_size == 0 {
            return Err(ConfigError::ValidationError(
                "memory.stm_max_size must be > 0".into(),
            ));
        }
        if self.agent.max_graph_steps == 0 || self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_graph_steps and agent.max_steps must be > 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be >= 1".into(),
            ));
        }

        let tools = &self.tools;
        if tools.summary_max_chars == 0 || tools.summary_max_chars >= tools.summarize_threshold_chars {
            return Err(ConfigError::ValidationError(
                "tools.summary_max_chars must be > 0 and below tools.summarize_threshold_chars".into(),
            ));
        }

        for (key, value) in [
            ("memory.similarity_threshold", self.memory.similarity_threshold),
            ("memory.merge_threshold", self.memory.merge_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{key} must be between 0.0 and 1.0"
                )));
            }
        }

        Ok(())
    }

    /// API key for a provider: per-provider key first, then the global one.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            providers: HashMap::new(),
            tiers: TierConfig::default(),
            profile: AgentProfile::default(),
            agent: AgentRunConfig::default(),
            tools: ToolConfig::default(),
            memory: MemoryConfig::default(),
            retry: RetryConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

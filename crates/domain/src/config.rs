use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
}

impl Config {
    /// Build a config from the process environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("DB_HOST") {
            config.database.host = v;
        }
        if let Some(v) = env_parse::<u16>("DB_PORT") {
            config.database.port = v;
        }
        if let Ok(v) = std::env::var("DB_NAME") {
            config.database.name = v;
        }
        if let Ok(v) = std::env::var("DB_USER") {
            config.database.user = v;
        }
        if let Ok(v) = std::env::var("DB_PASSWORD") {
            config.database.password = v;
        }

        if let Ok(v) = std::env::var("SILICONFLOW_API_KEY") {
            config.embedding.api_key = Some(v.clone());
            config.reranker.api_key = Some(v);
        }

        if let Ok(v) = std::env::var("MCP_SERVER_HOST") {
            config.server.host = v;
        }
        if let Some(v) = env_parse::<u16>("MCP_SERVER_PORT") {
            config.server.port = v;
        }

        if let Some(v) = env_parse::<usize>("SAGE_RETRIEVAL_COUNT") {
            config.retrieval.retrieval_count = v;
        }
        if let Some(v) = env_parse::<f64>("SAGE_SIMILARITY_THRESHOLD") {
            config.retrieval.similarity_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("SAGE_MAX_CONTEXT_TOKENS") {
            config.retrieval.max_context_tokens = v;
        }
        if let Some(v) = env_parse::<u64>("SAGE_CACHE_TTL") {
            config.retrieval.cache_ttl_secs = v;
        }
        if let Some(v) = env_parse::<f64>("SAGE_TIME_DECAY") {
            config.retrieval.time_decay_base = v;
        }
        if let Some(v) = env_parse::<i64>("SAGE_MAX_AGE_DAYS") {
            config.retrieval.max_age_days = v;
        }

        if let Ok(v) = std::env::var("SAGE_CONFIG_DIR") {
            config.server.config_dir = Some(PathBuf::from(v));
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "d_localhost")]
    pub host: String,
    #[serde(default = "d_5432")]
    pub port: u16,
    #[serde(default = "d_db_name")]
    pub name: String,
    #[serde(default = "d_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Fixed connection pool shared by all tool handlers.
    #[serde(default = "d_10")]
    pub pool_size: u32,
    /// LIMIT applied to the sequential-scan fallback when the vector
    /// index is missing.
    #[serde(default = "d_1000")]
    pub fallback_scan_limit: i64,
}

impl DatabaseConfig {
    pub fn connect_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: d_localhost(),
            port: 5432,
            name: d_db_name(),
            user: d_db_user(),
            password: String::new(),
            pool_size: 10,
            fallback_scan_limit: 1000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedding provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "d_siliconflow_url")]
    pub base_url: String,
    #[serde(default = "d_embedding_model")]
    pub model: String,
    /// The dimension every stored vector must have. Verified against
    /// a provider probe at startup.
    #[serde(default = "d_4096")]
    pub dimension: usize,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: d_siliconflow_url(),
            model: d_embedding_model(),
            dimension: 4096,
            api_key: None,
            timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reranker provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(default = "d_siliconflow_url")]
    pub base_url: String,
    #[serde(default = "d_reranker_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl RerankerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: d_siliconflow_url(),
            model: d_reranker_model(),
            api_key: None,
            timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "d_10usize")]
    pub retrieval_count: usize,
    #[serde(default = "d_0_3")]
    pub similarity_threshold: f64,
    #[serde(default = "d_2000")]
    pub max_context_tokens: usize,
    #[serde(default = "d_1800")]
    pub cache_ttl_secs: u64,
    #[serde(default = "d_512")]
    pub cache_capacity: usize,
    /// Exponential decay base per 24 h of age.
    #[serde(default = "d_0_95")]
    pub time_decay_base: f64,
    /// Score floor for content younger than one hour.
    #[serde(default = "d_0_9")]
    pub session_floor: f64,
    /// Score floor for content younger than one day.
    #[serde(default = "d_0_7")]
    pub recency_floor: f64,
    #[serde(default = "d_90")]
    pub max_age_days: i64,
    /// Weight of diversity vs. score in the greedy selection.
    #[serde(default = "d_0_7")]
    pub diversity_factor: f64,
    #[serde(default = "d_true")]
    pub enable_neural_rerank: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieval_count: 10,
            similarity_threshold: 0.3,
            max_context_tokens: 2000,
            cache_ttl_secs: 1800,
            cache_capacity: 512,
            time_decay_base: 0.95,
            session_floor: 0.9,
            recency_floor: 0.7,
            max_age_days: 90,
            diversity_factor: 0.7,
            enable_neural_rerank: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_any_host")]
    pub host: String,
    #[serde(default = "d_17800")]
    pub port: u16,
    /// Per-tool-call wall clock; sub-operations are cancelled on
    /// breach.
    #[serde(default = "d_30")]
    pub tool_timeout_secs: u64,
    /// Hours of inactivity after which the service container
    /// re-initialises itself.
    #[serde(default = "d_6")]
    pub idle_reset_hours: i64,
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_any_host(),
            port: 17_800,
            tool_timeout_secs: 30,
            idle_reset_hours: 6,
            config_dir: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Override for the state directory; defaults to
    /// `~/.sage_hooks_temp`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "d_48")]
    pub eviction_hours: u64,
    /// Global wall clock for the stop-hook pipeline; on breach the
    /// backup is kept and the database write is skipped.
    #[serde(default = "d_45")]
    pub stop_timeout_secs: u64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            eviction_hours: 48,
            stop_timeout_secs: 45,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.embedding.api_key.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "embedding.api_key".into(),
                message: "SILICONFLOW_API_KEY is not set".into(),
            });
        }

        if self.embedding.dimension == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "embedding.dimension".into(),
                message: "dimension must be greater than 0".into(),
            });
        }

        for (field, url) in [
            ("embedding.base_url", &self.embedding.base_url),
            ("reranker.base_url", &self.reranker.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{url}\")"
                    ),
                });
            }
        }

        if self.database.pool_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "database.pool_size".into(),
                message: "pool_size must be greater than 0".into(),
            });
        }

        if self.database.password.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "database.password".into(),
                message: "DB_PASSWORD is empty".into(),
            });
        }

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "retrieval.similarity_threshold".into(),
                message: "similarity_threshold must be within 0..=1".into(),
            });
        }

        if !(0.0..1.0).contains(&self.retrieval.time_decay_base) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "retrieval.time_decay_base".into(),
                message: "time_decay_base must be within 0..1".into(),
            });
        }

        issues
    }

    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_localhost() -> String {
    "localhost".into()
}
fn d_any_host() -> String {
    "0.0.0.0".into()
}
fn d_db_name() -> String {
    "sage_memory".into()
}
fn d_db_user() -> String {
    "sage".into()
}
fn d_siliconflow_url() -> String {
    "https://api.siliconflow.cn".into()
}
fn d_embedding_model() -> String {
    "Qwen/Qwen3-Embedding-8B".into()
}
fn d_reranker_model() -> String {
    "Qwen/Qwen3-Reranker-8B".into()
}
fn d_5432() -> u16 {
    5432
}
fn d_17800() -> u16 {
    17_800
}
fn d_3() -> u32 {
    3
}
fn d_10() -> u32 {
    10
}
fn d_10usize() -> usize {
    10
}
fn d_512() -> usize {
    512
}
fn d_2000() -> usize {
    2000
}
fn d_4096() -> usize {
    4096
}
fn d_1000() -> i64 {
    1000
}
fn d_30() -> u64 {
    30
}
fn d_45() -> u64 {
    45
}
fn d_48() -> u64 {
    48
}
fn d_6() -> i64 {
    6
}
fn d_90() -> i64 {
    90
}
fn d_1800() -> u64 {
    1800
}
fn d_30000() -> u64 {
    30_000
}
fn d_0_3() -> f64 {
    0.3
}
fn d_0_7() -> f64 {
    0.7
}
fn d_0_9() -> f64 {
    0.9
}
fn d_0_95() -> f64 {
    0.95
}
fn d_true() -> bool {
    true
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Entry cap for the in-memory ephemeral tier.
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
        }
    }
}

fn default_max_conversations() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Message count returned when a history fetch names no limit.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Upper bound on the durable-tier fallback read. On expiry the fetch
    /// degrades to an empty history instead of blocking rendering.
    #[serde(default = "default_durable_timeout_ms")]
    pub durable_timeout_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            durable_timeout_ms: default_durable_timeout_ms(),
        }
    }
}

fn default_limit() -> usize {
    50
}

fn default_durable_timeout_ms() -> u64 {
    2000
}

/// Names of the retrieval tools whose results this engine normalizes and
/// resolves. The names must match what the agent runtime records on tool
/// messages.
#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_document_tool")]
    pub document_tool: String,
    #[serde(default = "default_web_tool")]
    pub web_tool: String,
    #[serde(default = "default_image_tool")]
    pub image_tool: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            document_tool: default_document_tool(),
            web_tool: default_web_tool(),
            image_tool: default_image_tool(),
        }
    }
}

fn default_document_tool() -> String {
    "search_course_materials".to_string()
}

fn default_web_tool() -> String {
    "search_web".to_string()
}

fn default_image_tool() -> String {
    "fetch_slide_page".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    if config.cache.max_conversations == 0 {
        anyhow::bail!("cache.max_conversations must be > 0");
    }

    if config.history.default_limit == 0 {
        anyhow::bail!("history.default_limit must be >= 1");
    }

    if config.history.durable_timeout_ms == 0 {
        anyhow::bail!("history.durable_timeout_ms must be > 0");
    }

    let tools = &config.tools;
    for (field, name) in [
        ("tools.document_tool", &tools.document_tool),
        ("tools.web_tool", &tools.web_tool),
        ("tools.image_tool", &tools.image_tool),
    ] {
        if name.trim().is_empty() {
            anyhow::bail!("{} must not be empty", field);
        }
    }
    if tools.document_tool == tools.web_tool
        || tools.document_tool == tools.image_tool
        || tools.web_tool == tools.image_tool
    {
        anyhow::bail!("tool names must be pairwise distinct");
    }

    Ok(())
}

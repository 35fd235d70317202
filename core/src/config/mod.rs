use crate::agent::LoopRequest;
use crate::agent::request::{DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOKENS_PER_TURN, DEFAULT_TIMEOUT_MS};
use crate::traits::ConversationTurn;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const TOOLOOP_DIR: &str = ".tooloop";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskConfig {
    pub result_retention_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            result_retention_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub max_iterations: u32,
    pub max_tokens_per_turn: u32,
    pub timeout_ms: u64,
    pub allowed_tools: Vec<String>,
    pub retry: RetryConfig,
    pub task: TaskConfig,
    #[serde(skip)]
    pub workspace_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o".to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens_per_turn: DEFAULT_MAX_TOKENS_PER_TURN,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            allowed_tools: vec!["calculator".to_string()],
            retry: RetryConfig::default(),
            task: TaskConfig::default(),
            workspace_dir: get_tooloop_dir().join("workspace"),
        }
    }
}

pub fn get_tooloop_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(TOOLOOP_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_tooloop_dir().join("config.toml")
}

pub fn ensure_tooloop_dir() -> Result<PathBuf> {
    let dir = get_tooloop_dir();

    if !dir.exists() {
        std::fs::create_dir_all(&dir).with_context(|| {
            format!("Failed to create tooloop directory at {}", dir.display())
        })?;
    }

    Ok(dir)
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        if config_exists() {
            load_config()
        } else {
            Ok(Config::default())
        }
    }

    /// A request seeded with this config's budgets and tool allow-list.
    pub fn loop_request(&self, messages: Vec<ConversationTurn>) -> LoopRequest {
        LoopRequest::new(messages)
            .with_allowed_tools(self.allowed_tools.iter().cloned())
            .with_max_iterations(self.max_iterations)
            .with_max_tokens_per_turn(self.max_tokens_per_turn)
            .with_timeout_ms(self.timeout_ms)
    }
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::anyhow!(
                "Config file not found at {}. Run 'tooloop config init' to create one.",
                path.display()
            )
        } else {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        }
    })?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    config.workspace_dir = path
        .parent()
        .map(|dir| dir.join("workspace"))
        .unwrap_or_else(|| get_tooloop_dir().join("workspace"));

    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    ensure_tooloop_dir()?;
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}

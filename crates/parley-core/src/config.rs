use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};
use crate::types::EnrichmentKind;

/// Top-level configuration for Parley.
///
/// Loaded from `~/.parley/config.toml` by default. Each section corresponds
/// to one component of the turn pipeline. Secrets are never stored here;
/// sections name the environment variables that hold them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the stored-context database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Conversation handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Whether turns are accepted at all.
    pub enabled: bool,
    /// Number of context entries kept per session.
    pub history_capacity: usize,
    /// Number of prior exchanges shown to the generator.
    pub prior_turn_window: usize,
    /// Idle minutes after which a session is discarded.
    pub session_timeout_minutes: u32,
    /// Maximum input length in characters.
    pub max_message_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_capacity: 10,
            prior_turn_window: 5,
            session_timeout_minutes: 30,
            max_message_length: 2000,
        }
    }
}

/// Enrichment gateway and analysis cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Kinds run against the user input (cached).
    pub input_kinds: Vec<EnrichmentKind>,
    /// Kinds run against the generated reply.
    pub output_kinds: Vec<EnrichmentKind>,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum cached analyses. `None` keeps every analysis for the
    /// lifetime of the process.
    pub cache_capacity: Option<u64>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            input_kinds: vec![
                EnrichmentKind::SENTIMENT,
                EnrichmentKind::ENTITIES,
                EnrichmentKind::KEY_PHRASES,
            ],
            output_kinds: vec![EnrichmentKind::CONTINUATION],
            timeout_ms: 10_000,
            cache_capacity: None,
        }
    }
}

/// Retrieval gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of web search hits requested per turn.
    pub search_limit: usize,
    /// Number of stored-context hits returned per lookup.
    pub context_limit: usize,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// SQLite file name inside the data directory.
    pub context_db: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_limit: 5,
            context_limit: 5,
            timeout_ms: 10_000,
            context_db: "context.db".to_string(),
        }
    }
}

/// Primary generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// "openai" (any OpenAI-compatible endpoint) or "extractive".
    pub provider: String,
    pub model: String,
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub system_prompt: String,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            presence_penalty: 0.6,
            system_prompt: "You are an advanced AI assistant with access to multiple AI services and real-time information.".to_string(),
            timeout_ms: 60_000,
        }
    }
}

/// Web search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// "google" or "none".
    pub provider: String,
    pub endpoint: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Environment variable holding the custom search engine id.
    pub engine_id_env: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            engine_id_env: "GOOGLE_CSE_ID".to_string(),
        }
    }
}

use deckard_realtime::EngineConfig;
use deckard_realtime::state::{DEFAULT_PERSONA, normalize_persona};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_url: String,
    pub session_id: Option<String>,
    pub persona: String,
    pub max_history: usize,
    pub max_log_entries: usize,
    pub capture_block_size: usize,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = EngineConfig::default();

        let server_url = std::env::var("DECKARD_SERVER_URL")
            .unwrap_or_else(|_| defaults.server_url.clone());
        validate_server_url("DECKARD_SERVER_URL", &server_url)?;

        let session_id = std::env::var("DECKARD_SESSION_ID")
            .ok()
            .filter(|id| !id.trim().is_empty());

        let persona = std::env::var("DECKARD_PERSONA")
            .map(|p| normalize_persona(&p))
            .unwrap_or_else(|_| DEFAULT_PERSONA.to_string());
        if persona.is_empty() {
            return Err(ConfigError::InvalidValue(
                "DECKARD_PERSONA".to_string(),
                "persona id must not be empty".to_string(),
            ));
        }

        let max_history = positive_var("DECKARD_MAX_HISTORY", defaults.max_history)?;
        let max_log_entries = positive_var("DECKARD_MAX_LOG_ENTRIES", defaults.max_log_entries)?;
        let capture_block_size =
            positive_var("DECKARD_CAPTURE_BLOCK", defaults.capture_block_size)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            server_url,
            session_id,
            persona,
            max_history,
            max_log_entries,
            capture_block_size,
            log_level,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            server_url: self.server_url.clone(),
            session_id: self.session_id.clone(),
            persona: self.persona.clone(),
            max_history: self.max_history,
            max_log_entries: self.max_log_entries,
            capture_block_size: self.capture_block_size,
            ..EngineConfig::default()
        }
    }
}

pub fn validate_server_url(var: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{}' is not a ws:// or wss:// URL", url),
        ))
    }
}

fn positive_var(var: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(0) => Err(ConfigError::InvalidValue(
                var.to_string(),
                "must be greater than zero".to_string(),
            )),
            Ok(value) => Ok(value),
            Err(e) => Err(ConfigError::InvalidValue(var.to_string(), e.to_string())),
        },
        Err(_) => Ok(default),
    }
}

use gemini_realtime::config::DEFAULT_ENDPOINT;
use gemini_realtime::{ConnectionConfig, ResponseModality};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a hotel concierge. When the user asks about \
places to stay, call search_hotels with a short natural-language query and summarise the \
results conversationally. If the search fails, tell the user and offer to try again.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to read {0}: {1}")]
    Unreadable(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub gemini_api_key: String,
    pub live_model: String,
    pub live_endpoint: String,
    pub response_modality: ResponseModality,
    pub voice_name: Option<String>,
    pub search_api_url: String,
    pub search_api_key: Option<String>,
    pub system_instruction_path: Option<PathBuf>,
    pub setup_timeout: Option<Duration>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;
        let live_model = std::env::var("LIVE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let live_endpoint =
            std::env::var("LIVE_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let response_modality = match std::env::var("RESPONSE_MODALITY") {
            Ok(value) => parse_modality(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "RESPONSE_MODALITY".to_string(),
                    format!("'{}' is not one of 'audio', 'text'", value),
                )
            })?,
            Err(_) => ResponseModality::Text,
        };
        let voice_name = std::env::var("VOICE_NAME").ok().filter(|v| !v.is_empty());

        let search_api_url = std::env::var("SEARCH_API_URL")
            .map_err(|_| ConfigError::MissingVar("SEARCH_API_URL".to_string()))?;
        let search_api_key = std::env::var("SEARCH_API_KEY").ok().filter(|v| !v.is_empty());

        let system_instruction_path = std::env::var("SYSTEM_INSTRUCTION_PATH")
            .ok()
            .map(PathBuf::from);

        let setup_timeout = match std::env::var("SETUP_TIMEOUT_SECS") {
            Ok(value) => {
                let secs = value.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue("SETUP_TIMEOUT_SECS".to_string(), e.to_string())
                })?;
                Some(Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            gemini_api_key,
            live_model,
            live_endpoint,
            response_modality,
            voice_name,
            search_api_url,
            search_api_key,
            system_instruction_path,
            setup_timeout,
            log_level,
        })
    }

    /// The system instruction: the configured file's contents, or the built-in prompt.
    pub fn system_instruction(&self) -> Result<String, ConfigError> {
        match &self.system_instruction_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                ConfigError::Unreadable(path.display().to_string(), e.to_string())
            }),
            None => Ok(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
        }
    }

    /// Builds the Live API connection config, declaring the search tool. Audio
    /// sessions also ask for transcriptions so spoken turns show up as text.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let mut config = ConnectionConfig::new(self.gemini_api_key.clone(), self.live_model.clone())
            .with_endpoint(self.live_endpoint.clone())
            .with_response_modality(self.response_modality)
            .with_system_instruction(self.system_instruction()?)
            .with_tool(crate::search::search_hotels_declaration());
        if let Some(voice) = &self.voice_name {
            config = config.with_voice(voice.clone());
        }
        if let Some(timeout) = self.setup_timeout {
            config = config.with_setup_timeout(timeout);
        }
        if self.response_modality == ResponseModality::Audio {
            config = config.with_input_transcription().with_output_transcription();
        }
        Ok(config)
    }
}

pub fn parse_modality(value: &str) -> Option<ResponseModality> {
    match value.to_lowercase().as_str() {
        "audio" => Some(ResponseModality::Audio),
        "text" => Some(ResponseModality::Text),
        _ => None,
    }
}

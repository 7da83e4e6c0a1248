//! Connection configuration.

use crate::error::ConfigError;
use crate::protocol::{
    AudioTranscriptionConfig, Content, FunctionDeclaration, GenerationConfig, ResponseModality,
    Setup, SpeechConfig, Tool,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Default Gemini Live endpoint, without the `key` query parameter.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// A function the model may call, declared at setup time.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Option<Value>,
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Some(parameters),
        }
    }
}

/// Everything needed to open a session. Immutable once a connection uses it;
/// changing any of it means disconnecting and connecting again.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub api_key: SecretString,
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice_name: Option<String>,
    pub temperature: Option<f32>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDeclaration>,
    /// Ask the server to transcribe the user's audio.
    pub input_transcription: bool,
    /// Ask the server to transcribe the model's spoken replies.
    pub output_transcription: bool,
    /// Upper bound on the wait for `setupComplete`. `None` waits indefinitely.
    pub setup_timeout: Option<Duration>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("response_modality", &self.response_modality)
            .field("voice_name", &self.voice_name)
            .field("temperature", &self.temperature)
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("input_transcription", &self.input_transcription)
            .field("output_transcription", &self.output_transcription)
            .field("setup_timeout", &self.setup_timeout)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: SecretString::from(api_key.into()),
            model: model.into(),
            response_modality: ResponseModality::Audio,
            voice_name: None,
            temperature: None,
            system_instruction: None,
            tools: Vec::new(),
            input_transcription: false,
            output_transcription: false,
            setup_timeout: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_response_modality(mut self, modality: ResponseModality) -> Self {
        self.response_modality = modality;
        self
    }

    pub fn with_voice(mut self, voice_name: impl Into<String>) -> Self {
        self.voice_name = Some(voice_name.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(text.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolDeclaration) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_input_transcription(mut self) -> Self {
        self.input_transcription = true;
        self
    }

    pub fn with_output_transcription(mut self) -> Self {
        self.output_transcription = true;
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = Some(timeout);
        self
    }

    /// Checks everything that can be checked without a network round-trip.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Missing("model"));
        }
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Missing("api_key"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("endpoint"));
        }
        match Url::parse(&self.endpoint) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
            Ok(url) => {
                return Err(ConfigError::InvalidEndpoint(format!(
                    "unsupported scheme '{}'",
                    url.scheme()
                )));
            }
            Err(e) => return Err(ConfigError::InvalidEndpoint(format!("{}: {}", self.endpoint, e))),
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(ConfigError::InvalidTool {
                    name: tool.name.clone(),
                    reason: "name is empty".into(),
                });
            }
            match &tool.parameters {
                None => {
                    return Err(ConfigError::InvalidTool {
                        name: tool.name.clone(),
                        reason: "missing parameter schema".into(),
                    });
                }
                Some(Value::Object(schema)) if schema.contains_key("type") => {}
                Some(_) => {
                    return Err(ConfigError::InvalidTool {
                        name: tool.name.clone(),
                        reason: "parameter schema must be an object with a 'type'".into(),
                    });
                }
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(ConfigError::DuplicateTool(tool.name.clone()));
            }
        }
        Ok(())
    }

    /// The URL to open, with the API key as the `key` query parameter.
    /// Existing query parameters are kept and the key is percent-encoded.
    pub fn url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {}", self.endpoint, e)))?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }

    /// Builds the body of the `setup` frame.
    pub fn setup(&self) -> Setup {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        let function_declarations: Vec<FunctionDeclaration> = self
            .tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone().unwrap_or(Value::Null),
            })
            .collect();
        let tools = if function_declarations.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations,
            }]
        };

        Setup {
            model,
            generation_config: Some(GenerationConfig {
                response_modalities: vec![self.response_modality],
                speech_config: self.voice_name.as_ref().map(SpeechConfig::prebuilt),
                temperature: self.temperature,
            }),
            system_instruction: self.system_instruction.as_ref().map(Content::text),
            tools,
            input_audio_transcription: self
                .input_transcription
                .then(AudioTranscriptionConfig::default),
            output_audio_transcription: self
                .output_transcription
                .then(AudioTranscriptionConfig::default),
        }
    }
}

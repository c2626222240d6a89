use secrecy::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::Level;

pub const DEFAULT_REALTIME_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: Arc<SecretString>,
    pub realtime_url: String,
    pub realtime_voice: String,
    pub public_url: Option<String>,
    /// Command line of an MCP tool server to spawn for function calls.
    pub tools_mcp_command: Option<String>,
    pub log_level: Level,
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8081".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = optional_var("OPENAI_API_KEY")
            .map(|key| Arc::new(SecretString::from(key)))
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_url =
            optional_var("REALTIME_URL").unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string());
        if !(realtime_url.starts_with("ws://") || realtime_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "REALTIME_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// URL", realtime_url),
            ));
        }

        let realtime_voice = optional_var("REALTIME_VOICE").unwrap_or_else(|| "ash".to_string());
        let public_url = optional_var("PUBLIC_URL");
        let tools_mcp_command = optional_var("TOOLS_MCP_COMMAND");

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            realtime_url,
            realtime_voice,
            public_url,
            tools_mcp_command,
            log_level,
        })
    }
}

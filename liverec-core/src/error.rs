use liverec_providers::ProviderClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderClientError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl Error {
    pub fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_display() {
        let err = Error::tool("ffmpeg", "exit status: 1");
        assert_eq!(err.to_string(), "ffmpeg failed: exit status: 1");
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: Error = ProviderClientError::Network("connection reset".to_string()).into();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(err.to_string(), "Provider error: Network error: connection reset");
    }
}

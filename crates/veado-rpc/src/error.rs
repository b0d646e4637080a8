//! Error types for the veado-rpc crate.

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] veado_core::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("Connecting to {0} timed out")]
    ConnectTimeout(String),

    #[error("Client closed")]
    Closed,
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_from_core_is_transparent() {
        let core = veado_core::Error::InstancesDirNotFound(PathBuf::from("/none"));
        let err: Error = core.into();
        assert!(matches!(err, Error::Core(_)));
        assert_eq!(err.to_string(), "Instances directory not found: /none");
    }

    #[test]
    fn test_error_from_websocket() {
        let err: Error = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, Error::WebSocket(_)));
        assert!(err.to_string().starts_with("WebSocket error"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Closed.to_string(), "Client closed");
        assert_eq!(
            Error::ConnectTimeout("ws://h:1".to_string()).to_string(),
            "Connecting to ws://h:1 timed out"
        );
    }
}

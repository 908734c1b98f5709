//! Provider error types.

use thiserror::Error;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ApnsError>;

/// Errors raised by the provider.
///
/// Per-recipient delivery failures are not errors: they are collected as
/// [`ServiceFailure`](crate::ServiceFailure) entries inside a
/// [`BatchResult`](crate::BatchResult). `ApnsError` covers construction
/// faults, the unsupported-action rejection, and transport plumbing.
#[derive(Debug, Error)]
pub enum ApnsError {
    /// Invalid configuration, detected at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not establish TCP, the CONNECT tunnel, or TLS.
    #[error("Connection error: {0}")]
    Connect(String),

    /// TLS setup failed (bad certificate/key material, config build).
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP/2 protocol error.
    #[error("HTTP/2 error: {0}")]
    Http2(#[from] h2::Error),

    /// Provider token could not be minted.
    #[error("Token error: {0}")]
    Token(String),

    /// The session is gone and the manager will not re-establish it.
    #[error("client session is either closed or destroyed")]
    SessionClosed,

    /// `manage_channels` was called with an action it does not support.
    ///
    /// The only case where a batch entry point rejects instead of
    /// resolving to a [`BatchResult`](crate::BatchResult).
    #[error("the action \"{action}\" is not supported")]
    UnsupportedAction {
        /// Bundle identifier the call was addressed to.
        bundle_id: String,
        /// The rejected action.
        action: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApnsError {
    /// Bundle identifier carried by an [`ApnsError::UnsupportedAction`].
    pub fn bundle_id(&self) -> Option<&str> {
        match self {
            Self::UnsupportedAction { bundle_id, .. } => Some(bundle_id),
            _ => None,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ApnsError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Token(err.to_string())
    }
}

impl From<rustls::Error> for ApnsError {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_action_message() {
        let err = ApnsError::UnsupportedAction {
            bundle_id: "com.example.app".to_string(),
            action: "hello".to_string(),
        };
        assert!(err.to_string().starts_with("the action \"hello\""));
        assert_eq!(err.bundle_id(), Some("com.example.app"));
    }

    #[test]
    fn session_closed_message() {
        assert_eq!(
            ApnsError::SessionClosed.to_string(),
            "client session is either closed or destroyed"
        );
    }
}

use thiserror::Error;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum GridError {
    // Configuration errors (fatal, at construction)
    #[error("Configuration error: {0}")]
    Config(String),

    // Network errors (transient, handled by the retry policy)
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Transport error: {status} {body}")]
    Transport { status: u16, body: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Malformed or unexpected payloads (logged, not retried)
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Post-only order rejected: {0}")]
    PostOnlyRejected(String),

    #[error("Position mismatch: position={position} tracked={tracked} threshold={threshold}")]
    PositionMismatch {
        position: rust_decimal::Decimal,
        tracked: rust_decimal::Decimal,
        threshold: rust_decimal::Decimal,
    },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Crypto/signing errors
    #[error("Signature error: {0}")]
    Signature(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GridError {
    /// Whether the retry policy may re-attempt an operation that failed with
    /// this error. Configuration, validation, signing and mismatch failures
    /// are final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GridError::Http(_)
                | GridError::WebSocket(_)
                | GridError::Transport { .. }
                | GridError::RateLimited(_)
                | GridError::Io(_)
        )
    }
}

/// Result type alias for GridError
pub type Result<T> = std::result::Result<T, GridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GridError::Transport {
            status: 503,
            body: "unavailable".into()
        }
        .is_transient());
        assert!(GridError::RateLimited("slow down".into()).is_transient());
        assert!(!GridError::Config("missing key".into()).is_transient());
        assert!(!GridError::PostOnlyRejected("would match".into()).is_transient());
        assert!(!GridError::Protocol("bad frame".into()).is_transient());
    }
}

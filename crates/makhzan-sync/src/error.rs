//! # Sync Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Configuration        Transport            Protocol                     │
//! │  ─────────────        ─────────            ────────                     │
//! │  InvalidConfig        ConnectionFailed     InvalidMessage               │
//! │  ConfigLoadFailed     Disconnected         SerializationFailed          │
//! │  ConfigSaveFailed     Timeout              Rejected                     │
//! │  InvalidUrl           WebSocketError                                    │
//! │                                                                         │
//! │  Local                                                                  │
//! │  ─────                                                                  │
//! │  Store / Database / ChannelClosed / ShuttingDown                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `is_retryable()` drives the retry queue: a retryable failure parks the
//! mutation for the next drain, a non-retryable one is a bug to log.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering configuration, transport and apply failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Invalid cloud URL.
    #[error("Invalid cloud URL: {0}")]
    InvalidUrl(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish the connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection dropped.
    #[error("Disconnected from cloud")]
    Disconnected,

    /// Operation timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Message could not be parsed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Message could not be serialized.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The cloud rejected the operation.
    #[error("Cloud rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Store-level failure while applying remote data.
    #[error("Store error: {0}")]
    Store(String),

    /// Local database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A channel to another sync component closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Agent is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<makhzan_store::StoreError> for SyncError {
    fn from(err: makhzan_store::StoreError) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<makhzan_db::DbError> for SyncError {
    fn from(err: makhzan_db::DbError) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

// =============================================================================
// Error Categorization (retry logic)
// =============================================================================

impl SyncError {
    /// True when the failed operation belongs in the retry queue.
    ///
    /// Network problems heal; config and protocol problems don't.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
        )
    }

    /// True when the error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::InvalidUrl(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_is_network_only() {
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::Timeout(10).is_retryable());
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());

        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::InvalidMessage("junk".into()).is_retryable());
        assert!(!SyncError::Rejected {
            operation: "push".into(),
            reason: "denied".into()
        }
        .is_retryable());
    }
}

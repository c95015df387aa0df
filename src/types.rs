// =============================================================================
// Shared types used across the SkyPulse dashboard backend
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Lifecycle state of the live price stream connection.
///
/// Owned exclusively by the stream manager; everything else reads it through
/// the shared status handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection and no attempt in flight (includes the gap between a
    /// closure and the next scheduled reconnect).
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The stream is live and delivering price updates.
    Connected,
    /// Retries are exhausted; manual restart required.
    Failed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// Which collaborator produced the error (e.g. "market_cap", "weather").
    pub source: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

impl ErrorRecord {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
            at: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Failed.to_string(), "Failed");
    }

    #[test]
    fn connection_state_serializes_as_name() {
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, "\"Connected\"");
    }

    #[test]
    fn error_record_carries_source() {
        let rec = ErrorRecord::new("weather", "request timed out");
        assert_eq!(rec.source, "weather");
        assert_eq!(rec.message, "request timed out");
        assert!(!rec.at.is_empty());
    }
}

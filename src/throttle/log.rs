//! Blocked-request logging.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::policy::RateLimitPeriod;

/// Snapshot emitted once per blocked request.
///
/// Owned by the caller after emission; the engine retains nothing.
#[derive(Debug, Clone, Serialize)]
pub struct ThrottleLogEntry {
    /// Derived counter key; doubles as a correlation id for the block
    pub request_id: String,
    pub client_ip: String,
    pub client_key: String,
    pub endpoint: String,
    pub user_agent: Option<String>,
    /// Counter total at the moment of the block
    pub total_requests: u64,
    /// Start of the window that triggered the block
    pub window_start: DateTime<Utc>,
    /// The limit that was exceeded
    pub rate_limit: u64,
    /// The period whose limit was exceeded
    pub period: RateLimitPeriod,
    pub logged_at: DateTime<Utc>,
}

/// Sink for blocked-request records.
///
/// Receives each entry exactly once. The sink is infallible by contract:
/// whatever it does must not affect the decision already computed.
pub trait ThrottleLogger: Send + Sync {
    fn log(&self, entry: &ThrottleLogEntry);
}

/// Default sink emitting a structured `tracing` event per blocked request.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl ThrottleLogger for TracingLogger {
    fn log(&self, entry: &ThrottleLogEntry) {
        warn!(
            request_id = %entry.request_id,
            client_ip = %entry.client_ip,
            client_key = %entry.client_key,
            endpoint = %entry.endpoint,
            total_requests = entry.total_requests,
            rate_limit = entry.rate_limit,
            period = %entry.period,
            "Request blocked by throttle policy"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_serializes() {
        let entry = ThrottleLogEntry {
            request_id: "abc123".to_string(),
            client_ip: "203.0.113.9".to_string(),
            client_key: "anon".to_string(),
            endpoint: "api/values".to_string(),
            user_agent: None,
            total_requests: 11,
            window_start: Utc::now(),
            rate_limit: 10,
            period: RateLimitPeriod::Minute,
            logged_at: Utc::now(),
        };

        let yaml = serde_yaml::to_string(&entry).unwrap();
        assert!(yaml.contains("client_ip: 203.0.113.9"));
        assert!(yaml.contains("period: minute"));
    }
}

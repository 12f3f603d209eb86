//! Throttling policy configuration and matching.
//!
//! A [`ThrottlePolicy`] is immutable after load: base rates, the scope fields
//! that participate in counter keys, per-scope override tables, and
//! whitelists. Policies can be built programmatically or loaded from YAML.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ThrottleError};

/// Time period over which a request count is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPeriod {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl RateLimitPeriod {
    /// All periods, ascending by duration.
    pub const ALL: [RateLimitPeriod; 5] = [
        RateLimitPeriod::Second,
        RateLimitPeriod::Minute,
        RateLimitPeriod::Hour,
        RateLimitPeriod::Day,
        RateLimitPeriod::Week,
    ];

    /// Get the fixed duration of this period.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// Get the fixed duration of this period in seconds.
    pub fn as_secs(&self) -> u64 {
        match self {
            RateLimitPeriod::Second => 1,
            RateLimitPeriod::Minute => 60,
            RateLimitPeriod::Hour => 3600,
            RateLimitPeriod::Day => 86400,
            RateLimitPeriod::Week => 604800,
        }
    }

    /// The period name used in counter keys, messages, and log entries.
    pub fn name(&self) -> &'static str {
        match self {
            RateLimitPeriod::Second => "second",
            RateLimitPeriod::Minute => "minute",
            RateLimitPeriod::Hour => "hour",
            RateLimitPeriod::Day => "day",
            RateLimitPeriod::Week => "week",
        }
    }
}

impl std::fmt::Display for RateLimitPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sparse per-period limits.
///
/// An absent or zero entry means "no limit at this period for this rule".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub per_second: Option<u64>,
    pub per_minute: Option<u64>,
    pub per_hour: Option<u64>,
    pub per_day: Option<u64>,
    pub per_week: Option<u64>,
}

impl RateLimits {
    /// Get the effective limit for a period, treating zero as unset.
    pub fn limit_for(&self, period: RateLimitPeriod) -> Option<u64> {
        let limit = match period {
            RateLimitPeriod::Second => self.per_second,
            RateLimitPeriod::Minute => self.per_minute,
            RateLimitPeriod::Hour => self.per_hour,
            RateLimitPeriod::Day => self.per_day,
            RateLimitPeriod::Week => self.per_week,
        };
        limit.filter(|l| *l > 0)
    }
}

/// A single base rate: the request limit for one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateEntry {
    pub period: RateLimitPeriod,
    pub limit: u64,
}

/// How the host application renders the endpoint string a policy matches
/// against. The engine only consumes the already-rendered string; see
/// [`crate::throttle::render_endpoint`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    #[default]
    AbsolutePath,
    PathAndQuery,
    ControllerAndAction,
    Controller,
}

/// An IP-scoped rate limit override.
///
/// Kept as an ordered list rather than a map: the first matching range wins,
/// so rule order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRule {
    /// Range spec: bare address, CIDR block, or dash-delimited range
    pub range: String,
    #[serde(default)]
    pub limits: RateLimits,
}

/// The root throttling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlePolicy {
    /// Base limits, kept ascending by period duration (see [`Self::normalize`]).
    /// Evaluation order for a request follows this order, reversed when
    /// `stack_blocked_requests` is set.
    pub rates: Vec<RateEntry>,

    /// Scope fields that participate in counter key derivation
    pub ip_throttling: bool,
    pub client_throttling: bool,
    pub endpoint_throttling: bool,
    pub user_agent_throttling: bool,

    /// Per-IP overrides; first matching range wins
    pub ip_rules: Vec<IpRule>,
    /// Per-client overrides, exact match on the client key
    pub client_rules: HashMap<String, RateLimits>,
    /// Per-endpoint overrides, case-insensitive substring match
    pub endpoint_rules: HashMap<String, RateLimits>,
    /// Per-user-agent overrides, case-insensitive substring match
    pub user_agent_rules: HashMap<String, RateLimits>,

    /// Patterns exempting matching requests from throttling entirely
    pub ip_whitelist: Vec<String>,
    pub client_whitelist: Vec<String>,
    pub endpoint_whitelist: Vec<String>,
    pub user_agent_whitelist: Vec<String>,

    /// Endpoint rendering the host application should apply
    pub endpoint_type: EndpointType,

    /// Evaluate periods longest-first so rejected requests still count
    /// against longer windows while shorter windows are saturated
    pub stack_blocked_requests: bool,
}

impl ThrottlePolicy {
    /// Create a policy with base rates taken from the set entries of
    /// `limits`, ascending by period duration.
    pub fn with_rates(limits: RateLimits) -> Self {
        let rates = RateLimitPeriod::ALL
            .iter()
            .filter_map(|period| {
                limits.limit_for(*period).map(|limit| RateEntry {
                    period: *period,
                    limit,
                })
            })
            .collect();

        Self {
            rates,
            ..Self::default()
        }
    }

    /// Load a policy from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttle policy");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut policy: ThrottlePolicy = serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Policy(format!("Failed to parse throttle policy: {}", e)))?;
        policy.normalize();

        if policy.rates.is_empty() {
            return Err(ThrottleError::Policy(
                "policy must define at least one base rate".to_string(),
            ));
        }

        Ok(policy)
    }

    /// Sort base rates ascending by period duration and drop zero limits.
    pub fn normalize(&mut self) {
        self.rates.retain(|rate| rate.limit > 0);
        self.rates.sort_by_key(|rate| rate.period.as_secs());
        self.rates.dedup_by_key(|rate| rate.period);
    }

    /// Get the base limit for a period, if one is configured.
    pub fn base_limit(&self, period: RateLimitPeriod) -> Option<u64> {
        self.rates
            .iter()
            .find(|rate| rate.period == period)
            .map(|rate| rate.limit)
    }
}

/// Per-route throttling annotations the caller resolved from route-level
/// metadata before invoking the engine.
///
/// Whether to invoke the engine at all is the caller's decision, based on
/// [`Self::applies`]; the engine itself only consults `limits`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteAnnotations {
    /// Limits that override the policy base rates for this route
    pub limits: RateLimits,
    /// Throttling enabled at the controller/class level
    pub controller_enabled: bool,
    /// Throttling explicitly disabled at the controller/class level
    pub controller_disabled: bool,
    /// Throttling enabled at the action/handler level
    pub action_enabled: bool,
    /// Throttling explicitly disabled at the action/handler level
    pub action_disabled: bool,
}

impl RouteAnnotations {
    /// Whether throttling applies to this route.
    ///
    /// Precedence: controller enable, controller disable, action enable,
    /// action disable. Each later flag overrides the previous outcome, so an
    /// explicit action-level disable always wins.
    pub fn applies(&self) -> bool {
        let mut apply = false;
        if self.controller_enabled {
            apply = true;
        }
        if self.controller_disabled {
            apply = false;
        }
        if self.action_enabled {
            apply = true;
        }
        if self.action_disabled {
            apply = false;
        }
        apply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_durations() {
        assert_eq!(RateLimitPeriod::Second.duration(), Duration::from_secs(1));
        assert_eq!(RateLimitPeriod::Minute.duration(), Duration::from_secs(60));
        assert_eq!(RateLimitPeriod::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(RateLimitPeriod::Day.duration(), Duration::from_secs(86400));
        assert_eq!(RateLimitPeriod::Week.duration(), Duration::from_secs(604800));
    }

    #[test]
    fn test_limit_for_treats_zero_as_unset() {
        let limits = RateLimits {
            per_minute: Some(10),
            per_hour: Some(0),
            ..Default::default()
        };
        assert_eq!(limits.limit_for(RateLimitPeriod::Minute), Some(10));
        assert_eq!(limits.limit_for(RateLimitPeriod::Hour), None);
        assert_eq!(limits.limit_for(RateLimitPeriod::Day), None);
    }

    #[test]
    fn test_with_rates_orders_ascending() {
        let policy = ThrottlePolicy::with_rates(RateLimits {
            per_day: Some(600),
            per_second: Some(1),
            per_minute: Some(10),
            ..Default::default()
        });

        let periods: Vec<_> = policy.rates.iter().map(|r| r.period).collect();
        assert_eq!(
            periods,
            vec![
                RateLimitPeriod::Second,
                RateLimitPeriod::Minute,
                RateLimitPeriod::Day
            ]
        );
    }

    #[test]
    fn test_normalize_sorts_and_drops_zero() {
        let mut policy = ThrottlePolicy {
            rates: vec![
                RateEntry {
                    period: RateLimitPeriod::Hour,
                    limit: 100,
                },
                RateEntry {
                    period: RateLimitPeriod::Second,
                    limit: 0,
                },
                RateEntry {
                    period: RateLimitPeriod::Minute,
                    limit: 10,
                },
            ],
            ..Default::default()
        };
        policy.normalize();

        assert_eq!(policy.rates.len(), 2);
        assert_eq!(policy.rates[0].period, RateLimitPeriod::Minute);
        assert_eq!(policy.rates[1].period, RateLimitPeriod::Hour);
    }

    #[test]
    fn test_parse_policy_yaml() {
        let yaml = r#"
rates:
  - period: minute
    limit: 10
  - period: hour
    limit: 100
ip_throttling: true
endpoint_throttling: true
endpoint_rules:
  api/values:
    per_minute: 3
ip_rules:
  - range: 192.168.2.1
    limits:
      per_minute: 30
ip_whitelist:
  - 127.0.0.1
  - 192.168.0.0/24
"#;
        let policy = ThrottlePolicy::from_yaml(yaml).unwrap();

        assert!(policy.ip_throttling);
        assert!(policy.endpoint_throttling);
        assert!(!policy.client_throttling);
        assert_eq!(policy.base_limit(RateLimitPeriod::Minute), Some(10));
        assert_eq!(policy.base_limit(RateLimitPeriod::Hour), Some(100));
        assert_eq!(policy.base_limit(RateLimitPeriod::Day), None);
        assert_eq!(
            policy.endpoint_rules["api/values"].limit_for(RateLimitPeriod::Minute),
            Some(3)
        );
        assert_eq!(policy.ip_rules[0].range, "192.168.2.1");
        assert_eq!(policy.ip_whitelist.len(), 2);
    }

    #[test]
    fn test_parse_policy_without_rates_rejected() {
        let yaml = "ip_throttling: true\n";
        assert!(ThrottlePolicy::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_annotations_precedence() {
        let mut ann = RouteAnnotations {
            controller_enabled: true,
            ..Default::default()
        };
        assert!(ann.applies());

        ann.action_disabled = true;
        assert!(!ann.applies());

        let ann = RouteAnnotations {
            controller_enabled: true,
            controller_disabled: true,
            action_enabled: true,
            ..Default::default()
        };
        assert!(ann.applies());

        assert!(!RouteAnnotations::default().applies());
    }
}

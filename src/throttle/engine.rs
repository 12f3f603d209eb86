//! Core admission decision engine.
//!
//! [`ThrottleEngine::evaluate`] takes a request descriptor, a policy, and an
//! optional per-route annotation override and answers allow or block. The
//! read-increment-write against the counter store is a single logical
//! transaction per key; the engine serializes it with striped locks rather
//! than one global critical section, so unrelated keys rarely contend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::Result;
use crate::net::{contains_ip, first_match, parse_ip};

use super::key::derive_key;
use super::log::{ThrottleLogEntry, ThrottleLogger};
use super::policy::{RateLimitPeriod, RouteAnnotations, ThrottlePolicy};
use super::scope::{RequestDescriptor, RequestScope};
use super::store::{CounterStore, ThrottleCounter};

/// Suggested HTTP status for rejected requests.
pub const DEFAULT_BLOCKED_STATUS: u16 = 429;

/// Number of lock stripes guarding counter transactions. Keys hash onto
/// stripes; two keys on the same stripe serialize, which is harmless.
const LOCK_STRIPES: usize = 32;

/// The outcome of one admission decision.
#[derive(Debug)]
pub enum Decision {
    /// Admit the request
    Allow,
    /// Reject the request
    Block(Blocked),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn blocked(&self) -> Option<&Blocked> {
        match self {
            Decision::Allow => None,
            Decision::Block(blocked) => Some(blocked),
        }
    }
}

/// Details of a rejection: which period tripped, at what limit, and when the
/// window rolls over.
#[derive(Debug)]
pub struct Blocked {
    /// The period whose limit was exceeded
    pub period: RateLimitPeriod,
    /// The effective limit that was exceeded
    pub limit: u64,
    /// Seconds until the current window rolls over, floored at 1
    pub retry_after_secs: u64,
    /// The record emitted to the logger sink, owned by the caller
    pub entry: ThrottleLogEntry,
}

impl Blocked {
    /// Human-readable quota message: `"<limit> per <period>"`. Callers may
    /// wrap it with their own prefix or suffix.
    pub fn quota_message(&self) -> String {
        format!("{} per {}", self.limit, self.period)
    }
}

/// Capability interface for turning a block decision into a host-framework
/// response. The engine never renders responses itself.
pub trait RejectionRenderer {
    type Response;

    fn render_rejection(&self, blocked: &Blocked) -> Self::Response;
}

/// The admission engine.
///
/// Shared across request-handling tasks; the policy is read-only during
/// evaluation and the counter store is accessed through per-key striped
/// locking, so one instance serves arbitrary concurrency.
pub struct ThrottleEngine {
    store: Arc<dyn CounterStore>,
    stripes: Vec<Mutex<()>>,
    logger: Option<Arc<dyn ThrottleLogger>>,
}

impl ThrottleEngine {
    /// Create an engine backed by the given counter store.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            logger: None,
        }
    }

    /// Attach a sink for blocked-request records.
    pub fn with_logger(mut self, logger: Arc<dyn ThrottleLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Decide whether to admit a request under the given policy.
    ///
    /// `annotations` carries the per-route override the caller resolved from
    /// route metadata, if any; whether to invoke the engine at all is the
    /// caller's call (see [`RouteAnnotations::applies`]).
    ///
    /// A counter-store failure propagates as [`crate::ThrottleError::Store`];
    /// no counter is partially applied for the failing period. The crate
    /// takes no fail-open or fail-closed stance on behalf of the caller.
    pub async fn evaluate(
        &self,
        request: &RequestDescriptor,
        policy: &ThrottlePolicy,
        annotations: Option<&RouteAnnotations>,
    ) -> Result<Decision> {
        self.evaluate_at(request, policy, annotations, Utc::now())
            .await
    }

    /// [`Self::evaluate`] with an explicit timestamp.
    pub async fn evaluate_at(
        &self,
        request: &RequestDescriptor,
        policy: &ThrottlePolicy,
        annotations: Option<&RouteAnnotations>,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let scope = RequestScope::resolve(request);

        if is_whitelisted(&scope, policy) {
            trace!(client_ip = %scope.client_ip, endpoint = %scope.endpoint, "Scope whitelisted");
            return Ok(Decision::Allow);
        }

        let mut periods: Vec<(RateLimitPeriod, u64)> = policy
            .rates
            .iter()
            .map(|rate| (rate.period, rate.limit))
            .collect();
        // rates are ascending by duration; stacking evaluates longest first
        // so saturated short windows keep accumulating and expire on their own
        if policy.stack_blocked_requests {
            periods.reverse();
        }

        for (period, base_limit) in periods {
            let key = derive_key(&scope, policy, period);
            let counter = self.record(&key, period, now).await?;

            // an expired window carries no enforcement weight
            if counter.expired(period.duration(), now) {
                continue;
            }

            let limit = effective_limit(policy, annotations, &scope, period, base_limit);

            if limit > 0 && counter.total_requests > limit {
                debug!(
                    key = %key,
                    period = %period,
                    limit = limit,
                    total = counter.total_requests,
                    "Rate limit exceeded"
                );

                let entry = ThrottleLogEntry {
                    request_id: key,
                    client_ip: scope.client_ip.clone(),
                    client_key: scope.client_key.clone(),
                    endpoint: scope.endpoint.clone(),
                    user_agent: scope.user_agent.clone(),
                    total_requests: counter.total_requests,
                    window_start: counter.window_start,
                    rate_limit: limit,
                    period,
                    logged_at: now,
                };
                if let Some(logger) = &self.logger {
                    logger.log(&entry);
                }

                return Ok(Decision::Block(Blocked {
                    period,
                    limit,
                    retry_after_secs: retry_after_secs(period, counter.window_start, now),
                    entry,
                }));
            }
        }

        Ok(Decision::Allow)
    }

    /// Record one request against a counter key: read, fresh-or-increment,
    /// write with expiry = period duration, all under the key's stripe lock.
    async fn record(
        &self,
        key: &str,
        period: RateLimitPeriod,
        now: DateTime<Utc>,
    ) -> Result<ThrottleCounter> {
        let _guard = self.stripes[stripe_index(key)].lock().await;

        let counter = match self.store.get(key).await? {
            Some(existing) if !existing.expired(period.duration(), now) => existing.incremented(),
            _ => ThrottleCounter::start(now),
        };
        self.store.save(key, counter, period.duration()).await?;

        Ok(counter)
    }
}

fn stripe_index(key: &str) -> usize {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % LOCK_STRIPES
}

/// Whitelist short-circuit: each list is consulted only when the matching
/// scope field participates in throttling.
fn is_whitelisted(scope: &RequestScope, policy: &ThrottlePolicy) -> bool {
    if policy.ip_throttling && !policy.ip_whitelist.is_empty() {
        if let Ok(ip) = parse_ip(&scope.client_ip) {
            if contains_ip(policy.ip_whitelist.iter().map(String::as_str), ip) {
                return true;
            }
        }
    }

    if policy.client_throttling
        && policy
            .client_whitelist
            .iter()
            .any(|key| key == &scope.client_key)
    {
        return true;
    }

    if policy.endpoint_throttling
        && policy
            .endpoint_whitelist
            .iter()
            .any(|pattern| scope.endpoint.contains(&pattern.to_lowercase()))
    {
        return true;
    }

    if policy.user_agent_throttling {
        if let Some(user_agent) = &scope.user_agent {
            let user_agent = user_agent.to_lowercase();
            if policy
                .user_agent_whitelist
                .iter()
                .any(|pattern| user_agent.contains(&pattern.to_lowercase()))
            {
                return true;
            }
        }
    }

    false
}

/// Resolve the effective limit for one period.
///
/// Later steps override earlier ones when they yield a positive value:
/// base rate, route annotation, endpoint rules (lowest match), client rule,
/// user-agent rules (lowest match), and finally IP rules. IP scoping is the
/// most specific and has the final say.
fn effective_limit(
    policy: &ThrottlePolicy,
    annotations: Option<&RouteAnnotations>,
    scope: &RequestScope,
    period: RateLimitPeriod,
    base_limit: u64,
) -> u64 {
    let mut limit = base_limit;

    if let Some(override_limit) = annotations.and_then(|ann| ann.limits.limit_for(period)) {
        limit = override_limit;
    }

    let endpoint_limit = policy
        .endpoint_rules
        .iter()
        .filter(|(pattern, _)| scope.endpoint.contains(&pattern.to_lowercase()))
        .filter_map(|(_, limits)| limits.limit_for(period))
        .min();
    if let Some(override_limit) = endpoint_limit {
        limit = override_limit;
    }

    if let Some(override_limit) = policy
        .client_rules
        .get(&scope.client_key)
        .and_then(|limits| limits.limit_for(period))
    {
        limit = override_limit;
    }

    if let Some(user_agent) = &scope.user_agent {
        let user_agent = user_agent.to_lowercase();
        let agent_limit = policy
            .user_agent_rules
            .iter()
            .filter(|(pattern, _)| user_agent.contains(&pattern.to_lowercase()))
            .filter_map(|(_, limits)| limits.limit_for(period))
            .min();
        if let Some(override_limit) = agent_limit {
            limit = override_limit;
        }
    }

    if let Ok(ip) = parse_ip(&scope.client_ip) {
        let ranges = policy.ip_rules.iter().map(|rule| rule.range.as_str());
        if let Some(matched) = first_match(ranges, ip) {
            let rule = policy
                .ip_rules
                .iter()
                .find(|rule| rule.range == matched)
                .and_then(|rule| rule.limits.limit_for(period));
            if let Some(override_limit) = rule {
                limit = override_limit;
            }
        }
    }

    limit
}

/// Seconds until the window that started at `window_start` rolls over,
/// floored at 1.
fn retry_after_secs(
    period: RateLimitPeriod,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> u64 {
    let elapsed = (now - window_start).num_seconds().max(0) as u64;
    period.as_secs().saturating_sub(elapsed).max(1)
}

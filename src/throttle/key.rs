//! Counter key derivation.

use sha2::{Digest, Sha256};

use super::policy::{RateLimitPeriod, ThrottlePolicy};
use super::scope::RequestScope;

/// Fixed namespace tag prefixed to every counter key.
const KEY_NAMESPACE: &str = "throttle";

/// Derive the stable counter-store key for a (scope, period) pair.
///
/// The key is built from the namespace tag, the scope fields selected by the
/// policy's `*_throttling` flags, and the period name, then digested to a
/// fixed-length lowercase hex string. Distinct (scope, period) pairs must not
/// collide; the engine's correctness depends on it.
pub fn derive_key(
    scope: &RequestScope,
    policy: &ThrottlePolicy,
    period: RateLimitPeriod,
) -> String {
    let mut parts: Vec<&str> = vec![KEY_NAMESPACE];

    if policy.ip_throttling {
        parts.push(&scope.client_ip);
    }
    if policy.client_throttling {
        parts.push(&scope.client_key);
    }
    if policy.endpoint_throttling {
        parts.push(&scope.endpoint);
    }
    if policy.user_agent_throttling {
        if let Some(user_agent) = &scope.user_agent {
            parts.push(user_agent);
        }
    }
    parts.push(period.name());

    let digest = Sha256::digest(parts.join("_").as_bytes());
    hex::encode(digest)
}

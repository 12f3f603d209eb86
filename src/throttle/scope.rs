//! Request scope resolution.
//!
//! The host framework extracts raw request attributes into a
//! [`RequestDescriptor`]; the engine canonicalizes them into a
//! [`RequestScope`], the tuple a policy's counters are partitioned by.

use crate::net::{is_private, parse_ip};

use super::policy::EndpointType;

/// Raw request attributes supplied by the host framework.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Client address as seen by the host, possibly with a port suffix
    pub raw_client_ip: String,
    /// Whether the request carries an authenticated identity
    pub is_authenticated: bool,
    /// Endpoint string, already rendered per the policy's
    /// [`EndpointType`]
    pub endpoint: String,
    /// User agent header, if present
    pub user_agent: Option<String>,
}

/// The resolved identity a decision is scoped by.
///
/// Immutable once built; exists only for the duration of one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestScope {
    /// Canonicalized client IP, or the raw string when unparseable
    pub client_ip: String,
    /// `"auth"` for authenticated requests, `"anon"` otherwise
    pub client_key: String,
    /// Lower-cased endpoint
    pub endpoint: String,
    pub user_agent: Option<String>,
}

impl RequestScope {
    /// Resolve a raw descriptor into a canonical scope.
    ///
    /// An unparseable client IP falls back to the raw string; IP-range rules
    /// will simply never match it.
    pub fn resolve(descriptor: &RequestDescriptor) -> Self {
        let client_ip = match parse_ip(&descriptor.raw_client_ip) {
            Ok(ip) => ip.to_string(),
            Err(_) => descriptor.raw_client_ip.trim().to_string(),
        };

        Self {
            client_ip,
            client_key: if descriptor.is_authenticated {
                "auth".to_string()
            } else {
                "anon".to_string()
            },
            endpoint: descriptor.endpoint.to_lowercase(),
            user_agent: descriptor.user_agent.clone(),
        }
    }
}

/// Which public address to pick from a forwarded-for chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardedIpPosition {
    /// First public hop; the nginx convention
    First,
    /// Last public hop; the convention behind most generic load balancers
    Last,
}

/// Resolve the client IP behind a reverse proxy.
///
/// Picks the first or last public address from a comma-separated
/// `X-Forwarded-For` value, falling back to the direct peer address when the
/// header is absent or lists only private hops.
pub fn forwarded_client_ip(
    host_addr: &str,
    x_forwarded_for: Option<&str>,
    position: ForwardedIpPosition,
) -> String {
    let forwarded = match x_forwarded_for.filter(|value| !value.trim().is_empty()) {
        Some(value) => value,
        None => return host_addr.to_string(),
    };

    let mut public = forwarded
        .split(',')
        .map(str::trim)
        .filter(|candidate| matches!(parse_ip(candidate), Ok(ip) if !is_private(ip)));

    let picked = match position {
        ForwardedIpPosition::First => public.next(),
        ForwardedIpPosition::Last => public.last(),
    };

    picked
        .map(str::to_string)
        .unwrap_or_else(|| host_addr.to_string())
}

/// Render the endpoint string a host adapter should place into a
/// [`RequestDescriptor`], per the policy's [`EndpointType`].
pub fn render_endpoint(
    kind: EndpointType,
    path: &str,
    query: &str,
    controller: &str,
    action: &str,
) -> String {
    match kind {
        EndpointType::AbsolutePath => path.to_string(),
        EndpointType::PathAndQuery => {
            if query.is_empty() {
                path.to_string()
            } else {
                format!("{}?{}", path, query)
            }
        }
        EndpointType::ControllerAndAction => format!("{}/{}", controller, action),
        EndpointType::Controller => controller.to_string(),
    }
}

//! Throttling policy, scope resolution, and the admission decision engine.

mod engine;
mod key;
mod log;
mod policy;
mod scope;
mod store;

pub use engine::{Blocked, Decision, RejectionRenderer, ThrottleEngine, DEFAULT_BLOCKED_STATUS};
pub use key::derive_key;
pub use log::{ThrottleLogEntry, ThrottleLogger, TracingLogger};
pub use policy::{
    EndpointType, IpRule, RateEntry, RateLimitPeriod, RateLimits, RouteAnnotations, ThrottlePolicy,
};
pub use scope::{
    forwarded_client_ip, render_endpoint, ForwardedIpPosition, RequestDescriptor, RequestScope,
};
pub use store::{CounterStore, MemoryCounterStore, ThrottleCounter};

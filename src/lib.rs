//! Turnstile - Request-Admission Engine
//!
//! This crate implements a per-request admission engine: given a request's
//! scoping attributes (client IP, authenticated identity, endpoint, user
//! agent) and a throttling policy, it decides whether to admit or reject the
//! request, and when rejecting, how long until retry is advisable.
//!
//! The crate is host-framework agnostic. Extracting attributes from a live
//! HTTP request, discovering per-route configuration, and rendering the
//! rejection response are the embedding application's responsibility; the
//! engine consumes an already-resolved [`throttle::RequestDescriptor`] and
//! returns a [`throttle::Decision`].

pub mod error;
pub mod net;
pub mod throttle;

pub use error::{Result, ThrottleError};
pub use throttle::{
    CounterStore, Decision, MemoryCounterStore, RateLimitPeriod, RateLimits, RequestDescriptor,
    RequestScope, ThrottleEngine, ThrottlePolicy,
};

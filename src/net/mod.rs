//! IP address parsing, classification, and range matching.

mod range;

pub use range::{contains_ip, first_match, is_private, parse_ip, IpRange};

//! Upstream selection (spec §4.D): weighted round-robin for HTTP/WS routes,
//! consistent hashing for stream upstreams, and a bounded passive-failure
//! tracker shared by both.

pub mod consistent_hash;
pub mod failure;
pub mod weighted_rr;

pub use consistent_hash::ConsistentHashRing;
pub use failure::FailureTracker;
pub use weighted_rr::WeightedRoundRobin;

//! The per-request observation record (spec §4.L, §6 "Observed-record
//! schema"). Every terminal HTTP/WS/stream event becomes exactly one of
//! these, regardless of which engine produced it.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Status class bucket used by the rolling time-series tables. `status=0`
/// (per spec §7, emitted for e.g. a failed TLS handshake) falls into `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusClass {
    Informational,
    Success,
    Redirect,
    ClientError,
    ServerError,
    Err,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            0 => StatusClass::Err,
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Err,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservedRecord {
    pub timestamp_unix_secs: u64,
    pub listener: String,
    pub client_ip: IpAddr,
    pub peer_ip: IpAddr,
    pub method: String,
    pub host: String,
    pub path: String,
    pub status: u16,
    pub upstream: Option<String>,
    pub route_id: Option<String>,
    pub latency_ms: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl ObservedRecord {
    pub fn status_class(&self) -> StatusClass {
        StatusClass::from_status(self.status)
    }
}

pub fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(StatusClass::from_status(0), StatusClass::Err);
        assert_eq!(StatusClass::from_status(204), StatusClass::Success);
        assert_eq!(StatusClass::from_status(301), StatusClass::Redirect);
        assert_eq!(StatusClass::from_status(404), StatusClass::ClientError);
        assert_eq!(StatusClass::from_status(502), StatusClass::ServerError);
    }
}

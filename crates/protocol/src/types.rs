use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Which of the two wireless-debugging services an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointKind {
    /// `_adb-tls-pairing._tcp`, the one-shot pairing service.
    Pairing,
    /// `_adb-tls-connect._tcp`, the regular ADB session service.
    Connect,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Pairing => write!(f, "pairing"),
            EndpointKind::Connect => write!(f, "connect"),
        }
    }
}

/// A resolved wireless-debugging endpoint.
///
/// Endpoints are ephemeral: the daemon re-advertises on a fresh port after
/// every toggle, so consumers treat the most recently resolved record as
/// authoritative and keep it cached across service-lost events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub host: IpAddr,
    pub port: u16,
    /// Full mDNS instance name the record was resolved from.
    pub service_name: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.kind)
    }
}

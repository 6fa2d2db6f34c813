//! mDNS discovery of the device's wireless-debugging services.
//!
//! The daemon advertises two ephemeral services: `_adb-tls-pairing._tcp`
//! while the pairing dialog is open, and `_adb-tls-connect._tcp` whenever
//! wireless debugging is on. Both come and go quickly, so the last resolved
//! endpoint of each kind stays cached across service-lost events.

pub mod client;
pub mod local;

pub use client::{DiscoveryClient, DiscoveryState};
pub use local::get_local_ips;

/// mDNS service type for the pairing endpoint.
pub const PAIRING_SERVICE: &str = "_adb-tls-pairing._tcp.local.";

/// mDNS service type for the connect endpoint.
pub const CONNECT_SERVICE: &str = "_adb-tls-connect._tcp.local.";

/// Errors for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mDNS error: {0}")]
    Mdns(String),
}

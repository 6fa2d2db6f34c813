//! Local interface enumeration for the same-host filter.

use std::net::IpAddr;

/// Returns local non-loopback IPv4 addresses, excluding link-local
/// (169.254.x.x).
pub fn get_local_ips() -> Vec<IpAddr> {
    let mut ips = Vec::new();

    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return ips;
    };

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        if let IpAddr::V4(ipv4) = iface.ip() {
            if ipv4.octets()[0] == 127 {
                continue;
            }
            if ipv4.octets()[0] == 169 && ipv4.octets()[1] == 254 {
                continue;
            }
            ips.push(IpAddr::V4(ipv4));
        }
    }

    ips
}

/// `true` when `ip` is safe to drive: loopback, or bound to one of this
/// host's interfaces. Anything else is another machine's daemon.
pub fn is_same_host(ip: &IpAddr, local_ips: &[IpAddr]) -> bool {
    ip.is_loopback() || local_ips.contains(ip)
}

use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::net::Ipv4Addr;

use crate::types::SubnetPrefix;

/// An active non-loopback IPv4 interface address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl LocalInterface {
    /// The interface's network, e.g. `192.168.1.0/24`.
    pub fn network(&self) -> Ipv4Net {
        interface_network(self.ip, self.mask)
    }

    pub fn prefix(&self) -> SubnetPrefix {
        SubnetPrefix::from_ipv4(self.ip)
    }
}

/// Enumerate non-loopback IPv4 interface addresses, sorted by name then address.
pub fn local_interfaces() -> Result<Vec<LocalInterface>> {
    let mut out = Vec::new();
    for iface in get_if_addrs()? {
        if iface.is_loopback() {
            continue;
        }
        if let IfAddr::V4(v4) = iface.addr {
            out.push(LocalInterface {
                name: iface.name,
                ip: v4.ip,
                mask: v4.netmask,
            });
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name).then(u32::from(a.ip).cmp(&u32::from(b.ip))));
    out.dedup();
    Ok(out)
}

/// Prefix to sweep when the caller didn't name one: the first private
/// interface address, else the first interface of any kind.
pub fn default_prefix(interfaces: &[LocalInterface]) -> Option<SubnetPrefix> {
    interfaces
        .iter()
        .find(|i| i.ip.is_private())
        .or_else(|| interfaces.first())
        .map(LocalInterface::prefix)
}

/// Network of `ip` under `mask`. A non-contiguous mask falls back to /24.
pub fn interface_network(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::with_netmask(ip, mask)
        .map(|n| n.trunc())
        .unwrap_or_else(|_| ipv4_to_default_cidr(ip))
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).expect("/24 is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, ip: [u8; 4]) -> LocalInterface {
        LocalInterface {
            name: name.into(),
            ip: Ipv4Addr::from(ip),
            mask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }

    #[test]
    fn default_cidr_from_ipv4() {
        let cidr = ipv4_to_default_cidr(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(cidr.to_string(), "10.1.2.0/24");
    }

    #[test]
    fn network_honours_mask() {
        let net = interface_network(Ipv4Addr::new(172, 16, 5, 9), Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(net.to_string(), "172.16.0.0/16");
        let odd = interface_network(Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(255, 0, 255, 0));
        assert_eq!(odd.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn default_prefix_prefers_private_address() {
        let ifaces = vec![iface("tun0", [100, 64, 0, 2]), iface("wlan0", [192, 168, 1, 42])];
        assert_eq!(default_prefix(&ifaces), Some(SubnetPrefix::new(192, 168, 1)));
        let public = vec![iface("eth0", [100, 64, 0, 2])];
        assert_eq!(default_prefix(&public), Some(SubnetPrefix::new(100, 64, 0)));
        assert_eq!(default_prefix(&[]), None);
    }
}

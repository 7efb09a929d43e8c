use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

pub const MIN_PORT: u16 = 1;
pub const MAX_PORT: u16 = 65535;
pub const MIN_HOST: u8 = 1;
pub const MAX_HOST: u8 = 254;

/// Open/closed state for every port of a scanned range, read in ascending port order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct PortResult {
    ports: BTreeMap<u16, bool>,
}

impl PortResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `port` once. A second record for the same port is ignored.
    pub(crate) fn record(&mut self, port: u16, open: bool) {
        self.ports.entry(port).or_insert(open);
    }

    pub fn is_open(&self, port: u16) -> Option<bool> {
        self.ports.get(&port).copied()
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter(|(_, open)| **open)
            .map(|(port, _)| *port)
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.ports.values().filter(|open| **open).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, bool)> + '_ {
        self.ports.iter().map(|(p, o)| (*p, *o))
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// One host that answered the echo probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostResult {
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub alive: bool,
    pub response_time_ms: u64,
    /// Ascending, deduplicated.
    pub open_ports: Vec<u16>,
    pub discovered_at: String,
}

impl HostResult {
    /// `80(HTTP),8081` style summary of the quick-pass ports.
    pub fn ports_display(&self) -> String {
        self.open_ports
            .iter()
            .map(|&p| match crate::ports::service_name(p) {
                "" => p.to_string(),
                name => format!("{p}({name})"),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanProgress {
    pub scanned: u64,
    pub total: u64,
}

impl ScanProgress {
    pub fn is_done(&self) -> bool {
        self.scanned == self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.scanned as f64 * 100.0 / self.total as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortScanEvent {
    Progress(ScanProgress),
    Complete(PortResult),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostScanEvent {
    Progress(ScanProgress),
    /// A live host, sent once its hostname, quick ports and MAC are filled in.
    HostFound(HostResult),
    Complete(Vec<HostResult>),
}

/// First three octets of an IPv4 /24, e.g. `192.168.1`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubnetPrefix([u8; 3]);

impl SubnetPrefix {
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    pub fn from_ipv4(ip: Ipv4Addr) -> Self {
        let o = ip.octets();
        Self([o[0], o[1], o[2]])
    }

    pub fn host(&self, n: u8) -> Ipv4Addr {
        let [a, b, c] = self.0;
        Ipv4Addr::new(a, b, c, n)
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

impl FromStr for SubnetPrefix {
    type Err = ScanError;

    /// Accepts `a.b.c` or a full address `a.b.c.d`, whose host octet is dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 && parts.len() != 4 {
            return Err(ScanError::InputRangeInvalid(format!(
                "expected a.b.c or a.b.c.d, got {s:?}"
            )));
        }
        let mut octets = [0u8; 3];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u8>()
                .map_err(|e| ScanError::InputRangeInvalid(format!("bad octet {part:?}: {e}")))?;
        }
        if let Some(last) = parts.get(3) {
            last.parse::<u8>()
                .map_err(|e| ScanError::InputRangeInvalid(format!("bad octet {last:?}: {e}")))?;
        }
        Ok(Self(octets))
    }
}

/// A host and an inclusive port range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortTarget {
    pub host: IpAddr,
    pub start: u16,
    pub end: u16,
}

impl PortTarget {
    /// Clamps both bounds into 1..=65535 and swaps them if inverted.
    pub fn normalized(host: IpAddr, start: u16, end: u16) -> Self {
        let (start, end) = ordered(
            start.clamp(MIN_PORT, MAX_PORT),
            end.clamp(MIN_PORT, MAX_PORT),
        );
        Self { host, start, end }
    }

    pub fn len(&self) -> u64 {
        range_len(self.start as u64, self.end as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A /24 prefix and an inclusive host-number range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTarget {
    pub prefix: SubnetPrefix,
    pub start: u8,
    pub end: u8,
}

impl HostTarget {
    /// Clamps both bounds into 1..=254 and swaps them if inverted.
    pub fn normalized(prefix: SubnetPrefix, start: u8, end: u8) -> Self {
        let (start, end) = ordered(
            start.clamp(MIN_HOST, MAX_HOST),
            end.clamp(MIN_HOST, MAX_HOST),
        );
        Self { prefix, start, end }
    }

    pub fn len(&self) -> u64 {
        range_len(self.start as u64, self.end as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn ordered<T: Ord>(a: T, b: T) -> (T, T) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub(crate) fn range_len(start: u64, end: u64) -> u64 {
    if start > end {
        0
    } else {
        end - start + 1
    }
}

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::fanout::{self, ip_sort_key, AdmissionGate, SharedProgress, DEFAULT_CONCURRENCY};
use crate::lookup::{HostLookup, SystemLookup};
use crate::ports::QUICK_PORTS;
use crate::probe::{probe_echo, EchoProbe, PortProbe, SystemPing, TcpConnectProbe};
use crate::scanner::scan_port_set;
use crate::types::{range_len, HostResult, HostScanEvent, SubnetPrefix};

pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_QUICK_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostScanOptions {
    /// Per-echo timeout.
    pub timeout: Duration,
    pub max_concurrency: usize,
    /// Ports checked on each live host.
    pub quick_ports: Vec<u16>,
    pub quick_timeout: Duration,
    pub resolve_hostnames: bool,
    pub lookup_macs: bool,
}

impl Default for HostScanOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HOST_TIMEOUT,
            max_concurrency: DEFAULT_CONCURRENCY,
            quick_ports: QUICK_PORTS.to_vec(),
            quick_timeout: DEFAULT_QUICK_TIMEOUT,
            resolve_hostnames: true,
            lookup_macs: true,
        }
    }
}

/// Ping sweep `prefix.start..=prefix.end` and return live hosts in ascending IP order.
///
/// Each live host also gets a reverse lookup, a quick pass over
/// [`QUICK_PORTS`] and a neighbor-cache MAC lookup. `HostFound` fires per
/// live host as it completes; `Complete` fires once with the sorted list.
pub async fn scan_hosts(
    prefix: SubnetPrefix,
    start: u8,
    end: u8,
    timeout: Duration,
    max_concurrency: usize,
    events: Option<UnboundedSender<HostScanEvent>>,
) -> Vec<HostResult> {
    SubnetScanner::new(HostScanOptions {
        timeout,
        max_concurrency,
        ..HostScanOptions::default()
    })
    .scan(prefix, start, end, events.as_ref())
    .await
}

#[derive(Clone)]
pub struct SubnetScanner {
    echo: Arc<dyn EchoProbe>,
    ports: Arc<dyn PortProbe>,
    lookup: Arc<dyn HostLookup>,
    options: HostScanOptions,
    shared: Option<SharedProgress>,
}

impl SubnetScanner {
    pub fn new(options: HostScanOptions) -> Self {
        Self {
            echo: Arc::new(SystemPing),
            ports: Arc::new(TcpConnectProbe),
            lookup: Arc::new(SystemLookup::default()),
            options,
            shared: None,
        }
    }

    pub fn with_echo_probe(mut self, echo: impl EchoProbe) -> Self {
        self.echo = Arc::new(echo);
        self
    }

    pub fn with_port_probe(mut self, probe: impl PortProbe) -> Self {
        self.ports = Arc::new(probe);
        self
    }

    pub fn with_lookup(mut self, lookup: impl HostLookup) -> Self {
        self.lookup = Arc::new(lookup);
        self
    }

    /// Mirror progress and found-host count into `shared` while scanning.
    pub fn with_shared(mut self, shared: SharedProgress) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn options(&self) -> &HostScanOptions {
        &self.options
    }

    pub async fn scan(
        &self,
        prefix: SubnetPrefix,
        start: u8,
        end: u8,
        events: Option<&UnboundedSender<HostScanEvent>>,
    ) -> Vec<HostResult> {
        let total = range_len(start as u64, end as u64);
        let gate = AdmissionGate::new(self.options.max_concurrency);
        let quick_ports: Arc<[u16]> = self.options.quick_ports.clone().into();
        if let Some(shared) = &self.shared {
            shared.begin(total);
        }
        info!(%prefix, start, end, total, concurrency = gate.limit(), "host scan started");
        let began = Instant::now();

        let mut hosts: Vec<HostResult> = Vec::new();
        fanout::fan_out(
            start..=end,
            &gate,
            |n, gate| {
                let unit = HostUnit {
                    ip: prefix.host(n),
                    echo: Arc::clone(&self.echo),
                    ports: Arc::clone(&self.ports),
                    lookup: Arc::clone(&self.lookup),
                    quick_ports: Arc::clone(&quick_ports),
                    timeout: self.options.timeout,
                    quick_timeout: self.options.quick_timeout,
                    resolve_hostnames: self.options.resolve_hostnames,
                    lookup_macs: self.options.lookup_macs,
                };
                unit.run(gate)
            },
            |out, progress| {
                let found = out.flatten();
                if let Some(shared) = &self.shared {
                    shared.advance(progress, found.is_some());
                }
                if let Some(host) = found {
                    fanout::emit(events, HostScanEvent::HostFound(host.clone()));
                    hosts.push(host);
                }
                fanout::emit(events, HostScanEvent::Progress(progress));
            },
        )
        .await;

        sort_hosts(&mut hosts);
        info!(
            %prefix,
            alive = hosts.len(),
            elapsed_ms = began.elapsed().as_millis() as u64,
            "host scan finished"
        );
        fanout::emit(events, HostScanEvent::Complete(hosts.clone()));
        hosts
    }
}

/// Ascending by numeric address, one record per address.
pub fn sort_hosts(hosts: &mut Vec<HostResult>) {
    hosts.sort_by_key(|h| ip_sort_key(h.ip));
    hosts.dedup_by_key(|h| h.ip);
}

struct HostUnit {
    ip: Ipv4Addr,
    echo: Arc<dyn EchoProbe>,
    ports: Arc<dyn PortProbe>,
    lookup: Arc<dyn HostLookup>,
    quick_ports: Arc<[u16]>,
    timeout: Duration,
    quick_timeout: Duration,
    resolve_hostnames: bool,
    lookup_macs: bool,
}

impl HostUnit {
    async fn run(self, gate: AdmissionGate) -> Option<HostResult> {
        let ip = self.ip;
        // The gate covers the network probes; the blocking MAC lookup runs after release.
        let (rtt, hostname, open_ports) = {
            let _permit = gate.enter().await?;
            let rtt = probe_echo(self.echo.as_ref(), IpAddr::V4(ip), self.timeout).await?;
            debug!(%ip, rtt_ms = rtt.as_millis() as u64, "host alive");
            let (hostname, open_ports) = tokio::join!(
                self.hostname(),
                scan_port_set(&self.ports, IpAddr::V4(ip), &self.quick_ports, self.quick_timeout),
            );
            (rtt, hostname, open_ports)
        };
        let mac = self.mac_address().await;

        Some(HostResult {
            ip,
            hostname,
            mac,
            alive: true,
            response_time_ms: rtt.as_millis() as u64,
            open_ports,
            discovered_at: now_rfc3339(),
        })
    }

    async fn hostname(&self) -> Option<String> {
        if !self.resolve_hostnames {
            return None;
        }
        self.lookup
            .hostname(self.ip)
            .await
            .map_err(|e| debug!(error = %e, "hostname unavailable"))
            .ok()
    }

    async fn mac_address(&self) -> Option<String> {
        if !self.lookup_macs {
            return None;
        }
        let lookup = Arc::clone(&self.lookup);
        let ip = self.ip;
        match tokio::task::spawn_blocking(move || lookup.mac_address(ip)).await {
            Ok(Ok(mac)) => Some(mac),
            Ok(Err(e)) => {
                debug!(error = %e, "mac unavailable");
                None
            }
            Err(e) => {
                debug!(%ip, error = %e, "mac lookup task failed");
                None
            }
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(last: u8) -> HostResult {
        HostResult {
            ip: Ipv4Addr::new(10, 0, 0, last),
            hostname: None,
            mac: None,
            alive: true,
            response_time_ms: 1,
            open_ports: Vec::new(),
            discovered_at: now_rfc3339(),
        }
    }

    #[test]
    fn sort_orders_numerically_not_lexically() {
        let mut hosts = vec![host(100), host(9), host(20), host(9), host(1)];
        sort_hosts(&mut hosts);
        let order: Vec<u8> = hosts.iter().map(|h| h.ip.octets()[3]).collect();
        assert_eq!(order, vec![1, 9, 20, 100]);
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let ts = now_rfc3339();
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn defaults_match_documented_values() {
        let o = HostScanOptions::default();
        assert_eq!(o.timeout, Duration::from_millis(1000));
        assert_eq!(o.max_concurrency, 50);
        assert_eq!(o.quick_timeout, Duration::from_millis(200));
        assert_eq!(o.quick_ports, QUICK_PORTS);
    }
}

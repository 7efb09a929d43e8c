use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::info;

use crate::fanout::{self, AdmissionGate, SharedProgress, DEFAULT_CONCURRENCY};
use crate::probe::{probe_port, PortProbe, TcpConnectProbe};
use crate::types::{range_len, PortResult, PortScanEvent};

pub const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortScanOptions {
    /// Per-connect timeout.
    pub timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for PortScanOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PORT_TIMEOUT,
            max_concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Scan one host over an inclusive port range with TCP connects.
///
/// - Limits concurrent connects with an [`AdmissionGate`].
/// - Bounds every connect with `tokio::time::timeout`; errors and timeouts read as closed.
/// - Emits a `Progress` event per finished port and one `Complete` after all ports finish.
pub async fn scan_ports(
    host: IpAddr,
    start: u16,
    end: u16,
    timeout: Duration,
    max_concurrency: usize,
    events: Option<UnboundedSender<PortScanEvent>>,
) -> PortResult {
    PortScanner::new(PortScanOptions {
        timeout,
        max_concurrency,
    })
    .scan(host, start, end, events.as_ref())
    .await
}

#[derive(Clone)]
pub struct PortScanner {
    probe: Arc<dyn PortProbe>,
    options: PortScanOptions,
    shared: Option<SharedProgress>,
}

impl PortScanner {
    pub fn new(options: PortScanOptions) -> Self {
        Self {
            probe: Arc::new(TcpConnectProbe),
            options,
            shared: None,
        }
    }

    pub fn with_probe(mut self, probe: impl PortProbe) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Mirror progress into `shared` while scanning.
    pub fn with_shared(mut self, shared: SharedProgress) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn options(&self) -> &PortScanOptions {
        &self.options
    }

    pub async fn scan(
        &self,
        host: IpAddr,
        start: u16,
        end: u16,
        events: Option<&UnboundedSender<PortScanEvent>>,
    ) -> PortResult {
        let total = range_len(start as u64, end as u64);
        let timeout = self.options.timeout;
        let gate = AdmissionGate::new(self.options.max_concurrency);
        if let Some(shared) = &self.shared {
            shared.begin(total);
        }
        info!(%host, start, end, total, concurrency = gate.limit(), timeout_ms = timeout.as_millis() as u64, "port scan started");
        let began = Instant::now();

        let mut result = PortResult::new();
        fanout::fan_out(
            start..=end,
            &gate,
            |port, gate| {
                let probe = Arc::clone(&self.probe);
                async move {
                    let Some(_permit) = gate.enter().await else {
                        return (port, false);
                    };
                    let open = probe_port(probe.as_ref(), SocketAddr::new(host, port), timeout).await;
                    (port, open)
                }
            },
            |out, progress| {
                let mut opened = false;
                if let Some((port, open)) = out {
                    result.record(port, open);
                    opened = open;
                }
                if let Some(shared) = &self.shared {
                    shared.advance(progress, opened);
                }
                fanout::emit(events, PortScanEvent::Progress(progress));
            },
        )
        .await;

        // Units that never reported count as closed.
        for port in start..=end {
            result.record(port, false);
        }

        info!(
            %host,
            open = result.open_count(),
            elapsed_ms = began.elapsed().as_millis() as u64,
            "port scan finished"
        );
        fanout::emit(events, PortScanEvent::Complete(result.clone()));
        result
    }
}

/// Check a fixed set of ports under its own gate. Returns open ports ascending, deduplicated.
pub(crate) async fn scan_port_set(
    probe: &Arc<dyn PortProbe>,
    host: IpAddr,
    ports: &[u16],
    timeout: Duration,
) -> Vec<u16> {
    let mut ports = ports.to_vec();
    ports.sort_unstable();
    ports.dedup();
    let gate = AdmissionGate::new(ports.len());

    let mut open = Vec::new();
    fanout::fan_out(
        ports,
        &gate,
        |port, gate| {
            let probe = Arc::clone(probe);
            async move {
                let _permit = gate.enter().await?;
                probe_port(probe.as_ref(), SocketAddr::new(host, port), timeout)
                    .await
                    .then_some(port)
            }
        },
        |out, _| open.extend(out.flatten()),
    )
    .await;
    open.sort_unstable();
    open
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OpenSet(Vec<u16>);

    #[async_trait]
    impl PortProbe for OpenSet {
        async fn connect(&self, addr: SocketAddr) -> std::io::Result<()> {
            if self.0.contains(&addr.port()) {
                Ok(())
            } else {
                Err(std::io::ErrorKind::ConnectionRefused.into())
            }
        }
    }

    #[tokio::test]
    async fn every_port_in_range_has_an_entry() {
        let scanner = PortScanner::new(PortScanOptions::default()).with_probe(OpenSet(vec![3, 9]));
        let result = scanner.scan(IpAddr::V4(Ipv4Addr::LOCALHOST), 1, 10, None).await;
        assert_eq!(result.len(), 10);
        assert_eq!(result.open_ports(), vec![3, 9]);
        assert_eq!(result.is_open(4), Some(false));
    }

    #[tokio::test]
    async fn inverted_range_is_empty() {
        let scanner = PortScanner::new(PortScanOptions::default()).with_probe(OpenSet(vec![]));
        let result = scanner.scan(IpAddr::V4(Ipv4Addr::LOCALHOST), 10, 1, None).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn port_set_is_sorted_and_deduplicated() {
        let probe: Arc<dyn PortProbe> = Arc::new(OpenSet(vec![443, 22, 80]));
        let open = scan_port_set(
            &probe,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            &[443, 80, 22, 80, 3389],
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(open, vec![22, 80, 443]);
    }

    struct SlowOpen {
        delay: Duration,
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PortProbe for SlowOpen {
        async fn connect(&self, _addr: SocketAddr) -> std::io::Result<()> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn port_set_checks_ports_side_by_side() {
        let peak = Arc::new(AtomicUsize::new(0));
        let probe: Arc<dyn PortProbe> = Arc::new(SlowOpen {
            delay: Duration::from_millis(50),
            current: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        });
        let started = std::time::Instant::now();
        let open = scan_port_set(
            &probe,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            crate::ports::QUICK_PORTS,
            Duration::from_millis(500),
        )
        .await;
        let elapsed = started.elapsed();

        assert_eq!(open.len(), crate::ports::QUICK_PORTS.len());
        // Eight sequential connects would take 400ms.
        assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn shared_progress_tracks_scan() {
        let shared = SharedProgress::new();
        let scanner = PortScanner::new(PortScanOptions::default())
            .with_probe(OpenSet(vec![5]))
            .with_shared(shared.clone());
        scanner.scan(IpAddr::V4(Ipv4Addr::LOCALHOST), 1, 8, None).await;
        let (progress, found) = shared.snapshot();
        assert_eq!((progress.scanned, progress.total, found), (8, 8, 1));
    }
}

//! Single-target reachability checks.
//!
//! Scanners talk to probes through [`PortProbe`] and [`EchoProbe`] so tests
//! can substitute in-memory fakes. The timeout race lives here, not in the
//! implementations: [`probe_port`] and [`probe_echo`] drop the losing
//! operation, so a late completion can never surface.
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::{ScanError, ScanResult};

#[async_trait]
pub trait PortProbe: Send + Sync + 'static {
    /// One connection attempt. `Ok` means the port accepted.
    async fn connect(&self, addr: SocketAddr) -> std::io::Result<()>;
}

#[async_trait]
pub trait EchoProbe: Send + Sync + 'static {
    /// One echo request. Returns the roundtrip on reply.
    async fn echo(&self, ip: IpAddr, timeout: Duration) -> ScanResult<Duration>;
}

/// Plain TCP connect; the stream is dropped immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProbe;

#[async_trait]
impl PortProbe for TcpConnectProbe {
    async fn connect(&self, addr: SocketAddr) -> std::io::Result<()> {
        TcpStream::connect(addr).await.map(drop)
    }
}

/// Race a connect against `timeout`. Any error or timeout reads as closed.
pub async fn probe_port(probe: &dyn PortProbe, addr: SocketAddr, timeout: Duration) -> bool {
    let start = Instant::now();
    let outcome = match time::timeout(timeout, probe.connect(addr)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ScanError::unreachable(addr, e)),
        Err(_) => Err(ScanError::timeout(addr, start.elapsed())),
    };
    match outcome {
        Ok(()) => {
            debug!(%addr, latency_ms = start.elapsed().as_millis() as u64, "port open");
            true
        }
        Err(e) => {
            trace!(%addr, error = %e, "port closed");
            false
        }
    }
}

/// Race an echo against `timeout`. Returns the roundtrip for a live host.
pub async fn probe_echo(probe: &dyn EchoProbe, ip: IpAddr, timeout: Duration) -> Option<Duration> {
    let start = Instant::now();
    match time::timeout(timeout, probe.echo(ip, timeout)).await {
        Ok(Ok(rtt)) => Some(rtt),
        Ok(Err(e)) => {
            trace!(%ip, error = %e, "no echo reply");
            None
        }
        Err(_) => {
            trace!(error = %ScanError::timeout(ip, start.elapsed()), "no echo reply");
            None
        }
    }
}

/// ICMP echo through the system `ping` binary, so no raw-socket privileges are needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPing;

#[async_trait]
impl EchoProbe for SystemPing {
    async fn echo(&self, ip: IpAddr, timeout: Duration) -> ScanResult<Duration> {
        let start = Instant::now();
        let output = ping_command(ip, timeout)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScanError::unreachable(ip, e))?;
        if !output.status.success() {
            return Err(ScanError::unreachable(
                ip,
                std::io::Error::other(format!("ping exited with {}", output.status)),
            ));
        }
        // Windows exits 0 for "Destination host unreachable" relayed by a gateway.
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_rtt(&stdout).ok_or_else(|| {
            ScanError::unreachable(
                ip,
                std::io::Error::other(format!("no echo reply after {:?}", start.elapsed())),
            )
        })
    }
}

fn ping_command(ip: IpAddr, timeout: Duration) -> Command {
    let ms = timeout.as_millis().max(1);
    let mut cmd = Command::new("ping");
    if cfg!(target_os = "windows") {
        cmd.args(["-n", "1", "-w", &ms.to_string()]);
    } else if cfg!(target_os = "macos") {
        // macOS takes -W in milliseconds.
        cmd.args(["-c", "1", "-W", &ms.to_string()]);
    } else {
        // Linux takes whole seconds.
        let secs = ms.div_ceil(1000).max(1);
        cmd.args(["-c", "1", "-W", &secs.to_string()]);
    }
    cmd.arg(ip.to_string());
    cmd
}

/// Pull the roundtrip out of an echo reply line (`time=0.045 ms`, `time<1ms`).
/// Only lines carrying a TTL count as replies.
pub fn parse_ping_rtt(output: &str) -> Option<Duration> {
    let line = output.lines().find(|l| {
        (l.contains("time=") || l.contains("time<")) && l.to_ascii_lowercase().contains("ttl=")
    })?;
    let idx = line.find("time=").map(|i| i + 5).or_else(|| line.find("time<").map(|i| i + 5))?;
    let value: String = line[idx..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let ms: f64 = value.parse().ok()?;
    Some(Duration::from_micros((ms * 1000.0) as u64))
}

//! Best-effort hostname and MAC lookups for hosts that answered a ping.
//!
//! Both shell out to OS tools and scrape their text output. Failures are
//! reported as [`ScanError::LookupFailure`] and the scanner turns them into
//! empty fields.
use std::net::Ipv4Addr;
use std::process::{Command as StdCommand, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::time;

use crate::error::{ScanError, ScanResult};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait HostLookup: Send + Sync + 'static {
    /// Reverse DNS name for `ip`.
    async fn hostname(&self, ip: Ipv4Addr) -> ScanResult<String>;

    /// MAC from the neighbor cache, in uppercase colon form.
    ///
    /// Blocking: callers run it on the blocking pool.
    fn mac_address(&self, ip: Ipv4Addr) -> ScanResult<String>;
}

/// `nslookup` for names and `arp` for the neighbor cache.
#[derive(Debug, Clone)]
pub struct SystemLookup {
    pub timeout: Duration,
}

impl Default for SystemLookup {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

#[async_trait]
impl HostLookup for SystemLookup {
    async fn hostname(&self, ip: Ipv4Addr) -> ScanResult<String> {
        let run = Command::new("nslookup")
            .arg(ip.to_string())
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = time::timeout(self.timeout, run)
            .await
            .map_err(|_| ScanError::lookup("hostname", ip, "nslookup timed out"))?
            .map_err(|e| ScanError::lookup("hostname", ip, e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_nslookup_name(&stdout, ip)
            .ok_or_else(|| ScanError::lookup("hostname", ip, "no PTR record"))
    }

    fn mac_address(&self, ip: Ipv4Addr) -> ScanResult<String> {
        let flag = if cfg!(target_os = "windows") { "-a" } else { "-n" };
        let arp = neighbor_table("arp", &[flag, &ip.to_string()]);
        if let Ok(Some(mac)) = arp.as_deref().map(|out| find_mac(out, ip)) {
            return Ok(mac);
        }
        // iproute2-only systems ship without net-tools' `arp`.
        if cfg!(target_os = "linux") {
            if let Ok(out) = neighbor_table("ip", &["neigh", "show", &ip.to_string()]) {
                if let Some(mac) = find_mac(&out, ip) {
                    return Ok(mac);
                }
            }
        }
        match arp {
            Ok(_) => Err(ScanError::lookup("mac", ip, "no neighbor entry")),
            Err(e) => Err(ScanError::lookup("mac", ip, e.to_string())),
        }
    }
}

fn neighbor_table(program: &str, args: &[&str]) -> std::io::Result<String> {
    let output = StdCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Name from an `nslookup` reverse answer.
///
/// Unix tools answer `... name = host.lan.`; Windows prints the resolver
/// block first, then a blank line and `Name:    host.lan`.
pub fn parse_nslookup_name(output: &str, ip: Ipv4Addr) -> Option<String> {
    let ip = ip.to_string();
    let accept = |name: &str| {
        let name = name.trim().trim_end_matches('.');
        (!name.is_empty() && name != ip).then(|| name.to_string())
    };
    let ptr = output.lines().find_map(|line| {
        let (_, rest) = line.split_once("name =")?;
        accept(rest)
    });
    if ptr.is_some() {
        return ptr;
    }
    output
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.is_empty())
        .find_map(|line| line.strip_prefix("Name:").and_then(accept))
}

fn mac_pattern() -> &'static Regex {
    static MAC_RE: OnceLock<Regex> = OnceLock::new();
    MAC_RE.get_or_init(|| {
        Regex::new(r"(?i)\b[0-9a-f]{1,2}(?:[:-][0-9a-f]{1,2}){5}\b").expect("MAC pattern compiles")
    })
}

/// First MAC on a line of `arp` output that mentions `ip`.
pub fn find_mac(output: &str, ip: Ipv4Addr) -> Option<String> {
    let ip = ip.to_string();
    output
        .lines()
        .filter(|line| mentions_ip(line, &ip))
        .find_map(|line| mac_pattern().find(line))
        .map(|m| normalize_mac(m.as_str()))
}

/// `a-b-c-d-e-f` or `a:b:...` to zero-padded uppercase colon form.
pub fn normalize_mac(raw: &str) -> String {
    raw.split([':', '-'])
        .map(|octet| format!("{:0>2}", octet.to_ascii_uppercase()))
        .collect::<Vec<_>>()
        .join(":")
}

// `10.0.0.1` must not match inside `10.0.0.12`.
fn mentions_ip(line: &str, ip: &str) -> bool {
    line.match_indices(ip).any(|(i, _)| {
        let before = line[..i].chars().next_back();
        let after = line[i + ip.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_digit() || c == '.')
            && !after.is_some_and(|c| c.is_ascii_digit() || c == '.')
    })
}

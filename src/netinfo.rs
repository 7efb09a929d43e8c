//! Wi-Fi and DHCP details scraped from platform tools. Display only; the
//! scanners never consult any of this.
use std::fmt;
use std::process::{Command, Stdio};

use serde::Serialize;
use tracing::debug;

const AIRPORT: &str =
    "/System/Library/PrivateFrameworks/Apple80211.framework/Versions/Current/Resources/airport";
const LINUX_WIFI_IFACES: &[&str] = &["wlan0", "wlan1", "wlp0s20f3", "wlp2s0"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiNetwork {
    pub ssid: String,
    /// Percent on Linux, RSSI in dBm on macOS.
    pub signal: i32,
    pub channel: String,
    pub security: String,
}

impl WifiNetwork {
    /// Signal normalised to an RSSI-like scale for [`signal_bar`].
    pub fn rssi(&self) -> i32 {
        if self.signal >= 0 {
            self.signal - 100
        } else {
            self.signal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DhcpInfo {
    Leased { server: String, lease: String },
    Static,
    Unknown,
}

impl fmt::Display for DhcpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DhcpInfo::Leased { server, lease } => write!(f, "Server: {server} | Lease: {lease}"),
            DhcpInfo::Static => f.write_str("Static IP"),
            DhcpInfo::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Four-cell bar for an RSSI in dBm.
pub fn signal_bar(rssi: i32) -> String {
    let bars = match rssi {
        r if r >= -50 => 4,
        r if r >= -60 => 3,
        r if r >= -70 => 2,
        r if r >= -80 => 1,
        _ => 0,
    };
    format!("{}{}", "█".repeat(bars), "░".repeat(4 - bars))
}

/// Currently associated networks, e.g. `home (72%, CH 36)`.
pub fn current_wifi() -> Vec<String> {
    if cfg!(target_os = "macos") {
        run("system_profiler", &["SPAirPortDataType"])
            .map(|out| parse_system_profiler_current(&out))
            .unwrap_or_default()
    } else if cfg!(target_os = "linux") {
        match run("nmcli", &["-t", "-f", "active,ssid,signal,chan", "d", "wifi"]) {
            Some(out) => parse_nmcli_active(&out),
            None => LINUX_WIFI_IFACES
                .iter()
                .filter_map(|iface| {
                    let ssid = run("iwgetid", &[*iface, "-r"])?;
                    let ssid = ssid.trim();
                    (!ssid.is_empty()).then(|| format!("{ssid} ({iface})"))
                })
                .collect(),
        }
    } else {
        Vec::new()
    }
}

/// Networks in range.
pub fn scan_wifi() -> Vec<WifiNetwork> {
    if cfg!(target_os = "macos") {
        run(AIRPORT, &["-s"])
            .map(|out| parse_airport_scan(&out))
            .unwrap_or_default()
    } else if cfg!(target_os = "linux") {
        run("nmcli", &["-t", "-f", "SSID,SIGNAL,CHAN,SECURITY", "d", "wifi", "list"])
            .map(|out| parse_nmcli_list(&out))
            .unwrap_or_default()
    } else {
        Vec::new()
    }
}

pub fn dhcp_info(iface: &str) -> DhcpInfo {
    if cfg!(target_os = "macos") {
        match run("ipconfig", &["getpacket", iface]) {
            Some(out) => parse_dhcp_getpacket(&out),
            None => DhcpInfo::Static,
        }
    } else if cfg!(target_os = "linux") {
        let fields = "IP4.ADDRESS,IP4.GATEWAY,DHCP4.OPTION";
        match run("nmcli", &["-t", "-f", fields, "device", "show", iface]) {
            Some(out) => parse_dhcp_nmcli(&out),
            None => DhcpInfo::Unknown,
        }
    } else {
        DhcpInfo::Unknown
    }
}

/// Stdout of a successful command, `None` on spawn failure or non-zero exit.
fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| debug!(program, error = %e, "command unavailable"))
        .ok()?;
    if !output.status.success() {
        debug!(program, status = %output.status, "command failed");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Split an `nmcli -t` line on unescaped `:`; `\:` inside a field is a literal colon.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let (Some(next), Some(field)) = (chars.next(), fields.last_mut()) {
                    field.push(next);
                }
            }
            ':' => fields.push(String::new()),
            c => {
                if let Some(field) = fields.last_mut() {
                    field.push(c);
                }
            }
        }
    }
    fields
}

pub fn parse_nmcli_active(output: &str) -> Vec<String> {
    output
        .lines()
        .map(split_terse)
        .filter(|f| f.len() >= 4 && f[0] == "yes")
        .map(|f| format!("{} ({}%, CH {})", f[1], f[2], f[3]))
        .collect()
}

pub fn parse_nmcli_list(output: &str) -> Vec<WifiNetwork> {
    output
        .lines()
        .map(split_terse)
        .filter(|f| f.len() >= 4)
        .map(|f| WifiNetwork {
            ssid: if f[0].is_empty() { "(Hidden)".into() } else { f[0].clone() },
            signal: f[1].trim().parse().unwrap_or(0),
            channel: f[2].trim().to_string(),
            security: f[3].trim().to_string(),
        })
        .collect()
}

/// `airport -s` table: SSID BSSID RSSI CHANNEL HT CC SECURITY.
pub fn parse_airport_scan(output: &str) -> Vec<WifiNetwork> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 7 {
                return None;
            }
            // SSIDs may contain spaces; anchor on the BSSID column.
            let bssid = parts.iter().position(|p| p.matches(':').count() == 5)?;
            if bssid == 0 || parts.len() < bssid + 6 {
                return None;
            }
            Some(WifiNetwork {
                ssid: parts[..bssid].join(" "),
                signal: parts[bssid + 1].parse().unwrap_or(-100),
                channel: parts[bssid + 2].to_string(),
                security: parts[bssid + 5..].join(" "),
            })
        })
        .collect()
}

/// Current network block of `system_profiler SPAirPortDataType`.
pub fn parse_system_profiler_current(output: &str) -> Vec<String> {
    let lines: Vec<&str> = output.lines().map(str::trim).collect();
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with("Current Network Information:") {
            continue;
        }
        let Some(ssid) = lines.get(i + 1).and_then(|l| l.strip_suffix(':')) else {
            continue;
        };
        let mut phy_mode = "";
        let mut channel = "";
        for detail in lines.iter().skip(i + 2).take(8) {
            if let Some(v) = detail.strip_prefix("PHY Mode:") {
                phy_mode = v.trim();
            } else if let Some(v) = detail.strip_prefix("Channel:") {
                channel = v.trim();
            } else if detail.ends_with(':') {
                break;
            }
        }
        if !ssid.is_empty() {
            out.push(format!("{ssid} ({phy_mode}, {channel})"));
        }
    }
    out
}

/// macOS `ipconfig getpacket <iface>`.
pub fn parse_dhcp_getpacket(output: &str) -> DhcpInfo {
    if output.trim().is_empty() || output.contains("no DHCP") {
        return DhcpInfo::Static;
    }
    let mut server = String::new();
    let mut lease = String::new();
    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("server_identifier") {
            server = after_colon(rest);
        } else if let Some(rest) = line.strip_prefix("lease_time") {
            let hex = after_colon(rest);
            if let Some(secs) = hex
                .strip_prefix("0x")
                .and_then(|h| u64::from_str_radix(h, 16).ok())
            {
                lease = format_lease(secs);
            }
        }
    }
    if server.is_empty() {
        DhcpInfo::Static
    } else {
        DhcpInfo::Leased { server, lease }
    }
}

/// Linux `nmcli -t -f ...,DHCP4.OPTION device show <iface>`.
pub fn parse_dhcp_nmcli(output: &str) -> DhcpInfo {
    let mut server = String::new();
    let mut lease = String::new();
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if key.contains("dhcp_server_identifier") {
            server = value.to_string();
        } else if key.contains("dhcp_lease_time") {
            lease = value.parse().map(format_lease).unwrap_or_else(|_| value.to_string());
        } else if key.contains("expiry") && lease.is_empty() {
            lease = value.to_string();
        }
    }
    if server.is_empty() {
        DhcpInfo::Unknown
    } else {
        DhcpInfo::Leased { server, lease }
    }
}

fn after_colon(s: &str) -> String {
    s.split_once(':')
        .map(|(_, v)| v.trim().to_string())
        .unwrap_or_default()
}

fn format_lease(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h{mins}m")
    } else {
        format!("{mins}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_bars() {
        assert_eq!(signal_bar(-45), "████");
        assert_eq!(signal_bar(-65), "██░░");
        assert_eq!(signal_bar(-90), "░░░░");
    }

    #[test]
    fn nmcli_active_and_list() {
        let active = "no:neighbor:40:11\nyes:home:72:36\n";
        assert_eq!(parse_nmcli_active(active), vec!["home (72%, CH 36)"]);

        let list = "home:72:36:WPA2\n:30:1:\ncafe\\:guest:55:6:WPA1 WPA2\n";
        let nets = parse_nmcli_list(list);
        assert_eq!(nets.len(), 3);
        assert_eq!(nets[1].ssid, "(Hidden)");
        assert_eq!(nets[2].ssid, "cafe:guest");
        assert_eq!(nets[2].security, "WPA1 WPA2");
        assert_eq!(nets[0].rssi(), -28);
    }

    #[test]
    fn airport_table_with_spaces_in_ssid() {
        let out = "\
                            SSID BSSID             RSSI CHANNEL HT CC SECURITY (auth/unicast/group)
                     Home Net 5G aa:bb:cc:dd:ee:ff -48  149     Y  US WPA2(PSK/AES/AES)
                          office 11:22:33:44:55:66 -71  6       Y  -- WPA2(PSK/AES/AES) WPA3(SAE/AES/AES)
";
        let nets = parse_airport_scan(out);
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].ssid, "Home Net 5G");
        assert_eq!(nets[0].signal, -48);
        assert_eq!(nets[0].channel, "149");
        assert_eq!(nets[1].security, "WPA2(PSK/AES/AES) WPA3(SAE/AES/AES)");
    }

    #[test]
    fn system_profiler_current_network() {
        let out = "\
      Status: Connected
      Current Network Information:
        home:
          PHY Mode: 802.11ac
          Network Type: Infrastructure
          Channel: 36 (5GHz, 80MHz)
          Security: WPA2 Personal
      Other Local Wi-Fi Networks:
";
        assert_eq!(
            parse_system_profiler_current(out),
            vec!["home (802.11ac, 36 (5GHz, 80MHz))"]
        );
    }

    #[test]
    fn dhcp_from_getpacket() {
        let out = "op = BOOTREPLY\nlease_time (uint32): 0x15180\nserver_identifier (ip): 192.168.1.1\n";
        assert_eq!(
            parse_dhcp_getpacket(out),
            DhcpInfo::Leased { server: "192.168.1.1".into(), lease: "24h0m".into() }
        );
        assert_eq!(parse_dhcp_getpacket(""), DhcpInfo::Static);
    }

    #[test]
    fn dhcp_from_nmcli() {
        let out = "\
IP4.ADDRESS[1]:192.168.1.42/24
DHCP4.OPTION[4]:dhcp_lease_time = 3600
DHCP4.OPTION[5]:dhcp_server_identifier = 192.168.1.1
DHCP4.OPTION[6]:expiry = 1700000000
";
        let info = parse_dhcp_nmcli(out);
        assert_eq!(info.to_string(), "Server: 192.168.1.1 | Lease: 1h0m");
        assert_eq!(parse_dhcp_nmcli("IP4.ADDRESS[1]:10.0.0.2/8\n"), DhcpInfo::Unknown);
    }
}

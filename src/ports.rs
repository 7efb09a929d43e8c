use crate::error::{ScanError, ScanResult};
use crate::types::{MAX_HOST, MAX_PORT, MIN_HOST, MIN_PORT};

/// Ports checked on every live host during a subnet sweep:
/// FTP, SSH, Telnet, HTTP, HTTPS, SMB, RDP, HTTP-Alt.
pub const QUICK_PORTS: &[u16] = &[21, 22, 23, 80, 443, 445, 3389, 8080];

/// Display name for well-known TCP ports. Unknown ports map to `""`.
pub fn service_name(port: u16) -> &'static str {
    match port {
        20 => "FTP-DATA",
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        25 => "SMTP",
        53 => "DNS",
        80 => "HTTP",
        110 => "POP3",
        143 => "IMAP",
        443 => "HTTPS",
        445 => "SMB",
        993 => "IMAPS",
        995 => "POP3S",
        1433 => "MSSQL",
        3306 => "MySQL",
        3389 => "RDP",
        5432 => "PostgreSQL",
        6379 => "Redis",
        8080 => "HTTP-Alt",
        8443 => "HTTPS-Alt",
        27017 => "MongoDB",
        _ => "",
    }
}

/// Parse an inclusive port range such as `1-1024`, or a single port `443`.
///
/// Bounds must lie in 1..=65535 and `start <= end`.
pub fn parse_port_range(s: &str) -> ScanResult<(u16, u16)> {
    let (start, end) = parse_bounds(s, MIN_PORT as u32, MAX_PORT as u32)?;
    Ok((start as u16, end as u16))
}

/// Parse an inclusive host-number range such as `1-254`, or a single host `10`.
///
/// Bounds must lie in 1..=254 and `start <= end`.
pub fn parse_host_range(s: &str) -> ScanResult<(u8, u8)> {
    let (start, end) = parse_bounds(s, MIN_HOST as u32, MAX_HOST as u32)?;
    Ok((start as u8, end as u8))
}

fn parse_bounds(s: &str, min: u32, max: u32) -> ScanResult<(u32, u32)> {
    let line = s.trim();
    let (a, b) = line.split_once('-').unwrap_or((line, line));
    let start = parse_bound(a.trim(), min, max)?;
    let end = parse_bound(b.trim(), min, max)?;
    if start > end {
        return Err(ScanError::InputRangeInvalid(format!(
            "{start}-{end} (start > end)"
        )));
    }
    Ok((start, end))
}

fn parse_bound(s: &str, min: u32, max: u32) -> ScanResult<u32> {
    let val: u32 = s
        .parse()
        .map_err(|e| ScanError::InputRangeInvalid(format!("{s:?}: {e}")))?;
    if val < min || val > max {
        return Err(ScanError::InputRangeInvalid(format!(
            "{val} outside {min}..={max}"
        )));
    }
    Ok(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ranges_and_single_values() {
        assert_eq!(parse_port_range("1-1024").unwrap(), (1, 1024));
        assert_eq!(parse_port_range(" 8000 - 8010 ").unwrap(), (8000, 8010));
        assert_eq!(parse_port_range("443").unwrap(), (443, 443));
        assert_eq!(parse_host_range("1-254").unwrap(), (1, 254));
        assert_eq!(parse_host_range("10").unwrap(), (10, 10));
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_port_range("70000").is_err());
        assert!(parse_port_range("0-10").is_err());
        assert!(parse_port_range("100-1").is_err());
        assert!(parse_port_range("http").is_err());
        assert!(parse_host_range("0-254").is_err());
        assert!(parse_host_range("1-255").is_err());
    }

    #[test]
    fn service_table_is_display_only() {
        assert_eq!(service_name(22), "SSH");
        assert_eq!(service_name(8080), "HTTP-Alt");
        assert_eq!(service_name(12345), "");
        assert!(QUICK_PORTS.iter().all(|&p| !service_name(p).is_empty()));
    }
}

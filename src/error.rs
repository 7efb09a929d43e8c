use std::time::Duration;

use thiserror::Error;

/// Failures observed while probing or looking up a single target.
///
/// None of these ever leave the engine as errors: scanners convert them into
/// closed ports, absent hosts, or empty hostname/MAC fields at the probe
/// boundary. Only [`ScanError::InputRangeInvalid`] reaches callers, and only
/// from the range parsers they run before starting a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("probe to {target} timed out after {elapsed:?}")]
    ProbeTimeout { target: String, elapsed: Duration },

    #[error("{target} unreachable: {source}")]
    ProbeUnreachable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} lookup failed for {target}: {reason}")]
    LookupFailure {
        what: &'static str,
        target: String,
        reason: String,
    },

    #[error("invalid range: {0}")]
    InputRangeInvalid(String),
}

impl ScanError {
    pub fn timeout(target: impl ToString, elapsed: Duration) -> Self {
        ScanError::ProbeTimeout {
            target: target.to_string(),
            elapsed,
        }
    }

    pub fn unreachable(target: impl ToString, source: std::io::Error) -> Self {
        ScanError::ProbeUnreachable {
            target: target.to_string(),
            source,
        }
    }

    pub fn lookup(what: &'static str, target: impl ToString, reason: impl Into<String>) -> Self {
        ScanError::LookupFailure {
            what,
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Timeout and unreachable are the expected negative outcomes of a probe.
    pub fn is_probe_negative(&self) -> bool {
        matches!(
            self,
            ScanError::ProbeTimeout { .. } | ScanError::ProbeUnreachable { .. }
        )
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    #[test]
    fn probe_negative_classification() {
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        assert!(ScanError::timeout(addr, Duration::from_millis(5)).is_probe_negative());
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(ScanError::unreachable(addr, refused).is_probe_negative());
        assert!(!ScanError::lookup("mac", "10.0.0.1", "no entry").is_probe_negative());
        assert!(!ScanError::InputRangeInvalid("9-1".into()).is_probe_negative());
    }

    #[test]
    fn messages_name_the_target() {
        let e = ScanError::lookup("hostname", "10.0.0.7", "nslookup exited 1");
        assert_eq!(
            e.to_string(),
            "hostname lookup failed for 10.0.0.7: nslookup exited 1"
        );
        let echo = ScanError::timeout(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), Duration::from_millis(30));
        assert_eq!(echo.to_string(), "probe to 10.0.0.7 timed out after 30ms");
    }
}

//! Library crate for lan-probe exposing the scan engine and its collaborators.
pub mod error;
pub mod fanout;
pub mod logging;
pub mod lookup;
pub mod netdetect;
pub mod netinfo;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod subnet;
pub mod types;

pub use error::{ScanError, ScanResult};
pub use fanout::{AdmissionGate, SharedProgress};
pub use scanner::{scan_ports, PortScanOptions, PortScanner};
pub use subnet::{scan_hosts, HostScanOptions, SubnetScanner};
pub use types::{HostResult, HostScanEvent, PortResult, PortScanEvent, ScanProgress, SubnetPrefix};

use lan_probe::ports::{parse_host_range, parse_port_range, service_name};
use lan_probe::ScanError;

#[test]
fn parse_port_and_host_ranges() {
    assert_eq!(parse_port_range("1-100").expect("parse ok"), (1, 100));
    assert_eq!(parse_port_range("65535").expect("parse ok"), (65535, 65535));
    assert_eq!(parse_host_range("20-30").expect("parse ok"), (20, 30));
}

#[test]
fn invalid_range_rejected() {
    assert!(matches!(parse_port_range("0"), Err(ScanError::InputRangeInvalid(_))));
    assert!(matches!(parse_port_range("80-22"), Err(ScanError::InputRangeInvalid(_))));
    assert!(matches!(parse_host_range("1-300"), Err(ScanError::InputRangeInvalid(_))));
}

#[test]
fn unknown_service_is_empty() {
    assert_eq!(service_name(443), "HTTPS");
    assert_eq!(service_name(27017), "MongoDB");
    assert_eq!(service_name(4), "");
}

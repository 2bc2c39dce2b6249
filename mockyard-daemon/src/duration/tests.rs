use super::*;

#[test]
fn test_parse_duration_units() {
    assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
    assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
    assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
}

#[test]
fn test_parse_duration_defaults_to_seconds() {
    assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
    assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
}

#[test]
fn test_parse_duration_invalid() {
    assert!(parse_duration("").is_err());
    assert!(parse_duration("abc").is_err());
    assert!(parse_duration("10w").is_err());
    assert!(parse_duration("99999999999999999999d").is_err());
}

#[test]
fn test_format_uptime_seconds() {
    assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
    assert_eq!(format_uptime(Duration::from_millis(59_999)), "59s");
}

#[test]
fn test_format_uptime_minutes() {
    assert_eq!(format_uptime(Duration::from_secs(125)), "2m 5s");
    assert_eq!(format_uptime(Duration::from_secs(60)), "1m 0s");
}

#[test]
fn test_format_uptime_hours() {
    assert_eq!(format_uptime(Duration::from_secs(3700)), "1h 1m");
    assert_eq!(format_uptime(Duration::from_secs(86_399)), "23h 59m");
}

#[test]
fn test_format_uptime_days() {
    assert_eq!(format_uptime(Duration::from_secs(90_000)), "1d 1h");
    assert_eq!(format_uptime(Duration::from_secs(10 * 86_400)), "10d 0h");
}

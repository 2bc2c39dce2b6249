use super::*;
use std::collections::HashMap;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_when_nothing_is_set() {
    let settings = Settings::from_lookup(lookup(&[])).unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.bind_addr(), "0.0.0.0:3500");
    assert_eq!(settings.stop_timeout, Duration::from_secs(10));
    assert_eq!(settings.startup_grace, Duration::from_millis(250));
    assert!(!settings.development);
}

#[test]
fn environment_overrides_defaults() {
    let settings = Settings::from_lookup(lookup(&[
        ("HOST", "127.0.0.1"),
        ("PORT", "4000"),
        ("CONFIGS_DIR", "/srv/configs"),
        ("UPLOAD_DIR", "/srv/uploads"),
        ("LOGS_DIR", "/srv/logs"),
        ("MOCK_SERVER_BIN", "/usr/local/bin/mockoon-cli"),
        ("MOCK_STOP_TIMEOUT", "3s"),
        ("MOCK_STARTUP_GRACE", "0ms"),
        ("MOCKYARD_ENV", "Development"),
    ]))
    .unwrap();

    assert_eq!(settings.bind_addr(), "127.0.0.1:4000");
    assert_eq!(settings.configs_dir, PathBuf::from("/srv/configs"));
    assert_eq!(settings.uploads_dir, PathBuf::from("/srv/uploads"));
    assert_eq!(settings.logs_dir, PathBuf::from("/srv/logs"));
    assert_eq!(settings.mock_bin, PathBuf::from("/usr/local/bin/mockoon-cli"));
    assert_eq!(settings.stop_timeout, Duration::from_secs(3));
    assert_eq!(settings.startup_grace, Duration::ZERO);
    assert!(settings.development);
}

#[test]
fn empty_values_are_ignored() {
    let settings = Settings::from_lookup(lookup(&[("PORT", ""), ("HOST", "  ")])).unwrap();
    assert_eq!(settings.port, DEFAULT_PORT);
    assert_eq!(settings.host, DEFAULT_HOST);
}

#[test]
fn production_is_not_development() {
    let settings = Settings::from_lookup(lookup(&[("MOCKYARD_ENV", "production")])).unwrap();
    assert!(!settings.development);
}

#[test]
fn invalid_values_are_config_errors() {
    for vars in [
        [("PORT", "http")],
        [("PORT", "70000")],
        [("MOCK_STOP_TIMEOUT", "soon")],
        [("MOCK_STARTUP_GRACE", "5 parsecs")],
    ] {
        let err = Settings::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)), "{:?} gave {:?}", vars, err);
    }
}

#[test]
fn flags_override_environment() {
    let mut settings = Settings::from_lookup(lookup(&[("PORT", "4000"), ("LOGS_DIR", "env-logs")])).unwrap();
    settings.apply(CliOverrides {
        port: Some(5000),
        stop_timeout: Some(Duration::from_millis(500)),
        dev: true,
        ..Default::default()
    });

    assert_eq!(settings.port, 5000);
    assert_eq!(settings.logs_dir, PathBuf::from("env-logs"));
    assert_eq!(settings.stop_timeout, Duration::from_millis(500));
    assert!(settings.development);
}

#[test]
fn unset_flags_keep_environment() {
    let mut settings = Settings::from_lookup(lookup(&[("MOCKYARD_ENV", "development")])).unwrap();
    settings.apply(CliOverrides::default());
    assert!(settings.development);
}

#[test]
fn dotenv_file_sets_missing_variables() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join(".env");
    std::fs::write(&path, "MOCKYARD_DOTENV_TEST_MARKER=from-file\n").unwrap();

    let loaded = load_dotenv_from(&path).unwrap();
    assert_eq!(loaded, Some(path));
    assert_eq!(
        std::env::var("MOCKYARD_DOTENV_TEST_MARKER").as_deref(),
        Ok("from-file")
    );
}

#[test]
fn missing_dotenv_file_is_not_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let loaded = load_dotenv_from(&dir.path().join(".env")).unwrap();
    assert_eq!(loaded, None);
}

use std::time::Duration;
use tollgate::config::{CONFIG_ENV, Config, DEFAULT_CONFIG_PATH};

#[test]
fn test_config_full_document() {
    let cfg = Config::from_yaml(
        r#"
port: 9090
backends:
  - http://localhost:9001
  - http://localhost:9002
rate_limit:
  capacity: 20
  refill_rate: 4
health_check:
  interval_secs: 3
  timeout_secs: 1
  path: /ready
cleanup:
  interval_secs: 30
  idle_timeout_secs: 120
proxy:
  connect_timeout_secs: 2
  request_timeout_secs: 8
shutdown_grace_secs: 7
"#,
    )
    .unwrap();

    assert_eq!(cfg.port, 9090);
    assert_eq!(cfg.backends.len(), 2);
    assert_eq!(cfg.rate_limit.capacity, 20);
    assert_eq!(cfg.rate_limit.refill_rate, 4);
    assert_eq!(cfg.health_check.interval(), Duration::from_secs(3));
    assert_eq!(cfg.health_check.timeout(), Duration::from_secs(1));
    assert_eq!(cfg.health_check.path, "/ready");
    assert_eq!(cfg.cleanup.interval(), Duration::from_secs(30));
    assert_eq!(cfg.cleanup.idle_timeout(), Duration::from_secs(120));
    assert_eq!(cfg.proxy.connect_timeout(), Duration::from_secs(2));
    assert_eq!(cfg.proxy.request_timeout(), Duration::from_secs(8));
    assert_eq!(cfg.shutdown_grace(), Duration::from_secs(7));
    assert_eq!(cfg.listen_addr(), "0.0.0.0:9090");
}

#[test]
fn test_config_defaults() {
    let cfg = Config::from_yaml("backends: [\"http://localhost:9001\"]").unwrap();

    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.rate_limit.capacity, 10);
    assert_eq!(cfg.rate_limit.refill_rate, 5);
    assert_eq!(cfg.health_check.interval(), Duration::from_secs(10));
    assert_eq!(cfg.health_check.timeout(), Duration::from_secs(2));
    assert_eq!(cfg.health_check.path, "/health");
    assert_eq!(cfg.cleanup.interval(), Duration::from_secs(60));
    assert_eq!(cfg.cleanup.idle_timeout(), Duration::from_secs(300));
    assert_eq!(cfg.shutdown_grace(), Duration::from_secs(5));
}

#[test]
fn test_config_partial_section_fills_defaults() {
    let cfg = Config::from_yaml("backends: []\nrate_limit:\n  capacity: 2\n").unwrap();

    assert_eq!(cfg.rate_limit.capacity, 2);
    assert_eq!(cfg.rate_limit.refill_rate, 5);
    assert!(cfg.backends.is_empty());
}

#[test]
fn test_config_requires_backends() {
    let err = Config::from_yaml("port: 8080\n").unwrap_err();

    assert!(format!("{err:#}").contains("backends"));
}

#[test]
fn test_config_rejects_zero_intervals() {
    let err = Config::from_yaml("backends: []\nhealth_check:\n  interval_secs: 0\n").unwrap_err();
    assert!(err.to_string().contains("health_check.interval_secs"));

    let err = Config::from_yaml("backends: []\ncleanup:\n  interval_secs: 0\n").unwrap_err();
    assert!(err.to_string().contains("cleanup.interval_secs"));
}

#[test]
fn test_config_rejects_bad_types() {
    assert!(Config::from_yaml("backends: []\nport: not-a-port").is_err());
    assert!(Config::from_yaml("backends: []\nrate_limit:\n  capacity: -1\n").is_err());
}

#[test]
fn test_config_load_from_file() {
    let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
    std::fs::write(&path, "port: 7000\nbackends:\n  - http://127.0.0.1:7001\n").unwrap();

    let cfg = Config::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.port, 7000);
    assert_eq!(cfg.backends, vec!["http://127.0.0.1:7001".to_string()]);
}

#[test]
fn test_config_load_missing_file() {
    let err = Config::load("/definitely/not/here.yaml").unwrap_err();

    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn test_config_path_from_env() {
    unsafe {
        std::env::remove_var(CONFIG_ENV);
    }
    assert_eq!(Config::path_from_env(), DEFAULT_CONFIG_PATH);

    unsafe {
        std::env::set_var(CONFIG_ENV, "/etc/tollgate.yaml");
    }
    assert_eq!(Config::path_from_env(), "/etc/tollgate.yaml");

    unsafe {
        std::env::remove_var(CONFIG_ENV);
    }
}

#[test]
fn test_shipped_config_parses() {
    let cfg = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/configs/config.yaml")).unwrap();

    assert_eq!(cfg.backends.len(), 2);
}

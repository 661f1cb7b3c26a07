use super::*;
use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, tempdir};

// === DEFAULT VALUE TESTS ===

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8499);
    assert_eq!(config.server.workers, num_cpus::get());
    assert!(config.maven.settings.is_none());
    assert!(config.maven.local_repository.is_none());
    assert!(config.maven.proxy_config.is_none());
    assert_eq!(config.logging.level, "info");
    assert!(!config.logging.json);
}

#[test]
fn test_default_upstream_config() {
    let upstream = UpstreamConfig::default();
    assert_eq!(upstream.request_timeout(), Duration::from_secs(20));
    assert_eq!(upstream.connect_timeout(), Duration::from_secs(5));
    assert_eq!(
        upstream.negative_cache_ttl(),
        Duration::from_secs(12 * 60 * 60)
    );
}

#[test]
fn test_zero_request_timeout_falls_back_to_default() {
    let upstream = UpstreamConfig {
        request_timeout_secs: 0,
        ..UpstreamConfig::default()
    };
    assert_eq!(upstream.request_timeout(), Duration::from_secs(20));
}

#[test]
fn test_bind_address() {
    let server = ServerConfig {
        host: "0.0.0.0".to_string(),
        port: 9000,
        workers: 1,
    };
    assert_eq!(server.bind_address(), "0.0.0.0:9000");
}

// === TOML PARSING TESTS ===

#[test]
fn test_parse_empty_config() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.server.port, 8499);
    assert_eq!(config.upstream.request_timeout_secs, 20);
}

#[test]
fn test_parse_full_config() {
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 3000
        workers = 4

        [maven]
        settings = "/etc/maven/settings.xml"
        local_repository = "/var/cache/m2"
        proxy_config = "/etc/m2proxy/proxy-config.yaml"

        [upstream]
        request_timeout_secs = 45
        connect_timeout_secs = 2
        negative_cache_ttl_mins = 30

        [logging]
        level = "debug"
        json = true
    "#;
    let config: Config = toml::from_str(toml).unwrap();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.workers, 4);
    assert_eq!(
        config.maven.settings,
        Some(PathBuf::from("/etc/maven/settings.xml"))
    );
    assert_eq!(
        config.maven.local_repository_path(),
        Some(PathBuf::from("/var/cache/m2"))
    );
    assert!(config.maven.local_repository_is_explicit());
    assert_eq!(config.upstream.request_timeout(), Duration::from_secs(45));
    assert_eq!(config.upstream.connect_timeout(), Duration::from_secs(2));
    assert_eq!(
        config.upstream.negative_cache_ttl(),
        Duration::from_secs(30 * 60)
    );
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
}

#[test]
fn test_parse_partial_logging_section() {
    let toml = r#"
        [logging]
        json = true
    "#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.json);
}

#[test]
fn test_parse_rejects_wrong_types() {
    let toml = r#"
        [server]
        port = "not-a-port"
    "#;
    assert!(toml::from_str::<Config>(toml).is_err());
}

// === CONFIG FILE LOADING TESTS ===

#[test]
fn test_load_config_normalizes_relative_paths() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("m2proxy.toml");

    let toml_content = r#"
        [server]
        port = 4000

        [maven]
        settings = "settings.xml"
        local_repository = "/absolute/repository"
        proxy_config = "conf/proxy-config.yaml"
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let config = Config::load(Some(config_path)).unwrap();
    assert_eq!(config.server.port, 4000);
    assert_eq!(
        config.maven.settings,
        Some(temp_dir.path().join("settings.xml"))
    );
    assert_eq!(
        config.maven.local_repository,
        Some(PathBuf::from("/absolute/repository"))
    );
    assert_eq!(
        config.maven.proxy_config,
        Some(temp_dir.path().join("conf/proxy-config.yaml"))
    );
}

#[test]
fn test_load_config_nonexistent_file_uses_defaults() {
    let temp_dir = tempdir().unwrap();
    let missing = temp_dir.path().join("missing.toml");
    let config = Config::load(Some(missing.clone())).unwrap();
    assert_eq!(config.server.port, 8499);
    assert_eq!(config.source, ConfigSource::Missing(missing));
}

#[test]
fn test_load_config_records_file_source() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("m2proxy.toml");
    fs::write(&config_path, "[server]\nport = 4100\n").unwrap();

    let config = Config::load(Some(config_path.clone())).unwrap();
    assert_eq!(config.server.port, 4100);
    assert_eq!(config.source, ConfigSource::File(config_path));
}

#[test]
fn test_load_config_invalid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"invalid { toml content").unwrap();
    temp_file.flush().unwrap();

    let result = Config::load(Some(temp_file.path().to_path_buf()));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("invalid config"));
}

// === VALIDATION TESTS ===

#[test]
fn test_validate_default_config() {
    assert!(Config::default().validate().is_ok());
}

#[test]
fn test_validate_rejects_zero_port() {
    let mut config = Config::default();
    config.server.port = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_connect_timeout() {
    let mut config = Config::default();
    config.upstream.connect_timeout_secs = 0;
    assert!(config.validate().is_err());
}

// === MAVEN PATH DEFAULTS ===

#[test]
fn test_maven_paths_default_under_home() {
    let maven = MavenConfig::default();
    if let Some(home) = dirs::home_dir() {
        assert_eq!(
            maven.settings_path(),
            Some(home.join(".m2").join("settings.xml"))
        );
        assert_eq!(
            maven.local_repository_path(),
            Some(home.join(".m2").join("repository"))
        );
    }
    assert!(!maven.local_repository_is_explicit());
}

use mg_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn default_engine_port() {
    let config = Config::default();
    assert_eq!(config.engine.port, 8003);
    assert_eq!(config.engine.models_url(), "http://localhost:8003/v1/models");
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 3100
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn partial_engine_section_keeps_defaults() {
    let toml_str = r#"
[engine]
port = 8010
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.engine.port, 8010);
    assert_eq!(config.engine.readiness.hard_cap_secs, 300);
    assert_eq!(config.engine.readiness.stuck_after_secs, 240);
    assert_eq!(config.engine.shutdown_grace_secs, 10);
}

#[test]
fn registry_file_under_data_dir() {
    let config = Config::default();
    assert_eq!(
        config.paths.registry_file(),
        std::path::PathBuf::from("./data/registry.json")
    );
    assert_eq!(
        config.paths.model_config_dir(),
        std::path::PathBuf::from("./data/models/config")
    );
}

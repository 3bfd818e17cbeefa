use crate::config::models::AppConfig;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[coordinator]
node_id = "coord-file"
rpc_timeout_seconds = 12
drain_poll_initial_ms = 100
drain_poll_max_ms = 400
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    // tempfile没有.toml扩展名，依赖显式的FileFormat
    let config = AppConfig::load(Some(&path)).unwrap();

    assert_eq!(config.coordinator.node_id, "coord-file");
    assert_eq!(config.coordinator.rpc_timeout_seconds, 12);
    assert_eq!(config.coordinator.drain_poll_max_ms, 400);
    assert_eq!(config.api.bind_address, "0.0.0.0:8080");
}

#[test]
fn test_load_missing_file() {
    let result = AppConfig::load(Some("/nonexistent/coordinator.toml"));
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_file_fails_validation() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[coordinator]
operation_timeout_seconds = 0
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(format!("{err:#}").contains("操作超时时间必须大于0"));
}

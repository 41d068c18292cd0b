use std::fs;
use std::time::Duration;

use lockstore::StorageManager;
use lockstore::config::Config;
use lockstore::strategy::StrategyKind;

#[test]
fn manager_from_config_file() {
    lockstore_test::setup();
    let dir = lockstore_test::tempdir();
    let path = dir.path().join("config.yml");
    fs::write(
        &path,
        r#"
logging:
  level: debug
  format: json
manager:
  debug_text: descriptors
  exception_strategy: log
  check_cancelled_interval: 10ms
"#,
    )
    .unwrap();

    let config = Config::get(Some(&path)).unwrap();
    assert_eq!(config.manager.exception_strategy, StrategyKind::Log);
    assert_eq!(
        config.manager.check_cancelled_interval,
        Some(Duration::from_millis(10))
    );

    let manager = StorageManager::from_config(&config.manager);
    assert_eq!(manager.debug_text(), "descriptors");
    insta::assert_snapshot!(
        format!("{:?}", manager.exception_strategy()),
        @r#"LogAndThrow { manager: "descriptors" }"#
    );

    let value = manager.create_lazy_value(|| Ok("configured"));
    assert_eq!(value.get().unwrap(), "configured");
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = lockstore_test::tempdir();
    assert!(Config::get(Some(&dir.path().join("missing.yml"))).is_err());
}

//! 配置加载集成测试
//!
//! 环境变量是进程级状态，所有依赖环境变量的断言放在同一个测试里顺序执行。

use std::fs;
use std::path::PathBuf;

use oms_shared::config::AppConfig;
use oms_shared::error::OmsError;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("oms-config-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_layered_loading() {
    let dir = scratch_dir("layers");
    fs::write(
        dir.join("default.toml"),
        r#"
[rabbitmq]
host = "rabbit-default"
exchange = "oms.exchange"

[rabbitmq.order_created]
queue = "oms.order.created"
batch_size = 10
batch_timeout_seconds = 2
"#,
    )
    .unwrap();
    fs::write(
        dir.join("staging.toml"),
        r#"
[rabbitmq]
host = "rabbit-staging"
"#,
    )
    .unwrap();
    fs::write(
        dir.join("audit-consumer.toml"),
        r#"
[failure_injection]
order_created_every_nth_batch = 5
"#,
    )
    .unwrap();

    // SAFETY: 该测试文件中只有这一个测试修改环境变量
    unsafe {
        std::env::set_var("CONFIG_DIR", &dir);
        std::env::set_var("OMS_ENV", "staging");
        std::env::set_var("OMS_RABBITMQ__PORT", "5673");
    }

    let config = AppConfig::load("audit-consumer").unwrap();
    assert_eq!(config.service_name, "audit-consumer");
    assert_eq!(config.environment, "staging");
    assert!(!config.is_production());
    assert_eq!(config.rabbitmq.host, "rabbit-staging");
    assert_eq!(config.rabbitmq.port, 5673);
    assert_eq!(config.rabbitmq.order_created.batch_size, 10);
    assert_eq!(config.failure_injection.order_created_every_nth_batch, 5);
    // 未在文件中出现的配置段取默认值
    assert_eq!(config.audit.base_url, "http://localhost:5000");
    assert_eq!(config.rabbitmq.exchange_mappings.len(), 2);

    // 非法批次配置在加载时即被拒绝
    unsafe {
        std::env::set_var("OMS_RABBITMQ__ORDER_CREATED__BATCH_SIZE", "0");
    }
    let err = AppConfig::load("audit-consumer").unwrap_err();
    assert!(matches!(err, OmsError::InvalidConfig { .. }));
    assert!(err.is_fatal_at_startup());

    unsafe {
        std::env::remove_var("OMS_RABBITMQ__ORDER_CREATED__BATCH_SIZE");
        std::env::remove_var("OMS_RABBITMQ__PORT");
        std::env::remove_var("OMS_ENV");
        std::env::remove_var("CONFIG_DIR");
    }
    let _ = fs::remove_dir_all(&dir);
}

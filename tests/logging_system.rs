use std::fs;
use std::path::Path;
use std::time::Duration;

use mediatag::logging::{LoggingConfig, init};

// 注意: 由于 tracing 的全局订阅器只能初始化一次,
// 涉及 init() 的测试必须单独运行或使用 #[ignore] 标记

fn config_in(dir: &Path, level: &str, prefix: &str) -> LoggingConfig {
    LoggingConfig {
        level: level.to_string(),
        directory: dir.to_string_lossy().to_string(),
        file_prefix: prefix.to_string(),
        console: false,
    }
}

#[test]
#[ignore] // 需要单独运行: cargo test --test logging_system test_解析日志写入文件 -- --ignored
fn test_解析日志写入文件() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir.path().join("nested").join("logs"), "debug", "parse-test");
    let log_file = config.current_log_path();

    init(config).expect("日志初始化失败");

    // 解析器通过 log 门面输出, 由订阅器桥接写入文件
    let mut tag = vec![0u8; 128];
    tag[..3].copy_from_slice(b"TAG");
    mediatag::parse(&tag, "mp3").unwrap();
    tracing::info!("这是一条测试日志消息_12345");
    tracing::debug!("调试日志_DEBUG_MSG");

    std::thread::sleep(Duration::from_millis(200));

    let content = fs::read_to_string(&log_file)
        .unwrap_or_else(|e| panic!("读取日志文件失败: {:?}, 错误: {}", log_file, e));
    assert!(content.contains("这是一条测试日志消息_12345"), "文件内容:\n{content}");
    assert!(content.contains("INFO"), "日志应该包含 INFO 级别标记");
    assert!(content.contains("调试日志_DEBUG_MSG"));
    assert!(content.contains("mediatag_format"), "应该包含解析器的日志目标");
}

#[test]
#[ignore] // 需要单独运行: cargo test --test logging_system test_级别过滤 -- --ignored
fn test_级别过滤() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "info", "level-test");
    let log_file = config.current_log_path();

    init(config).expect("日志初始化失败");

    tracing::error!("错误日志_ERROR_MSG");
    tracing::warn!("警告日志_WARN_MSG");
    tracing::info!("信息日志_INFO_MSG");
    tracing::debug!("调试日志_DEBUG_MSG");

    std::thread::sleep(Duration::from_millis(200));

    let content = fs::read_to_string(&log_file).expect("读取日志文件失败");
    assert!(content.contains("错误日志_ERROR_MSG"));
    assert!(content.contains("警告日志_WARN_MSG"));
    assert!(content.contains("信息日志_INFO_MSG"));
    assert!(!content.contains("调试日志_DEBUG_MSG"), "debug 日志应该被过滤掉");
}

#[test]
fn test_无效级别返回错误() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "mediatag=notalevel", "bad-level");
    // 过滤器在安装订阅器之前校验, 不会占用全局订阅器
    assert!(init(config).is_err());
}

#[test]
fn test_日志文件命名格式() {
    let dir = tempfile::tempdir().unwrap();
    for prefix in ["mediatag", "mediatag-scan", "batch"] {
        let config = config_in(dir.path(), "info", prefix);
        let path = config.current_log_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let today = chrono::Utc::now().date_naive();
        assert_eq!(name, format!("{}.{}.log", prefix, today.format("%Y-%m-%d")));
        assert!(path.starts_with(dir.path()));
    }
}

#[test]
fn test_配置部分字段反序列化() {
    let config: LoggingConfig =
        serde_json::from_str(r#"{"directory": "/var/log/mediatag", "console": false}"#).unwrap();
    assert_eq!(config.level, "info");
    assert_eq!(config.directory, "/var/log/mediatag");
    assert_eq!(config.file_prefix, "mediatag");
    assert!(!config.console);
}

use lib_common::loggers::{setup_logging, LoggingOptions};
use std::fs;
use tempfile::tempdir;

#[tokio::test]
async fn test_setup_logging_writes_json_file() {
    // Create a temporary directory for log files
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let log_dir_path = temp_dir.path().join("logs");

    let options = LoggingOptions {
        log_dir: Some(log_dir_path.clone()),
        file_prefix: "test_receiver".to_string(),
        level: "info".to_string(),
    };

    let guard = setup_logging(&options).expect("Failed to install subscriber");
    assert!(guard.is_some(), "File logging must hand back a flush guard");

    tracing::info!(generation = 7u64, "snapshot published");
    tracing::debug!("filtered out at info level");

    // Dropping the guard flushes the non-blocking writer
    drop(guard);

    let log_files: Vec<_> = fs::read_dir(&log_dir_path)
        .expect("Failed to read log directory")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    assert_eq!(log_files.len(), 1, "Expected exactly one rolling log file");

    let contents = fs::read_to_string(&log_files[0]).expect("Failed to read log file");
    let records: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("Every line is a JSON record"))
        .collect();

    let published = records
        .iter()
        .find(|record| record["fields"]["message"] == "snapshot published")
        .expect("info record present");
    assert_eq!(published["fields"]["generation"], 7);
    assert_eq!(published["level"], "INFO");
    if std::env::var_os("RUST_LOG").is_none() {
        assert!(!contents.contains("filtered out at info level"));
    }

    // A second install is refused rather than silently replacing the first
    let second = setup_logging(&LoggingOptions {
        log_dir: None,
        ..options
    });
    assert!(second.is_err());
}

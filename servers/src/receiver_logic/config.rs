use anyhow::Context;
use clap::Parser;
use lib_common::loggers::LoggingOptions;
use lib_common::ReceiverOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_receiver.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Routing controller stream receiver", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RECEIVER_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RECEIVER_LOG_DIR", help = "Directory for rolling JSON log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RECEIVER_LOG_LEVEL", help = "Logging filter (trace, debug, info, warn, error or a directive list).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RECEIVER_CONTROLLER_URL", help = "Controller endpoint serving the update stream.")]
    pub controller_url: Option<String>,

    #[clap(long, env = "RECEIVER_BASE_RATE", help = "Reconnect attempts per second while the controller is healthy.")]
    pub base_rate: Option<f64>,

    #[clap(long, env = "RECEIVER_ESCALATED_RATE", help = "Reconnect attempts per second after repeated failures.")]
    pub escalated_rate: Option<f64>,

    #[clap(long, env = "RECEIVER_FAILURE_THRESHOLD", help = "Consecutive failures before the escalated rate applies.")]
    pub failure_threshold: Option<u32>,

    #[clap(long, env = "RECEIVER_CONNECT_TIMEOUT_SECS", help = "Seconds allowed to establish a connection.")]
    pub connect_timeout_secs: Option<u64>,

    #[clap(long, env = "RECEIVER_USER_AGENT", help = "User-Agent header sent to the controller.")]
    pub user_agent: Option<String>,

    #[clap(long, env = "RECEIVER_MAX_LINE_BYTES", help = "Longest accepted stream line in bytes.")]
    pub max_line_bytes: Option<usize>,

    #[clap(long, env = "RECEIVER_VERBOSE_MESSAGES", help = "Log every received line and message at info level.")]
    pub verbose_messages: Option<bool>,

    #[clap(long, env = "RECEIVER_SHUTDOWN_TIMEOUT_SECS", help = "Seconds allowed for a graceful shutdown.")]
    pub shutdown_timeout_secs: Option<u64>,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            controller_url: other.controller_url.or(self.controller_url),
            base_rate: other.base_rate.or(self.base_rate),
            escalated_rate: other.escalated_rate.or(self.escalated_rate),
            failure_threshold: other.failure_threshold.or(self.failure_threshold),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
            user_agent: other.user_agent.or(self.user_agent),
            max_line_bytes: other.max_line_bytes.or(self.max_line_bytes),
            verbose_messages: other.verbose_messages.or(self.verbose_messages),
            shutdown_timeout_secs: other.shutdown_timeout_secs.or(self.shutdown_timeout_secs),
        }
    }

    fn defaults() -> Config {
        let options = ReceiverOptions::default();
        Config {
            config_path: None,
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            controller_url: Some(options.controller_url),
            base_rate: Some(options.base_rate),
            escalated_rate: Some(options.escalated_rate),
            failure_threshold: Some(options.failure_threshold),
            connect_timeout_secs: Some(options.connect_timeout_secs),
            user_agent: Some(options.user_agent),
            max_line_bytes: Some(options.max_line_bytes),
            verbose_messages: Some(options.verbose_messages),
            shutdown_timeout_secs: Some(10),
        }
    }

    pub fn receiver_options(&self) -> ReceiverOptions {
        let defaults = ReceiverOptions::default();
        ReceiverOptions {
            controller_url: self.controller_url.clone().unwrap_or(defaults.controller_url),
            base_rate: self.base_rate.unwrap_or(defaults.base_rate),
            escalated_rate: self.escalated_rate.unwrap_or(defaults.escalated_rate),
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            connect_timeout_secs: self.connect_timeout_secs.unwrap_or(defaults.connect_timeout_secs),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            max_line_bytes: self.max_line_bytes.unwrap_or(defaults.max_line_bytes),
            verbose_messages: self.verbose_messages.unwrap_or(defaults.verbose_messages),
        }
    }

    pub fn logging_options(&self) -> LoggingOptions {
        LoggingOptions {
            log_dir: self.log_dir.clone(),
            file_prefix: "server_receiver".to_string(),
            level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs.unwrap_or(10))
    }
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Resolves the configuration as defaults < config file < environment/CLI.
///
/// A missing default config file is fine; a missing file named explicitly
/// through `--config-path` is an error.
pub fn resolve(cli: Config) -> anyhow::Result<Config> {
    let mut current = Config::defaults();

    match &cli.config_path {
        Some(path) => current = current.merge(read_file(path)?),
        None => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            if path.exists() {
                current = current.merge(read_file(path)?);
            }
        }
    }

    let merged = current.merge(cli);
    merged.receiver_options().validate()?;
    Ok(merged)
}

pub fn load_config() -> anyhow::Result<Config> {
    resolve(Config::parse())
}

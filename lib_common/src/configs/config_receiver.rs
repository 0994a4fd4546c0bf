//! # Receiver Options
//!
//! Plain, serializable settings for one controller receiver. They are read
//! from a camelCase JSON document (or built in code), validated once, and then
//! turned into the immutable runtime configuration the receiver loop owns.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default controller endpoint used when nothing else is configured.
pub const DEFAULT_CONTROLLER_URL: &str = "http://localhost:8000/api/dispatch";
/// A full routing table for one cluster fits comfortably in this.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid controller URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("controller URL '{0}' must use http or https")]
    UnsupportedScheme(String),

    #[error("{name} must be a positive, finite number of permits per second (got {value})")]
    InvalidRate { name: &'static str, value: f64 },

    #[error("escalated rate {escalated} must not exceed base rate {base}")]
    EscalatedAboveBase { base: f64, escalated: f64 },

    #[error("failure threshold must be at least 1")]
    ZeroThreshold,

    #[error("connect timeout must be at least 1 second")]
    ZeroConnectTimeout,

    #[error("maximum line length must be at least 1 byte")]
    ZeroMaxLineBytes,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings for a single receiver instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiverOptions {
    /// Address of the controller's streaming endpoint.
    pub controller_url: String,
    /// Connection attempts allowed per second while the controller is healthy.
    pub base_rate: f64,
    /// Connection attempts allowed per second once `failure_threshold`
    /// consecutive cycles have failed.
    pub escalated_rate: f64,
    /// Consecutive failures after which `escalated_rate` applies.
    pub failure_threshold: u32,
    /// Upper bound on establishing the TCP/TLS connection.
    pub connect_timeout_secs: u64,
    /// User-Agent header sent with every stream request.
    pub user_agent: String,
    /// Longest accepted line; a longer one fails the connection.
    pub max_line_bytes: usize,
    /// Log every raw line and message kind at info level.
    pub verbose_messages: bool,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            controller_url: DEFAULT_CONTROLLER_URL.to_string(),
            base_rate: 2.0,
            escalated_rate: 0.2,
            failure_threshold: 3,
            connect_timeout_secs: 15,
            user_agent: concat!("lib_common-receiver/", env!("CARGO_PKG_VERSION")).to_string(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            verbose_messages: false,
        }
    }
}

impl ReceiverOptions {
    /// Loads options from a JSON file. Missing keys keep their defaults.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options: ReceiverOptions =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Parses and checks the controller URL.
    pub fn controller_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.controller_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.controller_url.clone(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(ConfigError::UnsupportedScheme(self.controller_url.clone())),
        }
    }

    /// Checks every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller_url()?;
        check_rate("baseRate", self.base_rate)?;
        check_rate("escalatedRate", self.escalated_rate)?;
        if self.escalated_rate > self.base_rate {
            return Err(ConfigError::EscalatedAboveBase {
                base: self.base_rate,
                escalated: self.escalated_rate,
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ZeroMaxLineBytes);
        }
        Ok(())
    }
}

fn check_rate(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRate { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let options = ReceiverOptions::default();
        options.validate().expect("defaults should validate");
        assert_eq!(options.base_rate, 2.0);
        assert_eq!(options.failure_threshold, 3);
        assert_eq!(options.connect_timeout_secs, 15);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_url = ReceiverOptions {
            controller_url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(bad_url.validate(), Err(ConfigError::InvalidUrl { .. })));

        let bad_scheme = ReceiverOptions {
            controller_url: "ftp://controller/stream".into(),
            ..Default::default()
        };
        assert!(matches!(bad_scheme.validate(), Err(ConfigError::UnsupportedScheme(_))));

        let nan_rate = ReceiverOptions {
            base_rate: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            nan_rate.validate(),
            Err(ConfigError::InvalidRate { name: "baseRate", .. })
        ));

        let inverted = ReceiverOptions {
            base_rate: 1.0,
            escalated_rate: 5.0,
            ..Default::default()
        };
        assert!(matches!(inverted.validate(), Err(ConfigError::EscalatedAboveBase { .. })));

        let zero_threshold = ReceiverOptions {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(zero_threshold.validate(), Err(ConfigError::ZeroThreshold)));

        let zero_line = ReceiverOptions {
            max_line_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(zero_line.validate(), Err(ConfigError::ZeroMaxLineBytes)));
    }

    #[test]
    fn loads_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "controllerUrl": "https://controller.internal/stream", "failureThreshold": 5 }}"#
        )
        .unwrap();

        let options = ReceiverOptions::load_file(file.path()).unwrap();
        assert_eq!(options.controller_url, "https://controller.internal/stream");
        assert_eq!(options.failure_threshold, 5);
        assert_eq!(options.base_rate, 2.0);
    }

    #[test]
    fn reports_unparseable_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            ReceiverOptions::load_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ReceiverOptions::load_file("/definitely/missing/receiver.json"),
            Err(ConfigError::Read { .. })
        ));
    }
}

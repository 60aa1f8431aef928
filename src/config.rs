//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// DigitalOcean API settings derived from environment variables and
/// configuration files. The API token itself arrives via the CLI.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SALTFLEET_DO")]
pub struct DoConfig {
    /// Base URL of the DigitalOcean API. Overridable for tests and mocks.
    #[ortho_config(default = "https://api.digitalocean.com".to_owned())]
    pub api_url: String,
    /// Per-request timeout in seconds for provider HTTP calls.
    #[ortho_config(default = 30_u64)]
    pub request_timeout_secs: u64,
}

impl DoConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("saltfleet")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing API base URL: set SALTFLEET_DO_API_URL or add api_url to saltfleet.toml",
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn validate_rejects_blank_api_url() {
        let config = DoConfig {
            api_url: String::from("  "),
            request_timeout_secs: 30,
        };
        let err = config.validate().expect_err("expected validation failure");
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[rstest]
    fn validate_accepts_defaults() {
        let config = DoConfig {
            api_url: String::from("https://api.digitalocean.com"),
            request_timeout_secs: 30,
        };
        assert!(config.validate().is_ok());
    }
}

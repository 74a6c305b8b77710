//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::recreate::ImageNaming;
use crate::wait::PollPolicy;

/// Settings layered from defaults, `recreator.toml`, and `RECREATOR_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "RECREATOR",
    discovery(
        app_name = "recreator",
        env_var = "RECREATOR_CONFIG_PATH",
        config_file_name = "recreator.toml",
        dotfile_name = ".recreator.toml",
        project_file_name = "recreator.toml"
    )
)]
pub struct RecreatorConfig {
    /// AWS region. Falls back to the SDK's default provider chain when unset.
    pub region: Option<String>,
    /// Named profile from the shared AWS config files.
    pub profile: Option<String>,
    /// Seconds between two status checks.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Maximum number of status checks per wait. Unset waits forever.
    pub max_poll_attempts: Option<u32>,
    /// Prefix for the names of images taken from source instances.
    #[ortho_config(default = "recreator-".to_owned())]
    pub image_name_prefix: String,
    /// Description recorded on created images.
    #[ortho_config(default = "From Recreator".to_owned())]
    pub image_description: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to recreator.toml",
            self.env_var, self.toml_key
        )
    }
}

impl RecreatorConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("recreator")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and the configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required string is blank
    /// and [`ConfigError::Invalid`] when a numeric setting is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_positive(
            self.poll_interval_secs,
            &FieldMetadata::new(
                "poll interval",
                "RECREATOR_POLL_INTERVAL_SECS",
                "poll_interval_secs",
            ),
        )?;
        if let Some(max) = self.max_poll_attempts {
            Self::require_positive(
                u64::from(max),
                &FieldMetadata::new(
                    "maximum poll attempts",
                    "RECREATOR_MAX_POLL_ATTEMPTS",
                    "max_poll_attempts",
                ),
            )?;
        }
        Self::require_field(
            &self.image_name_prefix,
            &FieldMetadata::new(
                "image name prefix",
                "RECREATOR_IMAGE_NAME_PREFIX",
                "image_name_prefix",
            ),
        )?;
        Self::require_field(
            &self.image_description,
            &FieldMetadata::new(
                "image description",
                "RECREATOR_IMAGE_DESCRIPTION",
                "image_description",
            ),
        )?;
        Ok(())
    }

    /// Returns the polling policy described by this configuration.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.max_poll_attempts,
        }
    }

    /// Returns the naming applied to created images.
    #[must_use]
    pub fn image_naming(&self) -> ImageNaming {
        ImageNaming::new(
            self.image_name_prefix.trim(),
            self.image_description.trim(),
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

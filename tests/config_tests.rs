//! Tests for configuration loading and validation.

use std::time::Duration;

use recreator::test_support::EnvGuard;
use recreator::{ConfigError, RecreatorConfig};
use rstest::*;

#[fixture]
fn valid_config() -> RecreatorConfig {
    RecreatorConfig {
        region: Some(String::from("eu-west-1")),
        profile: None,
        poll_interval_secs: 5,
        max_poll_attempts: Some(120),
        image_name_prefix: String::from("recreator-"),
        image_description: String::from("From Recreator"),
    }
}

#[rstest]
fn valid_config_passes_validation(valid_config: RecreatorConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
}

#[test]
fn config_validation_rejects_blank_prefix_with_actionable_error() {
    let cfg = RecreatorConfig {
        image_name_prefix: String::from("   "),
        ..valid_config()
    };

    let error = cfg.validate().expect_err("prefix is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error");
    };
    assert!(
        message.contains("RECREATOR_IMAGE_NAME_PREFIX"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("recreator.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("image_name_prefix"),
        "error should mention TOML key: {message}"
    );
}

#[rstest]
#[case::zero_interval(
    |cfg: &mut RecreatorConfig| cfg.poll_interval_secs = 0,
    "RECREATOR_POLL_INTERVAL_SECS",
    "poll_interval_secs"
)]
#[case::zero_attempts(
    |cfg: &mut RecreatorConfig| cfg.max_poll_attempts = Some(0),
    "RECREATOR_MAX_POLL_ATTEMPTS",
    "max_poll_attempts"
)]
#[case::blank_description(
    |cfg: &mut RecreatorConfig| cfg.image_description.clear(),
    "RECREATOR_IMAGE_DESCRIPTION",
    "image_description"
)]
fn config_validation_produces_actionable_errors(
    valid_config: RecreatorConfig,
    #[case] mutate: fn(&mut RecreatorConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let message = cfg
        .validate()
        .expect_err("validation should fail")
        .to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("recreator.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn unset_attempt_limit_waits_forever(valid_config: RecreatorConfig) {
    let cfg = RecreatorConfig {
        max_poll_attempts: None,
        ..valid_config
    };

    assert_eq!(cfg.validate(), Ok(()));
    let policy = cfg.poll_policy();
    assert_eq!(policy.interval, Duration::from_secs(5));
    assert_eq!(policy.max_attempts, None);
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("RECREATOR_REGION", "ap-southeast-2"),
        ("RECREATOR_POLL_INTERVAL_SECS", "2"),
        ("RECREATOR_MAX_POLL_ATTEMPTS", "30"),
    ])
    .await;

    let cfg = RecreatorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("configuration should load: {err}"));

    assert_eq!(cfg.region.as_deref(), Some("ap-southeast-2"));
    assert_eq!(cfg.poll_interval_secs, 2);
    assert_eq!(cfg.max_poll_attempts, Some(30));
    assert_eq!(cfg.image_name_prefix, "recreator-");
    assert_eq!(cfg.image_description, "From Recreator");
}

#[tokio::test]
async fn image_naming_trims_configured_values() {
    let _guard = EnvGuard::set_vars(&[
        ("RECREATOR_IMAGE_NAME_PREFIX", " nightly- "),
        ("RECREATOR_IMAGE_DESCRIPTION", "Nightly clone "),
    ])
    .await;

    let cfg = RecreatorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("configuration should load: {err}"));
    let naming = cfg.image_naming();

    assert_eq!(naming.prefix, "nightly-");
    assert_eq!(naming.description, "Nightly clone");
}

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for settings values.

use crate::diagnostic::ConfigError;
use crate::model::{BUILTIN_PROVISION, CONNECT_PLUGIN, ZonectlSettings};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate deserialized settings for semantic correctness.
///
/// Collects every failure rather than stopping at the first.
pub fn validate_settings(settings: &ZonectlSettings) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&settings.cli.log_level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "cli.log_level `{}` is not one of {}",
                settings.cli.log_level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if settings.cli.data_file.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "cli.data_file must not be empty".to_string(),
        });
    }

    if settings.plugin.dir.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "plugin.dir must not be empty".to_string(),
        });
    }

    for (key, value) in [
        ("plugin.handshake_timeout_secs", settings.plugin.handshake_timeout_secs),
        ("plugin.ping_timeout_secs", settings.plugin.ping_timeout_secs),
        ("provision.deploy_timeout_secs", settings.provision.deploy_timeout_secs),
        (
            "provision.repository_lock_timeout_secs",
            settings.provision.repository_lock_timeout_secs,
        ),
    ] {
        if value == 0 {
            errors.push(ConfigError::Validation {
                message: format!("{key} must be at least 1"),
            });
        }
    }

    let backend = settings.plugin.provision.as_str();
    if backend != BUILTIN_PROVISION && backend != CONNECT_PLUGIN {
        errors.push(ConfigError::Validation {
            message: format!(
                "plugin.provision `{backend}` is not recognised, expected `{BUILTIN_PROVISION}` or `{CONNECT_PLUGIN}`"
            ),
        });
    }

    for (key, value) in [
        ("provision.helm_binary", &settings.provision.helm_binary),
        ("provision.kubectl_binary", &settings.provision.kubectl_binary),
        ("provision.spire_repository_url", &settings.provision.spire_repository_url),
    ] {
        if value.trim().is_empty() {
            errors.push(ConfigError::Validation {
                message: format!("{key} must not be empty"),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(validate_settings(&ZonectlSettings::default()).is_ok());
    }

    #[test]
    fn zero_timeouts_are_all_reported() {
        let mut settings = ZonectlSettings::default();
        settings.plugin.handshake_timeout_secs = 0;
        settings.plugin.ping_timeout_secs = 0;
        let errors = validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("ping_timeout_secs"))
        ));
    }

    #[test]
    fn unknown_provision_backend_fails() {
        let mut settings = ZonectlSettings::default();
        settings.plugin.provision = "terraform".into();
        let errors = validate_settings(&settings).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("terraform"))
        ));
    }

    #[test]
    fn bad_log_level_fails() {
        let mut settings = ZonectlSettings::default();
        settings.cli.log_level = "loud".into();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn connect_provision_backend_is_accepted() {
        let mut settings = ZonectlSettings::default();
        settings.plugin.provision = CONNECT_PLUGIN.into();
        assert!(validate_settings(&settings).is_ok());
    }
}

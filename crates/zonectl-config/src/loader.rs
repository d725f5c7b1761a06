// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Settings loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./zonectl.toml` > `~/.config/zonectl/zonectl.toml` > `/etc/zonectl/zonectl.toml`
//! with environment variable overrides via `ZONECTL_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::ZonectlSettings;

/// Load settings from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/zonectl/zonectl.toml`
/// 3. `~/.config/zonectl/zonectl.toml`
/// 4. `./zonectl.toml`
/// 5. `ZONECTL_*` environment variables
pub fn load_settings() -> Result<ZonectlSettings, figment::Error> {
    build_figment().extract()
}

/// Load settings from a TOML string only (no XDG lookup, no env).
pub fn load_settings_from_str(toml_content: &str) -> Result<ZonectlSettings, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZonectlSettings::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load settings from a specific file path with env var overrides.
pub fn load_settings_from_path(path: &Path) -> Result<ZonectlSettings, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZonectlSettings::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for settings loading, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ZonectlSettings::default()))
        .merge(Toml::file("/etc/zonectl/zonectl.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("zonectl/zonectl.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("zonectl.toml"))
        .merge(env_provider())
}

/// Maps `ZONECTL_PLUGIN_PING_TIMEOUT_SECS` to `plugin.ping_timeout_secs`.
///
/// Only the first underscore after the section name becomes a dot; field
/// names keep their own underscores.
fn env_provider() -> Env {
    Env::prefixed("ZONECTL_")
        .ignore(&["PLUGIN_MAGIC_COOKIE"])
        .map(|key| {
            let mapped = key
                .as_str()
                .to_ascii_lowercase()
                .replacen("cli_", "cli.", 1)
                .replacen("plugin_", "plugin.", 1)
                .replacen("provision_", "provision.", 1);
            mapped.into()
        })
}

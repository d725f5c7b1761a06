// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Settings model for the zonectl CLI.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a typo in
//! `zonectl.toml` is reported instead of silently ignored.

use serde::{Deserialize, Serialize};

/// Identifier of the one recognised external plugin.
pub const CONNECT_PLUGIN: &str = "zonectl-connect";

/// Provision backend name for the compiled-in SPIRE Helm provisioner.
pub const BUILTIN_PROVISION: &str = "builtin";

/// Top-level zonectl settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ZonectlSettings {
    /// General CLI behaviour.
    #[serde(default)]
    pub cli: CliConfig,

    /// Plugin launch and handshake settings.
    #[serde(default)]
    pub plugin: PluginConfig,

    /// Deployment settings for the built-in provisioner.
    #[serde(default)]
    pub provision: ProvisionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path of the persisted trust zone document.
    #[serde(default = "default_data_file")]
    pub data_file: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_file: default_data_file(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_file() -> String {
    "zonectl-data.toml".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    /// Directory searched for external plugin binaries.
    #[serde(default = "default_plugin_dir")]
    pub dir: String,

    /// How long to wait for the plugin's handshake line.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// How long to wait for the first ping reply after connecting.
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    /// Which provisioner to use: `builtin` or `zonectl-connect`.
    #[serde(default = "default_provision_backend")]
    pub provision: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            dir: default_plugin_dir(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            provision: default_provision_backend(),
        }
    }
}

fn default_plugin_dir() -> String {
    dirs::home_dir()
        .map(|home| home.join(".zonectl/plugins").display().to_string())
        .unwrap_or_else(|| ".zonectl/plugins".to_string())
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_ping_timeout_secs() -> u64 {
    5
}

fn default_provision_backend() -> String {
    BUILTIN_PROVISION.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Upper bound for a whole `up` or `down` run.
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,

    #[serde(default = "default_helm_binary")]
    pub helm_binary: String,

    #[serde(default = "default_kubectl_binary")]
    pub kubectl_binary: String,

    /// Helm repository hosting the SPIRE charts.
    #[serde(default = "default_spire_repository_url")]
    pub spire_repository_url: String,

    #[serde(default = "default_spire_chart_version")]
    pub spire_chart_version: String,

    #[serde(default = "default_spire_crds_chart_version")]
    pub spire_crds_chart_version: String,

    /// Bound on waiting for the Helm repository index lock.
    #[serde(default = "default_repository_lock_timeout_secs")]
    pub repository_lock_timeout_secs: u64,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            deploy_timeout_secs: default_deploy_timeout_secs(),
            helm_binary: default_helm_binary(),
            kubectl_binary: default_kubectl_binary(),
            spire_repository_url: default_spire_repository_url(),
            spire_chart_version: default_spire_chart_version(),
            spire_crds_chart_version: default_spire_crds_chart_version(),
            repository_lock_timeout_secs: default_repository_lock_timeout_secs(),
        }
    }
}

fn default_deploy_timeout_secs() -> u64 {
    900
}

fn default_helm_binary() -> String {
    "helm".to_string()
}

fn default_kubectl_binary() -> String {
    "kubectl".to_string()
}

fn default_spire_repository_url() -> String {
    "https://spiffe.github.io/helm-charts-hardened/".to_string()
}

fn default_spire_chart_version() -> String {
    "0.21.0".to_string()
}

fn default_spire_crds_chart_version() -> String {
    "0.5.0".to_string()
}

fn default_repository_lock_timeout_secs() -> u64 {
    30
}

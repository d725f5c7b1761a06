// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chooses the backends a CLI invocation runs against.
//!
//! The persisted document lists the plugins to use. An empty list means the
//! local store; `zonectl-connect` means the external plugin, launched at most
//! once per invocation and shared by every command that needs it. Any other
//! entry is a configuration error, never a silent fallback.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};
use zonectl_config::{ZonectlSettings, BUILTIN_PROVISION, CONNECT_PLUGIN};
use zonectl_core::{DataSource, Provision, ZonectlError};
use zonectl_store::LocalDataSource;

use crate::client::{LaunchOptions, PluginClient};

/// Where entity operations are served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local,
    Plugin(String),
}

/// Map the configured plugin ids onto a backend.
pub fn select_backend(plugins: &[String]) -> Result<Backend, ZonectlError> {
    match plugins {
        [] => Ok(Backend::Local),
        [only] if only == CONNECT_PLUGIN => Ok(Backend::Plugin(only.clone())),
        [only] => Err(ZonectlError::Config(format!(
            "unknown plugin `{only}`, the only supported plugin is `{CONNECT_PLUGIN}`"
        ))),
        many => Err(ZonectlError::Config(format!(
            "only one plugin may be configured, found {}: {}",
            many.len(),
            many.join(", ")
        ))),
    }
}

pub struct PluginManager {
    settings: ZonectlSettings,
    local: Arc<LocalDataSource>,
    backend: OnceCell<Backend>,
    client: OnceCell<Arc<PluginClient>>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("backend", &self.backend.get())
            .field("plugin_running", &self.client.initialized())
            .finish()
    }
}

impl PluginManager {
    /// A manager over the document at `cli.data_file`.
    pub fn new(settings: ZonectlSettings) -> Result<Self, ZonectlError> {
        let local = zonectl_store::open_file(&settings.cli.data_file)?;
        Ok(Self::with_local(settings, Arc::new(local)))
    }

    pub fn with_local(settings: ZonectlSettings, local: Arc<LocalDataSource>) -> Self {
        Self {
            settings,
            local,
            backend: OnceCell::new(),
            client: OnceCell::new(),
        }
    }

    /// Create the persisted document, recording `plugins` for later invocations.
    pub async fn init(&self, plugins: Vec<String>) -> Result<(), ZonectlError> {
        select_backend(&plugins)?;
        self.local.init(plugins).await
    }

    /// The backend recorded in the document. Read once and cached.
    pub async fn backend(&self) -> Result<&Backend, ZonectlError> {
        self.backend
            .get_or_try_init(|| async {
                let config = self.local.config().await?;
                let backend = select_backend(&config.plugins)?;
                debug!(?backend, "selected data source backend");
                Ok::<_, ZonectlError>(backend)
            })
            .await
    }

    /// The data source every command of this invocation uses.
    pub async fn data_source(&self) -> Result<Arc<dyn DataSource>, ZonectlError> {
        match self.backend().await? {
            Backend::Local => Ok(self.local.clone() as Arc<dyn DataSource>),
            Backend::Plugin(_) => {
                let client = self.client().await?;
                Ok(Arc::new(client.datasource().await?) as Arc<dyn DataSource>)
            }
        }
    }

    /// The provisioner selected by `plugin.provision`.
    ///
    /// `builtin` is only called when the compiled-in provisioner is selected.
    pub async fn provision<F>(&self, builtin: F) -> Result<Arc<dyn Provision>, ZonectlError>
    where
        F: FnOnce() -> Arc<dyn Provision>,
    {
        match self.settings.plugin.provision.as_str() {
            BUILTIN_PROVISION => Ok(builtin()),
            CONNECT_PLUGIN => {
                let client = self.client().await?;
                Ok(Arc::new(client.provision().await?) as Arc<dyn Provision>)
            }
            other => Err(ZonectlError::Config(format!(
                "plugin.provision `{other}` is not recognised, expected `{BUILTIN_PROVISION}` or `{CONNECT_PLUGIN}`"
            ))),
        }
    }

    /// Path the external plugin is launched from.
    pub fn plugin_path(&self) -> PathBuf {
        PathBuf::from(&self.settings.plugin.dir).join(CONNECT_PLUGIN)
    }

    async fn client(&self) -> Result<&Arc<PluginClient>, ZonectlError> {
        self.client
            .get_or_try_init(|| async {
                let options = LaunchOptions::from(&self.settings.plugin);
                let client = PluginClient::launch(&self.plugin_path(), &options).await?;
                Ok::<_, ZonectlError>(Arc::new(client))
            })
            .await
    }

    /// Stop the external plugin if one was started.
    pub async fn shutdown(&self) {
        if let Some(client) = self.client.get() {
            info!(plugin = client.name(), "stopping plugin");
            client.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonectl_config::MemoryLoader;
    use zonectl_core::TrustZone;

    fn manager() -> PluginManager {
        let local = LocalDataSource::new(MemoryLoader::new()).unwrap();
        PluginManager::with_local(ZonectlSettings::default(), Arc::new(local))
    }

    #[test]
    fn empty_list_selects_local_store() {
        assert_eq!(select_backend(&[]).unwrap(), Backend::Local);
    }

    #[test]
    fn connect_plugin_selects_plugin() {
        assert_eq!(
            select_backend(&[CONNECT_PLUGIN.to_string()]).unwrap(),
            Backend::Plugin(CONNECT_PLUGIN.to_string())
        );
    }

    #[test]
    fn unknown_or_multiple_plugins_are_config_errors() {
        let err = select_backend(&["acme-store".to_string()]).unwrap_err();
        assert!(matches!(err, ZonectlError::Config(_)));
        assert!(err.to_string().contains("acme-store"));

        let err = select_backend(&[CONNECT_PLUGIN.to_string(), CONNECT_PLUGIN.to_string()])
            .unwrap_err();
        assert!(matches!(err, ZonectlError::Config(_)));
    }

    #[tokio::test]
    async fn init_rejects_unknown_plugin_without_writing() {
        let manager = manager();
        assert!(manager.init(vec!["acme-store".into()]).await.is_err());
        assert!(matches!(
            manager.backend().await.unwrap_err(),
            ZonectlError::NotInitialized
        ));
    }

    #[tokio::test]
    async fn local_backend_serves_the_local_store() {
        let manager = manager();
        manager.init(Vec::new()).await.unwrap();
        assert_eq!(manager.backend().await.unwrap(), &Backend::Local);

        let ds = manager.data_source().await.unwrap();
        ds.add_trust_zone(&TrustZone {
            name: "tz1".into(),
            trust_domain: "td1".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(ds.list_trust_zones().await.unwrap().len(), 1);
    }

    #[test]
    fn plugin_path_joins_plugin_dir() {
        let mut settings = ZonectlSettings::default();
        settings.plugin.dir = "/opt/zonectl/plugins".into();
        let local = LocalDataSource::new(MemoryLoader::new()).unwrap();
        let manager = PluginManager::with_local(settings, Arc::new(local));
        assert_eq!(
            manager.plugin_path(),
            PathBuf::from("/opt/zonectl/plugins/zonectl-connect")
        );
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn backend_is_read_once() {
        let manager = manager();
        manager.init(Vec::new()).await.unwrap();
        manager.backend().await.unwrap();
        manager.backend().await.unwrap();
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("selected data source backend"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one selection, logged {n}")),
            }
        });
    }

    #[tokio::test]
    async fn unknown_provision_backend_is_a_config_error() {
        let mut settings = ZonectlSettings::default();
        settings.plugin.provision = "terraform".into();
        let local = LocalDataSource::new(MemoryLoader::new()).unwrap();
        let manager = PluginManager::with_local(settings, Arc::new(local));
        let err = manager
            .provision(|| unreachable!("builtin provisioner must not be built"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ZonectlError::Config(_)));
        assert!(err.to_string().contains("terraform"));
    }
}

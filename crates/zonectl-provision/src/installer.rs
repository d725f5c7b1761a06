// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborators the provisioner drives: a chart installer and cluster access,
//! produced per cluster by an [`InstallerFactory`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use zonectl_core::{Cluster, DeployOptions, TrustZone, ZonectlError};

use crate::status::StatusSink;

/// The cluster an installer or cluster access handle acts on.
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub trust_zone: TrustZone,
    pub cluster: Cluster,
    pub options: DeployOptions,
}

/// Installs, upgrades and removes the identity stack's charts.
///
/// Every operation reports its own progress to the sink and stops the
/// underlying command when `cancel` fires.
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Register and refresh the chart repository.
    async fn add_repository(
        &self,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError>;

    /// First install: supporting resources, then the main chart.
    async fn execute(
        &self,
        values: &Value,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError>;

    /// Re-apply the main chart once federation bundles are known.
    async fn execute_post_install_upgrade(
        &self,
        values: &Value,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError>;

    /// Upgrade an existing installation in place.
    async fn execute_upgrade(
        &self,
        values: &Value,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError>;

    async fn execute_uninstall(
        &self,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError>;

    async fn check_if_already_installed(
        &self,
        cancel: &CancellationToken,
    ) -> Result<bool, ZonectlError>;
}

/// A trust zone's server bundle and where it is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBundle {
    pub bundle: String,
    pub endpoint_url: Option<String>,
}

/// Direct access to a cluster.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Run the cluster CLI with `args`, returning stdout.
    async fn run_command(
        &self,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<String, ZonectlError>;

    async fn get_bundle(&self, cancel: &CancellationToken) -> Result<ServerBundle, ZonectlError>;

    async fn wait_for_server_ready(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError>;
}

/// Produces the collaborators for each cluster.
pub trait InstallerFactory: Send + Sync {
    /// Confirms the tools behind the collaborators are available.
    fn validate(&self) -> Result<(), ZonectlError> {
        Ok(())
    }

    /// Installer used only for repository preparation.
    fn repository(&self, options: &DeployOptions) -> Arc<dyn ChartInstaller>;

    fn installer(&self, target: &InstallTarget) -> Result<Arc<dyn ChartInstaller>, ZonectlError>;

    fn cluster_access(
        &self,
        target: &InstallTarget,
    ) -> Result<Arc<dyn ClusterAccess>, ZonectlError>;
}

/// Refuse to remove a cluster whose identity stack is still installed.
///
/// `force` skips the check.
pub async fn ensure_not_deployed(
    installer: &dyn ChartInstaller,
    cluster: &Cluster,
    force: bool,
) -> Result<(), ZonectlError> {
    if force {
        return Ok(());
    }
    if installer
        .check_if_already_installed(&CancellationToken::new())
        .await?
    {
        return Err(ZonectlError::FailedPrecondition(format!(
            "cluster {} in trust zone {} is still deployed, run `zonectl down` first or pass --force",
            cluster.name, cluster.trust_zone
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Installed(bool);

    #[async_trait]
    impl ChartInstaller for Installed {
        async fn add_repository(
            &self,
            _sink: &StatusSink,
            _cancel: &CancellationToken,
        ) -> Result<(), ZonectlError> {
            Ok(())
        }

        async fn execute(
            &self,
            _values: &Value,
            _sink: &StatusSink,
            _cancel: &CancellationToken,
        ) -> Result<(), ZonectlError> {
            Ok(())
        }

        async fn execute_post_install_upgrade(
            &self,
            _values: &Value,
            _sink: &StatusSink,
            _cancel: &CancellationToken,
        ) -> Result<(), ZonectlError> {
            Ok(())
        }

        async fn execute_upgrade(
            &self,
            _values: &Value,
            _sink: &StatusSink,
            _cancel: &CancellationToken,
        ) -> Result<(), ZonectlError> {
            Ok(())
        }

        async fn execute_uninstall(
            &self,
            _sink: &StatusSink,
            _cancel: &CancellationToken,
        ) -> Result<(), ZonectlError> {
            Ok(())
        }

        async fn check_if_already_installed(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<bool, ZonectlError> {
            Ok(self.0)
        }
    }

    fn cluster() -> Cluster {
        Cluster {
            name: "local1".into(),
            trust_zone: "tz1".into(),
            kubernetes_context: "kind-local1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn deployed_cluster_is_guarded_unless_forced() {
        let err = ensure_not_deployed(&Installed(true), &cluster(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ZonectlError::FailedPrecondition(_)));
        assert!(err.to_string().contains("local1"));

        ensure_not_deployed(&Installed(true), &cluster(), true)
            .await
            .unwrap();
        ensure_not_deployed(&Installed(false), &cluster(), false)
            .await
            .unwrap();
    }
}

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`ChartInstaller`] backed by the `helm` CLI.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zonectl_config::model::ProvisionConfig;
use zonectl_core::{DeployOptions, ZonectlError};

use crate::command::run_command;
use crate::installer::{ChartInstaller, ClusterAccess, InstallTarget, InstallerFactory};
use crate::kubectl::KubectlAccess;
use crate::lock::{default_lock_path, RepositoryLock};
use crate::status::{global, global_error, stage, StatusBuilder, StatusSink};

pub const REPOSITORY_NAME: &str = "spire";
pub const SPIRE_RELEASE: &str = "spire";
pub const SPIRE_CRDS_RELEASE: &str = "spire-crds";
pub const SPIRE_NAMESPACE: &str = "spire-mgmt";

/// Runs `helm` against one cluster, or against no cluster for repository work.
#[derive(Debug, Clone)]
pub struct HelmCli {
    config: ProvisionConfig,
    lock_path: PathBuf,
    kube_config: Option<String>,
    kube_context: Option<String>,
    status: StatusBuilder,
}

impl HelmCli {
    /// An installer that can only prepare the repository.
    pub fn repository(config: ProvisionConfig, options: &DeployOptions) -> Self {
        Self {
            config,
            lock_path: default_lock_path(),
            kube_config: options.kube_config.clone(),
            kube_context: None,
            status: StatusBuilder::new("", ""),
        }
    }

    pub fn for_target(config: ProvisionConfig, target: &InstallTarget) -> Self {
        Self {
            config,
            lock_path: default_lock_path(),
            kube_config: target.options.kube_config.clone(),
            kube_context: Some(target.cluster.kubernetes_context.clone()),
            status: StatusBuilder::new(&target.trust_zone.name, &target.cluster.name),
        }
    }

    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = path.into();
        self
    }

    async fn helm(&self, args: &[&str], cancel: &CancellationToken) -> Result<String, ZonectlError> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        if let Some(kube_config) = &self.kube_config {
            full.push("--kubeconfig".into());
            full.push(kube_config.clone());
        }
        if let Some(context) = &self.kube_context {
            full.push("--kube-context".into());
            full.push(context.clone());
        }
        run_command(&self.config.helm_binary, &full, cancel).await
    }

    fn require_cluster(&self) -> Result<(), ZonectlError> {
        if self.kube_context.is_none() {
            return Err(ZonectlError::Internal(
                "helm installer has no cluster to act on".into(),
            ));
        }
        Ok(())
    }

    async fn install_crds(&self, cancel: &CancellationToken) -> Result<(), ZonectlError> {
        let chart = format!("{REPOSITORY_NAME}/{SPIRE_CRDS_RELEASE}");
        self.helm(
            &[
                "upgrade",
                "--install",
                SPIRE_CRDS_RELEASE,
                &chart,
                "--version",
                &self.config.spire_crds_chart_version,
                "--namespace",
                SPIRE_NAMESPACE,
                "--create-namespace",
                "--wait",
            ],
            cancel,
        )
        .await
        .map(|_| ())
    }

    async fn apply_spire(
        &self,
        values: &Value,
        install: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError> {
        let values_file = write_values(values)?;
        let values_path = values_file.path().display().to_string();
        let chart = format!("{REPOSITORY_NAME}/{SPIRE_RELEASE}");

        let mut args = vec!["upgrade"];
        if install {
            args.push("--install");
        }
        args.extend([
            SPIRE_RELEASE,
            chart.as_str(),
            "--version",
            self.config.spire_chart_version.as_str(),
            "--namespace",
            SPIRE_NAMESPACE,
            "--values",
            values_path.as_str(),
        ]);
        self.helm(&args, cancel).await.map(|_| ())
    }
}

/// Values go to a temp file removed once the command has run. JSON is valid YAML.
fn write_values(values: &Value) -> Result<NamedTempFile, ZonectlError> {
    let storage = |e: std::io::Error| ZonectlError::Storage {
        source: Box::new(e),
    };
    let mut file = tempfile::Builder::new()
        .prefix("zonectl-values-")
        .suffix(".json")
        .tempfile()
        .map_err(storage)?;
    let body = serde_json::to_vec_pretty(values)
        .map_err(|e| ZonectlError::Internal(format!("failed to encode helm values: {e}")))?;
    file.write_all(&body).map_err(storage)?;
    file.flush().map_err(storage)?;
    Ok(file)
}

/// Reports `result` as the closing status of an operation.
async fn finish(
    sink: &StatusSink,
    sb: &StatusBuilder,
    stage: &str,
    action: &str,
    result: Result<(), ZonectlError>,
) -> Result<(), ZonectlError> {
    match result {
        Ok(()) => sink.send(sb.done(stage, action)).await,
        Err(e) => {
            sink.send(sb.error(stage, action, &e)).await?;
            Err(e)
        }
    }
}

#[async_trait]
impl ChartInstaller for HelmCli {
    async fn add_repository(
        &self,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError> {
        sink.send(global(stage::PREPARING, "Adding SPIRE Helm repository", false))
            .await?;

        let result = async {
            let timeout = Duration::from_secs(self.config.repository_lock_timeout_secs);
            let _lock = RepositoryLock::acquire(&self.lock_path, timeout, cancel).await?;
            self.helm(
                &[
                    "repo",
                    "add",
                    REPOSITORY_NAME,
                    &self.config.spire_repository_url,
                    "--force-update",
                ],
                cancel,
            )
            .await?;
            self.helm(&["repo", "update", REPOSITORY_NAME], cancel).await?;
            Ok::<(), ZonectlError>(())
        }
        .await;

        match result {
            Ok(()) => {
                sink.send(global(stage::PREPARED, "Added SPIRE Helm repository", true))
                    .await
            }
            Err(e) => {
                sink.send(global_error(
                    stage::PREPARED,
                    "Failed to add SPIRE Helm repository",
                    &e,
                ))
                .await?;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        values: &Value,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError> {
        self.require_cluster()?;
        let sb = &self.status;

        sink.send(sb.progress(stage::INSTALLING, "Installing SPIRE CRDs"))
            .await?;
        if let Err(e) = self.install_crds(cancel).await {
            sink.send(sb.error(stage::INSTALLING, "Failed to install SPIRE CRDs", &e))
                .await?;
            return Err(e);
        }

        sink.send(sb.progress(stage::INSTALLING, "Installing SPIRE chart"))
            .await?;
        let result = self.apply_spire(values, true, cancel).await;
        finish(sink, sb, stage::INSTALLED, "Installed SPIRE chart", result).await
    }

    async fn execute_post_install_upgrade(
        &self,
        values: &Value,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError> {
        self.require_cluster()?;
        let sb = &self.status;
        sink.send(sb.progress(stage::CONFIGURING, "Applying federation configuration"))
            .await?;
        let result = self.apply_spire(values, false, cancel).await;
        finish(sink, sb, stage::CONFIGURED, "Applied federation configuration", result).await
    }

    async fn execute_upgrade(
        &self,
        values: &Value,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError> {
        self.require_cluster()?;
        let sb = &self.status;
        sink.send(sb.progress(stage::UPGRADING, "Upgrading SPIRE chart"))
            .await?;
        let result = async {
            self.install_crds(cancel).await?;
            self.apply_spire(values, false, cancel).await
        }
        .await;
        finish(sink, sb, stage::UPGRADED, "Upgraded SPIRE chart", result).await
    }

    async fn execute_uninstall(
        &self,
        sink: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError> {
        self.require_cluster()?;
        let sb = &self.status;
        sink.send(sb.progress(stage::UNINSTALLING, "Uninstalling SPIRE chart"))
            .await?;
        let result = async {
            self.helm(
                &["uninstall", SPIRE_RELEASE, "--namespace", SPIRE_NAMESPACE, "--wait"],
                cancel,
            )
            .await?;
            self.helm(
                &["uninstall", SPIRE_CRDS_RELEASE, "--namespace", SPIRE_NAMESPACE],
                cancel,
            )
            .await?;
            Ok::<(), ZonectlError>(())
        }
        .await;
        finish(sink, sb, stage::UNINSTALLED, "Uninstalled SPIRE chart", result).await
    }

    async fn check_if_already_installed(
        &self,
        cancel: &CancellationToken,
    ) -> Result<bool, ZonectlError> {
        self.require_cluster()?;
        let releases = self
            .helm(&["list", "--namespace", SPIRE_NAMESPACE, "--short"], cancel)
            .await?;
        let installed = releases.lines().any(|line| line.trim() == SPIRE_RELEASE);
        debug!(installed, "checked for an existing SPIRE release");
        Ok(installed)
    }
}

/// Builds [`HelmCli`] and [`KubectlAccess`] from the provisioning settings.
#[derive(Debug, Clone, Default)]
pub struct CliInstallerFactory {
    config: ProvisionConfig,
    lock_path: Option<PathBuf>,
}

impl CliInstallerFactory {
    pub fn new(config: ProvisionConfig) -> Self {
        Self {
            config,
            lock_path: None,
        }
    }

    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    fn helm(&self, helm: HelmCli) -> HelmCli {
        match &self.lock_path {
            Some(path) => helm.with_lock_path(path.clone()),
            None => helm,
        }
    }
}

/// Whether `binary` names an existing file, directly or through `PATH`.
fn resolvable(binary: &str) -> bool {
    let path = std::path::Path::new(binary);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

impl InstallerFactory for CliInstallerFactory {
    fn validate(&self) -> Result<(), ZonectlError> {
        for binary in [&self.config.helm_binary, &self.config.kubectl_binary] {
            if !resolvable(binary) {
                return Err(ZonectlError::FailedPrecondition(format!(
                    "`{binary}` was not found, install it or set its path in the provision settings"
                )));
            }
        }
        Ok(())
    }

    fn repository(&self, options: &DeployOptions) -> Arc<dyn ChartInstaller> {
        Arc::new(self.helm(HelmCli::repository(self.config.clone(), options)))
    }

    fn installer(&self, target: &InstallTarget) -> Result<Arc<dyn ChartInstaller>, ZonectlError> {
        Ok(Arc::new(
            self.helm(HelmCli::for_target(self.config.clone(), target)),
        ))
    }

    fn cluster_access(
        &self,
        target: &InstallTarget,
    ) -> Result<Arc<dyn ClusterAccess>, ZonectlError> {
        Ok(Arc::new(KubectlAccess::new(
            &self.config.kubectl_binary,
            target,
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::status::status_channel;
    use futures::StreamExt;
    use std::os::unix::fs::PermissionsExt;
    use zonectl_core::{Cluster, Status, TrustZone};

    /// A fake `helm` that appends its arguments to `calls` and succeeds.
    fn fake_helm(dir: &tempfile::TempDir, script_body: &str) -> (String, PathBuf) {
        let calls = dir.path().join("calls");
        let path = dir.path().join("helm");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh").unwrap();
            writeln!(file, "echo \"$@\" >> {}", calls.display()).unwrap();
            file.write_all(script_body.as_bytes()).unwrap();
            file.sync_all().unwrap();
        }
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (path.display().to_string(), calls)
    }

    fn target() -> InstallTarget {
        InstallTarget {
            trust_zone: TrustZone {
                name: "tz1".into(),
                trust_domain: "td1".into(),
                ..Default::default()
            },
            cluster: Cluster {
                name: "local1".into(),
                trust_zone: "tz1".into(),
                kubernetes_context: "kind-local1".into(),
                ..Default::default()
            },
            options: DeployOptions::default(),
        }
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn execute_installs_crds_then_chart_with_values() {
        let dir = tempfile::tempdir().unwrap();
        let (helm, calls) = fake_helm(&dir, "exit 0\n");
        let config = ProvisionConfig {
            helm_binary: helm,
            ..ProvisionConfig::default()
        };
        let installer = HelmCli::for_target(config, &target());

        let (sink, stream) = status_channel(8);
        installer
            .execute(&serde_json::json!({"global": {}}), &sink, &CancellationToken::new())
            .await
            .unwrap();
        drop(sink);
        let statuses: Vec<Status> = stream.collect().await;
        let stages: Vec<&str> = statuses.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(stages, vec!["Installing", "Installing", "Installed"]);

        let recorded = std::fs::read_to_string(calls).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("upgrade --install spire-crds spire/spire-crds"));
        assert!(lines[1].contains("--values"));
        assert!(lines[1].ends_with("--kube-context kind-local1"));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn failed_chart_reports_a_done_error() {
        let dir = tempfile::tempdir().unwrap();
        let (helm, _calls) = fake_helm(
            &dir,
            "case \"$3\" in spire) echo 'chart exploded' >&2; exit 1;; esac\n",
        );
        let config = ProvisionConfig {
            helm_binary: helm,
            ..ProvisionConfig::default()
        };
        let installer = HelmCli::for_target(config, &target());

        let (sink, stream) = status_channel(8);
        let err = installer
            .execute(&serde_json::json!({}), &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chart exploded"));
        drop(sink);
        let statuses: Vec<Status> = stream.collect().await;
        assert!(statuses.last().unwrap().is_failure());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn repository_is_added_under_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let (helm, calls) = fake_helm(&dir, "exit 0\n");
        let config = ProvisionConfig {
            helm_binary: helm,
            ..ProvisionConfig::default()
        };
        let lock = dir.path().join("repo.lock");
        let installer =
            HelmCli::repository(config, &DeployOptions::default()).with_lock_path(&lock);

        let (sink, stream) = status_channel(8);
        installer
            .add_repository(&sink, &CancellationToken::new())
            .await
            .unwrap();
        drop(sink);
        let stages: Vec<String> = stream.map(|s| s.stage).collect().await;
        assert_eq!(stages, vec!["Preparing", "Prepared"]);
        assert!(!lock.exists(), "lock must be released");
        let recorded = std::fs::read_to_string(calls).unwrap();
        assert!(recorded.starts_with("repo add spire "));
    }

    #[tokio::test]
    async fn repository_installer_refuses_cluster_work() {
        let installer = HelmCli::repository(ProvisionConfig::default(), &DeployOptions::default());
        let err = installer
            .check_if_already_installed(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ZonectlError::Internal(_)));
    }

    #[test]
    fn validate_requires_both_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let (helm, _) = fake_helm(&dir, "");
        let factory = CliInstallerFactory::new(ProvisionConfig {
            helm_binary: helm.clone(),
            kubectl_binary: dir.path().join("kubectl").display().to_string(),
            ..Default::default()
        });
        let err = factory.validate().unwrap_err();
        assert!(matches!(err, ZonectlError::FailedPrecondition(_)));
        assert!(err.to_string().contains("kubectl"));

        let factory = CliInstallerFactory::new(ProvisionConfig {
            kubectl_binary: helm.clone(),
            helm_binary: helm,
            ..Default::default()
        });
        factory.validate().unwrap();
    }
}

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The built-in provisioner: SPIRE installed with Helm, zone by zone.
//!
//! A deploy runs in phases. Each phase walks the trust zones in list order
//! and a zone that fails in one phase is left out of the phases after it;
//! the other zones carry on.
//!
//! 1. prepare the chart repository (once)
//! 2. install or upgrade each zone's charts
//! 3. wait for each zone's server
//! 4. fetch each zone's bundle and record it in the data source
//! 5. re-apply each zone's chart with federation configuration
//! 6. wait again
//!
//! Work happens on a background task that writes to a bounded channel. The
//! task stops when the caller cancels, when the consumer drops the stream,
//! or when the deploy timeout elapses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zonectl_config::model::ProvisionConfig;
use zonectl_core::{
    AttestationPolicy, DataSource, DeployOptions, Provision, StatusStream, TrustZone,
    ZonectlError,
};

use crate::helm::CliInstallerFactory;
use crate::installer::{ChartInstaller, ClusterAccess, InstallTarget, InstallerFactory};
use crate::status::{
    global_error, stage, status_channel, StatusBuilder, StatusSink, STATUS_BUFFER,
};
use crate::values::ValuesGenerator;

/// Bound on each wait for a SPIRE server rollout.
const SERVER_READY_TIMEOUT: Duration = Duration::from_secs(300);

pub struct SpireHelm {
    factory: Arc<dyn InstallerFactory>,
    deploy_timeout: Duration,
}

impl SpireHelm {
    /// A provisioner shelling out to the configured `helm` and `kubectl`.
    pub fn new(config: ProvisionConfig) -> Self {
        let deploy_timeout = Duration::from_secs(config.deploy_timeout_secs);
        Self {
            factory: Arc::new(CliInstallerFactory::new(config)),
            deploy_timeout,
        }
    }

    pub fn with_factory(factory: Arc<dyn InstallerFactory>, deploy_timeout: Duration) -> Self {
        Self {
            factory,
            deploy_timeout,
        }
    }

    fn spawn<F, Fut>(&self, cancel: CancellationToken, work: F) -> StatusStream
    where
        F: FnOnce(StatusSink, CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), ZonectlError>> + Send + 'static,
    {
        let (sink, stream) = status_channel(STATUS_BUFFER);
        let timeout = self.deploy_timeout;
        tokio::spawn(async move {
            let run_cancel = cancel.child_token();
            let run = work(sink.clone(), run_cancel.clone());
            tokio::select! {
                result = run => match result {
                    Ok(()) => debug!("provisioning finished"),
                    Err(ZonectlError::Cancelled) => debug!("provisioning stopped early"),
                    Err(e) => warn!(error = %e, "provisioning aborted"),
                },
                _ = cancel.cancelled() => {
                    info!("provisioning cancelled");
                }
                _ = tokio::time::sleep(timeout) => {
                    run_cancel.cancel();
                    let err = ZonectlError::Timeout { duration: timeout };
                    let timed_out =
                        global_error(stage::TIMED_OUT, "Provisioning did not finish in time", &err);
                    let _ = sink.send(timed_out).await;
                }
            }
        });
        stream
    }
}

/// One cluster's collaborators and whether it is still in the running.
struct ZoneRun {
    target: InstallTarget,
    installer: Arc<dyn ChartInstaller>,
    access: Arc<dyn ClusterAccess>,
    status: StatusBuilder,
    healthy: bool,
}

struct Plan {
    trust_zones: Vec<TrustZone>,
    policies: Vec<AttestationPolicy>,
    zones: Vec<ZoneRun>,
}

impl Plan {
    async fn load(
        factory: &dyn InstallerFactory,
        data_source: &dyn DataSource,
        options: &DeployOptions,
    ) -> Result<Self, ZonectlError> {
        let trust_zones = data_source.list_trust_zones().await?;
        let policies = data_source.list_attestation_policies().await?;

        let mut zones = Vec::new();
        for tz in &trust_zones {
            let Some(cluster) = tz.clusters.first() else {
                debug!(trust_zone = %tz.name, "trust zone has no cluster, skipping");
                continue;
            };
            let target = InstallTarget {
                trust_zone: tz.clone(),
                cluster: cluster.clone(),
                options: options.clone(),
            };
            zones.push(ZoneRun {
                installer: factory.installer(&target)?,
                access: factory.cluster_access(&target)?,
                status: StatusBuilder::new(&tz.name, &cluster.name),
                target,
                healthy: true,
            });
        }
        Ok(Self {
            trust_zones,
            policies,
            zones,
        })
    }

    fn values(&self, zone: &ZoneRun) -> Result<serde_json::Value, ZonectlError> {
        let tz = self
            .trust_zones
            .iter()
            .find(|tz| tz.name == zone.target.trust_zone.name)
            .unwrap_or(&zone.target.trust_zone);
        ValuesGenerator::new(tz, &zone.target.cluster, &self.trust_zones, &self.policies).generate()
    }
}

/// Report a stage failure. Only a gone consumer is propagated.
async fn report(
    sink: &StatusSink,
    zone: &mut ZoneRun,
    stage: &str,
    action: &str,
    error: ZonectlError,
) -> Result<(), ZonectlError> {
    warn!(trust_zone = %zone.target.trust_zone.name, %stage, error = %error, "stage failed");
    zone.healthy = false;
    if matches!(error, ZonectlError::Cancelled) {
        return Err(error);
    }
    sink.send(zone.status.error(stage, action, &error)).await
}

/// Installer failures have already been written to the sink by the installer.
fn installer_failed(zone: &mut ZoneRun, error: ZonectlError) -> Result<(), ZonectlError> {
    warn!(trust_zone = %zone.target.trust_zone.name, error = %error, "chart operation failed");
    zone.healthy = false;
    match error {
        ZonectlError::Cancelled => Err(error),
        _ => Ok(()),
    }
}

async fn wait_ready(
    plan: &mut Plan,
    sink: &StatusSink,
    cancel: &CancellationToken,
) -> Result<(), ZonectlError> {
    for zone in plan.zones.iter_mut().filter(|z| z.healthy) {
        sink.send(zone.status.progress(stage::WAITING, "Waiting for SPIRE server"))
            .await?;
        match zone
            .access
            .wait_for_server_ready(SERVER_READY_TIMEOUT, cancel)
            .await
        {
            Ok(()) => {
                sink.send(zone.status.done(stage::READY, "SPIRE server ready"))
                    .await?
            }
            Err(e) => report(sink, zone, stage::READY, "SPIRE server not ready", e).await?,
        }
    }
    Ok(())
}

async fn run_deploy(
    factory: Arc<dyn InstallerFactory>,
    data_source: Arc<dyn DataSource>,
    options: DeployOptions,
    mut plan: Plan,
    sink: StatusSink,
    cancel: CancellationToken,
) -> Result<(), ZonectlError> {
    // Nothing can be installed without the charts.
    factory
        .repository(&options)
        .add_repository(&sink, &cancel)
        .await?;

    for i in 0..plan.zones.len() {
        let values = match plan.values(&plan.zones[i]) {
            Ok(values) => values,
            Err(e) => {
                let zone = &mut plan.zones[i];
                report(&sink, zone, stage::INSTALLING, "Failed to generate Helm values", e).await?;
                continue;
            }
        };
        let zone = &mut plan.zones[i];
        let installed = match zone.installer.check_if_already_installed(&cancel).await {
            Ok(installed) => installed,
            Err(e) => {
                report(&sink, zone, stage::INSTALLING, "Failed to inspect existing release", e)
                    .await?;
                continue;
            }
        };
        let result = if installed {
            zone.installer.execute_upgrade(&values, &sink, &cancel).await
        } else {
            zone.installer.execute(&values, &sink, &cancel).await
        };
        if let Err(e) = result {
            installer_failed(zone, e)?;
        }
    }

    if !options.skip_wait {
        wait_ready(&mut plan, &sink, &cancel).await?;
    }

    // Record every bundle before configuring, so each zone sees all its peers.
    for i in 0..plan.zones.len() {
        if !plan.zones[i].healthy {
            continue;
        }
        let zone = &mut plan.zones[i];
        let bundle = match zone.access.get_bundle(&cancel).await {
            Ok(bundle) => bundle,
            Err(e) => {
                report(&sink, zone, stage::CONFIGURING, "Failed to fetch trust bundle", e).await?;
                continue;
            }
        };
        let name = zone.target.trust_zone.name.clone();
        let Some(tz) = plan.trust_zones.iter_mut().find(|tz| tz.name == name) else {
            continue;
        };
        tz.bundle = Some(bundle.bundle);
        if bundle.endpoint_url.is_some() {
            tz.bundle_endpoint_url = bundle.endpoint_url;
        }
        let updated = tz.clone();
        if let Err(e) = data_source.update_trust_zone(&updated).await {
            let zone = &mut plan.zones[i];
            report(&sink, zone, stage::CONFIGURING, "Failed to record trust bundle", e).await?;
        }
    }

    for i in 0..plan.zones.len() {
        if !plan.zones[i].healthy {
            continue;
        }
        let values = match plan.values(&plan.zones[i]) {
            Ok(values) => values,
            Err(e) => {
                let zone = &mut plan.zones[i];
                report(&sink, zone, stage::CONFIGURING, "Failed to generate Helm values", e).await?;
                continue;
            }
        };
        let zone = &mut plan.zones[i];
        if let Err(e) = zone
            .installer
            .execute_post_install_upgrade(&values, &sink, &cancel)
            .await
        {
            installer_failed(zone, e)?;
        }
    }

    if !options.skip_wait {
        wait_ready(&mut plan, &sink, &cancel).await?;
    }
    info!(zones = plan.zones.len(), "deploy complete");
    Ok(())
}

async fn run_tear_down(
    mut plan: Plan,
    sink: StatusSink,
    cancel: CancellationToken,
) -> Result<(), ZonectlError> {
    for zone in plan.zones.iter_mut() {
        if let Err(e) = zone.installer.execute_uninstall(&sink, &cancel).await {
            installer_failed(zone, e)?;
        }
    }
    info!(zones = plan.zones.len(), "tear down complete");
    Ok(())
}

#[async_trait]
impl Provision for SpireHelm {
    async fn validate(&self) -> Result<(), ZonectlError> {
        self.factory.validate()
    }

    async fn deploy(
        &self,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        let plan = Plan::load(self.factory.as_ref(), data_source.as_ref(), &options).await?;
        info!(zones = plan.zones.len(), "starting deploy");
        let factory = self.factory.clone();
        Ok(self.spawn(cancel, move |sink, cancel| {
            run_deploy(factory, data_source, options, plan, sink, cancel)
        }))
    }

    async fn tear_down(
        &self,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        let plan = Plan::load(self.factory.as_ref(), data_source.as_ref(), &options).await?;
        info!(zones = plan.zones.len(), "starting tear down");
        Ok(self.spawn(cancel, move |sink, cancel| run_tear_down(plan, sink, cancel)))
    }
}

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`ClusterAccess`] backed by the `kubectl` CLI.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zonectl_core::ZonectlError;

use crate::command::run_command;
use crate::installer::{ClusterAccess, InstallTarget, ServerBundle};
use crate::values::BUNDLE_ENDPOINT_PORT;

const SERVER_NAMESPACE: &str = "spire-server";
const SERVER_STATEFULSET: &str = "statefulset/spire-server";
const SERVER_POD: &str = "spire-server-0";
const SERVER_CONTAINER: &str = "spire-server";
const SERVER_SERVICE: &str = "spire-server";

#[derive(Debug, Clone)]
pub struct KubectlAccess {
    binary: String,
    context: String,
    kube_config: Option<String>,
}

impl KubectlAccess {
    pub fn new(binary: &str, target: &InstallTarget) -> Self {
        Self {
            binary: binary.to_string(),
            context: target.cluster.kubernetes_context.clone(),
            kube_config: target.options.kube_config.clone(),
        }
    }

    fn args(&self, args: &[&str]) -> Vec<String> {
        let mut full = vec!["--context".to_string(), self.context.clone()];
        if let Some(kube_config) = &self.kube_config {
            full.push("--kubeconfig".into());
            full.push(kube_config.clone());
        }
        full.extend(args.iter().map(|s| s.to_string()));
        full
    }

    async fn bundle_endpoint_url(&self, cancel: &CancellationToken) -> Option<String> {
        let ip = self
            .run_command(
                &[
                    "get",
                    "service",
                    SERVER_SERVICE,
                    "--namespace",
                    SERVER_NAMESPACE,
                    "--output",
                    "jsonpath={.status.loadBalancer.ingress[0].ip}",
                ],
                cancel,
            )
            .await;
        match ip {
            Ok(ip) if !ip.trim().is_empty() => {
                Some(format!("https://{}:{BUNDLE_ENDPOINT_PORT}", ip.trim()))
            }
            Ok(_) => None,
            Err(e) => {
                debug!(context = %self.context, error = %e, "bundle endpoint not published");
                None
            }
        }
    }
}

#[async_trait]
impl ClusterAccess for KubectlAccess {
    async fn run_command(
        &self,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<String, ZonectlError> {
        run_command(&self.binary, &self.args(args), cancel).await
    }

    async fn get_bundle(&self, cancel: &CancellationToken) -> Result<ServerBundle, ZonectlError> {
        let bundle = self
            .run_command(
                &[
                    "exec",
                    "--namespace",
                    SERVER_NAMESPACE,
                    SERVER_POD,
                    "--container",
                    SERVER_CONTAINER,
                    "--",
                    "/opt/spire/bin/spire-server",
                    "bundle",
                    "show",
                    "-format",
                    "pem",
                ],
                cancel,
            )
            .await?;
        if bundle.trim().is_empty() {
            return Err(ZonectlError::Provision(format!(
                "SPIRE server in context {} returned an empty bundle",
                self.context
            )));
        }
        Ok(ServerBundle {
            bundle,
            endpoint_url: self.bundle_endpoint_url(cancel).await,
        })
    }

    async fn wait_for_server_ready(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ZonectlError> {
        let timeout_arg = format!("--timeout={}s", timeout.as_secs().max(1));
        self.run_command(
            &[
                "rollout",
                "status",
                SERVER_STATEFULSET,
                "--namespace",
                SERVER_NAMESPACE,
                &timeout_arg,
            ],
            cancel,
        )
        .await
        .map(|_| ())
    }
}

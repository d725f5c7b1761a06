// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The provisioning contract.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::ZonectlError;
use crate::traits::datasource::DataSource;
use crate::types::{DeployOptions, Status};

/// Progress of a deploy or tear-down. Ends when the operation finishes.
pub type StatusStream = Pin<Box<dyn Stream<Item = Status> + Send>>;

/// Installs and removes the identity stack across all trust zones.
///
/// Failures inside a stage are reported as a `done` [`Status`] carrying an
/// error, not as an `Err`; an `Err` means the operation could not start.
/// Cancelling `cancel` stops in-flight work and closes the stream.
#[async_trait]
pub trait Provision: Send + Sync + 'static {
    /// Confirms the provisioner can run (binaries present, plugin reachable).
    async fn validate(&self) -> Result<(), ZonectlError>;

    async fn deploy(
        &self,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError>;

    async fn tear_down(
        &self,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError>;
}

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in provisioning for zonectl.
//!
//! [`SpireHelm`] turns the configured trust zones into SPIRE installations,
//! one per cluster, by driving `helm` and `kubectl`. The collaborators sit
//! behind [`ChartInstaller`], [`ClusterAccess`] and [`InstallerFactory`] so the
//! orchestration can run against fakes.

pub mod command;
pub mod helm;
pub mod installer;
pub mod kubectl;
pub mod lock;
pub mod spire;
pub mod status;
pub mod values;

pub use helm::{CliInstallerFactory, HelmCli};
pub use installer::{
    ensure_not_deployed, ChartInstaller, ClusterAccess, InstallTarget, InstallerFactory,
    ServerBundle,
};
pub use kubectl::KubectlAccess;
pub use lock::RepositoryLock;
pub use spire::SpireHelm;
pub use status::{status_channel, StatusBuilder, StatusSink};
pub use values::ValuesGenerator;

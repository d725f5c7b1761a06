// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin mode: serve this process's local store and provisioner to the host
//! that launched it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use zonectl_config::ZonectlSettings;
use zonectl_core::ZonectlError;
use zonectl_plugin::{ServiceRegistry, SERVICE_VERSION};
use zonectl_provision::SpireHelm;

pub(crate) async fn run_plugin(settings: ZonectlSettings) -> Result<(), ZonectlError> {
    let store = zonectl_store::open_file(&settings.cli.data_file)?;
    // A fresh plugin creates its own document on first use.
    store.init(Vec::new()).await?;

    let mut registry = ServiceRegistry::new();
    registry.register_data_source(SERVICE_VERSION, "trust zone store", Arc::new(store));
    registry.register_provision(
        SERVICE_VERSION,
        "SPIRE Helm provisioner",
        Arc::new(SpireHelm::new(settings.provision.clone())),
    );
    info!(data_file = %settings.cli.data_file, services = registry.len(), "serving plugin");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    zonectl_plugin::serve(registry, cancel).await
}

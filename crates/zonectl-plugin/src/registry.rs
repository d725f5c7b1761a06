// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of the services one side offers to its peer.
//!
//! Entries are keyed by service name and carry a single supported version.
//! `Controller.Dispense` answers from here: an unknown name, or a version
//! other than the one registered, is refused with `unimplemented` before the
//! host makes a single call on the service.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use zonectl_core::{DataSource, Provision, ZonectlError};

use crate::broker::Broker;
use crate::datasource::DataSourceService;
use crate::provision::ProvisionService;
use crate::transport;

/// Service name of the entity store.
pub const DATASOURCE_SERVICE: &str = "datasource";

/// Service name of the provisioner.
pub const PROVISION_SERVICE: &str = "provision";

/// Version spoken by both built-in services.
pub const SERVICE_VERSION: u32 = 1;

enum Offered {
    DataSource(Arc<dyn DataSource>),
    Provision(Arc<dyn Provision>),
}

/// A single entry in the service registry.
pub struct ServiceEntry {
    pub name: String,
    pub version: u32,
    pub description: String,
    offered: Offered,
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("description", &self.description)
            .finish()
    }
}

impl std::fmt::Display for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: HashMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `store` as the entity store, replacing any previous one.
    pub fn register_data_source(
        &mut self,
        version: u32,
        description: impl Into<String>,
        store: Arc<dyn DataSource>,
    ) {
        self.insert(DATASOURCE_SERVICE, version, description, Offered::DataSource(store));
    }

    /// Offer `provisioner`, replacing any previous one.
    pub fn register_provision(
        &mut self,
        version: u32,
        description: impl Into<String>,
        provisioner: Arc<dyn Provision>,
    ) {
        self.insert(
            PROVISION_SERVICE,
            version,
            description,
            Offered::Provision(provisioner),
        );
    }

    fn insert(&mut self, name: &str, version: u32, description: impl Into<String>, offered: Offered) {
        self.entries.insert(
            name.to_string(),
            ServiceEntry {
                name: name.to_string(),
                version,
                description: description.into(),
                offered,
            },
        );
    }

    /// Look up a service for dispensing to the peer.
    pub fn get(&self, name: &str, version: u32) -> Result<&ServiceEntry, ZonectlError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ZonectlError::Unimplemented(format!("unknown service {name}")))?;
        if entry.version != version {
            return Err(ZonectlError::Unimplemented(format!(
                "service {name} version {version} is not supported, plugin offers version {}",
                entry.version
            )));
        }
        Ok(entry)
    }

    /// All entries, sorted by name.
    pub fn list_all(&self) -> Vec<&ServiceEntry> {
        let mut entries: Vec<&ServiceEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A router serving every registered entry.
    ///
    /// Provision streams started through it dial callbacks on `broker` and
    /// are cancelled when `stop` fires.
    pub(crate) fn routes(&self, broker: &Broker, stop: &CancellationToken) -> Router {
        let mut data_source = None;
        let mut provision = None;
        for entry in self.entries.values() {
            match &entry.offered {
                Offered::DataSource(store) => {
                    data_source = Some(DataSourceService::new(store.clone()).into_service());
                }
                Offered::Provision(provisioner) => {
                    provision = Some(
                        ProvisionService::new(provisioner.clone(), broker.clone(), stop.clone())
                            .into_service(),
                    );
                }
            }
        }
        transport::server()
            .add_optional_service(data_source)
            .add_optional_service(provision)
    }
}

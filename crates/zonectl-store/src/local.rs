// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! File-backed implementation of the DataSource trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use zonectl_config::Loader;
use zonectl_core::types::{ensure_id, Config};
use zonectl_core::validation::{validate_name, validate_policy_name, validate_trust_domain};
use zonectl_core::{
    ApBinding, AttestationPolicy, Cluster, ClusterFilter, DataSource, Federation, PolicyRule,
    TrustZone, ZonectlError,
};

enum State {
    Uninitialized,
    Loaded(Config),
}

/// The built-in entity store.
///
/// Holds the canonical [`Config`] snapshot in memory and writes the whole
/// document through its [`Loader`] on every mutation. A mutation runs against
/// a working copy; the copy replaces the snapshot only after the loader has
/// accepted it, so a failed write leaves both memory and disk untouched.
/// Writes run on the blocking pool while the state lock is held, which keeps
/// them in mutation order.
pub struct LocalDataSource {
    loader: Arc<dyn Loader>,
    state: Mutex<State>,
}

impl LocalDataSource {
    /// Create a store over `loader`, reading the document if it exists.
    ///
    /// A missing document is not an error: the store starts uninitialized and
    /// every operation except [`init`](Self::init) fails until it is created.
    pub fn new(loader: impl Loader + 'static) -> Result<Self, ZonectlError> {
        let state = if loader.exists() {
            State::Loaded(loader.read()?)
        } else {
            State::Uninitialized
        };
        Ok(Self {
            loader: Arc::new(loader),
            state: Mutex::new(state),
        })
    }

    /// Create the backing document with the given plugin list.
    ///
    /// Re-running against an existing document is a no-op as long as the
    /// plugin list agrees with what is stored.
    pub async fn init(&self, plugins: Vec<String>) -> Result<(), ZonectlError> {
        let mut state = self.state.lock().await;
        match &*state {
            State::Loaded(config) => {
                if !plugins.is_empty() && config.plugins != plugins {
                    return Err(ZonectlError::FailedPrecondition(format!(
                        "existing data document uses plugins [{}], not [{}]",
                        config.plugins.join(", "),
                        plugins.join(", ")
                    )));
                }
                info!("data document already initialised");
                Ok(())
            }
            State::Uninitialized => {
                let config = self
                    .persist(Config {
                        plugins,
                        ..Config::default()
                    })
                    .await?;
                info!(plugins = ?config.plugins, "initialised data document");
                *state = State::Loaded(config);
                Ok(())
            }
        }
    }

    /// A copy of the whole document.
    pub async fn config(&self) -> Result<Config, ZonectlError> {
        self.read(|config| Ok(config.clone())).await
    }

    async fn read<T>(
        &self,
        f: impl FnOnce(&Config) -> Result<T, ZonectlError>,
    ) -> Result<T, ZonectlError> {
        let state = self.state.lock().await;
        match &*state {
            State::Loaded(config) => f(config),
            State::Uninitialized => Err(ZonectlError::NotInitialized),
        }
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Config) -> Result<T, ZonectlError>,
    ) -> Result<T, ZonectlError> {
        let mut state = self.state.lock().await;
        let State::Loaded(current) = &*state else {
            return Err(ZonectlError::NotInitialized);
        };
        let mut working = current.clone();
        let out = f(&mut working)?;
        let written = self.persist(working).await?;
        *state = State::Loaded(written);
        Ok(out)
    }

    /// Hands `config` to the loader off the async runtime, returning it once written.
    async fn persist(&self, config: Config) -> Result<Config, ZonectlError> {
        let loader = self.loader.clone();
        tokio::task::spawn_blocking(move || loader.write(&config).map(|()| config))
            .await
            .map_err(|e| ZonectlError::Internal(format!("document write task failed: {e}")))?
    }
}

fn trust_zone_not_found(name: &str) -> ZonectlError {
    ZonectlError::NotFound {
        kind: "trust zone",
        name: name.to_string(),
    }
}

fn find_zone<'a>(config: &'a Config, name: &str) -> Result<&'a TrustZone, ZonectlError> {
    config
        .trustzones
        .iter()
        .find(|tz| tz.name == name)
        .ok_or_else(|| trust_zone_not_found(name))
}

fn find_zone_mut<'a>(config: &'a mut Config, name: &str) -> Result<&'a mut TrustZone, ZonectlError> {
    config
        .trustzones
        .iter_mut()
        .find(|tz| tz.name == name)
        .ok_or_else(|| trust_zone_not_found(name))
}

fn find_cluster<'a>(tz: &'a TrustZone, name: &str) -> Result<&'a Cluster, ZonectlError> {
    tz.clusters
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| ZonectlError::NotFound {
            kind: "cluster",
            name: format!("{name} in trust zone {}", tz.name),
        })
}

fn validate_rule(rule: &PolicyRule) -> Result<(), ZonectlError> {
    match rule {
        PolicyRule::Namespace { namespace } if namespace.trim().is_empty() => Err(
            ZonectlError::InvalidArgument("namespace policy requires a namespace".into()),
        ),
        PolicyRule::Annotated { annotations } if annotations.is_empty() => Err(
            ZonectlError::InvalidArgument("annotated policy requires at least one annotation".into()),
        ),
        _ => Ok(()),
    }
}

fn validate_cluster_fields(cluster: &Cluster) -> Result<(), ZonectlError> {
    validate_name("cluster", &cluster.name)?;
    if cluster.kubernetes_context.trim().is_empty() {
        return Err(ZonectlError::InvalidArgument(format!(
            "cluster {} requires a kubernetes context",
            cluster.name
        )));
    }
    Ok(())
}

#[async_trait]
impl DataSource for LocalDataSource {
    async fn validate(&self) -> Result<(), ZonectlError> {
        self.read(|_| Ok(())).await
    }

    // --- Trust zones ---

    async fn add_trust_zone(&self, trust_zone: &TrustZone) -> Result<TrustZone, ZonectlError> {
        validate_name("trust zone", &trust_zone.name)?;
        validate_trust_domain(&trust_zone.trust_domain)?;
        if !trust_zone.clusters.is_empty()
            || !trust_zone.federations.is_empty()
            || !trust_zone.attestation_policies.is_empty()
        {
            return Err(ZonectlError::InvalidArgument(format!(
                "trust zone {} must be added without clusters, federations or bindings",
                trust_zone.name
            )));
        }

        let mut new_zone = trust_zone.clone();
        ensure_id(&mut new_zone.id);
        let added = self
            .mutate(|config| {
                if config.trustzones.iter().any(|tz| tz.name == new_zone.name) {
                    return Err(ZonectlError::AlreadyExists {
                        kind: "trust zone",
                        name: new_zone.name.clone(),
                    });
                }
                if config
                    .trustzones
                    .iter()
                    .any(|tz| tz.trust_domain == new_zone.trust_domain)
                {
                    return Err(ZonectlError::AlreadyExists {
                        kind: "trust domain",
                        name: new_zone.trust_domain.clone(),
                    });
                }
                config.trustzones.push(new_zone.clone());
                Ok(new_zone)
            })
            .await?;
        debug!(trust_zone = %added.name, trust_domain = %added.trust_domain, "added trust zone");
        Ok(added)
    }

    async fn get_trust_zone(&self, name: &str) -> Result<TrustZone, ZonectlError> {
        self.read(|config| find_zone(config, name).cloned()).await
    }

    async fn list_trust_zones(&self) -> Result<Vec<TrustZone>, ZonectlError> {
        self.read(|config| Ok(config.trustzones.clone())).await
    }

    async fn update_trust_zone(&self, trust_zone: &TrustZone) -> Result<(), ZonectlError> {
        let update = trust_zone.clone();
        self.mutate(|config| {
            let current = find_zone_mut(config, &update.name)?;
            let immutable = |field: &'static str| ZonectlError::Immutable {
                kind: "trust zone",
                name: update.name.clone(),
                field,
            };
            if !update.id.is_empty() && update.id != current.id {
                return Err(immutable("id"));
            }
            if update.trust_domain != current.trust_domain {
                return Err(immutable("trust_domain"));
            }
            if update.trust_provider != current.trust_provider {
                return Err(immutable("trust_provider"));
            }
            if update.clusters != current.clusters {
                return Err(immutable("clusters"));
            }
            if update.federations != current.federations {
                return Err(immutable("federations"));
            }
            if update.attestation_policies != current.attestation_policies {
                return Err(immutable("attestation_policies"));
            }

            current.bundle_endpoint_url = update.bundle_endpoint_url.clone();
            current.bundle = update.bundle.clone();
            current.jwt_issuer = update.jwt_issuer.clone();
            current.bundle_endpoint_profile = update.bundle_endpoint_profile;
            Ok(())
        })
        .await?;
        debug!(trust_zone = %trust_zone.name, "updated trust zone");
        Ok(())
    }

    // --- Clusters ---

    async fn add_cluster(&self, cluster: &Cluster) -> Result<Cluster, ZonectlError> {
        validate_cluster_fields(cluster)?;
        let mut new_cluster = cluster.clone();
        ensure_id(&mut new_cluster.id);
        let added = self
            .mutate(|config| {
                let tz = find_zone_mut(config, &new_cluster.trust_zone)?;
                if tz.clusters.iter().any(|c| c.name == new_cluster.name) {
                    return Err(ZonectlError::AlreadyExists {
                        kind: "cluster",
                        name: new_cluster.name.clone(),
                    });
                }
                if let Some(existing) = tz.clusters.first() {
                    return Err(ZonectlError::FailedPrecondition(format!(
                        "trust zone {} already has cluster {}",
                        tz.name, existing.name
                    )));
                }
                tz.clusters.push(new_cluster.clone());
                Ok(new_cluster)
            })
            .await?;
        debug!(cluster = %added.name, trust_zone = %added.trust_zone, "added cluster");
        Ok(added)
    }

    async fn get_cluster(&self, name: &str, trust_zone: &str) -> Result<Cluster, ZonectlError> {
        self.read(|config| find_cluster(find_zone(config, trust_zone)?, name).cloned())
            .await
    }

    async fn list_clusters(&self, filter: &ClusterFilter) -> Result<Vec<Cluster>, ZonectlError> {
        self.read(|config| {
            if let Some(name) = &filter.trust_zone {
                find_zone(config, name)?;
            }
            Ok(config
                .trustzones
                .iter()
                .flat_map(|tz| tz.clusters.iter())
                .filter(|c| filter.matches(c))
                .cloned()
                .collect())
        })
        .await
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<(), ZonectlError> {
        validate_cluster_fields(cluster)?;
        let update = cluster.clone();
        self.mutate(|config| {
            let tz = find_zone_mut(config, &update.trust_zone)?;
            let tz_name = tz.name.clone();
            let current = tz
                .clusters
                .iter_mut()
                .find(|c| c.name == update.name)
                .ok_or_else(|| ZonectlError::NotFound {
                    kind: "cluster",
                    name: format!("{} in trust zone {tz_name}", update.name),
                })?;
            if !update.id.is_empty() && update.id != current.id {
                return Err(ZonectlError::Immutable {
                    kind: "cluster",
                    name: update.name.clone(),
                    field: "id",
                });
            }
            current.kubernetes_context = update.kubernetes_context.clone();
            current.profile = update.profile;
            current.external_server = update.external_server;
            current.oidc_issuer_url = update.oidc_issuer_url.clone();
            current.oidc_issuer_ca_cert = update.oidc_issuer_ca_cert.clone();
            Ok(())
        })
        .await?;
        debug!(cluster = %cluster.name, trust_zone = %cluster.trust_zone, "updated cluster");
        Ok(())
    }

    async fn destroy_cluster(&self, name: &str, trust_zone: &str) -> Result<(), ZonectlError> {
        self.mutate(|config| {
            let tz = find_zone_mut(config, trust_zone)?;
            let before = tz.clusters.len();
            tz.clusters.retain(|c| c.name != name);
            if tz.clusters.len() == before {
                return Err(ZonectlError::NotFound {
                    kind: "cluster",
                    name: format!("{name} in trust zone {trust_zone}"),
                });
            }
            Ok(())
        })
        .await?;
        info!(cluster = %name, trust_zone = %trust_zone, "destroyed cluster");
        Ok(())
    }

    // --- Attestation policies ---

    async fn add_attestation_policy(
        &self,
        policy: &AttestationPolicy,
    ) -> Result<AttestationPolicy, ZonectlError> {
        validate_policy_name(&policy.name)?;
        validate_rule(&policy.rule)?;
        let mut new_policy = policy.clone();
        ensure_id(&mut new_policy.id);
        self.mutate(|config| {
            if config
                .attestationpolicies
                .iter()
                .any(|p| p.name == new_policy.name)
            {
                return Err(ZonectlError::AlreadyExists {
                    kind: "attestation policy",
                    name: new_policy.name.clone(),
                });
            }
            config.attestationpolicies.push(new_policy.clone());
            Ok(new_policy)
        })
        .await
    }

    async fn get_attestation_policy(&self, name: &str) -> Result<AttestationPolicy, ZonectlError> {
        self.read(|config| {
            config
                .attestationpolicies
                .iter()
                .find(|p| p.name == name)
                .cloned()
                .ok_or_else(|| ZonectlError::NotFound {
                    kind: "attestation policy",
                    name: name.to_string(),
                })
        })
        .await
    }

    async fn list_attestation_policies(&self) -> Result<Vec<AttestationPolicy>, ZonectlError> {
        self.read(|config| Ok(config.attestationpolicies.clone()))
            .await
    }

    // --- Bindings ---

    async fn add_ap_binding(&self, binding: &ApBinding) -> Result<ApBinding, ZonectlError> {
        let new_binding = binding.clone();
        let added = self
            .mutate(|config| {
                let tz = find_zone(config, &new_binding.trust_zone)?;
                if !config
                    .attestationpolicies
                    .iter()
                    .any(|p| p.name == new_binding.policy)
                {
                    return Err(ZonectlError::NotFound {
                        kind: "attestation policy",
                        name: new_binding.policy.clone(),
                    });
                }
                if tz
                    .attestation_policies
                    .iter()
                    .any(|b| b.policy == new_binding.policy)
                {
                    return Err(ZonectlError::AlreadyExists {
                        kind: "attestation policy binding",
                        name: format!("{} in trust zone {}", new_binding.policy, tz.name),
                    });
                }
                for remote in &new_binding.federates_with {
                    if remote == &tz.name {
                        return Err(ZonectlError::InvalidArgument(format!(
                            "attestation policy binding for trust zone {remote} cannot federate with itself"
                        )));
                    }
                    find_zone(config, remote)?;
                    if !tz.federations.iter().any(|f| &f.remote_trust_zone == remote) {
                        return Err(ZonectlError::NotFederated {
                            trust_zone: tz.name.clone(),
                            remote: remote.clone(),
                        });
                    }
                }

                find_zone_mut(config, &new_binding.trust_zone)?
                    .attestation_policies
                    .push(new_binding.clone());
                Ok(new_binding)
            })
            .await?;
        debug!(policy = %added.policy, trust_zone = %added.trust_zone, "added attestation policy binding");
        Ok(added)
    }

    async fn destroy_ap_binding(&self, binding: &ApBinding) -> Result<(), ZonectlError> {
        self.mutate(|config| {
            let tz = find_zone_mut(config, &binding.trust_zone)?;
            let before = tz.attestation_policies.len();
            tz.attestation_policies.retain(|b| b.policy != binding.policy);
            if tz.attestation_policies.len() == before {
                return Err(ZonectlError::NotFound {
                    kind: "attestation policy binding",
                    name: format!("{} in trust zone {}", binding.policy, binding.trust_zone),
                });
            }
            Ok(())
        })
        .await?;
        info!(policy = %binding.policy, trust_zone = %binding.trust_zone, "destroyed attestation policy binding");
        Ok(())
    }

    // --- Federations ---

    async fn add_federation(&self, federation: &Federation) -> Result<Federation, ZonectlError> {
        if federation.trust_zone == federation.remote_trust_zone {
            return Err(ZonectlError::InvalidArgument(format!(
                "trust zone {} cannot federate with itself",
                federation.trust_zone
            )));
        }
        let new_federation = federation.clone();
        let added = self
            .mutate(|config| {
                find_zone(config, &new_federation.remote_trust_zone)?;
                let tz = find_zone_mut(config, &new_federation.trust_zone)?;
                if tz
                    .federations
                    .iter()
                    .any(|f| f.remote_trust_zone == new_federation.remote_trust_zone)
                {
                    return Err(ZonectlError::AlreadyExists {
                        kind: "federation",
                        name: format!(
                            "{} -> {}",
                            new_federation.trust_zone, new_federation.remote_trust_zone
                        ),
                    });
                }
                tz.federations.push(new_federation.clone());
                Ok(new_federation)
            })
            .await?;
        debug!(
            trust_zone = %added.trust_zone,
            remote_trust_zone = %added.remote_trust_zone,
            "added federation"
        );
        Ok(added)
    }

    async fn list_federations(&self) -> Result<Vec<Federation>, ZonectlError> {
        self.read(|config| {
            Ok(config
                .trustzones
                .iter()
                .flat_map(|tz| tz.federations.iter().cloned())
                .collect())
        })
        .await
    }

    async fn list_federations_by_trust_zone(
        &self,
        trust_zone: &str,
    ) -> Result<Vec<Federation>, ZonectlError> {
        self.read(|config| Ok(find_zone(config, trust_zone)?.federations.clone()))
            .await
    }
}

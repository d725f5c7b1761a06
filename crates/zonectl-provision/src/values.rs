// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helm values for the SPIRE chart of one trust zone.
//!
//! Workload identities come from the zone's attestation policy bindings. A
//! zone without bindings keeps the chart's `default` ClusterSPIFFEID, which
//! issues an identity to every pod; binding any policy disables it and adds
//! one entry per bound policy instead. Federated trust domains are included
//! only once the remote zone's bundle endpoint is known, which is why the
//! provisioner regenerates values after the first install.

use serde_json::{json, Map, Value};
use zonectl_core::validation::RESERVED_POLICY_NAME as DEFAULT_SPIFFE_ID;
use zonectl_core::{
    AttestationPolicy, BundleEndpointProfile, Cluster, ClusterProfile, PolicyRule, TrustZone,
    ZonectlError,
};

/// Port the chart's federation bundle endpoint listens on.
pub const BUNDLE_ENDPOINT_PORT: u16 = 8443;

pub struct ValuesGenerator<'a> {
    trust_zone: &'a TrustZone,
    cluster: &'a Cluster,
    trust_zones: &'a [TrustZone],
    policies: &'a [AttestationPolicy],
}

impl<'a> ValuesGenerator<'a> {
    /// `trust_zones` and `policies` are the full lists, used to resolve the
    /// zone's bindings and federations by name.
    pub fn new(
        trust_zone: &'a TrustZone,
        cluster: &'a Cluster,
        trust_zones: &'a [TrustZone],
        policies: &'a [AttestationPolicy],
    ) -> Self {
        Self {
            trust_zone,
            cluster,
            trust_zones,
            policies,
        }
    }

    pub fn generate(&self) -> Result<Value, ZonectlError> {
        let mut spire = Map::new();
        spire.insert("clusterName".into(), json!(self.cluster.name));
        spire.insert("trustDomain".into(), json!(self.trust_zone.trust_domain));
        if let Some(issuer) = &self.trust_zone.jwt_issuer {
            spire.insert("jwtIssuer".into(), json!(issuer));
        }

        let federated = self.federated_trust_domains()?;
        let mut server = json!({
            "controllerManager": {
                "identities": {
                    "clusterSPIFFEIDs": self.cluster_spiffe_ids()?,
                    "clusterFederatedTrustDomains": federated,
                }
            },
            "federation": {
                "enabled": !self.trust_zone.federations.is_empty(),
            },
        });
        if let Some(url) = &self.cluster.oidc_issuer_url {
            server["oidcDiscoveryProvider"] = json!({ "enabled": true, "issuerURL": url });
        }

        let mut values = json!({
            "global": { "spire": Value::Object(spire) },
            "spire-server": server,
        });
        if self.cluster.profile == ClusterProfile::Istio {
            values["spire-agent"] = json!({
                "sds": {
                    "enabled": true,
                    "defaultSVIDName": "default",
                    "defaultBundleName": "null",
                    "defaultAllBundlesName": "ROOTCA",
                }
            });
        }
        Ok(values)
    }

    fn cluster_spiffe_ids(&self) -> Result<Value, ZonectlError> {
        let bindings = &self.trust_zone.attestation_policies;
        let mut ids = Map::new();
        ids.insert(
            DEFAULT_SPIFFE_ID.into(),
            json!({ "enabled": bindings.is_empty() }),
        );

        for binding in bindings {
            let policy = self
                .policies
                .iter()
                .find(|p| p.name == binding.policy)
                .ok_or_else(|| ZonectlError::NotFound {
                    kind: "attestation policy",
                    name: binding.policy.clone(),
                })?;

            let mut entry = match &policy.rule {
                PolicyRule::Namespace { namespace } => json!({
                    "namespaceSelector": {
                        "matchExpressions": [{
                            "key": "kubernetes.io/metadata.name",
                            "operator": "In",
                            "values": [namespace],
                        }]
                    }
                }),
                PolicyRule::Annotated { annotations } => json!({
                    "podSelector": { "matchLabels": annotations }
                }),
            };

            let mut federates_with = Vec::new();
            for remote in &binding.federates_with {
                federates_with.push(self.zone(remote)?.trust_domain.clone());
            }
            if !federates_with.is_empty() {
                entry["federatesWith"] = json!(federates_with);
            }
            ids.insert(policy.name.clone(), entry);
        }
        Ok(Value::Object(ids))
    }

    fn federated_trust_domains(&self) -> Result<Value, ZonectlError> {
        let mut domains = Map::new();
        for federation in &self.trust_zone.federations {
            let remote = self.zone(&federation.remote_trust_zone)?;
            let Some(url) = &remote.bundle_endpoint_url else {
                continue;
            };
            let mut entry = json!({
                "bundleEndpointURL": url,
                "trustDomain": remote.trust_domain,
                "bundleEndpointProfile": match remote.bundle_endpoint_profile {
                    BundleEndpointProfile::HttpsSpiffe => json!({
                        "type": "https_spiffe",
                        "endpointSPIFFEID": format!("spiffe://{}/spire/server", remote.trust_domain),
                    }),
                    BundleEndpointProfile::HttpsWeb => json!({ "type": "https_web" }),
                },
            });
            if let Some(bundle) = &remote.bundle {
                entry["trustDomainBundle"] = json!(bundle);
            }
            domains.insert(remote.name.clone(), entry);
        }
        Ok(Value::Object(domains))
    }

    fn zone(&self, name: &str) -> Result<&TrustZone, ZonectlError> {
        self.trust_zones
            .iter()
            .find(|tz| tz.name == name)
            .ok_or_else(|| ZonectlError::NotFound {
                kind: "trust zone",
                name: name.to_string(),
            })
    }
}

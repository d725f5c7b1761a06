// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entity model shared by the store, the plugin adapters and the provisioner.
//!
//! Everything here is a plain owned value. `Clone` is a deep copy, which is
//! what the store relies on to hand out values that never alias its own
//! snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The persisted aggregate: every entity zonectl knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Configured plugin identifiers. Empty means the built-in local store.
    #[serde(default)]
    pub plugins: Vec<String>,

    #[serde(default)]
    pub trustzones: Vec<TrustZone>,

    #[serde(default)]
    pub attestationpolicies: Vec<AttestationPolicy>,
}

/// How a trust zone's bundle endpoint authenticates itself.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BundleEndpointProfile {
    #[default]
    HttpsSpiffe,
    HttpsWeb,
}

/// Kind of node/workload attestation used in a trust zone.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrustProviderKind {
    #[default]
    Kubernetes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustProvider {
    #[serde(default)]
    pub kind: TrustProviderKind,
}

/// Deployment profile of a cluster.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClusterProfile {
    #[default]
    Kubernetes,
    Istio,
}

/// A named administrative domain mapped to one SPIFFE trust domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustZone {
    #[serde(default)]
    pub id: String,

    pub name: String,

    pub trust_domain: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_endpoint_url: Option<String>,

    /// PEM trust bundle fetched from the zone's SPIRE server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_issuer: Option<String>,

    #[serde(default)]
    pub bundle_endpoint_profile: BundleEndpointProfile,

    #[serde(default)]
    pub trust_provider: TrustProvider,

    #[serde(default)]
    pub clusters: Vec<Cluster>,

    #[serde(default)]
    pub federations: Vec<Federation>,

    #[serde(default)]
    pub attestation_policies: Vec<ApBinding>,
}

/// A Kubernetes cluster hosting a trust zone's identity stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cluster {
    #[serde(default)]
    pub id: String,

    pub name: String,

    pub trust_zone: String,

    pub kubernetes_context: String,

    #[serde(default)]
    pub profile: ClusterProfile,

    /// Whether the SPIRE server runs outside the cluster.
    #[serde(default)]
    pub external_server: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_issuer_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_issuer_ca_cert: Option<String>,
}

/// Which workloads qualify for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum PolicyRule {
    /// Every pod in the named namespace.
    Namespace { namespace: String },
    /// Pods carrying all of the given annotations.
    Annotated { annotations: BTreeMap<String, String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttestationPolicy {
    #[serde(default)]
    pub id: String,

    pub name: String,

    pub rule: PolicyRule,
}

/// Binds an attestation policy to a trust zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApBinding {
    pub trust_zone: String,

    pub policy: String,

    /// Trust zone names whose workloads may be trusted by the selected workloads.
    #[serde(default)]
    pub federates_with: Vec<String>,
}

/// A directed trust relationship, stored on the left-hand zone only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Federation {
    pub trust_zone: String,

    pub remote_trust_zone: String,
}

/// Narrows `list_clusters`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_zone: Option<String>,
}

impl ClusterFilter {
    pub fn trust_zone(name: impl Into<String>) -> Self {
        Self {
            trust_zone: Some(name.into()),
        }
    }

    pub fn matches(&self, cluster: &Cluster) -> bool {
        self.trust_zone
            .as_deref()
            .is_none_or(|tz| tz == cluster.trust_zone)
    }
}

/// One progress report from a deploy or tear-down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub stage: String,
    pub message: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Status {
    /// True for a finished stage that reports a failure.
    pub fn is_failure(&self) -> bool {
        self.done && self.error.is_some()
    }
}

/// Options for `deploy` and `tear_down`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Path to the kubeconfig file; `None` uses the collaborator's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config: Option<String>,

    /// Skip waiting for SPIRE server readiness after install.
    #[serde(default)]
    pub skip_wait: bool,
}

/// Assigns a fresh UUID when `id` is empty.
pub fn ensure_id(id: &mut String) {
    if id.is_empty() {
        *id = uuid::Uuid::new_v4().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trust_zone() -> TrustZone {
        TrustZone {
            id: "b9c1".into(),
            name: "tz1".into(),
            trust_domain: "td1".into(),
            bundle_endpoint_url: Some("https://tz1.example.com:8443".into()),
            bundle: Some("-----BEGIN CERTIFICATE-----".into()),
            jwt_issuer: None,
            bundle_endpoint_profile: BundleEndpointProfile::HttpsSpiffe,
            trust_provider: TrustProvider::default(),
            clusters: vec![Cluster {
                id: "c1".into(),
                name: "local1".into(),
                trust_zone: "tz1".into(),
                kubernetes_context: "kind-local1".into(),
                ..Cluster::default()
            }],
            federations: vec![Federation {
                trust_zone: "tz1".into(),
                remote_trust_zone: "tz2".into(),
            }],
            attestation_policies: vec![ApBinding {
                trust_zone: "tz1".into(),
                policy: "ap1".into(),
                federates_with: vec!["tz2".into()],
            }],
        }
    }

    #[test]
    fn clone_is_equal_but_never_aliases() {
        let original = sample_trust_zone();
        let first = original.clone();
        let second = first.clone();

        assert_eq!(original, first);
        assert_eq!(first, second);
        assert!(!std::ptr::eq(&original, &first));
        assert_ne!(original.name.as_ptr(), first.name.as_ptr());
        assert_ne!(first.clusters.as_ptr(), second.clusters.as_ptr());
        assert_ne!(
            first.attestation_policies[0].federates_with.as_ptr(),
            second.attestation_policies[0].federates_with.as_ptr()
        );
    }

    #[test]
    fn empty_collections_default_when_absent() {
        let tz: TrustZone =
            serde_json::from_value(serde_json::json!({"name": "tz1", "trust_domain": "td1"}))
                .unwrap();
        assert!(tz.clusters.is_empty());
        assert!(tz.federations.is_empty());
        assert!(tz.attestation_policies.is_empty());
        assert_eq!(tz.bundle_endpoint_profile, BundleEndpointProfile::HttpsSpiffe);
    }

    #[test]
    fn policy_rule_is_internally_tagged() {
        let rule = PolicyRule::Namespace {
            namespace: "demo".into(),
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["kind"], "namespace");
        assert_eq!(json["namespace"], "demo");
    }

    #[test]
    fn cluster_filter_matches_trust_zone() {
        let cluster = sample_trust_zone().clusters.remove(0);
        assert!(ClusterFilter::default().matches(&cluster));
        assert!(ClusterFilter::trust_zone("tz1").matches(&cluster));
        assert!(!ClusterFilter::trust_zone("tz2").matches(&cluster));
    }

    #[test]
    fn ensure_id_only_fills_blank_ids() {
        let mut blank = String::new();
        ensure_id(&mut blank);
        assert_eq!(blank.len(), 36);

        let mut set = "keep".to_string();
        ensure_id(&mut set);
        assert_eq!(set, "keep");
    }
}

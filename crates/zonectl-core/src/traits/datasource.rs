// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The entity store contract.

use async_trait::async_trait;

use crate::error::ZonectlError;
use crate::types::{
    ApBinding, AttestationPolicy, Cluster, ClusterFilter, Federation, TrustZone,
};

/// Source of truth for trust zones, clusters, policies, bindings and federations.
///
/// Every value passed in is copied before it is stored and every value
/// returned is a copy; implementations never hand out references into their
/// own state.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Confirms the store is initialised and usable.
    async fn validate(&self) -> Result<(), ZonectlError>;

    async fn add_trust_zone(&self, trust_zone: &TrustZone) -> Result<TrustZone, ZonectlError>;

    async fn get_trust_zone(&self, name: &str) -> Result<TrustZone, ZonectlError>;

    async fn list_trust_zones(&self) -> Result<Vec<TrustZone>, ZonectlError>;

    /// Replaces the mutable fields of an existing trust zone.
    ///
    /// Fails without writing anything if an identity field, a cluster, a
    /// federation or a binding differs from the stored zone.
    async fn update_trust_zone(&self, trust_zone: &TrustZone) -> Result<(), ZonectlError>;

    async fn add_cluster(&self, cluster: &Cluster) -> Result<Cluster, ZonectlError>;

    async fn get_cluster(&self, name: &str, trust_zone: &str) -> Result<Cluster, ZonectlError>;

    async fn list_clusters(&self, filter: &ClusterFilter) -> Result<Vec<Cluster>, ZonectlError>;

    async fn update_cluster(&self, cluster: &Cluster) -> Result<(), ZonectlError>;

    /// Removes a cluster from its trust zone.
    ///
    /// The store does not check whether the cluster is still deployed; callers
    /// gate this on the deployment guard in the provisioner.
    async fn destroy_cluster(&self, name: &str, trust_zone: &str) -> Result<(), ZonectlError>;

    async fn add_attestation_policy(
        &self,
        policy: &AttestationPolicy,
    ) -> Result<AttestationPolicy, ZonectlError>;

    async fn get_attestation_policy(&self, name: &str) -> Result<AttestationPolicy, ZonectlError>;

    async fn list_attestation_policies(&self) -> Result<Vec<AttestationPolicy>, ZonectlError>;

    async fn add_ap_binding(&self, binding: &ApBinding) -> Result<ApBinding, ZonectlError>;

    async fn destroy_ap_binding(&self, binding: &ApBinding) -> Result<(), ZonectlError>;

    async fn add_federation(&self, federation: &Federation) -> Result<Federation, ZonectlError>;

    async fn list_federations(&self) -> Result<Vec<Federation>, ZonectlError>;

    async fn list_federations_by_trust_zone(
        &self,
        trust_zone: &str,
    ) -> Result<Vec<Federation>, ZonectlError>;
}

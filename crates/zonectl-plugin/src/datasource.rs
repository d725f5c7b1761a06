// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The entity store carried over gRPC.
//!
//! [`DataSourceService`] exposes any [`DataSource`] as the `EntityStore`
//! service and [`DataSourceClient`] implements [`DataSource`] by calling one.
//! Errors keep their code across the hop, so `AlreadyExists` on the plugin
//! side is still recognisable on the host.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::{Request, Response};
use zonectl_core::{
    ApBinding, AttestationPolicy, Cluster, ClusterFilter, DataSource, Federation, TrustZone,
    ZonectlError,
};

use crate::convert::to_grpc;
use crate::proto as pb;
use crate::proto::entity_store_client::EntityStoreClient;
use crate::proto::entity_store_server::{EntityStore, EntityStoreServer};
use crate::transport::{unary, MAX_MESSAGE_SIZE};

type Reply<T> = Result<Response<T>, tonic::Status>;

fn reply<T, U>(result: Result<T, ZonectlError>) -> Reply<U>
where
    U: From<T>,
{
    result
        .map(|value| Response::new(U::from(value)))
        .map_err(|e| to_grpc(&e))
}

/// Serves a [`DataSource`] to the peer.
pub struct DataSourceService {
    inner: Arc<dyn DataSource>,
}

impl DataSourceService {
    pub fn new(inner: Arc<dyn DataSource>) -> Self {
        Self { inner }
    }

    pub(crate) fn into_service(self) -> EntityStoreServer<Self> {
        EntityStoreServer::new(self)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE)
    }
}

#[tonic::async_trait]
impl EntityStore for DataSourceService {
    async fn validate(&self, _request: Request<pb::Empty>) -> Reply<pb::Empty> {
        reply(self.inner.validate().await)
    }

    async fn add_trust_zone(&self, request: Request<pb::TrustZone>) -> Reply<pb::TrustZone> {
        let tz = TrustZone::from(request.into_inner());
        reply(self.inner.add_trust_zone(&tz).await)
    }

    async fn get_trust_zone(&self, request: Request<pb::NameRequest>) -> Reply<pb::TrustZone> {
        reply(self.inner.get_trust_zone(&request.into_inner().name).await)
    }

    async fn list_trust_zones(&self, _request: Request<pb::Empty>) -> Reply<pb::TrustZoneList> {
        reply(self.inner.list_trust_zones().await)
    }

    async fn update_trust_zone(&self, request: Request<pb::TrustZone>) -> Reply<pb::Empty> {
        let tz = TrustZone::from(request.into_inner());
        reply(self.inner.update_trust_zone(&tz).await)
    }

    async fn add_cluster(&self, request: Request<pb::Cluster>) -> Reply<pb::Cluster> {
        let cluster = Cluster::from(request.into_inner());
        reply(self.inner.add_cluster(&cluster).await)
    }

    async fn get_cluster(&self, request: Request<pb::ClusterKey>) -> Reply<pb::Cluster> {
        let key = request.into_inner();
        reply(self.inner.get_cluster(&key.name, &key.trust_zone).await)
    }

    async fn list_clusters(&self, request: Request<pb::ClusterFilter>) -> Reply<pb::ClusterList> {
        let filter = ClusterFilter::from(request.into_inner());
        reply(self.inner.list_clusters(&filter).await)
    }

    async fn update_cluster(&self, request: Request<pb::Cluster>) -> Reply<pb::Empty> {
        let cluster = Cluster::from(request.into_inner());
        reply(self.inner.update_cluster(&cluster).await)
    }

    async fn destroy_cluster(&self, request: Request<pb::ClusterKey>) -> Reply<pb::Empty> {
        let key = request.into_inner();
        reply(self.inner.destroy_cluster(&key.name, &key.trust_zone).await)
    }

    async fn add_attestation_policy(
        &self,
        request: Request<pb::AttestationPolicy>,
    ) -> Reply<pb::AttestationPolicy> {
        let policy = AttestationPolicy::try_from(request.into_inner()).map_err(|e| to_grpc(&e))?;
        reply(self.inner.add_attestation_policy(&policy).await)
    }

    async fn get_attestation_policy(
        &self,
        request: Request<pb::NameRequest>,
    ) -> Reply<pb::AttestationPolicy> {
        reply(self.inner.get_attestation_policy(&request.into_inner().name).await)
    }

    async fn list_attestation_policies(
        &self,
        _request: Request<pb::Empty>,
    ) -> Reply<pb::AttestationPolicyList> {
        reply(self.inner.list_attestation_policies().await)
    }

    async fn add_ap_binding(&self, request: Request<pb::ApBinding>) -> Reply<pb::ApBinding> {
        let binding = ApBinding::from(request.into_inner());
        reply(self.inner.add_ap_binding(&binding).await)
    }

    async fn destroy_ap_binding(&self, request: Request<pb::ApBinding>) -> Reply<pb::Empty> {
        let binding = ApBinding::from(request.into_inner());
        reply(self.inner.destroy_ap_binding(&binding).await)
    }

    async fn add_federation(&self, request: Request<pb::Federation>) -> Reply<pb::Federation> {
        let federation = Federation::from(request.into_inner());
        reply(self.inner.add_federation(&federation).await)
    }

    async fn list_federations(&self, _request: Request<pb::Empty>) -> Reply<pb::FederationList> {
        reply(self.inner.list_federations().await)
    }

    async fn list_federations_by_trust_zone(
        &self,
        request: Request<pb::NameRequest>,
    ) -> Reply<pb::FederationList> {
        reply(
            self.inner
                .list_federations_by_trust_zone(&request.into_inner().name)
                .await,
        )
    }
}

/// A [`DataSource`] living on the other side of a connection.
#[derive(Debug, Clone)]
pub struct DataSourceClient {
    rpc: EntityStoreClient<Channel>,
    closed: CancellationToken,
}

impl DataSourceClient {
    /// Calls over `channel` fail fast with `unavailable` once `closed` fires.
    pub(crate) fn new(channel: Channel, closed: CancellationToken) -> Self {
        let rpc = EntityStoreClient::new(channel)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        Self { rpc, closed }
    }

    fn rpc(&self) -> EntityStoreClient<Channel> {
        self.rpc.clone()
    }
}

fn name(name: &str) -> pb::NameRequest {
    pb::NameRequest {
        name: name.to_string(),
    }
}

fn cluster_key(name: &str, trust_zone: &str) -> pb::ClusterKey {
    pb::ClusterKey {
        name: name.to_string(),
        trust_zone: trust_zone.to_string(),
    }
}

fn policies(list: pb::AttestationPolicyList) -> Result<Vec<AttestationPolicy>, ZonectlError> {
    list.policies.into_iter().map(TryInto::try_into).collect()
}

#[async_trait]
impl DataSource for DataSourceClient {
    async fn validate(&self) -> Result<(), ZonectlError> {
        unary("datasource.validate", &self.closed, self.rpc().validate(pb::Empty {})).await?;
        Ok(())
    }

    async fn add_trust_zone(&self, trust_zone: &TrustZone) -> Result<TrustZone, ZonectlError> {
        let request = pb::TrustZone::from(trust_zone.clone());
        let added = unary(
            "datasource.add_trust_zone",
            &self.closed,
            self.rpc().add_trust_zone(request),
        )
        .await?;
        Ok(added.into())
    }

    async fn get_trust_zone(&self, trust_zone: &str) -> Result<TrustZone, ZonectlError> {
        let found = unary(
            "datasource.get_trust_zone",
            &self.closed,
            self.rpc().get_trust_zone(name(trust_zone)),
        )
        .await?;
        Ok(found.into())
    }

    async fn list_trust_zones(&self) -> Result<Vec<TrustZone>, ZonectlError> {
        let list = unary(
            "datasource.list_trust_zones",
            &self.closed,
            self.rpc().list_trust_zones(pb::Empty {}),
        )
        .await?;
        Ok(list.trust_zones.into_iter().map(Into::into).collect())
    }

    async fn update_trust_zone(&self, trust_zone: &TrustZone) -> Result<(), ZonectlError> {
        let request = pb::TrustZone::from(trust_zone.clone());
        unary(
            "datasource.update_trust_zone",
            &self.closed,
            self.rpc().update_trust_zone(request),
        )
        .await?;
        Ok(())
    }

    async fn add_cluster(&self, cluster: &Cluster) -> Result<Cluster, ZonectlError> {
        let request = pb::Cluster::from(cluster.clone());
        let added = unary(
            "datasource.add_cluster",
            &self.closed,
            self.rpc().add_cluster(request),
        )
        .await?;
        Ok(added.into())
    }

    async fn get_cluster(&self, name: &str, trust_zone: &str) -> Result<Cluster, ZonectlError> {
        let found = unary(
            "datasource.get_cluster",
            &self.closed,
            self.rpc().get_cluster(cluster_key(name, trust_zone)),
        )
        .await?;
        Ok(found.into())
    }

    async fn list_clusters(&self, filter: &ClusterFilter) -> Result<Vec<Cluster>, ZonectlError> {
        let request = pb::ClusterFilter::from(filter.clone());
        let list = unary(
            "datasource.list_clusters",
            &self.closed,
            self.rpc().list_clusters(request),
        )
        .await?;
        Ok(list.clusters.into_iter().map(Into::into).collect())
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<(), ZonectlError> {
        let request = pb::Cluster::from(cluster.clone());
        unary(
            "datasource.update_cluster",
            &self.closed,
            self.rpc().update_cluster(request),
        )
        .await?;
        Ok(())
    }

    async fn destroy_cluster(&self, name: &str, trust_zone: &str) -> Result<(), ZonectlError> {
        unary(
            "datasource.destroy_cluster",
            &self.closed,
            self.rpc().destroy_cluster(cluster_key(name, trust_zone)),
        )
        .await?;
        Ok(())
    }

    async fn add_attestation_policy(
        &self,
        policy: &AttestationPolicy,
    ) -> Result<AttestationPolicy, ZonectlError> {
        let request = pb::AttestationPolicy::from(policy.clone());
        let added = unary(
            "datasource.add_attestation_policy",
            &self.closed,
            self.rpc().add_attestation_policy(request),
        )
        .await?;
        added.try_into()
    }

    async fn get_attestation_policy(&self, policy: &str) -> Result<AttestationPolicy, ZonectlError> {
        let found = unary(
            "datasource.get_attestation_policy",
            &self.closed,
            self.rpc().get_attestation_policy(name(policy)),
        )
        .await?;
        found.try_into()
    }

    async fn list_attestation_policies(&self) -> Result<Vec<AttestationPolicy>, ZonectlError> {
        let list = unary(
            "datasource.list_attestation_policies",
            &self.closed,
            self.rpc().list_attestation_policies(pb::Empty {}),
        )
        .await?;
        policies(list)
    }

    async fn add_ap_binding(&self, binding: &ApBinding) -> Result<ApBinding, ZonectlError> {
        let request = pb::ApBinding::from(binding.clone());
        let added = unary(
            "datasource.add_ap_binding",
            &self.closed,
            self.rpc().add_ap_binding(request),
        )
        .await?;
        Ok(added.into())
    }

    async fn destroy_ap_binding(&self, binding: &ApBinding) -> Result<(), ZonectlError> {
        let request = pb::ApBinding::from(binding.clone());
        unary(
            "datasource.destroy_ap_binding",
            &self.closed,
            self.rpc().destroy_ap_binding(request),
        )
        .await?;
        Ok(())
    }

    async fn add_federation(&self, federation: &Federation) -> Result<Federation, ZonectlError> {
        let request = pb::Federation::from(federation.clone());
        let added = unary(
            "datasource.add_federation",
            &self.closed,
            self.rpc().add_federation(request),
        )
        .await?;
        Ok(added.into())
    }

    async fn list_federations(&self) -> Result<Vec<Federation>, ZonectlError> {
        let list = unary(
            "datasource.list_federations",
            &self.closed,
            self.rpc().list_federations(pb::Empty {}),
        )
        .await?;
        Ok(list.federations.into_iter().map(Into::into).collect())
    }

    async fn list_federations_by_trust_zone(
        &self,
        trust_zone: &str,
    ) -> Result<Vec<Federation>, ZonectlError> {
        let list = unary(
            "datasource.list_federations_by_trust_zone",
            &self.closed,
            self.rpc().list_federations_by_trust_zone(name(trust_zone)),
        )
        .await?;
        Ok(list.federations.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonectl_config::MemoryLoader;
    use zonectl_core::Code;
    use zonectl_store::LocalDataSource;

    use crate::broker::Broker;
    use crate::registry::ServiceRegistry;
    use crate::transport;

    /// Serves `store` on a loopback port and returns a client for it.
    async fn served(store: Arc<dyn DataSource>) -> (DataSourceClient, CancellationToken) {
        let mut registry = ServiceRegistry::new();
        registry.register_data_source(1, "entity store", store);
        let stop = CancellationToken::new();
        let (listener, address) = transport::listen().await.unwrap();
        let router = registry.routes(&Broker::new(), &stop);
        tokio::spawn(transport::serve(router, listener, stop.clone()));
        let channel = transport::connect(&address).await.unwrap();
        (DataSourceClient::new(channel, CancellationToken::new()), stop)
    }

    async fn empty_store() -> Arc<LocalDataSource> {
        let store = LocalDataSource::new(MemoryLoader::new()).unwrap();
        store.init(Vec::new()).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn clusters_travel_both_ways() {
        let store = empty_store().await;
        let (client, _stop) = served(store.clone()).await;
        client
            .add_trust_zone(&TrustZone {
                name: "tz1".into(),
                trust_domain: "td1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        client
            .add_cluster(&Cluster {
                name: "c1".into(),
                trust_zone: "tz1".into(),
                kubernetes_context: "kind-c1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let listed = client
            .list_clusters(&ClusterFilter::trust_zone("tz1"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], store.get_cluster("c1", "tz1").await.unwrap());
    }

    #[tokio::test]
    async fn a_closed_connection_fails_without_dialing() {
        let (client, _stop) = served(empty_store().await).await;
        client.closed.cancel();
        let err = client.list_trust_zones().await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(err.to_string().contains("datasource.list_trust_zones"));
    }
}

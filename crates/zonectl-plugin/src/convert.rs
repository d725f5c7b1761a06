// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping between the entity model and the generated protobuf messages,
//! and between [`ZonectlError`] and [`tonic::Status`].
//!
//! Errors cross the wire as a gRPC code plus the error's display text. The
//! calling side rebuilds them as [`ZonectlError::Rpc`] naming the call, so an
//! `AlreadyExists` raised inside the plugin is still an `AlreadyExists` on the
//! host.

use zonectl_core::{
    ApBinding, AttestationPolicy, BundleEndpointProfile, Cluster, ClusterFilter, ClusterProfile,
    Code, DeployOptions, Federation, PolicyRule, RpcStatus, Status, TrustProvider,
    TrustProviderKind, TrustZone, ZonectlError,
};

use crate::proto as pb;

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

fn grpc_code(code: Code) -> tonic::Code {
    match code {
        Code::Ok => tonic::Code::Ok,
        Code::Cancelled => tonic::Code::Cancelled,
        Code::InvalidArgument => tonic::Code::InvalidArgument,
        Code::NotFound => tonic::Code::NotFound,
        Code::AlreadyExists => tonic::Code::AlreadyExists,
        Code::FailedPrecondition => tonic::Code::FailedPrecondition,
        Code::DeadlineExceeded => tonic::Code::DeadlineExceeded,
        Code::Unavailable => tonic::Code::Unavailable,
        Code::Unimplemented => tonic::Code::Unimplemented,
        Code::Internal => tonic::Code::Internal,
    }
}

fn core_code(code: tonic::Code) -> Code {
    match code {
        tonic::Code::Ok => Code::Ok,
        tonic::Code::Cancelled => Code::Cancelled,
        tonic::Code::InvalidArgument | tonic::Code::OutOfRange => Code::InvalidArgument,
        tonic::Code::NotFound => Code::NotFound,
        tonic::Code::AlreadyExists => Code::AlreadyExists,
        tonic::Code::FailedPrecondition | tonic::Code::Aborted => Code::FailedPrecondition,
        tonic::Code::DeadlineExceeded => Code::DeadlineExceeded,
        tonic::Code::Unavailable => Code::Unavailable,
        tonic::Code::Unimplemented => Code::Unimplemented,
        tonic::Code::Unknown
        | tonic::Code::ResourceExhausted
        | tonic::Code::PermissionDenied
        | tonic::Code::Unauthenticated
        | tonic::Code::Internal
        | tonic::Code::DataLoss => Code::Internal,
    }
}

/// The status a service handler answers with when `err` escapes it.
pub(crate) fn to_grpc(err: &ZonectlError) -> tonic::Status {
    let status = err.to_status();
    tonic::Status::new(grpc_code(status.code), status.message)
}

/// The error raised on the calling side when `call` fails with `status`.
pub(crate) fn from_grpc(call: &str, status: tonic::Status) -> ZonectlError {
    ZonectlError::from_status(
        call,
        RpcStatus::new(core_code(status.code()), status.message()),
    )
}

fn invalid(what: &str) -> ZonectlError {
    ZonectlError::InvalidArgument(format!("malformed {what} on the wire"))
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

impl From<BundleEndpointProfile> for pb::BundleEndpointProfile {
    fn from(profile: BundleEndpointProfile) -> Self {
        match profile {
            BundleEndpointProfile::HttpsSpiffe => Self::HttpsSpiffe,
            BundleEndpointProfile::HttpsWeb => Self::HttpsWeb,
        }
    }
}

impl From<pb::BundleEndpointProfile> for BundleEndpointProfile {
    fn from(profile: pb::BundleEndpointProfile) -> Self {
        match profile {
            pb::BundleEndpointProfile::HttpsSpiffe => Self::HttpsSpiffe,
            pb::BundleEndpointProfile::HttpsWeb => Self::HttpsWeb,
        }
    }
}

impl From<TrustProviderKind> for pb::TrustProviderKind {
    fn from(kind: TrustProviderKind) -> Self {
        match kind {
            TrustProviderKind::Kubernetes => Self::Kubernetes,
        }
    }
}

impl From<pb::TrustProviderKind> for TrustProviderKind {
    fn from(kind: pb::TrustProviderKind) -> Self {
        match kind {
            pb::TrustProviderKind::Kubernetes => Self::Kubernetes,
        }
    }
}

impl From<ClusterProfile> for pb::ClusterProfile {
    fn from(profile: ClusterProfile) -> Self {
        match profile {
            ClusterProfile::Kubernetes => Self::Kubernetes,
            ClusterProfile::Istio => Self::Istio,
        }
    }
}

impl From<pb::ClusterProfile> for ClusterProfile {
    fn from(profile: pb::ClusterProfile) -> Self {
        match profile {
            pb::ClusterProfile::Kubernetes => Self::Kubernetes,
            pb::ClusterProfile::Istio => Self::Istio,
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

impl From<TrustZone> for pb::TrustZone {
    fn from(tz: TrustZone) -> Self {
        Self {
            id: tz.id,
            name: tz.name,
            trust_domain: tz.trust_domain,
            bundle_endpoint_url: tz.bundle_endpoint_url,
            bundle: tz.bundle,
            jwt_issuer: tz.jwt_issuer,
            bundle_endpoint_profile: pb::BundleEndpointProfile::from(tz.bundle_endpoint_profile)
                .into(),
            trust_provider_kind: pb::TrustProviderKind::from(tz.trust_provider.kind).into(),
            clusters: tz.clusters.into_iter().map(Into::into).collect(),
            federations: tz.federations.into_iter().map(Into::into).collect(),
            attestation_policies: tz.attestation_policies.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<pb::TrustZone> for TrustZone {
    fn from(tz: pb::TrustZone) -> Self {
        let bundle_endpoint_profile = tz.bundle_endpoint_profile().into();
        let kind = tz.trust_provider_kind().into();
        Self {
            id: tz.id,
            name: tz.name,
            trust_domain: tz.trust_domain,
            bundle_endpoint_url: tz.bundle_endpoint_url,
            bundle: tz.bundle,
            jwt_issuer: tz.jwt_issuer,
            bundle_endpoint_profile,
            trust_provider: TrustProvider { kind },
            clusters: tz.clusters.into_iter().map(Into::into).collect(),
            federations: tz.federations.into_iter().map(Into::into).collect(),
            attestation_policies: tz.attestation_policies.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Cluster> for pb::Cluster {
    fn from(cluster: Cluster) -> Self {
        Self {
            id: cluster.id,
            name: cluster.name,
            trust_zone: cluster.trust_zone,
            kubernetes_context: cluster.kubernetes_context,
            profile: pb::ClusterProfile::from(cluster.profile).into(),
            external_server: cluster.external_server,
            oidc_issuer_url: cluster.oidc_issuer_url,
            oidc_issuer_ca_cert: cluster.oidc_issuer_ca_cert,
        }
    }
}

impl From<pb::Cluster> for Cluster {
    fn from(cluster: pb::Cluster) -> Self {
        let profile = cluster.profile().into();
        Self {
            id: cluster.id,
            name: cluster.name,
            trust_zone: cluster.trust_zone,
            kubernetes_context: cluster.kubernetes_context,
            profile,
            external_server: cluster.external_server,
            oidc_issuer_url: cluster.oidc_issuer_url,
            oidc_issuer_ca_cert: cluster.oidc_issuer_ca_cert,
        }
    }
}

impl From<AttestationPolicy> for pb::AttestationPolicy {
    fn from(policy: AttestationPolicy) -> Self {
        let rule = match policy.rule {
            PolicyRule::Namespace { namespace } => {
                pb::attestation_policy::Rule::Namespace(pb::NamespaceRule { namespace })
            }
            PolicyRule::Annotated { annotations } => {
                pb::attestation_policy::Rule::Annotated(pb::AnnotatedRule { annotations })
            }
        };
        Self {
            id: policy.id,
            name: policy.name,
            rule: Some(rule),
        }
    }
}

impl TryFrom<pb::AttestationPolicy> for AttestationPolicy {
    type Error = ZonectlError;

    fn try_from(policy: pb::AttestationPolicy) -> Result<Self, Self::Error> {
        let rule = match policy.rule.ok_or_else(|| invalid("attestation policy rule"))? {
            pb::attestation_policy::Rule::Namespace(rule) => PolicyRule::Namespace {
                namespace: rule.namespace,
            },
            pb::attestation_policy::Rule::Annotated(rule) => PolicyRule::Annotated {
                annotations: rule.annotations,
            },
        };
        Ok(Self {
            id: policy.id,
            name: policy.name,
            rule,
        })
    }
}

impl From<ApBinding> for pb::ApBinding {
    fn from(binding: ApBinding) -> Self {
        Self {
            trust_zone: binding.trust_zone,
            policy: binding.policy,
            federates_with: binding.federates_with,
        }
    }
}

impl From<pb::ApBinding> for ApBinding {
    fn from(binding: pb::ApBinding) -> Self {
        Self {
            trust_zone: binding.trust_zone,
            policy: binding.policy,
            federates_with: binding.federates_with,
        }
    }
}

impl From<Federation> for pb::Federation {
    fn from(federation: Federation) -> Self {
        Self {
            trust_zone: federation.trust_zone,
            remote_trust_zone: federation.remote_trust_zone,
        }
    }
}

impl From<pb::Federation> for Federation {
    fn from(federation: pb::Federation) -> Self {
        Self {
            trust_zone: federation.trust_zone,
            remote_trust_zone: federation.remote_trust_zone,
        }
    }
}

impl From<ClusterFilter> for pb::ClusterFilter {
    fn from(filter: ClusterFilter) -> Self {
        Self {
            trust_zone: filter.trust_zone,
        }
    }
}

impl From<pb::ClusterFilter> for ClusterFilter {
    fn from(filter: pb::ClusterFilter) -> Self {
        Self {
            trust_zone: filter.trust_zone,
        }
    }
}

impl From<()> for pb::Empty {
    fn from(_: ()) -> Self {
        Self {}
    }
}

impl From<Vec<TrustZone>> for pb::TrustZoneList {
    fn from(trust_zones: Vec<TrustZone>) -> Self {
        Self {
            trust_zones: trust_zones.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Vec<Cluster>> for pb::ClusterList {
    fn from(clusters: Vec<Cluster>) -> Self {
        Self {
            clusters: clusters.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Vec<AttestationPolicy>> for pb::AttestationPolicyList {
    fn from(policies: Vec<AttestationPolicy>) -> Self {
        Self {
            policies: policies.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Vec<Federation>> for pb::FederationList {
    fn from(federations: Vec<Federation>) -> Self {
        Self {
            federations: federations.into_iter().map(Into::into).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

impl From<Status> for pb::DeployStatus {
    fn from(status: Status) -> Self {
        Self {
            stage: status.stage,
            message: status.message,
            done: status.done,
            error: status.error,
        }
    }
}

impl From<pb::DeployStatus> for Status {
    fn from(status: pb::DeployStatus) -> Self {
        Self {
            stage: status.stage,
            message: status.message,
            done: status.done,
            error: status.error,
        }
    }
}

impl From<DeployOptions> for pb::DeployOptions {
    fn from(options: DeployOptions) -> Self {
        Self {
            kube_config: options.kube_config,
            skip_wait: options.skip_wait,
        }
    }
}

impl From<pb::DeployOptions> for DeployOptions {
    fn from(options: pb::DeployOptions) -> Self {
        Self {
            kube_config: options.kube_config,
            skip_wait: options.skip_wait,
        }
    }
}

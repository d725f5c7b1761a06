// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entity commands: trust zones, clusters, policies, bindings and federations.
//!
//! Every handler works against whichever [`DataSource`] the invocation
//! selected, so the same code drives the local store and the plugin.

use zonectl_config::model::ProvisionConfig;
use zonectl_core::{
    ApBinding, AttestationPolicy, Cluster, ClusterFilter, DataSource, DeployOptions, Federation,
    PolicyRule, TrustZone, ZonectlError,
};
use zonectl_provision::{ensure_not_deployed, HelmCli, InstallTarget};

use crate::{BindingCommand, ClusterCommand, FederationCommand, PolicyCommand, TrustZoneCommand};

/// Parse `KEY=VALUE` for `--annotation`.
pub(crate) fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

pub(crate) async fn trust_zone(
    ds: &dyn DataSource,
    cmd: TrustZoneCommand,
) -> Result<(), ZonectlError> {
    match cmd {
        TrustZoneCommand::Add {
            name,
            trust_domain,
            bundle_endpoint_url,
            bundle_endpoint_profile,
            jwt_issuer,
        } => {
            let added = ds
                .add_trust_zone(&TrustZone {
                    name,
                    trust_domain,
                    bundle_endpoint_url,
                    bundle_endpoint_profile,
                    jwt_issuer,
                    ..Default::default()
                })
                .await?;
            println!("added trust zone {} ({})", added.name, added.trust_domain);
        }
        TrustZoneCommand::List => {
            for tz in ds.list_trust_zones().await? {
                println!("{}", describe_trust_zone(&tz));
            }
        }
        TrustZoneCommand::Update {
            name,
            bundle_endpoint_url,
            bundle_endpoint_profile,
            jwt_issuer,
        } => {
            let mut tz = ds.get_trust_zone(&name).await?;
            if bundle_endpoint_url.is_some() {
                tz.bundle_endpoint_url = bundle_endpoint_url;
            }
            if let Some(profile) = bundle_endpoint_profile {
                tz.bundle_endpoint_profile = profile;
            }
            if jwt_issuer.is_some() {
                tz.jwt_issuer = jwt_issuer;
            }
            ds.update_trust_zone(&tz).await?;
            println!("updated trust zone {name}");
        }
    }
    Ok(())
}

fn describe_trust_zone(tz: &TrustZone) -> String {
    let clusters: Vec<&str> = tz.clusters.iter().map(|c| c.name.as_str()).collect();
    let mut line = format!(
        "{}\ttrust domain {}\tclusters [{}]",
        tz.name,
        tz.trust_domain,
        clusters.join(", ")
    );
    if let Some(url) = &tz.bundle_endpoint_url {
        line.push_str(&format!("\tbundle endpoint {url} ({})", tz.bundle_endpoint_profile));
    }
    if tz.bundle.is_some() {
        line.push_str("\tbundle recorded");
    }
    line
}

pub(crate) async fn cluster(
    ds: &dyn DataSource,
    provision: &ProvisionConfig,
    cmd: ClusterCommand,
) -> Result<(), ZonectlError> {
    match cmd {
        ClusterCommand::Add {
            name,
            trust_zone,
            kubernetes_context,
            profile,
            external_server,
            oidc_issuer_url,
            oidc_issuer_ca_cert,
        } => {
            let added = ds
                .add_cluster(&Cluster {
                    name,
                    trust_zone,
                    kubernetes_context,
                    profile,
                    external_server,
                    oidc_issuer_url,
                    oidc_issuer_ca_cert,
                    ..Default::default()
                })
                .await?;
            println!("added cluster {} to trust zone {}", added.name, added.trust_zone);
        }
        ClusterCommand::List { trust_zone } => {
            let filter = ClusterFilter { trust_zone };
            for c in ds.list_clusters(&filter).await? {
                println!(
                    "{}\ttrust zone {}\tcontext {}\tprofile {}",
                    c.name, c.trust_zone, c.kubernetes_context, c.profile
                );
            }
        }
        ClusterCommand::Del {
            name,
            trust_zone,
            force,
        } => {
            let cluster = ds.get_cluster(&name, &trust_zone).await?;
            let target = InstallTarget {
                trust_zone: ds.get_trust_zone(&trust_zone).await?,
                cluster: cluster.clone(),
                options: DeployOptions::default(),
            };
            let installer = HelmCli::for_target(provision.clone(), &target);
            ensure_not_deployed(&installer, &cluster, force).await?;
            ds.destroy_cluster(&name, &trust_zone).await?;
            println!("removed cluster {name} from trust zone {trust_zone}");
        }
    }
    Ok(())
}

pub(crate) async fn policy(ds: &dyn DataSource, cmd: PolicyCommand) -> Result<(), ZonectlError> {
    match cmd {
        PolicyCommand::Add {
            name,
            namespace,
            annotations,
        } => {
            let rule = match namespace {
                Some(namespace) => PolicyRule::Namespace { namespace },
                None => PolicyRule::Annotated {
                    annotations: annotations.into_iter().collect(),
                },
            };
            let added = ds
                .add_attestation_policy(&AttestationPolicy {
                    id: String::new(),
                    name,
                    rule,
                })
                .await?;
            println!("added attestation policy {}", added.name);
        }
        PolicyCommand::List => {
            for policy in ds.list_attestation_policies().await? {
                println!("{}\t{}", policy.name, describe_rule(&policy.rule));
            }
        }
    }
    Ok(())
}

fn describe_rule(rule: &PolicyRule) -> String {
    match rule {
        PolicyRule::Namespace { namespace } => format!("namespace {namespace}"),
        PolicyRule::Annotated { annotations } => {
            let pairs: Vec<String> = annotations.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("annotations {}", pairs.join(","))
        }
    }
}

pub(crate) async fn binding(ds: &dyn DataSource, cmd: BindingCommand) -> Result<(), ZonectlError> {
    match cmd {
        BindingCommand::Add {
            trust_zone,
            policy,
            federates_with,
        } => {
            let added = ds
                .add_ap_binding(&ApBinding {
                    trust_zone,
                    policy,
                    federates_with,
                })
                .await?;
            println!(
                "bound attestation policy {} to trust zone {}",
                added.policy, added.trust_zone
            );
        }
        BindingCommand::Del { trust_zone, policy } => {
            ds.destroy_ap_binding(&ApBinding {
                trust_zone: trust_zone.clone(),
                policy: policy.clone(),
                federates_with: Vec::new(),
            })
            .await?;
            println!("unbound attestation policy {policy} from trust zone {trust_zone}");
        }
        BindingCommand::List { trust_zone } => {
            let zones = match trust_zone {
                Some(name) => vec![ds.get_trust_zone(&name).await?],
                None => ds.list_trust_zones().await?,
            };
            for b in zones.iter().flat_map(|tz| tz.attestation_policies.iter()) {
                println!("{}", describe_binding(b));
            }
        }
    }
    Ok(())
}

fn describe_binding(binding: &ApBinding) -> String {
    if binding.federates_with.is_empty() {
        format!("{}\t{}", binding.trust_zone, binding.policy)
    } else {
        format!(
            "{}\t{}\tfederates with {}",
            binding.trust_zone,
            binding.policy,
            binding.federates_with.join(", ")
        )
    }
}

pub(crate) async fn federation(
    ds: &dyn DataSource,
    cmd: FederationCommand,
) -> Result<(), ZonectlError> {
    match cmd {
        FederationCommand::Add {
            trust_zone,
            remote_trust_zone,
        } => {
            let added = ds
                .add_federation(&Federation {
                    trust_zone,
                    remote_trust_zone,
                })
                .await?;
            println!(
                "trust zone {} now federates with {}",
                added.trust_zone, added.remote_trust_zone
            );
        }
        FederationCommand::List { trust_zone } => {
            let federations = match trust_zone {
                Some(name) => ds.list_federations_by_trust_zone(&name).await?,
                None => ds.list_federations().await?,
            };
            for f in federations {
                println!("{} -> {}", f.trust_zone, f.remote_trust_zone);
            }
        }
    }
    Ok(())
}

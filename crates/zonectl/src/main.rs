// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! zonectl - manage SPIFFE trust zones and deploy SPIRE to their clusters.
//!
//! This is the binary entry point. Launched by another zonectl with the
//! plugin cookie set, it serves its local store and provisioner over the
//! plugin protocol instead of parsing a command line.

mod deploy;
mod entities;
mod serve;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use zonectl_config::ZonectlSettings;
use zonectl_core::{BundleEndpointProfile, ClusterProfile, ZonectlError};
use zonectl_plugin::PluginManager;

/// zonectl - manage SPIFFE trust zones and deploy SPIRE to their clusters.
#[derive(Parser, Debug)]
#[command(name = "zonectl", version, about, long_about = None)]
struct Cli {
    /// Read settings from this file instead of the standard locations.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data file, optionally recording an external plugin.
    Init {
        /// Plugin to serve entities and provisioning (only `zonectl-connect`).
        #[arg(long = "plugin", value_name = "ID")]
        plugins: Vec<String>,
    },
    /// Manage trust zones.
    #[command(name = "trust-zone", subcommand)]
    TrustZone(TrustZoneCommand),
    /// Manage the clusters backing trust zones.
    #[command(subcommand)]
    Cluster(ClusterCommand),
    /// Manage attestation policies.
    #[command(name = "attestation-policy", subcommand)]
    AttestationPolicy(PolicyCommand),
    /// Bind attestation policies to trust zones.
    #[command(name = "ap-binding", subcommand)]
    ApBinding(BindingCommand),
    /// Manage federation between trust zones.
    #[command(subcommand)]
    Federation(FederationCommand),
    /// Deploy SPIRE to every trust zone's cluster.
    Up(DeployArgs),
    /// Remove SPIRE from every trust zone's cluster.
    Down(DeployArgs),
}

#[derive(Subcommand, Debug)]
enum TrustZoneCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        trust_domain: String,
        #[arg(long)]
        bundle_endpoint_url: Option<String>,
        #[arg(long, default_value_t = BundleEndpointProfile::HttpsSpiffe)]
        bundle_endpoint_profile: BundleEndpointProfile,
        #[arg(long)]
        jwt_issuer: Option<String>,
    },
    List,
    /// Change the mutable fields of a trust zone.
    Update {
        #[arg(long)]
        name: String,
        #[arg(long)]
        bundle_endpoint_url: Option<String>,
        #[arg(long)]
        bundle_endpoint_profile: Option<BundleEndpointProfile>,
        #[arg(long)]
        jwt_issuer: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ClusterCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        trust_zone: String,
        #[arg(long)]
        kubernetes_context: String,
        #[arg(long, default_value_t = ClusterProfile::Kubernetes)]
        profile: ClusterProfile,
        /// The SPIRE server runs outside the cluster.
        #[arg(long)]
        external_server: bool,
        #[arg(long)]
        oidc_issuer_url: Option<String>,
        #[arg(long)]
        oidc_issuer_ca_cert: Option<String>,
    },
    List {
        #[arg(long)]
        trust_zone: Option<String>,
    },
    /// Remove a cluster. Refused while SPIRE is still installed on it.
    Del {
        #[arg(long)]
        name: String,
        #[arg(long)]
        trust_zone: String,
        /// Skip the check for an existing installation.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    Add {
        #[arg(long)]
        name: String,
        /// Select every pod in this namespace.
        #[arg(long, conflicts_with = "annotations", required_unless_present = "annotations")]
        namespace: Option<String>,
        /// Select pods carrying this annotation. Repeatable.
        #[arg(
            long = "annotation",
            value_name = "KEY=VALUE",
            value_parser = entities::parse_key_value
        )]
        annotations: Vec<(String, String)>,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum BindingCommand {
    Add {
        #[arg(long)]
        trust_zone: String,
        #[arg(long)]
        policy: String,
        /// Trust zone the selected workloads may trust. Repeatable.
        #[arg(long = "federates-with", value_name = "TRUST_ZONE")]
        federates_with: Vec<String>,
    },
    Del {
        #[arg(long)]
        trust_zone: String,
        #[arg(long)]
        policy: String,
    },
    List {
        #[arg(long)]
        trust_zone: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum FederationCommand {
    /// Let `--trust-zone` trust `--remote-trust-zone`.
    Add {
        #[arg(long)]
        trust_zone: String,
        #[arg(long)]
        remote_trust_zone: String,
    },
    List {
        #[arg(long)]
        trust_zone: Option<String>,
    },
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Kubeconfig file passed to helm and kubectl.
    #[arg(long)]
    kubeconfig: Option<String>,
    /// Return without waiting for the SPIRE servers to become ready.
    #[arg(long)]
    skip_wait: bool,
}

fn load_settings(path: Option<&PathBuf>) -> Option<ZonectlSettings> {
    let loaded = match path {
        Some(path) => zonectl_config::load_and_validate_path(path),
        None => zonectl_config::load_and_validate(),
    };
    match loaded {
        Ok(settings) => Some(settings),
        Err(errors) => {
            zonectl_config::render_errors(&errors);
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if zonectl_plugin::launched_as_plugin() {
        let Some(settings) = load_settings(None) else {
            return ExitCode::FAILURE;
        };
        init_tracing(&settings.cli.log_level);
        return match serve::run_plugin(settings).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("zonectl plugin: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let cli = Cli::parse();
    let Some(settings) = load_settings(cli.config.as_ref()) else {
        return ExitCode::FAILURE;
    };
    init_tracing(&settings.cli.log_level);

    match run(cli.command, settings, cli.plain).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: Commands,
    settings: ZonectlSettings,
    plain: bool,
) -> Result<(), ZonectlError> {
    let manager = PluginManager::new(settings.clone())?;
    let result = dispatch(command, &manager, &settings, plain).await;
    manager.shutdown().await;
    result
}

async fn dispatch(
    command: Commands,
    manager: &PluginManager,
    settings: &ZonectlSettings,
    plain: bool,
) -> Result<(), ZonectlError> {
    match command {
        Commands::Init { plugins } => {
            manager.init(plugins).await?;
            println!("initialised {}", settings.cli.data_file);
            Ok(())
        }
        Commands::TrustZone(cmd) => {
            entities::trust_zone(manager.data_source().await?.as_ref(), cmd).await
        }
        Commands::Cluster(cmd) => {
            let ds = manager.data_source().await?;
            entities::cluster(ds.as_ref(), &settings.provision, cmd).await
        }
        Commands::AttestationPolicy(cmd) => {
            entities::policy(manager.data_source().await?.as_ref(), cmd).await
        }
        Commands::ApBinding(cmd) => {
            entities::binding(manager.data_source().await?.as_ref(), cmd).await
        }
        Commands::Federation(cmd) => {
            entities::federation(manager.data_source().await?.as_ref(), cmd).await
        }
        Commands::Up(args) => deploy::up(manager, settings, args, plain).await,
        Commands::Down(args) => deploy::down(manager, settings, args, plain).await,
    }
}

/// Logs go to stderr. In plugin mode stdout carries the handshake line.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zonectl={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

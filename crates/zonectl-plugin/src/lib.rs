// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Out-of-process backends for zonectl.
//!
//! A plugin is a subprocess that announces a loopback listener with a
//! one-line handshake. The host connects over gRPC, checks liveness through
//! the `Controller` service and opens the [`Broker`] stream. The entity store
//! and the provisioner are ordinary gRPC services generated from
//! `proto/zonectl/plugin/v1/plugin.proto`. While a provision stream runs, the
//! plugin calls back into the host's entity store on a second server the
//! host starts and announces through the broker.
//!
//! [`PluginManager`] decides per invocation whether the local store or the
//! external plugin backs the CLI.

pub mod broker;
pub mod client;
pub(crate) mod convert;
pub mod datasource;
pub mod handshake;
pub mod manager;
pub mod proto;
pub mod provision;
pub mod registry;
pub mod server;
pub(crate) mod transport;

pub use broker::{Broker, BrokerServer};
pub use client::{LaunchOptions, PluginClient};
pub use datasource::{DataSourceClient, DataSourceService};
pub use handshake::{Handshake, Network, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION};
pub use manager::{select_backend, Backend, PluginManager};
pub use provision::{ProvisionClient, ProvisionService};
pub use registry::{
    ServiceEntry, ServiceRegistry, DATASOURCE_SERVICE, PROVISION_SERVICE, SERVICE_VERSION,
};
pub use server::{launched_as_plugin, serve, serve_on};

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for zonectl.
//!
//! Holds the entity model, the error type and the two backend contracts,
//! [`DataSource`] and [`Provision`]. The local store, the plugin adapters and
//! the provisioner all build on these.

pub mod error;
pub mod traits;
pub mod types;
pub mod validation;

pub use error::{Code, RpcStatus, ZonectlError};
pub use traits::{DataSource, Provision, StatusStream};
pub use types::{
    ApBinding, AttestationPolicy, BundleEndpointProfile, Cluster, ClusterFilter, ClusterProfile,
    Config, DeployOptions, Federation, PolicyRule, Status, TrustProvider, TrustProviderKind,
    TrustZone,
};

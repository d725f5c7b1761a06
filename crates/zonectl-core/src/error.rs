// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types shared by every zonectl crate.
//!
//! [`ZonectlError`] is the single error returned by the data source and
//! provision contracts. Errors that cross a plugin connection are flattened
//! into an [`RpcStatus`] on the wire and come back out on the other side as
//! [`ZonectlError::Rpc`], so callers can always tell a remote failure from a
//! local one.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Status codes carried by [`RpcStatus`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Code {
    Ok,
    Cancelled,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    DeadlineExceeded,
    Unavailable,
    Unimplemented,
    Internal,
}

/// A failure as it travels across a plugin connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: Code,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code = {}, message = {}", self.code, self.message)
    }
}

/// The primary error type used across zonectl.
#[derive(Debug, Error)]
pub enum ZonectlError {
    /// Malformed or missing configuration (settings file or data document).
    #[error("configuration error: {0}")]
    Config(String),

    /// The backing store does not exist yet.
    #[error("the data source has not been initialised, run `zonectl init` first")]
    NotInitialized,

    /// An entity with the same identity is already present.
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// A referenced entity does not exist.
    #[error("failed to find {kind} {name}")]
    NotFound { kind: &'static str, name: String },

    /// The remote trust zone exists but is not a federation target.
    #[error("trust zone {trust_zone} is not federated with trust zone {remote}")]
    NotFederated { trust_zone: String, remote: String },

    /// An update attempted to change an identity field.
    #[error("cannot update {field} for existing {kind} {name}")]
    Immutable {
        kind: &'static str,
        name: String,
        field: &'static str,
    },

    /// A request argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A precondition on live state failed (e.g. the cluster is still deployed).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Reading or writing the persisted document failed.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The plugin connection could not be opened or broke.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The plugin handshake line was missing or did not match.
    #[error("plugin handshake failed: {0}")]
    Handshake(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// A call to a plugin failed on the remote side.
    #[error("rpc error calling {call}: {status}")]
    Rpc { call: String, status: RpcStatus },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The peer does not offer the requested service or method.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Provisioning failure outside of a status stream.
    #[error("provision error: {0}")]
    Provision(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ZonectlError {
    /// Shorthand for a transport error without an underlying source.
    pub fn transport(message: impl Into<String>) -> Self {
        ZonectlError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// The wire code this error is reported with when sent to a peer.
    pub fn code(&self) -> Code {
        match self {
            ZonectlError::Config(_) | ZonectlError::InvalidArgument(_) => Code::InvalidArgument,
            ZonectlError::NotInitialized
            | ZonectlError::NotFederated { .. }
            | ZonectlError::Immutable { .. }
            | ZonectlError::FailedPrecondition(_) => Code::FailedPrecondition,
            ZonectlError::AlreadyExists { .. } => Code::AlreadyExists,
            ZonectlError::NotFound { .. } => Code::NotFound,
            ZonectlError::Transport { .. } | ZonectlError::Handshake(_) => Code::Unavailable,
            ZonectlError::Timeout { .. } => Code::DeadlineExceeded,
            ZonectlError::Rpc { status, .. } => status.code,
            ZonectlError::Cancelled => Code::Cancelled,
            ZonectlError::Unimplemented(_) => Code::Unimplemented,
            ZonectlError::Storage { .. }
            | ZonectlError::Provision(_)
            | ZonectlError::Internal(_) => Code::Internal,
        }
    }

    /// Flattens this error into the form sent to a peer.
    ///
    /// A remote error being relayed keeps its original status rather than
    /// gaining another layer of "rpc error calling ..." text.
    pub fn to_status(&self) -> RpcStatus {
        match self {
            ZonectlError::Rpc { status, .. } => status.clone(),
            other => RpcStatus::new(other.code(), other.to_string()),
        }
    }

    /// Builds the error raised on the calling side of a failed remote call.
    pub fn from_status(call: impl Into<String>, status: RpcStatus) -> Self {
        ZonectlError::Rpc {
            call: call.into(),
            status,
        }
    }
}

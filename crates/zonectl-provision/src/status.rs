// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress reporting for deploy and tear-down.
//!
//! The producer writes into a [`StatusSink`] backed by a bounded channel and
//! the consumer reads the matching [`StatusStream`]. Dropping the stream makes
//! every later send fail, which is how the producer learns it has been
//! abandoned. The stream ends once every sink is dropped.

use futures::StreamExt;
use tokio::sync::mpsc;
use zonectl_core::{Status, StatusStream, ZonectlError};

/// Bounded so a slow renderer applies backpressure to the producer.
pub const STATUS_BUFFER: usize = 16;

pub mod stage {
    pub const PREPARING: &str = "Preparing";
    pub const PREPARED: &str = "Prepared";
    pub const INSTALLING: &str = "Installing";
    pub const INSTALLED: &str = "Installed";
    pub const UPGRADING: &str = "Upgrading";
    pub const UPGRADED: &str = "Upgraded";
    pub const WAITING: &str = "Waiting";
    pub const READY: &str = "Ready";
    pub const CONFIGURING: &str = "Configuring";
    pub const CONFIGURED: &str = "Configured";
    pub const UNINSTALLING: &str = "Uninstalling";
    pub const UNINSTALLED: &str = "Uninstalled";
    pub const TIMED_OUT: &str = "TimedOut";
}

/// A connected sink and stream.
pub fn status_channel(capacity: usize) -> (StatusSink, StatusStream) {
    let (tx, rx) = mpsc::channel(capacity);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|status| (status, rx))
    });
    (StatusSink { tx }, stream.boxed())
}

#[derive(Debug, Clone)]
pub struct StatusSink {
    tx: mpsc::Sender<Status>,
}

impl StatusSink {
    /// Deliver one status, failing with `Cancelled` once the consumer is gone.
    pub async fn send(&self, status: Status) -> Result<(), ZonectlError> {
        self.tx.send(status).await.map_err(|_| ZonectlError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Builds status messages about one cluster of one trust zone.
#[derive(Debug, Clone)]
pub struct StatusBuilder {
    trust_zone: String,
    cluster: String,
}

impl StatusBuilder {
    pub fn new(trust_zone: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            trust_zone: trust_zone.into(),
            cluster: cluster.into(),
        }
    }

    fn message(&self, action: &str) -> String {
        format!("{action} for {} in {}", self.cluster, self.trust_zone)
    }

    pub fn progress(&self, stage: &str, action: &str) -> Status {
        Status {
            stage: stage.to_string(),
            message: self.message(action),
            done: false,
            error: None,
        }
    }

    pub fn done(&self, stage: &str, action: &str) -> Status {
        Status {
            done: true,
            ..self.progress(stage, action)
        }
    }

    pub fn error(&self, stage: &str, action: &str, error: &ZonectlError) -> Status {
        Status {
            done: true,
            error: Some(error.to_string()),
            ..self.progress(stage, action)
        }
    }
}

/// A status that is not tied to a cluster.
pub fn global(stage: &str, message: &str, done: bool) -> Status {
    Status {
        stage: stage.to_string(),
        message: message.to_string(),
        done,
        error: None,
    }
}

/// A failed status that is not tied to a cluster.
pub fn global_error(stage: &str, message: &str, error: &ZonectlError) -> Status {
    Status {
        stage: stage.to_string(),
        message: message.to_string(),
        done: true,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_names_cluster_and_zone() {
        let sb = StatusBuilder::new("tz1", "local1");
        let status = sb.progress(stage::INSTALLING, "Installing SPIRE chart");
        assert_eq!(status.message, "Installing SPIRE chart for local1 in tz1");
        assert!(!status.done);

        let failed = sb.error(stage::INSTALLING, "Installation failed", &ZonectlError::Cancelled);
        assert!(failed.is_failure());
    }

    #[tokio::test]
    async fn stream_ends_when_sink_dropped() {
        let (sink, stream) = status_channel(2);
        sink.send(global(stage::PREPARING, "a", false)).await.unwrap();
        drop(sink);
        let all: Vec<Status> = stream.collect().await;
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn abandoned_stream_fails_the_producer() {
        let (sink, stream) = status_channel(1);
        drop(stream);
        assert!(sink.is_closed());
        let err = sink.send(global(stage::PREPARING, "a", false)).await.unwrap_err();
        assert!(matches!(err, ZonectlError::Cancelled));
    }
}

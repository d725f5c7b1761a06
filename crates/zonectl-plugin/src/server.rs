// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The plugin side: listen, announce the handshake, serve one host.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response};
use tracing::{debug, info, warn};
use zonectl_core::ZonectlError;

use crate::broker::{Broker, BrokerService};
use crate::convert::to_grpc;
use crate::handshake::{Handshake, Network, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE};
use crate::proto as pb;
use crate::proto::controller_server::{Controller, ControllerServer};
use crate::proto::grpc_broker_server::GrpcBrokerServer;
use crate::registry::ServiceRegistry;
use crate::transport;

/// How long open calls get to finish once the plugin decides to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Whether this process was launched by a zonectl host.
pub fn launched_as_plugin() -> bool {
    std::env::var(MAGIC_COOKIE_KEY).is_ok_and(|v| v == MAGIC_COOKIE_VALUE)
}

/// Serve `registry` to the host that launched this process.
///
/// Refuses to run unless the host's cookie is present in the environment.
/// Returns once the host disconnects, asks the plugin to shut down, or
/// `cancel` fires.
pub async fn serve(registry: ServiceRegistry, cancel: CancellationToken) -> Result<(), ZonectlError> {
    if !launched_as_plugin() {
        return Err(ZonectlError::Handshake(format!(
            "this binary is a zonectl plugin and must be launched by zonectl ({MAGIC_COOKIE_KEY} is not set)"
        )));
    }
    serve_on(registry, cancel, tokio::io::stdout()).await
}

/// Like [`serve`], writing the handshake line to `announce` and skipping the
/// cookie check.
pub async fn serve_on<W>(
    registry: ServiceRegistry,
    cancel: CancellationToken,
    mut announce: W,
) -> Result<(), ZonectlError>
where
    W: AsyncWrite + Unpin,
{
    let (listener, address) = transport::listen().await?;
    let broker = Broker::new();
    let stop = cancel.child_token();
    let registry = Arc::new(registry);

    let router = registry
        .routes(&broker, &stop)
        .add_service(ControllerServer::new(ControllerService {
            registry: registry.clone(),
            stop: stop.clone(),
        }))
        .add_service(GrpcBrokerServer::new(BrokerService::new(broker.clone())));

    write_handshake(&mut announce, &Handshake::announce(Network::Tcp, address)).await?;
    let mut server = tokio::spawn(transport::serve(router, listener, stop.clone()));

    tokio::select! {
        _ = stop.cancelled() => info!("plugin stopping"),
        _ = broker.closed() => info!("host disconnected"),
        finished = &mut server => {
            broker.close();
            return joined(finished);
        }
    }

    stop.cancel();
    broker.close();
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(finished) => joined(finished),
        Err(_) => {
            warn!(grace = ?SHUTDOWN_GRACE, "open calls did not finish, stopping anyway");
            server.abort();
            Ok(())
        }
    }
}

fn joined(finished: Result<Result<(), ZonectlError>, JoinError>) -> Result<(), ZonectlError> {
    finished.map_err(|e| ZonectlError::Internal(format!("plugin server task failed: {e}")))?
}

async fn write_handshake<W>(out: &mut W, handshake: &Handshake) -> Result<(), ZonectlError>
where
    W: AsyncWrite + Unpin,
{
    let announce_err = |e: std::io::Error| ZonectlError::Transport {
        message: "failed to announce the handshake".into(),
        source: Some(Box::new(e)),
    };
    out.write_all(format!("{handshake}\n").as_bytes())
        .await
        .map_err(announce_err)?;
    out.flush().await.map_err(announce_err)?;
    debug!(address = %handshake.address, "handshake announced");
    Ok(())
}

/// Liveness, service negotiation and orderly exit.
struct ControllerService {
    registry: Arc<ServiceRegistry>,
    stop: CancellationToken,
}

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn ping(
        &self,
        request: Request<pb::PingRequest>,
    ) -> Result<Response<pb::PingReply>, tonic::Status> {
        let nonce = request.into_inner().nonce;
        Ok(Response::new(pb::PingReply { nonce }))
    }

    async fn dispense(
        &self,
        request: Request<pb::DispenseRequest>,
    ) -> Result<Response<pb::Empty>, tonic::Status> {
        let request = request.into_inner();
        let entry = self
            .registry
            .get(&request.name, request.version)
            .map_err(|e| to_grpc(&e))?;
        debug!(service = %entry, "dispensed");
        Ok(Response::new(pb::Empty {}))
    }

    async fn shutdown(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::Empty>, tonic::Status> {
        info!("host asked the plugin to shut down");
        self.stop.cancel();
        Ok(Response::new(pb::Empty {}))
    }
}

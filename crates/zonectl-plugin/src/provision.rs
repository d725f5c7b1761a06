// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The provisioner carried over gRPC.
//!
//! `deploy` and `tear_down` need the host's data source while they run. The
//! client serves it through the broker for exactly as long as the status
//! stream is alive and passes the broker id in the request; the service dials
//! that id and hands the resulting client to the real provisioner.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::{Request, Response, Streaming};
use tracing::debug;
use zonectl_core::{DataSource, DeployOptions, Provision, Status, StatusStream, ZonectlError};

use crate::broker::{Broker, BrokerServer};
use crate::convert::to_grpc;
use crate::datasource::DataSourceClient;
use crate::proto as pb;
use crate::proto::provisioner_client::ProvisionerClient;
use crate::proto::provisioner_server::{Provisioner, ProvisionerServer};
use crate::registry::{ServiceRegistry, SERVICE_VERSION};
use crate::transport::{unary, MAX_MESSAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Deploy,
    TearDown,
}

impl Operation {
    fn call(self) -> &'static str {
        match self {
            Operation::Deploy => "provision.deploy",
            Operation::TearDown => "provision.tear_down",
        }
    }
}

type DeployStatusStream =
    Pin<Box<dyn Stream<Item = Result<pb::DeployStatus, tonic::Status>> + Send + 'static>>;

/// Serves a [`Provision`] implementation to the peer.
pub struct ProvisionService {
    inner: Arc<dyn Provision>,
    broker: Broker,
    stop: CancellationToken,
}

impl ProvisionService {
    /// Streams dial their callbacks on `broker` and end when `stop` fires.
    pub(crate) fn new(inner: Arc<dyn Provision>, broker: Broker, stop: CancellationToken) -> Self {
        Self {
            inner,
            broker,
            stop,
        }
    }

    pub(crate) fn into_service(self) -> ProvisionerServer<Self> {
        ProvisionerServer::new(self)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE)
    }

    async fn start(
        &self,
        operation: Operation,
        request: pb::DeployRequest,
    ) -> Result<Response<DeployStatusStream>, tonic::Status> {
        let callback = self
            .broker
            .dial(request.broker_id)
            .await
            .map_err(|e| to_grpc(&e))?;
        let data_source: Arc<dyn DataSource> =
            Arc::new(DataSourceClient::new(callback, self.broker.closed_token()));
        let options = request.options.map(DeployOptions::from).unwrap_or_default();
        debug!(call = operation.call(), broker_id = request.broker_id, "starting provision stream");

        let cancel = self.stop.child_token();
        let statuses = match operation {
            Operation::Deploy => self.inner.deploy(data_source, options, cancel.clone()).await,
            Operation::TearDown => {
                self.inner
                    .tear_down(data_source, options, cancel.clone())
                    .await
            }
        }
        .map_err(|e| to_grpc(&e))?;

        // Dropping the response stream, which the server does when the host
        // resets the call, cancels the producer.
        let guard = cancel.clone().drop_guard();
        let stream = statuses
            .take_until(async move { cancel.cancelled().await })
            .map(move |status| {
                let _held = &guard;
                Ok(pb::DeployStatus::from(status))
            });
        Ok(Response::new(Box::pin(stream)))
    }
}

#[tonic::async_trait]
impl Provisioner for ProvisionService {
    async fn validate(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::Empty>, tonic::Status> {
        self.inner
            .validate()
            .await
            .map(|()| Response::new(pb::Empty {}))
            .map_err(|e| to_grpc(&e))
    }

    type DeployStream = DeployStatusStream;

    async fn deploy(
        &self,
        request: Request<pb::DeployRequest>,
    ) -> Result<Response<Self::DeployStream>, tonic::Status> {
        self.start(Operation::Deploy, request.into_inner()).await
    }

    type TearDownStream = DeployStatusStream;

    async fn tear_down(
        &self,
        request: Request<pb::DeployRequest>,
    ) -> Result<Response<Self::TearDownStream>, tonic::Status> {
        self.start(Operation::TearDown, request.into_inner()).await
    }
}

/// A [`Provision`] living on the other side of a connection.
#[derive(Debug, Clone)]
pub struct ProvisionClient {
    rpc: ProvisionerClient<Channel>,
    broker: Broker,
}

impl ProvisionClient {
    pub(crate) fn new(channel: Channel, broker: Broker) -> Self {
        let rpc = ProvisionerClient::new(channel)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        Self { rpc, broker }
    }

    async fn stream(
        &self,
        operation: Operation,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        let broker_id = self.broker.next_id();
        let mut callback = ServiceRegistry::new();
        callback.register_data_source(SERVICE_VERSION, "host entity store", data_source);
        let server = self.broker.accept_and_serve(broker_id, callback).await?;

        let request = pb::DeployRequest {
            broker_id,
            options: Some(options.into()),
        };
        let closed = self.broker.closed_token();
        let mut rpc = self.rpc.clone();
        // On error the server handle drops here and the id is withdrawn.
        let remote = match operation {
            Operation::Deploy => unary(operation.call(), &closed, rpc.deploy(request)).await?,
            Operation::TearDown => unary(operation.call(), &closed, rpc.tear_down(request)).await?,
        };
        Ok(status_stream(operation, remote, server, cancel))
    }
}

struct StreamState {
    operation: Operation,
    remote: Streaming<pb::DeployStatus>,
    _server: BrokerServer,
    cancel: CancellationToken,
}

/// Adapts the remote stream, keeping the broker server alive until it ends.
///
/// A broken connection is reported as one final failed status rather than a
/// silent end, so the caller can tell it apart from a completed run.
fn status_stream(
    operation: Operation,
    remote: Streaming<pb::DeployStatus>,
    server: BrokerServer,
    cancel: CancellationToken,
) -> StatusStream {
    let state = StreamState {
        operation,
        remote,
        _server: server,
        cancel,
    };
    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        let next = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => return None,
            next = state.remote.message() => next,
        };
        match next {
            Ok(Some(status)) => Some((Status::from(status), Some(state))),
            Ok(None) => None,
            Err(e) => {
                let failure = Status {
                    stage: "Disconnected".to_string(),
                    message: format!(
                        "{} stream from plugin ended unexpectedly",
                        state.operation.call()
                    ),
                    done: true,
                    error: Some(e.message().to_string()),
                };
                Some((failure, None))
            }
        }
    })
    .boxed()
}

#[async_trait]
impl Provision for ProvisionClient {
    async fn validate(&self) -> Result<(), ZonectlError> {
        unary(
            "provision.validate",
            &self.broker.closed_token(),
            self.rpc.clone().validate(pb::Empty {}),
        )
        .await?;
        Ok(())
    }

    async fn deploy(
        &self,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        self.stream(Operation::Deploy, data_source, options, cancel)
            .await
    }

    async fn tear_down(
        &self,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        self.stream(Operation::TearDown, data_source, options, cancel)
            .await
    }
}

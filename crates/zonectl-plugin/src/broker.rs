// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serving and dialing extra services by numeric id.
//!
//! This is how a plugin calls back into the host. During `deploy` the host
//! starts a second gRPC server on a loopback port, announces it on the
//! broker stream under a fresh id, and sends the id with the request. The
//! plugin waits for that announcement and dials the address it names.
//!
//! The broker stream is a single bidirectional `GrpcBroker.StartStream` call
//! opened by the host right after connecting. When it ends, the peer is gone:
//! the broker closes, every brokered server stops and pending dials fail.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::{Request, Response, Streaming};
use tracing::{debug, warn};
use zonectl_core::ZonectlError;

use crate::proto::grpc_broker_server::GrpcBroker;
use crate::proto::ConnInfo;
use crate::registry::ServiceRegistry;
use crate::transport;

/// Announcements not yet picked up by the broker stream.
const ANNOUNCE_BUFFER: usize = 16;

/// How long `dial` waits for the peer to announce an id.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

const NETWORK_TCP: &str = "tcp";

struct Inner {
    next_id: AtomicU32,
    outbound: mpsc::Sender<ConnInfo>,
    unclaimed: Mutex<Option<mpsc::Receiver<ConnInfo>>>,
    announced: DashMap<u32, ConnInfo>,
    arrival: Notify,
    serving: DashMap<u32, CancellationToken>,
    closed: CancellationToken,
}

/// One side's view of the broker. Cheap to clone.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("serving", &self.serving())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Broker {
    pub(crate) fn new() -> Self {
        let (outbound, unclaimed) = mpsc::channel(ANNOUNCE_BUFFER);
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU32::new(1),
                outbound,
                unclaimed: Mutex::new(Some(unclaimed)),
                announced: DashMap::new(),
                arrival: Notify::new(),
                serving: DashMap::new(),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Allocate an id that is not yet served on this side.
    pub fn next_id(&self) -> u32 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of brokered servers currently running on this side.
    pub fn serving(&self) -> usize {
        self.inner.serving.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the peer is gone or [`close`](Self::close) was called.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    /// Stop every brokered server and fail pending and future dials.
    pub fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();
        self.inner.arrival.notify_waiters();
        for entry in self.inner.serving.iter() {
            entry.value().cancel();
        }
        debug!("broker closed");
    }

    /// The outgoing half of the broker stream. Only the first caller gets it.
    pub(crate) fn take_outbound(&self) -> Option<BoxStream<'static, ConnInfo>> {
        let receiver = self.inner.unclaimed.lock().ok()?.take()?;
        let closed = self.inner.closed.clone();
        Some(
            ReceiverStream::new(receiver)
                .take_until(async move { closed.cancelled().await })
                .boxed(),
        )
    }

    /// Read the peer's announcements until its half of the stream ends.
    pub(crate) fn spawn_inbound(&self, mut inbound: Streaming<ConnInfo>) {
        let broker = self.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = broker.inner.closed.cancelled() => break,
                    next = inbound.message() => next,
                };
                match next {
                    Ok(Some(info)) => {
                        debug!(id = info.service_id, address = %info.address, "peer announced a service");
                        broker.inner.announced.insert(info.service_id, info);
                        broker.inner.arrival.notify_waiters();
                    }
                    Ok(None) => {
                        debug!("broker stream ended");
                        break;
                    }
                    Err(status) => {
                        debug!(error = %status, "broker stream failed");
                        break;
                    }
                }
            }
            broker.close();
        });
    }

    /// Serve `registry` under `id` until the returned handle is stopped or dropped.
    pub async fn accept_and_serve(
        &self,
        id: u32,
        registry: ServiceRegistry,
    ) -> Result<BrokerServer, ZonectlError> {
        if self.is_closed() {
            return Err(ZonectlError::transport("plugin connection is closed"));
        }
        let token = match self.inner.serving.entry(id) {
            Entry::Occupied(_) => {
                return Err(ZonectlError::AlreadyExists {
                    kind: "broker id",
                    name: id.to_string(),
                });
            }
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                token
            }
        };
        // From here on the handle withdraws the id on every exit path.
        let server = BrokerServer {
            id,
            token: token.clone(),
            broker: self.clone(),
        };

        let (listener, address) = transport::listen().await?;
        let router = registry.routes(self, &token);
        tokio::spawn(async move {
            if let Err(e) = transport::serve(router, listener, token).await {
                warn!(id, error = %e, "brokered server failed");
            }
        });

        let info = ConnInfo {
            service_id: id,
            network: NETWORK_TCP.to_string(),
            address: address.clone(),
        };
        self.inner
            .outbound
            .send(info)
            .await
            .map_err(|_| ZonectlError::transport("plugin connection is closed"))?;
        debug!(id, %address, "serving brokered service");
        Ok(server)
    }

    /// Connect to the service the peer announced under `id`.
    pub async fn dial(&self, id: u32) -> Result<Channel, ZonectlError> {
        let info = self.wait_for(id).await?;
        if info.network != NETWORK_TCP {
            return Err(ZonectlError::transport(format!(
                "broker id {id} uses unsupported network {:?}",
                info.network
            )));
        }
        transport::connect(&info.address).await
    }

    async fn wait_for(&self, id: u32) -> Result<ConnInfo, ZonectlError> {
        let deadline = tokio::time::Instant::now() + DIAL_TIMEOUT;
        loop {
            let arrival = self.inner.arrival.notified();
            let mut arrival = std::pin::pin!(arrival);
            arrival.as_mut().enable();

            if let Some((_, info)) = self.inner.announced.remove(&id) {
                return Ok(info);
            }
            if self.is_closed() {
                return Err(ZonectlError::transport(format!(
                    "plugin connection closed before broker id {id} was announced"
                )));
            }
            tokio::select! {
                _ = arrival => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ZonectlError::Timeout { duration: DIAL_TIMEOUT });
                }
            }
        }
    }
}

/// A brokered server. Stopped, and its id withdrawn, when dropped.
#[derive(Debug)]
pub struct BrokerServer {
    id: u32,
    token: CancellationToken,
    broker: Broker,
}

impl BrokerServer {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn stop(self) {}
}

impl Drop for BrokerServer {
    fn drop(&mut self) {
        self.token.cancel();
        self.broker.inner.serving.remove(&self.id);
        debug!(id = self.id, "brokered service stopped");
    }
}

/// The plugin's end of `GrpcBroker.StartStream`.
pub(crate) struct BrokerService {
    broker: Broker,
}

impl BrokerService {
    pub(crate) fn new(broker: Broker) -> Self {
        Self { broker }
    }
}

type ConnInfoStream = Pin<Box<dyn Stream<Item = Result<ConnInfo, tonic::Status>> + Send>>;

#[tonic::async_trait]
impl GrpcBroker for BrokerService {
    type StartStreamStream = ConnInfoStream;

    async fn start_stream(
        &self,
        request: Request<Streaming<ConnInfo>>,
    ) -> Result<Response<Self::StartStreamStream>, tonic::Status> {
        let outbound = self
            .broker
            .take_outbound()
            .ok_or_else(|| tonic::Status::failed_precondition("broker stream already started"))?;
        self.broker.spawn_inbound(request.into_inner());
        debug!("broker stream started");
        Ok(Response::new(Box::pin(outbound.map(Ok))))
    }
}

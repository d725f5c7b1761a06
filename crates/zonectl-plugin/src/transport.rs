// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel and listener settings shared by the host and the plugin.
//!
//! Both directions run plain HTTP/2 over loopback TCP. A side that stops
//! reading a status stream holds at most one stream window of unread data;
//! the producer on the other side is not polled again until the reader
//! releases it.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::{Channel, Endpoint, Server};
use tracing::{debug, warn};
use zonectl_core::{Code, RpcStatus, ZonectlError};

use crate::convert::from_grpc;

/// Largest message either side encodes or accepts.
pub(crate) const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Per-stream HTTP/2 receive window.
pub(crate) const STREAM_WINDOW: u32 = 64 * 1024;

/// Per-connection HTTP/2 receive window.
pub(crate) const CONNECTION_WINDOW: u32 = 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A server builder with the shared flow-control settings.
pub(crate) fn server() -> Server {
    Server::builder()
        .initial_stream_window_size(STREAM_WINDOW)
        .initial_connection_window_size(CONNECTION_WINDOW)
}

/// Connects to a listener announced as `address` (`host:port`).
pub(crate) async fn connect(address: &str) -> Result<Channel, ZonectlError> {
    let endpoint = Endpoint::from_shared(format!("http://{address}"))
        .map_err(|e| ZonectlError::Transport {
            message: format!("invalid plugin address {address}"),
            source: Some(Box::new(e)),
        })?
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_nodelay(true)
        .initial_stream_window_size(STREAM_WINDOW)
        .initial_connection_window_size(CONNECTION_WINDOW);

    let channel = endpoint
        .connect()
        .await
        .map_err(|e| ZonectlError::Transport {
            message: format!("failed to connect to plugin at {address}"),
            source: Some(Box::new(e)),
        })?;
    debug!(%address, "connected");
    Ok(channel)
}

/// Binds a fresh loopback listener.
pub(crate) async fn listen() -> Result<(TcpListener, String), ZonectlError> {
    let listen_err = |e: std::io::Error| ZonectlError::Transport {
        message: "failed to open a loopback listener".into(),
        source: Some(Box::new(e)),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.map_err(listen_err)?;
    let address = listener.local_addr().map_err(listen_err)?.to_string();
    Ok((listener, address))
}

/// Serves `router` on `listener` until `stop` fires and open calls drain.
pub(crate) async fn serve(
    router: Router,
    listener: TcpListener,
    stop: CancellationToken,
) -> Result<(), ZonectlError> {
    let incoming = TcpListenerStream::new(listener).inspect(|conn| {
        if let Ok(conn) = conn {
            let _ = conn.set_nodelay(true);
        }
    });
    router
        .serve_with_incoming_shutdown(incoming, async move { stop.cancelled().await })
        .await
        .map_err(|e| {
            warn!(error = %e, "grpc server failed");
            ZonectlError::Transport {
                message: "plugin server failed".into(),
                source: Some(Box::new(e)),
            }
        })
}

/// Runs one unary call, failing fast once the connection is known to be gone.
pub(crate) async fn unary<T, F>(
    call: &str,
    closed: &CancellationToken,
    request: F,
) -> Result<T, ZonectlError>
where
    F: Future<Output = Result<tonic::Response<T>, tonic::Status>>,
{
    if closed.is_cancelled() {
        return Err(disconnected(call));
    }
    tokio::select! {
        biased;
        _ = closed.cancelled() => Err(disconnected(call)),
        reply = request => reply
            .map(tonic::Response::into_inner)
            .map_err(|status| from_grpc(call, status)),
    }
}

fn disconnected(call: &str) -> ZonectlError {
    ZonectlError::from_status(
        call,
        RpcStatus::new(Code::Unavailable, "plugin connection is closed"),
    )
}

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A host attached over loopback gRPC to a plugin served in the same process.
//!
//! The host reaches the plugin through a small TCP relay so a test can cut
//! the connection the way a crashing plugin would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use zonectl_config::MemoryLoader;
use zonectl_core::{
    Code, DataSource, DeployOptions, Provision, Status, StatusStream, TrustZone, ZonectlError,
};
use zonectl_plugin::{
    serve_on, Handshake, LaunchOptions, Network, PluginClient, ServiceRegistry,
    DATASOURCE_SERVICE, PROVISION_SERVICE, SERVICE_VERSION,
};
use zonectl_store::LocalDataSource;

const WAIT: Duration = Duration::from_secs(5);

fn status(stage: &str, message: &str) -> Status {
    Status {
        stage: stage.into(),
        message: message.into(),
        done: false,
        error: None,
    }
}

fn zone(name: &str, domain: &str) -> TrustZone {
    TrustZone {
        name: name.into(),
        trust_domain: domain.into(),
        ..Default::default()
    }
}

async fn store(zones: &[(&str, &str)]) -> Arc<LocalDataSource> {
    let store = LocalDataSource::new(MemoryLoader::new()).unwrap();
    store.init(Vec::new()).await.unwrap();
    for (name, domain) in zones {
        store.add_trust_zone(&zone(name, domain)).await.unwrap();
    }
    Arc::new(store)
}

/// Reports one status per trust zone it finds through the data source it is given.
struct ListingProvision;

#[async_trait]
impl Provision for ListingProvision {
    async fn validate(&self) -> Result<(), ZonectlError> {
        Ok(())
    }

    async fn deploy(
        &self,
        data_source: Arc<dyn DataSource>,
        _options: DeployOptions,
        _cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        let zones = data_source.list_trust_zones().await?;
        let statuses: Vec<Status> = zones
            .iter()
            .map(|tz| status("Installing", &tz.name))
            .collect();
        Ok(futures::stream::iter(statuses).boxed())
    }

    async fn tear_down(
        &self,
        _data_source: Arc<dyn DataSource>,
        _options: DeployOptions,
        _cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        Err(ZonectlError::FailedPrecondition("nothing deployed".into()))
    }
}

/// Emits one status and then never finishes, recording when it is cancelled.
struct LingeringProvision {
    cancelled: Arc<Notify>,
}

#[async_trait]
impl Provision for LingeringProvision {
    async fn validate(&self) -> Result<(), ZonectlError> {
        Ok(())
    }

    async fn deploy(
        &self,
        _data_source: Arc<dyn DataSource>,
        _options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        let cancelled = self.cancelled.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            cancelled.notify_one();
        });
        Ok(futures::stream::iter([status("Installing", "tz1")])
            .chain(futures::stream::pending())
            .boxed())
    }

    async fn tear_down(
        &self,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        self.deploy(data_source, options, cancel).await
    }
}

/// Produces `total` statuses as fast as it is polled, counting each one.
struct FloodingProvision {
    total: usize,
    produced: Arc<AtomicUsize>,
}

#[async_trait]
impl Provision for FloodingProvision {
    async fn validate(&self) -> Result<(), ZonectlError> {
        Ok(())
    }

    async fn deploy(
        &self,
        _data_source: Arc<dyn DataSource>,
        _options: DeployOptions,
        _cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        let produced = self.produced.clone();
        let padding = "x".repeat(100);
        Ok(futures::stream::iter(0..self.total)
            .map(move |n| {
                produced.fetch_add(1, Ordering::SeqCst);
                status("Installing", &format!("{n} {padding}"))
            })
            .boxed())
    }

    async fn tear_down(
        &self,
        data_source: Arc<dyn DataSource>,
        options: DeployOptions,
        cancel: CancellationToken,
    ) -> Result<StatusStream, ZonectlError> {
        self.deploy(data_source, options, cancel).await
    }
}

/// Relays loopback TCP connections to `upstream` until severed.
struct Relay {
    address: String,
    accept: JoinHandle<()>,
    connections: Arc<Mutex<Vec<AbortHandle>>>,
}

impl Relay {
    async fn start(upstream: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let connections = Arc::new(Mutex::new(Vec::new()));
        let accept = {
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((mut inbound, _)) = listener.accept().await {
                    let upstream = upstream.clone();
                    let relay = tokio::spawn(async move {
                        if let Ok(mut outbound) = TcpStream::connect(&upstream).await {
                            let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                        }
                    });
                    connections.lock().unwrap().push(relay.abort_handle());
                }
            })
        };
        Self {
            address,
            accept,
            connections,
        }
    }

    /// Drop every relayed connection, as if the plugin process died.
    fn sever(&self) {
        self.accept.abort();
        for connection in self.connections.lock().unwrap().drain(..) {
            connection.abort();
        }
    }
}

struct Attached {
    client: PluginClient,
    relay: Relay,
    _cancel: CancellationToken,
}

async fn attach(registry: ServiceRegistry) -> Attached {
    let (writer, reader) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();
    tokio::spawn(serve_on(registry, cancel.clone(), writer));

    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await.unwrap();
    let announced: Handshake = line.parse().unwrap();

    let relay = Relay::start(announced.address).await;
    let via_relay = Handshake::announce(Network::Tcp, relay.address.clone());
    let client = PluginClient::attach("test-plugin", &via_relay, &LaunchOptions::default())
        .await
        .unwrap();
    Attached {
        client,
        relay,
        _cancel: cancel,
    }
}

async fn connect(plugin_store: Arc<dyn DataSource>, provision: Arc<dyn Provision>) -> Attached {
    let mut registry = ServiceRegistry::new();
    registry.register_data_source(SERVICE_VERSION, "entity store", plugin_store);
    registry.register_provision(SERVICE_VERSION, "provisioner", provision);
    attach(registry).await
}

#[tokio::test]
async fn datasource_calls_reach_the_plugin_store() {
    let plugin_store = store(&[]).await;
    let plugin = connect(plugin_store.clone(), Arc::new(ListingProvision)).await;
    let client = plugin.client.datasource().await.unwrap();

    client.validate().await.unwrap();
    let added = client.add_trust_zone(&zone("tz1", "td1")).await.unwrap();
    assert!(!added.id.is_empty());

    let zones = plugin_store.list_trust_zones().await.unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(client.get_trust_zone("tz1").await.unwrap(), zones[0]);
}

#[tokio::test]
async fn remote_errors_keep_their_code_and_name_the_call() {
    let plugin = connect(store(&[("tz1", "td1")]).await, Arc::new(ListingProvision)).await;
    let client = plugin.client.datasource().await.unwrap();

    let err = client.add_trust_zone(&zone("tz1", "td9")).await.unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
    let text = err.to_string();
    assert!(text.contains("datasource.add_trust_zone"), "{text}");
    assert!(text.contains("already exists"), "{text}");

    let err = client.get_trust_zone("missing").await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn uninitialised_plugin_store_is_a_failed_precondition() {
    let empty = Arc::new(LocalDataSource::new(MemoryLoader::new()).unwrap());
    let plugin = connect(empty, Arc::new(ListingProvision)).await;
    let err = plugin
        .client
        .datasource()
        .await
        .unwrap()
        .list_trust_zones()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
}

#[tokio::test]
async fn unsupported_version_and_missing_service_are_unimplemented() {
    let mut registry = ServiceRegistry::new();
    registry.register_data_source(SERVICE_VERSION, "entity store", store(&[]).await);
    let plugin = attach(registry).await;

    let err = plugin
        .client
        .dispense(DATASOURCE_SERVICE, SERVICE_VERSION + 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
    assert!(err.to_string().contains("controller.dispense"), "{err}");

    let err = plugin.client.provision().await.unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
    assert!(err.to_string().contains(PROVISION_SERVICE), "{err}");
}

#[tokio::test]
async fn plugin_provisioner_sees_exactly_the_host_trust_zones() {
    // The plugin's own store is empty; everything it lists must come from the host.
    let plugin = connect(store(&[]).await, Arc::new(ListingProvision)).await;
    let host_store = store(&[("tz1", "td1"), ("tz2", "td2")]).await;

    let statuses: Vec<Status> = plugin
        .client
        .provision()
        .await
        .unwrap()
        .deploy(host_store, DeployOptions::default(), CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;

    let names: Vec<&str> = statuses.iter().map(|s| s.message.as_str()).collect();
    assert_eq!(names, vec!["tz1", "tz2"]);
    assert_eq!(
        plugin.client.broker().serving(),
        0,
        "callback server outlived the stream"
    );
}

#[tokio::test]
async fn failure_to_start_a_stream_is_an_error_and_withdraws_the_callback() {
    let plugin = connect(store(&[]).await, Arc::new(ListingProvision)).await;
    let err = plugin
        .client
        .provision()
        .await
        .unwrap()
        .tear_down(store(&[]).await, DeployOptions::default(), CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(plugin.client.broker().serving(), 0);
}

#[tokio::test]
async fn cancelling_the_host_stream_cancels_the_plugin_producer() {
    let cancelled = Arc::new(Notify::new());
    let plugin = connect(
        store(&[]).await,
        Arc::new(LingeringProvision {
            cancelled: cancelled.clone(),
        }),
    )
    .await;

    let cancel = CancellationToken::new();
    let mut stream = plugin
        .client
        .provision()
        .await
        .unwrap()
        .deploy(store(&[]).await, DeployOptions::default(), cancel.clone())
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().message, "tz1");

    cancel.cancel();
    let next = tokio::time::timeout(WAIT, stream.next()).await.unwrap();
    assert!(next.is_none());
    drop(stream);

    tokio::time::timeout(WAIT, cancelled.notified())
        .await
        .expect("plugin producer was never cancelled");
    assert_eq!(plugin.client.broker().serving(), 0);
}

#[tokio::test]
async fn plugin_exit_mid_stream_ends_with_a_failed_status() {
    let plugin = connect(
        store(&[]).await,
        Arc::new(LingeringProvision {
            cancelled: Arc::new(Notify::new()),
        }),
    )
    .await;

    let mut stream = plugin
        .client
        .provision()
        .await
        .unwrap()
        .deploy(store(&[]).await, DeployOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().message, "tz1");

    plugin.relay.sever();
    let last = tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("stream hung after the plugin went away")
        .unwrap();
    assert!(last.is_failure());
    assert_eq!(last.stage, "Disconnected");
    assert!(tokio::time::timeout(WAIT, stream.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn calls_after_the_plugin_exits_fail_fast() {
    let plugin = connect(store(&[]).await, Arc::new(ListingProvision)).await;
    let client = plugin.client.datasource().await.unwrap();

    plugin.relay.sever();
    tokio::time::timeout(WAIT, plugin.client.broker().closed())
        .await
        .expect("host never noticed the plugin was gone");

    let err = client.list_trust_zones().await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

#[tokio::test]
async fn an_unread_status_stream_stops_the_plugin_producer() {
    const TOTAL: usize = 20_000;
    let produced = Arc::new(AtomicUsize::new(0));
    let plugin = connect(
        store(&[]).await,
        Arc::new(FloodingProvision {
            total: TOTAL,
            produced: produced.clone(),
        }),
    )
    .await;

    let stream = plugin
        .client
        .provision()
        .await
        .unwrap()
        .deploy(store(&[]).await, DeployOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    // Nobody reads for a while: the producer must stall on flow control.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let stalled_at = produced.load(Ordering::SeqCst);
    assert!(
        stalled_at < TOTAL / 2,
        "producer ran ahead of an idle reader: {stalled_at} of {TOTAL} statuses built"
    );

    let received = tokio::time::timeout(Duration::from_secs(30), stream.count())
        .await
        .expect("stream did not drain");
    assert_eq!(received, TOTAL);
    assert_eq!(produced.load(Ordering::SeqCst), TOTAL);
}

#[tokio::test]
async fn shutdown_stops_the_plugin_and_closes_the_broker() {
    let plugin = connect(store(&[]).await, Arc::new(ListingProvision)).await;
    plugin.client.shutdown().await;
    assert!(plugin.client.broker().is_closed());
    let err = plugin.client.datasource().await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

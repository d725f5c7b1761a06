// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launching a plugin subprocess and talking to it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::{debug, info, warn};
use zonectl_config::model::PluginConfig;
use zonectl_core::ZonectlError;

use crate::broker::Broker;
use crate::convert::from_grpc;
use crate::datasource::DataSourceClient;
use crate::handshake::{Handshake, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE};
use crate::proto as pb;
use crate::proto::controller_client::ControllerClient;
use crate::proto::grpc_broker_client::GrpcBrokerClient;
use crate::provision::ProvisionClient;
use crate::registry::{DATASOURCE_SERVICE, PROVISION_SERVICE, SERVICE_VERSION};
use crate::transport::{self, unary};

/// Grace period between saying goodbye and killing the child.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long the goodbye call itself may take.
const GOODBYE_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeouts applied while bringing a plugin up.
#[derive(Debug, Clone, Copy)]
pub struct LaunchOptions {
    pub handshake_timeout: Duration,
    pub ping_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from(&PluginConfig::default())
    }
}

impl From<&PluginConfig> for LaunchOptions {
    fn from(config: &PluginConfig) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            ping_timeout: Duration::from_secs(config.ping_timeout_secs),
        }
    }
}

/// A connected plugin, usually a child process of this one.
///
/// The child is killed if the client is dropped without [`shutdown`](Self::shutdown).
pub struct PluginClient {
    name: String,
    channel: Channel,
    broker: Broker,
    child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClient")
            .field("name", &self.name)
            .field("broker", &self.broker)
            .finish()
    }
}

impl PluginClient {
    /// Start the plugin at `path`, read its handshake and attach to it.
    pub async fn launch(path: &Path, options: &LaunchOptions) -> Result<Self, ZonectlError> {
        let name = plugin_name(path);
        info!(plugin = %name, path = %path.display(), "launching plugin");

        let mut child = Command::new(path)
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ZonectlError::Transport {
                message: format!("failed to start plugin {}", path.display()),
                source: Some(Box::new(e)),
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(name.clone(), "stderr", stderr));
        }

        let attached = match read_handshake(&name, &mut child, options).await {
            Ok(handshake) => Self::attach(name.clone(), &handshake, options).await,
            Err(e) => Err(e),
        };
        match attached {
            Ok(client) => {
                *client.child.lock().await = Some(child);
                Ok(client)
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "plugin failed to start");
                if let Err(kill_err) = child.kill().await {
                    debug!(plugin = %name, error = %kill_err, "plugin already gone");
                }
                Err(e)
            }
        }
    }

    /// Connect to a plugin that announced `handshake`, check it answers a
    /// ping and open the broker stream.
    pub async fn attach(
        name: impl Into<String>,
        handshake: &Handshake,
        options: &LaunchOptions,
    ) -> Result<Self, ZonectlError> {
        let name = name.into();
        handshake.validate()?;
        debug!(plugin = %name, network = %handshake.network, address = %handshake.address, "handshake accepted");

        let connecting = async {
            let channel = transport::connect(&handshake.address).await?;
            ping(&channel).await?;
            let broker = Broker::new();
            start_broker(&channel, &broker).await?;
            Ok::<_, ZonectlError>((channel, broker))
        };
        let (channel, broker) = tokio::time::timeout(options.ping_timeout, connecting)
            .await
            .map_err(|_| ZonectlError::Timeout {
                duration: options.ping_timeout,
            })??;

        debug!(plugin = %name, "plugin ready");
        Ok(Self {
            name,
            channel,
            broker,
            child: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Ask the plugin whether it offers `name` at `version`.
    pub async fn dispense(&self, name: &str, version: u32) -> Result<(), ZonectlError> {
        let request = pb::DispenseRequest {
            name: name.to_string(),
            version,
        };
        unary(
            "controller.dispense",
            &self.broker.closed_token(),
            ControllerClient::new(self.channel.clone()).dispense(request),
        )
        .await?;
        Ok(())
    }

    /// Client for the plugin's entity store.
    pub async fn datasource(&self) -> Result<DataSourceClient, ZonectlError> {
        self.dispense(DATASOURCE_SERVICE, SERVICE_VERSION).await?;
        Ok(DataSourceClient::new(
            self.channel.clone(),
            self.broker.closed_token(),
        ))
    }

    /// Client for the plugin's provisioner.
    pub async fn provision(&self) -> Result<ProvisionClient, ZonectlError> {
        self.dispense(PROVISION_SERVICE, SERVICE_VERSION).await?;
        Ok(ProvisionClient::new(self.channel.clone(), self.broker.clone()))
    }

    /// Ask the plugin to exit, close the broker and wait briefly for the
    /// child, killing it if it does not go.
    pub async fn shutdown(&self) {
        if !self.broker.is_closed() {
            let mut controller = ControllerClient::new(self.channel.clone());
            match tokio::time::timeout(GOODBYE_TIMEOUT, controller.shutdown(pb::Empty {})).await {
                Ok(Ok(_)) => debug!(plugin = %self.name, "plugin acknowledged shutdown"),
                Ok(Err(status)) => debug!(plugin = %self.name, %status, "shutdown call failed"),
                Err(_) => debug!(plugin = %self.name, "shutdown call timed out"),
            }
        }
        self.broker.close();

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(plugin = %self.name, %status, "plugin exited"),
            Ok(Err(e)) => debug!(plugin = %self.name, error = %e, "failed to wait for plugin"),
            Err(_) => {
                warn!(plugin = %self.name, "plugin did not exit, killing it");
                let _ = child.kill().await;
            }
        }
    }
}

impl Drop for PluginClient {
    fn drop(&mut self) {
        self.broker.close();
    }
}

async fn ping(channel: &Channel) -> Result<(), ZonectlError> {
    let nonce = rand::random::<u64>();
    let reply = ControllerClient::new(channel.clone())
        .ping(pb::PingRequest { nonce })
        .await
        .map_err(|status| from_grpc("controller.ping", status))?
        .into_inner();
    if reply.nonce != nonce {
        return Err(ZonectlError::Handshake(
            "plugin answered the ping with the wrong nonce".into(),
        ));
    }
    Ok(())
}

async fn start_broker(channel: &Channel, broker: &Broker) -> Result<(), ZonectlError> {
    let outbound = broker
        .take_outbound()
        .ok_or_else(|| ZonectlError::Internal("broker stream already started".into()))?;
    let inbound = GrpcBrokerClient::new(channel.clone())
        .start_stream(outbound)
        .await
        .map_err(|status| from_grpc("broker.start_stream", status))?
        .into_inner();
    broker.spawn_inbound(inbound);
    Ok(())
}

fn plugin_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn read_handshake(
    name: &str,
    child: &mut Child,
    options: &LaunchOptions,
) -> Result<Handshake, ZonectlError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ZonectlError::Internal("plugin stdout was not captured".into()))?;
    let mut lines = BufReader::new(stdout).lines();

    let line = match tokio::time::timeout(options.handshake_timeout, lines.next_line()).await {
        Err(_) => {
            return Err(ZonectlError::Timeout {
                duration: options.handshake_timeout,
            });
        }
        Ok(Err(e)) => {
            return Err(ZonectlError::Transport {
                message: format!("failed to read handshake from plugin {name}"),
                source: Some(Box::new(e)),
            });
        }
        Ok(Ok(None)) => {
            let status = child.try_wait().ok().flatten();
            return Err(ZonectlError::Handshake(match status {
                Some(status) => format!("plugin {name} exited before completing the handshake ({status})"),
                None => format!("plugin {name} exited before completing the handshake"),
            }));
        }
        Ok(Ok(Some(line))) => line,
    };
    let handshake: Handshake = line.parse()?;

    // Anything printed after the handshake is diagnostics.
    let rest = lines.into_inner();
    tokio::spawn(forward_output(name.to_string(), "stdout", rest));
    Ok(handshake)
}

async fn forward_output<R>(plugin: String, stream: &'static str, output: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%plugin, stream, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_options_follow_plugin_config() {
        let config = PluginConfig {
            handshake_timeout_secs: 3,
            ping_timeout_secs: 1,
            ..PluginConfig::default()
        };
        let options = LaunchOptions::from(&config);
        assert_eq!(options.handshake_timeout, Duration::from_secs(3));
        assert_eq!(options.ping_timeout, Duration::from_secs(1));
    }

    #[test]
    fn plugin_name_is_file_name() {
        assert_eq!(
            plugin_name(Path::new("/opt/zonectl/plugins/zonectl-connect")),
            "zonectl-connect"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_transport_error() {
        let err = PluginClient::launch(
            Path::new("/nonexistent/zonectl-connect"),
            &LaunchOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ZonectlError::Transport { .. }));
    }

    #[tokio::test]
    async fn attach_refuses_a_foreign_cookie_before_dialing() {
        let mut handshake = Handshake::announce(crate::Network::Tcp, "127.0.0.1:1");
        handshake.cookie_value = "someone-else".into();
        let err = PluginClient::attach("foreign", &handshake, &LaunchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ZonectlError::Handshake(_)), "{err}");
    }
}

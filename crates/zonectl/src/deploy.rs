// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `zonectl up` and `zonectl down`.
//!
//! Both stream progress from the selected provisioner and print one line per
//! status. Ctrl-C cancels the run; the provisioner stops its commands and
//! closes the stream.

use std::io::IsTerminal;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zonectl_config::ZonectlSettings;
use zonectl_core::{DeployOptions, Provision, Status, StatusStream, ZonectlError};
use zonectl_plugin::PluginManager;
use zonectl_provision::SpireHelm;

use crate::DeployArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Up,
    Down,
}

pub(crate) async fn up(
    manager: &PluginManager,
    settings: &ZonectlSettings,
    args: DeployArgs,
    plain: bool,
) -> Result<(), ZonectlError> {
    run(Operation::Up, manager, settings, args, plain).await
}

pub(crate) async fn down(
    manager: &PluginManager,
    settings: &ZonectlSettings,
    args: DeployArgs,
    plain: bool,
) -> Result<(), ZonectlError> {
    run(Operation::Down, manager, settings, args, plain).await
}

async fn run(
    operation: Operation,
    manager: &PluginManager,
    settings: &ZonectlSettings,
    args: DeployArgs,
    plain: bool,
) -> Result<(), ZonectlError> {
    let ds = manager.data_source().await?;
    let config = settings.provision.clone();
    let provision = manager
        .provision(move || Arc::new(SpireHelm::new(config)) as Arc<dyn Provision>)
        .await?;
    provision.validate().await?;

    let options = DeployOptions {
        kube_config: args.kubeconfig,
        skip_wait: args.skip_wait,
    };
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping");
                cancel.cancel();
            }
        })
    };

    info!(?operation, "starting");
    let stream = match operation {
        Operation::Up => provision.deploy(ds, options, cancel.clone()).await,
        Operation::Down => provision.tear_down(ds, options, cancel.clone()).await,
    };
    let use_color = !plain && std::io::stdout().is_terminal();
    let failures = match stream {
        Ok(stream) => Ok(render(stream, use_color).await),
        Err(e) => Err(e),
    };
    interrupt.abort();

    let failures = failures?;
    if cancel.is_cancelled() {
        return Err(ZonectlError::Cancelled);
    }
    if failures > 0 {
        return Err(ZonectlError::Provision(format!(
            "{failures} step(s) failed, see the output above"
        )));
    }
    Ok(())
}

/// Print every status until the stream ends. Returns the number of failures.
async fn render(mut stream: StatusStream, use_color: bool) -> usize {
    let mut failures = 0;
    while let Some(status) = stream.next().await {
        if status.is_failure() {
            failures += 1;
        }
        println!("{}", format_status(&status, use_color));
    }
    failures
}

fn format_status(status: &Status, use_color: bool) -> String {
    let detail = match &status.error {
        Some(error) if status.done => format!("{}: {error}", status.message),
        _ => status.message.clone(),
    };
    let stage = format!("{:<12}", status.stage);

    if use_color {
        use colored::Colorize;
        if status.is_failure() {
            format!("  {} {} {}", "✗".red(), stage.red(), detail.red())
        } else if status.done {
            format!("  {} {} {detail}", "✓".green(), stage.green())
        } else {
            format!("  {} {} {detail}", "…".yellow(), stage.yellow())
        }
    } else {
        let tag = if status.is_failure() {
            "[FAIL]"
        } else if status.done {
            "[OK]  "
        } else {
            "[..]  "
        };
        format!("  {tag} {stage} {detail}")
    }
}

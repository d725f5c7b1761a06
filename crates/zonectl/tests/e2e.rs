// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests that drive the built `zonectl` binary.
//!
//! Each test works in its own temporary directory, so the settings lookup
//! never sees a `zonectl.toml` from the developer's checkout. The plugin
//! tests install the binary itself as `zonectl-connect`, pointed at a data
//! file of its own, so entity writes can be traced to the process that made
//! them.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const ZONECTL: &str = env!("CARGO_BIN_EXE_zonectl");

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn plugin_dir(&self) -> PathBuf {
        self.path("plugins")
    }

    /// Install a `zonectl-connect` that runs this binary on `plugin.toml`.
    fn install_plugin(&self) {
        std::fs::create_dir_all(self.plugin_dir()).unwrap();
        let script = self.plugin_dir().join("zonectl-connect");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nZONECTL_CLI_DATA_FILE={} exec {ZONECTL} \"$@\"\n",
                self.path("plugin.toml").display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn zonectl(&self, args: &[&str]) -> Output {
        Command::new(ZONECTL)
            .args(args)
            .arg("--plain")
            .current_dir(self.dir.path())
            .env("ZONECTL_CLI_DATA_FILE", self.path("host.toml"))
            .env("ZONECTL_PLUGIN_DIR", self.plugin_dir())
            .env("ZONECTL_PLUGIN_HANDSHAKE_TIMEOUT_SECS", "20")
            .env_remove("ZONECTL_PLUGIN_MAGIC_COOKIE")
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    }

    fn ok(&self, args: &[&str]) -> String {
        let out = self.zonectl(args);
        assert!(
            out.status.success(),
            "zonectl {args:?} failed\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).into_owned()
    }

    fn fails(&self, args: &[&str]) -> String {
        let out = self.zonectl(args);
        assert!(!out.status.success(), "zonectl {args:?} unexpectedly succeeded");
        String::from_utf8_lossy(&out.stderr).into_owned()
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

#[test]
fn local_store_round_trip() {
    let ws = Workspace::new();
    ws.ok(&["init"]);
    ws.ok(&["trust-zone", "add", "--name", "tz1", "--trust-domain", "td1"]);
    ws.ok(&["trust-zone", "add", "--name", "tz2", "--trust-domain", "td2"]);
    ws.ok(&[
        "cluster",
        "add",
        "--name",
        "local1",
        "--trust-zone",
        "tz1",
        "--kubernetes-context",
        "kind-local1",
    ]);
    ws.ok(&["federation", "add", "--trust-zone", "tz1", "--remote-trust-zone", "tz2"]);
    ws.ok(&["attestation-policy", "add", "--name", "ap1", "--namespace", "demo"]);
    ws.ok(&[
        "ap-binding",
        "add",
        "--trust-zone",
        "tz1",
        "--policy",
        "ap1",
        "--federates-with",
        "tz2",
    ]);

    let zones = ws.ok(&["trust-zone", "list"]);
    assert!(zones.contains("tz1\ttrust domain td1\tclusters [local1]"));
    assert!(zones.contains("tz2\ttrust domain td2\tclusters []"));
    assert_eq!(ws.ok(&["federation", "list"]).trim(), "tz1 -> tz2");
    assert_eq!(
        ws.ok(&["ap-binding", "list", "--trust-zone", "tz1"]).trim(),
        "tz1\tap1\tfederates with tz2"
    );
    assert_eq!(
        ws.ok(&["attestation-policy", "list"]).trim(),
        "ap1\tnamespace demo"
    );

    let document = read(&ws.path("host.toml"));
    assert!(document.contains("trust_domain = \"td1\""));
}

#[test]
fn integrity_errors_fail_the_command() {
    let ws = Workspace::new();
    ws.ok(&["init"]);
    ws.ok(&["trust-zone", "add", "--name", "tz1", "--trust-domain", "td1"]);

    let stderr = ws.fails(&["trust-zone", "add", "--name", "tz1", "--trust-domain", "td9"]);
    assert!(stderr.contains("already exists"), "{stderr}");

    ws.ok(&["trust-zone", "add", "--name", "tz2", "--trust-domain", "td2"]);
    ws.ok(&["attestation-policy", "add", "--name", "ap1", "--namespace", "demo"]);
    let stderr = ws.fails(&[
        "ap-binding",
        "add",
        "--trust-zone",
        "tz1",
        "--policy",
        "ap1",
        "--federates-with",
        "tz2",
    ]);
    assert!(stderr.contains("tz2"), "{stderr}");

    let zones = ws.ok(&["trust-zone", "list"]);
    assert_eq!(zones.lines().count(), 2);
}

#[test]
fn commands_before_init_are_refused() {
    let ws = Workspace::new();
    let stderr = ws.fails(&["trust-zone", "list"]);
    assert!(stderr.contains("init"), "{stderr}");
}

#[test]
fn unknown_plugin_is_rejected_at_init() {
    let ws = Workspace::new();
    let stderr = ws.fails(&["init", "--plugin", "zonectl-other"]);
    assert!(stderr.contains("zonectl-connect"), "{stderr}");
    assert!(!ws.path("host.toml").exists());
}

#[test]
fn plugin_backend_serves_entities() {
    let ws = Workspace::new();
    ws.install_plugin();
    ws.ok(&["init", "--plugin", "zonectl-connect"]);
    ws.ok(&["trust-zone", "add", "--name", "tz1", "--trust-domain", "td1"]);
    ws.ok(&[
        "cluster",
        "add",
        "--name",
        "local1",
        "--trust-zone",
        "tz1",
        "--kubernetes-context",
        "kind-local1",
    ]);

    let zones = ws.ok(&["trust-zone", "list"]);
    assert!(zones.contains("tz1\ttrust domain td1\tclusters [local1]"), "{zones}");

    // The plugin process owns the entities; the host only records the plugin.
    let plugin_document = read(&ws.path("plugin.toml"));
    assert!(plugin_document.contains("tz1"), "{plugin_document}");
    let host_document = read(&ws.path("host.toml"));
    assert!(host_document.contains("zonectl-connect"));
    assert!(!host_document.contains("tz1"));
}

#[test]
fn plugin_errors_keep_their_meaning() {
    let ws = Workspace::new();
    ws.install_plugin();
    ws.ok(&["init", "--plugin", "zonectl-connect"]);
    ws.ok(&["trust-zone", "add", "--name", "tz1", "--trust-domain", "td1"]);

    let stderr = ws.fails(&["trust-zone", "add", "--name", "tz1", "--trust-domain", "td2"]);
    assert!(stderr.contains("already exists"), "{stderr}");
}

#[test]
fn missing_plugin_binary_is_reported() {
    let ws = Workspace::new();
    ws.ok(&["init", "--plugin", "zonectl-connect"]);
    let stderr = ws.fails(&["trust-zone", "list"]);
    assert!(stderr.contains("zonectl-connect"), "{stderr}");
}

#[test]
fn up_requires_helm() {
    let ws = Workspace::new();
    ws.ok(&["init"]);
    let out = Command::new(ZONECTL)
        .args(["up", "--plain"])
        .current_dir(ws.dir.path())
        .env("ZONECTL_CLI_DATA_FILE", ws.path("host.toml"))
        .env("ZONECTL_PROVISION_HELM_BINARY", ws.path("no-such-helm"))
        .env_remove("ZONECTL_PLUGIN_MAGIC_COOKIE")
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("no-such-helm"), "{stderr}");
}

#[test]
fn help_lists_every_command() {
    let out = Command::new(ZONECTL)
        .arg("--help")
        .env_remove("ZONECTL_PLUGIN_MAGIC_COOKIE")
        .output()
        .unwrap();
    assert!(out.status.success());
    let help = String::from_utf8_lossy(&out.stdout);
    for command in ["init", "trust-zone", "cluster", "ap-binding", "federation", "up", "down"] {
        assert!(help.contains(command), "{command} missing from help");
    }
}

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persisted trust zone document and the loaders that read and write it.
//!
//! The document is TOML with three top-level keys: `plugins`, `trustzones`
//! and `attestationpolicies`. Parsing rejects unknown fields at every level
//! and reports failures with a dotted path (`trustzones.0.clusters.1`), then a
//! schema pass checks the constraints serde cannot express.
//!
//! A [`Loader`] owns the underlying file or buffer only for the duration of a
//! single read or write.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_path_to_error::Segment;
use tracing::debug;
use zonectl_core::types::{Config, PolicyRule};
use zonectl_core::validation::{validate_trust_domain, RESERVED_POLICY_NAME};
use zonectl_core::ZonectlError;

use crate::diagnostic::ConfigError;

/// Reads and writes the whole document.
pub trait Loader: Send + Sync {
    /// Whether a backing document is present.
    fn exists(&self) -> bool;

    /// Reads and validates the document.
    fn read(&self) -> Result<Config, ZonectlError>;

    /// Validates and replaces the document.
    fn write(&self, config: &Config) -> Result<(), ZonectlError>;
}

/// Parses a document, reporting the first structural error and every schema error.
pub fn parse_document(src: &str) -> Result<Config, ZonectlError> {
    let deserializer = toml::Deserializer::new(src);
    let config: Config = serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let path = render_path(err.path());
        let detail = err.inner().message().to_string();
        schema_failure(vec![ConfigError::Schema { path, detail }])
    })?;

    let violations = validate_document(&config);
    if violations.is_empty() {
        Ok(config)
    } else {
        Err(schema_failure(violations))
    }
}

/// Serializes a document after checking it against the schema.
pub fn render_document(config: &Config) -> Result<String, ZonectlError> {
    let violations = validate_document(config);
    if !violations.is_empty() {
        return Err(schema_failure(violations));
    }
    toml::to_string_pretty(config).map_err(|e| ZonectlError::Storage {
        source: Box::new(e),
    })
}

/// Checks the constraints the serde model cannot express.
///
/// Returns every violation found, each with a dotted path.
pub fn validate_document(config: &Config) -> Vec<ConfigError> {
    let mut errors = Vec::new();
    let mut push = |path: String, detail: String| errors.push(ConfigError::Schema { path, detail });

    for (i, plugin) in config.plugins.iter().enumerate() {
        if plugin.trim().is_empty() {
            push(format!("plugins.{i}"), "must not be empty".into());
        }
    }

    let mut zone_names = HashSet::new();
    let mut trust_domains = HashSet::new();
    for (i, tz) in config.trustzones.iter().enumerate() {
        let base = format!("trustzones.{i}");
        if tz.name.trim().is_empty() {
            push(format!("{base}.name"), "must not be empty".into());
        } else if !zone_names.insert(tz.name.as_str()) {
            push(format!("{base}.name"), format!("duplicate trust zone name {}", tz.name));
        }
        if let Err(e) = validate_trust_domain(&tz.trust_domain) {
            push(format!("{base}.trust_domain"), e.to_string());
        } else if !trust_domains.insert(tz.trust_domain.as_str()) {
            push(
                format!("{base}.trust_domain"),
                format!("duplicate trust domain {}", tz.trust_domain),
            );
        }

        let mut cluster_names = HashSet::new();
        for (j, cluster) in tz.clusters.iter().enumerate() {
            let cbase = format!("{base}.clusters.{j}");
            if cluster.name.trim().is_empty() {
                push(format!("{cbase}.name"), "must not be empty".into());
            } else if !cluster_names.insert(cluster.name.as_str()) {
                push(format!("{cbase}.name"), format!("duplicate cluster name {}", cluster.name));
            }
            if cluster.kubernetes_context.trim().is_empty() {
                push(format!("{cbase}.kubernetes_context"), "must not be empty".into());
            }
            if cluster.trust_zone != tz.name {
                push(
                    format!("{cbase}.trust_zone"),
                    format!("must match the owning trust zone {}", tz.name),
                );
            }
        }

        for (j, federation) in tz.federations.iter().enumerate() {
            if federation.trust_zone != tz.name {
                push(
                    format!("{base}.federations.{j}.trust_zone"),
                    format!("must match the owning trust zone {}", tz.name),
                );
            }
            if federation.remote_trust_zone.trim().is_empty() {
                push(
                    format!("{base}.federations.{j}.remote_trust_zone"),
                    "must not be empty".into(),
                );
            }
        }

        for (j, binding) in tz.attestation_policies.iter().enumerate() {
            if binding.trust_zone != tz.name {
                push(
                    format!("{base}.attestation_policies.{j}.trust_zone"),
                    format!("must match the owning trust zone {}", tz.name),
                );
            }
            if binding.policy.trim().is_empty() {
                push(
                    format!("{base}.attestation_policies.{j}.policy"),
                    "must not be empty".into(),
                );
            }
        }
    }

    let mut policy_names = HashSet::new();
    for (i, policy) in config.attestationpolicies.iter().enumerate() {
        let base = format!("attestationpolicies.{i}");
        if policy.name.trim().is_empty() {
            push(format!("{base}.name"), "must not be empty".into());
        } else if policy.name == RESERVED_POLICY_NAME {
            push(
                format!("{base}.name"),
                format!("`{RESERVED_POLICY_NAME}` is reserved for the chart's catch-all identity"),
            );
        } else if !policy_names.insert(policy.name.as_str()) {
            push(
                format!("{base}.name"),
                format!("duplicate attestation policy name {}", policy.name),
            );
        }
        match &policy.rule {
            PolicyRule::Namespace { namespace } if namespace.trim().is_empty() => {
                push(format!("{base}.rule.namespace"), "must not be empty".into());
            }
            PolicyRule::Annotated { annotations } if annotations.is_empty() => {
                push(
                    format!("{base}.rule.annotations"),
                    "must contain at least one annotation".into(),
                );
            }
            _ => {}
        }
    }

    errors
}

/// Renders a serde path as `trustzones.0.name`.
fn render_path(path: &serde_path_to_error::Path) -> String {
    let parts: Vec<String> = path
        .iter()
        .map(|segment| match segment {
            Segment::Seq { index } => index.to_string(),
            Segment::Map { key } => key.clone(),
            Segment::Enum { variant } => variant.clone(),
            Segment::Unknown => "?".to_string(),
        })
        .collect();
    if parts.is_empty() {
        "<root>".to_string()
    } else {
        parts.join(".")
    }
}

fn schema_failure(errors: Vec<ConfigError>) -> ZonectlError {
    let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    ZonectlError::Config(lines.join("\n"))
}

/// Loads the document from a file on disk.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a reader never observes a half-written document.
#[derive(Debug, Clone)]
pub struct FileLoader {
    path: PathBuf,
}

impl FileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Loader for FileLoader {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn read(&self) -> Result<Config, ZonectlError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| ZonectlError::Storage {
            source: Box::new(e),
        })?;
        debug!(path = %self.path.display(), bytes = content.len(), "read data document");
        parse_document(&content).map_err(|e| match e {
            ZonectlError::Config(msg) => {
                ZonectlError::Config(format!("{}: {msg}", self.path.display()))
            }
            other => other,
        })
    }

    fn write(&self, config: &Config) -> Result<(), ZonectlError> {
        let content = render_document(config)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| ZonectlError::Storage {
            source: Box::new(e),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| ZonectlError::Storage {
            source: Box::new(e),
        })?;
        tmp.write_all(content.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| ZonectlError::Storage {
                source: Box::new(e),
            })?;
        tmp.persist(&self.path).map_err(|e| ZonectlError::Storage {
            source: Box::new(e.error),
        })?;
        debug!(path = %self.path.display(), bytes = content.len(), "wrote data document");
        Ok(())
    }
}

/// Keeps the document in memory, serialized exactly as a file would be.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    buffer: Mutex<Option<String>>,
}

impl MemoryLoader {
    /// An empty loader: `exists()` is false until the first write.
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader pre-populated with raw document text.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            buffer: Mutex::new(Some(content.into())),
        }
    }

    /// A loader pre-populated with a document.
    pub fn with_config(config: &Config) -> Result<Self, ZonectlError> {
        Ok(Self::with_content(render_document(config)?))
    }

    /// The raw document text, if any.
    pub fn content(&self) -> Option<String> {
        self.buffer.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Loader for MemoryLoader {
    fn exists(&self) -> bool {
        self.buffer.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    fn read(&self) -> Result<Config, ZonectlError> {
        let content = self
            .buffer
            .lock()
            .map_err(|_| ZonectlError::Internal("memory loader lock poisoned".into()))?
            .clone()
            .ok_or(ZonectlError::NotInitialized)?;
        parse_document(&content)
    }

    fn write(&self, config: &Config) -> Result<(), ZonectlError> {
        let content = render_document(config)?;
        let mut guard = self
            .buffer
            .lock()
            .map_err(|_| ZonectlError::Internal("memory loader lock poisoned".into()))?;
        *guard = Some(content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonectl_core::types::{AttestationPolicy, Cluster, TrustZone};

    fn sample() -> Config {
        Config {
            plugins: vec![],
            trustzones: vec![TrustZone {
                id: "1".into(),
                name: "tz1".into(),
                trust_domain: "td1".into(),
                clusters: vec![Cluster {
                    id: "2".into(),
                    name: "local1".into(),
                    trust_zone: "tz1".into(),
                    kubernetes_context: "kind-local1".into(),
                    ..Cluster::default()
                }],
                ..TrustZone::default()
            }],
            attestationpolicies: vec![AttestationPolicy {
                id: "3".into(),
                name: "ap1".into(),
                rule: PolicyRule::Namespace {
                    namespace: "demo".into(),
                },
            }],
        }
    }

    #[test]
    fn missing_field_is_path_qualified() {
        let src = r#"
[[trustzones]]
trust_domain = "td1"
"#;
        let err = parse_document(src).unwrap_err().to_string();
        assert!(err.contains("trustzones.0"), "got: {err}");
        assert!(err.contains("name"), "got: {err}");
    }

    #[test]
    fn unknown_nested_field_is_rejected() {
        let src = r#"
[[trustzones]]
name = "tz1"
trust_domain = "td1"
colour = "blue"
"#;
        let err = parse_document(src).unwrap_err().to_string();
        assert!(err.contains("colour"), "got: {err}");
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = parse_document("zones = []\n").unwrap_err().to_string();
        assert!(err.contains("zones"), "got: {err}");
    }

    #[test]
    fn empty_name_and_bad_domain_reported_together() {
        let src = r#"
[[trustzones]]
name = ""
trust_domain = "spiffe://td1"
"#;
        let err = parse_document(src).unwrap_err().to_string();
        assert!(err.contains("trustzones.0.name: must not be empty"), "got: {err}");
        assert!(err.contains("trustzones.0.trust_domain"), "got: {err}");
    }

    #[test]
    fn empty_document_reads_as_empty_collections() {
        let config = parse_document("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn memory_loader_round_trip() {
        let loader = MemoryLoader::new();
        assert!(!loader.exists());
        assert!(matches!(loader.read(), Err(ZonectlError::NotInitialized)));

        loader.write(&sample()).unwrap();
        assert!(loader.exists());
        assert_eq!(loader.read().unwrap(), sample());
    }

    #[test]
    fn file_loader_round_trip_and_normalizes_collections() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileLoader::new(dir.path().join("nested/zonectl-data.toml"));
        assert!(!loader.exists());

        loader.write(&sample()).unwrap();
        assert!(loader.exists());
        let read = loader.read().unwrap();
        assert_eq!(read, sample());
        assert!(read.trustzones[0].federations.is_empty());
        assert!(read.trustzones[0].attestation_policies.is_empty());
    }

    #[test]
    fn invalid_document_is_never_written() {
        let loader = MemoryLoader::new();
        let mut config = sample();
        config.trustzones[0].trust_domain = "Bad Domain".into();
        assert!(loader.write(&config).is_err());
        assert!(!loader.exists());
    }

    #[test]
    fn annotated_policy_round_trips_through_toml() {
        let mut config = sample();
        config.attestationpolicies[0].rule = PolicyRule::Annotated {
            annotations: [("spiffe.io/enabled".to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        };
        let text = render_document(&config).unwrap();
        assert_eq!(parse_document(&text).unwrap(), config);
    }

    #[test]
    fn reserved_policy_name_is_rejected() {
        let mut config = sample();
        config.attestationpolicies[0].name = "default".into();
        let text = render_document(&sample()).unwrap().replace("\"ap1\"", "\"default\"");
        let err = parse_document(&text).unwrap_err().to_string();
        assert!(err.contains("attestationpolicies.0.name"), "got: {err}");
        assert!(err.contains("reserved"), "got: {err}");

        let loader = MemoryLoader::new();
        assert!(loader.write(&config).is_err());
        assert!(!loader.exists());
    }
}

// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Settings and document errors as miette diagnostics.
//!
//! Figment reports a bad `zonectl.toml` as a chain of errors with a key path
//! but no position. [`ConfigError::from_figment`] turns each into a
//! diagnostic, points at the offending key when the file text is available,
//! and offers the closest known key for a typo.

// Triggered by the Diagnostic derive.
#![allow(unused_assignments)]

use figment::error::Kind;
use miette::{Diagnostic, GraphicalReportHandler, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler similarity a known key needs to be offered as a correction.
const MIN_SIMILARITY: f64 = 0.8;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(code(zonectl::config::unknown_key))]
    UnknownKey {
        key: String,
        /// Dotted table the key appeared in, empty at the top level.
        table: String,
        suggestion: Option<String>,
        #[help]
        help: String,
        #[label("not a zonectl setting")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("invalid type for key `{key}`: found {found}, expected {expected}")]
    #[diagnostic(code(zonectl::config::invalid_type))]
    WrongType {
        key: String,
        found: String,
        expected: String,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(zonectl::config::missing_key),
        help("set `{key}` in zonectl.toml")
    )]
    MissingKey { key: String },

    /// A settings value that parsed but makes no sense.
    #[error("validation error: {message}")]
    #[diagnostic(code(zonectl::config::validation))]
    Validation { message: String },

    /// A violation in the persisted trust zone document, with its dotted path.
    #[error("{path}: {detail}")]
    #[diagnostic(code(zonectl::config::schema))]
    Schema { path: String, detail: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(zonectl::config::other))]
    Other(String),
}

impl ConfigError {
    /// One diagnostic per error in the figment chain.
    ///
    /// `sources` pairs each settings file path with its text. With several
    /// sources, an error from a file not listed there is reported without a
    /// span.
    pub fn from_figment(err: figment::Error, sources: &[(String, String)]) -> Vec<Self> {
        err.into_iter()
            .map(|error| Self::from_figment_error(&error, sources))
            .collect()
    }

    fn from_figment_error(error: &figment::Error, sources: &[(String, String)]) -> Self {
        match &error.kind {
            Kind::UnknownField(key, known) => {
                let table = error.path.join(".");
                let suggestion = closest_key(key, known).map(str::to_string);
                let help = unknown_key_help(&table, suggestion.as_deref(), known);
                let (span, src) = match locate(error, key, sources) {
                    Some((span, src)) => (Some(span), Some(src)),
                    None => (None, None),
                };
                ConfigError::UnknownKey {
                    key: key.clone(),
                    table,
                    suggestion,
                    help,
                    span,
                    src,
                }
            }
            Kind::MissingField(key) => ConfigError::MissingKey {
                key: key.to_string(),
            },
            Kind::InvalidType(found, expected) => ConfigError::WrongType {
                key: error.path.join("."),
                found: found.to_string(),
                expected: expected.clone(),
            },
            _ => ConfigError::Other(error.to_string()),
        }
    }
}

fn unknown_key_help(table: &str, suggestion: Option<&str>, known: &[&str]) -> String {
    let scope = if table.is_empty() {
        "known sections".to_string()
    } else {
        format!("known keys in [{table}]")
    };
    match suggestion {
        Some(s) => format!("did you mean `{s}`? {scope}: {}", known.join(", ")),
        None => format!("{scope}: {}", known.join(", ")),
    }
}

/// The known key most similar to `unknown`, if any is close enough.
pub fn closest_key<'a>(unknown: &str, known: &[&'a str]) -> Option<&'a str> {
    known
        .iter()
        .map(|&candidate| (candidate, strsim::jaro_winkler(unknown, candidate)))
        .filter(|&(_, score)| score >= MIN_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(candidate, _)| candidate)
}

fn locate(
    error: &figment::Error,
    key: &str,
    sources: &[(String, String)],
) -> Option<(SourceSpan, NamedSource<String>)> {
    let file = error
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.source.as_ref())
        .and_then(|source| source.file_path())
        .map(|path| path.display().to_string());
    let (name, text) = file
        .and_then(|file| sources.iter().find(|(name, _)| *name == file))
        .or(match sources {
            [only] => Some(only),
            _ => None,
        })?;
    let offset = key_offset(text, &error.path, key)?;
    Some((
        SourceSpan::new(offset.into(), key.len()),
        NamedSource::new(name, text.clone()),
    ))
}

/// Byte offset of `key` inside the TOML table named by `table`.
///
/// Tracks `[table]` and `[[array]]` headers line by line, so a key with the
/// same name in another table is never matched. An empty `table` means the
/// keys before the first header.
pub fn key_offset(text: &str, table: &[String], key: &str) -> Option<usize> {
    let wanted = table.join(".");
    let mut current = String::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            current = trimmed.trim_matches(['[', ']']).trim().to_string();
        } else if current == wanted {
            let indent = line.len() - line.trim_start().len();
            let name = line[indent..].split([' ', '\t', '=']).next();
            if name == Some(key) {
                return Some(offset + indent);
            }
        }
        offset += line.len();
    }
    None
}

/// Print every error to stderr with miette's graphical report.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = GraphicalReportHandler::new();
    let mut out = String::new();
    for error in errors {
        if handler.render_report(&mut out, error).is_err() {
            out.push_str(&format!("Error: {error}\n"));
        }
    }
    eprint!("{out}");
}

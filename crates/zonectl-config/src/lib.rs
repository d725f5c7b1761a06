// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for zonectl.
//!
//! Two separate concerns live here. The CLI settings (`zonectl.toml`) are
//! layered with Figment from the XDG hierarchy and `ZONECTL_*` environment
//! variables, and errors are rendered through miette with typo suggestions.
//! The persisted trust zone document is handled by [`document`], which the
//! local store reads and writes through a [`Loader`].
//!
//! # Usage
//!
//! ```no_run
//! use zonectl_config::load_and_validate;
//!
//! let settings = load_and_validate().expect("settings errors");
//! println!("data file: {}", settings.cli.data_file);
//! ```

pub mod diagnostic;
pub mod document;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{ConfigError, render_errors};
pub use document::{FileLoader, Loader, MemoryLoader, parse_document, render_document};
pub use loader::{load_settings, load_settings_from_path, load_settings_from_str};
pub use model::{BUILTIN_PROVISION, CONNECT_PLUGIN, ZonectlSettings};

/// Load settings from the XDG hierarchy and validate them.
///
/// Figment errors are converted to miette diagnostics carrying source spans
/// for whichever settings files were found on disk.
pub fn load_and_validate() -> Result<ZonectlSettings, Vec<ConfigError>> {
    match loader::load_settings() {
        Ok(settings) => {
            validation::validate_settings(&settings)?;
            Ok(settings)
        }
        Err(err) => {
            let toml_sources = collect_toml_sources();
            Err(ConfigError::from_figment(err, &toml_sources))
        }
    }
}

/// Load settings from a specific file, with env overrides, and validate them.
pub fn load_and_validate_path(path: &std::path::Path) -> Result<ZonectlSettings, Vec<ConfigError>> {
    match loader::load_settings_from_path(path) {
        Ok(settings) => {
            validation::validate_settings(&settings)?;
            Ok(settings)
        }
        Err(err) => {
            let sources = std::fs::read_to_string(path)
                .map(|content| vec![(path.display().to_string(), content)])
                .unwrap_or_default();
            Err(ConfigError::from_figment(err, &sources))
        }
    }
}

/// Load settings from a TOML string and validate them.
pub fn load_and_validate_str(toml_content: &str) -> Result<ZonectlSettings, Vec<ConfigError>> {
    match loader::load_settings_from_str(toml_content) {
        Ok(settings) => {
            validation::validate_settings(&settings)?;
            Ok(settings)
        }
        Err(err) => {
            let sources = vec![("<inline>".to_string(), toml_content.to_string())];
            Err(ConfigError::from_figment(err, &sources))
        }
    }
}

fn collect_toml_sources() -> Vec<(String, String)> {
    let mut sources = Vec::new();

    if let Ok(content) = std::fs::read_to_string("zonectl.toml") {
        let path = std::env::current_dir()
            .map(|d| d.join("zonectl.toml").display().to_string())
            .unwrap_or_else(|_| "zonectl.toml".to_string());
        sources.push((path, content));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("zonectl/zonectl.toml");
        if let Ok(content) = std::fs::read_to_string(&path) {
            sources.push((path.display().to_string(), content));
        }
    }

    let system_path = std::path::Path::new("/etc/zonectl/zonectl.toml");
    if let Ok(content) = std::fs::read_to_string(system_path) {
        sources.push((system_path.display().to_string(), content));
    }

    sources
}
